/// In-memory verification index.
///
/// Same create-only semantics as the SQLite index. Everything is lost
/// when it is dropped.
use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::{AnchorRecord, VerificationIndex};
use crate::crypto::Fingerprint;
use crate::error::Result;

#[derive(Default)]
pub struct MemoryIndex {
    records: RwLock<HashMap<Fingerprint, AnchorRecord>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VerificationIndex for MemoryIndex {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<AnchorRecord>> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records.get(fingerprint).cloned())
    }

    async fn put(&self, record: &AnchorRecord) -> Result<bool> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        if records.contains_key(&record.fingerprint) {
            return Ok(false);
        }
        records.insert(record.fingerprint, record.clone());
        Ok(true)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AnchorRecord>> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<AnchorRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        all.truncate(limit);
        Ok(all)
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.records.read().unwrap_or_else(|e| e.into_inner()).len() as u64)
    }
}

/// In-memory content store.
///
/// Keeps uploads in a map keyed by a fake CID derived from the content
/// digest. Used for offline development and tests; a failure can be armed
/// to simulate an unavailable or rejecting store.
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use super::{ContentId, ContentStore, StoreError, UploadMetadata};
use crate::crypto::hash;

#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<ContentId, Vec<u8>>>,
    uploads: AtomicUsize,
    fail_with: RwLock<Option<StoreError>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following upload fail with `error` until cleared.
    pub fn fail_with(&self, error: Option<StoreError>) {
        *self.fail_with.write().unwrap_or_else(|e| e.into_inner()) = error;
    }

    /// Number of upload attempts that reached this store.
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn get(&self, id: &ContentId) -> Option<Vec<u8>> {
        self.objects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn store(
        &self,
        data: &[u8],
        _metadata: &UploadMetadata,
    ) -> Result<ContentId, StoreError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);

        if let Some(err) = self
            .fail_with
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
        {
            return Err(err);
        }

        let id = ContentId::new(format!("mem-{}", hash::digest(data).to_hex()));
        self.objects
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), data.to_vec());
        Ok(id)
    }
}

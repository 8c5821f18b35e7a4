/// Verification against the local index.
///
/// A fingerprint matches only if a record exists for exactly that
/// fingerprint. Nothing here calls the content store or the ledger, so
/// verification keeps working while either is down.
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::crypto::{digest, Fingerprint};
use crate::error::Result;
use crate::state::{AnchorRecord, VerificationIndex};

/// Outcome of a verification. Absence is a normal result, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verification {
    pub matched: bool,
    pub record: Option<AnchorRecord>,
}

pub struct Verifier {
    index: Arc<dyn VerificationIndex>,
}

impl Verifier {
    pub fn new(index: Arc<dyn VerificationIndex>) -> Self {
        Self { index }
    }

    /// Verify a hex fingerprint. Fails only on malformed input or an
    /// index read error.
    pub async fn verify(&self, fingerprint_hex: &str) -> Result<Verification> {
        let fingerprint = Fingerprint::from_hex(fingerprint_hex)?;
        self.verify_fingerprint(&fingerprint).await
    }

    pub async fn verify_fingerprint(&self, fingerprint: &Fingerprint) -> Result<Verification> {
        let record = self.index.get(fingerprint).await?;
        debug!(fingerprint = %fingerprint, matched = record.is_some(), "Verification lookup");
        Ok(Verification {
            matched: record.is_some(),
            record,
        })
    }

    /// Digest `data` locally and verify the result.
    pub async fn verify_bytes(&self, data: &[u8]) -> Result<Verification> {
        self.verify_fingerprint(&digest(data)).await
    }
}

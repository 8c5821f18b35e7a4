/// Verification index models.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::anchor::{LedgerReceipt, TransactionId};
use crate::crypto::Fingerprint;
use crate::error::{AnchorError, Result};
use crate::storage::ContentId;

/// Persisted proof that a fingerprint was anchored. Never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorRecord {
    pub fingerprint: Fingerprint,
    pub content_id: ContentId,
    pub transaction_id: TransactionId,
    /// Address that signed the ledger write.
    pub submitter: String,
    /// Block that included the transaction, if known.
    pub block_number: Option<u64>,
    /// When the ledger confirmation was observed.
    pub submitted_at: DateTime<Utc>,
}

impl AnchorRecord {
    /// Build a record from a confirmed ledger receipt.
    pub fn confirmed(fingerprint: Fingerprint, content_id: ContentId, receipt: LedgerReceipt) -> Self {
        Self {
            fingerprint,
            content_id,
            transaction_id: receipt.transaction_id,
            submitter: receipt.submitter,
            block_number: receipt.block_number,
            submitted_at: receipt.confirmed_at,
        }
    }
}

/// Row shape of the `anchor_records` table.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct AnchorRecordRow {
    pub fingerprint: String,
    pub content_id: String,
    pub transaction_id: String,
    pub submitter: String,
    pub block_number: Option<i64>,
    pub submitted_at: DateTime<Utc>,
}

impl TryFrom<AnchorRecordRow> for AnchorRecord {
    type Error = AnchorError;

    fn try_from(row: AnchorRecordRow) -> Result<Self> {
        let fingerprint = Fingerprint::from_hex(&row.fingerprint).map_err(|e| {
            AnchorError::Index(format!("corrupt fingerprint {:?}: {e}", row.fingerprint))
        })?;
        Ok(Self {
            fingerprint,
            content_id: ContentId::new(row.content_id),
            transaction_id: TransactionId::new(row.transaction_id),
            submitter: row.submitter,
            block_number: row.block_number.map(|b| b as u64),
            submitted_at: row.submitted_at,
        })
    }
}

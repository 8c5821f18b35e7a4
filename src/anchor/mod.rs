/// Ledger anchoring.
///
/// A content identifier is anchored by writing it to an append-only ledger
/// in a signed transaction. Once confirmed the write is permanent and
/// publicly visible, so the client must tell three outcomes apart:
/// confirmed, refused, and "broadcast but not yet observed".
///
/// Implementations:
/// - Ethereum-compatible chains: `storeImage(string)` contract call
/// - In-memory ledger for development and tests
pub mod ethereum;
pub mod memory;
pub mod sequencer;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::ContentId;

pub use ethereum::{EthereumConfig, EthereumLedger};
pub use memory::{MemoryLedger, MemoryLedgerMode};
pub use sequencer::{NonceSequencer, SigningCredential};

/// Opaque transaction identifier returned by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Proof that the ledger accepted a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerReceipt {
    pub transaction_id: TransactionId,
    /// Address of the credential that signed the transaction.
    pub submitter: String,
    /// Block that included the transaction, if reported.
    pub block_number: Option<u64>,
    /// When the confirmation was observed.
    pub confirmed_at: DateTime<Utc>,
}

/// Result of a submission that reached the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The transaction was included and executed successfully.
    Confirmed(LedgerReceipt),
    /// The transaction may have been broadcast but its confirmation was not
    /// observed in time. It must not be treated as success or failure.
    Unconfirmed {
        transaction_id: TransactionId,
        reason: String,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Node or network failure before anything was broadcast. Retryable.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Insufficient funds, nonce conflict, or execution revert.
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Client for an append-only ledger.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Name of the ledger (e.g., "Ethereum", "memory").
    fn name(&self) -> &str;

    /// Identity that authorizes the writes.
    fn submitter(&self) -> String;

    /// Sign and broadcast a transaction recording `content_id`. Returns as
    /// soon as the transaction id is known, without waiting for inclusion.
    async fn broadcast(&self, content_id: &ContentId) -> Result<TransactionId, LedgerError>;

    /// Wait up to `timeout` for a broadcast transaction to be included.
    /// Running out of time is `SubmitOutcome::Unconfirmed`, not an error.
    async fn await_confirmation(
        &self,
        transaction_id: &TransactionId,
        timeout: Duration,
    ) -> Result<SubmitOutcome, LedgerError>;

    /// Look up the fate of a previously broadcast transaction. Never submits.
    async fn confirmation(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<SubmitOutcome, LedgerError>;
}

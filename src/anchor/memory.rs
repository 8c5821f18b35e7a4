/// In-memory ledger.
///
/// An append-only list of recorded content ids with sequential transaction
/// ids. Behaviour can be switched to refuse, drop, or stall submissions so
/// the coordinator's failure paths can be exercised without a chain.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::{LedgerClient, LedgerError, LedgerReceipt, SubmitOutcome, TransactionId};
use crate::storage::ContentId;

/// How the next submissions behave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryLedgerMode {
    Accept,
    Unavailable,
    Reject,
    /// Record the transaction but report it as unconfirmed.
    Unconfirmed,
}

struct Entry {
    transaction_id: TransactionId,
    content_id: ContentId,
    confirmed: bool,
}

pub struct MemoryLedger {
    submitter: String,
    entries: RwLock<Vec<Entry>>,
    submissions: AtomicUsize,
    mode: RwLock<MemoryLedgerMode>,
    latency: Duration,
}

impl MemoryLedger {
    pub fn new(submitter: impl Into<String>) -> Self {
        Self {
            submitter: submitter.into(),
            entries: RwLock::new(Vec::new()),
            submissions: AtomicUsize::new(0),
            mode: RwLock::new(MemoryLedgerMode::Accept),
            latency: Duration::ZERO,
        }
    }

    /// Delay each confirmation, to widen race windows in tests.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn set_mode(&self, mode: MemoryLedgerMode) {
        *self.mode.write().unwrap_or_else(|e| e.into_inner()) = mode;
    }

    /// Number of broadcast calls received, successful or not.
    pub fn submission_count(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    /// Number of transactions written to the ledger.
    pub fn transaction_count(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Mark an unconfirmed transaction as included.
    pub fn confirm(&self, tx: &TransactionId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        match entries.iter_mut().find(|e| &e.transaction_id == tx) {
            Some(entry) => {
                entry.confirmed = true;
                true
            }
            None => false,
        }
    }

    pub fn content_ids(&self) -> Vec<ContentId> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|e| e.content_id.clone())
            .collect()
    }

    fn receipt(&self, tx: TransactionId) -> LedgerReceipt {
        LedgerReceipt {
            transaction_id: tx,
            submitter: self.submitter.clone(),
            block_number: Some(self.transaction_count() as u64),
            confirmed_at: Utc::now(),
        }
    }
}

#[async_trait]
impl LedgerClient for MemoryLedger {
    fn name(&self) -> &str {
        "memory"
    }

    fn submitter(&self) -> String {
        self.submitter.clone()
    }

    async fn broadcast(&self, content_id: &ContentId) -> Result<TransactionId, LedgerError> {
        self.submissions.fetch_add(1, Ordering::SeqCst);

        let mode = self.mode.read().unwrap_or_else(|e| e.into_inner()).clone();
        match mode {
            MemoryLedgerMode::Unavailable => {
                return Err(LedgerError::Unavailable("memory ledger offline".into()))
            }
            MemoryLedgerMode::Reject => {
                return Err(LedgerError::Rejected("memory ledger refused".into()))
            }
            MemoryLedgerMode::Accept | MemoryLedgerMode::Unconfirmed => {}
        }

        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let tx = TransactionId::new(format!("0x{:064x}", entries.len() + 1));
        entries.push(Entry {
            transaction_id: tx.clone(),
            content_id: content_id.clone(),
            confirmed: mode == MemoryLedgerMode::Accept,
        });
        Ok(tx)
    }

    async fn await_confirmation(
        &self,
        transaction_id: &TransactionId,
        timeout: Duration,
    ) -> Result<SubmitOutcome, LedgerError> {
        if self.latency > timeout {
            tokio::time::sleep(timeout).await;
            return Ok(SubmitOutcome::Unconfirmed {
                transaction_id: transaction_id.clone(),
                reason: format!("not confirmed within {} ms", timeout.as_millis()),
            });
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.confirmation(transaction_id).await
    }

    async fn confirmation(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<SubmitOutcome, LedgerError> {
        let confirmed = self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|e| &e.transaction_id == transaction_id)
            .map(|e| e.confirmed);

        match confirmed {
            Some(true) => Ok(SubmitOutcome::Confirmed(self.receipt(transaction_id.clone()))),
            Some(false) => Ok(SubmitOutcome::Unconfirmed {
                transaction_id: transaction_id.clone(),
                reason: "pending".into(),
            }),
            None => Err(LedgerError::Rejected(format!(
                "transaction {transaction_id} not found"
            ))),
        }
    }
}

/// Anchor pipeline coordinator.
///
/// Coordinates the full anchor flow for one upload:
/// 1. RECEIVED: accept the raw bytes
/// 2. HASHED: fingerprint them and check the verification index
/// 3. STORED: upload to the content store
/// 4. LEDGER_SUBMITTED: record the content id on the ledger
/// 5. INDEXED: write the anchor record
///
/// Requests for the same fingerprint run one at a time, so identical
/// uploads racing each other produce a single ledger transaction. Requests
/// for different fingerprints run concurrently.
///
/// The index is written only after the ledger confirms. A ledger outcome
/// that cannot be observed is reported as `LedgerAmbiguous` and leaves the
/// index untouched.
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::anchor::{LedgerClient, SubmitOutcome};
use crate::crypto::{digest, Fingerprint};
use crate::error::{AnchorError, Result, Stage};
use crate::locks::{KeyedGuard, KeyedLocks};
use crate::state::{AnchorRecord, VerificationIndex};
use crate::storage::{ContentId, ContentStore, UploadMetadata};

/// File name used when the upload did not carry one.
pub const DEFAULT_FILE_NAME: &str = "upload";

/// Timeouts for the external stages.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Upper bound for the content store upload, in milliseconds.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    /// Upper bound for waiting on ledger confirmation after broadcast, in
    /// milliseconds. Must cover the ledger client's own confirmation window.
    #[serde(default = "default_ledger_timeout_ms")]
    pub ledger_timeout_ms: u64,
}

fn default_store_timeout_ms() -> u64 {
    60_000
}

fn default_ledger_timeout_ms() -> u64 {
    180_000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            store_timeout_ms: default_store_timeout_ms(),
            ledger_timeout_ms: default_ledger_timeout_ms(),
        }
    }
}

/// One upload to anchor.
#[derive(Debug, Clone)]
pub struct AnchorRequest {
    pub data: Vec<u8>,
    pub file_name: String,
}

impl AnchorRequest {
    pub fn new(data: impl Into<Vec<u8>>, file_name: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            file_name: file_name.into(),
        }
    }
}

/// Result of a successful anchor call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorOutcome {
    pub record: AnchorRecord,
    /// True when the content was anchored by an earlier request and this
    /// call returned that record without touching the store or ledger.
    pub already_anchored: bool,
}

/// Runs anchor requests against a content store, a ledger and an index.
pub struct Coordinator {
    store: Arc<dyn ContentStore>,
    ledger: Arc<dyn LedgerClient>,
    index: Arc<dyn VerificationIndex>,
    locks: KeyedLocks<Fingerprint>,
    config: PipelineConfig,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn ContentStore>,
        ledger: Arc<dyn LedgerClient>,
        index: Arc<dyn VerificationIndex>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            index,
            locks: KeyedLocks::new(),
            config,
        }
    }

    pub fn index(&self) -> &Arc<dyn VerificationIndex> {
        &self.index
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerClient> {
        &self.ledger
    }

    /// Take the per-fingerprint lock shared by every writer of the index.
    pub(crate) async fn lock(&self, fingerprint: Fingerprint) -> KeyedGuard<Fingerprint> {
        self.locks.acquire(fingerprint).await
    }

    /// Anchor an upload. Idempotent per content: anchoring the same bytes
    /// again returns the first record and performs no external calls.
    ///
    /// Dropping the returned future before the ledger stage has no ledger
    /// side effect. Once the ledger stage has started it runs to completion
    /// in the background even if the caller goes away.
    pub async fn anchor(&self, request: AnchorRequest) -> Result<AnchorOutcome> {
        let span = info_span!("anchor", request_id = %Uuid::now_v7());
        self.run(request).instrument(span).await
    }

    async fn run(&self, request: AnchorRequest) -> Result<AnchorOutcome> {
        let AnchorRequest { data, file_name } = request;

        if data.is_empty() {
            return Err(AnchorError::Validation("no file content uploaded".into()).at(Stage::Received));
        }
        let file_name = if file_name.trim().is_empty() {
            DEFAULT_FILE_NAME.to_string()
        } else {
            file_name
        };
        info!(stage = %Stage::Received, bytes = data.len(), file_name = %file_name, "Upload received");

        let fingerprint = digest(&data);
        info!(stage = %Stage::Hashed, fingerprint = %fingerprint, "Content fingerprinted");

        let guard = self.lock(fingerprint).await;

        if let Some(existing) = self
            .index
            .get(&fingerprint)
            .await
            .map_err(|e| e.at(Stage::Hashed))?
        {
            info!(
                fingerprint = %fingerprint,
                tx = %existing.transaction_id,
                "Content already anchored, returning existing record"
            );
            return Ok(AnchorOutcome {
                record: existing,
                already_anchored: true,
            });
        }

        let content_id = self
            .store_content(&data, &UploadMetadata::new(file_name))
            .await?;
        info!(
            stage = %Stage::Stored,
            fingerprint = %fingerprint,
            content_id = %content_id,
            store = self.store.name(),
            "Content stored"
        );

        // From here on the ledger write may happen; it must not be cancelled
        // halfway by the caller dropping this future.
        let ledger = self.ledger.clone();
        let index = self.index.clone();
        let ledger_timeout = Duration::from_millis(self.config.ledger_timeout_ms);
        let task = tokio::spawn(
            async move {
                let _guard = guard;
                finish_anchor(ledger, index, fingerprint, content_id, ledger_timeout).await
            }
            .in_current_span(),
        );

        task.await.map_err(|e| {
            error!(fingerprint = %fingerprint, error = %e, "Anchor task aborted");
            AnchorError::Index(format!("anchor task aborted: {e}")).at(Stage::LedgerSubmitted)
        })?
    }

    async fn store_content(&self, data: &[u8], metadata: &UploadMetadata) -> Result<ContentId> {
        let timeout = Duration::from_millis(self.config.store_timeout_ms);
        match tokio::time::timeout(timeout, self.store.store(data, metadata)).await {
            Ok(Ok(id)) => Ok(id),
            Ok(Err(e)) => {
                warn!(stage = %Stage::Stored, store = self.store.name(), error = %e, "Content store upload failed");
                Err(AnchorError::from(e).at(Stage::Stored))
            }
            Err(_) => {
                warn!(stage = %Stage::Stored, store = self.store.name(), "Content store upload timed out");
                Err(AnchorError::StoreUnavailable(format!(
                    "{} upload timed out after {} ms",
                    self.store.name(),
                    timeout.as_millis()
                ))
                .at(Stage::Stored))
            }
        }
    }
}

/// Ledger and index stages. Runs detached from the caller.
async fn finish_anchor(
    ledger: Arc<dyn LedgerClient>,
    index: Arc<dyn VerificationIndex>,
    fingerprint: Fingerprint,
    content_id: ContentId,
    ledger_timeout: Duration,
) -> Result<AnchorOutcome> {
    // Broadcast is bounded by the client's own request timeouts. It is not
    // cut short here: once it returns, the transaction id is known.
    let transaction_id = ledger.broadcast(&content_id).await.map_err(|e| {
        warn!(stage = %Stage::LedgerSubmitted, fingerprint = %fingerprint, error = %e, "Ledger submission failed");
        AnchorError::from(e).at(Stage::LedgerSubmitted)
    })?;
    info!(
        stage = %Stage::LedgerSubmitted,
        fingerprint = %fingerprint,
        content_id = %content_id,
        tx = %transaction_id,
        "Ledger transaction broadcast"
    );

    let outcome = match tokio::time::timeout(
        ledger_timeout,
        ledger.await_confirmation(&transaction_id, ledger_timeout),
    )
    .await
    {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            warn!(stage = %Stage::LedgerSubmitted, fingerprint = %fingerprint, tx = %transaction_id, error = %e, "Ledger refused transaction");
            return Err(AnchorError::from(e).at(Stage::LedgerSubmitted));
        }
        Err(_) => SubmitOutcome::Unconfirmed {
            transaction_id,
            reason: format!("not confirmed within {} ms", ledger_timeout.as_millis()),
        },
    };

    let receipt = match outcome {
        SubmitOutcome::Confirmed(receipt) => receipt,
        SubmitOutcome::Unconfirmed {
            transaction_id,
            reason,
        } => {
            warn!(
                stage = %Stage::LedgerSubmitted,
                fingerprint = %fingerprint,
                content_id = %content_id,
                tx = %transaction_id,
                reason = %reason,
                "Ledger confirmation not observed, needs reconciliation"
            );
            return Err(AnchorError::LedgerAmbiguous {
                fingerprint: fingerprint.to_hex(),
                content_id: content_id.into_inner(),
                transaction_id: transaction_id.as_str().to_string(),
            }
            .at(Stage::LedgerSubmitted));
        }
    };
    info!(
        stage = %Stage::LedgerSubmitted,
        fingerprint = %fingerprint,
        tx = %receipt.transaction_id,
        block = ?receipt.block_number,
        ledger = ledger.name(),
        "Ledger write confirmed"
    );

    let record = AnchorRecord::confirmed(fingerprint, content_id, receipt);
    index_record(index.as_ref(), record).await
}

/// Write a confirmed record. Shared with reconciliation.
pub(crate) async fn index_record(
    index: &dyn VerificationIndex,
    record: AnchorRecord,
) -> Result<AnchorOutcome> {
    let inserted = index.put(&record).await.map_err(|e| {
        // The ledger write is real; only the local index is missing it.
        error!(
            stage = %Stage::Indexed,
            fingerprint = %record.fingerprint,
            content_id = %record.content_id,
            tx = %record.transaction_id,
            error = %e,
            "Confirmed anchor could not be indexed"
        );
        e.at(Stage::Indexed)
    })?;

    if inserted {
        info!(stage = %Stage::Indexed, fingerprint = %record.fingerprint, "Anchor record indexed");
        return Ok(AnchorOutcome {
            record,
            already_anchored: false,
        });
    }

    warn!(fingerprint = %record.fingerprint, "Record already present, keeping the existing one");
    let existing = index
        .get(&record.fingerprint)
        .await
        .map_err(|e| e.at(Stage::Indexed))?
        .ok_or_else(|| {
            AnchorError::Index("record vanished after conflicting insert".into()).at(Stage::Indexed)
        })?;
    Ok(AnchorOutcome {
        record: existing,
        already_anchored: true,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::anchor::{MemoryLedger, MemoryLedgerMode, TransactionId};
    use crate::state::MemoryIndex;
    use crate::storage::{MemoryStore, StoreError};

    pub(crate) struct Harness {
        pub store: Arc<MemoryStore>,
        pub ledger: Arc<MemoryLedger>,
        pub index: Arc<MemoryIndex>,
        pub coordinator: Arc<Coordinator>,
    }

    pub(crate) fn harness_with(ledger: MemoryLedger, config: PipelineConfig) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(ledger);
        let index = Arc::new(MemoryIndex::new());
        let coordinator = Arc::new(Coordinator::new(
            store.clone(),
            ledger.clone(),
            index.clone(),
            config,
        ));
        Harness {
            store,
            ledger,
            index,
            coordinator,
        }
    }

    pub(crate) fn harness() -> Harness {
        harness_with(MemoryLedger::new("0xsubmitter"), PipelineConfig::default())
    }

    #[tokio::test]
    async fn test_anchor_success_indexes_record() {
        let h = harness();
        let outcome = h
            .coordinator
            .anchor(AnchorRequest::new(b"ABC".to_vec(), "abc.png"))
            .await
            .unwrap();

        assert!(!outcome.already_anchored);
        assert_eq!(outcome.record.fingerprint, digest(b"ABC"));
        assert_eq!(outcome.record.submitter, "0xsubmitter");
        assert_eq!(
            h.store.get(&outcome.record.content_id).unwrap(),
            b"ABC".to_vec()
        );
        assert_eq!(h.ledger.content_ids(), vec![outcome.record.content_id.clone()]);
        assert_eq!(
            h.index.get(&digest(b"ABC")).await.unwrap(),
            Some(outcome.record)
        );
    }

    #[tokio::test]
    async fn test_anchor_twice_one_transaction() {
        let h = harness();
        let first = h
            .coordinator
            .anchor(AnchorRequest::new(b"same".to_vec(), "a.png"))
            .await
            .unwrap();
        let second = h
            .coordinator
            .anchor(AnchorRequest::new(b"same".to_vec(), "renamed.png"))
            .await
            .unwrap();

        assert!(second.already_anchored);
        assert_eq!(second.record, first.record);
        assert_eq!(h.ledger.submission_count(), 1);
        assert_eq!(h.store.upload_count(), 1);
        assert_eq!(h.index.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_identical_uploads_one_transaction() {
        let h = harness_with(
            MemoryLedger::new("0xsubmitter").with_latency(Duration::from_millis(20)),
            PipelineConfig::default(),
        );

        let mut handles = Vec::new();
        for _ in 0..8 {
            let c = h.coordinator.clone();
            handles.push(tokio::spawn(async move {
                c.anchor(AnchorRequest::new(b"race".to_vec(), "r.png")).await
            }));
        }

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(h.ledger.transaction_count(), 1);
        assert_eq!(outcomes.iter().filter(|o| !o.already_anchored).count(), 1);
        let tx = &outcomes[0].record.transaction_id;
        assert!(outcomes.iter().all(|o| &o.record.transaction_id == tx));
    }

    #[tokio::test]
    async fn test_different_content_runs_concurrently() {
        let h = harness_with(
            MemoryLedger::new("0xsubmitter").with_latency(Duration::from_millis(200)),
            PipelineConfig::default(),
        );

        let start = tokio::time::Instant::now();
        let a = h.coordinator.anchor(AnchorRequest::new(b"one".to_vec(), "1.png"));
        let b = h.coordinator.anchor(AnchorRequest::new(b"two".to_vec(), "2.png"));
        let (a, b) = tokio::join!(a, b);
        a.unwrap();
        b.unwrap();

        assert_eq!(h.ledger.transaction_count(), 2);
        assert!(start.elapsed() < Duration::from_millis(390));
    }

    #[tokio::test]
    async fn test_empty_upload_is_validation_error() {
        let h = harness();
        let err = h
            .coordinator
            .anchor(AnchorRequest::new(Vec::new(), "empty.png"))
            .await
            .unwrap_err();
        assert!(matches!(err.kind(), AnchorError::Validation(_)));
        assert_eq!(err.stage(), Some(Stage::Received));
        assert_eq!(h.store.upload_count(), 0);
    }

    #[tokio::test]
    async fn test_store_rejected_no_ledger_no_record() {
        let h = harness();
        h.store
            .fail_with(Some(StoreError::Rejected("unsupported media".into())));

        let err = h
            .coordinator
            .anchor(AnchorRequest::new(b"ABC".to_vec(), "abc.png"))
            .await
            .unwrap_err();

        assert!(matches!(err.kind(), AnchorError::StoreRejected(_)));
        assert_eq!(err.stage(), Some(Stage::Stored));
        assert!(!err.is_retryable());
        assert_eq!(h.ledger.submission_count(), 0);
        assert_eq!(h.index.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_store_unavailable_is_retryable() {
        let h = harness();
        h.store
            .fail_with(Some(StoreError::Unavailable("connection reset".into())));

        let err = h
            .coordinator
            .anchor(AnchorRequest::new(b"ABC".to_vec(), "abc.png"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(h.ledger.submission_count(), 0);

        h.store.fail_with(None);
        let ok = h
            .coordinator
            .anchor(AnchorRequest::new(b"ABC".to_vec(), "abc.png"))
            .await
            .unwrap();
        assert!(!ok.already_anchored);
    }

    #[tokio::test]
    async fn test_ledger_rejected_no_record() {
        let h = harness();
        h.ledger.set_mode(MemoryLedgerMode::Reject);

        let err = h
            .coordinator
            .anchor(AnchorRequest::new(b"ABC".to_vec(), "abc.png"))
            .await
            .unwrap_err();

        assert!(matches!(err.kind(), AnchorError::LedgerRejected(_)));
        assert_eq!(err.stage(), Some(Stage::LedgerSubmitted));
        assert_eq!(h.store.upload_count(), 1);
        assert!(h.index.get(&digest(b"ABC")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ledger_unconfirmed_is_ambiguous() {
        let h = harness();
        h.ledger.set_mode(MemoryLedgerMode::Unconfirmed);

        let err = h
            .coordinator
            .anchor(AnchorRequest::new(b"ABC".to_vec(), "abc.png"))
            .await
            .unwrap_err();

        assert!(err.is_ambiguous());
        assert!(!err.is_retryable());
        match err.kind() {
            AnchorError::LedgerAmbiguous {
                fingerprint,
                transaction_id,
                ..
            } => {
                assert_eq!(fingerprint, &digest(b"ABC").to_hex());
                assert!(transaction_id.starts_with("0x"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(h.index.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ledger_timeout_is_ambiguous() {
        let h = harness_with(
            MemoryLedger::new("0xsubmitter").with_latency(Duration::from_millis(200)),
            PipelineConfig {
                store_timeout_ms: 1_000,
                ledger_timeout_ms: 20,
            },
        );

        let err = h
            .coordinator
            .anchor(AnchorRequest::new(b"slow".to_vec(), "s.png"))
            .await
            .unwrap_err();

        let (content_id, tx) = match err.kind() {
            AnchorError::LedgerAmbiguous {
                content_id,
                transaction_id: tx,
                ..
            } => (ContentId::new(content_id.clone()), TransactionId::new(tx.clone())),
            other => panic!("unexpected error {other:?}"),
        };
        assert_eq!(h.ledger.transaction_count(), 1);
        assert_eq!(h.index.count().await.unwrap(), 0);

        // The broadcast landed; the id is enough to backfill the index.
        let outcome = h
            .coordinator
            .reconcile(digest(b"slow"), content_id, tx.clone())
            .await
            .unwrap();
        assert_eq!(outcome.record.transaction_id, tx);
        assert_eq!(h.ledger.submission_count(), 1);
    }

    #[tokio::test]
    async fn test_ledger_unavailable_is_retryable() {
        let h = harness();
        h.ledger.set_mode(MemoryLedgerMode::Unavailable);

        let err = h
            .coordinator
            .anchor(AnchorRequest::new(b"offline".to_vec(), "o.png"))
            .await
            .unwrap_err();

        assert!(matches!(err.kind(), AnchorError::LedgerUnavailable(_)));
        assert_eq!(err.stage(), Some(Stage::LedgerSubmitted));
        assert!(err.is_retryable());
        assert_eq!(h.ledger.transaction_count(), 0);
        assert_eq!(h.index.count().await.unwrap(), 0);

        h.ledger.set_mode(MemoryLedgerMode::Accept);
        let outcome = h
            .coordinator
            .anchor(AnchorRequest::new(b"offline".to_vec(), "o.png"))
            .await
            .unwrap();
        assert!(!outcome.already_anchored);
        assert_eq!(h.ledger.transaction_count(), 1);
    }

    #[tokio::test]
    async fn test_ledger_stage_survives_caller_cancellation() {
        let h = harness_with(
            MemoryLedger::new("0xsubmitter").with_latency(Duration::from_millis(100)),
            PipelineConfig::default(),
        );

        let coordinator = h.coordinator.clone();
        let caller = tokio::spawn(async move {
            coordinator
                .anchor(AnchorRequest::new(b"walk away".to_vec(), "w.png"))
                .await
        });
        // Let the request reach the ledger stage, then disconnect.
        tokio::time::sleep(Duration::from_millis(30)).await;
        caller.abort();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.ledger.transaction_count(), 1);
        assert!(h.index.get(&digest(b"walk away")).await.unwrap().is_some());
    }
}

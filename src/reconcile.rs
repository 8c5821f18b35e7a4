/// Reconciliation of ambiguous anchors.
///
/// When a ledger confirmation was not observed in time, the anchor call
/// fails with `LedgerAmbiguous` and nothing is indexed. Once the operator
/// (or a job) knows the transaction id, this looks the transaction up and
/// backfills the index if the write did land. It never submits a new
/// transaction.
use tracing::{info, warn};

use crate::anchor::{LedgerClient, SubmitOutcome, TransactionId};
use crate::crypto::Fingerprint;
use crate::error::{AnchorError, Result, Stage};
use crate::pipeline::{index_record, AnchorOutcome, Coordinator};
use crate::state::{AnchorRecord, VerificationIndex};
use crate::storage::ContentId;

impl Coordinator {
    /// Check a previously broadcast transaction and index it if confirmed.
    ///
    /// - confirmed: the record is written (or the existing one returned)
    /// - still pending: `LedgerAmbiguous` again
    /// - reverted or unknown to the ledger: `LedgerRejected`
    pub async fn reconcile(
        &self,
        fingerprint: Fingerprint,
        content_id: ContentId,
        transaction_id: TransactionId,
    ) -> Result<AnchorOutcome> {
        let _guard = self.lock(fingerprint).await;

        if let Some(existing) = self
            .index()
            .get(&fingerprint)
            .await
            .map_err(|e| e.at(Stage::Hashed))?
        {
            info!(fingerprint = %fingerprint, "Already indexed, nothing to reconcile");
            return Ok(AnchorOutcome {
                record: existing,
                already_anchored: true,
            });
        }

        let outcome = self
            .ledger()
            .confirmation(&transaction_id)
            .await
            .map_err(|e| AnchorError::from(e).at(Stage::LedgerSubmitted))?;

        match outcome {
            SubmitOutcome::Confirmed(receipt) => {
                info!(
                    fingerprint = %fingerprint,
                    tx = %transaction_id,
                    "Transaction confirmed, backfilling index"
                );
                let record = AnchorRecord::confirmed(fingerprint, content_id, receipt);
                index_record(self.index().as_ref(), record).await
            }
            SubmitOutcome::Unconfirmed { reason, .. } => {
                warn!(fingerprint = %fingerprint, tx = %transaction_id, reason = %reason, "Still unconfirmed");
                Err(AnchorError::LedgerAmbiguous {
                    fingerprint: fingerprint.to_hex(),
                    content_id: content_id.into_inner(),
                    transaction_id: transaction_id.as_str().to_string(),
                }
                .at(Stage::LedgerSubmitted))
            }
        }
    }
}

use thiserror::Error;

use crate::anchor::LedgerError;
use crate::storage::StoreError;

/// Pipeline stage an anchor request was in when it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Received,
    Hashed,
    Stored,
    LedgerSubmitted,
    Indexed,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Received => "received",
            Stage::Hashed => "hashed",
            Stage::Stored => "stored",
            Stage::LedgerSubmitted => "ledger_submitted",
            Stage::Indexed => "indexed",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum AnchorError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Content store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Content store rejected upload: {0}")]
    StoreRejected(String),

    #[error("Ledger unavailable: {0}")]
    LedgerUnavailable(String),

    #[error("Ledger rejected transaction: {0}")]
    LedgerRejected(String),

    /// The transaction may have been broadcast but its fate is unknown.
    /// Nothing was indexed; the ids are kept so the submission can be
    /// reconciled.
    #[error("Ledger outcome unknown for content {content_id} (transaction {transaction_id})")]
    LedgerAmbiguous {
        fingerprint: String,
        content_id: String,
        transaction_id: String,
    },

    #[error("Verification index error: {0}")]
    Index(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed at stage {stage}: {source}")]
    AtStage {
        stage: Stage,
        #[source]
        source: Box<AnchorError>,
    },
}

impl AnchorError {
    /// Attach the pipeline stage to an error. Already-staged errors keep
    /// their original stage.
    pub fn at(self, stage: Stage) -> Self {
        match self {
            AnchorError::AtStage { .. } => self,
            other => AnchorError::AtStage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// The error without its stage wrapper.
    pub fn kind(&self) -> &AnchorError {
        match self {
            AnchorError::AtStage { source, .. } => source.kind(),
            other => other,
        }
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            AnchorError::AtStage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// True when the caller may safely retry the whole anchor operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            AnchorError::StoreUnavailable(_) | AnchorError::LedgerUnavailable(_)
        )
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self.kind(), AnchorError::LedgerAmbiguous { .. })
    }
}

impl From<StoreError> for AnchorError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(msg) => AnchorError::StoreUnavailable(msg),
            StoreError::Rejected(msg) => AnchorError::StoreRejected(msg),
        }
    }
}

impl From<LedgerError> for AnchorError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Unavailable(msg) => AnchorError::LedgerUnavailable(msg),
            LedgerError::Rejected(msg) => AnchorError::LedgerRejected(msg),
        }
    }
}

impl From<sqlx::Error> for AnchorError {
    fn from(e: sqlx::Error) -> Self {
        AnchorError::Index(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AnchorError>;

/// Wiring: builds the store, ledger, index, coordinator and verifier
/// selected by the configuration.
use std::sync::Arc;

use tracing::info;

use crate::anchor::{
    EthereumLedger, LedgerClient, MemoryLedger, NonceSequencer, SigningCredential,
};
use crate::config::{Config, IndexBackend, LedgerBackend, StoreBackend};
use crate::error::{AnchorError, Result};
use crate::pipeline::Coordinator;
use crate::state::{Database, MemoryIndex, VerificationIndex};
use crate::storage::{ContentStore, IpfsStore, MemoryStore, PinataStore};
use crate::verify::Verifier;

/// Everything a request handler or CLI command needs.
#[derive(Clone)]
pub struct Services {
    pub coordinator: Arc<Coordinator>,
    pub verifier: Arc<Verifier>,
}

impl Services {
    /// Assemble services around already-built collaborators.
    pub fn new(
        store: Arc<dyn ContentStore>,
        ledger: Arc<dyn LedgerClient>,
        index: Arc<dyn VerificationIndex>,
        pipeline: crate::pipeline::PipelineConfig,
    ) -> Self {
        let verifier = Arc::new(Verifier::new(index.clone()));
        let coordinator = Arc::new(Coordinator::new(store, ledger, index, pipeline));
        Self {
            coordinator,
            verifier,
        }
    }

    pub async fn from_config(config: &Config) -> Result<Self> {
        let index = build_index(config).await?;
        let store = build_store(config)?;
        let ledger = build_ledger(config)?;

        info!(
            store = store.name(),
            ledger = ledger.name(),
            submitter = %ledger.submitter(),
            "Services ready"
        );

        Ok(Self::new(store, ledger, index, config.pipeline.clone()))
    }
}

async fn build_index(config: &Config) -> Result<Arc<dyn VerificationIndex>> {
    match config.index.backend {
        IndexBackend::Sqlite => {
            let db = Database::connect(&config.index.url, config.index.max_connections).await?;
            db.migrate().await?;
            Ok(Arc::new(db))
        }
        IndexBackend::Memory => Ok(Arc::new(MemoryIndex::new())),
    }
}

fn build_store(config: &Config) -> Result<Arc<dyn ContentStore>> {
    let missing = |key: &str| AnchorError::Config(format!("missing required setting: {key}"));
    let store: Arc<dyn ContentStore> = match config.store.backend {
        StoreBackend::Ipfs => Arc::new(IpfsStore::new(
            config.store.ipfs.clone().ok_or_else(|| missing("store.ipfs"))?,
        )),
        StoreBackend::Pinata => Arc::new(PinataStore::new(
            config
                .store
                .pinata
                .clone()
                .ok_or_else(|| missing("store.pinata"))?,
        )),
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
    };
    Ok(store)
}

fn build_ledger(config: &Config) -> Result<Arc<dyn LedgerClient>> {
    match config.ledger.backend {
        LedgerBackend::Evm => {
            let evm = config
                .ledger
                .evm
                .clone()
                .ok_or_else(|| AnchorError::Config("missing required setting: ledger.evm".into()))?;
            let credential = SigningCredential::from_hex(&evm.private_key_hex)?;
            let sequencer = Arc::new(NonceSequencer::new());
            Ok(Arc::new(EthereumLedger::new(evm, credential, sequencer)?))
        }
        LedgerBackend::Memory => Ok(Arc::new(MemoryLedger::new(
            SigningCredential::random().address().to_checksum(None),
        ))),
    }
}

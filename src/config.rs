/// Service configuration.
///
/// Loaded from an optional TOML/YAML/JSON file and overridden by
/// environment variables prefixed `IMAGE_ANCHOR__`, with `__` between
/// nesting levels (e.g. `IMAGE_ANCHOR__LEDGER__EVM__PRIVATE_KEY_HEX`).
use serde::Deserialize;

use crate::anchor::EthereumConfig;
use crate::error::{AnchorError, Result};
use crate::pipeline::PipelineConfig;
use crate::storage::{IpfsConfig, PinataConfig};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub index: IndexConfig,
    pub store: StoreConfig,
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Largest accepted upload body.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_max_upload_bytes() -> usize {
    25 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_index_backend")]
    pub backend: IndexBackend,
    /// Database URL (e.g., "sqlite:image-anchor.db").
    #[serde(default = "default_index_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_index_backend() -> IndexBackend {
    IndexBackend::Sqlite
}

fn default_index_url() -> String {
    "sqlite:image-anchor.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: default_index_backend(),
            url: default_index_url(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Ipfs,
    Pinata,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub ipfs: Option<IpfsConfig>,
    pub pinata: Option<PinataConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    Evm,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    pub backend: LedgerBackend,
    pub evm: Option<EthereumConfig>,
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path).required(false))
            .add_source(
                ::config::Environment::with_prefix("IMAGE_ANCHOR")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AnchorError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| AnchorError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Parse from a TOML string. Used by tests and embedded setups.
    pub fn from_toml(source: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from_str(source, ::config::FileFormat::Toml))
            .build()
            .map_err(|e| AnchorError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| AnchorError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations missing settings for the selected backends.
    pub fn validate(&self) -> Result<()> {
        match self.store.backend {
            StoreBackend::Ipfs => {
                let ipfs = self.store.ipfs.as_ref().ok_or_else(|| missing("store.ipfs"))?;
                require("store.ipfs.api_url", &ipfs.api_url)?;
            }
            StoreBackend::Pinata => {
                let pinata = self
                    .store
                    .pinata
                    .as_ref()
                    .ok_or_else(|| missing("store.pinata"))?;
                require("store.pinata.api_key", &pinata.api_key)?;
                require("store.pinata.api_secret", &pinata.api_secret)?;
            }
            StoreBackend::Memory => {}
        }

        if self.ledger.backend == LedgerBackend::Evm {
            let evm = self.ledger.evm.as_ref().ok_or_else(|| missing("ledger.evm"))?;
            require("ledger.evm.rpc_url", &evm.rpc_url)?;
            require("ledger.evm.contract_address", &evm.contract_address)?;
            require("ledger.evm.private_key_hex", &evm.private_key_hex)?;

            // The pipeline must outlast the client's own receipt polling,
            // including the last lookup still in flight at its deadline.
            let needed = evm
                .confirmation_timeout_ms
                .saturating_add(evm.request_timeout_ms);
            if self.pipeline.ledger_timeout_ms < needed {
                return Err(AnchorError::Config(format!(
                    "pipeline.ledger_timeout_ms ({}) must be at least ledger.evm.confirmation_timeout_ms + ledger.evm.request_timeout_ms ({needed})",
                    self.pipeline.ledger_timeout_ms
                )));
            }
        }

        if self.index.backend == IndexBackend::Sqlite {
            require("index.url", &self.index.url)?;
        }

        Ok(())
    }
}

fn missing(key: &str) -> AnchorError {
    AnchorError::Config(format!("missing required setting: {key}"))
}

fn require(key: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(missing(key))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_config_with_defaults() {
        let cfg = Config::from_toml(
            r#"
            [store]
            backend = "memory"

            [ledger]
            backend = "memory"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.server.bind_addr, "0.0.0.0:5000");
        assert_eq!(cfg.index.backend, IndexBackend::Sqlite);
        assert_eq!(cfg.pipeline.store_timeout_ms, 60_000);
    }

    #[test]
    fn test_full_evm_config() {
        let cfg = Config::from_toml(
            r#"
            [server]
            bind_addr = "127.0.0.1:8080"

            [index]
            backend = "memory"

            [store]
            backend = "pinata"
            [store.pinata]
            api_key = "key"
            api_secret = "secret"

            [ledger]
            backend = "evm"
            [ledger.evm]
            rpc_url = "https://rpc-amoy.polygon.technology"
            contract_address = "0x5FbDB2315678afecb367f032d93F642f64180aa3"
            private_key_hex = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318"
            confirmation_timeout_ms = 5000

            [pipeline]
            ledger_timeout_ms = 30000
            "#,
        )
        .unwrap();

        let evm = cfg.ledger.evm.unwrap();
        assert_eq!(evm.chain_id, 80002);
        assert_eq!(evm.confirmation_timeout_ms, 5000);
        assert_eq!(cfg.pipeline.ledger_timeout_ms, 30_000);
        assert_eq!(cfg.pipeline.store_timeout_ms, 60_000);
    }

    #[test]
    fn test_missing_backend_section_fails() {
        let err = Config::from_toml(
            r#"
            [store]
            backend = "ipfs"

            [ledger]
            backend = "memory"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("store.ipfs"));
    }

    #[test]
    fn test_empty_secret_fails() {
        let err = Config::from_toml(
            r#"
            [store]
            backend = "memory"

            [ledger]
            backend = "evm"
            [ledger.evm]
            rpc_url = "http://localhost:8545"
            contract_address = "0x5FbDB2315678afecb367f032d93F642f64180aa3"
            private_key_hex = ""
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("private_key_hex"));
    }

    #[test]
    fn test_ledger_timeout_shorter_than_confirmation_fails() {
        let toml = |ledger_timeout_ms: u64| {
            format!(
                r#"
                [store]
                backend = "memory"

                [ledger]
                backend = "evm"
                [ledger.evm]
                rpc_url = "http://localhost:8545"
                contract_address = "0x5FbDB2315678afecb367f032d93F642f64180aa3"
                private_key_hex = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318"
                confirmation_timeout_ms = 60000
                request_timeout_ms = 10000

                [pipeline]
                ledger_timeout_ms = {ledger_timeout_ms}
                "#
            )
        };

        let err = Config::from_toml(&toml(60_000)).unwrap_err();
        assert!(err.to_string().contains("pipeline.ledger_timeout_ms"));
        assert!(Config::from_toml(&toml(70_000)).is_ok());
    }
}

/// Ethereum-compatible ledger anchor.
///
/// Records a content identifier by calling `storeImage(string)` on a
/// deployed contract. The contract emits an event with the identifier,
/// the sender and the block timestamp; this client only needs its ABI.
///
/// Works against any EVM chain with a JSON-RPC endpoint. The default chain
/// id is Polygon Amoy (80002).
///
/// Outcome mapping:
/// - error before broadcast: `LedgerError::Unavailable` or `Rejected`
/// - receipt with status 1: `SubmitOutcome::Confirmed`
/// - receipt with status 0: `LedgerError::Rejected` (execution reverted)
/// - broadcast, no receipt by the deadline: `SubmitOutcome::Unconfirmed`
use std::sync::Arc;
use std::time::Duration;

use alloy::consensus::SignableTransaction;
use alloy::primitives::{Address, Bytes, TxKind, U256};
use alloy::signers::Signer;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::sequencer::{NonceSequencer, SigningCredential};
use super::{LedgerClient, LedgerError, LedgerReceipt, SubmitOutcome, TransactionId};
use crate::error::AnchorError;
use crate::storage::ContentId;

alloy::sol! {
    function storeImage(string ipfsHash) external;
}

/// Configuration for Ethereum anchoring.
#[derive(Debug, Clone, Deserialize)]
pub struct EthereumConfig {
    /// JSON-RPC endpoint (e.g., Alchemy, Infura, a local node).
    pub rpc_url: String,
    /// Chain ID (80002 for Polygon Amoy, 11155111 for Sepolia).
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    /// Address of the deployed image registry contract.
    pub contract_address: String,
    /// Private key (hex) of the submitting account.
    /// In production, this would come from a KMS.
    pub private_key_hex: String,
    /// Used when gas estimation is unavailable.
    #[serde(default = "default_gas_limit")]
    pub fallback_gas_limit: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How long to wait for a receipt after broadcast.
    #[serde(default = "default_confirmation_timeout_ms")]
    pub confirmation_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_chain_id() -> u64 {
    80002
}

fn default_gas_limit() -> u64 {
    200_000
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_confirmation_timeout_ms() -> u64 {
    120_000
}

fn default_request_timeout_ms() -> u64 {
    15_000
}

/// Ethereum contract-call ledger client.
///
/// The credential and its sequencer are handed in by the caller. Share one
/// `Arc<NonceSequencer>` between every client that signs with the same key.
pub struct EthereumLedger {
    config: EthereumConfig,
    contract: Address,
    credential: SigningCredential,
    sequencer: Arc<NonceSequencer>,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TxReceipt {
    status: Option<String>,
    block_number: Option<String>,
}

/// Why an RPC call failed.
#[derive(Debug)]
enum RpcFailure {
    /// The request did not complete; the node may or may not have acted.
    Transport(String),
    /// The node answered with a JSON-RPC error.
    Node(String),
    /// The node answered with something unparseable or empty.
    Malformed(String),
}

impl RpcFailure {
    /// Map a failure that happened before anything was broadcast.
    fn before_broadcast(self, what: &str) -> LedgerError {
        match self {
            RpcFailure::Transport(msg) | RpcFailure::Malformed(msg) => {
                LedgerError::Unavailable(format!("{what}: {msg}"))
            }
            RpcFailure::Node(msg) => classify_node_error(what, &msg),
        }
    }
}

/// Node errors that no amount of retrying will fix.
fn classify_node_error(what: &str, message: &str) -> LedgerError {
    let lower = message.to_lowercase();
    let permanent = [
        "insufficient funds",
        "nonce too low",
        "nonce too high",
        "replacement transaction underpriced",
        "execution reverted",
        "revert",
        "invalid sender",
        "intrinsic gas too low",
    ];
    if permanent.iter().any(|p| lower.contains(p)) {
        LedgerError::Rejected(format!("{what}: {message}"))
    } else {
        LedgerError::Unavailable(format!("{what}: {message}"))
    }
}

/// Parse a `0x`-prefixed hex quantity.
fn parse_quantity(hex_str: &str) -> Result<u128, String> {
    let digits = hex_str.trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16).map_err(|e| format!("invalid quantity {hex_str:?}: {e}"))
}

fn to_u64(what: &str, value: u128) -> Result<u64, LedgerError> {
    u64::try_from(value)
        .map_err(|_| LedgerError::Unavailable(format!("{what}: quantity {value} out of range")))
}

/// ABI-encoded call data for `storeImage(content_id)`.
pub fn store_image_calldata(content_id: &ContentId) -> Bytes {
    let call = storeImageCall {
        ipfsHash: content_id.as_str().to_string(),
    };
    Bytes::from(call.abi_encode())
}

impl EthereumLedger {
    pub fn new(
        config: EthereumConfig,
        credential: SigningCredential,
        sequencer: Arc<NonceSequencer>,
    ) -> Result<Self, AnchorError> {
        let contract: Address = config.contract_address.parse().map_err(|e| {
            AnchorError::Config(format!(
                "Invalid contract address {:?}: {e}",
                config.contract_address
            ))
        })?;

        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| AnchorError::Config(format!("HTTP client: {e}")))?;

        Ok(Self {
            config,
            contract,
            credential,
            sequencer,
            client,
        })
    }

    /// Send a JSON-RPC request. `Ok(None)` means the node returned `null`.
    async fn rpc_optional<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<Option<T>, RpcFailure> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let resp: JsonRpcResponse<T> = self
            .client
            .post(&self.config.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RpcFailure::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| RpcFailure::Malformed(format!("RPC response parse error: {e}")))?;

        if let Some(err) = resp.error {
            return Err(RpcFailure::Node(err.message));
        }

        Ok(resp.result)
    }

    async fn rpc_call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, RpcFailure> {
        self.rpc_optional(method, params)
            .await?
            .ok_or_else(|| RpcFailure::Malformed(format!("Empty RPC response for {method}")))
    }

    async fn quantity(&self, method: &str, params: serde_json::Value) -> Result<u128, LedgerError> {
        let raw: String = self
            .rpc_call(method, params)
            .await
            .map_err(|e| e.before_broadcast(method))?;
        parse_quantity(&raw).map_err(|e| LedgerError::Unavailable(format!("{method}: {e}")))
    }

    /// Build, sign and broadcast the anchor transaction.
    ///
    /// Returns the transaction hash and whether the broadcast is known to
    /// have reached the node.
    async fn send_transaction(
        &self,
        content_id: &ContentId,
    ) -> Result<(TransactionId, bool), LedgerError> {
        let from = self.credential.address();
        let from_hex = from.to_checksum(None);
        let input = store_image_calldata(content_id);

        let mut nonces = self.sequencer.acquire().await;

        let pending = self
            .quantity(
                "eth_getTransactionCount",
                serde_json::json!([from_hex, "pending"]),
            )
            .await?;
        let pending = to_u64("eth_getTransactionCount", pending)?;
        let nonce = nonces.reserve(pending);

        let gas_price = self.quantity("eth_gasPrice", serde_json::json!([])).await?;

        let gas_limit = match self
            .rpc_call::<String>(
                "eth_estimateGas",
                serde_json::json!([{
                    "from": from_hex,
                    "to": self.contract.to_checksum(None),
                    "data": format!("0x{}", hex::encode(&input)),
                }]),
            )
            .await
        {
            Ok(raw) => {
                let estimate = parse_quantity(&raw)
                    .map_err(|e| LedgerError::Unavailable(format!("eth_estimateGas: {e}")))?;
                // 20% headroom over the estimate.
                to_u64("eth_estimateGas", estimate)?.saturating_mul(6) / 5
            }
            Err(RpcFailure::Node(msg)) => {
                return Err(classify_node_error("eth_estimateGas", &msg));
            }
            Err(other) => {
                warn!(error = ?other, "Gas estimation failed, using fallback limit");
                self.config.fallback_gas_limit
            }
        };

        let tx = alloy::consensus::TxLegacy {
            chain_id: Some(self.config.chain_id),
            nonce,
            gas_price,
            gas_limit,
            to: TxKind::Call(self.contract),
            value: U256::ZERO,
            input,
        };

        let sig_hash = tx.signature_hash();
        let sig = self
            .credential
            .signer()
            .sign_hash(&sig_hash)
            .await
            .map_err(|e| LedgerError::Rejected(format!("Signing failed: {e}")))?;

        let signed = tx.into_signed(sig);
        let tx_hash = TransactionId::new(format!("0x{}", hex::encode(signed.hash())));
        let envelope = alloy::consensus::TxEnvelope::Legacy(signed);

        let mut raw_tx = Vec::new();
        alloy::eips::eip2718::Encodable2718::encode_2718(&envelope, &mut raw_tx);
        let raw_hex = format!("0x{}", hex::encode(&raw_tx));

        debug!(nonce, gas_limit, tx = %tx_hash, "Broadcasting anchor transaction");

        match self
            .rpc_call::<String>("eth_sendRawTransaction", serde_json::json!([raw_hex]))
            .await
        {
            Ok(_) => {
                nonces.advance(nonce);
                Ok((tx_hash, true))
            }
            Err(RpcFailure::Node(msg)) if msg.to_lowercase().contains("already known") => {
                nonces.advance(nonce);
                Ok((tx_hash, true))
            }
            Err(RpcFailure::Node(msg)) => {
                nonces.reset();
                Err(classify_node_error("eth_sendRawTransaction", &msg))
            }
            Err(RpcFailure::Transport(msg)) | Err(RpcFailure::Malformed(msg)) => {
                // The node may have accepted it; let the next reservation
                // re-read the pending count instead of guessing.
                nonces.reset();
                warn!(tx = %tx_hash, error = %msg, "Broadcast outcome unknown");
                Ok((tx_hash, false))
            }
        }
    }

    /// One receipt lookup.
    async fn receipt(&self, tx: &TransactionId) -> Result<SubmitOutcome, LedgerError> {
        let receipt: Option<TxReceipt> = match self
            .rpc_optional("eth_getTransactionReceipt", serde_json::json!([tx.as_str()]))
            .await
        {
            Ok(r) => r,
            Err(e) => {
                return Ok(SubmitOutcome::Unconfirmed {
                    transaction_id: tx.clone(),
                    reason: format!("receipt lookup failed: {e:?}"),
                })
            }
        };

        let Some(receipt) = receipt else {
            return Ok(SubmitOutcome::Unconfirmed {
                transaction_id: tx.clone(),
                reason: "no receipt yet".into(),
            });
        };

        let status = match receipt.status.as_deref().map(parse_quantity).transpose() {
            Ok(status) => status,
            Err(e) => {
                return Ok(SubmitOutcome::Unconfirmed {
                    transaction_id: tx.clone(),
                    reason: format!("unreadable receipt status: {e}"),
                })
            }
        };

        if status == Some(0) {
            return Err(LedgerError::Rejected(format!(
                "transaction {tx} reverted"
            )));
        }

        let block_number = receipt
            .block_number
            .as_deref()
            .and_then(|b| parse_quantity(b).ok())
            .and_then(|b| u64::try_from(b).ok());

        Ok(SubmitOutcome::Confirmed(LedgerReceipt {
            transaction_id: tx.clone(),
            submitter: self.submitter(),
            block_number,
            confirmed_at: Utc::now(),
        }))
    }

    /// Poll for a receipt until confirmed, reverted, or the deadline passes.
    /// The wait is the shorter of `timeout` and the configured window.
    async fn poll_receipt(
        &self,
        tx: &TransactionId,
        timeout: Duration,
    ) -> Result<SubmitOutcome, LedgerError> {
        let window = timeout.min(Duration::from_millis(self.config.confirmation_timeout_ms));
        let deadline = tokio::time::Instant::now() + window;
        let interval = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            let outcome = self.receipt(tx).await?;
            if let SubmitOutcome::Confirmed(_) = outcome {
                return Ok(outcome);
            }
            if tokio::time::Instant::now() + interval > deadline {
                return Ok(SubmitOutcome::Unconfirmed {
                    transaction_id: tx.clone(),
                    reason: format!("not confirmed within {} ms", window.as_millis()),
                });
            }
            tokio::time::sleep(interval).await;
        }
    }
}

#[async_trait]
impl LedgerClient for EthereumLedger {
    fn name(&self) -> &str {
        "Ethereum"
    }

    fn submitter(&self) -> String {
        self.credential.address().to_checksum(None)
    }

    async fn broadcast(&self, content_id: &ContentId) -> Result<TransactionId, LedgerError> {
        let (tx, reached_node) = self.send_transaction(content_id).await?;
        info!(
            tx = %tx,
            content_id = %content_id,
            reached_node,
            "Anchor transaction broadcast"
        );
        Ok(tx)
    }

    async fn await_confirmation(
        &self,
        transaction_id: &TransactionId,
        timeout: Duration,
    ) -> Result<SubmitOutcome, LedgerError> {
        self.poll_receipt(transaction_id, timeout).await
    }

    async fn confirmation(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<SubmitOutcome, LedgerError> {
        self.receipt(transaction_id).await
    }
}

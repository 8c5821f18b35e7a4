/// IPFS content store via the Kubo HTTP API.
///
/// Each upload is added with `pin=true` and CID version 1. The returned
/// CID is the content identifier recorded on the ledger.
///
/// Note: IPFS does not guarantee persistence on its own; the node must keep
/// the pin (or replicate it) for the content to stay retrievable.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart;
use reqwest::Client;
use serde::Deserialize;

use super::{ContentId, ContentStore, StoreError, UploadMetadata};

/// Configuration for the IPFS HTTP API.
#[derive(Debug, Clone, Deserialize)]
pub struct IpfsConfig {
    /// IPFS API endpoint (e.g., "http://localhost:5001").
    pub api_url: String,
    /// Per-request timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

/// IPFS content store.
pub struct IpfsStore {
    client: Client,
    config: IpfsConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct IpfsAddResponse {
    hash: String,
    #[allow(dead_code)]
    size: String,
}

impl IpfsStore {
    pub fn new(config: IpfsConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, config }
    }
}

#[async_trait]
impl ContentStore for IpfsStore {
    fn name(&self) -> &str {
        "IPFS"
    }

    async fn store(
        &self,
        data: &[u8],
        metadata: &UploadMetadata,
    ) -> Result<ContentId, StoreError> {
        let part = multipart::Part::bytes(data.to_vec()).file_name(metadata.name.clone());
        let form = multipart::Form::new().part("file", part);

        let resp = self
            .client
            .post(format!(
                "{}/api/v0/add",
                self.config.api_url.trim_end_matches('/')
            ))
            .query(&[("pin", "true"), ("cid-version", "1")])
            .multipart(form)
            .send()
            .await
            .map_err(|e| StoreError::from_transport("IPFS", e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::from_status("IPFS", status, &body));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| StoreError::from_transport("IPFS", e))?;

        parse_add_response(&body)
    }
}

/// Parse the body of `/api/v0/add`. Kubo streams one JSON object per line
/// (progress and directory entries included); the last line is the file.
fn parse_add_response(body: &str) -> Result<ContentId, StoreError> {
    let last = body
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| StoreError::Rejected("IPFS add returned an empty body".into()))?;

    let add: IpfsAddResponse = serde_json::from_str(last)
        .map_err(|e| StoreError::Rejected(format!("IPFS response parse error: {e}")))?;

    Ok(ContentId::new(add.hash))
}

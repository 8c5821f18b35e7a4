/// Pinata pinning service.
///
/// Pinata hosts the IPFS node; uploads go through its
/// `pinFileToIPFS` endpoint and are pinned on arrival. Authentication uses
/// the legacy API key/secret header pair.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart;
use reqwest::Client;
use serde::Deserialize;

use super::{ContentId, ContentStore, StoreError, UploadMetadata};

/// Configuration for the Pinata API.
#[derive(Debug, Clone, Deserialize)]
pub struct PinataConfig {
    /// API base URL.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    pub api_key: String,
    pub api_secret: String,
    /// Per-request timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_api_url() -> String {
    "https://api.pinata.cloud".to_string()
}

fn default_request_timeout_ms() -> u64 {
    60_000
}

pub struct PinataStore {
    client: Client,
    config: PinataConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PinFileResponse {
    ipfs_hash: String,
}

impl PinataStore {
    pub fn new(config: PinataConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, config }
    }

    fn build_form(data: &[u8], metadata: &UploadMetadata) -> multipart::Form {
        let pin_metadata = serde_json::json!({ "name": metadata.name }).to_string();
        let pin_options = serde_json::json!({ "cidVersion": 1 }).to_string();

        multipart::Form::new()
            .part(
                "file",
                multipart::Part::bytes(data.to_vec()).file_name(metadata.name.clone()),
            )
            .text("pinataMetadata", pin_metadata)
            .text("pinataOptions", pin_options)
    }
}

#[async_trait]
impl ContentStore for PinataStore {
    fn name(&self) -> &str {
        "Pinata"
    }

    async fn store(
        &self,
        data: &[u8],
        metadata: &UploadMetadata,
    ) -> Result<ContentId, StoreError> {
        let resp = self
            .client
            .post(format!(
                "{}/pinning/pinFileToIPFS",
                self.config.api_url.trim_end_matches('/')
            ))
            .header("pinata_api_key", &self.config.api_key)
            .header("pinata_secret_api_key", &self.config.api_secret)
            .multipart(Self::build_form(data, metadata))
            .send()
            .await
            .map_err(|e| StoreError::from_transport("Pinata", e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::from_status("Pinata", status, &body));
        }

        let pinned: PinFileResponse = resp
            .json()
            .await
            .map_err(|e| StoreError::Rejected(format!("Pinata response parse error: {e}")))?;

        Ok(ContentId::new(pinned.ipfs_hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_response_shape() {
        let body = r#"{"IpfsHash":"bafkreiexample","PinSize":3,"Timestamp":"2026-01-01T00:00:00Z"}"#;
        let parsed: PinFileResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.ipfs_hash, "bafkreiexample");
    }

    #[test]
    fn test_config_defaults() {
        let cfg: PinataConfig =
            serde_json::from_str(r#"{"api_key":"k","api_secret":"s"}"#).unwrap();
        assert_eq!(cfg.api_url, "https://api.pinata.cloud");
        assert_eq!(cfg.request_timeout_ms, 60_000);
    }
}

/// Content store clients.
///
/// Uploaded images are pinned to IPFS, either through a Kubo node's HTTP
/// API or through the Pinata pinning service. The store is opaque: it takes
/// bytes and hands back a content identifier (CID). Identical bytes may or
/// may not map to the same CID across calls, so deduplication never relies
/// on it.
pub mod ipfs;
pub mod memory;
pub mod pinata;

use std::fmt;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use ipfs::{IpfsConfig, IpfsStore};
pub use memory::MemoryStore;
pub use pinata::{PinataConfig, PinataStore};

/// Opaque identifier returned by the content store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata sent alongside the uploaded bytes.
#[derive(Debug, Clone)]
pub struct UploadMetadata {
    /// Original file name, shown by pinning dashboards.
    pub name: String,
}

impl UploadMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Network or service failure. Safe to retry.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The remote refused the content. Retrying will not help.
    #[error("rejected: {0}")]
    Rejected(String),
}

impl StoreError {
    /// Classify a non-success HTTP response from a store API.
    pub fn from_status(service: &str, status: StatusCode, body: &str) -> Self {
        let msg = format!("{service} returned {status}: {body}");
        if status.is_server_error()
            || status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
        {
            StoreError::Unavailable(msg)
        } else {
            StoreError::Rejected(msg)
        }
    }

    /// Classify a transport-level failure.
    pub fn from_transport(service: &str, e: reqwest::Error) -> Self {
        StoreError::Unavailable(format!("{service} request failed: {e}"))
    }
}

/// Client for an external content-addressed store.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Human-readable name of this store (e.g., "IPFS", "Pinata").
    fn name(&self) -> &str;

    /// Upload bytes. After success they are retrievable under the returned id.
    async fn store(
        &self,
        data: &[u8],
        metadata: &UploadMetadata,
    ) -> std::result::Result<ContentId, StoreError>;
}

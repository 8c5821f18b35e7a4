/// Signing credential and per-credential transaction sequencing.
///
/// Every transaction consumes the next sequence number (nonce) of the
/// account that signs it. Two transactions built concurrently from the same
/// account would pick the same nonce and one of them would be dropped, so
/// construction and broadcast go through a [`NonceSequencer`] owned next to
/// the credential.
use std::fmt;

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use tokio::sync::{Mutex, MutexGuard};

use crate::error::AnchorError;

/// A private key able to sign ledger transactions.
#[derive(Clone)]
pub struct SigningCredential {
    signer: PrivateKeySigner,
}

impl SigningCredential {
    /// Parse a hex private key (with or without `0x`).
    pub fn from_hex(private_key_hex: &str) -> Result<Self, AnchorError> {
        let signer: PrivateKeySigner = private_key_hex
            .trim()
            .trim_start_matches("0x")
            .parse()
            .map_err(|e| AnchorError::Config(format!("Invalid signing key: {e}")))?;
        Ok(Self { signer })
    }

    pub fn random() -> Self {
        Self {
            signer: PrivateKeySigner::random(),
        }
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub(crate) fn signer(&self) -> &PrivateKeySigner {
        &self.signer
    }
}

impl fmt::Debug for SigningCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningCredential")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

/// Next-nonce bookkeeping for one credential.
#[derive(Debug, Default)]
pub struct NonceState {
    next: Option<u64>,
}

impl NonceState {
    /// Choose the nonce for the next transaction. The node's pending count
    /// wins when it is ahead (transactions sent by another process).
    pub fn reserve(&self, node_pending: u64) -> u64 {
        match self.next {
            Some(local) => local.max(node_pending),
            None => node_pending,
        }
    }

    /// Record that `used` was broadcast.
    pub fn advance(&mut self, used: u64) {
        self.next = Some(used + 1);
    }

    /// Forget local state; the next reservation trusts the node.
    pub fn reset(&mut self) {
        self.next = None;
    }
}

/// Serializes transaction construction for one credential.
#[derive(Debug, Default)]
pub struct NonceSequencer {
    state: Mutex<NonceState>,
}

impl NonceSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of the credential's sequence. Hold the guard
    /// from nonce selection until the transaction is broadcast.
    pub async fn acquire(&self) -> MutexGuard<'_, NonceState> {
        self.state.lock().await
    }
}

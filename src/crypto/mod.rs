/// Digest engine.
pub mod hash;

pub use hash::{digest, Fingerprint, FINGERPRINT_LEN};

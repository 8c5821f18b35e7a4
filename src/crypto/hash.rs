/// SHA-256 content fingerprints.
///
/// The fingerprint is the lookup key of the verification index. It must
/// match what a browser computes with `crypto.subtle.digest("SHA-256", ..)`
/// so clients can verify a file without uploading it.
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::AnchorError;

/// Length of a fingerprint in bytes.
pub const FINGERPRINT_LEN: usize = 32;

/// Fixed-length digest of original content bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    pub fn from_bytes(bytes: [u8; FINGERPRINT_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    /// Lowercase hex, no prefix.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a hex fingerprint. Accepts an optional `0x` prefix and either case.
    pub fn from_hex(s: &str) -> Result<Self, AnchorError> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        if digits.is_empty() {
            return Err(AnchorError::Validation("fingerprint is empty".into()));
        }
        if digits.len() != FINGERPRINT_LEN * 2 {
            return Err(AnchorError::Validation(format!(
                "fingerprint must be {} hex characters, got {}",
                FINGERPRINT_LEN * 2,
                digits.len()
            )));
        }

        let mut out = [0u8; FINGERPRINT_LEN];
        hex::decode_to_slice(digits, &mut out)
            .map_err(|e| AnchorError::Validation(format!("fingerprint is not hex: {e}")))?;
        Ok(Self(out))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl FromStr for Fingerprint {
    type Err = AnchorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Fingerprint raw content bytes. Pure and deterministic; empty input is valid.
pub fn digest(data: &[u8]) -> Fingerprint {
    Fingerprint(Sha256::digest(data).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_digest_deterministic() {
        let data = b"hello image-anchor";
        assert_eq!(digest(data), digest(data));
    }

    #[test]
    fn test_digest_known_vectors() {
        assert_eq!(
            digest(b"").to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            digest(b"ABC").to_hex(),
            "b5d4045c3f466fa91fe2cc6abe79232a1a57cdf104f7a26e716e0a1e2789df78"
        );
    }

    #[test]
    fn test_digest_single_bit_flip() {
        let mut data = b"ABC".to_vec();
        let original = digest(&data);
        data[2] ^= 0x01;
        assert_ne!(original, digest(&data));
    }

    #[test]
    fn test_from_hex_accepts_prefix_and_case() {
        let fp = digest(b"ABC");
        let upper = format!("0x{}", fp.to_hex().to_uppercase());
        assert_eq!(Fingerprint::from_hex(&upper).unwrap(), fp);
    }

    #[test]
    fn test_from_hex_rejects_malformed() {
        assert!(matches!(
            Fingerprint::from_hex(""),
            Err(AnchorError::Validation(_))
        ));
        assert!(Fingerprint::from_hex("abcd").is_err());
        assert!(Fingerprint::from_hex(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn test_serde_as_hex_string() {
        let fp = digest(b"ABC");
        let json = serde_json::to_string(&fp).unwrap();
        assert_eq!(json, format!("\"{}\"", fp.to_hex()));
        let back: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fp);
    }

    proptest! {
        #[test]
        fn prop_equal_bytes_equal_digest(data in prop::collection::vec(any::<u8>(), 0..512)) {
            let copy = data.clone();
            prop_assert_eq!(digest(&data), digest(&copy));
        }

        #[test]
        fn prop_different_bytes_different_digest(
            a in prop::collection::vec(any::<u8>(), 0..256),
            b in prop::collection::vec(any::<u8>(), 0..256),
        ) {
            prop_assume!(a != b);
            prop_assert_ne!(digest(&a), digest(&b));
        }

        #[test]
        fn prop_hex_roundtrip(bytes in any::<[u8; 32]>()) {
            let fp = Fingerprint::from_bytes(bytes);
            prop_assert_eq!(Fingerprint::from_hex(&fp.to_hex()).unwrap(), fp);
        }
    }
}

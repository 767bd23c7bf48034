//! Wire formats: base64 and the `nonce:ciphertext` wrapped-key string.

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::cipher::{Sealed, NONCE_LEN, TAG_LEN};
use crate::error::{CryptoError, CryptoResult};

/// Separator between the nonce and ciphertext halves of a wrapped key.
pub const WRAPPED_DELIMITER: char = ':';

/// Encode bytes as base64.
pub fn base64_encode(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

/// Decode base64 string to bytes.
pub fn base64_decode(data: &str) -> CryptoResult<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| CryptoError::MalformedInput(format!("Invalid base64: {}", e)))
}

/// A key encrypted under a wrapping key, serialized as
/// `nonceBase64:ciphertextBase64`.
///
/// Used for password-wrapped identity keys and per-member group keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedBlob(Sealed);

impl WrappedBlob {
    /// Wrap the output of an AEAD encryption.
    pub fn from_sealed(sealed: Sealed) -> Self {
        Self(sealed)
    }

    /// Borrow the sealed nonce and ciphertext.
    pub fn sealed(&self) -> &Sealed {
        &self.0
    }

    /// The nonce, base64-encoded (the directory stores it separately too).
    pub fn nonce_base64(&self) -> String {
        base64_encode(&self.0.nonce)
    }
}

impl fmt::Display for WrappedBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            base64_encode(&self.0.nonce),
            WRAPPED_DELIMITER,
            base64_encode(&self.0.ciphertext)
        )
    }
}

impl FromStr for WrappedBlob {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (nonce_b64, ct_b64) = s.split_once(WRAPPED_DELIMITER).ok_or_else(|| {
            CryptoError::MalformedInput(
                "expected 'nonce:ciphertext', missing ':' delimiter".to_string(),
            )
        })?;

        let nonce = base64_decode(nonce_b64)?;
        let ciphertext = base64_decode(ct_b64)?;

        let nonce: [u8; NONCE_LEN] = nonce.as_slice().try_into().map_err(|_| {
            CryptoError::MalformedInput(format!(
                "nonce must be {NONCE_LEN} bytes, got {}",
                nonce.len()
            ))
        })?;

        if ciphertext.len() < TAG_LEN {
            return Err(CryptoError::MalformedInput(format!(
                "ciphertext must be at least {TAG_LEN} bytes, got {}",
                ciphertext.len()
            )));
        }

        Ok(Self(Sealed { nonce, ciphertext }))
    }
}

impl Serialize for WrappedBlob {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for WrappedBlob {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for `Vec<u8>` fields carried as base64 strings.
pub mod serde_base64 {
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize bytes as a base64 string.
    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::base64_encode(bytes))
    }

    /// Deserialize a base64 string into bytes.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::base64_decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::aead_encrypt;

    fn sample_blob() -> WrappedBlob {
        WrappedBlob::from_sealed(aead_encrypt(&[1u8; 32], &[2u8; 32], None).unwrap())
    }

    #[test]
    fn test_base64_roundtrip() {
        let original = [42u8; 32];
        let encoded = base64_encode(&original);
        let decoded = base64_decode(&encoded).unwrap();
        assert_eq!(original.as_slice(), decoded.as_slice());
    }

    #[test]
    fn test_base64_decode_invalid() {
        let result = base64_decode("not valid base64!!!");
        assert!(matches!(result, Err(CryptoError::MalformedInput(_))));
    }

    #[test]
    fn test_wrapped_blob_string_roundtrip() {
        let blob = sample_blob();
        let text = blob.to_string();

        assert_eq!(text.matches(':').count(), 1);
        assert!(text.starts_with(&blob.nonce_base64()));

        let parsed: WrappedBlob = text.parse().unwrap();
        assert_eq!(blob, parsed);
    }

    #[test]
    fn test_wrapped_blob_missing_delimiter() {
        let result = "bm9uY2U".parse::<WrappedBlob>();
        assert!(matches!(result, Err(CryptoError::MalformedInput(ref m)) if m.contains("delimiter")));
    }

    #[test]
    fn test_wrapped_blob_bad_nonce_length() {
        let text = format!("{}:{}", base64_encode(&[0u8; 12]), base64_encode(&[0u8; 48]));
        let result = text.parse::<WrappedBlob>();
        assert!(matches!(result, Err(CryptoError::MalformedInput(ref m)) if m.contains("nonce")));
    }

    #[test]
    fn test_wrapped_blob_short_ciphertext() {
        let text = format!("{}:{}", base64_encode(&[0u8; 24]), base64_encode(&[0u8; 8]));
        assert!(text.parse::<WrappedBlob>().is_err());
    }

    #[test]
    fn test_wrapped_blob_serde_as_string() {
        let blob = sample_blob();
        let json = serde_json::to_string(&blob).unwrap();
        assert_eq!(json, format!("\"{}\"", blob));

        let parsed: WrappedBlob = serde_json::from_str(&json).unwrap();
        assert_eq!(blob, parsed);
    }
}

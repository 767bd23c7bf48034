//! Error types for cryptographic operations.

use thiserror::Error;

/// Cryptographic operation errors.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Key derivation failed (bad parameters or output length).
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    /// Encryption failed.
    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// Authentication failed - wrong key or tampered data.
    #[error("Authentication failed - wrong key or tampered data")]
    Authentication,

    /// Unwrapping an identity or group key failed.
    #[error("Decryption failed: {0}")]
    Decryption(String),

    /// Input is structurally invalid (missing delimiter, bad length, bad base64).
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// Key material has the wrong length or is otherwise unusable.
    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

impl CryptoError {
    /// True for every failure that means "this ciphertext cannot be opened".
    ///
    /// Presentation layers use this to decide between a "cannot decrypt"
    /// placeholder and a hard error.
    pub fn is_decryption_failure(&self) -> bool {
        matches!(
            self,
            CryptoError::Authentication
                | CryptoError::Decryption(_)
                | CryptoError::MalformedInput(_)
        )
    }

    /// Collapse a low-level AEAD or parse failure into [`CryptoError::Decryption`].
    pub(crate) fn into_decryption(self, what: &str) -> CryptoError {
        match self {
            CryptoError::Authentication => {
                CryptoError::Decryption(format!("{what}: wrong key or tampered data"))
            }
            CryptoError::MalformedInput(reason) => {
                CryptoError::Decryption(format!("{what}: {reason}"))
            }
            other => other,
        }
    }
}

/// Result type for cryptographic operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

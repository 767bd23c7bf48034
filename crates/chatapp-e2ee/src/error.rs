//! Error types for the chatapp E2EE services.

use chatapp_crypto::CryptoError;
use thiserror::Error;

use crate::config::ConfigError;

/// Result type alias using chatapp-e2ee's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for key management and distribution.
#[derive(Error, Debug)]
pub enum Error {
    /// A cryptographic primitive failed (wrong key, tampering, bad input)
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// A key record is absent from the directory
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// A key is not available yet (identity not unlocked, wait timed out)
    #[error("Key unavailable: {0}")]
    Unavailable(String),

    /// Persisting a key was requested before a session key was installed
    #[error("No session key installed; refusing to persist key material")]
    SessionKeyMissing,

    /// Key directory request failed or returned an error status
    #[error("Key directory error: {0}")]
    Directory(String),

    /// The directory already holds a record that may not be replaced
    #[error("Key directory conflict: {0}")]
    Conflict(String),

    /// Local durable key store failed
    #[error("Key store error: {0}")]
    Store(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// True when the failure means the ciphertext or wrapped key cannot be opened.
    pub fn is_decryption_failure(&self) -> bool {
        matches!(self, Error::Crypto(e) if e.is_decryption_failure())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_key_not_found() {
        let err = Error::KeyNotFound("group g1 member u2".to_string());
        assert_eq!(err.to_string(), "Key not found: group g1 member u2");
    }

    #[test]
    fn test_error_display_unavailable() {
        let err = Error::Unavailable("identity key".to_string());
        assert_eq!(err.to_string(), "Key unavailable: identity key");
    }

    #[test]
    fn test_error_display_session_key_missing() {
        assert!(Error::SessionKeyMissing
            .to_string()
            .contains("refusing to persist"));
    }

    #[test]
    fn test_error_display_directory() {
        let err = Error::Directory("500 Internal Server Error".to_string());
        assert_eq!(err.to_string(), "Key directory error: 500 Internal Server Error");
    }

    #[test]
    fn test_crypto_error_is_transparent() {
        let err: Error = CryptoError::Authentication.into();
        assert_eq!(err.to_string(), CryptoError::Authentication.to_string());
        assert!(err.is_decryption_failure());
    }

    #[test]
    fn test_non_crypto_error_is_not_decryption_failure() {
        assert!(!Error::KeyNotFound("x".into()).is_decryption_failure());
        assert!(!Error::Crypto(CryptoError::InvalidKey("x".into())).is_decryption_failure());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(ref m) if !m.is_empty()));
    }

    #[test]
    fn test_error_display_conflict() {
        let err = Error::Conflict("group public key for g1".to_string());
        assert_eq!(err.to_string(), "Key directory conflict: group public key for g1");
        assert!(!err.is_decryption_failure());
    }
}

//! Durable local storage for cached keys.
//!
//! Records are always encrypted under the session key before they reach a
//! store; stores never see key material in the clear. One store instance
//! belongs to one user account.

mod file;
mod memory;

pub use file::FileKeyStore;
pub use memory::MemoryKeyStore;

use async_trait::async_trait;
use chatapp_crypto::cipher::{aead_decrypt, aead_encrypt, NONCE_LEN};
use chatapp_crypto::{base64_decode, base64_encode, CryptoError, CryptoResult, SessionKey};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A key encrypted under the session key, base64 fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedRecord {
    /// Ciphertext with the authentication tag appended.
    pub ciphertext: String,
    /// Nonce used for this record.
    pub nonce: String,
}

impl EncryptedRecord {
    /// Encrypt `plaintext` under `session_key` with a fresh nonce.
    pub fn seal(session_key: &SessionKey, plaintext: &[u8]) -> CryptoResult<Self> {
        let sealed = aead_encrypt(session_key.as_bytes(), plaintext, None)?;
        Ok(Self {
            ciphertext: base64_encode(&sealed.ciphertext),
            nonce: base64_encode(&sealed.nonce),
        })
    }

    /// Decrypt the record with `session_key`.
    pub fn open(&self, session_key: &SessionKey) -> CryptoResult<Vec<u8>> {
        let nonce = base64_decode(&self.nonce)?;
        let nonce: [u8; NONCE_LEN] = nonce.as_slice().try_into().map_err(|_| {
            CryptoError::MalformedInput(format!(
                "record nonce must be {NONCE_LEN} bytes, got {}",
                nonce.len()
            ))
        })?;
        let ciphertext = base64_decode(&self.ciphertext)?;
        aead_decrypt(session_key.as_bytes(), &nonce, &ciphertext)
    }
}

/// Durable mirror of the key cache: one identity slot plus one record per group.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Load the identity key record, if any.
    async fn load_identity(&self) -> Result<Option<EncryptedRecord>>;

    /// Store (replace) the identity key record.
    async fn save_identity(&self, record: &EncryptedRecord) -> Result<()>;

    /// Delete the identity key record. Deleting a missing record is not an error.
    async fn delete_identity(&self) -> Result<()>;

    /// Load the record for `group_id`, if any.
    async fn load_group(&self, group_id: &str) -> Result<Option<EncryptedRecord>>;

    /// Store (replace) the record for `group_id`.
    async fn save_group(&self, group_id: &str, record: &EncryptedRecord) -> Result<()>;

    /// Delete the record for `group_id`. Deleting a missing record is not an error.
    async fn delete_group(&self, group_id: &str) -> Result<()>;

    /// Delete every group record.
    async fn clear_groups(&self) -> Result<()>;
}

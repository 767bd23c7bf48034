//! XChaCha20-Poly1305 authenticated encryption and random generation.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use crate::error::{CryptoError, CryptoResult};

/// Symmetric key length (bytes).
pub const KEY_LEN: usize = 32;

/// XChaCha20 nonce length (bytes).
pub const NONCE_LEN: usize = 24;

/// Poly1305 tag length (bytes).
pub const TAG_LEN: usize = 16;

/// Password salt length (bytes).
pub const SALT_LEN: usize = 16;

/// Generate cryptographically secure random bytes.
pub fn generate_random<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Generate `len` cryptographically secure random bytes.
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Generate a random password salt (16 bytes).
pub fn generate_salt() -> [u8; SALT_LEN] {
    generate_random()
}

/// Generate a random nonce (24 bytes).
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    generate_random()
}

/// Output of [`aead_encrypt`]: the nonce used and the ciphertext with its tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    /// The 24-byte nonce.
    pub nonce: [u8; NONCE_LEN],
    /// Ciphertext with the 16-byte Poly1305 tag appended.
    pub ciphertext: Vec<u8>,
}

impl Sealed {
    /// Serialize as `nonce || ciphertext`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(NONCE_LEN + self.ciphertext.len());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Parse `nonce || ciphertext`.
    pub fn from_bytes(data: &[u8]) -> CryptoResult<Self> {
        if data.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::MalformedInput(format!(
                "sealed payload too short: {} bytes, need at least {}",
                data.len(),
                NONCE_LEN + TAG_LEN
            )));
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        let mut nonce_arr = [0u8; NONCE_LEN];
        nonce_arr.copy_from_slice(nonce);
        Ok(Self {
            nonce: nonce_arr,
            ciphertext: ciphertext.to_vec(),
        })
    }

    /// Length of the plaintext this ciphertext decrypts to.
    pub fn plaintext_len(&self) -> usize {
        self.ciphertext.len().saturating_sub(TAG_LEN)
    }
}

/// Encrypt plaintext with XChaCha20-Poly1305.
///
/// Draws a fresh random nonce unless one is supplied. Supplying a nonce is
/// for deterministic tests only; reusing one under the same key breaks
/// confidentiality.
pub fn aead_encrypt(
    key: &[u8; KEY_LEN],
    plaintext: &[u8],
    nonce: Option<[u8; NONCE_LEN]>,
) -> CryptoResult<Sealed> {
    let nonce = nonce.unwrap_or_else(generate_nonce);
    let cipher =
        XChaCha20Poly1305::new_from_slice(key).map_err(|e| CryptoError::Encryption(e.to_string()))?;

    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::Encryption("XChaCha20-Poly1305 encryption failed".into()))?;

    Ok(Sealed { nonce, ciphertext })
}

/// Decrypt ciphertext with XChaCha20-Poly1305.
///
/// The ciphertext must include the 16-byte tag at the end. Any tag mismatch
/// is reported as [`CryptoError::Authentication`]; no plaintext is returned.
pub fn aead_decrypt(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
) -> CryptoResult<Vec<u8>> {
    if ciphertext.len() < TAG_LEN {
        return Err(CryptoError::MalformedInput(format!(
            "ciphertext shorter than the {TAG_LEN}-byte tag"
        )));
    }

    let cipher = XChaCha20Poly1305::new_from_slice(key)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;

    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::Authentication)
}

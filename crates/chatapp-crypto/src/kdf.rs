//! Hashing and key derivation: SHA-256, HMAC-SHA256, PBKDF2 and HKDF.
//!
//! SHA-256 is the only hash used anywhere in this crate. PBKDF2 stretches
//! passwords into wrapping keys; HKDF turns Diffie-Hellman output (already
//! high entropy) into purpose-bound keys.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, CryptoResult};

type HmacSha256 = Hmac<Sha256>;

/// SHA-256 output length (bytes).
pub const HASH_LEN: usize = 32;

/// Default PBKDF2 iteration count for password-wrapped identity keys.
pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 200_000;

/// Largest output HKDF-SHA256 can produce.
pub const MAX_HKDF_OUTPUT: usize = 255 * HASH_LEN;

/// Key wrapper with automatic zeroization on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    key: [u8; 32],
}

impl DerivedKey {
    /// Create a new derived key from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { key: bytes }
    }

    /// Get the key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }

    fn from_vec(mut bytes: Vec<u8>) -> CryptoResult<Self> {
        if bytes.len() != 32 {
            let len = bytes.len();
            bytes.zeroize();
            return Err(CryptoError::KeyDerivation(format!(
                "expected 32 bytes of key material, got {len}"
            )));
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes);
        bytes.zeroize();
        Ok(Self { key })
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// SHA-256 digest.
pub fn hash256(data: &[u8]) -> [u8; HASH_LEN] {
    Sha256::digest(data).into()
}

fn hmac_with_key(key: &[u8]) -> HmacSha256 {
    // HMAC accepts keys of any length; long keys are hashed, short ones padded.
    <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC-SHA256 accepts keys of any length")
}

/// HMAC-SHA256 of `data` under `key`.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; HASH_LEN] {
    let mut mac = hmac_with_key(key);
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// PBKDF2 with HMAC-SHA256 as the PRF, producing `length` bytes.
pub fn pbkdf2(password: &[u8], salt: &[u8], iterations: u32, length: usize) -> CryptoResult<Vec<u8>> {
    if iterations == 0 {
        return Err(CryptoError::KeyDerivation(
            "PBKDF2 iteration count must be at least 1".into(),
        ));
    }
    if length == 0 {
        return Err(CryptoError::KeyDerivation(
            "PBKDF2 output length must be at least 1".into(),
        ));
    }
    // Block counter is a u32.
    if u32::try_from(length.div_ceil(HASH_LEN)).is_err() {
        return Err(CryptoError::KeyDerivation(format!(
            "PBKDF2 output length {length} is too large"
        )));
    }

    let mut output = vec![0u8; length];
    ::pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut output);
    Ok(output)
}

/// Derive a 256-bit wrapping key from a password with PBKDF2-HMAC-SHA256.
pub fn derive_password_key(password: &[u8], salt: &[u8], iterations: u32) -> CryptoResult<DerivedKey> {
    DerivedKey::from_vec(pbkdf2(password, salt, iterations, 32)?)
}

/// HKDF-SHA256 (RFC 5869): extract with an empty salt, then expand with `info`.
pub fn hkdf_expand(secret: &[u8], info: &[u8], length: usize) -> CryptoResult<Vec<u8>> {
    let hkdf = Hkdf::<Sha256>::new(None, secret);
    let mut okm = vec![0u8; length];
    hkdf.expand(info, &mut okm).map_err(|_| {
        CryptoError::KeyDerivation(format!(
            "HKDF output length {length} exceeds maximum {MAX_HKDF_OUTPUT}"
        ))
    })?;
    Ok(okm)
}

/// HKDF-SHA256 into a 32-byte key.
pub fn hkdf_key(secret: &[u8], info: &[u8]) -> CryptoResult<DerivedKey> {
    DerivedKey::from_vec(hkdf_expand(secret, info, 32)?)
}

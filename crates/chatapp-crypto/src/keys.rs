//! Key types: X25519 identity/ephemeral keypairs, group keys and session keys.
//!
//! # Security
//!
//! - Secret keys are zeroized on drop and redacted in `Debug` output
//! - Random number generation uses the thread-local CSPRNG
//! - Diffie-Hellman results that are not contributory (low-order peer
//!   public keys) are rejected

use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::cipher::{generate_random, KEY_LEN};
use crate::error::{CryptoError, CryptoResult};
use crate::format::{base64_decode, base64_encode};

fn to_key_array(bytes: &[u8], what: &str) -> CryptoResult<[u8; KEY_LEN]> {
    bytes.try_into().map_err(|_| {
        CryptoError::InvalidKey(format!(
            "{what} must be {KEY_LEN} bytes, got {}",
            bytes.len()
        ))
    })
}

/// X25519 public key (32 bytes).
///
/// Published to the key directory; anyone holding it can wrap a key that
/// only the matching private key can unwrap.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    /// Create a public key from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Create a public key from a slice, checking the length.
    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        to_key_array(bytes, "public key").map(Self)
    }

    /// Decode a base64 public key.
    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        Self::from_slice(&base64_decode(encoded)?)
    }

    /// Encode as base64.
    pub fn to_base64(&self) -> String {
        base64_encode(&self.0)
    }

    /// Get the raw bytes of the public key.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn to_x25519(&self) -> X25519Public {
        X25519Public::from(self.0)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", hex::encode(&self.0[..8]))
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_base64(&s).map_err(serde::de::Error::custom)
    }
}

/// X25519 private key (32 bytes) with automatic zeroization.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey([u8; 32]);

impl PrivateKey {
    /// Create a private key from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Create a private key from a slice, checking the length.
    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        to_key_array(bytes, "private key").map(Self)
    }

    /// Get the raw bytes of the private key.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn to_x25519(&self) -> StaticSecret {
        StaticSecret::from(self.0)
    }

    /// Derive the corresponding public key.
    pub fn public_key(&self) -> PublicKey {
        let secret = self.to_x25519();
        let public = X25519Public::from(&secret);
        PublicKey(*public.as_bytes())
    }
}

impl Clone for PrivateKey {
    fn clone(&self) -> Self {
        Self(self.0)
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// X25519 keypair, used both for long-lived identities and for one-off
/// ephemeral distribution keys.
pub struct Keypair {
    /// The public key (can be shared).
    pub public: PublicKey,
    /// The private key (must be kept secret).
    pub private: PrivateKey,
}

impl Keypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        Self::from_private(PrivateKey(generate_random::<KEY_LEN>()))
    }

    /// Create a keypair from an existing private key.
    pub fn from_private(private: PrivateKey) -> Self {
        let public = private.public_key();
        Self { public, private }
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("public", &self.public)
            .field("private", &"[REDACTED]")
            .finish()
    }
}

/// Symmetric content key shared by every member of a group or DM.
///
/// Always exactly 32 bytes; never leaves the client unwrapped.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct GroupKey([u8; 32]);

impl GroupKey {
    /// Generate a fresh random group key.
    pub fn generate() -> Self {
        Self(generate_random())
    }

    /// Create a group key from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Create a group key from a slice, checking the length.
    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        to_key_array(bytes, "group key").map(Self)
    }

    /// Decode a base64 group key (CLI and test fixtures only).
    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        Self::from_slice(&base64_decode(encoded)?)
    }

    /// Get the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Per-login key that protects cached key records at rest.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; 32]);

impl SessionKey {
    /// Create a session key from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Shared secret from X25519 (32 bytes).
///
/// Raw Diffie-Hellman output; pass it through HKDF before use as a key.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; 32]);

impl SharedSecret {
    /// Get the raw bytes of the shared secret.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSecret")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Perform X25519 Diffie-Hellman.
///
/// `ecdh(a.private, b.public) == ecdh(b.private, a.public)`. Fails with
/// [`CryptoError::InvalidKey`] when the peer key is a low-order point, which
/// would make the "secret" predictable.
pub fn ecdh(our_private: &PrivateKey, their_public: &PublicKey) -> CryptoResult<SharedSecret> {
    let secret = our_private.to_x25519();
    let shared = secret.diffie_hellman(&their_public.to_x25519());
    if !shared.was_contributory() {
        return Err(CryptoError::InvalidKey(
            "peer public key is a low-order point".to_string(),
        ));
    }
    Ok(SharedSecret(*shared.as_bytes()))
}

//! Per-member wrapping of group keys.
//!
//! A group key is distributed by one ephemeral X25519 keypair per
//! distribution event. For every member:
//!
//! ```text
//! shared       = X25519(ephemeral_private, member_public)
//! wrapping_key = HKDF-SHA256(shared, info = "chatapp:wrap:groupkey", 32)
//! wrapped      = XChaCha20-Poly1305(wrapping_key, group_key)
//! ```
//!
//! The member reverses it with their identity private key and the published
//! ephemeral public key.

use tracing::debug;

use crate::cipher::{aead_decrypt, aead_encrypt};
use crate::error::{CryptoError, CryptoResult};
use crate::format::WrappedBlob;
use crate::kdf::{hkdf_key, DerivedKey};
use crate::keys::{ecdh, GroupKey, PrivateKey, PublicKey};

/// HKDF label for group-key wrapping keys.
pub const GROUP_KEY_WRAP_INFO: &[u8] = b"chatapp:wrap:groupkey";

/// Derive the symmetric key that wraps a group key between two X25519 parties.
///
/// Symmetric: the distributor calls it with `(ephemeral_private,
/// member_public)`, the member with `(identity_private, ephemeral_public)`.
pub fn derive_member_wrapping_key(
    our_private: &PrivateKey,
    their_public: &PublicKey,
) -> CryptoResult<DerivedKey> {
    let shared = ecdh(our_private, their_public)?;
    hkdf_key(shared.as_bytes(), GROUP_KEY_WRAP_INFO)
}

/// Wrap `group_key` so that only the holder of `member_public`'s private key
/// can recover it.
pub fn wrap_group_key_for_member(
    group_key: &GroupKey,
    ephemeral_private: &PrivateKey,
    member_public: &PublicKey,
) -> CryptoResult<WrappedBlob> {
    let wrapping_key = derive_member_wrapping_key(ephemeral_private, member_public)?;
    let sealed = aead_encrypt(wrapping_key.as_bytes(), group_key.as_bytes(), None)?;
    debug!(member_key = ?member_public, "Group key wrapped for member");
    Ok(WrappedBlob::from_sealed(sealed))
}

/// Recover a group key from its `nonce:ciphertext` wrapped form.
///
/// Every failure (bad format, wrong key, tampering, wrong length) is
/// reported as [`CryptoError::Decryption`], except a low-order ephemeral
/// public key which stays [`CryptoError::InvalidKey`].
pub fn unwrap_group_key(
    wrapped: &str,
    my_private: &PrivateKey,
    ephemeral_public: &PublicKey,
) -> CryptoResult<GroupKey> {
    let blob: WrappedBlob = wrapped
        .parse()
        .map_err(|e: CryptoError| e.into_decryption("group key"))?;
    unwrap_group_key_blob(&blob, my_private, ephemeral_public)
}

/// [`unwrap_group_key`] for an already parsed blob.
pub fn unwrap_group_key_blob(
    blob: &WrappedBlob,
    my_private: &PrivateKey,
    ephemeral_public: &PublicKey,
) -> CryptoResult<GroupKey> {
    let wrapping_key = derive_member_wrapping_key(my_private, ephemeral_public)?;
    let sealed = blob.sealed();

    let mut plaintext = aead_decrypt(wrapping_key.as_bytes(), &sealed.nonce, &sealed.ciphertext)
        .map_err(|e| e.into_decryption("group key"))?;

    let key = GroupKey::from_slice(&plaintext).map_err(|_| {
        CryptoError::Decryption(format!(
            "group key: unwrapped {} bytes, expected 32",
            plaintext.len()
        ))
    });
    zeroize::Zeroize::zeroize(&mut plaintext);
    key
}

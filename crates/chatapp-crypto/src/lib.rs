//! # chatapp-crypto
//!
//! Cryptographic core of the chatapp end-to-end encryption layer.
//!
//! Everything here is synchronous and free of shared state. The async
//! services that talk to the key directory and keep per-session caches live
//! in `chatapp-e2ee`.
//!
//! ## Cryptographic Primitives
//!
//! - **Key exchange**: X25519 (Curve25519 ECDH)
//! - **Symmetric cipher**: XChaCha20-Poly1305 (AEAD, 24-byte random nonces)
//! - **Key derivation**: PBKDF2-HMAC-SHA256 (passwords), HKDF-SHA256 (DH output)
//! - **Hash**: SHA-256
//! - **Random generation**: thread-local CSPRNG
//!
//! ## Wire Formats
//!
//! ```text
//! wrapped key   "nonceBase64:ciphertextBase64"   (identity and group keys)
//! text message  base64(nonce[24] || ciphertext || tag[16])
//! file          nonce[24] || ciphertext || tag[16]
//! ```
//!
//! ## Examples
//!
//! ### Create and Recover an Identity
//!
//! ```rust
//! use chatapp_crypto::{create_identity_with_iterations, recover_identity};
//!
//! let created = create_identity_with_iterations("correct-horse", 1_000).unwrap();
//! let wrapped = &created.wrapped;
//!
//! let private = recover_identity(
//!     "correct-horse",
//!     &wrapped.encrypted_private_key.to_string(),
//!     &wrapped.salt,
//!     wrapped.iterations,
//! )
//! .unwrap();
//! assert_eq!(private.public_key(), created.keypair.public);
//! ```
//!
//! ### Distribute a Group Key
//!
//! ```rust
//! use chatapp_crypto::{unwrap_group_key, wrap_group_key_for_member, GroupKey, Keypair};
//!
//! let bob = Keypair::generate();
//! let ephemeral = Keypair::generate();
//! let group_key = GroupKey::generate();
//!
//! let wrapped = wrap_group_key_for_member(&group_key, &ephemeral.private, &bob.public).unwrap();
//! let recovered = unwrap_group_key(&wrapped.to_string(), &bob.private, &ephemeral.public).unwrap();
//! assert_eq!(recovered, group_key);
//! ```
//!
//! ### Encrypt a Message
//!
//! ```rust
//! use chatapp_crypto::{decrypt_text, encrypt_text, GroupKey};
//!
//! let key = GroupKey::generate();
//! let blob = encrypt_text(&key, "hello").unwrap();
//! assert_eq!(decrypt_text(&key, &blob).unwrap(), "hello");
//! ```

pub mod cipher;
pub mod error;
pub mod format;
pub mod group_key;
pub mod identity;
pub mod kdf;
pub mod keys;
pub mod message;

// Re-export commonly used types
pub use cipher::{aead_decrypt, aead_encrypt, random_bytes, Sealed};
pub use error::{CryptoError, CryptoResult};
pub use format::{base64_decode, base64_encode, WrappedBlob};
pub use group_key::{unwrap_group_key, wrap_group_key_for_member, GROUP_KEY_WRAP_INFO};
pub use identity::{
    create_identity, create_identity_with_iterations, derive_session_key, recover_identity,
    NewIdentity, WrappedIdentity,
};
pub use kdf::{hash256, hkdf_expand, hmac_sha256, pbkdf2, DerivedKey, DEFAULT_PBKDF2_ITERATIONS};
pub use keys::{ecdh, GroupKey, Keypair, PrivateKey, PublicKey, SessionKey, SharedSecret};
pub use message::{decrypt_file, decrypt_text, encrypt_file, encrypt_text};

#[cfg(test)]
mod integration_tests {
    use super::*;

    /// Full flow: identity creation -> group key distribution -> message exchange.
    #[test]
    fn test_identity_to_message_workflow() {
        let alice = create_identity_with_iterations("alice-pass", 1_000).unwrap();
        let bob = create_identity_with_iterations("bob-pass", 1_000).unwrap();

        // Bob logs in on another device: only the wrapped form is available
        let bob_private = bob.wrapped.recover("bob-pass").unwrap();

        // Alice distributes a group key to both members
        let group_key = GroupKey::generate();
        let ephemeral = Keypair::generate();
        let for_alice =
            wrap_group_key_for_member(&group_key, &ephemeral.private, &alice.wrapped.public_key)
                .unwrap();
        let for_bob =
            wrap_group_key_for_member(&group_key, &ephemeral.private, &bob.wrapped.public_key)
                .unwrap();

        let alice_key =
            unwrap_group_key(&for_alice.to_string(), &alice.keypair.private, &ephemeral.public)
                .unwrap();
        let bob_key =
            unwrap_group_key(&for_bob.to_string(), &bob_private, &ephemeral.public).unwrap();

        let blob = encrypt_text(&alice_key, "hello").unwrap();
        assert_eq!(decrypt_text(&bob_key, &blob).unwrap(), "hello");

        // An outsider holding the ephemeral public key still learns nothing
        let eve = Keypair::generate();
        assert!(unwrap_group_key(&for_bob.to_string(), &eve.private, &ephemeral.public).is_err());
    }
}

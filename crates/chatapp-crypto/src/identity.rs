//! Password-wrapped identity keys.
//!
//! An identity is a long-lived X25519 keypair. The public half is published
//! to the key directory; the private half is only ever stored encrypted:
//!
//! ```text
//! wrapping_key = PBKDF2-HMAC-SHA256(password, salt[16], iterations, 32)
//! wrapped      = XChaCha20-Poly1305(wrapping_key, private_key)
//!              -> "nonceBase64:ciphertextBase64"
//! ```
//!
//! The same wrapping key, passed through HKDF with a distinct label, yields
//! the session key that protects locally cached keys.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cipher::{aead_decrypt, aead_encrypt, generate_salt, Sealed};
use crate::error::{CryptoError, CryptoResult};
use crate::format::{serde_base64, WrappedBlob};
use crate::kdf::{derive_password_key, hkdf_key, DerivedKey, DEFAULT_PBKDF2_ITERATIONS};
use crate::keys::{Keypair, PrivateKey, PublicKey, SessionKey};

/// HKDF label separating the session key from the wrapping key.
pub const SESSION_KEY_INFO: &[u8] = b"chatapp:session:cache";

/// Public, storable description of an identity: everything the key
/// directory holds for a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WrappedIdentity {
    /// The identity public key.
    pub public_key: PublicKey,
    /// The private key wrapped under the password-derived key.
    pub encrypted_private_key: WrappedBlob,
    /// PBKDF2 salt.
    #[serde(with = "serde_base64")]
    pub salt: Vec<u8>,
    /// PBKDF2 iteration count.
    pub iterations: u32,
}

impl WrappedIdentity {
    /// Recover the private key with `password`.
    pub fn recover(&self, password: &str) -> CryptoResult<PrivateKey> {
        let key = unwrap_with(
            password,
            self.encrypted_private_key.sealed(),
            &self.salt,
            self.iterations,
        )?;
        check_public(&key, &self.public_key)?;
        Ok(key)
    }

    /// Recover the private key and derive the session key in one PBKDF2 run.
    pub fn recover_with_session(&self, password: &str) -> CryptoResult<(PrivateKey, SessionKey)> {
        let wrapping_key = derive_password_key(password.as_bytes(), &self.salt, self.iterations)?;
        let key = open_private_key(&wrapping_key, self.encrypted_private_key.sealed())?;
        check_public(&key, &self.public_key)?;
        Ok((key, session_key_from(&wrapping_key)?))
    }
}

/// A freshly created identity: the keypair (kept by the caller for the
/// current session) and its wrapped form (sent to the key directory).
#[derive(Debug)]
pub struct NewIdentity {
    /// The generated keypair.
    pub keypair: Keypair,
    /// The publishable, password-wrapped form.
    pub wrapped: WrappedIdentity,
}

/// Create an identity keypair wrapped under `password` with the default
/// 200 000 PBKDF2 iterations.
pub fn create_identity(password: &str) -> CryptoResult<NewIdentity> {
    create_identity_with_iterations(password, DEFAULT_PBKDF2_ITERATIONS)
}

/// Create an identity keypair wrapped under `password`.
pub fn create_identity_with_iterations(password: &str, iterations: u32) -> CryptoResult<NewIdentity> {
    let keypair = Keypair::generate();
    let salt = generate_salt();

    let wrapping_key = derive_password_key(password.as_bytes(), &salt, iterations)?;
    let sealed = aead_encrypt(wrapping_key.as_bytes(), keypair.private.as_bytes(), None)?;

    debug!(iterations, "Identity keypair generated and wrapped");

    let wrapped = WrappedIdentity {
        public_key: keypair.public.clone(),
        encrypted_private_key: WrappedBlob::from_sealed(sealed),
        salt: salt.to_vec(),
        iterations,
    };

    Ok(NewIdentity { keypair, wrapped })
}

/// Recover an identity private key from its serialized wrapped form.
///
/// Fails with [`CryptoError::Decryption`] on a wrong password, tampered data
/// or malformed input (e.g. no `:` between nonce and ciphertext).
pub fn recover_identity(
    password: &str,
    encrypted_private_key: &str,
    salt: &[u8],
    iterations: u32,
) -> CryptoResult<PrivateKey> {
    let blob: WrappedBlob = encrypted_private_key
        .parse()
        .map_err(|e: CryptoError| e.into_decryption("identity key"))?;
    unwrap_with(password, blob.sealed(), salt, iterations)
}

/// Derive the session key for a password/salt pair without unwrapping.
pub fn derive_session_key(password: &str, salt: &[u8], iterations: u32) -> CryptoResult<SessionKey> {
    let wrapping_key = derive_password_key(password.as_bytes(), salt, iterations)?;
    session_key_from(&wrapping_key)
}

fn unwrap_with(
    password: &str,
    sealed: &Sealed,
    salt: &[u8],
    iterations: u32,
) -> CryptoResult<PrivateKey> {
    let wrapping_key = derive_password_key(password.as_bytes(), salt, iterations)?;
    open_private_key(&wrapping_key, sealed)
}

fn open_private_key(
    wrapping_key: &DerivedKey,
    sealed: &Sealed,
) -> CryptoResult<PrivateKey> {
    let mut plaintext = aead_decrypt(wrapping_key.as_bytes(), &sealed.nonce, &sealed.ciphertext)
        .map_err(|e| e.into_decryption("identity key"))?;

    let key = PrivateKey::from_slice(&plaintext).map_err(|_| {
        CryptoError::Decryption(format!(
            "identity key: unwrapped {} bytes, expected 32",
            plaintext.len()
        ))
    });
    zeroize::Zeroize::zeroize(&mut plaintext);
    key
}

fn session_key_from(wrapping_key: &DerivedKey) -> CryptoResult<SessionKey> {
    let derived = hkdf_key(wrapping_key.as_bytes(), SESSION_KEY_INFO)?;
    Ok(SessionKey::from_bytes(*derived.as_bytes()))
}

fn check_public(key: &PrivateKey, expected: &PublicKey) -> CryptoResult<()> {
    if &key.public_key() != expected {
        return Err(CryptoError::Decryption(
            "identity key does not match the published public key".to_string(),
        ));
    }
    Ok(())
}

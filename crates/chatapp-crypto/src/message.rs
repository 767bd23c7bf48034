//! Message and file payload encryption under a group key.
//!
//! Text messages travel as `base64(nonce || ciphertext || tag)`; file
//! attachments as the raw `nonce || ciphertext || tag` bytes.

use crate::cipher::{aead_decrypt, aead_encrypt, Sealed};
use crate::error::{CryptoError, CryptoResult};
use crate::format::{base64_decode, base64_encode};
use crate::keys::GroupKey;

/// Encrypt a text message. A fresh nonce is drawn for every call.
pub fn encrypt_text(group_key: &GroupKey, plaintext: &str) -> CryptoResult<String> {
    let sealed = aead_encrypt(group_key.as_bytes(), plaintext.as_bytes(), None)?;
    Ok(base64_encode(&sealed.to_bytes()))
}

/// Decrypt a text message produced by [`encrypt_text`].
pub fn decrypt_text(group_key: &GroupKey, blob: &str) -> CryptoResult<String> {
    let raw = base64_decode(blob)?;
    let plaintext = open(group_key, &raw)?;
    String::from_utf8(plaintext)
        .map_err(|_| CryptoError::MalformedInput("decrypted message is not valid UTF-8".into()))
}

/// Encrypt a file attachment.
pub fn encrypt_file(group_key: &GroupKey, bytes: &[u8]) -> CryptoResult<Vec<u8>> {
    let sealed = aead_encrypt(group_key.as_bytes(), bytes, None)?;
    Ok(sealed.to_bytes())
}

/// Decrypt a file attachment produced by [`encrypt_file`].
pub fn decrypt_file(group_key: &GroupKey, blob: &[u8]) -> CryptoResult<Vec<u8>> {
    open(group_key, blob)
}

fn open(group_key: &GroupKey, raw: &[u8]) -> CryptoResult<Vec<u8>> {
    let sealed = Sealed::from_bytes(raw)?;
    aead_decrypt(group_key.as_bytes(), &sealed.nonce, &sealed.ciphertext)
}

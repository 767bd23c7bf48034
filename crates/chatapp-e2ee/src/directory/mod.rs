//! Key directory: the server-side registry of public keys and wrapped keys.
//!
//! The directory only ever sees public keys, password-wrapped identity keys
//! and per-member wrapped group keys. Two implementations are provided:
//! [`HttpKeyDirectory`] for the chat server's REST API and
//! [`MemoryKeyDirectory`] for tests and local tooling.

mod http;
mod memory;

pub use http::HttpKeyDirectory;
pub use memory::{DirectoryCall, MemoryKeyDirectory};

use std::sync::Arc;

use async_trait::async_trait;
use chatapp_crypto::{base64_decode, PublicKey, WrappedBlob, WrappedIdentity, DEFAULT_PBKDF2_ITERATIONS};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Identity record as returned by `GET /keys/user/{userId}`.
///
/// Lookups of other members may only carry the public key; the wrapped
/// private key and its KDF parameters are present for the account owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityBundle {
    /// Identity public key (base64).
    #[serde(alias = "public_key", alias = "publicKeyBase64")]
    pub public_key: PublicKey,
    /// Password-wrapped private key, `nonce:ciphertext`.
    #[serde(default, alias = "encrypted_private_key", skip_serializing_if = "Option::is_none")]
    pub encrypted_private_key: Option<String>,
    /// PBKDF2 salt (base64).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
    /// PBKDF2 iteration count; older records omit it.
    #[serde(default = "default_iterations")]
    pub iterations: u32,
}

fn default_iterations() -> u32 {
    DEFAULT_PBKDF2_ITERATIONS
}

impl IdentityBundle {
    /// Bundle for a freshly wrapped identity.
    pub fn from_wrapped(wrapped: &WrappedIdentity) -> Self {
        Self {
            public_key: wrapped.public_key.clone(),
            encrypted_private_key: Some(wrapped.encrypted_private_key.to_string()),
            salt: Some(chatapp_crypto::base64_encode(&wrapped.salt)),
            iterations: wrapped.iterations,
        }
    }

    /// Rebuild the wrapped identity needed to unlock the private key.
    pub fn into_wrapped(self) -> Result<WrappedIdentity> {
        let encrypted = self.encrypted_private_key.ok_or_else(|| {
            Error::KeyNotFound("identity record has no encrypted private key".to_string())
        })?;
        let salt = self
            .salt
            .ok_or_else(|| Error::KeyNotFound("identity record has no salt".to_string()))?;

        Ok(WrappedIdentity {
            public_key: self.public_key,
            encrypted_private_key: encrypted.parse::<WrappedBlob>()?,
            salt: base64_decode(&salt)?,
            iterations: self.iterations,
        })
    }
}

/// Body of `POST /keys/user`.
///
/// The server keeps the wrap nonce in its own column, so it is sent next to
/// the `nonce:ciphertext` blob that already contains it.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RegisterIdentityRequest<'a> {
    pub user_id: &'a str,
    #[serde(flatten)]
    pub identity: &'a WrappedIdentity,
    pub nonce: String,
}

/// Body of `POST /keys/group-public`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GroupPublicKeyRequest<'a> {
    pub group_id: &'a str,
    pub group_public_key: &'a PublicKey,
}

/// Response of `GET /keys/group-public/{groupId}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GroupPublicKeyResponse {
    #[serde(alias = "group_public_key", alias = "groupPublicKeyBase64")]
    pub group_public_key: PublicKey,
}

/// Body of `POST /keys/group-member`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MemberKeyRequest<'a> {
    pub group_id: &'a str,
    pub user_id: &'a str,
    pub encrypted_group_private_key: String,
    pub nonce: String,
}

/// Response of `GET /keys/group-member/{groupId}/{userId}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MemberKeyResponse {
    #[serde(alias = "encrypted_group_private_key")]
    pub encrypted_group_private_key: String,
}

/// Server-side key registry.
///
/// Lookups return `Ok(None)` when the record does not exist and `Err` only
/// when the directory itself could not be reached or answered with an error.
#[async_trait]
pub trait KeyDirectory: Send + Sync {
    /// Publish a user's public key and password-wrapped private key.
    async fn register_identity(&self, user_id: &str, identity: &WrappedIdentity) -> Result<()>;

    /// Fetch a user's identity record.
    async fn fetch_identity(&self, user_id: &str) -> Result<Option<IdentityBundle>>;

    /// Publish the ephemeral public key of a group's key distribution.
    async fn publish_group_public_key(&self, group_id: &str, public_key: &PublicKey)
        -> Result<()>;

    /// Fetch the ephemeral public key of a group's key distribution.
    async fn fetch_group_public_key(&self, group_id: &str) -> Result<Option<PublicKey>>;

    /// Upload a group key wrapped for one member.
    async fn publish_member_key(
        &self,
        group_id: &str,
        member_id: &str,
        wrapped: &WrappedBlob,
    ) -> Result<()>;

    /// Fetch the wrapped group key for one member, as stored (`nonce:ciphertext`).
    async fn fetch_member_key(&self, group_id: &str, member_id: &str) -> Result<Option<String>>;
}

#[async_trait]
impl<T: KeyDirectory + ?Sized> KeyDirectory for Arc<T> {
    async fn register_identity(&self, user_id: &str, identity: &WrappedIdentity) -> Result<()> {
        (**self).register_identity(user_id, identity).await
    }

    async fn fetch_identity(&self, user_id: &str) -> Result<Option<IdentityBundle>> {
        (**self).fetch_identity(user_id).await
    }

    async fn publish_group_public_key(
        &self,
        group_id: &str,
        public_key: &PublicKey,
    ) -> Result<()> {
        (**self).publish_group_public_key(group_id, public_key).await
    }

    async fn fetch_group_public_key(&self, group_id: &str) -> Result<Option<PublicKey>> {
        (**self).fetch_group_public_key(group_id).await
    }

    async fn publish_member_key(
        &self,
        group_id: &str,
        member_id: &str,
        wrapped: &WrappedBlob,
    ) -> Result<()> {
        (**self).publish_member_key(group_id, member_id, wrapped).await
    }

    async fn fetch_member_key(&self, group_id: &str, member_id: &str) -> Result<Option<String>> {
        (**self).fetch_member_key(group_id, member_id).await
    }
}

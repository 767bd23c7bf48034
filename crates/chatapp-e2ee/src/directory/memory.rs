//! In-process key directory for tests and local tooling.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chatapp_crypto::{PublicKey, WrappedBlob, WrappedIdentity};
use parking_lot::RwLock;

use super::{IdentityBundle, KeyDirectory};
use crate::error::{Error, Result};

#[derive(Default)]
struct State {
    identities: HashMap<String, IdentityBundle>,
    group_public: HashMap<String, PublicKey>,
    member_keys: HashMap<(String, String), String>,
    failing_members: HashSet<String>,
    fail_group_public: bool,
    calls: Vec<DirectoryCall>,
}

/// A recorded directory call (operation name and primary id).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryCall {
    pub operation: &'static str,
    pub id: String,
}

/// [`KeyDirectory`] held entirely in memory.
///
/// Clones share state, so a test can keep a handle while a service owns
/// another. Uploads for selected members can be made to fail to exercise
/// partial distribution.
///
/// Identity records and group public keys are write-once, as on the server;
/// a second write fails with [`Error::Conflict`]. Member keys are upserted.
#[derive(Clone, Default)]
pub struct MemoryKeyDirectory {
    state: Arc<RwLock<State>>,
}

impl MemoryKeyDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `publish_member_key` for `member_id` fail until healed.
    pub fn fail_uploads_for(&self, member_id: impl Into<String>) {
        self.state.write().failing_members.insert(member_id.into());
    }

    /// Stop failing uploads for `member_id`.
    pub fn heal(&self, member_id: &str) {
        self.state.write().failing_members.remove(member_id);
    }

    /// Make `publish_group_public_key` fail.
    pub fn fail_group_public_publish(&self, fail: bool) {
        self.state.write().fail_group_public = fail;
    }

    /// Store a raw wrapped-key record, bypassing validation.
    pub fn put_member_key_raw(&self, group_id: &str, member_id: &str, raw: impl Into<String>) {
        self.state
            .write()
            .member_keys
            .insert((group_id.to_string(), member_id.to_string()), raw.into());
    }

    /// Number of wrapped member keys stored for `group_id`.
    pub fn member_key_count(&self, group_id: &str) -> usize {
        self.state
            .read()
            .member_keys
            .keys()
            .filter(|(g, _)| g == group_id)
            .count()
    }

    /// Calls made so far, oldest first.
    pub fn calls(&self) -> Vec<DirectoryCall> {
        self.state.read().calls.clone()
    }

    fn record(state: &mut State, operation: &'static str, id: &str) {
        state.calls.push(DirectoryCall {
            operation,
            id: id.to_string(),
        });
    }
}

#[async_trait]
impl KeyDirectory for MemoryKeyDirectory {
    async fn register_identity(&self, user_id: &str, identity: &WrappedIdentity) -> Result<()> {
        let mut state = self.state.write();
        Self::record(&mut state, "register_identity", user_id);
        if state.identities.contains_key(user_id) {
            return Err(Error::Conflict(format!(
                "identity for user {} already registered",
                user_id
            )));
        }
        state
            .identities
            .insert(user_id.to_string(), IdentityBundle::from_wrapped(identity));
        Ok(())
    }

    async fn fetch_identity(&self, user_id: &str) -> Result<Option<IdentityBundle>> {
        let mut state = self.state.write();
        Self::record(&mut state, "fetch_identity", user_id);
        Ok(state.identities.get(user_id).cloned())
    }

    async fn publish_group_public_key(
        &self,
        group_id: &str,
        public_key: &PublicKey,
    ) -> Result<()> {
        let mut state = self.state.write();
        Self::record(&mut state, "publish_group_public_key", group_id);
        if state.fail_group_public {
            return Err(Error::Directory(format!(
                "injected failure publishing group public key for {}",
                group_id
            )));
        }
        if state.group_public.contains_key(group_id) {
            return Err(Error::Conflict(format!(
                "group public key for {} already exists",
                group_id
            )));
        }
        state
            .group_public
            .insert(group_id.to_string(), public_key.clone());
        Ok(())
    }

    async fn fetch_group_public_key(&self, group_id: &str) -> Result<Option<PublicKey>> {
        let mut state = self.state.write();
        Self::record(&mut state, "fetch_group_public_key", group_id);
        Ok(state.group_public.get(group_id).cloned())
    }

    async fn publish_member_key(
        &self,
        group_id: &str,
        member_id: &str,
        wrapped: &WrappedBlob,
    ) -> Result<()> {
        let mut state = self.state.write();
        Self::record(&mut state, "publish_member_key", member_id);
        if state.failing_members.contains(member_id) {
            return Err(Error::Directory(format!(
                "injected failure uploading key for member {}",
                member_id
            )));
        }
        state.member_keys.insert(
            (group_id.to_string(), member_id.to_string()),
            wrapped.to_string(),
        );
        Ok(())
    }

    async fn fetch_member_key(&self, group_id: &str, member_id: &str) -> Result<Option<String>> {
        let mut state = self.state.write();
        Self::record(&mut state, "fetch_member_key", member_id);
        Ok(state
            .member_keys
            .get(&(group_id.to_string(), member_id.to_string()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatapp_crypto::{create_identity_with_iterations, Keypair};

    #[tokio::test]
    async fn test_identity_roundtrip() {
        let dir = MemoryKeyDirectory::new();
        let created = create_identity_with_iterations("pw", 1_000).unwrap();

        dir.register_identity("alice", &created.wrapped).await.unwrap();

        let bundle = dir.fetch_identity("alice").await.unwrap().unwrap();
        assert_eq!(bundle.public_key, created.keypair.public);
        assert!(dir.fetch_identity("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_identity_is_conflict() {
        let dir = MemoryKeyDirectory::new();
        let first = create_identity_with_iterations("pw", 1_000).unwrap();
        let second = create_identity_with_iterations("pw", 1_000).unwrap();
        dir.register_identity("alice", &first.wrapped).await.unwrap();

        let result = dir.register_identity("alice", &second.wrapped).await;
        assert!(matches!(result, Err(Error::Conflict(_))));
        let bundle = dir.fetch_identity("alice").await.unwrap().unwrap();
        assert_eq!(bundle.public_key, first.keypair.public);
    }

    #[tokio::test]
    async fn test_group_public_key_is_write_once() {
        let dir = MemoryKeyDirectory::new();
        let first = Keypair::generate();
        dir.publish_group_public_key("g1", &first.public).await.unwrap();

        let result = dir
            .publish_group_public_key("g1", &Keypair::generate().public)
            .await;
        assert!(matches!(result, Err(Error::Conflict(_))));
        assert_eq!(dir.fetch_group_public_key("g1").await.unwrap(), Some(first.public));
    }

    #[tokio::test]
    async fn test_member_key_upload_replaces_previous() {
        let dir = MemoryKeyDirectory::new();
        dir.put_member_key_raw("g1", "bob", "old");
        let blob = WrappedBlob::from_sealed(
            chatapp_crypto::aead_encrypt(&[1u8; 32], &[2u8; 32], None).unwrap(),
        );

        dir.publish_member_key("g1", "bob", &blob).await.unwrap();
        assert_eq!(
            dir.fetch_member_key("g1", "bob").await.unwrap(),
            Some(blob.to_string())
        );
    }

    #[tokio::test]
    async fn test_group_public_key() {
        let dir = MemoryKeyDirectory::new();
        let eph = Keypair::generate();

        assert!(dir.fetch_group_public_key("g1").await.unwrap().is_none());
        dir.publish_group_public_key("g1", &eph.public).await.unwrap();
        assert_eq!(dir.fetch_group_public_key("g1").await.unwrap(), Some(eph.public));
    }

    #[tokio::test]
    async fn test_injected_member_failure_and_heal() {
        let dir = MemoryKeyDirectory::new();
        let blob = WrappedBlob::from_sealed(
            chatapp_crypto::aead_encrypt(&[1u8; 32], &[2u8; 32], None).unwrap(),
        );

        dir.fail_uploads_for("bob");
        assert!(dir.publish_member_key("g1", "bob", &blob).await.is_err());
        assert_eq!(dir.member_key_count("g1"), 0);

        dir.heal("bob");
        dir.publish_member_key("g1", "bob", &blob).await.unwrap();
        assert_eq!(
            dir.fetch_member_key("g1", "bob").await.unwrap(),
            Some(blob.to_string())
        );
    }

    #[tokio::test]
    async fn test_clones_share_state_and_calls_are_recorded() {
        let dir = MemoryKeyDirectory::new();
        let handle = dir.clone();

        dir.fetch_group_public_key("g9").await.unwrap();
        assert_eq!(
            handle.calls(),
            vec![DirectoryCall {
                operation: "fetch_group_public_key",
                id: "g9".to_string()
            }]
        );
    }
}

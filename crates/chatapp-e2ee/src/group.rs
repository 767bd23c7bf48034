//! Group key distribution and retrieval.
//!
//! A distribution generates a fresh 32-byte group key and one ephemeral
//! X25519 keypair. The ephemeral public key is published for the group and
//! the group key is wrapped separately for every member's identity key.
//! Members recover it with [`GroupKeyService::fetch_group_key`].
//!
//! Distribution is not atomic: members whose public key cannot be resolved
//! or whose upload fails are listed in the [`DistributionReport`] and can be
//! retried with [`GroupKeyDistribution::retry_failed`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chatapp_crypto::{unwrap_group_key, wrap_group_key_for_member, GroupKey, Keypair, PrivateKey, PublicKey};
use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::cache::KeyCache;
use crate::config::{E2eeConfig, KeyWaitConfig};
use crate::directory::KeyDirectory;
use crate::error::{Error, Result};
use crate::logging::SUBSYSTEM_E2EE;

/// Looks up a member's identity public key.
#[async_trait]
pub trait PublicKeyResolver: Send + Sync {
    async fn resolve(&self, member_id: &str) -> Result<PublicKey>;
}

/// Resolver backed by the key directory's identity records.
pub struct DirectoryResolver<D> {
    directory: Arc<D>,
}

impl<D: KeyDirectory> DirectoryResolver<D> {
    pub fn new(directory: Arc<D>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl<D: KeyDirectory> PublicKeyResolver for DirectoryResolver<D> {
    async fn resolve(&self, member_id: &str) -> Result<PublicKey> {
        self.directory
            .fetch_identity(member_id)
            .await?
            .map(|bundle| bundle.public_key)
            .ok_or_else(|| Error::KeyNotFound(format!("public key for user {}", member_id)))
    }
}

/// Fixed member → public key table, for callers that already hold the keys.
#[async_trait]
impl PublicKeyResolver for HashMap<String, PublicKey> {
    async fn resolve(&self, member_id: &str) -> Result<PublicKey> {
        self.get(member_id)
            .cloned()
            .ok_or_else(|| Error::KeyNotFound(format!("public key for user {}", member_id)))
    }
}

/// A member the group key could not be delivered to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberFailure {
    pub member_id: String,
    pub reason: String,
}

/// Outcome of delivering a group key to its members.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistributionReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<MemberFailure>,
}

impl DistributionReport {
    /// True when every member received the key.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Ids of members still missing the key.
    pub fn failed_members(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.member_id.as_str()).collect()
    }
}

/// A freshly created group key and the state needed to finish delivering it.
///
/// The ephemeral private key is kept so failed members can be retried with
/// the same published ephemeral public key. It is zeroized on drop.
pub struct GroupKeyDistribution {
    group_id: String,
    key: GroupKey,
    ephemeral: Keypair,
    report: DistributionReport,
}

impl GroupKeyDistribution {
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// The group key, for the creator's own cache.
    pub fn key(&self) -> &GroupKey {
        &self.key
    }

    /// Ephemeral public key published for this distribution.
    pub fn ephemeral_public(&self) -> &PublicKey {
        &self.ephemeral.public
    }

    pub fn report(&self) -> &DistributionReport {
        &self.report
    }

    /// Consume the distribution, keeping only the key and report.
    pub fn into_parts(self) -> (GroupKey, DistributionReport) {
        (self.key, self.report)
    }

    /// Re-attempt delivery to the members that failed.
    ///
    /// Members that now succeed move to `succeeded`; the rest stay in
    /// `failed` with their latest reason.
    pub async fn retry_failed<D: KeyDirectory>(
        &mut self,
        service: &GroupKeyService<D>,
        resolver: &dyn PublicKeyResolver,
    ) -> &DistributionReport {
        if self.report.failed.is_empty() {
            return &self.report;
        }

        let pending: Vec<String> = self
            .report
            .failed
            .drain(..)
            .map(|f| f.member_id)
            .collect();

        let outcome = service
            .deliver_all(&self.group_id, &pending, &self.key, &self.ephemeral.private, resolver)
            .await;
        self.report.succeeded.extend(outcome.succeeded);
        self.report.failed = outcome.failed;

        info!(
            subsystem = SUBSYSTEM_E2EE,
            component = "group_keys",
            op = "retry_failed",
            group_id = %self.group_id,
            succeeded = self.report.succeeded.len(),
            failed = self.report.failed.len(),
            "Group key redistribution finished"
        );
        &self.report
    }
}

impl std::fmt::Debug for GroupKeyDistribution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupKeyDistribution")
            .field("group_id", &self.group_id)
            .field("ephemeral_public", &self.ephemeral.public)
            .field("report", &self.report)
            .finish_non_exhaustive()
    }
}

/// Creates, distributes and retrieves group keys through a [`KeyDirectory`].
pub struct GroupKeyService<D> {
    directory: Arc<D>,
    key_wait: Duration,
}

impl<D> Clone for GroupKeyService<D> {
    fn clone(&self) -> Self {
        Self {
            directory: self.directory.clone(),
            key_wait: self.key_wait,
        }
    }
}

impl<D: KeyDirectory> GroupKeyService<D> {
    /// Service with the default identity-key wait bound.
    pub fn new(directory: Arc<D>) -> Self {
        Self {
            directory,
            key_wait: KeyWaitConfig::default().timeout(),
        }
    }

    /// Service whose identity-key wait follows `config.key_wait`.
    pub fn with_config(directory: Arc<D>, config: &E2eeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            directory,
            key_wait: config.key_wait.timeout(),
        })
    }

    /// How long lookups wait for the identity key to be unlocked.
    pub fn key_wait(&self) -> Duration {
        self.key_wait
    }

    pub fn directory(&self) -> &Arc<D> {
        &self.directory
    }

    /// The default resolver: identity public keys from the same directory.
    pub fn directory_resolver(&self) -> DirectoryResolver<D> {
        DirectoryResolver::new(self.directory.clone())
    }

    /// Generate a group key and deliver it to `members`.
    ///
    /// Fails only if the ephemeral public key cannot be published, since no
    /// member could unwrap without it. The directory keeps one ephemeral key
    /// per group, so a second call for the same group fails with
    /// [`Error::Conflict`]. Per-member failures end up in the returned report.
    pub async fn create_group_key<S: AsRef<str>>(
        &self,
        group_id: &str,
        members: &[S],
        resolver: &dyn PublicKeyResolver,
    ) -> Result<GroupKeyDistribution> {
        let start = Instant::now();
        let key = GroupKey::generate();
        let ephemeral = Keypair::generate();

        if let Err(e) = self
            .directory
            .publish_group_public_key(group_id, &ephemeral.public)
            .await
        {
            error!(
                subsystem = SUBSYSTEM_E2EE,
                component = "group_keys",
                op = "create_group_key",
                group_id,
                error = %e,
                "Could not publish group public key, aborting distribution"
            );
            return Err(e);
        }

        let members: Vec<String> = members.iter().map(|m| m.as_ref().to_string()).collect();
        let report = self
            .deliver_all(group_id, &members, &key, &ephemeral.private, resolver)
            .await;

        info!(
            subsystem = SUBSYSTEM_E2EE,
            component = "group_keys",
            op = "create_group_key",
            group_id,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Group key distributed"
        );

        Ok(GroupKeyDistribution {
            group_id: group_id.to_string(),
            key,
            ephemeral,
            report,
        })
    }

    async fn deliver_all(
        &self,
        group_id: &str,
        members: &[String],
        key: &GroupKey,
        ephemeral_private: &PrivateKey,
        resolver: &dyn PublicKeyResolver,
    ) -> DistributionReport {
        let attempts = members.iter().map(|member_id| async move {
            let outcome = self
                .deliver(group_id, member_id, key, ephemeral_private, resolver)
                .await;
            (member_id, outcome)
        });

        let mut report = DistributionReport::default();
        for (member_id, outcome) in join_all(attempts).await {
            match outcome {
                Ok(()) => report.succeeded.push(member_id.clone()),
                Err(e) => {
                    warn!(
                        subsystem = SUBSYSTEM_E2EE,
                        component = "group_keys",
                        op = "deliver",
                        group_id,
                        member_id = %member_id,
                        error = %e,
                        "Group key not delivered to member"
                    );
                    report.failed.push(MemberFailure {
                        member_id: member_id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        report
    }

    async fn deliver(
        &self,
        group_id: &str,
        member_id: &str,
        key: &GroupKey,
        ephemeral_private: &PrivateKey,
        resolver: &dyn PublicKeyResolver,
    ) -> Result<()> {
        let member_public = resolver.resolve(member_id).await?;
        let wrapped = wrap_group_key_for_member(key, ephemeral_private, &member_public)?;
        self.directory
            .publish_member_key(group_id, member_id, &wrapped)
            .await
    }

    /// Fetch and unwrap the group key delivered to `member_id`.
    ///
    /// [`Error::KeyNotFound`] when the group public key or the member's
    /// wrapped key is absent; a decryption error when unwrapping fails.
    pub async fn fetch_group_key(
        &self,
        group_id: &str,
        member_id: &str,
        my_private: &PrivateKey,
    ) -> Result<GroupKey> {
        let ephemeral_public = self
            .directory
            .fetch_group_public_key(group_id)
            .await?
            .ok_or_else(|| Error::KeyNotFound(format!("group public key for {}", group_id)))?;

        let wrapped = self
            .directory
            .fetch_member_key(group_id, member_id)
            .await?
            .ok_or_else(|| {
                Error::KeyNotFound(format!("group {} key for member {}", group_id, member_id))
            })?;

        let key = unwrap_group_key(&wrapped, my_private, &ephemeral_public)?;
        debug!(
            subsystem = SUBSYSTEM_E2EE,
            component = "group_keys",
            op = "fetch_group_key",
            group_id,
            member_id,
            "Group key unwrapped"
        );
        Ok(key)
    }

    /// Group key for `group_id`, from `cache` or the directory.
    ///
    /// On a cache miss waits up to [`key_wait`](Self::key_wait) for the
    /// identity key, fetches the key and caches it. The cached copy is
    /// persisted when the cache has a session key.
    pub async fn resolve_group_key(
        &self,
        cache: &KeyCache,
        group_id: &str,
        member_id: &str,
    ) -> Result<GroupKey> {
        if let Some(key) = cache.group_key(group_id).await {
            return Ok(key);
        }

        let my_private = cache.wait_for_identity_key(self.key_wait).await?;
        let key = self.fetch_group_key(group_id, member_id, &my_private).await?;
        cache
            .set_group_key(group_id, key.clone(), cache.has_session_key())
            .await?;
        Ok(key)
    }
}

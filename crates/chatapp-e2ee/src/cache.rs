//! Session-scoped key cache.
//!
//! A [`KeyCache`] is created at login and closed at logout. It holds the
//! unlocked identity private key and every group key the session has
//! resolved, optionally mirrored to a [`KeyStore`] with each record encrypted
//! under the session key.
//!
//! Lookups go to memory first and fall back to the durable mirror. A durable
//! record that cannot be opened (different session key, corruption) is
//! treated as absent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chatapp_crypto::{GroupKey, PrivateKey, SessionKey};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::logging::SUBSYSTEM_E2EE;
use crate::store::{EncryptedRecord, KeyStore};

#[derive(Default)]
struct CacheState {
    identity: Option<PrivateKey>,
    groups: HashMap<String, GroupKey>,
    session_key: Option<SessionKey>,
    closed: bool,
}

/// In-memory key cache with an optional encrypted durable mirror.
pub struct KeyCache {
    state: Mutex<CacheState>,
    store: Option<Arc<dyn KeyStore>>,
    identity_ready: watch::Sender<bool>,
}

impl KeyCache {
    /// Create an empty cache, optionally backed by `store`.
    pub fn new(store: Option<Arc<dyn KeyStore>>) -> Self {
        let (identity_ready, _) = watch::channel(false);
        Self {
            state: Mutex::new(CacheState::default()),
            store,
            identity_ready,
        }
    }

    /// Cache with no durable mirror.
    pub fn in_memory() -> Self {
        Self::new(None)
    }

    /// Install the key protecting persisted records.
    pub fn set_session_key(&self, key: SessionKey) {
        self.state.lock().session_key = Some(key);
    }

    /// Whether a session key is installed.
    pub fn has_session_key(&self) -> bool {
        self.state.lock().session_key.is_some()
    }

    /// Whether [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn session_key(&self) -> Option<SessionKey> {
        self.state.lock().session_key.clone()
    }

    /// Session key for a write, refusing when none is installed.
    fn session_key_for_persist(&self) -> Result<SessionKey> {
        let state = self.state.lock();
        if state.closed {
            return Err(Error::Unavailable("key cache is closed".to_string()));
        }
        state.session_key.clone().ok_or(Error::SessionKeyMissing)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Unavailable("key cache is closed".to_string()));
        }
        Ok(())
    }

    // ─── Identity key ──────────────────────────────────────────────────────

    /// Record to write for `key`, or `None` when nothing is persisted.
    ///
    /// `persist` is ignored without a store. With one, a session key is
    /// required.
    fn record_for(&self, key: &[u8], persist: bool) -> Result<Option<EncryptedRecord>> {
        if persist && self.store.is_some() {
            let session = self.session_key_for_persist()?;
            Ok(Some(EncryptedRecord::seal(&session, key)?))
        } else {
            self.ensure_open()?;
            Ok(None)
        }
    }

    /// Install the identity private key, mirroring it to the store when `persist`.
    ///
    /// Persisting requires a session key; without one the call fails with
    /// [`Error::SessionKeyMissing`]. The key is cached only after the store
    /// write succeeds.
    pub async fn set_identity_key(&self, key: PrivateKey, persist: bool) -> Result<()> {
        let record = self.record_for(key.as_bytes(), persist)?;

        if let (Some(store), Some(record)) = (&self.store, &record) {
            store.save_identity(record).await?;
            debug!(
                subsystem = SUBSYSTEM_E2EE,
                component = "key_cache",
                op = "set_identity_key",
                "Identity key persisted"
            );
        }

        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(Error::Unavailable("key cache is closed".to_string()));
            }
            state.identity = Some(key);
        }
        self.identity_ready.send_replace(true);
        Ok(())
    }

    fn memory_identity(&self) -> Option<PrivateKey> {
        let state = self.state.lock();
        if state.closed {
            return None;
        }
        state.identity.clone()
    }

    /// The identity private key, from memory or the durable mirror.
    pub async fn identity_key(&self) -> Option<PrivateKey> {
        if let Some(key) = self.memory_identity() {
            return Some(key);
        }

        let store = self.store.as_ref()?;
        let session = self.session_key()?;

        let record = match store.load_identity().await {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(e) => {
                warn!(
                    subsystem = SUBSYSTEM_E2EE,
                    component = "key_cache",
                    op = "identity_key",
                    error = %e,
                    "Failed to load persisted identity key"
                );
                return None;
            }
        };

        let key = match record
            .open(&session)
            .and_then(|bytes| PrivateKey::from_slice(&bytes))
        {
            Ok(key) => key,
            Err(e) => {
                warn!(
                    subsystem = SUBSYSTEM_E2EE,
                    component = "key_cache",
                    op = "identity_key",
                    error = %e,
                    "Persisted identity key is unreadable, ignoring it"
                );
                return None;
            }
        };

        {
            let mut state = self.state.lock();
            if state.closed {
                return None;
            }
            state.identity = Some(key.clone());
        }
        self.identity_ready.send_replace(true);
        debug!(
            subsystem = SUBSYSTEM_E2EE,
            component = "key_cache",
            op = "identity_key",
            "Identity key restored from store"
        );
        Some(key)
    }

    /// Wait until the identity key is available or `timeout` elapses.
    ///
    /// Resolves as soon as [`set_identity_key`](Self::set_identity_key) runs
    /// on another task. Expiry yields [`Error::Unavailable`].
    pub async fn wait_for_identity_key(&self, timeout: Duration) -> Result<PrivateKey> {
        let mut ready = self.identity_ready.subscribe();

        if let Some(key) = self.identity_key().await {
            return Ok(key);
        }

        let waited = tokio::time::timeout(timeout, async {
            loop {
                if ready.changed().await.is_err() {
                    return None;
                }
                if *ready.borrow_and_update() {
                    if let Some(key) = self.memory_identity() {
                        return Some(key);
                    }
                }
            }
        })
        .await;

        match waited {
            Ok(Some(key)) => Ok(key),
            _ => {
                debug!(
                    subsystem = SUBSYSTEM_E2EE,
                    component = "key_cache",
                    op = "wait_for_identity_key",
                    duration_ms = timeout.as_millis() as u64,
                    "Identity key did not become available"
                );
                Err(Error::Unavailable(format!(
                    "identity key not available after {} ms",
                    timeout.as_millis()
                )))
            }
        }
    }

    /// Drop the identity key from memory and the durable mirror.
    pub async fn clear_identity_key(&self) -> Result<()> {
        self.state.lock().identity = None;
        self.identity_ready.send_replace(false);
        if let Some(store) = &self.store {
            store.delete_identity().await?;
        }
        Ok(())
    }

    // ─── Group keys ────────────────────────────────────────────────────────

    /// Cache the key for `group_id`, mirroring it to the store when `persist`.
    pub async fn set_group_key(&self, group_id: &str, key: GroupKey, persist: bool) -> Result<()> {
        let record = self.record_for(key.as_bytes(), persist)?;
        let persisted = record.is_some();

        if let (Some(store), Some(record)) = (&self.store, &record) {
            store.save_group(group_id, record).await?;
        }

        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(Error::Unavailable("key cache is closed".to_string()));
            }
            state.groups.insert(group_id.to_string(), key);
        }
        debug!(
            subsystem = SUBSYSTEM_E2EE,
            component = "key_cache",
            op = "set_group_key",
            group_id,
            persisted,
            "Group key cached"
        );
        Ok(())
    }

    /// The key for `group_id`, from memory or the durable mirror.
    pub async fn group_key(&self, group_id: &str) -> Option<GroupKey> {
        {
            let state = self.state.lock();
            if state.closed {
                return None;
            }
            if let Some(key) = state.groups.get(group_id) {
                return Some(key.clone());
            }
        }

        let store = self.store.as_ref()?;
        let session = self.session_key()?;

        let record = match store.load_group(group_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!(
                    subsystem = SUBSYSTEM_E2EE,
                    component = "key_cache",
                    op = "group_key",
                    group_id,
                    "Group key cache miss"
                );
                return None;
            }
            Err(e) => {
                warn!(
                    subsystem = SUBSYSTEM_E2EE,
                    component = "key_cache",
                    op = "group_key",
                    group_id,
                    error = %e,
                    "Failed to load persisted group key"
                );
                return None;
            }
        };

        match record
            .open(&session)
            .and_then(|bytes| GroupKey::from_slice(&bytes))
        {
            Ok(key) => {
                let mut state = self.state.lock();
                if state.closed {
                    return None;
                }
                state.groups.insert(group_id.to_string(), key.clone());
                Some(key)
            }
            Err(e) => {
                warn!(
                    subsystem = SUBSYSTEM_E2EE,
                    component = "key_cache",
                    op = "group_key",
                    group_id,
                    error = %e,
                    "Persisted group key is unreadable, ignoring it"
                );
                None
            }
        }
    }

    /// Drop the key for `group_id` from memory and the durable mirror.
    pub async fn clear_group_key(&self, group_id: &str) -> Result<()> {
        self.state.lock().groups.remove(group_id);
        if let Some(store) = &self.store {
            store.delete_group(group_id).await?;
        }
        Ok(())
    }

    /// Drop every group key from memory and the durable mirror.
    pub async fn clear_all_group_keys(&self) -> Result<()> {
        self.state.lock().groups.clear();
        if let Some(store) = &self.store {
            store.clear_groups().await?;
        }
        Ok(())
    }

    /// Logout teardown: forget every key and the session key, then clear the
    /// durable mirror.
    ///
    /// Memory is wiped before the store is touched, so a store failure still
    /// leaves the cache closed with no secrets held. Both store clears are
    /// attempted and the first error is returned. Later lookups return `None`
    /// and later writes fail.
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.identity = None;
            state.groups.clear();
            state.session_key = None;
            state.closed = true;
        }
        self.identity_ready.send_replace(false);

        let mut first_error = None;
        if let Some(store) = &self.store {
            let outcomes = [
                ("clear_groups", store.clear_groups().await),
                ("delete_identity", store.delete_identity().await),
            ];
            for (step, outcome) in outcomes {
                if let Err(e) = outcome {
                    warn!(
                        subsystem = SUBSYSTEM_E2EE,
                        component = "key_cache",
                        op = "close",
                        step,
                        error = %e,
                        "Failed to clear persisted keys"
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        info!(
            subsystem = SUBSYSTEM_E2EE,
            component = "key_cache",
            op = "close",
            "Key cache closed"
        );
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for KeyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("KeyCache")
            .field("has_identity", &state.identity.is_some())
            .field("groups", &state.groups.len())
            .field("has_session_key", &state.session_key.is_some())
            .field("closed", &state.closed)
            .field("durable", &self.store.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKeyStore;
    use async_trait::async_trait;
    use chatapp_crypto::Keypair;

    /// Store whose writes or clears can be made to fail.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryKeyStore,
        fail_writes: bool,
        fail_clears: bool,
    }

    impl FlakyStore {
        fn check(failing: bool) -> Result<()> {
            if failing {
                return Err(Error::Store("disk full".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl KeyStore for FlakyStore {
        async fn load_identity(&self) -> Result<Option<EncryptedRecord>> {
            self.inner.load_identity().await
        }

        async fn save_identity(&self, record: &EncryptedRecord) -> Result<()> {
            Self::check(self.fail_writes)?;
            self.inner.save_identity(record).await
        }

        async fn delete_identity(&self) -> Result<()> {
            Self::check(self.fail_clears)?;
            self.inner.delete_identity().await
        }

        async fn load_group(&self, group_id: &str) -> Result<Option<EncryptedRecord>> {
            self.inner.load_group(group_id).await
        }

        async fn save_group(&self, group_id: &str, record: &EncryptedRecord) -> Result<()> {
            Self::check(self.fail_writes)?;
            self.inner.save_group(group_id, record).await
        }

        async fn delete_group(&self, group_id: &str) -> Result<()> {
            Self::check(self.fail_clears)?;
            self.inner.delete_group(group_id).await
        }

        async fn clear_groups(&self) -> Result<()> {
            Self::check(self.fail_clears)?;
            self.inner.clear_groups().await
        }
    }

    fn session() -> SessionKey {
        SessionKey::from_bytes([3u8; 32])
    }

    fn durable_cache(store: &MemoryKeyStore) -> KeyCache {
        let cache = KeyCache::new(Some(Arc::new(store.clone())));
        cache.set_session_key(session());
        cache
    }

    #[tokio::test]
    async fn test_identity_memory_roundtrip() {
        let cache = KeyCache::in_memory();
        assert!(cache.identity_key().await.is_none());

        let kp = Keypair::generate();
        cache.set_identity_key(kp.private.clone(), false).await.unwrap();
        assert_eq!(cache.identity_key().await.unwrap().public_key(), kp.public);
    }

    #[tokio::test]
    async fn test_persist_without_session_key_fails_closed() {
        let store = MemoryKeyStore::new();
        let cache = KeyCache::new(Some(Arc::new(store.clone())));
        let kp = Keypair::generate();

        let result = cache.set_identity_key(kp.private.clone(), true).await;
        assert!(matches!(result, Err(Error::SessionKeyMissing)));
        assert!(cache.identity_key().await.is_none());
        assert!(store.load_identity().await.unwrap().is_none());

        let result = cache.set_group_key("g1", GroupKey::generate(), true).await;
        assert!(matches!(result, Err(Error::SessionKeyMissing)));
        assert_eq!(store.group_count(), 0);
    }

    #[tokio::test]
    async fn test_persisted_keys_survive_new_cache() {
        let store = MemoryKeyStore::new();
        let kp = Keypair::generate();
        let gk = GroupKey::generate();

        let first = durable_cache(&store);
        first.set_identity_key(kp.private.clone(), true).await.unwrap();
        first.set_group_key("g1", gk.clone(), true).await.unwrap();

        let record = store.load_group("g1").await.unwrap().unwrap();
        assert_ne!(record.ciphertext, chatapp_crypto::base64_encode(gk.as_bytes()));

        let second = durable_cache(&store);
        assert_eq!(second.identity_key().await.unwrap().public_key(), kp.public);
        assert_eq!(second.group_key("g1").await, Some(gk));
    }

    #[tokio::test]
    async fn test_durable_record_under_other_session_key_is_absent() {
        let store = MemoryKeyStore::new();
        let first = durable_cache(&store);
        first.set_group_key("g1", GroupKey::generate(), true).await.unwrap();

        let other = KeyCache::new(Some(Arc::new(store.clone())));
        other.set_session_key(SessionKey::from_bytes([4u8; 32]));
        assert!(other.group_key("g1").await.is_none());
    }

    #[tokio::test]
    async fn test_no_store_lookup_without_session_key() {
        let store = MemoryKeyStore::new();
        durable_cache(&store)
            .set_group_key("g1", GroupKey::generate(), true)
            .await
            .unwrap();

        let cache = KeyCache::new(Some(Arc::new(store)));
        assert!(cache.group_key("g1").await.is_none());
    }

    #[tokio::test]
    async fn test_clear_identity_key() {
        let store = MemoryKeyStore::new();
        let cache = durable_cache(&store);
        cache.set_identity_key(Keypair::generate().private, true).await.unwrap();

        cache.clear_identity_key().await.unwrap();
        assert!(cache.identity_key().await.is_none());
        assert!(store.load_identity().await.unwrap().is_none());
        assert!(!cache.is_closed());
    }

    #[tokio::test]
    async fn test_clear_group_keys() {
        let store = MemoryKeyStore::new();
        let cache = durable_cache(&store);
        cache.set_group_key("g1", GroupKey::generate(), true).await.unwrap();
        cache.set_group_key("g2", GroupKey::generate(), true).await.unwrap();

        cache.clear_group_key("g1").await.unwrap();
        assert!(cache.group_key("g1").await.is_none());
        assert!(cache.group_key("g2").await.is_some());

        cache.clear_all_group_keys().await.unwrap();
        assert!(cache.group_key("g2").await.is_none());
        assert_eq!(store.group_count(), 0);
    }

    #[tokio::test]
    async fn test_close_clears_everything() {
        let store = MemoryKeyStore::new();
        let cache = durable_cache(&store);
        cache.set_identity_key(Keypair::generate().private, true).await.unwrap();
        cache.set_group_key("g1", GroupKey::generate(), true).await.unwrap();

        cache.close().await.unwrap();

        assert!(cache.is_closed());
        assert!(!cache.has_session_key());
        assert!(cache.identity_key().await.is_none());
        assert!(cache.group_key("g1").await.is_none());
        assert!(store.load_identity().await.unwrap().is_none());
        assert!(matches!(
            cache.set_group_key("g1", GroupKey::generate(), false).await,
            Err(Error::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_close_forgets_secrets_when_store_clear_fails() {
        let store = Arc::new(FlakyStore {
            fail_clears: true,
            ..FlakyStore::default()
        });
        let cache = KeyCache::new(Some(store.clone()));
        cache.set_session_key(session());
        cache.set_identity_key(Keypair::generate().private, true).await.unwrap();
        cache.set_group_key("g1", GroupKey::generate(), true).await.unwrap();

        let result = cache.close().await;
        assert!(matches!(result, Err(Error::Store(ref m)) if m == "disk full"));

        assert!(cache.is_closed());
        assert!(!cache.has_session_key());
        assert!(cache.identity_key().await.is_none());
        assert!(cache.group_key("g1").await.is_none());
        let rendered = format!("{:?}", cache);
        assert!(rendered.contains("has_identity: false"));
        assert!(rendered.contains("groups: 0"));
    }

    #[tokio::test]
    async fn test_failed_persist_leaves_key_uncached() {
        let store = Arc::new(FlakyStore {
            fail_writes: true,
            ..FlakyStore::default()
        });
        let cache = KeyCache::new(Some(store));
        cache.set_session_key(session());

        let result = cache.set_identity_key(Keypair::generate().private, true).await;
        assert!(matches!(result, Err(Error::Store(_))));
        assert!(cache.identity_key().await.is_none());

        let result = cache.set_group_key("g1", GroupKey::generate(), true).await;
        assert!(matches!(result, Err(Error::Store(_))));
        assert!(cache.group_key("g1").await.is_none());
    }

    #[tokio::test]
    async fn test_persist_without_store_needs_no_session_key() {
        let cache = KeyCache::in_memory();
        let kp = Keypair::generate();

        cache.set_identity_key(kp.private.clone(), true).await.unwrap();
        cache.set_group_key("g1", GroupKey::generate(), true).await.unwrap();

        assert_eq!(cache.identity_key().await.unwrap().public_key(), kp.public);
        assert!(cache.group_key("g1").await.is_some());
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_when_present() {
        let cache = KeyCache::in_memory();
        let kp = Keypair::generate();
        cache.set_identity_key(kp.private, false).await.unwrap();

        let key = cache
            .wait_for_identity_key(Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(key.public_key(), kp.public);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_resolves_when_key_arrives() {
        let cache = Arc::new(KeyCache::in_memory());
        let kp = Keypair::generate();

        let setter = {
            let cache = cache.clone();
            let private = kp.private.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                cache.set_identity_key(private, false).await.unwrap();
            })
        };

        let key = cache
            .wait_for_identity_key(Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(key.public_key(), kp.public);
        setter.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let cache = KeyCache::in_memory();
        let result = cache.wait_for_identity_key(Duration::from_secs(1)).await;
        assert!(matches!(result, Err(Error::Unavailable(_))));
    }

    #[test]
    fn test_debug_hides_key_material() {
        let cache = KeyCache::in_memory();
        let rendered = format!("{:?}", cache);
        assert!(rendered.contains("has_identity: false"));
    }
}

//! Account registration, login and logout.
//!
//! Registration creates a password-wrapped identity keypair and publishes it
//! to the key directory. Login fetches it back, unlocks it with the password
//! and returns a fresh [`KeyCache`] holding the identity key and the session
//! key that protects the durable mirror.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chatapp_crypto::{
    create_identity_with_iterations, CryptoError, NewIdentity, PrivateKey, PublicKey, SessionKey,
    WrappedIdentity,
};
use tracing::{info, warn};

use crate::cache::KeyCache;
use crate::config::E2eeConfig;
use crate::directory::KeyDirectory;
use crate::error::{Error, Result};
use crate::group::{DirectoryResolver, PublicKeyResolver};
use crate::logging::SUBSYSTEM_E2EE;
use crate::store::{FileKeyStore, KeyStore};

/// Registers and unlocks user identities against a [`KeyDirectory`].
pub struct IdentityService<D> {
    directory: Arc<D>,
    iterations: u32,
    persist_identity: bool,
    store_root: PathBuf,
}

impl<D: KeyDirectory> IdentityService<D> {
    /// Create a service after validating `config`.
    pub fn new(directory: Arc<D>, config: &E2eeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            directory,
            iterations: config.kdf.pbkdf2_iterations,
            persist_identity: config.store.persist_identity,
            store_root: config.store.resolved_dir(),
        })
    }

    /// Durable store for `user_id` under the configured store root.
    pub fn file_store_for(&self, user_id: &str) -> Arc<dyn KeyStore> {
        Arc::new(FileKeyStore::for_user(&self.store_root, user_id))
    }

    /// Create an identity for `user_id` and publish it. Returns the public key.
    pub async fn register(&self, user_id: &str, password: &str) -> Result<PublicKey> {
        let start = Instant::now();
        let password = password.to_string();
        let iterations = self.iterations;
        let created: NewIdentity = run_kdf(move || {
            create_identity_with_iterations(&password, iterations)
        })
        .await?;

        self.directory
            .register_identity(user_id, &created.wrapped)
            .await?;

        info!(
            subsystem = SUBSYSTEM_E2EE,
            component = "identity",
            op = "register",
            user_id,
            iterations,
            duration_ms = start.elapsed().as_millis() as u64,
            "Identity registered"
        );
        Ok(created.keypair.public.clone())
    }

    /// Unlock `user_id`'s identity and open a session cache.
    ///
    /// The identity key is persisted to `store` when the configuration asks
    /// for it. A wrong password fails with a decryption error.
    pub async fn login(
        &self,
        user_id: &str,
        password: &str,
        store: Option<Arc<dyn KeyStore>>,
    ) -> Result<KeyCache> {
        let start = Instant::now();
        let wrapped: WrappedIdentity = self
            .directory
            .fetch_identity(user_id)
            .await?
            .ok_or_else(|| Error::KeyNotFound(format!("identity for user {}", user_id)))?
            .into_wrapped()?;

        let password = password.to_string();
        let unlocked: std::result::Result<(PrivateKey, SessionKey), CryptoError> =
            run_kdf(move || wrapped.recover_with_session(&password)).await;
        let (private, session) = match unlocked {
            Ok(keys) => keys,
            Err(e) => {
                warn!(
                    subsystem = SUBSYSTEM_E2EE,
                    component = "identity",
                    op = "login",
                    user_id,
                    error = %e,
                    "Identity unlock failed"
                );
                return Err(e.into());
            }
        };

        let persist = self.persist_identity && store.is_some();
        let cache = KeyCache::new(store);
        cache.set_session_key(session);
        cache.set_identity_key(private, persist).await?;

        info!(
            subsystem = SUBSYSTEM_E2EE,
            component = "identity",
            op = "login",
            user_id,
            persist,
            duration_ms = start.elapsed().as_millis() as u64,
            "Identity unlocked"
        );
        Ok(cache)
    }

    /// Tear down a session opened by [`login`](Self::login).
    pub async fn logout(&self, cache: &KeyCache) -> Result<()> {
        cache.close().await?;
        info!(
            subsystem = SUBSYSTEM_E2EE,
            component = "identity",
            op = "logout",
            "Session closed"
        );
        Ok(())
    }

    /// A member's identity public key.
    pub async fn public_key(&self, user_id: &str) -> Result<PublicKey> {
        DirectoryResolver::new(self.directory.clone())
            .resolve(user_id)
            .await
    }
}

/// Run a PBKDF2-bound closure off the async worker threads.
async fn run_kdf<T, F>(f: F) -> std::result::Result<T, CryptoError>
where
    T: Send + 'static,
    F: FnOnce() -> std::result::Result<T, CryptoError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CryptoError::KeyDerivation(format!("key derivation task failed: {}", e)))?
}

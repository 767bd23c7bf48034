//! End-to-end account and group flows over the in-memory directory and the
//! file-backed key store.

use std::sync::Arc;

use chatapp_crypto::{decrypt_text, encrypt_text, CryptoError};
use chatapp_e2ee::{
    decrypt_history, E2eeConfig, Error, GroupKeyService, IdentityService, KeyCache, KeyDirectory,
    MemoryKeyDirectory, StoredMessage, UNDECRYPTABLE_PLACEHOLDER,
};

struct Harness {
    _temp: tempfile::TempDir,
    directory: MemoryKeyDirectory,
    identity: IdentityService<MemoryKeyDirectory>,
    groups: GroupKeyService<MemoryKeyDirectory>,
}

impl Harness {
    fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let mut config = E2eeConfig::default();
        config.kdf.pbkdf2_iterations = 1_000;
        config.store.dir = Some(temp.path().to_path_buf());

        let directory = MemoryKeyDirectory::new();
        let shared = Arc::new(directory.clone());
        Self {
            _temp: temp,
            identity: IdentityService::new(shared.clone(), &config).unwrap(),
            groups: GroupKeyService::with_config(shared, &config).unwrap(),
            directory,
        }
    }

    async fn signup_and_login(&self, user: &str) -> KeyCache {
        self.identity.register(user, "correct-horse").await.unwrap();
        self.identity
            .login(user, "correct-horse", Some(self.identity.file_store_for(user)))
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn test_alice_and_bob_exchange_hello() {
    let h = Harness::new();
    let alice = h.signup_and_login("alice").await;
    let bob = h.signup_and_login("bob").await;

    let resolver = h.groups.directory_resolver();
    let dist = h
        .groups
        .create_group_key("g1", &["alice", "bob"], &resolver)
        .await
        .unwrap();
    assert!(dist.report().is_complete());
    alice.set_group_key("g1", dist.key().clone(), true).await.unwrap();

    let alice_key = h
        .groups
        .resolve_group_key(&alice, "g1", "alice")
        .await
        .unwrap();
    let blob = encrypt_text(&alice_key, "hello").unwrap();

    let bob_key = h
        .groups
        .resolve_group_key(&bob, "g1", "bob")
        .await
        .unwrap();
    assert_eq!(decrypt_text(&bob_key, &blob).unwrap(), "hello");
}

#[tokio::test]
async fn test_group_key_survives_relogin_via_file_store() {
    let h = Harness::new();
    let _alice = h.signup_and_login("alice").await;
    let bob = h.signup_and_login("bob").await;

    let resolver = h.groups.directory_resolver();
    h.groups
        .create_group_key("g1", &["alice", "bob"], &resolver)
        .await
        .unwrap();
    let first = h
        .groups
        .resolve_group_key(&bob, "g1", "bob")
        .await
        .unwrap();
    drop(bob);

    let calls_before = h.directory.calls().len();
    let bob = h
        .identity
        .login("bob", "correct-horse", Some(h.identity.file_store_for("bob")))
        .await
        .unwrap();
    let second = h
        .groups
        .resolve_group_key(&bob, "g1", "bob")
        .await
        .unwrap();

    assert_eq!(first, second);
    let fetched_members = h.directory.calls()[calls_before..]
        .iter()
        .filter(|c| c.operation == "fetch_member_key")
        .count();
    assert_eq!(fetched_members, 0);
}

#[tokio::test]
async fn test_logout_wipes_local_keys() {
    let h = Harness::new();
    let bob = h.signup_and_login("bob").await;
    let resolver = h.groups.directory_resolver();
    h.groups
        .create_group_key("g1", &["bob"], &resolver)
        .await
        .unwrap();
    h.groups
        .resolve_group_key(&bob, "g1", "bob")
        .await
        .unwrap();

    h.identity.logout(&bob).await.unwrap();
    assert!(bob.group_key("g1").await.is_none());

    let store = h.identity.file_store_for("bob");
    assert!(store.load_identity().await.unwrap().is_none());
    assert!(store.load_group("g1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_partial_distribution_then_retry() {
    let h = Harness::new();
    let _alice = h.signup_and_login("alice").await;
    let bob = h.signup_and_login("bob").await;
    let _carol = h.signup_and_login("carol").await;
    h.directory.fail_uploads_for("bob");

    let resolver = h.groups.directory_resolver();
    let mut dist = h
        .groups
        .create_group_key("g1", &["alice", "bob", "carol", "dave"], &resolver)
        .await
        .unwrap();
    assert_eq!(dist.report().succeeded, vec!["alice", "carol"]);
    assert_eq!(dist.report().failed_members(), vec!["bob", "dave"]);

    let err = h
        .groups
        .resolve_group_key(&bob, "g1", "bob")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::KeyNotFound(_)));

    h.directory.heal("bob");
    let report = dist.retry_failed(&h.groups, &resolver).await.clone();
    assert_eq!(report.succeeded, vec!["alice", "carol", "bob"]);
    assert_eq!(report.failed_members(), vec!["dave"]);

    let key = h
        .groups
        .resolve_group_key(&bob, "g1", "bob")
        .await
        .unwrap();
    assert_eq!(&key, dist.key());
}

#[tokio::test]
async fn test_wrong_password_login_fails_with_decryption() {
    let h = Harness::new();
    h.identity.register("alice", "correct-horse").await.unwrap();

    let err = h
        .identity
        .login("alice", "wrong-password", None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Crypto(CryptoError::Decryption(_))));
    assert!(err.is_decryption_failure());
}

#[tokio::test]
async fn test_history_for_member_and_outsider() {
    let h = Harness::new();
    let alice = h.signup_and_login("alice").await;
    let bob = h.signup_and_login("bob").await;
    let eve = h.signup_and_login("eve").await;

    let resolver = h.groups.directory_resolver();
    let dist = h
        .groups
        .create_group_key("g1", &["alice", "bob"], &resolver)
        .await
        .unwrap();
    alice.set_group_key("g1", dist.key().clone(), true).await.unwrap();

    let messages = vec![
        StoredMessage {
            id: "m1".into(),
            sender_id: "alice".into(),
            content: encrypt_text(dist.key(), "hello").unwrap(),
        },
        StoredMessage {
            id: "m2".into(),
            sender_id: "alice".into(),
            content: "tampered".into(),
        },
    ];

    let for_bob = decrypt_history(&h.groups, &bob, "g1", "bob", &messages).await;
    let shown: Vec<&str> = for_bob.iter().map(|e| e.message.display_text()).collect();
    assert_eq!(shown, vec!["hello", UNDECRYPTABLE_PLACEHOLDER]);

    let for_eve = decrypt_history(&h.groups, &eve, "g1", "eve", &messages).await;
    assert!(for_eve.iter().all(|e| !e.message.is_plain()));
}

#[tokio::test]
async fn test_public_key_lookup_matches_registration() {
    let h = Harness::new();
    let public = h.identity.register("alice", "pw").await.unwrap();

    assert_eq!(h.identity.public_key("alice").await.unwrap(), public);
    let bundle = h.directory.fetch_identity("alice").await.unwrap().unwrap();
    assert_eq!(bundle.public_key, public);
}

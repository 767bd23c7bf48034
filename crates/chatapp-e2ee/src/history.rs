//! Decryption of stored group message history.
//!
//! History is rendered even when some or all of it cannot be opened: a
//! missing key or a corrupted message turns into
//! [`DecryptedMessage::Undecryptable`], displayed as a placeholder.

use chatapp_crypto::{decrypt_text, GroupKey};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::cache::KeyCache;
use crate::directory::KeyDirectory;
use crate::group::GroupKeyService;
use crate::logging::SUBSYSTEM_E2EE;

/// Text shown in place of a message that cannot be decrypted.
pub const UNDECRYPTABLE_PLACEHOLDER: &str = "[cannot decrypt message]";

/// A message as stored by the chat server; `content` is an encrypted text blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: String,
    pub sender_id: String,
    pub content: String,
}

/// Result of decrypting one message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecryptedMessage {
    Plain(String),
    Undecryptable { original: String, reason: String },
}

impl DecryptedMessage {
    /// Plaintext, or the placeholder when undecryptable.
    pub fn display_text(&self) -> &str {
        match self {
            DecryptedMessage::Plain(text) => text,
            DecryptedMessage::Undecryptable { .. } => UNDECRYPTABLE_PLACEHOLDER,
        }
    }

    pub fn is_plain(&self) -> bool {
        matches!(self, DecryptedMessage::Plain(_))
    }
}

/// A history entry with its decrypted body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub id: String,
    pub sender_id: String,
    pub message: DecryptedMessage,
}

/// Decrypt one message body with `key`, degrading instead of failing.
pub fn decrypt_message(key: &GroupKey, content: &str) -> DecryptedMessage {
    match decrypt_text(key, content) {
        Ok(text) => DecryptedMessage::Plain(text),
        Err(e) => DecryptedMessage::Undecryptable {
            original: content.to_string(),
            reason: e.to_string(),
        },
    }
}

/// Decrypt a group's message history as seen by `member_id`.
///
/// Resolves the group key through `cache` (waiting up to the service's key
/// wait for the identity key), then decrypts every message. Never fails as a
/// whole.
pub async fn decrypt_history<D: KeyDirectory>(
    service: &GroupKeyService<D>,
    cache: &KeyCache,
    group_id: &str,
    member_id: &str,
    messages: &[StoredMessage],
) -> Vec<HistoryEntry> {
    let key = match service.resolve_group_key(cache, group_id, member_id).await {
        Ok(key) => key,
        Err(e) => {
            warn!(
                subsystem = SUBSYSTEM_E2EE,
                component = "history",
                op = "decrypt_history",
                group_id,
                message_count = messages.len(),
                error = %e,
                "Group key unavailable, history shown as undecryptable"
            );
            return messages
                .iter()
                .map(|m| HistoryEntry {
                    id: m.id.clone(),
                    sender_id: m.sender_id.clone(),
                    message: DecryptedMessage::Undecryptable {
                        original: m.content.clone(),
                        reason: e.to_string(),
                    },
                })
                .collect();
        }
    };

    let entries: Vec<HistoryEntry> = messages
        .iter()
        .map(|m| {
            let message = decrypt_message(&key, &m.content);
            trace!(message_id = %m.id, plain = message.is_plain(), "Message processed");
            HistoryEntry {
                id: m.id.clone(),
                sender_id: m.sender_id.clone(),
                message,
            }
        })
        .collect();

    let failed = entries.iter().filter(|e| !e.message.is_plain()).count();
    debug!(
        subsystem = SUBSYSTEM_E2EE,
        component = "history",
        op = "decrypt_history",
        group_id,
        message_count = entries.len(),
        failed,
        "History decrypted"
    );
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemoryKeyDirectory;
    use chatapp_crypto::{encrypt_text, Keypair, PublicKey};
    use std::collections::HashMap;
    use std::sync::Arc;

    fn stored(id: &str, content: String) -> StoredMessage {
        StoredMessage {
            id: id.to_string(),
            sender_id: "alice".to_string(),
            content,
        }
    }

    #[test]
    fn test_display_text() {
        assert_eq!(DecryptedMessage::Plain("hi".into()).display_text(), "hi");
        let bad = DecryptedMessage::Undecryptable {
            original: "xyz".into(),
            reason: "bad".into(),
        };
        assert_eq!(bad.display_text(), UNDECRYPTABLE_PLACEHOLDER);
    }

    #[test]
    fn test_decrypt_message_degrades() {
        let key = GroupKey::generate();
        let blob = encrypt_text(&key, "hello").unwrap();

        assert_eq!(decrypt_message(&key, &blob), DecryptedMessage::Plain("hello".into()));
        assert!(!decrypt_message(&GroupKey::generate(), &blob).is_plain());
        assert!(!decrypt_message(&key, "not base64 at all!").is_plain());
    }

    #[test]
    fn test_stored_message_wire_names() {
        let json = r#"{"id":"m1","senderId":"bob","content":"abc"}"#;
        let msg: StoredMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.sender_id, "bob");
    }

    #[tokio::test]
    async fn test_history_mixes_plain_and_undecryptable() {
        let dir = MemoryKeyDirectory::new();
        let service = GroupKeyService::new(Arc::new(dir));
        let bob = Keypair::generate();
        let mut public: HashMap<String, PublicKey> = HashMap::new();
        public.insert("bob".into(), bob.public.clone());
        let dist = service.create_group_key("g1", &["bob"], &public).await.unwrap();

        let cache = KeyCache::in_memory();
        cache.set_identity_key(bob.private.clone(), false).await.unwrap();

        let messages = vec![
            stored("m1", encrypt_text(dist.key(), "hello").unwrap()),
            stored("m2", encrypt_text(&GroupKey::generate(), "other key").unwrap()),
            stored("m3", "garbage".to_string()),
        ];

        let entries = decrypt_history(&service, &cache, "g1", "bob", &messages).await;

        let shown: Vec<&str> = entries.iter().map(|e| e.message.display_text()).collect();
        assert_eq!(
            shown,
            vec!["hello", UNDECRYPTABLE_PLACEHOLDER, UNDECRYPTABLE_PLACEHOLDER]
        );
        assert_eq!(entries[2].id, "m3");
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_without_identity_is_all_placeholders() {
        let service = GroupKeyService::new(Arc::new(MemoryKeyDirectory::new()));
        let cache = KeyCache::in_memory();
        let messages = vec![stored("m1", "abc".to_string())];

        let entries = decrypt_history(&service, &cache, "g1", "bob", &messages).await;

        assert_eq!(entries.len(), 1);
        match &entries[0].message {
            DecryptedMessage::Undecryptable { original, reason } => {
                assert_eq!(original, "abc");
                assert!(reason.contains("unavailable"));
            }
            other => panic!("expected undecryptable, got {:?}", other),
        }
    }
}

//! In-memory key store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{EncryptedRecord, KeyStore};
use crate::error::Result;

#[derive(Default)]
struct Records {
    identity: Option<EncryptedRecord>,
    groups: HashMap<String, EncryptedRecord>,
}

/// [`KeyStore`] that lives only as long as the process. Clones share records.
#[derive(Clone, Default)]
pub struct MemoryKeyStore {
    records: Arc<Mutex<Records>>,
}

impl MemoryKeyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of group records held.
    pub fn group_count(&self) -> usize {
        self.records.lock().groups.len()
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn load_identity(&self) -> Result<Option<EncryptedRecord>> {
        Ok(self.records.lock().identity.clone())
    }

    async fn save_identity(&self, record: &EncryptedRecord) -> Result<()> {
        self.records.lock().identity = Some(record.clone());
        Ok(())
    }

    async fn delete_identity(&self) -> Result<()> {
        self.records.lock().identity = None;
        Ok(())
    }

    async fn load_group(&self, group_id: &str) -> Result<Option<EncryptedRecord>> {
        Ok(self.records.lock().groups.get(group_id).cloned())
    }

    async fn save_group(&self, group_id: &str, record: &EncryptedRecord) -> Result<()> {
        self.records
            .lock()
            .groups
            .insert(group_id.to_string(), record.clone());
        Ok(())
    }

    async fn delete_group(&self, group_id: &str) -> Result<()> {
        self.records.lock().groups.remove(group_id);
        Ok(())
    }

    async fn clear_groups(&self) -> Result<()> {
        self.records.lock().groups.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(tag: &str) -> EncryptedRecord {
        EncryptedRecord {
            ciphertext: tag.to_string(),
            nonce: "n".to_string(),
        }
    }

    #[tokio::test]
    async fn test_identity_slot() {
        let store = MemoryKeyStore::new();
        assert!(store.load_identity().await.unwrap().is_none());

        store.save_identity(&record("a")).await.unwrap();
        store.save_identity(&record("b")).await.unwrap();
        assert_eq!(store.load_identity().await.unwrap(), Some(record("b")));

        store.delete_identity().await.unwrap();
        store.delete_identity().await.unwrap();
        assert!(store.load_identity().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_group_records() {
        let store = MemoryKeyStore::new();
        store.save_group("g1", &record("1")).await.unwrap();
        store.save_group("g2", &record("2")).await.unwrap();
        assert_eq!(store.group_count(), 2);

        store.delete_group("g1").await.unwrap();
        assert!(store.load_group("g1").await.unwrap().is_none());
        assert_eq!(store.load_group("g2").await.unwrap(), Some(record("2")));

        store.clear_groups().await.unwrap();
        assert_eq!(store.group_count(), 0);
    }
}

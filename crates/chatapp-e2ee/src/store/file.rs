//! JSON-file key store.
//!
//! Layout under the store root:
//!
//! ```text
//! <root>/<hex(user_id)>/identity.json
//! <root>/<hex(user_id)>/groups/<hex(group_id)>.json
//! ```
//!
//! Ids are hex-encoded so that arbitrary user and group ids map to safe
//! file names and accounts sharing a machine never see each other's records.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use super::{EncryptedRecord, KeyStore};
use crate::error::{Error, Result};

const IDENTITY_FILE: &str = "identity.json";
const GROUPS_DIR: &str = "groups";

/// [`KeyStore`] persisting one JSON file per record.
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    dir: PathBuf,
}

impl FileKeyStore {
    /// Store rooted directly at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store for one account under a shared root.
    pub fn for_user(root: impl AsRef<Path>, user_id: &str) -> Self {
        Self::new(root.as_ref().join(hex::encode(user_id.as_bytes())))
    }

    /// Directory holding this store's records.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn identity_path(&self) -> PathBuf {
        self.dir.join(IDENTITY_FILE)
    }

    fn groups_dir(&self) -> PathBuf {
        self.dir.join(GROUPS_DIR)
    }

    fn group_path(&self, group_id: &str) -> PathBuf {
        self.groups_dir()
            .join(format!("{}.json", hex::encode(group_id.as_bytes())))
    }
}

async fn read_record(path: &Path) -> Result<Option<EncryptedRecord>> {
    match fs::read(path).await {
        Ok(bytes) => {
            let record = serde_json::from_slice(&bytes).map_err(|e| {
                Error::Store(format!("Corrupt key record {}: {}", path.display(), e))
            })?;
            Ok(Some(record))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Store(format!(
            "Failed to read {}: {}",
            path.display(),
            e
        ))),
    }
}

/// Write via a temporary sibling and rename, so readers never see a partial file.
async fn write_record(path: &Path, record: &EncryptedRecord) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(|e| {
            Error::Store(format!("Failed to create {}: {}", parent.display(), e))
        })?;
    }

    let json = serde_json::to_vec_pretty(record)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, &json)
        .await
        .map_err(|e| Error::Store(format!("Failed to write {}: {}", tmp.display(), e)))?;
    fs::rename(&tmp, path)
        .await
        .map_err(|e| Error::Store(format!("Failed to replace {}: {}", path.display(), e)))?;

    debug!(path = %path.display(), "Key record written");
    Ok(())
}

async fn remove_file(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Store(format!(
            "Failed to delete {}: {}",
            path.display(),
            e
        ))),
    }
}

#[async_trait]
impl KeyStore for FileKeyStore {
    async fn load_identity(&self) -> Result<Option<EncryptedRecord>> {
        read_record(&self.identity_path()).await
    }

    async fn save_identity(&self, record: &EncryptedRecord) -> Result<()> {
        write_record(&self.identity_path(), record).await
    }

    async fn delete_identity(&self) -> Result<()> {
        remove_file(&self.identity_path()).await
    }

    async fn load_group(&self, group_id: &str) -> Result<Option<EncryptedRecord>> {
        read_record(&self.group_path(group_id)).await
    }

    async fn save_group(&self, group_id: &str, record: &EncryptedRecord) -> Result<()> {
        write_record(&self.group_path(group_id), record).await
    }

    async fn delete_group(&self, group_id: &str) -> Result<()> {
        remove_file(&self.group_path(group_id)).await
    }

    async fn clear_groups(&self) -> Result<()> {
        match fs::remove_dir_all(self.groups_dir()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Store(format!(
                "Failed to clear {}: {}",
                self.groups_dir().display(),
                e
            ))),
        }
    }
}

//! # chatapp-e2ee
//!
//! Session and distribution services for chatapp end-to-end encryption.
//!
//! This crate builds on the primitives in `chatapp-crypto`:
//!
//! - [`IdentityService`] registers identities with the key directory and
//!   opens a [`KeyCache`] at login.
//! - [`GroupKeyService`] creates, distributes and fetches group keys.
//! - [`decrypt_history`] renders a group's stored messages, degrading to a
//!   placeholder for anything that cannot be opened.
//!
//! The key directory and the durable key store are traits
//! ([`KeyDirectory`], [`KeyStore`]) with HTTP/file and in-memory
//! implementations.

pub mod cache;
pub mod config;
pub mod directory;
pub mod error;
pub mod group;
pub mod history;
pub mod identity;
pub mod logging;
pub mod store;

// Re-export commonly used types at crate root
pub use cache::KeyCache;
pub use config::{ConfigError, E2eeConfig};
pub use directory::{HttpKeyDirectory, IdentityBundle, KeyDirectory, MemoryKeyDirectory};
pub use error::{Error, Result};
pub use group::{
    DirectoryResolver, DistributionReport, GroupKeyDistribution, GroupKeyService, MemberFailure,
    PublicKeyResolver,
};
pub use history::{
    decrypt_history, decrypt_message, DecryptedMessage, HistoryEntry, StoredMessage,
    UNDECRYPTABLE_PLACEHOLDER,
};
pub use identity::IdentityService;
pub use store::{EncryptedRecord, FileKeyStore, KeyStore, MemoryKeyStore};

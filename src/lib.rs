//! HavenCore - core library for the Haven personal dashboard.
//!
//! This library provides the data layer behind the dashboard UI:
//! - Data models (Task, TaskPatch, VaultEntry)
//! - Optimistic task synchronization against the worker API
//!   (SyncedCollection), with rollback and grace-period delete undo
//! - Passphrase-based vault encryption (VaultCodec: PBKDF2 + AES-256-GCM)
//! - Remote store clients for the task and vault workers
//! - Link preview scraping and configuration management
//!
//! It is a pure library: no UI, no background runtime of its own. The
//! embedding application drives `flush_due_deletions` and `refresh` on
//! whatever schedule suits it.

pub mod clock;
pub mod collection;
pub mod config;
pub mod error;
pub mod http_store;
pub mod models;
pub mod preview;
pub mod store;
pub mod validation;
pub mod vault;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use collection::{CollectionConfig, SyncedCollection, Undo};
pub use config::Config;
pub use error::{HavenError, HavenResult, RemoteOperation};
pub use models::{Priority, SyncStatus, Task, TaskDraft, TaskPatch, VaultEntry, VaultRecord};
pub use store::{MemoryTaskStore, MemoryVaultStore, StoreError, TaskStore, VaultStore};
pub use vault::{EncryptedEnvelope, VaultCodec};

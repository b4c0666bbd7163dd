//! Abstract remote stores for tasks and the vault envelope.
//!
//! This module provides trait-based abstractions over the server-side
//! stores. SyncedCollection talks to a [`TaskStore`]; the vault screens talk
//! to a [`VaultStore`]. HTTP-backed implementations live in `http_store`;
//! [`MemoryTaskStore`] and [`MemoryVaultStore`] back tests and offline use.

use std::fmt;
use std::future::Future;
use std::sync::Mutex;

use crate::models::Task;
use crate::vault::EncryptedEnvelope;

/// Errors surfaced by remote store implementations.
///
/// The collection does not parse store-specific error bodies beyond an
/// optional message; any non-success outcome lands in one of these.
#[derive(Debug, Clone)]
pub enum StoreError {
    /// Transport-level failure (connect, timeout, TLS)
    Network(String),
    /// Non-success HTTP status from the store
    Status { code: u16, message: String },
    /// Response body could not be decoded
    Decode(String),
    /// Request refused before leaving the client (tests use this for
    /// scripted failures)
    Rejected(String),
}

impl std::error::Error for StoreError {}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Network(msg) => write!(f, "network error: {}", msg),
            StoreError::Status { code, message } => write!(f, "HTTP {}: {}", code, message),
            StoreError::Decode(msg) => write!(f, "decode error: {}", msg),
            StoreError::Rejected(msg) => write!(f, "rejected: {}", msg),
        }
    }
}

/// Remote store holding the authoritative task collection.
///
/// The server is the system of record: it may assign or override ids and
/// creation timestamps on create, and the record it echoes back is the
/// normalized form the client should adopt.
pub trait TaskStore: Send + Sync {
    /// Fetch the full authoritative collection
    fn list_records(&self) -> impl Future<Output = Result<Vec<Task>, StoreError>> + Send;

    /// Create a record; the returned record is the server's normalized copy
    fn create_record(&self, task: &Task) -> impl Future<Output = Result<Task, StoreError>> + Send;

    /// Replace the record with the given id
    fn update_record(
        &self,
        id: &str,
        task: &Task,
    ) -> impl Future<Output = Result<Task, StoreError>> + Send;

    /// Delete the record with the given id
    fn delete_record(&self, id: &str) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Remote store holding the single encrypted vault envelope.
///
/// One logical record per user; no versioning, the last put wins.
pub trait VaultStore: Send + Sync {
    /// Fetch the stored envelope, or None on first use
    fn get_envelope(
        &self,
    ) -> impl Future<Output = Result<Option<EncryptedEnvelope>, StoreError>> + Send;

    /// Replace the stored envelope
    fn put_envelope(
        &self,
        envelope: &EncryptedEnvelope,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

// Stores are often shared between the collection and the code observing it
// (tests, background drivers), so Arc<S> is a store too.
impl<T: TaskStore> TaskStore for std::sync::Arc<T> {
    async fn list_records(&self) -> Result<Vec<Task>, StoreError> {
        (**self).list_records().await
    }

    async fn create_record(&self, task: &Task) -> Result<Task, StoreError> {
        (**self).create_record(task).await
    }

    async fn update_record(&self, id: &str, task: &Task) -> Result<Task, StoreError> {
        (**self).update_record(id, task).await
    }

    async fn delete_record(&self, id: &str) -> Result<(), StoreError> {
        (**self).delete_record(id).await
    }
}

impl<T: VaultStore> VaultStore for std::sync::Arc<T> {
    async fn get_envelope(&self) -> Result<Option<EncryptedEnvelope>, StoreError> {
        (**self).get_envelope().await
    }

    async fn put_envelope(&self, envelope: &EncryptedEnvelope) -> Result<(), StoreError> {
        (**self).put_envelope(envelope).await
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    tasks: Vec<Task>,
    calls: Vec<String>,
    remaining_failures: u32,
    failure_message: String,
    assign_server_ids: bool,
    next_server_id: u64,
}

/// In-memory TaskStore.
///
/// Mirrors the worker API's semantics (create echoes the record back, delete
/// of an unknown id succeeds) and records a call log plus scripted failure
/// injection so tests can observe exactly which requests were issued.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    inner: Mutex<MemoryState>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with existing records
    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        Self {
            inner: Mutex::new(MemoryState {
                tasks,
                ..Default::default()
            }),
        }
    }

    /// Make the next request fail with the given message
    pub fn fail_next_request(&self, message: impl Into<String>) {
        self.fail_next_requests(1, message);
    }

    /// Make the next `count` requests fail with the given message
    pub fn fail_next_requests(&self, count: u32, message: impl Into<String>) {
        let mut state = self.inner.lock().unwrap();
        state.remaining_failures = count;
        state.failure_message = message.into();
    }

    /// Have create assign fresh server-side ids instead of honoring the
    /// client's, the way a server that owns id assignment would
    pub fn assign_server_ids(&self) {
        self.inner.lock().unwrap().assign_server_ids = true;
    }

    /// Requests issued so far, e.g. `["list", "create:abc", "delete:abc"]`
    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }

    /// Number of calls whose log entry matches exactly
    pub fn call_count(&self, entry: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.as_str() == entry)
            .count()
    }

    /// Snapshot of the stored records
    pub fn records(&self) -> Vec<Task> {
        self.inner.lock().unwrap().tasks.clone()
    }

    /// Overwrite the stored records, bypassing the call log. Lets tests
    /// simulate another client changing server state between refreshes.
    pub fn set_records(&self, tasks: Vec<Task>) {
        self.inner.lock().unwrap().tasks = tasks;
    }

    fn begin(&self, call: String) -> Result<(), StoreError> {
        let mut state = self.inner.lock().unwrap();
        state.calls.push(call);
        if state.remaining_failures > 0 {
            state.remaining_failures -= 1;
            return Err(StoreError::Rejected(state.failure_message.clone()));
        }
        Ok(())
    }
}

impl TaskStore for MemoryTaskStore {
    async fn list_records(&self) -> Result<Vec<Task>, StoreError> {
        self.begin("list".to_string())?;
        Ok(self.inner.lock().unwrap().tasks.clone())
    }

    async fn create_record(&self, task: &Task) -> Result<Task, StoreError> {
        self.begin(format!("create:{}", task.id))?;
        let mut state = self.inner.lock().unwrap();
        let mut stored = task.clone();
        if state.assign_server_ids {
            state.next_server_id += 1;
            stored.id = format!("srv-{}", state.next_server_id);
        }
        state.tasks.push(stored.clone());
        Ok(stored)
    }

    async fn update_record(&self, id: &str, task: &Task) -> Result<Task, StoreError> {
        self.begin(format!("update:{}", id))?;
        let mut state = self.inner.lock().unwrap();
        match state.tasks.iter_mut().find(|t| t.id == id) {
            Some(slot) => {
                *slot = task.clone();
                Ok(task.clone())
            }
            None => Err(StoreError::Status {
                code: 404,
                message: format!("no task {}", id),
            }),
        }
    }

    async fn delete_record(&self, id: &str) -> Result<(), StoreError> {
        self.begin(format!("delete:{}", id))?;
        let mut state = self.inner.lock().unwrap();
        state.tasks.retain(|t| t.id != id);
        Ok(())
    }
}

/// In-memory VaultStore: one envelope slot, last put wins
#[derive(Debug, Default)]
pub struct MemoryVaultStore {
    envelope: Mutex<Option<EncryptedEnvelope>>,
}

impl MemoryVaultStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VaultStore for MemoryVaultStore {
    async fn get_envelope(&self) -> Result<Option<EncryptedEnvelope>, StoreError> {
        Ok(self.envelope.lock().unwrap().clone())
    }

    async fn put_envelope(&self, envelope: &EncryptedEnvelope) -> Result<(), StoreError> {
        *self.envelope.lock().unwrap() = Some(envelope.clone());
        Ok(())
    }
}

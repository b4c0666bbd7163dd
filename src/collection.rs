//! Optimistic task synchronization against a remote store.
//!
//! SyncedCollection maintains a client replica of the server-side task list:
//! - Mutations apply to the local replica immediately, then a background
//!   request confirms them; failed creates/updates are rolled back
//! - Deletions get a grace-period undo window before the remote delete fires
//! - refresh() reconciles the replica against an authoritative fetch,
//!   skipping ids with in-flight mutations or open undo windows
//!
//! Record state machine, from the client's point of view:
//!
//! ```text
//! (none) --create--> Pending --confirmed--> Synced --edit--> Pending --confirmed--> Synced
//! Synced --delete--> PendingDeletion --undo--> Synced
//! PendingDeletion --window expiry--> Deleting --confirmed--> (none)
//! Pending/Deleting --remote failure--> rolled back / purged + error surfaced
//! ```
//!
//! The remote store is the system of record. Last write wins there; the
//! client does no conflict detection beyond excluding its own in-flight
//! operations from reconciliation.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::error::{HavenError, HavenResult, RemoteOperation};
use crate::models::{SyncStatus, Task, TaskDraft, TaskPatch};
use crate::store::TaskStore;

/// Tuning knobs for the collection.
///
/// The undo grace period and the refresh retry budget are design parameters,
/// not protocol requirements; defaults mirror the original application
/// (10 seconds, 3 retries at 1-second intervals).
#[derive(Debug, Clone)]
pub struct CollectionConfig {
    /// How long a deleted record can be undone before the remote delete fires
    pub undo_grace: Duration,
    /// Extra attempts after a failed refresh fetch
    pub refresh_retries: u32,
    /// Delay between refresh attempts
    pub refresh_retry_delay: Duration,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            undo_grace: Duration::from_secs(10),
            refresh_retries: 3,
            refresh_retry_delay: Duration::from_secs(1),
        }
    }
}

/// Outcome of an undo attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Undo {
    /// The window was still open; the record is visible again
    Restored,
    /// The window had already expired; nothing was resurrected
    TooLate,
}

/// A deletion waiting out its undo window
#[derive(Debug, Clone)]
struct PendingDeletion {
    snapshot: Task,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Replica {
    tasks: Vec<Task>,
    /// In-flight create/update count per id; nonzero renders as Pending and
    /// shields the id from reconciliation
    pending: HashMap<String, usize>,
    /// Hidden records waiting out their undo window, keyed by id
    pending_deletions: HashMap<String, PendingDeletion>,
    /// Ids whose undo window has expired and whose remote delete has been
    /// issued (or has failed). Shields the id from reconciliation so a
    /// refresh can never bring a deleted record back.
    deleting: HashSet<String>,
}

impl Replica {
    fn begin(&mut self, id: &str) {
        *self.pending.entry(id.to_string()).or_insert(0) += 1;
    }

    fn settle(&mut self, id: &str) {
        if let Some(count) = self.pending.get_mut(id) {
            *count -= 1;
            if *count == 0 {
                self.pending.remove(id);
            }
        }
    }

    fn is_pending(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    /// Write `task` into the visible slot for `id`, if it is still visible.
    /// Skipped when a newer mutation is still in flight so an older server
    /// echo never reorders the user's own edits.
    fn adopt_if_settled(&mut self, id: &str, task: &Task) {
        if self.is_pending(id) {
            return;
        }
        if let Some(slot) = self.tasks.iter_mut().find(|t| t.id == id) {
            *slot = task.clone();
        }
    }

    /// Put a pre-mutation snapshot back, wherever the record lives now
    fn restore(&mut self, id: &str, snapshot: Task) {
        if let Some(slot) = self.tasks.iter_mut().find(|t| t.id == id) {
            *slot = snapshot;
        } else if let Some(pending) = self.pending_deletions.get_mut(id) {
            // Deleted while the mutation was in flight; keep it hidden but
            // make sure an undo restores the pre-mutation value
            pending.snapshot = snapshot;
        }
    }
}

/// Client replica of a server-held task collection.
///
/// Owns its replica, its pending-operation map, and its pending-deletion
/// map; there are no ambient globals. Mutations are serialized through one
/// lock, so same-record operations apply in issuance order; the lock is
/// never held across a network await.
///
/// Undo windows are deadline-based rather than driven by hidden timers: the
/// embedding application calls [`flush_due_deletions`](Self::flush_due_deletions)
/// periodically (or when [`next_deletion_due`](Self::next_deletion_due)
/// passes) to fire expired deletions.
pub struct SyncedCollection<S, C> {
    store: S,
    clock: C,
    config: CollectionConfig,
    state: Mutex<Replica>,
}

impl<S: TaskStore, C: Clock> SyncedCollection<S, C> {
    /// Open a collection over the given remote store
    pub fn open(store: S, clock: C, config: CollectionConfig) -> Self {
        Self {
            store,
            clock,
            config,
            state: Mutex::new(Replica::default()),
        }
    }

    /// Drop all outstanding undo windows without issuing their remote
    /// deletes.
    ///
    /// Matches closing the original app mid-window: the remote store never
    /// hears about the deletion, so those records come back on the next
    /// refresh of a fresh session.
    pub fn close(&self) {
        let mut replica = self.state.lock().unwrap();
        let dropped = replica.pending_deletions.len();
        replica.pending_deletions.clear();
        replica.pending.clear();
        if dropped > 0 {
            tracing::debug!(dropped, "closed with undo windows still open");
        }
    }

    /// Snapshot of the visible replica. Records under a pending deletion are
    /// excluded.
    pub fn tasks(&self) -> Vec<Task> {
        self.state.lock().unwrap().tasks.clone()
    }

    /// Look up a visible record by id
    pub fn get(&self, id: &str) -> Option<Task> {
        self.state
            .lock()
            .unwrap()
            .tasks
            .iter()
            .find(|t| t.id == id)
            .cloned()
    }

    /// Sync state of a visible record; None if unknown or hidden
    pub fn status(&self, id: &str) -> Option<SyncStatus> {
        let replica = self.state.lock().unwrap();
        if !replica.tasks.iter().any(|t| t.id == id) {
            return None;
        }
        Some(if replica.is_pending(id) {
            SyncStatus::Pending
        } else {
            SyncStatus::Synced
        })
    }

    /// Number of visible records
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of deletions waiting out their undo window
    pub fn pending_deletion_count(&self) -> usize {
        self.state.lock().unwrap().pending_deletions.len()
    }

    /// Earliest undo-window deadline, if any deletion is pending
    pub fn next_deletion_due(&self) -> Option<DateTime<Utc>> {
        self.state
            .lock()
            .unwrap()
            .pending_deletions
            .values()
            .map(|p| p.expires_at)
            .min()
    }

    /// Create a record.
    ///
    /// The record is visible (as Pending) before the remote request
    /// resolves. On remote failure the optimistic insert is removed and the
    /// error surfaced. The server may override the id or creation time; its
    /// normalized record replaces the optimistic one on confirmation.
    pub async fn create(&self, draft: TaskDraft) -> HavenResult<Task> {
        let task = draft.into_task(self.clock.now());
        let local_id = task.id.clone();
        {
            let mut replica = self.state.lock().unwrap();
            replica.tasks.push(task.clone());
            replica.begin(&local_id);
        }
        tracing::debug!(id = %local_id, "optimistic create");

        match self.store.create_record(&task).await {
            Ok(confirmed) => {
                let mut replica = self.state.lock().unwrap();
                replica.settle(&local_id);
                replica.adopt_if_settled(&local_id, &confirmed);
                Ok(confirmed)
            }
            Err(e) => {
                let mut replica = self.state.lock().unwrap();
                replica.settle(&local_id);
                replica.tasks.retain(|t| t.id != local_id);
                tracing::warn!(id = %local_id, error = %e, "create failed, rolled back");
                Err(HavenError::remote(
                    RemoteOperation::Create,
                    Some(&local_id),
                    e.to_string(),
                ))
            }
        }
    }

    /// Apply a field-level patch to a record.
    ///
    /// The patch is visible immediately; on remote failure the record
    /// reverts to its pre-patch value and the error is surfaced. Records
    /// under a pending deletion cannot be edited.
    pub async fn update(&self, id: &str, patch: TaskPatch) -> HavenResult<Task> {
        let (before, after) = {
            let mut replica = self.state.lock().unwrap();
            if replica.pending_deletions.contains_key(id) {
                return Err(HavenError::NotFound(format!(
                    "task {} is pending deletion",
                    id
                )));
            }
            let slot = replica
                .tasks
                .iter_mut()
                .find(|t| t.id == id)
                .ok_or_else(|| HavenError::NotFound(format!("task {}", id)))?;
            if patch.is_empty() {
                return Ok(slot.clone());
            }
            let before = slot.clone();
            slot.apply_patch(&patch);
            let after = slot.clone();
            replica.begin(id);
            (before, after)
        };
        tracing::debug!(id = %id, "optimistic update");

        match self.store.update_record(id, &after).await {
            Ok(confirmed) => {
                let mut replica = self.state.lock().unwrap();
                replica.settle(id);
                replica.adopt_if_settled(id, &confirmed);
                Ok(confirmed)
            }
            Err(e) => {
                let mut replica = self.state.lock().unwrap();
                replica.settle(id);
                replica.restore(id, before);
                tracing::warn!(id = %id, error = %e, "update failed, reverted");
                Err(HavenError::remote(
                    RemoteOperation::Update,
                    Some(id),
                    e.to_string(),
                ))
            }
        }
    }

    /// Hide a record and open its undo window.
    ///
    /// No remote request is issued yet; the record is snapshotted and the
    /// window expires `undo_grace` from now, at which point
    /// [`flush_due_deletions`](Self::flush_due_deletions) issues the remote
    /// delete.
    pub fn delete(&self, id: &str) -> HavenResult<()> {
        let mut replica = self.state.lock().unwrap();
        let pos = replica
            .tasks
            .iter()
            .position(|t| t.id == id)
            .ok_or_else(|| HavenError::NotFound(format!("task {}", id)))?;
        let snapshot = replica.tasks.remove(pos);
        let expires_at = self.clock.now()
            + chrono::Duration::milliseconds(self.config.undo_grace.as_millis() as i64);
        replica.pending_deletions.insert(
            id.to_string(),
            PendingDeletion {
                snapshot,
                expires_at,
            },
        );
        tracing::debug!(id = %id, %expires_at, "deletion pending, undo window open");
        Ok(())
    }

    /// Cancel a pending deletion.
    ///
    /// Restores the snapshot if the window is still open. Once the window
    /// has expired this is a no-op returning [`Undo::TooLate`]; a record the
    /// server has already dropped is never silently resurrected.
    pub fn undo(&self, id: &str) -> Undo {
        let mut replica = self.state.lock().unwrap();
        let expired = match replica.pending_deletions.get(id) {
            Some(pending) => pending.expires_at <= self.clock.now(),
            None => return Undo::TooLate,
        };
        if expired {
            return Undo::TooLate;
        }
        if let Some(pending) = replica.pending_deletions.remove(id) {
            replica.tasks.push(pending.snapshot);
            tracing::debug!(id = %id, "deletion undone");
        }
        Undo::Restored
    }

    /// Issue the remote delete for every deletion whose undo window has
    /// expired.
    ///
    /// Due ids leave the undo map but stay shielded from reconciliation
    /// until their remote delete confirms, so a refresh landing mid-delete
    /// cannot resurrect the record. A failed remote delete keeps the record
    /// hidden for the rest of the session: the user watched the window
    /// lapse, and the stale server row comes back next session if it was
    /// never removed. Failures are still surfaced. Returns the number of
    /// deletions flushed.
    pub async fn flush_due_deletions(&self) -> HavenResult<usize> {
        let due: Vec<String> = {
            let mut replica = self.state.lock().unwrap();
            let now = self.clock.now();
            let ids: Vec<String> = replica
                .pending_deletions
                .iter()
                .filter(|(_, p)| p.expires_at <= now)
                .map(|(id, _)| id.clone())
                .collect();
            for id in &ids {
                replica.pending_deletions.remove(id);
                replica.deleting.insert(id.clone());
            }
            ids
        };

        let mut first_error = None;
        for id in &due {
            match self.store.delete_record(id).await {
                Ok(()) => {
                    // The server no longer holds the record, so nothing can
                    // bring it back
                    self.state.lock().unwrap().deleting.remove(id);
                    tracing::debug!(id = %id, "remote delete confirmed");
                }
                Err(e) => {
                    tracing::warn!(id = %id, error = %e, "remote delete failed, record stays hidden");
                    if first_error.is_none() {
                        first_error = Some(HavenError::remote(
                            RemoteOperation::Delete,
                            Some(id),
                            e.to_string(),
                        ));
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(due.len()),
        }
    }

    /// Reconcile the replica with the authoritative server state.
    ///
    /// Retries transient fetch failures up to the configured budget, then
    /// surfaces the error and leaves the replica stale but consistent (no
    /// partial overwrite). Ids with in-flight mutations or open undo windows
    /// keep their local value. Returns the number of visible records.
    pub async fn refresh(&self) -> HavenResult<usize> {
        let mut attempt = 0u32;
        let fetched = loop {
            match self.store.list_records().await {
                Ok(tasks) => break tasks,
                Err(e) => {
                    if attempt >= self.config.refresh_retries {
                        tracing::error!(error = %e, attempts = attempt + 1, "refresh failed");
                        return Err(HavenError::remote(
                            RemoteOperation::List,
                            None,
                            e.to_string(),
                        ));
                    }
                    attempt += 1;
                    tracing::debug!(attempt, error = %e, "refresh attempt failed, retrying");
                    self.clock.sleep(self.config.refresh_retry_delay).await;
                }
            }
        };

        let mut replica = self.state.lock().unwrap();
        Ok(reconcile(&mut replica, fetched))
    }
}

/// Last-fetch-wins reconciliation, isolated so a stronger consistency model
/// could later be substituted without touching call sites.
fn reconcile(replica: &mut Replica, fetched: Vec<Task>) -> usize {
    let mut next: Vec<Task> = Vec::with_capacity(fetched.len());
    for task in fetched {
        if replica.pending_deletions.contains_key(&task.id) || replica.deleting.contains(&task.id) {
            // Hidden locally, either mid-window or with the remote delete
            // still in flight; must not reappear
            continue;
        }
        if replica.is_pending(&task.id) {
            // An edit is in flight; the optimistic value stands until that
            // edit's own response resolves
            if let Some(local) = replica.tasks.iter().find(|t| t.id == task.id) {
                next.push(local.clone());
            }
            continue;
        }
        next.push(task);
    }

    // Locally created records the server has not confirmed yet survive the
    // replace
    for local in &replica.tasks {
        if replica.is_pending(&local.id) && !next.iter().any(|t| t.id == local.id) {
            next.push(local.clone());
        }
    }

    replica.tasks = next;
    replica.tasks.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{MemoryTaskStore, StoreError};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::sync::Notify;

    fn collection(
        store: Arc<MemoryTaskStore>,
    ) -> SyncedCollection<Arc<MemoryTaskStore>, Arc<ManualClock>> {
        SyncedCollection::open(store, Arc::new(ManualClock::default()), CollectionConfig::default())
    }

    fn collection_with_clock(
        store: Arc<MemoryTaskStore>,
        clock: Arc<ManualClock>,
    ) -> SyncedCollection<Arc<MemoryTaskStore>, Arc<ManualClock>> {
        SyncedCollection::open(store, clock, CollectionConfig::default())
    }

    /// TaskStore wrapper whose requests can be held at a gate until the test
    /// releases them, exposing the window between the optimistic local
    /// mutation and the remote response.
    struct GatedStore {
        inner: MemoryTaskStore,
        gate_closed: AtomicBool,
        release: Notify,
    }

    impl GatedStore {
        fn new() -> Self {
            Self {
                inner: MemoryTaskStore::new(),
                gate_closed: AtomicBool::new(false),
                release: Notify::new(),
            }
        }

        fn close_gate(&self) {
            self.gate_closed.store(true, Ordering::SeqCst);
        }

        fn release_one(&self) {
            self.release.notify_one();
        }

        async fn pass_gate(&self) {
            if self.gate_closed.load(Ordering::SeqCst) {
                self.release.notified().await;
            }
        }
    }

    impl TaskStore for GatedStore {
        async fn list_records(&self) -> Result<Vec<Task>, StoreError> {
            self.inner.list_records().await
        }

        async fn create_record(&self, task: &Task) -> Result<Task, StoreError> {
            self.pass_gate().await;
            self.inner.create_record(task).await
        }

        async fn update_record(&self, id: &str, task: &Task) -> Result<Task, StoreError> {
            self.pass_gate().await;
            self.inner.update_record(id, task).await
        }

        async fn delete_record(&self, id: &str) -> Result<(), StoreError> {
            self.pass_gate().await;
            self.inner.delete_record(id).await
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..1000 {
            if condition() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_create_confirms_and_syncs() {
        let store = Arc::new(MemoryTaskStore::new());
        let coll = collection(store.clone());

        let task = coll.create(TaskDraft::new("Buy milk")).await.unwrap();
        assert_eq!(coll.status(&task.id), Some(SyncStatus::Synced));
        assert_eq!(store.records().len(), 1);
    }

    #[tokio::test]
    async fn test_create_is_visible_before_remote_resolves() {
        let store = Arc::new(GatedStore::new());
        store.close_gate();
        let coll = Arc::new(SyncedCollection::open(
            store.clone(),
            Arc::new(ManualClock::default()),
            CollectionConfig::default(),
        ));

        let handle = {
            let coll = coll.clone();
            tokio::spawn(async move { coll.create(TaskDraft::new("Buy milk")).await })
        };

        wait_until(|| coll.len() == 1).await;
        let id = coll.tasks()[0].id.clone();
        assert_eq!(coll.status(&id), Some(SyncStatus::Pending));
        // No create has reached the store yet
        assert!(store.inner.records().is_empty());

        store.release_one();
        let task = handle.await.unwrap().unwrap();
        assert_eq!(task.id, id);
        assert_eq!(coll.status(&id), Some(SyncStatus::Synced));
    }

    #[tokio::test]
    async fn test_create_rolls_back_on_remote_failure() {
        let store = Arc::new(MemoryTaskStore::new());
        store.fail_next_request("KV write refused");
        let coll = collection(store.clone());

        let err = coll.create(TaskDraft::new("doomed")).await.unwrap_err();
        assert!(err.is_remote(RemoteOperation::Create));
        assert!(coll.is_empty());
        assert!(store.records().is_empty());
    }

    #[tokio::test]
    async fn test_create_adopts_server_assigned_id() {
        let store = Arc::new(MemoryTaskStore::new());
        store.assign_server_ids();
        let coll = collection(store.clone());

        let task = coll.create(TaskDraft::new("named by server")).await.unwrap();
        assert!(task.id.starts_with("srv-"));
        assert_eq!(coll.tasks().len(), 1);
        assert_eq!(coll.tasks()[0].id, task.id);
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let store = Arc::new(MemoryTaskStore::new());
        let coll = collection(store.clone());
        let task = coll.create(TaskDraft::new("original")).await.unwrap();

        let patch = TaskPatch {
            completed: Some(true),
            ..Default::default()
        };
        let updated = coll.update(&task.id, patch).await.unwrap();

        assert!(updated.completed);
        assert_eq!(updated.text, "original");
        assert_eq!(coll.status(&task.id), Some(SyncStatus::Synced));
    }

    #[tokio::test]
    async fn test_update_reverts_on_remote_failure() {
        let store = Arc::new(MemoryTaskStore::new());
        let coll = collection(store.clone());
        let task = coll.create(TaskDraft::new("keep me")).await.unwrap();

        store.fail_next_request("KV write refused");
        let patch = TaskPatch {
            completed: Some(true),
            ..Default::default()
        };
        let err = coll.update(&task.id, patch).await.unwrap_err();

        assert!(err.is_remote(RemoteOperation::Update));
        let local = coll.get(&task.id).unwrap();
        assert!(!local.completed);
        assert_eq!(coll.status(&task.id), Some(SyncStatus::Synced));
    }

    #[tokio::test]
    async fn test_update_unknown_id_is_not_found() {
        let store = Arc::new(MemoryTaskStore::new());
        let coll = collection(store);

        let err = coll
            .update("missing", TaskPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, HavenError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_rejected_while_deletion_pending() {
        let store = Arc::new(MemoryTaskStore::new());
        let coll = collection(store);
        let task = coll.create(TaskDraft::new("going away")).await.unwrap();

        coll.delete(&task.id).unwrap();
        let patch = TaskPatch {
            completed: Some(true),
            ..Default::default()
        };
        let err = coll.update(&task.id, patch).await.unwrap_err();
        assert!(matches!(err, HavenError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_hides_immediately_without_remote_call() {
        let store = Arc::new(MemoryTaskStore::new());
        let coll = collection(store.clone());
        let task = coll.create(TaskDraft::new("hide me")).await.unwrap();

        coll.delete(&task.id).unwrap();
        assert!(coll.is_empty());
        assert_eq!(coll.pending_deletion_count(), 1);
        assert_eq!(store.call_count(&format!("delete:{}", task.id)), 0);
    }

    #[tokio::test]
    async fn test_undo_within_window_restores_and_never_deletes() {
        let store = Arc::new(MemoryTaskStore::new());
        let clock = Arc::new(ManualClock::default());
        let coll = collection_with_clock(store.clone(), clock.clone());
        let task = coll.create(TaskDraft::new("saved")).await.unwrap();

        coll.delete(&task.id).unwrap();
        assert_eq!(coll.undo(&task.id), Undo::Restored);

        assert_eq!(coll.get(&task.id).unwrap().text, "saved");
        clock.advance(Duration::from_secs(60));
        assert_eq!(coll.flush_due_deletions().await.unwrap(), 0);
        assert_eq!(store.call_count(&format!("delete:{}", task.id)), 0);
    }

    #[tokio::test]
    async fn test_expired_window_deletes_exactly_once_and_undo_is_too_late() {
        let store = Arc::new(MemoryTaskStore::new());
        let clock = Arc::new(ManualClock::default());
        let coll = collection_with_clock(store.clone(), clock.clone());
        let task = coll.create(TaskDraft::new("gone")).await.unwrap();

        coll.delete(&task.id).unwrap();
        clock.advance(Duration::from_secs(11));

        assert_eq!(coll.undo(&task.id), Undo::TooLate);
        assert_eq!(coll.flush_due_deletions().await.unwrap(), 1);
        assert_eq!(store.call_count(&format!("delete:{}", task.id)), 1);

        // A second flush issues nothing further, and undo stays a no-op
        assert_eq!(coll.flush_due_deletions().await.unwrap(), 0);
        assert_eq!(coll.undo(&task.id), Undo::TooLate);
        assert_eq!(store.call_count(&format!("delete:{}", task.id)), 1);
        assert!(coll.get(&task.id).is_none());
    }

    #[tokio::test]
    async fn test_window_not_expired_is_not_flushed() {
        let store = Arc::new(MemoryTaskStore::new());
        let clock = Arc::new(ManualClock::default());
        let coll = collection_with_clock(store.clone(), clock.clone());
        let task = coll.create(TaskDraft::new("waiting")).await.unwrap();

        coll.delete(&task.id).unwrap();
        clock.advance(Duration::from_secs(9));
        assert_eq!(coll.flush_due_deletions().await.unwrap(), 0);
        assert_eq!(coll.pending_deletion_count(), 1);

        // undo still works right up to the deadline
        assert_eq!(coll.undo(&task.id), Undo::Restored);
    }

    #[tokio::test]
    async fn test_failed_remote_delete_keeps_record_hidden() {
        let store = Arc::new(MemoryTaskStore::new());
        let clock = Arc::new(ManualClock::default());
        let coll = collection_with_clock(store.clone(), clock.clone());
        let task = coll.create(TaskDraft::new("stays gone")).await.unwrap();

        coll.delete(&task.id).unwrap();
        clock.advance(Duration::from_secs(11));
        store.fail_next_request("KV delete refused");

        let err = coll.flush_due_deletions().await.unwrap_err();
        assert!(err.is_remote(RemoteOperation::Delete));
        // Deletions are not rolled back: still hidden, window purged
        assert!(coll.get(&task.id).is_none());
        assert_eq!(coll.pending_deletion_count(), 0);

        // The server still holds the record, but a refresh must not bring
        // it back this session
        coll.refresh().await.unwrap();
        assert!(coll.get(&task.id).is_none());
    }

    #[tokio::test]
    async fn test_refresh_during_inflight_delete_keeps_record_hidden() {
        let store = Arc::new(GatedStore::new());
        let clock = Arc::new(ManualClock::default());
        let coll = Arc::new(SyncedCollection::open(
            store.clone(),
            clock.clone(),
            CollectionConfig::default(),
        ));
        let task = coll.create(TaskDraft::new("deleted for good")).await.unwrap();

        coll.delete(&task.id).unwrap();
        clock.advance(Duration::from_secs(11));

        // Hold the remote delete at the gate mid-flush
        store.close_gate();
        let handle = {
            let coll = coll.clone();
            tokio::spawn(async move { coll.flush_due_deletions().await })
        };
        wait_until(|| coll.pending_deletion_count() == 0).await;

        // The server still lists the record while the delete is in flight
        coll.refresh().await.unwrap();
        assert!(coll.get(&task.id).is_none());

        store.release_one();
        assert_eq!(handle.await.unwrap().unwrap(), 1);
        assert!(coll.get(&task.id).is_none());
        coll.refresh().await.unwrap();
        assert!(coll.get(&task.id).is_none());
    }

    #[tokio::test]
    async fn test_refresh_replaces_replica_with_server_state() {
        let store = Arc::new(MemoryTaskStore::new());
        let coll = collection(store.clone());
        coll.create(TaskDraft::new("mine")).await.unwrap();

        // Another client adds a record server-side
        let mut server = store.records();
        server.push(TaskDraft::new("theirs").into_task(Utc::now()));
        store.set_records(server);

        assert_eq!(coll.refresh().await.unwrap(), 2);
        let texts: Vec<String> = coll.tasks().into_iter().map(|t| t.text).collect();
        assert!(texts.contains(&"mine".to_string()));
        assert!(texts.contains(&"theirs".to_string()));
    }

    #[tokio::test]
    async fn test_refresh_does_not_resurrect_pending_deletion() {
        let store = Arc::new(MemoryTaskStore::new());
        let coll = collection(store.clone());
        let task = coll.create(TaskDraft::new("hidden")).await.unwrap();

        coll.delete(&task.id).unwrap();
        // Server still has the record; refresh must not bring it back
        coll.refresh().await.unwrap();
        assert!(coll.get(&task.id).is_none());
        assert_eq!(coll.pending_deletion_count(), 1);

        // Undo after the refresh still restores the snapshot
        assert_eq!(coll.undo(&task.id), Undo::Restored);
        assert_eq!(coll.get(&task.id).unwrap().text, "hidden");
    }

    #[tokio::test]
    async fn test_refresh_does_not_clobber_in_flight_update() {
        let store = Arc::new(GatedStore::new());
        let coll = Arc::new(SyncedCollection::open(
            store.clone(),
            Arc::new(ManualClock::default()),
            CollectionConfig::default(),
        ));

        let task = coll.create(TaskDraft::new("stale on server")).await.unwrap();
        let id = task.id.clone();

        store.close_gate();
        let handle = {
            let coll = coll.clone();
            let id = id.clone();
            tokio::spawn(async move {
                let patch = TaskPatch {
                    completed: Some(true),
                    ..Default::default()
                };
                coll.update(&id, patch).await
            })
        };
        wait_until(|| coll.status(&id) == Some(SyncStatus::Pending)).await;

        // Server returns stale data for the id mid-update
        coll.refresh().await.unwrap();
        assert!(coll.get(&id).unwrap().completed, "stale fetch clobbered pending edit");

        store.release_one();
        handle.await.unwrap().unwrap();
        assert!(coll.get(&id).unwrap().completed);
        assert_eq!(coll.status(&id), Some(SyncStatus::Synced));
    }

    #[tokio::test]
    async fn test_refresh_retries_then_succeeds() {
        let store = Arc::new(MemoryTaskStore::new());
        let clock = Arc::new(ManualClock::default());
        let coll = collection_with_clock(store.clone(), clock.clone());

        store.fail_next_requests(2, "flaky network");
        let before = clock.now();
        coll.refresh().await.unwrap();

        assert_eq!(store.call_count("list"), 3);
        // Two 1-second retry delays elapsed on the virtual clock
        assert_eq!(clock.now() - before, chrono::Duration::seconds(2));
    }

    #[tokio::test]
    async fn test_refresh_gives_up_after_retry_budget() {
        let store = Arc::new(MemoryTaskStore::new());
        let coll = collection(store.clone());
        coll.create(TaskDraft::new("still here")).await.unwrap();

        store.fail_next_requests(4, "persistent outage");
        let err = coll.refresh().await.unwrap_err();

        assert!(err.is_remote(RemoteOperation::List));
        // 1 initial attempt + 3 retries, then stop
        assert_eq!(store.call_count("list"), 4);
        // Replica left stale but consistent
        assert_eq!(coll.len(), 1);
    }

    #[tokio::test]
    async fn test_close_drops_undo_windows_without_remote_deletes() {
        let store = Arc::new(MemoryTaskStore::new());
        let clock = Arc::new(ManualClock::default());
        let coll = collection_with_clock(store.clone(), clock.clone());
        let task = coll.create(TaskDraft::new("survives on server")).await.unwrap();

        coll.delete(&task.id).unwrap();
        coll.close();

        clock.advance(Duration::from_secs(60));
        assert_eq!(coll.flush_due_deletions().await.unwrap(), 0);
        assert_eq!(store.call_count(&format!("delete:{}", task.id)), 0);
        // The server still holds the record
        assert_eq!(store.records().len(), 1);
    }

    #[tokio::test]
    async fn test_same_record_edits_apply_in_issuance_order() {
        let store = Arc::new(MemoryTaskStore::new());
        let coll = collection(store.clone());
        let task = coll.create(TaskDraft::new("v0")).await.unwrap();

        for i in 1..=3 {
            let patch = TaskPatch {
                text: Some(format!("v{}", i)),
                ..Default::default()
            };
            coll.update(&task.id, patch).await.unwrap();
        }
        assert_eq!(coll.get(&task.id).unwrap().text, "v3");
        assert_eq!(store.records()[0].text, "v3");
    }

    #[tokio::test]
    async fn test_next_deletion_due_reports_earliest_deadline() {
        let store = Arc::new(MemoryTaskStore::new());
        let clock = Arc::new(ManualClock::default());
        let coll = collection_with_clock(store, clock.clone());

        assert!(coll.next_deletion_due().is_none());
        let a = coll.create(TaskDraft::new("a")).await.unwrap();
        coll.delete(&a.id).unwrap();

        let due = coll.next_deletion_due().unwrap();
        assert_eq!(due - clock.now(), chrono::Duration::seconds(10));
    }

    #[tokio::test]
    async fn test_full_session_create_then_failed_update() {
        let store = Arc::new(GatedStore::new());
        store.close_gate();
        let coll = Arc::new(SyncedCollection::open(
            store.clone(),
            Arc::new(ManualClock::default()),
            CollectionConfig::default(),
        ));

        // Create shows up locally as Pending before the server answers
        let handle = {
            let coll = coll.clone();
            tokio::spawn(async move {
                let mut draft = TaskDraft::new("Buy milk");
                draft.priority = crate::models::Priority::Low;
                coll.create(draft).await
            })
        };
        wait_until(|| coll.len() == 1).await;
        let id = coll.tasks()[0].id.clone();
        assert_eq!(coll.status(&id), Some(SyncStatus::Pending));

        // Server accepts; id survives, status settles
        store.release_one();
        let task = handle.await.unwrap().unwrap();
        assert_eq!(task.id, id);
        assert_eq!(task.text, "Buy milk");
        assert_eq!(coll.status(&id), Some(SyncStatus::Synced));

        // Update shows immediately, then the server refuses and it reverts
        store.inner.fail_next_request("KV write refused");
        store.release_one();
        let patch = TaskPatch {
            completed: Some(true),
            ..Default::default()
        };
        let err = coll.update(&id, patch).await.unwrap_err();
        assert!(err.is_remote(RemoteOperation::Update));
        assert!(!coll.get(&id).unwrap().completed);
        assert_eq!(coll.status(&id), Some(SyncStatus::Synced));
    }

    #[tokio::test]
    async fn test_empty_patch_is_a_local_no_op() {
        let store = Arc::new(MemoryTaskStore::new());
        let coll = collection(store.clone());
        let task = coll.create(TaskDraft::new("unchanged")).await.unwrap();
        let calls_before = store.calls().len();

        let result = coll.update(&task.id, TaskPatch::default()).await.unwrap();
        assert_eq!(result.text, "unchanged");
        assert_eq!(store.calls().len(), calls_before);
    }
}

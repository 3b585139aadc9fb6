//! In-memory remote for tests.

use crate::error::{RemoteError, RemoteResult};
use crate::remote::{ListOptions, RemoteAdapter};
use async_trait::async_trait;
use fieldsync_core::{Entity, Record, SyncStatus};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Remote operations, for call accounting and failure scripting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    /// [`RemoteAdapter::list`].
    List,
    /// [`RemoteAdapter::create`].
    Create,
    /// [`RemoteAdapter::update`].
    Update,
    /// [`RemoteAdapter::delete`].
    Delete,
    /// [`RemoteAdapter::archive`].
    Archive,
}

#[derive(Debug, Default)]
struct Failures {
    next: HashMap<RemoteOp, VecDeque<RemoteError>>,
    always: HashMap<RemoteOp, RemoteError>,
    by_id: HashMap<String, RemoteError>,
}

/// A server that lives in memory.
///
/// Records are keyed by id. `create` of an existing id answers
/// [`RemoteError::AlreadyExists`], `update` and `delete` of a missing id
/// answer [`RemoteError::NotFound`], like a REST backend would.
pub struct MockRemote<T: Entity> {
    records: Mutex<BTreeMap<String, Record<T>>>,
    calls: Mutex<Vec<(RemoteOp, Option<String>)>>,
    list_options: Mutex<Vec<ListOptions>>,
    failures: Mutex<Failures>,
    latency: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl<T: Entity> Default for MockRemote<T> {
    fn default() -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(Vec::new()),
            list_options: Mutex::new(Vec::new()),
            failures: Mutex::new(Failures::default()),
            latency: Mutex::new(Duration::ZERO),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

impl<T: Entity> MockRemote<T> {
    /// Creates an empty remote.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a record on the server without counting a call.
    pub fn insert_remote(&self, mut record: Record<T>) {
        record.mark(SyncStatus::Synced, None);
        self.records.lock().insert(record.id.clone(), record);
    }

    /// Returns the server copy of `id`.
    pub fn remote_record(&self, id: &str) -> Option<Record<T>> {
        self.records.lock().get(id).cloned()
    }

    /// Every record on the server, ordered by id.
    pub fn remote_records(&self) -> Vec<Record<T>> {
        self.records.lock().values().cloned().collect()
    }

    /// Number of calls made to `op`.
    pub fn calls(&self, op: RemoteOp) -> usize {
        self.calls.lock().iter().filter(|(o, _)| *o == op).count()
    }

    /// Total number of calls made.
    pub fn total_calls(&self) -> usize {
        self.calls.lock().len()
    }

    /// Calls in the order they were made, with the record id where one applies.
    pub fn call_log(&self) -> Vec<(RemoteOp, Option<String>)> {
        self.calls.lock().clone()
    }

    /// Options passed to each `list` call, in order.
    pub fn list_options(&self) -> Vec<ListOptions> {
        self.list_options.lock().clone()
    }

    /// Forgets recorded calls.
    pub fn reset_calls(&self) {
        self.calls.lock().clear();
        self.list_options.lock().clear();
    }

    /// Fails the next call to `op` with `error`. Queued failures are used
    /// in order.
    pub fn fail_next(&self, op: RemoteOp, error: RemoteError) {
        self.failures
            .lock()
            .next
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Fails every call to `op` with `error` until [`Self::clear_failures`].
    pub fn fail_always(&self, op: RemoteOp, error: RemoteError) {
        self.failures.lock().always.insert(op, error);
    }

    /// Fails every write touching `id` with `error`.
    pub fn fail_id(&self, id: impl Into<String>, error: RemoteError) {
        self.failures.lock().by_id.insert(id.into(), error);
    }

    /// Removes every scripted failure.
    pub fn clear_failures(&self) {
        *self.failures.lock() = Failures::default();
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Highest number of calls observed in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn begin(&self, op: RemoteOp, id: Option<&str>) -> RemoteResult<()> {
        self.calls.lock().push((op, id.map(str::to_owned)));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut failures = self.failures.lock();
        if let Some(err) = failures.next.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        if let Some(err) = failures.always.get(&op) {
            return Err(err.clone());
        }
        if let Some(err) = id.and_then(|id| failures.by_id.get(id)) {
            return Err(err.clone());
        }
        Ok(())
    }

    fn remove(&self, id: &str) -> RemoteResult<()> {
        match self.records.lock().remove(id) {
            Some(_) => Ok(()),
            None => Err(RemoteError::NotFound(id.to_owned())),
        }
    }
}

#[async_trait]
impl<T: Entity> RemoteAdapter<T> for MockRemote<T> {
    async fn list(&self, options: ListOptions) -> RemoteResult<Vec<Record<T>>> {
        self.list_options.lock().push(options);
        self.begin(RemoteOp::List, None).await?;
        Ok(self
            .records
            .lock()
            .values()
            .filter(|r| options.since.map_or(true, |since| r.updated_at > since))
            .cloned()
            .collect())
    }

    async fn create(&self, record: &Record<T>) -> RemoteResult<Record<T>> {
        self.begin(RemoteOp::Create, Some(&record.id)).await?;
        let mut records = self.records.lock();
        if records.contains_key(&record.id) {
            return Err(RemoteError::AlreadyExists(record.id.clone()));
        }
        let mut stored = record.clone();
        stored.mark(SyncStatus::Synced, None);
        records.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    async fn update(&self, record: &Record<T>) -> RemoteResult<Record<T>> {
        self.begin(RemoteOp::Update, Some(&record.id)).await?;
        let mut records = self.records.lock();
        let Some(existing) = records.get_mut(&record.id) else {
            return Err(RemoteError::NotFound(record.id.clone()));
        };
        let mut stored = record.clone();
        stored.created_at = existing.created_at;
        stored.mark(SyncStatus::Synced, None);
        *existing = stored.clone();
        Ok(stored)
    }

    async fn delete(&self, id: &str) -> RemoteResult<()> {
        self.begin(RemoteOp::Delete, Some(id)).await?;
        self.remove(id)
    }

    async fn archive(&self, id: &str) -> RemoteResult<()> {
        self.begin(RemoteOp::Archive, Some(id)).await?;
        self.remove(id)
    }
}

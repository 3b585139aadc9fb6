//! Application-wide sync orchestration.
//!
//! The coordinator owns the only schedule that syncs every store: one pass
//! at a time, stores in registration order, with a pause between stores.
//! Concurrent callers of [`SyncCoordinator::sync_all`] share the pass that
//! is already running.

use crate::config::CoordinatorConfig;
use crate::engine::SyncReport;
use crate::error::{StoreFailure, SyncError, SyncResult};
use crate::task::TaskHandle;
use crate::upload::UploadEngine;
use async_trait::async_trait;
use fieldsync_core::Connectivity;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Something the coordinator can sync.
#[async_trait]
pub trait SyncTarget: Send + Sync {
    /// Name used in logs and aggregate errors.
    fn name(&self) -> &str;

    /// Runs a full sync with retries.
    async fn force_sync(&self) -> SyncResult<SyncReport>;
}

/// Whether a coordinator pass is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// No pass is running.
    Idle,
    /// A pass is running; new callers attach to it.
    Syncing,
}

/// Outcome of [`SyncCoordinator::sync_all`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncAllReport {
    /// Per-store reports, in sync order.
    pub stores: Vec<(String, SyncReport)>,
    /// True if the pass was declined because the device is offline.
    pub skipped_offline: bool,
}

impl SyncAllReport {
    fn offline() -> Self {
        Self {
            stores: Vec::new(),
            skipped_offline: true,
        }
    }

    /// Report of the store named `name`.
    pub fn store(&self, name: &str) -> Option<&SyncReport> {
        self.stores
            .iter()
            .find(|(store, _)| store == name)
            .map(|(_, report)| report)
    }
}

/// Failure of a shared pass. Must be `Clone` to be shared.
#[derive(Debug, Clone)]
enum PassFailure {
    Stores(Vec<StoreFailure>),
    Task(String),
}

impl From<PassFailure> for SyncError {
    fn from(failure: PassFailure) -> Self {
        match failure {
            PassFailure::Stores(failures) => SyncError::Aggregate { failures },
            PassFailure::Task(message) => SyncError::Task(message),
        }
    }
}

type SharedPass = Shared<BoxFuture<'static, Result<SyncAllReport, PassFailure>>>;

/// Drives every registered store.
///
/// Cloning is cheap; clones share the pass slot and registrations.
#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    config: CoordinatorConfig,
    connectivity: Connectivity,
    targets: RwLock<Vec<Arc<dyn SyncTarget>>>,
    uploads: RwLock<Option<Arc<dyn UploadEngine>>>,
    in_flight: Mutex<Option<SharedPass>>,
    state: watch::Sender<CoordinatorState>,
}

/// Clears the pass slot when a pass ends, however it ends.
struct PassSlotGuard<'a>(&'a CoordinatorInner);

impl Drop for PassSlotGuard<'_> {
    fn drop(&mut self) {
        *self.0.in_flight.lock() = None;
        self.0.state.send_replace(CoordinatorState::Idle);
    }
}

impl SyncCoordinator {
    /// Creates a coordinator with no stores.
    pub fn new(connectivity: Connectivity, config: CoordinatorConfig) -> Self {
        let (state, _) = watch::channel(CoordinatorState::Idle);
        Self {
            inner: Arc::new(CoordinatorInner {
                config,
                connectivity,
                targets: RwLock::new(Vec::new()),
                uploads: RwLock::new(None),
                in_flight: Mutex::new(None),
                state,
            }),
        }
    }

    /// Adds a store. Stores sync in registration order.
    pub fn register(&self, target: Arc<dyn SyncTarget>) {
        debug!(store = target.name(), "store registered");
        self.inner.targets.write().push(target);
    }

    /// Sets the upload engine resumed when connectivity returns.
    pub fn set_upload_engine(&self, uploads: Arc<dyn UploadEngine>) {
        *self.inner.uploads.write() = Some(uploads);
    }

    /// Names of the registered stores, in sync order.
    pub fn store_names(&self) -> Vec<String> {
        self.inner
            .targets
            .read()
            .iter()
            .map(|t| t.name().to_owned())
            .collect()
    }

    /// Returns true while a pass is running.
    pub fn is_syncing(&self) -> bool {
        self.inner.in_flight.lock().is_some()
    }

    /// Subscribes to coordinator state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<CoordinatorState> {
        self.inner.state.subscribe()
    }

    /// Syncs every store once.
    ///
    /// A caller arriving while a pass runs gets that pass's result instead
    /// of starting another. While offline, returns a report with
    /// `skipped_offline` set without touching any store.
    ///
    /// # Errors
    ///
    /// [`SyncError::Aggregate`] naming every store that failed. The other
    /// stores still ran.
    pub async fn sync_all(&self) -> SyncResult<SyncAllReport> {
        let pass = {
            let mut slot = self.inner.in_flight.lock();
            match slot.as_ref() {
                Some(pass) => {
                    debug!("sync pass in flight, attaching");
                    pass.clone()
                }
                None => {
                    if !self.inner.connectivity.is_online() {
                        info!("offline, sync skipped");
                        return Ok(SyncAllReport::offline());
                    }
                    let pass = self.start_pass();
                    *slot = Some(pass.clone());
                    self.inner.state.send_replace(CoordinatorState::Syncing);
                    pass
                }
            }
        };
        pass.await.map_err(SyncError::from)
    }

    /// Must be called with the pass slot locked, so the pass cannot clear
    /// the slot before it is filled.
    fn start_pass(&self) -> SharedPass {
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move { inner.run_pass().await });
        async move {
            match handle.await {
                Ok(result) => result,
                Err(err) => Err(PassFailure::Task(err.to_string())),
            }
        }
        .boxed()
        .shared()
    }

    /// Runs [`sync_all`](Self::sync_all) every `period` while online and not
    /// already syncing. The first run is one period from now.
    pub fn start_periodic_sync(&self, period: Duration) -> TaskHandle {
        let coordinator = self.clone();
        TaskHandle::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !coordinator.inner.connectivity.is_online() || coordinator.is_syncing() {
                    debug!("periodic sync skipped");
                    continue;
                }
                if let Err(err) = coordinator.sync_all().await {
                    warn!(error = %err, "periodic sync failed");
                }
            }
        })
    }

    /// Reacts to connectivity transitions: coming online runs
    /// [`sync_all`](Self::sync_all) and resumes the upload engine.
    pub fn start_connectivity_listener(&self) -> TaskHandle {
        let coordinator = self.clone();
        let mut online_rx = self.inner.connectivity.subscribe();
        TaskHandle::spawn(async move {
            let mut was_online = *online_rx.borrow_and_update();
            while online_rx.changed().await.is_ok() {
                let online = *online_rx.borrow_and_update();
                match (was_online, online) {
                    (false, true) => {
                        info!("back online");
                        coordinator.on_online().await;
                    }
                    (true, false) => info!("went offline"),
                    _ => {}
                }
                was_online = online;
            }
        })
    }

    async fn on_online(&self) {
        let uploads = self.inner.uploads.read().clone();
        let resume_uploads = async {
            let Some(uploads) = uploads else {
                return;
            };
            match uploads.sync_pending_uploads().await {
                Ok(started) => debug!(started, "pending uploads resumed"),
                Err(err) => warn!(error = %err, "resuming uploads failed"),
            }
            match uploads.retry_failed_uploads().await {
                Ok(started) => debug!(started, "failed uploads retried"),
                Err(err) => warn!(error = %err, "retrying uploads failed"),
            }
        };
        let (result, ()) = tokio::join!(self.sync_all(), resume_uploads);
        if let Err(err) = result {
            warn!(error = %err, "sync after reconnect failed");
        }
    }
}

impl CoordinatorInner {
    async fn run_pass(&self) -> Result<SyncAllReport, PassFailure> {
        let _slot = PassSlotGuard(self);
        let targets = self.targets.read().clone();
        info!(stores = targets.len(), "sync pass started");

        let mut report = SyncAllReport::default();
        let mut failures = Vec::new();
        for (index, target) in targets.iter().enumerate() {
            if index > 0 && !self.config.inter_store_delay.is_zero() {
                tokio::time::sleep(self.config.inter_store_delay).await;
            }
            let name = target.name().to_owned();
            match target.force_sync().await {
                Ok(store_report) => report.stores.push((name, store_report)),
                Err(err) => {
                    warn!(store = %name, error = %err, "store sync failed");
                    failures.push(StoreFailure {
                        store: name,
                        message: err.to_string(),
                    });
                }
            }
        }

        if failures.is_empty() {
            info!("sync pass complete");
            Ok(report)
        } else {
            warn!(failed = failures.len(), "sync pass finished with failures");
            Err(PassFailure::Stores(failures))
        }
    }
}

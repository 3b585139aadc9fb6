//! Cross-crate sync harness.
//!
//! Wires a [`TestDatabase`] to mock remotes, per-entity engines and a
//! coordinator, the way an application does at startup.

use crate::fixtures::TestDatabase;
use fieldsync_core::{Element, Entity, LocalStore, Section};
use fieldsync_sync_engine::{
    CoordinatorConfig, EngineConfig, EntitySyncEngine, MockRemote, RemoteAdapter, RetryConfig,
    SyncCoordinator, SyncTarget,
};
use std::sync::Arc;

/// One entity type's engine and its mock remote.
pub struct Wired<T: Entity> {
    /// The engine.
    pub engine: EntitySyncEngine<T>,
    /// The remote the engine talks to.
    pub remote: Arc<MockRemote<T>>,
}

impl<T: Entity> Wired<T> {
    fn new(db: &TestDatabase, config: EngineConfig) -> Self {
        let remote = Arc::new(MockRemote::new());
        let engine = EntitySyncEngine::new(
            db.store::<T>().expect("Failed to open store"),
            remote.clone() as Arc<dyn RemoteAdapter<T>>,
            db.meta(),
            config,
        );
        Self { engine, remote }
    }

    /// The engine's local store.
    pub fn store(&self) -> &LocalStore<T> {
        self.engine.store()
    }
}

/// A database with section and element stores registered on a coordinator.
pub struct SyncHarness {
    /// The database.
    pub db: TestDatabase,
    /// Sections, registered first.
    pub sections: Wired<Section>,
    /// Elements, registered second.
    pub elements: Wired<Element>,
    /// The coordinator.
    pub coordinator: SyncCoordinator,
}

impl SyncHarness {
    /// Builds a harness over an in-memory database with deterministic
    /// (jitter-free) retries.
    pub fn new() -> Self {
        Self::with_database(TestDatabase::memory())
    }

    /// Builds a harness over `db`.
    pub fn with_database(db: TestDatabase) -> Self {
        let config = EngineConfig::default().with_retry(RetryConfig::default().with_jitter(0.0));
        let sections = Wired::new(&db, config.clone());
        let elements = Wired::new(&db, config);
        let coordinator =
            SyncCoordinator::new(db.connectivity.clone(), CoordinatorConfig::default());
        coordinator.register(Arc::new(sections.engine.clone()) as Arc<dyn SyncTarget>);
        coordinator.register(Arc::new(elements.engine.clone()) as Arc<dyn SyncTarget>);
        Self {
            db,
            sections,
            elements,
            coordinator,
        }
    }
}

impl Default for SyncHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::section;

    #[tokio::test]
    async fn harness_registers_stores_in_order() {
        let harness = SyncHarness::new();
        assert_eq!(harness.coordinator.store_names(), ["section", "element"]);

        harness.sections.store().add(section("Roof")).await.unwrap();
        harness.coordinator.sync_all().await.unwrap();
        assert_eq!(harness.sections.remote.remote_records().len(), 1);
    }
}

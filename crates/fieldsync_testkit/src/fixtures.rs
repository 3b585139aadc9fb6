//! Test fixtures and database helpers.
//!
//! Provides convenience functions for setting up test databases with a
//! settable tenant and connectivity signal.

use fieldsync_core::{
    Connectivity, Database, StaticTenant, StoreConfig, TenantId, TenantResolver,
};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Tenant every fixture starts with.
pub const DEFAULT_TENANT: &str = "tenant-1";

/// A test database with automatic cleanup.
pub struct TestDatabase {
    /// The database instance.
    pub db: Database,
    /// The tenant resolver the database was opened with.
    pub tenants: Arc<StaticTenant>,
    /// The connectivity signal the database was opened with.
    pub connectivity: Connectivity,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestDatabase {
    /// Creates an in-memory database, online, for [`DEFAULT_TENANT`].
    pub fn memory() -> Self {
        let (tenants, connectivity) = Self::collaborators();
        let db = Database::open_in_memory(
            StoreConfig::default(),
            tenants.clone() as Arc<dyn TenantResolver>,
            connectivity.clone(),
        )
        .expect("Failed to open in-memory database");
        Self {
            db,
            tenants,
            connectivity,
            temp_dir: None,
        }
    }

    /// Creates a database in a fresh temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let mut test_db = Self::open_at(temp_dir.path());
        test_db.temp_dir = Some(temp_dir);
        test_db
    }

    /// Opens (or reopens) a database at `path`, online, for
    /// [`DEFAULT_TENANT`]. The caller owns the directory.
    pub fn open_at(path: &Path) -> Self {
        let (tenants, connectivity) = Self::collaborators();
        let db = Database::open(
            path,
            StoreConfig::default(),
            tenants.clone() as Arc<dyn TenantResolver>,
            connectivity.clone(),
        )
        .expect("Failed to open file database");
        Self {
            db,
            tenants,
            connectivity,
            temp_dir: None,
        }
    }

    fn collaborators() -> (Arc<StaticTenant>, Connectivity) {
        (
            Arc::new(StaticTenant::new(Some(TenantId::new(DEFAULT_TENANT)))),
            Connectivity::new(true),
        )
    }

    /// Returns the database path if file-based, None if in-memory.
    pub fn path(&self) -> Option<&Path> {
        self.db.path()
    }

    /// Takes ownership of the temporary directory so the database can be
    /// dropped and reopened at the same path.
    pub fn take_temp_dir(&mut self) -> Option<TempDir> {
        self.temp_dir.take()
    }

    /// Switches the current tenant and refreshes every live query.
    pub fn set_tenant(&self, tenant: Option<&str>) {
        self.tenants.set(tenant.map(TenantId::new));
        self.db.refresh_queries();
    }

    /// Switches connectivity.
    pub fn set_online(&self, online: bool) {
        self.connectivity.set_online(online);
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with a temporary in-memory database.
///
/// # Example
///
/// ```rust,ignore
/// use fieldsync_testkit::with_temp_db;
///
/// #[tokio::test]
/// async fn my_test() {
///     with_temp_db(|db| async move {
///         let sections = db.store::<Section>().unwrap();
///         // ... test operations
///     })
///     .await;
/// }
/// ```
pub async fn with_temp_db<F, Fut, R>(f: F) -> R
where
    F: FnOnce(Arc<TestDatabase>) -> Fut,
    Fut: std::future::Future<Output = R>,
{
    f(Arc::new(TestDatabase::memory())).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_core::Section;

    #[tokio::test]
    async fn memory_database_resolves_the_default_tenant() {
        let test_db = TestDatabase::memory();
        let sections = test_db.store::<Section>().unwrap();
        assert_eq!(
            sections.current_tenant().await,
            Some(TenantId::new(DEFAULT_TENANT))
        );
        assert!(test_db.path().is_none());
    }

    #[tokio::test]
    async fn file_database_can_be_reopened() {
        let mut test_db = TestDatabase::file();
        let dir = test_db.take_temp_dir().unwrap();
        test_db
            .store::<Section>()
            .unwrap()
            .add(Section::default())
            .await
            .unwrap();
        drop(test_db);

        let reopened = TestDatabase::open_at(dir.path());
        assert_eq!(reopened.store::<Section>().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn with_temp_db_passes_a_fresh_database() {
        let count = with_temp_db(|db| async move { db.store::<Section>().unwrap().len() }).await;
        assert_eq!(count, 0);
    }
}

//! Fixtures shared by the cross-crate tests.

use std::sync::Arc;

use anyhow::Result;
use migration::{Migrator, MigratorTrait};
use platform_authz::{
    AccessControl, AccessControlService, FixedRoleRegistry, ResourceManager,
    declarations::{dashboard_resource_options, default_registrations},
};
use platform_db::{SqlStore, connect};

/// A freshly migrated in-memory SQLite store.
pub async fn sqlite_store() -> Result<Arc<SqlStore>> {
    let db = connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(Arc::new(SqlStore::new(db)))
}

pub struct Harness {
    pub store: Arc<SqlStore>,
    pub engine: Arc<AccessControlService>,
    pub dashboards: ResourceManager,
}

/// Engine with the default fixed roles and a dashboard manager over one SQL store.
pub async fn harness(enabled: bool) -> Result<Harness> {
    let store = sqlite_store().await?;
    let engine = AccessControlService::new(Arc::new(FixedRoleRegistry::new()), store.clone())
        .with_enabled(enabled);
    engine.declare_fixed_roles(default_registrations())?;
    let dashboards = ResourceManager::new(dashboard_resource_options(), store.clone());
    Ok(Harness {
        store,
        engine: Arc::new(engine),
        dashboards,
    })
}

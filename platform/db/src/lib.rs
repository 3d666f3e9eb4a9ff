//! Database settings and the sea-orm backed store for managed grants.

mod store;

use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr};
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

pub use store::SqlStore;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database url missing")]
    MissingUrl,
    #[error("database connection failed: {0}")]
    Connect(#[from] DbErr),
}

pub type DbResult<T> = Result<T, DbError>;

/// Environment-driven connection settings.
#[derive(Clone, Debug, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_url_key")]
    env_key: String,
}

fn default_url_key() -> String {
    "DATABASE_URL".to_string()
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            env_key: default_url_key(),
        }
    }
}

impl DatabaseSettings {
    pub fn new(env_key: impl Into<String>) -> Self {
        Self {
            env_key: env_key.into(),
        }
    }

    pub fn env_key(&self) -> &str {
        &self.env_key
    }

    pub fn database_url(&self) -> DbResult<String> {
        std::env::var(&self.env_key)
            .ok()
            .filter(|url| !url.trim().is_empty())
            .ok_or(DbError::MissingUrl)
    }

    /// URL if configured; `None` means the server runs on the in-memory store.
    pub fn optional_url(&self) -> Option<String> {
        self.database_url().ok()
    }
}

pub async fn connect(url: &str) -> DbResult<DatabaseConnection> {
    let mut options = ConnectOptions::new(url.to_string());
    options.sqlx_logging(false);
    let db = Database::connect(options).await?;
    info!(backend = ?db.get_database_backend(), "database connected");
    Ok(db)
}

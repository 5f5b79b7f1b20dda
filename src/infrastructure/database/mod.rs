pub mod session;

pub use session::{SeaOrmSession, SeaOrmSessionProvider};

use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use tracing::info;

use crate::config::DatabaseSection;

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database URL (e.g., "sqlite://./nested_tx.db?mode=rwc")
    pub url: String,
    /// Upper bound on open connections, driver default when `None`
    pub max_connections: Option<u32>,
    /// Log every statement through sqlx
    pub sqlx_logging: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://./nested_tx.db?mode=rwc".to_string(),
            max_connections: None,
            sqlx_logging: false,
        }
    }
}

impl DatabaseConfig {
    /// Create config for SQLite
    pub fn sqlite(path: &str) -> Self {
        Self {
            url: format!("sqlite://{}?mode=rwc", path),
            ..Default::default()
        }
    }

    /// Private in-memory SQLite database.
    ///
    /// Each SQLite connection owns its own memory database, so the pool is
    /// pinned to one connection.
    pub fn sqlite_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: Some(1),
            sqlx_logging: false,
        }
    }
}

impl From<&DatabaseSection> for DatabaseConfig {
    fn from(section: &DatabaseSection) -> Self {
        Self {
            url: section.url.clone(),
            ..Default::default()
        }
    }
}

/// Initialize database connection
pub async fn init_database(config: &DatabaseConfig) -> Result<DatabaseConnection, sea_orm::DbErr> {
    info!("Connecting to database: {}", config.url);
    let mut options = ConnectOptions::new(config.url.clone());
    options.sqlx_logging(config.sqlx_logging);
    if let Some(max) = config.max_connections {
        options.max_connections(max);
    }
    let db = Database::connect(options).await?;
    info!("Database connected successfully");
    Ok(db)
}

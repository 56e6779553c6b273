//! Metadata persistence for OrgForge
//!
//! Provides:
//! - Row models for the shared dataset's org tables
//! - The `MetaStore` seam used by provisioning and credentials
//! - Postgres and in-memory implementations
//! - Connection pool management

mod memory;
pub mod models;
mod repository;

pub use memory::InMemoryMetaStore;
pub use models::{ApiKeyRecord, OrgProfile, OrgSubscription};
pub use repository::PgMetaStore;

use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use std::time::Duration;
use tracing::info;

/// Result of an insert that must not overwrite an existing row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyExists,
}

/// Rows the engine owns in the shared metadata dataset
#[async_trait]
pub trait MetaStore: Send + Sync {
    async fn get_profile(&self, org_slug: &str) -> Result<Option<OrgProfile>>;

    /// Insert unless a profile with the same slug exists; safe under concurrent callers
    async fn insert_profile(&self, profile: &OrgProfile) -> Result<InsertOutcome>;

    async fn list_org_slugs(&self) -> Result<Vec<String>>;

    async fn insert_subscription(&self, subscription: &OrgSubscription) -> Result<InsertOutcome>;

    async fn get_subscription(&self, org_slug: &str) -> Result<Option<OrgSubscription>>;

    /// Deactivate every active key of the org and store `record` as the
    /// active one, in a single atomic step. Returns the deactivated key ids.
    async fn activate_api_key(&self, record: &ApiKeyRecord) -> Result<Vec<String>>;

    async fn find_active_api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKeyRecord>>;

    async fn get_active_api_key(&self, org_slug: &str) -> Result<Option<ApiKeyRecord>>;
}

/// Database connection pool wrapper
#[derive(Clone)]
pub struct DbPool {
    connection: DatabaseConnection,
}

impl DbPool {
    /// Create a new database pool from configuration
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to database...");

        let mut opts = ConnectOptions::new(&config.url);
        opts.max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .sqlx_logging(false);

        let connection = Database::connect(opts)
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Failed to connect: {}", e),
            })?;

        info!("Database connection established");

        Ok(Self { connection })
    }

    /// Wrap an existing connection
    pub fn from_connection(connection: DatabaseConnection) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }

    /// Ping the database to check connectivity
    pub async fn ping(&self) -> Result<()> {
        self.connection
            .execute_unprepared("SELECT 1")
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Ping failed: {}", e),
            })?;
        Ok(())
    }
}

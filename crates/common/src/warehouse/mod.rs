//! Warehouse abstraction
//!
//! The engine consumes the analytical warehouse through a deliberately narrow
//! DDL/introspection interface. There is no way to drop a dataset, table or
//! column through this trait; the only replacement it performs is of
//! materialized views, which hold no state of their own.
//!
//! Implementations:
//! - `PgWarehouse`: datasets are Postgres schemas
//! - `InMemoryWarehouse`: tests and local development

mod memory;
mod postgres;

pub use memory::{DdlKind, InMemoryWarehouse};
pub use postgres::PgWarehouse;
pub(crate) use postgres::quote_ident;

use crate::catalog::{ColumnDefinition, TableDefinition};
use crate::errors::AppError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type WarehouseResult<T> = std::result::Result<T, WarehouseError>;

/// Failure reported by a warehouse call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WarehouseError {
    #[error("not found: {0}")]
    NotFound(String),

    /// Network or backend hiccup; worth exactly one retry
    #[error("transient warehouse failure: {0}")]
    Transient(String),

    #[error("warehouse operation failed: {0}")]
    Permanent(String),
}

impl WarehouseError {
    pub fn is_transient(&self) -> bool {
        matches!(self, WarehouseError::Transient(_))
    }
}

impl From<WarehouseError> for AppError {
    fn from(err: WarehouseError) -> Self {
        AppError::Warehouse {
            message: err.to_string(),
        }
    }
}

/// Result of a create call; an existing object is a success, not an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// A table as observed in the warehouse
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveTable {
    pub name: String,
    pub columns: Vec<String>,
}

/// Narrow DDL and introspection interface to the warehouse
#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn dataset_exists(&self, dataset: &str) -> WarehouseResult<bool>;

    async fn create_dataset(&self, dataset: &str) -> WarehouseResult<CreateOutcome>;

    /// Create a table with its full definition (types, partitioning, clustering)
    async fn create_table(
        &self,
        dataset: &str,
        table: &TableDefinition,
    ) -> WarehouseResult<CreateOutcome>;

    async fn list_tables(&self, dataset: &str) -> WarehouseResult<Vec<LiveTable>>;

    /// Add one column; adding a column that already exists succeeds
    async fn add_column(
        &self,
        dataset: &str,
        table: &str,
        column: &ColumnDefinition,
    ) -> WarehouseResult<()>;

    async fn create_or_replace_view(
        &self,
        dataset: &str,
        name: &str,
        query: &str,
    ) -> WarehouseResult<()>;

    /// Provider name for logs and metrics
    fn provider(&self) -> &'static str;
}

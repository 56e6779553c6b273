//! Central store bootstrapper
//!
//! Owns the shared metadata dataset: creates it and its tables, reports
//! its status and adds whatever the catalog has gained since.

use crate::catalog::{SchemaCatalog, REQUIRED_META_TABLES};
use crate::errors::Result;
use crate::status::{OrgStatus, StatusReport};
use crate::sync::{SyncExecutor, SyncOptions, SyncReport};
use std::sync::Arc;
use tracing::{info, instrument};

#[derive(Clone)]
pub struct CentralStore {
    catalog: Arc<SchemaCatalog>,
    executor: SyncExecutor,
    meta_dataset: String,
}

impl CentralStore {
    pub fn new(catalog: Arc<SchemaCatalog>, executor: SyncExecutor, meta_dataset: impl Into<String>) -> Self {
        Self {
            catalog,
            executor,
            meta_dataset: meta_dataset.into(),
        }
    }

    pub fn dataset(&self) -> &str {
        &self.meta_dataset
    }

    /// Create the shared dataset and any absent meta table.
    ///
    /// Columns missing from existing tables are left to `sync` and show up
    /// under `skipped_columns`.
    #[instrument(skip(self), fields(dataset = %self.meta_dataset))]
    pub async fn bootstrap(&self) -> Result<SyncReport> {
        info!(
            catalog_version = self.catalog.meta().version(),
            "Bootstrapping central dataset"
        );
        let options = SyncOptions {
            sync_missing_tables: true,
            sync_missing_columns: false,
            recreate_views: false,
        };
        self.executor
            .run(&self.meta_dataset, self.catalog.meta(), &[], options)
            .await
            .into_result()
    }

    #[instrument(skip(self), fields(dataset = %self.meta_dataset))]
    pub async fn status(&self) -> Result<StatusReport> {
        let diff = self.executor.diff(&self.meta_dataset, self.catalog.meta()).await?;
        Ok(StatusReport {
            status: OrgStatus::for_central(diff.as_ref()),
            dataset: self.meta_dataset.clone(),
            catalog_version: self.catalog.meta().version().to_string(),
            diff,
        })
    }

    /// Additive sync of the shared dataset; no flag combination removes anything
    #[instrument(skip(self), fields(dataset = %self.meta_dataset))]
    pub async fn sync(&self, options: SyncOptions) -> Result<SyncReport> {
        // The shared dataset has no materialized views
        let options = SyncOptions {
            recreate_views: false,
            ..options
        };
        self.executor
            .run(&self.meta_dataset, self.catalog.meta(), &[], options)
            .await
            .into_result()
    }

    /// True when the tables onboarding writes to are present
    pub async fn is_bootstrapped(&self) -> Result<bool> {
        let warehouse = self.executor.warehouse();
        if !warehouse.dataset_exists(&self.meta_dataset).await? {
            return Ok(false);
        }
        let live = warehouse.list_tables(&self.meta_dataset).await?;
        Ok(REQUIRED_META_TABLES
            .iter()
            .all(|required| live.iter().any(|t| t.name == *required)))
    }
}

//! Sync executor
//!
//! Applies a `SchemaDiff` to one dataset using only additive operations:
//! create dataset, create table, add column, and replace materialized views.
//! Within one run tables are created before columns are added, and columns
//! before views are replaced. A failing item is recorded in the report and
//! the batch carries on.

use crate::catalog::{CatalogScope, RenderedView};
use crate::diff::SchemaDiff;
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::warehouse::{CreateOutcome, Warehouse, WarehouseError, WarehouseResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

fn default_true() -> bool {
    true
}

/// Which kinds of change a sync run may apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOptions {
    #[serde(default = "default_true")]
    pub sync_missing_tables: bool,

    #[serde(default = "default_true")]
    pub sync_missing_columns: bool,

    #[serde(default = "default_true")]
    pub recreate_views: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            sync_missing_tables: true,
            sync_missing_columns: true,
            recreate_views: true,
        }
    }
}

/// Kind of operation a failure refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperation {
    CreateDataset,
    InspectDataset,
    CreateTable,
    AddColumn,
    CreateView,
}

impl SyncOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOperation::CreateDataset => "create_dataset",
            SyncOperation::InspectDataset => "inspect_dataset",
            SyncOperation::CreateTable => "create_table",
            SyncOperation::AddColumn => "add_column",
            SyncOperation::CreateView => "create_view",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
    pub operation: SyncOperation,
    pub target: String,
    pub message: String,
}

/// What one sync run did and did not do
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub dataset: String,
    pub dataset_created: bool,
    /// The dataset is missing and table creation was disabled
    pub dataset_skipped: bool,
    pub tables_created: Vec<String>,
    pub tables_already_existed: Vec<String>,
    pub columns_added: BTreeMap<String, Vec<String>>,
    pub views_recreated: Vec<String>,
    pub extra_columns: BTreeMap<String, BTreeSet<String>>,
    /// Missing tables left alone because table creation was disabled
    pub skipped_tables: Vec<String>,
    pub skipped_columns: BTreeMap<String, Vec<String>>,
    pub failures: Vec<SyncFailure>,
    #[serde(skip)]
    succeeded: usize,
}

impl SyncReport {
    pub fn new(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            ..Default::default()
        }
    }

    pub fn record_failure(
        &mut self,
        operation: SyncOperation,
        target: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.failures.push(SyncFailure {
            operation,
            target: target.into(),
            message: message.into(),
        });
    }

    fn record_success(&mut self) {
        self.succeeded += 1;
    }

    /// Number of tables created, columns added and views replaced
    pub fn changes(&self) -> usize {
        usize::from(self.dataset_created)
            + self.tables_created.len()
            + self.columns_added.values().map(Vec::len).sum::<usize>()
            + self.views_recreated.len()
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Turn the report into an error only when something was attempted and
    /// nothing succeeded
    pub fn into_result(self) -> Result<SyncReport> {
        if self.has_failures() && self.succeeded == 0 {
            return Err(AppError::SyncFailed {
                report: Box::new(self),
            });
        }
        Ok(self)
    }
}

/// Executes additive schema changes against the warehouse
#[derive(Clone)]
pub struct SyncExecutor {
    warehouse: Arc<dyn Warehouse>,
    retry_delay: Duration,
}

impl SyncExecutor {
    pub fn new(warehouse: Arc<dyn Warehouse>, retry_delay: Duration) -> Self {
        Self {
            warehouse,
            retry_delay,
        }
    }

    pub fn warehouse(&self) -> &Arc<dyn Warehouse> {
        &self.warehouse
    }

    /// Diff a dataset against `scope`; `None` when the dataset does not exist
    pub async fn diff(&self, dataset: &str, scope: &CatalogScope) -> Result<Option<SchemaDiff>> {
        if !self.warehouse.dataset_exists(dataset).await? {
            return Ok(None);
        }
        let live = self.warehouse.list_tables(dataset).await?;
        Ok(Some(SchemaDiff::compute(scope, &live)))
    }

    /// Bring `dataset` up to `scope`, creating the dataset when absent.
    ///
    /// Always returns the report; use `SyncReport::into_result` to decide
    /// whether the run failed as a whole.
    #[instrument(skip(self, scope, views, options), fields(catalog_scope = scope.name()))]
    pub async fn run(
        &self,
        dataset: &str,
        scope: &CatalogScope,
        views: &[RenderedView],
        options: SyncOptions,
    ) -> SyncReport {
        let start = Instant::now();
        let mut report = SyncReport::new(dataset);

        if self.ensure_dataset(options, &mut report).await {
            match self
                .with_retry(SyncOperation::InspectDataset, dataset, || {
                    self.warehouse.list_tables(dataset)
                })
                .await
            {
                Ok(live) => {
                    let diff = SchemaDiff::compute(scope, &live);
                    self.apply(scope, &diff, views, options, &mut report).await;
                }
                Err(e) => report.record_failure(SyncOperation::InspectDataset, dataset, e.to_string()),
            }
        }

        let outcome = match (report.has_failures(), report.succeeded) {
            (false, _) => "success",
            (true, 0) => "failed",
            (true, _) => "partial",
        };
        metrics::record_sync(scope.name(), outcome, start.elapsed().as_secs_f64());
        info!(
            dataset,
            outcome,
            changes = report.changes(),
            failures = report.failures.len(),
            "Sync finished"
        );
        report
    }

    /// Returns false when the dataset is absent afterwards. Creating the
    /// dataset counts as table creation and obeys the same flag.
    async fn ensure_dataset(&self, options: SyncOptions, report: &mut SyncReport) -> bool {
        let dataset = report.dataset.clone();
        if !options.sync_missing_tables {
            return match self
                .with_retry(SyncOperation::InspectDataset, &dataset, || {
                    self.warehouse.dataset_exists(&dataset)
                })
                .await
            {
                Ok(true) => true,
                Ok(false) => {
                    info!(dataset = %dataset, "Dataset missing and table creation disabled");
                    report.dataset_skipped = true;
                    false
                }
                Err(e) => {
                    report.record_failure(SyncOperation::InspectDataset, &dataset, e.to_string());
                    false
                }
            };
        }
        match self
            .with_retry(SyncOperation::CreateDataset, &dataset, || {
                self.warehouse.create_dataset(&dataset)
            })
            .await
        {
            Ok(CreateOutcome::Created) => {
                info!(dataset = %dataset, "Created dataset");
                report.dataset_created = true;
                report.record_success();
                true
            }
            Ok(CreateOutcome::AlreadyExists) => true,
            Err(e) => {
                report.record_failure(SyncOperation::CreateDataset, &dataset, e.to_string());
                false
            }
        }
    }

    async fn apply(
        &self,
        scope: &CatalogScope,
        diff: &SchemaDiff,
        views: &[RenderedView],
        options: SyncOptions,
        report: &mut SyncReport,
    ) {
        let dataset = report.dataset.clone();
        report.extra_columns = diff.extra_columns.clone();
        report.tables_already_existed = scope
            .tables()
            .filter(|t| !diff.missing_tables.contains(&t.name))
            .map(|t| t.name.clone())
            .collect();

        for name in &diff.missing_tables {
            let Some(table) = scope.table(name) else {
                continue;
            };
            if !options.sync_missing_tables {
                report.skipped_tables.push(name.clone());
                continue;
            }
            let target = format!("{}.{}", dataset, name);
            match self
                .with_retry(SyncOperation::CreateTable, &target, || {
                    self.warehouse.create_table(&dataset, table)
                })
                .await
            {
                Ok(CreateOutcome::Created) => {
                    info!(table = %target, "Created table");
                    report.tables_created.push(name.clone());
                    report.record_success();
                }
                Ok(CreateOutcome::AlreadyExists) => {
                    debug!(table = %target, "Table created concurrently");
                    report.tables_already_existed.push(name.clone());
                    report.record_success();
                }
                Err(e) => report.record_failure(SyncOperation::CreateTable, name, e.to_string()),
            }
        }

        for (table_name, missing) in &diff.missing_columns {
            if !options.sync_missing_columns {
                report
                    .skipped_columns
                    .insert(table_name.clone(), missing.iter().cloned().collect());
                continue;
            }
            let Some(table) = scope.table(table_name) else {
                continue;
            };
            // Catalog order keeps added columns in their declared position
            for column in table.columns.iter().filter(|c| missing.contains(&c.name)) {
                let target = format!("{}.{}.{}", dataset, table_name, column.name);
                match self
                    .with_retry(SyncOperation::AddColumn, &target, || {
                        self.warehouse.add_column(&dataset, table_name, column)
                    })
                    .await
                {
                    Ok(()) => {
                        info!(column = %target, "Added column");
                        report
                            .columns_added
                            .entry(table_name.clone())
                            .or_default()
                            .push(column.name.clone());
                        report.record_success();
                    }
                    Err(e) => report.record_failure(
                        SyncOperation::AddColumn,
                        format!("{}.{}", table_name, column.name),
                        e.to_string(),
                    ),
                }
            }
        }

        if !options.recreate_views {
            return;
        }
        for view in views {
            let target = format!("{}.{}", dataset, view.name);
            match self
                .with_retry(SyncOperation::CreateView, &target, || {
                    self.warehouse
                        .create_or_replace_view(&dataset, &view.name, &view.query)
                })
                .await
            {
                Ok(()) => {
                    info!(view = %target, "Recreated materialized view");
                    report.views_recreated.push(view.name.clone());
                    report.record_success();
                }
                Err(e) => report.record_failure(SyncOperation::CreateView, &view.name, e.to_string()),
            }
        }
    }

    /// Run `call`, retrying exactly once after a transient failure
    async fn with_retry<T, F, Fut>(&self, operation: SyncOperation, target: &str, call: F) -> WarehouseResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = WarehouseResult<T>>,
    {
        let result = match call().await {
            Err(e) if e.is_transient() => {
                warn!(
                    operation = operation.as_str(),
                    item = target,
                    error = %e,
                    "Transient warehouse failure, retrying once"
                );
                metrics::record_ddl(operation.as_str(), "retried");
                tokio::time::sleep(self.retry_delay).await;
                call().await
            }
            other => other,
        };

        match &result {
            Ok(_) => metrics::record_ddl(operation.as_str(), "ok"),
            Err(e) => {
                warn!(
                    operation = operation.as_str(),
                    item = target,
                    error = %e,
                    "Warehouse operation failed"
                );
                metrics::record_ddl(operation.as_str(), failure_label(e));
            }
        }
        result
    }
}

fn failure_label(err: &WarehouseError) -> &'static str {
    match err {
        WarehouseError::NotFound(_) => "not_found",
        WarehouseError::Transient(_) => "transient",
        WarehouseError::Permanent(_) => "failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{fixtures, ColumnDefinition, FieldMode, FieldType, ViewContext};
    use crate::warehouse::{DdlKind, InMemoryWarehouse};

    const DATASET: &str = "acme_prod";

    fn setup() -> (Arc<InMemoryWarehouse>, SyncExecutor) {
        let warehouse = Arc::new(InMemoryWarehouse::new());
        let executor = SyncExecutor::new(warehouse.clone(), Duration::ZERO);
        (warehouse, executor)
    }

    fn views(scope: &CatalogScope) -> Vec<RenderedView> {
        scope.render_views(&ViewContext {
            meta_dataset: "organizations",
            org_dataset: DATASET,
            org_slug: "acme",
        })
    }

    async fn snapshot(warehouse: &InMemoryWarehouse) -> BTreeSet<String> {
        warehouse
            .list_tables(DATASET)
            .await
            .unwrap_or_default()
            .into_iter()
            .flat_map(|t| {
                let table = t.name.clone();
                std::iter::once(table.clone()).chain(t.columns.into_iter().map(move |c| format!("{}.{}", table, c)))
            })
            .collect()
    }

    #[tokio::test]
    async fn test_first_run_creates_everything() {
        let (warehouse, executor) = setup();
        let scope = fixtures::org_scope();
        let report = executor.run(DATASET, &scope, &views(&scope), SyncOptions::default()).await;

        assert!(report.dataset_created);
        assert_eq!(report.tables_created.len(), 3);
        assert_eq!(report.views_recreated.len(), 2);
        assert!(report.failures.is_empty());
        let query = warehouse.view_query(DATASET, "x_org_hierarchy").await.unwrap();
        assert!(query.contains("org_slug = 'acme'"));
    }

    #[tokio::test]
    async fn test_second_run_reports_existing_tables() {
        let (_warehouse, executor) = setup();
        let scope = fixtures::org_scope();
        executor.run(DATASET, &scope, &[], SyncOptions::default()).await;
        let report = executor.run(DATASET, &scope, &[], SyncOptions::default()).await;

        assert!(!report.dataset_created);
        assert!(report.tables_created.is_empty());
        assert_eq!(report.tables_already_existed.len(), 3);
        assert_eq!(report.changes(), 0);
        assert!(report.into_result().is_ok());
    }

    #[tokio::test]
    async fn test_adds_missing_column_in_existing_table() {
        let (warehouse, executor) = setup();
        let scope = fixtures::org_scope();
        warehouse.create_dataset(DATASET).await.unwrap();
        let mut partial = scope.table("plans").unwrap().clone();
        partial.columns.truncate(1);
        warehouse.create_table(DATASET, &partial).await.unwrap();

        let report = executor.run(DATASET, &scope, &[], SyncOptions::default()).await;
        assert_eq!(report.columns_added["plans"], vec!["seats".to_string()]);
        assert_eq!(report.tables_created.len(), 2);
        assert!(executor.diff(DATASET, &scope).await.unwrap().unwrap().is_in_sync());
    }

    #[tokio::test]
    async fn test_flags_skip_without_removing() {
        let (warehouse, executor) = setup();
        let scope = fixtures::org_scope();
        warehouse.create_dataset(DATASET).await.unwrap();
        let mut partial = scope.table("plans").unwrap().clone();
        partial.columns.truncate(1);
        partial
            .columns
            .push(ColumnDefinition::new("legacy", FieldType::String, FieldMode::Nullable));
        warehouse.create_table(DATASET, &partial).await.unwrap();
        let before = snapshot(&warehouse).await;

        let options = SyncOptions {
            sync_missing_tables: false,
            sync_missing_columns: false,
            recreate_views: false,
        };
        let report = executor.run(DATASET, &scope, &views(&scope), options).await;

        assert_eq!(report.skipped_tables.len(), 2);
        assert_eq!(report.skipped_columns["plans"], vec!["seats".to_string()]);
        assert!(report.extra_columns["plans"].contains("legacy"));
        assert!(report.views_recreated.is_empty());
        assert_eq!(snapshot(&warehouse).await, before);
    }

    #[tokio::test]
    async fn test_missing_dataset_is_not_created_when_tables_disabled() {
        let (warehouse, executor) = setup();
        let scope = fixtures::org_scope();
        let options = SyncOptions {
            sync_missing_tables: false,
            sync_missing_columns: false,
            recreate_views: false,
        };
        let report = executor.run(DATASET, &scope, &views(&scope), options).await;

        assert!(report.dataset_skipped);
        assert!(!report.dataset_created);
        assert!(report.failures.is_empty());
        assert!(!warehouse.dataset_exists(DATASET).await.unwrap());
        assert_eq!(warehouse.successful_ddl_count(), 0);
        assert!(report.into_result().is_ok());
    }

    #[tokio::test]
    async fn test_live_schema_only_grows() {
        let (warehouse, executor) = setup();
        let scope = fixtures::org_scope();
        warehouse.create_dataset(DATASET).await.unwrap();
        warehouse
            .create_table(
                DATASET,
                &crate::catalog::TableDefinition::new(
                    "hand_made",
                    vec![ColumnDefinition::new("x", FieldType::Int64, FieldMode::Nullable)],
                ),
            )
            .await
            .unwrap();

        let option_grid = [
            SyncOptions::default(),
            SyncOptions { sync_missing_tables: false, ..Default::default() },
            SyncOptions { sync_missing_columns: false, ..Default::default() },
            SyncOptions { recreate_views: false, ..Default::default() },
        ];
        for options in option_grid {
            let before = snapshot(&warehouse).await;
            executor.run(DATASET, &scope, &views(&scope), options).await;
            let after = snapshot(&warehouse).await;
            assert!(before.is_subset(&after));
        }
        assert!(snapshot(&warehouse).await.contains("hand_made.x"));
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried_once() {
        let (warehouse, executor) = setup();
        let scope = fixtures::org_scope();
        warehouse
            .inject_fault(
                DdlKind::CreateTable,
                "acme_prod.plans",
                WarehouseError::Transient("socket reset".into()),
                1,
            )
            .await;

        let report = executor.run(DATASET, &scope, &[], SyncOptions::default()).await;
        assert!(report.failures.is_empty());
        assert!(report.tables_created.contains(&"plans".to_string()));
    }

    #[tokio::test]
    async fn test_persistent_failure_is_recorded_and_batch_continues() {
        let (warehouse, executor) = setup();
        let scope = fixtures::org_scope();
        warehouse
            .inject_fault(
                DdlKind::CreateTable,
                "acme_prod.plans",
                WarehouseError::Transient("socket reset".into()),
                2,
            )
            .await;

        let report = executor.run(DATASET, &scope, &[], SyncOptions::default()).await;
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].operation, SyncOperation::CreateTable);
        assert_eq!(report.failures[0].target, "plans");
        assert_eq!(report.tables_created.len(), 2);
        assert!(report.into_result().is_ok());
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let (warehouse, executor) = setup();
        let scope = fixtures::org_scope();
        warehouse
            .inject_fault(
                DdlKind::CreateTable,
                "acme_prod.plans",
                WarehouseError::Permanent("bad type".into()),
                1,
            )
            .await;

        let report = executor.run(DATASET, &scope, &[], SyncOptions::default()).await;
        assert_eq!(report.failures.len(), 1);
        // The single injected fault was consumed; a retry would have succeeded
        assert!(!report.tables_created.contains(&"plans".to_string()));
    }

    #[tokio::test]
    async fn test_total_failure_becomes_error() {
        let (warehouse, executor) = setup();
        let scope = fixtures::org_scope();
        warehouse
            .inject_fault(
                DdlKind::CreateDataset,
                "*",
                WarehouseError::Permanent("permission denied".into()),
                1,
            )
            .await;

        let report = executor.run(DATASET, &scope, &[], SyncOptions::default()).await;
        let err = report.into_result().unwrap_err();
        match err {
            AppError::SyncFailed { report } => {
                assert_eq!(report.failures[0].operation, SyncOperation::CreateDataset);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_diff_of_missing_dataset_is_none() {
        let (_warehouse, executor) = setup();
        assert!(executor.diff(DATASET, &fixtures::org_scope()).await.unwrap().is_none());
    }

    #[test]
    fn test_options_default_to_true_when_omitted() {
        let options: SyncOptions = serde_json::from_str(r#"{"recreate_views": false}"#).unwrap();
        assert!(options.sync_missing_tables);
        assert!(options.sync_missing_columns);
        assert!(!options.recreate_views);
    }
}

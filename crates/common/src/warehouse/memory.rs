//! In-memory warehouse for tests and local development
//!
//! Supports fault injection so retry and partial-failure paths can be
//! exercised, plus `destroy_dataset` to simulate a dataset deleted out of band.

use super::{CreateOutcome, LiveTable, Warehouse, WarehouseError, WarehouseResult};
use crate::catalog::{ColumnDefinition, TableDefinition};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// DDL call kinds, used to target injected faults
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdlKind {
    CreateDataset,
    CreateTable,
    AddColumn,
    CreateView,
}

#[derive(Debug)]
struct Fault {
    kind: DdlKind,
    target: String,
    error: WarehouseError,
    remaining: u32,
}

#[derive(Debug, Default)]
struct Dataset {
    tables: BTreeMap<String, Vec<ColumnDefinition>>,
    views: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct State {
    datasets: BTreeMap<String, Dataset>,
    faults: Vec<Fault>,
}

/// Warehouse held entirely in process memory
#[derive(Debug, Default)]
pub struct InMemoryWarehouse {
    state: RwLock<State>,
    successful_ddl: AtomicU64,
}

impl InMemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` calls of `kind` on `target` with `error`.
    ///
    /// Targets are `dataset`, `dataset.table`, `dataset.table.column` or
    /// `dataset.view`; `*` matches any target.
    pub async fn inject_fault(&self, kind: DdlKind, target: &str, error: WarehouseError, times: u32) {
        self.state.write().await.faults.push(Fault {
            kind,
            target: target.to_string(),
            error,
            remaining: times,
        });
    }

    /// Drop a dataset behind the engine's back
    pub async fn destroy_dataset(&self, dataset: &str) -> bool {
        self.state.write().await.datasets.remove(dataset).is_some()
    }

    /// Query backing a view, if it exists
    pub async fn view_query(&self, dataset: &str, view: &str) -> Option<String> {
        let state = self.state.read().await;
        state.datasets.get(dataset)?.views.get(view).cloned()
    }

    /// Full column definitions of a table, if it exists
    pub async fn table_definition(&self, dataset: &str, table: &str) -> Option<Vec<ColumnDefinition>> {
        let state = self.state.read().await;
        state.datasets.get(dataset)?.tables.get(table).cloned()
    }

    /// Number of DDL calls that changed or confirmed state
    pub fn successful_ddl_count(&self) -> u64 {
        self.successful_ddl.load(Ordering::SeqCst)
    }

    fn take_fault(state: &mut State, kind: DdlKind, target: &str) -> Option<WarehouseError> {
        let position = state
            .faults
            .iter()
            .position(|f| f.kind == kind && f.remaining > 0 && (f.target == "*" || f.target == target))?;
        let fault = &mut state.faults[position];
        fault.remaining -= 1;
        let error = fault.error.clone();
        if fault.remaining == 0 {
            state.faults.remove(position);
        }
        Some(error)
    }

    fn record_success(&self) {
        self.successful_ddl.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Warehouse for InMemoryWarehouse {
    async fn dataset_exists(&self, dataset: &str) -> WarehouseResult<bool> {
        Ok(self.state.read().await.datasets.contains_key(dataset))
    }

    async fn create_dataset(&self, dataset: &str) -> WarehouseResult<CreateOutcome> {
        let mut state = self.state.write().await;
        if let Some(err) = Self::take_fault(&mut state, DdlKind::CreateDataset, dataset) {
            return Err(err);
        }
        self.record_success();
        if state.datasets.contains_key(dataset) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        state.datasets.insert(dataset.to_string(), Dataset::default());
        Ok(CreateOutcome::Created)
    }

    async fn create_table(
        &self,
        dataset: &str,
        table: &TableDefinition,
    ) -> WarehouseResult<CreateOutcome> {
        let mut state = self.state.write().await;
        let target = format!("{}.{}", dataset, table.name);
        if let Some(err) = Self::take_fault(&mut state, DdlKind::CreateTable, &target) {
            return Err(err);
        }
        let ds = state
            .datasets
            .get_mut(dataset)
            .ok_or_else(|| WarehouseError::NotFound(format!("dataset {}", dataset)))?;
        self.record_success();
        if ds.tables.contains_key(&table.name) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        ds.tables.insert(table.name.clone(), table.columns.clone());
        Ok(CreateOutcome::Created)
    }

    async fn list_tables(&self, dataset: &str) -> WarehouseResult<Vec<LiveTable>> {
        let state = self.state.read().await;
        let ds = state
            .datasets
            .get(dataset)
            .ok_or_else(|| WarehouseError::NotFound(format!("dataset {}", dataset)))?;
        Ok(ds
            .tables
            .iter()
            .map(|(name, columns)| LiveTable {
                name: name.clone(),
                columns: columns.iter().map(|c| c.name.clone()).collect(),
            })
            .collect())
    }

    async fn add_column(
        &self,
        dataset: &str,
        table: &str,
        column: &ColumnDefinition,
    ) -> WarehouseResult<()> {
        let mut state = self.state.write().await;
        let target = format!("{}.{}.{}", dataset, table, column.name);
        if let Some(err) = Self::take_fault(&mut state, DdlKind::AddColumn, &target) {
            return Err(err);
        }
        let columns = state
            .datasets
            .get_mut(dataset)
            .and_then(|ds| ds.tables.get_mut(table))
            .ok_or_else(|| WarehouseError::NotFound(format!("table {}.{}", dataset, table)))?;
        self.record_success();
        if !columns.iter().any(|c| c.name == column.name) {
            columns.push(column.clone());
        }
        Ok(())
    }

    async fn create_or_replace_view(
        &self,
        dataset: &str,
        name: &str,
        query: &str,
    ) -> WarehouseResult<()> {
        let mut state = self.state.write().await;
        let target = format!("{}.{}", dataset, name);
        if let Some(err) = Self::take_fault(&mut state, DdlKind::CreateView, &target) {
            return Err(err);
        }
        let ds = state
            .datasets
            .get_mut(dataset)
            .ok_or_else(|| WarehouseError::NotFound(format!("dataset {}", dataset)))?;
        self.record_success();
        ds.views.insert(name.to_string(), query.to_string());
        Ok(())
    }

    fn provider(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FieldMode, FieldType};
    use tokio_test::{assert_err, assert_ok};

    fn table() -> TableDefinition {
        TableDefinition::new(
            "events",
            vec![ColumnDefinition::new("id", FieldType::String, FieldMode::Required)],
        )
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let wh = InMemoryWarehouse::new();
        assert_eq!(wh.create_dataset("ds").await.unwrap(), CreateOutcome::Created);
        assert_eq!(wh.create_dataset("ds").await.unwrap(), CreateOutcome::AlreadyExists);
        assert_eq!(wh.create_table("ds", &table()).await.unwrap(), CreateOutcome::Created);
        assert_eq!(wh.create_table("ds", &table()).await.unwrap(), CreateOutcome::AlreadyExists);
    }

    #[tokio::test]
    async fn test_table_requires_dataset() {
        let wh = InMemoryWarehouse::new();
        let err = wh.create_table("missing", &table()).await.unwrap_err();
        assert!(matches!(err, WarehouseError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_add_column_twice_is_harmless() {
        let wh = InMemoryWarehouse::new();
        assert_ok!(wh.create_dataset("ds").await);
        assert_ok!(wh.create_table("ds", &table()).await);
        let col = ColumnDefinition::new("note", FieldType::String, FieldMode::Nullable);
        assert_ok!(wh.add_column("ds", "events", &col).await);
        assert_ok!(wh.add_column("ds", "events", &col).await);
        let live = wh.list_tables("ds").await.unwrap();
        assert_eq!(live[0].columns, vec!["id".to_string(), "note".to_string()]);
    }

    #[tokio::test]
    async fn test_fault_injection_is_consumed() {
        let wh = InMemoryWarehouse::new();
        wh.inject_fault(
            DdlKind::CreateDataset,
            "ds",
            WarehouseError::Transient("timeout".into()),
            1,
        )
        .await;
        assert_err!(wh.create_dataset("ds").await);
        assert_ok!(wh.create_dataset("ds").await);
    }

    #[tokio::test]
    async fn test_destroy_dataset() {
        let wh = InMemoryWarehouse::new();
        assert_ok!(wh.create_dataset("ds").await);
        assert!(wh.destroy_dataset("ds").await);
        assert!(!wh.dataset_exists("ds").await.unwrap());
    }
}

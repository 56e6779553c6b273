//! Postgres-backed warehouse
//!
//! Datasets map to schemas. Catalog partitioning becomes a BRIN index on the
//! partition column and clustering a b-tree index over the clustering
//! columns; both are created in the same transaction as the table.
//! Materialized views are replaced by drop-and-create inside one transaction.

use super::{CreateOutcome, LiveTable, Warehouse, WarehouseError, WarehouseResult};
use crate::catalog::{ColumnDefinition, FieldMode, FieldType, TableDefinition};
use crate::db::DbPool;
use async_trait::async_trait;
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DbBackend, DbErr, RuntimeErr, Statement, TransactionTrait,
};
use sha2::{Digest, Sha256};
use tracing::debug;

// 23505 shows up when two sessions race to create the same catalog object
const DUPLICATE_OBJECT_CODES: &[&str] = &["42P06", "42P07", "42701", "42710", "23505"];
const MISSING_OBJECT_CODES: &[&str] = &["3F000", "42P01"];
const TRANSIENT_CODES: &[&str] = &["40001", "40P01", "53300", "57P01", "57P02", "57P03"];

/// Warehouse backed by a Postgres database
#[derive(Clone)]
pub struct PgWarehouse {
    pool: DbPool,
}

impl PgWarehouse {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> &DatabaseConnection {
        self.pool.connection()
    }
}

/// Quote an identifier for Postgres
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn qualified(dataset: &str, object: &str) -> String {
    format!("{}.{}", quote_ident(dataset), quote_ident(object))
}

/// Postgres identifiers are limited to 63 bytes. Names that would be cut
/// keep a digest of the full name so two long tables never share an index.
fn index_name(table: &str, suffix: &str) -> String {
    const MAX_IDENT: usize = 63;
    let name = format!("{}__{}", table, suffix);
    if name.len() <= MAX_IDENT {
        return name;
    }
    let digest = hex::encode(Sha256::digest(name.as_bytes()));
    let tag = &digest[..8];
    let mut prefix = name;
    prefix.truncate(MAX_IDENT - tag.len() - 1);
    format!("{}_{}", prefix, tag)
}

fn sql_type(column: &ColumnDefinition) -> String {
    let base = match column.field_type {
        FieldType::String => "TEXT",
        FieldType::Int64 => "BIGINT",
        FieldType::Float64 => "DOUBLE PRECISION",
        FieldType::Numeric => "NUMERIC",
        FieldType::Bool => "BOOLEAN",
        FieldType::Timestamp => "TIMESTAMPTZ",
        FieldType::Datetime => "TIMESTAMP",
        FieldType::Date => "DATE",
        FieldType::Json => "JSONB",
        FieldType::Bytes => "BYTEA",
    };
    match column.mode {
        FieldMode::Repeated => format!("{}[]", base),
        _ => base.to_string(),
    }
}

fn column_ddl(column: &ColumnDefinition) -> String {
    let not_null = if column.mode == FieldMode::Required { " NOT NULL" } else { "" };
    format!("{} {}{}", quote_ident(&column.name), sql_type(column), not_null)
}

/// Statements creating a table and its physical layout
pub(crate) fn create_table_statements(dataset: &str, table: &TableDefinition) -> Vec<String> {
    let target = qualified(dataset, &table.name);
    let columns: Vec<String> = table.columns.iter().map(column_ddl).collect();
    let mut statements = vec![format!("CREATE TABLE {} ({})", target, columns.join(", "))];

    if let Some(partitioning) = &table.partitioning {
        statements.push(format!(
            "CREATE INDEX {} ON {} USING BRIN ({})",
            quote_ident(&index_name(&table.name, "partition")),
            target,
            quote_ident(&partitioning.field)
        ));
    }
    if !table.clustering.is_empty() {
        let fields: Vec<String> = table.clustering.iter().map(|f| quote_ident(f)).collect();
        statements.push(format!(
            "CREATE INDEX {} ON {} ({})",
            quote_ident(&index_name(&table.name, "cluster")),
            target,
            fields.join(", ")
        ));
    }
    if let Some(description) = &table.description {
        statements.push(format!("COMMENT ON TABLE {} IS {}", target, quote_literal(description)));
    }
    statements
}

/// Added columns are always nullable: existing rows have no value for them
pub(crate) fn add_column_statement(dataset: &str, table: &str, column: &ColumnDefinition) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {} {}",
        qualified(dataset, table),
        quote_ident(&column.name),
        sql_type(column)
    )
}

fn sqlstate(err: &DbErr) -> Option<String> {
    match err {
        DbErr::Exec(RuntimeErr::SqlxError(sqlx::Error::Database(db)))
        | DbErr::Query(RuntimeErr::SqlxError(sqlx::Error::Database(db)))
        | DbErr::Conn(RuntimeErr::SqlxError(sqlx::Error::Database(db))) => {
            db.code().map(|c| c.into_owned())
        }
        _ => None,
    }
}

fn is_duplicate_object(err: &DbErr) -> bool {
    sqlstate(err).is_some_and(|code| DUPLICATE_OBJECT_CODES.contains(&code.as_str()))
}

fn map_db_err(err: DbErr) -> WarehouseError {
    if let Some(code) = sqlstate(&err) {
        if TRANSIENT_CODES.contains(&code.as_str()) || code.starts_with("08") {
            return WarehouseError::Transient(err.to_string());
        }
        if MISSING_OBJECT_CODES.contains(&code.as_str()) {
            return WarehouseError::NotFound(err.to_string());
        }
        return WarehouseError::Permanent(err.to_string());
    }
    match &err {
        DbErr::ConnectionAcquire(_)
        | DbErr::Conn(_)
        | DbErr::Exec(RuntimeErr::SqlxError(
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed,
        ))
        | DbErr::Query(RuntimeErr::SqlxError(
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed,
        )) => WarehouseError::Transient(err.to_string()),
        _ => WarehouseError::Permanent(err.to_string()),
    }
}

#[async_trait]
impl Warehouse for PgWarehouse {
    async fn dataset_exists(&self, dataset: &str) -> WarehouseResult<bool> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT 1 AS present FROM information_schema.schemata WHERE schema_name = $1",
            vec![dataset.into()],
        );
        let row = self.conn().query_one(stmt).await.map_err(map_db_err)?;
        Ok(row.is_some())
    }

    async fn create_dataset(&self, dataset: &str) -> WarehouseResult<CreateOutcome> {
        let sql = format!("CREATE SCHEMA {}", quote_ident(dataset));
        match self.conn().execute_unprepared(&sql).await {
            Ok(_) => Ok(CreateOutcome::Created),
            Err(err) if is_duplicate_object(&err) => Ok(CreateOutcome::AlreadyExists),
            Err(err) => Err(map_db_err(err)),
        }
    }

    async fn create_table(
        &self,
        dataset: &str,
        table: &TableDefinition,
    ) -> WarehouseResult<CreateOutcome> {
        let txn = self.conn().begin().await.map_err(map_db_err)?;
        for sql in create_table_statements(dataset, table) {
            debug!(sql = %sql, "Executing DDL");
            if let Err(err) = txn.execute_unprepared(&sql).await {
                let duplicate = is_duplicate_object(&err);
                txn.rollback().await.map_err(map_db_err)?;
                return if duplicate {
                    Ok(CreateOutcome::AlreadyExists)
                } else {
                    Err(map_db_err(err))
                };
            }
        }
        txn.commit().await.map_err(map_db_err)?;
        Ok(CreateOutcome::Created)
    }

    async fn list_tables(&self, dataset: &str) -> WarehouseResult<Vec<LiveTable>> {
        if !self.dataset_exists(dataset).await? {
            return Err(WarehouseError::NotFound(format!("dataset {}", dataset)));
        }

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            SELECT t.table_name::text AS table_name, c.column_name::text AS column_name
            FROM information_schema.tables t
            LEFT JOIN information_schema.columns c
              ON c.table_schema = t.table_schema AND c.table_name = t.table_name
            WHERE t.table_schema = $1 AND t.table_type = 'BASE TABLE'
            ORDER BY t.table_name, c.ordinal_position
            "#,
            vec![dataset.into()],
        );
        let rows = self.conn().query_all(stmt).await.map_err(map_db_err)?;

        let mut tables: Vec<LiveTable> = Vec::new();
        for row in rows {
            let table_name: String = row.try_get("", "table_name").map_err(map_db_err)?;
            let column_name: Option<String> = row.try_get("", "column_name").map_err(map_db_err)?;
            if tables.last().map(|t| t.name.as_str()) != Some(table_name.as_str()) {
                tables.push(LiveTable {
                    name: table_name,
                    columns: Vec::new(),
                });
            }
            if let (Some(column), Some(table)) = (column_name, tables.last_mut()) {
                table.columns.push(column);
            }
        }
        Ok(tables)
    }

    async fn add_column(
        &self,
        dataset: &str,
        table: &str,
        column: &ColumnDefinition,
    ) -> WarehouseResult<()> {
        let sql = add_column_statement(dataset, table, column);
        debug!(sql = %sql, "Executing DDL");
        self.conn()
            .execute_unprepared(&sql)
            .await
            .map(|_| ())
            .map_err(map_db_err)
    }

    async fn create_or_replace_view(
        &self,
        dataset: &str,
        name: &str,
        query: &str,
    ) -> WarehouseResult<()> {
        let target = qualified(dataset, name);
        let txn = self.conn().begin().await.map_err(map_db_err)?;
        txn.execute_unprepared(&format!("DROP MATERIALIZED VIEW IF EXISTS {}", target))
            .await
            .map_err(map_db_err)?;
        txn.execute_unprepared(&format!("CREATE MATERIALIZED VIEW {} AS {}", target, query))
            .await
            .map_err(map_db_err)?;
        txn.commit().await.map_err(map_db_err)
    }

    fn provider(&self) -> &'static str {
        "postgres"
    }
}

//! Schema catalog
//!
//! The catalog is the immutable, versioned description of every table the
//! engine manages, split into two scopes:
//! - `meta`: tables of the shared metadata dataset
//! - `org`: tables and materialized views of each tenant dataset
//!
//! It is loaded once at process start and handed to the diff engine and the
//! sync executor as an `Arc<SchemaCatalog>`. Any defect in a catalog file is
//! a configuration error at load time.

mod definition;

pub use definition::{
    CatalogFile, ColumnDefinition, FieldMode, FieldType, PartitionGranularity, Partitioning,
    TableDefinition, ViewDefinition,
};

use crate::config::CatalogConfig;
use crate::errors::{AppError, Result};
use regex_lite::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::OnceLock;
use tracing::info;

/// Meta tables the engine writes rows into directly
pub const REQUIRED_META_TABLES: &[&str] = &["org_profiles", "org_api_keys", "org_subscriptions"];

/// Placeholders a view query may reference
pub const VIEW_PLACEHOLDERS: &[&str] = &["meta_dataset", "org_dataset", "org_slug"];

/// Maximum clustering fields per table
pub const MAX_CLUSTERING_FIELDS: usize = 4;

const BUILTIN_META: &str = include_str!("../../catalog/meta.json");
const BUILTIN_ORG: &str = include_str!("../../catalog/org.json");

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z_][a-z0-9_]{0,127}$").expect("static regex"))
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([A-Za-z0-9_]*)\}").expect("static regex"))
}

/// Dataset names a view query is rendered against
#[derive(Debug, Clone, Copy)]
pub struct ViewContext<'a> {
    pub meta_dataset: &'a str,
    pub org_dataset: &'a str,
    pub org_slug: &'a str,
}

/// A view query with every placeholder substituted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedView {
    pub name: String,
    pub query: String,
}

/// Validated tables and views of one scope
#[derive(Debug, Clone)]
pub struct CatalogScope {
    name: &'static str,
    version: String,
    tables: BTreeMap<String, TableDefinition>,
    views: Vec<ViewDefinition>,
}

impl CatalogScope {
    /// Validate a parsed catalog file
    pub fn from_file(name: &'static str, file: CatalogFile) -> Result<Self> {
        let mut tables = BTreeMap::new();
        for table in file.tables {
            validate_table(name, &table)?;
            if tables.contains_key(&table.name) {
                return Err(config_error(name, format!("duplicate table {}", table.name)));
            }
            tables.insert(table.name.clone(), table);
        }

        let mut view_names = BTreeSet::new();
        for view in &file.views {
            validate_view(name, view)?;
            if tables.contains_key(&view.name) || !view_names.insert(view.name.clone()) {
                return Err(config_error(name, format!("duplicate view name {}", view.name)));
            }
        }

        Ok(Self {
            name,
            version: file.version,
            tables,
            views: file.views,
        })
    }

    /// Parse and validate a JSON catalog document
    pub fn from_json(name: &'static str, json: &str) -> Result<Self> {
        let file: CatalogFile = serde_json::from_str(json)
            .map_err(|e| config_error(name, format!("unparseable catalog: {}", e)))?;
        Self::from_file(name, file)
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn table(&self, name: &str) -> Option<&TableDefinition> {
        self.tables.get(name)
    }

    /// Tables in name order
    pub fn tables(&self) -> impl Iterator<Item = &TableDefinition> {
        self.tables.values()
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    pub fn views(&self) -> &[ViewDefinition] {
        &self.views
    }

    /// Substitute dataset names and slug into every view query
    pub fn render_views(&self, ctx: &ViewContext<'_>) -> Vec<RenderedView> {
        self.views
            .iter()
            .map(|view| RenderedView {
                name: view.name.clone(),
                query: view
                    .query
                    .replace("{meta_dataset}", ctx.meta_dataset)
                    .replace("{org_dataset}", ctx.org_dataset)
                    .replace("{org_slug}", ctx.org_slug),
            })
            .collect()
    }
}

/// Both catalog scopes
#[derive(Debug, Clone)]
pub struct SchemaCatalog {
    meta: CatalogScope,
    org: CatalogScope,
}

impl SchemaCatalog {
    /// Assemble a catalog from validated scopes
    pub fn new(meta: CatalogScope, org: CatalogScope) -> Result<Self> {
        for required in REQUIRED_META_TABLES {
            if meta.table(required).is_none() {
                return Err(config_error("meta", format!("missing required table {}", required)));
            }
        }
        if !meta.views().is_empty() {
            return Err(config_error("meta", "views are only supported in the org scope"));
        }
        Ok(Self { meta, org })
    }

    /// The catalog compiled into the binary
    pub fn builtin() -> Result<Self> {
        Self::new(
            CatalogScope::from_json("meta", BUILTIN_META)?,
            CatalogScope::from_json("org", BUILTIN_ORG)?,
        )
    }

    /// Load `meta.json` and `org.json` from a directory
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let read = |file: &str| {
            std::fs::read_to_string(dir.join(file)).map_err(|e| AppError::Configuration {
                message: format!("cannot read catalog file {}: {}", dir.join(file).display(), e),
            })
        };
        Self::new(
            CatalogScope::from_json("meta", &read("meta.json")?)?,
            CatalogScope::from_json("org", &read("org.json")?)?,
        )
    }

    /// Load according to configuration
    pub fn load(config: &CatalogConfig) -> Result<Self> {
        let catalog = match &config.path {
            Some(path) => Self::load_dir(path)?,
            None => Self::builtin()?,
        };
        info!(
            meta_version = %catalog.meta.version(),
            org_version = %catalog.org.version(),
            meta_tables = catalog.meta.tables.len(),
            org_tables = catalog.org.tables.len(),
            org_views = catalog.org.views.len(),
            "Schema catalog loaded"
        );
        Ok(catalog)
    }

    pub fn meta(&self) -> &CatalogScope {
        &self.meta
    }

    pub fn org(&self) -> &CatalogScope {
        &self.org
    }
}

fn config_error(scope: &str, message: impl std::fmt::Display) -> AppError {
    AppError::Configuration {
        message: format!("catalog scope {}: {}", scope, message),
    }
}

fn validate_identifier(scope: &str, kind: &str, name: &str) -> Result<()> {
    if identifier_re().is_match(name) {
        Ok(())
    } else {
        Err(config_error(scope, format!("invalid {} name {:?}", kind, name)))
    }
}

fn validate_table(scope: &str, table: &TableDefinition) -> Result<()> {
    validate_identifier(scope, "table", &table.name)?;
    if table.columns.is_empty() {
        return Err(config_error(scope, format!("table {} has no columns", table.name)));
    }

    let mut seen = BTreeSet::new();
    for column in &table.columns {
        validate_identifier(scope, "column", &column.name)?;
        if !seen.insert(column.name.as_str()) {
            return Err(config_error(
                scope,
                format!("table {} repeats column {}", table.name, column.name),
            ));
        }
    }

    if let Some(partitioning) = &table.partitioning {
        match table.column(&partitioning.field) {
            Some(column) if column.field_type.is_temporal() && column.mode != FieldMode::Repeated => {}
            Some(_) => {
                return Err(config_error(
                    scope,
                    format!(
                        "table {} partitions on non-temporal column {}",
                        table.name, partitioning.field
                    ),
                ))
            }
            None => {
                return Err(config_error(
                    scope,
                    format!(
                        "table {} partitions on unknown column {}",
                        table.name, partitioning.field
                    ),
                ))
            }
        }
    }

    if table.clustering.len() > MAX_CLUSTERING_FIELDS {
        return Err(config_error(
            scope,
            format!("table {} has more than {} clustering fields", table.name, MAX_CLUSTERING_FIELDS),
        ));
    }
    for field in &table.clustering {
        if table.column(field).is_none() {
            return Err(config_error(
                scope,
                format!("table {} clusters on unknown column {}", table.name, field),
            ));
        }
    }

    Ok(())
}

fn validate_view(scope: &str, view: &ViewDefinition) -> Result<()> {
    validate_identifier(scope, "view", &view.name)?;
    if view.query.trim().is_empty() {
        return Err(config_error(scope, format!("view {} has an empty query", view.name)));
    }
    for capture in placeholder_re().captures_iter(&view.query) {
        let placeholder = capture.get(1).map(|m| m.as_str()).unwrap_or_default();
        if !VIEW_PLACEHOLDERS.contains(&placeholder) {
            return Err(config_error(
                scope,
                format!("view {} uses unknown placeholder {{{}}}", view.name, placeholder),
            ));
        }
    }
    Ok(())
}

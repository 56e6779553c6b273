//! Schema diff engine
//!
//! Compares a catalog scope with the tables observed in a dataset. The
//! result only names what is missing from the warehouse, plus columns the
//! warehouse has that the catalog does not know about. There is no field for
//! anything to remove, so no caller can turn a diff into a destructive change.

use crate::catalog::CatalogScope;
use crate::warehouse::LiveTable;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Additive difference between the catalog and a live dataset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaDiff {
    /// Catalog tables absent from the dataset
    pub missing_tables: BTreeSet<String>,

    /// Catalog columns absent from tables that do exist
    pub missing_columns: BTreeMap<String, BTreeSet<String>>,

    /// Live columns unknown to the catalog; informational only
    pub extra_columns: BTreeMap<String, BTreeSet<String>>,
}

impl SchemaDiff {
    /// Diff `scope` against `live`.
    ///
    /// A table that is absent only appears in `missing_tables`. Live tables
    /// the catalog does not define are ignored. Output ordering is sorted, so
    /// the order in which the warehouse lists tables or columns never matters.
    pub fn compute(scope: &CatalogScope, live: &[LiveTable]) -> Self {
        let mut observed: HashMap<&str, HashSet<&str>> = HashMap::with_capacity(live.len());
        for table in live {
            observed
                .entry(table.name.as_str())
                .or_default()
                .extend(table.columns.iter().map(String::as_str));
        }

        let mut diff = SchemaDiff::default();
        for table in scope.tables() {
            let Some(live_columns) = observed.get(table.name.as_str()) else {
                diff.missing_tables.insert(table.name.clone());
                continue;
            };

            let missing: BTreeSet<String> = table
                .columns
                .iter()
                .filter(|c| !live_columns.contains(c.name.as_str()))
                .map(|c| c.name.clone())
                .collect();
            if !missing.is_empty() {
                diff.missing_columns.insert(table.name.clone(), missing);
            }

            let extra: BTreeSet<String> = live_columns
                .iter()
                .filter(|name| table.column(name).is_none())
                .map(|name| name.to_string())
                .collect();
            if !extra.is_empty() {
                diff.extra_columns.insert(table.name.clone(), extra);
            }
        }
        diff
    }

    /// True when no table or column is missing; extra columns do not count
    pub fn is_in_sync(&self) -> bool {
        self.missing_tables.is_empty() && self.missing_columns.is_empty()
    }

    pub fn missing_column_count(&self) -> usize {
        self.missing_columns.values().map(BTreeSet::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fixtures;

    fn live(name: &str, columns: &[&str]) -> LiveTable {
        LiveTable {
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }

    fn complete() -> Vec<LiveTable> {
        vec![
            live("cost_data", &["charge_date", "provider", "billed_cost"]),
            live("usage_raw", &["usage_date", "tokens"]),
            live("plans", &["plan_id", "seats"]),
        ]
    }

    #[test]
    fn test_complete_dataset_is_in_sync() {
        let diff = SchemaDiff::compute(&fixtures::org_scope(), &complete());
        assert!(diff.is_in_sync());
        assert_eq!(diff, SchemaDiff::default());
    }

    #[test]
    fn test_missing_table_and_column() {
        // usage_raw absent, plans lacks seats
        let observed = vec![
            live("cost_data", &["charge_date", "provider", "billed_cost"]),
            live("plans", &["plan_id"]),
        ];
        let diff = SchemaDiff::compute(&fixtures::org_scope(), &observed);

        assert!(diff.missing_tables.contains("usage_raw"));
        assert!(diff.missing_columns["plans"].contains("seats"));
        assert!(!diff.missing_columns.contains_key("usage_raw"));
        assert_eq!(diff.missing_column_count(), 1);
        assert!(!diff.is_in_sync());
    }

    #[test]
    fn test_extra_columns_do_not_affect_sync_state() {
        let mut observed = complete();
        observed[0].columns.push("added_by_hand".to_string());
        let diff = SchemaDiff::compute(&fixtures::org_scope(), &observed);

        assert!(diff.is_in_sync());
        assert!(diff.extra_columns["cost_data"].contains("added_by_hand"));
    }

    #[test]
    fn test_unknown_live_tables_are_ignored() {
        let mut observed = complete();
        observed.push(live("scratch", &["a"]));
        let diff = SchemaDiff::compute(&fixtures::org_scope(), &observed);
        assert_eq!(diff, SchemaDiff::default());
    }

    #[test]
    fn test_deterministic_under_reordering() {
        let observed = vec![
            live("plans", &["seats"]),
            live("cost_data", &["extra_b", "provider", "extra_a"]),
        ];
        let mut reversed: Vec<LiveTable> = observed
            .iter()
            .rev()
            .map(|t| {
                let mut t = t.clone();
                t.columns.reverse();
                t
            })
            .collect();
        reversed.rotate_left(1);

        let scope = fixtures::org_scope();
        let a = SchemaDiff::compute(&scope, &observed);
        let b = SchemaDiff::compute(&scope, &reversed);
        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_empty_dataset_reports_only_missing_tables() {
        let diff = SchemaDiff::compute(&fixtures::org_scope(), &[]);
        assert_eq!(diff.missing_tables.len(), 3);
        assert!(diff.missing_columns.is_empty());
        assert!(diff.extra_columns.is_empty());
    }
}

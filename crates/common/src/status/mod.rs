//! Lifecycle status resolution
//!
//! Status is computed from what exists right now and is never stored.

use crate::diff::SchemaDiff;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrgStatus {
    /// The shared dataset does not exist
    NotBootstrapped,
    Synced,
    OutOfSync,
    /// Profile exists but the org dataset is gone
    ProfileOnly,
    NotFound,
}

impl OrgStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrgStatus::NotBootstrapped => "NOT_BOOTSTRAPPED",
            OrgStatus::Synced => "SYNCED",
            OrgStatus::OutOfSync => "OUT_OF_SYNC",
            OrgStatus::ProfileOnly => "PROFILE_ONLY",
            OrgStatus::NotFound => "NOT_FOUND",
        }
    }

    /// Status of the shared store given its diff, `None` when absent
    pub fn for_central(diff: Option<&SchemaDiff>) -> Self {
        match diff {
            None => OrgStatus::NotBootstrapped,
            Some(diff) => Self::from_diff(diff),
        }
    }

    /// Status of an org from profile existence and its dataset diff
    pub fn for_org(profile_exists: bool, diff: Option<&SchemaDiff>) -> Self {
        match (profile_exists, diff) {
            (false, _) => OrgStatus::NotFound,
            (true, None) => OrgStatus::ProfileOnly,
            (true, Some(diff)) => Self::from_diff(diff),
        }
    }

    fn from_diff(diff: &SchemaDiff) -> Self {
        if diff.is_in_sync() {
            OrgStatus::Synced
        } else {
            OrgStatus::OutOfSync
        }
    }
}

impl fmt::Display for OrgStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status together with the diff it was derived from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub status: OrgStatus,
    pub dataset: String,
    pub catalog_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<SchemaDiff>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn out_of_sync() -> SchemaDiff {
        SchemaDiff {
            missing_tables: BTreeSet::from(["t".to_string()]),
            ..Default::default()
        }
    }

    fn only_extras() -> SchemaDiff {
        let mut diff = SchemaDiff::default();
        diff.extra_columns
            .insert("t".to_string(), BTreeSet::from(["manual".to_string()]));
        diff
    }

    #[test]
    fn test_central_status() {
        assert_eq!(OrgStatus::for_central(None), OrgStatus::NotBootstrapped);
        assert_eq!(OrgStatus::for_central(Some(&SchemaDiff::default())), OrgStatus::Synced);
        assert_eq!(OrgStatus::for_central(Some(&out_of_sync())), OrgStatus::OutOfSync);
        assert_eq!(OrgStatus::for_central(Some(&only_extras())), OrgStatus::Synced);
    }

    #[test]
    fn test_org_status() {
        assert_eq!(OrgStatus::for_org(false, None), OrgStatus::NotFound);
        assert_eq!(OrgStatus::for_org(false, Some(&SchemaDiff::default())), OrgStatus::NotFound);
        assert_eq!(OrgStatus::for_org(true, None), OrgStatus::ProfileOnly);
        assert_eq!(OrgStatus::for_org(true, Some(&out_of_sync())), OrgStatus::OutOfSync);
        assert_eq!(OrgStatus::for_org(true, Some(&only_extras())), OrgStatus::Synced);
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(serde_json::to_string(&OrgStatus::ProfileOnly).unwrap(), "\"PROFILE_ONLY\"");
        assert_eq!(OrgStatus::NotBootstrapped.to_string(), "NOT_BOOTSTRAPPED");
    }
}

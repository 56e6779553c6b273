//! In-memory metadata store for tests and local development

use crate::db::models::{ApiKeyRecord, OrgProfile, OrgSubscription};
use crate::db::{InsertOutcome, MetaStore};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct State {
    profiles: BTreeMap<String, OrgProfile>,
    subscriptions: BTreeMap<String, OrgSubscription>,
    api_keys: Vec<ApiKeyRecord>,
    /// hash -> position in `api_keys`
    key_index: HashMap<String, usize>,
}

#[derive(Debug, Default)]
pub struct InMemoryMetaStore {
    state: RwLock<State>,
    writes: AtomicU64,
    fail_writes: AtomicBool,
}

impl InMemoryMetaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows inserted or updated so far
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every subsequent write fail, simulating an unavailable store
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// All key rows of an org, active or not, oldest first
    pub async fn api_key_history(&self, org_slug: &str) -> Vec<ApiKeyRecord> {
        self.state
            .read()
            .await
            .api_keys
            .iter()
            .filter(|k| k.org_slug == org_slug)
            .cloned()
            .collect()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::DatabaseConnection {
                message: "metadata store unavailable".to_string(),
            });
        }
        Ok(())
    }

    fn count_writes(&self, rows: u64) {
        self.writes.fetch_add(rows, Ordering::SeqCst);
    }
}

#[async_trait]
impl MetaStore for InMemoryMetaStore {
    async fn get_profile(&self, org_slug: &str) -> Result<Option<OrgProfile>> {
        Ok(self.state.read().await.profiles.get(org_slug).cloned())
    }

    async fn insert_profile(&self, profile: &OrgProfile) -> Result<InsertOutcome> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        if state.profiles.contains_key(&profile.org_slug) {
            return Ok(InsertOutcome::AlreadyExists);
        }
        state.profiles.insert(profile.org_slug.clone(), profile.clone());
        self.count_writes(1);
        Ok(InsertOutcome::Inserted)
    }

    async fn list_org_slugs(&self) -> Result<Vec<String>> {
        Ok(self.state.read().await.profiles.keys().cloned().collect())
    }

    async fn insert_subscription(&self, subscription: &OrgSubscription) -> Result<InsertOutcome> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        if state.subscriptions.contains_key(&subscription.org_slug) {
            return Ok(InsertOutcome::AlreadyExists);
        }
        state
            .subscriptions
            .insert(subscription.org_slug.clone(), subscription.clone());
        self.count_writes(1);
        Ok(InsertOutcome::Inserted)
    }

    async fn get_subscription(&self, org_slug: &str) -> Result<Option<OrgSubscription>> {
        Ok(self.state.read().await.subscriptions.get(org_slug).cloned())
    }

    async fn activate_api_key(&self, record: &ApiKeyRecord) -> Result<Vec<String>> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        let now = Utc::now();

        let mut deactivated = Vec::new();
        for key in state
            .api_keys
            .iter_mut()
            .filter(|k| k.org_slug == record.org_slug && k.is_active)
        {
            key.is_active = false;
            key.deactivated_at = Some(now);
            deactivated.push(key.org_api_key_id.clone());
        }

        let mut active = record.clone();
        active.is_active = true;
        active.deactivated_at = None;
        let position = state.api_keys.len();
        state.key_index.insert(active.org_api_key_hash.clone(), position);
        state.api_keys.push(active);

        self.count_writes(deactivated.len() as u64 + 1);
        Ok(deactivated)
    }

    async fn find_active_api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKeyRecord>> {
        let state = self.state.read().await;
        Ok(state
            .key_index
            .get(key_hash)
            .and_then(|&i| state.api_keys.get(i))
            .filter(|k| k.is_active)
            .cloned())
    }

    async fn get_active_api_key(&self, org_slug: &str) -> Result<Option<ApiKeyRecord>> {
        let state = self.state.read().await;
        Ok(state
            .api_keys
            .iter()
            .rev()
            .find(|k| k.org_slug == org_slug && k.is_active)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_err;

    fn profile(slug: &str) -> OrgProfile {
        OrgProfile {
            org_slug: slug.to_string(),
            company_name: "Acme".to_string(),
            admin_email: "ops@acme.io".to_string(),
            org_dataset_id: format!("{}_prod", slug),
            status: OrgProfile::STATUS_ACTIVE.to_string(),
            subscription_plan: "STARTER".to_string(),
            default_currency: "USD".to_string(),
            default_timezone: "UTC".to_string(),
            fiscal_year_start_month: 1,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    fn key(slug: &str, id: &str, hash: &str) -> ApiKeyRecord {
        ApiKeyRecord {
            org_api_key_id: id.to_string(),
            org_slug: slug.to_string(),
            org_api_key_hash: hash.to_string(),
            encrypted_org_api_key: vec![1, 2, 3],
            is_active: true,
            created_at: Utc::now(),
            deactivated_at: None,
        }
    }

    #[tokio::test]
    async fn test_profile_insert_does_not_overwrite() {
        let store = InMemoryMetaStore::new();
        assert_eq!(store.insert_profile(&profile("acme")).await.unwrap(), InsertOutcome::Inserted);

        let mut other = profile("acme");
        other.company_name = "Impostor".to_string();
        assert_eq!(store.insert_profile(&other).await.unwrap(), InsertOutcome::AlreadyExists);

        let stored = store.get_profile("acme").await.unwrap().unwrap();
        assert_eq!(stored.company_name, "Acme");
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_activate_deactivates_previous_key() {
        let store = InMemoryMetaStore::new();
        assert!(store.activate_api_key(&key("acme", "k1", "h1")).await.unwrap().is_empty());
        let deactivated = store.activate_api_key(&key("acme", "k2", "h2")).await.unwrap();
        assert_eq!(deactivated, vec!["k1".to_string()]);

        assert!(store.find_active_api_key_by_hash("h1").await.unwrap().is_none());
        let active = store.get_active_api_key("acme").await.unwrap().unwrap();
        assert_eq!(active.org_api_key_id, "k2");

        let history = store.api_key_history("acme").await;
        assert_eq!(history.iter().filter(|k| k.is_active).count(), 1);
        assert!(history[0].deactivated_at.is_some());
    }

    #[tokio::test]
    async fn test_keys_are_scoped_per_org() {
        let store = InMemoryMetaStore::new();
        store.activate_api_key(&key("acme", "k1", "h1")).await.unwrap();
        store.activate_api_key(&key("globex", "k2", "h2")).await.unwrap();
        assert!(store.find_active_api_key_by_hash("h1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_writes_leave_no_rows() {
        let store = InMemoryMetaStore::new();
        store.set_fail_writes(true);
        assert_err!(store.insert_profile(&profile("acme")).await);
        assert!(store.list_org_slugs().await.unwrap().is_empty());
        assert_eq!(store.write_count(), 0);
    }
}

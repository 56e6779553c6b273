//! Credential manager for organization API keys
//!
//! A plaintext key exists only inside `PlaintextApiKey`, which is returned
//! once from `generate`/`rotate` (and from the admin-only `recover`). The
//! store holds the SHA-256 hash for lookups and the KMS ciphertext for
//! recovery. Validation never touches KMS.

use crate::auth::{generate_api_key, hash_api_key, looks_like_org_key};
use crate::db::{ApiKeyRecord, MetaStore};
use crate::errors::{AppError, Result};
use crate::kms::Kms;
use crate::metrics;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// A plaintext API key. Never printed, logged or serialized.
pub struct PlaintextApiKey(String);

impl PlaintextApiKey {
    /// The key itself, for handing back to the caller exactly once
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for PlaintextApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PlaintextApiKey(<redacted>)")
    }
}

/// A freshly issued key
#[derive(Debug)]
pub struct IssuedApiKey {
    pub org_api_key_id: String,
    pub org_slug: String,
    pub created_at: DateTime<Utc>,
    pub plaintext: PlaintextApiKey,
    /// Keys switched off by this issue
    pub deactivated_key_ids: Vec<String>,
}

/// Identity established by a valid org key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedKey {
    pub org_slug: String,
    pub org_api_key_id: String,
}

#[derive(Clone)]
pub struct CredentialManager {
    store: Arc<dyn MetaStore>,
    kms: Arc<dyn Kms>,
}

impl CredentialManager {
    pub fn new(store: Arc<dyn MetaStore>, kms: Arc<dyn Kms>) -> Self {
        Self { store, kms }
    }

    /// Issue the org's key, replacing any active one
    #[instrument(skip(self))]
    pub async fn generate(&self, org_slug: &str) -> Result<IssuedApiKey> {
        let plaintext = PlaintextApiKey(generate_api_key(org_slug));
        let ciphertext = self.kms.encrypt(plaintext.expose().as_bytes()).await?;

        let record = ApiKeyRecord {
            org_api_key_id: Uuid::new_v4().to_string(),
            org_slug: org_slug.to_string(),
            org_api_key_hash: hash_api_key(plaintext.expose()),
            encrypted_org_api_key: ciphertext,
            is_active: true,
            created_at: Utc::now(),
            deactivated_at: None,
        };
        let deactivated_key_ids = self.store.activate_api_key(&record).await?;

        info!(
            key_id = %record.org_api_key_id,
            deactivated = deactivated_key_ids.len(),
            kms = self.kms.provider(),
            "Issued org API key"
        );
        Ok(IssuedApiKey {
            org_api_key_id: record.org_api_key_id,
            org_slug: record.org_slug,
            created_at: record.created_at,
            plaintext,
            deactivated_key_ids,
        })
    }

    /// Replace the org's active key. The old key stops validating in the
    /// same store write that activates the new one.
    #[instrument(skip(self))]
    pub async fn rotate(&self, org_slug: &str) -> Result<IssuedApiKey> {
        if self.store.get_profile(org_slug).await?.is_none() {
            return Err(AppError::org_not_found(org_slug));
        }
        let issued = self.generate(org_slug).await?;
        if issued.deactivated_key_ids.is_empty() {
            warn!("Rotated an org that had no active key");
        }
        Ok(issued)
    }

    /// Resolve a presented key by hash lookup
    pub async fn validate(&self, presented: &str) -> Result<Option<ValidatedKey>> {
        if !looks_like_org_key(presented) {
            metrics::record_key_validation(false);
            return Ok(None);
        }
        let found = self
            .store
            .find_active_api_key_by_hash(&hash_api_key(presented))
            .await?
            .map(|record| ValidatedKey {
                org_slug: record.org_slug,
                org_api_key_id: record.org_api_key_id,
            });
        metrics::record_key_validation(found.is_some());
        Ok(found)
    }

    /// Decrypt the org's active key. Admin recovery only.
    #[instrument(skip(self))]
    pub async fn recover(&self, org_slug: &str) -> Result<PlaintextApiKey> {
        let record = self
            .store
            .get_active_api_key(org_slug)
            .await?
            .ok_or_else(|| AppError::NotFound {
                resource_type: "active api key".to_string(),
                id: org_slug.to_string(),
            })?;

        let bytes = self.kms.decrypt(&record.encrypted_org_api_key).await?;
        let plaintext = String::from_utf8(bytes).map_err(|_| AppError::Kms {
            message: "decrypted key is not valid UTF-8".to_string(),
        })?;
        if hash_api_key(&plaintext) != record.org_api_key_hash {
            return Err(AppError::Kms {
                message: "decrypted key does not match the stored hash".to_string(),
            });
        }

        warn!(key_id = %record.org_api_key_id, "Recovered org API key plaintext");
        Ok(PlaintextApiKey(plaintext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{InMemoryMetaStore, OrgProfile};
    use crate::kms::MockKms;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts decrypt calls so tests can prove validation never decrypts
    #[derive(Default)]
    struct CountingKms {
        inner: MockKms,
        decrypts: AtomicUsize,
    }

    #[async_trait]
    impl Kms for CountingKms {
        async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
            self.inner.encrypt(plaintext).await
        }

        async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
            self.decrypts.fetch_add(1, Ordering::SeqCst);
            self.inner.decrypt(ciphertext).await
        }

        fn provider(&self) -> &'static str {
            "counting"
        }
    }

    async fn setup() -> (Arc<InMemoryMetaStore>, Arc<CountingKms>, CredentialManager) {
        let store = Arc::new(InMemoryMetaStore::new());
        store
            .insert_profile(&OrgProfile {
                org_slug: "acme_test".to_string(),
                company_name: "Acme Test".to_string(),
                admin_email: "a@x.com".to_string(),
                org_dataset_id: "acme_test_prod".to_string(),
                status: OrgProfile::STATUS_ACTIVE.to_string(),
                subscription_plan: "STARTER".to_string(),
                default_currency: "USD".to_string(),
                default_timezone: "UTC".to_string(),
                fiscal_year_start_month: 1,
                created_at: Utc::now(),
                updated_at: None,
            })
            .await
            .unwrap();
        let kms = Arc::new(CountingKms::default());
        let manager = CredentialManager::new(store.clone(), kms.clone());
        (store, kms, manager)
    }

    #[tokio::test]
    async fn test_generate_format_and_storage() {
        let (store, _kms, manager) = setup().await;
        let issued = manager.generate("acme_test").await.unwrap();

        let key = issued.plaintext.expose();
        let random = key.strip_prefix("acme_test_api_").unwrap();
        assert_eq!(random.len(), 16);

        let stored = store.get_active_api_key("acme_test").await.unwrap().unwrap();
        assert_eq!(stored.org_api_key_hash, hash_api_key(key));
        assert!(!String::from_utf8_lossy(&stored.encrypted_org_api_key).contains(key));
        assert!(!format!("{:?}", issued).contains(key));
    }

    #[tokio::test]
    async fn test_validate_never_decrypts() {
        let (_store, kms, manager) = setup().await;
        let issued = manager.generate("acme_test").await.unwrap();

        let validated = manager.validate(issued.plaintext.expose()).await.unwrap().unwrap();
        assert_eq!(validated.org_slug, "acme_test");
        assert!(manager.validate("acme_test_api_0000000000000000").await.unwrap().is_none());
        assert!(manager.validate("garbage").await.unwrap().is_none());
        assert_eq!(kms.decrypts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rotate_invalidates_previous_key() {
        let (store, _kms, manager) = setup().await;
        let first = manager.generate("acme_test").await.unwrap();
        let second = manager.rotate("acme_test").await.unwrap();

        assert_eq!(second.deactivated_key_ids, vec![first.org_api_key_id.clone()]);
        assert!(manager.validate(first.plaintext.expose()).await.unwrap().is_none());
        assert!(manager.validate(second.plaintext.expose()).await.unwrap().is_some());

        let history = store.api_key_history("acme_test").await;
        assert_eq!(history.len(), 2);
        assert_eq!(history.iter().filter(|k| k.is_active).count(), 1);
    }

    #[tokio::test]
    async fn test_rotate_unknown_org() {
        let (_store, _kms, manager) = setup().await;
        let err = manager.rotate("nobody_here").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_recover_decrypts_active_key() {
        let (_store, kms, manager) = setup().await;
        let issued = manager.generate("acme_test").await.unwrap();
        let recovered = manager.recover("acme_test").await.unwrap();
        assert_eq!(recovered.expose(), issued.plaintext.expose());
        assert_eq!(kms.decrypts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_plaintext_debug_is_redacted() {
        let key = PlaintextApiKey("acme_api_SECRETSECRETSECR".to_string());
        assert_eq!(format!("{:?}", key), "PlaintextApiKey(<redacted>)");
    }
}

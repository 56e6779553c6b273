//! Service wiring
//!
//! Builds the catalog, warehouse, metadata store, KMS client and the
//! services on top of them from one `AppConfig`. The Postgres warehouse and
//! metadata store share a single connection pool.

use crate::catalog::SchemaCatalog;
use crate::central::CentralStore;
use crate::config::AppConfig;
use crate::credentials::CredentialManager;
use crate::db::{DbPool, InMemoryMetaStore, MetaStore, PgMetaStore};
use crate::errors::{AppError, Result};
use crate::kms::{create_kms, Kms};
use crate::provisioner::Provisioner;
use crate::sync::SyncExecutor;
use crate::warehouse::{InMemoryWarehouse, PgWarehouse, Warehouse};
use std::sync::Arc;
use tracing::info;

/// Every service a binary needs, ready to share across tasks
#[derive(Clone)]
pub struct Platform {
    pub catalog: Arc<SchemaCatalog>,
    pub warehouse: Arc<dyn Warehouse>,
    pub store: Arc<dyn MetaStore>,
    pub central: CentralStore,
    pub provisioner: Provisioner,
    pub credentials: CredentialManager,
    pool: Option<DbPool>,
}

impl Platform {
    /// Connect to the configured backends
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let catalog = Arc::new(SchemaCatalog::load(&config.catalog)?);
        let kms = create_kms(&config.kms).await?;

        let (warehouse, store, pool): (Arc<dyn Warehouse>, Arc<dyn MetaStore>, Option<DbPool>) =
            match config.warehouse.provider.as_str() {
                "postgres" => {
                    let pool = DbPool::new(&config.database).await?;
                    (
                        Arc::new(PgWarehouse::new(pool.clone())),
                        Arc::new(PgMetaStore::new(pool.clone(), &config.warehouse.meta_dataset)),
                        Some(pool),
                    )
                }
                "memory" => {
                    tracing::warn!("Using in-memory warehouse; nothing survives a restart");
                    (
                        Arc::new(InMemoryWarehouse::new()),
                        Arc::new(InMemoryMetaStore::new()),
                        None,
                    )
                }
                other => {
                    return Err(AppError::Configuration {
                        message: format!("unknown warehouse provider: {}", other),
                    })
                }
            };

        info!(
            warehouse = warehouse.provider(),
            kms = kms.provider(),
            meta_dataset = %config.warehouse.meta_dataset,
            "Platform initialized"
        );
        Ok(Self::assemble(config, catalog, warehouse, store, kms, pool))
    }

    /// Wire services over already-built backends
    pub fn assemble(
        config: &AppConfig,
        catalog: Arc<SchemaCatalog>,
        warehouse: Arc<dyn Warehouse>,
        store: Arc<dyn MetaStore>,
        kms: Arc<dyn Kms>,
        pool: Option<DbPool>,
    ) -> Self {
        let executor = SyncExecutor::new(warehouse.clone(), config.retry_delay());
        let central = CentralStore::new(
            catalog.clone(),
            executor.clone(),
            config.warehouse.meta_dataset.clone(),
        );
        let credentials = CredentialManager::new(store.clone(), kms);
        let provisioner = Provisioner::new(
            catalog.clone(),
            executor,
            central.clone(),
            store.clone(),
            credentials.clone(),
            config.warehouse.org_dataset_suffix.clone(),
        );

        Self {
            catalog,
            warehouse,
            store,
            central,
            provisioner,
            credentials,
            pool,
        }
    }

    /// Check the backing database, when there is one
    pub async fn ping(&self) -> Result<()> {
        match &self.pool {
            Some(pool) => pool.ping().await,
            None => Ok(()),
        }
    }
}

//! Postgres-backed metadata store
//!
//! All rows live in the shared metadata schema. Statements are raw SQL
//! because the schema name is configuration, not a compile-time constant.
//! Writes that must be race-free take a transaction-scoped advisory lock
//! keyed on the org slug.

use crate::db::models::{ApiKeyRecord, OrgProfile, OrgSubscription};
use crate::db::{DbPool, InsertOutcome, MetaStore};
use crate::errors::Result;
use crate::warehouse::quote_ident;
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend, FromQueryResult,
    Statement, TransactionTrait,
};
use tracing::debug;

const PROFILE_COLUMNS: &str = "org_slug, company_name, admin_email, org_dataset_id, status, \
     subscription_plan, default_currency, default_timezone, fiscal_year_start_month, \
     created_at, updated_at";

const SUBSCRIPTION_COLUMNS: &str = "subscription_id, org_slug, plan_name, status, seat_limit, \
     providers_limit, daily_pipeline_limit, monthly_pipeline_limit, concurrent_pipeline_limit, \
     created_at, updated_at";

const API_KEY_COLUMNS: &str = "org_api_key_id, org_slug, org_api_key_hash, \
     encrypted_org_api_key, is_active, created_at, deactivated_at";

/// Metadata store over the shared Postgres schema
#[derive(Clone)]
pub struct PgMetaStore {
    pool: DbPool,
    meta_dataset: String,
}

impl PgMetaStore {
    pub fn new(pool: DbPool, meta_dataset: impl Into<String>) -> Self {
        Self {
            pool,
            meta_dataset: meta_dataset.into(),
        }
    }

    fn conn(&self) -> &DatabaseConnection {
        self.pool.connection()
    }

    fn table(&self, name: &str) -> String {
        format!("{}.{}", quote_ident(&self.meta_dataset), quote_ident(name))
    }

    /// Serialize writers touching the same org until the transaction ends
    async fn lock_org(&self, txn: &DatabaseTransaction, scope: &str, org_slug: &str) -> Result<()> {
        let key = format!("{}:{}:{}", self.meta_dataset, scope, org_slug);
        txn.execute(Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT pg_advisory_xact_lock(hashtext($1))",
            vec![key.into()],
        ))
        .await?;
        Ok(())
    }

    async fn row_exists(
        &self,
        txn: &DatabaseTransaction,
        table: &str,
        org_slug: &str,
    ) -> Result<bool> {
        let sql = format!("SELECT 1 AS present FROM {} WHERE org_slug = $1 LIMIT 1", self.table(table));
        let row = txn
            .query_one(Statement::from_sql_and_values(
                DbBackend::Postgres,
                &sql,
                vec![org_slug.into()],
            ))
            .await?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl MetaStore for PgMetaStore {
    async fn get_profile(&self, org_slug: &str) -> Result<Option<OrgProfile>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE org_slug = $1",
            PROFILE_COLUMNS,
            self.table("org_profiles")
        );
        let profile = OrgProfile::find_by_statement(Statement::from_sql_and_values(
            DbBackend::Postgres,
            &sql,
            vec![org_slug.into()],
        ))
        .one(self.conn())
        .await?;
        Ok(profile)
    }

    async fn insert_profile(&self, profile: &OrgProfile) -> Result<InsertOutcome> {
        let txn = self.conn().begin().await?;
        self.lock_org(&txn, "org_profiles", &profile.org_slug).await?;

        if self.row_exists(&txn, "org_profiles", &profile.org_slug).await? {
            txn.rollback().await?;
            return Ok(InsertOutcome::AlreadyExists);
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            self.table("org_profiles"),
            PROFILE_COLUMNS
        );
        txn.execute(Statement::from_sql_and_values(
            DbBackend::Postgres,
            &sql,
            vec![
                profile.org_slug.clone().into(),
                profile.company_name.clone().into(),
                profile.admin_email.clone().into(),
                profile.org_dataset_id.clone().into(),
                profile.status.clone().into(),
                profile.subscription_plan.clone().into(),
                profile.default_currency.clone().into(),
                profile.default_timezone.clone().into(),
                profile.fiscal_year_start_month.into(),
                profile.created_at.into(),
                profile.updated_at.into(),
            ],
        ))
        .await?;
        txn.commit().await?;

        debug!(org_slug = %profile.org_slug, "Inserted org profile");
        Ok(InsertOutcome::Inserted)
    }

    async fn list_org_slugs(&self) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT org_slug FROM {} ORDER BY org_slug",
            self.table("org_profiles")
        );
        let rows = self
            .conn()
            .query_all(Statement::from_string(DbBackend::Postgres, sql))
            .await?;

        let mut slugs = Vec::with_capacity(rows.len());
        for row in rows {
            slugs.push(row.try_get::<String>("", "org_slug")?);
        }
        Ok(slugs)
    }

    async fn insert_subscription(&self, subscription: &OrgSubscription) -> Result<InsertOutcome> {
        let txn = self.conn().begin().await?;
        self.lock_org(&txn, "org_subscriptions", &subscription.org_slug).await?;

        if self.row_exists(&txn, "org_subscriptions", &subscription.org_slug).await? {
            txn.rollback().await?;
            return Ok(InsertOutcome::AlreadyExists);
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            self.table("org_subscriptions"),
            SUBSCRIPTION_COLUMNS
        );
        txn.execute(Statement::from_sql_and_values(
            DbBackend::Postgres,
            &sql,
            vec![
                subscription.subscription_id.clone().into(),
                subscription.org_slug.clone().into(),
                subscription.plan_name.clone().into(),
                subscription.status.clone().into(),
                subscription.seat_limit.into(),
                subscription.providers_limit.into(),
                subscription.daily_pipeline_limit.into(),
                subscription.monthly_pipeline_limit.into(),
                subscription.concurrent_pipeline_limit.into(),
                subscription.created_at.into(),
                subscription.updated_at.into(),
            ],
        ))
        .await?;
        txn.commit().await?;
        Ok(InsertOutcome::Inserted)
    }

    async fn get_subscription(&self, org_slug: &str) -> Result<Option<OrgSubscription>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE org_slug = $1 ORDER BY created_at LIMIT 1",
            SUBSCRIPTION_COLUMNS,
            self.table("org_subscriptions")
        );
        let subscription = OrgSubscription::find_by_statement(Statement::from_sql_and_values(
            DbBackend::Postgres,
            &sql,
            vec![org_slug.into()],
        ))
        .one(self.conn())
        .await?;
        Ok(subscription)
    }

    async fn activate_api_key(&self, record: &ApiKeyRecord) -> Result<Vec<String>> {
        let table = self.table("org_api_keys");
        let txn = self.conn().begin().await?;
        self.lock_org(&txn, "org_api_keys", &record.org_slug).await?;

        let deactivate = format!(
            "UPDATE {} SET is_active = FALSE, deactivated_at = $2 \
             WHERE org_slug = $1 AND is_active RETURNING org_api_key_id",
            table
        );
        let rows = txn
            .query_all(Statement::from_sql_and_values(
                DbBackend::Postgres,
                &deactivate,
                vec![record.org_slug.clone().into(), Utc::now().into()],
            ))
            .await?;
        let mut deactivated = Vec::with_capacity(rows.len());
        for row in rows {
            deactivated.push(row.try_get::<String>("", "org_api_key_id")?);
        }

        let insert = format!(
            "INSERT INTO {} ({}) VALUES ($1, $2, $3, $4, TRUE, $5, NULL)",
            table, API_KEY_COLUMNS
        );
        txn.execute(Statement::from_sql_and_values(
            DbBackend::Postgres,
            &insert,
            vec![
                record.org_api_key_id.clone().into(),
                record.org_slug.clone().into(),
                record.org_api_key_hash.clone().into(),
                record.encrypted_org_api_key.clone().into(),
                record.created_at.into(),
            ],
        ))
        .await?;
        txn.commit().await?;

        debug!(
            org_slug = %record.org_slug,
            key_id = %record.org_api_key_id,
            deactivated = deactivated.len(),
            "Activated org API key"
        );
        Ok(deactivated)
    }

    async fn find_active_api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKeyRecord>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE org_api_key_hash = $1 AND is_active LIMIT 1",
            API_KEY_COLUMNS,
            self.table("org_api_keys")
        );
        let record = ApiKeyRecord::find_by_statement(Statement::from_sql_and_values(
            DbBackend::Postgres,
            &sql,
            vec![key_hash.into()],
        ))
        .one(self.conn())
        .await?;
        Ok(record)
    }

    async fn get_active_api_key(&self, org_slug: &str) -> Result<Option<ApiKeyRecord>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE org_slug = $1 AND is_active \
             ORDER BY created_at DESC LIMIT 1",
            API_KEY_COLUMNS,
            self.table("org_api_keys")
        );
        let record = ApiKeyRecord::find_by_statement(Statement::from_sql_and_values(
            DbBackend::Postgres,
            &sql,
            vec![org_slug.into()],
        ))
        .one(self.conn())
        .await?;
        Ok(record)
    }
}

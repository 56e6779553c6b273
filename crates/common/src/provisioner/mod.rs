//! Tenant provisioner
//!
//! Owns the lifecycle of organization datasets: onboarding, dry runs,
//! status and sync. Syncing an org whose dataset has disappeared rebuilds
//! the dataset, its tables and views while leaving the profile,
//! subscription and API key untouched.

mod plans;
mod request;

pub use plans::{PlanLimits, SubscriptionPlan};
pub use request::{
    OnboardRequest, DEFAULT_CURRENCY, DEFAULT_TIMEZONE, FISCAL_YEAR_START_MONTHS,
    SUPPORTED_CURRENCIES,
};

use crate::catalog::{RenderedView, SchemaCatalog, ViewContext};
use crate::central::CentralStore;
use crate::credentials::{CredentialManager, PlaintextApiKey};
use crate::db::{InsertOutcome, MetaStore, OrgProfile, OrgSubscription};
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::slug;
use crate::status::{OrgStatus, StatusReport};
use crate::sync::{SyncExecutor, SyncOptions, SyncReport};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Result of a successful onboarding
#[derive(Debug)]
pub struct OnboardResult {
    pub org_slug: String,
    pub org_dataset_id: String,
    pub plan: SubscriptionPlan,
    pub limits: PlanLimits,
    pub org_api_key_id: String,
    /// Shown to the caller once; not retrievable afterwards
    pub api_key: PlaintextApiKey,
    pub sync: SyncReport,
    pub status: OrgStatus,
}

/// What onboarding would do, computed without writing anything
#[derive(Debug, Clone, Serialize)]
pub struct DryrunResult {
    pub org_slug: String,
    pub org_dataset_id: String,
    pub plan: SubscriptionPlan,
    pub limits: PlanLimits,
    pub default_currency: String,
    pub default_timezone: String,
    pub fiscal_year_start_month: u32,
    pub catalog_version: String,
    pub tables: Vec<String>,
    pub views: Vec<String>,
    /// The dataset name is taken even though no profile claims it
    pub dataset_exists: bool,
}

/// Result of syncing one org
#[derive(Debug, Clone, Serialize)]
pub struct OrgSyncReport {
    pub org_slug: String,
    /// The dataset was missing and has been rebuilt
    pub recovered: bool,
    #[serde(flatten)]
    pub report: SyncReport,
}

#[derive(Clone)]
pub struct Provisioner {
    catalog: Arc<SchemaCatalog>,
    executor: SyncExecutor,
    central: CentralStore,
    store: Arc<dyn MetaStore>,
    credentials: CredentialManager,
    dataset_suffix: String,
}

impl Provisioner {
    pub fn new(
        catalog: Arc<SchemaCatalog>,
        executor: SyncExecutor,
        central: CentralStore,
        store: Arc<dyn MetaStore>,
        credentials: CredentialManager,
        dataset_suffix: impl Into<String>,
    ) -> Self {
        Self {
            catalog,
            executor,
            central,
            store,
            credentials,
            dataset_suffix: dataset_suffix.into(),
        }
    }

    /// `{org_slug}{suffix}`, e.g. `acme_prod`
    pub fn org_dataset_id(&self, org_slug: &str) -> String {
        format!("{}{}", org_slug, self.dataset_suffix)
    }

    fn views_for(&self, org_slug: &str, org_dataset: &str) -> Vec<RenderedView> {
        self.catalog.org().render_views(&ViewContext {
            meta_dataset: self.central.dataset(),
            org_dataset,
            org_slug,
        })
    }

    async fn require_bootstrapped(&self) -> Result<()> {
        if self.central.is_bootstrapped().await? {
            Ok(())
        } else {
            Err(AppError::NotBootstrapped {
                dataset: self.central.dataset().to_string(),
            })
        }
    }

    /// Checks shared by onboarding and dry runs; reads only
    async fn preflight(&self, request: &OnboardRequest) -> Result<()> {
        request.check()?;
        self.require_bootstrapped().await?;
        if self.store.get_profile(&request.org_slug).await?.is_some() {
            return Err(duplicate(&request.org_slug));
        }
        Ok(())
    }

    /// Create a new organization and return its API key once.
    ///
    /// Nothing is written until validation, the bootstrap check and the
    /// duplicate check pass. After the profile exists, dataset problems are
    /// reported in `sync` instead of failing the call.
    #[instrument(skip(self, request), fields(org_slug = %request.org_slug, plan = %request.plan))]
    pub async fn onboard(&self, request: &OnboardRequest) -> Result<OnboardResult> {
        if let Err(e) = self.preflight(request).await {
            metrics::record_onboarding("rejected");
            return Err(e);
        }

        let org_slug = request.org_slug.as_str();
        let org_dataset_id = self.org_dataset_id(org_slug);
        let now = Utc::now();

        let profile = OrgProfile {
            org_slug: org_slug.to_string(),
            company_name: request.company_name.trim().to_string(),
            admin_email: request.admin_email.clone(),
            org_dataset_id: org_dataset_id.clone(),
            status: OrgProfile::STATUS_ACTIVE.to_string(),
            subscription_plan: request.plan.as_str().to_string(),
            default_currency: request.currency().to_string(),
            default_timezone: request.timezone().to_string(),
            fiscal_year_start_month: i64::from(request.fiscal_year_start_month),
            created_at: now,
            updated_at: None,
        };
        if self.store.insert_profile(&profile).await? == InsertOutcome::AlreadyExists {
            // Lost a race with a concurrent onboarding of the same slug
            metrics::record_onboarding("rejected");
            return Err(duplicate(org_slug));
        }

        let limits = request.plan.limits();
        let subscription = OrgSubscription {
            subscription_id: Uuid::new_v4().to_string(),
            org_slug: org_slug.to_string(),
            plan_name: request.plan.as_str().to_string(),
            status: OrgProfile::STATUS_ACTIVE.to_string(),
            seat_limit: limits.seat_limit,
            providers_limit: limits.providers_limit,
            daily_pipeline_limit: limits.daily_pipeline_limit,
            monthly_pipeline_limit: limits.monthly_pipeline_limit,
            concurrent_pipeline_limit: limits.concurrent_pipeline_limit,
            created_at: now,
            updated_at: None,
        };
        let issued = match self.persist_subscription_and_key(&subscription).await {
            Ok(issued) => issued,
            Err(e) => {
                error!(error = %e, "Onboarding stopped after profile creation");
                metrics::record_onboarding("failed");
                return Err(e);
            }
        };

        let views = self.views_for(org_slug, &org_dataset_id);
        let report = self
            .executor
            .run(&org_dataset_id, self.catalog.org(), &views, SyncOptions::default())
            .await;

        let status = self.status(org_slug).await.map(|s| s.status).unwrap_or_else(|e| {
            warn!(error = %e, "Could not read status after onboarding");
            OrgStatus::OutOfSync
        });
        let outcome = if report.has_failures() { "partial" } else { "success" };
        metrics::record_onboarding(outcome);
        info!(
            dataset = %org_dataset_id,
            tables = report.tables_created.len(),
            views = report.views_recreated.len(),
            %status,
            "Onboarded organization"
        );

        Ok(OnboardResult {
            org_slug: org_slug.to_string(),
            org_dataset_id,
            plan: request.plan,
            limits,
            org_api_key_id: issued.org_api_key_id,
            api_key: issued.plaintext,
            sync: report,
            status,
        })
    }

    async fn persist_subscription_and_key(
        &self,
        subscription: &OrgSubscription,
    ) -> Result<crate::credentials::IssuedApiKey> {
        self.store.insert_subscription(subscription).await?;
        self.credentials.generate(&subscription.org_slug).await
    }

    /// Everything `onboard` would check and create, without writing
    #[instrument(skip(self, request), fields(org_slug = %request.org_slug))]
    pub async fn dryrun(&self, request: &OnboardRequest) -> Result<DryrunResult> {
        self.preflight(request).await?;

        let org_dataset_id = self.org_dataset_id(&request.org_slug);
        let dataset_exists = self.executor.warehouse().dataset_exists(&org_dataset_id).await?;
        let org = self.catalog.org();
        Ok(DryrunResult {
            org_slug: request.org_slug.clone(),
            org_dataset_id,
            plan: request.plan,
            limits: request.plan.limits(),
            default_currency: request.currency().to_string(),
            default_timezone: request.timezone().to_string(),
            fiscal_year_start_month: request.fiscal_year_start_month,
            catalog_version: org.version().to_string(),
            tables: org.table_names(),
            views: org.views().iter().map(|v| v.name.clone()).collect(),
            dataset_exists,
        })
    }

    /// Lifecycle status; an unknown org is the `NOT_FOUND` value, not an error
    #[instrument(skip(self))]
    pub async fn status(&self, org_slug: &str) -> Result<StatusReport> {
        slug::validate(org_slug)?;
        let org_dataset_id = self.org_dataset_id(org_slug);
        let report = |status, diff| StatusReport {
            status,
            dataset: org_dataset_id.clone(),
            catalog_version: self.catalog.org().version().to_string(),
            diff,
        };

        if !self.central.is_bootstrapped().await? {
            return Ok(report(OrgStatus::NotBootstrapped, None));
        }
        let Some(profile) = self.store.get_profile(org_slug).await? else {
            return Ok(report(OrgStatus::NotFound, None));
        };

        let diff = self
            .executor
            .diff(&profile.org_dataset_id, self.catalog.org())
            .await?;
        let mut status = report(OrgStatus::for_org(true, diff.as_ref()), diff);
        status.dataset = profile.org_dataset_id;
        Ok(status)
    }

    /// Add whatever the org dataset is missing. When the dataset itself is
    /// gone, rebuild it in full regardless of `options`.
    #[instrument(skip(self))]
    pub async fn sync(&self, org_slug: &str, options: SyncOptions) -> Result<OrgSyncReport> {
        slug::validate(org_slug)?;
        self.require_bootstrapped().await?;
        let profile = self
            .store
            .get_profile(org_slug)
            .await?
            .ok_or_else(|| AppError::org_not_found(org_slug))?;

        let dataset = profile.org_dataset_id.as_str();
        let recovered = !self.executor.warehouse().dataset_exists(dataset).await?;
        let options = if recovered {
            warn!(dataset, "Org dataset missing, recreating it");
            SyncOptions::default()
        } else {
            options
        };

        let views = self.views_for(org_slug, dataset);
        let report = self
            .executor
            .run(dataset, self.catalog.org(), &views, options)
            .await
            .into_result()?;

        Ok(OrgSyncReport {
            org_slug: org_slug.to_string(),
            recovered,
            report,
        })
    }

    /// Slugs of every onboarded org, sorted
    pub async fn list_orgs(&self) -> Result<Vec<String>> {
        self.store.list_org_slugs().await
    }
}

fn duplicate(org_slug: &str) -> AppError {
    AppError::Duplicate {
        message: format!("organization {} already exists", org_slug),
    }
}

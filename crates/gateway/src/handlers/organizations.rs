//! Organization handlers
//!
//! Onboarding, dry runs and sync need the root key. Status and key
//! rotation also accept the org's own API key.

use crate::extract::ApiJson;
use crate::middleware::auth::{Caller, RootAdmin};
use crate::AppState;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use orgforge_common::errors::Result;
use orgforge_common::provisioner::{DryrunResult, OnboardRequest, OrgSyncReport, PlanLimits, SubscriptionPlan};
use orgforge_common::slug;
use orgforge_common::status::StatusReport;
use orgforge_common::{OrgStatus, SyncOptions, SyncReport};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct OnboardResponse {
    pub org_slug: String,
    pub org_dataset_id: String,
    pub plan: SubscriptionPlan,
    pub limits: PlanLimits,
    pub org_api_key_id: String,
    /// Returned once; store it now
    pub api_key: String,
    pub status: OrgStatus,
    pub sync: SyncReport,
}

#[derive(Debug, Serialize)]
pub struct RotateResponse {
    pub org_slug: String,
    pub org_api_key_id: String,
    pub api_key: String,
    pub created_at: DateTime<Utc>,
    pub deactivated_key_ids: Vec<String>,
}

pub async fn dryrun(
    State(state): State<AppState>,
    _admin: RootAdmin,
    ApiJson(request): ApiJson<OnboardRequest>,
) -> Result<Json<DryrunResult>> {
    Ok(Json(state.platform.provisioner.dryrun(&request).await?))
}

/// Create an organization and hand back its API key
pub async fn onboard(
    State(state): State<AppState>,
    _admin: RootAdmin,
    ApiJson(request): ApiJson<OnboardRequest>,
) -> Result<(StatusCode, Json<OnboardResponse>)> {
    let result = state.platform.provisioner.onboard(&request).await?;

    let response = OnboardResponse {
        org_slug: result.org_slug,
        org_dataset_id: result.org_dataset_id,
        plan: result.plan,
        limits: result.limits,
        org_api_key_id: result.org_api_key_id,
        api_key: result.api_key.into_inner(),
        status: result.status,
        sync: result.sync,
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// Never 404s: an unknown org reports `NOT_FOUND`
pub async fn status(
    State(state): State<AppState>,
    Caller(principal): Caller,
    Path(org_slug): Path<String>,
) -> Result<Json<StatusReport>> {
    principal.authorize_org(&org_slug)?;
    Ok(Json(state.platform.provisioner.status(&org_slug).await?))
}

pub async fn sync(
    State(state): State<AppState>,
    _admin: RootAdmin,
    Path(org_slug): Path<String>,
    body: std::result::Result<Option<Json<SyncOptions>>, JsonRejection>,
) -> Result<Json<OrgSyncReport>> {
    let options = body?.map(|Json(o)| o).unwrap_or_default();
    Ok(Json(state.platform.provisioner.sync(&org_slug, options).await?))
}

/// Swap the org's key for a new one; the old key stops working immediately
pub async fn rotate_api_key(
    State(state): State<AppState>,
    Caller(principal): Caller,
    Path(org_slug): Path<String>,
) -> Result<Json<RotateResponse>> {
    slug::validate(&org_slug)?;
    principal.authorize_org(&org_slug)?;

    let issued = state.platform.credentials.rotate(&org_slug).await?;
    Ok(Json(RotateResponse {
        org_slug: issued.org_slug,
        org_api_key_id: issued.org_api_key_id,
        api_key: issued.plaintext.into_inner(),
        created_at: issued.created_at,
        deactivated_key_ids: issued.deactivated_key_ids,
    }))
}

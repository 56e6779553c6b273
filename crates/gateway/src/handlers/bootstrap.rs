//! Central dataset handlers (root only)

use crate::middleware::auth::RootAdmin;
use crate::AppState;
use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use orgforge_common::errors::Result;
use orgforge_common::status::StatusReport;
use orgforge_common::{SyncOptions, SyncReport};

/// Create the shared dataset and every missing meta table
pub async fn bootstrap(State(state): State<AppState>, _admin: RootAdmin) -> Result<Json<SyncReport>> {
    let report = state.platform.central.bootstrap().await?;
    Ok(Json(report))
}

pub async fn bootstrap_status(
    State(state): State<AppState>,
    _admin: RootAdmin,
) -> Result<Json<StatusReport>> {
    Ok(Json(state.platform.central.status().await?))
}

/// Additive sync of the shared dataset. A missing body means every flag on.
pub async fn bootstrap_sync(
    State(state): State<AppState>,
    _admin: RootAdmin,
    body: std::result::Result<Option<Json<SyncOptions>>, JsonRejection>,
) -> Result<Json<SyncReport>> {
    let options = body?.map(|Json(o)| o).unwrap_or_default();
    Ok(Json(state.platform.central.sync(options).await?))
}

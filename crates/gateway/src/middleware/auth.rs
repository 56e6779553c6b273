//! Credential extractors
//!
//! `RootAdmin` accepts only the system root key. `Caller` accepts the root
//! key or an org API key and leaves per-org authorization to the handler.
//! Both reject before any handler code runs.

use crate::AppState;
use axum::{extract::FromRequestParts, http::request::Parts};
use orgforge_common::auth::Principal;
use orgforge_common::errors::AppError;

/// Proof that the request carried the root key
#[derive(Debug, Clone, Copy)]
pub struct RootAdmin;

/// Whoever the presented credential belongs to
#[derive(Debug, Clone)]
pub struct Caller(pub Principal);

impl FromRequestParts<AppState> for RootAdmin {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let principal = authenticate(parts, state).await?;
        principal.require_root()?;
        Ok(RootAdmin)
    }
}

impl FromRequestParts<AppState> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(Caller(authenticate(parts, state).await?))
    }
}

fn header(parts: &Parts, name: &str) -> Result<Option<String>, AppError> {
    match parts.headers.get(name) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(|v| Some(v.trim().to_string()))
            .map_err(|_| AppError::Unauthorized {
                message: format!("{} is not valid ASCII", name),
            }),
    }
}

/// The root header wins when both are present
async fn authenticate(parts: &Parts, state: &AppState) -> Result<Principal, AppError> {
    let auth = &state.config.auth;

    if let Some(presented) = header(parts, &auth.root_key_header)? {
        if state.root_key.verify(&presented) {
            return Ok(Principal::Root);
        }
        tracing::warn!(path = %parts.uri.path(), "Rejected root key");
        return Err(AppError::Unauthorized {
            message: "invalid root key".to_string(),
        });
    }

    if let Some(presented) = header(parts, &auth.api_key_header)? {
        return match state.platform.credentials.validate(&presented).await? {
            Some(key) => Ok(Principal::Org {
                org_slug: key.org_slug,
                key_id: key.org_api_key_id,
            }),
            None => {
                tracing::warn!(path = %parts.uri.path(), "Rejected org API key");
                Err(AppError::InvalidApiKey)
            }
        };
    }

    Err(AppError::Unauthorized {
        message: format!(
            "missing credentials: send {} or {}",
            auth.root_key_header, auth.api_key_header
        ),
    })
}

//! Error types for OrgForge services
//!
//! Provides a single error enum for the engine with:
//! - Distinct variants for validation, conflict, auth and storage failures
//! - HTTP status code mapping
//! - Structured error responses carrying partial-progress reports
//! - Error codes for client handling

use crate::sync::SyncReport;
use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    MissingField,
    InvalidFormat,

    // Authentication errors (2xxx)
    Unauthorized,
    InvalidApiKey,

    // Authorization errors (3xxx)
    Forbidden,
    TenantMismatch,

    // Resource errors (4xxx)
    NotFound,
    NotBootstrapped,

    // Conflict errors (5xxx)
    Conflict,

    // Rate limiting (6xxx)
    RateLimited,

    // Storage errors (7xxx)
    DatabaseError,
    WarehouseError,
    SyncFailed,

    // External service errors (8xxx)
    KmsError,

    // Internal errors (9xxx)
    ConfigurationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,
            ErrorCode::MissingField => 1002,
            ErrorCode::InvalidFormat => 1003,

            ErrorCode::Unauthorized => 2001,
            ErrorCode::InvalidApiKey => 2002,

            ErrorCode::Forbidden => 3001,
            ErrorCode::TenantMismatch => 3003,

            ErrorCode::NotFound => 4001,
            ErrorCode::NotBootstrapped => 4002,

            ErrorCode::Conflict => 5001,

            ErrorCode::RateLimited => 6001,

            ErrorCode::DatabaseError => 7001,
            ErrorCode::WarehouseError => 7002,
            ErrorCode::SyncFailed => 7003,

            ErrorCode::KmsError => 8001,

            ErrorCode::ConfigurationError => 9002,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Required field missing: {field}")]
    MissingField { field: String },

    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    // Authentication errors
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Invalid API key")]
    InvalidApiKey,

    // Authorization errors
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("API key does not belong to organization {org_slug}")]
    TenantMismatch { org_slug: String },

    // Resource errors
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    #[error("Central dataset {dataset} is not bootstrapped")]
    NotBootstrapped { dataset: String },

    // Conflict errors
    #[error("Duplicate resource: {message}")]
    Duplicate { message: String },

    // Rate limiting
    #[error("Rate limit exceeded: {limit} requests per second")]
    RateLimited { limit: u32 },

    // Storage errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    #[error("Warehouse error: {message}")]
    Warehouse { message: String },

    #[error("Sync of dataset {} applied no changes ({} failed operations)", .report.dataset, .report.failures.len())]
    SyncFailed { report: Box<SyncReport> },

    // External service errors
    #[error("KMS error: {message}")]
    Kms { message: String },

    // Internal errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl AppError {
    /// Shorthand for a single-field validation failure
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }

    /// Shorthand for an unknown organization
    pub fn org_not_found(org_slug: &str) -> Self {
        AppError::NotFound {
            resource_type: "organization".to_string(),
            id: org_slug.to_string(),
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::MissingField { .. } => ErrorCode::MissingField,
            AppError::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            AppError::Unauthorized { .. } => ErrorCode::Unauthorized,
            AppError::InvalidApiKey => ErrorCode::InvalidApiKey,
            AppError::Forbidden { .. } => ErrorCode::Forbidden,
            AppError::TenantMismatch { .. } => ErrorCode::TenantMismatch,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::NotBootstrapped { .. } => ErrorCode::NotBootstrapped,
            AppError::Duplicate { .. } => ErrorCode::Conflict,
            AppError::RateLimited { .. } => ErrorCode::RateLimited,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::DatabaseError,
            AppError::Warehouse { .. } => ErrorCode::WarehouseError,
            AppError::SyncFailed { .. } => ErrorCode::SyncFailed,
            AppError::Kms { .. } => ErrorCode::KmsError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. }
            | AppError::MissingField { .. }
            | AppError::InvalidFormat { .. } => StatusCode::BAD_REQUEST,

            // 401 Unauthorized
            AppError::Unauthorized { .. } | AppError::InvalidApiKey => StatusCode::UNAUTHORIZED,

            // 403 Forbidden
            AppError::Forbidden { .. } | AppError::TenantMismatch { .. } => StatusCode::FORBIDDEN,

            // 404 Not Found
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,

            // 409 Conflict
            AppError::Duplicate { .. } => StatusCode::CONFLICT,

            // 412 Precondition Failed
            AppError::NotBootstrapped { .. } => StatusCode::PRECONDITION_FAILED,

            // 429 Too Many Requests
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 500 Internal Server Error
            AppError::Database(_)
            | AppError::DatabaseConnection { .. }
            | AppError::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::Warehouse { .. } | AppError::SyncFailed { .. } | AppError::Kms { .. } => {
                StatusCode::BAD_GATEWAY
            }
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Structured detail attached to the response body, if any
    fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::SyncFailed { report } => serde_json::to_value(report.as_ref()).ok(),
            AppError::Validation {
                field: Some(field), ..
            }
            | AppError::MissingField { field } => Some(serde_json::json!({ "field": field })),
            _ => None,
        }
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        // Log based on severity
        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                details: self.details(),
                request_id: None, // Filled by the request-id layer header, not the body
            },
        };

        (status, Json(body)).into_response()
    }
}

/// Request bodies that do not deserialize are client errors, not 422s
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        let message = rejection.body_text();
        if let JsonRejection::JsonDataError(_) = &rejection {
            if let Some(field) = missing_field(&message) {
                return AppError::MissingField { field };
            }
        }
        AppError::InvalidFormat { message }
    }
}

/// Field name from serde's "missing field `x`" message
fn missing_field(message: &str) -> Option<String> {
    let (_, rest) = message.split_once("missing field `")?;
    let (field, _) = rest.split_once('`')?;
    Some(field.to_string())
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let field = errors.field_errors().keys().next().map(|f| f.to_string());
        AppError::Validation {
            message: errors.to_string(),
            field,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::org_not_found("acme_test");
        assert_eq!(err.code(), ErrorCode::NotFound);
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_validation_error() {
        let err = AppError::validation("org_slug", "bad slug");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(!err.is_server_error());
        assert!(err.is_client_error());
        assert_eq!(err.details(), Some(serde_json::json!({ "field": "org_slug" })));
    }

    #[test]
    fn test_conflict_error() {
        let err = AppError::Duplicate {
            message: "organization acme_test already exists".into(),
        };
        assert_eq!(err.code(), ErrorCode::Conflict);
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_sync_failure_carries_report() {
        let mut report = SyncReport::new("acme_test_prod");
        report.record_failure(crate::sync::SyncOperation::CreateTable, "costs", "boom");
        let err = AppError::SyncFailed {
            report: Box::new(report),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        let details = err.details().unwrap();
        assert_eq!(details["dataset"], "acme_test_prod");
        assert_eq!(details["failures"][0]["target"], "costs");
    }

    #[test]
    fn test_missing_field_name() {
        assert_eq!(
            missing_field("Failed to deserialize the JSON body into the target type: missing field `admin_email` at line 1 column 58")
                .as_deref(),
            Some("admin_email")
        );
        assert_eq!(missing_field("plan: unknown variant `ENTERPRISE`"), None);

        let err = AppError::MissingField {
            field: "admin_email".into(),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.details(), Some(serde_json::json!({ "field": "admin_email" })));
    }

    #[test]
    fn test_server_error() {
        let err = AppError::Configuration {
            message: "unknown warehouse provider".into(),
        };
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.is_server_error());
    }
}

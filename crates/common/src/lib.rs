//! OrgForge Common Library
//!
//! Shared code for the OrgForge gateway and admin CLI including:
//! - Declarative schema catalog
//! - Schema diff engine and additive sync executor
//! - Central store bootstrapper and tenant provisioner
//! - Credential manager and KMS abstraction
//! - Warehouse and metadata store abstractions
//! - Error types, configuration, auth and metrics

pub mod auth;
pub mod catalog;
pub mod central;
pub mod config;
pub mod credentials;
pub mod db;
pub mod diff;
pub mod errors;
pub mod kms;
pub mod metrics;
pub mod platform;
pub mod provisioner;
pub mod slug;
pub mod status;
pub mod sync;
pub mod warehouse;

// Re-export commonly used types
pub use catalog::SchemaCatalog;
pub use config::AppConfig;
pub use errors::{AppError, Result};
pub use platform::Platform;
pub use status::OrgStatus;
pub use sync::{SyncOptions, SyncReport};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

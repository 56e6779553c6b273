//! Authentication and authorization utilities
//!
//! Provides:
//! - API key generation and hashing
//! - Root key verification
//! - The authenticated principal and per-org authorization

use crate::errors::{AppError, Result};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Random characters after the `{org_slug}_api_` prefix
pub const API_KEY_RANDOM_LEN: usize = 16;

/// Separator between the slug and the random part of an org key
pub const API_KEY_MARKER: &str = "_api_";

/// Hash an API key for storage
pub fn hash_api_key(api_key: &str) -> String {
    hex::encode(digest(api_key))
}

fn digest(value: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hasher.finalize().into()
}

/// Generate a new org API key: `{org_slug}_api_{16 alphanumerics}`
pub fn generate_api_key(org_slug: &str) -> String {
    let random: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(API_KEY_RANDOM_LEN)
        .map(char::from)
        .collect();
    format!("{}{}{}", org_slug, API_KEY_MARKER, random)
}

/// Cheap shape check before any lookup
pub fn looks_like_org_key(api_key: &str) -> bool {
    match api_key.rsplit_once(API_KEY_MARKER) {
        Some((slug, random)) => {
            !slug.is_empty()
                && random.len() == API_KEY_RANDOM_LEN
                && random.chars().all(|c| c.is_ascii_alphanumeric())
        }
        None => false,
    }
}

/// System-level credential gating admin operations
#[derive(Clone)]
pub struct RootKey {
    digest: Option<[u8; 32]>,
}

impl RootKey {
    /// `None` disables root access entirely
    pub fn new(configured: Option<&str>) -> Self {
        Self {
            digest: configured.filter(|k| !k.is_empty()).map(digest),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.digest.is_some()
    }

    /// Compare digests so timing does not depend on the key's content
    pub fn verify(&self, presented: &str) -> bool {
        let Some(expected) = self.digest else {
            return false;
        };
        let actual = digest(presented);
        expected
            .iter()
            .zip(actual.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl std::fmt::Debug for RootKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootKey")
            .field("configured", &self.is_configured())
            .finish()
    }
}

/// Who is calling
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    Root,
    Org { org_slug: String, key_id: String },
}

impl Principal {
    pub fn require_root(&self) -> Result<()> {
        match self {
            Principal::Root => Ok(()),
            Principal::Org { .. } => Err(AppError::Forbidden {
                message: "root credentials required".to_string(),
            }),
        }
    }

    /// Root may act on any org; an org key only on its own org
    pub fn authorize_org(&self, org_slug: &str) -> Result<()> {
        match self {
            Principal::Root => Ok(()),
            Principal::Org { org_slug: own, .. } if own == org_slug => Ok(()),
            Principal::Org { .. } => Err(AppError::TenantMismatch {
                org_slug: org_slug.to_string(),
            }),
        }
    }
}

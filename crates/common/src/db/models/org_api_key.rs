//! Organization API key row
//!
//! Only the SHA-256 hash and the KMS ciphertext are stored. The plaintext
//! key never reaches this type.

use chrono::{DateTime, Utc};
use sea_orm::FromQueryResult;

#[derive(Clone, Debug, PartialEq, Eq, FromQueryResult)]
pub struct ApiKeyRecord {
    pub org_api_key_id: String,
    pub org_slug: String,
    pub org_api_key_hash: String,
    pub encrypted_org_api_key: Vec<u8>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

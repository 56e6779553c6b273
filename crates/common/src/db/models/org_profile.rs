//! Organization profile row

use chrono::{DateTime, Utc};
use sea_orm::FromQueryResult;
use serde::{Deserialize, Serialize};

/// One tenant's identity and defaults; `org_slug` never changes once written
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, FromQueryResult)]
pub struct OrgProfile {
    pub org_slug: String,
    pub company_name: String,
    pub admin_email: String,
    pub org_dataset_id: String,
    pub status: String,
    pub subscription_plan: String,
    pub default_currency: String,
    pub default_timezone: String,
    pub fiscal_year_start_month: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl OrgProfile {
    pub const STATUS_ACTIVE: &'static str = "ACTIVE";
}

//! Organization subscription row

use chrono::{DateTime, Utc};
use sea_orm::FromQueryResult;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, FromQueryResult)]
pub struct OrgSubscription {
    pub subscription_id: String,
    pub org_slug: String,
    pub plan_name: String,
    pub status: String,
    pub seat_limit: i64,
    pub providers_limit: i64,
    pub daily_pipeline_limit: i64,
    pub monthly_pipeline_limit: i64,
    pub concurrent_pipeline_limit: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

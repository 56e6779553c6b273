//! Subscription plans and their limits

use crate::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionPlan {
    Starter,
    Professional,
    Scale,
}

/// Limits written to an org's subscription row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlanLimits {
    pub seat_limit: i64,
    pub providers_limit: i64,
    pub daily_pipeline_limit: i64,
    pub monthly_pipeline_limit: i64,
    pub concurrent_pipeline_limit: i64,
}

impl SubscriptionPlan {
    pub const ALL: [SubscriptionPlan; 3] = [
        SubscriptionPlan::Starter,
        SubscriptionPlan::Professional,
        SubscriptionPlan::Scale,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionPlan::Starter => "STARTER",
            SubscriptionPlan::Professional => "PROFESSIONAL",
            SubscriptionPlan::Scale => "SCALE",
        }
    }

    pub fn limits(&self) -> PlanLimits {
        let (seats, providers, daily, monthly, concurrent) = match self {
            SubscriptionPlan::Starter => (2, 3, 6, 180, 1),
            SubscriptionPlan::Professional => (6, 6, 25, 750, 3),
            SubscriptionPlan::Scale => (11, 10, 100, 3000, 10),
        };
        PlanLimits {
            seat_limit: seats,
            providers_limit: providers,
            daily_pipeline_limit: daily,
            monthly_pipeline_limit: monthly,
            concurrent_pipeline_limit: concurrent,
        }
    }
}

impl fmt::Display for SubscriptionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionPlan {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|plan| plan.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| AppError::validation("plan", format!("unknown plan: {}", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starter_limits() {
        let limits = SubscriptionPlan::Starter.limits();
        assert_eq!(limits.seat_limit, 2);
        assert_eq!(limits.providers_limit, 3);
        assert_eq!(limits.daily_pipeline_limit, 6);
        assert_eq!(limits.monthly_pipeline_limit, 180);
        assert_eq!(limits.concurrent_pipeline_limit, 1);
    }

    #[test]
    fn test_limits_grow_with_plan() {
        let [starter, professional, scale] = SubscriptionPlan::ALL.map(|p| p.limits());
        assert!(starter.seat_limit < professional.seat_limit);
        assert!(professional.seat_limit < scale.seat_limit);
        assert!(professional.monthly_pipeline_limit < scale.monthly_pipeline_limit);
    }

    #[test]
    fn test_parse() {
        assert_eq!("scale".parse::<SubscriptionPlan>().unwrap(), SubscriptionPlan::Scale);
        assert_eq!(
            serde_json::from_str::<SubscriptionPlan>("\"PROFESSIONAL\"").unwrap(),
            SubscriptionPlan::Professional
        );
        assert!("enterprise".parse::<SubscriptionPlan>().is_err());
    }
}

//! Onboarding request and its validation

use super::plans::SubscriptionPlan;
use crate::errors::{AppError, Result};
use crate::slug;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use validator::Validate;

pub const DEFAULT_CURRENCY: &str = "USD";
pub const DEFAULT_TIMEZONE: &str = "UTC";

pub const SUPPORTED_CURRENCIES: &[&str] = &[
    "USD", "EUR", "GBP", "INR", "JPY", "CNY", "AUD", "CAD", "SGD", "CHF", "AED", "SAR", "QAR",
    "KWD", "BHD", "OMR", "HKD", "NZD", "SEK", "NOK", "DKK", "ZAR", "BRL", "MXN",
];

/// Quarter starts a fiscal year may begin on
pub const FISCAL_YEAR_START_MONTHS: [u32; 4] = [1, 4, 7, 10];

fn default_fiscal_year_start_month() -> u32 {
    1
}

fn timezone_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(UTC|[A-Za-z]+(/[A-Za-z0-9_+\-]+){1,2})$").expect("static regex")
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct OnboardRequest {
    pub org_slug: String,

    #[validate(length(min = 1, max = 200))]
    pub company_name: String,

    #[validate(email)]
    pub admin_email: String,

    pub plan: SubscriptionPlan,

    #[serde(default)]
    pub default_currency: Option<String>,

    #[serde(default)]
    pub default_timezone: Option<String>,

    #[serde(default = "default_fiscal_year_start_month")]
    pub fiscal_year_start_month: u32,
}

impl OnboardRequest {
    pub fn new(org_slug: &str, company_name: &str, admin_email: &str, plan: SubscriptionPlan) -> Self {
        Self {
            org_slug: org_slug.to_string(),
            company_name: company_name.to_string(),
            admin_email: admin_email.to_string(),
            plan,
            default_currency: None,
            default_timezone: None,
            fiscal_year_start_month: default_fiscal_year_start_month(),
        }
    }

    /// Every check that must pass before anything is written
    pub fn check(&self) -> Result<()> {
        slug::validate(&self.org_slug)?;
        self.validate()?;

        if self.company_name.trim().is_empty() {
            return Err(AppError::validation("company_name", "company_name must not be blank"));
        }
        if !SUPPORTED_CURRENCIES.contains(&self.currency()) {
            return Err(AppError::validation(
                "default_currency",
                format!("unsupported currency: {}", self.currency()),
            ));
        }
        if !timezone_re().is_match(self.timezone()) {
            return Err(AppError::validation(
                "default_timezone",
                format!("invalid timezone: {}", self.timezone()),
            ));
        }
        if !FISCAL_YEAR_START_MONTHS.contains(&self.fiscal_year_start_month) {
            return Err(AppError::validation(
                "fiscal_year_start_month",
                "fiscal_year_start_month must be one of 1, 4, 7, 10",
            ));
        }
        Ok(())
    }

    pub fn currency(&self) -> &str {
        self.default_currency.as_deref().unwrap_or(DEFAULT_CURRENCY)
    }

    pub fn timezone(&self) -> &str {
        self.default_timezone.as_deref().unwrap_or(DEFAULT_TIMEZONE)
    }
}

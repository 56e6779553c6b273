//! Organization slug rules
//!
//! A slug is the tenant identifier: 3 to 50 ASCII letters, digits or
//! underscores. Direct onboarding takes the slug from the caller; only the
//! signup path derives one from a company name.

use crate::errors::{AppError, Result};
use chrono::{DateTime, Utc};
use regex_lite::Regex;
use std::sync::OnceLock;

pub const MIN_SLUG_LEN: usize = 3;
pub const MAX_SLUG_LEN: usize = 50;

fn slug_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_]{3,50}$").expect("static regex"))
}

pub fn is_valid(slug: &str) -> bool {
    slug_re().is_match(slug)
}

/// Reject anything that is not a well-formed slug
pub fn validate(slug: &str) -> Result<()> {
    if is_valid(slug) {
        return Ok(());
    }
    Err(AppError::validation(
        "org_slug",
        format!(
            "org_slug must be {}-{} characters of letters, digits or underscores",
            MIN_SLUG_LEN, MAX_SLUG_LEN
        ),
    ))
}

/// Derive a slug from a company name at signup time
pub fn generate(company_name: &str) -> String {
    generate_at(company_name, Utc::now())
}

/// `slugify(company_name) + "_" + base36(milliseconds since epoch)`
pub fn generate_at(company_name: &str, at: DateTime<Utc>) -> String {
    let suffix = base36(at.timestamp_millis().max(0) as u64);
    let mut base = slugify(company_name);

    let room = MAX_SLUG_LEN - suffix.len() - 1;
    if base.len() > room {
        base.truncate(room);
        while base.ends_with('_') {
            base.pop();
        }
    }
    if base.is_empty() {
        base.push_str("org");
    }
    format!("{}_{}", base, suffix)
}

/// Lowercase ASCII alphanumerics; every other run of characters becomes one `_`
fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

fn base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::new();
    while n > 0 {
        buf.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    buf.reverse();
    String::from_utf8(buf).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_accepts_well_formed_slugs() {
        let longest = "a".repeat(50);
        for slug in ["acme_corp_1a2b3c", "abc", "ACME_Test_01", longest.as_str()] {
            assert!(is_valid(slug), "{slug}");
            assert!(validate(slug).is_ok());
        }
    }

    #[test]
    fn test_rejects_malformed_slugs() {
        let too_long = "a".repeat(51);
        for slug in ["ac", "acme-corp", "acme corp", "acme.corp", "", too_long.as_str(), "acmé_corp"] {
            assert!(!is_valid(slug), "{slug}");
        }
        let err = validate("acme-corp").unwrap_err();
        assert!(matches!(err, AppError::Validation { field: Some(ref f), .. } if f == "org_slug"));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Acme Corp, Inc."), "acme_corp_inc");
        assert_eq!(slugify("  --Hello__World--  "), "hello_world");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn test_base36() {
        assert_eq!(base36(0), "0");
        assert_eq!(base36(35), "z");
        assert_eq!(base36(36), "10");
        assert_eq!(base36(1_700_000_000_000), "loyw3v28");
    }

    #[test]
    fn test_generated_slugs_are_valid() {
        let at = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        assert_eq!(generate_at("Acme Corp", at), "acme_corp_loyw3v28");
        assert_eq!(generate_at("???", at), "org_loyw3v28");

        let long = generate_at(&"Very Long Company Name ".repeat(10), at);
        assert!(long.len() <= MAX_SLUG_LEN);
        assert!(is_valid(&long));
        assert!(!long.contains("__"));
        assert!(is_valid(&generate("Globex")));
    }
}

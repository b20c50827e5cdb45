//! Field validators for user settings

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;

use super::defaults::{DENSITIES, FONT_SIZES, SUPPORTED_LANGUAGES, THEMES};
use crate::contract::ValidationRule;

#[allow(clippy::expect_used)]
static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is valid")
});

#[allow(clippy::expect_used)]
static PHONE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+?\d+$").expect("phone pattern is valid"));

/// Empty, or a standard `local@domain.tld` address
pub fn is_valid_email(value: &Value) -> bool {
    match value.as_str() {
        Some("") => true,
        Some(s) => EMAIL_RE.is_match(s),
        None => false,
    }
}

/// Empty, or digits with an optional leading `+` once separators are stripped
pub fn is_valid_phone(value: &Value) -> bool {
    match value.as_str() {
        Some("") => true,
        Some(s) => {
            let stripped: String = s
                .chars()
                .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
                .collect();
            PHONE_RE.is_match(&stripped)
        }
        None => false,
    }
}

/// Empty, or parseable as an absolute URL
pub fn is_valid_base_url(value: &Value) -> bool {
    match value.as_str() {
        Some("") => true,
        Some(s) => url::Url::parse(s).is_ok(),
        None => false,
    }
}

pub fn is_one_of(value: &Value, allowed: &[&str]) -> bool {
    value.as_str().is_some_and(|s| allowed.contains(&s))
}

/// Integer within `[min, max]`
pub fn is_int_in_range(value: &Value, min: i64, max: i64) -> bool {
    value.as_i64().is_some_and(|n| (min..=max).contains(&n))
}

fn rule(f: impl Fn(&Value) -> bool + Send + Sync + 'static) -> ValidationRule {
    Arc::new(move |value: &Value, _tree: &Value| f(value))
}

/// Validator set registered on every user settings instance
pub fn user_rules() -> Vec<(&'static str, ValidationRule)> {
    vec![
        ("personalInfo.email", rule(is_valid_email)),
        ("personalInfo.phone", rule(is_valid_phone)),
        ("preferences.theme", rule(|v| is_one_of(v, &THEMES))),
        ("preferences.language", rule(|v| is_one_of(v, &SUPPORTED_LANGUAGES))),
        ("preferences.fontSize", rule(|v| is_one_of(v, &FONT_SIZES))),
        ("preferences.density", rule(|v| is_one_of(v, &DENSITIES))),
        ("apiSettings.*.baseUrl", rule(is_valid_base_url)),
        (
            "apiSettings.general.requestTimeout",
            rule(|v| is_int_in_range(v, 1, 300_000)),
        ),
        (
            "gridSettings.defaultPageSize",
            rule(|v| is_int_in_range(v, 10, 1000)),
        ),
        (
            "gridSettings.refreshInterval",
            rule(|v| is_int_in_range(v, 10_000, i64::MAX)),
        ),
    ]
}

/// Null, or the same JSON type as `reference`
pub fn is_null_or_same_type(value: &Value, reference: &Value) -> bool {
    value.is_null() || std::mem::discriminant(value) == std::mem::discriminant(reference)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_email() {
        assert!(is_valid_email(&json!("")));
        assert!(is_valid_email(&json!("ops@technostationery.com")));
        assert!(!is_valid_email(&json!("not-an-email")));
        assert!(!is_valid_email(&json!("a@b")));
        assert!(!is_valid_email(&json!(42)));
    }

    #[test]
    fn test_phone() {
        assert!(is_valid_phone(&json!("")));
        assert!(is_valid_phone(&json!("+216 71 123 456")));
        assert!(is_valid_phone(&json!("(555) 123-4567")));
        assert!(!is_valid_phone(&json!("555-CALL-NOW")));
        assert!(!is_valid_phone(&json!("12+34")));
    }

    #[test]
    fn test_base_url() {
        assert!(is_valid_base_url(&json!("")));
        assert!(is_valid_base_url(&json!("https://magento.example.com/rest/V1")));
        assert!(!is_valid_base_url(&json!("/relative/path")));
        assert!(!is_valid_base_url(&json!(null)));
    }

    #[test]
    fn test_ranges() {
        assert!(is_int_in_range(&json!(10), 10, 1000));
        assert!(is_int_in_range(&json!(1000), 10, 1000));
        assert!(!is_int_in_range(&json!(5), 10, 1000));
        assert!(!is_int_in_range(&json!(25.5), 10, 1000));
        assert!(!is_int_in_range(&json!("25"), 10, 1000));
    }

    #[test]
    fn test_same_type() {
        assert!(is_null_or_same_type(&json!(null), &json!("light")));
        assert!(is_null_or_same_type(&json!("dark"), &json!("light")));
        assert!(!is_null_or_same_type(&json!(1), &json!("light")));
        assert!(is_null_or_same_type(&json!(50), &json!(25)));
    }
}

//! Boundary validation for request fields

use bson::oid::ObjectId;

use crate::types::{AppError, Result};

/// Normalize and validate an email address.
///
/// Trims surrounding whitespace. The address must have exactly one `@`,
/// a non-empty local part and a dotted domain.
pub fn email(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation("Email is required".into()));
    }

    let invalid = || AppError::Validation(format!("Invalid email address: {}", trimmed));

    if trimmed.chars().any(char::is_whitespace) {
        return Err(invalid());
    }

    let (local, domain) = trimmed.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.contains('@') {
        return Err(invalid());
    }

    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 || labels.iter().any(|l| l.is_empty()) {
        return Err(invalid());
    }

    Ok(trimmed.to_string())
}

/// Require a non-empty string field
pub fn required(field: &str, value: Option<&str>) -> Result<String> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(AppError::Validation(format!("{} is required", field))),
    }
}

/// Parse a hex document identifier
pub fn object_id(field: &str, raw: &str) -> Result<ObjectId> {
    ObjectId::parse_str(raw.trim())
        .map_err(|_| AppError::Validation(format!("Invalid {}: {}", field, raw)))
}

/// Make a page name safe to use as a document field path.
///
/// Dots would nest and a leading `$` would be read as an operator.
pub fn page_key(page: &str) -> Option<String> {
    let trimmed = page.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut key = trimmed.replace('.', "_");
    if key.starts_with('$') {
        key.replace_range(0..1, "_");
    }
    Some(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_emails() {
        assert_eq!(email("a@x.com").unwrap(), "a@x.com");
        assert_eq!(email("  first.last@mail.example.in ").unwrap(), "first.last@mail.example.in");
    }

    #[test]
    fn test_invalid_emails() {
        for bad in ["", "   ", "plain", "@x.com", "a@", "a@x", "a@@x.com", "a b@x.com", "a@x..com"] {
            assert!(
                matches!(email(bad), Err(AppError::Validation(_))),
                "expected rejection for {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_required() {
        assert_eq!(required("name", Some(" Asha ")).unwrap(), "Asha");
        assert!(required("name", Some("  ")).is_err());
        assert!(required("name", None).is_err());
    }

    #[test]
    fn test_object_id() {
        let id = ObjectId::new();
        assert_eq!(object_id("voting_option_id", &id.to_hex()).unwrap(), id);
        assert!(matches!(
            object_id("voting_option_id", "opt1"),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_page_key() {
        assert_eq!(page_key("home").as_deref(), Some("home"));
        assert_eq!(page_key("report.detail").as_deref(), Some("report_detail"));
        assert_eq!(page_key("$where").as_deref(), Some("_where"));
        assert_eq!(page_key(""), None);
    }
}

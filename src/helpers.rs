use std::sync::OnceLock;

use regex::Regex;

use crate::error::{LeadDeskError, Result};
use crate::types::Lead;

/// Keep only ASCII digits.
pub fn digits_only(value: &str) -> String {
    value.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Sanitize contact input the way the intake field does: digits only,
/// truncated to the national length.
pub fn sanitize_contact_input(raw: &str, national_digits: usize) -> String {
    digits_only(raw).chars().take(national_digits).collect()
}

/// Normalize a contact number to canonical country-prefixed digits.
///
/// Accepts either the bare national number (`1234567890`) or a number that
/// already carries the country code (`+91 12345 67890`). Anything else is a
/// validation error.
pub fn normalize_contact(raw: &str, country_code: &str, national_digits: usize) -> Result<String> {
    let digits = digits_only(raw);
    if digits.len() == national_digits {
        return Ok(format!("{}{}", country_code, digits));
    }
    if digits.len() == country_code.len() + national_digits && digits.starts_with(country_code) {
        return Ok(digits);
    }
    Err(LeadDeskError::Invalid {
        field: "client_contact",
        reason: format!(
            "expected {} digits (optionally prefixed with {}), got {}",
            national_digits,
            country_code,
            digits.len()
        ),
    })
}

/// Case-insensitive substring match on client name, or raw substring match on
/// the stored contact digits.
pub fn lead_matches_search(lead: &Lead, query: &str) -> bool {
    let query = query.trim();
    if query.is_empty() {
        return true;
    }
    lead.client_name
        .to_lowercase()
        .contains(&query.to_lowercase())
        || lead.client_contact.contains(query)
}

fn email_regex() -> Option<&'static Regex> {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL
        .get_or_init(|| match Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$") {
            Ok(re) => Some(re),
            Err(e) => {
                log::error!("Email pattern failed to compile: {}", e);
                None
            }
        })
        .as_ref()
}

/// Shape check only; the identity service is the authority on deliverability.
pub fn is_plausible_email(value: &str) -> bool {
    email_regex().is_some_and(|re| re.is_match(value.trim()))
}

/// File extension of an upload name, lowercased, without the dot.
pub fn file_extension(file_name: &str) -> Option<String> {
    let (_, ext) = file_name.rsplit_once('.')?;
    let ext = ext.trim().to_lowercase();
    if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        None
    } else {
        Some(ext)
    }
}

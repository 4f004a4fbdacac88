//! Payload normalization.
//!
//! Inbound lead payloads arrive from many integrations in many languages:
//! `phone`, `telefono`, or `mobile`; `first_name`, `firstName`, or `nome`.
//! After the source's field mapping has been applied, this module extracts
//! the logical fields, normalizes the phone number down to national digits
//! with a detected country, and canonicalizes the email for dedup stability.

use serde::{Deserialize, Serialize};

/// Country assumed when the number carries no recognizable calling code
pub const DEFAULT_COUNTRY: &str = "IT";

/// Known country calling codes, checked longest-prefix-first.
///
/// Order matters only within equal lengths; the lookup sorts by prefix
/// length so "39" wins over "3x" single-digit candidates.
const COUNTRY_PREFIXES: &[(&str, &str)] = &[
    ("39", "IT"),
    ("44", "GB"),
    ("49", "DE"),
    ("43", "AT"),
    ("41", "CH"),
    ("34", "ES"),
    ("33", "FR"),
    ("1", "US"),
];

/// Accepted payload keys per logical field, in priority order
const PHONE_KEYS: &[&str] = &["phone", "telefono", "mobile", "phone_number", "tel"];
const FIRST_NAME_KEYS: &[&str] = &["first_name", "firstName", "nome", "name"];
const LAST_NAME_KEYS: &[&str] = &["last_name", "lastName", "cognome", "surname"];
const EMAIL_KEYS: &[&str] = &["email", "mail", "e_mail"];
const CITY_KEYS: &[&str] = &["city", "citta", "comune"];
const CAP_KEYS: &[&str] = &["cap", "zip", "postal_code", "zipcode"];

// ============================================================================
// Core Types
// ============================================================================

/// A phone number reduced to national digits plus its detected country
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedPhone {
    /// Digits with any recognized calling code stripped
    pub digits: String,

    /// ISO 3166-1 alpha-2 country code
    pub country_code: String,

    /// `true` when no calling code was recognized and the default country
    /// was assumed
    pub assumed_country: bool,
}

/// Structured lead fields extracted from a mapped payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedLead {
    /// Phone value exactly as it appeared in the payload
    pub phone_raw: String,

    pub phone: NormalizedPhone,

    pub first_name: Option<String>,
    pub last_name: Option<String>,

    /// Trimmed, lowercased; `None` when absent or empty
    pub email: Option<String>,

    pub city: Option<String>,
    pub cap: Option<String>,
}

/// Errors from payload normalization
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizationError {
    /// No phone field present, or the value contains no digits
    #[error("Phone number is required")]
    MissingPhone,
}

// ============================================================================
// Normalization
// ============================================================================

/// Normalize a raw phone value.
///
/// All non-digit characters are stripped. When more than ten digits remain,
/// the known calling codes are tried longest-prefix-first; a match strips
/// the prefix and records the country. Otherwise the default country is
/// assumed and the digits pass through unchanged.
///
/// Returns `None` when no digits remain after stripping.
pub fn normalize_phone(raw: &str) -> Option<NormalizedPhone> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }

    if digits.len() > 10 {
        let mut prefixes: Vec<&(&str, &str)> = COUNTRY_PREFIXES.iter().collect();
        prefixes.sort_by_key(|(prefix, _)| std::cmp::Reverse(prefix.len()));

        for (prefix, country) in prefixes {
            if let Some(national) = digits.strip_prefix(prefix) {
                return Some(NormalizedPhone {
                    digits: national.to_string(),
                    country_code: (*country).to_string(),
                    assumed_country: false,
                });
            }
        }
    }

    Some(NormalizedPhone {
        digits,
        country_code: DEFAULT_COUNTRY.to_string(),
        assumed_country: true,
    })
}

/// Trim and lowercase an email value; empty input becomes `None`
pub fn normalize_email(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_ascii_lowercase())
    }
}

/// Extract structured lead fields from a mapped payload object.
///
/// # Errors
///
/// Returns [`NormalizationError::MissingPhone`] when no accepted phone key
/// carries a value with at least one digit.
pub fn extract_lead(payload: &serde_json::Value) -> Result<NormalizedLead, NormalizationError> {
    let phone_raw =
        first_string_value(payload, PHONE_KEYS).ok_or(NormalizationError::MissingPhone)?;
    let phone = normalize_phone(&phone_raw).ok_or(NormalizationError::MissingPhone)?;

    let email = first_string_value(payload, EMAIL_KEYS)
        .as_deref()
        .and_then(normalize_email);

    Ok(NormalizedLead {
        phone_raw,
        phone,
        first_name: first_string_value(payload, FIRST_NAME_KEYS),
        last_name: first_string_value(payload, LAST_NAME_KEYS),
        email,
        city: first_string_value(payload, CITY_KEYS),
        cap: first_string_value(payload, CAP_KEYS),
    })
}

/// First non-empty value among the candidate keys, stringified.
///
/// Numbers are accepted and rendered as their decimal form; postal codes
/// and phone numbers often arrive as JSON numbers from form builders.
fn first_string_value(payload: &serde_json::Value, keys: &[&str]) -> Option<String> {
    let object = payload.as_object()?;
    for key in keys {
        match object.get(*key) {
            Some(serde_json::Value::String(s)) if !s.trim().is_empty() => {
                return Some(s.trim().to_string());
            }
            Some(serde_json::Value::Number(n)) => {
                return Some(n.to_string());
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
#[path = "normalize_tests.rs"]
mod tests;

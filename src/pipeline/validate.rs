//! Field validation: every guess must be traceable to the transcript.
//!
//! A value the model "read" but that the transcript does not contain is
//! treated as a fabrication and dropped. Rejection is not an error: the field
//! becomes `None` with confidence 0 and the caller may fill it from the
//! transcript heuristics instead.
//!
//! Each field is validated independently of the others.

use crate::config::ConfidenceWeights;
use crate::output::{ConfidenceScores, Field, FieldExtract, FieldSource, RawExtraction};
use crate::pipeline::heuristics::{digits_only, heuristic_value, normalize_brazil_phone, COUNTRY_PREFIX};
use once_cell::sync::Lazy;
use regex::Regex;

static RE_VALID_EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());

/// Minimal `local@domain.tld` shape.
pub fn is_valid_email(email: &str) -> bool {
    RE_VALID_EMAIL.is_match(email.trim())
}

/// `true` when `value` occurs in `raw_text` case-insensitively, or when it
/// has several words and each one occurs.
pub fn appears_in_raw_text(value: &str, raw_text: &str) -> bool {
    let value = value.trim().to_lowercase();
    if value.is_empty() {
        return false;
    }
    let raw = raw_text.to_lowercase();
    if raw.contains(&value) {
        return true;
    }
    let words: Vec<&str> = value.split_whitespace().collect();
    words.len() > 1 && words.iter().all(|w| raw.contains(w))
}

/// `true` when the phone's digits occur in the transcript's digits, allowing
/// the `55` country prefix on either side.
pub fn phone_appears_in_raw_text(phone: &str, raw_text: &str) -> bool {
    let phone = digits_only(phone);
    if phone.len() < 8 {
        return false;
    }
    let raw = digits_only(raw_text);
    if raw.contains(&phone) {
        return true;
    }
    if !phone.starts_with(COUNTRY_PREFIX) && raw.contains(&format!("{COUNTRY_PREFIX}{phone}")) {
        return true;
    }
    phone.starts_with(COUNTRY_PREFIX)
        && (12..=13).contains(&phone.len())
        && raw.contains(&phone[COUNTRY_PREFIX.len()..])
}

/// Validate and normalise one candidate value against the transcript.
///
/// Returns the value to store (trimmed; phones as digits only), or `None`
/// when the candidate is rejected.
pub fn validate_field(field: Field, value: &str, raw_text: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    match field {
        Field::Phone => {
            let normalized = normalize_brazil_phone(value)?;
            phone_appears_in_raw_text(&normalized, raw_text).then_some(normalized)
        }
        Field::Email => (is_valid_email(value) && appears_in_raw_text(value, raw_text))
            .then(|| value.to_string()),
        Field::Name => {
            let digits = value.chars().filter(|c| c.is_ascii_digit()).count();
            (appears_in_raw_text(value, raw_text) && digits * 3 <= value.chars().count())
                .then(|| value.to_string())
        }
        Field::Company | Field::JobTitle => {
            appears_in_raw_text(value, raw_text).then(|| value.to_string())
        }
    }
}

/// Validate every guess in `guesses` against `raw_text`.
///
/// Accepted fields score `scores.get(field)` with `source`. With no
/// transcript nothing can be grounded, so every guess is rejected.
pub fn validate_guesses(
    guesses: &RawExtraction,
    raw_text: Option<&str>,
    scores: &ConfidenceScores,
    source: FieldSource,
) -> FieldExtract {
    let mut extract = FieldExtract::empty(raw_text.map(String::from), None);
    let Some(raw) = raw_text.filter(|r| !r.trim().is_empty()) else {
        return extract;
    };
    for field in Field::ALL {
        let accepted = guesses
            .get(field)
            .and_then(|v| validate_field(field, v, raw));
        extract = extract.with_field(field, accepted, *scores.get(field), source);
    }
    extract
}

/// Fill the listed fields that are still empty from transcript heuristics,
/// at heuristic weight. Fields already set are left alone.
pub fn fill_from_heuristics(
    extract: FieldExtract,
    fields: &[Field],
    weights: &ConfidenceWeights,
) -> FieldExtract {
    let Some(raw) = extract.raw_text.clone() else {
        return extract;
    };
    fields.iter().fold(extract, |acc, &field| {
        if acc.value(field).is_some() {
            return acc;
        }
        let guess = heuristic_value(&raw, field, &acc);
        acc.with_field(
            field,
            guess,
            *weights.heuristic.get(field),
            FieldSource::Heuristic,
        )
    })
}

/// `true` when every field of `extract` satisfies its shape and
/// groundedness rules, and every score matches its field's presence.
pub fn is_grounded(extract: &FieldExtract) -> bool {
    Field::ALL.iter().all(|&field| {
        let score = extract.confidence(field);
        if !(0.0..=1.0).contains(&score) {
            return false;
        }
        match (extract.value(field), extract.raw_text.as_deref()) {
            (None, _) => score == 0.0,
            (Some(_), None) => false,
            (Some(v), Some(raw)) => validate_field(field, v, raw).as_deref() == Some(v),
        }
    })
}

//! Company-domain correction.
//!
//! On a business card the email domain almost always names the company,
//! and it is the one spelling the OCR cannot garble without also breaking
//! the address. When a validated email is present, its domain label
//! (`acme` in `joao@acme.com.br`) is used to confirm or fill the company:
//!
//! - company and label contain one another: prefer the transcript line that
//!   best matches the label, else the capitalised label
//! - no company at all and the label is alphanumeric, 3+ characters: fill it
//!   the same way
//! - anything else: leave the company alone
//!
//! A company is only ever replaced or filled here, never cleared.

use crate::config::ConfidenceWeights;
use crate::output::{Field, FieldExtract, FieldSource};
use crate::pipeline::heuristics::{digits_only, transcript_lines};
use tracing::{debug, info};

/// Fraction of the label's characters a line must contain to count as a
/// misspelling of it.
const SIMILARITY_THRESHOLD: f64 = 0.7;

/// The domain label of an email: text between `@` and the next `.`.
pub fn email_domain_label(email: &str) -> Option<&str> {
    let (_, domain) = email.trim().rsplit_once('@')?;
    let label = domain.split('.').next()?.trim();
    (!label.is_empty()).then_some(label)
}

/// `true` when at least 70% of `label`'s characters occur in `line` and the
/// lengths are within a factor of 1.5 of each other.
pub fn is_similar(line: &str, label: &str) -> bool {
    let line_len = line.chars().count();
    let label_len = label.chars().count();
    let (min, max) = (line_len.min(label_len), line_len.max(label_len));
    if min < 3 || max as f64 > min as f64 * 1.5 {
        return false;
    }
    let common = label.chars().filter(|c| line.contains(*c)).count();
    common as f64 >= label_len as f64 * SIMILARITY_THRESHOLD
}

/// First transcript line that contains the label, else the first line
/// similar to it. Lines that hold an email, a website or a phone number are
/// never candidates.
pub fn find_best_company_line<'a>(label: &str, raw_text: &'a str) -> Option<&'a str> {
    let label = label.to_lowercase();
    let candidates: Vec<(&str, String)> = transcript_lines(raw_text)
        .into_iter()
        .filter(|l| {
            let lower = l.to_lowercase();
            !l.contains('@')
                && digits_only(l).len() < 8
                && !lower.contains("www")
                && !lower.contains(".com")
        })
        .map(|l| (l, l.to_lowercase()))
        .collect();

    candidates
        .iter()
        .find(|(_, lower)| lower.contains(&label))
        .or_else(|| candidates.iter().find(|(_, lower)| is_similar(lower, &label)))
        .map(|(line, _)| *line)
}

/// Capitalise a domain label: `acme-corp` → `Acme-Corp`, `spacemoon` →
/// `Spacemoon`. A label that already has capitals is kept. Hyphens are
/// kept as written, so the result still occurs in the email.
pub fn capitalize_company(label: &str) -> String {
    if label.contains('-') {
        return label.split('-').map(capitalize_word).collect::<Vec<_>>().join("-");
    }
    if label.chars().any(char::is_uppercase) {
        return label.to_string();
    }
    capitalize_word(label)
}

fn capitalize_word(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Company name implied by the label: the best transcript line, else the
/// capitalised label.
fn company_from_label(label: &str, raw_text: &str) -> String {
    find_best_company_line(label, raw_text)
        .map(String::from)
        .unwrap_or_else(|| capitalize_company(label))
}

/// Confirm or fill `extract.company` from the email domain.
///
/// Returns the new extract and whether the company changed. A replaced
/// company keeps its score; a filled one scores `weights.email_domain`.
pub fn correct_company(extract: FieldExtract, weights: &ConfidenceWeights) -> (FieldExtract, bool) {
    let (Some(email), Some(raw_text)) = (extract.email.clone(), extract.raw_text.clone()) else {
        return (extract, false);
    };
    let Some(label) = email_domain_label(&email) else {
        return (extract, false);
    };
    let label_lower = label.to_lowercase();

    match extract.company.clone() {
        Some(company) => {
            let company_lower = company.trim().to_lowercase();
            let matching =
                label_lower.contains(&company_lower) || company_lower.contains(&label_lower);
            if !matching {
                debug!("Company '{}' does not match domain '{}'; leaving it", company, label);
                return (extract, false);
            }
            let corrected = company_from_label(label, &raw_text);
            if corrected == company {
                return (extract, false);
            }
            info!("Company corrected from email domain: '{}' → '{}'", company, corrected);
            let score = extract.confidence(Field::Company);
            (
                extract.with_field(Field::Company, Some(corrected), score, FieldSource::EmailDomain),
                true,
            )
        }
        None => {
            let usable = label.chars().count() >= 3 && label.chars().all(char::is_alphanumeric);
            if !usable {
                return (extract, false);
            }
            let filled = company_from_label(label, &raw_text);
            info!("Company filled from email domain: '{}'", filled);
            (
                extract.with_field(
                    Field::Company,
                    Some(filled),
                    weights.email_domain,
                    FieldSource::EmailDomain,
                ),
                true,
            )
        }
    }
}

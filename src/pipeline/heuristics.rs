//! Named predicates and normalisers over the card transcript, and the
//! heuristic fallback guesser built from them.
//!
//! The validator and the fallback share these functions, so "what a phone
//! looks like" or "what a person's name looks like" is decided in exactly
//! one place. Every function is pure.
//!
//! The guesser is deliberately conservative: when no line has the expected
//! shape the field stays `None`.

use crate::config::ConfidenceWeights;
use crate::output::{Field, FieldExtract, FieldSource};
use once_cell::sync::Lazy;
use regex::Regex;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap());

/// A Brazilian-shaped number: optional `+55`, optional DDD, 4–5 + 4 digits.
static BR_PHONE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\+55\s?)?(\(?\d{2}\)?\s?)?(\d{4,5}[-.\s]?\d{4})").unwrap()
});

/// A loosely-bounded run of digits and phone punctuation.
static PHONE_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[+0-9()\-. ]{8,}").unwrap());

/// Two-digit country prefix stripped from 12–13 digit numbers.
pub const COUNTRY_PREFIX: &str = "55";

const PHONE_KEYWORDS: [&str; 10] = [
    "tel", "tel.", "cel", "cel.", "mobile", "fone", "telefone", "celular", "whatsapp", "fax",
];

const ADDRESS_KEYWORDS: [&str; 8] = ["rua", "r.", "av", "av.", "avenida", "andar", "sala", "cep"];

/// Locales matched as substrings: several span more than one word.
const LOCALE_KEYWORDS: [&str; 8] = [
    "brasil",
    "brazil",
    "são paulo",
    "sao paulo",
    "rio de janeiro",
    "belo horizonte",
    "curitiba",
    "porto alegre",
];

// ── Predicates & normalisers ─────────────────────────────────────────────

/// Split a transcript into trimmed, non-empty lines.
pub fn transcript_lines(raw_text: &str) -> Vec<&str> {
    raw_text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect()
}

/// Keep only ASCII digits.
pub fn digits_only(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Normalise a candidate Brazilian phone to `DDD + number` digits.
///
/// Strips punctuation, drops a leading `55` country prefix when the result
/// has 12 or 13 digits, and accepts only 10 or 11 digits.
/// Idempotent on an already-normalised number.
pub fn normalize_brazil_phone(candidate: &str) -> Option<String> {
    let mut digits = digits_only(candidate);
    if digits.starts_with(COUNTRY_PREFIX) && (12..=13).contains(&digits.len()) {
        digits.drain(..COUNTRY_PREFIX.len());
    }
    matches!(digits.len(), 10 | 11).then_some(digits)
}

/// First email address in `text`.
pub fn extract_email(text: &str) -> Option<String> {
    EMAIL_RE.find(text).map(|m| m.as_str().to_string())
}

/// Best phone in `text`.
///
/// The first Brazilian-shaped match that normalises wins. Failing that,
/// every digit run on every line is normalised and the longest successful
/// normalisation wins (earliest on a tie).
pub fn extract_phone(text: &str) -> Option<String> {
    let shaped = text
        .lines()
        .flat_map(|line| BR_PHONE_RE.find_iter(line))
        .find_map(|m| normalize_brazil_phone(m.as_str()));
    if shaped.is_some() {
        return shaped;
    }

    let mut best: Option<String> = None;
    for line in text.lines() {
        for run in PHONE_RUN_RE.find_iter(line) {
            if let Some(phone) = normalize_brazil_phone(run.as_str()) {
                if best.as_ref().map_or(true, |b| phone.len() > b.len()) {
                    best = Some(phone);
                }
            }
        }
    }
    best
}

fn words_lower(line: &str) -> impl Iterator<Item = String> + '_ {
    line.split(|c: char| c.is_whitespace() || c == ':' || c == '/' || c == '|')
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

/// `true` when a whole word of `line` is a telephone label ("Tel", "Cel:").
pub fn has_phone_keyword(line: &str) -> bool {
    words_lower(line).any(|w| PHONE_KEYWORDS.contains(&w.as_str()))
}

/// `true` when a whole word of `line` is an address label ("Rua", "Av.").
pub fn has_address_keyword(line: &str) -> bool {
    words_lower(line).any(|w| ADDRESS_KEYWORDS.contains(&w.as_str()))
}

pub fn has_locale_keyword(line: &str) -> bool {
    let lower = line.to_lowercase();
    LOCALE_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// `true` for lines that look like a website.
pub fn looks_like_web(line: &str) -> bool {
    let lower = line.to_lowercase();
    lower.contains("www") || lower.contains(".com") || lower.contains("http")
}

fn has_digit(line: &str) -> bool {
    line.chars().any(|c| c.is_ascii_digit())
}

/// `true` for a line shaped like a person's name: 2–5 words of at least two
/// characters, at most 60 characters, and no digits, `@`, web address or
/// telephone label.
pub fn looks_like_person_name(line: &str) -> bool {
    let line = line.trim();
    if line.is_empty() || line.chars().count() > 60 {
        return false;
    }
    if has_digit(line) || line.contains('@') || looks_like_web(line) || has_phone_keyword(line) {
        return false;
    }
    let tokens: Vec<&str> = line.split_whitespace().collect();
    (2..=5).contains(&tokens.len()) && tokens.iter().all(|t| t.chars().count() >= 2)
}

// ── Line guessers ────────────────────────────────────────────────────────

/// First line shaped like a person's name.
///
/// In all three guessers, `taken` holds the values other fields already
/// hold, and lines equal to one of them are skipped.
pub fn guess_name<'a>(lines: &[&'a str], taken: &[&str]) -> Option<&'a str> {
    lines
        .iter()
        .copied()
        .find(|l| !is_taken(l, taken) && looks_like_person_name(l))
}

/// First free line with no digits, `@`, web address, address or telephone
/// label, 2–40 characters long.
pub fn guess_company<'a>(lines: &[&'a str], taken: &[&str]) -> Option<&'a str> {
    lines.iter().copied().find(|l| {
        !is_taken(l, taken)
            && !has_digit(l)
            && !l.contains('@')
            && !looks_like_web(l)
            && !has_address_keyword(l)
            && !has_phone_keyword(l)
            && (2..=40).contains(&l.chars().count())
    })
}

/// First free line that is not contact, address or locale text, 3–60
/// characters long.
pub fn guess_job_title<'a>(lines: &[&'a str], taken: &[&str]) -> Option<&'a str> {
    lines.iter().copied().find(|l| {
        !is_taken(l, taken)
            && !has_digit(l)
            && !l.contains('@')
            && !looks_like_web(l)
            && !has_address_keyword(l)
            && !has_locale_keyword(l)
            && !has_phone_keyword(l)
            && (3..=60).contains(&l.chars().count())
    })
}

fn is_taken(line: &str, taken: &[&str]) -> bool {
    taken.iter().any(|t| t.trim().eq_ignore_ascii_case(line))
}

// ── Fallback extract ─────────────────────────────────────────────────────

/// Derive all five fields from the transcript alone.
///
/// Every value is taken verbatim from a transcript line (or normalised from
/// one, for the phone), so the result is grounded by construction.
pub fn heuristic_extract(raw_text: &str, weights: &ConfidenceWeights) -> FieldExtract {
    let lines = transcript_lines(raw_text);
    let mut taken: Vec<&str> = Vec::new();
    let name = guess_name(&lines, &taken);
    taken.extend(name);
    let company = guess_company(&lines, &taken);
    taken.extend(company);
    let job_title = guess_job_title(&lines, &taken);

    let w = &weights.heuristic;
    let src = FieldSource::Heuristic;
    FieldExtract::empty(Some(raw_text.to_string()), None)
        .with_field(Field::Name, name.map(String::from), w.name, src)
        .with_field(Field::Email, extract_email(raw_text), w.email, src)
        .with_field(Field::Phone, extract_phone(raw_text), w.phone, src)
        .with_field(Field::Company, company.map(String::from), w.company, src)
        .with_field(Field::JobTitle, job_title.map(String::from), w.job_title, src)
}

/// Heuristic value for a single field, used to fill gaps the model left.
///
/// Lines already holding one of `current`'s other line fields are skipped,
/// so two fields never share a line.
pub fn heuristic_value(raw_text: &str, field: Field, current: &FieldExtract) -> Option<String> {
    let lines = transcript_lines(raw_text);
    let mut taken: Vec<&str> = [Field::Name, Field::Company, Field::JobTitle]
        .into_iter()
        .filter(|&f| f != field)
        .filter_map(|f| current.value(f))
        .collect();
    match field {
        Field::Name => guess_name(&lines, &taken).map(String::from),
        Field::Email => extract_email(raw_text),
        Field::Phone => extract_phone(raw_text),
        Field::Company => {
            if current.name.is_none() {
                let name = guess_name(&lines, &taken);
                taken.extend(name);
            }
            guess_company(&lines, &taken).map(String::from)
        }
        Field::JobTitle => guess_job_title(&lines, &taken).map(String::from),
    }
}

//! Response normalisation: turn free model text into a JSON object.
//!
//! ## Why is repair necessary?
//!
//! Even when told to "return ONLY the JSON", models routinely:
//!
//! - prefix the answer with prose ("Here is the JSON:")
//! - wrap it in ` ```json ... ``` ` fences
//! - leave keys or values unquoted (`{name: Joao}`)
//! - emit doubled or trailing commas
//! - write the string `"null"` where they mean JSON `null`
//!
//! The flow is: strip wrapping, slice from the first `{` to the last `}`,
//! try a strict parse, and on failure apply the repair rules once and parse
//! again. A response that is still unparseable yields `None` and the caller
//! falls back to heuristics; nothing here returns an error.
//!
//! Every function is pure: the same text always repairs to the same text.

use crate::output::RawExtraction;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use tracing::debug;

// ── Step 1: strip prose and fences ───────────────────────────────────────

static RE_FENCED_OBJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)```(?:json)?\s*(\{.*?\})\s*```").unwrap());

static RE_FENCE_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)```(?:json)?").unwrap());

static RE_PROSE_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*(?:aqui está|here is|here's|json:|resposta:|resultado:)\s*").unwrap()
});

/// Remove filler phrases and code fences around the answer.
///
/// Also used as the transcript of last resort when the response cannot be
/// parsed at all.
pub fn strip_wrapping(response: &str) -> String {
    let trimmed = response.trim();
    let inner = match RE_FENCED_OBJECT.captures(trimmed) {
        Some(caps) => caps[1].to_string(),
        None => RE_FENCE_MARKER.replace_all(trimmed, "").into_owned(),
    };
    RE_PROSE_PREFIX.replace_all(&inner, "").trim().to_string()
}

// ── Step 2: slice the object ─────────────────────────────────────────────

/// Text from the first `{` to the last `}` inclusive.
pub fn slice_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

// ── Step 3: repair rules ─────────────────────────────────────────────────

static RE_BARE_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([\{,]\s*)([A-Za-z_][A-Za-z0-9_]*)(\s*:)").unwrap());

static RE_DUP_COMMAS: Lazy<Regex> = Lazy::new(|| Regex::new(r",(?:\s*,)+").unwrap());

static RE_TRAILING_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r",\s*([\}\]])").unwrap());

static RE_BARE_VALUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#":(\s*)([^\s"\{\[\],\}][^",\}\]\n]*?)(\s*[,\}\]])"#).unwrap()
});

static RE_STRING_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""(?:[^"\\]|\\.)*""#).unwrap());

/// Apply the syntactic repair rules, in order:
///
/// 1. Quote bare keys (`{name:` → `{"name":`)
/// 2. Collapse duplicate commas
/// 3. Drop trailing commas before `}` / `]`
/// 4. Quote bare scalar values (`: Joao,` → `: "Joao",`), leaving bare `null`
/// 5. Turn the string `"null"` back into JSON `null`
///
/// Rules 1–4 rewrite only the text between string literals, so a transcript
/// such as `"Ana, Tel: 11 3333-4444"` passes through untouched.
pub fn repair_json(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    let mut last = 0;
    for literal in RE_STRING_LITERAL.find_iter(text) {
        out.push_str(&repair_structure(&text[last..literal.start()]));
        out.push_str(repair_literal(literal.as_str()));
        last = literal.end();
    }
    out.push_str(&repair_structure(&text[last..]));
    out
}

fn repair_structure(gap: &str) -> String {
    let s = RE_BARE_KEY.replace_all(gap, r#"${1}"${2}"${3}"#);
    let s = RE_DUP_COMMAS.replace_all(&s, ",");
    let s = RE_TRAILING_COMMA.replace_all(&s, "${1}");
    RE_BARE_VALUE
        .replace_all(&s, |caps: &Captures| {
            let value = &caps[2];
            if value.eq_ignore_ascii_case("null") {
                format!(":{}{}{}", &caps[1], value.to_lowercase(), &caps[3])
            } else {
                format!(r#":{}"{}"{}"#, &caps[1], value, &caps[3])
            }
        })
        .into_owned()
}

fn repair_literal(literal: &str) -> &str {
    if literal.eq_ignore_ascii_case(r#""null""#) {
        "null"
    } else {
        literal
    }
}

// ── Step 4: parse ────────────────────────────────────────────────────────

/// Parse a model response into a JSON object, repairing it if needed.
pub fn parse_json_object(response: &str) -> Option<Map<String, Value>> {
    let stripped = strip_wrapping(response);
    let candidate = slice_object(&stripped)?;

    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(candidate) {
        return Some(map);
    }

    let repaired = repair_json(candidate);
    match serde_json::from_str::<Value>(&repaired) {
        Ok(Value::Object(map)) => {
            debug!("Response parsed after repair");
            Some(map)
        }
        _ => {
            debug!("Response unparseable after repair");
            None
        }
    }
}

/// Read a string-ish property. Missing, JSON `null`, blank and the literal
/// text "null" all read as `None`; numbers and booleans are stringified.
pub fn string_property(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    let value = keys.iter().find_map(|k| obj.get(*k))?;
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty() && !text.eq_ignore_ascii_case("null")).then_some(text)
}

/// Parse the field guesses out of an extraction or refinement response.
pub fn parse_raw_fields(response: &str) -> Option<RawExtraction> {
    let obj = parse_json_object(response)?;
    Some(RawExtraction {
        raw_text: string_property(&obj, &["rawText", "raw_text"]),
        name: string_property(&obj, &["name"]),
        email: string_property(&obj, &["email"]),
        phone: string_property(&obj, &["phone"]),
        company: string_property(&obj, &["company"]),
        job_title: string_property(&obj, &["jobTitle", "job_title"]),
    })
}

/// Parse the answer to the phone-only question.
pub fn parse_phone_reply(response: &str) -> Option<String> {
    string_property(&parse_json_object(response)?, &["phone"])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fences_and_prose() {
        let r = "Here is the JSON:\n```json\n{\"name\": \"Ana\"}\n```\nHope it helps";
        assert_eq!(strip_wrapping(r), "{\"name\": \"Ana\"}");
    }

    #[test]
    fn strips_unclosed_fence() {
        assert_eq!(strip_wrapping("```json\n{\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn strips_portuguese_prefix() {
        assert_eq!(strip_wrapping("Resposta: {\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn slices_outermost_braces() {
        assert_eq!(slice_object("x {\"a\":{\"b\":1}} y"), Some("{\"a\":{\"b\":1}}"));
        assert_eq!(slice_object("no json"), None);
        assert_eq!(slice_object("} {"), None);
    }

    #[test]
    fn repairs_unquoted_keys_and_values() {
        let repaired = repair_json("{name: Joao, email: joao@x.com}");
        assert_eq!(repaired, r#"{"name": "Joao", "email": "joao@x.com"}"#);
    }

    #[test]
    fn repairs_commas() {
        assert_eq!(repair_json(r#"{"a": "1",, "b": "2",}"#), r#"{"a": "1", "b": "2"}"#);
    }

    #[test]
    fn null_string_becomes_null() {
        assert_eq!(repair_json(r#"{"phone": "NULL"}"#), r#"{"phone": null}"#);
        assert_eq!(repair_json(r#"{"phone": null,}"#), r#"{"phone": null}"#);
    }

    #[test]
    fn repair_leaves_string_contents_alone() {
        let broken = r#"{"rawText": "Ana Lima, Tel: 11 3333-4444", name: Ana Lima}"#;
        assert_eq!(
            repair_json(broken),
            r#"{"rawText": "Ana Lima, Tel: 11 3333-4444", "name": "Ana Lima"}"#
        );

        let reply = r#"{"rawText": "Ana Lima\nTel: 11 3333-4444, Cel: 11 98765-4321", name: Ana Lima,}"#;
        let raw = parse_raw_fields(reply).expect("repaired");
        assert_eq!(
            raw.raw_text.as_deref(),
            Some("Ana Lima\nTel: 11 3333-4444, Cel: 11 98765-4321")
        );
        assert_eq!(raw.name.as_deref(), Some("Ana Lima"));
    }

    #[test]
    fn bare_null_is_not_quoted() {
        assert_eq!(
            repair_json("{name: NULL, email: x@y.com}"),
            r#"{"name": null, "email": "x@y.com"}"#
        );
    }

    #[test]
    fn repair_is_deterministic() {
        let input = "{name: Joao,, phone: null, }";
        assert_eq!(repair_json(input), repair_json(input));
    }

    #[test]
    fn strict_json_untouched() {
        let obj = parse_json_object(r#"{"rawText": "Tel: 11, Fax: 12", "name": null}"#)
            .expect("valid json");
        assert_eq!(
            string_property(&obj, &["rawText"]).as_deref(),
            Some("Tel: 11, Fax: 12")
        );
        assert_eq!(string_property(&obj, &["name"]), None);
    }

    #[test]
    fn parses_malformed_guesses() {
        let raw = parse_raw_fields("{name: Joao, email: joao@x.com}").expect("repaired");
        assert_eq!(raw.name.as_deref(), Some("Joao"));
        assert_eq!(raw.email.as_deref(), Some("joao@x.com"));
        assert_eq!(raw.raw_text, None);
    }

    #[test]
    fn unparseable_returns_none() {
        assert_eq!(parse_raw_fields("I could not read the card."), None);
        assert_eq!(parse_raw_fields("{\"name\": \"Ana\" \"email\"}"), None);
    }

    #[test]
    fn null_like_values_read_as_none() {
        let raw = parse_raw_fields(r#"{"name": "null", "company": "  ", "jobTitle": 7}"#)
            .expect("valid json");
        assert_eq!(raw.name, None);
        assert_eq!(raw.company, None);
        assert_eq!(raw.job_title.as_deref(), Some("7"));
    }

    #[test]
    fn phone_reply() {
        assert_eq!(
            parse_phone_reply("```json\n{\"phone\":\"(11) 3333-4444\"}\n```").as_deref(),
            Some("(11) 3333-4444")
        );
        assert_eq!(parse_phone_reply("{\"phone\":null}"), None);
    }
}

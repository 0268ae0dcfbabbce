//! Prompts for the three model passes.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth**: the JSON contract the model is asked to
//!    honour lives next to the text that asks for it, so the repair and
//!    validation code in [`crate::pipeline`] has one place to agree with.
//!
//! 2. **Testability**: unit tests inspect prompts directly without a model.
//!
//! Callers can override the extraction prompt and the refinement context via
//! [`crate::config::ExtractionConfig`], or inject a [`PromptSource`] backed by
//! stored configuration. Prompts are resolved once per card by
//! [`resolve_prompts`], never re-read mid-pipeline.

use crate::config::ExtractionConfig;
use async_trait::async_trait;
use tracing::debug;

/// Default prompt for the primary vision pass.
///
/// Asks for the full transcript plus five guesses in one JSON object. The
/// keys here are the ones [`crate::pipeline::repair::parse_raw_fields`] reads.
pub const DEFAULT_EXTRACTION_PROMPT: &str = r#"You are an OCR engine.

Transcribe ALL visible text on the business card in the image. Return ONLY a valid JSON object with exactly these keys:

{"rawText":"full card text, one line per line","name":null,"email":null,"phone":null,"company":null,"jobTitle":null}

RULES:
- NEVER invent information. If you cannot read something, use null.
- rawText must contain ONLY visible text, one card line per line, no comments.
- If you fill name/email/phone/company/jobTitle, copy the value EXACTLY from rawText.
- Return ONLY the JSON (no markdown, no extra text)."#;

/// Prompt for the narrow second vision pass, issued only when no phone
/// survived validation of the primary pass.
pub const PHONE_ONLY_PROMPT: &str = r#"Extract ONLY the telephone/mobile number from the business card in the image.

Return ONLY a valid JSON object in the form:
{"phone":"number"}

RULES:
- NEVER invent. If there is no number, return {"phone":null}.
- Include only the number with its area code (DDD). A +55 prefix may be kept; add no other text."#;

/// Default context block for the text-only refinement pass.
///
/// The transcript is appended by [`build_refinement_prompt`].
pub const DEFAULT_CONTEXT_PROMPT: &str = r#"Analyse the following text, transcribed from a business card, and identify the requested fields.

Return ONLY a valid JSON object with this structure:
{
  "name": "full name of the person or null",
  "email": "email or null",
  "phone": "telephone (digits only, with DDD, without +55) or null",
  "company": "company name or null",
  "jobTitle": "role/position or null"
}

RULES:
- NEVER invent information. If a field is not present, use null.
- SPELLING: the text may contain OCR errors. Apply only MINIMAL correction of obvious character-recognition mistakes and keep as much of the original text as possible.
  Examples: "Secretria" -> "Secretaria", "Teanologia" -> "Tecnologia", "Inovacäo" -> "Inovação".
  Do NOT change proper names, URLs, emails or phone numbers (except to normalise the phone format).
- Values must match the transcribed text (after minimal correction).
- Phone: digits only (DDD + number, 10 or 11 digits). Drop a +55 prefix. Remove spaces, dots and hyphens.
- Email: a valid email address, exactly as it appears.
- Name: usually at the top of the card, 2 to 5 words.
- Company: usually below the name or on its own line. When an email is present, its domain (after the @, before .com/.com.br) usually names the company; use it to check the spelling.
- Job title: usually between the name and the company, or just below the name.
- Return ONLY the JSON, no markdown, no explanations, no extra text."#;

/// Marker that separates the context block from the transcript.
pub const TRANSCRIPT_MARKER: &str = "EXTRACTED TEXT:";

/// Build the full refinement prompt: context block, marker, transcript.
pub fn build_refinement_prompt(context: &str, raw_text: &str) -> String {
    format!("{}\n\n{}\n{}", context.trim_end(), TRANSCRIPT_MARKER, raw_text)
}

/// Stored prompt configuration, such as a settings table the host
/// application lets administrators edit.
///
/// Both methods return `None` when nothing is stored; blank text is treated
/// the same as `None`.
#[async_trait]
pub trait PromptSource: Send + Sync {
    /// Stored replacement for [`DEFAULT_EXTRACTION_PROMPT`].
    async fn extraction_prompt(&self) -> Option<String> {
        None
    }

    /// Stored replacement for [`DEFAULT_CONTEXT_PROMPT`].
    async fn context_prompt(&self) -> Option<String>;
}

/// The prompts used for one card, fixed at the start of the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPrompts {
    pub extraction: String,
    pub context: String,
}

/// Resolve both prompts: explicit config override, then the stored
/// [`PromptSource`], then the built-in default.
pub async fn resolve_prompts(config: &ExtractionConfig) -> ResolvedPrompts {
    let (stored_extraction, stored_context) = match &config.prompt_source {
        Some(source) => (
            source.extraction_prompt().await,
            source.context_prompt().await,
        ),
        None => (None, None),
    };

    let extraction = pick(
        config.extraction_prompt.as_deref(),
        stored_extraction,
        DEFAULT_EXTRACTION_PROMPT,
        "extraction",
    );
    let context = pick(
        config.context_prompt.as_deref(),
        stored_context,
        DEFAULT_CONTEXT_PROMPT,
        "context",
    );
    ResolvedPrompts {
        extraction,
        context,
    }
}

fn pick(explicit: Option<&str>, stored: Option<String>, default: &str, what: &str) -> String {
    if let Some(p) = explicit.filter(|p| !p.trim().is_empty()) {
        debug!("Using configured {} prompt", what);
        return p.to_string();
    }
    if let Some(p) = stored.filter(|p| !p.trim().is_empty()) {
        debug!("Using stored {} prompt", what);
        return p;
    }
    debug!("Using default {} prompt", what);
    default.to_string()
}

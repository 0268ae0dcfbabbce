//! Result types: the per-card contact record and run statistics.
//!
//! [`FieldExtract`] is the durable unit the pipeline hands back. Every stage
//! takes one by value and returns a new one; nothing mutates an extract after
//! it has been returned to the caller.

use crate::error::StageError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the five contact fields read from a card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    Name,
    Email,
    Phone,
    Company,
    JobTitle,
}

impl Field {
    /// All fields, in the order they are reported.
    pub const ALL: [Field; 5] = [
        Field::Name,
        Field::Email,
        Field::Phone,
        Field::Company,
        Field::JobTitle,
    ];

    /// The JSON key used by the model contract (`jobTitle`, not `job_title`).
    pub fn key(self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::Email => "email",
            Field::Phone => "phone",
            Field::Company => "company",
            Field::JobTitle => "jobTitle",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A value for each of the five fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerField<T> {
    pub name: T,
    pub email: T,
    pub phone: T,
    pub company: T,
    pub job_title: T,
}

impl<T> PerField<T> {
    /// Build from a function of the field.
    pub fn from_fn(mut f: impl FnMut(Field) -> T) -> Self {
        Self {
            name: f(Field::Name),
            email: f(Field::Email),
            phone: f(Field::Phone),
            company: f(Field::Company),
            job_title: f(Field::JobTitle),
        }
    }

    pub fn get(&self, field: Field) -> &T {
        match field {
            Field::Name => &self.name,
            Field::Email => &self.email,
            Field::Phone => &self.phone,
            Field::Company => &self.company,
            Field::JobTitle => &self.job_title,
        }
    }

    pub fn get_mut(&mut self, field: Field) -> &mut T {
        match field {
            Field::Name => &mut self.name,
            Field::Email => &mut self.email,
            Field::Phone => &mut self.phone,
            Field::Company => &mut self.company,
            Field::JobTitle => &mut self.job_title,
        }
    }
}

/// Per-field confidence in `[0, 1]`; a missing field always scores 0.
pub type ConfidenceScores = PerField<f64>;

impl ConfidenceScores {
    /// Mean over all five fields, missing fields included as 0.
    pub fn average(&self) -> f64 {
        Field::ALL.iter().map(|f| *self.get(*f)).sum::<f64>() / Field::ALL.len() as f64
    }
}

/// Where a field value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSource {
    /// A vision-model guess that passed validation.
    Model,
    /// The phone-only second vision pass.
    PhoneRequery,
    /// A text-refinement guess that passed validation.
    Refinement,
    /// Derived from the transcript by line/regex heuristics.
    Heuristic,
    /// Derived from (or confirmed by) the email's domain label.
    EmailDomain,
}

/// Per-field provenance, `None` when the field is empty.
pub type FieldSources = PerField<Option<FieldSource>>;

/// What a model response said, after JSON repair and before validation.
///
/// Ephemeral: it is validated into a [`FieldExtract`] and then dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawExtraction {
    pub raw_text: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub job_title: Option<String>,
}

impl RawExtraction {
    pub fn get(&self, field: Field) -> Option<&str> {
        match field {
            Field::Name => self.name.as_deref(),
            Field::Email => self.email.as_deref(),
            Field::Phone => self.phone.as_deref(),
            Field::Company => self.company.as_deref(),
            Field::JobTitle => self.job_title.as_deref(),
        }
    }
}

/// A validated, normalised contact record read from one card.
///
/// Invariants upheld by every constructor in this crate:
/// - any non-`None` field is traceable to `raw_text`
/// - `phone` is 10 or 11 ASCII digits (DDD + number)
/// - every confidence lies in `[0, 1]`, and an empty field scores exactly 0
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldExtract {
    /// Full card transcript; the ground truth fields are validated against.
    pub raw_text: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub job_title: Option<String>,
    pub confidence_scores: ConfidenceScores,
    #[serde(default)]
    pub sources: FieldSources,
    /// Last raw model response, kept for audit.
    pub ai_raw_response: Option<String>,
}

impl FieldExtract {
    /// An extract with a transcript and no fields.
    pub fn empty(raw_text: Option<String>, ai_raw_response: Option<String>) -> Self {
        Self {
            raw_text,
            ai_raw_response,
            ..Self::default()
        }
    }

    pub fn value(&self, field: Field) -> Option<&str> {
        match field {
            Field::Name => self.name.as_deref(),
            Field::Email => self.email.as_deref(),
            Field::Phone => self.phone.as_deref(),
            Field::Company => self.company.as_deref(),
            Field::JobTitle => self.job_title.as_deref(),
        }
    }

    pub fn confidence(&self, field: Field) -> f64 {
        *self.confidence_scores.get(field)
    }

    pub fn source(&self, field: Field) -> Option<FieldSource> {
        *self.sources.get(field)
    }

    /// Return a copy with `field` set. An empty value forces the score to 0
    /// and clears the source; scores are clamped into `[0, 1]`.
    pub fn with_field(
        mut self,
        field: Field,
        value: Option<String>,
        score: f64,
        source: FieldSource,
    ) -> Self {
        let value = value.filter(|v| !v.trim().is_empty());
        let (score, source) = match value {
            Some(_) => (score.clamp(0.0, 1.0), Some(source)),
            None => (0.0, None),
        };
        *self.slot_mut(field) = value;
        *self.confidence_scores.get_mut(field) = score;
        *self.sources.get_mut(field) = source;
        self
    }

    /// Return a copy with `field` cleared.
    pub fn without_field(mut self, field: Field) -> Self {
        *self.slot_mut(field) = None;
        *self.confidence_scores.get_mut(field) = 0.0;
        *self.sources.get_mut(field) = None;
        self
    }

    pub fn with_ai_raw_response(mut self, response: Option<String>) -> Self {
        self.ai_raw_response = response;
        self
    }

    fn slot_mut(&mut self, field: Field) -> &mut Option<String> {
        match field {
            Field::Name => &mut self.name,
            Field::Email => &mut self.email,
            Field::Phone => &mut self.phone,
            Field::Company => &mut self.company,
            Field::JobTitle => &mut self.job_title,
        }
    }

    /// Number of non-empty fields.
    pub fn filled_count(&self) -> usize {
        Field::ALL
            .iter()
            .filter(|f| self.value(**f).is_some())
            .count()
    }

    /// `true` when the card yielded at least an email or a phone. That is the
    /// minimum a contact record needs to be useful.
    pub fn has_contact_channel(&self) -> bool {
        self.email.is_some() || self.phone.is_some()
    }

    /// Split `name` into first name and the remainder.
    pub fn split_name(&self) -> Option<(&str, Option<&str>)> {
        let name = self.name.as_deref()?.trim();
        match name.split_once(char::is_whitespace) {
            Some((first, rest)) => {
                let rest = rest.trim();
                Some((first, (!rest.is_empty()).then_some(rest)))
            }
            None => Some((name, None)),
        }
    }
}

/// Why the refinement pass did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// `RefinePolicy::Never`.
    Disabled,
    /// Transcript missing or too short to re-derive anything from.
    TranscriptTooShort,
    /// The primary extract already looks complete and confident.
    ExtractComplete,
}

/// What happened in the refinement pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RefinementOutcome {
    Skipped { reason: SkipReason },
    /// The refinement response parsed and was validated.
    Applied,
    /// The response could not be repaired; heuristics stood in for it.
    Unparseable,
    /// The model call failed; the pre-refinement extract passed through.
    Unavailable { error: StageError },
}

/// What happened in the phone-only re-query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PhoneRequeryOutcome {
    /// The primary pass already produced a validated phone.
    NotNeeded,
    /// Re-query turned off in the configuration.
    Disabled,
    /// A phone came back and survived validation.
    Found,
    /// The model answered but no grounded phone came out of it.
    NotFound,
    Failed { error: StageError },
}

/// Aggregate statistics for one card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub model_calls: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    /// `false` when the primary response could not be repaired into JSON.
    pub primary_parsed: bool,
    pub phone_requery: PhoneRequeryOutcome,
    pub refinement: RefinementOutcome,
    /// `true` when the email domain replaced or filled the company.
    pub company_corrected: bool,
    pub extraction_duration_ms: u64,
    pub refinement_duration_ms: u64,
    pub total_duration_ms: u64,
}

impl Default for ExtractionStats {
    fn default() -> Self {
        Self {
            model_calls: 0,
            total_input_tokens: 0,
            total_output_tokens: 0,
            primary_parsed: false,
            phone_requery: PhoneRequeryOutcome::NotNeeded,
            refinement: RefinementOutcome::Skipped {
                reason: SkipReason::Disabled,
            },
            company_corrected: false,
            extraction_duration_ms: 0,
            refinement_duration_ms: 0,
            total_duration_ms: 0,
        }
    }
}

/// Full result of one card: the merged record plus how it was reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutput {
    /// The merged, final record. This is what the caller persists.
    pub extract: FieldExtract,
    /// The validated extract before refinement, for audit.
    pub primary: FieldExtract,
    pub stats: ExtractionStats,
}

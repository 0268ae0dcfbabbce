//! Vision passes: the primary extraction and the phone-only re-query.
//!
//! The primary pass sends the card image with the extraction prompt and
//! validates every guess in the reply against the reply's own transcript.
//! When the reply cannot be repaired into JSON, the stripped reply text is
//! taken as the transcript and every field comes from heuristics.
//!
//! The re-query runs only when no phone survived validation. Its answer is
//! normalised and grounded like any other phone.

use crate::config::{ConfidenceWeights, ExtractionConfig};
use crate::error::{Stage, StageError};
use crate::output::{Field, FieldExtract, FieldSource, PhoneRequeryOutcome};
use crate::pipeline::encode::CardImage;
use crate::pipeline::heuristics::heuristic_extract;
use crate::pipeline::llm::{call_model, ModelClient, ModelReply, ModelRequest};
use crate::pipeline::repair::{parse_phone_reply, parse_raw_fields, strip_wrapping};
use crate::pipeline::validate::{validate_field, validate_guesses};
use crate::prompts::PHONE_ONLY_PROMPT;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of interpreting the primary reply.
#[derive(Debug, Clone)]
pub struct PrimaryRead {
    /// Validated guesses (or the heuristic extract when unparseable).
    pub extract: FieldExtract,
    /// `false` when the reply could not be repaired into JSON.
    pub parsed: bool,
}

/// Turn the primary reply into a validated extract. Pure.
pub fn interpret_primary(content: &str, weights: &ConfidenceWeights) -> PrimaryRead {
    let (extract, parsed) = match parse_raw_fields(content) {
        Some(raw) => {
            if raw.raw_text.is_none() {
                warn!("Extraction reply has no rawText; no guess can be grounded");
            }
            let extract = validate_guesses(
                &raw,
                raw.raw_text.as_deref(),
                &weights.extraction,
                FieldSource::Model,
            );
            (extract, true)
        }
        None => {
            warn!("Extraction reply is not JSON; deriving fields from its text");
            let stripped = strip_wrapping(content);
            let extract = if stripped.is_empty() {
                FieldExtract::default()
            } else {
                heuristic_extract(&stripped, weights)
            };
            (extract, false)
        }
    };
    PrimaryRead {
        extract: extract.with_ai_raw_response(Some(content.to_string())),
        parsed,
    }
}

/// Run the primary vision pass.
///
/// Any call failure is returned as-is; the orchestrator treats it as fatal.
pub async fn primary_pass(
    client: &dyn ModelClient,
    image: &CardImage,
    prompt: &str,
    config: &ExtractionConfig,
    cancel: &CancellationToken,
) -> Result<(PrimaryRead, ModelReply), StageError> {
    let request = ModelRequest {
        stage: Stage::Extraction,
        prompt: prompt.to_string(),
        image: Some(image.clone()),
        temperature: config.temperature,
        max_tokens: config.max_tokens,
    };
    let reply = call_model(client, request, config.api_timeout_secs, cancel).await?;
    let read = interpret_primary(&reply.content, &config.weights);
    debug!(
        "Primary pass: parsed={}, {} fields validated",
        read.parsed,
        read.extract.filled_count()
    );
    Ok((read, reply))
}

/// Result of the phone-only re-query.
#[derive(Debug, Clone)]
pub struct PhoneRequery {
    pub extract: FieldExtract,
    pub outcome: PhoneRequeryOutcome,
    /// The reply, when a call was made and answered.
    pub reply: Option<ModelReply>,
}

/// Ask the vision model for the phone alone when the extract has none.
///
/// Only cancellation is returned as `Err`; every other failure is recorded
/// in the outcome and the extract passes through unchanged.
pub async fn phone_requery(
    client: &dyn ModelClient,
    image: &CardImage,
    extract: FieldExtract,
    config: &ExtractionConfig,
    cancel: &CancellationToken,
) -> Result<PhoneRequery, StageError> {
    if extract.phone.is_some() {
        return Ok(PhoneRequery {
            extract,
            outcome: PhoneRequeryOutcome::NotNeeded,
            reply: None,
        });
    }
    if !config.phone_requery {
        return Ok(PhoneRequery {
            extract,
            outcome: PhoneRequeryOutcome::Disabled,
            reply: None,
        });
    }

    info!("No validated phone; re-querying the image for the phone only");
    let request = ModelRequest {
        stage: Stage::PhoneRequery,
        prompt: PHONE_ONLY_PROMPT.to_string(),
        image: Some(image.clone()),
        temperature: 0.0,
        max_tokens: config.phone_requery_max_tokens,
    };

    let reply = match call_model(client, request, config.api_timeout_secs, cancel).await {
        Ok(reply) => reply,
        Err(e) if e.is_cancelled() => return Err(e),
        Err(error) => {
            return Ok(PhoneRequery {
                extract,
                outcome: PhoneRequeryOutcome::Failed { error },
                reply: None,
            });
        }
    };

    let phone = match (parse_phone_reply(&reply.content), extract.raw_text.as_deref()) {
        (Some(candidate), Some(raw)) => validate_field(Field::Phone, &candidate, raw),
        _ => None,
    };

    let (extract, outcome) = match phone {
        Some(phone) => {
            info!("Phone re-query found {}", phone);
            let extract = extract.with_field(
                Field::Phone,
                Some(phone),
                config.weights.phone_requery,
                FieldSource::PhoneRequery,
            );
            (extract, PhoneRequeryOutcome::Found)
        }
        None => {
            debug!("Phone re-query produced no grounded phone");
            (extract, PhoneRequeryOutcome::NotFound)
        }
    };
    Ok(PhoneRequery {
        extract,
        outcome,
        reply: Some(reply),
    })
}

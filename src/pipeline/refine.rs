//! Refinement pass: re-derive the fields from the transcript with a
//! text-only model.
//!
//! The model never sees the image, only the context prompt and the
//! transcript from the primary pass. Its guesses go through the same repair
//! and validation as the primary reply, scored at refinement weight. A
//! reply that cannot be repaired is replaced by the heuristic extract of the
//! transcript. A failed call is not an error for the card: the outcome
//! records it and the pipeline carries on with the pre-refinement extract.

use crate::config::{ConfidenceWeights, ExtractionConfig, RefinePolicy, RefineThresholds};
use crate::error::{Stage, StageError};
use crate::output::{Field, FieldExtract, FieldSource, RefinementOutcome, SkipReason};
use crate::pipeline::heuristics::heuristic_extract;
use crate::pipeline::llm::{call_model, ModelClient, ModelReply, ModelRequest};
use crate::pipeline::repair::parse_raw_fields;
use crate::pipeline::validate::{fill_from_heuristics, validate_guesses};
use crate::prompts::build_refinement_prompt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Decide whether `extract` should be refined under `policy`.
///
/// `Err` carries the reason refinement is skipped.
pub fn should_refine(
    extract: &FieldExtract,
    policy: RefinePolicy,
    thresholds: &RefineThresholds,
) -> Result<(), SkipReason> {
    if policy == RefinePolicy::Never {
        return Err(SkipReason::Disabled);
    }

    let transcript_len = extract
        .raw_text
        .as_deref()
        .map_or(0, |t| t.trim().chars().count());
    if transcript_len < thresholds.min_transcript_chars.max(1) {
        return Err(SkipReason::TranscriptTooShort);
    }

    if policy == RefinePolicy::Always {
        return Ok(());
    }

    let incomplete = extract.filled_count() < thresholds.min_filled_fields
        || !extract.has_contact_channel()
        || extract.confidence_scores.average() < thresholds.min_average_confidence;
    if incomplete {
        Ok(())
    } else {
        Err(SkipReason::ExtractComplete)
    }
}

/// Turn the refinement reply into an extract over `raw_text`. Pure.
pub fn interpret_refinement(
    content: &str,
    raw_text: &str,
    weights: &ConfidenceWeights,
) -> (FieldExtract, RefinementOutcome) {
    let (extract, outcome) = match parse_raw_fields(content) {
        Some(raw) => {
            let validated = validate_guesses(
                &raw,
                Some(raw_text),
                &weights.refinement,
                FieldSource::Refinement,
            );
            let filled = fill_from_heuristics(validated, &[Field::Email, Field::Phone], weights);
            (filled, RefinementOutcome::Applied)
        }
        None => {
            warn!("Refinement reply is not JSON; using transcript heuristics");
            (heuristic_extract(raw_text, weights), RefinementOutcome::Unparseable)
        }
    };
    (
        extract.with_ai_raw_response(Some(content.to_string())),
        outcome,
    )
}

/// Result of the refinement pass.
#[derive(Debug, Clone)]
pub struct RefinePass {
    /// The refined extract; `None` when the model call failed.
    pub refined: Option<FieldExtract>,
    pub outcome: RefinementOutcome,
    pub reply: Option<ModelReply>,
}

/// Run the refinement pass over `extract`'s transcript.
///
/// Only cancellation is returned as `Err`.
pub async fn refine_pass(
    client: &dyn ModelClient,
    extract: &FieldExtract,
    context_prompt: &str,
    config: &ExtractionConfig,
    cancel: &CancellationToken,
) -> Result<RefinePass, StageError> {
    let raw_text = extract.raw_text.as_deref().unwrap_or_default();
    info!("Refining fields from {} transcript chars", raw_text.chars().count());

    let request = ModelRequest {
        stage: Stage::Refinement,
        prompt: build_refinement_prompt(context_prompt, raw_text),
        image: None,
        temperature: config.refine_temperature,
        max_tokens: config.refine_max_tokens,
    };

    match call_model(client, request, config.api_timeout_secs, cancel).await {
        Ok(reply) => {
            let (refined, outcome) = interpret_refinement(&reply.content, raw_text, &config.weights);
            debug!("Refinement {:?}: {} fields", outcome, refined.filled_count());
            Ok(RefinePass {
                refined: Some(refined),
                outcome,
                reply: Some(reply),
            })
        }
        Err(e) if e.is_cancelled() => Err(e),
        Err(error) => {
            warn!("Refinement unavailable, keeping pre-refinement extract: {}", error);
            Ok(RefinePass {
                refined: None,
                outcome: RefinementOutcome::Unavailable { error },
                reply: None,
            })
        }
    }
}

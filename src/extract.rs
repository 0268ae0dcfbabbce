//! Top-level extraction API.
//!
//! ## Why one orchestrator?
//!
//! Every pipeline stage is a pure function or a single model call. This
//! module is the only place that knows their order, decides which failures
//! are fatal and keeps the run statistics, so a caller gets one of two
//! outcomes: a [`FieldExtract`] or a [`CardError`].
//!
//! ```text
//! image ─▶ primary pass ─▶ phone re-query? ─▶ heuristic fill = A
//!                                                    │
//!          merge(A, B) ◀─ domain correction ◀─ refine? = B
//! ```

use crate::config::ExtractionConfig;
use crate::error::{CardError, StageError};
use crate::output::{
    ExtractionOutput, ExtractionStats, Field, FieldExtract, PhoneRequeryOutcome,
    RefinementOutcome,
};
use crate::pipeline::encode::CardImage;
use crate::pipeline::llm::{LlmClient, ModelClient, ModelReply};
use crate::pipeline::{domain, input, merge, refine, validate, vision};
use crate::prompts::resolve_prompts;
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default vision model when none is configured.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Extract contact fields from raw image bytes.
///
/// This is the narrow entry point: it returns only the merged extract.
/// Use [`extract_card`] for the pre-refinement extract and run statistics.
///
/// # Errors
/// - [`CardError::UnsupportedImageType`] / [`CardError::EmptyImage`] for a bad image
/// - [`CardError::ProviderNotConfigured`] when no model can be resolved
/// - [`CardError::ExtractionFailed`] / [`CardError::ExtractionTimeout`] when the
///   primary vision call fails
pub async fn extract_fields(
    bytes: &[u8],
    mime: &str,
    config: &ExtractionConfig,
) -> Result<FieldExtract, CardError> {
    let image = CardImage::new(bytes.to_vec(), mime)?;
    Ok(extract_card(&image, config).await?.extract)
}

/// Extract contact fields from a validated card image.
///
/// # Example
/// ```rust,no_run
/// use edgequake_card2contact::{extract_card, CardImage, ExtractionConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let bytes = std::fs::read("card.jpg")?;
/// let image = CardImage::new(bytes, "image/jpeg")?;
/// let output = extract_card(&image, &ExtractionConfig::default()).await?;
/// println!("{:?} <{:?}>", output.extract.name, output.extract.email);
/// # Ok(())
/// # }
/// ```
pub async fn extract_card(
    image: &CardImage,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, CardError> {
    extract_card_with_cancel(image, config, &CancellationToken::new()).await
}

/// Like [`extract_card`], aborting with [`CardError::Cancelled`] as soon as
/// `cancel` fires. A cancelled run never returns a partial merge.
pub async fn extract_card_with_cancel(
    image: &CardImage,
    config: &ExtractionConfig,
    cancel: &CancellationToken,
) -> Result<ExtractionOutput, CardError> {
    let clients = resolve_clients(config)?;
    run_pipeline(image, &clients, config, cancel).await
}

/// Resolve a path or URL to an image, then extract it.
pub async fn extract_from_input(
    input_str: &str,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, CardError> {
    info!("Extracting card: {}", input_str);
    let image = input::resolve_input(input_str, config.download_timeout_secs).await?;
    extract_card(&image, config).await
}

/// Synchronous wrapper around [`extract_from_input`].
///
/// Creates a new tokio runtime. Do not call from inside an async context.
pub fn extract_sync(
    input_str: &str,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, CardError> {
    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CardError::Internal(format!("Failed to create tokio runtime: {e}")))?;
    rt.block_on(extract_from_input(input_str, config))
}

// ── Pipeline ─────────────────────────────────────────────────────────────

/// The model clients for one run: vision extraction and text refinement.
#[derive(Clone)]
pub(crate) struct ModelClients {
    pub extraction: Arc<dyn ModelClient>,
    pub refinement: Arc<dyn ModelClient>,
}

/// Run every stage for one card with already-resolved clients.
pub(crate) async fn run_pipeline(
    image: &CardImage,
    clients: &ModelClients,
    config: &ExtractionConfig,
    cancel: &CancellationToken,
) -> Result<ExtractionOutput, CardError> {
    let total_start = Instant::now();
    let mut stats = ExtractionStats::default();

    // ── Step 1: Resolve prompts once for this card ───────────────────────
    let prompts = resolve_prompts(config).await;

    // ── Step 2: Primary vision pass (fatal on failure) ───────────────────
    info!("Primary extraction: {} bytes ({})", image.len(), image.mime());
    let (read, reply) = vision::primary_pass(
        clients.extraction.as_ref(),
        image,
        &prompts.extraction,
        config,
        cancel,
    )
    .await
    .map_err(StageError::into_fatal)?;
    record_call(&mut stats, Some(&reply));
    stats.primary_parsed = read.parsed;
    log_fields("Primary", &read.extract);

    // ── Step 3: Phone-only re-query ──────────────────────────────────────
    let requery = vision::phone_requery(
        clients.extraction.as_ref(),
        image,
        read.extract,
        config,
        cancel,
    )
    .await
    .map_err(StageError::into_fatal)?;
    if matches!(
        requery.outcome,
        PhoneRequeryOutcome::Found | PhoneRequeryOutcome::NotFound | PhoneRequeryOutcome::Failed { .. }
    ) {
        record_call(&mut stats, requery.reply.as_ref());
    }
    stats.phone_requery = requery.outcome;

    // ── Step 4: Fill remaining gaps from transcript heuristics ───────────
    let primary = validate::fill_from_heuristics(requery.extract, &Field::ALL, &config.weights);
    stats.extraction_duration_ms = total_start.elapsed().as_millis() as u64;
    log_fields("Pre-refinement", &primary);

    // ── Step 5: Refinement (optional, non-fatal) ─────────────────────────
    let refine_start = Instant::now();
    let refined = match refine::should_refine(&primary, config.refine_policy, &config.refine_thresholds) {
        Err(reason) => {
            debug!("Refinement skipped: {:?}", reason);
            stats.refinement = RefinementOutcome::Skipped { reason };
            Some(primary.clone())
        }
        Ok(()) => {
            let pass = refine::refine_pass(
                clients.refinement.as_ref(),
                &primary,
                &prompts.context,
                config,
                cancel,
            )
            .await
            .map_err(StageError::into_fatal)?;
            record_call(&mut stats, pass.reply.as_ref());
            stats.refinement = pass.outcome;
            pass.refined
        }
    };
    stats.refinement_duration_ms = refine_start.elapsed().as_millis() as u64;

    // ── Step 6: Company-domain correction ────────────────────────────────
    let refined = match refined {
        Some(extract) => {
            let (corrected, changed) = domain::correct_company(extract, &config.weights);
            stats.company_corrected = changed;
            corrected
        }
        None => primary.clone(),
    };

    // ── Step 7: Confidence merge ─────────────────────────────────────────
    if cancel.is_cancelled() {
        return Err(CardError::Cancelled);
    }
    let extract = merge::merge(&primary, &refined);
    debug_assert!(validate::is_grounded(&extract));
    stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
    log_fields("Merged", &extract);

    info!(
        "Card extracted: {} fields, {} model calls, {}ms",
        extract.filled_count(),
        stats.model_calls,
        stats.total_duration_ms
    );

    Ok(ExtractionOutput {
        extract,
        primary,
        stats,
    })
}

/// Count one model call and its tokens, when it answered.
fn record_call(stats: &mut ExtractionStats, reply: Option<&ModelReply>) {
    stats.model_calls += 1;
    if let Some(reply) = reply {
        stats.total_input_tokens += reply.input_tokens as u64;
        stats.total_output_tokens += reply.output_tokens as u64;
    }
}

fn log_fields(label: &str, extract: &FieldExtract) {
    info!(
        "{} fields: name={:?}, email={:?}, phone={:?}, company={:?}, jobTitle={:?}",
        label,
        extract.name,
        extract.email,
        extract.phone,
        extract.company,
        extract.job_title
    );
}

// ── Provider resolution ──────────────────────────────────────────────────

/// Resolve the extraction and refinement clients from config.
pub(crate) fn resolve_clients(config: &ExtractionConfig) -> Result<ModelClients, CardError> {
    let extraction: Arc<dyn ModelClient> = match &config.client {
        Some(client) => Arc::clone(client),
        None => Arc::new(LlmClient::new(resolve_provider(config)?)),
    };

    let refinement: Arc<dyn ModelClient> = if let Some(client) = &config.refine_client {
        Arc::clone(client)
    } else if let Some(provider) = &config.refine_provider {
        Arc::new(LlmClient::new(Arc::clone(provider)))
    } else if let Some(name) = config
        .refine_provider_name
        .as_deref()
        .or(config.refine_model.as_ref().and(config.provider_name.as_deref()))
    {
        let model = config
            .refine_model
            .as_deref()
            .or(config.model.as_deref())
            .unwrap_or(DEFAULT_MODEL);
        Arc::new(LlmClient::new(create_provider(name, model)?))
    } else {
        Arc::clone(&extraction)
    };

    Ok(ModelClients {
        extraction,
        refinement,
    })
}

/// Resolve the vision LLM provider from config.
fn resolve_provider(config: &ExtractionConfig) -> Result<Arc<dyn LLMProvider>, CardError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_provider(name, model);
    }

    // Honour EDGEQUAKE_LLM_PROVIDER + EDGEQUAKE_MODEL when both set
    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    // Prefer OpenAI when its key is present, even if other provider keys are too.
    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _) =
        ProviderFactory::from_env().map_err(|e| CardError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider auto-detected: {}\nSet OPENAI_API_KEY or pass --provider/--model.",
                e
            ),
        })?;

    Ok(llm_provider)
}

/// Instantiate a named provider with the given model.
fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, CardError> {
    debug!("Creating provider '{}' with model '{}'", provider_name, model);
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        CardError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

//! Configuration types for business-card extraction.
//!
//! All extraction behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. Every knob lives in one struct so a
//! config can be shared across concurrent cards and logged as a whole.
//!
//! Model identifiers, temperatures, token limits, confidence weights and
//! prompts are all *inputs* to the pipeline. None of them is pipeline state.

use crate::error::CardError;
use crate::output::ConfidenceScores;
use crate::pipeline::llm::ModelClient;
use crate::progress::ProgressCallback;
use crate::prompts::PromptSource;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Configuration for extracting contact fields from business cards.
///
/// Built via [`ExtractionConfig::builder()`] or [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_card2contact::{ExtractionConfig, RefinePolicy};
///
/// let config = ExtractionConfig::builder()
///     .model("gpt-4o-mini")
///     .refine_policy(RefinePolicy::Always)
///     .concurrency(2)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    // ── Primary vision pass ───────────────────────────────────────────────
    /// Vision model identifier, e.g. "gpt-4o-mini". If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-built model client. Takes precedence over every provider setting.
    pub client: Option<Arc<dyn ModelClient>>,

    /// Sampling temperature for the vision pass. Default: 0.0.
    ///
    /// The model is transcribing, so anything above zero only adds invented
    /// characters.
    pub temperature: f32,

    /// Maximum output tokens for the vision pass. Default: 500.
    pub max_tokens: usize,

    /// Issue the phone-only second pass when no phone survives validation. Default: true.
    pub phone_requery: bool,

    /// Maximum output tokens for the phone-only pass. Default: 150.
    pub phone_requery_max_tokens: usize,

    // ── Refinement pass ───────────────────────────────────────────────────
    /// Text model for refinement, e.g. "qwen2.5:7b". If None, reuses the vision client.
    pub refine_model: Option<String>,

    pub refine_provider_name: Option<String>,

    pub refine_provider: Option<Arc<dyn LLMProvider>>,

    pub refine_client: Option<Arc<dyn ModelClient>>,

    /// Sampling temperature for refinement. Default: 0.3.
    pub refine_temperature: f32,

    /// Maximum output tokens for refinement. Default: 2000.
    pub refine_max_tokens: usize,

    /// When to run refinement. Default: [`RefinePolicy::WhenIncomplete`].
    pub refine_policy: RefinePolicy,

    /// Gate used by [`RefinePolicy::WhenIncomplete`].
    pub refine_thresholds: RefineThresholds,

    // ── Scoring & prompts ─────────────────────────────────────────────────
    /// Per-source confidence weights.
    pub weights: ConfidenceWeights,

    /// Replacement for the built-in extraction prompt.
    pub extraction_prompt: Option<String>,

    /// Replacement for the built-in refinement context block.
    pub context_prompt: Option<String>,

    /// Stored prompt configuration, consulted once per card.
    pub prompt_source: Option<Arc<dyn PromptSource>>,

    // ── Runtime ───────────────────────────────────────────────────────────
    /// Per-model-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Cards processed at once by [`crate::extract_stream`]. Default: 4.
    ///
    /// Each card still runs its own passes strictly in sequence.
    pub concurrency: usize,

    /// Optional per-card progress events for batch runs.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            provider: None,
            client: None,
            temperature: 0.0,
            max_tokens: 500,
            phone_requery: true,
            phone_requery_max_tokens: 150,
            refine_model: None,
            refine_provider_name: None,
            refine_provider: None,
            refine_client: None,
            refine_temperature: 0.3,
            refine_max_tokens: 2000,
            refine_policy: RefinePolicy::default(),
            refine_thresholds: RefineThresholds::default(),
            weights: ConfidenceWeights::default(),
            extraction_prompt: None,
            context_prompt: None,
            prompt_source: None,
            api_timeout_secs: 60,
            download_timeout_secs: 120,
            concurrency: 4,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("client", &self.client.as_ref().map(|_| "<dyn ModelClient>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("phone_requery", &self.phone_requery)
            .field("refine_model", &self.refine_model)
            .field("refine_provider_name", &self.refine_provider_name)
            .field("refine_temperature", &self.refine_temperature)
            .field("refine_max_tokens", &self.refine_max_tokens)
            .field("refine_policy", &self.refine_policy)
            .field("refine_thresholds", &self.refine_thresholds)
            .field("weights", &self.weights)
            .field(
                "prompt_source",
                &self.prompt_source.as_ref().map(|_| "<dyn PromptSource>"),
            )
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn client(mut self, client: Arc<dyn ModelClient>) -> Self {
        self.config.client = Some(client);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn phone_requery(mut self, v: bool) -> Self {
        self.config.phone_requery = v;
        self
    }

    pub fn phone_requery_max_tokens(mut self, n: usize) -> Self {
        self.config.phone_requery_max_tokens = n;
        self
    }

    pub fn refine_model(mut self, model: impl Into<String>) -> Self {
        self.config.refine_model = Some(model.into());
        self
    }

    pub fn refine_provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.refine_provider_name = Some(name.into());
        self
    }

    pub fn refine_provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.refine_provider = Some(provider);
        self
    }

    pub fn refine_client(mut self, client: Arc<dyn ModelClient>) -> Self {
        self.config.refine_client = Some(client);
        self
    }

    pub fn refine_temperature(mut self, t: f32) -> Self {
        self.config.refine_temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn refine_max_tokens(mut self, n: usize) -> Self {
        self.config.refine_max_tokens = n;
        self
    }

    pub fn refine_policy(mut self, policy: RefinePolicy) -> Self {
        self.config.refine_policy = policy;
        self
    }

    pub fn refine_thresholds(mut self, thresholds: RefineThresholds) -> Self {
        self.config.refine_thresholds = thresholds;
        self
    }

    pub fn weights(mut self, weights: ConfidenceWeights) -> Self {
        self.config.weights = weights;
        self
    }

    pub fn extraction_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.extraction_prompt = Some(prompt.into());
        self
    }

    pub fn context_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.context_prompt = Some(prompt.into());
        self
    }

    pub fn prompt_source(mut self, source: Arc<dyn PromptSource>) -> Self {
        self.config.prompt_source = Some(source);
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, CardError> {
        let c = &self.config;
        if c.api_timeout_secs == 0 {
            return Err(CardError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        if c.max_tokens == 0 || c.refine_max_tokens == 0 || c.phone_requery_max_tokens == 0 {
            return Err(CardError::InvalidConfig(
                "Token limits must be ≥ 1".into(),
            ));
        }
        c.weights.validate()?;
        c.refine_thresholds.validate()?;
        Ok(self.config)
    }
}

// ── Refinement gating ────────────────────────────────────────────────────

/// When the text-only refinement pass runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefinePolicy {
    /// Refine every card that has a usable transcript.
    Always,
    /// Never refine; the validated primary extract is final.
    Never,
    /// Refine only when the primary extract looks incomplete or unsure. (default)
    #[default]
    WhenIncomplete,
}

/// Thresholds behind [`RefinePolicy::WhenIncomplete`].
///
/// A card is refined when its transcript has at least
/// `min_transcript_chars` characters AND any of: fewer than
/// `min_filled_fields` fields, neither email nor phone, or an average
/// confidence below `min_average_confidence`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RefineThresholds {
    pub min_transcript_chars: usize,
    pub min_filled_fields: usize,
    pub min_average_confidence: f64,
}

impl Default for RefineThresholds {
    fn default() -> Self {
        Self {
            min_transcript_chars: 10,
            min_filled_fields: 3,
            min_average_confidence: 0.7,
        }
    }
}

impl RefineThresholds {
    fn validate(&self) -> Result<(), CardError> {
        if !(0.0..=1.0).contains(&self.min_average_confidence) {
            return Err(CardError::InvalidConfig(format!(
                "min_average_confidence must be 0–1, got {}",
                self.min_average_confidence
            )));
        }
        if self.min_filled_fields > 5 {
            return Err(CardError::InvalidConfig(format!(
                "min_filled_fields must be 0–5, got {}",
                self.min_filled_fields
            )));
        }
        Ok(())
    }
}

// ── Confidence weights ───────────────────────────────────────────────────

/// Fixed per-source confidence weights.
///
/// A field's score is the weight of the source that produced it. The merge
/// compares these numbers across passes, so refinement weights sit at or
/// above extraction weights for the fields refinement is good at.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceWeights {
    /// Fields taken from the primary vision pass.
    pub extraction: ConfidenceScores,
    /// Fields taken from the refinement pass.
    pub refinement: ConfidenceScores,
    /// Fields derived by transcript heuristics.
    pub heuristic: ConfidenceScores,
    /// Phone found by the phone-only second pass.
    pub phone_requery: f64,
    /// Company filled from the email domain.
    pub email_domain: f64,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            extraction: ConfidenceScores {
                name: 0.9,
                email: 0.95,
                phone: 0.95,
                company: 0.85,
                job_title: 0.8,
            },
            refinement: ConfidenceScores {
                name: 0.9,
                email: 0.95,
                phone: 0.9,
                company: 0.85,
                job_title: 0.8,
            },
            heuristic: ConfidenceScores {
                name: 0.6,
                email: 0.9,
                phone: 0.8,
                company: 0.7,
                job_title: 0.6,
            },
            phone_requery: 0.75,
            email_domain: 0.75,
        }
    }
}

impl ConfidenceWeights {
    fn validate(&self) -> Result<(), CardError> {
        let sets = [
            ("extraction", &self.extraction),
            ("refinement", &self.refinement),
            ("heuristic", &self.heuristic),
        ];
        for (label, set) in sets {
            for field in crate::output::Field::ALL {
                let w = *set.get(field);
                if !(0.0..=1.0).contains(&w) {
                    return Err(CardError::InvalidConfig(format!(
                        "{label} weight for {field} must be 0–1, got {w}"
                    )));
                }
            }
        }
        for (label, w) in [
            ("phone_requery", self.phone_requery),
            ("email_domain", self.email_domain),
        ] {
            if !(0.0..=1.0).contains(&w) {
                return Err(CardError::InvalidConfig(format!(
                    "{label} weight must be 0–1, got {w}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = ExtractionConfig::default();
        assert_eq!(c.temperature, 0.0);
        assert_eq!(c.max_tokens, 500);
        assert_eq!(c.phone_requery_max_tokens, 150);
        assert_eq!(c.refine_max_tokens, 2000);
        assert_eq!(c.refine_policy, RefinePolicy::WhenIncomplete);
        assert_eq!(c.api_timeout_secs, 60);
        assert!(c.phone_requery);
    }

    #[test]
    fn setters_clamp() {
        let c = ExtractionConfig::builder()
            .temperature(9.0)
            .concurrency(0)
            .build()
            .expect("config");
        assert_eq!(c.temperature, 2.0);
        assert_eq!(c.concurrency, 1);
    }

    #[test]
    fn rejects_out_of_range_weight() {
        let mut weights = ConfidenceWeights::default();
        weights.heuristic.company = 1.2;
        let err = ExtractionConfig::builder()
            .weights(weights)
            .build()
            .expect_err("must reject");
        assert!(err.to_string().contains("heuristic"), "got: {err}");
    }

    #[test]
    fn rejects_zero_timeout() {
        assert!(ExtractionConfig::builder()
            .api_timeout_secs(0)
            .build()
            .is_err());
    }

    #[test]
    fn debug_hides_trait_objects() {
        let s = format!("{:?}", ExtractionConfig::default());
        assert!(s.contains("ExtractionConfig"));
        assert!(s.contains("refine_policy"));
    }
}

//! # edgequake-card2contact
//!
//! Turn a photographed business card into a validated contact record using
//! Vision Language Models (VLMs).
//!
//! ## Why this crate?
//!
//! Asking a vision model for the fields on a card works most of the time,
//! but models also invent plausible phone numbers, misspell company names
//! and wrap their JSON in prose. This crate treats every model answer as a
//! guess: the model must also return a verbatim transcript of the card, and
//! a field is kept only when it can be found in that transcript. Missing
//! fields are recovered by heuristics, an optional text-only pass refines the
//! result, and the email domain confirms the company name.
//!
//! ## Pipeline Overview
//!
//! ```text
//! Card image
//!  │
//!  ├─ 1. Input     resolve local file or download from URL
//!  ├─ 2. Encode    validate jpeg/png/webp → base64 ImageData
//!  ├─ 3. Vision    transcript + field guesses (+ phone-only re-query)
//!  ├─ 4. Repair    strip fences/prose, fix malformed JSON
//!  ├─ 5. Validate  drop every guess the transcript does not contain
//!  ├─ 6. Refine    optional text-only re-derivation from the transcript
//!  ├─ 7. Domain    confirm or fill the company from the email domain
//!  └─ 8. Merge     per-field confidence merge → FieldExtract
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_card2contact::{extract_from_input, ExtractionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = ExtractionConfig::default();
//!     let output = extract_from_input("card.jpg", &config).await?;
//!     println!("{:?} {:?} {:?}", output.extract.name, output.extract.email, output.extract.phone);
//!     eprintln!("{} model calls, {} tokens in",
//!         output.stats.model_calls,
//!         output.stats.total_input_tokens);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `card2contact` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-card2contact = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    ConfidenceWeights, ExtractionConfig, ExtractionConfigBuilder, RefinePolicy, RefineThresholds,
};
pub use error::{CardError, ModelError, Stage, StageError};
pub use extract::{
    extract_card, extract_card_with_cancel, extract_fields, extract_from_input, extract_sync,
};
pub use output::{
    ConfidenceScores, ExtractionOutput, ExtractionStats, Field, FieldExtract, FieldSource,
    FieldSources, PhoneRequeryOutcome, RawExtraction, RefinementOutcome, SkipReason,
};
pub use pipeline::encode::CardImage;
pub use pipeline::llm::{LlmClient, ModelClient, ModelReply, ModelRequest};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use prompts::PromptSource;
pub use stream::{extract_stream, extract_stream_with_cancel, CardResult, CardStream};
pub use tokio_util::sync::CancellationToken;

//! Error types for the edgequake-card2contact library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`CardError`] — **Fatal**: the extraction cannot produce a result at all
//!   (bad input, unsupported image type, provider not configured, the primary
//!   vision call failed, or the caller cancelled). Returned as
//!   `Err(CardError)` from the top-level `extract*` functions.
//!
//! * [`StageError`] — **Non-fatal**: an optional stage (phone re-query,
//!   refinement) could not run, so the pipeline continued without it. Stored
//!   inside [`crate::output::ExtractionStats`] so callers can see *why* a
//!   result has lower confidence instead of losing the whole card.
//!
//! Field rejections by the validator are neither: a fabricated field simply
//! becomes `None` with confidence 0.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-card2contact library.
#[derive(Debug, Error)]
pub enum CardError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Card image not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The image is not one of the supported card formats.
    #[error("Unsupported image type '{mime}' (expected image/jpeg, image/png or image/webp)")]
    UnsupportedImageType { mime: String },

    /// The image payload is empty.
    #[error("Card image is empty")]
    EmptyImage,

    // ── Model errors ──────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The primary vision extraction call failed outright.
    #[error("Card extraction failed: {detail}")]
    ExtractionFailed { detail: String },

    /// The primary vision extraction call exceeded the API timeout.
    #[error("Card extraction timed out after {secs}s")]
    ExtractionTimeout { secs: u64 },

    /// The caller cancelled the extraction; no partial result was produced.
    #[error("Card extraction cancelled")]
    Cancelled,

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// The pipeline stage that talks to an external model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Primary image → transcript + field guesses.
    Extraction,
    /// Narrow image → phone-only question.
    PhoneRequery,
    /// Text-only re-derivation from the transcript.
    Refinement,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Extraction => "extraction",
            Stage::PhoneRequery => "phone re-query",
            Stage::Refinement => "refinement",
        };
        f.write_str(s)
    }
}

/// A non-fatal error for a single model stage.
///
/// Produced by [`crate::pipeline::llm::call_model`]. For the primary pass the
/// orchestrator converts it into a [`CardError`]; for optional passes it is
/// recorded and the pipeline continues.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum StageError {
    /// The model call exceeded the API timeout.
    #[error("{stage}: model call timed out after {secs}s")]
    Timeout { stage: Stage, secs: u64 },

    /// The model call returned an error (network, HTTP status, provider).
    #[error("{stage}: model call failed: {detail}")]
    ModelFailed { stage: Stage, detail: String },

    /// The caller cancelled while the call was in flight.
    #[error("{stage}: cancelled")]
    Cancelled { stage: Stage },
}

impl StageError {
    /// `true` when the caller asked the pipeline to stop.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StageError::Cancelled { .. })
    }

    /// Convert a failure of the primary pass into the fatal error surfaced to callers.
    pub fn into_fatal(self) -> CardError {
        match self {
            StageError::Timeout { secs, .. } => CardError::ExtractionTimeout { secs },
            StageError::ModelFailed { detail, .. } => CardError::ExtractionFailed { detail },
            StageError::Cancelled { .. } => CardError::Cancelled,
        }
    }
}

/// An external model call failed before producing a reply.
///
/// Returned by [`crate::pipeline::llm::ModelClient`] implementations; the
/// pipeline wraps it into a [`StageError`] with the stage attached.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{detail}")]
pub struct ModelError {
    pub detail: String,
}

impl ModelError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

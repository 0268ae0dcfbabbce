//! The external-model boundary.
//!
//! Every pass talks to a model through [`ModelClient`]: one request in, one
//! free-text reply out. The pipeline stages after this point (repair,
//! validation, correction, merge) never see which provider answered, so a
//! vision model, a local OCR-plus-LLM stack or a scripted test double are
//! interchangeable.
//!
//! [`call_model`] wraps a client call with the per-call timeout and the
//! caller's cancellation token. There is no retry here: a failed call either
//! degrades the optional stage or surfaces to the caller, who owns backoff.

use crate::error::{ModelError, Stage, StageError};
use crate::pipeline::encode::CardImage;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Longest slice of a raw reply written to the debug log.
const LOG_PREVIEW_CHARS: usize = 500;

/// One request to an external model.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    /// Which pass is asking; used for logging and error attribution.
    pub stage: Stage,
    pub prompt: String,
    /// Card image for vision passes; `None` for text-only refinement.
    pub image: Option<CardImage>,
    pub temperature: f32,
    pub max_tokens: usize,
}

/// The model's free-text answer plus token accounting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelReply {
    pub content: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// A request/response model service.
///
/// Implementations must not interpret the reply; repair and validation
/// happen downstream.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, request: ModelRequest) -> Result<ModelReply, ModelError>;
}

/// [`ModelClient`] backed by an `edgequake-llm` provider.
pub struct LlmClient {
    provider: Arc<dyn LLMProvider>,
}

impl LlmClient {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl ModelClient for LlmClient {
    async fn complete(&self, request: ModelRequest) -> Result<ModelReply, ModelError> {
        let message = match &request.image {
            Some(image) => {
                ChatMessage::user_with_images(request.prompt.as_str(), vec![image.to_image_data()])
            }
            None => ChatMessage::user(request.prompt.as_str()),
        };
        let messages = vec![message];
        let options = CompletionOptions {
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
            ..Default::default()
        };

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| ModelError::new(e.to_string()))?;

        Ok(ModelReply {
            content: response.content,
            input_tokens: response.prompt_tokens,
            output_tokens: response.completion_tokens,
        })
    }
}

/// Issue one model call under a timeout, aborting if `cancel` fires.
///
/// Cancellation wins over a reply that races it, so a cancelled run never
/// goes on to merge partial results.
pub async fn call_model(
    client: &dyn ModelClient,
    request: ModelRequest,
    timeout_secs: u64,
    cancel: &CancellationToken,
) -> Result<ModelReply, StageError> {
    let stage = request.stage;
    if cancel.is_cancelled() {
        return Err(StageError::Cancelled { stage });
    }

    let start = Instant::now();
    let call = tokio::time::timeout(Duration::from_secs(timeout_secs), client.complete(request));

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            warn!("{}: cancelled after {:?}", stage, start.elapsed());
            Err(StageError::Cancelled { stage })
        }
        result = call => match result {
            Err(_) => {
                warn!("{}: timed out after {}s", stage, timeout_secs);
                Err(StageError::Timeout { stage, secs: timeout_secs })
            }
            Ok(Err(e)) => {
                warn!("{}: model call failed: {}", stage, e);
                Err(StageError::ModelFailed { stage, detail: e.to_string() })
            }
            Ok(Ok(reply)) => {
                debug!(
                    "{}: {} input tokens, {} output tokens, {:?}",
                    stage,
                    reply.input_tokens,
                    reply.output_tokens,
                    start.elapsed()
                );
                debug!("{} raw reply: {}", stage, preview(&reply.content));
                Ok(reply)
            }
        }
    }
}

/// First [`LOG_PREVIEW_CHARS`] characters of `text`, for logs.
pub fn preview(text: &str) -> String {
    match text.char_indices().nth(LOG_PREVIEW_CHARS) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

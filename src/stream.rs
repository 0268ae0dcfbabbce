//! Streaming batch API: emit cards as they complete.
//!
//! ## Why stream?
//!
//! A scan session can produce dozens of cards, and each one costs up to
//! three model round trips. [`extract_stream`] runs several cards at once
//! (bounded by `config.concurrency`) and yields a [`CardResult`] as soon as
//! each finishes, so callers can show records immediately instead of
//! waiting for the slowest card. Results arrive in completion order; sort
//! by `index` if order matters.
//!
//! A failed card never stops the batch: its error is carried in the
//! result and the other cards continue.

use crate::config::ExtractionConfig;
use crate::error::CardError;
use crate::extract::{resolve_clients, run_pipeline, ModelClients};
use crate::output::ExtractionOutput;
use crate::pipeline::input;
use crate::progress::{NoopProgressCallback, ProgressCallback};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Outcome of one card in a batch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardResult {
    /// 0-indexed position in the input list.
    pub index: usize,
    /// The path or URL as given.
    pub input: String,
    /// The extraction, when the card succeeded.
    pub output: Option<ExtractionOutput>,
    /// Fatal error message, when the card failed.
    pub error: Option<String>,
}

impl CardResult {
    pub fn is_success(&self) -> bool {
        self.output.is_some()
    }
}

/// A boxed stream of card results.
pub type CardStream = Pin<Box<dyn Stream<Item = CardResult> + Send>>;

/// Extract many cards, streaming results as they are ready.
///
/// Clients are resolved once for the whole batch, so a missing provider is
/// reported up front as `Err` rather than once per card.
///
/// # Example
/// ```rust,no_run
/// use edgequake_card2contact::{extract_stream, ExtractionConfig};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let inputs = vec!["front.jpg".to_string(), "https://example.com/card.png".to_string()];
/// let mut stream = extract_stream(inputs, &ExtractionConfig::default())?;
/// while let Some(card) = stream.next().await {
///     match (&card.output, &card.error) {
///         (Some(out), _) => println!("#{}: {:?}", card.index, out.extract.name),
///         (_, Some(e)) => eprintln!("#{}: {e}", card.index),
///         _ => {}
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub fn extract_stream(
    inputs: Vec<String>,
    config: &ExtractionConfig,
) -> Result<CardStream, CardError> {
    extract_stream_with_cancel(inputs, config, CancellationToken::new())
}

/// Like [`extract_stream`]; cancelling `cancel` fails every card still in
/// flight or not yet started with [`CardError::Cancelled`].
pub fn extract_stream_with_cancel(
    inputs: Vec<String>,
    config: &ExtractionConfig,
    cancel: CancellationToken,
) -> Result<CardStream, CardError> {
    let clients = resolve_clients(config)?;
    let total = inputs.len();
    let progress: ProgressCallback = config
        .progress_callback
        .clone()
        .unwrap_or_else(|| Arc::new(NoopProgressCallback));

    info!("Starting batch of {} cards (concurrency {})", total, config.concurrency);
    progress.on_batch_start(total);

    let succeeded = Arc::new(AtomicUsize::new(0));
    let remaining = Arc::new(AtomicUsize::new(total));
    if total == 0 {
        progress.on_batch_complete(0, 0);
    }

    let concurrency = config.concurrency;
    let config = config.clone();

    let s = stream::iter(inputs.into_iter().enumerate().map(move |(index, input)| {
        let clients = clients.clone();
        let config = config.clone();
        let cancel = cancel.clone();
        let progress = Arc::clone(&progress);
        let succeeded = Arc::clone(&succeeded);
        let remaining = Arc::clone(&remaining);
        async move {
            progress.on_card_start(index, total, &input);
            let result = process_card(&input, &clients, &config, &cancel).await;

            let card = match result {
                Ok(output) => {
                    progress.on_card_complete(index, total, output.extract.filled_count());
                    succeeded.fetch_add(1, Ordering::SeqCst);
                    CardResult {
                        index,
                        input,
                        output: Some(output),
                        error: None,
                    }
                }
                Err(e) => {
                    let message = e.to_string();
                    warn!("Card {} ({}) failed: {}", index + 1, input, message);
                    progress.on_card_error(index, total, &message);
                    CardResult {
                        index,
                        input,
                        output: None,
                        error: Some(message),
                    }
                }
            };

            if remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
                progress.on_batch_complete(total, succeeded.load(Ordering::SeqCst));
            }
            card
        }
    }))
    .buffer_unordered(concurrency);

    Ok(Box::pin(s))
}

async fn process_card(
    input_str: &str,
    clients: &ModelClients,
    config: &ExtractionConfig,
    cancel: &CancellationToken,
) -> Result<ExtractionOutput, CardError> {
    if cancel.is_cancelled() {
        return Err(CardError::Cancelled);
    }
    let image = input::resolve_input(input_str, config.download_timeout_secs).await?;
    run_pipeline(&image, clients, config, cancel).await
}

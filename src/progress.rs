//! Progress-callback trait for batch extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as [`crate::extract_stream`] works through a list of cards.
//!
//! # Why callbacks instead of channels?
//!
//! Callers can forward events to a job table, a WebSocket or a terminal
//! progress bar without the library knowing how the host application
//! communicates. The trait is `Send + Sync` because several cards are in
//! flight at once.
//!
//! # Example
//!
//! ```rust
//! use edgequake_card2contact::{ExtractionProgressCallback, ExtractionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl ExtractionProgressCallback for CountingCallback {
//!     fn on_card_complete(&self, index: usize, total: usize, filled_fields: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Card {}/{} done ({} fields)", index + 1, total, filled_fields);
//!     }
//! }
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { completed: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by [`crate::extract_stream`] as it processes each card.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. `on_card_*` may be called concurrently from
/// different tasks; protect shared state with atomics or a `Mutex`.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once before any card is read.
    fn on_batch_start(&self, total: usize) {
        let _ = total;
    }

    /// Called before a card's input is resolved.
    ///
    /// # Arguments
    /// * `index` — 0-indexed position in the input list
    /// * `total` — number of cards in the batch
    /// * `input` — the path or URL being processed
    fn on_card_start(&self, index: usize, total: usize, input: &str) {
        let _ = (index, total, input);
    }

    /// Called when a card produced a record.
    ///
    /// `filled_fields` is the number of non-empty fields in the merged extract.
    fn on_card_complete(&self, index: usize, total: usize, filled_fields: usize) {
        let _ = (index, total, filled_fields);
    }

    /// Called when a card failed fatally.
    fn on_card_error(&self, index: usize, total: usize, error: &str) {
        let _ = (index, total, error);
    }

    /// Called once after every card has been attempted.
    fn on_batch_complete(&self, total: usize, success_count: usize) {
        let _ = (total, success_count);
    }
}

/// A no-op implementation, used when no callback is configured.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;

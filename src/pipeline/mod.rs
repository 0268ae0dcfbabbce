//! Pipeline stages for business-card field extraction.
//!
//! Each submodule implements one step. Stages after the model boundary are
//! pure functions from one [`crate::output::FieldExtract`] to a new one, so
//! each is unit-testable without a model.
//!
//! ## Data Flow
//!
//! ```text
//! input ─▶ encode ─▶ vision ─▶ repair ─▶ validate ─▶ (phone re-query) ─▶ heuristics fill
//!                                                                         │
//!            merge ◀─ domain ◀─ validate ◀─ repair ◀─ refine (text only) ◀┘
//! ```
//!
//! 1. [`input`]      resolve a path or URL to image bytes
//! 2. [`encode`]     validate the mime type and base64-wrap the image
//! 3. [`llm`]        the model boundary: timeout, cancellation, no retries
//! 4. [`vision`]     primary extraction and the phone-only re-query
//! 5. [`repair`]     strip prose/fences and repair malformed JSON
//! 6. [`validate`]   reject guesses the transcript does not contain
//! 7. [`heuristics`] line and regex guessing from the transcript
//! 8. [`refine`]     gated text-only re-derivation of the fields
//! 9. [`domain`]     confirm or fill the company from the email domain
//! 10. [`merge`]     field-wise confidence merge of both extracts

pub mod domain;
pub mod encode;
pub mod heuristics;
pub mod input;
pub mod llm;
pub mod merge;
pub mod refine;
pub mod repair;
pub mod validate;
pub mod vision;

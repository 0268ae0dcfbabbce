//! Confidence merge of the pre-refinement and refined extracts.
//!
//! Field by field, the refined value wins when it exists and scores at
//! least as high as the original; otherwise the original value stays. The
//! merged score is the higher of the two. The transcript always comes from
//! the primary pass.

use crate::output::{Field, FieldExtract};

/// Merge `primary` (A) with `refined` (B).
///
/// `merge(a, a) == a` for any extract `a`.
pub fn merge(primary: &FieldExtract, refined: &FieldExtract) -> FieldExtract {
    let base = FieldExtract::empty(
        primary.raw_text.clone(),
        refined
            .ai_raw_response
            .clone()
            .or_else(|| primary.ai_raw_response.clone()),
    );

    Field::ALL.iter().fold(base, |acc, &field| {
        let a = primary.confidence(field);
        let b = refined.confidence(field);
        let chosen = match (primary.value(field), refined.value(field)) {
            (_, Some(v)) if b >= a => Some((v, refined.source(field))),
            (Some(v), _) => Some((v, primary.source(field))),
            (None, Some(v)) => Some((v, refined.source(field))),
            (None, None) => None,
        };
        match chosen {
            Some((value, Some(source))) => {
                acc.with_field(field, Some(value.to_string()), a.max(b), source)
            }
            _ => acc.without_field(field),
        }
    })
}

//! Reconciliation Engine
//!
//! Folds the per-file records of one upload batch into a single record.
//!
//! **Merge rule** (applied field by field, meta fields excluded):
//! 1. Accumulator empty/absent → take the incoming value
//! 2. Incoming non-empty and strictly longer (character count) → take it
//! 3. Otherwise keep the accumulator value
//!
//! "Longer wins" is a completeness heuristic, not a correctness check: a
//! longer garbled string beats a shorter correct one. The rule is kept as is
//! so results match what users already see.

use chrono::Utc;
use thiserror::Error;
use tracing::debug;

use crate::record::{CanonicalRecord, FieldValue};

/// Reconciliation failure
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReconcileError {
    /// No per-file record survived extraction
    #[error("All {total_files} document(s) failed extraction")]
    AllSourcesFailed { total_files: usize },
}

/// Merge the records of one batch.
///
/// `records` holds the successful per-file records in upload order;
/// `total_files` is how many files were submitted (including failures).
pub fn reconcile(
    records: Vec<CanonicalRecord>,
    total_files: usize,
) -> Result<CanonicalRecord, ReconcileError> {
    let files_processed = records.len();
    let mut sources = records.into_iter();

    let mut merged = sources
        .next()
        .ok_or(ReconcileError::AllSourcesFailed { total_files })?;

    for (offset, incoming) in sources.enumerate() {
        let replaced = merge_into(&mut merged, &incoming);
        debug!(
            source_index = offset + 1,
            replaced, "Merged extraction record into accumulator"
        );
    }

    merged.meta.success = Some(true);
    merged.meta.timestamp = Some(Utc::now());
    merged.meta.files_processed = Some(files_processed);
    merged.meta.total_files = Some(total_files);

    Ok(merged)
}

/// Merge one record into the accumulator; returns how many fields changed
pub fn merge_into(accumulator: &mut CanonicalRecord, incoming: &CanonicalRecord) -> usize {
    let mut changed = 0;
    for (name, value) in incoming.fields() {
        if should_adopt(accumulator.get(name), value) {
            if accumulator.get(name) != Some(value) {
                changed += 1;
            }
            accumulator.set(name, value.clone());
        }
    }
    changed
}

fn should_adopt(current: Option<&FieldValue>, incoming: &FieldValue) -> bool {
    let current = match current {
        None => return true,
        Some(value) if value.is_empty() => return true,
        Some(value) => value,
    };
    if incoming.is_empty() {
        return false;
    }
    match (incoming.char_len(), current.char_len()) {
        (Some(new_len), Some(old_len)) => new_len > old_len,
        _ => false,
    }
}

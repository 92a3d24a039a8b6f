//! Additive reconciliation of one snapshot into another.

use std::collections::HashSet;

use super::dedup::dedup_key;
use super::types::StatisticsSnapshot;

/// Outcome of folding a snapshot into an aggregate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeResult {
    /// Details that were not yet present and have been appended
    pub added: usize,
    /// Details whose dedup key was already present in their bucket
    pub skipped: usize,
}

/// Fold `incoming` into `target`.
///
/// A detail is appended to its `(api, model)` bucket unless a detail with the
/// same dedup key is already there. Existing entries are never reordered,
/// rewritten or removed, and buckets are only created when something is
/// appended to them. Running the same merge twice leaves `target` unchanged the
/// second time.
pub fn merge_snapshot(
    target: &mut StatisticsSnapshot,
    incoming: &StatisticsSnapshot,
) -> MergeResult {
    let mut result = MergeResult::default();

    for (api_key, api) in &incoming.apis {
        for (model, bucket) in &api.models {
            let existing = target
                .apis
                .get(api_key)
                .and_then(|a| a.models.get(model))
                .map(|m| m.details.as_slice())
                .unwrap_or_default();

            let mut seen: HashSet<String> = existing
                .iter()
                .map(|d| dedup_key(api_key, model, d))
                .collect();

            let mut fresh = Vec::new();
            for detail in &bucket.details {
                if seen.insert(dedup_key(api_key, model, detail)) {
                    fresh.push(detail.clone());
                    result.added += 1;
                } else {
                    result.skipped += 1;
                }
            }

            if !fresh.is_empty() {
                target
                    .apis
                    .entry(api_key.clone())
                    .or_default()
                    .models
                    .entry(model.clone())
                    .or_default()
                    .details
                    .extend(fresh);
            }
        }
    }

    result
}

//! Usage record types and the nested snapshot model.
//!
//! A [`StatisticsSnapshot`] groups [`RequestDetail`]s by API identifier and then
//! by model name:
//!
//! ```text
//! StatisticsSnapshot
//!   └─ apis: api key ──▶ ApiSnapshot
//!                          └─ models: model ──▶ ModelSnapshot
//!                                                 └─ details: [RequestDetail, ...]
//! ```
//!
//! Snapshots are built fresh by every load and consumed by the merge; nothing
//! in the store keeps a reference to one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================
// Tokens
// ============================================

/// Token usage breakdown for a single request.
///
/// Counters are tracked independently; `total_tokens` is whatever the producer
/// reported and is never recomputed by the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenStats {
    #[serde(default)]
    pub input_tokens: i64,
    #[serde(default)]
    pub output_tokens: i64,
    #[serde(default)]
    pub reasoning_tokens: i64,
    #[serde(default)]
    pub cached_tokens: i64,
    #[serde(default)]
    pub total_tokens: i64,
}

impl TokenStats {
    /// Component-wise sum, used for aggregate totals.
    pub fn saturating_add(self, other: TokenStats) -> TokenStats {
        TokenStats {
            input_tokens: self.input_tokens.saturating_add(other.input_tokens),
            output_tokens: self.output_tokens.saturating_add(other.output_tokens),
            reasoning_tokens: self.reasoning_tokens.saturating_add(other.reasoning_tokens),
            cached_tokens: self.cached_tokens.saturating_add(other.cached_tokens),
            total_tokens: self.total_tokens.saturating_add(other.total_tokens),
        }
    }
}

// ============================================
// Request detail
// ============================================

/// The normalized, storable shape of one usage event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDetail {
    /// When the request was made (UTC, nanosecond precision)
    pub timestamp: DateTime<Utc>,
    /// Source tag reported by the host
    #[serde(default)]
    pub source: String,
    /// Auth index reported by the host
    #[serde(default)]
    pub auth_index: String,
    /// Token breakdown
    #[serde(default)]
    pub tokens: TokenStats,
    /// Whether the request failed
    #[serde(default)]
    pub failed: bool,
}

// ============================================
// Snapshots
// ============================================

/// Ordered details for one model, chronological when produced by a load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    #[serde(default)]
    pub details: Vec<RequestDetail>,
}

/// Per-model snapshots for one API identifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiSnapshot {
    #[serde(default)]
    pub models: BTreeMap<String, ModelSnapshot>,
}

/// Point-in-time view of usage records keyed by API identifier then model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    #[serde(default)]
    pub apis: BTreeMap<String, ApiSnapshot>,
}

impl StatisticsSnapshot {
    /// Create an empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a detail to the bucket for `(api_key, model)`, creating it if needed.
    pub fn push(&mut self, api_key: &str, model: &str, detail: RequestDetail) {
        self.apis
            .entry(api_key.to_string())
            .or_default()
            .models
            .entry(model.to_string())
            .or_default()
            .details
            .push(detail);
    }

    /// Iterate over every `(api_key, model, detail)` triple.
    pub fn records(&self) -> impl Iterator<Item = (&str, &str, &RequestDetail)> {
        self.apis.iter().flat_map(|(api_key, api)| {
            api.models.iter().flat_map(move |(model, bucket)| {
                bucket
                    .details
                    .iter()
                    .map(move |detail| (api_key.as_str(), model.as_str(), detail))
            })
        })
    }

    /// Total number of details across all buckets
    pub fn record_count(&self) -> usize {
        self.apis
            .values()
            .flat_map(|api| api.models.values())
            .map(|bucket| bucket.details.len())
            .sum()
    }

    /// True when the snapshot holds no details
    pub fn is_empty(&self) -> bool {
        self.record_count() == 0
    }
}

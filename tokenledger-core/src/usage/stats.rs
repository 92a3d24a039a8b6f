//! In-memory usage aggregate and the process-wide statistics toggle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use super::merge::{merge_snapshot, MergeResult};
use super::types::{RequestDetail, StatisticsSnapshot, TokenStats};

// ============================================
// Statistics toggle
// ============================================

/// Runtime switch for usage accounting.
///
/// Read on every usage event from many request tasks and written rarely (config
/// load or reload), so it is a plain atomic. Clones share the same flag.
#[derive(Debug, Clone)]
pub struct StatisticsToggle(Arc<AtomicBool>);

impl StatisticsToggle {
    /// Create an independent toggle
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    /// The process-wide toggle. Enabled until configuration says otherwise.
    pub fn global() -> &'static StatisticsToggle {
        static GLOBAL: OnceLock<StatisticsToggle> = OnceLock::new();
        GLOBAL.get_or_init(|| StatisticsToggle::new(true))
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.0.store(enabled, Ordering::Release);
    }
}

impl Default for StatisticsToggle {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Whether the process-wide toggle is on
pub fn statistics_enabled() -> bool {
    StatisticsToggle::global().is_enabled()
}

/// Flip the process-wide toggle
pub fn set_statistics_enabled(enabled: bool) {
    StatisticsToggle::global().set_enabled(enabled);
}

// ============================================
// Aggregate
// ============================================

/// Request and token counts for some slice of the aggregate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageTotals {
    pub requests: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub tokens: TokenStats,
}

impl UsageTotals {
    fn add(&mut self, detail: &RequestDetail) {
        self.requests += 1;
        if detail.failed {
            self.failed += 1;
        } else {
            self.succeeded += 1;
        }
        self.tokens = self.tokens.saturating_add(detail.tokens);
    }
}

/// Totals for one `(api_key, model)` bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelTotals {
    pub api_key: String,
    pub model: String,
    pub totals: UsageTotals,
}

/// Host-owned in-memory usage aggregate.
///
/// Live traffic is added with [`record`](Self::record); persisted history is
/// folded in with [`merge_snapshot`](Self::merge_snapshot). The store never
/// holds a reference to this type.
#[derive(Debug, Default)]
pub struct RequestStatistics {
    inner: RwLock<StatisticsSnapshot>,
}

impl RequestStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one detail for a live request.
    pub fn record(&self, api_key: &str, model: &str, detail: RequestDetail) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(api_key, model, detail);
    }

    /// Copy of the current contents
    pub fn snapshot(&self) -> StatisticsSnapshot {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Fold a snapshot in, skipping details already present.
    pub fn merge_snapshot(&self, snapshot: &StatisticsSnapshot) -> MergeResult {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        merge_snapshot(&mut inner, snapshot)
    }

    /// Totals across every bucket
    pub fn totals(&self) -> UsageTotals {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut totals = UsageTotals::default();
        for (_, _, detail) in inner.records() {
            totals.add(detail);
        }
        totals
    }

    /// Per-bucket totals, ordered by API key then model
    pub fn model_totals(&self) -> Vec<ModelTotals> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut rows = Vec::new();
        for (api_key, api) in &inner.apis {
            for (model, bucket) in &api.models {
                let mut totals = UsageTotals::default();
                for detail in &bucket.details {
                    totals.add(detail);
                }
                rows.push(ModelTotals {
                    api_key: api_key.clone(),
                    model: model.clone(),
                    totals,
                });
            }
        }
        rows
    }
}

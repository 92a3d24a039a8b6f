//! Usage handler trait and the fan-out dispatcher.

use std::sync::Arc;

use chrono::Utc;

use super::event::{UsageContext, UsageEvent};
use crate::usage::{RequestStatistics, StatisticsToggle};

/// Receives every completed request.
///
/// Called on the request path, so implementations must return promptly and
/// must not fail the request. Anything slow belongs on a background task.
pub trait UsageHandler: Send + Sync {
    fn handle_usage(&self, ctx: &UsageContext, event: &UsageEvent);
}

/// Fans each event out to every registered handler, in registration order.
#[derive(Clone, Default)]
pub struct UsageDispatcher {
    handlers: Vec<Arc<dyn UsageHandler>>,
}

impl UsageDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn UsageHandler>) {
        self.handlers.push(handler);
    }

    /// Deliver `event` to every handler.
    ///
    /// An unset `requested_at` is stamped once here so that every handler
    /// derives the same dedup key for the event.
    pub fn publish(&self, ctx: &UsageContext, event: &UsageEvent) {
        if event.requested_at.is_some() {
            self.deliver(ctx, event);
        } else {
            let stamped = UsageEvent {
                requested_at: Some(Utc::now()),
                ..event.clone()
            };
            self.deliver(ctx, &stamped);
        }
    }

    fn deliver(&self, ctx: &UsageContext, event: &UsageEvent) {
        for handler in &self.handlers {
            handler.handle_usage(ctx, event);
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for UsageDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageDispatcher")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

/// Records live events into the in-memory aggregate.
#[derive(Debug, Clone)]
pub struct AggregateRecorder {
    stats: Arc<RequestStatistics>,
    toggle: StatisticsToggle,
}

impl AggregateRecorder {
    /// Recorder gated by the process-wide toggle
    pub fn new(stats: Arc<RequestStatistics>) -> Self {
        Self {
            stats,
            toggle: StatisticsToggle::global().clone(),
        }
    }

    pub fn with_toggle(mut self, toggle: StatisticsToggle) -> Self {
        self.toggle = toggle;
        self
    }
}

impl UsageHandler for AggregateRecorder {
    fn handle_usage(&self, ctx: &UsageContext, event: &UsageEvent) {
        if !self.toggle.is_enabled() {
            return;
        }
        let usage = event.normalize(ctx, Utc::now());
        self.stats.record(&usage.api_key, &usage.model, usage.detail);
    }
}

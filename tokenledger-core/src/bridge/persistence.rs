//! SQLite-backed usage handler.
//!
//! Every event is normalized on the calling thread and written on a background
//! task, so the request path never waits on SQLite. Write failures are logged
//! and dropped. At most `max_pending` writes are in flight; events arriving
//! while storage is stalled past that are counted and dropped.
//!
//! Restart recovery goes the other way: [`SqlitePersistence::load_and_merge`]
//! reads the whole table and folds it into the host's aggregate.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Notify;

use super::event::{UsageContext, UsageEvent};
use super::handler::UsageHandler;
use crate::db::StoreHandle;
use crate::error::Result;
use crate::usage::{MergeResult, RequestDetail, RequestStatistics, StatisticsToggle};

/// Default cap on background writes in flight
pub const DEFAULT_MAX_PENDING_WRITES: usize = 1024;

/// Persists usage events and restores them on startup.
///
/// Either dependency may be absent; the matching operations then do nothing.
#[derive(Debug, Clone)]
pub struct SqlitePersistence {
    store: Option<StoreHandle>,
    stats: Option<Arc<RequestStatistics>>,
    toggle: StatisticsToggle,
    pending: Arc<PendingWrites>,
    max_pending: usize,
}

impl SqlitePersistence {
    /// Handler gated by the process-wide statistics toggle
    pub fn new(store: Option<StoreHandle>, stats: Option<Arc<RequestStatistics>>) -> Self {
        Self {
            store,
            stats,
            toggle: StatisticsToggle::global().clone(),
            pending: Arc::new(PendingWrites::default()),
            max_pending: DEFAULT_MAX_PENDING_WRITES,
        }
    }

    /// Replace the toggle consulted on each event
    pub fn with_toggle(mut self, toggle: StatisticsToggle) -> Self {
        self.toggle = toggle;
        self
    }

    /// Cap the number of writes in flight; zero is treated as one
    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending.max(1);
        self
    }

    pub fn store(&self) -> Option<&StoreHandle> {
        self.store.as_ref()
    }

    /// Number of background writes not yet finished
    pub fn pending_count(&self) -> usize {
        self.pending.count.load(Ordering::Acquire)
    }

    /// Events dropped because the write backlog was full
    pub fn dropped_count(&self) -> u64 {
        self.pending.dropped.load(Ordering::Relaxed)
    }

    /// Wait until every write started so far has finished.
    pub async fn flush(&self) {
        self.pending.wait_idle().await;
    }

    /// Load every persisted record and merge it into the aggregate.
    ///
    /// Returns `Ok(None)` when either the store or the aggregate is missing.
    /// Load errors are returned and the aggregate is left untouched.
    pub async fn load_and_merge(&self) -> Result<Option<MergeResult>> {
        let (Some(store), Some(stats)) = (&self.store, &self.stats) else {
            return Ok(None);
        };

        let snapshot = store.load_all().await?;
        let result = stats.merge_snapshot(&snapshot);

        tracing::info!(
            added = result.added,
            skipped = result.skipped,
            "Restored usage statistics from SQLite"
        );

        Ok(Some(result))
    }

    fn spawn_write(
        &self,
        store: StoreHandle,
        api_key: String,
        model: String,
        detail: RequestDetail,
    ) {
        let Some(ticket) = self.pending.try_begin(self.max_pending) else {
            let dropped = self.pending.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(
                api_key = %api_key,
                model = %model,
                max_pending = self.max_pending,
                dropped,
                "Usage write backlog full, dropping record"
            );
            return;
        };

        let write = move || {
            let _ticket = ticket;
            if let Err(e) = store.store().insert_record(&api_key, &model, &detail) {
                tracing::error!(
                    api_key = %api_key,
                    model = %model,
                    error = %e,
                    "Failed to persist usage record to SQLite"
                );
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(write);
            }
            Err(_) => {
                if let Err(e) = std::thread::Builder::new()
                    .name("usage-write".to_string())
                    .spawn(write)
                {
                    tracing::error!(error = %e, "Failed to start usage write thread");
                }
            }
        }
    }
}

impl UsageHandler for SqlitePersistence {
    fn handle_usage(&self, ctx: &UsageContext, event: &UsageEvent) {
        let Some(store) = &self.store else {
            return;
        };
        if !self.toggle.is_enabled() {
            return;
        }

        let usage = event.normalize(ctx, Utc::now());
        self.spawn_write(store.clone(), usage.api_key, usage.model, usage.detail);
    }
}

/// In-flight write counter with an idle signal.
#[derive(Debug, Default)]
struct PendingWrites {
    count: AtomicUsize,
    dropped: AtomicU64,
    idle: Notify,
}

impl PendingWrites {
    /// Reserve a slot, or `None` when `limit` writes are already in flight
    fn try_begin(self: &Arc<Self>, limit: usize) -> Option<PendingTicket> {
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < limit).then_some(n + 1)
            })
            .ok()?;
        Some(PendingTicket(Arc::clone(self)))
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.count.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Marks one write finished when dropped, including on panic.
struct PendingTicket(Arc<PendingWrites>);

impl Drop for PendingTicket {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

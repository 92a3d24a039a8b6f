//! Usage records, their identity, and the in-memory aggregate.

mod dedup;
mod merge;
mod stats;
mod types;

pub use dedup::{dedup_key, format_timestamp};
pub use merge::{merge_snapshot, MergeResult};
pub use stats::{
    set_statistics_enabled, statistics_enabled, ModelTotals, RequestStatistics,
    StatisticsToggle, UsageTotals,
};
pub use types::{ApiSnapshot, ModelSnapshot, RequestDetail, StatisticsSnapshot, TokenStats};

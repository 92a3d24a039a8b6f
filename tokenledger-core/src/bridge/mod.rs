//! Bridge between the host's usage events and the store.
//!
//! The host publishes one [`UsageEvent`] per completed request through a
//! [`UsageDispatcher`]. [`SqlitePersistence`] writes each one to SQLite and,
//! at startup, restores everything persisted into the in-memory aggregate.

mod event;
mod handler;
mod persistence;

pub use event::{normalize_tokens, NormalizedUsage, UsageContext, UsageEvent, UNKNOWN};
pub use handler::{AggregateRecorder, UsageDispatcher, UsageHandler};
pub use persistence::{SqlitePersistence, DEFAULT_MAX_PENDING_WRITES};

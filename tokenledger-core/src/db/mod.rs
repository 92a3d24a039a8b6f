//! Database layer for tokenledger
//!
//! This module provides the storage layer using SQLite with:
//! - Schema migrations
//! - A single-connection usage store with dedup-on-insert
//! - An async handle that runs store calls on the blocking pool

mod cancel;
mod handle;
pub mod schema;
mod store;

pub use cancel::{CancelOnDrop, Cancellation};
pub use handle::StoreHandle;
pub use store::{PersistResult, StoreOptions, StoreState, UsageStore, DEFAULT_BUSY_TIMEOUT};

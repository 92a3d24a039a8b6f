//! # tokenledger-core
//!
//! Durable usage accounting for an API proxy.
//!
//! This library provides:
//! - A SQLite usage store with dedup-on-insert
//! - Content-derived record identity (the dedup key)
//! - A usage event bridge that persists events off the request path
//! - Snapshot merging for restoring history into the in-memory aggregate
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Architecture
//!
//! Records flow in two directions:
//! - **Write path:** host request → [`bridge::UsageDispatcher`] →
//!   [`bridge::SqlitePersistence`] → background `INSERT OR IGNORE`
//! - **Restore path:** [`UsageStore::load_all`] → [`usage::StatisticsSnapshot`] →
//!   [`usage::RequestStatistics::merge_snapshot`]
//!
//! Both sides agree on record identity through [`usage::dedup_key`], so a
//! record seen live and again on restore is counted once.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokenledger_core::bridge::SqlitePersistence;
//! use tokenledger_core::usage::RequestStatistics;
//! use tokenledger_core::{Config, StoreHandle, StoreOptions, UsageStore};
//!
//! # async fn run() -> tokenledger_core::Result<()> {
//! let config = Config::load()?;
//! config.apply_runtime();
//!
//! let options = StoreOptions { busy_timeout: config.storage.busy_timeout() };
//! let store = StoreHandle::new(UsageStore::open_with(config.database_path(), &options)?);
//! store.ensure_schema().await?;
//!
//! let stats = Arc::new(RequestStatistics::new());
//! let persistence = SqlitePersistence::new(Some(store), Some(stats));
//! persistence.load_and_merge().await?;
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use db::{PersistResult, StoreHandle, StoreOptions, StoreState, UsageStore};
pub use error::{Error, Result};
pub use usage::{dedup_key, merge_snapshot, MergeResult, RequestDetail, StatisticsSnapshot};

// Public modules
pub mod bridge;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod usage;

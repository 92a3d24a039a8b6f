//! Async access to a shared [`UsageStore`].
//!
//! SQLite calls block, so each operation runs on tokio's blocking pool. Every
//! call carries its own [`Cancellation`]; dropping the returned future before
//! it resolves (a `tokio::time::timeout`, a `select!` branch losing, shutdown)
//! raises it and the statement in flight is interrupted.

use std::sync::Arc;

use super::cancel::Cancellation;
use super::store::{PersistResult, UsageStore};
use crate::error::{Error, Result};
use crate::usage::{RequestDetail, StatisticsSnapshot};

/// Cloneable, thread-safe handle to a store.
#[derive(Debug, Clone)]
pub struct StoreHandle {
    store: Arc<UsageStore>,
}

impl StoreHandle {
    pub fn new(store: UsageStore) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    /// Borrow the underlying store for synchronous use
    pub fn store(&self) -> &UsageStore {
        &self.store
    }

    /// See [`UsageStore::ensure_schema`]
    pub async fn ensure_schema(&self) -> Result<()> {
        self.run(|store, cancel| store.ensure_schema_with(cancel))
            .await
    }

    /// See [`UsageStore::insert_record`]
    pub async fn insert_record(
        &self,
        api_key: String,
        model: String,
        detail: RequestDetail,
    ) -> Result<bool> {
        self.run(move |store, _| store.insert_record(&api_key, &model, &detail))
            .await
    }

    /// See [`UsageStore::load_all`]
    pub async fn load_all(&self) -> Result<StatisticsSnapshot> {
        self.run(|store, cancel| store.load_all_with(cancel)).await
    }

    /// See [`UsageStore::persist_snapshot`]
    pub async fn persist_snapshot(&self, snapshot: StatisticsSnapshot) -> Result<PersistResult> {
        self.run(move |store, cancel| store.persist_snapshot_with(&snapshot, cancel))
            .await
    }

    /// See [`UsageStore::close`]
    pub async fn close(&self) -> Result<()> {
        self.run(|store, _| store.close()).await
    }

    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&UsageStore, &Cancellation) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let cancel = Cancellation::new();
        let guard = cancel.drop_guard();

        let result = tokio::task::spawn_blocking(move || op(&store, &cancel))
            .await
            .map_err(|e| Error::Store(format!("store task failed: {}", e)))?;

        guard.disarm();
        result
    }
}

impl From<UsageStore> for StoreHandle {
    fn from(store: UsageStore) -> Self {
        Self::new(store)
    }
}

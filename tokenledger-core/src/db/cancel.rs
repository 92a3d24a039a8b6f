//! Cancellation for long-running store operations.
//!
//! A [`Cancellation`] is a shared flag. While an operation holds the connection
//! the store installs an SQLite progress handler that polls the flag, so raising
//! it aborts the statement in flight (and rolls back any open transaction).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// SQLite virtual machine instructions between flag checks
pub(crate) const PROGRESS_OPS: i32 = 1_000;

/// Shared cancellation flag for a single store operation.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Guard that cancels this flag when dropped, unless disarmed first.
    pub fn drop_guard(&self) -> CancelOnDrop {
        CancelOnDrop {
            flag: Some(self.clone()),
        }
    }

    pub(crate) fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}

/// Cancels the wrapped [`Cancellation`] on drop.
///
/// Held by async callers across the await on a blocking task: if the caller's
/// future is dropped (timeout, `select!`, shutdown) the operation is told to
/// stop.
#[derive(Debug)]
pub struct CancelOnDrop {
    flag: Option<Cancellation>,
}

impl CancelOnDrop {
    /// Completed normally; dropping no longer cancels.
    pub fn disarm(mut self) {
        self.flag = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(flag) = self.flag.take() {
            flag.cancel();
        }
    }
}

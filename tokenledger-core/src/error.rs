//! Error types for tokenledger-core

use thiserror::Error;

/// Main error type for the tokenledger-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (empty or invalid path, bad config file)
    #[error("configuration error: {0}")]
    Config(String),

    /// The database could not be opened
    #[error("store error: {0}")]
    Store(String),

    /// A store operation ran before the schema was ensured, or after close
    #[error("store not initialized")]
    NotInitialized,

    /// Schema creation failed
    #[error("schema error: {0}")]
    Schema(#[source] rusqlite::Error),

    /// Insert or transaction failure
    #[error("write error: {context}: {source}")]
    Write {
        context: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// Query failure while loading records
    #[error("read error: {context}: {source}")]
    Read {
        context: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// The caller gave up on the operation before it finished
    #[error("operation cancelled")]
    Cancelled,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn write(context: &'static str, source: rusqlite::Error) -> Self {
        if is_interrupt(&source) {
            return Error::Cancelled;
        }
        Error::Write { context, source }
    }

    pub(crate) fn read(context: &'static str, source: rusqlite::Error) -> Self {
        if is_interrupt(&source) {
            return Error::Cancelled;
        }
        Error::Read { context, source }
    }

    pub(crate) fn schema(source: rusqlite::Error) -> Self {
        if is_interrupt(&source) {
            return Error::Cancelled;
        }
        Error::Schema(source)
    }
}

fn is_interrupt(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::OperationInterrupted
    )
}

/// Result type alias for tokenledger-core
pub type Result<T> = std::result::Result<T, Error>;

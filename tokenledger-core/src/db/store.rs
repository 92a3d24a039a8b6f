//! Durable usage store
//!
//! Sole reader and writer of the `usage_records` table. The store owns exactly
//! one SQLite connection, so every write is serialized by the mutex in front of
//! it; WAL mode lets other processes read while we write.

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection};

use super::cancel::{Cancellation, PROGRESS_OPS};
use crate::config::expand_tilde;
use crate::error::{Error, Result};
use crate::usage::{dedup_key, format_timestamp, RequestDetail, StatisticsSnapshot, TokenStats};

/// How long a statement waits on another process's lock before failing
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Fallback layout for timestamps written by SQLite's `datetime()`
const LEGACY_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const INSERT_SQL: &str = r#"
    INSERT OR IGNORE INTO usage_records (
        api_key, model, timestamp, source, auth_index, failed,
        input_tokens, output_tokens, reasoning_tokens, cached_tokens, total_tokens,
        dedup_key
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
"#;

const SELECT_ALL_SQL: &str = r#"
    SELECT api_key, model, timestamp, source, auth_index, failed,
           input_tokens, output_tokens, reasoning_tokens, cached_tokens, total_tokens
    FROM usage_records
    ORDER BY timestamp ASC, id ASC
"#;

/// Lifecycle of a [`UsageStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StoreState {
    /// Default-constructed; no connection
    #[default]
    Uninitialized,
    /// Connection open, schema not yet ensured
    Open,
    /// Schema ensured; reads and writes allowed
    SchemaReady,
    /// Connection released
    Closed,
}

/// Options applied when opening the connection.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub busy_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

/// Rows written by [`UsageStore::persist_snapshot`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistResult {
    /// Rows inserted
    pub added: usize,
    /// Rows ignored because their dedup key already existed
    pub skipped: usize,
}

#[derive(Default)]
struct StoreInner {
    conn: Option<Connection>,
    state: StoreState,
}

/// SQLite-backed usage store.
///
/// `UsageStore::default()` is a valid, uninitialized handle: every operation on
/// it returns [`Error::NotInitialized`] and [`close`](Self::close) is a no-op.
#[derive(Default)]
pub struct UsageStore {
    inner: Mutex<StoreInner>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for UsageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageStore")
            .field("path", &self.path)
            .field("state", &self.state())
            .finish()
    }
}

impl UsageStore {
    /// Open or create a store at `path` with default options.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, &StoreOptions::default())
    }

    /// Open or create a store at `path`.
    ///
    /// A leading `~` is expanded and missing parent directories are created.
    pub fn open_with(path: impl AsRef<Path>, options: &StoreOptions) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(Error::Config("database path cannot be empty".to_string()));
        }
        let path = expand_tilde(path)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_private_dir(parent).map_err(|e| {
                Error::Store(format!(
                    "failed to create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let conn = Connection::open(&path).map_err(|e| {
            Error::Store(format!("failed to open database {}: {}", path.display(), e))
        })?;
        configure_connection(&conn, options).map_err(|e| {
            Error::Store(format!(
                "failed to configure database {}: {}",
                path.display(),
                e
            ))
        })?;

        tracing::debug!(path = %path.display(), "Opened usage store");

        Ok(Self {
            inner: Mutex::new(StoreInner {
                conn: Some(conn),
                state: StoreState::Open,
            }),
            path: Some(path),
        })
    }

    /// Open an in-memory store (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Store(format!("failed to open in-memory database: {}", e)))?;
        Ok(Self {
            inner: Mutex::new(StoreInner {
                conn: Some(conn),
                state: StoreState::Open,
            }),
            path: None,
        })
    }

    /// Resolved database path, if this store was opened from one
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Current lifecycle state
    pub fn state(&self) -> StoreState {
        self.lock().state
    }

    // ============================================
    // Schema
    // ============================================

    /// Create the table and indexes if missing. Safe to call on every startup.
    pub fn ensure_schema(&self) -> Result<()> {
        self.ensure_schema_with(&Cancellation::new())
    }

    /// [`ensure_schema`](Self::ensure_schema) that stops when `cancel` is raised.
    pub fn ensure_schema_with(&self, cancel: &Cancellation) -> Result<()> {
        let mut inner = self.lock();
        if inner.state == StoreState::SchemaReady {
            return Ok(());
        }
        let conn = match (inner.state, inner.conn.as_mut()) {
            (StoreState::Open, Some(conn)) => conn,
            _ => return Err(Error::NotInitialized),
        };
        with_cancellation(conn, cancel, |conn| super::schema::run_migrations(conn))?;
        inner.state = StoreState::SchemaReady;
        Ok(())
    }

    // ============================================
    // Writes
    // ============================================

    /// Persist one record. Returns `false` when the dedup key already existed.
    pub fn insert_record(
        &self,
        api_key: &str,
        model: &str,
        detail: &RequestDetail,
    ) -> Result<bool> {
        let mut inner = self.lock();
        let conn = ready_conn(&mut inner)?;

        let mut stmt = conn
            .prepare_cached(INSERT_SQL)
            .map_err(|e| Error::write("failed to prepare insert", e))?;
        let changed = execute_insert(&mut stmt, api_key, model, detail)
            .map_err(|e| Error::write("failed to insert record", e))?;

        Ok(changed > 0)
    }

    /// Persist every detail of `snapshot` in one transaction.
    pub fn persist_snapshot(&self, snapshot: &StatisticsSnapshot) -> Result<PersistResult> {
        self.persist_snapshot_with(snapshot, &Cancellation::new())
    }

    /// [`persist_snapshot`](Self::persist_snapshot) that stops when `cancel` is raised.
    ///
    /// Nothing is committed unless every insert succeeds.
    pub fn persist_snapshot_with(
        &self,
        snapshot: &StatisticsSnapshot,
        cancel: &Cancellation,
    ) -> Result<PersistResult> {
        let mut inner = self.lock();
        let conn = ready_conn(&mut inner)?;

        with_cancellation(conn, cancel, |conn| {
            // Dropping an uncommitted transaction rolls it back
            let tx = conn
                .transaction()
                .map_err(|e| Error::write("failed to begin transaction", e))?;

            let mut result = PersistResult::default();
            {
                let mut stmt = tx
                    .prepare_cached(INSERT_SQL)
                    .map_err(|e| Error::write("failed to prepare insert", e))?;

                for (api_key, model, detail) in snapshot.records() {
                    let changed = execute_insert(&mut stmt, api_key, model, detail)
                        .map_err(|e| Error::write("failed to insert record", e))?;
                    if changed > 0 {
                        result.added += 1;
                    } else {
                        result.skipped += 1;
                    }
                }
            }

            tx.commit()
                .map_err(|e| Error::write("failed to commit transaction", e))?;
            Ok(result)
        })
    }

    // ============================================
    // Reads
    // ============================================

    /// Load every record, grouped by API key and model, ascending by timestamp.
    ///
    /// Rows whose timestamp cannot be parsed are skipped rather than failing
    /// the load.
    pub fn load_all(&self) -> Result<StatisticsSnapshot> {
        self.load_all_with(&Cancellation::new())
    }

    /// [`load_all`](Self::load_all) that stops when `cancel` is raised.
    pub fn load_all_with(&self, cancel: &Cancellation) -> Result<StatisticsSnapshot> {
        let mut inner = self.lock();
        let conn = ready_conn(&mut inner)?;

        let (mut snapshot, skipped_rows) = with_cancellation(conn, cancel, |conn| load_rows(conn))?;

        // Legacy timestamp layouts do not sort lexically with RFC 3339 ones
        for api in snapshot.apis.values_mut() {
            for bucket in api.models.values_mut() {
                bucket.details.sort_by_key(|d| d.timestamp);
            }
        }

        if skipped_rows > 0 {
            tracing::warn!(skipped_rows, "Skipped usage rows with unparsable timestamps");
        }
        tracing::debug!(
            records = snapshot.record_count(),
            "Loaded usage records"
        );

        Ok(snapshot)
    }

    /// Number of persisted rows
    pub fn count_records(&self) -> Result<i64> {
        let mut inner = self.lock();
        let conn = ready_conn(&mut inner)?;
        conn.query_row("SELECT COUNT(*) FROM usage_records", [], |r| r.get(0))
            .map_err(|e| Error::read("failed to count records", e))
    }

    // ============================================
    // Lifecycle
    // ============================================

    /// Release the connection. Closing a never-opened or closed store is a no-op.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.lock();
        let Some(conn) = inner.conn.take() else {
            return Ok(());
        };
        inner.state = StoreState::Closed;
        conn.close()
            .map_err(|(_, e)| Error::Store(format!("failed to close database: {}", e)))
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        // A panic mid-operation leaves no open transaction behind (rollback on
        // drop), so the connection is still usable.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn configure_connection(conn: &Connection, options: &StoreOptions) -> rusqlite::Result<()> {
    conn.busy_timeout(options.busy_timeout)?;
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        ",
    )
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)
}

fn ready_conn(inner: &mut StoreInner) -> Result<&mut Connection> {
    match (inner.state, inner.conn.as_mut()) {
        (StoreState::SchemaReady, Some(conn)) => Ok(conn),
        _ => Err(Error::NotInitialized),
    }
}

/// Run `f` with a progress handler that aborts once `cancel` is raised.
fn with_cancellation<T>(
    conn: &mut Connection,
    cancel: &Cancellation,
    f: impl FnOnce(&mut Connection) -> Result<T>,
) -> Result<T> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    let flag = cancel.flag();
    conn.progress_handler(PROGRESS_OPS, Some(move || flag.load(Ordering::Acquire)));
    let result = f(conn);
    conn.progress_handler(0, None::<fn() -> bool>);
    result
}

fn execute_insert(
    stmt: &mut rusqlite::Statement<'_>,
    api_key: &str,
    model: &str,
    detail: &RequestDetail,
) -> rusqlite::Result<usize> {
    let tokens = &detail.tokens;
    stmt.execute(params![
        api_key,
        model,
        format_timestamp(&detail.timestamp),
        detail.source,
        detail.auth_index,
        i64::from(detail.failed),
        tokens.input_tokens,
        tokens.output_tokens,
        tokens.reasoning_tokens,
        tokens.cached_tokens,
        tokens.total_tokens,
        dedup_key(api_key, model, detail),
    ])
}

fn load_rows(conn: &Connection) -> Result<(StatisticsSnapshot, usize)> {
    let mut stmt = conn
        .prepare(SELECT_ALL_SQL)
        .map_err(|e| Error::read("failed to prepare query", e))?;
    let mut rows = stmt
        .query([])
        .map_err(|e| Error::read("failed to query records", e))?;

    let mut snapshot = StatisticsSnapshot::new();
    let mut skipped = 0usize;

    while let Some(row) = rows
        .next()
        .map_err(|e| Error::read("error iterating records", e))?
    {
        let scan = |row: &rusqlite::Row<'_>| -> rusqlite::Result<_> {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get_ref(2)?.as_str().ok().map(str::to_owned),
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
                TokenStats {
                    input_tokens: row.get(6)?,
                    output_tokens: row.get(7)?,
                    reasoning_tokens: row.get(8)?,
                    cached_tokens: row.get(9)?,
                    total_tokens: row.get(10)?,
                },
            ))
        };
        let (api_key, model, raw_ts, source, auth_index, failed, tokens) =
            scan(row).map_err(|e| Error::read("failed to scan record", e))?;

        let Some(timestamp) = raw_ts.as_deref().and_then(parse_timestamp) else {
            skipped += 1;
            continue;
        };

        snapshot.push(
            &api_key,
            &model,
            RequestDetail {
                timestamp,
                source,
                auth_index,
                tokens,
                failed: failed != 0,
            },
        );
    }

    Ok((snapshot, skipped))
}

/// Parse a stored timestamp: RFC 3339 (any fractional precision), then the
/// second-precision `datetime()` layout interpreted as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, LEGACY_TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashSet;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn ready_store() -> UsageStore {
        let store = UsageStore::open_in_memory().unwrap();
        store.ensure_schema().unwrap();
        store
    }

    fn create_test_detail(secs: i64, nanos: u32) -> RequestDetail {
        RequestDetail {
            timestamp: Utc.timestamp_opt(secs, nanos).unwrap(),
            source: "openai".to_string(),
            auth_index: "0".to_string(),
            tokens: TokenStats {
                input_tokens: 100,
                output_tokens: 50,
                reasoning_tokens: 0,
                cached_tokens: 20,
                total_tokens: 150,
            },
            failed: false,
        }
    }

    fn create_test_snapshot() -> StatisticsSnapshot {
        let mut snapshot = StatisticsSnapshot::new();
        snapshot.push("key-a", "gpt-4o", create_test_detail(1_700_000_300, 0));
        snapshot.push("key-a", "gpt-4o", create_test_detail(1_700_000_100, 5));
        snapshot.push("key-a", "o3", create_test_detail(1_700_000_200, 0));
        snapshot.push("key-b", "gpt-4o", create_test_detail(1_700_000_000, 0));
        snapshot
    }

    fn flatten(snapshot: &StatisticsSnapshot) -> HashSet<String> {
        snapshot
            .records()
            .map(|(a, m, d)| dedup_key(a, m, d))
            .collect()
    }

    #[test]
    fn test_open_rejects_empty_path() {
        let err = UsageStore::open("").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let tmp_dir = TempDir::new().unwrap();
        let db_path = tmp_dir.path().join("nested/dir/usage.db");

        let store = UsageStore::open(&db_path).unwrap();
        store.ensure_schema().unwrap();

        assert!(db_path.exists());
        assert_eq!(store.path(), Some(db_path.as_path()));
        assert_eq!(store.state(), StoreState::SchemaReady);

        let mode: String = {
            let inner = store.lock();
            inner
                .conn
                .as_ref()
                .unwrap()
                .query_row("PRAGMA journal_mode", [], |r| r.get(0))
                .unwrap()
        };
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_operations_before_schema_fail() {
        let store = UsageStore::open_in_memory().unwrap();
        let detail = create_test_detail(1, 0);

        assert!(matches!(
            store.insert_record("k", "m", &detail),
            Err(Error::NotInitialized)
        ));
        assert!(matches!(store.load_all(), Err(Error::NotInitialized)));
        assert!(matches!(
            store.persist_snapshot(&StatisticsSnapshot::new()),
            Err(Error::NotInitialized)
        ));
    }

    #[test]
    fn test_default_store_is_uninitialized() {
        let store = UsageStore::default();
        assert_eq!(store.state(), StoreState::Uninitialized);
        assert!(matches!(store.ensure_schema(), Err(Error::NotInitialized)));
        assert!(matches!(store.load_all(), Err(Error::NotInitialized)));
        assert!(matches!(store.count_records(), Err(Error::NotInitialized)));
        store.close().unwrap();
        store.close().unwrap();
    }

    #[test]
    fn test_close_is_idempotent() {
        let store = ready_store();
        store.close().unwrap();
        assert_eq!(store.state(), StoreState::Closed);
        store.close().unwrap();

        assert!(matches!(store.load_all(), Err(Error::NotInitialized)));
        assert!(matches!(store.ensure_schema(), Err(Error::NotInitialized)));
    }

    #[test]
    fn test_duplicate_insert_is_ignored() {
        let store = ready_store();
        let detail = create_test_detail(1_700_000_000, 123);

        assert!(store.insert_record("key-a", "gpt-4o", &detail).unwrap());
        assert!(!store.insert_record("key-a", "gpt-4o", &detail.clone()).unwrap());
        assert_eq!(store.count_records().unwrap(), 1);
    }

    #[test]
    fn test_distinct_timestamps_are_distinct_rows() {
        let store = ready_store();
        store
            .insert_record("key-a", "gpt-4o", &create_test_detail(1_700_000_000, 0))
            .unwrap();
        store
            .insert_record("key-a", "gpt-4o", &create_test_detail(1_700_000_000, 1))
            .unwrap();
        assert_eq!(store.count_records().unwrap(), 2);
    }

    #[test]
    fn test_stored_row_layout() {
        let store = ready_store();
        let mut detail = create_test_detail(1_700_000_000, 42);
        detail.failed = true;
        store.insert_record("key-a", "gpt-4o", &detail).unwrap();

        let inner = store.lock();
        let (ts, failed, key): (String, i64, String) = inner
            .conn
            .as_ref()
            .unwrap()
            .query_row(
                "SELECT timestamp, failed, dedup_key FROM usage_records",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!(ts, "2023-11-14T22:13:20.000000042Z");
        assert_eq!(failed, 1);
        assert_eq!(key, dedup_key("key-a", "gpt-4o", &detail));
    }

    #[test]
    fn test_persist_snapshot_twice() {
        let store = ready_store();
        let snapshot = create_test_snapshot();

        let first = store.persist_snapshot(&snapshot).unwrap();
        assert_eq!(first, PersistResult { added: 4, skipped: 0 });

        let second = store.persist_snapshot(&snapshot).unwrap();
        assert_eq!(second, PersistResult { added: 0, skipped: 4 });
        assert_eq!(store.count_records().unwrap(), 4);
    }

    #[test]
    fn test_load_all_round_trips_and_sorts() {
        let store = ready_store();
        let snapshot = create_test_snapshot();
        store.persist_snapshot(&snapshot).unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(flatten(&loaded), flatten(&snapshot));

        let bucket = &loaded.apis["key-a"].models["gpt-4o"].details;
        assert_eq!(bucket.len(), 2);
        assert!(bucket[0].timestamp < bucket[1].timestamp);
        assert_eq!(bucket[0].timestamp.timestamp_subsec_nanos(), 5);
    }

    #[test]
    fn test_load_all_skips_unparsable_timestamps() {
        let store = ready_store();
        store.persist_snapshot(&create_test_snapshot()).unwrap();
        {
            let inner = store.lock();
            let conn = inner.conn.as_ref().unwrap();
            conn.execute(
                "INSERT INTO usage_records (api_key, model, timestamp, dedup_key)
                 VALUES ('key-a', 'gpt-4o', 'not-a-timestamp', 'bad-row')",
                [],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO usage_records (api_key, model, timestamp, dedup_key)
                 VALUES ('key-c', 'legacy', '2023-11-14 22:13:20', 'legacy-row')",
                [],
            )
            .unwrap();
        }

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.record_count(), 5);
        let legacy = &loaded.apis["key-c"].models["legacy"].details[0];
        assert_eq!(legacy.timestamp, Utc.timestamp_opt(1_700_000_000, 0).unwrap());
    }

    #[test]
    fn test_persist_snapshot_rolls_back_on_failure() {
        let store = ready_store();
        {
            // Reject one specific model so the batch fails part-way through
            let inner = store.lock();
            inner
                .conn
                .as_ref()
                .unwrap()
                .execute_batch(
                    "CREATE TRIGGER reject_o3 BEFORE INSERT ON usage_records
                     WHEN NEW.model = 'o3'
                     BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
                )
                .unwrap();
        }

        let err = store.persist_snapshot(&create_test_snapshot()).unwrap_err();
        assert!(matches!(err, Error::Write { .. }));
        assert_eq!(store.count_records().unwrap(), 0);
    }

    #[test]
    fn test_cancelled_before_start() {
        let store = ready_store();
        let cancel = Cancellation::new();
        cancel.cancel();

        assert!(matches!(store.load_all_with(&cancel), Err(Error::Cancelled)));
        assert!(matches!(
            store.persist_snapshot_with(&create_test_snapshot(), &cancel),
            Err(Error::Cancelled)
        ));
        assert_eq!(store.count_records().unwrap(), 0);

        // The handler is removed afterwards; plain calls still work
        store.persist_snapshot(&create_test_snapshot()).unwrap();
        assert_eq!(store.load_all().unwrap().record_count(), 4);
    }

    #[test]
    fn test_concurrent_inserts_of_same_record() {
        let tmp_dir = TempDir::new().unwrap();
        let store = Arc::new(UsageStore::open(tmp_dir.path().join("usage.db")).unwrap());
        store.ensure_schema().unwrap();
        let detail = create_test_detail(1_700_000_000, 7);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let detail = detail.clone();
                std::thread::spawn(move || store.insert_record("key-a", "gpt-4o", &detail))
            })
            .collect();

        let inserted: Vec<bool> = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect();

        assert_eq!(inserted.iter().filter(|&&added| added).count(), 1);
        assert_eq!(store.count_records().unwrap(), 1);
    }

    #[test]
    fn test_reopen_keeps_records() {
        let tmp_dir = TempDir::new().unwrap();
        let db_path = tmp_dir.path().join("usage.db");

        let store = UsageStore::open(&db_path).unwrap();
        store.ensure_schema().unwrap();
        store.persist_snapshot(&create_test_snapshot()).unwrap();
        store.close().unwrap();

        let store = UsageStore::open(&db_path).unwrap();
        store.ensure_schema().unwrap();
        assert_eq!(store.load_all().unwrap().record_count(), 4);
    }

    #[test]
    fn test_ensure_schema_on_file_stamped_by_another_tool() {
        let tmp_dir = TempDir::new().unwrap();
        let db_path = tmp_dir.path().join("usage.db");
        {
            let conn = Connection::open(&db_path).unwrap();
            conn.pragma_update(None, "user_version", 3).unwrap();
        }

        let store = UsageStore::open(&db_path).unwrap();
        store.ensure_schema().unwrap();

        let detail = create_test_detail(1_700_000_000, 0);
        assert!(store.insert_record("key-a", "gpt-4o", &detail).unwrap());
        assert_eq!(store.load_all().unwrap().record_count(), 1);
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert_eq!(
            parse_timestamp("2023-11-14T22:13:20.000000042Z"),
            Some(Utc.timestamp_opt(1_700_000_000, 42).unwrap())
        );
        assert_eq!(
            parse_timestamp("2023-11-14T23:13:20+01:00"),
            Some(Utc.timestamp_opt(1_700_000_000, 0).unwrap())
        );
        assert_eq!(
            parse_timestamp("2023-11-14 22:13:20"),
            Some(Utc.timestamp_opt(1_700_000_000, 0).unwrap())
        );
        assert_eq!(parse_timestamp("yesterday"), None);
    }
}

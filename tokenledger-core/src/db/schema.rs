//! Database schema and migrations
//!
//! The base schema is `IF NOT EXISTS` DDL and runs on every startup, whatever
//! `PRAGMA user_version` says: a reused file or one stamped by another tool
//! still ends up with the table and both indexes. `user_version` only gates
//! the incremental steps layered on top of it.

use rusqlite::Connection;

use crate::error::{Error, Result};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Version 1: usage records keyed by dedup hash
const BASE_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS usage_records (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        api_key TEXT NOT NULL,
        model TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        source TEXT NOT NULL DEFAULT '',
        auth_index TEXT NOT NULL DEFAULT '',
        failed INTEGER NOT NULL DEFAULT 0,
        input_tokens INTEGER NOT NULL DEFAULT 0,
        output_tokens INTEGER NOT NULL DEFAULT 0,
        reasoning_tokens INTEGER NOT NULL DEFAULT 0,
        cached_tokens INTEGER NOT NULL DEFAULT 0,
        total_tokens INTEGER NOT NULL DEFAULT 0,
        dedup_key TEXT NOT NULL,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_usage_records_dedup
        ON usage_records(dedup_key);

    CREATE INDEX IF NOT EXISTS idx_usage_records_lookup
        ON usage_records(api_key, model, timestamp);
"#;

/// Steps applied after the base schema; entry `i` upgrades to version `i + 2`
const MIGRATIONS: &[&str] = &[];

/// Ensure the base schema, then run any pending migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    tracing::debug!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    conn.execute_batch(BASE_SCHEMA).map_err(Error::schema)?;
    if current_version < 1 {
        conn.pragma_update(None, "user_version", 1)
            .map_err(Error::schema)?;
    }

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 2) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration).map_err(Error::schema)?;
            conn.pragma_update(None, "user_version", version)
                .map_err(Error::schema)?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    conn.query_row("PRAGMA user_version", [], |r| r.get(0))
        .map_err(Error::schema)
}

#[cfg(test)]
mod tests {
    use super::*;

    const INSERT_MINIMAL: &str =
        "INSERT INTO usage_records (api_key, model, timestamp, dedup_key) \
         VALUES ('k', 'm', 't', 'd')";


    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        // Run migrations twice - should be idempotent
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_table_and_indexes_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let exists: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='usage_records'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(exists, 1);

        let indexes: Vec<(String, bool)> = conn
            .prepare("PRAGMA index_list(usage_records)")
            .unwrap()
            .query_map([], |row| {
                Ok((row.get::<_, String>(1)?, row.get::<_, bool>(2)?))
            })
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        assert!(indexes.contains(&("idx_usage_records_dedup".to_string(), true)));
        assert!(indexes.contains(&("idx_usage_records_lookup".to_string(), false)));
    }

    #[test]
    fn test_existing_table_is_left_alone() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn.execute(INSERT_MINIMAL, []).unwrap();

        // A database created elsewhere without user_version still migrates cleanly
        conn.pragma_update(None, "user_version", 0).unwrap();
        run_migrations(&conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM usage_records", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_schema_created_despite_foreign_user_version() {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", 3).unwrap();

        run_migrations(&conn).unwrap();

        conn.execute(INSERT_MINIMAL, []).unwrap();
        let unique: bool = conn
            .query_row(
                "SELECT \"unique\" FROM pragma_index_list('usage_records')
                 WHERE name = 'idx_usage_records_dedup'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert!(unique);

        // A newer stamp is never rolled back
        assert_eq!(get_schema_version(&conn).unwrap(), 3);
    }

    #[test]
    fn test_column_defaults() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn.execute(INSERT_MINIMAL, []).unwrap();

        let (source, failed, total, created_at): (String, i64, i64, String) = conn
            .query_row(
                "SELECT source, failed, total_tokens, created_at FROM usage_records",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .unwrap();
        assert_eq!(source, "");
        assert_eq!(failed, 0);
        assert_eq!(total, 0);
        assert!(!created_at.is_empty());
    }
}

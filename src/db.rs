//! Local SQLite store for the POS client.
//!
//! Session keys and preferences live in `local_settings`, the offline menu
//! copy in `menu_cache`, and the carts waiters park between visits in
//! `table_orders`.

use rusqlite::{params, Connection};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, warn};

/// Shared database handle.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

/// Current schema version. Bump when adding new migrations.
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Open (or create) `{data_dir}/pos.db` and run pending migrations.
///
/// A file that cannot be opened is treated as corrupt: it is deleted together
/// with its WAL/SHM siblings and opened once more.
pub fn init(data_dir: &Path) -> Result<DbState, String> {
    fs::create_dir_all(data_dir).map_err(|e| format!("Failed to create data dir: {e}"))?;

    let db_path = data_dir.join("pos.db");
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Database open failed ({}), deleting and retrying once",
                first_err
            );
            if db_path.exists() {
                let _ = fs::remove_file(&db_path);
                let _ = fs::remove_file(db_path.with_extension("db-wal"));
                let _ = fs::remove_file(db_path.with_extension("db-shm"));
            }
            open_and_configure(&db_path)
                .map_err(|e| format!("Database open failed after retry: {e}"))?
        }
    };

    run_migrations(&conn)?;
    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

fn open_and_configure(path: &Path) -> Result<Connection, String> {
    let conn = Connection::open(path).map_err(|e| format!("sqlite open: {e}"))?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(|e| format!("pragma setup: {e}"))?;
    Ok(conn)
}

fn run_migrations(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("create schema_version: {e}"))?;

    let current = schema_version(conn);
    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");
    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }
    Ok(())
}

pub fn schema_version(conn: &Connection) -> i32 {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .unwrap_or(0)
}

/// Migration v1: settings and menu cache.
fn migrate_v1(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS local_settings (
            id TEXT PRIMARY KEY DEFAULT (lower(hex(randomblob(16)))),
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            UNIQUE(setting_category, setting_key)
        );
        CREATE INDEX IF NOT EXISTS idx_local_settings_cat_key
            ON local_settings(setting_category, setting_key);

        CREATE TABLE IF NOT EXISTS menu_cache (
            cache_key TEXT PRIMARY KEY,
            data TEXT NOT NULL,
            version TEXT,
            updated_at TEXT DEFAULT (datetime('now'))
        );

        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| {
        error!("Migration v1 failed: {e}");
        format!("migration v1: {e}")
    })?;
    info!("Applied migration v1");
    Ok(())
}

/// Migration v2: parked table orders.
///
/// `group_name` is stored as '' for "no group" so the (table, group) pair can
/// be a real unique key.
fn migrate_v2(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS table_orders (
            table_number TEXT NOT NULL,
            group_name TEXT NOT NULL DEFAULT '',
            cart TEXT NOT NULL DEFAULT '[]',
            updated_at_ms INTEGER NOT NULL,
            PRIMARY KEY (table_number, group_name)
        );

        INSERT INTO schema_version (version) VALUES (2);
        ",
    )
    .map_err(|e| {
        error!("Migration v2 failed: {e}");
        format!("migration v2: {e}")
    })?;
    info!("Applied migration v2");
    Ok(())
}

// ---------------------------------------------------------------------------
// Settings helpers
// ---------------------------------------------------------------------------

pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .ok()
}

/// Insert or update a setting.
pub fn set_setting(conn: &Connection, category: &str, key: &str, value: &str) -> Result<(), String> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET
            setting_value = excluded.setting_value,
            updated_at = excluded.updated_at",
        params![category, key, value],
    )
    .map_err(|e| format!("set_setting: {e}"))?;
    Ok(())
}

pub fn delete_setting(conn: &Connection, category: &str, key: &str) -> Result<(), String> {
    conn.execute(
        "DELETE FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
    )
    .map_err(|e| format!("delete_setting: {e}"))?;
    Ok(())
}

/// All settings of one category as a JSON object.
pub fn get_category_settings(conn: &Connection, category: &str) -> Value {
    let mut stmt = match conn.prepare(
        "SELECT setting_key, setting_value FROM local_settings
         WHERE setting_category = ?1 ORDER BY setting_key",
    ) {
        Ok(s) => s,
        Err(e) => {
            error!("get_category_settings prepare: {e}");
            return serde_json::json!({});
        }
    };
    let rows = stmt.query_map(params![category], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    });
    let mut result = serde_json::Map::new();
    if let Ok(rows) = rows {
        for (key, value) in rows.flatten() {
            result.insert(key, Value::String(value));
        }
    }
    Value::Object(result)
}

#[cfg(test)]
pub(crate) fn open_in_memory() -> Result<DbState, String> {
    let conn = Connection::open_in_memory().map_err(|e| e.to_string())?;
    run_migrations(&conn)?;
    Ok(DbState {
        conn: Mutex::new(conn),
        db_path: PathBuf::from(":memory:"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let db = open_in_memory().expect("db");
        let conn = db.conn.lock().expect("lock");
        assert_eq!(schema_version(&conn), CURRENT_SCHEMA_VERSION);
        run_migrations(&conn).expect("second run");
        assert_eq!(schema_version(&conn), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn settings_upsert_and_delete() {
        let db = open_in_memory().expect("db");
        let conn = db.conn.lock().expect("lock");

        assert!(get_setting(&conn, "session", "selectedFloorId").is_none());
        set_setting(&conn, "session", "selectedFloorId", "3").expect("set");
        set_setting(&conn, "session", "selectedFloorId", "4").expect("update");
        assert_eq!(
            get_setting(&conn, "session", "selectedFloorId").as_deref(),
            Some("4")
        );

        delete_setting(&conn, "session", "selectedFloorId").expect("delete");
        assert!(get_setting(&conn, "session", "selectedFloorId").is_none());
        delete_setting(&conn, "session", "selectedFloorId").expect("delete missing is ok");
    }

    #[test]
    fn category_settings_are_scoped() {
        let db = open_in_memory().expect("db");
        let conn = db.conn.lock().expect("lock");
        set_setting(&conn, "session", "a", "1").expect("set");
        set_setting(&conn, "session", "b", "2").expect("set");
        set_setting(&conn, "staff", "c", "3").expect("set");

        let session = get_category_settings(&conn, "session");
        assert_eq!(session, serde_json::json!({ "a": "1", "b": "2" }));
    }

    #[test]
    fn init_creates_file_database() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = init(dir.path()).expect("init");
        assert!(db.db_path.exists());
        let conn = db.conn.lock().expect("lock");
        assert_eq!(schema_version(&conn), CURRENT_SCHEMA_VERSION);
    }
}

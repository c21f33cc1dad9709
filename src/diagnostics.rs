//! About info and log housekeeping.
//!
//! `lib.rs` calls [`prune_old_logs`] before installing the rolling file
//! appender so the log directory never grows past [`MAX_LOG_FILES`].

use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::config::Config;
use crate::db::{self, DbState};

/// Maximum number of log files to retain.
pub const MAX_LOG_FILES: usize = 10;

/// File name prefix used by the daily appender.
pub const LOG_FILE_PREFIX: &str = "pos";

pub fn get_about_info(config: &Config, db: &DbState) -> Value {
    let (schema_version, session_keys) = match db.conn.lock() {
        Ok(conn) => {
            let session = db::get_category_settings(&conn, "session");
            let keys: Vec<String> = session
                .as_object()
                .map(|m| m.keys().cloned().collect())
                .unwrap_or_default();
            (db::schema_version(&conn), keys)
        }
        Err(_) => (0, Vec::new()),
    };

    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "buildTimestamp": env!("BUILD_TIMESTAMP"),
        "gitSha": env!("BUILD_GIT_SHA"),
        "platform": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "apiBaseUrl": config.api_base_url,
        "dataDir": config.data_dir.display().to_string(),
        "dbPath": db.db_path.display().to_string(),
        "schemaVersion": schema_version,
        "sessionKeys": session_keys,
        "logFiles": list_log_files(&config.log_dir()).len(),
    })
}

fn list_log_files(log_dir: &Path) -> Vec<(PathBuf, std::time::SystemTime)> {
    let mut log_files = Vec::new();
    let Ok(entries) = fs::read_dir(log_dir) else {
        return log_files;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let is_log = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|name| name.starts_with(&format!("{LOG_FILE_PREFIX}.")))
            .unwrap_or(false);
        if is_log {
            let modified = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .unwrap_or(std::time::UNIX_EPOCH);
            log_files.push((path, modified));
        }
    }
    log_files
}

/// Delete all but the newest [`MAX_LOG_FILES`] log files in `log_dir`.
pub fn prune_old_logs(log_dir: &Path) {
    let mut log_files = list_log_files(log_dir);
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    for (path, _) in log_files.iter().skip(MAX_LOG_FILES) {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to prune log file {}: {e}", path.display());
        }
    }
}

//! Token and session-key storage.
//!
//! Access and refresh tokens go to the OS credential store (Keychain, DPAPI,
//! kernel keyutils on Linux). The non-secret session keys the screens share
//! (`currentUser`, `selectedBranch`, `selectedFloorId`, `currentWaiter`) live in
//! the `session` category of `local_settings`.

use keyring::Entry;
use tracing::{info, warn};
use zeroize::Zeroize;

use crate::db::{self, DbState};

const SERVICE_NAME: &str = "ama-bakery-pos";

pub const KEY_ACCESS_TOKEN: &str = "access";
pub const KEY_REFRESH_TOKEN: &str = "refresh";

const TOKEN_KEYS: &[&str] = &[KEY_ACCESS_TOKEN, KEY_REFRESH_TOKEN];

const SESSION_CATEGORY: &str = "session";
pub const SESSION_CURRENT_USER: &str = "currentUser";
pub const SESSION_CURRENT_WAITER: &str = "currentWaiter";
pub const SESSION_SELECTED_BRANCH: &str = "selectedBranch";
pub const SESSION_SELECTED_FLOOR: &str = "selectedFloorId";

const SESSION_KEYS: &[&str] = &[
    SESSION_CURRENT_USER,
    SESSION_CURRENT_WAITER,
    SESSION_SELECTED_BRANCH,
    SESSION_SELECTED_FLOOR,
];

// ---------------------------------------------------------------------------
// Keyring
// ---------------------------------------------------------------------------

/// Read a credential; `None` when missing or when the platform store fails.
pub fn get_credential(key: &str) -> Option<String> {
    let entry = match Entry::new(SERVICE_NAME, key) {
        Ok(e) => e,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to create entry");
            return None;
        }
    };
    match entry.get_password() {
        Ok(pw) if !pw.trim().is_empty() => Some(pw),
        Ok(_) => None,
        Err(keyring::Error::NoEntry) => None,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to read credential");
            None
        }
    }
}

pub fn set_credential(key: &str, value: &str) -> Result<(), String> {
    let entry = Entry::new(SERVICE_NAME, key).map_err(|e| e.to_string())?;
    entry.set_password(value).map_err(|e| e.to_string())
}

/// Delete a credential. Missing entries are not an error.
pub fn delete_credential(key: &str) -> Result<(), String> {
    let entry = Entry::new(SERVICE_NAME, key).map_err(|e| e.to_string())?;
    match entry.delete_credential() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}

pub fn access_token() -> Option<String> {
    get_credential(KEY_ACCESS_TOKEN)
}

pub fn refresh_token() -> Option<String> {
    get_credential(KEY_REFRESH_TOKEN)
}

/// Persist a freshly issued token pair, wiping the caller's copies.
pub fn save_tokens(mut access: String, mut refresh: String) -> Result<(), String> {
    let result = set_credential(KEY_ACCESS_TOKEN, &access)
        .and_then(|_| set_credential(KEY_REFRESH_TOKEN, &refresh));
    access.zeroize();
    refresh.zeroize();
    result
}

pub fn save_access_token(mut access: String) -> Result<(), String> {
    let result = set_credential(KEY_ACCESS_TOKEN, &access);
    access.zeroize();
    result
}

pub fn clear_tokens() -> Result<(), String> {
    for key in TOKEN_KEYS {
        delete_credential(key)?;
    }
    info!("stored tokens cleared");
    Ok(())
}

// ---------------------------------------------------------------------------
// Session keys
// ---------------------------------------------------------------------------

pub fn get_session_value(db: &DbState, key: &str) -> Option<String> {
    let conn = db.conn.lock().ok()?;
    db::get_setting(&conn, SESSION_CATEGORY, key)
}

pub fn set_session_value(db: &DbState, key: &str, value: &str) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    db::set_setting(&conn, SESSION_CATEGORY, key, value)
}

pub fn remove_session_value(db: &DbState, key: &str) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    db::delete_setting(&conn, SESSION_CATEGORY, key)
}

/// Remove every session key (logout).
pub fn clear_session(db: &DbState) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    for key in SESSION_KEYS {
        db::delete_setting(&conn, SESSION_CATEGORY, key)?;
    }
    Ok(())
}

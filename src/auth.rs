//! Session identity and terminal unlock.
//!
//! The signed-in user is derived from the access token's claims on every
//! call. Superusers may scope their view to one branch; that choice lives in
//! the `selectedBranch` session key and overrides the token's branch.
//!
//! Waiter and counter terminals can also be unlocked with a short PIN. PIN
//! hashes are bcrypt and stored in `local_settings` (category "staff"); the
//! failed-attempt counter is persisted so a restart does not lift a lockout.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};
use zeroize::Zeroize;

use crate::api::ApiClient;
use crate::db::{self, DbState};
use crate::error::{PosError, PosResult};
use crate::models::{de_opt_id, id_from_value};
use crate::storage;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const MAX_FAILED_ATTEMPTS: u32 = 5;
const LOCKOUT_MINUTES: i64 = 15;
const MIN_PIN_DIGITS: usize = 4;
const PIN_PAD_DIGITS: usize = 4;
const STAFF_CATEGORY: &str = "staff";
const LOCKOUT_ATTEMPTS_KEY: &str = "lockout_attempts";
const LOCKOUT_LAST_ATTEMPT_KEY: &str = "lockout_last_attempt";

pub const ROLE_SUPER_ADMIN: &str = "SUPER_ADMIN";
pub const ROLE_WAITER: &str = "WAITER";

// ---------------------------------------------------------------------------
// Token claims
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DecodedToken {
    #[serde(deserialize_with = "de_user_id")]
    pub user_id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub user_type: String,
    #[serde(default)]
    pub is_superuser: bool,
    #[serde(default)]
    pub is_staff: bool,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub branch_id: Option<i64>,
    #[serde(default)]
    pub branch_name: Option<String>,
    #[serde(default)]
    pub exp: i64,
}

/// The identity screens work with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CurrentUser {
    #[serde(deserialize_with = "de_user_id")]
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub is_superuser: bool,
    #[serde(default)]
    pub is_staff: bool,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub branch_id: Option<i64>,
    #[serde(default)]
    pub branch_name: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_branch_scoped: bool,
}

fn de_user_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("invalid user id: {other}"))),
    }
}

/// Decode the payload segment of a JWT. The signature is not checked; the
/// backend does that on every request.
pub fn decode_token(token: &str) -> PosResult<DecodedToken> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| PosError::Decode("token has no payload segment".into()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| PosError::Decode(format!("token payload: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| PosError::Decode(format!("token claims: {e}")))
}

/// True when a token is present, decodes, and has not expired at `now_ms`.
pub fn is_logged_in(token: Option<&str>, now_ms: i64) -> bool {
    let Some(token) = token else {
        return false;
    };
    match decode_token(token) {
        Ok(decoded) => decoded.exp.saturating_mul(1000) > now_ms,
        Err(_) => false,
    }
}

impl DecodedToken {
    pub fn is_superuser(&self) -> bool {
        self.is_superuser || self.user_type == ROLE_SUPER_ADMIN
    }
}

/// Merge token claims with the superuser's stored branch selection.
pub fn derive_current_user(decoded: &DecodedToken, selected_branch: Option<&str>) -> CurrentUser {
    let is_superuser = decoded.is_superuser();

    if is_superuser {
        if let Some(raw) = selected_branch {
            match serde_json::from_str::<Value>(raw) {
                Ok(Value::Object(selection)) => {
                    return CurrentUser {
                        id: decoded.user_id.clone(),
                        username: decoded.username.clone(),
                        role: decoded.user_type.clone(),
                        is_superuser: true,
                        is_staff: decoded.is_staff,
                        branch_id: selection.get("id").and_then(id_from_value),
                        branch_name: selection
                            .get("name")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                        is_branch_scoped: true,
                    };
                }
                Ok(other) => warn!(value = %other, "ignoring selectedBranch that is not an object"),
                Err(e) => error!(error = %e, "ignoring unparsable selectedBranch"),
            }
        }
    }

    CurrentUser {
        id: decoded.user_id.clone(),
        username: decoded.username.clone(),
        role: decoded.user_type.clone(),
        is_superuser,
        is_staff: decoded.is_staff,
        branch_id: decoded.branch_id,
        branch_name: decoded.branch_name.clone(),
        is_branch_scoped: false,
    }
}

/// Current user from `token`, or the legacy `currentUser` record.
pub fn resolve_current_user(db: &DbState, token: Option<&str>) -> Option<CurrentUser> {
    if let Some(decoded) = token.and_then(|t| decode_token(t).ok()) {
        let selected = storage::get_session_value(db, storage::SESSION_SELECTED_BRANCH);
        return Some(derive_current_user(&decoded, selected.as_deref()));
    }

    let legacy = storage::get_session_value(db, storage::SESSION_CURRENT_USER)?;
    match serde_json::from_str(&legacy) {
        Ok(user) => Some(user),
        Err(e) => {
            warn!(error = %e, "stored currentUser is not valid");
            None
        }
    }
}

pub fn current_user(api: &ApiClient, db: &DbState) -> Option<CurrentUser> {
    resolve_current_user(db, api.token().as_deref())
}

/// Like [`current_user`] but an error when nobody is signed in.
pub fn require_user(api: &ApiClient, db: &DbState) -> PosResult<CurrentUser> {
    current_user(api, db).ok_or(PosError::Unauthenticated)
}

pub fn landing_route(role: &str) -> &'static str {
    match role {
        "ADMIN" => "/super-admin/dashboard",
        "BRANCH_MANAGER" => "/admin/dashboard",
        "WAITER" => "/waiter/tables",
        "COUNTER" => "/counter/orders",
        "KITCHEN" => "/kitchen/display",
        _ => "/login",
    }
}

// ---------------------------------------------------------------------------
// Login / logout
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LoginOutcome {
    pub user: CurrentUser,
    pub route: &'static str,
}

/// Derive the user for a fresh access token and record it in the session.
pub fn establish_session(db: &DbState, access: &str) -> PosResult<LoginOutcome> {
    let user = resolve_current_user(db, Some(access))
        .filter(|u| !u.role.is_empty())
        .ok_or_else(|| PosError::validation("Unable to identify user role from token."))?;

    let user_json = serde_json::to_string(&user)?;
    storage::set_session_value(db, storage::SESSION_CURRENT_USER, &user_json)
        .map_err(PosError::Storage)?;
    if user.role == ROLE_WAITER {
        storage::set_session_value(db, storage::SESSION_CURRENT_WAITER, &user_json)
            .map_err(PosError::Storage)?;
    }

    Ok(LoginOutcome {
        route: landing_route(&user.role),
        user,
    })
}

pub async fn login(
    api: &ApiClient,
    db: &DbState,
    username: &str,
    password: &str,
) -> PosResult<LoginOutcome> {
    let (access, refresh) = api.login(username.trim(), password).await?;
    api.set_token(Some(access.clone()));
    api.set_refresh_token(Some(refresh.clone()));

    let outcome = establish_session(db, &access)?;
    if let Err(e) = storage::save_tokens(access, refresh) {
        warn!(error = %e, "could not persist tokens; session will not survive restart");
    }
    info!(
        username = %outcome.user.username,
        role = %outcome.user.role,
        "login successful"
    );
    Ok(outcome)
}

/// Sign out locally. The server call is best effort.
pub async fn logout(api: &ApiClient, db: &DbState) -> PosResult<()> {
    let refresh = api.refresh_token().or_else(storage::refresh_token);
    if api.has_token() {
        if let Err(e) = api.logout(refresh.as_deref()).await {
            warn!(error = %e, "server logout failed; clearing local session anyway");
        }
    }
    api.set_token(None);
    api.set_refresh_token(None);
    if let Err(e) = storage::clear_tokens() {
        warn!(error = %e, "failed to clear stored tokens");
    }
    storage::clear_session(db).map_err(PosError::Storage)?;
    info!("logged out");
    Ok(())
}

/// Exchange the refresh token for a new access token.
pub async fn refresh_session(api: &ApiClient) -> PosResult<()> {
    let refresh = api
        .refresh_token()
        .or_else(storage::refresh_token)
        .ok_or(PosError::Unauthenticated)?;
    let access = api.refresh(&refresh).await?;
    api.set_token(Some(access.clone()));
    if let Err(e) = storage::save_access_token(access) {
        warn!(error = %e, "could not persist refreshed token");
    }
    info!("access token refreshed");
    Ok(())
}

// ---------------------------------------------------------------------------
// Terminal PIN unlock
// ---------------------------------------------------------------------------

struct LockoutEntry {
    attempts: u32,
    last_attempt: DateTime<Utc>,
}

fn pin_key(username: &str) -> String {
    format!("pin_hash:{}", username.trim().to_lowercase())
}

fn validate_pin(pin: &str) -> PosResult<()> {
    if pin.len() < MIN_PIN_DIGITS {
        return Err(PosError::validation(format!(
            "PIN must be at least {MIN_PIN_DIGITS} digits"
        )));
    }
    if !pin.chars().all(|c| c.is_ascii_digit()) {
        return Err(PosError::validation("PIN must contain only digits"));
    }
    Ok(())
}

fn load_lockout(conn: &rusqlite::Connection) -> LockoutEntry {
    let attempts = db::get_setting(conn, STAFF_CATEGORY, LOCKOUT_ATTEMPTS_KEY)
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(0);
    let last_attempt = db::get_setting(conn, STAFF_CATEGORY, LOCKOUT_LAST_ATTEMPT_KEY)
        .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);
    LockoutEntry {
        attempts,
        last_attempt,
    }
}

fn persist_lockout(conn: &rusqlite::Connection, lockout: &LockoutEntry) {
    let writes = [
        (LOCKOUT_ATTEMPTS_KEY, lockout.attempts.to_string()),
        (LOCKOUT_LAST_ATTEMPT_KEY, lockout.last_attempt.to_rfc3339()),
    ];
    for (key, value) in writes {
        if let Err(e) = db::set_setting(conn, STAFF_CATEGORY, key, &value) {
            warn!(key, error = %e, "failed to persist PIN lockout");
        }
    }
}

fn check_lockout(lockout: &LockoutEntry, now: DateTime<Utc>) -> PosResult<()> {
    if lockout.attempts >= MAX_FAILED_ATTEMPTS {
        let elapsed = now - lockout.last_attempt;
        if elapsed < Duration::minutes(LOCKOUT_MINUTES) {
            let remaining = LOCKOUT_MINUTES - elapsed.num_minutes();
            return Err(PosError::validation(format!(
                "Too many failed attempts. Try again in {remaining} minute(s)."
            )));
        }
    }
    Ok(())
}

/// Hash and store a terminal PIN for `username`.
pub fn set_terminal_pin(db: &DbState, username: &str, pin: &str) -> PosResult<()> {
    if username.trim().is_empty() {
        return Err(PosError::validation("Please enter a username"));
    }
    validate_pin(pin)?;
    let hash = bcrypt::hash(pin, bcrypt::DEFAULT_COST)
        .map_err(|e| PosError::Storage(format!("Failed to hash PIN: {e}")))?;
    let conn = db.conn.lock().map_err(|e| PosError::Storage(e.to_string()))?;
    db::set_setting(&conn, STAFF_CATEGORY, &pin_key(username), &hash).map_err(PosError::Storage)?;
    info!(username = %username.trim(), "terminal PIN set");
    Ok(())
}

/// Check a PIN against the stored hash, honouring the terminal lockout.
pub fn verify_terminal_pin(db: &DbState, username: &str, pin: &str) -> PosResult<()> {
    verify_terminal_pin_at(db, username, pin, Utc::now())
}

fn verify_terminal_pin_at(
    db: &DbState,
    username: &str,
    pin: &str,
    now: DateTime<Utc>,
) -> PosResult<()> {
    if username.trim().is_empty() {
        return Err(PosError::validation("Please enter a username"));
    }
    let conn = db.conn.lock().map_err(|e| PosError::Storage(e.to_string()))?;
    let mut lockout = load_lockout(&conn);
    check_lockout(&lockout, now)?;

    let hash = db::get_setting(&conn, STAFF_CATEGORY, &pin_key(username))
        .ok_or_else(|| PosError::validation("Username not found"))?;

    if bcrypt::verify(pin, &hash).unwrap_or(false) {
        lockout.attempts = 0;
        lockout.last_attempt = now;
        persist_lockout(&conn, &lockout);
        info!(username = %username.trim(), "terminal unlocked");
        return Ok(());
    }

    lockout.attempts = lockout.attempts.saturating_add(1);
    lockout.last_attempt = now;
    persist_lockout(&conn, &lockout);
    warn!(attempts = lockout.attempts, "failed PIN attempt");
    Err(PosError::validation("Invalid PIN. Please try again."))
}

/// Result of feeding one key to a [`PinPad`].
#[derive(Debug, PartialEq, Eq)]
pub enum PinPadEvent {
    Pending(usize),
    Complete(String),
}

/// Four-digit keypad; hands back the PIN once the last digit is entered.
#[derive(Default)]
pub struct PinPad {
    digits: String,
}

impl PinPad {
    pub fn len(&self) -> usize {
        self.digits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digits.is_empty()
    }

    pub fn press(&mut self, key: char) -> PinPadEvent {
        if key.is_ascii_digit() && self.digits.len() < PIN_PAD_DIGITS {
            self.digits.push(key);
        }
        if self.digits.len() == PIN_PAD_DIGITS {
            let pin = self.digits.clone();
            self.clear();
            return PinPadEvent::Complete(pin);
        }
        PinPadEvent::Pending(self.digits.len())
    }

    pub fn backspace(&mut self) {
        self.digits.pop();
    }

    pub fn clear(&mut self) {
        self.digits.zeroize();
    }
}

//! Ama Bakery POS - client core
//!
//! The presentation shell drives this crate through a JSON-lines bridge on
//! stdin/stdout. Each request line is `{"id": .., "cmd": "pos_add_item",
//! "args": {..}}` and gets exactly one answer line, `{"id": .., "ok": true,
//! "data": ..}` or `{"id": .., "ok": false, "error": ".."}`. Command names
//! are snake_case `<screen>_<action>`; see [`commands::dispatch`].

use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod admin;
pub mod api;
pub mod auth;
pub mod cart;
pub mod checkout;
pub mod commands;
pub mod config;
pub mod dashboard;
pub mod db;
pub mod diagnostics;
pub mod error;
pub mod escpos;
pub mod kitchen;
pub mod menu;
pub mod models;
pub mod orders;
pub mod receipt;
pub mod storage;
pub mod table_orders;
pub mod tables;

use crate::api::ApiClient;
use crate::auth::PinPad;
use crate::checkout::{CounterCheckout, WaiterCheckout};
use crate::config::Config;
use crate::db::DbState;
use crate::menu::MenuItem;
use crate::receipt::AutoPrinter;

// ============================================================================
// Shared state
// ============================================================================

/// Everything the commands share. Locks are never held across an `.await`;
/// async commands clone what they need out first.
pub struct AppState {
    pub config: Config,
    pub db: DbState,
    pub api: ApiClient,
    /// Last menu loaded, used to resolve item ids in cart commands.
    pub menu: Mutex<Vec<MenuItem>>,
    /// Table order currently open on the waiter screen.
    pub waiter: Mutex<Option<WaiterCheckout>>,
    pub counter: Mutex<CounterCheckout>,
    pub pin_pad: Mutex<PinPad>,
    pub printer: AutoPrinter,
}

impl AppState {
    pub fn new(config: Config, db: DbState) -> anyhow::Result<Self> {
        let api = ApiClient::new(&config.api_base_url, config.request_timeout)?;
        let printer = AutoPrinter::from_config(&config);
        Ok(Self {
            config,
            db,
            api,
            menu: Mutex::new(Vec::new()),
            waiter: Mutex::new(None),
            counter: Mutex::new(CounterCheckout::default()),
            pin_pad: Mutex::new(PinPad::default()),
            printer,
        })
    }
}

// ============================================================================
// Payload helpers
// ============================================================================

pub(crate) fn value_str(v: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = v.get(*key).and_then(|x| x.as_str()) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

/// Number under any of `keys`; numeric strings count, since form fields
/// arrive as text.
pub(crate) fn value_f64(v: &Value, keys: &[&str]) -> Option<f64> {
    for key in keys {
        match v.get(*key) {
            Some(Value::Number(n)) => return n.as_f64(),
            Some(Value::String(s)) => {
                if let Ok(n) = s.trim().parse::<f64>() {
                    return Some(n);
                }
            }
            _ => {}
        }
    }
    None
}

pub(crate) fn value_i64(v: &Value, keys: &[&str]) -> Option<i64> {
    for key in keys {
        if let Some(n) = v.get(*key).and_then(models::id_from_value) {
            return Some(n);
        }
    }
    None
}

pub(crate) fn value_bool(v: &Value, keys: &[&str]) -> Option<bool> {
    keys.iter().find_map(|key| v.get(*key).and_then(Value::as_bool))
}

// ============================================================================
// Bridge
// ============================================================================

#[derive(Debug, Deserialize)]
struct BridgeRequest {
    #[serde(default)]
    id: Value,
    #[serde(alias = "command")]
    cmd: String,
    #[serde(default, alias = "payload", alias = "arg0")]
    args: Value,
}

/// Answer one request line.
pub async fn handle_line(state: &AppState, line: &str) -> Value {
    let request: BridgeRequest = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "malformed bridge request");
            return json!({ "id": Value::Null, "ok": false, "error": format!("Malformed request: {e}") });
        }
    };
    debug!(cmd = %request.cmd, "bridge request");
    match commands::dispatch(state, &request.cmd, request.args).await {
        Ok(data) => json!({ "id": request.id, "ok": true, "data": data }),
        Err(error) => json!({ "id": request.id, "ok": false, "error": error }),
    }
}

async fn serve_stdio(state: &AppState) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = handle_line(state, &line).await;
        stdout.write_all(response.to_string().as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }
    info!("bridge closed, shutting down");
    Ok(())
}

// ============================================================================
// App entry point
// ============================================================================

fn init_logging(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ama_bakery_pos_lib=debug"));

    let log_dir = config.log_dir();
    std::fs::create_dir_all(&log_dir).ok();
    diagnostics::prune_old_logs(&log_dir);

    let file_appender = tracing_appender::rolling::daily(&log_dir, diagnostics::LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    // stdout carries the bridge protocol, so the console layer writes to stderr.
    let console_layer = fmt::layer().with_writer(std::io::stderr).with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    // Flushes on drop; the process runs until the bridge closes.
    std::mem::forget(guard);
}

pub fn run() -> anyhow::Result<()> {
    let config = Config::from_env();
    init_logging(&config);
    info!("Starting Ama Bakery POS v{}", env!("CARGO_PKG_VERSION"));

    let db = db::init(&config.data_dir).map_err(anyhow::Error::msg)?;
    let state = AppState::new(config, db)?;
    state.api.set_token(storage::access_token());
    state.api.set_refresh_token(storage::refresh_token());
    info!(
        api = %state.config.api_base_url,
        signed_in = state.api.has_token(),
        "core ready"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve_stdio(&state))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_helpers_accept_text_numbers() {
        let v = json!({ "amount": "12.5", "id": "7", "name": "  ", "alt": "x", "flag": true });
        assert_eq!(value_f64(&v, &["amount"]), Some(12.5));
        assert_eq!(value_i64(&v, &["missing", "id"]), Some(7));
        assert_eq!(value_str(&v, &["name", "alt"]), Some("x".into()));
        assert_eq!(value_bool(&v, &["flag"]), Some(true));
    }

    #[tokio::test]
    async fn bridge_wraps_results_and_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = test_state::app_state("http://127.0.0.1:9", dir.path().to_path_buf());

        let ok = handle_line(&state, r#"{"id":1,"cmd":"app_about","args":{}}"#).await;
        assert_eq!(ok["ok"], true);
        assert_eq!(ok["id"], 1);

        let unknown = handle_line(&state, r#"{"id":"a","cmd":"nope"}"#).await;
        assert_eq!(unknown["ok"], false);
        assert_eq!(unknown["error"], "Unknown command: nope");

        let malformed = handle_line(&state, "not json").await;
        assert_eq!(malformed["ok"], false);
    }
}

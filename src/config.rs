//! Runtime configuration for the POS client core.
//!
//! Everything comes from `AMA_POS_*` environment variables with defaults that
//! match a local development backend. Per-terminal preferences that change at
//! runtime live in the SQLite `local_settings` table instead (see `db`).

use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use crate::escpos::PaperWidth;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_AUTO_PRINT_DELAY_MS: u64 = 1500;
const DEFAULT_PAPER_MM: i32 = 80;
const DEFAULT_COUNTER_TAX_RATE: f64 = 5.0;
const APP_DIR_NAME: &str = "com.amabakery.pos";

#[derive(Debug, Clone)]
pub struct Config {
    pub api_base_url: String,
    pub data_dir: PathBuf,
    pub request_timeout: Duration,
    pub auto_print_delay: Duration,
    pub printer_path: Option<PathBuf>,
    pub paper: PaperWidth,
    pub counter_tax_rate: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            data_dir: default_data_dir(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            auto_print_delay: Duration::from_millis(DEFAULT_AUTO_PRINT_DELAY_MS),
            printer_path: None,
            paper: PaperWidth::from_mm(DEFAULT_PAPER_MM),
            counter_tax_rate: DEFAULT_COUNTER_TAX_RATE,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let api_base_url = env_string("AMA_POS_API_BASE_URL")
            .map(|url| normalize_base_url(&url))
            .filter(|url| !url.is_empty())
            .unwrap_or(defaults.api_base_url);

        let data_dir = env_string("AMA_POS_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let request_timeout = env_parsed::<u64>("AMA_POS_REQUEST_TIMEOUT_SECS")
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.request_timeout);

        let auto_print_delay = env_parsed::<u64>("AMA_POS_AUTO_PRINT_DELAY_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.auto_print_delay);

        let paper = env_parsed::<i32>("AMA_POS_PAPER_MM")
            .map(PaperWidth::from_mm)
            .unwrap_or(defaults.paper);

        let counter_tax_rate = env_parsed::<f64>("AMA_POS_COUNTER_TAX_RATE")
            .filter(|rate| rate.is_finite() && *rate >= 0.0)
            .unwrap_or(defaults.counter_tax_rate);

        Self {
            api_base_url,
            data_dir,
            request_timeout,
            auto_print_delay,
            printer_path: env_string("AMA_POS_PRINTER_PATH").map(PathBuf::from),
            paper,
            counter_tax_rate,
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn receipt_spool_dir(&self) -> PathBuf {
        self.data_dir.join("receipts")
    }
}

/// Strip surrounding whitespace and trailing slashes from the API base URL.
pub fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .or_else(|_| std::env::var("LOCALAPPDATA"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                .join(".local")
                .join("share")
        })
        .join(APP_DIR_NAME)
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env_string(key)?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable config value, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: &[&str] = &[
        "AMA_POS_API_BASE_URL",
        "AMA_POS_DATA_DIR",
        "AMA_POS_REQUEST_TIMEOUT_SECS",
        "AMA_POS_AUTO_PRINT_DELAY_MS",
        "AMA_POS_PRINTER_PATH",
        "AMA_POS_PAPER_MM",
        "AMA_POS_COUNTER_TAX_RATE",
    ];

    fn clear_env() {
        for key in KEYS {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn base_url_trailing_slashes_are_removed() {
        assert_eq!(
            normalize_base_url(" https://api.amabakery.com.np/// "),
            "https://api.amabakery.com.np"
        );
        assert_eq!(normalize_base_url("http://localhost:8000"), "http://localhost:8000");
    }

    #[test]
    #[serial]
    fn defaults_apply_without_env() {
        clear_env();
        let cfg = Config::from_env();
        assert_eq!(cfg.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(cfg.request_timeout, Duration::from_secs(30));
        assert_eq!(cfg.auto_print_delay, Duration::from_millis(1500));
        assert_eq!(cfg.paper.chars(), 48);
        assert!(cfg.printer_path.is_none());
        assert!((cfg.counter_tax_rate - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    #[serial]
    fn env_overrides_are_read_and_bad_numbers_fall_back() {
        clear_env();
        std::env::set_var("AMA_POS_API_BASE_URL", "https://pos.example.com/");
        std::env::set_var("AMA_POS_DATA_DIR", "/tmp/ama-pos-test");
        std::env::set_var("AMA_POS_REQUEST_TIMEOUT_SECS", "not-a-number");
        std::env::set_var("AMA_POS_PAPER_MM", "58");
        std::env::set_var("AMA_POS_COUNTER_TAX_RATE", "13");

        let cfg = Config::from_env();
        clear_env();

        assert_eq!(cfg.api_base_url, "https://pos.example.com");
        assert_eq!(cfg.data_dir, PathBuf::from("/tmp/ama-pos-test"));
        assert_eq!(cfg.log_dir(), PathBuf::from("/tmp/ama-pos-test/logs"));
        assert_eq!(cfg.request_timeout, Duration::from_secs(30));
        assert_eq!(cfg.paper.chars(), 32);
        assert!((cfg.counter_tax_rate - 13.0).abs() < f64::EPSILON);
    }
}

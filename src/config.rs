//! Terminal configuration.
//!
//! Every setting has a default and can be overridden through the environment:
//!
//! | Variable                         | Default                 |
//! |----------------------------------|-------------------------|
//! | `COMANDA_DATA_DIR`               | platform data dir       |
//! | `COMANDA_REMOTE_URL`             | `http://localhost:3000` |
//! | `COMANDA_API_KEY`                | empty                   |
//! | `COMANDA_TERMINAL_ID`            | `terminal-1`            |
//! | `COMANDA_SYNC_INTERVAL_SECS`     | 15                      |
//! | `COMANDA_ONLINE_DEBOUNCE_MS`     | 2000                    |
//! | `COMANDA_PROBE_INTERVAL_SECS`    | 10                      |
//! | `COMANDA_REQUEST_TIMEOUT_SECS`   | 30                      |
//! | `COMANDA_RETENTION_DAYS`         | 7                       |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::api;
use crate::sync::DEFAULT_RETENTION_DAYS;

pub const DEFAULT_REMOTE_URL: &str = "http://localhost:3000";
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_ONLINE_DEBOUNCE: Duration = Duration::from_millis(2000);
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(10);

const APP_DIR_NAME: &str = "comanda-pos";
const DB_FILE_NAME: &str = "comanda.db";

#[derive(Debug, Clone, PartialEq)]
pub struct TerminalConfig {
    pub data_dir: PathBuf,
    pub remote_url: String,
    pub api_key: String,
    pub terminal_id: String,
    pub sync_interval: Duration,
    pub online_debounce: Duration,
    pub probe_interval: Duration,
    pub request_timeout: Duration,
    pub retention_days: i64,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            remote_url: DEFAULT_REMOTE_URL.to_string(),
            api_key: String::new(),
            terminal_id: "terminal-1".to_string(),
            sync_interval: DEFAULT_SYNC_INTERVAL,
            online_debounce: DEFAULT_ONLINE_DEBOUNCE,
            probe_interval: DEFAULT_PROBE_INTERVAL,
            request_timeout: api::DEFAULT_TIMEOUT,
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

impl TerminalConfig {
    /// Load configuration from `COMANDA_*` variables, falling back to the
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            data_dir: std::env::var("COMANDA_DATA_DIR")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            remote_url: std::env::var("COMANDA_REMOTE_URL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(|v| api::normalize_base_url(&v))
                .unwrap_or(defaults.remote_url),
            api_key: std::env::var("COMANDA_API_KEY").unwrap_or(defaults.api_key),
            terminal_id: std::env::var("COMANDA_TERMINAL_ID")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.terminal_id),
            sync_interval: env_parse("COMANDA_SYNC_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.sync_interval),
            online_debounce: env_parse("COMANDA_ONLINE_DEBOUNCE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.online_debounce),
            probe_interval: env_parse("COMANDA_PROBE_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.probe_interval),
            request_timeout: env_parse("COMANDA_REQUEST_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            retention_days: env_parse::<i64>("COMANDA_RETENTION_DAYS")
                .filter(|days| *days > 0)
                .unwrap_or(defaults.retention_days),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE_NAME)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparsable setting; using default");
            None
        }
    }
}

/// Per-user application data directory.
pub fn default_data_dir() -> PathBuf {
    let base = std::env::var("LOCALAPPDATA")
        .or_else(|_| std::env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(target_os = "windows")]
            {
                PathBuf::from(std::env::var("USERPROFILE").unwrap_or_else(|_| ".".into()))
                    .join("AppData")
                    .join("Local")
            }
            #[cfg(not(target_os = "windows"))]
            {
                PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                    .join(".local")
                    .join("share")
            }
        });
    base.join(APP_DIR_NAME)
}

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::stocks::FINNHUB_BASE_URL;

/// Runtime settings, read from the environment (and `.env` if present).
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub optimizer_program: PathBuf,
    pub optimizer_script: Option<PathBuf>,
    pub optimizer_timeout: Duration,
    pub finnhub_api_key: String,
    pub finnhub_base_url: String,
    pub quote_delay: Duration,
    pub refresh_interval: Duration,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            optimizer_program: PathBuf::from("python3"),
            optimizer_script: Some(PathBuf::from("portfolio_construction.py")),
            optimizer_timeout: Duration::from_secs(120),
            finnhub_api_key: String::new(),
            finnhub_base_url: FINNHUB_BASE_URL.to_string(),
            quote_delay: Duration::from_millis(300),
            refresh_interval: Duration::from_secs(60),
            log_format: LogFormat::Text,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Config::default();
        let text = |key: &str| lookup(key).map(|v| v.trim().to_string());

        let optimizer_script = match text("BOARD_OPTIMIZER_SCRIPT") {
            Some(s) if s.is_empty() => None,
            Some(s) => Some(PathBuf::from(s)),
            None => defaults.optimizer_script,
        };

        let log_format = match text("BOARD_LOG_FORMAT") {
            Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        Config {
            data_dir: text("BOARD_DATA_DIR")
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            optimizer_program: text("BOARD_OPTIMIZER_PROGRAM")
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.optimizer_program),
            optimizer_script,
            optimizer_timeout: parse_or(&lookup, "BOARD_OPTIMIZER_TIMEOUT_SECS", 120)
                .map(Duration::from_secs)
                .unwrap_or(defaults.optimizer_timeout),
            finnhub_api_key: text("FINNHUB_API_KEY").unwrap_or(defaults.finnhub_api_key),
            finnhub_base_url: text("FINNHUB_BASE_URL")
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.finnhub_base_url),
            quote_delay: parse_or(&lookup, "BOARD_QUOTE_DELAY_MS", 300)
                .map(Duration::from_millis)
                .unwrap_or(defaults.quote_delay),
            refresh_interval: parse_or(&lookup, "BOARD_REFRESH_SECS", 60)
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.refresh_interval),
            log_format,
        }
    }

    pub fn portfolios_path(&self) -> PathBuf {
        self.data_dir.join("portfolios.json")
    }

    pub fn preferences_path(&self) -> PathBuf {
        self.data_dir.join("user-preferences.csv")
    }
}

fn parse_or<T: FromStr + std::fmt::Display>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("{}='{}' is not a valid number, using {}", key, raw, default);
            Some(default)
        }
    }
}

//! Process configuration loaded from the environment.
//!
//! `.env` is read by the binary before `BotConfig::from_env` is called.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::Duration;
use thiserror::Error;

pub const DEFAULT_SERIES_TICKER: &str = "KXBTC15M";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("KALSHI_ENV must be 'prod' or 'demo', got {0:?}")]
    InvalidEnv(String),
}

/// Exchange environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KalshiEnv {
    #[default]
    Prod,
    Demo,
}

impl KalshiEnv {
    pub fn rest_base_url(&self) -> &'static str {
        match self {
            KalshiEnv::Prod => "https://api.elections.kalshi.com/trade-api/v2",
            KalshiEnv::Demo => "https://demo-api.kalshi.co/trade-api/v2",
        }
    }

    pub fn ws_url(&self) -> &'static str {
        match self {
            KalshiEnv::Prod => "wss://api.elections.kalshi.com/trade-api/ws/v2",
            KalshiEnv::Demo => "wss://demo-api.kalshi.co/trade-api/ws/v2",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KalshiEnv::Prod => "prod",
            KalshiEnv::Demo => "demo",
        }
    }
}

impl FromStr for KalshiEnv {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prod" => Ok(KalshiEnv::Prod),
            "demo" => Ok(KalshiEnv::Demo),
            other => Err(ConfigError::InvalidEnv(other.to_string())),
        }
    }
}

impl std::fmt::Display for KalshiEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// Timing and mode settings for the trading engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Series prefix used for discovery and reconciliation.
    pub series_ticker: String,
    pub dry_run: bool,
    pub tick_interval: StdDuration,
    pub balance_refresh: Duration,
    pub discovery_interval: Duration,
    pub strike_poll_interval: Duration,
    pub settlement_poll_interval: Duration,
    /// Give up on a settlement after this long past close, unless a result
    /// has already been observed.
    pub settlement_timeout: Duration,
    /// Resting orders older than this are checked once, then cancelled.
    pub order_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            series_ticker: DEFAULT_SERIES_TICKER.to_string(),
            dry_run: true,
            tick_interval: StdDuration::from_secs(1),
            balance_refresh: Duration::seconds(60),
            discovery_interval: Duration::seconds(30),
            strike_poll_interval: Duration::seconds(10),
            settlement_poll_interval: Duration::seconds(10),
            settlement_timeout: Duration::minutes(15),
            order_timeout: Duration::seconds(30),
        }
    }
}

/// Everything the binary needs to start.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub api_key_id: String,
    pub private_key_path: PathBuf,
    pub env: KalshiEnv,
    pub dry_run: bool,
    pub journal_path: PathBuf,
    pub series_ticker: String,
    pub posterior_path: Option<PathBuf>,
    pub log_format: LogFormat,
}

impl BotConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. Empty values count
    /// as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let api_key_id = get("KALSHI_API_KEY_ID").ok_or(ConfigError::Missing("KALSHI_API_KEY_ID"))?;
        let env = match get("KALSHI_ENV") {
            Some(v) => v.parse()?,
            None => KalshiEnv::default(),
        };

        Ok(Self {
            api_key_id,
            private_key_path: get("KALSHI_PRIV_KEY_PATH")
                .unwrap_or_else(|| "./kalshi_private_key.pem".to_string())
                .into(),
            env,
            dry_run: get("DRY_RUN").and_then(|v| parse_bool(&v)).unwrap_or(true),
            journal_path: get("JOURNAL_PATH")
                .unwrap_or_else(|| "./journal.jsonl".to_string())
                .into(),
            series_ticker: get("SERIES_TICKER").unwrap_or_else(|| DEFAULT_SERIES_TICKER.to_string()),
            posterior_path: get("POSTERIOR_PATH").map(PathBuf::from),
            log_format: match get("LOG_FORMAT").as_deref() {
                Some("json") => LogFormat::Json,
                _ => LogFormat::Compact,
            },
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            series_ticker: self.series_ticker.clone(),
            dry_run: self.dry_run,
            ..EngineConfig::default()
        }
    }
}

// Unrecognized values fall back to the default.
fn parse_bool(v: &str) -> Option<bool> {
    match v {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<BotConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        BotConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = load(&[("KALSHI_API_KEY_ID", "abc")]).unwrap();
        assert_eq!(cfg.env, KalshiEnv::Prod);
        assert!(cfg.dry_run);
        assert_eq!(cfg.journal_path, PathBuf::from("./journal.jsonl"));
        assert_eq!(cfg.private_key_path, PathBuf::from("./kalshi_private_key.pem"));
        assert_eq!(cfg.series_ticker, "KXBTC15M");
        assert_eq!(cfg.posterior_path, None);
        assert_eq!(cfg.log_format, LogFormat::Compact);
    }

    #[test]
    fn test_missing_key_id() {
        assert_eq!(load(&[]).unwrap_err(), ConfigError::Missing("KALSHI_API_KEY_ID"));
        assert_eq!(
            load(&[("KALSHI_API_KEY_ID", "")]).unwrap_err(),
            ConfigError::Missing("KALSHI_API_KEY_ID")
        );
    }

    #[test]
    fn test_invalid_env() {
        let err = load(&[("KALSHI_API_KEY_ID", "abc"), ("KALSHI_ENV", "staging")]).unwrap_err();
        assert_eq!(err, ConfigError::InvalidEnv("staging".to_string()));
    }

    #[test]
    fn test_overrides() {
        let cfg = load(&[
            ("KALSHI_API_KEY_ID", "abc"),
            ("KALSHI_ENV", "demo"),
            ("DRY_RUN", "false"),
            ("SERIES_TICKER", "KXETH15M"),
            ("POSTERIOR_PATH", "/tmp/p.json"),
            ("LOG_FORMAT", "json"),
        ])
        .unwrap();
        assert_eq!(cfg.env, KalshiEnv::Demo);
        assert_eq!(cfg.env.rest_base_url(), "https://demo-api.kalshi.co/trade-api/v2");
        assert!(!cfg.dry_run);
        assert_eq!(cfg.log_format, LogFormat::Json);

        let engine = cfg.engine_config();
        assert_eq!(engine.series_ticker, "KXETH15M");
        assert!(!engine.dry_run);
        assert_eq!(engine.order_timeout, Duration::seconds(30));
    }

    #[test]
    fn test_unparseable_dry_run_keeps_default() {
        let cfg = load(&[("KALSHI_API_KEY_ID", "abc"), ("DRY_RUN", "maybe")]).unwrap();
        assert!(cfg.dry_run);
    }
}

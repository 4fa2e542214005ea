//! Startup settings read from the environment.

use std::path::PathBuf;
use thiserror::Error;
use whale_watcher_alerts::config::{DEFAULT_HEARTBEAT_INTERVAL_SECS, DEFAULT_POLL_INTERVAL_SECS};
use whale_watcher_alerts::WatchConfig;
use whale_watcher_core::FilterConfig;

pub const DEFAULT_CONFIG_STATE_FILE: &str = "config_state.json";
pub const DEFAULT_TRADE_STORE_FILE: &str = "trades.json";

#[derive(Error, Debug, PartialEq)]
pub enum SettingsError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Settings resolved at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub telegram_token: String,
    pub telegram_chat_id: i64,
    pub config_state_file: PathBuf,
    pub trade_store_file: PathBuf,
    /// Initial configuration; a persisted config snapshot overrides it.
    pub watch: WatchConfig,
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let telegram_token =
            get("TELEGRAM_BOT_TOKEN").ok_or(SettingsError::Missing("TELEGRAM_BOT_TOKEN"))?;
        let chat_id = get("TELEGRAM_CHAT_ID").ok_or(SettingsError::Missing("TELEGRAM_CHAT_ID"))?;
        let telegram_chat_id = parse_number("TELEGRAM_CHAT_ID", Some(chat_id), 0i64)?;

        let watch = WatchConfig {
            poll_interval: parse_number(
                "POLL_INTERVAL",
                get("POLL_INTERVAL"),
                DEFAULT_POLL_INTERVAL_SECS,
            )?,
            heartbeat_interval: parse_number(
                "HEARTBEAT_INTERVAL",
                get("HEARTBEAT_INTERVAL"),
                DEFAULT_HEARTBEAT_INTERVAL_SECS,
            )?,
            filters: FilterConfig {
                min_trade_value: parse_number("MIN_TRADE_VALUE", get("MIN_TRADE_VALUE"), 0.0)?,
                whale_addresses: split_list(get("WHALE_ADDRESSES")),
                market_ids: split_list(get("MARKET_IDS")),
                market_text_filters: split_list(get("MARKET_TEXT_FILTERS")),
                exclude_market_ids: split_list(get("EXCLUDE_MARKET_IDS")),
                exclude_market_text_filters: split_list(get("EXCLUDE_MARKET_TEXT_FILTERS")),
            },
        }
        .normalized();

        Ok(Self {
            telegram_token,
            telegram_chat_id,
            config_state_file: get("CONFIG_STATE_FILE")
                .unwrap_or_else(|| DEFAULT_CONFIG_STATE_FILE.to_string())
                .into(),
            trade_store_file: get("TRADE_STORE_FILE")
                .unwrap_or_else(|| DEFAULT_TRADE_STORE_FILE.to_string())
                .into(),
            watch,
        })
    }
}

fn parse_number<T: std::str::FromStr>(
    key: &'static str,
    raw: Option<String>,
    default: T,
) -> Result<T, SettingsError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| SettingsError::Invalid { key, value }),
    }
}

fn split_list(raw: Option<String>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

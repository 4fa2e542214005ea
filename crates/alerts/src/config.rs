//! Runtime watch configuration and its persisted snapshot.

use crate::snapshot;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use whale_watcher_core::FilterConfig;

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
pub const MIN_POLL_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 600;
pub const MIN_HEARTBEAT_INTERVAL_SECS: u64 = 60;

/// Everything the command interface can change at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Seconds between poll cycles.
    pub poll_interval: u64,
    /// Seconds between heartbeat messages.
    pub heartbeat_interval: u64,
    #[serde(flatten)]
    pub filters: FilterConfig,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL_SECS,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            filters: FilterConfig::default(),
        }
    }
}

impl WatchConfig {
    /// Apply clamps and list normalization.
    pub fn normalized(self) -> Self {
        Self {
            poll_interval: self.poll_interval.max(MIN_POLL_INTERVAL_SECS),
            heartbeat_interval: self.heartbeat_interval.max(MIN_HEARTBEAT_INTERVAL_SECS),
            filters: self.filters.normalized(),
        }
    }

    /// Overlay the fields present in a persisted snapshot.
    ///
    /// Each key is applied on its own: a field with the wrong type is logged
    /// and skipped while the rest of the snapshot still applies.
    pub fn merge_snapshot(mut self, snapshot: &Value) -> Self {
        let Some(obj) = snapshot.as_object() else {
            warn!("Config snapshot is not a JSON object, ignoring it");
            return self;
        };

        for (key, value) in obj {
            let applied = match key.as_str() {
                "poll_interval" => seconds(value).map(|v| self.poll_interval = v),
                "heartbeat_interval" => seconds(value).map(|v| self.heartbeat_interval = v),
                "min_trade_value" => value.as_f64().map(|v| self.filters.min_trade_value = v),
                "whale_addresses" => {
                    string_list(value).map(|v| self.filters.whale_addresses = v)
                }
                "market_ids" => string_list(value).map(|v| self.filters.market_ids = v),
                "market_text_filters" => {
                    string_list(value).map(|v| self.filters.market_text_filters = v)
                }
                "exclude_market_ids" => {
                    string_list(value).map(|v| self.filters.exclude_market_ids = v)
                }
                "exclude_market_text_filters" => {
                    string_list(value).map(|v| self.filters.exclude_market_text_filters = v)
                }
                _ => Some(()),
            };
            if applied.is_none() {
                warn!(field = %key, value = %value, "Ignoring malformed config snapshot field");
            }
        }

        self.normalized()
    }
}

fn seconds(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64))
}

fn string_list(value: &Value) -> Option<Vec<String>> {
    value
        .as_array()?
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect()
}

/// Shared owner of the watch configuration.
///
/// Every mutation holds the write lock until the snapshot has been written,
/// so concurrent writers never interleave on disk.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    state: RwLock<WatchConfig>,
}

impl ConfigStore {
    /// Load the persisted snapshot over `defaults`.
    ///
    /// A missing or corrupt snapshot leaves the defaults in place.
    pub fn open(path: impl Into<PathBuf>, defaults: WatchConfig) -> Self {
        let path = path.into();
        let config = match snapshot::load::<Value>(&path) {
            Ok(Some(value)) => {
                info!(path = %path.display(), "Loaded config snapshot");
                defaults.merge_snapshot(&value)
            }
            Ok(None) => defaults.normalized(),
            Err(e) => {
                warn!(error = %e, "Could not load config snapshot, using defaults");
                defaults.normalized()
            }
        };
        Self {
            path,
            state: RwLock::new(config),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of the current configuration.
    pub async fn snapshot(&self) -> WatchConfig {
        self.state.read().await.clone()
    }

    pub async fn filters(&self) -> FilterConfig {
        self.state.read().await.filters.clone()
    }

    pub async fn whale_addresses(&self) -> Vec<String> {
        self.state.read().await.filters.whale_addresses.clone()
    }

    pub async fn poll_interval(&self) -> u64 {
        self.state.read().await.poll_interval
    }

    pub async fn heartbeat_interval(&self) -> u64 {
        self.state.read().await.heartbeat_interval
    }

    fn write(&self, state: &WatchConfig) {
        if let Err(e) = snapshot::save(&self.path, state) {
            error!(error = %e, "Failed to persist config snapshot");
        }
    }

    /// Apply an add/remove style change and persist it when it took effect.
    async fn update(&self, change: impl FnOnce(&mut FilterConfig) -> bool) -> bool {
        let mut state = self.state.write().await;
        let changed = change(&mut state.filters);
        if changed {
            self.write(&state);
        }
        changed
    }

    pub async fn add_whale_address(&self, address: &str) -> bool {
        self.update(|f| f.add_whale_address(address)).await
    }

    pub async fn remove_whale_address(&self, address: &str) -> bool {
        self.update(|f| f.remove_whale_address(address)).await
    }

    pub async fn add_market_id(&self, market_id: &str) -> bool {
        self.update(|f| f.add_market_id(market_id)).await
    }

    pub async fn remove_market_id(&self, market_id: &str) -> bool {
        self.update(|f| f.remove_market_id(market_id)).await
    }

    pub async fn add_text_filter(&self, text: &str) -> bool {
        self.update(|f| f.add_text_filter(text)).await
    }

    pub async fn remove_text_filter(&self, text: &str) -> bool {
        self.update(|f| f.remove_text_filter(text)).await
    }

    pub async fn add_exclude_market_id(&self, market_id: &str) -> bool {
        self.update(|f| f.add_exclude_market_id(market_id)).await
    }

    pub async fn remove_exclude_market_id(&self, market_id: &str) -> bool {
        self.update(|f| f.remove_exclude_market_id(market_id)).await
    }

    pub async fn add_exclude_text_filter(&self, text: &str) -> bool {
        self.update(|f| f.add_exclude_text_filter(text)).await
    }

    pub async fn remove_exclude_text_filter(&self, text: &str) -> bool {
        self.update(|f| f.remove_exclude_text_filter(text)).await
    }

    /// Set the minimum trade value, returning the value actually stored.
    pub async fn set_min_trade_value(&self, value: f64) -> f64 {
        let mut state = self.state.write().await;
        state.filters.set_min_trade_value(value);
        self.write(&state);
        state.filters.min_trade_value
    }

    /// Set the poll interval, returning the clamped value.
    pub async fn set_poll_interval(&self, secs: i64) -> u64 {
        let mut state = self.state.write().await;
        state.poll_interval = clamp_secs(secs, MIN_POLL_INTERVAL_SECS);
        self.write(&state);
        state.poll_interval
    }

    /// Set the heartbeat interval, returning the clamped value.
    pub async fn set_heartbeat_interval(&self, secs: i64) -> u64 {
        let mut state = self.state.write().await;
        state.heartbeat_interval = clamp_secs(secs, MIN_HEARTBEAT_INTERVAL_SECS);
        self.write(&state);
        state.heartbeat_interval
    }
}

fn clamp_secs(secs: i64, min: u64) -> u64 {
    u64::try_from(secs).unwrap_or(0).max(min)
}

//! Alert delivery and operator-facing state for the whale watcher.
//!
//! This crate provides:
//! - JSON snapshot persistence for the watch configuration and trade ledger
//! - The deduplication ledger of already processed trades
//! - Notification sinks and Telegram alert formatting
//! - The Telegram command bot that edits the watch configuration

pub mod config;
pub mod ledger;
pub mod notifier;
pub mod snapshot;
pub mod telegram;

pub use config::{ConfigStore, WatchConfig};
pub use ledger::{now_secs, DedupLedger, LedgerStats, SharedLedger, DEFAULT_RETENTION};
pub use notifier::{LogSink, NotificationSink, NotifyError, TelegramSink};
pub use snapshot::SnapshotError;
pub use telegram::{execute, format_trade_alert, Command, TelegramBot, TelegramError};

//! Whale Watcher - Headless Server
//!
//! Polls the public trade feed for tracked addresses and sends Telegram
//! alerts for new trades that pass the configured filters.

mod config;

use clap::Parser;
use config::{Settings, SettingsError};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use whale_watcher_alerts::{
    now_secs, ConfigStore, DedupLedger, LogSink, NotificationSink, SharedLedger, TelegramBot,
    TelegramSink, DEFAULT_RETENTION,
};
use whale_watcher_engine::{stop_channel, Heartbeat, PollError, PollLoop, PollSettings};
use whale_watcher_feeds::{FeedClient, FeedClientConfig, FeedError};

/// Whale Watcher CLI
#[derive(Parser, Debug)]
#[command(name = "whale-watcher")]
#[command(about = "Telegram alerts for large trades by tracked addresses", long_about = None)]
struct Args {
    /// Log level: trace, debug, info, warn, error (RUST_LOG takes precedence)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Config snapshot path (overrides CONFIG_STATE_FILE)
    #[arg(long)]
    config_state: Option<PathBuf>,

    /// Trade ledger path (overrides TRADE_STORE_FILE)
    #[arg(long)]
    trade_store: Option<PathBuf>,

    /// Log alerts instead of sending them to Telegram
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Run a single poll cycle and exit
    #[arg(long, default_value_t = false)]
    once: bool,
}

#[derive(Error, Debug)]
enum AppError {
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("Failed to build feed client: {0}")]
    Feed(#[from] FeedError),
    #[error(transparent)]
    Poll(#[from] PollError),
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

#[tokio::main]
async fn main() {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    init_logging(&args.log_level);

    if let Err(e) = run(args).await {
        error!(error = %e, "Whale watcher failed");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), AppError> {
    let settings = Settings::from_env()?;
    let config_path = args
        .config_state
        .unwrap_or_else(|| settings.config_state_file.clone());
    let ledger_path = args
        .trade_store
        .unwrap_or_else(|| settings.trade_store_file.clone());

    let store = Arc::new(ConfigStore::open(config_path, settings.watch.clone()));
    let ledger: SharedLedger = Arc::new(Mutex::new(DedupLedger::open(
        ledger_path,
        DEFAULT_RETENTION,
        now_secs(),
    )));

    let config = store.snapshot().await;
    info!(
        whales = config.filters.whale_addresses.len(),
        poll_interval = config.poll_interval,
        heartbeat_interval = config.heartbeat_interval,
        min_trade_value = config.filters.min_trade_value,
        dry_run = args.dry_run,
        "🐋 Starting whale watcher"
    );

    let bot = Bot::new(&settings.telegram_token);
    let chat_id = ChatId(settings.telegram_chat_id);
    let sink: Arc<dyn NotificationSink> = if args.dry_run {
        Arc::new(LogSink)
    } else {
        Arc::new(TelegramSink::new(bot.clone(), chat_id))
    };

    let feed = FeedClient::http(FeedClientConfig::default())?;
    let poll = Arc::new(PollLoop::new(
        feed,
        Arc::clone(&store),
        Arc::clone(&ledger),
        Arc::clone(&sink),
        PollSettings::default(),
    ));

    if args.once {
        let report = poll.run_cycle().await?;
        info!(
            fetched = report.fetched,
            delivered = report.delivered,
            rejected = report.rejected,
            duplicates = report.duplicates,
            delivery_failures = report.delivery_failures,
            "Single cycle complete"
        );
        return Ok(());
    }

    let (stop_handle, stop_signal) = stop_channel();

    let poll_handle = {
        let poll = Arc::clone(&poll);
        let signal = stop_signal.clone();
        tokio::spawn(async move { poll.run(signal).await })
    };

    let heartbeat = Heartbeat::new(
        Arc::clone(&sink),
        Arc::clone(&store),
        Arc::clone(&ledger),
        poll.stats(),
    );
    let heartbeat_handle = {
        let signal = stop_signal.clone();
        tokio::spawn(async move { heartbeat.run(signal).await })
    };

    let telegram = Arc::new(TelegramBot::new(
        bot,
        chat_id,
        Arc::clone(&store),
        Arc::clone(&ledger),
    ));
    let bot_handle = {
        let mut signal = stop_signal.clone();
        tokio::spawn(telegram.run(async move { signal.stopped().await }))
    };

    // Handle shutdown
    info!("Press Ctrl+C to stop...");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl+C");
    }

    warn!("Shutdown signal received");
    stop_handle.stop();

    // The poll loop only exits between cycles, so every delivered trade is in the ledger
    if let Err(e) = poll_handle.await {
        error!(error = %e, "Poll task failed");
    }
    let _ = tokio::time::timeout(Duration::from_secs(1), heartbeat_handle).await;
    if tokio::time::timeout(Duration::from_secs(5), bot_handle).await.is_err() {
        warn!("Telegram dispatcher did not stop in time");
    }

    // Final stats
    let stats = poll.stats();
    let ledger_stats = ledger.lock().await.stats();
    info!("📈 Final Stats:");
    info!("  Cycles: {} ({} failed)", stats.cycles(), stats.failed_cycles());
    info!("  Alerts delivered: {}", stats.delivered());
    info!("  Trades filtered out: {}", stats.rejected());
    info!("  Delivery failures: {}", stats.delivery_failures());
    info!("  Trades in ledger: {}", ledger_stats.total);

    info!("👋 Whale watcher stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["whale-watcher"]);
        assert_eq!(args.log_level, "info");
        assert!(args.config_state.is_none());
        assert!(!args.dry_run);
        assert!(!args.once);
    }

    #[test]
    fn test_args_overrides() {
        let args = Args::parse_from([
            "whale-watcher",
            "--log-level",
            "debug",
            "--config-state",
            "/tmp/config.json",
            "--trade-store",
            "/tmp/trades.json",
            "--dry-run",
            "--once",
        ]);
        assert_eq!(args.log_level, "debug");
        assert_eq!(args.config_state, Some(PathBuf::from("/tmp/config.json")));
        assert_eq!(args.trade_store, Some(PathBuf::from("/tmp/trades.json")));
        assert!(args.dry_run);
        assert!(args.once);
    }
}

//! The fetch, filter and notify cycle and the loop that schedules it.

use crate::stop::StopSignal;
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use whale_watcher_alerts::{
    format_trade_alert, now_secs, ConfigStore, NotificationSink, SharedLedger, SnapshotError,
    DEFAULT_RETENTION,
};
use whale_watcher_feeds::FeedClient;

#[derive(Error, Debug)]
pub enum PollError {
    #[error("Failed to persist trade ledger: {0}")]
    Ledger(#[from] SnapshotError),
    #[error("Poll cycle panicked: {0}")]
    Panicked(String),
}

/// Timing knobs that are fixed for the life of the loop.
#[derive(Debug, Clone)]
pub struct PollSettings {
    /// Delay between successive deliveries within a cycle.
    pub delivery_pacing: Duration,
    /// Extra wait after a failed cycle, before the normal interval.
    pub error_backoff: Duration,
    /// How long seen trade ids are kept.
    pub retention: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            delivery_pacing: Duration::from_secs(1),
            error_backoff: Duration::from_secs(10),
            retention: DEFAULT_RETENTION,
        }
    }
}

/// Outcome counts for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub missing_id: usize,
    pub duplicates: usize,
    pub rejected: usize,
    pub delivered: usize,
    pub delivery_failures: usize,
    pub evicted: usize,
}

/// Running totals across cycles.
#[derive(Debug, Default)]
pub struct PollStats {
    cycles: AtomicU64,
    failed_cycles: AtomicU64,
    delivered: AtomicU64,
    rejected: AtomicU64,
    delivery_failures: AtomicU64,
}

impl PollStats {
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn failed_cycles(&self) -> u64 {
        self.failed_cycles.load(Ordering::Relaxed)
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn delivery_failures(&self) -> u64 {
        self.delivery_failures.load(Ordering::Relaxed)
    }

    fn record(&self, report: &CycleReport) {
        self.delivered.fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.rejected.fetch_add(report.rejected as u64, Ordering::Relaxed);
        self.delivery_failures.fetch_add(report.delivery_failures as u64, Ordering::Relaxed);
    }
}

/// Repeatedly polls the tracked addresses and notifies on new trades.
pub struct PollLoop {
    feed: FeedClient,
    store: Arc<ConfigStore>,
    ledger: SharedLedger,
    sink: Arc<dyn NotificationSink>,
    settings: PollSettings,
    stats: Arc<PollStats>,
}

impl PollLoop {
    pub fn new(
        feed: FeedClient,
        store: Arc<ConfigStore>,
        ledger: SharedLedger,
        sink: Arc<dyn NotificationSink>,
        settings: PollSettings,
    ) -> Self {
        Self {
            feed,
            store,
            ledger,
            sink,
            settings,
            stats: Arc::new(PollStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<PollStats> {
        Arc::clone(&self.stats)
    }

    /// Run one fetch, filter and notify cycle.
    ///
    /// Every trade with an id that reaches the filter is marked seen, whether
    /// it was delivered, rejected, or failed to deliver.
    pub async fn run_cycle(&self) -> Result<CycleReport, PollError> {
        let evicted = self
            .ledger
            .lock()
            .await
            .evict_older_than(now_secs(), self.settings.retention);
        let mut report = CycleReport {
            evicted,
            ..Default::default()
        };

        let config = self.store.snapshot().await;
        let addresses = &config.filters.whale_addresses;
        if addresses.is_empty() {
            info!("No whale addresses configured, skipping fetch");
            return Ok(report);
        }

        let trades = self.feed.fetch_all(addresses).await;
        report.fetched = trades.len();

        for trade in trades {
            let Some(id) = trade.id.clone() else {
                report.missing_id += 1;
                debug!(trade = trade.display_id(), "Skipping trade without id");
                continue;
            };

            if !self.ledger.lock().await.is_new(&id) {
                report.duplicates += 1;
                continue;
            }

            match config.filters.check(&trade) {
                Ok(()) => {
                    if report.delivered + report.delivery_failures > 0 {
                        tokio::time::sleep(self.settings.delivery_pacing).await;
                    }
                    let text = format_trade_alert(&trade);
                    match self.sink.send(&text).await {
                        Ok(()) => {
                            report.delivered += 1;
                            info!(
                                trade_id = %id,
                                value = trade.value(),
                                maker = trade.maker_address.as_deref().unwrap_or("unknown"),
                                sink = self.sink.name(),
                                "Trade notification sent"
                            );
                        }
                        Err(e) => {
                            report.delivery_failures += 1;
                            error!(
                                trade_id = %id,
                                sink = self.sink.name(),
                                error = %e,
                                "Failed to deliver trade notification"
                            );
                        }
                    }
                }
                Err(reason) => {
                    report.rejected += 1;
                    debug!(
                        trade_id = %id,
                        value = trade.value(),
                        reason = reason.as_str(),
                        "Trade filtered out"
                    );
                }
            }

            self.ledger.lock().await.mark_seen(&id, now_secs())?;
        }

        Ok(report)
    }

    /// Run cycles until `stop` fires.
    ///
    /// A failed or panicking cycle is logged and followed by the error backoff;
    /// it never ends the loop. Stop requests are honoured between cycles only.
    pub async fn run(&self, mut stop: StopSignal) {
        info!(
            pacing = ?self.settings.delivery_pacing,
            error_backoff = ?self.settings.error_backoff,
            "Poll loop started"
        );

        while !stop.is_stopped() {
            let outcome = AssertUnwindSafe(self.run_cycle()).catch_unwind().await;
            self.stats.cycles.fetch_add(1, Ordering::Relaxed);

            let failure = match outcome {
                Ok(Ok(report)) => {
                    self.stats.record(&report);
                    if report.fetched > 0 || report.evicted > 0 {
                        info!(
                            fetched = report.fetched,
                            delivered = report.delivered,
                            rejected = report.rejected,
                            duplicates = report.duplicates,
                            delivery_failures = report.delivery_failures,
                            evicted = report.evicted,
                            "Poll cycle complete"
                        );
                    }
                    None
                }
                Ok(Err(e)) => Some(e),
                Err(panic) => Some(PollError::Panicked(panic_message(panic.as_ref()))),
            };

            if let Some(e) = failure {
                self.stats.failed_cycles.fetch_add(1, Ordering::Relaxed);
                error!(error = %e, backoff = ?self.settings.error_backoff, "Poll cycle failed");
                if stop.sleep(self.settings.error_backoff).await {
                    break;
                }
            }

            let interval = Duration::from_secs(self.store.poll_interval().await);
            if stop.sleep(interval).await {
                break;
            }
        }

        info!(
            cycles = self.stats.cycles(),
            failed_cycles = self.stats.failed_cycles(),
            delivered = self.stats.delivered(),
            "Poll loop stopped"
        );
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        warn!("Poll cycle panicked with a non-string payload");
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stop::stop_channel;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use tokio::sync::Mutex;
    use whale_watcher_alerts::notifier::testing::RecordingSink;
    use whale_watcher_alerts::{DedupLedger, NotifyError, WatchConfig};
    use whale_watcher_core::FilterConfig;
    use whale_watcher_feeds::client::testing::{Scripted, ScriptedTransport};
    use whale_watcher_feeds::FeedClientConfig;

    const WHALE_A: &str = "0xaaa";
    const WHALE_B: &str = "0xbbb";

    fn small_trade() -> Value {
        // BUY 10 @ 0.5 = 5
        json!({ "id": "a1", "side": "BUY", "size": 10, "price": 0.5, "timestamp": 100 })
    }

    fn large_trade() -> Value {
        // SELL size is already the value
        json!({ "id": "b1", "side": "SELL", "size": 20, "price": 0.5, "timestamp": 200 })
    }

    struct Harness {
        dir: tempfile::TempDir,
        transport: Arc<ScriptedTransport>,
        ledger: SharedLedger,
        poll: Arc<PollLoop>,
    }

    fn harness_with(
        transport: ScriptedTransport,
        whales: &[&str],
        sink: Arc<dyn NotificationSink>,
        ledger_path: Option<std::path::PathBuf>,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(transport);
        let defaults = WatchConfig {
            filters: FilterConfig {
                min_trade_value: 10.0,
                whale_addresses: whales.iter().map(|w| w.to_string()).collect(),
                ..Default::default()
            },
            ..Default::default()
        };
        let store = Arc::new(ConfigStore::open(dir.path().join("config_state.json"), defaults));
        let ledger_path = ledger_path.unwrap_or_else(|| dir.path().join("trades.json"));
        let ledger = Arc::new(Mutex::new(DedupLedger::open(
            ledger_path,
            DEFAULT_RETENTION,
            now_secs(),
        )));
        let feed = FeedClient::new(transport.clone(), FeedClientConfig::default());
        let poll = Arc::new(PollLoop::new(
            feed,
            store,
            ledger.clone(),
            sink,
            PollSettings::default(),
        ));
        Harness {
            dir,
            transport,
            ledger,
            poll,
        }
    }

    fn two_whales() -> ScriptedTransport {
        ScriptedTransport::new()
            .script(WHALE_A, vec![Scripted::Trades(vec![small_trade()])])
            .script(WHALE_B, vec![Scripted::Trades(vec![large_trade()])])
    }

    // === Cycle behaviour ===

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_two_whales() {
        let sink = Arc::new(RecordingSink::new());
        let h = harness_with(two_whales(), &[WHALE_A, WHALE_B], sink.clone(), None);

        let report = h.poll.run_cycle().await.unwrap();
        assert_eq!(report.fetched, 2);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.rejected, 1);
        assert_eq!(sink.count(), 1);
        assert!(sink.messages()[0].contains("$20.00"));
        {
            let ledger = h.ledger.lock().await;
            assert!(!ledger.is_new("a1"));
            assert!(!ledger.is_new("b1"));
        }

        let report = h.poll.run_cycle().await.unwrap();
        assert_eq!(report.duplicates, 2);
        assert_eq!(report.delivered, 0);
        assert_eq!(sink.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_keeps_healthy_address() {
        let transport = ScriptedTransport::new()
            .script(WHALE_A, vec![Scripted::Status(500)])
            .script(WHALE_B, vec![Scripted::Trades(vec![large_trade()])]);
        let sink = Arc::new(RecordingSink::new());
        let h = harness_with(transport, &[WHALE_A, WHALE_B], sink.clone(), None);

        let report = h.poll.run_cycle().await.unwrap();

        assert_eq!(h.transport.calls(WHALE_A), 3);
        assert_eq!(report.fetched, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(sink.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivery_failure_still_marks_seen() {
        let transport =
            ScriptedTransport::new().script(WHALE_B, vec![Scripted::Trades(vec![large_trade()])]);
        let sink = Arc::new(RecordingSink::failing());
        let h = harness_with(transport, &[WHALE_B], sink.clone(), None);

        let report = h.poll.run_cycle().await.unwrap();
        assert_eq!(report.delivery_failures, 1);
        assert!(!h.ledger.lock().await.is_new("b1"));

        h.poll.run_cycle().await.unwrap();
        assert_eq!(sink.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_addresses_skips_fetch() {
        let sink = Arc::new(RecordingSink::new());
        let h = harness_with(two_whales(), &[], sink.clone(), None);

        let report = h.poll.run_cycle().await.unwrap();
        assert_eq!(report, CycleReport::default());
        assert_eq!(h.transport.calls(WHALE_A), 0);
        assert_eq!(sink.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trades_without_id_are_skipped() {
        let transport = ScriptedTransport::new().script(
            WHALE_A,
            vec![Scripted::Trades(vec![json!({ "side": "SELL", "size": 500 })])],
        );
        let sink = Arc::new(RecordingSink::new());
        let h = harness_with(transport, &[WHALE_A], sink.clone(), None);

        let report = h.poll.run_cycle().await.unwrap();
        assert_eq!(report.missing_id, 1);
        assert_eq!(sink.count(), 0);
        assert!(h.ledger.lock().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fills_sharing_a_transaction_hash_are_distinct() {
        let transport = ScriptedTransport::new().script(
            WHALE_B,
            vec![Scripted::Trades(vec![
                json!({ "id": "f1", "transactionHash": "0xTX", "side": "BUY",
                        "size": 100, "price": 0.5, "asset": "yes", "timestamp": 2 }),
                json!({ "id": "f2", "transactionHash": "0xTX", "side": "BUY",
                        "size": 40, "price": 0.6, "asset": "no", "timestamp": 1 }),
            ])],
        );
        let sink = Arc::new(RecordingSink::new());
        let h = harness_with(transport, &[WHALE_B], sink.clone(), None);

        let report = h.poll.run_cycle().await.unwrap();

        assert_eq!(report.delivered, 2);
        assert_eq!(report.duplicates, 0);
        assert_eq!(sink.count(), 2);
        let ledger = h.ledger.lock().await;
        assert!(!ledger.is_new("f1"));
        assert!(!ledger.is_new("f2"));
        assert!(ledger.is_new("0xTX"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hash_without_id_is_not_used_for_dedup() {
        let transport = ScriptedTransport::new().script(
            WHALE_B,
            vec![Scripted::Trades(vec![
                json!({ "transactionHash": "0xTX", "side": "BUY", "size": 100, "price": 0.5 }),
                json!({ "transactionHash": "0xTX", "side": "BUY", "size": 40, "price": 0.6 }),
            ])],
        );
        let sink = Arc::new(RecordingSink::new());
        let h = harness_with(transport, &[WHALE_B], sink.clone(), None);

        let report = h.poll.run_cycle().await.unwrap();

        assert_eq!(report.missing_id, 2);
        assert_eq!(report.duplicates, 0);
        assert_eq!(sink.count(), 0);
        assert!(h.ledger.lock().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deliveries_are_paced() {
        let transport = ScriptedTransport::new().script(
            WHALE_B,
            vec![Scripted::Trades(vec![
                json!({ "id": "b1", "side": "SELL", "size": 20, "timestamp": 3 }),
                json!({ "id": "b2", "side": "SELL", "size": 30, "timestamp": 2 }),
                json!({ "id": "b3", "side": "SELL", "size": 40, "timestamp": 1 }),
            ])],
        );
        let sink = Arc::new(RecordingSink::new());
        let h = harness_with(transport, &[WHALE_B], sink.clone(), None);

        let start = tokio::time::Instant::now();
        let report = h.poll.run_cycle().await.unwrap();

        assert_eq!(report.delivered, 3);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
        assert!(sink.messages()[0].contains("$20.00"));
        assert!(sink.messages()[2].contains("$40.00"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ledger_persist_failure_fails_cycle() {
        let sink = Arc::new(RecordingSink::new());
        let dir = tempfile::tempdir().unwrap();
        let bad_path = dir.path().join("missing").join("trades.json");
        let h = harness_with(two_whales(), &[WHALE_A, WHALE_B], sink, Some(bad_path));

        let err = h.poll.run_cycle().await.unwrap_err();
        assert!(matches!(err, PollError::Ledger(_)));
        assert!(h.dir.path().exists());
    }

    // === Loop behaviour ===

    #[tokio::test(start_paused = true)]
    async fn test_run_repeats_until_stopped() {
        let sink = Arc::new(RecordingSink::new());
        let h = harness_with(two_whales(), &[WHALE_A, WHALE_B], sink.clone(), None);
        let (handle, signal) = stop_channel();

        let poll = h.poll.clone();
        let task = tokio::spawn(async move { poll.run(signal).await });

        tokio::time::sleep(Duration::from_secs(61)).await;
        handle.stop();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();

        let stats = h.poll.stats();
        assert_eq!(stats.cycles(), 2);
        assert_eq!(stats.failed_cycles(), 0);
        assert_eq!(stats.delivered(), 1);
        assert_eq!(stats.rejected(), 1);
        assert_eq!(sink.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_mid_cycle_finishes_deliveries() {
        let trades = (1..=5)
            .map(|n| {
                json!({ "id": format!("b{}", n), "side": "SELL", "size": 20, "timestamp": 10 - n })
            })
            .collect();
        let transport = ScriptedTransport::new().script(WHALE_B, vec![Scripted::Trades(trades)]);
        let sink = Arc::new(RecordingSink::new());
        let h = harness_with(transport, &[WHALE_B], sink.clone(), None);
        let (handle, signal) = stop_channel();

        let poll = h.poll.clone();
        let task = tokio::spawn(async move { poll.run(signal).await });

        // Pacing spreads the five deliveries over four seconds.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        handle.stop();
        task.await.unwrap();

        assert_eq!(h.poll.stats().cycles(), 1);
        assert_eq!(sink.count(), 5);
        let ledger = h.ledger.lock().await;
        assert_eq!(ledger.len(), 5);
        for n in 1..=5 {
            assert!(!ledger.is_new(&format!("b{}", n)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_before_start_runs_nothing() {
        let sink = Arc::new(RecordingSink::new());
        let h = harness_with(two_whales(), &[WHALE_A], sink, None);
        let (handle, signal) = stop_channel();
        handle.stop();

        h.poll.run(signal).await;
        assert_eq!(h.poll.stats().cycles(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_cycle_backs_off_then_continues() {
        let sink = Arc::new(RecordingSink::new());
        let dir = tempfile::tempdir().unwrap();
        let bad_path = dir.path().join("missing").join("trades.json");
        let h = harness_with(two_whales(), &[WHALE_A, WHALE_B], sink, Some(bad_path));
        let (handle, signal) = stop_channel();

        let poll = h.poll.clone();
        let task = tokio::spawn(async move { poll.run(signal).await });

        // Backoff (10s) plus interval (60s) before the second cycle.
        tokio::time::sleep(Duration::from_secs(65)).await;
        assert_eq!(h.poll.stats().cycles(), 1);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.poll.stats().cycles(), 2);
        assert_eq!(h.poll.stats().failed_cycles(), 2);

        handle.stop();
        task.await.unwrap();
    }

    struct PanickingSink;

    #[async_trait]
    impl NotificationSink for PanickingSink {
        async fn send(&self, _text: &str) -> Result<(), NotifyError> {
            panic!("sink exploded");
        }

        fn name(&self) -> &'static str {
            "panicking"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_cycle_is_contained() {
        let h = harness_with(two_whales(), &[WHALE_B], Arc::new(PanickingSink), None);
        let (handle, signal) = stop_channel();

        let poll = h.poll.clone();
        let task = tokio::spawn(async move { poll.run(signal).await });

        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.stop();
        task.await.unwrap();

        assert_eq!(h.poll.stats().cycles(), 1);
        assert_eq!(h.poll.stats().failed_cycles(), 1);
        assert!(h.ledger.lock().await.is_new("b1"));
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
    }
}

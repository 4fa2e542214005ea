//! Periodic liveness message.

use crate::poller::PollStats;
use crate::stop::StopSignal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use whale_watcher_alerts::{ConfigStore, NotificationSink, SharedLedger};

/// Sends a short status message every heartbeat interval.
pub struct Heartbeat {
    sink: Arc<dyn NotificationSink>,
    store: Arc<ConfigStore>,
    ledger: SharedLedger,
    stats: Arc<PollStats>,
    hostname: String,
}

impl Heartbeat {
    pub fn new(
        sink: Arc<dyn NotificationSink>,
        store: Arc<ConfigStore>,
        ledger: SharedLedger,
        stats: Arc<PollStats>,
    ) -> Self {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        Self {
            sink,
            store,
            ledger,
            stats,
            hostname,
        }
    }

    pub async fn message(&self) -> String {
        let whales = self.store.whale_addresses().await.len();
        let seen = self.ledger.lock().await.len();
        let now = chrono::Utc::now();
        format!(
            "💓 <b>{}</b> still watching\n\n\
             <b>Whales:</b> {}\n\
             <b>Trades seen:</b> {}\n\
             <b>Cycles:</b> {}\n\n\
             ⏰ {}",
            self.hostname,
            whales,
            seen,
            self.stats.cycles(),
            now.format("%Y-%m-%d %H:%M:%S UTC")
        )
    }

    /// Send heartbeats until `stop` fires. The interval is re-read before
    /// every wait so changes made through the command bot apply.
    pub async fn run(&self, mut stop: StopSignal) {
        info!(host = %self.hostname, "Heartbeat started");

        loop {
            let interval = Duration::from_secs(self.store.heartbeat_interval().await);
            if stop.sleep(interval).await {
                break;
            }

            let text = self.message().await;
            if let Err(e) = self.sink.send(&text).await {
                warn!(sink = self.sink.name(), error = %e, "Failed to send heartbeat");
            }
        }

        info!("Heartbeat stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stop::stop_channel;
    use tokio::sync::Mutex;
    use whale_watcher_alerts::notifier::testing::RecordingSink;
    use whale_watcher_alerts::{DedupLedger, WatchConfig, DEFAULT_RETENTION};

    fn heartbeat(dir: &tempfile::TempDir, sink: Arc<RecordingSink>) -> Heartbeat {
        let store = Arc::new(ConfigStore::open(
            dir.path().join("config_state.json"),
            WatchConfig {
                heartbeat_interval: 60,
                ..Default::default()
            },
        ));
        let ledger = Arc::new(Mutex::new(DedupLedger::open(
            dir.path().join("trades.json"),
            DEFAULT_RETENTION,
            0.0,
        )));
        Heartbeat::new(sink, store, ledger, Arc::new(PollStats::default()))
    }

    #[tokio::test]
    async fn test_message_contents() {
        let dir = tempfile::tempdir().unwrap();
        let hb = heartbeat(&dir, Arc::new(RecordingSink::new()));
        hb.store.add_whale_address("0xabc").await;
        hb.store.add_whale_address("0xdef").await;

        let msg = hb.message().await;
        assert!(msg.contains("still watching"));
        assert!(msg.contains("<b>Whales:</b> 2"));
        assert!(msg.contains("<b>Trades seen:</b> 0"));
        assert!(msg.contains("<b>Cycles:</b> 0"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sends_every_interval_until_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::new());
        let hb = Arc::new(heartbeat(&dir, sink.clone()));
        let (handle, signal) = stop_channel();

        let task = {
            let hb = hb.clone();
            tokio::spawn(async move { hb.run(signal).await })
        };

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(sink.count(), 0);
        tokio::time::sleep(Duration::from_secs(62)).await;
        assert_eq!(sink.count(), 2);

        handle.stop();
        task.await.unwrap();
        assert_eq!(sink.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failures_do_not_stop_heartbeat() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::failing());
        let hb = Arc::new(heartbeat(&dir, sink.clone()));
        let (handle, signal) = stop_channel();

        let task = {
            let hb = hb.clone();
            tokio::spawn(async move { hb.run(signal).await })
        };

        tokio::time::sleep(Duration::from_secs(125)).await;
        handle.stop();
        task.await.unwrap();
        assert_eq!(sink.count(), 2);
    }
}

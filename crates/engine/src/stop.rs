//! Cooperative stop signal shared by the long-running tasks.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Requests a stop. Cloning shares the same signal.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

/// Observes the stop request.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx: Arc::new(tx) }, StopSignal { rx })
}

impl StopHandle {
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }
}

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once a stop is requested or every handle has been dropped.
    pub async fn stopped(&mut self) {
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }

    /// Sleep for `duration`, returning true if a stop arrived first.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.stopped() => true,
            _ = tokio::time::sleep(duration) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes_without_stop() {
        let (_handle, mut signal) = stop_channel();
        assert!(!signal.sleep(Duration::from_secs(5)).await);
        assert!(!signal.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_sleep() {
        let (handle, mut signal) = stop_channel();
        let waiter = tokio::spawn(async move { signal.sleep(Duration::from_secs(3600)).await });

        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.stop();

        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_stop_is_visible_to_clones() {
        let (handle, signal) = stop_channel();
        let other = signal.clone();
        handle.clone().stop();
        assert!(signal.is_stopped());
        assert!(other.is_stopped());
    }

    #[tokio::test]
    async fn test_dropped_handle_counts_as_stop() {
        let (handle, mut signal) = stop_channel();
        drop(handle);
        signal.stopped().await;
        assert!(!signal.is_stopped());
    }
}

//! Trade feed client with bounded retries and concurrent per-address fan-out.

use crate::error::FeedError;
use crate::rest::{HttpTransport, TradeTransport};
use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};
use whale_watcher_core::{sort_newest_first, Trade};

/// Configuration for the feed client.
#[derive(Debug, Clone)]
pub struct FeedClientConfig {
    /// Base URL of the data API.
    pub base_url: String,
    /// Attempts per address before giving up for this cycle.
    pub max_attempts: u32,
    /// Delay between attempts.
    pub retry_delay: Duration,
    /// Timeout applied to every request.
    pub request_timeout: Duration,
    /// Trades requested per address.
    pub trades_per_address: u32,
    /// Maximum number of addresses fetched at once.
    pub max_concurrency: usize,
}

impl Default for FeedClientConfig {
    fn default() -> Self {
        Self {
            base_url: HttpTransport::BASE_URL.to_string(),
            max_attempts: 3,
            retry_delay: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            trades_per_address: 50,
            max_concurrency: 20,
        }
    }
}

/// Result of polling a single address, after retries.
#[derive(Debug)]
pub struct AddressFetch {
    pub address: String,
    pub result: Result<Vec<Trade>, FeedError>,
}

/// Client that polls the trade feed for tracked addresses.
pub struct FeedClient {
    transport: Arc<dyn TradeTransport>,
    config: FeedClientConfig,
}

impl FeedClient {
    pub fn new(transport: Arc<dyn TradeTransport>, config: FeedClientConfig) -> Self {
        Self { transport, config }
    }

    /// Create a client backed by the HTTP transport.
    pub fn http(config: FeedClientConfig) -> Result<Self, FeedError> {
        let transport = HttpTransport::new(&config.base_url, config.request_timeout)?;
        Ok(Self::new(Arc::new(transport), config))
    }

    /// Fetch recent trades for one address.
    ///
    /// Failures are retried up to the configured bound; when retries are
    /// exhausted the failure is logged and an empty list is returned.
    pub async fn fetch(&self, address: &str, limit: u32) -> Vec<Trade> {
        match self.fetch_with_retry(address, limit).await {
            Ok(trades) => trades,
            Err(e) => {
                error!(
                    address = address,
                    endpoint = self.transport.endpoint(),
                    error = %e,
                    "Giving up on address after retries"
                );
                Vec::new()
            }
        }
    }

    async fn fetch_with_retry(&self, address: &str, limit: u32) -> Result<Vec<Trade>, FeedError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let outcome = tokio::time::timeout(
                self.config.request_timeout,
                self.transport.fetch_trades(address, limit),
            )
            .await
            .unwrap_or_else(|_| {
                Err(FeedError::Timeout(format!(
                    "no response within {:?}",
                    self.config.request_timeout
                )))
            });

            let err = match outcome {
                Ok(mut trades) => {
                    for trade in &mut trades {
                        trade.stamp_maker(address);
                    }
                    debug!(address = address, count = trades.len(), "Fetched trades");
                    return Ok(trades);
                }
                Err(e) => e,
            };

            if err.is_transient() {
                warn!(
                    address = address,
                    endpoint = self.transport.endpoint(),
                    attempt = attempt,
                    max_attempts = max_attempts,
                    error = %err,
                    "Trade fetch failed"
                );
            } else {
                error!(
                    address = address,
                    endpoint = self.transport.endpoint(),
                    attempt = attempt,
                    max_attempts = max_attempts,
                    error = %err,
                    "Trade fetch failed"
                );
            }

            if attempt >= max_attempts {
                return Err(err);
            }
            tokio::time::sleep(self.config.retry_delay).await;
            attempt += 1;
        }
    }

    /// Fetch every address concurrently, capturing each outcome separately.
    ///
    /// Results are returned in the order of `addresses`.
    pub async fn fetch_each(&self, addresses: &[String]) -> Vec<AddressFetch> {
        let limit = self.config.trades_per_address;
        stream::iter(addresses.iter().cloned())
            .map(|address| async move {
                let result = self.fetch_with_retry(&address, limit).await;
                AddressFetch { address, result }
            })
            .buffered(self.config.max_concurrency.max(1))
            .collect::<Vec<_>>()
            .await
    }

    /// Fetch every address concurrently and merge the trades, newest first.
    ///
    /// An address whose retries are exhausted contributes nothing; the
    /// others are unaffected.
    pub async fn fetch_all(&self, addresses: &[String]) -> Vec<Trade> {
        let mut all_trades = Vec::new();
        let mut failed = 0usize;

        for fetch in self.fetch_each(addresses).await {
            match fetch.result {
                Ok(trades) => all_trades.extend(trades),
                Err(e) => {
                    failed += 1;
                    error!(
                        address = fetch.address,
                        endpoint = self.transport.endpoint(),
                        error = %e,
                        "Giving up on address after retries"
                    );
                }
            }
        }

        if failed > 0 {
            warn!(
                failed = failed,
                total = addresses.len(),
                "Some addresses could not be fetched this cycle"
            );
        }

        sort_newest_first(&mut all_trades);
        all_trades
    }
}

/// In-memory transport for tests in this and downstream crates.
#[cfg(any(test, feature = "testkit"))]
pub mod testing {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Scripted response for one attempt.
    #[derive(Debug, Clone)]
    pub enum Scripted {
        Trades(Vec<Value>),
        Status(u16),
        Hang,
    }

    /// Transport that replays scripted responses per address.
    ///
    /// The n-th call for an address uses the n-th script entry; the last
    /// entry repeats once the script is exhausted.
    #[derive(Default)]
    pub struct ScriptedTransport {
        scripts: Mutex<HashMap<String, Vec<Scripted>>>,
        calls: Mutex<HashMap<String, usize>>,
        delay: Option<Duration>,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Delay every response (used to observe concurrency).
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn script(self, address: &str, responses: Vec<Scripted>) -> Self {
            if let Ok(mut scripts) = self.scripts.lock() {
                scripts.insert(address.to_string(), responses);
            }
            self
        }

        pub fn calls(&self, address: &str) -> usize {
            self.calls
                .lock()
                .map(|calls| calls.get(address).copied().unwrap_or(0))
                .unwrap_or(0)
        }
    }

    #[async_trait]
    impl TradeTransport for ScriptedTransport {
        async fn fetch_trades(&self, address: &str, _limit: u32) -> Result<Vec<Trade>, FeedError> {
            let call = {
                let mut calls = self
                    .calls
                    .lock()
                    .map_err(|e| FeedError::ConnectionFailed(e.to_string()))?;
                let count = calls.entry(address.to_string()).or_insert(0);
                *count += 1;
                *count - 1
            };

            let response = {
                let scripts = self
                    .scripts
                    .lock()
                    .map_err(|e| FeedError::ConnectionFailed(e.to_string()))?;
                scripts
                    .get(address)
                    .and_then(|script| script.get(call).or_else(|| script.last()).cloned())
                    .unwrap_or(Scripted::Trades(Vec::new()))
            };

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            match response {
                Scripted::Trades(items) => crate::rest::parse_trades(&Value::Array(items)),
                Scripted::Status(429) => Err(FeedError::RateLimitExceeded),
                Scripted::Status(status) => Err(FeedError::HttpStatus(status)),
                Scripted::Hang => {
                    std::future::pending::<()>().await;
                    Ok(Vec::new())
                }
            }
        }

        fn endpoint(&self) -> &str {
            "scripted://trades"
        }
    }
}

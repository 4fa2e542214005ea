//! REST transport for the public trade feed.

use crate::error::FeedError;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use whale_watcher_core::Trade;

/// Source of trades for a single address.
///
/// One call is one attempt; retries and fan-out live in [`crate::FeedClient`].
#[async_trait]
pub trait TradeTransport: Send + Sync {
    /// Fetch up to `limit` recent trades made by `address`.
    async fn fetch_trades(&self, address: &str, limit: u32) -> Result<Vec<Trade>, FeedError>;

    /// Human-readable endpoint used in log context.
    fn endpoint(&self) -> &str;
}

/// HTTP transport against the data API `/trades` endpoint.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    pub const BASE_URL: &'static str = "https://data-api.polymarket.com";
    pub const TRADES_ENDPOINT: &'static str = "/trades";

    /// Create a transport with a per-request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: format!(
                "{}{}",
                base_url.trim_end_matches('/'),
                Self::TRADES_ENDPOINT
            ),
        })
    }
}

#[async_trait]
impl TradeTransport for HttpTransport {
    async fn fetch_trades(&self, address: &str, limit: u32) -> Result<Vec<Trade>, FeedError> {
        let mut query = vec![("limit", limit.to_string()), ("offset", "0".to_string())];
        if !address.is_empty() {
            query.push(("user", address.to_lowercase()));
        }

        let response = self.client.get(&self.url).query(&query).send().await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(FeedError::RateLimitExceeded);
        }
        if status != reqwest::StatusCode::OK {
            return Err(FeedError::HttpStatus(status.as_u16()));
        }

        let body: Value = response.json().await?;
        parse_trades(&body)
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

/// Decode a `/trades` response body.
///
/// The body must be a JSON array; entries that are not objects are skipped.
pub fn parse_trades(body: &Value) -> Result<Vec<Trade>, FeedError> {
    let items = body
        .as_array()
        .ok_or_else(|| FeedError::ParseError("expected a JSON array of trades".to_string()))?;

    let trades: Vec<Trade> = items.iter().filter_map(Trade::from_json).collect();
    if trades.len() < items.len() {
        debug!(
            skipped = items.len() - trades.len(),
            "Skipped non-object trade entries"
        );
    }
    Ok(trades)
}

//! Trade records decoded from the public trade feed.
//!
//! The feed returns loosely shaped JSON objects whose field names vary between
//! endpoints and API revisions. Decoding resolves each logical field through a
//! fixed fallback chain so the rest of the pipeline works with a typed record.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Trade direction as reported by the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    /// Parse a side string case-insensitively.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "BUY" => Some(TradeSide::Buy),
            "SELL" => Some(TradeSide::Sell),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }
}

/// A single trade observed on the feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trade {
    /// Deduplication key (`id` only; fills in one transaction share a hash).
    pub id: Option<String>,
    /// Identifier shown to users (`transactionHash`, `id`, `name`, `uuid`).
    pub reference: Option<String>,
    pub side: Option<TradeSide>,
    pub price: f64,
    pub size: f64,
    pub market_id: Option<String>,
    pub asset_id: Option<String>,
    /// Market title or question text.
    pub title: Option<String>,
    pub outcome: Option<String>,
    pub maker_address: Option<String>,
    pub event_slug: Option<String>,
    /// Epoch seconds.
    pub timestamp: Option<i64>,
}

impl Trade {
    /// Decode a trade from a feed payload object.
    ///
    /// Returns `None` only when the payload is not a JSON object.
    pub fn from_json(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;

        let title = first_string(obj, &["title"]).or_else(|| match obj.get("market") {
            Some(Value::Object(market)) => first_string(market, &["question"]),
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
            _ => None,
        });

        Some(Self {
            id: first_string(obj, &["id"]),
            reference: first_string(obj, &["transactionHash", "id", "name", "uuid"]),
            side: obj
                .get("side")
                .and_then(Value::as_str)
                .and_then(TradeSide::parse),
            price: number_field(obj, "price"),
            size: number_field(obj, "size"),
            market_id: first_string(obj, &["market_id", "conditionId"]),
            asset_id: first_string(obj, &["asset_id", "asset"]),
            title,
            outcome: first_string(obj, &["outcome"]),
            maker_address: first_string(obj, &["maker_address", "user", "proxyWallet"]),
            event_slug: first_string(obj, &["eventSlug", "slug"]),
            timestamp: ["timestamp", "created_at"]
                .iter()
                .find_map(|key| obj.get(*key).and_then(parse_timestamp)),
        })
    }

    /// Quote-currency value of the trade.
    ///
    /// Sell sizes are already denominated in the quote currency on this feed,
    /// so only buys are multiplied by price.
    pub fn value(&self) -> f64 {
        match self.side {
            Some(TradeSide::Sell) => self.size,
            _ => self.size * self.price,
        }
    }

    /// Timestamp used for ordering; a missing timestamp sorts as epoch 0.
    pub fn sort_key(&self) -> i64 {
        self.timestamp.unwrap_or(0)
    }

    pub fn time(&self) -> Option<DateTime<Utc>> {
        self.timestamp
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
    }

    pub fn display_id(&self) -> &str {
        self.reference.as_deref().unwrap_or("unknown")
    }

    /// Lower-cased `title asset_id market_id` blob matched by text filters.
    pub fn market_text(&self) -> String {
        [&self.title, &self.asset_id, &self.market_id]
            .iter()
            .map(|field| field.as_deref().unwrap_or(""))
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }

    /// Record the polled address as maker when the payload carried none.
    pub fn stamp_maker(&mut self, address: &str) {
        if self.maker_address.is_none() {
            self.maker_address = Some(address.to_lowercase());
        }
    }
}

/// Sort trades newest first. The sort is stable, so equal timestamps keep
/// their arrival order.
pub fn sort_newest_first(trades: &mut [Trade]) {
    trades.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));
}

fn first_string(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match obj.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn number_field(obj: &Map<String, Value>, key: &str) -> f64 {
    match obj.get(key) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn parse_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
                .or_else(|| {
                    DateTime::parse_from_rfc3339(s)
                        .ok()
                        .map(|dt| dt.timestamp())
                })
        }
        _ => None,
    }
}

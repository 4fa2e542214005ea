//! Notification filter rules.

use crate::Trade;
use serde::{Deserialize, Serialize};

/// User-editable filter rules and the set of tracked addresses.
///
/// Lists are kept normalized: whale addresses, text filters and excluded
/// market ids are trimmed and lower-cased; allowed market ids are trimmed but
/// keep their case. Empty entries and duplicates are never stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Minimum trade value to notify on.
    pub min_trade_value: f64,
    /// Whale addresses to poll.
    pub whale_addresses: Vec<String>,
    /// Allowed market ids (empty = all).
    pub market_ids: Vec<String>,
    /// Substrings of which at least one must appear in the market text (empty = all).
    pub market_text_filters: Vec<String>,
    /// Market ids that never notify.
    pub exclude_market_ids: Vec<String>,
    /// Substrings that suppress a notification when present in the market text.
    pub exclude_market_text_filters: Vec<String>,
}

/// Reason a trade was filtered out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    BelowMinValue,
    MarketNotAllowed,
    MarketExcluded,
    TextNotMatched,
    TextExcluded,
}

impl Rejection {
    pub fn as_str(self) -> &'static str {
        match self {
            Rejection::BelowMinValue => "below minimum value",
            Rejection::MarketNotAllowed => "market not in allow-list",
            Rejection::MarketExcluded => "market excluded",
            Rejection::TextNotMatched => "no text filter matched",
            Rejection::TextExcluded => "excluded text matched",
        }
    }
}

impl FilterConfig {
    /// Evaluate the rules in order, returning the first failing one.
    pub fn check(&self, trade: &Trade) -> Result<(), Rejection> {
        if trade.value() < self.min_trade_value {
            return Err(Rejection::BelowMinValue);
        }

        let market_id = trade.market_id.as_deref().unwrap_or("");

        if !self.market_ids.is_empty() && !self.market_ids.iter().any(|m| m == market_id) {
            return Err(Rejection::MarketNotAllowed);
        }

        if !self.exclude_market_ids.is_empty() {
            let lowered = market_id.to_lowercase();
            if self.exclude_market_ids.iter().any(|m| *m == lowered) {
                return Err(Rejection::MarketExcluded);
            }
        }

        if self.market_text_filters.is_empty() && self.exclude_market_text_filters.is_empty() {
            return Ok(());
        }

        let text = trade.market_text();

        if !self.market_text_filters.is_empty()
            && !self.market_text_filters.iter().any(|f| text.contains(f.as_str()))
        {
            return Err(Rejection::TextNotMatched);
        }

        if self
            .exclude_market_text_filters
            .iter()
            .any(|f| text.contains(f.as_str()))
        {
            return Err(Rejection::TextExcluded);
        }

        Ok(())
    }

    /// Normalize every list and clamp the minimum value.
    pub fn normalized(self) -> Self {
        Self {
            min_trade_value: clamp_min_value(self.min_trade_value),
            whale_addresses: normalize_all(self.whale_addresses, normalize_lower),
            market_ids: normalize_all(self.market_ids, normalize_trimmed),
            market_text_filters: normalize_all(self.market_text_filters, normalize_lower),
            exclude_market_ids: normalize_all(self.exclude_market_ids, normalize_lower),
            exclude_market_text_filters: normalize_all(
                self.exclude_market_text_filters,
                normalize_lower,
            ),
        }
    }

    pub fn set_min_trade_value(&mut self, value: f64) {
        self.min_trade_value = clamp_min_value(value);
    }

    pub fn add_whale_address(&mut self, address: &str) -> bool {
        add_unique(&mut self.whale_addresses, normalize_lower(address))
    }

    pub fn remove_whale_address(&mut self, address: &str) -> bool {
        remove_value(&mut self.whale_addresses, &normalize_lower(address))
    }

    pub fn add_market_id(&mut self, market_id: &str) -> bool {
        add_unique(&mut self.market_ids, normalize_trimmed(market_id))
    }

    pub fn remove_market_id(&mut self, market_id: &str) -> bool {
        remove_value(&mut self.market_ids, &normalize_trimmed(market_id))
    }

    pub fn add_text_filter(&mut self, text: &str) -> bool {
        add_unique(&mut self.market_text_filters, normalize_lower(text))
    }

    pub fn remove_text_filter(&mut self, text: &str) -> bool {
        remove_value(&mut self.market_text_filters, &normalize_lower(text))
    }

    pub fn add_exclude_market_id(&mut self, market_id: &str) -> bool {
        add_unique(&mut self.exclude_market_ids, normalize_lower(market_id))
    }

    pub fn remove_exclude_market_id(&mut self, market_id: &str) -> bool {
        remove_value(&mut self.exclude_market_ids, &normalize_lower(market_id))
    }

    pub fn add_exclude_text_filter(&mut self, text: &str) -> bool {
        add_unique(&mut self.exclude_market_text_filters, normalize_lower(text))
    }

    pub fn remove_exclude_text_filter(&mut self, text: &str) -> bool {
        remove_value(&mut self.exclude_market_text_filters, &normalize_lower(text))
    }
}

/// Returns true when the trade passes every configured rule.
pub fn should_notify(trade: &Trade, config: &FilterConfig) -> bool {
    config.check(trade).is_ok()
}

fn clamp_min_value(value: f64) -> f64 {
    if value.is_finite() {
        value.max(0.0)
    } else {
        0.0
    }
}

fn normalize_lower(value: &str) -> String {
    value.trim().to_lowercase()
}

fn normalize_trimmed(value: &str) -> String {
    value.trim().to_string()
}

fn normalize_all(values: Vec<String>, normalize: fn(&str) -> String) -> Vec<String> {
    let mut out = Vec::with_capacity(values.len());
    for value in values {
        add_unique(&mut out, normalize(&value));
    }
    out
}

fn add_unique(list: &mut Vec<String>, value: String) -> bool {
    if value.is_empty() || list.contains(&value) {
        return false;
    }
    list.push(value);
    true
}

fn remove_value(list: &mut Vec<String>, value: &str) -> bool {
    match list.iter().position(|v| v == value) {
        Some(idx) => {
            list.remove(idx);
            true
        }
        None => false,
    }
}

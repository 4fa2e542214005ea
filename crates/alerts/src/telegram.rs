//! Telegram command bot and alert formatting.

use crate::config::{ConfigStore, MIN_HEARTBEAT_INTERVAL_SECS, MIN_POLL_INTERVAL_SECS};
use crate::ledger::SharedLedger;
use std::future::Future;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use teloxide::utils::html::escape;
use thiserror::Error;
use tracing::{debug, info, warn};
use whale_watcher_core::{FilterConfig, Trade, TradeSide};

#[derive(Error, Debug)]
pub enum TelegramError {
    #[error("Telegram API error: {0}")]
    Api(#[from] teloxide::RequestError),
}

/// Bot commands.
#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "Show a welcome message and the current status")]
    Start,
    #[command(description = "Show help")]
    Help,
    #[command(description = "Show current configuration")]
    Status,
    #[command(description = "Track a whale address. Usage: /addwhale 0x...")]
    AddWhale(String),
    #[command(description = "Stop tracking a whale address. Usage: /removewhale 0x...")]
    RemoveWhale(String),
    #[command(description = "List tracked whale addresses")]
    ListWhales,
    #[command(description = "Only alert on a market id. Usage: /addmarket <id>")]
    AddMarket(String),
    #[command(description = "Remove a market id from the allow-list")]
    RemoveMarket(String),
    #[command(description = "List allowed market ids")]
    ListMarkets,
    #[command(description = "Only alert when market text contains a phrase. Usage: /addtext bitcoin")]
    AddText(String),
    #[command(description = "Remove a market text filter")]
    RemoveText(String),
    #[command(description = "List market text filters")]
    ListTexts,
    #[command(description = "Never alert on a market id. Usage: /addexclude <id>")]
    AddExclude(String),
    #[command(description = "Remove a market id from the exclusion list")]
    RemoveExclude(String),
    #[command(description = "List excluded market ids")]
    ListExcludes,
    #[command(description = "Never alert when market text contains a phrase")]
    AddExcludeText(String),
    #[command(description = "Remove an excluded text phrase")]
    RemoveExcludeText(String),
    #[command(description = "List excluded text phrases")]
    ListExcludeTexts,
    #[command(description = "Set the minimum trade value. Usage: /setminvalue 1000")]
    SetMinValue(String),
    #[command(description = "Set the poll interval in seconds. Usage: /setinterval 60")]
    SetInterval(String),
    #[command(description = "Set the heartbeat interval in seconds. Usage: /setheartbeat 600")]
    SetHeartbeat(String),
}

/// One of the editable lists in the filter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterList {
    Whales,
    Markets,
    Texts,
    ExcludedMarkets,
    ExcludedTexts,
}

impl FilterList {
    fn singular(self) -> &'static str {
        match self {
            FilterList::Whales => "whale address",
            FilterList::Markets => "market id",
            FilterList::Texts => "text filter",
            FilterList::ExcludedMarkets => "excluded market id",
            FilterList::ExcludedTexts => "excluded text filter",
        }
    }

    fn plural(self) -> &'static str {
        match self {
            FilterList::Whales => "whale addresses",
            FilterList::Markets => "market ids",
            FilterList::Texts => "text filters",
            FilterList::ExcludedMarkets => "excluded market ids",
            FilterList::ExcludedTexts => "excluded text filters",
        }
    }

    fn argument(self) -> &'static str {
        match self {
            FilterList::Whales => "address",
            FilterList::Markets | FilterList::ExcludedMarkets => "market_id",
            FilterList::Texts | FilterList::ExcludedTexts => "text",
        }
    }

    fn command(self) -> &'static str {
        match self {
            FilterList::Whales => "whale",
            FilterList::Markets => "market",
            FilterList::Texts => "text",
            FilterList::ExcludedMarkets => "exclude",
            FilterList::ExcludedTexts => "excludetext",
        }
    }

    fn items(self, filters: &FilterConfig) -> &[String] {
        match self {
            FilterList::Whales => &filters.whale_addresses,
            FilterList::Markets => &filters.market_ids,
            FilterList::Texts => &filters.market_text_filters,
            FilterList::ExcludedMarkets => &filters.exclude_market_ids,
            FilterList::ExcludedTexts => &filters.exclude_market_text_filters,
        }
    }

    async fn add(self, store: &ConfigStore, value: &str) -> bool {
        match self {
            FilterList::Whales => store.add_whale_address(value).await,
            FilterList::Markets => store.add_market_id(value).await,
            FilterList::Texts => store.add_text_filter(value).await,
            FilterList::ExcludedMarkets => store.add_exclude_market_id(value).await,
            FilterList::ExcludedTexts => store.add_exclude_text_filter(value).await,
        }
    }

    async fn remove(self, store: &ConfigStore, value: &str) -> bool {
        match self {
            FilterList::Whales => store.remove_whale_address(value).await,
            FilterList::Markets => store.remove_market_id(value).await,
            FilterList::Texts => store.remove_text_filter(value).await,
            FilterList::ExcludedMarkets => store.remove_exclude_market_id(value).await,
            FilterList::ExcludedTexts => store.remove_exclude_text_filter(value).await,
        }
    }
}

/// Evaluate a command against the shared state and return the reply text.
pub async fn execute(cmd: Command, store: &ConfigStore, ledger: &SharedLedger) -> String {
    match cmd {
        Command::Start => format!(
            "Whale watcher is running.\n\n{}\n\nUse /help to see available commands.",
            status_text(store, ledger).await
        ),
        Command::Help => Command::descriptions().to_string(),
        Command::Status => status_text(store, ledger).await,

        Command::AddWhale(v) => add_entry(store, FilterList::Whales, &v).await,
        Command::RemoveWhale(v) => remove_entry(store, FilterList::Whales, &v).await,
        Command::ListWhales => list_entries(store, FilterList::Whales).await,
        Command::AddMarket(v) => add_entry(store, FilterList::Markets, &v).await,
        Command::RemoveMarket(v) => remove_entry(store, FilterList::Markets, &v).await,
        Command::ListMarkets => list_entries(store, FilterList::Markets).await,
        Command::AddText(v) => add_entry(store, FilterList::Texts, &v).await,
        Command::RemoveText(v) => remove_entry(store, FilterList::Texts, &v).await,
        Command::ListTexts => list_entries(store, FilterList::Texts).await,
        Command::AddExclude(v) => add_entry(store, FilterList::ExcludedMarkets, &v).await,
        Command::RemoveExclude(v) => remove_entry(store, FilterList::ExcludedMarkets, &v).await,
        Command::ListExcludes => list_entries(store, FilterList::ExcludedMarkets).await,
        Command::AddExcludeText(v) => add_entry(store, FilterList::ExcludedTexts, &v).await,
        Command::RemoveExcludeText(v) => {
            remove_entry(store, FilterList::ExcludedTexts, &v).await
        }
        Command::ListExcludeTexts => list_entries(store, FilterList::ExcludedTexts).await,

        Command::SetMinValue(v) => {
            let v = v.trim();
            if v.is_empty() {
                return "Usage: /setminvalue <amount>\nExample: /setminvalue 1000".to_string();
            }
            match v.parse::<f64>() {
                Ok(value) if value.is_finite() => {
                    let stored = store.set_min_trade_value(value).await;
                    format!("Minimum trade value set to ${:.2}", stored)
                }
                _ => format!("Invalid value: {}", v),
            }
        }
        Command::SetInterval(v) => {
            let v = v.trim();
            if v.is_empty() {
                return "Usage: /setinterval <seconds>\nExample: /setinterval 60".to_string();
            }
            match v.parse::<i64>() {
                Ok(secs) => {
                    let stored = store.set_poll_interval(secs).await;
                    format!(
                        "Poll interval set to {}s (minimum {}s)",
                        stored, MIN_POLL_INTERVAL_SECS
                    )
                }
                Err(_) => format!("Invalid value: {}", v),
            }
        }
        Command::SetHeartbeat(v) => {
            let v = v.trim();
            if v.is_empty() {
                return "Usage: /setheartbeat <seconds>\nExample: /setheartbeat 600".to_string();
            }
            match v.parse::<i64>() {
                Ok(secs) => {
                    let stored = store.set_heartbeat_interval(secs).await;
                    format!(
                        "Heartbeat interval set to {}s (minimum {}s)",
                        stored, MIN_HEARTBEAT_INTERVAL_SECS
                    )
                }
                Err(_) => format!("Invalid value: {}", v),
            }
        }
    }
}

async fn add_entry(store: &ConfigStore, list: FilterList, value: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        return format!("Usage: /add{} <{}>", list.command(), list.argument());
    }
    if list.add(store, value).await {
        format!("Added {}: {}", list.singular(), value)
    } else {
        format!("Already present {}: {}", list.singular(), value)
    }
}

async fn remove_entry(store: &ConfigStore, list: FilterList, value: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        return format!("Usage: /remove{} <{}>", list.command(), list.argument());
    }
    if list.remove(store, value).await {
        format!("Removed {}: {}", list.singular(), value)
    } else {
        format!("No such {}: {}", list.singular(), value)
    }
}

async fn list_entries(store: &ConfigStore, list: FilterList) -> String {
    let filters = store.filters().await;
    let items = list.items(&filters);
    if items.is_empty() {
        return format!("No {} configured.", list.plural());
    }
    let mut text = format!("{} ({}):", capitalize(list.plural()), items.len());
    for item in items {
        text.push_str("\n- ");
        text.push_str(item);
    }
    text
}

async fn status_text(store: &ConfigStore, ledger: &SharedLedger) -> String {
    let config = store.snapshot().await;
    let seen = ledger.lock().await.len();
    let f = &config.filters;
    format!(
        "Current Configuration\n\n\
         Poll interval: {}s\n\
         Heartbeat interval: {}s\n\
         Min trade value: ${:.2}\n\
         Whales: {}\n\
         Markets: {}\n\
         Text filters: {}\n\
         Excluded markets: {}\n\
         Excluded texts: {}\n\
         Trades seen: {}",
        config.poll_interval,
        config.heartbeat_interval,
        f.min_trade_value,
        f.whale_addresses.len(),
        count_or_all(&f.market_ids),
        count_or_all(&f.market_text_filters),
        f.exclude_market_ids.len(),
        f.exclude_market_text_filters.len(),
        seen,
    )
}

fn count_or_all(items: &[String]) -> String {
    if items.is_empty() {
        "All".to_string()
    } else {
        items.len().to_string()
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Telegram bot wrapper.
pub struct TelegramBot {
    bot: Bot,
    allowed_chat: ChatId,
    store: Arc<ConfigStore>,
    ledger: SharedLedger,
}

impl TelegramBot {
    pub fn new(
        bot: Bot,
        allowed_chat: ChatId,
        store: Arc<ConfigStore>,
        ledger: SharedLedger,
    ) -> Self {
        Self {
            bot,
            allowed_chat,
            store,
            ledger,
        }
    }

    /// Run the command dispatcher until `stop` resolves.
    pub async fn run<F>(self: Arc<Self>, stop: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let bot = self.bot.clone();
        let handler = Update::filter_message().filter_command::<Command>().endpoint(
            move |bot: Bot, msg: Message, cmd: Command| {
                let this = Arc::clone(&self);
                async move { this.handle_command(bot, msg, cmd).await }
            },
        );

        let mut dispatcher = Dispatcher::builder(bot, handler).build();
        let token = dispatcher.shutdown_token();
        tokio::spawn(async move {
            stop.await;
            match token.shutdown() {
                Ok(done) => {
                    done.await;
                    info!("Telegram dispatcher stopped");
                }
                Err(e) => debug!(error = %e, "Telegram dispatcher was not running"),
            }
        });

        info!("Telegram command handler started");
        dispatcher.dispatch().await;
    }

    async fn handle_command(
        &self,
        bot: Bot,
        msg: Message,
        cmd: Command,
    ) -> Result<(), TelegramError> {
        if msg.chat.id != self.allowed_chat {
            warn!(chat_id = msg.chat.id.0, "Rejected command from unauthorized chat");
            bot.send_message(msg.chat.id, "Unauthorized access.").await?;
            return Ok(());
        }

        debug!(command = ?cmd, "Handling command");
        let reply = execute(cmd, &self.store, &self.ledger).await;
        bot.send_message(msg.chat.id, reply).await?;
        Ok(())
    }
}

/// Render a trade as an HTML alert message.
pub fn format_trade_alert(trade: &Trade) -> String {
    let trader = trade.maker_address.as_deref().unwrap_or("unknown");
    let title = trade.title.as_deref().unwrap_or("Unknown Market");
    let outcome = trade.outcome.as_deref().unwrap_or("N/A");
    let side = match trade.side {
        Some(TradeSide::Buy) => "🟢 BUY",
        Some(TradeSide::Sell) => "🔴 SELL",
        None => "⚪ UNKNOWN",
    };
    let time = trade
        .time()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let mut msg = format!(
        "🐋 <b>Whale Trade Alert</b>\n\n\
         <b>Trader:</b> <code>{}</code>\n\
         <b>Market:</b> {}\n\
         <b>Outcome:</b> {}\n\
         <b>Side:</b> {}\n\
         <b>Size:</b> {:.2}\n\
         <b>Price:</b> {:.4}\n\
         <b>Value:</b> ${:.2}\n\
         <b>Time:</b> {}\n\
         <b>Trade:</b> <code>{}</code>",
        escape(&abbreviate(trader, 10)),
        escape(title),
        escape(outcome),
        side,
        trade.size,
        trade.price,
        trade.value(),
        time,
        escape(&truncate(trade.display_id(), 10)),
    );

    if let Some(slug) = trade.event_slug.as_deref() {
        msg.push_str(&format!(
            "\n\n🔗 <a href=\"https://polymarket.com/event/{}\">View on Polymarket</a>",
            escape(slug)
        ));
    }

    msg
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// Like `truncate`, with a trailing `...` when characters were dropped.
fn abbreviate(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        format!("{}...", truncate(s, max_chars))
    } else {
        s.to_string()
    }
}

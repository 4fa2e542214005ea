//! Notification delivery targets.

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Telegram API error: {0}")]
    Telegram(#[from] teloxide::RequestError),
    #[error("Sink unavailable: {0}")]
    Unavailable(String),
}

/// Destination for formatted alert messages.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver one message. Callers log failures and do not retry.
    async fn send(&self, text: &str) -> Result<(), NotifyError>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

/// Sends HTML messages to a single Telegram chat.
pub struct TelegramSink {
    bot: Bot,
    chat_id: ChatId,
}

impl TelegramSink {
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        Self { bot, chat_id }
    }
}

#[async_trait]
impl NotificationSink for TelegramSink {
    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        self.bot
            .send_message(self.chat_id, text)
            .parse_mode(ParseMode::Html)
            .await?;
        debug!(chat_id = self.chat_id.0, "Telegram message sent");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "telegram"
    }
}

/// Writes messages to the log instead of delivering them.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        info!(message = %text, "Notification (dry run)");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

#[cfg(any(test, feature = "testkit"))]
pub mod testing {
    //! In-memory sink for tests.

    use super::{NotificationSink, NotifyError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Records every message it is asked to send.
    #[derive(Debug, Default)]
    pub struct RecordingSink {
        messages: Mutex<Vec<String>>,
        failing: AtomicBool,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self::default()
        }

        /// A sink that records messages but reports every send as failed.
        pub fn failing() -> Self {
            let sink = Self::default();
            sink.set_failing(true);
            sink
        }

        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        pub fn messages(&self) -> Vec<String> {
            self.messages
                .lock()
                .map(|m| m.clone())
                .unwrap_or_default()
        }

        pub fn count(&self) -> usize {
            self.messages.lock().map(|m| m.len()).unwrap_or(0)
        }
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn send(&self, text: &str) -> Result<(), NotifyError> {
            if let Ok(mut messages) = self.messages.lock() {
                messages.push(text.to_string());
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(NotifyError::Unavailable("recording sink set to fail".into()));
            }
            Ok(())
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingSink;
    use super::*;

    #[tokio::test]
    async fn test_log_sink_accepts_everything() {
        let sink = LogSink;
        assert!(sink.send("<b>hello</b>").await.is_ok());
        assert_eq!(sink.name(), "log");
    }

    #[tokio::test]
    async fn test_recording_sink() {
        let sink = RecordingSink::new();
        sink.send("one").await.unwrap();
        sink.send("two").await.unwrap();
        assert_eq!(sink.messages(), vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_recording_sink_failure_mode() {
        let sink = RecordingSink::failing();
        let err = sink.send("one").await.unwrap_err();
        assert!(matches!(err, NotifyError::Unavailable(_)));
        assert_eq!(sink.count(), 1);
    }

    #[tokio::test]
    async fn test_sinks_as_trait_objects() {
        let sinks: Vec<Box<dyn NotificationSink>> =
            vec![Box::new(LogSink), Box::new(RecordingSink::new())];
        let names: Vec<_> = sinks.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["log", "recording"]);
    }
}

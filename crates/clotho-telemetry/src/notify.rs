//! Alert notifications.
//!
//! Delivery is fire-and-forget: failures are logged and never reach the
//! caller, so trading paths cannot be blocked by the alert channel.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::{TelemetryError, TelemetryResult};

const TELEGRAM_API: &str = "https://api.telegram.org";

/// Outbound text alerts.
pub trait Notifier: Send + Sync {
    /// Deliver `html_text` to `chat_id`. Must not block or fail.
    fn notify(&self, chat_id: &str, html_text: &str);
}

/// Notifier bound to one chat, shared by the engine components.
#[derive(Clone)]
pub struct Alerter {
    sink: Arc<dyn Notifier>,
    chat_id: String,
}

impl Alerter {
    pub fn new(sink: Arc<dyn Notifier>, chat_id: impl Into<String>) -> Self {
        Self {
            sink,
            chat_id: chat_id.into(),
        }
    }

    /// Log-only alerter.
    pub fn log_only() -> Self {
        Self::new(Arc::new(LogNotifier), "")
    }

    pub fn send(&self, text: &str) {
        self.sink.notify(&self.chat_id, text);
    }
}

impl std::fmt::Debug for Alerter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Alerter")
            .field("chat_id", &self.chat_id)
            .finish()
    }
}

/// Telegram Bot API `sendMessage` with HTML parse mode.
pub struct TelegramNotifier {
    client: reqwest::Client,
    base_url: String,
}

impl TelegramNotifier {
    pub fn new(token: &str) -> TelemetryResult<Self> {
        Self::with_base_url(TELEGRAM_API, token)
    }

    pub fn with_base_url(api: &str, token: &str) -> TelemetryResult<Self> {
        if token.trim().is_empty() {
            return Err(TelemetryError::Notifier("empty bot token".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| TelemetryError::Notifier(e.to_string()))?;
        Ok(Self {
            client,
            base_url: format!("{}/bot{}", api.trim_end_matches('/'), token),
        })
    }
}

impl Notifier for TelegramNotifier {
    fn notify(&self, chat_id: &str, html_text: &str) {
        info!(text = html_text, "notify");
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("no runtime available, notification dropped");
            return;
        };
        let request = self.client.get(format!("{}/sendMessage", self.base_url)).query(&[
            ("chat_id", chat_id),
            ("text", html_text),
            ("parse_mode", "html"),
        ]);
        handle.spawn(async move {
            match request.send().await {
                Ok(resp) if !resp.status().is_success() => {
                    warn!(status = %resp.status(), "telegram rejected notification");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "telegram notification failed"),
            }
        });
    }
}

/// Writes alerts to the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, _chat_id: &str, html_text: &str) {
        info!(text = html_text, "notify");
    }
}

/// Records alerts for verification in tests.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.messages.lock().iter().any(|m| m.contains(needle))
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, _chat_id: &str, html_text: &str) {
        self.messages.lock().push(html_text.to_string());
    }
}

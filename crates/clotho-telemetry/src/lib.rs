//! Observability for the Clotho engine.
//!
//! - Structured logging with tracing (JSON in production, pretty otherwise)
//! - Prometheus counters for connection, ladder, risk and reconciliation activity
//! - Best-effort alert notifications (Telegram or log-only)

pub mod error;
pub mod logging;
pub mod metrics;
pub mod notify;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
pub use notify::{Alerter, LogNotifier, Notifier, RecordingNotifier, TelegramNotifier};

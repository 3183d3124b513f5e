//! Clotho ladder market-making engine.
//!
//! Wires the exchange client, the realtime session and its supervisor, the
//! ladder and risk workers, and the reconciler into one `Engine` with
//! cooperative shutdown.

pub mod app;
pub mod config;
pub mod error;

pub use app::{CancelAllFailSafe, Engine};
pub use config::{AppConfig, ExchangeConfig, TelegramConfig, WebSocketConfig};
pub use error::{AppError, AppResult};

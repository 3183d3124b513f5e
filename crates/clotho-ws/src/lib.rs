//! Realtime WebSocket session for the Clotho engine.
//!
//! - `connection`: one authenticated session at a time, trade and position
//!   events forwarded in arrival order
//! - `message`: tagged decoding of inbound frames, outbound op frames
//! - `activity`: last-frame tracking for staleness detection
//! - `supervisor`: staleness watchdog, reconnect bound and the cancel-all
//!   fail-safe

pub mod activity;
pub mod connection;
pub mod error;
pub mod message;
pub mod supervisor;

pub use activity::ActivityMonitor;
pub use connection::{ConnectionConfig, ConnectionManager, ConnectionState, WsEvent};
pub use error::{WsError, WsResult};
pub use message::{decode_frame, Frame, OutboundFrame};
pub use supervisor::{FailSafe, Session, Supervisor, SupervisorConfig, SupervisorStep};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any WebSocket connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

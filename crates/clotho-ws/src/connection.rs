//! Authenticated WebSocket session.
//!
//! A session connects, authenticates with `authKeyExpires`, subscribes to
//! the position and trade tables of one symbol, and forwards decoded events
//! in arrival order until it is closed. Reconnecting is the supervisor's
//! job; a session never retries on its own.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clotho_core::{PositionSnapshot, TradeRecord};
use clotho_exchange::Credentials;
use clotho_telemetry::{Alerter, Metrics};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::activity::ActivityMonitor;
use crate::error::{WsError, WsResult};
use crate::message::{decode_frame, Frame, OutboundFrame};
use crate::supervisor::Session;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Realtime endpoint, e.g. `wss://testnet.bitmex.com/realtime`.
    pub url: String,
    /// Exchange symbol to subscribe to.
    pub symbol: String,
    /// Handshake timeout.
    pub connect_timeout: Duration,
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            symbol: symbol.into(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn channels(&self) -> [String; 2] {
        [
            format!("position:{}", self.symbol),
            format!("trade:{}", self.symbol),
        ]
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Opened,
}

/// Event forwarded to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum WsEvent {
    Trade(TradeRecord),
    Position(Vec<PositionSnapshot>),
}

struct Inner {
    config: ConnectionConfig,
    credentials: Credentials,
    state: RwLock<ConnectionState>,
    activity: ActivityMonitor,
    events: mpsc::Sender<WsEvent>,
    alerter: Alerter,
    shutdown: CancellationToken,
    /// Bumped per session so a stale session never overwrites the state.
    generation: AtomicU64,
    /// Token and task of the current session.
    session: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

/// WebSocket connection manager. Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(
        config: ConnectionConfig,
        credentials: Credentials,
        events: mpsc::Sender<WsEvent>,
        alerter: Alerter,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                credentials,
                state: RwLock::new(ConnectionState::Closed),
                activity: ActivityMonitor::new(),
                events,
                alerter,
                shutdown,
                generation: AtomicU64::new(0),
                session: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.read()
    }

    pub fn idle_for(&self) -> Duration {
        self.inner.activity.idle_for()
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Starts a new session task, tearing down the previous one.
    pub fn spawn_session(&self) {
        if self.is_shutdown() {
            return;
        }
        let token = self.inner.shutdown.child_token();
        let previous = self.inner.session.lock().take();
        if let Some((old_token, _)) = previous {
            old_token.cancel();
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let manager = self.clone();
        let session_token = token.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = manager.run_session(session_token, generation).await {
                error!(error = %e, "WebSocket session ended with error");
            }
        });
        *self.inner.session.lock() = Some((token, handle));
    }

    /// Marks the session closed immediately and stops its task.
    pub fn force_close(&self) {
        let previous = std::mem::replace(&mut *self.inner.state.write(), ConnectionState::Closed);
        if previous == ConnectionState::Opened {
            Metrics::ws_disconnected();
            self.inner.alerter.send("WebSocket was closed");
        }
        if let Some((token, _)) = self.inner.session.lock().as_ref() {
            token.cancel();
        }
    }

    /// Stops the current session and waits for it to exit.
    pub async fn shutdown(&self) {
        info!("ConnectionManager shutdown requested");
        self.inner.shutdown.cancel();
        let session = self.inner.session.lock().take();
        if let Some((token, handle)) = session {
            token.cancel();
            if let Err(e) = handle.await {
                warn!(error = %e, "session task did not exit cleanly");
            }
        }
        *self.inner.state.write() = ConnectionState::Closed;
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner.generation.load(Ordering::SeqCst) == generation
    }

    /// Returns the previous state, or `None` if a newer session owns it.
    fn set_state(&self, generation: u64, state: ConnectionState) -> Option<ConnectionState> {
        let mut guard = self.inner.state.write();
        if !self.is_current(generation) {
            return None;
        }
        Some(std::mem::replace(&mut *guard, state))
    }

    /// Runs one session to completion. State is `Closed` on return unless a
    /// newer session has taken over.
    async fn run_session(&self, token: CancellationToken, generation: u64) -> WsResult<()> {
        let result = self.session_loop(&token, generation).await;
        let previous = self.set_state(generation, ConnectionState::Closed);
        if previous == Some(ConnectionState::Opened) {
            Metrics::ws_disconnected();
            self.inner.alerter.send("WebSocket was closed");
        }
        result
    }

    async fn session_loop(&self, token: &CancellationToken, generation: u64) -> WsResult<()> {
        let url = self.inner.config.url.as_str();
        info!(url, "Connecting to WebSocket");

        let connect = tokio::time::timeout(self.inner.config.connect_timeout, connect_async(url));
        let (ws_stream, _response) = tokio::select! {
            () = token.cancelled() => return Ok(()),
            res = connect => res
                .map_err(|_| WsError::ConnectionFailed("handshake timed out".to_string()))??,
        };
        let (mut write, mut read) = ws_stream.split();

        if self.set_state(generation, ConnectionState::Opened).is_none() {
            return Ok(());
        }
        self.inner.activity.reset();
        Metrics::ws_connected();
        info!("WebSocket connected");
        self.inner.alerter.send("WebSocket connected!");

        let (api_key, expires, signature) = self.inner.credentials.ws_auth_args();
        let auth = OutboundFrame::auth(&api_key, expires, &signature);
        write.send(Message::Text(auth.to_text()?)).await?;
        for channel in self.inner.config.channels() {
            let subscribe = OutboundFrame::subscribe([channel.as_str()]);
            write.send(Message::Text(subscribe.to_text()?)).await?;
            debug!(%channel, "Subscribed");
        }

        loop {
            tokio::select! {
                biased;

                () = token.cancelled() => {
                    info!("Session cancelled, closing socket");
                    if let Err(e) = write.send(Message::Close(None)).await {
                        debug!(error = %e, "Failed to send Close frame");
                    }
                    return Ok(());
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.inner.activity.record_frame();
                            self.handle_text(&text).await?;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            self.inner.activity.record_frame();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((1000, "Normal close".to_string()));
                            warn!(code, %reason, "WebSocket closed by server");
                            return Err(WsError::ConnectionClosed { code, reason });
                        }
                        Some(Ok(_)) => {
                            self.inner.activity.record_frame();
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket read error");
                            return Err(e.into());
                        }
                        None => {
                            warn!("WebSocket stream ended");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    async fn handle_text(&self, text: &str) -> WsResult<()> {
        match decode_frame(text) {
            Ok(Frame::Trade(trades)) => {
                for trade in trades {
                    self.forward(WsEvent::Trade(trade)).await;
                }
            }
            Ok(Frame::Position(positions)) => {
                self.forward(WsEvent::Position(positions)).await;
            }
            Ok(Frame::Error(message)) => {
                error!(%message, "Error frame received");
                return Err(WsError::Protocol(message));
            }
            Ok(Frame::Unknown(value)) => {
                debug!(frame = %value, "Ignoring frame");
            }
            Err(e) => {
                warn!(error = %e, "Undecodable frame skipped");
            }
        }
        Ok(())
    }

    async fn forward(&self, event: WsEvent) {
        if self.inner.events.send(event).await.is_err() {
            warn!("Event receiver dropped");
        }
    }
}

impl Session for ConnectionManager {
    fn state(&self) -> ConnectionState {
        ConnectionManager::state(self)
    }

    fn idle_for(&self) -> Duration {
        ConnectionManager::idle_for(self)
    }

    fn force_close(&self) {
        ConnectionManager::force_close(self)
    }

    fn reconnect(&self) {
        self.spawn_session()
    }
}

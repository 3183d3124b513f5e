//! Engine wiring and lifecycle.
//!
//! Startup: cancel everything left over on the symbol (retried until the
//! exchange confirms), log the wallet, open the realtime session, then start
//! the supervisor, the reconciler and the event dispatch loop.
//!
//! Shutdown (Ctrl-C or the engine's token): stop every task, wait for
//! in-flight rebuilds and evaluations, cancel all orders, and optionally
//! flatten the position.

use std::sync::Arc;
use std::time::Duration;

use clotho_exchange::{BoxFuture, Credentials, DynExchangeApi, NonceManager, RestClient, Signer};
use clotho_strategy::{cancel_all_orders, LadderEngine, OrderStore, PositionRiskManager, Reconciler};
use clotho_telemetry::{Alerter, TelegramNotifier};
use clotho_ws::{ConnectionManager, FailSafe, Supervisor, WsEvent};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::error::AppResult;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Cancel attempts made on graceful shutdown.
const SHUTDOWN_CANCEL_ATTEMPTS: u32 = 3;

/// Fail-safe that cancels every order on the symbol.
pub struct CancelAllFailSafe {
    exchange: DynExchangeApi,
    store: Arc<OrderStore>,
    symbol: String,
}

impl CancelAllFailSafe {
    pub fn new(exchange: DynExchangeApi, store: Arc<OrderStore>, symbol: impl Into<String>) -> Self {
        Self {
            exchange,
            store,
            symbol: symbol.into(),
        }
    }
}

impl FailSafe for CancelAllFailSafe {
    fn engage(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            cancel_all_orders(self.exchange.as_ref(), &self.store, &self.symbol)
                .await
                .is_ok()
        })
    }
}

/// One strategy instance: owns configuration, tracked orders and every
/// worker task for the run.
pub struct Engine {
    config: AppConfig,
    exchange: DynExchangeApi,
    credentials: Credentials,
    store: Arc<OrderStore>,
    alerter: Alerter,
    shutdown: CancellationToken,
}

impl Engine {
    /// Builds the production engine: signed REST client and Telegram alerts
    /// when configured.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let signer = Signer::new(config.exchange.api_secret.clone())?;
        let credentials = Credentials::new(
            config.exchange.api_key.clone(),
            signer,
            Arc::new(NonceManager::with_system_clock()),
        );
        let rest = RestClient::new(config.exchange.rest_url(), credentials.clone())?;

        let alerter = match &config.telegram {
            Some(telegram) => {
                Alerter::new(Arc::new(TelegramNotifier::new(&telegram.token)?), telegram.chat_id.clone())
            }
            None => {
                info!("Telegram not configured, alerts go to the log");
                Alerter::log_only()
            }
        };

        Ok(Self::with_parts(config, Arc::new(rest), credentials, alerter))
    }

    /// Builds an engine around an existing exchange client.
    pub fn with_parts(
        config: AppConfig,
        exchange: DynExchangeApi,
        credentials: Credentials,
        alerter: Alerter,
    ) -> Self {
        Self {
            config,
            exchange,
            credentials,
            store: Arc::new(OrderStore::new()),
            alerter,
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancelling this token stops the engine.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn store(&self) -> Arc<OrderStore> {
        Arc::clone(&self.store)
    }

    /// Runs until Ctrl-C or until the shutdown token is cancelled.
    pub async fn run(self) -> AppResult<()> {
        let symbol = self.config.symbol();
        info!(%symbol, "Starting engine");

        if !self.startup_cleanup(&symbol).await {
            info!("Shutdown requested during startup");
            return Ok(());
        }
        self.log_wallet().await;

        let (events_tx, mut events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let connection = ConnectionManager::new(
            self.config
                .websocket
                .connection_config(self.config.exchange.ws_url(), symbol.clone()),
            self.credentials.clone(),
            events_tx,
            self.alerter.clone(),
            self.shutdown.clone(),
        );

        let ladder = Arc::new(LadderEngine::new(
            self.config.strategy.clone(),
            Arc::clone(&self.exchange),
            self.store(),
            self.alerter.clone(),
            self.shutdown.clone(),
        ));
        let risk = Arc::new(PositionRiskManager::new(
            self.config.strategy.clone(),
            Arc::clone(&self.exchange),
            self.store(),
            self.alerter.clone(),
            self.shutdown.clone(),
        ));

        connection.spawn_session();

        let supervisor = Supervisor::new(
            Arc::new(connection.clone()),
            Arc::new(CancelAllFailSafe::new(
                Arc::clone(&self.exchange),
                self.store(),
                symbol.clone(),
            )),
            self.config.websocket.supervisor_config(),
            self.alerter.clone(),
            self.shutdown.clone(),
        );
        let supervisor_handle = tokio::spawn(supervisor.run());

        let reconciler = Reconciler::new(
            Arc::clone(&self.exchange),
            self.store(),
            symbol.clone(),
            self.config.reconcile.interval(),
            self.shutdown.clone(),
        );
        let reconciler_handle = tokio::spawn(reconciler.run());

        self.alerter.send(&format!("Clotho started on <b>{symbol}</b>"));

        loop {
            tokio::select! {
                biased;

                () = self.shutdown.cancelled() => {
                    info!("Shutdown token cancelled");
                    break;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl+C, shutting down");
                    break;
                }
                event = events_rx.recv() => {
                    match event {
                        Some(WsEvent::Trade(trade)) => {
                            let decision = ladder.on_tick(trade.price);
                            debug!(price = %trade.price, ?decision, "Trade tick");
                        }
                        Some(WsEvent::Position(positions)) => {
                            let trigger = risk.on_position_event();
                            debug!(count = positions.len(), ?trigger, "Position update");
                        }
                        None => {
                            warn!("Event channel closed");
                            break;
                        }
                    }
                }
            }
        }

        self.shutdown.cancel();
        connection.shutdown().await;
        Self::join("supervisor", supervisor_handle).await;
        Self::join("reconciler", reconciler_handle).await;
        ladder.wait_idle().await;
        risk.wait_idle().await;

        self.final_cleanup(&symbol).await;
        info!("Engine stopped");
        Ok(())
    }

    /// Cancel-all until confirmed. Returns `false` if shutdown interrupted it.
    async fn startup_cleanup(&self, symbol: &str) -> bool {
        let retry = self.config.websocket.failsafe_retry();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if cancel_all_orders(self.exchange.as_ref(), &self.store, symbol)
                .await
                .is_ok()
            {
                info!(attempt, "Startup cleanup complete");
                return true;
            }
            warn!(attempt, "Startup cancel-all failed, retrying");
            tokio::select! {
                () = tokio::time::sleep(retry) => {}
                () = self.shutdown.cancelled() => return false,
            }
        }
    }

    async fn log_wallet(&self) {
        match self.exchange.get_wallet_balance().await {
            Ok(wallet) => info!(
                currency = %wallet.currency,
                balance = %wallet.wallet_balance,
                available = %wallet.available_margin,
                "Wallet balance"
            ),
            Err(e) => warn!(error = %e, "Failed to read wallet balance"),
        }
    }

    async fn final_cleanup(&self, symbol: &str) {
        let mut cancelled = false;
        for attempt in 1..=SHUTDOWN_CANCEL_ATTEMPTS {
            if cancel_all_orders(self.exchange.as_ref(), &self.store, symbol)
                .await
                .is_ok()
            {
                cancelled = true;
                break;
            }
            warn!(attempt, "Shutdown cancel-all failed");
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        if !cancelled {
            error!(%symbol, "Orders may remain open after shutdown");
            self.alerter.send("Clotho stopped; cancel-all failed, orders may remain open");
        }

        if self.config.close_position_on_shutdown {
            match self.exchange.close_position(symbol).await {
                Ok(()) => info!(%symbol, "Position closed on shutdown"),
                Err(e) => error!(%symbol, error = %e, "Failed to close position on shutdown"),
            }
        }
        self.alerter.send(&format!("Clotho stopped on <b>{symbol}</b>"));
    }

    async fn join(name: &str, handle: JoinHandle<()>) {
        if let Err(e) = handle.await {
            warn!(task = name, error = %e, "Task did not exit cleanly");
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("symbol", &self.config.symbol())
            .field("tracked", &self.store.total_len())
            .finish()
    }
}

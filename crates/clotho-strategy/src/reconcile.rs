//! Periodic reconciliation of tracked orders against the exchange.
//!
//! Tracked entries whose order id no longer appears among the exchange's
//! open orders (filled, expired, cancelled elsewhere) are dropped. Nothing is
//! ever added here; only acknowledged placements create entries.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use clotho_exchange::{ApiResult, DynExchangeApi};
use clotho_telemetry::Metrics;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::order_store::{OrderStore, PruneReport, TrackedKind};

pub struct Reconciler {
    exchange: DynExchangeApi,
    store: Arc<OrderStore>,
    symbol: String,
    interval: Duration,
    shutdown: CancellationToken,
}

impl Reconciler {
    pub fn new(
        exchange: DynExchangeApi,
        store: Arc<OrderStore>,
        symbol: impl Into<String>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            exchange,
            store,
            symbol: symbol.into(),
            interval,
            shutdown,
        }
    }

    /// One pass. The local snapshot is taken before the remote listing so
    /// that orders placed while the listing is in flight are never pruned.
    pub async fn reconcile_once(&self) -> ApiResult<PruneReport> {
        let snapshot = self.store.snapshot();
        let live: HashSet<String> = self
            .exchange
            .get_open_orders(Some(&self.symbol))
            .await?
            .into_iter()
            .map(|o| o.order_id)
            .collect();

        let report = self.store.prune_missing(&snapshot, &live);
        for kind in TrackedKind::ALL {
            let pruned = report.count(kind);
            if pruned > 0 {
                Metrics::reconcile_pruned(kind.label(), pruned);
            }
        }
        if report.total() > 0 {
            info!(
                main = report.main,
                stop = report.stop,
                position = report.position,
                live = live.len(),
                "Pruned orders missing on exchange"
            );
        } else {
            debug!(tracked = snapshot.len(), live = live.len(), "Tracked orders in sync");
        }
        Ok(report)
    }

    /// Runs `reconcile_once` every interval until shutdown.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; the store is empty at startup.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    debug!("Reconciler stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.reconcile_once().await {
                        warn!(error = %e, "Reconciliation failed");
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("symbol", &self.symbol)
            .field("interval", &self.interval)
            .finish()
    }
}

//! Position risk manager.
//!
//! Position frames from the socket trigger an evaluation, at most one at a
//! time and no more often than `min_interval_ms`. Each evaluation re-reads
//! positions and the ticker (nothing is cached), computes inverse-contract
//! PnL and closes positions that crossed the profit or loss threshold with a
//! reduce-only limit at the top of the book.

use std::sync::Arc;
use std::time::Duration;

use clotho_core::{
    LimitOrder, OrderClass, OrderPlacementParams, OrderSide, PositionSnapshot, Price,
};
use clotho_exchange::{ApiResult, DynExchangeApi, OrderRef};
use clotho_telemetry::{Alerter, Metrics};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{RiskConfig, StrategyConfig};
use crate::order_store::{OrderStore, TrackedKind};

/// Decimal places used when reporting realised PnL.
const PNL_DP: u32 = 5;

/// What `on_position_event` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskTrigger {
    Launched,
    /// Last evaluation started less than `min_interval` ago.
    RateLimited,
    /// An evaluation is still running.
    Busy,
    ShuttingDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Profit,
    Loss,
}

impl CloseReason {
    pub fn label(&self) -> &'static str {
        match self {
            CloseReason::Profit => "profit",
            CloseReason::Loss => "loss",
        }
    }
}

/// PnL view of one position at one price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionAssessment {
    pub side: OrderSide,
    pub entry: Price,
    pub price: Price,
    /// `|qty| × (1/entry − 1/price)`, rounded to 5 dp.
    pub realised: Decimal,
    /// `(entry − price) / mid × 100`; negative means price rose.
    pub pnl_pct: Decimal,
    pub loss_threshold: Decimal,
    pub close: Option<CloseReason>,
}

/// Evaluates a position against the profit and loss thresholds.
///
/// Returns `None` for flat positions or non-positive prices.
pub fn assess_position(
    position: &PositionSnapshot,
    price: Price,
    held_for: Duration,
    risk: &RiskConfig,
) -> Option<PositionAssessment> {
    let entry = position.avg_entry_price;
    if position.is_flat() || !entry.is_positive() || !price.is_positive() {
        return None;
    }
    let (e, p) = (entry.inner(), price.inner());
    let qty = position.current_qty.abs().inner();

    let realised = (qty * (Decimal::ONE / e - Decimal::ONE / p)).round_dp(PNL_DP);
    let pnl_pct = (e - p) / ((e + p) / Decimal::TWO) * dec!(100);
    let loss_threshold = risk.loss_threshold(held_for);

    let side = position.side();
    let close = match side {
        OrderSide::Bid if pnl_pct <= -risk.profit_scale => Some(CloseReason::Profit),
        OrderSide::Bid if pnl_pct >= loss_threshold => Some(CloseReason::Loss),
        OrderSide::Ask if pnl_pct >= risk.profit_scale => Some(CloseReason::Profit),
        OrderSide::Ask if pnl_pct <= -loss_threshold => Some(CloseReason::Loss),
        _ => None,
    };

    Some(PositionAssessment {
        side,
        entry,
        price,
        realised,
        pnl_pct,
        loss_threshold,
        close,
    })
}

/// Outcome of one evaluation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RiskReport {
    pub assessments: Vec<PositionAssessment>,
    pub closes: usize,
    /// Position-closing orders dropped because no position remains.
    pub cleared: usize,
}

#[derive(Debug, Default)]
struct RiskState {
    last_run: Option<Instant>,
    position_since: Option<Instant>,
}

/// Rate-limited, single-flight position evaluator.
pub struct PositionRiskManager {
    config: StrategyConfig,
    exchange: DynExchangeApi,
    store: Arc<OrderStore>,
    state: Mutex<RiskState>,
    permit: Arc<Semaphore>,
    inflight: Mutex<Option<JoinHandle<Option<RiskReport>>>>,
    alerter: Alerter,
    shutdown: CancellationToken,
}

impl PositionRiskManager {
    pub fn new(
        config: StrategyConfig,
        exchange: DynExchangeApi,
        store: Arc<OrderStore>,
        alerter: Alerter,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            exchange,
            store,
            state: Mutex::new(RiskState::default()),
            permit: Arc::new(Semaphore::new(1)),
            inflight: Mutex::new(None),
            alerter,
            shutdown,
        }
    }

    /// Handles a position frame by launching an evaluation when allowed.
    pub fn on_position_event(self: &Arc<Self>) -> RiskTrigger {
        if self.shutdown.is_cancelled() {
            return RiskTrigger::ShuttingDown;
        }
        let mut state = self.state.lock();
        let now = Instant::now();
        if let Some(last) = state.last_run {
            if now.duration_since(last) < self.config.risk.min_interval() {
                return RiskTrigger::RateLimited;
            }
        }
        let Ok(permit) = Arc::clone(&self.permit).try_acquire_owned() else {
            return RiskTrigger::Busy;
        };
        state.last_run = Some(now);
        drop(state);

        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let _permit = permit;
            match manager.evaluate().await {
                Ok(report) => Some(report),
                Err(e) => {
                    Metrics::order_error("risk");
                    warn!(error = %e, "Position evaluation failed");
                    None
                }
            }
        });
        *self.inflight.lock() = Some(handle);
        RiskTrigger::Launched
    }

    /// Waits for the most recently launched evaluation.
    pub async fn wait_idle(&self) -> Option<RiskReport> {
        let handle = self.inflight.lock().take()?;
        handle.await.ok().flatten()
    }

    /// Runs one evaluation pass. Any exchange error ends the pass.
    pub async fn evaluate(&self) -> ApiResult<RiskReport> {
        let symbol = self.config.pair.symbol();
        let mut report = RiskReport::default();

        let positions: Vec<PositionSnapshot> = self
            .exchange
            .get_open_positions()
            .await?
            .into_iter()
            .filter(|p| p.symbol == symbol && !p.is_flat())
            .collect();

        if positions.is_empty() {
            self.state.lock().position_since = None;
            if !self.store.is_empty(TrackedKind::Position) {
                report.cleared = self
                    .cancel_entries(self.store.entries(TrackedKind::Position))
                    .await;
                info!(cleared = report.cleared, "No open position, closing orders dropped");
            }
            return Ok(report);
        }

        let held_for = {
            let mut state = self.state.lock();
            let since = *state.position_since.get_or_insert_with(Instant::now);
            since.elapsed()
        };
        let price = self.exchange.get_ticker(&symbol).await?.last_price;

        for position in &positions {
            let Some(assessment) = assess_position(position, price, held_for, &self.config.risk)
            else {
                continue;
            };
            debug!(
                side = %assessment.side,
                pnl_pct = %assessment.pnl_pct.round_dp(4),
                realised = %assessment.realised,
                loss_threshold = %assessment.loss_threshold,
                held_secs = held_for.as_secs(),
                "Position assessed"
            );
            if let Some(reason) = assessment.close {
                if self.close_position(position, &assessment, reason).await? {
                    report.closes += 1;
                }
            }
            report.assessments.push(assessment);
        }
        Ok(report)
    }

    /// Places the offsetting order and drops the closing orders it replaces.
    async fn close_position(
        &self,
        position: &PositionSnapshot,
        assessment: &PositionAssessment,
        reason: CloseReason,
    ) -> ApiResult<bool> {
        let summary = format!(
            "Position: side = <b>{}</b>, percent = <b>{}</b>, realise = <b>{:.5}</b>, \
             entry = <b>{}</b>, price = <b>{}</b>\nPosition with profit = <b>{}</b>",
            assessment.side,
            assessment.pnl_pct.round_dp(4),
            assessment.realised,
            assessment.entry,
            assessment.price,
            reason == CloseReason::Profit
        );
        info!(reason = reason.label(), %summary, "Closing position");
        self.alerter.send(&format!("Close position. {summary}"));

        let previous = self.store.entries(TrackedKind::Position);

        let pair = &self.config.pair;
        let book = self.exchange.get_order_book(pair, position.side()).await?;
        let Some((level_price, level_amount)) = book.first().and_then(|l| l.price.map(|p| (p, l.amount)))
        else {
            warn!(side = %position.side(), "Order book empty, position left open");
            return Ok(false);
        };
        let qty = position.current_qty.abs();
        let volume = level_amount.map_or(qty, |amount| amount.min(qty));

        let order = LimitOrder::new(position.side().opposite(), volume, pair.clone(), level_price);
        let params = OrderPlacementParams {
            reduce_only: true,
            ..OrderPlacementParams::default()
        };
        let order_id = match self.exchange.place_order(order, OrderClass::Limit, params).await {
            Ok(id) => id,
            Err(e) => {
                Metrics::order_error("place");
                warn!(price = %level_price, %volume, error = %e, "Close order rejected");
                return Err(e);
            }
        };
        info!(price = %level_price, %volume, %order_id, "Close order placed");
        self.store.insert(TrackedKind::Position, level_price, order_id.clone());
        Metrics::order_placed(TrackedKind::Position.label());
        Metrics::position_close(reason.label());

        let replaced: Vec<_> = previous
            .into_iter()
            .filter(|(_, id)| *id != order_id)
            .collect();
        self.cancel_entries(replaced).await;
        Ok(true)
    }

    /// Force-cancels closing orders: local entries are dropped even when the
    /// exchange rejects the cancel (the order may already be filled).
    async fn cancel_entries(&self, entries: Vec<(Price, String)>) -> usize {
        let mut dropped = 0;
        for (price, order_id) in entries {
            match self.exchange.cancel_order(OrderRef::Id(order_id.clone())).await {
                Ok(()) => Metrics::order_cancelled(TrackedKind::Position.label()),
                Err(e) => {
                    Metrics::order_error("cancel");
                    warn!(%price, %order_id, error = %e, "Closing order cancel failed, dropped locally");
                }
            }
            if self.store.remove_if_id(TrackedKind::Position, price, &order_id) {
                dropped += 1;
            }
            let pacing = self.config.pacing();
            if !pacing.is_zero() {
                tokio::time::sleep(pacing).await;
            }
        }
        dropped
    }
}

impl std::fmt::Debug for PositionRiskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionRiskManager")
            .field("pair", &self.config.pair)
            .field("state", &*self.state.lock())
            .finish()
    }
}

//! Price-reactive ladder engine.
//!
//! Each trade tick is checked against the tracked main ladder. Ticks that
//! move far enough from the ladder launch a rebuild:
//! - cancel main orders outside the corridor around the new anchor (and the
//!   stop order paired with each)
//! - place `ladder_depth` maker limits walking away from the anchor
//! - place the stop-limit ladder on the opposite side
//!
//! At most one rebuild runs at a time. Ticks arriving while one is in flight
//! are dropped, not queued.

use std::sync::Arc;

use clotho_core::{
    LimitOrder, OrderClass, OrderPlacementParams, OrderSide, Price, TriggerReference,
};
use clotho_exchange::{ApiResult, DynExchangeApi, OrderRef};
use clotho_telemetry::{Alerter, Metrics};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::StrategyConfig;
use crate::order_store::{is_near, OrderStore, TrackedKind};

/// Direction of the last accepted price move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    Up,
    Down,
    #[default]
    None,
}

/// Rebuild parameters fixed when the tick was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildPlan {
    pub price: Price,
    pub direction: Direction,
    /// Side of the main ladder; the stop ladder takes the opposite side.
    pub side: OrderSide,
    pub anchor: Price,
    pub boosted: bool,
}

/// What `on_tick` did with a price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickDecision {
    /// First tick seen; only recorded.
    Initialized,
    /// Same price as the last accepted tick.
    Unchanged,
    /// Move too small to enter a new channel.
    BelowThreshold,
    /// A rebuild is already running.
    Busy,
    ShuttingDown,
    Rebuild(RebuildPlan),
}

/// Result of one ladder placement loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlacementOutcome {
    pub placed: usize,
    /// Levels skipped because a tracked order already sits nearby.
    pub skipped_near: usize,
    /// A placement was rejected and the loop stopped early.
    pub failed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildReport {
    pub plan: RebuildPlan,
    pub cancelled: usize,
    pub main: PlacementOutcome,
    pub stop: PlacementOutcome,
    /// Cancellation failed; nothing was placed.
    pub aborted: bool,
}

#[derive(Debug, Default)]
struct LadderState {
    last_price: Option<Price>,
    last_direction: Direction,
}

/// Ladder engine for one pair.
pub struct LadderEngine {
    config: StrategyConfig,
    exchange: DynExchangeApi,
    store: Arc<OrderStore>,
    state: Mutex<LadderState>,
    /// Single permit; held by the running rebuild.
    permit: Arc<Semaphore>,
    inflight: Mutex<Option<JoinHandle<RebuildReport>>>,
    alerter: Alerter,
    shutdown: CancellationToken,
}

impl LadderEngine {
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
            state: Mutex::new(LadderState::default()),
            permit: Arc::new(Semaphore::new(1)),
            inflight: Mutex::new(None),
            alerter,
            shutdown,
        }
    }

    pub fn last_price(&self) -> Option<Price> {
        self.state.lock().last_price
    }

    pub fn last_direction(&self) -> Direction {
        self.state.lock().last_direction
    }

    /// Handles one trade price. Never blocks on the exchange: an accepted
    /// tick spawns its rebuild and returns the plan.
    pub fn on_tick(self: &Arc<Self>, price: Price) -> TickDecision {
        if self.shutdown.is_cancelled() {
            return TickDecision::ShuttingDown;
        }

        let mut state = self.state.lock();
        let Some(last_price) = state.last_price else {
            state.last_price = Some(price);
            debug!(%price, "First tick recorded");
            return TickDecision::Initialized;
        };
        if price == last_price {
            return TickDecision::Unchanged;
        }

        let reference = match state.last_direction {
            Direction::Up => self.store.min_price(TrackedKind::Main),
            Direction::Down | Direction::None => self.store.max_price(TrackedKind::Main),
        };
        let offset = reference.map(|r| price.inner() - r.inner());
        if let Some(offset) = offset {
            if offset.abs() < self.config.channel_threshold() {
                Metrics::ladder_skipped("threshold");
                return TickDecision::BelowThreshold;
            }
        }
        let boosted = offset.is_some_and(|o| o.abs() >= self.config.boost_threshold());

        let Ok(permit) = Arc::clone(&self.permit).try_acquire_owned() else {
            Metrics::ladder_skipped("busy");
            debug!(%price, "Rebuild in flight, tick dropped");
            return TickDecision::Busy;
        };

        let direction = if price > last_price {
            Direction::Up
        } else {
            Direction::Down
        };
        let side = if direction == Direction::Up && !boosted {
            OrderSide::Ask
        } else {
            OrderSide::Bid
        };
        let shift = Price::new(self.config.price_offset);
        let anchor = match side {
            OrderSide::Ask => price + shift,
            OrderSide::Bid => price - shift,
        };

        state.last_price = Some(price);
        state.last_direction = direction;
        drop(state);

        let plan = RebuildPlan {
            price,
            direction,
            side,
            anchor,
            boosted,
        };
        info!(
            %price,
            ?direction,
            %side,
            %anchor,
            boosted,
            reference = ?reference.map(|r| r.to_string()),
            "Ladder rebuild triggered"
        );

        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let _permit = permit;
            engine.rebuild(plan).await
        });
        *self.inflight.lock() = Some(handle);

        TickDecision::Rebuild(plan)
    }

    /// Waits for the most recently launched rebuild, if any.
    pub async fn wait_idle(&self) -> Option<RebuildReport> {
        let handle = self.inflight.lock().take()?;
        match handle.await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, "Rebuild task failed");
                None
            }
        }
    }

    /// Cancels stale orders around `plan.anchor` and places both ladders.
    pub async fn rebuild(&self, plan: RebuildPlan) -> RebuildReport {
        Metrics::ladder_rebuild();
        let mut report = RebuildReport {
            plan,
            cancelled: 0,
            main: PlacementOutcome::default(),
            stop: PlacementOutcome::default(),
            aborted: false,
        };

        match self.cancel_outside_corridor(plan.anchor).await {
            Ok(cancelled) => report.cancelled = cancelled,
            Err(e) => {
                report.aborted = true;
                warn!(anchor = %plan.anchor, error = %e, "Ladder cancel failed, rebuild aborted");
                self.alerter.send(&format!(
                    "Ladder rebuild aborted at <b>{}</b>: {}",
                    plan.price, e
                ));
                return report;
            }
        }

        report.main = self
            .place_ladder(plan.side, plan.anchor, OrderClass::Limit)
            .await;
        report.stop = self
            .place_ladder(plan.side.opposite(), plan.anchor, OrderClass::StopLimit)
            .await;

        let depth = self.config.ladder_depth;
        info!(
            anchor = %plan.anchor,
            cancelled = report.cancelled,
            main_placed = report.main.placed,
            stop_placed = report.stop.placed,
            depth,
            "Ladder rebuild finished"
        );
        self.alerter.send(&format!(
            "Ladder: side = <b>{}</b>, price = <b>{}</b>, anchor = <b>{}</b>, \
             orders = <b>{}/{}</b>, stops = <b>{}/{}</b>, cancelled = <b>{}</b>",
            plan.side,
            plan.price,
            plan.anchor,
            report.main.placed,
            depth,
            report.stop.placed,
            depth,
            report.cancelled
        ));
        report
    }

    /// Cancels main orders outside `anchor ± step × depth` or near the anchor,
    /// along with the stop order closest to each.
    async fn cancel_outside_corridor(&self, anchor: Price) -> ApiResult<usize> {
        let corridor = self.config.corridor();
        let step = self.config.price_step;
        let mut cancelled = 0;

        for (price, order_id) in self.store.entries(TrackedKind::Main) {
            if self.shutdown.is_cancelled() {
                break;
            }
            let outside = price.inner() > anchor.inner() + corridor
                || price.inner() < anchor.inner() - corridor;
            let near = is_near(price, anchor, step);
            if !outside && !near {
                continue;
            }
            debug!(%price, %anchor, outside, near, "Cancelling main order");

            if let Some((stop_price, stop_id)) = self.store.nearest(TrackedKind::Stop, price) {
                self.cancel_tracked(TrackedKind::Stop, stop_price, stop_id)
                    .await?;
            }
            self.cancel_tracked(TrackedKind::Main, price, order_id)
                .await?;
            cancelled += 1;
            self.pace().await;
        }
        Ok(cancelled)
    }

    async fn cancel_tracked(&self, kind: TrackedKind, price: Price, order_id: String) -> ApiResult<()> {
        match self.exchange.cancel_order(OrderRef::Id(order_id.clone())).await {
            Ok(()) => {
                self.store.remove_if_id(kind, price, &order_id);
                Metrics::order_cancelled(kind.label());
                Ok(())
            }
            Err(e) => {
                Metrics::order_error("cancel");
                warn!(book = kind.label(), %price, %order_id, error = %e, "Cancel failed");
                Err(e)
            }
        }
    }

    /// Places up to `ladder_depth` orders of `class` on `side` starting from
    /// `anchor`.
    ///
    /// Limit ladders rest at `anchor`, `anchor ± step`, ... walking away from
    /// the market. StopLimit ladders start at `anchor ± stop_offset`, walk by
    /// `stop_step`, and trigger at each level `∓ stop_bias`; they are tracked
    /// by trigger price. Levels with a tracked order within half a step are
    /// skipped; the first rejection ends the loop.
    pub async fn place_ladder(&self, side: OrderSide, anchor: Price, class: OrderClass) -> PlacementOutcome {
        let stop = class == OrderClass::StopLimit;
        let kind = if stop { TrackedKind::Stop } else { TrackedKind::Main };
        let params = if stop {
            OrderPlacementParams::closing_stop(TriggerReference::LastPrice)
        } else {
            OrderPlacementParams::maker()
        };

        let cfg = &self.config;
        let sign = match side {
            OrderSide::Ask => Decimal::ONE,
            OrderSide::Bid => Decimal::NEGATIVE_ONE,
        };
        let level_step = if stop {
            Price::new(-sign * cfg.price_step)
        } else {
            Price::new(sign * cfg.price_step)
        };
        let stop_step = Price::new(-sign * cfg.stop_step);
        let bias = Price::new(-sign * cfg.stop_bias);

        let mut level = anchor;
        let mut stop_price = anchor + Price::new(sign * cfg.stop_offset);
        let mut outcome = PlacementOutcome::default();

        for _ in 0..cfg.ladder_depth {
            if self.shutdown.is_cancelled() {
                break;
            }
            let trigger = stop.then(|| level + bias);
            let order_price = if stop { stop_price } else { level };
            level += level_step;
            stop_price += stop_step;

            let key = trigger.unwrap_or(order_price);
            if self.store.has_near(kind, key, cfg.price_step) {
                debug!(book = kind.label(), %key, "Near order exists, level skipped");
                outcome.skipped_near += 1;
                continue;
            }

            let mut order = LimitOrder::new(side, cfg.volume(), cfg.pair.clone(), order_price);
            if let Some(trigger) = trigger {
                order = order.with_trigger(trigger);
            }

            self.pace().await;
            match self.exchange.place_order(order, class, params.clone()).await {
                Ok(order_id) => {
                    debug!(book = kind.label(), %side, price = %order_price, %order_id, "Order placed");
                    self.store.insert(kind, key, order_id);
                    Metrics::order_placed(kind.label());
                    outcome.placed += 1;
                }
                Err(e) => {
                    Metrics::order_error("place");
                    warn!(book = kind.label(), %side, price = %order_price, error = %e, "Placement failed, ladder stopped");
                    outcome.failed = true;
                    break;
                }
            }
        }
        outcome
    }

    async fn pace(&self) {
        let pacing = self.config.pacing();
        if !pacing.is_zero() {
            tokio::time::sleep(pacing).await;
        }
    }
}

impl std::fmt::Debug for LadderEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LadderEngine")
            .field("pair", &self.config.pair)
            .field("state", &*self.state.lock())
            .finish()
    }
}

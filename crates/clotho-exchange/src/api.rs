//! Exchange operations consumed by the strategy.
//!
//! `ExchangeApi` is the seam between the engine and the network: the engine
//! holds a `DynExchangeApi`, production wires in `RestClient`, tests wire in
//! `MockExchange`.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clotho_core::{
    CurrencyPair, LimitOrder, OrderClass, OrderPlacementParams, OrderSide, PositionSnapshot,
    Price, Ticker, WalletBalance,
};
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::error::{ApiError, ApiResult};

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Target of a single-order cancel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OrderRef {
    /// Exchange-assigned `orderID`.
    Id(String),
    /// Our `clOrdID`.
    ClientId(String),
}

/// Live order as listed by the exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenOrder {
    pub order_id: String,
    pub cl_ord_id: Option<String>,
    pub symbol: String,
    pub side: Option<OrderSide>,
    pub price: Option<Price>,
}

/// Exchange operations. The implementation never retries; callers decide.
pub trait ExchangeApi: Send + Sync {
    fn get_wallet_balance(&self) -> BoxFuture<'_, ApiResult<WalletBalance>>;

    fn get_ticker<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, ApiResult<Ticker>>;

    /// One side of the book, best level first.
    fn get_order_book<'a>(
        &'a self,
        pair: &'a CurrencyPair,
        side: OrderSide,
    ) -> BoxFuture<'a, ApiResult<Vec<LimitOrder>>>;

    /// All open orders, paging through the exchange listing.
    fn get_open_orders<'a>(
        &'a self,
        symbol: Option<&'a str>,
    ) -> BoxFuture<'a, ApiResult<Vec<OpenOrder>>>;

    /// Submits an order and returns the exchange order id.
    fn place_order(
        &self,
        order: LimitOrder,
        class: OrderClass,
        params: OrderPlacementParams,
    ) -> BoxFuture<'_, ApiResult<String>>;

    fn cancel_order(&self, target: OrderRef) -> BoxFuture<'_, ApiResult<()>>;

    /// Cancels every open order on the symbol; returns how many were cancelled.
    fn cancel_all_orders<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, ApiResult<usize>>;

    fn get_open_positions(&self) -> BoxFuture<'_, ApiResult<Vec<PositionSnapshot>>>;

    fn close_position<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, ApiResult<()>>;
}

/// Arc wrapper for ExchangeApi trait objects.
pub type DynExchangeApi = Arc<dyn ExchangeApi>;

/// Placement recorded by `MockExchange`.
#[derive(Debug, Clone)]
pub struct PlacedCall {
    pub order_id: String,
    pub order: LimitOrder,
    pub class: OrderClass,
    pub params: OrderPlacementParams,
}

#[derive(Debug, Default)]
struct MockState {
    placed: Vec<PlacedCall>,
    cancelled: Vec<OrderRef>,
    live: Vec<OpenOrder>,
    positions: Vec<PositionSnapshot>,
    ticker: Option<Price>,
    book: Vec<LimitOrder>,
    /// Remaining successful placements before failures start.
    placements_before_failure: Option<usize>,
    fail_cancels: bool,
    cancel_all_failures: usize,
    cancel_all_calls: usize,
    close_position_calls: Vec<String>,
    position_polls: usize,
    latency: Option<Duration>,
}

/// In-memory exchange for tests.
///
/// Placements become live orders, cancels remove them, and every call is
/// recorded for verification. Failures and latency are configurable.
#[derive(Debug, Default)]
pub struct MockExchange {
    state: Mutex<MockState>,
    next_id: AtomicU64,
}

impl MockExchange {
    pub fn new() -> Self {
        Self::default()
    }

    fn rejection(message: &str) -> ApiError {
        ApiError::Exchange {
            status: 400,
            name: "HTTPError".to_string(),
            message: message.to_string(),
        }
    }

    async fn delay(&self) {
        let latency = self.state.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = Some(latency);
    }

    pub fn set_ticker(&self, price: Price) {
        self.state.lock().ticker = Some(price);
    }

    pub fn set_positions(&self, positions: Vec<PositionSnapshot>) {
        self.state.lock().positions = positions;
    }

    /// Book levels in any order; `get_order_book` filters and sorts.
    pub fn set_book(&self, book: Vec<LimitOrder>) {
        self.state.lock().book = book;
    }

    /// Let `n` more placements succeed, then reject the rest.
    pub fn fail_placements_after(&self, n: usize) {
        self.state.lock().placements_before_failure = Some(n);
    }

    pub fn set_fail_cancels(&self, fail: bool) {
        self.state.lock().fail_cancels = fail;
    }

    /// Reject the next `n` cancel-all calls.
    pub fn fail_cancel_all(&self, n: usize) {
        self.state.lock().cancel_all_failures = n;
    }

    /// Simulates an order leaving the book outside our control (fill, expiry).
    pub fn drop_live_order(&self, order_id: &str) {
        self.state.lock().live.retain(|o| o.order_id != order_id);
    }

    /// Adds a live order that was never placed through this client.
    pub fn insert_live_order(&self, order: OpenOrder) {
        self.state.lock().live.push(order);
    }

    pub fn placed(&self) -> Vec<PlacedCall> {
        self.state.lock().placed.clone()
    }

    pub fn cancelled(&self) -> Vec<OrderRef> {
        self.state.lock().cancelled.clone()
    }

    pub fn live_orders(&self) -> Vec<OpenOrder> {
        self.state.lock().live.clone()
    }

    pub fn cancel_all_calls(&self) -> usize {
        self.state.lock().cancel_all_calls
    }

    pub fn close_position_calls(&self) -> Vec<String> {
        self.state.lock().close_position_calls.clone()
    }

    pub fn position_polls(&self) -> usize {
        self.state.lock().position_polls
    }

    pub fn clear_calls(&self) {
        let mut state = self.state.lock();
        state.placed.clear();
        state.cancelled.clear();
        state.cancel_all_calls = 0;
        state.position_polls = 0;
    }
}

impl ExchangeApi for MockExchange {
    fn get_wallet_balance(&self) -> BoxFuture<'_, ApiResult<WalletBalance>> {
        Box::pin(async move {
            self.delay().await;
            Ok(WalletBalance {
                currency: "XBt".to_string(),
                wallet_balance: Decimal::ZERO,
                available_margin: Decimal::ZERO,
            })
        })
    }

    fn get_ticker<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, ApiResult<Ticker>> {
        Box::pin(async move {
            self.delay().await;
            let price = self
                .state
                .lock()
                .ticker
                .ok_or_else(|| ApiError::Protocol(format!("no ticker for {symbol}")))?;
            Ok(Ticker {
                symbol: symbol.to_string(),
                last_price: price,
            })
        })
    }

    fn get_order_book<'a>(
        &'a self,
        pair: &'a CurrencyPair,
        side: OrderSide,
    ) -> BoxFuture<'a, ApiResult<Vec<LimitOrder>>> {
        Box::pin(async move {
            self.delay().await;
            let mut levels: Vec<LimitOrder> = self
                .state
                .lock()
                .book
                .iter()
                .filter(|l| l.side == side && &l.pair == pair)
                .cloned()
                .collect();
            levels.sort_by(LimitOrder::book_cmp);
            Ok(levels)
        })
    }

    fn get_open_orders<'a>(
        &'a self,
        symbol: Option<&'a str>,
    ) -> BoxFuture<'a, ApiResult<Vec<OpenOrder>>> {
        Box::pin(async move {
            self.delay().await;
            Ok(self
                .state
                .lock()
                .live
                .iter()
                .filter(|o| symbol.map_or(true, |s| o.symbol == s))
                .cloned()
                .collect())
        })
    }

    fn place_order(
        &self,
        order: LimitOrder,
        class: OrderClass,
        params: OrderPlacementParams,
    ) -> BoxFuture<'_, ApiResult<String>> {
        Box::pin(async move {
            self.delay().await;
            let mut state = self.state.lock();
            if let Some(remaining) = state.placements_before_failure.as_mut() {
                if *remaining == 0 {
                    return Err(Self::rejection("Account has insufficient Available Balance"));
                }
                *remaining -= 1;
            }
            let order_id = format!("ord-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
            state.live.push(OpenOrder {
                order_id: order_id.clone(),
                cl_ord_id: None,
                symbol: order.pair.symbol(),
                side: Some(order.side),
                price: order.price,
            });
            state.placed.push(PlacedCall {
                order_id: order_id.clone(),
                order,
                class,
                params,
            });
            Ok(order_id)
        })
    }

    fn cancel_order(&self, target: OrderRef) -> BoxFuture<'_, ApiResult<()>> {
        Box::pin(async move {
            self.delay().await;
            let mut state = self.state.lock();
            if state.fail_cancels {
                return Err(Self::rejection("Not Found"));
            }
            match &target {
                OrderRef::Id(id) => state.live.retain(|o| &o.order_id != id),
                OrderRef::ClientId(cid) => {
                    state.live.retain(|o| o.cl_ord_id.as_deref() != Some(cid.as_str()))
                }
            }
            state.cancelled.push(target);
            Ok(())
        })
    }

    fn cancel_all_orders<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, ApiResult<usize>> {
        Box::pin(async move {
            self.delay().await;
            let mut state = self.state.lock();
            state.cancel_all_calls += 1;
            if state.cancel_all_failures > 0 {
                state.cancel_all_failures -= 1;
                return Err(ApiError::Transport("connection reset".to_string()));
            }
            let before = state.live.len();
            state.live.retain(|o| o.symbol != symbol);
            Ok(before - state.live.len())
        })
    }

    fn get_open_positions(&self) -> BoxFuture<'_, ApiResult<Vec<PositionSnapshot>>> {
        Box::pin(async move {
            self.delay().await;
            let mut state = self.state.lock();
            state.position_polls += 1;
            Ok(state.positions.clone())
        })
    }

    fn close_position<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, ApiResult<()>> {
        Box::pin(async move {
            self.delay().await;
            let mut state = self.state.lock();
            state.close_position_calls.push(symbol.to_string());
            state.positions.retain(|p| p.symbol != symbol);
            Ok(())
        })
    }
}

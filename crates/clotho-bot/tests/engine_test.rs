//! Engine scenarios against a mock exchange and a mock realtime server.

mod integration;
use integration::common::mock_ws::MockWsServer;

use std::sync::Arc;
use std::time::Duration;

use clotho_bot::{AppConfig, Engine};
use clotho_core::{CurrencyPair, LimitOrder, OrderClass, OrderSide, PositionSnapshot, Price, Size};
use clotho_exchange::{Credentials, MockExchange, NonceManager, Signer};
use clotho_strategy::TrackedKind;
use clotho_telemetry::{Alerter, RecordingNotifier};
use rust_decimal_macros::dec;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

fn config(ws_url: &str, extra: &str) -> AppConfig {
    AppConfig::from_toml_str(&format!(
        r#"
        {extra}

        [exchange]
        api_key = "test-key"
        api_secret = "test-secret"
        ws_url = "{ws_url}"

        [websocket]
        check_interval_ms = 20
        reconnect_interval_ms = 50
        failsafe_retry_ms = 10
        connect_timeout_ms = 1000

        [strategy]
        pair = "XBT/USD"
        price_offset = "1"
        price_step = "1"
        sensitivity_min = "1"
        sensitivity_max = "10"
        stop_offset = "2"
        stop_step = "1"
        stop_bias = "0.5"
        ladder_depth = 2
        order_volume = "100"
        pacing_ms = 0

        [strategy.risk]
        min_interval_ms = 0
        "#
    ))
    .unwrap()
}

struct Running {
    mock: Arc<MockExchange>,
    notes: Arc<RecordingNotifier>,
    store: Arc<clotho_strategy::OrderStore>,
    shutdown: CancellationToken,
    handle: JoinHandle<clotho_bot::AppResult<()>>,
}

fn start(config: AppConfig, mock: Arc<MockExchange>) -> Running {
    let notes = Arc::new(RecordingNotifier::new());
    let credentials = Credentials::new(
        "test-key",
        Signer::new("test-secret").unwrap(),
        Arc::new(NonceManager::with_system_clock()),
    );
    let engine = Engine::with_parts(
        config,
        mock.clone(),
        credentials,
        Alerter::new(notes.clone(), "chat"),
    );
    let shutdown = engine.shutdown_token();
    let store = engine.store();
    let handle = tokio::spawn(engine.run());
    Running {
        mock,
        notes,
        store,
        shutdown,
        handle,
    }
}

impl Running {
    async fn stop(self) -> Arc<MockExchange> {
        self.shutdown.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("engine did not stop")
            .unwrap();
        tokio_test::assert_ok!(result);
        self.mock
    }
}

async fn eventually<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn trade_frame(prices: &[&str]) -> String {
    let rows: Vec<String> = prices
        .iter()
        .map(|p| {
            format!(
                r#"{{"timestamp":"2024-01-01T00:00:00.000Z","symbol":"XBTUSD","side":"Buy","size":1,"price":{p}}}"#
            )
        })
        .collect();
    format!(r#"{{"table":"trade","action":"insert","data":[{}]}}"#, rows.join(","))
}

#[tokio::test]
async fn test_startup_retries_cancel_all_then_subscribes() {
    let server = MockWsServer::start().await;
    let mock = Arc::new(MockExchange::new());
    mock.fail_cancel_all(2);
    let running = start(config(&server.url(), ""), mock);

    eventually(|| server.subscribed()).await;
    assert_eq!(running.mock.cancel_all_calls(), 3);

    let received = server.received();
    assert!(received[0].starts_with(r#"{"op":"authKeyExpires","args":["test-key","#));
    assert_eq!(received[1], r#"{"op":"subscribe","args":["position:XBTUSD"]}"#);
    assert_eq!(received[2], r#"{"op":"subscribe","args":["trade:XBTUSD"]}"#);
    assert!(running.notes.contains("WebSocket connected!"));

    let mock = running.stop().await;
    assert_eq!(mock.cancel_all_calls(), 4);
}

#[tokio::test]
async fn test_trade_ticks_build_ladder_and_shutdown_cancels_it() {
    let server = MockWsServer::start().await;
    let running = start(config(&server.url(), ""), Arc::new(MockExchange::new()));
    eventually(|| server.subscribed()).await;

    server.push(trade_frame(&["100", "102"]));

    eventually(|| running.mock.placed().len() == 4).await;

    let placed = running.mock.placed();
    let asks: Vec<_> = placed
        .iter()
        .filter(|c| c.class == OrderClass::Limit)
        .map(|c| (c.order.side, c.order.price.unwrap().inner()))
        .collect();
    assert_eq!(asks, vec![(OrderSide::Ask, dec!(103)), (OrderSide::Ask, dec!(104))]);
    assert!(placed
        .iter()
        .filter(|c| c.class == OrderClass::StopLimit)
        .all(|c| c.order.side == OrderSide::Bid));
    assert_eq!(running.store.len(TrackedKind::Main), 2);
    assert_eq!(running.store.len(TrackedKind::Stop), 2);

    let store = running.store.clone();
    let mock = running.stop().await;
    assert!(mock.live_orders().is_empty());
    assert_eq!(store.total_len(), 0);
    assert!(mock.close_position_calls().is_empty());
}

#[tokio::test]
async fn test_position_frame_closes_profitable_position() {
    let server = MockWsServer::start().await;
    let mock = Arc::new(MockExchange::new());
    mock.set_positions(vec![PositionSnapshot {
        symbol: "XBTUSD".to_string(),
        avg_entry_price: Price::new(dec!(100)),
        current_qty: Size::new(dec!(500000000)),
        unrealised_roe_pcnt: dec!(0.1),
    }]);
    mock.set_ticker(Price::new(dec!(110)));
    mock.set_book(vec![LimitOrder::new(
        OrderSide::Bid,
        Size::new(dec!(2500)),
        CurrencyPair::new("XBT", "USD"),
        Price::new(dec!(109.5)),
    )]);
    let running = start(config(&server.url(), ""), mock);
    eventually(|| server.subscribed()).await;

    server.push(
        r#"{"table":"position","action":"update","data":[
            {"symbol":"XBTUSD","currentQty":500000000,"avgEntryPrice":100,"unrealisedRoePcnt":0.1}
        ]}"#,
    );

    eventually(|| !running.mock.placed().is_empty()).await;

    let close = &running.mock.placed()[0];
    assert_eq!(close.order.side, OrderSide::Ask);
    assert_eq!(close.order.price, Some(Price::new(dec!(109.5))));
    assert_eq!(close.order.amount, Some(Size::new(dec!(2500))));
    assert!(close.params.reduce_only);
    assert!(running.notes.contains("Close position."));

    running.stop().await;
}

#[tokio::test]
async fn test_shutdown_flattens_position_when_configured() {
    let server = MockWsServer::start().await;
    let running = start(
        config(&server.url(), "close_position_on_shutdown = true"),
        Arc::new(MockExchange::new()),
    );
    eventually(|| server.subscribed()).await;

    let mock = running.stop().await;
    assert_eq!(mock.close_position_calls(), vec!["XBTUSD".to_string()]);
}

#[tokio::test]
async fn test_unreachable_feed_engages_failsafe() {
    // Reserve a port, then free it so connections are refused.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = config(&format!("ws://{addr}/realtime"), "");
    config.websocket.max_reconnect_attempts = 1;
    let running = start(config, Arc::new(MockExchange::new()));

    eventually(|| running.notes.contains("WatchDOG: Can not reconnect socket")).await;
    eventually(|| running.mock.cancel_all_calls() >= 2).await;
    assert!(running.notes.contains("WatchDOG: WebSocket reconnect!"));

    running.stop().await;
}

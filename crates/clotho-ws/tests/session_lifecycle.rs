//! Session lifecycle against an in-process WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clotho_exchange::{Credentials, NonceManager, Signer};
use clotho_telemetry::{Alerter, RecordingNotifier};
use clotho_ws::{ConnectionConfig, ConnectionManager, ConnectionState, WsEvent};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

/// Accepts connections, records client frames, and answers the trade
/// subscription with the scripted frames.
struct ScriptedServer {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<String>>>,
}

impl ScriptedServer {
    async fn start(script: Vec<String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let recorded = received.clone();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let recorded = recorded.clone();
                let script = script.clone();
                tokio::spawn(async move {
                    let Ok(ws) = accept_async(stream).await else {
                        return;
                    };
                    let (mut write, mut read) = ws.split();
                    let _ = write
                        .send(Message::Text(r#"{"info":"Welcome"}"#.to_string()))
                        .await;
                    while let Some(Ok(msg)) = read.next().await {
                        if let Message::Text(text) = msg {
                            let trades_subscribed = text.contains(r#""op":"subscribe""#)
                                && text.contains("trade:");
                            recorded.lock().await.push(text);
                            if trades_subscribed {
                                for frame in &script {
                                    let _ = write.send(Message::Text(frame.clone())).await;
                                }
                            }
                        }
                    }
                });
            }
        });

        Self { addr, received }
    }

    fn url(&self) -> String {
        format!("ws://{}/realtime", self.addr)
    }

    async fn received(&self) -> Vec<String> {
        self.received.lock().await.clone()
    }
}

fn manager(
    url: String,
    notifier: Arc<RecordingNotifier>,
) -> (ConnectionManager, mpsc::Receiver<WsEvent>) {
    let (tx, rx) = mpsc::channel(64);
    let credentials = Credentials::new(
        "test-key",
        Signer::new("test-secret").unwrap(),
        Arc::new(NonceManager::with_system_clock()),
    );
    let manager = ConnectionManager::new(
        ConnectionConfig::new(url, "XBTUSD"),
        credentials,
        tx,
        Alerter::new(notifier, "chat"),
        CancellationToken::new(),
    );
    (manager, rx)
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_session_authenticates_subscribes_and_forwards_trades() {
    let trade = r#"{"table":"trade","action":"insert","data":[
        {"timestamp":"2020-01-01T00:00:00.000Z","symbol":"XBTUSD","side":"Buy","size":1,"price":100},
        {"timestamp":"2020-01-01T00:00:00.100Z","symbol":"XBTUSD","side":"Buy","size":1,"price":101}
    ]}"#;
    let server = ScriptedServer::start(vec![trade.to_string()]).await;
    let notifier = Arc::new(RecordingNotifier::new());
    let (manager, mut events) = manager(server.url(), notifier.clone());

    manager.spawn_session();

    let first = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    let second = events.recv().await.unwrap();
    match (first, second) {
        (WsEvent::Trade(a), WsEvent::Trade(b)) => {
            assert_eq!(a.price.to_string(), "100");
            assert_eq!(b.price.to_string(), "101");
        }
        other => panic!("unexpected events {other:?}"),
    }
    assert_eq!(manager.state(), ConnectionState::Opened);

    let received = server.received().await;
    assert_eq!(received.len(), 3);
    assert!(received[0].starts_with(r#"{"op":"authKeyExpires","args":["test-key","#));
    assert_eq!(received[1], r#"{"op":"subscribe","args":["position:XBTUSD"]}"#);
    assert_eq!(received[2], r#"{"op":"subscribe","args":["trade:XBTUSD"]}"#);
    assert!(notifier.contains("WebSocket connected!"));

    manager.shutdown().await;
    assert_eq!(manager.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_error_frame_closes_session() {
    let server =
        ScriptedServer::start(vec![r#"{"status":401,"error":"Signature not valid."}"#.to_string()])
            .await;
    let notifier = Arc::new(RecordingNotifier::new());
    let (manager, _events) = manager(server.url(), notifier.clone());

    manager.spawn_session();
    let n = notifier.clone();
    wait_until(move || n.contains("WebSocket was closed")).await;

    assert_eq!(manager.state(), ConnectionState::Closed);
    assert!(notifier.contains("WebSocket connected!"));
}

#[tokio::test]
async fn test_position_frame_forwarded() {
    let position = r#"{"table":"position","action":"update","data":[
        {"symbol":"XBTUSD","currentQty":10,"avgEntryPrice":100,"unrealisedRoePcnt":0.1}
    ]}"#;
    let server = ScriptedServer::start(vec![position.to_string()]).await;
    let (manager, mut events) = manager(server.url(), Arc::new(RecordingNotifier::new()));

    manager.spawn_session();
    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, WsEvent::Position(ref p) if p.len() == 1));

    manager.shutdown().await;
}

#[tokio::test]
async fn test_force_close_marks_closed_and_notifies() {
    let server = ScriptedServer::start(Vec::new()).await;
    let notifier = Arc::new(RecordingNotifier::new());
    let (manager, _events) = manager(server.url(), notifier.clone());

    manager.spawn_session();
    let m = manager.clone();
    wait_until(move || m.state() == ConnectionState::Opened).await;

    manager.force_close();
    assert_eq!(manager.state(), ConnectionState::Closed);
    let n = notifier.clone();
    wait_until(move || n.contains("WebSocket was closed")).await;

    manager.shutdown().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let closed_alerts = notifier
        .messages()
        .iter()
        .filter(|m| m.contains("WebSocket was closed"))
        .count();
    assert_eq!(closed_alerts, 1);
}

#[tokio::test]
async fn test_undecodable_frame_skipped_and_session_stays_open() {
    let trade = r#"{"table":"trade","action":"insert","data":[
        {"timestamp":"2020-01-01T00:00:00.000Z","symbol":"XBTUSD","side":"Sell","size":5,"price":99.5}
    ]}"#;
    let server = ScriptedServer::start(vec!["not json".to_string(), trade.to_string()]).await;
    let notifier = Arc::new(RecordingNotifier::new());
    let (manager, mut events) = manager(server.url(), notifier.clone());

    manager.spawn_session();
    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();

    assert!(matches!(event, WsEvent::Trade(ref t) if t.price.to_string() == "99.5"));
    assert_eq!(manager.state(), ConnectionState::Opened);
    assert!(!notifier.contains("WebSocket was closed"));

    manager.shutdown().await;
}

//! Mock realtime server for integration tests.
//!
//! Accepts connections, records every client text frame, and once a client
//! has subscribed forwards whatever the test pushes.
//! `subscribed()` turns true with the trade subscription, the last one sent.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::{accept_async, tungstenite::Message};

pub struct MockWsServer {
    addr: SocketAddr,
    frames: broadcast::Sender<String>,
    received: Arc<Mutex<Vec<String>>>,
}

impl MockWsServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (frames, _) = broadcast::channel(64);
        let received = Arc::new(Mutex::new(Vec::new()));

        let frames_tx = frames.clone();
        let recorded = received.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(handle_connection(stream, frames_tx.clone(), recorded.clone()));
            }
        });

        Self {
            addr,
            frames,
            received,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/realtime", self.addr)
    }

    /// Sends `frame` to every subscribed client.
    pub fn push(&self, frame: impl Into<String>) {
        let _ = self.frames.send(frame.into());
    }

    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    pub fn subscribed(&self) -> bool {
        self.received
            .lock()
            .unwrap()
            .iter()
            .any(|m| m.contains(r#""op":"subscribe""#) && m.contains("trade:"))
    }
}

async fn handle_connection(
    stream: TcpStream,
    frames: broadcast::Sender<String>,
    received: Arc<Mutex<Vec<String>>>,
) {
    let Ok(ws) = accept_async(stream).await else {
        return;
    };
    let (mut write, mut read) = ws.split();
    let _ = write
        .send(Message::Text(r#"{"info":"Welcome to the mock realtime API"}"#.to_string()))
        .await;

    let mut outbound: Option<broadcast::Receiver<String>> = None;
    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if text.contains(r#""op":"subscribe""#) && outbound.is_none() {
                            outbound = Some(frames.subscribe());
                        }
                        received.lock().unwrap().push(text);
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                    Some(Ok(_)) => {}
                }
            }
            frame = async {
                match outbound.as_mut() {
                    Some(rx) => rx.recv().await.ok(),
                    None => std::future::pending().await,
                }
            } => {
                if let Some(frame) = frame {
                    if write.send(Message::Text(frame)).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use assassin_api::config::Config;
use assassin_api::AppState;

/// How long a test waits for an expected frame before failing.
const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Build state with the defaults, overriding the kill window.
pub fn test_state(kill_window: Duration) -> AppState {
    AppState::new(Config {
        kill_window,
        ..Config::default()
    })
}

pub fn test_app(state: &AppState) -> Router {
    assassin_api::routes::router().with_state(state.clone())
}

/// Start an actual TCP server for WebSocket testing. The server runs in the
/// background for the rest of the test.
pub async fn start_server(state: &AppState) -> SocketAddr {
    let app = test_app(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

/// A gateway client that buffers frames it has not been asked for yet, so
/// tests can wait for events in any order.
pub struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    pending: Vec<Value>,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let url = format!("ws://{addr}/ws");
        let (ws, _) = tokio_tungstenite::connect_async(&url)
            .await
            .expect("ws connect");
        Self {
            ws,
            pending: Vec::new(),
        }
    }

    pub async fn send(&mut self, event: &str, data: Value) {
        let frame = serde_json::json!({ "t": event, "d": data });
        self.send_raw(&frame.to_string()).await;
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.ws
            .send(tungstenite::Message::Text(text.to_string().into()))
            .await
            .expect("ws send");
    }

    /// Wait for the next frame named `event` and return its payload.
    pub async fn expect(&mut self, event: &str) -> Value {
        if let Some(pos) = self.pending.iter().position(|m| m["t"] == event) {
            let mut frame = self.pending.remove(pos);
            return frame["d"].take();
        }
        loop {
            let frame = self
                .next_frame(RECV_TIMEOUT)
                .await
                .unwrap_or_else(|| panic!("timed out waiting for {event}"));
            if frame["t"] == event {
                return frame["d"].clone();
            }
            self.pending.push(frame);
        }
    }

    /// Assert no frame named `event` arrives within `within`.
    pub async fn expect_none(&mut self, event: &str, within: Duration) {
        assert!(
            !self.pending.iter().any(|m| m["t"] == event),
            "unexpected buffered {event}"
        );
        let deadline = time::Instant::now() + within;
        loop {
            let remaining = deadline.saturating_duration_since(time::Instant::now());
            if remaining.is_zero() {
                return;
            }
            match self.next_frame(remaining).await {
                Some(frame) => {
                    assert_ne!(frame["t"], event, "unexpected {event}: {frame}");
                    self.pending.push(frame);
                }
                None => return,
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }

    async fn next_frame(&mut self, within: Duration) -> Option<Value> {
        loop {
            let msg = match time::timeout(within, self.ws.next()).await {
                Ok(Some(msg)) => msg.expect("ws read error"),
                Ok(None) | Err(_) => return None,
            };
            if let tungstenite::Message::Text(text) = msg {
                return Some(serde_json::from_str(text.as_str()).expect("parse frame"));
            }
        }
    }
}

/// A seated player: their connection plus the identity the server issued.
pub struct Seat {
    pub client: TestClient,
    pub name: String,
    pub session_id: String,
}

/// Create a lobby hosted by `host` and seat every guest. Returns the lobby
/// code and the seats, host first.
pub async fn seat_players(addr: SocketAddr, host: &str, guests: &[&str]) -> (String, Vec<Seat>) {
    let mut client = TestClient::connect(addr).await;
    client
        .send("create-lobby", serde_json::json!({ "playerName": host }))
        .await;
    let created = client.expect("lobby-created").await;
    let code = created["code"].as_str().unwrap().to_string();
    let mut seats = vec![Seat {
        client,
        name: host.to_string(),
        session_id: created["sessionId"].as_str().unwrap().to_string(),
    }];

    for guest in guests {
        let mut client = TestClient::connect(addr).await;
        client
            .send(
                "join-lobby",
                serde_json::json!({ "code": code, "playerName": guest }),
            )
            .await;
        let joined = client.expect("lobby-joined").await;
        seats.push(Seat {
            client,
            name: guest.to_string(),
            session_id: joined["sessionId"].as_str().unwrap().to_string(),
        });
    }

    (code, seats)
}

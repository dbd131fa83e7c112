//! Reconnect-idempotence integration test for `PeerTransport::start`'s
//! `drive_reconnect_loop`: a real axum-backed mock relay answers
//! register/challenge/login over HTTP, then refuses the first websocket
//! upgrade outright so the reconnect loop has to back off, re-login, and
//! retry before a message queued before the first attempt is forwarded.
//! Grounded on `connection_roundtrip.rs`'s real-socket-over-`127.0.0.1:0`
//! pattern, extended to the relay's HTTP surface with `axum` (already the
//! workspace's web framework) standing in for the relay.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use dk_crypto::Identity;
use dk_directory::{HttpRelayKeyFetcher, PeerDirectory};
use dk_transport::{PeerTransport, RemoteMessage, VerificationTag};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct RelayState {
    ws_attempts: Arc<AtomicUsize>,
}

async fn register() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

#[derive(Deserialize)]
struct UserIdQuery {
    #[allow(dead_code)]
    user_id: String,
}

async fn challenge(Query(_q): Query<UserIdQuery>) -> impl IntoResponse {
    Json(json!({ "challenge": "test-challenge" }))
}

async fn login() -> impl IntoResponse {
    Json(json!({ "token": "test-token" }))
}

/// First upgrade attempt is refused outright (503, no 101 handshake at
/// all) so the client's `connect_ws` fails without ever reading a frame;
/// the second attempt upgrades and echoes exactly one frame back.
async fn ws_handler(State(state): State<RelayState>, ws: WebSocketUpgrade) -> Response {
    let attempt = state.ws_attempts.fetch_add(1, Ordering::SeqCst);
    if attempt == 0 {
        return (StatusCode::SERVICE_UNAVAILABLE, "simulated relay drop").into_response();
    }
    ws.on_upgrade(handle_socket)
}

async fn handle_socket(mut socket: WebSocket) {
    if let Some(Ok(WsMessage::Text(text))) = socket.recv().await {
        let _ = socket.send(WsMessage::Text(text)).await;
    }
}

#[tokio::test]
async fn queued_message_survives_a_failed_connect_and_is_forwarded_after_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let state = RelayState::default();
    let app = Router::new()
        .route("/register", post(register))
        .route("/challenge", get(challenge))
        .route("/login", post(login))
        .route("/ws", get(ws_handler))
        .with_state(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let identity = Arc::new(Identity::generate("alice").unwrap());
    let directory = Arc::new(PeerDirectory::new(Arc::new(HttpRelayKeyFetcher::new("http://unused.invalid"))));
    let transport = PeerTransport::new(
        "alice",
        format!("http://{addr}"),
        format!("ws://{addr}/ws"),
        identity,
        directory,
    );

    // Queue this before the reconnect loop ever starts: it must survive the
    // first (refused) connect attempt and ride along on the second.
    transport
        .broadcast_message(&RemoteMessage::System { signal: "ping".to_string() })
        .await
        .unwrap();

    transport.clone().start().await.unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(15), transport.recv_frame())
        .await
        .expect("reconnect loop never delivered the queued message");

    assert_eq!(frame.tag, VerificationTag::System);
    assert_eq!(frame.remote, Some(RemoteMessage::System { signal: "ping".to_string() }));
}

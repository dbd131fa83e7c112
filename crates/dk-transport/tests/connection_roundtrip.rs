//! Drives `connection::run_connection` against a real local WebSocket
//! server (no mock relay), confirming frames placed on the outbound channel
//! reach the server and frames from the server land in the inbound buffer.
//! Grounded on `ambient-node/src/gateway.rs`'s pattern of binding real
//! `127.0.0.1:0` listeners in `#[tokio::test]`s rather than mocking the
//! socket layer.

use std::sync::Arc;

use dk_transport::channel::DropOldestChannel;
use dk_transport::connection::run_connection;
use dk_transport::message::Message;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

fn sample_message(content: &str) -> Message {
    Message {
        id: None,
        from: "alice".to_string(),
        to: "bob".to_string(),
        timestamp: chrono::Utc::now().timestamp(),
        content: content.to_string(),
        status: None,
        signature: "sig".to_string(),
    }
}

#[tokio::test]
async fn frames_flow_both_directions_over_a_real_socket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        let (mut write, mut read) = ws.split();

        // Echo exactly one client frame back, then push one server-origin
        // frame, then close.
        if let Some(Ok(WsMessage::Text(text))) = read.next().await {
            write.send(WsMessage::Text(text)).await.unwrap();
        }
        let server_origin = sample_message("from the relay");
        write
            .send(WsMessage::Text(serde_json::to_string(&server_origin).unwrap()))
            .await
            .unwrap();
        write.send(WsMessage::Close(None)).await.unwrap();
    });

    let (client_stream, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .unwrap();

    let (outbound_tx, outbound_rx) = mpsc::channel(8);
    let inbound = DropOldestChannel::new(8);

    outbound_tx.send(sample_message("hello relay")).await.unwrap();
    drop(outbound_tx);

    let inbound_for_connection = inbound.clone();
    let connection_result = run_connection(client_stream, outbound_rx, inbound_for_connection).await;
    server.await.unwrap();

    // The connection ends when the server closes the stream; that is
    // reported as an error by design (the caller reconnects).
    assert!(connection_result.is_err());

    let first = inbound.recv().await;
    assert_eq!(first.content, "hello relay");
    let second = inbound.recv().await;
    assert_eq!(second.content, "from the relay");
}

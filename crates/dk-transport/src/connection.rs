//! A single live relay connection: reader/writer/keepalive tasks over one
//! WebSocket stream. Reconnection across drops is `transport::PeerTransport`'s
//! job; this module only knows how to run one connection until it dies.
//!
//! Grounded on `ambient-node/src/gateway.rs`'s tokio TCP idioms (timeouts,
//! spawned reader/writer halves, `tokio::time::timeout` deadlines).

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::channel::DropOldestChannel;
use crate::error::{TransportError, TransportResult};
use crate::message::Message;

const SEND_DEADLINE: Duration = Duration::from_secs(10);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(54);
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Open the WebSocket stream to the relay's `/stream` endpoint with the
/// bearer token from login (spec.md §6).
pub async fn connect_ws(
    ws_url: &str,
    token: &str,
) -> TransportResult<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
> {
    let mut request = ws_url
        .into_client_request()
        .map_err(|e| TransportError::Connect(e.to_string()))?;
    request.headers_mut().insert(
        "Authorization",
        format!("Bearer {token}")
            .parse()
            .map_err(|_| TransportError::Connect("invalid token header".into()))?,
    );

    let (stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| TransportError::Connect(e.to_string()))?;
    Ok(stream)
}

/// Drive one live connection until it fails. Returns when the reader,
/// writer, or keepalive task observes a fatal error; the caller then
/// reconnects.
pub async fn run_connection(
    stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    mut outbound_rx: mpsc::Receiver<Message>,
    inbound: Arc<DropOldestChannel<Message>>,
) -> anyhow::Result<()> {
    let (write, mut read) = stream.split();
    let write = Arc::new(AsyncMutex::new(write));
    let last_activity = Arc::new(AtomicI64::new(now_millis()));

    let reader_activity = last_activity.clone();
    let reader = async move {
        while let Some(frame) = read.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => {
                    reader_activity.store(now_millis(), Ordering::Relaxed);
                    match serde_json::from_str::<Message>(&text) {
                        Ok(message) => inbound.push(message).await,
                        Err(err) => tracing::warn!(error = %err, "dropping malformed inbound frame"),
                    }
                }
                Ok(WsMessage::Pong(_)) | Ok(WsMessage::Ping(_)) => {
                    reader_activity.store(now_millis(), Ordering::Relaxed);
                }
                Ok(WsMessage::Close(_)) => {
                    anyhow::bail!("relay closed the stream");
                }
                Ok(_) => {}
                Err(err) => anyhow::bail!("relay stream read error: {err}"),
            }
        }
        anyhow::bail!("relay stream ended")
    };

    let writer_sink = write.clone();
    let writer = async move {
        while let Some(message) = outbound_rx.recv().await {
            let payload = serde_json::to_string(&message)?;
            let mut sink = writer_sink.lock().await;
            timeout(SEND_DEADLINE, sink.send(WsMessage::Text(payload)))
                .await
                .map_err(|_| anyhow::anyhow!("send deadline exceeded"))??;
        }
        Ok::<(), anyhow::Error>(())
    };

    let keepalive_activity = last_activity.clone();
    let keepalive_sink = write.clone();
    let keepalive = async move {
        let mut interval = tokio::time::interval(KEEPALIVE_INTERVAL);
        loop {
            interval.tick().await;
            let idle_for = now_millis() - keepalive_activity.load(Ordering::Relaxed);
            if idle_for > IDLE_TIMEOUT.as_millis() as i64 {
                anyhow::bail!("no activity from relay within idle timeout");
            }
            let mut sink = keepalive_sink.lock().await;
            sink.send(WsMessage::Ping(Vec::new())).await?;
        }
    };

    tokio::select! {
        result = reader => result,
        result = writer => result,
        result = keepalive => result,
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

//! Public transport facade (spec.md §4.2, C3): register/login/connect,
//! send/broadcast, and the verify-then-tag receive path, all wrapped in an
//! exponential-backoff reconnect loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dk_crypto::envelope::{self, EncryptedEnvelope};
use dk_crypto::Identity;
use dk_directory::PeerDirectory;
use rand::Rng;
use tokio::sync::{mpsc, RwLock};

use crate::channel::DropOldestChannel;
use crate::connection::{connect_ws, run_connection};
use crate::error::{TransportError, TransportResult};
use crate::handshake::RelayClient;
use crate::message::{InboundFrame, Message, RemoteMessage, VerificationTag};

const INBOUND_BUFFER: usize = 100;
const OUTBOUND_BUFFER: usize = 100;
const BACKOFF_START: Duration = Duration::from_secs(5);
const BACKOFF_CAP: Duration = Duration::from_secs(60);
/// Replay window (spec.md §3 `Message` invariant: "timestamp within ±N
/// minutes of local clock to be accepted").
const REPLAY_WINDOW_SECONDS: i64 = 5 * 60;

pub struct PeerTransport {
    user_id: String,
    identity: Arc<Identity>,
    directory: Arc<PeerDirectory>,
    relay: RelayClient,
    ws_url: String,
    outbound_tx: mpsc::Sender<Message>,
    outbound_rx: AsyncMutexOption<mpsc::Receiver<Message>>,
    inbound: Arc<DropOldestChannel<Message>>,
    token: RwLock<Option<String>>,
    running: AtomicBool,
}

// Plain wrapper so `PeerTransport` stays `Sync`: the outbound receiver is
// taken exactly once by the connection-maintaining task.
type AsyncMutexOption<T> = tokio::sync::Mutex<Option<T>>;

impl PeerTransport {
    pub fn new(
        user_id: impl Into<String>,
        relay_base_url: impl Into<String>,
        ws_url: impl Into<String>,
        identity: Arc<Identity>,
        directory: Arc<PeerDirectory>,
    ) -> Arc<Self> {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        Arc::new(Self {
            user_id: user_id.into(),
            identity,
            directory,
            relay: RelayClient::new(relay_base_url),
            ws_url: ws_url.into(),
            outbound_tx,
            outbound_rx: tokio::sync::Mutex::new(Some(outbound_rx)),
            inbound: DropOldestChannel::new(INBOUND_BUFFER),
            token: RwLock::new(None),
            running: AtomicBool::new(false),
        })
    }

    pub fn dropped_inbound_total(&self) -> u64 {
        self.inbound.dropped_total()
    }

    /// Register and log in once, then spawn the reconnect-driving task.
    /// Returns immediately; callers pull frames with [`Self::recv_frame`].
    ///
    /// Takes `self` by `Arc` (callers hold `Arc<PeerTransport>` already and
    /// should pass `transport.clone().start()`) so the spawned reconnect
    /// task can hold its own strong reference.
    pub async fn start(self: Arc<Self>) -> TransportResult<()> {
        self.relay.register(&self.user_id, &self.identity).await?;
        self.running.store(true, Ordering::SeqCst);

        let outbound_rx = self
            .outbound_rx
            .lock()
            .await
            .take()
            .expect("start() called more than once");

        let this = self.clone();
        tokio::spawn(async move { this.drive_reconnect_loop(outbound_rx).await });
        Ok(())
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    async fn drive_reconnect_loop(self: Arc<Self>, mut outbound_rx: mpsc::Receiver<Message>) {
        let mut backoff = BACKOFF_START;

        while self.running.load(Ordering::SeqCst) {
            match self.relay.login(&self.user_id, &self.identity).await {
                Ok(token) => {
                    *self.token.write().await = Some(token.clone());
                    backoff = BACKOFF_START;

                    match connect_ws(&self.ws_url, &token).await {
                        Ok(stream) => {
                            tracing::info!(user_id = %self.user_id, "connected to relay stream");
                            let (local_tx, local_rx) = mpsc::channel(OUTBOUND_BUFFER);

                            // Drain whatever is queued while we were
                            // disconnected into this connection's writer.
                            let forwarder = forward_pending(&mut outbound_rx, local_tx.clone());
                            let result =
                                tokio::select! {
                                    r = run_connection(stream, local_rx, self.inbound.clone()) => r,
                                    _ = forwarder => Ok(()),
                                };
                            if let Err(err) = result {
                                tracing::warn!(error = %err, "relay connection dropped, reconnecting");
                            }
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "relay stream connect failed");
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "relay login failed");
                }
            }

            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..500));
            tokio::time::sleep(backoff + jitter).await;
            backoff = (backoff * 2).min(BACKOFF_CAP);
        }
    }

    /// `SendMessage(to, content)`: sealed-box encrypt for a direct peer,
    /// sign the wire envelope, enqueue for the writer task.
    pub async fn send_message(&self, to: &str, content: &RemoteMessage) -> TransportResult<()> {
        let content_json = serde_json::to_vec(content).map_err(|e| TransportError::Network(e.into()))?;

        let recipient_key = self
            .directory
            .resolve(to)
            .await
            .map_err(|e| TransportError::Network(anyhow::anyhow!(e)))?;
        let envelope = envelope::encrypt(&recipient_key, &content_json)
            .map_err(|e| TransportError::Network(anyhow::anyhow!(e)))?;
        let envelope_json =
            serde_json::to_string(&envelope).map_err(|e| TransportError::Network(e.into()))?;

        let message = self.build_signed_message(to, envelope_json)?;
        self.enqueue(message).await
    }

    /// `BroadcastMessage(content)`: signed, unencrypted, `to == ""`.
    pub async fn broadcast_message(&self, content: &RemoteMessage) -> TransportResult<()> {
        let content_json =
            serde_json::to_string(content).map_err(|e| TransportError::Network(e.into()))?;
        let message = self.build_signed_message("", content_json)?;
        self.enqueue(message).await
    }

    fn build_signed_message(&self, to: &str, content: String) -> TransportResult<Message> {
        let timestamp = chrono::Utc::now().timestamp();
        let unsigned = Message {
            id: None,
            from: self.user_id.clone(),
            to: to.to_string(),
            timestamp,
            content,
            status: None,
            signature: String::new(),
        };
        let keypair = self
            .identity
            .keypair()
            .map_err(|e| TransportError::Network(anyhow::anyhow!(e)))?;
        let signature = keypair.sign(&unsigned.signable_bytes());
        Ok(Message {
            signature: base64::Engine::encode(&base64::engine::general_purpose::STANDARD, signature.as_ref()),
            ..unsigned
        })
    }

    async fn enqueue(&self, message: Message) -> TransportResult<()> {
        tokio::time::timeout(Duration::from_secs(10), self.outbound_tx.send(message))
            .await
            .map_err(|_| TransportError::SendTimeout)?
            .map_err(|_| TransportError::NotConnected)
    }

    /// Pull the next already-enqueued outbound message without a running
    /// reconnect loop. Exposed (like [`Self::tag_and_decode`]) so tests can
    /// verify `send_message`/`broadcast_message` actually queued a frame
    /// without needing a live relay connection.
    pub async fn try_recv_outbound(&self) -> Option<Message> {
        self.outbound_rx.lock().await.as_mut()?.try_recv().ok()
    }

    /// Pull the next raw frame and run the receive-path tagging/decryption
    /// described in spec.md §4.2.
    pub async fn recv_frame(&self) -> InboundFrame {
        let message = self.inbound.recv().await;
        self.tag_and_decode(message).await
    }

    /// Verify, replay-check, and decrypt a raw wire frame into an
    /// [`InboundFrame`]. Exposed (not just used internally by
    /// [`Self::recv_frame`]) so tests can exercise the receive path without
    /// a live relay connection.
    pub async fn tag_and_decode(&self, message: Message) -> InboundFrame {
        // A system frame's content is unsigned, unencrypted RemoteMessage
        // JSON; bypasses verification entirely.
        if let Ok(RemoteMessage::System { signal }) = serde_json::from_str::<RemoteMessage>(&message.content) {
            return InboundFrame {
                message,
                tag: VerificationTag::System,
                remote: Some(RemoteMessage::System { signal }),
            };
        }

        if message.signature.is_empty() {
            return InboundFrame {
                message,
                tag: VerificationTag::Unsigned,
                remote: None,
            };
        }

        let signature_bytes = match base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &message.signature) {
            Ok(bytes) => bytes,
            Err(_) => {
                return InboundFrame {
                    message,
                    tag: VerificationTag::InvalidSignature,
                    remote: None,
                }
            }
        };

        let signing_key = match self.directory.resolve(&message.from).await {
            Ok(key) => key,
            Err(_) => {
                return InboundFrame {
                    message,
                    tag: VerificationTag::InvalidSignature,
                    remote: None,
                }
            }
        };

        if !dk_crypto::verify_with_public_key(&signing_key, &message.signable_bytes(), &signature_bytes) {
            return InboundFrame {
                message,
                tag: VerificationTag::InvalidSignature,
                remote: None,
            };
        }

        let clock_skew = (chrono::Utc::now().timestamp() - message.timestamp).abs();
        if clock_skew > REPLAY_WINDOW_SECONDS {
            tracing::warn!(%clock_skew, from = %message.from, "rejecting message outside the replay window");
            return InboundFrame {
                message,
                tag: VerificationTag::InvalidSignature,
                remote: None,
            };
        }

        if message.to.is_empty() {
            // Broadcast: content is plaintext RemoteMessage JSON.
            let remote = serde_json::from_str::<RemoteMessage>(&message.content).ok();
            return InboundFrame {
                message,
                tag: VerificationTag::Verified,
                remote,
            };
        }

        // Direct message: content is a JSON-encoded EncryptedEnvelope.
        let envelope = match serde_json::from_str::<EncryptedEnvelope>(&message.content) {
            Ok(envelope) => envelope,
            Err(_) => {
                return InboundFrame {
                    message,
                    tag: VerificationTag::DecryptionFailed,
                    remote: None,
                }
            }
        };

        match envelope::decrypt(self.identity.encryption_secret(), &envelope) {
            Ok(plaintext) => {
                let remote = serde_json::from_slice::<RemoteMessage>(&plaintext).ok();
                InboundFrame {
                    message,
                    tag: VerificationTag::Verified,
                    remote,
                }
            }
            Err(_) => InboundFrame {
                message,
                tag: VerificationTag::DecryptionFailed,
                remote: None,
            },
        }
    }
}

async fn forward_pending(outbound_rx: &mut mpsc::Receiver<Message>, local_tx: mpsc::Sender<Message>) {
    while let Some(message) = outbound_rx.recv().await {
        if local_tx.send(message).await.is_err() {
            break;
        }
    }
}

//! Secure peer transport (spec.md C3): relay handshake, signed/encrypted
//! full-duplex stream, auto-reconnect with backoff.

pub mod channel;
pub mod connection;
pub mod error;
pub mod handshake;
pub mod message;
pub mod transport;

pub use error::{TransportError, TransportResult};
pub use handshake::RelayClient;
pub use message::{InboundFrame, Message, RemoteMessage, VerificationTag};
pub use transport::PeerTransport;

#[cfg(test)]
mod tests {
    use super::*;
    use dk_crypto::Identity;
    use dk_directory::{PeerDirectory, RelayKeyFetcher};
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::RwLock;

    /// Directory fetcher backed by an in-test map instead of a real relay
    /// round trip, since `dk-directory`'s coalescing behavior is already
    /// covered in its own crate.
    struct StaticFetcher {
        keys: RwLock<HashMap<String, Vec<u8>>>,
    }

    #[async_trait::async_trait]
    impl RelayKeyFetcher for StaticFetcher {
        async fn fetch_signing_key(&self, user_id: &str) -> anyhow::Result<Vec<u8>> {
            self.keys
                .read()
                .await
                .get(user_id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("unknown user {user_id}"))
        }
    }

    #[tokio::test]
    async fn signed_broadcast_round_trips_through_tag_and_decode() {
        let alice = Arc::new(Identity::generate("alice").unwrap());
        let bob = Identity::generate("bob").unwrap();

        let fetcher = Arc::new(StaticFetcher {
            keys: RwLock::new(HashMap::new()),
        });
        fetcher
            .keys
            .write()
            .await
            .insert("alice".to_string(), alice.signing_public_key().to_vec());
        let directory = Arc::new(PeerDirectory::new(fetcher));

        let transport = PeerTransport::new(
            "bob",
            "http://unused.invalid",
            "ws://unused.invalid",
            Arc::new(bob),
            directory,
        );

        // Build the same kind of signed broadcast frame `send_message`
        // would produce, without needing a live relay connection.
        let content = RemoteMessage::Query {
            message: "what is 2+2?".to_string(),
        };
        let content_json = serde_json::to_string(&content).unwrap();
        let timestamp = chrono::Utc::now().timestamp();
        let unsigned = Message {
            id: None,
            from: "alice".to_string(),
            to: String::new(),
            timestamp,
            content: content_json,
            status: None,
            signature: String::new(),
        };
        let keypair = alice.keypair().unwrap();
        let signature = keypair.sign(&unsigned.signable_bytes());
        let signed = Message {
            signature: base64::Engine::encode(
                &base64::engine::general_purpose::STANDARD,
                signature.as_ref(),
            ),
            ..unsigned
        };

        let frame = transport.tag_and_decode(signed).await;
        assert_eq!(frame.tag, VerificationTag::Verified);
        assert!(matches!(frame.remote, Some(RemoteMessage::Query { .. })));
    }
}

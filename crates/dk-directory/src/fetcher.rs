//! The relay lookup used on a directory cache miss. Kept as a trait so
//! `dk-directory` has no hard dependency on `dk-transport`'s connection
//! lifecycle — only on the relay's stateless `GET /users/:id/public_key`
//! endpoint (spec.md §6).

use anyhow::Context;
use async_trait::async_trait;

/// Resolves a user's durable Ed25519 signing public key from the relay.
#[async_trait]
pub trait RelayKeyFetcher: Send + Sync {
    async fn fetch_signing_key(&self, user_id: &str) -> anyhow::Result<Vec<u8>>;
}

/// Default implementation backed by a `reqwest::Client` against the relay's
/// REST surface.
pub struct HttpRelayKeyFetcher {
    client: reqwest::Client,
    relay_base_url: String,
}

impl HttpRelayKeyFetcher {
    pub fn new(relay_base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            relay_base_url: relay_base_url.into(),
        }
    }
}

#[derive(serde::Deserialize)]
struct PublicKeyResponse {
    public_key_pem: String,
}

#[async_trait]
impl RelayKeyFetcher for HttpRelayKeyFetcher {
    async fn fetch_signing_key(&self, user_id: &str) -> anyhow::Result<Vec<u8>> {
        let url = format!("{}/users/{}/public_key", self.relay_base_url, user_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("relay public_key request failed")?
            .error_for_status()
            .context("relay returned an error status for public_key lookup")?;

        let body: PublicKeyResponse = response
            .json()
            .await
            .context("relay public_key response was not valid JSON")?;

        dk_crypto::identity::pem_to_raw_public_key(&body.public_key_pem)
            .context("relay returned a malformed public key PEM")
    }
}

//! Relay handshake (spec.md §4.2, §6): `Register` / `Login` / `Connect`.

use dk_crypto::identity::raw_public_key_to_pem;
use dk_crypto::Identity;
use serde::Deserialize;

use crate::error::{TransportError, TransportResult};

#[derive(Deserialize)]
struct RegisterResponse {
    #[allow(dead_code)]
    ok: Option<bool>,
}

#[derive(Deserialize)]
struct ChallengeResponse {
    challenge: String,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

/// Thin REST client against the relay's register/challenge/login endpoints
/// (spec.md §6). The long-lived stream itself is opened separately via
/// `connection::connect_stream`.
pub struct RelayClient {
    http: reqwest::Client,
    base_url: String,
}

impl RelayClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `POST /register {user_id, public_key_pem}`. Idempotent: a 409
    /// ("already registered") is treated as success.
    pub async fn register(&self, user_id: &str, identity: &Identity) -> TransportResult<()> {
        let public_key_pem = raw_public_key_to_pem(identity.signing_public_key());
        let response = self
            .http
            .post(format!("{}/register", self.base_url))
            .json(&serde_json::json!({ "user_id": user_id, "public_key_pem": public_key_pem }))
            .send()
            .await
            .map_err(|e| TransportError::Register(e.to_string()))?;

        if response.status() == reqwest::StatusCode::CONFLICT {
            tracing::info!(%user_id, "relay reports this node is already registered");
            return Ok(());
        }
        if !response.status().is_success() {
            return Err(TransportError::Register(format!(
                "relay returned status {}",
                response.status()
            )));
        }
        let _: RegisterResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Register(e.to_string()))?;
        Ok(())
    }

    /// `GET /challenge` then `POST /login` with the signed challenge,
    /// returning a bearer token.
    pub async fn login(&self, user_id: &str, identity: &Identity) -> TransportResult<String> {
        let challenge_response = self
            .http
            .get(format!("{}/challenge", self.base_url))
            .query(&[("user_id", user_id)])
            .send()
            .await
            .map_err(|e| TransportError::Login(e.to_string()))?
            .error_for_status()
            .map_err(|e| TransportError::Login(e.to_string()))?;

        let challenge: ChallengeResponse = challenge_response
            .json()
            .await
            .map_err(|e| TransportError::Login(e.to_string()))?;

        let keypair = identity
            .keypair()
            .map_err(|e| TransportError::Login(e.to_string()))?;
        let raw_signature = dk_crypto::envelope::sign(&keypair, challenge.challenge.as_bytes());
        let signature_b64 =
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &raw_signature.signature);

        let login_response = self
            .http
            .post(format!("{}/login", self.base_url))
            .json(&serde_json::json!({ "user_id": user_id, "signature": signature_b64 }))
            .send()
            .await
            .map_err(|e| TransportError::Login(e.to_string()))?
            .error_for_status()
            .map_err(|e| TransportError::Login(e.to_string()))?;

        let login: LoginResponse = login_response
            .json()
            .await
            .map_err(|e| TransportError::Login(e.to_string()))?;

        Ok(login.token)
    }
}

//! Wire types (spec.md §3 `Message`, `RemoteMessage`).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The wire envelope every frame is carried in. `signature` covers a
/// canonicalized serialization of `{from,to,timestamp,content}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub from: String,
    /// Empty string means broadcast.
    pub to: String,
    pub timestamp: i64,
    /// Either a UTF-8 JSON payload, or a JSON-encoded `EncryptedEnvelope`.
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub signature: String,
}

/// The exact fields covered by `signature`, serialized in this fixed field
/// order so signing and verification canonicalize identically.
#[derive(Serialize)]
pub struct SignablePayload<'a> {
    pub from: &'a str,
    pub to: &'a str,
    pub timestamp: i64,
    pub content: &'a str,
}

impl Message {
    pub fn signable_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&SignablePayload {
            from: &self.from,
            to: &self.to,
            timestamp: self.timestamp,
            content: &self.content,
        })
        .expect("signable payload is always serializable")
    }
}

/// Tagged union over application payloads (spec.md §3 `RemoteMessage`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RemoteMessage {
    Query {
        message: String,
    },
    Answer {
        query: String,
        answer: String,
        from: String,
    },
    App {
        message: String,
        files: HashMap<String, String>,
    },
    Forward {
        from: String,
        message: Box<RemoteMessage>,
    },
    System {
        signal: String,
    },
}

/// How the receive path tagged an inbound frame (spec.md §4.2 receive path).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationTag {
    Verified,
    InvalidSignature,
    Unsigned,
    DecryptionFailed,
    System,
}

/// An inbound frame as delivered to the router, carrying its verification
/// outcome so downstream handlers decide policy (spec.md §4.2).
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub message: Message,
    pub tag: VerificationTag,
    pub remote: Option<RemoteMessage>,
}

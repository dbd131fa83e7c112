//! Query persistence (spec.md §3 `Query record`). An in-process store is
//! the core's own default, with an injectable trait so `dk-policy`'s
//! Postgres-backed store can stand in without changing the pipeline
//! (spec.md §4.6 notes persistence schema beyond C9's needs is a
//! Non-goal of the core).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueryStatus {
    Pending,
    Accepted,
    Rejected,
    AutoAccepted,
    AutoRejected,
    /// Not in spec.md's enum literally, but needed to carry the "LLM
    /// failures propagate as a placeholder answer" behavior of §4.6 step 3
    /// without inventing a second field; treated as a terminal, non-release
    /// state distinct from `pending`.
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRecord {
    pub id: String,
    pub from: String,
    pub question: String,
    pub answer: String,
    pub documents_related: Vec<String>,
    pub status: QueryStatus,
    pub reason: Option<String>,
}

#[async_trait]
pub trait QueryStore: Send + Sync {
    async fn get(&self, from: &str, question: &str) -> Option<QueryRecord>;
    async fn insert(&self, record: QueryRecord);
    async fn update(&self, record: QueryRecord);
}

#[derive(Default)]
pub struct InMemoryQueryStore {
    records: RwLock<HashMap<(String, String), QueryRecord>>,
}

impl InMemoryQueryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn key(from: &str, question: &str) -> (String, String) {
        (from.to_string(), question.to_string())
    }
}

#[async_trait]
impl QueryStore for InMemoryQueryStore {
    async fn get(&self, from: &str, question: &str) -> Option<QueryRecord> {
        self.records.read().await.get(&Self::key(from, question)).cloned()
    }

    async fn insert(&self, record: QueryRecord) {
        let key = Self::key(&record.from, &record.question);
        self.records.write().await.insert(key, record);
    }

    async fn update(&self, record: QueryRecord) {
        let key = Self::key(&record.from, &record.question);
        self.records.write().await.insert(key, record);
    }
}

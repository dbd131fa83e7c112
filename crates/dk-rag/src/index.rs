//! The opaque vector-search collaborator (spec.md §1 "vector-search library
//! ... out of scope"). Modeled as an `async_trait`, mirroring the teacher's
//! `ModelAdapter` shape (`ailee-trust-layer/src/adapters.rs`), plus an
//! in-memory mock used by the gateway's own tests.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A single retrievable unit: one chunk of a document, tagged with the
/// owning filename plus caller-supplied metadata (spec.md §4.5 `Add`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub file: String,
    pub content: String,
    pub metadata: HashMap<String, String>,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn insert(&self, chunks: Vec<Chunk>) -> anyhow::Result<()>;

    /// Semantic nearest-neighbor search with an optional equality filter
    /// over metadata (spec.md §4.5 `Retrieve`).
    async fn query(
        &self,
        query: &str,
        k: usize,
        filter: Option<(String, String)>,
    ) -> anyhow::Result<Vec<Chunk>>;

    /// Exact metadata-field lookup (spec.md §4.5 `Get`).
    async fn filter_by_metadata(&self, field: &str, value: &str, k: usize) -> anyhow::Result<Vec<Chunk>>;

    async fn delete_file(&self, file: &str) -> anyhow::Result<()>;

    async fn set_chunk_metadata(
        &self,
        chunk_id: &str,
        metadata: HashMap<String, String>,
    ) -> anyhow::Result<()>;

    async fn clear(&self) -> anyhow::Result<()>;
}

/// Naive in-process index used by tests and as a reference implementation:
/// scores chunks by the count of shared lowercase whitespace-delimited
/// tokens between the query and the chunk content. No real embeddings.
pub struct MockVectorIndex {
    chunks: tokio::sync::RwLock<HashMap<String, Chunk>>,
}

impl MockVectorIndex {
    pub fn new() -> Self {
        Self {
            chunks: tokio::sync::RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MockVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn score(query: &str, content: &str) -> usize {
    let query_terms: Vec<String> = query.to_lowercase().split_whitespace().map(String::from).collect();
    let content_lower = content.to_lowercase();
    query_terms
        .iter()
        .filter(|term| content_lower.contains(term.as_str()))
        .count()
}

#[async_trait]
impl VectorIndex for MockVectorIndex {
    async fn insert(&self, chunks: Vec<Chunk>) -> anyhow::Result<()> {
        let mut store = self.chunks.write().await;
        for chunk in chunks {
            store.insert(chunk.id.clone(), chunk);
        }
        Ok(())
    }

    async fn query(
        &self,
        query: &str,
        k: usize,
        filter: Option<(String, String)>,
    ) -> anyhow::Result<Vec<Chunk>> {
        let store = self.chunks.read().await;
        let mut scored: Vec<(usize, &Chunk)> = store
            .values()
            .filter(|chunk| match &filter {
                Some((field, value)) => chunk.metadata.get(field).map(|v| v == value).unwrap_or(false),
                None => true,
            })
            .map(|chunk| (score(query, &chunk.content), chunk))
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored.into_iter().take(k).map(|(_, c)| c.clone()).collect())
    }

    async fn filter_by_metadata(&self, field: &str, value: &str, k: usize) -> anyhow::Result<Vec<Chunk>> {
        let store = self.chunks.read().await;
        Ok(store
            .values()
            .filter(|chunk| chunk.metadata.get(field).map(|v| v == value).unwrap_or(false))
            .take(k)
            .cloned()
            .collect())
    }

    async fn delete_file(&self, file: &str) -> anyhow::Result<()> {
        let mut store = self.chunks.write().await;
        store.retain(|_, chunk| chunk.file != file);
        Ok(())
    }

    async fn set_chunk_metadata(
        &self,
        chunk_id: &str,
        metadata: HashMap<String, String>,
    ) -> anyhow::Result<()> {
        let mut store = self.chunks.write().await;
        if let Some(chunk) = store.get_mut(chunk_id) {
            chunk.metadata = metadata;
        }
        Ok(())
    }

    async fn clear(&self) -> anyhow::Result<()> {
        self.chunks.write().await.clear();
        Ok(())
    }
}

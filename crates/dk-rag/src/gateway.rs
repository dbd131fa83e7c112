//! RAG gateway (spec.md §4.5, C6): the sole entry point that wraps the
//! opaque [`VectorIndex`] with chunking, soft-delete bookkeeping, and the
//! filename-uniqueness invariant chosen for the "document IDs" open
//! question.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dk_llm::{LlmProvider, Message};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{RagError, RagResult};
use crate::index::{Chunk, VectorIndex};

const DEFAULT_CHUNK_SIZE: usize = 800;
const DEFAULT_RETRIEVE_K: usize = 5;

pub struct RagGateway {
    index: Arc<dyn VectorIndex>,
    llm: Arc<dyn LlmProvider>,
    known_filenames: RwLock<HashSet<String>>,
}

impl RagGateway {
    pub fn new(index: Arc<dyn VectorIndex>, llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            index,
            llm,
            known_filenames: RwLock::new(HashSet::new()),
        }
    }

    pub fn default_retrieve_k() -> usize {
        DEFAULT_RETRIEVE_K
    }

    /// `Add(filename, content, generate_description?, metadata)`.
    pub async fn add(
        &self,
        filename: &str,
        content: &str,
        generate_description: bool,
        mut metadata: HashMap<String, String>,
    ) -> RagResult<()> {
        if self.known_filenames.read().await.contains(filename) {
            return Err(RagError::DuplicateFilename(filename.to_string()));
        }
        self.add_unchecked(filename, content, generate_description, &mut metadata)
            .await?;
        self.known_filenames.write().await.insert(filename.to_string());
        Ok(())
    }

    async fn add_unchecked(
        &self,
        filename: &str,
        content: &str,
        generate_description: bool,
        metadata: &mut HashMap<String, String>,
    ) -> RagResult<()> {
        metadata.insert("file".to_string(), filename.to_string());
        metadata.entry("is_deleted".to_string()).or_insert_with(|| "false".to_string());
        metadata.entry("active".to_string()).or_insert_with(|| "true".to_string());

        if generate_description {
            let prompt = vec![
                Message::system("Summarize the following document in one sentence."),
                Message::user(content),
            ];
            match self.llm.complete(&prompt).await {
                Ok(completion) => {
                    metadata.insert("description".to_string(), completion.text);
                }
                Err(err) => {
                    tracing::warn!(%filename, error = %err, "description generation failed, continuing without one");
                }
            }
        }

        let chunks: Vec<Chunk> = chunk_text(content, DEFAULT_CHUNK_SIZE)
            .into_iter()
            .map(|piece| Chunk {
                id: Uuid::new_v4().to_string(),
                file: filename.to_string(),
                content: piece,
                metadata: metadata.clone(),
            })
            .collect();

        self.index.insert(chunks).await.map_err(RagError::Index)?;
        tracing::info!(%filename, "indexed document");
        Ok(())
    }

    /// `Get(field, value, k)`.
    pub async fn get(&self, field: &str, value: &str, k: usize) -> RagResult<Vec<Chunk>> {
        self.index
            .filter_by_metadata(field, value, k)
            .await
            .map_err(RagError::Index)
    }

    /// `Retrieve(query, k, metadata_filter)`. `is_deleted==true` is excluded
    /// unless the caller's filter explicitly asks for it.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        metadata_filter: Option<(String, String)>,
    ) -> RagResult<Vec<Chunk>> {
        let includes_deleted = matches!(&metadata_filter, Some((field, value)) if field == "is_deleted" && value == "true");
        let results = self
            .index
            .query(query, if includes_deleted { k } else { k.saturating_mul(2).max(k) }, metadata_filter)
            .await
            .map_err(RagError::Index)?;

        let filtered: Vec<Chunk> = if includes_deleted {
            results
        } else {
            results
                .into_iter()
                .filter(|chunk| chunk.metadata.get("is_deleted").map(|v| v != "true").unwrap_or(true))
                .collect()
        };

        Ok(filtered.into_iter().take(k).collect())
    }

    /// `Update(filename, content, metadata)`: remove then add, atomic from
    /// the caller's perspective.
    pub async fn update(&self, filename: &str, content: &str, mut metadata: HashMap<String, String>) -> RagResult<()> {
        self.index.delete_file(filename).await.map_err(RagError::Index)?;
        self.add_unchecked(filename, content, false, &mut metadata).await?;
        self.known_filenames.write().await.insert(filename.to_string());
        Ok(())
    }

    /// `Remove(filename)`: hard-delete all chunks with that filename.
    pub async fn remove(&self, filename: &str) -> RagResult<()> {
        self.index.delete_file(filename).await.map_err(RagError::Index)?;
        self.known_filenames.write().await.remove(filename);
        Ok(())
    }

    /// `ToggleActiveMetadata(field, value)`: flip `active` on all matching
    /// documents.
    pub async fn toggle_active_metadata(&self, field: &str, value: &str) -> RagResult<()> {
        let matching = self
            .index
            .filter_by_metadata(field, value, usize::MAX)
            .await
            .map_err(RagError::Index)?;

        for mut chunk in matching {
            let flipped = match chunk.metadata.get("active").map(String::as_str) {
                Some("true") => "false",
                _ => "true",
            };
            chunk.metadata.insert("active".to_string(), flipped.to_string());
            self.index
                .set_chunk_metadata(&chunk.id, chunk.metadata)
                .await
                .map_err(RagError::Index)?;
        }
        Ok(())
    }

    /// `DeleteAll()`: drop the index.
    pub async fn delete_all(&self) -> RagResult<()> {
        self.index.clear().await.map_err(RagError::Index)?;
        self.known_filenames.write().await.clear();
        Ok(())
    }
}

fn chunk_text(content: &str, chunk_size: usize) -> Vec<String> {
    if content.is_empty() {
        return vec![String::new()];
    }
    content
        .as_bytes()
        .chunks(chunk_size)
        .map(|bytes| String::from_utf8_lossy(bytes).to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MockVectorIndex;
    use dk_llm::MockLlmProvider;

    fn gateway() -> RagGateway {
        RagGateway::new(Arc::new(MockVectorIndex::new()), Arc::new(MockLlmProvider::default()))
    }

    #[tokio::test]
    async fn add_then_retrieve_finds_document() {
        let gw = gateway();
        gw.add("facts.txt", "the sky is blue and the grass is green", false, HashMap::new())
            .await
            .unwrap();

        let results = gw.retrieve("sky blue", 5, None).await.unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].file, "facts.txt");
    }

    #[tokio::test]
    async fn duplicate_filename_is_rejected() {
        let gw = gateway();
        gw.add("facts.txt", "hello", false, HashMap::new()).await.unwrap();
        let err = gw.add("facts.txt", "hello again", false, HashMap::new()).await;
        assert!(matches!(err, Err(RagError::DuplicateFilename(_))));
    }

    #[tokio::test]
    async fn update_replaces_prior_content() {
        let gw = gateway();
        gw.add("facts.txt", "old content", false, HashMap::new()).await.unwrap();
        gw.update("facts.txt", "brand new content only", HashMap::new()).await.unwrap();

        let results = gw.retrieve("brand new", 5, None).await.unwrap();
        assert!(!results.is_empty());
        let old = gw.retrieve("old content", 5, None).await.unwrap();
        assert!(old.is_empty());
    }

    #[tokio::test]
    async fn soft_deleted_documents_are_excluded_by_default() {
        let gw = gateway();
        let mut metadata = HashMap::new();
        metadata.insert("is_deleted".to_string(), "true".to_string());
        gw.add("deleted.txt", "secret archived content", false, metadata).await.unwrap();

        let visible = gw.retrieve("secret archived", 5, None).await.unwrap();
        assert!(visible.is_empty());

        let including_deleted = gw
            .retrieve("secret archived", 5, Some(("is_deleted".to_string(), "true".to_string())))
            .await
            .unwrap();
        assert!(!including_deleted.is_empty());
    }

    #[tokio::test]
    async fn remove_deletes_all_chunks_for_filename() {
        let gw = gateway();
        gw.add("facts.txt", "hello world", false, HashMap::new()).await.unwrap();
        gw.remove("facts.txt").await.unwrap();
        let results = gw.retrieve("hello", 5, None).await.unwrap();
        assert!(results.is_empty());

        // filename is free again after removal
        gw.add("facts.txt", "second life", false, HashMap::new()).await.unwrap();
    }

    #[tokio::test]
    async fn toggle_active_metadata_flips_matching_documents() {
        let gw = gateway();
        let mut metadata = HashMap::new();
        metadata.insert("category".to_string(), "news".to_string());
        gw.add("article.txt", "breaking news today", false, metadata).await.unwrap();

        gw.toggle_active_metadata("category", "news").await.unwrap();
        let results = gw.get("active", "false", 10).await.unwrap();
        assert_eq!(results.len(), 1);

        gw.toggle_active_metadata("category", "news").await.unwrap();
        let results = gw.get("active", "true", 10).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn delete_all_clears_the_index_and_filenames() {
        let gw = gateway();
        gw.add("a.txt", "content a", false, HashMap::new()).await.unwrap();
        gw.add("b.txt", "content b", false, HashMap::new()).await.unwrap();

        gw.delete_all().await.unwrap();

        assert!(gw.retrieve("content", 10, None).await.unwrap().is_empty());
        gw.add("a.txt", "reinserted", false, HashMap::new()).await.unwrap();
    }
}

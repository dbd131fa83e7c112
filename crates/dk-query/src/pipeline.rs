//! Query pipeline (spec.md §4.6, C7): retrieve → compose → generate →
//! persist → approve.
//!
//! Grounded on `mesh-coordinator/src/lib.rs`'s orchestration-struct pattern
//! (a small struct composing sub-collaborators) and
//! `federated-learning/src/aggregator.rs`'s multi-stage pipeline style.

use std::sync::Arc;

use dk_approval::{evaluate, ApprovalDecision, ApprovalRule};
use dk_llm::{LlmProvider, Message as LlmMessage};
use dk_rag::RagGateway;
use dk_transport::{PeerTransport, RemoteMessage};
use uuid::Uuid;

use crate::store::{QueryRecord, QueryStatus, QueryStore};

const DEFAULT_RETRIEVE_K: usize = 5;

pub struct QueryPipeline {
    rag: Arc<RagGateway>,
    llm: Arc<dyn LlmProvider>,
    store: Arc<dyn QueryStore>,
    transport: Option<Arc<PeerTransport>>,
    /// Optional node-specific personality, sourced from a description file
    /// per spec.md §4.6 step 2 ("optional node-specific personality from
    /// description file").
    personality: Option<String>,
}

impl QueryPipeline {
    pub fn new(
        rag: Arc<RagGateway>,
        llm: Arc<dyn LlmProvider>,
        store: Arc<dyn QueryStore>,
        transport: Option<Arc<PeerTransport>>,
    ) -> Self {
        Self {
            rag,
            llm,
            store,
            transport,
            personality: None,
        }
    }

    pub fn with_personality(mut self, personality: impl Into<String>) -> Self {
        self.personality = Some(personality.into());
        self
    }

    /// Handle an inbound `query` message from `from`. Idempotent: a
    /// re-receipt of the same `(from, question)` returns the already-stored
    /// record without re-running the LLM (spec.md §4.6 invariants, §8
    /// "Query uniqueness").
    pub async fn handle_query(&self, from: &str, question: &str, rules: &[ApprovalRule]) -> QueryRecord {
        if let Some(existing) = self.store.get(from, question).await {
            tracing::info!(%from, %question, "re-receipt of known query, skipping LLM");
            return existing;
        }

        // Retrieve.
        let retrieved = self
            .rag
            .retrieve(question, DEFAULT_RETRIEVE_K, None)
            .await
            .unwrap_or_default();
        let documents_related: Vec<String> = retrieved.iter().map(|chunk| chunk.file.clone()).collect();
        let context: String = retrieved
            .iter()
            .map(|chunk| chunk.content.as_str())
            .collect::<Vec<_>>()
            .join("\n---\n");

        // Compose.
        let mut system_preamble =
            "Answer the user's question using only the provided context. Be concise.".to_string();
        if let Some(personality) = &self.personality {
            system_preamble = format!("{personality}\n\n{system_preamble}");
        }
        let prompt = vec![
            LlmMessage::system(system_preamble),
            LlmMessage::user(format!("Context:\n{context}\n\nQuestion: {question}")),
        ];

        // Generate.
        let (answer, status) = match self.llm.complete(&prompt).await {
            Ok(completion) => (completion.text, QueryStatus::Pending),
            Err(err) => {
                tracing::warn!(%from, %question, error = %err, "LLM generation failed, recording placeholder answer");
                (String::new(), QueryStatus::Error)
            }
        };

        // Persist (query is persisted before any answer is sent).
        let mut record = QueryRecord {
            id: Uuid::new_v4().to_string(),
            from: from.to_string(),
            question: question.to_string(),
            answer: answer.clone(),
            documents_related,
            status,
            reason: None,
        };
        self.store.insert(record.clone()).await;

        if record.status == QueryStatus::Error {
            return record;
        }

        // Approve.
        let decision = evaluate(self.llm.as_ref(), question, &answer, &context, rules).await;
        match decision {
            ApprovalDecision::AutoAccepted => {
                record.status = QueryStatus::AutoAccepted;
                self.store.update(record.clone()).await;
                self.send_answer(from, question, &answer).await;
            }
            ApprovalDecision::AutoRejected { reason } => {
                record.status = QueryStatus::AutoRejected;
                record.reason = Some(reason);
                self.store.update(record.clone()).await;
                // Peer is not notified of a rejected answer.
            }
            ApprovalDecision::Pending => {
                // Leave status=pending for a human decision.
            }
        }

        record
    }

    async fn send_answer(&self, to: &str, question: &str, answer: &str) {
        let Some(transport) = &self.transport else {
            tracing::debug!("no transport wired in; skipping answer delivery");
            return;
        };
        let remote = RemoteMessage::Answer {
            query: question.to_string(),
            answer: answer.to_string(),
            from: to.to_string(),
        };
        if let Err(err) = transport.send_message(to, &remote).await {
            tracing::warn!(%to, error = %err, "failed to deliver auto-accepted answer");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dk_llm::MockLlmProvider;
    use dk_rag::MockVectorIndex;
    use crate::store::InMemoryQueryStore;

    fn pipeline(canned_answer: &str) -> QueryPipeline {
        let rag = Arc::new(RagGateway::new(
            Arc::new(MockVectorIndex::new()),
            Arc::new(MockLlmProvider::default()),
        ));
        let llm: Arc<dyn LlmProvider> = Arc::new(MockLlmProvider::new(canned_answer));
        let store: Arc<dyn QueryStore> = InMemoryQueryStore::new();
        QueryPipeline::new(rag, llm, store, None)
    }

    #[tokio::test]
    async fn happy_query_is_auto_accepted_with_no_rules_left_pending() {
        let pipeline = pipeline("4");
        let rules = vec![ApprovalRule::new("approve_all: must not be empty")];
        let record = pipeline.handle_query("alice", "what is 2+2?", &rules).await;
        assert_eq!(record.status, QueryStatus::AutoAccepted);
        assert_eq!(record.answer, "4");
    }

    #[tokio::test]
    async fn empty_rule_set_leaves_query_pending() {
        let pipeline = pipeline("4");
        let record = pipeline.handle_query("alice", "what is 2+2?", &[]).await;
        assert_eq!(record.status, QueryStatus::Pending);
    }

    #[tokio::test]
    async fn rejected_rule_records_reason_without_accepting() {
        let pipeline = pipeline("4");
        let rules = vec![ApprovalRule::new("reject_all: must cite a source")];
        let record = pipeline.handle_query("alice", "what is 2+2?", &rules).await;
        assert_eq!(record.status, QueryStatus::AutoRejected);
        assert_eq!(record.reason.as_deref(), Some("reject_all: must cite a source"));
    }

    #[tokio::test]
    async fn re_receipt_of_same_query_does_not_recompute() {
        let pipeline = pipeline("4");
        let rules = vec![ApprovalRule::new("approve_all: must not be empty")];
        let first = pipeline.handle_query("alice", "what is 2+2?", &rules).await;
        let second = pipeline.handle_query("alice", "what is 2+2?", &[]).await;
        assert_eq!(first.id, second.id);
        assert_eq!(second.status, QueryStatus::AutoAccepted);
    }
}

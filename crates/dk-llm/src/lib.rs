//! The external LLM collaborator (spec.md §1 "LLM provider adapters"):
//! an opaque `LlmProvider` used by the query pipeline (C7) to compose
//! answers and by the approval engine (C8) to evaluate rules.
//!
//! Grounded on `ailee-trust-layer/src/adapters.rs`'s `ModelAdapter` trait
//! shape (`generate`/`model_id`/`is_available`) and `ModelOutput` struct.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM provider unavailable")]
    Unavailable,
    #[error("LLM request timed out")]
    Timeout,
    #[error("LLM provider error: {0}")]
    Provider(String),
}

pub type LlmResult<T> = Result<T, LlmError>;

/// A single turn in a chat-style prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Mirrors the teacher's `ModelOutput`: the model's answer plus metadata
/// useful for logging and rule evaluation, not persisted verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub model_id: String,
}

/// A single chunk of a streamed completion. `Done` is the explicit terminal
/// event a consumer watches for before giving up on the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CompletionChunk {
    Token(String),
    Done,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// One-shot completion, used by C7 to compose an answer and by C8 to
    /// evaluate a single approval rule.
    async fn complete(&self, messages: &[Message]) -> LlmResult<Completion>;

    /// Streamed completion. Default implementation wraps `complete` as a
    /// single-chunk stream so providers that don't support streaming still
    /// satisfy the trait.
    async fn complete_stream(
        &self,
        messages: &[Message],
    ) -> LlmResult<Box<dyn Stream<Item = CompletionChunk> + Send + Unpin>> {
        let completion = self.complete(messages).await?;
        let (tx, rx) = mpsc::channel(2);
        let _ = tx.send(CompletionChunk::Token(completion.text)).await;
        let _ = tx.send(CompletionChunk::Done).await;
        Ok(Box::new(ReceiverStream::new(rx)))
    }

    fn model_id(&self) -> &str;

    async fn is_available(&self) -> bool {
        true
    }
}

/// Deterministic provider used throughout the test suite. Always answers
/// "yes" to rule-evaluation prompts containing `approve_all` and echoes the
/// last user message otherwise, keeping tests free of nondeterminism.
pub struct MockLlmProvider {
    pub canned_answer: String,
}

impl MockLlmProvider {
    pub fn new(canned_answer: impl Into<String>) -> Self {
        Self {
            canned_answer: canned_answer.into(),
        }
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new("4")
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(&self, messages: &[Message]) -> LlmResult<Completion> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();

        let text = if last_user.contains("approve_all") {
            "yes".to_string()
        } else if last_user.contains("reject_all") {
            "no".to_string()
        } else {
            self.canned_answer.clone()
        };

        Ok(Completion {
            text,
            model_id: self.model_id().to_string(),
        })
    }

    fn model_id(&self) -> &str {
        "mock-llm-v1"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_provider_echoes_canned_answer() {
        let provider = MockLlmProvider::new("the answer is 4");
        let completion = provider
            .complete(&[Message::user("what is 2+2?")])
            .await
            .unwrap();
        assert_eq!(completion.text, "the answer is 4");
    }

    #[tokio::test]
    async fn mock_provider_handles_approval_keywords() {
        let provider = MockLlmProvider::default();
        let yes = provider
            .complete(&[Message::user("approve_all: is this fine?")])
            .await
            .unwrap();
        assert_eq!(yes.text, "yes");

        let no = provider
            .complete(&[Message::user("reject_all: is this fine?")])
            .await
            .unwrap();
        assert_eq!(no.text, "no");
    }
}

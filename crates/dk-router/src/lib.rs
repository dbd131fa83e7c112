//! Message router (spec.md §4.4, C5): a single task draining the transport's
//! inbound channel and dispatching by `RemoteMessage` tag.
//!
//! Grounded on `mesh-coordinator/src/peer_routing.rs`'s dispatch-by-kind
//! pattern over a routing table.

use std::collections::HashMap;
use std::sync::Arc;

use dk_approval::ApprovalRule;
use dk_query::QueryPipeline;
use dk_transport::{InboundFrame, PeerTransport, RemoteMessage, VerificationTag};
use tokio::sync::{RwLock, Semaphore};

const DEFAULT_QUERY_WORKERS: usize = 8;

/// A recorded answer, keyed by `(query_text, from)`; a later answer from
/// the same peer for the same query text overwrites the prior one
/// (spec.md §4.4 `answer` dispatch).
#[derive(Debug, Clone)]
pub struct RecordedAnswer {
    pub answer: String,
    pub from: String,
}

/// A staged application request (spec.md §4.4 `app` dispatch — "out of
/// core detail", so this keeps only what the router needs to not drop the
/// message: the message text and the file map as received).
#[derive(Debug, Clone)]
pub struct AppRequest {
    pub from: String,
    pub message: String,
    pub files: HashMap<String, String>,
}

pub struct Router {
    transport: Arc<PeerTransport>,
    query_pipeline: Arc<QueryPipeline>,
    approval_rules: Vec<ApprovalRule>,
    answers: RwLock<HashMap<(String, String), RecordedAnswer>>,
    app_requests: RwLock<Vec<AppRequest>>,
    query_workers: Arc<Semaphore>,
}

impl Router {
    pub fn new(transport: Arc<PeerTransport>, query_pipeline: Arc<QueryPipeline>, approval_rules: Vec<ApprovalRule>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            query_pipeline,
            approval_rules,
            answers: RwLock::new(HashMap::new()),
            app_requests: RwLock::new(Vec::new()),
            query_workers: Arc::new(Semaphore::new(DEFAULT_QUERY_WORKERS)),
        })
    }

    /// Spawn the single draining task. Returns the join handle so the
    /// process controller (C11) can await it during shutdown.
    pub fn run(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let frame = self.transport.recv_frame().await;
                self.dispatch(frame).await;
            }
        })
    }

    pub async fn recorded_answer(&self, query_text: &str, from: &str) -> Option<RecordedAnswer> {
        self.answers
            .read()
            .await
            .get(&(query_text.to_string(), from.to_string()))
            .cloned()
    }

    pub async fn dispatch(&self, frame: InboundFrame) {
        match frame.tag {
            VerificationTag::InvalidSignature | VerificationTag::Unsigned | VerificationTag::DecryptionFailed => {
                tracing::warn!(from = %frame.message.from, tag = ?frame.tag, "ignoring frame that failed verification");
                return;
            }
            VerificationTag::Verified | VerificationTag::System => {}
        }

        let Some(remote) = frame.remote else {
            tracing::warn!(from = %frame.message.from, "verified frame had no decodable RemoteMessage, ignoring");
            return;
        };

        self.dispatch_remote(frame.message.from, remote).await;
    }

    /// Dispatch by `type`, recursing for `forward` while preserving the
    /// original sender as provenance (spec.md §4.4 step 2).
    fn dispatch_remote<'a>(
        &'a self,
        provenance_from: String,
        remote: RemoteMessage,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            match remote {
                RemoteMessage::Query { message } => {
                    let query_pipeline = self.query_pipeline.clone();
                    let from = provenance_from.clone();
                    let rules = self.approval_rules.clone();
                    let permit = self.query_workers.clone().acquire_owned().await;
                    tokio::spawn(async move {
                        let _permit = permit;
                        query_pipeline.handle_query(&from, &message, &rules).await;
                    });
                }
                RemoteMessage::Answer { query, answer, from } => {
                    let key = (query, provenance_from.clone());
                    self.answers.write().await.insert(key, RecordedAnswer { answer, from });
                }
                RemoteMessage::App { message, files } => {
                    self.app_requests.write().await.push(AppRequest {
                        from: provenance_from,
                        message,
                        files,
                    });
                }
                RemoteMessage::Forward { from, message } => {
                    self.dispatch_remote(from, *message).await;
                }
                RemoteMessage::System { signal } => {
                    tracing::info!(%signal, from = %provenance_from, "received system control signal");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dk_crypto::Identity;
    use dk_directory::{HttpRelayKeyFetcher, PeerDirectory};
    use dk_llm::MockLlmProvider;
    use dk_query::InMemoryQueryStore;
    use dk_rag::{MockVectorIndex, RagGateway};

    fn test_router() -> Arc<Router> {
        let identity = Arc::new(Identity::generate("bob").unwrap());
        let directory = Arc::new(PeerDirectory::new(Arc::new(HttpRelayKeyFetcher::new("http://unused.invalid"))));
        let transport = PeerTransport::new(
            "bob",
            "http://unused.invalid",
            "ws://unused.invalid",
            identity,
            directory,
        );
        let rag = Arc::new(RagGateway::new(
            Arc::new(MockVectorIndex::new()),
            Arc::new(MockLlmProvider::default()),
        ));
        let pipeline = Arc::new(QueryPipeline::new(
            rag,
            Arc::new(MockLlmProvider::default()),
            InMemoryQueryStore::new(),
            None,
        ));
        Router::new(transport, pipeline, vec![])
    }

    #[tokio::test]
    async fn answer_messages_overwrite_prior_answer_from_same_peer() {
        let router = test_router();
        router
            .dispatch_remote(
                "alice".to_string(),
                RemoteMessage::Answer {
                    query: "2+2?".to_string(),
                    answer: "4".to_string(),
                    from: "alice".to_string(),
                },
            )
            .await;
        router
            .dispatch_remote(
                "alice".to_string(),
                RemoteMessage::Answer {
                    query: "2+2?".to_string(),
                    answer: "five".to_string(),
                    from: "alice".to_string(),
                },
            )
            .await;

        let recorded = router.recorded_answer("2+2?", "alice").await.unwrap();
        assert_eq!(recorded.answer, "five");
    }

    #[tokio::test]
    async fn forward_preserves_original_sender_as_provenance() {
        let router = test_router();
        let inner = RemoteMessage::Answer {
            query: "2+2?".to_string(),
            answer: "4".to_string(),
            from: "carol".to_string(),
        };
        router
            .dispatch_remote(
                "relay-hop".to_string(),
                RemoteMessage::Forward {
                    from: "carol".to_string(),
                    message: Box::new(inner),
                },
            )
            .await;

        let recorded = router.recorded_answer("2+2?", "carol").await.unwrap();
        assert_eq!(recorded.answer, "4");
    }

    #[tokio::test]
    async fn app_messages_are_staged() {
        let router = test_router();
        let mut files = HashMap::new();
        files.insert("readme.txt".to_string(), "hello".to_string());
        router
            .dispatch_remote(
                "dave".to_string(),
                RemoteMessage::App {
                    message: "please review".to_string(),
                    files,
                },
            )
            .await;
        assert_eq!(router.app_requests.read().await.len(), 1);
    }
}

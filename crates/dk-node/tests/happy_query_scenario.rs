//! End-to-end wiring test for the "happy query" scenario: a query dispatched
//! through the router reaches the query pipeline, retrieves a document, gets
//! an LLM answer, auto-accepts against a satisfied rule, and the answer is
//! actually handed to the transport for delivery.
//!
//! Builds the collaborators the same way `RequestContext::build` does but
//! without a live relay, grounded on `dk-router`'s own dispatch tests.

use std::sync::Arc;
use std::time::Duration;

use dk_approval::ApprovalRule;
use dk_crypto::Identity;
use dk_directory::{HttpRelayKeyFetcher, PeerDirectory};
use dk_llm::MockLlmProvider;
use dk_query::{InMemoryQueryStore, QueryPipeline, QueryStatus, QueryStore};
use dk_rag::{MockVectorIndex, RagGateway};
use dk_router::Router;
use dk_transport::{PeerTransport, RemoteMessage};

#[tokio::test]
async fn query_auto_accepts_when_rules_are_satisfied() {
    let identity = Arc::new(Identity::generate("bob").unwrap());
    let directory = Arc::new(PeerDirectory::new(Arc::new(HttpRelayKeyFetcher::new("http://unused.invalid"))));
    let transport = PeerTransport::new(
        "bob",
        "http://unused.invalid",
        "ws://unused.invalid",
        identity,
        directory,
    );

    let llm = Arc::new(MockLlmProvider::new("4"));
    let rag = Arc::new(RagGateway::new(Arc::new(MockVectorIndex::new()), llm.clone()));
    rag.add("arithmetic.txt", "2 + 2 = 4", false, Default::default())
        .await
        .unwrap();

    let store = InMemoryQueryStore::new();
    let pipeline = Arc::new(QueryPipeline::new(rag, llm.clone(), store.clone(), Some(transport.clone())));
    // Must contain "approve_all" for `MockLlmProvider` to answer "yes" to
    // the rule-evaluation prompt; otherwise the mock's canned "4" answer
    // never starts with "yes" and the query would auto-reject instead.
    let rules = vec![ApprovalRule::new("approve_all: the answer must not be empty")];
    let router = Router::new(transport.clone(), pipeline, rules);

    router
        .dispatch(dk_transport::InboundFrame {
            message: dk_transport::Message {
                id: None,
                from: "alice".to_string(),
                to: "bob".to_string(),
                timestamp: 0,
                content: String::new(),
                status: None,
                signature: String::new(),
            },
            tag: dk_transport::VerificationTag::Verified,
            remote: Some(RemoteMessage::Query {
                message: "What is 2+2?".to_string(),
            }),
        })
        .await;

    // The query handler is spawned onto its own task; give it a moment.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let record = store
        .get("alice", "What is 2+2?")
        .await
        .expect("query was never recorded in the store");
    assert_eq!(record.status, QueryStatus::AutoAccepted);
    assert_eq!(record.answer, "4");

    // `start()` is never called on this transport (no live relay here), so
    // the answer `send_message` produced is still sitting on the outbound
    // queue rather than lost — proving the auto-accept path actually
    // attempted delivery instead of silently stopping at the store update.
    let sent = transport
        .try_recv_outbound()
        .await
        .expect("auto-accepted answer was never enqueued for delivery");
    assert_eq!(sent.to, "alice");
}

//! `RequestContext`: the explicit, request-scoped carrier of collaborators
//! (spec.md Design Notes "cyclic dependencies around context" — avoid a
//! dynamic-typed registry, pass one struct instead).

use std::sync::Arc;

use dk_approval::ApprovalRule;
use dk_crypto::Identity;
use dk_directory::{HttpRelayKeyFetcher, PeerDirectory};
use dk_llm::{LlmProvider, MockLlmProvider};
use dk_query::{InMemoryQueryStore, QueryPipeline};
use dk_rag::{MockVectorIndex, RagGateway};
use dk_router::Router;
use dk_transport::PeerTransport;

use crate::config::NodeConfig;

pub struct RequestContext {
    pub transport: Arc<PeerTransport>,
    pub directory: Arc<PeerDirectory>,
    pub rag: Arc<RagGateway>,
    pub llm: Arc<dyn LlmProvider>,
    pub query_pipeline: Arc<QueryPipeline>,
    pub router: Arc<Router>,
    pub approval_rules: Vec<ApprovalRule>,
    pub config: NodeConfig,
}

impl RequestContext {
    pub async fn build(config: NodeConfig) -> anyhow::Result<Self> {
        let identity = Arc::new(Identity::load_or_generate(&config.keys_dir, &config.user_id)?);

        let fetcher = Arc::new(HttpRelayKeyFetcher::new(config.relay_base_url.clone()));
        let directory = Arc::new(PeerDirectory::new(fetcher));

        let transport = PeerTransport::new(
            config.user_id.clone(),
            config.relay_base_url.clone(),
            config.relay_ws_url.clone(),
            identity,
            directory.clone(),
        );

        let llm: Arc<dyn LlmProvider> = Arc::new(MockLlmProvider::default());

        let rag = Arc::new(RagGateway::new(Arc::new(MockVectorIndex::new()), llm.clone()));

        let mut query_pipeline = QueryPipeline::new(
            rag.clone(),
            llm.clone(),
            InMemoryQueryStore::new(),
            Some(transport.clone()),
        );
        if let Some(personality) = &config.personality {
            query_pipeline = query_pipeline.with_personality(personality.clone());
        }
        let query_pipeline = Arc::new(query_pipeline);

        // TODO(dk-policy): approval rules should load from the
        // `approval_rules` table once dk-policy grows a reader for it;
        // empty for now leaves every query pending (spec.md §4.7 default).
        let approval_rules: Vec<ApprovalRule> = Vec::new();

        let router = Router::new(transport.clone(), query_pipeline.clone(), approval_rules.clone());

        Ok(Self {
            transport,
            directory,
            rag,
            llm,
            query_pipeline,
            router,
            approval_rules,
            config,
        })
    }
}

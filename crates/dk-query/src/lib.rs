//! Query pipeline (spec.md C7): retrieve, compose, generate, persist,
//! approve.

pub mod pipeline;
pub mod store;

pub use pipeline::QueryPipeline;
pub use store::{InMemoryQueryStore, QueryRecord, QueryStatus, QueryStore};

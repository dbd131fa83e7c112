//! RAG gateway (spec.md C6): wraps an opaque vector index with chunking,
//! soft-delete, and metadata-filtered retrieval.

pub mod error;
pub mod gateway;
pub mod index;

pub use error::{RagError, RagResult};
pub use gateway::RagGateway;
pub use index::{Chunk, MockVectorIndex, VectorIndex};

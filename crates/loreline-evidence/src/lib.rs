//! Evidence corpus and hybrid retriever.
//!
//! Evidence rows are the only legitimate source of factual claims. The
//! retriever combines in-process trigram similarity with a pluggable vector
//! index and must never fail hard: degraded paths return empty or
//! trigram-only results annotated with the fallback taken.

pub mod db;
pub mod embedding;
pub mod error;
pub mod indexer;
pub mod retriever;
pub mod store;
pub mod trgm;
pub mod types;
pub mod vector;

pub use embedding::{EmbeddingProvider, HttpEmbeddingProvider, SandboxEmbeddingProvider};
pub use error::{EvidenceError, VectorError};
pub use indexer::Indexer;
pub use retriever::{RetrievalRequest, Retriever};
pub use store::{EvidenceStore, NewEvidence};
pub use types::{
    EvidenceRecord, RetrievalDefaults, RetrievalHit, RetrievalOutput, RetrievalStrategy,
    ScoreDistribution,
};
pub use vector::{
    point_id, HttpVectorIndex, InMemoryVectorIndex, UnavailableVectorIndex, VectorHit,
    VectorIndex, VectorPayload,
};

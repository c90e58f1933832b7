//! Archivist hybrid query engine
//!
//! One request type, five document modes chosen from the fields that are set:
//!
//! | text | entities | date range | mode           | ranking                         |
//! |------|----------|------------|----------------|---------------------------------|
//! | yes  | none     | optional   | `semantic`     | cosine similarity               |
//! | no   | one      | none       | `entity`       | mentions (index lookup)         |
//! | no   | several  | none       | `multi_entity` | summed mentions (intersection)  |
//! | no   | 1+       | yes        | `temporal`     | mentions, date-restricted       |
//! | yes  | 1+       | optional   | `hybrid`       | weighted semantic + graph score |
//!
//! plus entity `connections` and bounded `shortest_path` over the graph.
//!
//! Outcomes are kept apart: `Ok` with no hits is a genuine empty result (and
//! [`QueryResponse::unresolved`] says when a name simply did not normalize);
//! `Err(QueryError)` means the lookup itself failed.

pub mod engine;
pub mod request;

pub use engine::QueryEngine;
pub use request::{
    ConnectionsResponse, DocHit, HybridWeights, PathResponse, QueryMode, QueryResponse, QuerySpec,
    ResolvedName, ScoreComponents, Stats,
};

use archivist_index::IndexError;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error(
        "query embedder `{embedder_model}` ({embedder_dim}d) does not match the index \
         (`{index_model}`, {index_dim}d); rebuild or reconfigure the embedder"
    )]
    EmbedderMismatch {
        index_model: String,
        index_dim: usize,
        embedder_model: String,
        embedder_dim: usize,
    },

    #[error(transparent)]
    Index(#[from] IndexError),
}

pub type Result<T, E = QueryError> = std::result::Result<T, E>;

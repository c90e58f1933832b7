//! Archivist core index structures
//!
//! Everything the retrieval engine reads at query time lives here:
//!
//! 1. **Alias table + normalizer**: raw (often OCR-mangled) names collapse onto
//!    a fixed set of canonical entities, exact-match first, fuzzy fallback second.
//! 2. **Entity-document index**: `canonical entity -> {doc, mentions}` postings
//!    with Roaring bitmaps for fast AND-intersection, plus the reverse map.
//! 3. **Relationship graph**: weighted, undirected co-occurrence graph with a
//!    bounded shortest-path search.
//! 4. **Vector index**: one embedding per document plus metadata, queried by
//!    cosine similarity with metadata filters.
//!
//! All four structures are built offline (see `archivist-ingest`), persisted as
//! versioned artifacts, and treated as immutable snapshots while serving.
//! The alias table is the one exception: it is swapped atomically through
//! [`AliasStore`] when a disambiguation decision is committed.

pub mod alias;
pub mod document;
pub mod entity;
pub mod entity_index;
pub mod graph;
pub mod names;
pub mod sidecar;
pub mod similarity;
pub mod vector;

use std::path::PathBuf;

pub use alias::{
    AliasSeed, AliasSnapshot, AliasStore, AliasTable, AliasTableFile, MergeOutcome, NameNormalizer,
    Resolution,
};
pub use document::{DateRange, DocumentMeta, EntityMention, MetadataFilter};
pub use entity::{Entity, EntityRegistry, EntitySeed, EntityType, Provenance, SourceKind};
pub use entity_index::{AliasMatcher, EntityDocIndex, Posting};
pub use graph::{CoContext, Connection, Edge, PathOutcome, RelationshipGraph};
pub use names::{display_form, name_key, name_tokens, text_tokens};
pub use similarity::{JaroWinkler, NameSimilarity, NormalizedLevenshtein, SimilarityMetric};
pub use vector::{
    Embedder, FilterPlacement, TokenHashEmbedder, VectorHit, VectorIndex, VectorRow,
};

#[cfg(feature = "ollama")]
pub use vector::OllamaEmbedder;

/// Structural failures surfaced by the index layer.
///
/// Lookup misses (unknown entity, no path, empty intersection) are never
/// reported through this type; they come back as empty results.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode {path}: {message}")]
    Encode { path: PathBuf, message: String },

    #[error("corrupt artifact {path}: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("artifact {path} has version `{found}`, expected `{expected}`")]
    VersionMismatch {
        path: PathBuf,
        found: String,
        expected: String,
    },

    #[error("missing required artifact {0}")]
    Missing(PathBuf),

    #[error("document `{0}` is already indexed")]
    DuplicateDocument(String),

    #[error("document `{0}` has no text to embed")]
    EmptyDocument(String),

    #[error("embedding dimension mismatch: index has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("alias `{alias}` already maps to `{existing}`; refusing to map it to `{requested}`")]
    AliasConflict {
        alias: String,
        existing: String,
        requested: String,
    },

    #[error("name {0:?} is empty after normalization")]
    EmptyName(String),

    #[error("embedding backend failed: {0}")]
    Embedding(String),
}

pub type Result<T, E = IndexError> = std::result::Result<T, E>;

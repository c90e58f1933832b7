//! Archivist ingestion and offline build
//!
//! Input side of the engine:
//! - the document corpus (JSONL or a directory of `.txt` files), validated at load
//! - flight manifests and contact records (graph co-occurrence sources)
//! - curated seeds: the `{alias: canonical}` table and optional entity descriptions
//!
//! [`IndexBuilder`] turns those into the entity-document index, relationship
//! graph and vector index, checkpointing as it goes so an interrupted build
//! resumes instead of rescanning from zero.

pub mod build;
pub mod checkpoint;
pub mod corpus;
pub mod dates;
pub mod records;

pub use build::{
    BuildInputs, BuildOptions, BuildOutcome, BuildOutput, BuildReport, FailedDocument,
    FailureReason, IndexBuilder,
};
pub use checkpoint::{remove_checkpoint, BuildCheckpoint, CHECKPOINT_VERSION_V1};
pub use corpus::{load_corpus, load_jsonl, load_text_dir, Corpus, DocumentRecord, RejectedRecord};
pub use dates::DateDetector;
pub use records::{
    load_alias_seed, load_contacts, load_entity_seeds, load_manifests, ContactRecord,
    ManifestRecord,
};

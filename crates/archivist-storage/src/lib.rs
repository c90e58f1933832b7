//! Archivist storage layer
//!
//! Owns the data directory: configuration, the built artifacts, and the only
//! writer of the live alias table (the disambiguation review).
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         DATA DIRECTORY                              │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                                                                     │
//! │  ┌──────────┐     ┌───────────────┐     ┌──────────────────┐        │
//! │  │  build   │────►│  save_build   │────►│ index / graph /  │        │
//! │  │ (ingest) │     │               │     │ vectors (CBOR)   │        │
//! │  └──────────┘     └───────────────┘     └──────────────────┘        │
//! │                                                                     │
//! │  ┌──────────┐     ┌───────────────┐     ┌──────────────────┐        │
//! │  │  oracle  │────►│ Disambiguation│────►│  aliases.json    │        │
//! │  │ proposals│     │    Review     │     │  (versioned)     │        │
//! │  └──────────┘     └───────────────┘     └──────────────────┘        │
//! │                          │                                          │
//! │                          ▼                                          │
//! │                ┌──────────────────┐                                 │
//! │                │ backups/ +       │                                 │
//! │                │ changelog.jsonl  │                                 │
//! │                └──────────────────┘                                 │
//! │                                                                     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Properties
//!
//! - **Human in the loop**: a proposal changes nothing until a reviewer accepts it
//! - **Backed up**: every mutation is preceded by a create-new backup
//! - **Audited**: every decision appends one changelog line; lines are never rewritten
//! - **Atomic**: readers see the old alias snapshot or the new one, never a mix

pub mod artifacts;
pub mod config;
pub mod review;


pub use artifacts::{
    load_artifacts, read_alias_table, read_json, save_build, write_alias_table,
    write_json_atomic, ArtifactPaths, Artifacts, BuildManifest, BUILD_MANIFEST_VERSION_V1,
    DOCUMENTS_VERSION_V1,
};
pub use config::{
    ArchivistConfig, BuildConfig, EmbedderConfig, NormalizerConfig, RetrievalConfig,
    CONFIG_FILE_NAME,
};
pub use review::{
    BackupInfo, ChangelogAction, ChangelogEntry, Decision, DisambiguationReview, OracleSuggestion,
    Proposal, ProposalState, ReviewError, ReviewResult,
};

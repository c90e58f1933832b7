//! On-disk layout of a data directory and (de)serialization of every artifact.
//!
//! ```text
//! <data-dir>/
//!   archivist.json          config (optional)
//!   aliases.json            live alias table (JSON, versioned)
//!   entities.json           entity registry
//!   entity_index.cbor       entity -> documents postings
//!   graph.cbor              co-occurrence graph
//!   vectors.cbor            embeddings + document metadata
//!   documents.cbor          metadata for every accepted document
//!   failed.json             documents excluded for too little text
//!   manifest.json           what built the artifacts above
//!   build.ckpt              present until a build's artifacts are saved
//!   review/
//!     proposals.json
//!     changelog.jsonl       append-only
//!     backups/              create-new only, never pruned
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use archivist_index::sidecar::{
    read_versioned, write_versioned, ENTITY_INDEX_VERSION_V1, GRAPH_VERSION_V1,
};
use archivist_index::{
    AliasTable, AliasTableFile, DocumentMeta, EntityDocIndex, EntityRegistry, RelationshipGraph,
    VectorIndex,
};
use archivist_ingest::{remove_checkpoint, BuildOutput, BuildReport, FailedDocument};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const DOCUMENTS_VERSION_V1: &str = "archivist_documents_v1";
pub const BUILD_MANIFEST_VERSION_V1: &str = "archivist_build_manifest_v1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    root: PathBuf,
}

impl ArtifactPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> PathBuf {
        self.root.join(crate::config::CONFIG_FILE_NAME)
    }

    pub fn aliases(&self) -> PathBuf {
        self.root.join("aliases.json")
    }

    pub fn entities(&self) -> PathBuf {
        self.root.join("entities.json")
    }

    pub fn entity_index(&self) -> PathBuf {
        self.root.join("entity_index.cbor")
    }

    pub fn graph(&self) -> PathBuf {
        self.root.join("graph.cbor")
    }

    pub fn vectors(&self) -> PathBuf {
        self.root.join("vectors.cbor")
    }

    pub fn documents(&self) -> PathBuf {
        self.root.join("documents.cbor")
    }

    pub fn failed(&self) -> PathBuf {
        self.root.join("failed.json")
    }

    pub fn manifest(&self) -> PathBuf {
        self.root.join("manifest.json")
    }

    pub fn checkpoint(&self) -> PathBuf {
        self.root.join("build.ckpt")
    }

    pub fn review_dir(&self) -> PathBuf {
        self.root.join("review")
    }

    pub fn proposals(&self) -> PathBuf {
        self.review_dir().join("proposals.json")
    }

    pub fn changelog(&self) -> PathBuf {
        self.review_dir().join("changelog.jsonl")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.review_dir().join("backups")
    }
}

// ============================================================================
// JSON helpers
// ============================================================================

/// Pretty JSON, written to `*.tmp` and renamed into place.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let tmp = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(value)?;
    fs::write(&tmp, bytes).with_context(|| format!("failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("corrupt JSON in {}", path.display()))
}

// ============================================================================
// Alias table
// ============================================================================

/// Read the live alias table and its snapshot version.
pub fn read_alias_table(path: &Path) -> Result<(AliasTable, u64)> {
    let file: AliasTableFile = read_json(path)?;
    let table = AliasTable::from_file(&file, path)?;
    Ok((table, file.alias_version))
}

pub fn write_alias_table(path: &Path, table: &AliasTable, alias_version: u64) -> Result<()> {
    write_json_atomic(path, &table.to_file(alias_version))
}

// ============================================================================
// Build artifacts
// ============================================================================

/// Provenance of the artifacts in a data directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildManifest {
    pub version: String,
    pub built_at: DateTime<Utc>,
    /// Alias table version the index and graph were built against.
    pub alias_version: u64,
    pub embedder_model: String,
    pub embedding_dim: usize,
    pub min_mentions: u32,
    pub report: BuildReport,
}

pub fn save_build(
    paths: &ArtifactPaths,
    output: &BuildOutput,
    aliases: &AliasTable,
    alias_version: u64,
) -> Result<BuildManifest> {
    fs::create_dir_all(paths.root())
        .with_context(|| format!("failed to create {}", paths.root().display()))?;

    write_alias_table(&paths.aliases(), aliases, alias_version)?;
    write_json_atomic(&paths.entities(), &output.registry)?;
    write_versioned(&paths.entity_index(), ENTITY_INDEX_VERSION_V1, &output.index)?;
    write_versioned(&paths.graph(), GRAPH_VERSION_V1, &output.graph)?;
    output.vectors.save(&paths.vectors())?;
    write_versioned(&paths.documents(), DOCUMENTS_VERSION_V1, &output.documents)?;
    write_json_atomic(&paths.failed(), &output.failed)?;

    let manifest = BuildManifest {
        version: BUILD_MANIFEST_VERSION_V1.to_string(),
        built_at: Utc::now(),
        alias_version,
        embedder_model: output.vectors.model().to_string(),
        embedding_dim: output.vectors.dim(),
        min_mentions: output.index.min_mentions(),
        report: output.report.clone(),
    };
    // Written last: a manifest means the whole set is in place.
    write_json_atomic(&paths.manifest(), &manifest)?;
    // Only now is the build's progress safe to drop.
    remove_checkpoint(&paths.checkpoint())?;
    tracing::info!(root = %paths.root().display(), alias_version, "artifacts saved");
    Ok(manifest)
}

/// Everything the query engine reads.
#[derive(Debug)]
pub struct Artifacts {
    pub aliases: AliasTable,
    pub alias_version: u64,
    pub registry: EntityRegistry,
    pub index: EntityDocIndex,
    pub graph: RelationshipGraph,
    pub vectors: VectorIndex,
    pub documents: Vec<DocumentMeta>,
    pub failed: Vec<FailedDocument>,
    pub manifest: BuildManifest,
}

impl Artifacts {
    /// Whether review decisions were committed after the last build.
    pub fn index_is_stale(&self) -> bool {
        self.alias_version != self.manifest.alias_version
    }
}

pub fn load_artifacts(paths: &ArtifactPaths) -> Result<Artifacts> {
    let manifest_path = paths.manifest();
    if !manifest_path.exists() {
        return Err(archivist_index::IndexError::Missing(manifest_path))
            .context("no completed build in this data directory; run `archivist build` first");
    }
    let manifest: BuildManifest = read_json(&manifest_path)?;
    if manifest.version != BUILD_MANIFEST_VERSION_V1 {
        return Err(archivist_index::IndexError::VersionMismatch {
            path: manifest_path,
            found: manifest.version,
            expected: BUILD_MANIFEST_VERSION_V1.to_string(),
        }
        .into());
    }

    let (aliases, alias_version) = read_alias_table(&paths.aliases())?;
    let registry: EntityRegistry = read_json(&paths.entities())?;
    let index: EntityDocIndex =
        read_versioned(&paths.entity_index(), ENTITY_INDEX_VERSION_V1)?.payload;
    let graph: RelationshipGraph = read_versioned(&paths.graph(), GRAPH_VERSION_V1)?.payload;
    let vectors = VectorIndex::load(&paths.vectors())?;
    let documents: Vec<DocumentMeta> =
        read_versioned(&paths.documents(), DOCUMENTS_VERSION_V1)?.payload;
    let failed: Vec<FailedDocument> = read_json(&paths.failed())?;

    let artifacts = Artifacts {
        aliases,
        alias_version,
        registry,
        index,
        graph,
        vectors,
        documents,
        failed,
        manifest,
    };
    if artifacts.index_is_stale() {
        tracing::warn!(
            built_against = artifacts.manifest.alias_version,
            current = artifacts.alias_version,
            "alias table changed since the last build; rebuild to re-canonicalize the index"
        );
    }
    Ok(artifacts)
}

//! Engine configuration (`archivist.json`).
//!
//! Every tunable lives here, including the two empirically chosen constants
//! (fuzzy cutoff and mention threshold); nothing downstream hard-codes them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use archivist_index::{Embedder, NameNormalizer, SimilarityMetric, TokenHashEmbedder};
use archivist_ingest::BuildOptions;
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE_NAME: &str = "archivist.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchivistConfig {
    pub normalizer: NormalizerConfig,
    pub build: BuildConfig,
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Fuzzy matches must score strictly above this.
    pub fuzzy_cutoff: f64,
    pub metric: SimilarityMetric,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            fuzzy_cutoff: 0.85,
            metric: SimilarityMetric::JaroWinkler,
        }
    }
}

impl NormalizerConfig {
    pub fn normalizer(&self) -> NameNormalizer {
        NameNormalizer::new(self.metric.build(), self.fuzzy_cutoff)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum EmbedderConfig {
    TokenHash,
    Ollama {
        host: String,
        model: String,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub min_mentions: u32,
    pub min_text_chars: usize,
    pub checkpoint_every: usize,
    pub shard_size: usize,
    pub embedding_dim: usize,
    pub embedder: EmbedderConfig,
    pub document_co_mentions: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            min_mentions: 2,
            min_text_chars: 20,
            checkpoint_every: 500,
            shard_size: 64,
            embedding_dim: TokenHashEmbedder::DEFAULT_DIM,
            embedder: EmbedderConfig::TokenHash,
            document_co_mentions: true,
        }
    }
}

impl BuildConfig {
    pub fn options(&self, checkpoint_path: Option<PathBuf>) -> BuildOptions {
        BuildOptions {
            min_mentions: self.min_mentions,
            min_text_chars: self.min_text_chars,
            checkpoint_every: self.checkpoint_every,
            shard_size: self.shard_size,
            document_co_mentions: self.document_co_mentions,
            checkpoint_path,
            fresh: false,
            max_documents: None,
        }
    }

    /// The embedder builds and queries must share.
    pub fn embedder(&self) -> Result<Arc<dyn Embedder>> {
        match &self.embedder {
            EmbedderConfig::TokenHash => Ok(Arc::new(TokenHashEmbedder::new(self.embedding_dim))),
            #[cfg(feature = "ollama")]
            EmbedderConfig::Ollama {
                host,
                model,
                timeout_secs,
            } => {
                let embedder = archivist_index::OllamaEmbedder::new(
                    host,
                    model,
                    self.embedding_dim,
                    timeout_secs.map(std::time::Duration::from_secs),
                )?;
                Ok(Arc::new(embedder))
            }
            #[cfg(not(feature = "ollama"))]
            EmbedderConfig::Ollama { .. } => Err(anyhow!(
                "the ollama embedder requires building with `--features ollama`"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub semantic_weight: f64,
    pub graph_weight: f64,
    pub max_hops: usize,
    pub default_limit: usize,
    /// Edges lighter than this are ignored by path finding and connections.
    pub min_edge_weight: u64,
    /// Unfiltered semantic queries over at least this many documents use the
    /// HNSW candidate generator (0 = always exact).
    pub ann_min_documents: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            semantic_weight: 0.7,
            graph_weight: 0.3,
            max_hops: 3,
            default_limit: 20,
            min_edge_weight: 0,
            ann_min_documents: 50_000,
        }
    }
}

impl ArchivistConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("invalid config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// `explicit` if given, else `<data_dir>/archivist.json` if present, else defaults.
    pub fn resolve(data_dir: &Path, explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let default_path = data_dir.join(CONFIG_FILE_NAME);
        if default_path.exists() {
            Self::load(&default_path)
        } else {
            tracing::debug!(data_dir = %data_dir.display(), "no config file; using defaults");
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        let n = &self.normalizer;
        if !(0.0..=1.0).contains(&n.fuzzy_cutoff) {
            return Err(anyhow!("normalizer.fuzzy_cutoff must be in [0, 1], got {}", n.fuzzy_cutoff));
        }
        let b = &self.build;
        if b.min_mentions == 0 {
            return Err(anyhow!("build.min_mentions must be at least 1"));
        }
        if b.embedding_dim == 0 {
            return Err(anyhow!("build.embedding_dim must be positive"));
        }
        let r = &self.retrieval;
        if r.semantic_weight < 0.0 || r.graph_weight < 0.0 {
            return Err(anyhow!("retrieval weights must be non-negative"));
        }
        if r.semantic_weight + r.graph_weight == 0.0 {
            return Err(anyhow!("retrieval weights must not both be zero"));
        }
        if r.max_hops == 0 {
            return Err(anyhow!("retrieval.max_hops must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"{"retrieval": {"semantic_weight": 0.5, "graph_weight": 0.5}, "normalizer": {"metric": "levenshtein"}}"#,
        )
        .unwrap();
        let cfg = ArchivistConfig::resolve(dir.path(), None).unwrap();
        assert_eq!(cfg.retrieval.semantic_weight, 0.5);
        assert_eq!(cfg.retrieval.max_hops, 3);
        assert_eq!(cfg.normalizer.metric, SimilarityMetric::Levenshtein);
        assert_eq!(cfg.normalizer.fuzzy_cutoff, 0.85);
        assert_eq!(cfg.build.min_mentions, 2);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut cfg = ArchivistConfig::default();
        cfg.normalizer.fuzzy_cutoff = 1.5;
        assert!(cfg.validate().is_err());
        let mut cfg = ArchivistConfig::default();
        cfg.retrieval.semantic_weight = 0.0;
        cfg.retrieval.graph_weight = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn embedder_config_round_trips() {
        let cfg = BuildConfig {
            embedder: EmbedderConfig::Ollama {
                host: "localhost:11434".into(),
                model: "nomic-embed-text".into(),
                timeout_secs: None,
            },
            ..BuildConfig::default()
        };
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains(r#""backend":"ollama""#));
        let back: BuildConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }
}

//! Document vector index.
//!
//! One embedding per document plus its metadata. Queries score by cosine
//! similarity and return hits sorted by similarity desc, then doc id, so equal
//! scores always come back in the same order.
//!
//! Filtered queries never go through the ANN graph: the filter is applied to
//! the row set first and the survivors are scanned exactly, which makes the
//! result independent of where the filter is applied. The HNSW index is only
//! a candidate generator for large unfiltered queries, and its candidates are
//! re-scored exactly before ranking.

use std::path::Path;
use std::sync::OnceLock;

use ahash::AHashMap;
use hnsw_rs::prelude::{DistL2, Hnsw};
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::document::{DocumentMeta, MetadataFilter};
use crate::names::text_tokens;
use crate::sidecar::{read_versioned, write_versioned, VECTOR_INDEX_VERSION_V1};
use crate::{IndexError, Result};

// ============================================================================
// Embedders
// ============================================================================

/// Text -> fixed-dimension vector.
pub trait Embedder: Send + Sync {
    /// Identifier recorded alongside the vectors; a query must use the same model.
    fn model(&self) -> String;

    fn dim(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// Deterministic signed feature hashing over folded tokens (FNV-1a).
///
/// No model download, no network; good enough to rank documents by shared
/// vocabulary and fully reproducible across runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenHashEmbedder {
    dim: usize,
}

impl TokenHashEmbedder {
    pub const DEFAULT_DIM: usize = 256;

    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }
}

impl Default for TokenHashEmbedder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIM)
    }
}

fn fnv1a64(s: &str) -> u64 {
    let mut h: u64 = 14695981039346656037;
    for b in s.as_bytes() {
        h ^= *b as u64;
        h = h.wrapping_mul(1099511628211);
    }
    h
}

impl Embedder for TokenHashEmbedder {
    fn model(&self) -> String {
        format!("token-hash-fnv1a-{}", self.dim)
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0f32; self.dim];
        for t in text_tokens(text) {
            let h = fnv1a64(&t);
            let idx = (h % self.dim as u64) as usize;
            let sign = if (h >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
        }
        normalize_in_place(&mut v);
        Ok(v)
    }
}

/// Embeddings from a local Ollama server (`/api/embed`).
#[cfg(feature = "ollama")]
#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    host: String,
    model: String,
    dim: usize,
    client: reqwest::blocking::Client,
}

#[cfg(feature = "ollama")]
impl OllamaEmbedder {
    pub fn new(
        host: &str,
        model: &str,
        dim: usize,
        timeout: Option<std::time::Duration>,
    ) -> Result<Self> {
        let mut builder = reqwest::blocking::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| IndexError::Embedding(format!("failed to build http client: {e}")))?;
        let host = host.trim_end_matches('/');
        let host = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("http://{host}")
        };
        Ok(Self {
            host,
            model: model.to_string(),
            dim,
            client,
        })
    }
}

#[cfg(feature = "ollama")]
impl Embedder for OllamaEmbedder {
    fn model(&self) -> String {
        format!("ollama:{}", self.model)
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut out = self.embed_batch(&[text.to_string()])?;
        out.pop()
            .ok_or_else(|| IndexError::Embedding("ollama returned no embedding".to_string()))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        #[derive(Deserialize)]
        struct EmbedResp {
            embeddings: Vec<Vec<f32>>,
        }

        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/api/embed", self.host);
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
            "truncate": true
        });
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| IndexError::Embedding(format!("failed to reach ollama at {url}: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().unwrap_or_default();
            return Err(IndexError::Embedding(format!(
                "ollama http error {status}: {text}"
            )));
        }
        let out: EmbedResp = resp
            .json()
            .map_err(|e| IndexError::Embedding(format!("ollama returned invalid JSON: {e}")))?;
        if out.embeddings.len() != texts.len() {
            return Err(IndexError::Embedding(format!(
                "ollama returned {} embeddings for {} inputs",
                out.embeddings.len(),
                texts.len()
            )));
        }
        for v in &out.embeddings {
            if v.len() != self.dim {
                return Err(IndexError::DimensionMismatch {
                    expected: self.dim,
                    actual: v.len(),
                });
            }
        }
        Ok(out.embeddings)
    }
}

// ============================================================================
// Similarity
// ============================================================================

fn normalize_in_place(v: &mut [f32]) {
    let norm2: f32 = v.iter().map(|x| x * x).sum();
    if norm2 > 0.0 {
        let inv = 1.0 / norm2.sqrt();
        for x in v.iter_mut() {
            *x *= inv;
        }
    }
}

/// Cosine similarity in `[-1, 1]`; 0 when either side is the zero vector.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (dot / (na.sqrt() * nb.sqrt())).clamp(-1.0, 1.0)
}

// ============================================================================
// Index
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRow {
    pub meta: DocumentMeta,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorHit {
    pub doc_id: String,
    pub similarity: f32,
    pub metadata: DocumentMeta,
}

/// Where a metadata filter is applied relative to ranking.
///
/// Both placements return the same hits; `Post` exists so callers (and tests)
/// can check that.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FilterPlacement {
    #[default]
    Pre,
    Post,
}

struct AnnIndex {
    hnsw: Hnsw<'static, f32, DistL2>,
}

impl std::fmt::Debug for AnnIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnnIndex").finish_non_exhaustive()
    }
}

/// Most HNSW candidates fetched per query. Requests for at least this many
/// hits skip ANN and scan exactly.
const ANN_MAX_CANDIDATES: usize = 1000;

#[derive(Debug, Default)]
pub struct VectorIndex {
    dim: usize,
    model: String,
    rows: Vec<VectorRow>,
    by_id: AHashMap<String, usize>,
    /// Unfiltered queries over at least this many rows use HNSW candidates;
    /// 0 disables ANN entirely.
    ann_min_documents: usize,
    ann: OnceLock<Mutex<AnnIndex>>,
}

#[derive(Serialize)]
struct VectorIndexFileRef<'a> {
    dim: usize,
    model: &'a str,
    rows: &'a [VectorRow],
}

#[derive(Deserialize)]
struct VectorIndexFile {
    dim: usize,
    model: String,
    rows: Vec<VectorRow>,
}

impl VectorIndex {
    pub fn new(dim: usize, model: impl Into<String>) -> Self {
        Self {
            dim,
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn for_embedder(embedder: &dyn Embedder) -> Self {
        Self::new(embedder.dim(), embedder.model())
    }

    pub fn with_ann_min_documents(mut self, n: usize) -> Self {
        self.ann_min_documents = n;
        self
    }

    pub fn set_ann_min_documents(&mut self, n: usize) {
        self.ann_min_documents = n;
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[VectorRow] {
        &self.rows
    }

    pub fn get(&self, doc_id: &str) -> Option<&VectorRow> {
        self.by_id.get(doc_id).map(|&i| &self.rows[i])
    }

    pub fn contains(&self, doc_id: &str) -> bool {
        self.by_id.contains_key(doc_id)
    }

    /// Store a precomputed vector for `meta.doc_id`.
    pub fn insert_vector(&mut self, meta: DocumentMeta, vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.dim {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim,
                actual: vector.len(),
            });
        }
        if self.by_id.contains_key(&meta.doc_id) {
            return Err(IndexError::DuplicateDocument(meta.doc_id));
        }
        self.by_id.insert(meta.doc_id.clone(), self.rows.len());
        self.rows.push(VectorRow { meta, vector });
        self.ann = OnceLock::new();
        Ok(())
    }

    /// Embed `text` and store it with `meta`.
    pub fn embed_and_store(
        &mut self,
        embedder: &dyn Embedder,
        meta: DocumentMeta,
        text: &str,
    ) -> Result<()> {
        if text.trim().is_empty() {
            return Err(IndexError::EmptyDocument(meta.doc_id));
        }
        let vector = embedder.embed(text)?;
        self.insert_vector(meta, vector)
    }

    /// Top-`k` documents by cosine similarity among those matching `filter`.
    pub fn query(
        &self,
        embedding: &[f32],
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<VectorHit>> {
        self.query_with_placement(embedding, k, filter, FilterPlacement::Pre)
    }

    pub fn query_with_placement(
        &self,
        embedding: &[f32],
        k: usize,
        filter: &MetadataFilter,
        placement: FilterPlacement,
    ) -> Result<Vec<VectorHit>> {
        if embedding.len() != self.dim {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim,
                actual: embedding.len(),
            });
        }
        if k == 0 || self.rows.is_empty() {
            return Ok(Vec::new());
        }

        if filter.is_empty()
            && k < ANN_MAX_CANDIDATES
            && self.ann_min_documents > 0
            && self.rows.len() >= self.ann_min_documents
        {
            return Ok(self.query_ann(embedding, k));
        }

        let mut scored: Vec<(f32, usize)> = match placement {
            FilterPlacement::Pre => self
                .rows
                .par_iter()
                .enumerate()
                .filter(|(_, row)| filter.matches(&row.meta))
                .map(|(i, row)| (cosine(embedding, &row.vector), i))
                .collect(),
            FilterPlacement::Post => self
                .rows
                .par_iter()
                .enumerate()
                .map(|(i, row)| (cosine(embedding, &row.vector), i))
                .collect(),
        };
        self.rank(&mut scored);
        if placement == FilterPlacement::Post {
            scored.retain(|&(_, i)| filter.matches(&self.rows[i].meta));
        }
        scored.truncate(k);
        Ok(self.hits(scored))
    }

    fn rank(&self, scored: &mut [(f32, usize)]) {
        scored.sort_by(|(sa, ia), (sb, ib)| {
            sb.total_cmp(sa)
                .then_with(|| self.rows[*ia].meta.doc_id.cmp(&self.rows[*ib].meta.doc_id))
        });
    }

    fn hits(&self, scored: Vec<(f32, usize)>) -> Vec<VectorHit> {
        scored
            .into_iter()
            .map(|(similarity, i)| {
                let row = &self.rows[i];
                VectorHit {
                    doc_id: row.meta.doc_id.clone(),
                    similarity,
                    metadata: row.meta.clone(),
                }
            })
            .collect()
    }

    fn query_ann(&self, embedding: &[f32], k: usize) -> Vec<VectorHit> {
        let ann = self.ann.get_or_init(|| Mutex::new(self.build_ann()));
        let mut q = embedding.to_vec();
        normalize_in_place(&mut q);

        let fetch = k.saturating_mul(4).min(ANN_MAX_CANDIDATES).max(k);
        let ef_search = fetch.max(64);
        let neighbours = ann.lock().hnsw.search(&q, fetch, ef_search);

        let mut scored: Vec<(f32, usize)> = neighbours
            .into_iter()
            .filter(|n| n.d_id < self.rows.len())
            .map(|n| (cosine(embedding, &self.rows[n.d_id].vector), n.d_id))
            .collect();
        scored.sort_by_key(|&(_, i)| i);
        scored.dedup_by_key(|&mut (_, i)| i);
        self.rank(&mut scored);
        scored.truncate(k);
        self.hits(scored)
    }

    fn build_ann(&self) -> AnnIndex {
        // m: max connections per layer; ef_construction: construction search width.
        let m: usize = 16;
        let ef_construction: usize = 200;
        let nb_elem = self.rows.len();
        let max_layer = 16.min((nb_elem as f32).ln().trunc() as usize).max(1);

        let hnsw = Hnsw::<f32, DistL2>::new(m, nb_elem, max_layer, ef_construction, DistL2 {});
        for (i, row) in self.rows.iter().enumerate() {
            let mut v = row.vector.clone();
            normalize_in_place(&mut v);
            hnsw.insert((&v[..], i));
        }
        tracing::debug!(rows = nb_elem, max_layer, "built HNSW candidate index");
        AnnIndex { hnsw }
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    pub fn save(&self, path: &Path) -> Result<()> {
        write_versioned(
            path,
            VECTOR_INDEX_VERSION_V1,
            &VectorIndexFileRef {
                dim: self.dim,
                model: &self.model,
                rows: &self.rows,
            },
        )
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = read_versioned::<VectorIndexFile>(path, VECTOR_INDEX_VERSION_V1)?.payload;
        let mut index = Self::new(file.dim, file.model);
        for row in file.rows {
            if row.vector.len() != index.dim {
                return Err(IndexError::Corrupt {
                    path: path.to_path_buf(),
                    message: format!(
                        "row `{}` has dimension {}, index has {}",
                        row.meta.doc_id,
                        row.vector.len(),
                        index.dim
                    ),
                });
            }
            index.insert_vector(row.meta, row.vector)?;
        }
        Ok(index)
    }
}

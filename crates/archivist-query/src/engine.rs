//! The hybrid query engine.
//!
//! All index structures are owned read-only snapshots; the only shared mutable
//! state is the alias table, read through [`AliasStore::snapshot`] once per
//! request so a whole request sees one consistent table.

use std::sync::Arc;

use ahash::AHashMap;
use archivist_index::{
    AliasSnapshot, AliasStore, DocumentMeta, Embedder, EntityDocIndex, EntityRegistry,
    MetadataFilter, NameNormalizer, Posting, RelationshipGraph, Resolution, VectorIndex,
};
use archivist_storage::{Artifacts, BuildManifest, RetrievalConfig};

use crate::request::{
    ConnectionsResponse, DocHit, HybridWeights, PathResponse, QueryMode, QueryResponse,
    QuerySpec, ResolvedName, ScoreComponents, Stats,
};
use crate::{QueryError, Result};

pub struct QueryEngine {
    aliases: Arc<AliasStore>,
    normalizer: NameNormalizer,
    embedder: Arc<dyn Embedder>,
    registry: EntityRegistry,
    index: EntityDocIndex,
    graph: RelationshipGraph,
    vectors: VectorIndex,
    documents: AHashMap<String, DocumentMeta>,
    failed: usize,
    manifest: BuildManifest,
    retrieval: RetrievalConfig,
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("alias_version", &self.aliases.snapshot().version)
            .field("documents", &self.documents.len())
            .field("embedder", &self.embedder.model())
            .finish_non_exhaustive()
    }
}

/// Canonical names for a request, plus what happened to each input.
struct ResolvedEntities {
    canonical: Vec<String>,
    resolved: Vec<ResolvedName>,
    unresolved: Vec<String>,
}

impl QueryEngine {
    /// Serve `artifacts` with a fresh alias store seeded from them.
    pub fn from_artifacts(
        artifacts: Artifacts,
        normalizer: NameNormalizer,
        embedder: Arc<dyn Embedder>,
        retrieval: RetrievalConfig,
    ) -> Result<Self> {
        let store = Arc::new(AliasStore::new(
            artifacts.aliases.clone(),
            artifacts.alias_version,
        ));
        Self::with_alias_store(artifacts, store, normalizer, embedder, retrieval)
    }

    /// Serve `artifacts`, reading aliases from a store shared with the review workflow.
    pub fn with_alias_store(
        artifacts: Artifacts,
        aliases: Arc<AliasStore>,
        normalizer: NameNormalizer,
        embedder: Arc<dyn Embedder>,
        retrieval: RetrievalConfig,
    ) -> Result<Self> {
        let Artifacts {
            registry,
            index,
            graph,
            mut vectors,
            documents,
            failed,
            manifest,
            ..
        } = artifacts;

        if embedder.model() != vectors.model() || embedder.dim() != vectors.dim() {
            return Err(QueryError::EmbedderMismatch {
                index_model: vectors.model().to_string(),
                index_dim: vectors.dim(),
                embedder_model: embedder.model(),
                embedder_dim: embedder.dim(),
            });
        }
        vectors.set_ann_min_documents(retrieval.ann_min_documents);

        let documents = documents
            .into_iter()
            .map(|d| (d.doc_id.clone(), d))
            .collect();

        Ok(Self {
            aliases,
            normalizer,
            embedder,
            registry,
            index,
            graph,
            vectors,
            documents,
            failed: failed.len(),
            manifest,
            retrieval,
        })
    }

    pub fn alias_store(&self) -> &Arc<AliasStore> {
        &self.aliases
    }

    pub fn retrieval(&self) -> &RetrievalConfig {
        &self.retrieval
    }

    pub fn default_weights(&self) -> HybridWeights {
        HybridWeights::new(self.retrieval.semantic_weight, self.retrieval.graph_weight)
    }

    pub fn document(&self, doc_id: &str) -> Option<&DocumentMeta> {
        self.documents.get(doc_id)
    }

    fn is_stale(&self, snapshot: &AliasSnapshot) -> bool {
        snapshot.version != self.manifest.alias_version
    }

    fn resolve_one(&self, snapshot: &AliasSnapshot, raw: &str) -> ResolvedName {
        ResolvedName {
            input: raw.to_string(),
            resolution: self.normalizer.resolve(&snapshot.table, raw),
        }
    }

    fn resolve_all(&self, snapshot: &AliasSnapshot, names: &[String]) -> ResolvedEntities {
        let mut out = ResolvedEntities {
            canonical: Vec::new(),
            resolved: Vec::new(),
            unresolved: Vec::new(),
        };
        for raw in names {
            let r = self.resolve_one(snapshot, raw);
            match r.resolution.canonical() {
                Some(canonical) => {
                    if !out.canonical.iter().any(|c| c == canonical) {
                        out.canonical.push(canonical.to_string());
                    }
                }
                None => out.unresolved.push(raw.clone()),
            }
            out.resolved.push(r);
        }
        out
    }

    // ========================================================================
    // Document queries
    // ========================================================================

    pub fn query(&self, spec: &QuerySpec) -> Result<QueryResponse> {
        let mode = spec.mode()?;
        let limit = spec.limit.unwrap_or(self.retrieval.default_limit);
        if limit == 0 {
            return Err(QueryError::InvalidQuery("limit must be at least 1".to_string()));
        }

        let snapshot = self.aliases.snapshot();
        let entities = self.resolve_all(&snapshot, &spec.entities);
        let mut response = QueryResponse {
            mode,
            hits: Vec::new(),
            resolved: entities.resolved,
            unresolved: entities.unresolved,
            weights: None,
            alias_version: snapshot.version,
            index_stale: self.is_stale(&snapshot),
        };

        // AND semantics: one unknown name means nothing can match.
        if !response.unresolved.is_empty() {
            tracing::debug!(
                mode = %mode,
                unresolved = ?response.unresolved,
                "entity filter did not normalize; empty result"
            );
            return Ok(response);
        }

        response.hits = match mode {
            QueryMode::Semantic => self.semantic(spec, limit)?,
            QueryMode::Entity | QueryMode::MultiEntity | QueryMode::Temporal => {
                self.by_entities(spec, &entities.canonical, limit)
            }
            QueryMode::Hybrid => {
                let weights = spec
                    .weights
                    .unwrap_or_else(|| self.default_weights())
                    .normalized()?;
                response.weights = Some(weights);
                self.hybrid(spec, &entities.canonical, weights, limit)?
            }
        };
        tracing::debug!(mode = %mode, hits = response.hits.len(), "query answered");
        Ok(response)
    }

    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embedder.embed(text)?)
    }

    fn semantic(&self, spec: &QuerySpec, limit: usize) -> Result<Vec<DocHit>> {
        let Some(text) = spec.query_text() else {
            return Ok(Vec::new());
        };
        let embedding = self.embed_query(text)?;
        let filter = MetadataFilter {
            entities: Vec::new(),
            date_range: spec.date_range,
            source: spec.source.clone(),
        };
        let hits = self.vectors.query(&embedding, limit, &filter)?;
        Ok(hits
            .into_iter()
            .map(|h| DocHit {
                doc_id: h.doc_id,
                score: f64::from(h.similarity),
                metadata: h.metadata,
                components: None,
            })
            .collect())
    }

    /// Entity, multi-entity and temporal modes: index lookup, then metadata filters.
    fn by_entities(&self, spec: &QuerySpec, canonical: &[String], limit: usize) -> Vec<DocHit> {
        let postings: Vec<Posting> = match canonical {
            [one] => self.index.lookup(one),
            many => self.index.intersect(many),
        };
        let range = spec.date_range.filter(|r| !r.is_open());

        postings
            .into_iter()
            .filter_map(|p| {
                let meta = self.documents.get(&p.doc_id)?;
                if let Some(source) = &spec.source {
                    if meta.source != *source {
                        return None;
                    }
                }
                if let Some(range) = range {
                    if !range.admits(meta) {
                        return None;
                    }
                }
                Some(DocHit {
                    doc_id: p.doc_id,
                    score: f64::from(p.mentions),
                    metadata: meta.clone(),
                    components: None,
                })
            })
            .take(limit)
            .collect()
    }

    /// Semantic ranking restricted to documents mentioning every filter entity,
    /// re-scored as a weighted sum with the graph signal.
    fn hybrid(
        &self,
        spec: &QuerySpec,
        canonical: &[String],
        weights: HybridWeights,
        limit: usize,
    ) -> Result<Vec<DocHit>> {
        let Some(text) = spec.query_text() else {
            return Ok(Vec::new());
        };
        let embedding = self.embed_query(text)?;
        let filter = MetadataFilter {
            entities: canonical.to_vec(),
            date_range: spec.date_range,
            source: spec.source.clone(),
        };
        // Every admissible document is a candidate: the graph term can reorder them.
        let candidates = self.vectors.query(&embedding, self.vectors.len(), &filter)?;
        let min_weight = spec
            .min_edge_weight
            .unwrap_or(self.retrieval.min_edge_weight);

        let mut hits: Vec<DocHit> = candidates
            .into_iter()
            .map(|h| {
                let semantic = ((f64::from(h.similarity) + 1.0) / 2.0).clamp(0.0, 1.0);
                let graph = self.graph_signal(canonical, &h.metadata, min_weight);
                DocHit {
                    doc_id: h.doc_id,
                    score: weights.semantic * semantic + weights.graph * graph,
                    metadata: h.metadata,
                    components: Some(ScoreComponents { semantic, graph }),
                }
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    /// Graph support for `doc` given the filter entities, in `[0, 1]`.
    ///
    /// For each filter entity: its heaviest edge to any other entity the
    /// document mentions (other filter entities included), relative to its
    /// heaviest edge overall. Averaged over the filter entities.
    fn graph_signal(&self, filter: &[String], doc: &DocumentMeta, min_weight: u64) -> f64 {
        if filter.is_empty() {
            return 0.0;
        }
        let total: f64 = filter
            .iter()
            .map(|f| {
                let max = self.graph.max_weight_of(f);
                if max == 0 {
                    return 0.0;
                }
                let best = doc
                    .entities
                    .iter()
                    .filter(|m| m.entity != *f)
                    .map(|m| self.graph.weight(f, &m.entity))
                    .filter(|&w| w >= min_weight)
                    .max()
                    .unwrap_or(0);
                best as f64 / max as f64
            })
            .sum();
        total / filter.len() as f64
    }

    // ========================================================================
    // Graph queries
    // ========================================================================

    /// Entities adjacent to `name`, heaviest edge first.
    pub fn connections(
        &self,
        name: &str,
        min_weight: Option<u64>,
        limit: Option<usize>,
    ) -> ConnectionsResponse {
        let snapshot = self.aliases.snapshot();
        let resolution = self.normalizer.resolve(&snapshot.table, name);
        let Some(entity) = resolution.canonical().map(str::to_string) else {
            return ConnectionsResponse {
                input: name.to_string(),
                entity: None,
                connections: Vec::new(),
            };
        };
        let min_weight = min_weight.unwrap_or(self.retrieval.min_edge_weight);
        let mut connections = self.graph.neighbors(&entity, min_weight);
        connections.truncate(limit.unwrap_or(self.retrieval.default_limit));
        ConnectionsResponse {
            input: name.to_string(),
            entity: Some(entity),
            connections,
        }
    }

    /// Bounded shortest path between two names.
    ///
    /// Either name failing to normalize is reported as `NotConnected`, with the
    /// resolution in the response saying why.
    pub fn shortest_path(
        &self,
        from: &str,
        to: &str,
        max_hops: Option<usize>,
        min_weight: Option<u64>,
    ) -> Result<PathResponse> {
        let max_hops = max_hops.unwrap_or(self.retrieval.max_hops);
        if max_hops == 0 {
            return Err(QueryError::InvalidQuery("max_hops must be at least 1".to_string()));
        }
        let min_weight = min_weight.unwrap_or(self.retrieval.min_edge_weight);
        let snapshot = self.aliases.snapshot();
        let from = self.resolve_one(&snapshot, from);
        let to = self.resolve_one(&snapshot, to);

        let outcome = match (from.resolution.canonical(), to.resolution.canonical()) {
            (Some(a), Some(b)) => self.graph.shortest_path(a, b, max_hops, min_weight),
            _ => archivist_index::PathOutcome::NotConnected,
        };
        tracing::debug!(
            from = %from.input,
            to = %to.input,
            max_hops,
            hops = ?outcome.hops(),
            "path query"
        );
        Ok(PathResponse {
            from,
            to,
            max_hops,
            outcome,
        })
    }

    /// Resolve a single raw name against the live alias snapshot.
    pub fn resolve(&self, raw: &str) -> Resolution {
        self.normalizer.resolve(&self.aliases.snapshot().table, raw)
    }

    pub fn stats(&self) -> Stats {
        let snapshot = self.aliases.snapshot();
        Stats {
            documents_ingested: self.documents.len(),
            documents_indexed: self.index.document_count(),
            documents_failed: self.failed,
            documents_embedded: self.vectors.len(),
            entities_tracked: self.registry.len(),
            indexed_entities: self.index.entity_count(),
            aliases: snapshot.table.len(),
            canonical_entities: snapshot.table.canonical_count(),
            graph_nodes: self.graph.node_count(),
            graph_edges: self.graph.edge_count(),
            embedding_dim: self.vectors.dim(),
            embedder_model: self.vectors.model().to_string(),
            min_mentions: self.index.min_mentions(),
            alias_version: snapshot.version,
            index_stale: self.is_stale(&snapshot),
        }
    }
}

//! Query requests and responses (JSON-serializable for the presentation layer).

use archivist_index::{Connection, DateRange, DocumentMeta, PathOutcome, Resolution};
use serde::{Deserialize, Serialize};

use crate::{QueryError, Result};

// ============================================================================
// Request
// ============================================================================

/// Relative weights of the two hybrid signals.
///
/// Weights are normalized to sum to one before scoring, so `{7, 3}` and
/// `{0.7, 0.3}` rank identically.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HybridWeights {
    pub semantic: f64,
    pub graph: f64,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            semantic: 0.7,
            graph: 0.3,
        }
    }
}

impl HybridWeights {
    pub fn new(semantic: f64, graph: f64) -> Self {
        Self { semantic, graph }
    }

    pub fn normalized(self) -> Result<Self> {
        let valid = |w: f64| w.is_finite() && w >= 0.0;
        if !valid(self.semantic) || !valid(self.graph) {
            return Err(QueryError::InvalidQuery(format!(
                "hybrid weights must be finite and non-negative, got semantic={} graph={}",
                self.semantic, self.graph
            )));
        }
        let total = self.semantic + self.graph;
        if total <= 0.0 {
            return Err(QueryError::InvalidQuery(
                "hybrid weights must not both be zero".to_string(),
            ));
        }
        Ok(Self {
            semantic: self.semantic / total,
            graph: self.graph / total,
        })
    }
}

/// One retrieval request. Which mode runs follows from the fields that are set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySpec {
    /// Free text; blank text counts as absent.
    pub text: Option<String>,
    /// Raw entity names; each is normalized before use.
    pub entities: Vec<String>,
    /// Inclusive bounds on a document's primary date.
    pub date_range: Option<DateRange>,
    pub source: Option<String>,
    /// Edges lighter than this contribute nothing to the graph signal.
    pub min_edge_weight: Option<u64>,
    pub limit: Option<usize>,
    /// Overrides the configured hybrid weighting.
    pub weights: Option<HybridWeights>,
}

impl QuerySpec {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn entity(name: impl Into<String>) -> Self {
        Self {
            entities: vec![name.into()],
            ..Self::default()
        }
    }

    pub fn entities<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entities: names.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_date_range(mut self, range: DateRange) -> Self {
        self.date_range = Some(range);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_weights(mut self, weights: HybridWeights) -> Self {
        self.weights = Some(weights);
        self
    }

    pub fn with_min_edge_weight(mut self, min: u64) -> Self {
        self.min_edge_weight = Some(min);
        self
    }

    /// The free text, trimmed, if any is left.
    pub fn query_text(&self) -> Option<&str> {
        self.text.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }

    fn has_date_range(&self) -> bool {
        self.date_range.is_some_and(|r| !r.is_open())
    }

    pub fn mode(&self) -> Result<QueryMode> {
        if let Some(range) = self.date_range {
            if range.is_inverted() {
                return Err(QueryError::InvalidQuery(
                    "date range start is after its end".to_string(),
                ));
            }
        }
        let mode = match (self.query_text().is_some(), self.entities.len()) {
            (true, 0) => QueryMode::Semantic,
            (true, _) => QueryMode::Hybrid,
            (false, 0) => {
                return Err(QueryError::InvalidQuery(
                    "a query needs free text or at least one entity".to_string(),
                ))
            }
            (false, _) if self.has_date_range() => QueryMode::Temporal,
            (false, 1) => QueryMode::Entity,
            (false, _) => QueryMode::MultiEntity,
        };
        Ok(mode)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMode {
    Semantic,
    Entity,
    MultiEntity,
    Hybrid,
    Temporal,
}

impl QueryMode {
    pub fn as_str(self) -> &'static str {
        match self {
            QueryMode::Semantic => "semantic",
            QueryMode::Entity => "entity",
            QueryMode::MultiEntity => "multi_entity",
            QueryMode::Hybrid => "hybrid",
            QueryMode::Temporal => "temporal",
        }
    }
}

impl std::fmt::Display for QueryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Responses
// ============================================================================

/// How one raw name from the request was normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedName {
    pub input: String,
    pub resolution: Resolution,
}

/// Per-signal contributions to a hybrid score (both in `[0, 1]`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreComponents {
    pub semantic: f64,
    pub graph: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocHit {
    pub doc_id: String,
    /// Cosine similarity (semantic), total mentions (entity modes), or the
    /// weighted fusion (hybrid).
    pub score: f64,
    pub metadata: DocumentMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub components: Option<ScoreComponents>,
}

/// A successful query. Empty `hits` means "genuinely nothing matched";
/// `unresolved` says whether that was because a name did not normalize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub mode: QueryMode,
    pub hits: Vec<DocHit>,
    pub resolved: Vec<ResolvedName>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unresolved: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<HybridWeights>,
    pub alias_version: u64,
    /// The alias table changed after the index was built.
    pub index_stale: bool,
}

impl QueryResponse {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn doc_ids(&self) -> Vec<&str> {
        self.hits.iter().map(|h| h.doc_id.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionsResponse {
    pub input: String,
    /// `None` when the name matched no canonical entity.
    pub entity: Option<String>,
    pub connections: Vec<Connection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathResponse {
    pub from: ResolvedName,
    pub to: ResolvedName,
    pub max_hops: usize,
    pub outcome: PathOutcome,
}

/// Aggregate counts for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub documents_ingested: usize,
    pub documents_indexed: usize,
    pub documents_failed: usize,
    pub documents_embedded: usize,
    pub entities_tracked: usize,
    pub indexed_entities: usize,
    pub aliases: usize,
    pub canonical_entities: usize,
    pub graph_nodes: usize,
    pub graph_edges: usize,
    pub embedding_dim: usize,
    pub embedder_model: String,
    pub min_mentions: u32,
    pub alias_version: u64,
    pub index_stale: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn mode_follows_fields() {
        assert_eq!(QuerySpec::text("flight logs").mode().unwrap(), QueryMode::Semantic);
        assert_eq!(QuerySpec::entity("Clinton").mode().unwrap(), QueryMode::Entity);
        assert_eq!(
            QuerySpec::entities(["Clinton", "Epstein"]).mode().unwrap(),
            QueryMode::MultiEntity
        );
        assert_eq!(
            QuerySpec::entity("Clinton").with_text("island").mode().unwrap(),
            QueryMode::Hybrid
        );
        let range = DateRange::new(NaiveDate::from_ymd_opt(2002, 1, 1), None);
        assert_eq!(
            QuerySpec::entity("Clinton").with_date_range(range).mode().unwrap(),
            QueryMode::Temporal
        );
    }

    #[test]
    fn blank_text_with_filters_is_entity_mode() {
        let spec = QuerySpec::entity("Clinton").with_text("   ");
        assert_eq!(spec.mode().unwrap(), QueryMode::Entity);
    }

    #[test]
    fn empty_or_inverted_queries_are_invalid() {
        assert!(matches!(
            QuerySpec::default().mode(),
            Err(QueryError::InvalidQuery(_))
        ));
        let inverted = DateRange::new(
            NaiveDate::from_ymd_opt(2005, 1, 1),
            NaiveDate::from_ymd_opt(2004, 1, 1),
        );
        assert!(QuerySpec::entity("x").with_date_range(inverted).mode().is_err());
    }

    #[test]
    fn weights_normalize() {
        let w = HybridWeights::new(7.0, 3.0).normalized().unwrap();
        approx::assert_abs_diff_eq!(w.semantic, 0.7, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(w.graph, 0.3, epsilon = 1e-12);
        assert!(HybridWeights::new(0.0, 0.0).normalized().is_err());
        assert!(HybridWeights::new(-1.0, 2.0).normalized().is_err());
    }
}

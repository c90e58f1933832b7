//! String-similarity metrics for the fuzzy normalization fallback.
//!
//! The normalizer only ever sees `similarity(a, b) -> [0, 1]`, so swapping the
//! metric is a configuration change rather than a code change.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A symmetric name-similarity score in `[0, 1]` (1 = identical).
pub trait NameSimilarity: Send + Sync {
    fn name(&self) -> &'static str;

    fn similarity(&self, a: &str, b: &str) -> f64;
}

/// Jaro-Winkler: rewards shared prefixes, which suits person names where OCR
/// damage tends to hit the tail of a token.
#[derive(Debug, Clone, Copy, Default)]
pub struct JaroWinkler;

impl NameSimilarity for JaroWinkler {
    fn name(&self) -> &'static str {
        "jaro_winkler"
    }

    fn similarity(&self, a: &str, b: &str) -> f64 {
        strsim::jaro_winkler(a, b).clamp(0.0, 1.0)
    }
}

/// Levenshtein distance normalized by the longer string's length.
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizedLevenshtein;

impl NameSimilarity for NormalizedLevenshtein {
    fn name(&self) -> &'static str {
        "levenshtein"
    }

    fn similarity(&self, a: &str, b: &str) -> f64 {
        strsim::normalized_levenshtein(a, b).clamp(0.0, 1.0)
    }
}

/// Config-facing selector for the metric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    #[default]
    JaroWinkler,
    Levenshtein,
}

impl SimilarityMetric {
    pub fn build(self) -> Arc<dyn NameSimilarity> {
        match self {
            SimilarityMetric::JaroWinkler => Arc::new(JaroWinkler),
            SimilarityMetric::Levenshtein => Arc::new(NormalizedLevenshtein),
        }
    }
}

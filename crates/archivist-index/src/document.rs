//! Document metadata carried alongside embeddings, and metadata filters.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One canonical entity mentioned in a document, above the mention threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMention {
    pub entity: String,
    pub mentions: u32,
}

/// Metadata stored per document (immutable after build).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub doc_id: String,
    pub source: String,
    /// Primary date: supplied by the corpus, else the first detected date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    /// Every date detected in the text, sorted and de-duplicated.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dates: Vec<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub entities: Vec<EntityMention>,
}

impl DocumentMeta {
    pub fn mentions_of(&self, entity: &str) -> Option<u32> {
        self.entities
            .iter()
            .find(|m| m.entity == entity)
            .map(|m| m.mentions)
    }
}

/// Inclusive date range; either bound may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        Self { from, to }
    }

    pub fn is_open(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    /// `true` if `from > to` (nothing can match).
    pub fn is_inverted(&self) -> bool {
        matches!((self.from, self.to), (Some(f), Some(t)) if f > t)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from.map_or(true, |f| date >= f) && self.to.map_or(true, |t| date <= t)
    }

    /// A document matches only if it has a primary date inside the range.
    pub fn admits(&self, doc: &DocumentMeta) -> bool {
        doc.date.is_some_and(|d| self.contains(d))
    }
}

/// Conjunctive metadata filter applied to vector queries.
///
/// Entity names must already be canonical; the filter compares them verbatim
/// against the document's post-threshold mention list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilter {
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl MetadataFilter {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
            && self.date_range.map_or(true, |r| r.is_open())
            && self.source.is_none()
    }

    pub fn matches(&self, doc: &DocumentMeta) -> bool {
        if let Some(source) = &self.source {
            if doc.source != *source {
                return false;
            }
        }
        if let Some(range) = &self.date_range {
            if !range.is_open() && !range.admits(doc) {
                return false;
            }
        }
        self.entities
            .iter()
            .all(|e| doc.entities.iter().any(|m| m.entity == *e))
    }
}

//! Entity-document inverted index.
//!
//! Layout:
//! - document ids are interned to dense `u32`s (`doc_ids[i]` is the string id)
//! - `canonical entity -> (RoaringBitmap of docs, doc -> mention count)`
//! - `doc -> [(entity, mentions)]` for the reverse direction
//!
//! Bitmaps make the multi-entity AND a word-parallel intersection instead of a
//! hash-set walk. Only mentions at or above `min_mentions` are recorded, so the
//! index is rebuilt wholesale whenever the threshold or alias table changes.

use std::collections::BTreeMap;

use ahash::AHashMap;
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};

use crate::alias::AliasTable;
use crate::document::EntityMention;
use crate::names::text_tokens;
use crate::{IndexError, Result};

// ============================================================================
// Alias scanner
// ============================================================================

/// Longest-alias-first scanner over folded document tokens.
///
/// At each token position the longest alias that matches wins and the scan
/// jumps past it, so "Ghislaine Maxwell" is counted once for its canonical and
/// the trailing "Maxwell" is never re-counted on its own. Matches are whole
/// tokens only, so "Clinton" never fires inside "Clintonville".
#[derive(Debug, Clone, Default)]
pub struct AliasMatcher {
    /// first token -> (alias tokens, canonical), longest alias first
    by_first: AHashMap<String, Vec<(Vec<String>, String)>>,
    aliases: usize,
}

impl AliasMatcher {
    pub fn new(table: &AliasTable) -> Self {
        let mut by_first: AHashMap<String, Vec<(Vec<String>, String)>> = AHashMap::new();
        let mut aliases = 0;
        for (key, canonical) in table.keyed_entries() {
            let tokens: Vec<String> = key.split(' ').map(str::to_string).collect();
            let Some(first) = tokens.first().cloned() else {
                continue;
            };
            by_first
                .entry(first)
                .or_default()
                .push((tokens, canonical.to_string()));
            aliases += 1;
        }
        for candidates in by_first.values_mut() {
            candidates.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        }
        Self { by_first, aliases }
    }

    pub fn alias_count(&self) -> usize {
        self.aliases
    }

    /// Count canonical-entity mentions in `text`.
    pub fn scan(&self, text: &str) -> BTreeMap<String, u32> {
        let tokens = text_tokens(text);
        let mut counts: BTreeMap<String, u32> = BTreeMap::new();
        let mut i = 0;
        'outer: while i < tokens.len() {
            if let Some(candidates) = self.by_first.get(&tokens[i]) {
                for (alias, canonical) in candidates {
                    if tokens[i..].starts_with(alias) {
                        *counts.entry(canonical.clone()).or_insert(0) += 1;
                        i += alias.len();
                        continue 'outer;
                    }
                }
            }
            i += 1;
        }
        counts
    }
}

// ============================================================================
// Inverted index
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub doc_id: String,
    pub mentions: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct EntityPostings {
    docs: RoaringBitmap,
    mentions: BTreeMap<u32, u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "EntityIndexRepr", into = "EntityIndexRepr")]
pub struct EntityDocIndex {
    min_mentions: u32,
    doc_ids: Vec<String>,
    doc_lookup: AHashMap<String, u32>,
    postings: BTreeMap<String, EntityPostings>,
    /// Aligned with `doc_ids`; sorted by mentions desc, then name.
    doc_entities: Vec<Vec<EntityMention>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntityIndexRepr {
    min_mentions: u32,
    doc_ids: Vec<String>,
    postings: BTreeMap<String, EntityPostings>,
    doc_entities: Vec<Vec<EntityMention>>,
}

impl From<EntityIndexRepr> for EntityDocIndex {
    fn from(repr: EntityIndexRepr) -> Self {
        let doc_lookup = repr
            .doc_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i as u32))
            .collect();
        Self {
            min_mentions: repr.min_mentions,
            doc_ids: repr.doc_ids,
            doc_lookup,
            postings: repr.postings,
            doc_entities: repr.doc_entities,
        }
    }
}

impl From<EntityDocIndex> for EntityIndexRepr {
    fn from(index: EntityDocIndex) -> Self {
        Self {
            min_mentions: index.min_mentions,
            doc_ids: index.doc_ids,
            postings: index.postings,
            doc_entities: index.doc_entities,
        }
    }
}

impl EntityDocIndex {
    pub fn new(min_mentions: u32) -> Self {
        Self {
            min_mentions: min_mentions.max(1),
            ..Self::default()
        }
    }

    pub fn min_mentions(&self) -> u32 {
        self.min_mentions
    }

    /// Number of documents scanned into the index (including ones with no
    /// entity above threshold).
    pub fn document_count(&self) -> usize {
        self.doc_ids.len()
    }

    /// Number of entities with at least one posting.
    pub fn entity_count(&self) -> usize {
        self.postings.len()
    }

    pub fn entities(&self) -> impl Iterator<Item = &str> {
        self.postings.keys().map(String::as_str)
    }

    pub fn contains_document(&self, doc_id: &str) -> bool {
        self.doc_lookup.contains_key(doc_id)
    }

    pub fn doc_id(&self, idx: u32) -> Option<&str> {
        self.doc_ids.get(idx as usize).map(String::as_str)
    }

    /// Record one document's per-entity mention counts.
    ///
    /// Counts below the threshold are dropped. Returns the mentions that were kept.
    pub fn insert_document(
        &mut self,
        doc_id: &str,
        counts: &BTreeMap<String, u32>,
    ) -> Result<Vec<EntityMention>> {
        if self.doc_lookup.contains_key(doc_id) {
            return Err(IndexError::DuplicateDocument(doc_id.to_string()));
        }
        let idx = self.doc_ids.len() as u32;
        self.doc_ids.push(doc_id.to_string());
        self.doc_lookup.insert(doc_id.to_string(), idx);

        let mut kept: Vec<EntityMention> = counts
            .iter()
            .filter(|(_, &n)| n >= self.min_mentions)
            .map(|(entity, &mentions)| EntityMention {
                entity: entity.clone(),
                mentions,
            })
            .collect();
        kept.sort_by(|a, b| b.mentions.cmp(&a.mentions).then_with(|| a.entity.cmp(&b.entity)));

        for m in &kept {
            let postings = self.postings.entry(m.entity.clone()).or_default();
            postings.docs.insert(idx);
            postings.mentions.insert(idx, m.mentions);
        }
        self.doc_entities.push(kept.clone());
        Ok(kept)
    }

    /// Documents for one entity, by mention count desc then doc id.
    pub fn lookup(&self, entity: &str) -> Vec<Posting> {
        let Some(postings) = self.postings.get(entity) else {
            return Vec::new();
        };
        let mut out: Vec<Posting> = postings
            .mentions
            .iter()
            .filter_map(|(&idx, &mentions)| {
                Some(Posting {
                    doc_id: self.doc_id(idx)?.to_string(),
                    mentions,
                })
            })
            .collect();
        sort_postings(&mut out);
        out
    }

    pub fn docs_for(&self, entity: &str) -> RoaringBitmap {
        self.postings
            .get(entity)
            .map(|p| p.docs.clone())
            .unwrap_or_default()
    }

    pub fn mentions(&self, entity: &str, doc_id: &str) -> Option<u32> {
        let idx = self.doc_lookup.get(doc_id)?;
        self.postings.get(entity)?.mentions.get(idx).copied()
    }

    /// Documents mentioning **every** entity, ranked by summed mentions.
    ///
    /// An empty entity list yields no documents.
    pub fn intersect<S: AsRef<str>>(&self, entities: &[S]) -> Vec<Posting> {
        let mut acc: Option<RoaringBitmap> = None;
        for entity in entities {
            let Some(postings) = self.postings.get(entity.as_ref()) else {
                return Vec::new();
            };
            acc = Some(match acc {
                None => postings.docs.clone(),
                Some(mut bm) => {
                    bm &= &postings.docs;
                    bm
                }
            });
        }
        let Some(docs) = acc else {
            return Vec::new();
        };

        let mut out: Vec<Posting> = docs
            .iter()
            .filter_map(|idx| {
                let total = entities
                    .iter()
                    .filter_map(|e| self.postings.get(e.as_ref())?.mentions.get(&idx).copied())
                    .sum();
                Some(Posting {
                    doc_id: self.doc_id(idx)?.to_string(),
                    mentions: total,
                })
            })
            .collect();
        sort_postings(&mut out);
        out
    }

    /// Entities mentioned in `doc_id` (post-threshold).
    pub fn entities_in(&self, doc_id: &str) -> &[EntityMention] {
        self.doc_lookup
            .get(doc_id)
            .and_then(|&idx| self.doc_entities.get(idx as usize))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

fn sort_postings(postings: &mut [Posting]) {
    postings.sort_by(|a, b| {
        b.mentions
            .cmp(&a.mentions)
            .then_with(|| a.doc_id.cmp(&b.doc_id))
    });
}

//! Alias table, name normalizer, and the versioned alias snapshot store.
//!
//! Invariant: every alias key maps to exactly one canonical entity. Canonical
//! names are themselves registered as aliases of themselves, so a single map
//! (`key -> canonical`) enforces the "no duplicate entities" rule: a second
//! canonical can never claim a key that is already taken.
//!
//! Query-time code never mutates an [`AliasTable`] in place. It reads an
//! `Arc<AliasSnapshot>` from [`AliasStore`], and the disambiguation workflow
//! swaps a whole new snapshot in when a decision is committed.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use crate::names::{display_form, name_key};
use crate::similarity::NameSimilarity;
use crate::{IndexError, Result};

pub const ALIAS_TABLE_VERSION_V1: &str = "archivist_alias_table_v1";

// ============================================================================
// Seed file
// ============================================================================

/// A `{alias: canonical}` seed object with its entries in file order.
///
/// Repeated keys are kept, so a seed that maps one alias to two canonicals
/// fails in [`AliasTable::from_seed`] instead of the last entry winning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasSeed {
    pub entries: Vec<(String, String)>,
}

impl<'de> Deserialize<'de> for AliasSeed {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct SeedVisitor;

        impl<'de> Visitor<'de> for SeedVisitor {
            type Value = AliasSeed;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object mapping alias strings to canonical names")
            }

            fn visit_map<M: MapAccess<'de>>(self, mut map: M) -> std::result::Result<AliasSeed, M::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((alias, canonical)) = map.next_entry::<String, String>()? {
                    entries.push((alias, canonical));
                }
                Ok(AliasSeed { entries })
            }
        }

        deserializer.deserialize_map(SeedVisitor)
    }
}

// ============================================================================
// Alias table
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    /// Canonical display names in first-seen order (fuzzy tie-break order).
    canonicals: Vec<String>,
    /// Folded keys aligned with `canonicals`.
    canonical_keys: Vec<String>,
    /// alias key -> canonical display name
    by_key: HashMap<String, String>,
    /// alias key -> alias display form (as first written)
    display: HashMap<String, String>,
}

/// What a merge actually did to the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MergeOutcome {
    /// The alias was new and now points at `canonical`.
    AliasAdded { canonical: String },
    /// The alias already pointed at `canonical`.
    Unchanged { canonical: String },
    /// The alias was a variant of `from`; it now points at `canonical`.
    AliasRepointed { from: String, canonical: String },
    /// The alias named a whole canonical entity; that entity and all of its
    /// aliases now resolve to `canonical`.
    EntityMerged {
        from: String,
        canonical: String,
        moved: usize,
    },
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from a curated `{alias: canonical}` seed.
    pub fn from_seed<I, A, C>(seed: I) -> Result<Self>
    where
        I: IntoIterator<Item = (A, C)>,
        A: AsRef<str>,
        C: AsRef<str>,
    {
        let mut table = Self::new();
        for (alias, canonical) in seed {
            table.insert_alias(alias.as_ref(), canonical.as_ref())?;
        }
        Ok(table)
    }

    /// Parse the `{alias: canonical}` JSON seed format.
    pub fn from_seed_json(json: &str) -> Result<Self> {
        let seed: AliasSeed = serde_json::from_str(json).map_err(|e| IndexError::Corrupt {
            path: "<alias seed>".into(),
            message: e.to_string(),
        })?;
        Self::from_seed(seed.entries)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub fn canonical_count(&self) -> usize {
        self.canonicals.len()
    }

    /// Canonical names in first-seen order.
    pub fn canonical_names(&self) -> &[String] {
        &self.canonicals
    }

    pub(crate) fn canonical_keys(&self) -> &[String] {
        &self.canonical_keys
    }

    pub fn is_canonical(&self, name: &str) -> bool {
        let key = name_key(name);
        self.canonical_keys.iter().any(|k| *k == key)
    }

    /// Exact lookup on the folded key.
    pub fn lookup(&self, raw: &str) -> Option<&str> {
        let key = name_key(raw);
        if key.is_empty() {
            return None;
        }
        self.by_key.get(&key).map(String::as_str)
    }

    /// `(alias display form, canonical)` pairs, sorted by alias key.
    pub fn entries(&self) -> Vec<(String, String)> {
        let mut keys: Vec<&String> = self.by_key.keys().collect();
        keys.sort();
        keys.into_iter()
            .map(|k| {
                let shown = self.display.get(k).cloned().unwrap_or_else(|| k.clone());
                (shown, self.by_key[k].clone())
            })
            .collect()
    }

    /// `(alias key, canonical)` pairs; the key is what the document scanner matches.
    pub fn keyed_entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.by_key.iter().map(|(k, c)| (k.as_str(), c.as_str()))
    }

    /// Known variants of `canonical`, excluding the canonical name itself.
    pub fn aliases_of(&self, canonical: &str) -> Vec<String> {
        let own_key = name_key(canonical);
        let mut out: Vec<String> = self
            .by_key
            .iter()
            .filter(|(k, c)| c.as_str() == canonical && **k != own_key)
            .map(|(k, _)| self.display.get(k).cloned().unwrap_or_else(|| k.clone()))
            .collect();
        out.sort();
        out
    }

    /// Register a canonical entity. Returns `false` if it already existed.
    pub fn add_canonical(&mut self, name: &str) -> Result<bool> {
        let shown = display_form(name);
        let key = name_key(&shown);
        if key.is_empty() {
            return Err(IndexError::EmptyName(name.to_string()));
        }
        match self.by_key.get(&key) {
            Some(existing) if *existing == shown => Ok(false),
            Some(existing) => Err(IndexError::AliasConflict {
                alias: shown,
                existing: existing.clone(),
                requested: name.to_string(),
            }),
            None => {
                self.canonicals.push(shown.clone());
                self.canonical_keys.push(key.clone());
                self.display.insert(key.clone(), shown.clone());
                self.by_key.insert(key, shown);
                Ok(true)
            }
        }
    }

    /// Map `alias` to `canonical`, registering the canonical if needed.
    ///
    /// Returns `false` if the mapping already existed. An alias already owned
    /// by a different canonical is a conflict, never a silent re-point.
    pub fn insert_alias(&mut self, alias: &str, canonical: &str) -> Result<bool> {
        let canonical = display_form(canonical);
        let key = name_key(alias);
        if key.is_empty() {
            return Err(IndexError::EmptyName(alias.to_string()));
        }
        match self.by_key.get(&key) {
            Some(existing) if *existing == canonical => return Ok(false),
            Some(existing) => {
                return Err(IndexError::AliasConflict {
                    alias: alias.to_string(),
                    existing: existing.clone(),
                    requested: canonical,
                })
            }
            None => {}
        }

        let created = self.add_canonical(&canonical)?;
        if self.by_key.contains_key(&key) {
            // The alias is the canonical name itself.
            return Ok(created);
        }
        self.display.insert(key.clone(), display_form(alias));
        self.by_key.insert(key, canonical);
        Ok(true)
    }

    /// Point `alias` at `canonical`, re-pointing whatever it resolved to before.
    ///
    /// This is the only operation that moves an existing alias, and it is only
    /// reachable through a confirmed disambiguation decision. Nothing is ever
    /// deleted: a merged canonical survives as an alias of its new owner.
    pub fn merge(&mut self, alias: &str, canonical: &str) -> Result<MergeOutcome> {
        let alias_key = name_key(alias);
        if alias_key.is_empty() {
            return Err(IndexError::EmptyName(alias.to_string()));
        }
        let target_key = name_key(canonical);
        if target_key.is_empty() {
            return Err(IndexError::EmptyName(canonical.to_string()));
        }

        // A suggestion that is itself a variant resolves to its owner.
        let target = match self.by_key.get(&target_key) {
            Some(owner) => owner.clone(),
            None => {
                let shown = display_form(canonical);
                self.add_canonical(&shown)?;
                shown
            }
        };

        let Some(current) = self.by_key.get(&alias_key).cloned() else {
            self.display.insert(alias_key.clone(), display_form(alias));
            self.by_key.insert(alias_key, target.clone());
            return Ok(MergeOutcome::AliasAdded { canonical: target });
        };

        if current == target {
            return Ok(MergeOutcome::Unchanged { canonical: target });
        }

        if name_key(&current) == alias_key {
            // The alias names the entity `current` itself: fold it into `target`.
            let mut moved = 0;
            for owner in self.by_key.values_mut() {
                if *owner == current {
                    *owner = target.clone();
                    moved += 1;
                }
            }
            if let Some(pos) = self.canonicals.iter().position(|c| *c == current) {
                self.canonicals.remove(pos);
                self.canonical_keys.remove(pos);
            }
            return Ok(MergeOutcome::EntityMerged {
                from: current,
                canonical: target,
                moved,
            });
        }

        self.by_key.insert(alias_key, target.clone());
        Ok(MergeOutcome::AliasRepointed {
            from: current,
            canonical: target,
        })
    }

    /// Check the alias -> canonical mapping is a proper function onto the
    /// registered canonicals.
    pub fn check_invariants(&self) -> Result<()> {
        let mut seen: HashMap<&str, &str> = HashMap::new();
        for (canonical, key) in self.canonicals.iter().zip(&self.canonical_keys) {
            if let Some(other) = seen.insert(key.as_str(), canonical.as_str()) {
                return Err(IndexError::AliasConflict {
                    alias: key.clone(),
                    existing: other.to_string(),
                    requested: canonical.clone(),
                });
            }
            match self.by_key.get(key) {
                Some(owner) if owner == canonical => {}
                other => {
                    return Err(IndexError::AliasConflict {
                        alias: key.clone(),
                        existing: other.cloned().unwrap_or_default(),
                        requested: canonical.clone(),
                    })
                }
            }
        }
        for (key, owner) in &self.by_key {
            if !self.canonicals.iter().any(|c| c == owner) {
                return Err(IndexError::AliasConflict {
                    alias: key.clone(),
                    existing: owner.clone(),
                    requested: "<unregistered canonical>".to_string(),
                });
            }
        }
        Ok(())
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    pub fn to_file(&self, alias_version: u64) -> AliasTableFile {
        AliasTableFile {
            version: ALIAS_TABLE_VERSION_V1.to_string(),
            alias_version,
            canonicals: self.canonicals.clone(),
            aliases: self.entries().into_iter().collect(),
        }
    }

    pub fn from_file(file: &AliasTableFile, path: &Path) -> Result<Self> {
        if file.version != ALIAS_TABLE_VERSION_V1 {
            return Err(IndexError::VersionMismatch {
                path: path.to_path_buf(),
                found: file.version.clone(),
                expected: ALIAS_TABLE_VERSION_V1.to_string(),
            });
        }
        let mut table = Self::new();
        for canonical in &file.canonicals {
            table.add_canonical(canonical)?;
        }
        for (alias, canonical) in &file.aliases {
            table.insert_alias(alias, canonical)?;
        }
        table.check_invariants()?;
        Ok(table)
    }
}

/// On-disk form of the alias table (JSON; human-reviewable).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AliasTableFile {
    pub version: String,
    /// Snapshot version; bumps on every committed change.
    pub alias_version: u64,
    pub canonicals: Vec<String>,
    pub aliases: BTreeMap<String, String>,
}

// ============================================================================
// Normalizer
// ============================================================================

/// Outcome of normalizing one raw name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "match", rename_all = "snake_case")]
pub enum Resolution {
    Exact { canonical: String },
    Fuzzy { canonical: String, score: f64 },
    /// No canonical entity matched; `name` is the input as given.
    Unmapped { name: String },
}

impl Resolution {
    pub fn canonical(&self) -> Option<&str> {
        match self {
            Resolution::Exact { canonical } | Resolution::Fuzzy { canonical, .. } => {
                Some(canonical)
            }
            Resolution::Unmapped { .. } => None,
        }
    }

    pub fn is_mapped(&self) -> bool {
        self.canonical().is_some()
    }

    /// The canonical name, or the raw input when unmapped.
    pub fn into_name(self) -> String {
        match self {
            Resolution::Exact { canonical } | Resolution::Fuzzy { canonical, .. } => canonical,
            Resolution::Unmapped { name } => name,
        }
    }
}

/// Exact-then-fuzzy canonicalization over an [`AliasTable`].
///
/// Pure: the same table, metric and cutoff always give the same answer.
#[derive(Clone)]
pub struct NameNormalizer {
    metric: Arc<dyn NameSimilarity>,
    cutoff: f64,
}

impl std::fmt::Debug for NameNormalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NameNormalizer")
            .field("metric", &self.metric.name())
            .field("cutoff", &self.cutoff)
            .finish()
    }
}

impl NameNormalizer {
    pub fn new(metric: Arc<dyn NameSimilarity>, cutoff: f64) -> Self {
        Self {
            metric,
            cutoff: cutoff.clamp(0.0, 1.0),
        }
    }

    pub fn cutoff(&self) -> f64 {
        self.cutoff
    }

    pub fn resolve(&self, table: &AliasTable, raw: &str) -> Resolution {
        let key = name_key(raw);
        if key.is_empty() {
            return Resolution::Unmapped {
                name: raw.to_string(),
            };
        }
        if let Some(canonical) = table.by_key.get(&key) {
            return Resolution::Exact {
                canonical: canonical.clone(),
            };
        }

        // Strictly-greater keeps the first-seen canonical on ties.
        let mut best: Option<(usize, f64)> = None;
        for (idx, candidate) in table.canonical_keys().iter().enumerate() {
            let score = self.metric.similarity(&key, candidate);
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((idx, score));
            }
        }
        match best {
            Some((idx, score)) if score > self.cutoff => Resolution::Fuzzy {
                canonical: table.canonical_names()[idx].clone(),
                score,
            },
            _ => Resolution::Unmapped {
                name: raw.to_string(),
            },
        }
    }

    /// Canonical name for `raw`, or `raw` itself when nothing matches.
    pub fn normalize(&self, table: &AliasTable, raw: &str) -> String {
        self.resolve(table, raw).into_name()
    }
}

// ============================================================================
// Versioned snapshots
// ============================================================================

/// An immutable, versioned view of the alias table.
#[derive(Debug, Clone)]
pub struct AliasSnapshot {
    pub version: u64,
    pub table: AliasTable,
}

impl AliasSnapshot {
    pub fn next_version(&self) -> u64 {
        self.version + 1
    }
}

/// Copy-on-write holder for the live alias snapshot.
///
/// Readers take the lock only long enough to clone the `Arc`. Writers are
/// serialized by a separate mutex and publish by swapping the pointer, so a
/// reader sees either the old table or the new one, never a partial update.
#[derive(Debug)]
pub struct AliasStore {
    current: RwLock<Arc<AliasSnapshot>>,
    writer: Mutex<()>,
}

impl AliasStore {
    pub fn new(table: AliasTable, version: u64) -> Self {
        Self {
            current: RwLock::new(Arc::new(AliasSnapshot { version, table })),
            writer: Mutex::new(()),
        }
    }

    pub fn snapshot(&self) -> Arc<AliasSnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Run `f` inside the exclusive write section and publish its table.
    ///
    /// If `f` fails nothing is published and the live snapshot is untouched.
    pub fn commit<E, F>(&self, f: F) -> std::result::Result<Arc<AliasSnapshot>, E>
    where
        F: FnOnce(&AliasSnapshot) -> std::result::Result<AliasTable, E>,
    {
        let _guard = self.writer.lock();
        let current = self.snapshot();
        let table = f(&current)?;
        let next = Arc::new(AliasSnapshot {
            version: current.next_version(),
            table,
        });
        *self.current.write() = Arc::clone(&next);
        tracing::info!(version = next.version, "alias snapshot published");
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::JaroWinkler;

    fn seed() -> AliasTable {
        AliasTable::from_seed([
            ("Jeffrey Epstein", "Jeffrey Epstein"),
            ("Epstein", "Jeffrey Epstein"),
            ("Je Je Epstein", "Jeffrey Epstein"),
            ("Ghislaine Maxwell", "Ghislaine Maxwell"),
            ("Maxwell", "Ghislaine Maxwell"),
            ("Clinton", "Bill Clinton"),
        ])
        .unwrap()
    }

    fn normalizer() -> NameNormalizer {
        NameNormalizer::new(Arc::new(JaroWinkler), 0.85)
    }

    #[test]
    fn seed_json_rejects_an_alias_mapped_twice() {
        let err = AliasTable::from_seed_json(
            r#"{"Maxwell": "Ghislaine Maxwell", "Maxwell": "Robert Maxwell"}"#,
        )
        .unwrap_err();
        match err {
            IndexError::AliasConflict {
                existing,
                requested,
                ..
            } => {
                assert_eq!(existing, "Ghislaine Maxwell");
                assert_eq!(requested, "Robert Maxwell");
            }
            other => panic!("expected alias conflict, got {other:?}"),
        }
    }

    #[test]
    fn seed_json_keeps_file_order_for_canonicals() {
        let t = AliasTable::from_seed_json(
            r#"{"Zeta Person": "Zeta Person", "Alpha Person": "Alpha Person", "Zed": "Zeta Person"}"#,
        )
        .unwrap();
        assert_eq!(t.canonical_names(), ["Zeta Person", "Alpha Person"]);
        assert_eq!(t.lookup("zed"), Some("Zeta Person"));
    }

    #[test]
    fn exact_lookup_ignores_spacing_and_case() {
        let t = seed();
        assert_eq!(t.lookup("  epstein "), Some("Jeffrey Epstein"));
        assert_eq!(t.lookup("BILL   clinton"), Some("Bill Clinton"));
    }

    #[test]
    fn irregular_whitespace_duplicate_resolves() {
        let t = seed();
        let n = normalizer();
        assert_eq!(n.normalize(&t, "Je           Je Epstein"), "Jeffrey Epstein");
    }

    #[test]
    fn fuzzy_fallback_above_cutoff() {
        let t = seed();
        let n = normalizer();
        match n.resolve(&t, "Ghislane Maxwel") {
            Resolution::Fuzzy { canonical, score } => {
                assert_eq!(canonical, "Ghislaine Maxwell");
                assert!(score > 0.85);
            }
            other => panic!("expected fuzzy match, got {other:?}"),
        }
    }

    #[test]
    fn unknown_name_is_unmapped_not_error() {
        let t = seed();
        let n = normalizer();
        let r = n.resolve(&t, "Quentin Zzyzx");
        assert_eq!(
            r,
            Resolution::Unmapped {
                name: "Quentin Zzyzx".to_string()
            }
        );
        assert_eq!(n.normalize(&t, "Quentin Zzyzx"), "Quentin Zzyzx");
    }

    #[test]
    fn fuzzy_ties_prefer_first_seen_canonical() {
        let mut t = AliasTable::new();
        t.add_canonical("Anna Smith").unwrap();
        t.add_canonical("Anna Smyth").unwrap();
        // Equidistant from both spellings.
        let n = NameNormalizer::new(Arc::new(JaroWinkler), 0.5);
        let r = n.resolve(&t, "Anna Smxth");
        assert_eq!(r.canonical(), Some("Anna Smith"));
    }

    #[test]
    fn conflicting_alias_is_rejected() {
        let mut t = seed();
        let err = t.insert_alias("Maxwell", "Robert Maxwell").unwrap_err();
        assert!(matches!(err, IndexError::AliasConflict { .. }));
        // Table unchanged.
        assert_eq!(t.lookup("Maxwell"), Some("Ghislaine Maxwell"));
        t.check_invariants().unwrap();
    }

    #[test]
    fn merge_repoints_variant() {
        let mut t = seed();
        let out = t.merge("Maxwell", "Robert Maxwell").unwrap();
        assert_eq!(
            out,
            MergeOutcome::AliasRepointed {
                from: "Ghislaine Maxwell".to_string(),
                canonical: "Robert Maxwell".to_string()
            }
        );
        assert_eq!(t.lookup("maxwell"), Some("Robert Maxwell"));
        t.check_invariants().unwrap();
    }

    #[test]
    fn merge_folds_whole_entity() {
        let mut t = seed();
        t.add_canonical("B. Clinton").unwrap();
        t.insert_alias("Billy C", "B. Clinton").unwrap();
        let out = t.merge("B. Clinton", "Bill Clinton").unwrap();
        assert!(matches!(out, MergeOutcome::EntityMerged { moved: 2, .. }));
        assert_eq!(t.lookup("Billy C"), Some("Bill Clinton"));
        assert!(!t.canonical_names().iter().any(|c| c == "B. Clinton"));
        t.check_invariants().unwrap();
    }

    #[test]
    fn file_round_trip_keeps_order_and_mapping() {
        let t = seed();
        let file = t.to_file(3);
        let back = AliasTable::from_file(&file, Path::new("aliases.json")).unwrap();
        assert_eq!(back.canonical_names(), t.canonical_names());
        assert_eq!(back.entries(), t.entries());
    }

    #[test]
    fn store_commit_swaps_and_bumps_version() {
        let store = AliasStore::new(seed(), 1);
        let before = store.snapshot();
        let after = store
            .commit(|snap| -> Result<AliasTable> {
                let mut t = snap.table.clone();
                t.merge("Bubba", "Bill Clinton")?;
                Ok(t)
            })
            .unwrap();
        assert_eq!(after.version, 2);
        assert_eq!(before.table.lookup("Bubba"), None);
        assert_eq!(store.snapshot().table.lookup("Bubba"), Some("Bill Clinton"));
    }

    #[test]
    fn failed_commit_leaves_snapshot() {
        let store = AliasStore::new(seed(), 4);
        let res = store.commit(|_| -> Result<AliasTable> { Err(IndexError::EmptyName(String::new())) });
        assert!(res.is_err());
        assert_eq!(store.snapshot().version, 4);
    }
}

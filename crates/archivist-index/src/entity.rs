//! Canonical entity records.
//!
//! An entity is keyed by its canonical name; there is no surrogate id. Entities
//! are created the first time a build observes them and are never deleted:
//! a merge re-points the name, the record itself stays for provenance.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::alias::AliasTable;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Person,
    Organization,
    Location,
    #[default]
    Unknown,
}

/// Which sources an entity was observed in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    #[serde(default)]
    pub in_documents: bool,
    #[serde(default)]
    pub in_manifests: bool,
    #[serde(default)]
    pub in_contacts: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    #[serde(default)]
    pub entity_type: EntityType,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub provenance: Provenance,
}

impl Entity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity_type: EntityType::Unknown,
            aliases: Vec::new(),
            bio: None,
            tags: Vec::new(),
            provenance: Provenance::default(),
        }
    }
}

/// Curated descriptive data for an entity (`entities.json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntitySeed {
    pub name: String,
    #[serde(default)]
    pub entity_type: EntityType,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Document,
    Manifest,
    Contact,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityRegistry {
    entities: BTreeMap<String, Entity>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Entity> {
        self.entities.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// Record that `name` was seen in `source`, creating the entity on first sight.
    pub fn observe(&mut self, name: &str, source: SourceKind) {
        let entity = self
            .entities
            .entry(name.to_string())
            .or_insert_with(|| Entity::new(name));
        match source {
            SourceKind::Document => entity.provenance.in_documents = true,
            SourceKind::Manifest => entity.provenance.in_manifests = true,
            SourceKind::Contact => entity.provenance.in_contacts = true,
        }
    }

    /// Apply curated type/bio/tags. Seeds for names never observed are kept
    /// too, so a curated entity is visible before the corpus mentions it.
    pub fn apply_seed(&mut self, seed: &EntitySeed) {
        let entity = self
            .entities
            .entry(seed.name.clone())
            .or_insert_with(|| Entity::new(&seed.name));
        entity.entity_type = seed.entity_type;
        if seed.bio.is_some() {
            entity.bio = seed.bio.clone();
        }
        for tag in &seed.tags {
            if !entity.tags.contains(tag) {
                entity.tags.push(tag.clone());
            }
        }
    }

    /// Refresh every entity's alias list from the table.
    pub fn sync_aliases(&mut self, table: &AliasTable) {
        for entity in self.entities.values_mut() {
            entity.aliases = table.aliases_of(&entity.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observe_sets_provenance_flags() {
        let mut reg = EntityRegistry::new();
        reg.observe("Bill Clinton", SourceKind::Manifest);
        reg.observe("Bill Clinton", SourceKind::Document);
        let e = reg.get("Bill Clinton").unwrap();
        assert!(e.provenance.in_manifests);
        assert!(e.provenance.in_documents);
        assert!(!e.provenance.in_contacts);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn seed_and_alias_sync() {
        let mut reg = EntityRegistry::new();
        reg.apply_seed(&EntitySeed {
            name: "Bill Clinton".into(),
            entity_type: EntityType::Person,
            bio: Some("42nd US president".into()),
            tags: vec!["politician".into()],
        });
        let table = AliasTable::from_seed([("Clinton", "Bill Clinton")]).unwrap();
        reg.sync_aliases(&table);
        let e = reg.get("Bill Clinton").unwrap();
        assert_eq!(e.entity_type, EntityType::Person);
        assert_eq!(e.aliases, vec!["Clinton".to_string()]);
    }
}

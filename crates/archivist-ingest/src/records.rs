//! Structured co-occurrence sources and curated seed files.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use archivist_index::{AliasSeed, AliasTable, EntitySeed};
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// One flight manifest entry: everyone on board co-occurs once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestRecord {
    pub record_id: String,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    pub passengers: Vec<String>,
}

/// One address-book entry: the owner co-occurs once with each contact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContactRecord {
    pub record_id: String,
    pub owner: String,
    pub contacts: Vec<String>,
}

fn read_json<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {what} {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid {what} {}", path.display()))
}

/// JSON array of manifest records.
pub fn load_manifests(path: &Path) -> Result<Vec<ManifestRecord>> {
    read_json(path, "manifest file")
}

/// JSON array of contact records.
pub fn load_contacts(path: &Path) -> Result<Vec<ContactRecord>> {
    read_json(path, "contacts file")
}

/// JSON array of curated entity descriptions.
pub fn load_entity_seeds(path: &Path) -> Result<Vec<EntitySeed>> {
    read_json(path, "entity seed file")
}

/// `{alias: canonical}` JSON object, applied in file order.
pub fn load_alias_seed(path: &Path) -> Result<AliasTable> {
    let seed: AliasSeed = read_json(path, "alias seed")?;
    let table = AliasTable::from_seed(seed.entries)
        .with_context(|| format!("alias seed {} violates alias uniqueness", path.display()))?;
    tracing::info!(
        path = %path.display(),
        aliases = table.len(),
        canonicals = table.canonical_count(),
        "loaded alias seed"
    );
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_seed_conflict_names_both_sides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aliases.json");
        // Keys fold to the same alias: "maxwell".
        fs::write(
            &path,
            r#"{"Maxwell": "Ghislaine Maxwell", "MAXWELL": "Robert Maxwell"}"#,
        )
        .unwrap();
        let err = load_alias_seed(&path).unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("Ghislaine Maxwell"), "{msg}");
        assert!(msg.contains("Robert Maxwell"), "{msg}");
    }

    #[test]
    fn alias_seed_repeated_key_is_a_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aliases.json");
        fs::write(
            &path,
            r#"{"Epstein": "Jeffrey Epstein", "Epstein": "Mark Epstein"}"#,
        )
        .unwrap();
        let msg = format!("{:#}", load_alias_seed(&path).unwrap_err());
        assert!(msg.contains("Jeffrey Epstein"), "{msg}");
        assert!(msg.contains("Mark Epstein"), "{msg}");
    }

    #[test]
    fn alias_seed_canonicals_follow_file_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aliases.json");
        fs::write(
            &path,
            r#"{"Prince Andrew": "Prince Andrew", "Bill Clinton": "Bill Clinton"}"#,
        )
        .unwrap();
        let table = load_alias_seed(&path).unwrap();
        assert_eq!(table.canonical_names(), ["Prince Andrew", "Bill Clinton"]);
    }

    #[test]
    fn manifests_parse_with_optional_date() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flights.json");
        fs::write(
            &path,
            r#"[{"record_id":"f1","date":"2002-09-21","passengers":["Bill Clinton","Epstein"]},
               {"record_id":"f2","passengers":[]}]"#,
        )
        .unwrap();
        let records = load_manifests(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].date, None);
    }
}

//! Integration tests for the complete Archivist pipeline
//!
//! These tests verify end-to-end functionality across crates:
//! - Text-directory corpus → Build → Persisted artifacts → Query
//! - Manifests + contacts → Relationship graph → Connections / paths
//! - Review accept → Alias store → Live queries → Rebuild
//!
//! Run with: cargo test --test integration_tests

use std::fs;
use std::path::Path;
use std::sync::Arc;

use archivist_index::{
    AliasStore, AliasTable, CoContext, JaroWinkler, NameNormalizer, PathOutcome,
    TokenHashEmbedder,
};
use archivist_ingest::{
    load_corpus, BuildInputs, BuildOptions, BuildOutcome, ContactRecord, ManifestRecord,
    IndexBuilder,
};
use archivist_query::{QueryEngine, QuerySpec};
use archivist_storage::{
    load_artifacts, read_alias_table, save_build, ArtifactPaths, Decision, DisambiguationReview,
    RetrievalConfig,
};
use chrono::NaiveDate;
use tempfile::tempdir;

const DIM: usize = 128;

fn seed() -> AliasTable {
    AliasTable::from_seed([
        ("Bill Clinton", "Bill Clinton"),
        ("Clinton", "Bill Clinton"),
        ("Clinton Foundation", "Clinton Foundation"),
        ("Jeffrey Epstein", "Jeffrey Epstein"),
        ("Epstein", "Jeffrey Epstein"),
        ("Ghislaine Maxwell", "Ghislaine Maxwell"),
        ("Maxwell", "Ghislaine Maxwell"),
        ("Prince Andrew", "Prince Andrew"),
    ])
    .unwrap()
}

fn normalizer() -> NameNormalizer {
    NameNormalizer::new(Arc::new(JaroWinkler), 0.85)
}

fn write_corpus(root: &Path) {
    let files = [
        ("memos/m1.txt", "Clinton met Epstein. Clinton and Epstein flew to the island on 2002-09-21."),
        ("memos/m2.txt", "Bill Clinton spoke at the Clinton Foundation gala. Bill Clinton thanked donors. Clinton left early."),
        ("memos/m3.txt", "The Clinton Foundation report. The Clinton Foundation budget grew."),
        ("depositions/d1.txt", "Epstein and Maxwell planned the trip. Maxwell booked flights for Epstein. Epstein paid on 03/14/2005."),
        ("depositions/d2.txt", "  "),
    ];
    for (rel, text) in files {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }
}

fn manifests() -> Vec<ManifestRecord> {
    vec![ManifestRecord {
        record_id: "F1".into(),
        date: NaiveDate::from_ymd_opt(2002, 9, 21),
        passengers: vec!["Bill Clinton".into(), "Jeffrey Epstein".into()],
    }]
}

fn contacts() -> Vec<ContactRecord> {
    vec![ContactRecord {
        record_id: "C1".into(),
        owner: "Jeffrey Epstein".into(),
        contacts: vec!["Ghislaine Maxwell".into(), "Prince Andrew".into()],
    }]
}

/// Build from `corpus_dir` against `table` and persist under `paths`.
fn build_and_save(corpus_dir: &Path, paths: &ArtifactPaths, table: &AliasTable, version: u64) {
    let corpus = load_corpus(corpus_dir).unwrap();
    let normalizer = normalizer();
    let embedder = TokenHashEmbedder::new(DIM);
    let manifests = manifests();
    let contacts = contacts();
    let inputs = BuildInputs {
        corpus: &corpus,
        aliases: table,
        normalizer: &normalizer,
        embedder: &embedder,
        manifests: &manifests,
        contacts: &contacts,
        seeds: &[],
    };
    let options = BuildOptions {
        checkpoint_path: Some(paths.checkpoint()),
        ..BuildOptions::default()
    };
    let BuildOutcome::Complete(output) = IndexBuilder::new(inputs, options).unwrap().run().unwrap()
    else {
        panic!("unexpected suspension");
    };
    save_build(paths, &output, table, version).unwrap();
}

fn serve(paths: &ArtifactPaths, store: Arc<AliasStore>) -> QueryEngine {
    QueryEngine::with_alias_store(
        load_artifacts(paths).unwrap(),
        store,
        normalizer(),
        Arc::new(TokenHashEmbedder::new(DIM)),
        RetrievalConfig::default(),
    )
    .unwrap()
}

fn fixture() -> (tempfile::TempDir, ArtifactPaths) {
    let dir = tempdir().unwrap();
    write_corpus(&dir.path().join("corpus"));
    let paths = ArtifactPaths::new(dir.path().join("data"));
    build_and_save(&dir.path().join("corpus"), &paths, &seed(), 1);
    (dir, paths)
}

// ============================================================================
// Corpus → Build → Query
// ============================================================================

#[test]
fn test_text_directory_corpus_round_trips_to_queries() {
    let (_dir, paths) = fixture();
    let artifacts = load_artifacts(&paths).unwrap();
    assert!(!artifacts.index_is_stale());
    assert!(!paths.checkpoint().exists(), "a completed build leaves no checkpoint");

    let store = Arc::new(AliasStore::new(artifacts.aliases.clone(), artifacts.alias_version));
    let engine = serve(&paths, store);

    // "Clinton Foundation" is its own entity, never counted for Bill Clinton.
    let clinton = engine.query(&QuerySpec::entity("Clinton")).unwrap();
    assert_eq!(clinton.doc_ids(), vec!["memos/m2", "memos/m1"]);

    let depositions = engine
        .query(&QuerySpec::entity("Epstein").with_source("depositions"))
        .unwrap();
    assert_eq!(depositions.doc_ids(), vec!["depositions/d1"]);

    let stats = engine.stats();
    assert_eq!(stats.documents_ingested, 5);
    assert_eq!(stats.documents_failed, 1);
    assert_eq!(stats.documents_embedded, 4);
}

#[test]
fn test_structured_records_feed_the_graph() {
    let (_dir, paths) = fixture();
    let artifacts = load_artifacts(&paths).unwrap();
    let store = Arc::new(AliasStore::new(artifacts.aliases.clone(), artifacts.alias_version));
    let engine = serve(&paths, store);

    let connections = engine.connections("Epstein", None, None);
    let andrew = connections
        .connections
        .iter()
        .find(|c| c.entity == "Prince Andrew")
        .expect("contact edge to Prince Andrew");
    assert_eq!(andrew.contexts.get(&CoContext::Contact), Some(&1));

    let clinton = connections
        .connections
        .iter()
        .find(|c| c.entity == "Bill Clinton")
        .expect("edge to Bill Clinton");
    assert_eq!(clinton.contexts.get(&CoContext::Flight), Some(&1));

    let path = engine.shortest_path("Clinton", "Prince Andrew", None, None).unwrap();
    match path.outcome {
        PathOutcome::Found { path, hops, .. } => {
            assert_eq!(hops, 2);
            assert_eq!(path, vec!["Bill Clinton", "Jeffrey Epstein", "Prince Andrew"]);
        }
        PathOutcome::NotConnected => panic!("expected a path"),
    }
}

// ============================================================================
// Review → Live Aliases → Rebuild
// ============================================================================

#[test]
fn test_review_accept_is_live_and_rebuild_clears_staleness() {
    let (dir, paths) = fixture();
    let (table, version) = read_alias_table(&paths.aliases()).unwrap();
    assert_eq!(version, 1);
    let prior_entries = table.entries();

    let store = Arc::new(AliasStore::new(table, version));
    let engine = serve(&paths, Arc::clone(&store));
    let review = DisambiguationReview::open(paths.clone(), Arc::clone(&store)).unwrap();

    assert!(engine.query(&QuerySpec::entity("Bubba")).unwrap().is_empty());

    let proposal = review
        .propose("Bubba", "Bill Clinton", 0.92, "campaign nickname")
        .unwrap();
    let entry = review
        .decide(proposal.id, Decision::Accept, Some("analyst"))
        .unwrap();
    assert_eq!(entry.alias_version_before, 1);
    assert_eq!(entry.alias_version_after, 2);

    // The backup holds exactly the pre-accept table.
    let backup = entry.backup.expect("accept takes a backup");
    let (backed_up, backed_up_version) = review.read_backup(&backup).unwrap();
    assert_eq!(backed_up.entries(), prior_entries);
    assert_eq!(backed_up_version, 1);

    // Same engine, no restart: the new alias resolves immediately.
    let bubba = engine.query(&QuerySpec::entity("Bubba")).unwrap();
    assert_eq!(bubba.doc_ids(), vec!["memos/m2", "memos/m1"]);
    assert!(bubba.index_stale);
    assert_eq!(bubba.alias_version, 2);

    // Rebuild against the live table.
    let (live, live_version) = read_alias_table(&paths.aliases()).unwrap();
    assert_eq!(live_version, 2);
    build_and_save(&dir.path().join("corpus"), &paths, &live, live_version);
    let rebuilt = load_artifacts(&paths).unwrap();
    assert!(!rebuilt.index_is_stale());

    let store = Arc::new(AliasStore::new(rebuilt.aliases.clone(), rebuilt.alias_version));
    let engine = serve(&paths, store);
    let stats = engine.stats();
    assert_eq!(stats.alias_version, 2);
    assert!(!stats.index_stale);

    let log = review.changelog().unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].reviewer.as_deref(), Some("analyst"));
}

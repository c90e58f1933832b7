use std::sync::Arc;

use archivist_index::{AliasTable, JaroWinkler, NameNormalizer, TokenHashEmbedder};
use archivist_ingest::{
    BuildInputs, BuildOptions, BuildOutcome, BuildOutput, Corpus, DocumentRecord, IndexBuilder,
};
use proptest::prelude::*;

const NAMES: [&str; 4] = ["Bill Clinton", "Jeffrey Epstein", "Ghislaine Maxwell", "Prince Andrew"];

fn aliases() -> AliasTable {
    AliasTable::from_seed([
        ("Bill Clinton", "Bill Clinton"),
        ("Clinton", "Bill Clinton"),
        ("Jeffrey Epstein", "Jeffrey Epstein"),
        ("Epstein", "Jeffrey Epstein"),
        ("Ghislaine Maxwell", "Ghislaine Maxwell"),
        ("Maxwell", "Ghislaine Maxwell"),
        ("Prince Andrew", "Prince Andrew"),
    ])
    .unwrap()
}

fn corpus(n: usize) -> Corpus {
    Corpus::from_records((0..n).map(|i| {
        let a = NAMES[i % NAMES.len()];
        let b = NAMES[(i * 7 + 1) % NAMES.len()];
        let text = if i % 9 == 4 {
            "illegible".to_string()
        } else {
            format!("Memo {i}: {a} spoke with {b}. Later {a} and {b} met again on 2003-0{}-1{}.", i % 9 + 1, i % 10)
        };
        DocumentRecord {
            doc_id: format!("doc-{i:03}"),
            text,
            source: if i % 2 == 0 { "memos".into() } else { "depositions".into() },
            date: None,
            file_size: None,
        }
    }))
}

fn run(corpus: &Corpus, table: &AliasTable, options: BuildOptions) -> BuildOutcome {
    let normalizer = NameNormalizer::new(Arc::new(JaroWinkler), 0.85);
    let embedder = TokenHashEmbedder::new(32);
    let inputs = BuildInputs {
        corpus,
        aliases: table,
        normalizer: &normalizer,
        embedder: &embedder,
        manifests: &[],
        contacts: &[],
        seeds: &[],
    };
    IndexBuilder::new(inputs, options).unwrap().run().unwrap()
}

fn complete(outcome: BuildOutcome) -> BuildOutput {
    match outcome {
        BuildOutcome::Complete(out) => *out,
        BuildOutcome::Suspended { cursor, total } => panic!("suspended at {cursor}/{total}"),
    }
}

fn assert_same(a: &BuildOutput, b: &BuildOutput) {
    assert_eq!(a.graph, b.graph);
    assert_eq!(a.documents, b.documents);
    assert_eq!(a.failed, b.failed);
    assert_eq!(a.vectors.rows(), b.vectors.rows());
    for name in NAMES {
        assert_eq!(a.index.lookup(name), b.index.lookup(name), "postings for {name}");
    }
}

#[test]
fn suspended_build_resumes_to_identical_output() {
    let dir = tempfile::tempdir().unwrap();
    let ckpt = dir.path().join("build.ckpt");
    let corpus = corpus(40);
    let table = aliases();

    let reference = complete(run(&corpus, &table, BuildOptions::default()));

    let options = BuildOptions {
        checkpoint_path: Some(ckpt.clone()),
        shard_size: 4,
        checkpoint_every: 8,
        max_documents: Some(15),
        ..BuildOptions::default()
    };
    match run(&corpus, &table, options.clone()) {
        BuildOutcome::Suspended { cursor, total } => {
            assert_eq!(cursor, 15);
            assert_eq!(total, 40);
        }
        BuildOutcome::Complete(_) => panic!("expected suspension"),
    }
    assert!(ckpt.exists());

    let resumed = complete(run(
        &corpus,
        &table,
        BuildOptions {
            max_documents: None,
            ..options
        },
    ));
    assert_eq!(resumed.report.resumed_from, Some(15));
    assert_same(&reference, &resumed);
    // The output is not persisted yet, so the checkpoint must survive.
    assert!(ckpt.exists());
}

#[test]
fn checkpoint_for_other_aliases_is_not_resumed() {
    let dir = tempfile::tempdir().unwrap();
    let ckpt = dir.path().join("build.ckpt");
    let corpus = corpus(12);
    let table = aliases();
    let options = BuildOptions {
        checkpoint_path: Some(ckpt.clone()),
        shard_size: 3,
        max_documents: Some(6),
        ..BuildOptions::default()
    };
    assert!(matches!(run(&corpus, &table, options.clone()), BuildOutcome::Suspended { .. }));

    let mut changed = aliases();
    changed.insert_alias("Andrew", "Prince Andrew").unwrap();
    let out = complete(run(
        &corpus,
        &changed,
        BuildOptions {
            max_documents: None,
            ..options
        },
    ));
    assert_eq!(out.report.resumed_from, None);
}

#[test]
fn failed_documents_are_tracked_not_fatal() {
    let out = complete(run(&corpus(20), &aliases(), BuildOptions::default()));
    // doc-004 and doc-013 are "illegible" (9 chars < 20).
    let failed: Vec<&str> = out.failed.iter().map(|f| f.doc_id.as_str()).collect();
    assert_eq!(failed, vec!["doc-004", "doc-013"]);
    assert_eq!(out.vectors.len(), 18);
    assert!(out.vectors.get("doc-004").is_none());
    assert!(out.documents.iter().any(|d| d.doc_id == "doc-004"));
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 16,
        failure_persistence: None,
        ..ProptestConfig::default()
    })]

    #[test]
    fn shard_size_does_not_change_totals(shard_size in 1usize..17, n in 1usize..30) {
        let corpus = corpus(n);
        let table = aliases();
        let sequential = complete(run(&corpus, &table, BuildOptions { shard_size: 1, ..BuildOptions::default() }));
        let sharded = complete(run(&corpus, &table, BuildOptions { shard_size, ..BuildOptions::default() }));
        prop_assert_eq!(&sequential.graph, &sharded.graph);
        prop_assert_eq!(&sequential.documents, &sharded.documents);
        for name in NAMES {
            prop_assert_eq!(sequential.index.lookup(name), sharded.index.lookup(name));
        }
    }
}

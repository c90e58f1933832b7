use std::collections::BTreeSet;
use std::sync::Arc;

use archivist_index::{AliasTable, JaroWinkler, NameNormalizer, TokenHashEmbedder};
use archivist_ingest::{
    BuildInputs, BuildOptions, BuildOutcome, BuildOutput, Corpus, DocumentRecord, IndexBuilder,
};
use archivist_query::{HybridWeights, QueryEngine, QuerySpec};
use archivist_storage::{Artifacts, BuildManifest, RetrievalConfig, BUILD_MANIFEST_VERSION_V1};
use proptest::prelude::*;

const DIM: usize = 64;
const NAMES: [&str; 5] = ["Alpha Person", "Beta Person", "Gamma Person", "Delta Person", "Epsilon Person"];

fn table() -> AliasTable {
    AliasTable::from_seed(NAMES.iter().map(|n| (*n, *n))).unwrap()
}

fn normalizer() -> NameNormalizer {
    NameNormalizer::new(Arc::new(JaroWinkler), 0.85)
}

/// Each document mentions each name `counts[doc][name]` times.
fn corpus(counts: &[Vec<u8>]) -> Corpus {
    Corpus::from_records(counts.iter().enumerate().map(|(i, per_name)| {
        let mut text = format!("Record {i} of the archive.");
        for (name, &n) in NAMES.iter().zip(per_name) {
            for _ in 0..n {
                text.push_str(&format!(" {name} was noted."));
            }
        }
        DocumentRecord {
            doc_id: format!("doc-{i:03}"),
            text,
            source: "memos".into(),
            date: None,
            file_size: None,
        }
    }))
}

fn engine_for(output: BuildOutput, aliases: AliasTable) -> QueryEngine {
    let manifest = BuildManifest {
        version: BUILD_MANIFEST_VERSION_V1.to_string(),
        built_at: chrono::Utc::now(),
        alias_version: 1,
        embedder_model: output.vectors.model().to_string(),
        embedding_dim: output.vectors.dim(),
        min_mentions: output.index.min_mentions(),
        report: output.report.clone(),
    };
    let artifacts = Artifacts {
        aliases,
        alias_version: 1,
        registry: output.registry,
        index: output.index,
        graph: output.graph,
        vectors: output.vectors,
        documents: output.documents,
        failed: output.failed,
        manifest,
    };
    QueryEngine::from_artifacts(
        artifacts,
        normalizer(),
        Arc::new(TokenHashEmbedder::new(DIM)),
        RetrievalConfig::default(),
    )
    .unwrap()
}

fn build(counts: &[Vec<u8>]) -> QueryEngine {
    let aliases = table();
    let corpus = corpus(counts);
    let normalizer = normalizer();
    let embedder = TokenHashEmbedder::new(DIM);
    let inputs = BuildInputs {
        corpus: &corpus,
        aliases: &aliases,
        normalizer: &normalizer,
        embedder: &embedder,
        manifests: &[],
        contacts: &[],
        seeds: &[],
    };
    let BuildOutcome::Complete(output) =
        IndexBuilder::new(inputs, BuildOptions::default()).unwrap().run().unwrap()
    else {
        panic!("unexpected suspension");
    };
    engine_for(*output, aliases)
}

fn ids(engine: &QueryEngine, spec: &QuerySpec) -> BTreeSet<String> {
    engine
        .query(&spec.clone().with_limit(10_000))
        .unwrap()
        .hits
        .into_iter()
        .map(|h| h.doc_id)
        .collect()
}

fn counts_strategy() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(0u8..4, NAMES.len()), 1..20)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 24,
        failure_persistence: None,
        ..ProptestConfig::default()
    })]

    #[test]
    fn multi_entity_equals_intersection_of_singles(
        counts in counts_strategy(),
        a in 0usize..5,
        b in 0usize..5,
    ) {
        let engine = build(&counts);
        let single_a = ids(&engine, &QuerySpec::entity(NAMES[a]));
        let single_b = ids(&engine, &QuerySpec::entity(NAMES[b]));
        let multi = ids(&engine, &QuerySpec::entities([NAMES[a], NAMES[b]]));
        let expected: BTreeSet<String> = single_a.intersection(&single_b).cloned().collect();
        prop_assert_eq!(multi, expected);
    }

    #[test]
    fn entity_lookup_honours_mention_threshold(counts in counts_strategy(), a in 0usize..5) {
        let engine = build(&counts);
        let found = ids(&engine, &QuerySpec::entity(NAMES[a]));
        let min = BuildOptions::default().min_mentions;
        let expected: BTreeSet<String> = counts
            .iter()
            .enumerate()
            .filter(|(_, per_name)| u32::from(per_name[a]) >= min)
            .map(|(i, _)| format!("doc-{i:03}"))
            .collect();
        prop_assert_eq!(found, expected);
    }

    #[test]
    fn hybrid_hits_satisfy_filter_and_stay_in_range(
        counts in counts_strategy(),
        a in 0usize..5,
        semantic in 0.0f64..1.0,
        graph in 0.01f64..1.0,
    ) {
        let engine = build(&counts);
        let spec = QuerySpec::entity(NAMES[a])
            .with_text("archive record noted")
            .with_weights(HybridWeights::new(semantic, graph));
        let response = engine.query(&spec).unwrap();
        let entity_docs = ids(&engine, &QuerySpec::entity(NAMES[a]));
        for hit in &response.hits {
            prop_assert!(entity_docs.contains(&hit.doc_id));
            prop_assert!((0.0..=1.0 + 1e-9).contains(&hit.score));
        }
        prop_assert!(response.hits.windows(2).all(|w| w[0].score >= w[1].score));
    }
}

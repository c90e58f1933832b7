//! Offline build: corpus -> entity index + relationship graph + vector index.
//!
//! Documents are processed in shards. Within a shard every document is scanned
//! and embedded independently on the rayon pool; the shard's results are then
//! folded into the build state one by one, in corpus order. Because the fold
//! is sequential and every accumulation is a sum, the output is identical for
//! any shard size or thread count.
//!
//! After each shard the state may be checkpointed. A crash, an embedding
//! backend failure or a `max_documents` budget leaves a checkpoint the next run
//! resumes from. A completed run leaves the checkpoint in place too: only the
//! caller knows when the output is safely persisted, and it removes the file
//! then (see [`remove_checkpoint`]).

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use anyhow::{Context, Result};
use archivist_index::{
    display_form, AliasMatcher, AliasTable, CoContext, DocumentMeta, Embedder, EntityDocIndex,
    EntityRegistry, EntitySeed, NameNormalizer, RelationshipGraph, SourceKind, VectorIndex,
    VectorRow,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::checkpoint::{load_checkpoint, remove_checkpoint, save_checkpoint, BuildCheckpoint};
use crate::corpus::{Corpus, DocumentRecord};
use crate::dates::DateDetector;
use crate::records::{ContactRecord, ManifestRecord};

// ============================================================================
// Options / inputs / outputs
// ============================================================================

#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Minimum mentions for a document to count towards an entity.
    pub min_mentions: u32,
    /// Documents with fewer non-whitespace characters are recorded as failed.
    pub min_text_chars: usize,
    /// Write a checkpoint at least every this many documents (0 disables).
    pub checkpoint_every: usize,
    /// Documents per parallel shard.
    pub shard_size: usize,
    /// Whether document co-mentions contribute graph edges.
    pub document_co_mentions: bool,
    pub checkpoint_path: Option<PathBuf>,
    /// Ignore any existing checkpoint.
    pub fresh: bool,
    /// Process at most this many documents in this run, then suspend.
    pub max_documents: Option<usize>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            min_mentions: 2,
            min_text_chars: 20,
            checkpoint_every: 500,
            shard_size: 64,
            document_co_mentions: true,
            checkpoint_path: None,
            fresh: false,
            max_documents: None,
        }
    }
}

/// Everything a build reads.
#[derive(Clone, Copy)]
pub struct BuildInputs<'a> {
    pub corpus: &'a Corpus,
    pub aliases: &'a AliasTable,
    pub normalizer: &'a NameNormalizer,
    pub embedder: &'a dyn Embedder,
    pub manifests: &'a [ManifestRecord],
    pub contacts: &'a [ContactRecord],
    pub seeds: &'a [EntitySeed],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// No extractable characters at all.
    Empty,
    /// Some text, but less than the configured minimum.
    BelowMinimum { min_chars: usize },
}

/// A document excluded from the entity scan and the vector index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedDocument {
    pub doc_id: String,
    pub source: String,
    /// Non-whitespace characters found.
    pub chars: usize,
    pub reason: FailureReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
    pub documents_total: usize,
    pub documents_indexed: usize,
    pub documents_failed: usize,
    pub documents_embedded: usize,
    pub rejected_records: usize,
    /// Cursor the run resumed from, when a checkpoint was used.
    pub resumed_from: Option<usize>,
    pub checkpoints_written: usize,
    pub manifest_events: usize,
    pub contact_events: usize,
    pub document_events: usize,
    /// Manifest/contact names that matched no canonical entity.
    pub unmapped_participants: usize,
}

#[derive(Debug)]
pub struct BuildOutput {
    pub registry: EntityRegistry,
    pub index: EntityDocIndex,
    pub graph: RelationshipGraph,
    pub vectors: VectorIndex,
    /// Metadata for every accepted document, failed ones included.
    pub documents: Vec<DocumentMeta>,
    pub failed: Vec<FailedDocument>,
    pub report: BuildReport,
}

#[derive(Debug)]
pub enum BuildOutcome {
    Complete(Box<BuildOutput>),
    /// The document budget ran out; progress is in the checkpoint.
    Suspended { cursor: usize, total: usize },
}

// ============================================================================
// Builder
// ============================================================================

pub struct IndexBuilder<'a> {
    inputs: BuildInputs<'a>,
    options: BuildOptions,
    matcher: AliasMatcher,
    dates: DateDetector,
}

/// Per-document result of the parallel phase.
struct Scanned {
    meta: DocumentMeta,
    counts: BTreeMap<String, u32>,
    vector: Option<Vec<f32>>,
    failure: Option<FailedDocument>,
}

impl<'a> IndexBuilder<'a> {
    pub fn new(inputs: BuildInputs<'a>, options: BuildOptions) -> Result<Self> {
        Ok(Self {
            matcher: AliasMatcher::new(inputs.aliases),
            dates: DateDetector::new()?,
            inputs,
            options,
        })
    }

    /// Digest of the corpus plus every setting that changes build output.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.inputs.corpus.fingerprint().as_bytes());
        hasher.update(self.options.min_mentions.to_le_bytes());
        hasher.update((self.options.min_text_chars as u64).to_le_bytes());
        hasher.update([u8::from(self.options.document_co_mentions)]);
        hasher.update(self.inputs.embedder.model().as_bytes());
        hasher.update((self.inputs.embedder.dim() as u64).to_le_bytes());
        for (alias, canonical) in self.inputs.aliases.entries() {
            hasher.update(alias.as_bytes());
            hasher.update([0u8]);
            hasher.update(canonical.as_bytes());
            hasher.update([0u8]);
        }
        format!("{:x}", hasher.finalize())
    }

    pub fn run(&self) -> Result<BuildOutcome> {
        let docs = self.inputs.corpus.documents();
        let total = docs.len();
        let fingerprint = self.fingerprint();
        let mut report = BuildReport {
            documents_total: total,
            rejected_records: self.inputs.corpus.rejected().len(),
            ..BuildReport::default()
        };

        let mut state = self.initial_state(&fingerprint, &mut report)?;
        tracing::info!(
            documents = total,
            resume_at = state.cursor,
            aliases = self.matcher.alias_count(),
            "starting build"
        );

        let shard_size = self.options.shard_size.max(1);
        let mut since_checkpoint = 0usize;
        let mut processed_this_run = 0usize;

        while state.cursor < total {
            let budget = self
                .options
                .max_documents
                .map_or(usize::MAX, |max| max.saturating_sub(processed_this_run));
            if budget == 0 {
                self.checkpoint(&state, &mut report)?;
                tracing::info!(cursor = state.cursor, total, "build suspended");
                return Ok(BuildOutcome::Suspended {
                    cursor: state.cursor,
                    total,
                });
            }

            let end = (state.cursor + shard_size.min(budget)).min(total);
            let shard = &docs[state.cursor..end];
            let scanned: Vec<Result<Scanned>> =
                shard.par_iter().map(|doc| self.scan_document(doc)).collect();

            let scanned = match scanned.into_iter().collect::<Result<Vec<Scanned>>>() {
                Ok(s) => s,
                Err(e) => {
                    // Keep everything before this shard so the next run resumes here.
                    self.checkpoint(&state, &mut report)?;
                    return Err(e.context(format!(
                        "build interrupted at document {} of {total}",
                        state.cursor
                    )));
                }
            };

            for s in scanned {
                self.fold(&mut state, s, &mut report)?;
            }
            processed_this_run += end - state.cursor;
            since_checkpoint += end - state.cursor;
            state.cursor = end;
            tracing::debug!(cursor = state.cursor, total, "shard folded");

            if self.options.checkpoint_every > 0
                && since_checkpoint >= self.options.checkpoint_every
                && state.cursor < total
            {
                self.checkpoint(&state, &mut report)?;
                since_checkpoint = 0;
            }
        }

        let output = self.finish(state, report)?;
        Ok(BuildOutcome::Complete(Box::new(output)))
    }

    fn initial_state(&self, fingerprint: &str, report: &mut BuildReport) -> Result<BuildCheckpoint> {
        if let Some(path) = &self.options.checkpoint_path {
            if self.options.fresh {
                remove_checkpoint(path)?;
            } else if let Some(checkpoint) = load_checkpoint(path, fingerprint)? {
                tracing::info!(cursor = checkpoint.cursor, "resuming build from checkpoint");
                report.resumed_from = Some(checkpoint.cursor);
                return Ok(checkpoint);
            }
        }
        Ok(BuildCheckpoint {
            fingerprint: fingerprint.to_string(),
            cursor: 0,
            index: EntityDocIndex::new(self.options.min_mentions),
            graph: RelationshipGraph::new(),
            documents: Vec::new(),
            vectors: Vec::new(),
            failed: Vec::new(),
        })
    }

    fn checkpoint(&self, state: &BuildCheckpoint, report: &mut BuildReport) -> Result<()> {
        match &self.options.checkpoint_path {
            Some(path) => {
                save_checkpoint(path, state)?;
                report.checkpoints_written += 1;
            }
            None => tracing::warn!(
                cursor = state.cursor,
                "no checkpoint path configured; partial progress is not saved"
            ),
        }
        Ok(())
    }

    fn scan_document(&self, doc: &DocumentRecord) -> Result<Scanned> {
        let chars = doc.text.chars().filter(|c| !c.is_whitespace()).count();
        let mut meta = DocumentMeta {
            doc_id: doc.doc_id.clone(),
            source: doc.source.clone(),
            date: doc.date,
            dates: Vec::new(),
            file_size: doc.file_size.or(Some(doc.text.len() as u64)),
            entities: Vec::new(),
        };

        if chars < self.options.min_text_chars || chars == 0 {
            let reason = if chars == 0 {
                FailureReason::Empty
            } else {
                FailureReason::BelowMinimum {
                    min_chars: self.options.min_text_chars,
                }
            };
            return Ok(Scanned {
                failure: Some(FailedDocument {
                    doc_id: doc.doc_id.clone(),
                    source: doc.source.clone(),
                    chars,
                    reason,
                }),
                meta,
                counts: BTreeMap::new(),
                vector: None,
            });
        }

        meta.dates = self.dates.detect(&doc.text);
        if meta.date.is_none() {
            meta.date = self.dates.first_in_text(&doc.text);
        }
        let counts = self.matcher.scan(&doc.text);
        let vector = self
            .inputs
            .embedder
            .embed(&doc.text)
            .with_context(|| format!("failed to embed document `{}`", doc.doc_id))?;

        Ok(Scanned {
            meta,
            counts,
            vector: Some(vector),
            failure: None,
        })
    }

    fn fold(&self, state: &mut BuildCheckpoint, s: Scanned, report: &mut BuildReport) -> Result<()> {
        let Scanned {
            mut meta,
            counts,
            vector,
            failure,
        } = s;

        if let Some(failed) = failure {
            tracing::warn!(
                doc_id = %failed.doc_id,
                chars = failed.chars,
                min_chars = self.options.min_text_chars,
                "document below minimum text threshold; excluded"
            );
            state.failed.push(failed);
            state.documents.push(meta);
            return Ok(());
        }

        let kept = state.index.insert_document(&meta.doc_id, &counts)?;
        if self.options.document_co_mentions && kept.len() > 1 {
            let names: Vec<&str> = kept.iter().map(|m| m.entity.as_str()).collect();
            report.document_events += state.graph.record_group(&names, CoContext::Document);
        }
        meta.entities = kept;
        if let Some(vector) = vector {
            state.vectors.push(VectorRow {
                meta: meta.clone(),
                vector,
            });
        }
        state.documents.push(meta);
        Ok(())
    }

    /// Canonical name for a manifest/contact participant.
    ///
    /// Unmatched names are kept as new entities under their display form.
    fn participant(&self, raw: &str, report: &mut BuildReport) -> Option<String> {
        let resolution = self.inputs.normalizer.resolve(self.inputs.aliases, raw);
        if let Some(canonical) = resolution.canonical() {
            return Some(canonical.to_string());
        }
        let shown = display_form(raw);
        if shown.is_empty() {
            return None;
        }
        report.unmapped_participants += 1;
        tracing::debug!(name = %shown, "participant not in alias table; kept as new entity");
        Some(shown)
    }

    fn finish(&self, state: BuildCheckpoint, mut report: BuildReport) -> Result<BuildOutput> {
        let BuildCheckpoint {
            index,
            mut graph,
            documents,
            vectors: rows,
            failed,
            ..
        } = state;

        let mut registry = EntityRegistry::new();
        for entity in index.entities() {
            registry.observe(entity, SourceKind::Document);
        }

        for record in self.inputs.manifests {
            let names: BTreeSet<String> = record
                .passengers
                .iter()
                .filter_map(|p| self.participant(p, &mut report))
                .collect();
            for name in &names {
                registry.observe(name, SourceKind::Manifest);
            }
            let names: Vec<&str> = names.iter().map(String::as_str).collect();
            report.manifest_events += graph.record_group(&names, CoContext::Flight);
        }

        for record in self.inputs.contacts {
            let Some(owner) = self.participant(&record.owner, &mut report) else {
                tracing::warn!(record_id = %record.record_id, "contact record has no owner; skipped");
                continue;
            };
            registry.observe(&owner, SourceKind::Contact);
            let contacts: BTreeSet<String> = record
                .contacts
                .iter()
                .filter_map(|c| self.participant(c, &mut report))
                .collect();
            for contact in &contacts {
                registry.observe(contact, SourceKind::Contact);
                if graph.record(&owner, contact, CoContext::Contact) {
                    report.contact_events += 1;
                }
            }
        }

        for seed in self.inputs.seeds {
            let name = self.inputs.normalizer.normalize(self.inputs.aliases, &seed.name);
            registry.apply_seed(&EntitySeed {
                name,
                ..seed.clone()
            });
        }
        registry.sync_aliases(self.inputs.aliases);

        let mut vectors = VectorIndex::for_embedder(self.inputs.embedder);
        for row in rows {
            vectors.insert_vector(row.meta, row.vector)?;
        }

        report.documents_failed = failed.len();
        report.documents_indexed = index.document_count();
        report.documents_embedded = vectors.len();

        tracing::info!(
            indexed = report.documents_indexed,
            failed = report.documents_failed,
            embedded = report.documents_embedded,
            entities = registry.len(),
            graph_nodes = graph.node_count(),
            graph_edges = graph.edge_count(),
            "build complete"
        );

        Ok(BuildOutput {
            registry,
            index,
            graph,
            vectors,
            documents,
            failed,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archivist_index::{JaroWinkler, TokenHashEmbedder};
    use std::sync::Arc;

    fn doc(id: &str, text: &str) -> DocumentRecord {
        DocumentRecord {
            doc_id: id.to_string(),
            text: text.to_string(),
            source: "memos".to_string(),
            date: None,
            file_size: None,
        }
    }

    fn aliases() -> AliasTable {
        AliasTable::from_seed([
            ("Bill Clinton", "Bill Clinton"),
            ("Clinton", "Bill Clinton"),
            ("Jeffrey Epstein", "Jeffrey Epstein"),
            ("Epstein", "Jeffrey Epstein"),
        ])
        .unwrap()
    }

    fn complete(outcome: BuildOutcome) -> BuildOutput {
        match outcome {
            BuildOutcome::Complete(out) => *out,
            BuildOutcome::Suspended { cursor, .. } => panic!("suspended at {cursor}"),
        }
    }

    #[test]
    fn short_documents_fail_without_aborting() {
        let corpus = Corpus::from_records([
            doc("ok", "Clinton met Epstein. Clinton left; Epstein stayed on 2002-09-21."),
            doc("blank", "   \n "),
            doc("short", "Clinton"),
        ]);
        let table = aliases();
        let normalizer = NameNormalizer::new(Arc::new(JaroWinkler), 0.85);
        let embedder = TokenHashEmbedder::new(32);
        let inputs = BuildInputs {
            corpus: &corpus,
            aliases: &table,
            normalizer: &normalizer,
            embedder: &embedder,
            manifests: &[],
            contacts: &[],
            seeds: &[],
        };
        let out = complete(IndexBuilder::new(inputs, BuildOptions::default()).unwrap().run().unwrap());

        assert_eq!(out.failed.len(), 2);
        assert_eq!(out.failed[0].reason, FailureReason::Empty);
        assert!(matches!(out.failed[1].reason, FailureReason::BelowMinimum { .. }));
        assert_eq!(out.documents.len(), 3);
        assert_eq!(out.vectors.len(), 1);
        assert_eq!(out.index.document_count(), 1);
        assert_eq!(out.graph.weight("Bill Clinton", "Jeffrey Epstein"), 1);
        assert_eq!(
            out.documents[0].date,
            chrono::NaiveDate::from_ymd_opt(2002, 9, 21)
        );
    }

    #[test]
    fn manifests_and_contacts_feed_the_graph() {
        let corpus = Corpus::default();
        let table = aliases();
        let normalizer = NameNormalizer::new(Arc::new(JaroWinkler), 0.85);
        let embedder = TokenHashEmbedder::new(16);
        let manifests = vec![ManifestRecord {
            record_id: "f1".into(),
            date: None,
            passengers: vec!["Clinton".into(), "J. Epstein".into(), "Epstein".into(), "Doug Band".into()],
        }];
        let contacts = vec![ContactRecord {
            record_id: "c1".into(),
            owner: "Jeffrey Epstein".into(),
            contacts: vec!["Bill Clinton".into(), "Epstein".into()],
        }];
        let inputs = BuildInputs {
            corpus: &corpus,
            aliases: &table,
            normalizer: &normalizer,
            embedder: &embedder,
            manifests: &manifests,
            contacts: &contacts,
            seeds: &[],
        };
        let out = complete(IndexBuilder::new(inputs, BuildOptions::default()).unwrap().run().unwrap());

        // Flight + contact; the owner-to-self contact is not an edge.
        assert_eq!(out.graph.weight("Bill Clinton", "Jeffrey Epstein"), 2);
        let edge = out.graph.edge("Bill Clinton", "Jeffrey Epstein").unwrap();
        assert_eq!(edge.contexts[&CoContext::Flight], 1);
        assert_eq!(edge.contexts[&CoContext::Contact], 1);
        assert_eq!(out.graph.weight("Doug Band", "Bill Clinton"), 1);
        let band = out.registry.get("Doug Band").unwrap();
        assert!(band.provenance.in_manifests);
        assert!(out.report.unmapped_participants >= 1);
    }
}

//! Document corpus loading.
//!
//! The extraction pipeline hands us `(doc_id, text, source, date?)` tuples,
//! either as JSON Lines or as a directory tree of `.txt` files. Records are
//! validated here, at ingestion, so everything downstream can rely on a
//! non-empty unique id and a source tag.

use std::collections::HashSet;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

/// One extracted document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DocumentRecord {
    pub doc_id: String,
    pub text: String,
    pub source: String,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub file_size: Option<u64>,
}

/// A corpus entry refused at ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedRecord {
    /// 1-based line number for JSONL input, otherwise the file path.
    pub location: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct Corpus {
    documents: Vec<DocumentRecord>,
    rejected: Vec<RejectedRecord>,
}

impl Corpus {
    /// Validate records in order; malformed and duplicate ones are rejected.
    pub fn from_records<I: IntoIterator<Item = DocumentRecord>>(records: I) -> Self {
        let mut corpus = Self::default();
        let mut seen: HashSet<String> = HashSet::new();
        for (i, record) in records.into_iter().enumerate() {
            corpus.accept(record, format!("record {}", i + 1), &mut seen);
        }
        corpus
    }

    fn accept(&mut self, mut record: DocumentRecord, location: String, seen: &mut HashSet<String>) {
        record.doc_id = record.doc_id.trim().to_string();
        record.source = record.source.trim().to_string();
        let reason = if record.doc_id.is_empty() {
            Some("empty doc_id".to_string())
        } else if record.source.is_empty() {
            Some("empty source".to_string())
        } else if seen.contains(&record.doc_id) {
            Some(format!("duplicate doc_id `{}`", record.doc_id))
        } else {
            None
        };
        match reason {
            Some(reason) => {
                tracing::warn!(%location, %reason, "rejected corpus record");
                self.rejected.push(RejectedRecord { location, reason });
            }
            None => {
                seen.insert(record.doc_id.clone());
                self.documents.push(record);
            }
        }
    }

    pub fn documents(&self) -> &[DocumentRecord] {
        &self.documents
    }

    pub fn rejected(&self) -> &[RejectedRecord] {
        &self.rejected
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Stable digest of the accepted corpus (ids, sources and text), in order.
    ///
    /// A build checkpoint is only resumed against a corpus with the same fingerprint.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for doc in &self.documents {
            hasher.update(doc.doc_id.as_bytes());
            hasher.update([0u8]);
            hasher.update(doc.source.as_bytes());
            hasher.update([0u8]);
            hasher.update(Sha256::digest(doc.text.as_bytes()));
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Load a corpus from a `.jsonl` file or a directory of `.txt` files.
pub fn load_corpus(path: &Path) -> Result<Corpus> {
    if path.is_dir() {
        load_text_dir(path)
    } else {
        load_jsonl(path)
    }
}

/// One JSON object per line; blank lines are skipped.
pub fn load_jsonl(path: &Path) -> Result<Corpus> {
    let file =
        fs::File::open(path).with_context(|| format!("failed to open corpus {}", path.display()))?;
    let mut corpus = Corpus::default();
    let mut seen = HashSet::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line_no = i + 1;
        let line = line.with_context(|| format!("failed to read {} line {line_no}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<DocumentRecord>(&line) {
            Ok(record) => corpus.accept(record, format!("line {line_no}"), &mut seen),
            Err(e) => {
                tracing::warn!(line = line_no, error = %e, "malformed corpus line");
                corpus.rejected.push(RejectedRecord {
                    location: format!("line {line_no}"),
                    reason: format!("malformed record: {e}"),
                });
            }
        }
    }
    tracing::info!(
        path = %path.display(),
        documents = corpus.len(),
        rejected = corpus.rejected.len(),
        "loaded JSONL corpus"
    );
    Ok(corpus)
}

/// Walk `root` for `.txt` files.
///
/// The doc id is the relative path without extension (`/`-separated); the
/// source is its first path component, or `root` for top-level files.
pub fn load_text_dir(root: &Path) -> Result<Corpus> {
    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable corpus entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let is_txt = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("txt"));
        if is_txt {
            paths.push(entry.into_path());
        }
    }
    paths.sort();

    let mut corpus = Corpus::default();
    let mut seen = HashSet::new();
    for path in paths {
        let rel = path.strip_prefix(root).unwrap_or(&path);
        let components: Vec<String> = rel
            .with_extension("")
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        let doc_id = components.join("/");
        let source = if components.len() > 1 {
            components[0].clone()
        } else {
            "root".to_string()
        };

        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) => {
                corpus.rejected.push(RejectedRecord {
                    location: path.display().to_string(),
                    reason: format!("unreadable: {e}"),
                });
                continue;
            }
        };
        let record = DocumentRecord {
            doc_id,
            file_size: Some(bytes.len() as u64),
            text: String::from_utf8_lossy(&bytes).into_owned(),
            source,
            date: None,
        };
        corpus.accept(record, path.display().to_string(), &mut seen);
    }
    tracing::info!(
        root = %root.display(),
        documents = corpus.len(),
        rejected = corpus.rejected.len(),
        "loaded text directory corpus"
    );
    Ok(corpus)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> DocumentRecord {
        DocumentRecord {
            doc_id: id.to_string(),
            text: "text".to_string(),
            source: "s".to_string(),
            date: None,
            file_size: None,
        }
    }

    #[test]
    fn jsonl_rejects_malformed_lines_with_line_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.jsonl");
        fs::write(
            &path,
            concat!(
                r#"{"doc_id":"a","text":"hello","source":"flights","date":"2002-09-21"}"#, "\n",
                "\n",
                r#"{"doc_id":"b","source":"flights"}"#, "\n",
                r#"not json"#, "\n",
                r#"{"doc_id":"a","text":"again","source":"flights"}"#, "\n",
            ),
        )
        .unwrap();
        let corpus = load_jsonl(&path).unwrap();
        assert_eq!(corpus.len(), 1);
        assert_eq!(corpus.documents()[0].date, NaiveDate::from_ymd_opt(2002, 9, 21));
        let locations: Vec<&str> = corpus.rejected().iter().map(|r| r.location.as_str()).collect();
        assert_eq!(locations, vec!["line 3", "line 4", "line 5"]);
        assert!(corpus.rejected()[2].reason.contains("duplicate"));
    }

    #[test]
    fn text_dir_ids_and_sources() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("depositions")).unwrap();
        fs::write(dir.path().join("depositions/d-001.txt"), "sworn testimony").unwrap();
        fs::write(dir.path().join("memo.TXT"), "memo").unwrap();
        fs::write(dir.path().join("ignore.pdf"), "binary").unwrap();

        let corpus = load_corpus(dir.path()).unwrap();
        let ids: Vec<(&str, &str)> = corpus
            .documents()
            .iter()
            .map(|d| (d.doc_id.as_str(), d.source.as_str()))
            .collect();
        assert_eq!(ids, vec![("depositions/d-001", "depositions"), ("memo", "root")]);
        assert_eq!(corpus.documents()[0].file_size, Some(15));
    }

    #[test]
    fn fingerprint_tracks_content() {
        let a = Corpus::from_records([record("1"), record("2")]);
        let b = Corpus::from_records([record("1"), record("2")]);
        let mut changed = record("2");
        changed.text.push('!');
        let c = Corpus::from_records([record("1"), changed]);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn blank_ids_rejected() {
        let corpus = Corpus::from_records([record("  "), record("ok")]);
        assert_eq!(corpus.len(), 1);
        assert_eq!(corpus.rejected()[0].reason, "empty doc_id");
    }
}

//! Resumable build state.
//!
//! A checkpoint is a partial build: everything derived from the first
//! `cursor` documents of the corpus. It is only valid for the exact corpus and
//! build settings it was written against, which the `fingerprint` pins down.
//! A stale or unreadable checkpoint is discarded and the build starts over;
//! it is never an error, since the final artifacts do not depend on it.

use std::path::Path;

use anyhow::Result;
use archivist_index::sidecar::{read_versioned, write_versioned};
use archivist_index::{DocumentMeta, EntityDocIndex, IndexError, RelationshipGraph, VectorRow};
use serde::{Deserialize, Serialize};

use crate::build::FailedDocument;

pub const CHECKPOINT_VERSION_V1: &str = "archivist_build_checkpoint_v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildCheckpoint {
    pub fingerprint: String,
    /// Number of corpus documents fully processed.
    pub cursor: usize,
    pub index: EntityDocIndex,
    /// Document co-mention edges only; manifest and contact edges are cheap and
    /// recomputed on every run.
    pub graph: RelationshipGraph,
    pub documents: Vec<DocumentMeta>,
    pub vectors: Vec<VectorRow>,
    pub failed: Vec<FailedDocument>,
}

pub fn save_checkpoint(path: &Path, checkpoint: &BuildCheckpoint) -> Result<()> {
    write_versioned(path, CHECKPOINT_VERSION_V1, checkpoint)?;
    tracing::info!(
        path = %path.display(),
        cursor = checkpoint.cursor,
        "build checkpoint written"
    );
    Ok(())
}

/// Load a checkpoint usable for `fingerprint`, if there is one.
pub fn load_checkpoint(path: &Path, fingerprint: &str) -> Result<Option<BuildCheckpoint>> {
    let checkpoint = match read_versioned::<BuildCheckpoint>(path, CHECKPOINT_VERSION_V1) {
        Ok(file) => file.payload,
        Err(IndexError::Missing(_)) => return Ok(None),
        Err(e @ (IndexError::Corrupt { .. } | IndexError::VersionMismatch { .. })) => {
            tracing::warn!(path = %path.display(), error = %e, "discarding unreadable checkpoint");
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };
    if checkpoint.fingerprint != fingerprint {
        tracing::warn!(
            path = %path.display(),
            "checkpoint was written for a different corpus or settings; starting fresh"
        );
        return Ok(None);
    }
    Ok(Some(checkpoint))
}

pub fn remove_checkpoint(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(anyhow::Error::new(e).context(format!(
            "failed to remove checkpoint {}",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty(fingerprint: &str, cursor: usize) -> BuildCheckpoint {
        BuildCheckpoint {
            fingerprint: fingerprint.to_string(),
            cursor,
            index: EntityDocIndex::new(2),
            graph: RelationshipGraph::new(),
            documents: Vec::new(),
            vectors: Vec::new(),
            failed: Vec::new(),
        }
    }

    #[test]
    fn mismatched_fingerprint_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build.ckpt");
        save_checkpoint(&path, &empty("abc", 7)).unwrap();
        assert_eq!(load_checkpoint(&path, "abc").unwrap().map(|c| c.cursor), Some(7));
        assert!(load_checkpoint(&path, "other").unwrap().is_none());
    }

    #[test]
    fn corrupt_checkpoint_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build.ckpt");
        std::fs::write(&path, [0xffu8, 0x00, 0x13]).unwrap();
        assert!(load_checkpoint(&path, "abc").unwrap().is_none());
        remove_checkpoint(&path).unwrap();
        remove_checkpoint(&path).unwrap();
    }
}

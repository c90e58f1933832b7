//! Versioned CBOR artifact files.
//!
//! Every binary artifact (entity index, graph, vectors, build checkpoint) is
//! wrapped in the same envelope so a reader can reject files written by an
//! incompatible build before trying to decode the payload. Writes go to a
//! `*.tmp` sibling first and are renamed into place, so a crashed writer never
//! leaves a half-written artifact under the real name.

use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{IndexError, Result};

pub const ENTITY_INDEX_VERSION_V1: &str = "archivist_entity_index_v1";
pub const GRAPH_VERSION_V1: &str = "archivist_relationship_graph_v1";
pub const VECTOR_INDEX_VERSION_V1: &str = "archivist_vector_index_v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionedFile<T> {
    pub version: String,
    pub created_at_unix_secs: u64,
    pub payload: T,
}

/// Only the header, so a version check does not decode the payload.
#[derive(Debug, Deserialize)]
struct Header {
    version: String,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> IndexError + '_ {
    move |source| IndexError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Write `payload` under `version`, atomically replacing `path`.
pub fn write_versioned<T: Serialize>(path: &Path, version: &str, payload: &T) -> Result<()> {
    #[derive(Serialize)]
    struct Borrowed<'a, T> {
        version: &'a str,
        created_at_unix_secs: u64,
        payload: &'a T,
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    let tmp = path.with_extension("tmp");
    let mut f = fs::File::create(&tmp).map_err(io_err(&tmp))?;
    ciborium::ser::into_writer(
        &Borrowed {
            version,
            created_at_unix_secs: now_unix_secs(),
            payload,
        },
        &mut f,
    )
    .map_err(|e| IndexError::Encode {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    f.sync_all().map_err(io_err(&tmp))?;
    drop(f);
    fs::rename(&tmp, path).map_err(io_err(path))?;
    Ok(())
}

/// Read a file written by [`write_versioned`], checking its version tag.
pub fn read_versioned<T: DeserializeOwned>(path: &Path, expected: &str) -> Result<VersionedFile<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(IndexError::Missing(path.to_path_buf()))
        }
        Err(e) => return Err(io_err(path)(e)),
    };

    let header: Header =
        ciborium::de::from_reader(bytes.as_slice()).map_err(|e| IndexError::Corrupt {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    if header.version != expected {
        return Err(IndexError::VersionMismatch {
            path: path.to_path_buf(),
            found: header.version,
            expected: expected.to_string(),
        });
    }

    ciborium::de::from_reader(bytes.as_slice()).map_err(|e| IndexError::Corrupt {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

//! Local encoding cache.
//!
//! On-disk format:
//! `{"encodings": [{"student_id": 7, "name": "Ana", "encoding": [0.01, ...]}]}`
//! with an optional `"model_version"` per entry.

use rollcall_core::{Embedding, KnownEncodings, StudentId};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("encoding cache {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("embedding for student {student_id} has non-finite values")]
    NonFinite { student_id: StudentId },
    #[error("encoding cache {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    pub fn is_corrupt(&self) -> bool {
        matches!(self, StoreError::Corrupt { .. })
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    #[serde(default)]
    encodings: Vec<CacheEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    student_id: StudentId,
    name: String,
    encoding: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model_version: Option<String>,
}

/// File-backed store of enrolled embeddings, keyed by student id.
#[derive(Debug, Clone)]
pub struct EmbeddingStore {
    path: PathBuf,
}

impl EmbeddingStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every entry. A missing file is created empty.
    pub fn load(&self) -> Result<KnownEncodings, StoreError> {
        let file = self.read_or_init()?;
        let known: KnownEncodings = file
            .encodings
            .into_iter()
            .map(|e| rollcall_core::KnownEncoding {
                student_id: e.student_id,
                name: e.name,
                embedding: Embedding {
                    values: e.encoding,
                    model_version: e.model_version,
                },
            })
            .collect();
        tracing::debug!(path = %self.path.display(), count = known.len(), "loaded encodings");
        Ok(known)
    }

    /// Insert or replace the entry for `student_id`.
    ///
    /// NaN or infinite components are rejected; JSON cannot hold them.
    pub fn upsert(
        &self,
        student_id: StudentId,
        name: &str,
        embedding: &Embedding,
    ) -> Result<(), StoreError> {
        if !embedding.is_finite() {
            return Err(StoreError::NonFinite { student_id });
        }
        let mut file = self.read_or_init()?;
        file.encodings.retain(|e| e.student_id != student_id);
        file.encodings.push(CacheEntry {
            student_id,
            name: name.to_string(),
            encoding: embedding.values.clone(),
            model_version: embedding.model_version.clone(),
        });
        self.write_atomic(&file)?;
        tracing::info!(student_id, name, dim = embedding.dim(), "stored encoding");
        Ok(())
    }

    /// Remove the entry for `student_id`; returns whether one existed.
    pub fn remove(&self, student_id: StudentId) -> Result<bool, StoreError> {
        let mut file = self.read_or_init()?;
        let before = file.encodings.len();
        file.encodings.retain(|e| e.student_id != student_id);
        if file.encodings.len() == before {
            return Ok(false);
        }
        self.write_atomic(&file)?;
        tracing::info!(student_id, "removed encoding");
        Ok(true)
    }

    fn read_or_init(&self) -> Result<CacheFile, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let empty = CacheFile::default();
                self.write_atomic(&empty)?;
                tracing::info!(path = %self.path.display(), "created empty encoding cache");
                return Ok(empty);
            }
            Err(source) => return Err(self.io_err(source)),
        };

        serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    /// Write to a temp file beside the cache, then rename over it.
    fn write_atomic(&self, file: &CacheFile) -> Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(|e| self.io_err(e))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| self.io_err(e))?;
        serde_json::to_writer(&mut tmp, file).map_err(|e| self.io_err(e.into()))?;
        tmp.flush().map_err(|e| self.io_err(e))?;
        tmp.as_file().sync_all().map_err(|e| self.io_err(e))?;
        tmp.persist(&self.path).map_err(|e| self.io_err(e.error))?;
        Ok(())
    }

    fn io_err(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

//! Enrollment photos kept in a local directory.

use rollcall_core::records::{ImageStore, RecordError};
use std::fs;
use std::path::{Path, PathBuf};

pub struct LocalImageStore {
    dir: PathBuf,
}

impl LocalImageStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Lower-cased extension of `filename`, or `jpg` when it has none.
fn extension_of(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| "jpg".to_string())
}

impl ImageStore for LocalImageStore {
    /// Store under a fresh random name; returns the written path.
    fn save(&self, image_bytes: &[u8], filename: &str) -> Result<String, RecordError> {
        fs::create_dir_all(&self.dir)?;
        let name = format!("{}.{}", uuid::Uuid::new_v4().simple(), extension_of(filename));
        let path = self.dir.join(name);
        fs::write(&path, image_bytes)?;
        tracing::debug!(path = %path.display(), bytes = image_bytes.len(), "saved enrollment image");
        Ok(path.to_string_lossy().into_owned())
    }

    fn remove(&self, image_ref: &str) -> Result<(), RecordError> {
        match fs::remove_file(image_ref) {
            Ok(()) => {
                tracing::debug!(path = image_ref, "removed enrollment image");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

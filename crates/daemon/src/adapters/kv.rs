//! Embedded key-value cache: opaque byte store for job descriptors and the
//! queue snapshot, generalizing the teacher's `jobs.rs` save/load pattern
//! (one JSON file per key) into a trait with a filesystem implementation.

use crate::error::KvError;
use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};

/// `get/set/has` on opaque bytes.
#[async_trait]
pub trait KvCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError>;
    async fn set(&self, key: &str, bytes: &[u8]) -> Result<(), KvError>;
    async fn has(&self, key: &str) -> Result<bool, KvError>;
}

/// Filesystem-backed KvCache: one file per key under `dir`, written via a
/// temp-file-then-rename so a crash mid-write never leaves a torn entry.
pub struct FsKvCache {
    dir: PathBuf,
}

impl FsKvCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let safe = key.replace(['/', '\\'], "_");
        self.dir.join(format!("{safe}.json"))
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[async_trait]
impl KvCache for FsKvCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        let path = self.path_for(key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(KvError::Io(e)),
        }
    }

    async fn set(&self, key: &str, bytes: &[u8]) -> Result<(), KvError> {
        write_atomic(&self.path_for(key), bytes).map_err(KvError::Io)
    }

    async fn has(&self, key: &str) -> Result<bool, KvError> {
        Ok(self.path_for(key).exists())
    }
}

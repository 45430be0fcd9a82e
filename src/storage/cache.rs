//! Artifact cache
//!
//! Converted artifacts live in one flat directory shared by every session
//! and every process:
//!
//! ```text
//! <root>/
//! ├── 3f2a9c0d11e4b7a5.png        # committed artifact
//! └── 3f2a9c0d11e4b7a5.tmp.png    # conversion in progress
//! ```
//!
//! File names are derived from a key string (usually the source path), not
//! from file content. A final path is only ever created by renaming its
//! temp path, so a reader that sees a final path sees a complete artifact.

use std::cell::Cell;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Serialize;
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Conversion produced no artifact at {0}")]
    MissingArtifact(PathBuf),
}

impl CacheError {
    fn io(path: &Path, source: io::Error) -> Self {
        CacheError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Paths of one cache identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub final_path: PathBuf,
    pub temp_path: PathBuf,

    /// Whether the final artifact already exists
    pub exists: bool,
}

/// Storage for converted artifacts
pub trait CacheStore {
    /// Resolves the paths for a key and checks whether it is converted
    fn lookup(&self, key: &str, ext: &str) -> Result<CacheEntry, CacheError>;

    /// Publishes the temp artifact under its final path
    fn commit(&self, entry: &CacheEntry) -> Result<(), CacheError>;

    /// Removes a temp artifact, if any
    fn discard(&self, temp_path: &Path);
}

/// Derives the cache identity of a key
pub fn identity(key: &str) -> String {
    format!("{:016x}", xxh3_64(key.as_bytes()))
}

/// Cache contents summary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub artifacts: usize,
    pub temporaries: usize,
    pub bytes: u64,
}

/// Classifies a file name: Some(true) for temp files, Some(false) for
/// artifacts, None for anything not written by the cache
fn classify_name(name: &str) -> Option<bool> {
    let (hash, rest) = name.split_once('.')?;
    if hash.len() != 16 || !hash.chars().all(|c| c.is_ascii_hexdigit()) || rest.is_empty() {
        return None;
    }
    Some(rest.starts_with("tmp."))
}

/// Cache stored in a directory on disk
pub struct DiskCache {
    root: PathBuf,

    /// Set once the root directory is known to exist
    ready: Cell<bool>,
}

impl DiskCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ready: Cell::new(false),
        }
    }

    /// Returns the platform cache directory for dcmview
    pub fn default_root() -> Option<PathBuf> {
        ProjectDirs::from("org", "dcmview", "dcmview").map(|dirs| dirs.cache_dir().to_path_buf())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Computes the paths of a key without touching the disk
    pub fn paths(&self, key: &str, ext: &str) -> (PathBuf, PathBuf) {
        let hash = identity(key);
        (
            self.root.join(format!("{hash}.{ext}")),
            self.root.join(format!("{hash}.tmp.{ext}")),
        )
    }

    fn ensure_root(&self) -> Result<(), CacheError> {
        if !self.ready.get() {
            fs::create_dir_all(&self.root).map_err(|e| CacheError::io(&self.root, e))?;
            self.ready.set(true);
        }
        Ok(())
    }

    fn cache_files(&self) -> Result<Vec<(PathBuf, bool)>, CacheError> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.root).map_err(|e| CacheError::io(&self.root, e))?;
        Ok(entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name();
                let temp = classify_name(name.to_str()?)?;
                Some((entry.path(), temp))
            })
            .collect())
    }

    /// Counts artifacts and leftover temp files
    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        let mut stats = CacheStats::default();
        for (path, temp) in self.cache_files()? {
            if temp {
                stats.temporaries += 1;
            } else {
                stats.artifacts += 1;
            }
            stats.bytes += fs::metadata(&path).map(|meta| meta.len()).unwrap_or(0);
        }
        Ok(stats)
    }

    /// Removes every artifact and temp file, returning how many were removed
    pub fn clear(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        for (path, _) in self.cache_files()? {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                // Another session may have committed or discarded it meanwhile
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(CacheError::io(&path, e)),
            }
        }
        Ok(removed)
    }
}

impl CacheStore for DiskCache {
    fn lookup(&self, key: &str, ext: &str) -> Result<CacheEntry, CacheError> {
        self.ensure_root()?;
        let (final_path, temp_path) = self.paths(key, ext);
        let exists = final_path.is_file();

        Ok(CacheEntry {
            final_path,
            temp_path,
            exists,
        })
    }

    fn commit(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        if !entry.temp_path.is_file() {
            return Err(CacheError::MissingArtifact(entry.temp_path.clone()));
        }

        // Atomic rename; a concurrent duplicate conversion simply wins last
        fs::rename(&entry.temp_path, &entry.final_path)
            .map_err(|e| CacheError::io(&entry.final_path, e))
    }

    fn discard(&self, temp_path: &Path) {
        match fs::remove_file(temp_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove {}: {}", temp_path.display(), e),
        }
    }
}

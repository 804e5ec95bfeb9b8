//! Durable storage of the committed executions map.
//!
//! The agent cannot honor its port and lifecycle invariants without a
//! durable record of what it has committed to running, so the store
//! contract is strict: a write either fully replaces the previous map or
//! leaves it untouched. The file-backed implementation serializes to a
//! temporary file in the target directory, fsyncs it, and renames it over
//! the target.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

use crate::job::{Execution, JobId};

/// The committed executions, keyed by job id.
pub type ExecutionsMap = BTreeMap<JobId, Execution>;

/// Version of the on-disk executions file format.
pub const STORE_FORMAT_VERSION: u32 = 1;

/// Errors that can occur while loading or persisting executions.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O failure reading or writing the executions file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The executions file could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// The executions file was written by a newer, unknown format version.
    #[error("unsupported executions file version {found}")]
    UnsupportedVersion {
        /// The version found in the file.
        found: u32,
    },
}

/// Atomic, durable storage of one [`ExecutionsMap`] value.
///
/// Only the reconciler writes through this trait, and it does so before
/// mutating any supervisor (write-ahead).
pub trait ExecutionsStore: Send {
    /// Load the stored map. A store that has never been written yields the
    /// empty map.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored value cannot be read or decoded.
    fn load(&mut self) -> Result<ExecutionsMap, StoreError>;

    /// Atomically replace the stored map.
    ///
    /// On return the new map is durable; on error the previous map is
    /// still intact. There is no torn intermediate state.
    ///
    /// # Errors
    ///
    /// Returns an error if the map cannot be serialized or written. The
    /// caller treats this as fatal.
    fn set(&mut self, map: &ExecutionsMap) -> Result<(), StoreError>;
}

/// Self-describing envelope for the on-disk file.
#[derive(Debug, Serialize, Deserialize)]
struct StoredExecutions {
    version: u32,
    written_at: DateTime<Utc>,
    executions: ExecutionsMap,
}

/// File-backed [`ExecutionsStore`] with atomic-replace semantics.
#[derive(Debug)]
pub struct FileExecutionsStore {
    path: PathBuf,
}

impl FileExecutionsStore {
    /// Create a store backed by the given file path. The file is created
    /// on the first write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ExecutionsStore for FileExecutionsStore {
    fn load(&mut self) -> Result<ExecutionsMap, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no executions file; starting empty");
                return Ok(ExecutionsMap::new());
            },
            Err(e) => return Err(e.into()),
        };
        let stored: StoredExecutions = serde_json::from_slice(&bytes)?;
        if stored.version != STORE_FORMAT_VERSION {
            return Err(StoreError::UnsupportedVersion {
                found: stored.version,
            });
        }
        Ok(stored.executions)
    }

    fn set(&mut self, map: &ExecutionsMap) -> Result<(), StoreError> {
        let stored = StoredExecutions {
            version: STORE_FORMAT_VERSION,
            written_at: Utc::now(),
            executions: map.clone(),
        };
        // The temp file must live in the target directory so the final
        // rename stays on one filesystem.
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut tmp = NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(tmp.as_file_mut(), &stored)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;
        // Make the rename itself durable.
        File::open(&dir)?.sync_all()?;
        debug!(
            path = %self.path.display(),
            executions = map.len(),
            "persisted executions file"
        );
        Ok(())
    }
}

/// In-memory [`ExecutionsStore`] for tests and embedding.
///
/// Counts writes so callers can assert that idempotent reconciliation
/// passes do not touch the store.
#[derive(Debug, Default)]
pub struct MemoryExecutionsStore {
    map: ExecutionsMap,
    writes: usize,
}

impl MemoryExecutionsStore {
    /// Create an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with a map.
    #[must_use]
    pub fn with_map(map: ExecutionsMap) -> Self {
        Self { map, writes: 0 }
    }

    /// The currently stored map.
    #[must_use]
    pub fn map(&self) -> &ExecutionsMap {
        &self.map
    }

    /// Number of times [`ExecutionsStore::set`] has been called.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.writes
    }
}

impl ExecutionsStore for MemoryExecutionsStore {
    fn load(&mut self) -> Result<ExecutionsMap, StoreError> {
        Ok(self.map.clone())
    }

    fn set(&mut self, map: &ExecutionsMap) -> Result<(), StoreError> {
        self.map = map.clone();
        self.writes += 1;
        Ok(())
    }
}

//! Per-volume exclusion scopes

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::RwLock;

/// One read/write lock per snapshot directory
///
/// Listing holds the read side; creating the container or a snapshot holds
/// the write side, so a listing never observes a half-created subvolume.
#[derive(Debug, Default)]
pub struct VolumeLocks {
    locks: Mutex<HashMap<PathBuf, Arc<RwLock<()>>>>,
}

impl VolumeLocks {
    /// Create an empty lock table
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock guarding `snapshot_root`, created on first use
    pub fn for_path(&self, snapshot_root: &Path) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            locks
                .entry(snapshot_root.to_path_buf())
                .or_insert_with(|| Arc::new(RwLock::new(()))),
        )
    }

    /// Number of distinct volumes seen so far
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no lock has been handed out yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

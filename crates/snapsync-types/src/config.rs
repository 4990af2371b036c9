//! Configuration types for snapsync
//!
//! This module provides the immutable per-volume record passed to every
//! driver operation, plus the timeouts applied to external commands and peers.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Immutable description of the volume a node manages
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VolumeConfig {
    volume_path: PathBuf,
    snapshot_dir: PathBuf,
}

impl VolumeConfig {
    /// Create a new volume configuration with validation
    ///
    /// Both paths must be non-empty. `snapshot_dir` is relative to the volume.
    pub fn new<V: AsRef<Path>, S: AsRef<Path>>(volume_path: V, snapshot_dir: S) -> Result<Self> {
        let volume_path = volume_path.as_ref();
        let snapshot_dir = snapshot_dir.as_ref();

        if volume_path.as_os_str().is_empty() {
            return Err(Error::config("volume path must not be empty"));
        }
        if snapshot_dir.as_os_str().is_empty() {
            return Err(Error::config("snapshot directory must not be empty"));
        }
        if snapshot_dir.is_absolute() {
            return Err(Error::config(format!(
                "snapshot directory '{}' must be relative to the volume",
                snapshot_dir.display()
            )));
        }

        Ok(Self {
            volume_path: volume_path.to_path_buf(),
            snapshot_dir: snapshot_dir.to_path_buf(),
        })
    }

    /// Mount path of the volume
    pub fn volume_path(&self) -> &Path {
        &self.volume_path
    }

    /// Snapshot directory relative to the volume
    pub fn snapshot_dir(&self) -> &Path {
        &self.snapshot_dir
    }

    /// Effective snapshot directory: `volume_path/snapshot_dir`
    pub fn snapshot_root(&self) -> PathBuf {
        self.volume_path.join(&self.snapshot_dir)
    }
}

/// Timeout configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Upper bound for a single external command
    pub command_timeout: Duration,
    /// Connection timeout when dialing a peer
    pub connect_timeout: Duration,
    /// Upper bound for one request/response round trip
    pub request_timeout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
        }
    }
}

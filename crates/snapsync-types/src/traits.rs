//! Core traits for snapsync operations
//!
//! This module defines the seams between the snapshot logic and the outside
//! world: the volume driver callers program against, and the port through
//! which a driver reaches the external filesystem tool.

use crate::{
    CommandFailure, CommandOutput, CommandSpec, Inventory, Result, SnapshotOutcome, VolumeConfig,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Snapshot-capable volume driver
///
/// The configuration is passed to every call instead of being held by the
/// driver, so one driver can serve several volumes.
#[async_trait]
pub trait VolumeDriver: Send + Sync {
    /// Short name of the backing technology, e.g. `btrfs`
    fn driver_name(&self) -> &'static str;

    /// Verify that the configured path is a valid volume root
    ///
    /// Must succeed before any other operation on the same volume.
    async fn prepare(&self, config: &VolumeConfig) -> Result<()>;

    /// Current inventory of the volume's snapshot directory
    ///
    /// An empty inventory means there are no snapshots; a failed listing is
    /// always an error.
    async fn list_snapshots(&self, config: &VolumeConfig) -> Result<Inventory>;

    /// Create the snapshot container at `path` unless it already exists
    async fn ensure_snapshot_container(&self, path: &Path) -> Result<PathBuf>;

    /// Create a read-only snapshot of `source` in the snapshot directory
    async fn snapshot(&self, config: &VolumeConfig, source: &Path) -> Result<SnapshotOutcome>;
}

/// Port for running an external command and capturing its diagnostics
///
/// Implementations return `Ok` only when the command exited successfully.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command`, giving up after `timeout`
    async fn run(
        &self,
        command: &CommandSpec,
        timeout: Duration,
    ) -> std::result::Result<CommandOutput, CommandFailure>;
}

//! `btrfs` implementation of the volume driver

use crate::clock::{next_second, Clock, SystemClock};
use crate::command::SystemCommandRunner;
use crate::listing::{build_inventory, parse_subvolume_id, parse_subvolume_list};
use crate::lock::VolumeLocks;
use crate::naming::SnapshotNamer;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use snapsync_types::{
    CommandFailure, CommandOutput, CommandRunner, CommandSpec, Error, Inventory, Result,
    SnapshotOutcome, VolumeConfig, VolumeDriver,
};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Tunables of the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverOptions {
    /// Upper bound for any single external command
    pub command_timeout: Duration,
    /// Create the snapshot directory when it is missing
    pub auto_create_container: bool,
    /// How many seconds to step forward looking for a free name
    pub max_name_attempts: u32,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(300),
            auto_create_container: true,
            max_name_attempts: 5,
        }
    }
}

/// Progress of a single snapshot call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotPhase {
    /// Nothing done yet
    Idle,
    /// Checking that the source is a subvolume
    SourceValidating,
    /// Checking that the snapshot directory exists
    DestValidating,
    /// Creating the snapshot directory
    DestProvisioning,
    /// Picking a name and taking the snapshot
    Snapshotting,
    /// Flushing the snapshot directory
    Syncing,
    /// Snapshot is durable
    Done,
}

impl fmt::Display for SnapshotPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::SourceValidating => "validating source",
            Self::DestValidating => "validating destination",
            Self::DestProvisioning => "provisioning destination",
            Self::Snapshotting => "snapshotting",
            Self::Syncing => "syncing",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Volume driver backed by the `btrfs` command line tool
pub struct BtrfsDriver {
    runner: Arc<dyn CommandRunner>,
    clock: Arc<dyn Clock>,
    namer: SnapshotNamer,
    options: DriverOptions,
    locks: VolumeLocks,
    prepared: RwLock<HashSet<PathBuf>>,
}

impl fmt::Debug for BtrfsDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BtrfsDriver")
            .field("namer", &self.namer)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

fn btrfs(subcommand: &str) -> CommandSpec {
    CommandSpec::new("btrfs").arg("subvolume").arg(subcommand)
}

impl BtrfsDriver {
    /// Create a driver that runs commands through `runner`
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            clock: Arc::new(SystemClock),
            namer: SnapshotNamer::default(),
            options: DriverOptions::default(),
            locks: VolumeLocks::new(),
            prepared: RwLock::new(HashSet::new()),
        }
    }

    /// Create a driver that runs the real `btrfs` tool
    pub fn system() -> Self {
        Self::new(Arc::new(SystemCommandRunner::new()))
    }

    /// Use a different time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use a different naming policy
    pub fn with_namer(mut self, namer: SnapshotNamer) -> Self {
        self.namer = namer;
        self
    }

    /// Use different tunables
    pub fn with_options(mut self, options: DriverOptions) -> Self {
        self.options = options;
        self
    }

    /// Naming policy in use
    pub fn namer(&self) -> &SnapshotNamer {
        &self.namer
    }

    /// Tunables in use
    pub fn options(&self) -> &DriverOptions {
        &self.options
    }

    /// Whether `volume_path` has passed `prepare`
    pub fn is_prepared(&self, volume_path: &Path) -> bool {
        self.prepared
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(volume_path)
    }

    fn require_prepared(&self, path: &Path) -> Result<()> {
        let prepared = self.prepared.read().unwrap_or_else(PoisonError::into_inner);
        if prepared.iter().any(|volume| path.starts_with(volume)) {
            Ok(())
        } else {
            Err(Error::Unprepared {
                path: path.to_path_buf(),
            })
        }
    }

    async fn run(&self, command: CommandSpec) -> std::result::Result<CommandOutput, CommandFailure> {
        self.runner.run(&command, self.options.command_timeout).await
    }

    async fn show(&self, path: &Path) -> std::result::Result<CommandOutput, CommandFailure> {
        self.run(btrfs("show").path_arg(path)).await
    }

    async fn list_unlocked(&self, config: &VolumeConfig) -> Result<Inventory> {
        let volume = config.volume_path();
        info!("Getting subvolume list for: {}", volume.display());

        let output = self
            .run(btrfs("list").path_arg(volume))
            .await
            .map_err(|cause| Error::ListFailed {
                path: volume.to_path_buf(),
                cause,
            })?;

        let entries = parse_subvolume_list(&output.stdout).map_err(|cause| Error::ListFailed {
            path: volume.to_path_buf(),
            cause,
        })?;

        let root = config.snapshot_root();
        let container_id = match self.show(&root).await {
            Ok(details) => parse_subvolume_id(&details.stdout).map_err(|cause| Error::ListFailed {
                path: root.clone(),
                cause,
            })?,
            Err(CommandFailure::Exit { stderr, .. }) => {
                debug!(
                    "No snapshot directory at {} yet: {}",
                    root.display(),
                    stderr.trim()
                );
                return Ok(Inventory::default());
            }
            Err(cause) => return Err(Error::ListFailed { path: root, cause }),
        };

        let inventory = build_inventory(&entries, container_id, &self.namer);
        debug!(
            "Found {} snapshots ({} managed) among {} subvolumes",
            inventory.len(),
            inventory.managed_names().len(),
            entries.len()
        );
        Ok(inventory)
    }

    async fn ensure_container_unlocked(&self, path: &Path) -> Result<PathBuf> {
        if self.show(path).await.is_ok() {
            debug!("Snapshot directory already present: {}", path.display());
            return Ok(path.to_path_buf());
        }

        self.create_container(path).await
    }

    async fn create_container(&self, path: &Path) -> Result<PathBuf> {
        warn!(
            "Snapshot directory {} is not a subvolume, trying to create it",
            path.display()
        );
        self.run(btrfs("create").path_arg(path))
            .await
            .map_err(|cause| Error::CreateFailed {
                path: path.to_path_buf(),
                cause,
            })?;

        info!("New subvolume created: {}", path.display());
        Ok(path.to_path_buf())
    }

    async fn free_name(&self, config: &VolumeConfig) -> Result<(String, DateTime<Utc>)> {
        let existing = self.list_unlocked(config).await?;
        let attempts = self.options.max_name_attempts.max(1);
        let mut name = String::new();

        for attempt in 1..=attempts {
            let now = self.clock.now();
            name = self.namer.name_for(now);
            if !existing.contains(&name) {
                let taken_at = self.namer.parse(&name)?;
                return Ok((name, taken_at));
            }

            warn!(
                "Snapshot name {} already taken (attempt {}/{}), waiting for the next second",
                name, attempt, attempts
            );
            self.clock.sleep_until(next_second(now)).await;
        }

        Err(Error::NameCollision { name, attempts })
    }

    async fn snapshot_locked(
        &self,
        config: &VolumeConfig,
        source: &Path,
        phase: &mut SnapshotPhase,
    ) -> Result<SnapshotOutcome> {
        let dest_dir = config.snapshot_root();

        *phase = SnapshotPhase::SourceValidating;
        info!("Making sure of the source subvolume: {}", source.display());
        self.show(source)
            .await
            .map_err(|cause| Error::SourceInvalid {
                path: source.to_path_buf(),
                cause,
            })?;

        *phase = SnapshotPhase::DestValidating;
        info!("Making sure of the destination directory: {}", dest_dir.display());
        if let Err(cause) = self.show(&dest_dir).await {
            if !self.options.auto_create_container {
                return Err(Error::DestMissing {
                    path: dest_dir,
                    cause,
                });
            }
            *phase = SnapshotPhase::DestProvisioning;
            self.create_container(&dest_dir).await?;
        }

        *phase = SnapshotPhase::Snapshotting;
        let (name, taken_at) = self.free_name(config).await?;
        let path = dest_dir.join(&name);

        info!("Creating snapshot in: {}", path.display());
        self.run(
            btrfs("snapshot")
                .arg("-r")
                .path_arg(source)
                .path_arg(&path),
        )
        .await
        .map_err(|cause| Error::SnapshotFailed {
            path: path.clone(),
            cause,
        })?;

        *phase = SnapshotPhase::Syncing;
        self.run(CommandSpec::new("sync").path_arg(&dest_dir))
            .await
            .map_err(|cause| Error::SnapshotFailed {
                path: path.clone(),
                cause,
            })?;

        *phase = SnapshotPhase::Done;
        info!("Snapshot created: {} from {}", path.display(), source.display());

        Ok(SnapshotOutcome {
            name,
            path,
            taken_at,
        })
    }
}

#[async_trait]
impl VolumeDriver for BtrfsDriver {
    fn driver_name(&self) -> &'static str {
        "btrfs"
    }

    async fn prepare(&self, config: &VolumeConfig) -> Result<()> {
        let volume = config.volume_path();
        info!("Checking for a valid subvolume: {}", volume.display());

        self.show(volume).await.map_err(|cause| {
            error!("{} is not a valid subvolume: {}", volume.display(), cause);
            Error::NotAVolume {
                path: volume.to_path_buf(),
                cause,
            }
        })?;

        self.prepared
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(volume.to_path_buf());

        info!("Valid subvolume found: {}", volume.display());
        Ok(())
    }

    async fn list_snapshots(&self, config: &VolumeConfig) -> Result<Inventory> {
        self.require_prepared(config.volume_path())?;

        let lock = self.locks.for_path(&config.snapshot_root());
        let _guard = lock.read().await;
        self.list_unlocked(config).await
    }

    async fn ensure_snapshot_container(&self, path: &Path) -> Result<PathBuf> {
        self.require_prepared(path)?;

        let lock = self.locks.for_path(path);
        let _guard = lock.write().await;
        self.ensure_container_unlocked(path).await
    }

    async fn snapshot(&self, config: &VolumeConfig, source: &Path) -> Result<SnapshotOutcome> {
        self.require_prepared(config.volume_path())?;

        let lock = self.locks.for_path(&config.snapshot_root());
        let _guard = lock.write().await;

        let mut phase = SnapshotPhase::Idle;
        let result = self.snapshot_locked(config, source, &mut phase).await;
        if let Err(e) = &result {
            error!(
                "Snapshot of {} failed while {}: {}",
                source.display(),
                phase,
                e
            );
        }
        result
    }
}

//! Copy-on-write volume driver for snapsync
//!
//! This crate wraps the external `btrfs` tool behind the
//! [`VolumeDriver`](snapsync_types::VolumeDriver) trait:
//!
//! - **External-command port**: [`SystemCommandRunner`] runs each tool invocation
//!   with a timeout and captures its error stream
//! - **Naming policy**: [`SnapshotNamer`] produces and validates
//!   `<prefix>_<YYYYmmddHHMMSS>` names
//! - **Listing**: `btrfs subvolume list` output is parsed into structured entries
//!   instead of being sliced by position
//! - **Locking**: mutating operations on one snapshot directory are serialized
//!
//! # Examples
//!
//! ```rust,no_run
//! use snapsync_driver::BtrfsDriver;
//! use snapsync_types::{VolumeConfig, VolumeDriver};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let driver = BtrfsDriver::system();
//! let config = VolumeConfig::new("/data", ".snapshots")?;
//!
//! driver.prepare(&config).await?;
//! let outcome = driver.snapshot(&config, Path::new("/data")).await?;
//! println!("Created {}", outcome.path.display());
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod btrfs;
pub mod clock;
pub mod command;
pub mod listing;
pub mod lock;
pub mod naming;
pub mod testing;

pub use btrfs::{BtrfsDriver, DriverOptions, SnapshotPhase};
pub use clock::{next_second, Clock, ManualClock, SystemClock};
pub use command::SystemCommandRunner;
pub use listing::{build_inventory, parse_subvolume_id, parse_subvolume_list, SubvolumeEntry};
pub use lock::VolumeLocks;
pub use naming::{SnapshotNamer, DEFAULT_PREFIX, TIMESTAMP_FORMAT};

//! Core type system and error handling for snapsync
//!
//! This crate provides the foundational types, error handling, and shared data structures
//! used throughout the snapsync workspace. It includes:
//!
//! - **Error handling**: The driver/transport error taxonomy with severity levels
//! - **Core types**: Inventories, reconciliation results, and external command descriptions
//! - **Traits**: Async traits for the volume driver and the external-command port
//! - **Configuration**: The immutable per-volume configuration record
//!
//! # Examples
//!
//! ```rust
//! use snapsync_types::{Inventory, InventoryEntry, Result, VolumeConfig};
//!
//! fn example_operation() -> Result<Inventory> {
//!     let config = VolumeConfig::new("/data", ".snapshots")?;
//!     assert_eq!(config.snapshot_root(), std::path::PathBuf::from("/data/.snapshots"));
//!     Ok(Inventory::from(vec![InventoryEntry::managed("btrfs_backup_20240101000000")]))
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod result;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use config::{TimeoutConfig, VolumeConfig};
pub use error::{CommandFailure, Error, ErrorKind, ErrorSeverity};
pub use result::Result;
pub use traits::*;
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inventory_names_keep_order() {
        let inventory = Inventory::from(vec![
            InventoryEntry::managed("btrfs_backup_20240102000000"),
            InventoryEntry::foreign("manual"),
            InventoryEntry::managed("btrfs_backup_20240101000000"),
        ]);

        assert_eq!(
            inventory.names(),
            vec![
                "btrfs_backup_20240102000000",
                "manual",
                "btrfs_backup_20240101000000"
            ]
        );
        assert_eq!(inventory.managed_names().len(), 2);
    }

    #[test]
    fn test_error_severity() {
        let io_error = Error::from(std::io::Error::new(std::io::ErrorKind::NotFound, "test"));
        assert_eq!(io_error.severity(), ErrorSeverity::Medium);

        let config_error = Error::config("invalid config");
        assert_eq!(config_error.severity(), ErrorSeverity::High);
        assert!(!config_error.is_recoverable());
    }

    #[test]
    fn test_volume_config_validation() {
        assert!(VolumeConfig::new("/", ".snapshots").is_ok());
        assert!(VolumeConfig::new("", ".snapshots").is_err());
        assert!(VolumeConfig::new("/data", "").is_err());
    }
}

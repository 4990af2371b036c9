//! Snapshot naming policy
//!
//! Managed snapshots are named `<prefix>_<YYYYmmddHHMMSS>` with the timestamp
//! in UTC. Anything else found in the snapshot directory is foreign.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use snapsync_types::{Error, Result};

/// Prefix of every snapshot this tool creates
pub const DEFAULT_PREFIX: &str = "btrfs_backup";

/// `chrono` format of the timestamp part
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

const TIMESTAMP_LEN: usize = 14;

/// Produces and checks snapshot names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotNamer {
    prefix: String,
}

impl Default for SnapshotNamer {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

impl SnapshotNamer {
    /// Create a namer with a custom prefix
    pub fn new<S: Into<String>>(prefix: S) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Prefix in use
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Name for a snapshot taken at `at`
    pub fn name_for(&self, at: DateTime<Utc>) -> String {
        format!("{}_{}", self.prefix, at.format(TIMESTAMP_FORMAT))
    }

    /// Extract the timestamp from a managed name
    pub fn parse(&self, name: &str) -> Result<DateTime<Utc>> {
        let stamp = name
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix('_'))
            .ok_or_else(|| {
                Error::invalid_name(name, format!("expected prefix '{}_'", self.prefix))
            })?;

        if stamp.len() != TIMESTAMP_LEN || !stamp.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::invalid_name(
                name,
                format!("timestamp must be {} digits", TIMESTAMP_LEN),
            ));
        }

        let naive = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT)
            .map_err(|e| Error::invalid_name(name, format!("invalid timestamp: {}", e)))?;

        Ok(Utc.from_utc_datetime(&naive))
    }

    /// Whether `name` belongs to the managed namespace
    pub fn is_managed(&self, name: &str) -> bool {
        self.parse(name).is_ok()
    }

    /// Reject names outside the managed namespace
    pub fn validate(&self, name: &str) -> Result<()> {
        self.parse(name).map(|_| ())
    }
}

//! Core types for snapsync operations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;

/// One snapshot found under a volume's snapshot directory
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InventoryEntry {
    /// Snapshot name, relative to the snapshot directory
    pub name: String,
    /// Whether the name follows this node's naming policy
    pub managed: bool,
}

impl InventoryEntry {
    /// Create an entry for a snapshot created by snapsync
    pub fn managed<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            managed: true,
        }
    }

    /// Create an entry for a subvolume placed there by someone else
    pub fn foreign<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            managed: false,
        }
    }
}

/// Snapshot inventory of one volume
///
/// The order is whatever the filesystem reported. It carries no meaning for
/// reconciliation but is kept for logging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    entries: Vec<InventoryEntry>,
}

impl Inventory {
    /// Create an empty inventory
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry
    pub fn push(&mut self, entry: InventoryEntry) {
        self.entries.push(entry);
    }

    /// All entries in reported order
    pub fn entries(&self) -> &[InventoryEntry] {
        &self.entries
    }

    /// All snapshot names in reported order
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    /// Names of management-owned snapshots only
    pub fn managed_names(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.managed)
            .map(|e| e.name.clone())
            .collect()
    }

    /// Look up an entry by name
    pub fn get(&self, name: &str) -> Option<&InventoryEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Check whether a snapshot with this name exists
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no snapshots at all
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over the entries
    pub fn iter(&self) -> std::slice::Iter<'_, InventoryEntry> {
        self.entries.iter()
    }
}

impl From<Vec<InventoryEntry>> for Inventory {
    fn from(entries: Vec<InventoryEntry>) -> Self {
        Self { entries }
    }
}

impl FromIterator<InventoryEntry> for Inventory {
    fn from_iter<I: IntoIterator<Item = InventoryEntry>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Inventory {
    type Item = &'a InventoryEntry;
    type IntoIter = std::slice::Iter<'a, InventoryEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Direction-tagged difference between two inventories
///
/// Seen from the caller: `caller_missing` holds names only the peer has,
/// `peer_missing` holds names only the caller has.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    /// Present on the peer, absent on the caller
    pub caller_missing: Vec<String>,
    /// Present on the caller, absent on the peer
    pub peer_missing: Vec<String>,
}

impl Reconciliation {
    /// Both sides hold the same set of names
    pub fn is_in_sync(&self) -> bool {
        self.caller_missing.is_empty() && self.peer_missing.is_empty()
    }

    /// The same result seen from the other side
    pub fn reversed(self) -> Self {
        Self {
            caller_missing: self.peer_missing,
            peer_missing: self.caller_missing,
        }
    }

    /// Undirected symmetric difference, for diagnostics only
    pub fn symmetric_difference(&self) -> Vec<String> {
        self.peer_missing
            .iter()
            .chain(self.caller_missing.iter())
            .cloned()
            .collect()
    }
}

impl fmt::Display for Reconciliation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} missing locally, {} missing on peer",
            self.caller_missing.len(),
            self.peer_missing.len()
        )
    }
}

/// Result of a successful snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotOutcome {
    /// Snapshot name
    pub name: String,
    /// Full path of the read-only snapshot
    pub path: PathBuf,
    /// Timestamp encoded in the name
    pub taken_at: DateTime<Utc>,
}

/// An external command invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program to execute
    pub program: String,
    /// Arguments in order, paths kept byte for byte
    pub args: Vec<OsString>,
}

impl CommandSpec {
    /// Create a new command for `program`
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append one argument
    pub fn arg<S: Into<OsString>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append a path argument
    pub fn path_arg<P: AsRef<std::path::Path>>(self, path: P) -> Self {
        self.arg(path.as_ref().as_os_str())
    }

    /// Argument at `index` if it is valid UTF-8
    pub fn arg_str(&self, index: usize) -> Option<&str> {
        self.args.get(index).and_then(|arg| arg.to_str())
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Captured streams of a command that exited successfully
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
}

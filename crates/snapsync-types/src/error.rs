//! Error types and handling for snapsync
//!
//! Every failure of the volume driver carries the path it was working on and
//! the diagnostic captured from the external tool, so nothing the tool printed
//! on its error stream is lost on the way to the caller.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Error severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Low severity - operation can continue
    Low,
    /// Medium severity - operation should be retried
    Medium,
    /// High severity - operation should be aborted
    High,
    /// Critical severity - the node must stop participating
    Critical,
}

/// Why an external command did not produce a usable result
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandFailure {
    /// The command ran and exited unsuccessfully
    #[error("exited with status {}: {stderr}", exit_status(.code))]
    Exit {
        /// Exit code, `None` when terminated by a signal
        code: Option<i32>,
        /// Captured error stream
        stderr: String,
    },

    /// The command did not finish within the caller-supplied timeout
    #[error("timed out after {seconds} seconds")]
    Timeout {
        /// Timeout that elapsed
        seconds: u64,
    },

    /// The command could not be started at all
    #[error("failed to spawn: {message}")]
    Spawn {
        /// Error reported by the operating system
        message: String,
    },

    /// The command succeeded but its output could not be understood
    #[error("unexpected output: {message}")]
    Malformed {
        /// What could not be parsed
        message: String,
    },
}

fn exit_status(code: &Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |c| c.to_string())
}

impl CommandFailure {
    /// Check whether this failure is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Main error type for snapsync operations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {message}")]
    Io {
        /// Error message from the I/O operation
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Path is not a valid snapshot-capable volume root
    #[error("Not a valid volume: {}: {cause}", .path.display())]
    NotAVolume {
        /// Configured volume path
        path: PathBuf,
        /// Diagnostic from the validation command
        cause: CommandFailure,
    },

    /// Volume has not passed `prepare` on this driver
    #[error("Volume has not been prepared: {}", .path.display())]
    Unprepared {
        /// Volume path that was used without validation
        path: PathBuf,
    },

    /// Inventory could not be retrieved
    #[error("Failed to list snapshots under {}: {cause}", .path.display())]
    ListFailed {
        /// Volume path that was listed
        path: PathBuf,
        /// Diagnostic from the list command
        cause: CommandFailure,
    },

    /// Snapshot source is not itself a valid subvolume
    #[error("Snapshot source is not a subvolume: {}: {cause}", .path.display())]
    SourceInvalid {
        /// Source path
        path: PathBuf,
        /// Diagnostic from the validation command
        cause: CommandFailure,
    },

    /// Destination container is absent and provisioning is disabled
    #[error("Snapshot directory is missing: {}: {cause}", .path.display())]
    DestMissing {
        /// Snapshot directory path
        path: PathBuf,
        /// Diagnostic from the validation command
        cause: CommandFailure,
    },

    /// Destination container could not be created
    #[error("Failed to create snapshot directory {}: {cause}", .path.display())]
    CreateFailed {
        /// Snapshot directory path
        path: PathBuf,
        /// Diagnostic from the create command
        cause: CommandFailure,
    },

    /// The snapshot operation itself failed
    #[error("Failed to create snapshot {}: {cause}", .path.display())]
    SnapshotFailed {
        /// Snapshot path that was being created
        path: PathBuf,
        /// Diagnostic from the snapshot or sync command
        cause: CommandFailure,
    },

    /// No free snapshot name could be found
    #[error("Snapshot name {name} still taken after {attempts} attempts")]
    NameCollision {
        /// Last candidate name
        name: String,
        /// Number of attempts made
        attempts: u32,
    },

    /// A snapshot name does not follow the naming policy
    #[error("Invalid snapshot name '{name}': {reason}")]
    InvalidSnapshotName {
        /// Offending name
        name: String,
        /// Why it was rejected
        reason: String,
    },

    /// Peer exchange could not complete
    #[error("Peer {peer} unreachable: {message}")]
    TransportUnreachable {
        /// Peer address
        peer: String,
        /// Error message describing the transport failure
        message: String,
    },

    /// The peer could not list its own inventory
    #[error("Peer {peer} failed to list its snapshots: {message}")]
    PeerListFailed {
        /// Peer address
        peer: String,
        /// Error reported by the peer
        message: String,
    },

    /// Malformed or incompatible protocol traffic
    #[error("Protocol error: {message}")]
    Protocol {
        /// Error message describing the protocol issue
        message: String,
    },

    /// Any other error reported by a peer
    #[error("Peer reported {kind:?}: {message}")]
    Remote {
        /// Kind of the error on the peer
        kind: ErrorKind,
        /// Error reported by the peer
        message: String,
    },
}

/// Error kind for categorizing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// I/O related errors
    Io,
    /// Configuration errors
    Config,
    /// Volume validation errors
    NotAVolume,
    /// Listing errors
    ListFailed,
    /// Invalid snapshot source
    SourceInvalid,
    /// Missing destination container
    DestMissing,
    /// Container creation errors
    CreateFailed,
    /// Snapshot creation errors
    SnapshotFailed,
    /// Naming policy violations
    InvalidSnapshotName,
    /// Transport errors
    TransportUnreachable,
    /// Peer-side listing errors
    PeerListFailed,
    /// Protocol errors
    Protocol,
}

impl Error {
    /// Get the error kind
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } => ErrorKind::Io,
            Self::Config { .. } => ErrorKind::Config,
            Self::NotAVolume { .. } | Self::Unprepared { .. } => ErrorKind::NotAVolume,
            Self::ListFailed { .. } => ErrorKind::ListFailed,
            Self::SourceInvalid { .. } => ErrorKind::SourceInvalid,
            Self::DestMissing { .. } => ErrorKind::DestMissing,
            Self::CreateFailed { .. } => ErrorKind::CreateFailed,
            Self::SnapshotFailed { .. } | Self::NameCollision { .. } => ErrorKind::SnapshotFailed,
            Self::InvalidSnapshotName { .. } => ErrorKind::InvalidSnapshotName,
            Self::TransportUnreachable { .. } => ErrorKind::TransportUnreachable,
            Self::PeerListFailed { .. } => ErrorKind::PeerListFailed,
            Self::Protocol { .. } => ErrorKind::Protocol,
            Self::Remote { kind, .. } => *kind,
        }
    }

    /// Get the error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::NotAVolume { .. } | Self::Unprepared { .. } => ErrorSeverity::Critical,
            Self::Config { .. } | Self::Protocol { .. } => ErrorSeverity::High,
            Self::SourceInvalid { .. } | Self::DestMissing { .. } | Self::CreateFailed { .. } => {
                ErrorSeverity::High
            }
            Self::InvalidSnapshotName { .. } => ErrorSeverity::Low,
            Self::Io { .. }
            | Self::ListFailed { .. }
            | Self::SnapshotFailed { .. }
            | Self::NameCollision { .. }
            | Self::TransportUnreachable { .. }
            | Self::PeerListFailed { .. }
            | Self::Remote { .. } => ErrorSeverity::Medium,
        }
    }

    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io { message } => {
                message.contains("Interrupted")
                    || message.contains("WouldBlock")
                    || message.contains("TimedOut")
            }
            Self::TransportUnreachable { .. }
            | Self::PeerListFailed { .. }
            | Self::ListFailed { .. }
            | Self::NameCollision { .. } => true,
            Self::SnapshotFailed { cause, .. } => cause.is_timeout(),
            Self::NotAVolume { .. }
            | Self::Unprepared { .. }
            | Self::Config { .. }
            | Self::SourceInvalid { .. }
            | Self::DestMissing { .. }
            | Self::CreateFailed { .. }
            | Self::InvalidSnapshotName { .. }
            | Self::Protocol { .. }
            | Self::Remote { .. } => false,
        }
    }

    /// Check if this error should trigger a retry
    pub fn should_retry(&self) -> bool {
        self.is_recoverable() && self.severity() <= ErrorSeverity::Medium
    }

    /// Check if the external command behind this error timed out
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::NotAVolume { cause, .. }
            | Self::ListFailed { cause, .. }
            | Self::SourceInvalid { cause, .. }
            | Self::DestMissing { cause, .. }
            | Self::CreateFailed { cause, .. }
            | Self::SnapshotFailed { cause, .. } => cause.is_timeout(),
            _ => false,
        }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new protocol error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a new transport error
    pub fn unreachable<P: Into<String>, S: Into<String>>(peer: P, message: S) -> Self {
        Self::TransportUnreachable {
            peer: peer.into(),
            message: message.into(),
        }
    }

    /// Create a new naming policy error
    pub fn invalid_name<N: Into<String>, S: Into<String>>(name: N, reason: S) -> Self {
        Self::InvalidSnapshotName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Rebuild an error reported by a peer
    ///
    /// A listing failure on the peer maps to [`Error::PeerListFailed`] so it can
    /// never be confused with an empty reconciliation.
    pub fn from_remote(peer: impl Into<String>, kind: ErrorKind, message: String) -> Self {
        match kind {
            ErrorKind::ListFailed | ErrorKind::PeerListFailed => Self::PeerListFailed {
                peer: peer.into(),
                message,
            },
            ErrorKind::InvalidSnapshotName => Self::InvalidSnapshotName {
                name: String::new(),
                reason: message,
            },
            ErrorKind::Protocol => Self::Protocol { message },
            kind => Self::Remote { kind, message },
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::Io {
            message: error.to_string(),
        }
    }
}

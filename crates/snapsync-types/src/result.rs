//! Result type alias for snapsync operations

use crate::Error;

/// Result type alias for snapsync operations
pub type Result<T> = std::result::Result<T, Error>;

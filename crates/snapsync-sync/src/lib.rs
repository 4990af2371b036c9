//! Snapshot inventory reconciliation for snapsync
//!
//! This crate decides which snapshots have to move between two nodes:
//!
//! - **Reconciliation**: a pure comparison of two inventories that keeps the
//!   two directions apart
//! - **Sync planning**: the client-side engine that lists the local volume,
//!   exchanges with a peer and turns the result into a [`SyncPlan`]
//!
//! # Examples
//!
//! ```rust
//! use snapsync_sync::reconcile;
//!
//! let mine = vec!["s1".to_string(), "s2".to_string()];
//! let theirs = vec!["s2".to_string(), "s3".to_string()];
//!
//! let result = reconcile(&mine, &theirs);
//! assert_eq!(result.peer_missing, vec!["s1"]);
//! assert_eq!(result.caller_missing, vec!["s3"]);
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod engine;
pub mod reconcile;

pub use engine::{PeerExchange, SyncEngine, SyncPlan};
pub use reconcile::reconcile;

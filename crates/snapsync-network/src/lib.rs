//! Peer exchange protocol for snapsync
//!
//! This crate lets two nodes compare snapshot inventories over TCP:
//!
//! - **Versioned protocol**: bincode-encoded messages in length-prefixed frames
//! - **Responder**: [`PeerServer`] lists its volume afresh for every request and
//!   answers concurrently, one task per connection
//! - **Caller**: [`PeerClient`] performs one round trip per request and reports
//!   transport failures as [`TransportUnreachable`](snapsync_types::Error::TransportUnreachable)
//!
//! # Examples
//!
//! ```rust,no_run
//! use snapsync_network::PeerClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = PeerClient::new("backup-host:8000");
//! let result = client.exchange_inventory(&["btrfs_backup_20240101000000".to_string()]).await?;
//! println!("Peer lacks {:?}", result.peer_missing);
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod connection;
pub mod protocol;
pub mod server;

pub use client::{ClientConfig, PeerClient};
pub use connection::{ConnectionInfo, NetworkConnection, TcpConnection};
pub use protocol::{
    ErrorPayload, HandshakeInfo, MessageType, ProtocolMessage, ProtocolVersion, ReceiveAck,
    MAX_FRAME_SIZE,
};
pub use server::{PeerServer, ServerConfig, ServerHandle};

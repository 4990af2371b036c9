//! Caller side of the peer exchange

use crate::connection::{NetworkConnection, TcpConnection};
use crate::protocol::{
    HandshakeInfo, InventoryRequest, MessageType, ProtocolMessage, ReceiveAck, ReceiveSnapshot,
};
use async_trait::async_trait;
use snapsync_sync::PeerExchange;
use snapsync_types::{Error, Reconciliation, Result};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Identifier sent in handshakes
    pub peer_id: String,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Upper bound for one request/response round trip
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            peer_id: "snapsync-client".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Client for one remote peer
///
/// Each request opens its own connection, so a failed exchange never leaves
/// state behind.
#[derive(Debug, Clone)]
pub struct PeerClient {
    peer: String,
    config: ClientConfig,
}

impl PeerClient {
    /// Create a client for `peer` (`host:port`)
    pub fn new<S: Into<String>>(peer: S) -> Self {
        Self::with_config(peer, ClientConfig::default())
    }

    /// Create a client with custom configuration
    pub fn with_config<S: Into<String>>(peer: S, config: ClientConfig) -> Self {
        Self {
            peer: peer.into(),
            config,
        }
    }

    /// Address of the peer
    pub fn peer(&self) -> &str {
        &self.peer
    }

    async fn connect(&self) -> Result<TcpConnection> {
        debug!("Connecting to {}", self.peer);
        let stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(self.peer.as_str()),
        )
        .await
        .map_err(|_| {
            Error::unreachable(
                &self.peer,
                format!("connect timed out after {:?}", self.config.connect_timeout),
            )
        })?
        .map_err(|e| Error::unreachable(&self.peer, e.to_string()))?;

        TcpConnection::new(stream).map_err(|e| Error::unreachable(&self.peer, e.to_string()))
    }

    async fn round_trip(&self, request: &ProtocolMessage) -> Result<ProtocolMessage> {
        let mut connection = self.connect().await?;

        let exchange = async {
            connection.send(request).await?;
            connection.receive().await
        };
        let response = tokio::time::timeout(self.config.request_timeout, exchange)
            .await
            .map_err(|_| {
                Error::unreachable(
                    &self.peer,
                    format!("no response within {:?}", self.config.request_timeout),
                )
            })?
            .map_err(|e| match e {
                Error::Protocol { .. } => e,
                other => Error::unreachable(&self.peer, other.to_string()),
            })?
            .ok_or_else(|| Error::unreachable(&self.peer, "connection closed by peer"))?;

        let _ = connection.close().await;
        Ok(response)
    }

    /// Send `request` and decode a response of type `expected`
    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        request: ProtocolMessage,
        expected: MessageType,
    ) -> Result<T> {
        let response = self.round_trip(&request).await?;

        if response.message_type == MessageType::Error {
            return Err(response.to_remote_error(&self.peer));
        }
        if response.message_type != expected {
            return Err(Error::protocol(format!(
                "Expected {:?} from {}, got {:?}",
                expected, self.peer, response.message_type
            )));
        }
        if response.message_id != request.message_id {
            return Err(Error::protocol(format!(
                "Response from {} does not match request {}",
                self.peer, request.message_id
            )));
        }

        response.decode_payload()
    }

    /// Exchange identification with the peer
    pub async fn handshake(&self) -> Result<HandshakeInfo> {
        let request = ProtocolMessage::with_payload(
            MessageType::Handshake,
            &HandshakeInfo::new(self.config.peer_id.clone()),
        )?;
        let info: HandshakeInfo = self.call(request, MessageType::Handshake).await?;
        debug!("Handshake with {} ({}, protocol {})", self.peer, info.peer_id, info.version);
        Ok(info)
    }

    /// Send our inventory and get the peer's comparison back
    ///
    /// A listing failure on the peer comes back as
    /// [`Error::PeerListFailed`], never as an empty result.
    pub async fn exchange_inventory(&self, inventory: &[String]) -> Result<Reconciliation> {
        let request = ProtocolMessage::with_payload(
            MessageType::InventoryExchange,
            &InventoryRequest {
                inventory: inventory.to_vec(),
            },
        )?;

        let reconciliation: Reconciliation =
            self.call(request, MessageType::Reconciliation).await?;
        info!("Peer {} reports {}", self.peer, reconciliation);
        Ok(reconciliation)
    }

    /// Announce a snapshot we would like to send
    pub async fn announce_snapshot(&self, name: &str, port: u16) -> Result<ReceiveAck> {
        let request = ProtocolMessage::with_payload(
            MessageType::ReceiveSnapshot,
            &ReceiveSnapshot {
                name: name.to_string(),
                port,
            },
        )?;

        let ack: ReceiveAck = self.call(request, MessageType::ReceiveAck).await?;
        info!(
            "Peer {} {} {}",
            self.peer,
            if ack.ready { "is ready to receive" } else { "declined" },
            name
        );
        Ok(ack)
    }

    /// Measure one heartbeat round trip
    pub async fn heartbeat(&self) -> Result<Duration> {
        let start = Instant::now();
        let request = ProtocolMessage::new(MessageType::Heartbeat, b"ping".to_vec());
        let response = self.round_trip(&request).await?;

        match response.message_type {
            MessageType::Heartbeat if response.payload == request.payload => Ok(start.elapsed()),
            MessageType::Error => Err(response.to_remote_error(&self.peer)),
            other => Err(Error::protocol(format!(
                "Unexpected heartbeat reply {:?} from {}",
                other, self.peer
            ))),
        }
    }
}

#[async_trait]
impl PeerExchange for PeerClient {
    fn peer_label(&self) -> String {
        self.peer.clone()
    }

    async fn exchange_inventory(&self, inventory: &[String]) -> Result<Reconciliation> {
        PeerClient::exchange_inventory(self, inventory).await
    }
}

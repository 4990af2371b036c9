//! Responder side of the peer exchange

use crate::connection::{NetworkConnection, TcpConnection};
use crate::protocol::{
    HandshakeInfo, InventoryRequest, MessageType, ProtocolMessage, ProtocolVersion, ReceiveAck,
    ReceiveSnapshot,
};
use snapsync_driver::SnapshotNamer;
use snapsync_sync::SyncEngine;
use snapsync_types::{Error, ErrorKind, Result};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, error, info, warn};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Identifier sent in handshakes
    pub peer_id: String,
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Drop a connection that sends nothing for this long
    pub idle_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            peer_id: "snapsync-server".to_string(),
            max_connections: 64,
            idle_timeout: Duration::from_secs(60),
        }
    }
}

/// Client session information
#[derive(Debug, Clone)]
pub struct ClientSession {
    /// Session ID
    pub id: uuid::Uuid,
    /// Client address
    pub client_addr: SocketAddr,
    /// Handshake information
    pub handshake_info: Option<HandshakeInfo>,
    /// Requests answered on this session
    pub requests_served: u64,
    /// Session start time
    pub started_at: Instant,
    /// Last activity time
    pub last_activity: Instant,
}

impl ClientSession {
    /// Create a new client session
    pub fn new(client_addr: SocketAddr) -> Self {
        let now = Instant::now();
        Self {
            id: uuid::Uuid::new_v4(),
            client_addr,
            handshake_info: None,
            requests_served: 0,
            started_at: now,
            last_activity: now,
        }
    }

    /// Update activity timestamp
    pub fn update_activity(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Get session age
    pub fn age(&self) -> Duration {
        self.started_at.elapsed()
    }
}

type Sessions = Arc<RwLock<HashMap<uuid::Uuid, ClientSession>>>;

struct Responder {
    config: ServerConfig,
    engine: Arc<SyncEngine>,
    namer: SnapshotNamer,
}

/// Handle for stopping a running server from another task
#[derive(Debug, Clone)]
pub struct ServerHandle {
    shutdown_tx: mpsc::Sender<()>,
    sessions: Sessions,
}

impl ServerHandle {
    /// Ask the server to stop, closing open connections
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }

    /// Number of connected peers
    pub async fn active_sessions(&self) -> usize {
        self.sessions.read().await.len()
    }
}

/// Server answering inventory exchanges and receive announcements
pub struct PeerServer {
    responder: Arc<Responder>,
    sessions: Sessions,
    listener: Option<TcpListener>,
    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: Option<mpsc::Receiver<()>>,
    closing: watch::Sender<bool>,
    is_running: Arc<RwLock<bool>>,
}

impl std::fmt::Debug for PeerServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerServer")
            .field("config", &self.responder.config)
            .field("engine", &self.responder.engine)
            .finish_non_exhaustive()
    }
}

impl PeerServer {
    /// Create a server answering for `engine`'s volume
    pub fn new(config: ServerConfig, engine: Arc<SyncEngine>, namer: SnapshotNamer) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        Self {
            responder: Arc::new(Responder {
                config,
                engine,
                namer,
            }),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            listener: None,
            shutdown_tx,
            shutdown_rx: Some(shutdown_rx),
            closing: watch::channel(false).0,
            is_running: Arc::new(RwLock::new(false)),
        }
    }

    /// Handle that can stop the server while `start` runs
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shutdown_tx: self.shutdown_tx.clone(),
            sessions: Arc::clone(&self.sessions),
        }
    }

    /// Bind the listening socket and return its address
    ///
    /// Called by `start` when needed; calling it first reveals the port
    /// picked for a `:0` bind address.
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        if let Some(listener) = &self.listener {
            return Ok(listener.local_addr()?);
        }

        let bind_addr = self.responder.config.bind_addr;
        let listener = TcpListener::bind(bind_addr).await.map_err(|e| Error::Io {
            message: format!("Failed to bind to {}: {}", bind_addr, e),
        })?;
        let local_addr = listener.local_addr()?;
        self.listener = Some(listener);
        Ok(local_addr)
    }

    /// Whether the accept loop is running
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    /// Accept connections until a shutdown is requested
    pub async fn start(&mut self) -> Result<()> {
        let local_addr = self.bind().await?;
        let listener = self
            .listener
            .take()
            .ok_or_else(|| Error::config("listener vanished after bind"))?;
        let mut shutdown_rx = self
            .shutdown_rx
            .take()
            .ok_or_else(|| Error::config("server has already been started"))?;

        *self.is_running.write().await = true;
        info!("snapsync server listening on {}", local_addr);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => self.spawn_connection(stream, addr).await,
                    Err(e) => error!("Failed to accept connection: {}", e),
                },
                _ = shutdown_rx.recv() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        *self.is_running.write().await = false;
        self.closing.send_replace(true);
        info!("snapsync server stopped");
        Ok(())
    }

    async fn spawn_connection(&self, stream: tokio::net::TcpStream, addr: SocketAddr) {
        let session = ClientSession::new(addr);
        {
            let mut sessions = self.sessions.write().await;
            if sessions.len() >= self.responder.config.max_connections {
                warn!(
                    "Refusing {}: {} connections already active",
                    addr,
                    sessions.len()
                );
                return;
            }
            sessions.insert(session.id, session.clone());
        }

        let responder = Arc::clone(&self.responder);
        let sessions = Arc::clone(&self.sessions);
        let closing = self.closing.subscribe();
        tokio::spawn(async move {
            let session_id = session.id;
            if let Err(e) = responder.handle_connection(stream, session, closing).await {
                error!("Error handling client {}: {}", addr, e);
            }
            sessions.write().await.remove(&session_id);
        });
    }
}

impl Responder {
    async fn handle_connection(
        &self,
        stream: tokio::net::TcpStream,
        mut session: ClientSession,
        closing: watch::Receiver<bool>,
    ) -> Result<()> {
        let client_addr = session.client_addr;
        info!("New client connection from {}", client_addr);

        let mut connection = TcpConnection::new(stream)?;
        let result = self.serve(&mut connection, &mut session, closing).await;

        match result {
            Ok(()) => info!(
                "Client {} disconnected after {} requests in {:?}",
                client_addr,
                session.requests_served,
                session.age()
            ),
            Err(e) => error!("Client {} disconnected with error: {}", client_addr, e),
        }
        Ok(())
    }

    async fn serve(
        &self,
        connection: &mut TcpConnection,
        session: &mut ClientSession,
        mut closing: watch::Receiver<bool>,
    ) -> Result<()> {
        loop {
            let received = tokio::select! {
                received = tokio::time::timeout(self.config.idle_timeout, connection.receive()) => received,
                _ = async { closing.wait_for(|closed| *closed).await.map(|_| ()) } => {
                    debug!("Server stopping, closing {}", session.client_addr);
                    return connection.close().await;
                }
            };
            let message = match received {
                Ok(Ok(Some(message))) => message,
                Ok(Ok(None)) => return Ok(()),
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    debug!("Client {} idle, closing", session.client_addr);
                    return connection.close().await;
                }
            };

            session.update_activity();
            let response = self.handle_message(&message, session).await?;
            connection.send(&response).await?;
            session.requests_served += 1;
        }
    }

    async fn handle_message(
        &self,
        message: &ProtocolMessage,
        session: &mut ClientSession,
    ) -> Result<ProtocolMessage> {
        let ours = ProtocolVersion::current();
        if !message.version.is_compatible_with(&ours) {
            warn!(
                "Client {} speaks protocol {}, we speak {}",
                session.client_addr, message.version, ours
            );
            return message.error_reply(
                ErrorKind::Protocol,
                format!("Unsupported protocol version {}, expected {}.x", message.version, ours.major),
            );
        }

        let result = match message.message_type {
            MessageType::Handshake => self.handle_handshake(message, session),
            MessageType::InventoryExchange => self.handle_inventory(message, session).await,
            MessageType::ReceiveSnapshot => self.handle_receive(message).await,
            MessageType::Heartbeat => Ok(ProtocolMessage {
                message_type: MessageType::Heartbeat,
                ..message.clone()
            }),
            other => Err(Error::protocol(format!(
                "Unsupported message type: {:?}",
                other
            ))),
        };

        result.or_else(|e| {
            debug!("Request from {} failed: {}", session.client_addr, e);
            message.error_reply(e.kind(), e.to_string())
        })
    }

    fn handle_handshake(
        &self,
        message: &ProtocolMessage,
        session: &mut ClientSession,
    ) -> Result<ProtocolMessage> {
        let client: HandshakeInfo = message.decode_payload()?;
        if !client.version.is_compatible_with(&ProtocolVersion::current()) {
            return Err(Error::protocol(format!(
                "Incompatible protocol version {}",
                client.version
            )));
        }

        debug!("Received handshake from client: {}", client.peer_id);
        session.handshake_info = Some(client);

        message.reply(
            MessageType::Handshake,
            &HandshakeInfo::new(self.config.peer_id.clone()),
        )
    }

    async fn handle_inventory(
        &self,
        message: &ProtocolMessage,
        session: &ClientSession,
    ) -> Result<ProtocolMessage> {
        let request: InventoryRequest = message.decode_payload()?;
        let reconciliation = self.engine.respond(&request.inventory).await?;

        info!(
            "Reconciled {} snapshots from {}: {}",
            request.inventory.len(),
            session.client_addr,
            reconciliation
        );
        message.reply(MessageType::Reconciliation, &reconciliation)
    }

    async fn handle_receive(&self, message: &ProtocolMessage) -> Result<ProtocolMessage> {
        let request: ReceiveSnapshot = message.decode_payload()?;
        self.namer.validate(&request.name)?;

        let inventory = self
            .engine
            .driver()
            .list_snapshots(self.engine.config())
            .await?;

        let ack = if inventory.contains(&request.name) {
            info!("Snapshot {} already present, declining", request.name);
            ReceiveAck {
                ready: false,
                destination: None,
            }
        } else {
            let destination = self.engine.config().snapshot_root().join(&request.name);
            info!(
                "Ready to receive {} on port {} into {}",
                request.name,
                request.port,
                destination.display()
            );
            ReceiveAck {
                ready: true,
                destination: Some(destination.to_string_lossy().into_owned()),
            }
        };

        message.reply(MessageType::ReceiveAck, &ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_session_creation() {
        let addr: SocketAddr = "127.0.0.1:8000".parse().unwrap();
        let session = ClientSession::new(addr);

        assert_eq!(session.client_addr, addr);
        assert!(session.handshake_info.is_none());
        assert_eq!(session.requests_served, 0);
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 8000);
        assert!(config.max_connections > 0);
    }

    async fn serve_fake(fake: &snapsync_driver::testing::FakeBtrfs) -> (SocketAddr, ServerHandle) {
        serve_fake_with(fake, ServerConfig::default()).await
    }

    async fn serve_fake_with(
        fake: &snapsync_driver::testing::FakeBtrfs,
        server_config: ServerConfig,
    ) -> (SocketAddr, ServerHandle) {
        use chrono::{TimeZone, Utc};
        use snapsync_driver::{BtrfsDriver, ManualClock};
        use snapsync_types::{VolumeConfig, VolumeDriver};

        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let driver = BtrfsDriver::new(Arc::new(fake.clone())).with_clock(Arc::new(clock));
        let config = VolumeConfig::new("/data", ".snapshots").unwrap();
        driver.prepare(&config).await.unwrap();

        let engine = Arc::new(SyncEngine::new(Arc::new(driver), config));
        let mut server = PeerServer::new(
            ServerConfig {
                bind_addr: "127.0.0.1:0".parse().unwrap(),
                ..server_config
            },
            engine,
            SnapshotNamer::default(),
        );
        let addr = server.bind().await.unwrap();
        let handle = server.handle();
        tokio::spawn(async move { server.start().await });
        (addr, handle)
    }

    #[tokio::test]
    async fn test_handshake_and_heartbeat() {
        let fake = snapsync_driver::testing::FakeBtrfs::new().with_volume("/data");
        let (addr, handle) = serve_fake(&fake).await;

        let client = crate::PeerClient::new(addr.to_string());
        let info = client.handshake().await.unwrap();
        assert_eq!(info.peer_id, "snapsync-server");
        assert!(client.heartbeat().await.is_ok());

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_incompatible_version_refused() {
        let fake = snapsync_driver::testing::FakeBtrfs::new().with_volume("/data");
        let (addr, handle) = serve_fake(&fake).await;

        let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let mut connection = TcpConnection::new(stream).unwrap();
        let mut request = ProtocolMessage::with_payload(
            MessageType::InventoryExchange,
            &InventoryRequest { inventory: vec![] },
        )
        .unwrap();
        request.version = ProtocolVersion::new(2, 0, 0);

        connection.send(&request).await.unwrap();
        let reply = connection.receive().await.unwrap().unwrap();
        assert_eq!(reply.message_type, MessageType::Error);
        assert_eq!(reply.to_remote_error("peer").kind(), ErrorKind::Protocol);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_unsupported_message_keeps_connection() {
        let fake = snapsync_driver::testing::FakeBtrfs::new().with_volume("/data");
        let (addr, handle) = serve_fake(&fake).await;

        let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let mut connection = TcpConnection::new(stream).unwrap();

        let bogus = ProtocolMessage::new(MessageType::ReceiveAck, Vec::new());
        connection.send(&bogus).await.unwrap();
        let reply = connection.receive().await.unwrap().unwrap();
        assert_eq!(reply.message_type, MessageType::Error);
        assert_eq!(reply.message_id, bogus.message_id);

        let ping = ProtocolMessage::new(MessageType::Heartbeat, b"still here".to_vec());
        connection.send(&ping).await.unwrap();
        let pong = connection.receive().await.unwrap().unwrap();
        assert_eq!(pong.payload, b"still here");

        handle.shutdown().await;
    }

    async fn wait_for_sessions(handle: &ServerHandle, expected: usize) {
        for _ in 0..100 {
            if handle.active_sessions().await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {} active sessions", expected);
    }

    async fn is_closed(connection: &mut TcpConnection) -> bool {
        matches!(
            tokio::time::timeout(Duration::from_secs(5), connection.receive()).await,
            Ok(Ok(None) | Err(_))
        )
    }

    #[tokio::test]
    async fn test_connection_cap_is_enforced() {
        let fake = snapsync_driver::testing::FakeBtrfs::new().with_volume("/data");
        let (addr, handle) = serve_fake_with(
            &fake,
            ServerConfig {
                max_connections: 1,
                ..ServerConfig::default()
            },
        )
        .await;

        let mut first =
            TcpConnection::new(tokio::net::TcpStream::connect(addr).await.unwrap()).unwrap();
        wait_for_sessions(&handle, 1).await;

        let mut second =
            TcpConnection::new(tokio::net::TcpStream::connect(addr).await.unwrap()).unwrap();
        assert!(is_closed(&mut second).await);
        assert_eq!(handle.active_sessions().await, 1);

        let ping = ProtocolMessage::new(MessageType::Heartbeat, b"first".to_vec());
        first.send(&ping).await.unwrap();
        let pong = first.receive().await.unwrap().unwrap();
        assert_eq!(pong.payload, b"first");

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_closes_open_connections() {
        let fake = snapsync_driver::testing::FakeBtrfs::new().with_volume("/data");
        let (addr, handle) = serve_fake(&fake).await;

        let mut connection =
            TcpConnection::new(tokio::net::TcpStream::connect(addr).await.unwrap()).unwrap();
        wait_for_sessions(&handle, 1).await;

        handle.shutdown().await;
        assert!(is_closed(&mut connection).await);
        wait_for_sessions(&handle, 0).await;
    }
}

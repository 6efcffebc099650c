//! TCP server: accepts participants and moves frames between sockets and
//! the authority loop.
//!
//! Inbound frames from every connection are funnelled into one
//! [`ServerEvent`] channel so the authority consumes them on a single
//! logical thread. Outbound frames go through a per-connection queue
//! drained by a dedicated writer task, so frames sent to one connection are
//! written in the order they were queued.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::net::TcpListener;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{RwLock, mpsc, watch};

use crate::framing::{FrameConfig, FrameError, read_frame, write_frame};

/// Unique identifier for a TCP connection within a server session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

/// Atomic generator for monotonically increasing [`ConnectionId`]s.
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    /// Create a new generator starting at 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Return the next unique [`ConnectionId`].
    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// What the accept and reader tasks report to the authority loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// A participant connected.
    Connected {
        /// Transport-level identity of the participant.
        id: ConnectionId,
        /// Remote address.
        peer: SocketAddr,
    },
    /// One complete frame arrived.
    Frame {
        /// Connection the frame arrived on.
        id: ConnectionId,
        /// Frame payload.
        payload: Vec<u8>,
    },
    /// The participant went away (EOF, I/O error or bad frame).
    Disconnected {
        /// Connection that closed.
        id: ConnectionId,
    },
}

/// Error returned when the connection map is at capacity.
#[derive(Debug, thiserror::Error)]
#[error("connection limit reached")]
pub struct ConnectionLimitReached;

/// Error returned when sending to a connection that is not (or no longer)
/// registered.
#[derive(Debug, thiserror::Error)]
#[error("unknown connection {0:?}")]
pub struct UnknownConnection(pub ConnectionId);

/// Thread-safe map from [`ConnectionId`] to that connection's outbound queue.
pub struct ConnectionMap {
    inner: RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<Vec<u8>>>>,
    max_connections: usize,
}

impl ConnectionMap {
    /// Create a new map with the given capacity limit.
    pub fn new(max_connections: usize) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            max_connections,
        }
    }

    /// Register a connection's outbound queue. Fails at capacity.
    pub async fn insert(
        &self,
        id: ConnectionId,
        outbound: mpsc::UnboundedSender<Vec<u8>>,
    ) -> Result<(), ConnectionLimitReached> {
        let mut map = self.inner.write().await;
        if map.len() >= self.max_connections {
            return Err(ConnectionLimitReached);
        }
        map.insert(id, outbound);
        Ok(())
    }

    /// Remove a connection by ID. Dropping the queue ends its writer task.
    pub async fn remove(&self, id: &ConnectionId) -> bool {
        self.inner.write().await.remove(id).is_some()
    }

    /// Queue `payload` for `id`.
    pub async fn send(&self, id: ConnectionId, payload: Vec<u8>) -> Result<(), UnknownConnection> {
        let map = self.inner.read().await;
        let queue = map.get(&id).ok_or(UnknownConnection(id))?;
        queue.send(payload).map_err(|_| UnknownConnection(id))
    }

    /// Return the number of active connections.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Return whether the map is empty.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

/// Configuration for [`GameServer`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to. Default: `0.0.0.0:7878`.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections. Default: 2.
    pub max_connections: usize,
    /// Frame limits applied in both directions.
    pub frame: FrameConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 7878)),
            max_connections: 2,
            frame: FrameConfig::default(),
        }
    }
}

/// TCP server that accepts connections and manages their lifecycle.
pub struct GameServer {
    config: ServerConfig,
    /// Active connection map (public for test inspection).
    pub connections: Arc<ConnectionMap>,
    id_gen: Arc<IdGenerator>,
    events_tx: mpsc::UnboundedSender<ServerEvent>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl GameServer {
    /// Create a new server and the receiver its events are delivered on.
    pub fn new(config: ServerConfig) -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let server = Self {
            connections: Arc::new(ConnectionMap::new(config.max_connections)),
            id_gen: Arc::new(IdGenerator::new()),
            config,
            events_tx,
            shutdown_tx,
            shutdown_rx,
        };
        (server, events_rx)
    }

    /// Bind to the configured address and run the accept loop.
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!("Server listening on {}", self.config.bind_addr);
        self.run_with_listener(listener).await
    }

    /// Run the accept loop with a pre-bound listener (useful for tests).
    pub async fn run_with_listener(&self, listener: TcpListener) -> std::io::Result<()> {
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, peer) = result?;
                    stream.set_nodelay(true)?;

                    let id = self.id_gen.next_id();
                    let (out_tx, out_rx) = mpsc::unbounded_channel();
                    if self.connections.insert(id, out_tx).await.is_err() {
                        tracing::warn!("Connection limit reached, rejecting {peer}");
                        continue;
                    }

                    tracing::info!("Accepted connection {id:?} from {peer}");
                    let (reader, writer) = stream.into_split();

                    // Connected is queued before the reader starts, so the
                    // authority never sees a Frame from an unknown id.
                    let _ = self.events_tx.send(ServerEvent::Connected { id, peer });

                    tokio::spawn(Self::write_loop(
                        id,
                        writer,
                        out_rx,
                        self.config.frame.clone(),
                        self.shutdown_rx.clone(),
                    ));

                    let connections = Arc::clone(&self.connections);
                    let events = self.events_tx.clone();
                    let frame = self.config.frame.clone();
                    let task_shutdown = self.shutdown_rx.clone();
                    tokio::spawn(async move {
                        Self::read_loop(id, reader, &events, &frame, task_shutdown).await;
                        connections.remove(&id).await;
                        let _ = events.send(ServerEvent::Disconnected { id });
                        tracing::info!("Connection {id:?} closed");
                    });
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("Server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Queue a frame for one connection.
    pub async fn send(&self, id: ConnectionId, payload: Vec<u8>) -> Result<(), UnknownConnection> {
        self.connections.send(id, payload).await
    }

    /// Signal the server to shut down gracefully.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    async fn read_loop(
        id: ConnectionId,
        mut reader: OwnedReadHalf,
        events: &mpsc::UnboundedSender<ServerEvent>,
        frame: &FrameConfig,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                result = read_frame(&mut reader, frame) => {
                    match result {
                        Ok(payload) if payload.is_empty() => {}
                        Ok(payload) => {
                            if events.send(ServerEvent::Frame { id, payload }).is_err() {
                                break;
                            }
                        }
                        Err(FrameError::ConnectionClosed) => break,
                        Err(e) => {
                            tracing::warn!("Connection {id:?} read failed: {e}");
                            break;
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn write_loop(
        id: ConnectionId,
        mut writer: OwnedWriteHalf,
        mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
        frame: FrameConfig,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                next = outbound.recv() => {
                    let Some(payload) = next else { break };
                    if let Err(e) = write_frame(&mut writer, &payload, &frame).await {
                        tracing::warn!("Connection {id:?} write failed: {e}");
                        break;
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpStream;

    async fn start_test_server(
        max_connections: usize,
    ) -> (
        SocketAddr,
        Arc<GameServer>,
        mpsc::UnboundedReceiver<ServerEvent>,
    ) {
        let config = ServerConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            max_connections,
            frame: FrameConfig::default(),
        };
        let (server, events) = GameServer::new(config);
        let server = Arc::new(server);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let srv = Arc::clone(&server);
        tokio::spawn(async move {
            srv.run_with_listener(listener).await.unwrap();
        });
        (addr, server, events)
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<ServerEvent>) -> ServerEvent {
        tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("event timeout")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_connect_frame_disconnect_events() {
        let (addr, _server, mut events) = start_test_server(4).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let ServerEvent::Connected { id, .. } = next_event(&mut events).await else {
            panic!("expected Connected");
        };

        write_frame(&mut stream, b"cast", &FrameConfig::default())
            .await
            .unwrap();
        assert_eq!(
            next_event(&mut events).await,
            ServerEvent::Frame {
                id,
                payload: b"cast".to_vec()
            }
        );

        drop(stream);
        assert_eq!(
            next_event(&mut events).await,
            ServerEvent::Disconnected { id }
        );
    }

    #[tokio::test]
    async fn test_outbound_frames_keep_queue_order() {
        let (addr, server, mut events) = start_test_server(4).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let ServerEvent::Connected { id, .. } = next_event(&mut events).await else {
            panic!("expected Connected");
        };

        for i in 0u16..50 {
            server.send(id, i.to_le_bytes().to_vec()).await.unwrap();
        }
        for i in 0u16..50 {
            let payload = read_frame(&mut stream, &FrameConfig::default()).await.unwrap();
            assert_eq!(payload, i.to_le_bytes());
        }
    }

    #[tokio::test]
    async fn test_send_to_unknown_connection_fails() {
        let (_addr, server, _events) = start_test_server(4).await;
        let result = server.send(ConnectionId(999), vec![1]).await;
        assert!(matches!(result, Err(UnknownConnection(ConnectionId(999)))));
    }

    #[tokio::test]
    async fn test_max_connections_enforced() {
        let (addr, server, mut events) = start_test_server(2).await;

        let _c1 = TcpStream::connect(addr).await.unwrap();
        let _c2 = TcpStream::connect(addr).await.unwrap();
        next_event(&mut events).await;
        next_event(&mut events).await;
        assert_eq!(server.connections.len().await, 2);

        let _c3 = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.connections.len().await, 2);
        assert!(events.try_recv().is_err(), "rejected peer must not surface");
    }

    #[tokio::test]
    async fn test_graceful_shutdown_closes_connections() {
        let (addr, server, mut events) = start_test_server(4).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        next_event(&mut events).await;

        server.shutdown();

        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
            .await
            .expect("read timeout")
            .unwrap();
        assert_eq!(n, 0, "client should see EOF after shutdown");
    }

    #[test]
    fn test_connection_id_uniqueness() {
        let id_gen = IdGenerator::new();
        let id1 = id_gen.next_id();
        let id2 = id_gen.next_id();
        assert_eq!(id1, ConnectionId(1));
        assert_eq!(id2, ConnectionId(2));
    }
}

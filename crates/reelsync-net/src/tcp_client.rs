//! TCP client for connecting to a reelsync server.
//!
//! A reader task decodes frames into an inbound queue and a writer task
//! drains an outbound queue, so both directions stay ordered. Connection
//! state changes are broadcast via a [`watch`] channel.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};

use crate::framing::{FrameConfig, FrameError, read_frame, write_frame};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Attempting to establish a TCP connection.
    Connecting,
    /// TCP connection established, ready for communication.
    Connected,
    /// Connection lost or intentionally closed.
    Disconnected,
}

/// Observable connection state backed by a [`watch`] channel.
pub struct ConnectionStateWatch {
    tx: watch::Sender<ConnectionState>,
    rx: watch::Receiver<ConnectionState>,
}

impl Default for ConnectionStateWatch {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateWatch {
    /// Create a new watch initialized to [`ConnectionState::Disconnected`].
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(ConnectionState::Disconnected);
        Self { tx, rx }
    }

    /// Set the current connection state, notifying all subscribers.
    pub fn set(&self, state: ConnectionState) {
        let _ = self.tx.send(state);
    }

    /// Return a new subscriber receiver.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.rx.clone()
    }

    /// Return the current state without blocking.
    pub fn current(&self) -> ConnectionState {
        *self.rx.borrow()
    }
}

/// The connection is gone; the frame was not queued.
#[derive(Debug, thiserror::Error)]
#[error("connection closed")]
pub struct ClientClosed;

/// Handle to a connected server.
pub struct GameClient {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    inbound: mpsc::UnboundedReceiver<Vec<u8>>,
    state: Arc<ConnectionStateWatch>,
    shutdown_tx: watch::Sender<bool>,
}

impl GameClient {
    /// Connect to the server at `addr` and start the reader/writer tasks.
    pub async fn connect(addr: SocketAddr, frame: FrameConfig) -> std::io::Result<Self> {
        let state = Arc::new(ConnectionStateWatch::new());
        state.set(ConnectionState::Connecting);

        let stream = match TcpStream::connect(addr).await {
            Ok(stream) => stream,
            Err(e) => {
                state.set(ConnectionState::Disconnected);
                return Err(e);
            }
        };
        stream.set_nodelay(true)?;
        state.set(ConnectionState::Connected);

        let (reader, writer) = stream.into_split();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        tokio::spawn(Self::read_loop(
            reader,
            in_tx,
            frame.clone(),
            Arc::clone(&state),
            shutdown_rx.clone(),
        ));
        tokio::spawn(Self::write_loop(writer, out_rx, frame, shutdown_rx));

        Ok(Self {
            outbound: out_tx,
            inbound: in_rx,
            state,
            shutdown_tx,
        })
    }

    /// Return the connection state watch.
    pub fn state(&self) -> &ConnectionStateWatch {
        &self.state
    }

    /// Queue a frame for the server.
    pub fn send(&self, payload: Vec<u8>) -> Result<(), ClientClosed> {
        self.outbound.send(payload).map_err(|_| ClientClosed)
    }

    /// Wait for the next frame. `None` once the connection is closed and
    /// every received frame has been consumed.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.inbound.recv().await
    }

    /// Disconnect from the server.
    pub fn disconnect(&self) {
        let _ = self.shutdown_tx.send(true);
        self.state.set(ConnectionState::Disconnected);
    }

    async fn read_loop(
        mut reader: OwnedReadHalf,
        inbound: mpsc::UnboundedSender<Vec<u8>>,
        frame: FrameConfig,
        state: Arc<ConnectionStateWatch>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                result = read_frame(&mut reader, &frame) => {
                    match result {
                        Ok(payload) if payload.is_empty() => {}
                        Ok(payload) => {
                            if inbound.send(payload).is_err() {
                                break;
                            }
                        }
                        Err(FrameError::ConnectionClosed) => break,
                        Err(e) => {
                            tracing::warn!("Read from server failed: {e}");
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
        state.set(ConnectionState::Disconnected);
    }

    async fn write_loop(
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
                        tracing::warn!("Write to server failed: {e}");
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

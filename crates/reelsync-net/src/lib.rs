//! TCP transport: length-prefixed framing, versioned message encoding, and
//! a server/client pair that deliver frames reliably and in order.

pub mod framing;
pub mod messages;
pub mod tcp_client;
pub mod tcp_server;

pub use framing::{FrameConfig, FrameError, read_frame, write_frame};
pub use messages::{MessageError, PROTOCOL_VERSION, deserialize_message, serialize_message};
pub use tcp_client::{ClientClosed, ConnectionState, ConnectionStateWatch, GameClient};
pub use tcp_server::{
    ConnectionId, ConnectionLimitReached, ConnectionMap, GameServer, IdGenerator, ServerConfig,
    ServerEvent, UnknownConnection,
};

//! Framed, handshake-validated TCP messaging for small multiplayer games.
//! One server, many clients; every socket is driven by a single background I/O thread
//! and inbound traffic reaches the application through a blocking queue.

pub mod client;
pub mod connection;
pub mod context;
pub mod error;
pub mod handshake;
pub mod message;
pub mod queue;
pub mod server;

pub use client::{Client, ClientConfig};
pub use connection::{Connection, ConnectionState, Role};
pub use context::IoContext;
pub use error::NetError;
pub use message::{
    FrameError, Message, MessageError, MessageHeader, MessageKind, OwnedMessage,
    DEFAULT_MAX_MESSAGE_SIZE, HEADER_SIZE,
};
pub use queue::{QueueError, TsQueue};
pub use server::{Clients, Server, ServerConfig, ServerHandler};

//! Errors surfaced by the endpoints. Failures on a live connection never reach the
//! application; they close the socket and are logged.

use std::io;
use std::net::SocketAddr;

use crate::message::FrameError;

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("failed to resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        source: io::Error,
    },
    #[error("no address found for {host}:{port}")]
    NoAddress { host: String, port: u16 },
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },
    #[error("failed to start I/O context: {0}")]
    Runtime(#[source] io::Error),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

//! One TCP socket: handshake, then a read loop and a write loop on the execution context.
//!
//! Server role: write challenge, read response, compare with the precomputed answer.
//! Client role: connect, read challenge, write `scramble(challenge)`, done.
//! Both loops stop on the first I/O error, which closes the socket for good.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::NetError;
use crate::handshake::{self, HANDSHAKE_SIZE};
use crate::message::{Message, MessageHeader, MessageKind, OwnedMessage, HEADER_SIZE};
use crate::queue::TsQueue;

/// Which endpoint owns the connection. Fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    /// Socket open, handshake not finished. No application traffic yet.
    PendingValidation = 1,
    Active = 2,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectionState::PendingValidation,
            2 => ConnectionState::Active,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Invoked on the I/O thread once a server-side connection passes validation.
pub type OnValidated<K> = Box<dyn FnOnce(&Arc<Connection<K>>) + Send + 'static>;

pub struct Connection<K: MessageKind> {
    role: Role,
    id: AtomicU32,
    handle: Handle,
    /// Socket not yet handed to the I/O tasks.
    socket: Mutex<Option<TcpStream>>,
    peer_addr: Mutex<Option<SocketAddr>>,
    open: AtomicBool,
    state: AtomicU8,
    closing: CancellationToken,
    outbound: TsQueue<Message<K>>,
    wake_writer: Notify,
    inbound: Arc<TsQueue<OwnedMessage<K>>>,
    handshake_out: u64,
    handshake_check: u64,
    max_message_size: u32,
}

impl<K: MessageKind> Connection<K> {
    /// `socket` is the accepted stream for a server-side connection; `None` for a client,
    /// which opens its socket in [`Connection::connect_to_server`].
    pub fn new(
        role: Role,
        handle: Handle,
        socket: Option<TcpStream>,
        inbound: Arc<TsQueue<OwnedMessage<K>>>,
        max_message_size: u32,
    ) -> Arc<Self> {
        let (handshake_out, handshake_check) = match role {
            Role::Server => {
                let challenge = handshake::challenge();
                (challenge, handshake::scramble(challenge))
            }
            Role::Client => (0, 0),
        };
        let peer_addr = socket.as_ref().and_then(|s| s.peer_addr().ok());
        let open = socket.is_some();
        Arc::new(Self {
            role,
            id: AtomicU32::new(0),
            handle,
            socket: Mutex::new(socket),
            peer_addr: Mutex::new(peer_addr),
            open: AtomicBool::new(open),
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            closing: CancellationToken::new(),
            outbound: TsQueue::new(),
            wake_writer: Notify::new(),
            inbound,
            handshake_out,
            handshake_check,
            max_message_size,
        })
    }

    /// Server-assigned identifier; 0 on the client side.
    pub fn id(&self) -> u32 {
        self.id.load(Ordering::Acquire)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        *self.peer_addr.lock()
    }

    /// True while the socket is open, including during the handshake.
    pub fn is_connected(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Start the server side of the handshake for an accepted socket.
    pub fn connect_to_client(self: &Arc<Self>, id: u32, on_validated: OnValidated<K>) {
        if self.role != Role::Server {
            warn!("connect_to_client called on a client-side connection");
            return;
        }
        if !self.is_connected() {
            return;
        }
        let Some(stream) = self.socket.lock().take() else {
            warn!("[{}] connect_to_client called twice", id);
            return;
        };
        self.id.store(id, Ordering::Release);
        self.set_state(ConnectionState::PendingValidation);
        let conn = self.clone();
        self.handle
            .spawn(async move { conn.validate_client(stream, on_validated).await });
    }

    /// Connect to the first reachable address, then answer the server's challenge.
    pub fn connect_to_server(self: &Arc<Self>, addrs: Vec<SocketAddr>) {
        if self.role != Role::Client {
            warn!("connect_to_server called on a server-side connection");
            return;
        }
        self.open.store(true, Ordering::Release);
        self.set_state(ConnectionState::PendingValidation);
        let conn = self.clone();
        self.handle
            .spawn(async move { conn.validate_with_server(addrs).await });
    }

    /// Queue a message for the write loop. Dropped if the socket is closed.
    pub fn send(&self, msg: Message<K>) {
        if !self.is_connected() {
            return;
        }
        self.outbound.push_back(msg);
        self.wake_writer.notify_one();
    }

    /// Close the socket. The I/O tasks notice on the context and release their halves.
    pub fn disconnect(&self) {
        if self.is_connected() {
            self.close();
        }
    }

    fn close(&self) {
        let was_open = self.open.swap(false, Ordering::AcqRel);
        self.set_state(ConnectionState::Disconnected);
        self.closing.cancel();
        self.outbound.clear();
        self.socket.lock().take();
        if was_open {
            debug!("[{}] socket closed", self.id());
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// PendingValidation -> Active. Fails if a disconnect got there first.
    fn activate(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::PendingValidation as u8,
                ConnectionState::Active as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    async fn validate_client(self: Arc<Self>, mut stream: TcpStream, on_validated: OnValidated<K>) {
        let exchange = tokio::select! {
            _ = self.closing.cancelled() => return,
            r = exchange_as_server(&mut stream, self.handshake_out) => r,
        };
        match exchange {
            Ok(response) if response == self.handshake_check => {
                if !self.activate() {
                    return;
                }
                info!("[{}] client validated", self.id());
                on_validated(&self);
                self.start_io(stream);
            }
            Ok(_) => {
                info!("[{}] client disconnected (failed validation)", self.id());
                self.close();
            }
            Err(e) => {
                info!("[{}] client disconnected during validation: {}", self.id(), e);
                self.close();
            }
        }
    }

    async fn validate_with_server(self: Arc<Self>, addrs: Vec<SocketAddr>) {
        let exchange = tokio::select! {
            _ = self.closing.cancelled() => return,
            r = exchange_as_client(&addrs) => r,
        };
        match exchange {
            Ok(stream) => {
                *self.peer_addr.lock() = stream.peer_addr().ok();
                // A disconnect may have raced the handshake; never revive a closed connection.
                if !self.activate() {
                    return;
                }
                self.start_io(stream);
            }
            Err(e) => {
                info!("connection to server failed: {}", e);
                self.close();
            }
        }
    }

    fn start_io(self: &Arc<Self>, stream: TcpStream) {
        let (reader, writer) = stream.into_split();
        let conn = self.clone();
        self.handle.spawn(async move { conn.read_loop(reader).await });
        let conn = self.clone();
        self.handle.spawn(async move { conn.write_loop(writer).await });
    }

    async fn read_loop(self: Arc<Self>, mut reader: OwnedReadHalf) {
        loop {
            let read = tokio::select! {
                _ = self.closing.cancelled() => break,
                r = self.read_message(&mut reader) => r,
            };
            match read {
                Ok(msg) => {
                    let remote = match self.role {
                        Role::Server => Some(self.clone()),
                        Role::Client => None,
                    };
                    self.inbound.push_back(OwnedMessage { remote, msg });
                }
                Err(e) => {
                    debug!("[{}] read failed: {}", self.id(), e);
                    self.close();
                    break;
                }
            }
        }
    }

    async fn read_message(&self, reader: &mut OwnedReadHalf) -> Result<Message<K>, NetError> {
        let mut raw = [0u8; HEADER_SIZE];
        reader.read_exact(&mut raw).await?;
        let header = MessageHeader::<K>::decode(&raw)?;
        header.check_size(self.max_message_size)?;
        let mut body = vec![0u8; header.body_len()];
        if !body.is_empty() {
            reader.read_exact(&mut body).await?;
        }
        Ok(Message::from_parts(header.kind, body))
    }

    async fn write_loop(self: Arc<Self>, mut writer: OwnedWriteHalf) {
        loop {
            while let Ok(msg) = self.outbound.pop_front() {
                let written = tokio::select! {
                    _ = self.closing.cancelled() => return,
                    r = write_message(&mut writer, &msg) => r,
                };
                if let Err(e) = written {
                    debug!("[{}] write failed: {}", self.id(), e);
                    self.close();
                    return;
                }
            }
            tokio::select! {
                _ = self.closing.cancelled() => return,
                _ = self.wake_writer.notified() => {}
            }
        }
    }
}

impl<K: MessageKind> fmt::Debug for Connection<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("role", &self.role)
            .field("state", &self.state())
            .field("peer_addr", &self.peer_addr())
            .finish()
    }
}

async fn exchange_as_server(stream: &mut TcpStream, challenge: u64) -> io::Result<u64> {
    stream.write_all(&handshake::encode(challenge)).await?;
    let mut response = [0u8; HANDSHAKE_SIZE];
    stream.read_exact(&mut response).await?;
    Ok(handshake::decode(response))
}

async fn exchange_as_client(addrs: &[SocketAddr]) -> io::Result<TcpStream> {
    let mut stream = TcpStream::connect(addrs).await?;
    let mut challenge = [0u8; HANDSHAKE_SIZE];
    stream.read_exact(&mut challenge).await?;
    let response = handshake::scramble(handshake::decode(challenge));
    stream.write_all(&handshake::encode(response)).await?;
    Ok(stream)
}

async fn write_message<K: MessageKind>(
    writer: &mut OwnedWriteHalf,
    msg: &Message<K>,
) -> io::Result<()> {
    writer.write_all(&msg.header().encode()).await?;
    if !msg.body().is_empty() {
        writer.write_all(msg.body()).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::runtime::Builder;

    crate::message_kinds! {
        enum Kind {
            Only = 1,
        }
    }

    fn pending(role: Role) -> (tokio::runtime::Runtime, Arc<Connection<Kind>>) {
        let rt = Builder::new_current_thread().enable_all().build().unwrap();
        let conn = Connection::new(role, rt.handle().clone(), None, Arc::new(TsQueue::new()), 64);
        conn.open.store(true, Ordering::Release);
        conn.set_state(ConnectionState::PendingValidation);
        (rt, conn)
    }

    #[test]
    fn handshake_success_activates_open_connection() {
        let (_rt, conn) = pending(Role::Server);
        assert!(conn.activate());
        assert_eq!(conn.state(), ConnectionState::Active);
        assert!(conn.is_connected());
    }

    #[test]
    fn disconnect_before_activation_wins() {
        for role in [Role::Server, Role::Client] {
            let (_rt, conn) = pending(role);
            conn.disconnect();
            assert!(!conn.activate());
            assert_eq!(conn.state(), ConnectionState::Disconnected);
            assert!(!conn.is_connected());
        }
    }

    #[test]
    fn activation_happens_once() {
        let (_rt, conn) = pending(Role::Client);
        assert!(conn.activate());
        assert!(!conn.activate());
    }

    #[test]
    fn send_on_closed_connection_is_dropped() {
        let (_rt, conn) = pending(Role::Server);
        conn.disconnect();
        conn.send(Message::new(Kind::Only));
        assert!(conn.outbound.is_empty());
    }
}

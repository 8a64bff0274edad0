//! Server endpoint: acceptor, connection collection and the application-side message pump.
//!
//! Applications attach behaviour through [`ServerHandler`]. Admission and validation hooks
//! run on the I/O thread and must return quickly; `on_message` runs on the thread calling
//! [`Server::update`].

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tracing::{error, info, warn};

use crate::connection::{Connection, Role};
use crate::context::IoContext;
use crate::error::NetError;
use crate::message::{Message, MessageKind, OwnedMessage, DEFAULT_MAX_MESSAGE_SIZE};
use crate::queue::TsQueue;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 60000;

/// First id handed out; lower values stay free for application use.
pub const DEFAULT_FIRST_CLIENT_ID: u32 = 10000;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: IpAddr,
    /// 0 picks an ephemeral port; see [`Server::local_addr`].
    pub port: u16,
    pub first_client_id: u32,
    pub max_message_size: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            first_client_id: DEFAULT_FIRST_CLIENT_ID,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// Extension points of a server. Every hook has a default; admission rejects by default.
pub trait ServerHandler<K: MessageKind>: Send + 'static {
    /// Accept or refuse a freshly accepted socket, before the handshake.
    fn on_client_connect(&mut self, _client: &Arc<Connection<K>>) -> bool {
        false
    }

    /// The client answered the challenge correctly. Called once per connection.
    fn on_client_validated(&mut self, _client: &Arc<Connection<K>>) {}

    /// The client was found disconnected and removed from the collection.
    fn on_client_disconnect(&mut self, _client: &Arc<Connection<K>>) {}

    /// One inbound message, dispatched from [`Server::update`]. Sends made through
    /// `clients` are safe here; any client they find dead is reported after this returns.
    fn on_message(
        &mut self,
        _clients: &mut Clients<K>,
        _client: &Arc<Connection<K>>,
        _msg: Message<K>,
    ) {
    }
}

/// The server's connection collection.
///
/// Clients found disconnected while sending are removed and remembered; the server reports
/// each of them to [`ServerHandler::on_client_disconnect`] exactly once.
pub struct Clients<K: MessageKind> {
    connections: Vec<Arc<Connection<K>>>,
    dropped: Vec<Arc<Connection<K>>>,
}

impl<K: MessageKind> Clients<K> {
    fn new() -> Self {
        Self {
            connections: Vec::new(),
            dropped: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Connection<K>>> {
        self.connections.iter()
    }

    pub fn get(&self, id: u32) -> Option<&Arc<Connection<K>>> {
        self.connections.iter().find(|c| c.id() == id)
    }

    /// Send to one client; a disconnected target is removed instead.
    pub fn message_client(&mut self, client: &Arc<Connection<K>>, msg: Message<K>) {
        if client.is_connected() {
            client.send(msg);
            return;
        }
        let before = self.connections.len();
        self.connections.retain(|c| !Arc::ptr_eq(c, client));
        if self.connections.len() != before {
            self.dropped.push(client.clone());
        }
    }

    /// Send to every connected client except `exclude`. Disconnected members are swept
    /// out after the pass.
    pub fn message_all_clients(&mut self, msg: &Message<K>, exclude: Option<&Arc<Connection<K>>>) {
        let mut dead = Vec::new();
        for client in &self.connections {
            if client.is_connected() {
                if !exclude.is_some_and(|ex| Arc::ptr_eq(ex, client)) {
                    client.send(msg.clone());
                }
            } else {
                dead.push(client.clone());
            }
        }
        if dead.is_empty() {
            return;
        }
        self.connections
            .retain(|c| !dead.iter().any(|d| Arc::ptr_eq(d, c)));
        self.dropped.extend(dead);
    }

    fn push(&mut self, client: Arc<Connection<K>>) {
        self.connections.push(client);
    }

    fn take_dropped(&mut self) -> Vec<Arc<Connection<K>>> {
        std::mem::take(&mut self.dropped)
    }
}

pub struct Server<K: MessageKind, H: ServerHandler<K>> {
    config: ServerConfig,
    // Lock order: handler, then clients.
    handler: Arc<Mutex<H>>,
    clients: Arc<Mutex<Clients<K>>>,
    inbound: Arc<TsQueue<OwnedMessage<K>>>,
    /// Outlives restarts so ids stay unique for the server's lifetime.
    next_id: Arc<AtomicU32>,
    context: Option<IoContext>,
    local_addr: Option<SocketAddr>,
}

impl<K: MessageKind, H: ServerHandler<K>> Server<K, H> {
    pub fn new(config: ServerConfig, handler: H) -> Self {
        let next_id = Arc::new(AtomicU32::new(config.first_client_id));
        Self {
            config,
            handler: Arc::new(Mutex::new(handler)),
            clients: Arc::new(Mutex::new(Clients::new())),
            inbound: Arc::new(TsQueue::new()),
            next_id,
            context: None,
            local_addr: None,
        }
    }

    /// Bind, prime the accept loop, then launch the I/O thread. No-op if already running.
    pub fn start(&mut self) -> Result<(), NetError> {
        if self.context.is_some() {
            return Ok(());
        }
        match self.listen() {
            Ok(addr) => {
                info!("[SERVER] started on {}", addr);
                Ok(())
            }
            Err(e) => {
                error!("[SERVER] failed to start: {}", e);
                Err(e)
            }
        }
    }

    fn listen(&mut self) -> Result<SocketAddr, NetError> {
        let addr = SocketAddr::new(self.config.bind_addr, self.config.port);
        let listener =
            std::net::TcpListener::bind(addr).map_err(|source| NetError::Bind { addr, source })?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let mut context = IoContext::new().map_err(NetError::Runtime)?;
        let listener = {
            let _guard = context.handle().enter();
            TcpListener::from_std(listener)?
        };
        let acceptor = Acceptor {
            handle: context.handle().clone(),
            handler: self.handler.clone(),
            clients: self.clients.clone(),
            inbound: self.inbound.clone(),
            next_id: self.next_id.clone(),
            max_message_size: self.config.max_message_size,
        };
        // The accept loop must be queued before the thread starts so the context has work.
        context.spawn(acceptor.run(listener));
        context.run("osrs-server-io").map_err(NetError::Runtime)?;

        self.context = Some(context);
        self.local_addr = Some(local_addr);
        Ok(local_addr)
    }

    /// Stop the I/O thread. Tracked connections are marked closed; they are reported to
    /// `on_client_disconnect` by the next send that touches them.
    pub fn stop(&mut self) {
        let Some(mut context) = self.context.take() else {
            return;
        };
        context.stop();
        for client in self.clients.lock().iter() {
            client.disconnect();
        }
        self.local_addr = None;
        info!("[SERVER] stopped");
    }

    pub fn is_running(&self) -> bool {
        self.context.is_some()
    }

    /// Address actually bound, while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn connection_count(&self) -> usize {
        self.clients.lock().len()
    }

    /// Inbound messages waiting for [`Server::update`].
    pub fn pending(&self) -> usize {
        self.inbound.count()
    }

    /// Block until an inbound message is queued or `timeout` passes. True if one is waiting.
    pub fn wait_for_messages(&self, timeout: Duration) -> bool {
        self.inbound.wait_timeout(timeout)
    }

    /// Lock the handler. The I/O thread takes this lock to run admission and validation
    /// hooks, and always before the connection collection; do not call `message_client`,
    /// `message_all_clients` or `update` while holding the guard.
    pub fn handler(&self) -> MutexGuard<'_, H> {
        self.handler.lock()
    }

    /// Snapshot of the tracked connections. No lock is held once this returns.
    pub fn connections(&self) -> Vec<Arc<Connection<K>>> {
        self.clients.lock().iter().cloned().collect()
    }

    pub fn message_client(&self, client: &Arc<Connection<K>>, msg: Message<K>) {
        let dropped = {
            let mut clients = self.clients.lock();
            clients.message_client(client, msg);
            clients.take_dropped()
        };
        self.report_dropped(dropped);
    }

    pub fn message_all_clients(&self, msg: &Message<K>, exclude: Option<&Arc<Connection<K>>>) {
        let dropped = {
            let mut clients = self.clients.lock();
            clients.message_all_clients(msg, exclude);
            clients.take_dropped()
        };
        self.report_dropped(dropped);
    }

    /// Dispatch up to `max_messages` inbound messages to `on_message` (`usize::MAX` for all).
    /// With `blocking`, first wait for at least one message. Returns how many were handled.
    pub fn update(&mut self, max_messages: usize, blocking: bool) -> usize {
        if blocking {
            self.inbound.wait();
        }
        let mut handled = 0;
        while handled < max_messages {
            let Ok(owned) = self.inbound.pop_front() else {
                break;
            };
            handled += 1;
            let Some(remote) = owned.remote else {
                warn!("[SERVER] dropping message without an origin: {}", owned.msg);
                continue;
            };
            let mut handler = self.handler.lock();
            let dropped = {
                let mut clients = self.clients.lock();
                handler.on_message(&mut clients, &remote, owned.msg);
                clients.take_dropped()
            };
            for client in &dropped {
                handler.on_client_disconnect(client);
            }
        }
        handled
    }

    fn report_dropped(&self, dropped: Vec<Arc<Connection<K>>>) {
        if dropped.is_empty() {
            return;
        }
        let mut handler = self.handler.lock();
        for client in &dropped {
            handler.on_client_disconnect(client);
        }
    }
}

impl<K: MessageKind, H: ServerHandler<K>> Drop for Server<K, H> {
    fn drop(&mut self) {
        self.stop();
        // Queued messages hold their connection, and every connection holds this queue.
        self.inbound.clear();
    }
}

/// State owned by the accept loop on the I/O thread.
struct Acceptor<K: MessageKind, H: ServerHandler<K>> {
    handle: Handle,
    handler: Arc<Mutex<H>>,
    clients: Arc<Mutex<Clients<K>>>,
    inbound: Arc<TsQueue<OwnedMessage<K>>>,
    next_id: Arc<AtomicU32>,
    max_message_size: u32,
}

impl<K: MessageKind, H: ServerHandler<K>> Acceptor<K, H> {
    async fn run(self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((socket, peer)) => {
                    info!("[SERVER] new connection: {}", peer);
                    self.admit(socket);
                }
                Err(e) => warn!("[SERVER] new connection error: {}", e),
            }
        }
    }

    fn admit(&self, socket: TcpStream) {
        let client = Connection::new(
            Role::Server,
            self.handle.clone(),
            Some(socket),
            self.inbound.clone(),
            self.max_message_size,
        );
        let mut handler = self.handler.lock();
        if !handler.on_client_connect(&client) {
            info!("[-----] connection denied");
            return;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.clients.lock().push(client.clone());
        drop(handler);

        let handler = self.handler.clone();
        client.connect_to_client(
            id,
            Box::new(move |client| handler.lock().on_client_validated(client)),
        );
        info!("[{}] connection approved", id);
    }
}

//! Client endpoint: one connection to a server plus the I/O thread that drives it.

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use tracing::{error, info};

use crate::connection::{Connection, ConnectionState, Role};
use crate::context::IoContext;
use crate::error::NetError;
use crate::message::{Message, MessageKind, OwnedMessage, DEFAULT_MAX_MESSAGE_SIZE};
use crate::queue::TsQueue;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Largest frame accepted from the server.
    pub max_message_size: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

pub struct Client<K: MessageKind> {
    config: ClientConfig,
    context: Option<IoContext>,
    connection: Option<Arc<Connection<K>>>,
    inbound: Arc<TsQueue<OwnedMessage<K>>>,
}

impl<K: MessageKind> Client<K> {
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            config,
            context: None,
            connection: None,
            inbound: Arc::new(TsQueue::new()),
        }
    }

    /// Resolve `host:port`, start the connect + handshake sequence and launch the I/O thread.
    ///
    /// Returns once the thread is running; the handshake completes in the background.
    /// Any previous session is torn down first.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<(), NetError> {
        self.disconnect();
        match self.start_session(host, port) {
            Ok(()) => {
                info!("connecting to {}:{}", host, port);
                Ok(())
            }
            Err(e) => {
                error!("client connect failed: {}", e);
                Err(e)
            }
        }
    }

    fn start_session(&mut self, host: &str, port: u16) -> Result<(), NetError> {
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|source| NetError::Resolve {
                host: host.to_string(),
                port,
                source,
            })?
            .collect();
        if addrs.is_empty() {
            return Err(NetError::NoAddress {
                host: host.to_string(),
                port,
            });
        }
        let mut context = IoContext::new().map_err(NetError::Runtime)?;
        context.run("osrs-client-io").map_err(NetError::Runtime)?;
        let connection = Connection::new(
            Role::Client,
            context.handle().clone(),
            None,
            self.inbound.clone(),
            self.config.max_message_size,
        );
        connection.connect_to_server(addrs);
        self.context = Some(context);
        self.connection = Some(connection);
        Ok(())
    }

    /// Close the connection, stop the I/O thread and release the connection.
    pub fn disconnect(&mut self) {
        if let Some(connection) = &self.connection {
            connection.disconnect();
        }
        if let Some(mut context) = self.context.take() {
            context.stop();
        }
        self.connection = None;
    }

    pub fn is_connected(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|c| c.is_connected())
    }

    /// `Active` once the handshake answer has been written.
    pub fn state(&self) -> ConnectionState {
        self.connection
            .as_ref()
            .map_or(ConnectionState::Disconnected, |c| c.state())
    }

    /// No-op unless connected.
    pub fn send(&self, msg: Message<K>) {
        if let Some(connection) = &self.connection {
            if connection.is_connected() {
                connection.send(msg);
            }
        }
    }

    /// Messages received from the server, in arrival order. Drain it every tick.
    pub fn incoming(&self) -> &TsQueue<OwnedMessage<K>> {
        &self.inbound
    }
}

impl<K: MessageKind> Default for Client<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: MessageKind> Drop for Client<K> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    crate::message_kinds! {
        enum Kind {
            Only = 1,
        }
    }

    #[test]
    fn unconnected_client_is_inert() {
        let mut client: Client<Kind> = Client::new();
        assert!(!client.is_connected());
        assert_eq!(client.state(), ConnectionState::Disconnected);
        client.send(Message::new(Kind::Only));
        assert!(client.incoming().is_empty());
        client.disconnect();
    }

    #[test]
    fn unresolvable_host_fails_without_starting() {
        let mut client: Client<Kind> = Client::new();
        let err = client.connect("host.invalid", 1).unwrap_err();
        assert!(matches!(
            err,
            NetError::Resolve { .. } | NetError::NoAddress { .. }
        ));
        assert!(!client.is_connected());
    }
}

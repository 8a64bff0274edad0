//! Player relay: keeps a roster of registered players and fans their updates out to
//! everyone else. The relay never interprets positions or inventory.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use osrs_net::{Clients, Connection, Message, Server, ServerHandler};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::protocol::{self, GameMsg, PlayerDescription};

pub type RelayServer = Server<GameMsg, Relay>;

#[derive(Debug, Default)]
pub struct Relay {
    roster: BTreeMap<u32, PlayerDescription>,
    /// Players that left since the last processed message; announced on the next one.
    garbage_ids: Vec<u32>,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn roster(&self) -> &BTreeMap<u32, PlayerDescription> {
        &self.roster
    }

    fn retire(&mut self, id: u32) -> bool {
        if self.roster.remove(&id).is_some() {
            self.garbage_ids.push(id);
            true
        } else {
            false
        }
    }

    fn announce_removals(&mut self, clients: &mut Clients<GameMsg>) {
        for id in self.garbage_ids.drain(..) {
            info!("removing player {}", id);
            clients.message_all_clients(&protocol::remove_player(id), None);
        }
    }

    fn register(
        &mut self,
        clients: &mut Clients<GameMsg>,
        client: &Arc<Connection<GameMsg>>,
        mut msg: Message<GameMsg>,
    ) {
        let mut desc = match msg.pop::<PlayerDescription>() {
            Ok(d) => d,
            Err(e) => {
                warn!("[{}] bad registration: {}", client.id(), e);
                return;
            }
        };
        desc.unique_id = client.id();
        self.roster.insert(desc.unique_id, desc);
        info!("[{}] registered player", desc.unique_id);

        clients.message_client(client, protocol::assign_id(desc.unique_id));
        clients.message_all_clients(&protocol::add_player(&desc), Some(client));
        for player in self.roster.values() {
            clients.message_client(client, protocol::add_player(player));
        }
    }

    fn update(
        &mut self,
        clients: &mut Clients<GameMsg>,
        client: &Arc<Connection<GameMsg>>,
        msg: Message<GameMsg>,
    ) {
        let mut body = msg.clone();
        if let Ok(desc) = body.pop::<PlayerDescription>() {
            if let Some(entry) = self.roster.get_mut(&client.id()) {
                *entry = PlayerDescription {
                    unique_id: client.id(),
                    ..desc
                };
            }
        }
        clients.message_all_clients(&msg, Some(client));
    }
}

impl ServerHandler<GameMsg> for Relay {
    fn on_client_connect(&mut self, _client: &Arc<Connection<GameMsg>>) -> bool {
        true
    }

    fn on_client_validated(&mut self, client: &Arc<Connection<GameMsg>>) {
        client.send(protocol::accepted());
    }

    fn on_client_disconnect(&mut self, client: &Arc<Connection<GameMsg>>) {
        if self.retire(client.id()) {
            info!("[{}] ungraceful removal", client.id());
        }
    }

    fn on_message(
        &mut self,
        clients: &mut Clients<GameMsg>,
        client: &Arc<Connection<GameMsg>>,
        msg: Message<GameMsg>,
    ) {
        self.announce_removals(clients);

        match msg.kind() {
            GameMsg::ClientRegisterWithServer => self.register(clients, client, msg),
            GameMsg::ClientUnregisterWithServer => {
                if self.retire(client.id()) {
                    info!("[{}] unregistered", client.id());
                    self.announce_removals(clients);
                }
            }
            GameMsg::GameUpdatePlayer => self.update(clients, client, msg),
            GameMsg::ServerPing => clients.message_client(client, msg),
            other => debug!("[{}] ignoring {:?}", client.id(), other),
        }
    }
}

/// Dispatch inbound traffic until `stop` fires. Wakes every `poll` to check for it.
pub fn serve(server: &mut RelayServer, stop: &CancellationToken, poll: Duration) {
    while !stop.is_cancelled() {
        if server.wait_for_messages(poll) {
            server.update(usize::MAX, false);
        }
    }
}

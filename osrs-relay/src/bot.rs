//! Headless relay client. Registers a player, mirrors the roster and wanders around.

use std::collections::BTreeMap;
use std::thread;
use std::time::{Duration, Instant};

use osrs_net::{Client, ConnectionState, Message, MessageError};
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::protocol::{self, GameMsg, PlayerDescription};

/// How long to wait for the handshake before giving up.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Client-side view of the game, driven by inbound messages.
#[derive(Debug)]
pub struct Bot {
    me: PlayerDescription,
    player_id: Option<u32>,
    roster: BTreeMap<u32, PlayerDescription>,
    heading: f32,
}

impl Bot {
    pub fn new(avatar_id: u32) -> Self {
        Self {
            me: PlayerDescription {
                avatar_id,
                ..PlayerDescription::default()
            },
            player_id: None,
            roster: BTreeMap::new(),
            heading: 0.0,
        }
    }

    pub fn player_id(&self) -> Option<u32> {
        self.player_id
    }

    pub fn roster(&self) -> &BTreeMap<u32, PlayerDescription> {
        &self.roster
    }

    /// Apply one message from the server. Returns a reply to send, if any.
    pub fn handle(
        &mut self,
        mut msg: Message<GameMsg>,
    ) -> Result<Option<Message<GameMsg>>, MessageError> {
        match msg.kind() {
            GameMsg::ClientAccepted => {
                info!("server accepted client, registering");
                return Ok(Some(protocol::register(&self.me)));
            }
            GameMsg::ClientAssignId => {
                let id: u32 = msg.pop()?;
                info!("assigned client id {}", id);
                self.player_id = Some(id);
                self.me.unique_id = id;
            }
            GameMsg::GameAddPlayer => {
                let desc: PlayerDescription = msg.pop()?;
                if Some(desc.unique_id) == self.player_id {
                    self.me = desc;
                } else if !self.roster.contains_key(&desc.unique_id) {
                    info!("player {} joined", desc.unique_id);
                }
                self.roster.insert(desc.unique_id, desc);
            }
            GameMsg::GameRemovePlayer => {
                let id: u32 = msg.pop()?;
                if self.roster.remove(&id).is_some() {
                    info!("player {} left", id);
                }
            }
            GameMsg::GameUpdatePlayer => {
                let desc: PlayerDescription = msg.pop()?;
                self.roster.insert(desc.unique_id, desc);
            }
            GameMsg::ServerPing
            | GameMsg::ServerGetStatus
            | GameMsg::ClientRegisterWithServer
            | GameMsg::ClientUnregisterWithServer => {}
        }
        Ok(None)
    }

    /// Advance the player by `dt` and describe it. `None` until an id is assigned.
    pub fn step(&mut self, dt: Duration, turn: f32) -> Option<Message<GameMsg>> {
        let id = self.player_id?;
        self.heading += turn;
        let speed = self.me.mining_speed;
        self.me.pos_x += self.heading.cos() * speed * dt.as_secs_f32();
        self.me.pos_y += self.heading.sin() * speed * dt.as_secs_f32();
        self.roster.insert(id, self.me);
        Some(protocol::update_player(&self.me))
    }
}

/// Connect, then pump messages and send an update every tick until `stop` fires.
pub fn run(config: &Config, stop: &CancellationToken) -> anyhow::Result<()> {
    let mut rng = rand::thread_rng();
    let mut bot = Bot::new(rng.gen_range(0..8));
    let mut client: Client<GameMsg> = Client::with_config(config.client_config());
    client.connect(&config.host, config.port)?;

    let deadline = Instant::now() + CONNECT_TIMEOUT;
    while client.state() == ConnectionState::PendingValidation && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    if client.state() != ConnectionState::Active {
        anyhow::bail!("no handshake from {}:{}", config.host, config.port);
    }

    let tick = config.tick();
    while !stop.is_cancelled() {
        if !client.is_connected() {
            anyhow::bail!("server closed the connection");
        }
        client.incoming().wait_timeout(tick);
        while let Ok(owned) = client.incoming().pop_front() {
            match bot.handle(owned.msg) {
                Ok(Some(reply)) => client.send(reply),
                Ok(None) => {}
                Err(e) => warn!("malformed message: {}", e),
            }
        }
        if let Some(update) = bot.step(tick, rng.gen_range(-0.3..0.3)) {
            client.send(update);
        }
    }
    client.disconnect();
    info!("bot stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(id: u32) -> PlayerDescription {
        PlayerDescription {
            unique_id: id,
            ..PlayerDescription::default()
        }
    }

    #[test]
    fn accepted_triggers_registration() {
        let mut bot = Bot::new(3);
        let mut reply = bot.handle(protocol::accepted()).unwrap().unwrap();
        assert_eq!(reply.kind(), GameMsg::ClientRegisterWithServer);
        let sent: PlayerDescription = reply.pop().unwrap();
        assert_eq!(sent.avatar_id, 3);
    }

    #[test]
    fn no_movement_before_id() {
        let mut bot = Bot::new(0);
        assert!(bot.step(Duration::from_millis(100), 0.0).is_none());
        bot.handle(protocol::assign_id(10004)).unwrap();
        assert_eq!(bot.player_id(), Some(10004));

        let mut update = bot.step(Duration::from_secs(1), 0.0).unwrap();
        let moved: PlayerDescription = update.pop().unwrap();
        assert_eq!(moved.unique_id, 10004);
        assert_eq!(moved.pos_x, 1.0);
        assert_eq!(moved.pos_y, 0.0);
    }

    #[test]
    fn roster_follows_add_update_remove() {
        let mut bot = Bot::new(0);
        bot.handle(protocol::assign_id(10000)).unwrap();
        bot.handle(protocol::add_player(&desc(10000))).unwrap();
        bot.handle(protocol::add_player(&desc(10001))).unwrap();
        assert_eq!(bot.roster().len(), 2);

        let mut moved = desc(10001);
        moved.pos_x = 5.0;
        bot.handle(protocol::update_player(&moved)).unwrap();
        assert_eq!(bot.roster()[&10001].pos_x, 5.0);

        bot.handle(protocol::remove_player(10001)).unwrap();
        assert_eq!(bot.roster().keys().copied().collect::<Vec<_>>(), vec![10000]);
    }

    #[test]
    fn truncated_payload_is_reported() {
        let mut bot = Bot::new(0);
        let short = Message::new(GameMsg::GameAddPlayer);
        assert!(matches!(
            bot.handle(short),
            Err(MessageError::Underflow { .. })
        ));
        assert!(bot.roster().is_empty());
    }
}

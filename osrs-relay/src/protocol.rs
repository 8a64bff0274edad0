//! Message catalog and payloads shared by the relay server and its clients.

use osrs_net::{message_kinds, Message};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

message_kinds! {
    pub enum GameMsg {
        ServerGetStatus = 0,
        /// Echoed back unchanged; the sender measures the round trip.
        ServerPing = 1,
        ClientAccepted = 2,
        ClientAssignId = 3,
        ClientRegisterWithServer = 4,
        ClientUnregisterWithServer = 5,
        GameAddPlayer = 6,
        GameRemovePlayer = 7,
        GameUpdatePlayer = 8,
    }
}

/// Per-player state carried verbatim between clients. The relay only rewrites `unique_id`.
#[derive(Debug, Clone, Copy, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct PlayerDescription {
    pub unique_id: u32,
    pub avatar_id: u32,
    pub ore: u32,
    pub mining_speed: f32,
    pub pos_x: f32,
    pub pos_y: f32,
}

impl Default for PlayerDescription {
    fn default() -> Self {
        Self {
            unique_id: 0,
            avatar_id: 0,
            ore: 0,
            mining_speed: 1.0,
            pos_x: 0.0,
            pos_y: 0.0,
        }
    }
}

pub fn accepted() -> Message<GameMsg> {
    Message::new(GameMsg::ClientAccepted)
}

pub fn assign_id(id: u32) -> Message<GameMsg> {
    let mut msg = Message::new(GameMsg::ClientAssignId);
    msg.push(&id);
    msg
}

pub fn register(desc: &PlayerDescription) -> Message<GameMsg> {
    let mut msg = Message::new(GameMsg::ClientRegisterWithServer);
    msg.push(desc);
    msg
}

pub fn add_player(desc: &PlayerDescription) -> Message<GameMsg> {
    let mut msg = Message::new(GameMsg::GameAddPlayer);
    msg.push(desc);
    msg
}

pub fn remove_player(id: u32) -> Message<GameMsg> {
    let mut msg = Message::new(GameMsg::GameRemovePlayer);
    msg.push(&id);
    msg
}

pub fn update_player(desc: &PlayerDescription) -> Message<GameMsg> {
    let mut msg = Message::new(GameMsg::GameUpdatePlayer);
    msg.push(desc);
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use osrs_net::{MessageError, MessageKind, HEADER_SIZE};

    #[test]
    fn catalog_matches_wire_values() {
        assert_eq!(GameMsg::ServerGetStatus.to_raw(), 0);
        assert_eq!(GameMsg::ClientAccepted.to_raw(), 2);
        assert_eq!(GameMsg::GameUpdatePlayer.to_raw(), 8);
        assert_eq!(GameMsg::from_raw(6), Some(GameMsg::GameAddPlayer));
        assert_eq!(GameMsg::from_raw(9), None);
    }

    #[test]
    fn description_is_packed() {
        assert_eq!(std::mem::size_of::<PlayerDescription>(), 24);
        let msg = add_player(&PlayerDescription::default());
        assert_eq!(msg.size(), HEADER_SIZE + 24);
    }

    #[test]
    fn description_survives_a_message() {
        let desc = PlayerDescription {
            unique_id: 10003,
            avatar_id: 4,
            ore: 17,
            mining_speed: 1.5,
            pos_x: 3.25,
            pos_y: -8.0,
        };
        let mut msg = update_player(&desc);
        assert_eq!(msg.kind(), GameMsg::GameUpdatePlayer);
        assert_eq!(msg.pop::<PlayerDescription>().unwrap(), desc);
        assert!(msg.body().is_empty());
    }

    #[test]
    fn truncated_description_is_an_error() {
        let mut msg = assign_id(7);
        assert_eq!(
            msg.pop::<PlayerDescription>(),
            Err(MessageError::Underflow {
                needed: 24,
                available: 4
            })
        );
        assert_eq!(msg.pop::<u32>(), Ok(7));
    }

    #[test]
    fn accepted_has_no_body() {
        let msg = accepted();
        assert_eq!(msg.size(), HEADER_SIZE);
    }
}

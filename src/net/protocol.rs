use serde::{Deserialize, Serialize};

use crate::game::commands::{MoveDirection, MovementCommand};
use crate::game::physics::DebugGeometry;
use crate::game::state::{ChatMessage, Enemy, EntityId, Player, WorldState};
use crate::util::math::{Quat, Vec3};

/// Messages from client to server.
/// Wire shape: `{"type": "<camelCaseName>", "payload": ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Direction token plus camera orientation
    PlayerMovement(MovementPayload),
    ChatMessage(ChatPayload),
    Action(ActionPayload),
    /// Ask the server to repeat this connection's player id
    CreatePlayer,
    /// Ask for the current world state
    GetInitialState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementPayload {
    pub id: EntityId,
    pub action: MoveDirection,
    /// `[x, y, z, w]`
    #[serde(default = "identity_array")]
    pub camera_rotation: [f32; 4],
}

fn identity_array() -> [f32; 4] {
    [0.0, 0.0, 0.0, 1.0]
}

impl MovementPayload {
    pub fn to_command(&self) -> MovementCommand {
        MovementCommand {
            id: self.id,
            action: self.action,
            camera_rotation: Quat::from_array(self.camera_rotation),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    pub player_id: EntityId,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionPayload {
    pub player_id: EntityId,
    pub action: String,
}

/// Messages from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ServerMessage {
    /// The player id bound to this connection
    Id(EntityId),
    /// Full world snapshot
    State(WorldSnapshot),
    /// Entire chat history
    ChatLog(Vec<ChatMessage>),
    /// Capacity reached; the connection is closed right after
    ServerFull(String),
    /// Collider wireframes
    DebugMeshes(DebugGeometry),
}

/// Everything clients see of the world. Entities are ordered by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub players: Vec<PlayerSnapshot>,
    pub enemies: Vec<EnemySnapshot>,
}

impl WorldSnapshot {
    pub fn from_world_state(state: &WorldState) -> Self {
        let mut players: Vec<_> = state
            .players
            .values()
            .map(PlayerSnapshot::from_player)
            .collect();
        players.sort_unstable_by_key(|p| p.id);

        let mut enemies: Vec<_> = state
            .enemies
            .values()
            .map(EnemySnapshot::from_enemy)
            .collect();
        enemies.sort_unstable_by_key(|e| e.id);

        Self { players, enemies }
    }

    pub fn player(&self, id: EntityId) -> Option<&PlayerSnapshot> {
        self.players.iter().find(|p| p.id == id)
    }
}

/// Public player state (no connection or physics handles)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    pub id: EntityId,
    pub position: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
    pub current_action: String,
    pub chat_bubble: String,
}

impl PlayerSnapshot {
    pub fn from_player(player: &Player) -> Self {
        Self {
            id: player.id,
            position: player.position,
            rotation: player.rotation,
            velocity: player.velocity,
            current_action: player.current_action.clone(),
            chat_bubble: player.chat_bubble.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnemySnapshot {
    pub id: EntityId,
    pub position: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
    pub health: i32,
    pub current_action: String,
    pub moving_towards: Vec3,
    pub target_positions: [Vec3; 2],
    pub aggression: f32,
}

impl EnemySnapshot {
    pub fn from_enemy(enemy: &Enemy) -> Self {
        Self {
            id: enemy.id,
            position: enemy.position,
            rotation: enemy.rotation,
            velocity: enemy.velocity,
            health: enemy.health,
            current_action: enemy.current_action.clone(),
            moving_towards: enemy.moving_towards,
            target_positions: enemy.target_positions,
            aggression: enemy.aggression,
        }
    }
}

/// Encode a message as a JSON text frame
pub fn encode<T: Serialize>(message: &T) -> Result<String, EncodeError> {
    serde_json::to_string(message).map_err(|e| EncodeError(e.to_string()))
}

/// Decode a JSON text frame
pub fn decode<T: for<'de> Deserialize<'de>>(data: &str) -> Result<T, DecodeError> {
    serde_json::from_str(data).map_err(|e| DecodeError(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
#[error("Encode error: {0}")]
pub struct EncodeError(String);

#[derive(Debug, thiserror::Error)]
#[error("Decode error: {0}")]
pub struct DecodeError(String);

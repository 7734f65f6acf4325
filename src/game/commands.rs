//! Inbound command handlers
//!
//! Each handler validates a client command against the registry and applies
//! it to the cached entity and the physics body. Failures come back as
//! [`GameError`] for the caller to log; nothing here is fatal.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::game::constants::chat::MAX_MESSAGE_CHARS;
use crate::game::physics::PhysicsWorld;
use crate::game::state::{ChatMessage, EntityId, WorldState};
use crate::game::GameError;
use crate::util::math::{Quat, Vec3};

/// Direction token sent by clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoveDirection {
    #[serde(rename = "w")]
    Forward,
    #[serde(rename = "a")]
    Left,
    #[serde(rename = "s")]
    Back,
    #[serde(rename = "d")]
    Right,
    #[serde(rename = "stop")]
    Stop,
}

/// Movement input relative to the client's camera
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovementCommand {
    pub id: EntityId,
    pub action: MoveDirection,
    pub camera_rotation: Quat,
}

/// Camera-space basis vectors rotated into world space
struct CameraBasis {
    forward: Vec3,
    right: Vec3,
    up: Vec3,
}

impl CameraBasis {
    fn new(camera: Quat) -> Self {
        let camera = if camera.is_finite() {
            camera.normalize()
        } else {
            Quat::IDENTITY
        };
        Self {
            forward: camera.rotate(Vec3::new(0.0, 0.0, -1.0)),
            right: camera.rotate(Vec3::X),
            up: camera.rotate(Vec3::Y),
        }
    }

    fn movement(&self, direction: MoveDirection) -> Vec3 {
        match direction {
            MoveDirection::Forward => self.forward,
            MoveDirection::Back => -self.forward,
            MoveDirection::Left => -self.right,
            MoveDirection::Right => self.right,
            MoveDirection::Stop => Vec3::ZERO,
        }
    }
}

/// Apply a direction token: set the body's velocity and facing.
///
/// The facing quaternion turns the player's local +Z toward the direction of
/// travel, with local +Y following the camera's up vector. `Stop` only zeroes
/// velocity and keeps the current facing.
pub fn handle_movement<P: PhysicsWorld + ?Sized>(
    state: &mut WorldState,
    physics: &mut P,
    cmd: &MovementCommand,
    speed: f32,
) -> Result<(), GameError> {
    let player = state
        .get_player_mut(cmd.id)
        .ok_or(GameError::UnknownPlayer(cmd.id))?;
    let body = player.body;

    if cmd.action == MoveDirection::Stop {
        if !physics.set_linear_velocity(body, Vec3::ZERO) {
            return Err(GameError::MissingBody(cmd.id));
        }
        if player.velocity != Vec3::ZERO {
            player.velocity = Vec3::ZERO;
            state.mark_dirty();
        }
        return Ok(());
    }

    let basis = CameraBasis::new(cmd.camera_rotation);
    let direction = basis.movement(cmd.action).normalize();
    let velocity = direction * speed;
    let rotation = Quat::look_at(Vec3::ZERO, -direction, basis.up);

    if !physics.set_linear_velocity(body, velocity) || !physics.set_rotation(body, rotation) {
        return Err(GameError::MissingBody(cmd.id));
    }

    if player.velocity != velocity || player.rotation != rotation {
        player.velocity = velocity;
        player.rotation = rotation;
        state.mark_dirty();
    }
    debug!("Player {} moving {:?}", cmd.id, cmd.action);
    Ok(())
}

/// Append a chat line and show it above the sender.
///
/// The line is logged even when the sender is not a live player. Messages
/// longer than [`MAX_MESSAGE_CHARS`] are truncated. `bubble_duration` of
/// `None` leaves the bubble up until the next message.
pub fn handle_chat(
    state: &mut WorldState,
    player_id: EntityId,
    message: &str,
    now_ms: u64,
    bubble_duration: Option<Duration>,
) -> Result<(), GameError> {
    let message = message.trim();
    if message.is_empty() {
        return Err(GameError::EmptyMessage);
    }
    let message: String = message.chars().take(MAX_MESSAGE_CHARS).collect();

    state.push_chat(ChatMessage {
        player_id,
        message: message.clone(),
        timestamp: now_ms,
    });

    let expires_at = bubble_duration.map(|d| state.clock + d);
    match state.get_player_mut(player_id) {
        Some(player) => {
            player.bubble_expires_at = expires_at;
            if player.chat_bubble != message {
                player.chat_bubble = message;
                state.mark_dirty();
            }
        }
        None => warn!("Chat from unknown player {}", player_id),
    }

    Ok(())
}

/// Set a transient action tag that clears itself after `duration`.
/// A newer action replaces both the tag and its deadline.
pub fn handle_action(
    state: &mut WorldState,
    player_id: EntityId,
    action: &str,
    duration: Duration,
) -> Result<(), GameError> {
    let expires_at = state.clock + duration;
    let player = state
        .get_player_mut(player_id)
        .ok_or(GameError::UnknownPlayer(player_id))?;

    player.action_expires_at = if action.is_empty() { None } else { Some(expires_at) };
    if player.current_action != action {
        player.current_action = action.to_string();
        state.mark_dirty();
    }
    Ok(())
}

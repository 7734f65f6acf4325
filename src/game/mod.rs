pub mod commands;
pub mod constants;
pub mod physics;
pub mod simulation;
pub mod state;
pub mod systems;

use state::EntityId;

/// Gameplay failures. None of these are fatal; callers log and move on.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GameError {
    #[error("unknown player {0}")]
    UnknownPlayer(EntityId),
    #[error("entity {0} has no physics body")]
    MissingBody(EntityId),
    #[error("server is full ({0} players)")]
    ServerFull(usize),
    #[error("empty chat message")]
    EmptyMessage,
}

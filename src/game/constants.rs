//! Gameplay constants
//!
//! Values that are also exposed through `ServerConfig` are the defaults
//! used when the environment does not override them.

use crate::util::math::Vec3;

/// Simulation timing
pub mod physics {
    /// Server tick rate in Hz
    pub const TICK_RATE: u32 = 60;
    /// Delta time per tick in seconds
    pub const DT: f32 = 1.0 / 60.0;
}

/// Player constants
pub mod player {
    use super::Vec3;

    /// Maximum concurrently connected players
    pub const MAX_PLAYERS: usize = 10;
    /// Movement speed in units per second
    pub const SPEED: f32 = 10.0;
    /// Collider half extents
    pub const HALF_EXTENTS: Vec3 = Vec3::new(1.0, 1.0, 2.0);
    /// Every player spawns here
    pub const SPAWN_POSITION: Vec3 = Vec3::ZERO;
}

/// Enemy constants
pub mod enemy {
    use super::Vec3;

    /// Starting health
    pub const HEALTH: i32 = 50;
    /// Health removed per player collision
    pub const DAMAGE_PER_HIT: i32 = 10;
    /// Patrol speed in units per second
    pub const SPEED: f32 = 5.0;
    /// Distance at which a waypoint counts as reached
    pub const WAYPOINT_THRESHOLD: f32 = 0.5;
    /// Default two-point patrol route
    pub const PATROL_ROUTE: [Vec3; 2] = [Vec3::new(20.0, 0.0, 0.0), Vec3::new(-20.0, 0.0, 0.0)];
    /// Collider half extents
    pub const HALF_EXTENTS: Vec3 = Vec3::new(1.0, 1.0, 2.0);
    /// Delay after startup before the default enemy spawns (seconds)
    pub const SPAWN_DELAY_SECS: f32 = 10.0;
}

/// Action / chat timing
pub mod timing {
    /// How long `current_action` stays set (milliseconds)
    pub const ACTION_DURATION_MS: u64 = 1500;
    /// How long a chat bubble stays on a player (milliseconds)
    pub const CHAT_BUBBLE_DURATION_MS: u64 = 5000;
}

/// Chat limits
pub mod chat {
    /// Longest accepted chat message, in characters
    pub const MAX_MESSAGE_CHARS: usize = 256;
}

/// Network constants
pub mod net {
    /// Default gameplay port
    pub const GAME_PORT: u16 = 8080;
    /// Outbound frames queued per connection before new ones are dropped
    pub const OUTBOUND_QUEUE: usize = 256;
    /// Largest accepted inbound frame
    pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;
    /// Rejection text sent with `serverFull`
    pub const SERVER_FULL_MESSAGE: &str = "Server is full";
}

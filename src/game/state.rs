//! World state: the authoritative entity registry
//!
//! Holds every live player and enemy plus the chat log. Entities are keyed
//! by an [`EntityId`] minted here and never reused; the physics
//! [`BodyHandle`] is stored alongside but is not identity.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::game::constants::enemy;
use crate::game::physics::{BodyHandle, Transform};
use crate::util::math::{Quat, Vec3};

/// Unique entity identifier (players and enemies share one sequence)
pub type EntityId = u64;

/// Connected participant
#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub id: EntityId,
    pub body: BodyHandle,
    pub position: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
    /// Transient action tag ("attack"), empty when idle
    pub current_action: String,
    /// Last chat message, empty once expired
    pub chat_bubble: String,
    /// Simulation time at which `current_action` is cleared
    pub action_expires_at: Option<Duration>,
    /// Simulation time at which `chat_bubble` is cleared
    pub bubble_expires_at: Option<Duration>,
}

impl Player {
    pub fn new(id: EntityId, body: BodyHandle, position: Vec3) -> Self {
        Self {
            id,
            body,
            position,
            rotation: Quat::IDENTITY,
            velocity: Vec3::ZERO,
            current_action: String::new(),
            chat_bubble: String::new(),
            action_expires_at: None,
            bubble_expires_at: None,
        }
    }

    /// Copy a physics transform into the cached fields.
    /// Returns true if anything changed.
    pub fn apply_transform(&mut self, transform: &Transform) -> bool {
        let changed = self.position != transform.position
            || self.rotation != transform.rotation
            || self.velocity != transform.velocity;
        self.position = transform.position;
        self.rotation = transform.rotation;
        self.velocity = transform.velocity;
        changed
    }
}

/// AI-controlled patrolling entity
#[derive(Debug, Clone, PartialEq)]
pub struct Enemy {
    pub id: EntityId,
    pub body: BodyHandle,
    pub position: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
    pub health: i32,
    pub current_action: String,
    /// Waypoint currently being approached
    pub moving_towards: Vec3,
    /// Fixed two-point patrol route
    pub target_positions: [Vec3; 2],
    /// Carried on the wire; no behavior reads it yet
    pub aggression: f32,
}

impl Enemy {
    pub fn new(id: EntityId, body: BodyHandle, spawn: &EnemySpawn) -> Self {
        Self {
            id,
            body,
            position: spawn.position,
            rotation: Quat::IDENTITY,
            velocity: Vec3::ZERO,
            health: spawn.health,
            current_action: String::new(),
            moving_towards: spawn.position,
            target_positions: spawn.route,
            aggression: spawn.aggression,
        }
    }

    pub fn is_dead(&self) -> bool {
        self.health <= 0
    }

    /// The patrol waypoint that is not the current target
    pub fn other_waypoint(&self) -> Vec3 {
        if self.moving_towards == self.target_positions[0] {
            self.target_positions[1]
        } else {
            self.target_positions[0]
        }
    }

    pub fn apply_transform(&mut self, transform: &Transform) -> bool {
        let changed = self.position != transform.position
            || self.rotation != transform.rotation
            || self.velocity != transform.velocity;
        self.position = transform.position;
        self.rotation = transform.rotation;
        self.velocity = transform.velocity;
        changed
    }
}

/// Parameters for spawning an enemy
#[derive(Debug, Clone, PartialEq)]
pub struct EnemySpawn {
    pub position: Vec3,
    pub route: [Vec3; 2],
    pub health: i32,
    pub aggression: f32,
}

impl Default for EnemySpawn {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            route: enemy::PATROL_ROUTE,
            health: enemy::HEALTH,
            aggression: 0.0,
        }
    }
}

/// One line of the chat log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub player_id: EntityId,
    pub message: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
}

/// Registry of all live entities
#[derive(Debug, Default)]
pub struct WorldState {
    /// Ticks simulated so far
    pub tick: u64,
    /// Simulated time since startup
    pub clock: Duration,
    pub players: HashMap<EntityId, Player>,
    pub enemies: HashMap<EntityId, Enemy>,
    /// Append-only, never pruned
    pub chat_log: Vec<ChatMessage>,
    next_entity_id: EntityId,
    dirty: bool,
    chat_dirty: bool,
}

impl WorldState {
    pub fn new() -> Self {
        Self {
            next_entity_id: 1,
            ..Default::default()
        }
    }

    /// Generate a new unique entity ID
    pub fn next_entity_id(&mut self) -> EntityId {
        let id = self.next_entity_id.max(1);
        self.next_entity_id = id + 1;
        id
    }

    pub fn insert_player(&mut self, player: Player) {
        self.players.insert(player.id, player);
        self.dirty = true;
    }

    pub fn insert_enemy(&mut self, enemy: Enemy) {
        self.enemies.insert(enemy.id, enemy);
        self.dirty = true;
    }

    pub fn remove_player(&mut self, id: EntityId) -> Option<Player> {
        let removed = self.players.remove(&id);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    pub fn remove_enemy(&mut self, id: EntityId) -> Option<Enemy> {
        let removed = self.enemies.remove(&id);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    pub fn get_player(&self, id: EntityId) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn get_player_mut(&mut self, id: EntityId) -> Option<&mut Player> {
        self.players.get_mut(&id)
    }

    pub fn get_enemy(&self, id: EntityId) -> Option<&Enemy> {
        self.enemies.get(&id)
    }

    pub fn get_enemy_mut(&mut self, id: EntityId) -> Option<&mut Enemy> {
        self.enemies.get_mut(&id)
    }

    /// Resolve a physics body to the player that owns it
    pub fn player_by_body(&self, body: BodyHandle) -> Option<EntityId> {
        self.players.values().find(|p| p.body == body).map(|p| p.id)
    }

    /// Resolve a physics body to the enemy that owns it
    pub fn enemy_by_body(&self, body: BodyHandle) -> Option<EntityId> {
        self.enemies.values().find(|e| e.body == body).map(|e| e.id)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn enemy_count(&self) -> usize {
        self.enemies.len()
    }

    pub fn push_chat(&mut self, message: ChatMessage) {
        self.chat_log.push(message);
        self.chat_dirty = true;
    }

    /// Flag that the next snapshot differs from the last broadcast one
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Read and clear the state-changed flag
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Read and clear the chat-changed flag
    pub fn take_chat_dirty(&mut self) -> bool {
        std::mem::take(&mut self.chat_dirty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(state: &mut WorldState, body: u64) -> EntityId {
        let id = state.next_entity_id();
        state.insert_player(Player::new(id, BodyHandle(body), Vec3::ZERO));
        id
    }

    #[test]
    fn test_entity_ids_are_monotonic() {
        let mut state = WorldState::new();
        let a = state.next_entity_id();
        let b = state.next_entity_id();
        assert_eq!(a, 1);
        assert_eq!(b, 2);
    }

    #[test]
    fn test_ids_not_reused_after_removal() {
        let mut state = WorldState::new();
        let first = player(&mut state, 0);
        state.remove_player(first);
        // Same body handle recycled by the engine, new identity
        let second = player(&mut state, 0);
        assert_ne!(first, second);
        assert_eq!(state.player_by_body(BodyHandle(0)), Some(second));
    }

    #[test]
    fn test_insert_and_remove_mark_dirty() {
        let mut state = WorldState::new();
        assert!(!state.take_dirty());

        let id = player(&mut state, 3);
        assert!(state.take_dirty());
        assert!(!state.take_dirty());

        assert!(state.remove_player(id).is_some());
        assert!(state.take_dirty());

        assert!(state.remove_player(id).is_none());
        assert!(!state.take_dirty());
    }

    #[test]
    fn test_body_lookup() {
        let mut state = WorldState::new();
        let p = player(&mut state, 7);
        let e = state.next_entity_id();
        state.insert_enemy(Enemy::new(e, BodyHandle(8), &EnemySpawn::default()));

        assert_eq!(state.player_by_body(BodyHandle(7)), Some(p));
        assert_eq!(state.enemy_by_body(BodyHandle(8)), Some(e));
        assert_eq!(state.player_by_body(BodyHandle(8)), None);
        assert_eq!(state.enemy_by_body(BodyHandle(7)), None);
    }

    #[test]
    fn test_enemy_waypoint_toggle() {
        let mut enemy = Enemy::new(1, BodyHandle(0), &EnemySpawn::default());
        let [a, b] = enemy.target_positions;
        // Spawned at origin: neither waypoint is current yet
        assert_eq!(enemy.other_waypoint(), a);
        enemy.moving_towards = a;
        assert_eq!(enemy.other_waypoint(), b);
        enemy.moving_towards = b;
        assert_eq!(enemy.other_waypoint(), a);
    }

    #[test]
    fn test_apply_transform_reports_change() {
        let mut p = Player::new(1, BodyHandle(0), Vec3::ZERO);
        let same = Transform {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            velocity: Vec3::ZERO,
        };
        assert!(!p.apply_transform(&same));

        let moved = Transform {
            position: Vec3::new(1.0, 0.0, 0.0),
            ..same
        };
        assert!(p.apply_transform(&moved));
        assert_eq!(p.position, Vec3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn test_chat_log_is_append_only() {
        let mut state = WorldState::new();
        for i in 0..3 {
            state.push_chat(ChatMessage {
                player_id: 1,
                message: format!("msg {}", i),
                timestamp: i,
            });
        }
        assert!(state.take_chat_dirty());
        assert_eq!(state.chat_log.len(), 3);
        assert_eq!(state.chat_log[2].message, "msg 2");
    }

    #[test]
    fn test_chat_message_wire_names() {
        let json = serde_json::to_value(ChatMessage {
            player_id: 4,
            message: "hi".to_string(),
            timestamp: 99,
        })
        .unwrap();
        assert_eq!(json["playerId"], 4);
        assert_eq!(json["message"], "hi");
        assert_eq!(json["timestamp"], 99);
    }
}

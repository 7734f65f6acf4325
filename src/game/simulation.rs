//! Fixed-tick simulation driver
//!
//! [`Simulation`] owns the registry and the physics world. Command handlers
//! and the tick both go through it, so whoever holds it holds the only
//! write path to game state.

use std::time::Duration;
use tracing::info;

use crate::game::commands::{self, MovementCommand};
use crate::game::constants::{enemy, physics, player, timing};
use crate::game::physics::{BodyKind, ColliderShape, DebugGeometry, PhysicsWorld, Pose};
use crate::game::state::{ChatMessage, Enemy, EnemySpawn, EntityId, Player, WorldState};
use crate::game::systems::{combat, expiry, patrol, sync};
use crate::game::GameError;
use crate::net::protocol::WorldSnapshot;

/// Gameplay tuning derived from server configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub tick_rate: u32,
    pub max_players: usize,
    pub player_speed: f32,
    pub action_duration: Duration,
    /// `None` keeps chat bubbles until replaced
    pub chat_bubble_duration: Option<Duration>,
    /// Simulated time after which the patrol enemy appears, if at all
    pub enemy_spawn_delay: Option<Duration>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_rate: physics::TICK_RATE,
            max_players: player::MAX_PLAYERS,
            player_speed: player::SPEED,
            action_duration: Duration::from_millis(timing::ACTION_DURATION_MS),
            chat_bubble_duration: Some(Duration::from_millis(timing::CHAT_BUBBLE_DURATION_MS)),
            enemy_spawn_delay: Some(Duration::from_secs_f32(enemy::SPAWN_DELAY_SECS)),
        }
    }
}

impl SimulationConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(1) / self.tick_rate.max(1)
    }
}

/// What happened during one tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub tick: u64,
    /// Snapshot differs from the previous tick's
    pub state_changed: bool,
    /// Chat log grew since the previous tick
    pub chat_changed: bool,
    pub hits: u32,
    pub enemies_spawned: Vec<EntityId>,
    pub enemies_killed: Vec<EntityId>,
    pub expired: usize,
    pub missing_bodies: usize,
}

pub struct Simulation<P: PhysicsWorld> {
    state: WorldState,
    physics: P,
    config: SimulationConfig,
    tick_interval: Duration,
    pending_enemy_at: Option<Duration>,
}

impl<P: PhysicsWorld> Simulation<P> {
    pub fn new(physics: P, config: SimulationConfig) -> Self {
        let tick_interval = config.tick_interval();
        let pending_enemy_at = config.enemy_spawn_delay;
        Self {
            state: WorldState::new(),
            physics,
            config,
            tick_interval,
            pending_enemy_at,
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn state(&self) -> &WorldState {
        &self.state
    }

    pub fn physics(&self) -> &P {
        &self.physics
    }

    pub fn player_count(&self) -> usize {
        self.state.player_count()
    }

    pub fn is_full(&self) -> bool {
        self.state.player_count() >= self.config.max_players
    }

    /// Create a player with a dynamic body at the spawn point
    pub fn spawn_player(&mut self) -> Result<EntityId, GameError> {
        if self.is_full() {
            return Err(GameError::ServerFull(self.config.max_players));
        }

        let body = self.physics.create_body(
            Pose::at(player::SPAWN_POSITION),
            BodyKind::Dynamic,
            ColliderShape::cuboid(player::HALF_EXTENTS),
        );
        let id = self.state.next_entity_id();
        self.state
            .insert_player(Player::new(id, body, player::SPAWN_POSITION));
        Ok(id)
    }

    /// Release a player's body and drop it from the registry
    pub fn despawn_player(&mut self, id: EntityId) -> bool {
        match self.state.remove_player(id) {
            Some(player) => {
                self.physics.remove_body(player.body);
                true
            }
            None => false,
        }
    }

    /// Create a patrolling enemy with a kinematic sensor body
    pub fn spawn_enemy(&mut self, spawn: EnemySpawn) -> EntityId {
        let body = self.physics.create_body(
            Pose::at(spawn.position),
            BodyKind::KinematicVelocity,
            ColliderShape::cuboid(enemy::HALF_EXTENTS)
                .sensor()
                .with_collision_events(),
        );
        let id = self.state.next_entity_id();
        self.state.insert_enemy(Enemy::new(id, body, &spawn));
        info!("Enemy {} spawned at {:?}", id, spawn.position);
        id
    }

    pub fn handle_movement(&mut self, cmd: &MovementCommand) -> Result<(), GameError> {
        commands::handle_movement(&mut self.state, &mut self.physics, cmd, self.config.player_speed)
    }

    pub fn handle_chat(
        &mut self,
        player_id: EntityId,
        message: &str,
        now_ms: u64,
    ) -> Result<(), GameError> {
        commands::handle_chat(
            &mut self.state,
            player_id,
            message,
            now_ms,
            self.config.chat_bubble_duration,
        )
    }

    pub fn handle_action(&mut self, player_id: EntityId, action: &str) -> Result<(), GameError> {
        commands::handle_action(&mut self.state, player_id, action, self.config.action_duration)
    }

    /// Advance the world by one fixed interval
    pub fn tick(&mut self) -> TickReport {
        let dt = self.tick_interval;
        let events = self.physics.step(dt.as_secs_f32());
        self.state.clock += dt;
        self.state.tick += 1;

        let combat = combat::update(&mut self.state, &mut self.physics, &events);
        let missing_bodies = sync::update(&mut self.state, &self.physics);
        patrol::update(&mut self.state, &mut self.physics);

        let mut enemies_spawned = Vec::new();
        if let Some(at) = self.pending_enemy_at {
            if self.state.clock >= at {
                self.pending_enemy_at = None;
                enemies_spawned.push(self.spawn_enemy(EnemySpawn::default()));
            }
        }

        let expired = expiry::update(&mut self.state);

        TickReport {
            tick: self.state.tick,
            state_changed: self.state.take_dirty(),
            chat_changed: self.state.take_chat_dirty(),
            hits: combat.hits,
            enemies_spawned,
            enemies_killed: combat.enemies_killed,
            expired,
            missing_bodies,
        }
    }

    /// Clear the state-changed flag after broadcasting outside a tick
    pub fn take_dirty(&mut self) -> bool {
        self.state.take_dirty()
    }

    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot::from_world_state(&self.state)
    }

    pub fn chat_log(&self) -> &[ChatMessage] {
        &self.state.chat_log
    }

    pub fn debug_geometry(&self) -> DebugGeometry {
        self.physics.debug_geometry()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::commands::MoveDirection;
    use crate::game::physics::testing::ScriptedWorld;
    use crate::game::physics::RapierWorld;
    use crate::util::math::{Quat, Vec3};

    /// 50 Hz so one tick is exactly 20ms
    fn config() -> SimulationConfig {
        SimulationConfig {
            tick_rate: 50,
            enemy_spawn_delay: None,
            ..Default::default()
        }
    }

    fn scripted() -> Simulation<ScriptedWorld> {
        Simulation::new(ScriptedWorld::new(), config())
    }

    fn forward(id: EntityId) -> MovementCommand {
        MovementCommand {
            id,
            action: MoveDirection::Forward,
            camera_rotation: Quat::IDENTITY,
        }
    }

    #[test]
    fn test_tick_interval() {
        assert_eq!(config().tick_interval(), Duration::from_millis(20));
        let zero = SimulationConfig {
            tick_rate: 0,
            ..Default::default()
        };
        assert_eq!(zero.tick_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_capacity_limit() {
        let mut sim = scripted();
        for _ in 0..player::MAX_PLAYERS {
            sim.spawn_player().unwrap();
        }
        assert!(sim.is_full());
        assert_eq!(
            sim.spawn_player(),
            Err(GameError::ServerFull(player::MAX_PLAYERS))
        );
        assert_eq!(sim.player_count(), player::MAX_PLAYERS);
        assert_eq!(sim.physics().body_count(), player::MAX_PLAYERS);
    }

    #[test]
    fn test_despawn_releases_body() {
        let mut sim = scripted();
        let a = sim.spawn_player().unwrap();
        let b = sim.spawn_player().unwrap();
        assert!(sim.despawn_player(a));
        assert!(!sim.despawn_player(a));
        assert_eq!(sim.player_count(), 1);
        assert_eq!(sim.physics().body_count(), 1);
        assert!(sim.state().get_player(b).is_some());
    }

    #[test]
    fn test_ids_survive_handle_recycling() {
        let mut sim = scripted();
        let first = sim.spawn_player().unwrap();
        let first_body = sim.state().get_player(first).unwrap().body;
        sim.despawn_player(first);

        let second = sim.spawn_player().unwrap();
        assert_ne!(first, second);
        assert_eq!(sim.state().get_player(second).unwrap().body, first_body);
    }

    #[test]
    fn test_idle_world_broadcasts_once() {
        let mut sim = scripted();
        sim.spawn_player().unwrap();

        let changes: Vec<bool> = (0..10).map(|_| sim.tick().state_changed).collect();
        assert_eq!(changes.iter().filter(|c| **c).count(), 1);
        assert!(changes[0]);
    }

    #[test]
    fn test_moving_player_changes_every_tick() {
        let mut sim = scripted();
        let id = sim.spawn_player().unwrap();
        sim.tick();
        sim.handle_movement(&forward(id)).unwrap();

        for _ in 0..5 {
            assert!(sim.tick().state_changed);
        }
    }

    #[test]
    fn test_cache_matches_physics_after_tick() {
        let mut sim = scripted();
        let id = sim.spawn_player().unwrap();
        sim.handle_movement(&forward(id)).unwrap();
        sim.spawn_enemy(EnemySpawn::default());

        for _ in 0..30 {
            sim.tick();
            for p in sim.state().players.values() {
                let t = sim.physics().transform(p.body).unwrap();
                assert_eq!((p.position, p.rotation, p.velocity), (t.position, t.rotation, t.velocity));
            }
            for e in sim.state().enemies.values() {
                let t = sim.physics().transform(e.body).unwrap();
                assert_eq!((e.position, e.rotation, e.velocity), (t.position, t.rotation, t.velocity));
            }
        }
    }

    #[test]
    fn test_action_clears_after_exact_delay() {
        let mut sim = scripted();
        let id = sim.spawn_player().unwrap();
        sim.tick();

        sim.handle_action(id, "attack").unwrap();
        assert_eq!(sim.state().get_player(id).unwrap().current_action, "attack");

        // 1500ms at 20ms per tick
        for _ in 0..74 {
            sim.tick();
        }
        assert_eq!(sim.state().get_player(id).unwrap().current_action, "attack");

        let report = sim.tick();
        assert_eq!(sim.state().get_player(id).unwrap().current_action, "");
        assert_eq!(report.expired, 1);
        assert!(report.state_changed);
    }

    #[test]
    fn test_overlapping_action_not_cleared_early() {
        let mut sim = scripted();
        let id = sim.spawn_player().unwrap();
        sim.handle_action(id, "attack").unwrap();
        for _ in 0..50 {
            sim.tick();
        }
        sim.handle_action(id, "attack").unwrap();
        // First deadline passes; the second one still holds
        for _ in 0..50 {
            sim.tick();
        }
        assert_eq!(sim.state().get_player(id).unwrap().current_action, "attack");
        for _ in 0..25 {
            sim.tick();
        }
        assert_eq!(sim.state().get_player(id).unwrap().current_action, "");
    }

    #[test]
    fn test_chat_bubble_expires() {
        let mut sim = Simulation::new(
            ScriptedWorld::new(),
            SimulationConfig {
                chat_bubble_duration: Some(Duration::from_millis(100)),
                ..config()
            },
        );
        let id = sim.spawn_player().unwrap();
        sim.handle_chat(id, "hello", 0).unwrap();

        let report = sim.tick();
        assert!(report.chat_changed);
        assert_eq!(sim.state().get_player(id).unwrap().chat_bubble, "hello");

        for _ in 0..4 {
            sim.tick();
        }
        assert_eq!(sim.state().get_player(id).unwrap().chat_bubble, "");
        assert_eq!(sim.chat_log().len(), 1);
        assert!(!sim.tick().chat_changed);
    }

    #[test]
    fn test_collision_damage_and_kill() {
        let mut sim = scripted();
        let player_id = sim.spawn_player().unwrap();
        let enemy_id = sim.spawn_enemy(EnemySpawn::default());
        let player_body = sim.state().get_player(player_id).unwrap().body;
        let enemy_body = sim.state().get_enemy(enemy_id).unwrap().body;

        sim.physics.queue_collision(player_body, enemy_body, true);
        let report = sim.tick();
        assert_eq!(report.hits, 1);
        assert_eq!(sim.state().get_enemy(enemy_id).unwrap().health, 40);

        // Persisting overlap produces no further start events
        for _ in 0..10 {
            sim.tick();
        }
        assert_eq!(sim.state().get_enemy(enemy_id).unwrap().health, 40);

        sim.physics.queue_collision(player_body, enemy_body, false);
        sim.tick();
        for _ in 0..4 {
            sim.physics.queue_collision(enemy_body, player_body, true);
            sim.tick();
        }
        assert!(sim.state().get_enemy(enemy_id).is_none());
        assert_eq!(sim.physics().body_count(), 1);
        assert!(sim.snapshot().enemies.is_empty());
    }

    #[test]
    fn test_scheduled_enemy_spawn() {
        let mut sim = Simulation::new(
            ScriptedWorld::new(),
            SimulationConfig {
                enemy_spawn_delay: Some(Duration::from_millis(100)),
                ..config()
            },
        );
        for _ in 0..4 {
            assert!(sim.tick().enemies_spawned.is_empty());
        }
        let report = sim.tick();
        assert_eq!(report.enemies_spawned.len(), 1);
        assert!(report.state_changed);

        for _ in 0..100 {
            assert!(sim.tick().enemies_spawned.is_empty());
        }
        assert_eq!(sim.state().enemy_count(), 1);
    }

    #[test]
    fn test_snapshot_contains_spawned_player() {
        let mut sim = scripted();
        let id = sim.spawn_player().unwrap();
        let snapshot = sim.snapshot();
        assert!(snapshot.player(id).is_some());
        assert_eq!(snapshot.players.len(), 1);
    }

    #[test]
    fn test_rapier_enemy_patrols() {
        let mut sim = Simulation::new(RapierWorld::new(), config());
        let id = sim.spawn_enemy(EnemySpawn::default());

        for _ in 0..100 {
            sim.tick();
        }
        // Two seconds at 5 u/s toward +X
        let enemy = sim.state().get_enemy(id).unwrap();
        assert!((enemy.position.x - 10.0).abs() < 0.5, "x = {}", enemy.position.x);
        assert!(enemy.velocity.approx_eq(Vec3::new(5.0, 0.0, 0.0), 1e-3));
    }

    #[test]
    fn test_rapier_sensor_overlap_damages_enemy() {
        let mut sim = Simulation::new(RapierWorld::new(), config());
        let player_id = sim.spawn_player().unwrap();
        let enemy_id = sim.spawn_enemy(EnemySpawn {
            route: [Vec3::new(5.0, 0.0, 0.0), Vec3::new(-5.0, 0.0, 0.0)],
            ..Default::default()
        });

        // Enemy starts on top of the player
        let hits: u32 = (0..10).map(|_| sim.tick().hits).sum();
        assert_eq!(hits, 1);
        assert_eq!(sim.state().get_enemy(enemy_id).unwrap().health, 40);

        // Crosses the origin again at 2s and 4s; 5s ends between overlaps
        let hits: u32 = (10..250).map(|_| sim.tick().hits).sum();
        assert_eq!(hits, 2);
        assert_eq!(sim.state().get_enemy(enemy_id).unwrap().health, 20);

        let player = sim.state().get_player(player_id).unwrap();
        assert!(player.position.approx_eq(Vec3::ZERO, 1e-3));
    }
}

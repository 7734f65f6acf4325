//! Game session - owns the simulation and the open connections, runs the
//! tick loop and broadcasts state

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc::Sender;
use tokio::sync::RwLock;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::game::physics::{PhysicsWorld, RapierWorld};
use crate::game::simulation::{Simulation, SimulationConfig, TickReport};
use crate::game::state::EntityId;
use crate::game::GameError;
use crate::metrics::Metrics;
use crate::net::connection::{ConnectionKind, ConnectionManager};
use crate::net::protocol::{encode, ClientMessage, ServerMessage};

/// Session options that are not gameplay tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionOptions {
    /// Chat is served on the gameplay socket
    pub chat_on_game_port: bool,
    /// Broadcast collider wireframes every tick
    pub debug_meshes: bool,
}

impl SessionOptions {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            chat_on_game_port: config.chat_port.is_none(),
            debug_meshes: config.debug_meshes,
        }
    }
}

/// Shared game session. All gameplay mutation happens behind its lock.
pub struct GameSession<P: PhysicsWorld = RapierWorld> {
    pub simulation: Simulation<P>,
    pub connections: ConnectionManager,
    options: SessionOptions,
    metrics: Arc<Metrics>,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl GameSession<RapierWorld> {
    pub fn new(config: &ServerConfig, metrics: Arc<Metrics>) -> Self {
        Self::with_physics(
            RapierWorld::new(),
            config.simulation(),
            SessionOptions::from_config(config),
            metrics,
        )
    }
}

impl<P: PhysicsWorld> GameSession<P> {
    pub fn with_physics(
        physics: P,
        config: SimulationConfig,
        options: SessionOptions,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            simulation: Simulation::new(physics, config),
            connections: ConnectionManager::new(),
            options,
            metrics,
        }
    }

    pub fn player_count(&self) -> usize {
        self.simulation.player_count()
    }

    /// Accept a gameplay connection: spawn its player, send the id and
    /// broadcast the new state. Nothing is registered when the server is full.
    pub fn join(
        &mut self,
        remote_addr: SocketAddr,
        sender: Sender<Message>,
    ) -> Result<(u64, EntityId), GameError> {
        let player_id = self.simulation.spawn_player()?;
        let conn_id = self
            .connections
            .create(ConnectionKind::Game, remote_addr, sender);
        self.connections.associate_player(conn_id, player_id);
        self.metrics.connections_active.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .players
            .store(self.player_count() as u64, Ordering::Relaxed);

        info!(
            "Player {} joined from {} ({} players)",
            player_id,
            remote_addr,
            self.player_count()
        );

        self.send_to(conn_id, &ServerMessage::Id(player_id));
        self.broadcast_state();
        if self.options.chat_on_game_port {
            self.send_to(
                conn_id,
                &ServerMessage::ChatLog(self.simulation.chat_log().to_vec()),
            );
        }
        Ok((conn_id, player_id))
    }

    /// Register a chat-only connection and send it the log so far
    pub fn join_chat(&mut self, remote_addr: SocketAddr, sender: Sender<Message>) -> u64 {
        let conn_id = self
            .connections
            .create(ConnectionKind::Chat, remote_addr, sender);
        self.metrics.connections_active.fetch_add(1, Ordering::Relaxed);
        debug!("Chat client connected from {}", remote_addr);

        self.send_to(
            conn_id,
            &ServerMessage::ChatLog(self.simulation.chat_log().to_vec()),
        );
        conn_id
    }

    /// Tear down a connection; its player (if any) is despawned and the
    /// remaining clients get fresh state
    pub fn leave(&mut self, conn_id: u64) {
        let Some(conn) = self.connections.remove(conn_id) else {
            return;
        };
        self.metrics.connections_active.fetch_sub(1, Ordering::Relaxed);
        debug!(
            "Connection {} ({:?}) from {} closed after {:.1}s: {} msgs / {} bytes in, {} msgs / {} bytes out, {} dropped",
            conn.id,
            conn.kind,
            conn.remote_addr,
            conn.created_at.elapsed().as_secs_f32(),
            conn.messages_received,
            conn.bytes_received,
            conn.messages_sent,
            conn.bytes_sent,
            conn.messages_dropped
        );

        if let Some(player_id) = conn.player_id {
            if self.simulation.despawn_player(player_id) {
                info!(
                    "Player {} left ({} players)",
                    player_id,
                    self.player_count()
                );
            }
            self.metrics
                .players
                .store(self.player_count() as u64, Ordering::Relaxed);
            self.broadcast_state();
        }
    }

    /// Dispatch one decoded client message
    pub fn handle_message(&mut self, conn_id: u64, message: ClientMessage) {
        let Some(conn) = self.connections.get(conn_id) else {
            return;
        };
        let kind = conn.kind;
        let bound_player = conn.player_id;

        if kind == ConnectionKind::Chat && !matches!(message, ClientMessage::ChatMessage(_)) {
            debug!("Ignoring non-chat message on chat connection {}", conn_id);
            return;
        }

        let result = match message {
            ClientMessage::PlayerMovement(payload) => {
                if !self.owns(bound_player, payload.id) {
                    return;
                }
                self.simulation.handle_movement(&payload.to_command())
            }
            ClientMessage::ChatMessage(payload) => {
                if kind == ConnectionKind::Game && !self.owns(bound_player, payload.player_id) {
                    return;
                }
                self.simulation
                    .handle_chat(payload.player_id, &payload.message, now_ms())
            }
            ClientMessage::Action(payload) => {
                if !self.owns(bound_player, payload.player_id) {
                    return;
                }
                self.simulation
                    .handle_action(payload.player_id, &payload.action)
            }
            ClientMessage::CreatePlayer => {
                if let Some(player_id) = bound_player {
                    self.send_to(conn_id, &ServerMessage::Id(player_id));
                }
                Ok(())
            }
            ClientMessage::GetInitialState => {
                let snapshot = self.simulation.snapshot();
                self.send_to(conn_id, &ServerMessage::State(snapshot));
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!("Command from connection {} dropped: {}", conn_id, e);
        }
    }

    /// A gameplay connection may only steer its own player
    fn owns(&self, bound: Option<EntityId>, claimed: EntityId) -> bool {
        if bound == Some(claimed) {
            true
        } else {
            warn!(
                "Connection for player {:?} sent a command for player {}",
                bound, claimed
            );
            false
        }
    }

    /// Send to one connection. Returns false if it is gone or closed.
    pub fn send_to(&mut self, conn_id: u64, message: &ServerMessage) -> bool {
        let text = match encode(message) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode message: {}", e);
                return false;
            }
        };
        let len = text.len();
        let Some(conn) = self.connections.get_mut(conn_id) else {
            return false;
        };
        if conn.send_text(text) {
            self.metrics.record_sent(len);
            true
        } else {
            debug!("Connection {} not accepting frames, message dropped", conn_id);
            false
        }
    }

    /// Send to every connection matching `filter`; returns how many accepted it
    fn broadcast<F>(&mut self, message: &ServerMessage, filter: F) -> usize
    where
        F: Fn(ConnectionKind, Option<EntityId>) -> bool,
    {
        let text = match encode(message) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode message for broadcast: {}", e);
                return 0;
            }
        };

        let mut delivered = 0;
        for conn in self.connections.iter_mut() {
            if !filter(conn.kind, conn.player_id) || !conn.is_open() {
                continue;
            }
            if conn.send_text(text.clone()) {
                self.metrics.record_sent(text.len());
                delivered += 1;
            }
        }
        delivered
    }

    /// Push the full world snapshot to every gameplay connection
    pub fn broadcast_state(&mut self) -> usize {
        self.simulation.take_dirty();
        let message = ServerMessage::State(self.simulation.snapshot());
        self.metrics.state_broadcasts.fetch_add(1, Ordering::Relaxed);
        self.broadcast(&message, |kind, player| {
            kind == ConnectionKind::Game && player.is_some()
        })
    }

    /// Push the whole chat log to every chat subscriber
    pub fn broadcast_chat_log(&mut self) -> usize {
        let message = ServerMessage::ChatLog(self.simulation.chat_log().to_vec());
        self.metrics.chat_broadcasts.fetch_add(1, Ordering::Relaxed);
        let on_game_port = self.options.chat_on_game_port;
        self.broadcast(&message, move |kind, player| match kind {
            ConnectionKind::Chat => true,
            ConnectionKind::Game => on_game_port && player.is_some(),
        })
    }

    pub fn broadcast_debug_meshes(&mut self) -> usize {
        let message = ServerMessage::DebugMeshes(self.simulation.debug_geometry());
        self.broadcast(&message, |kind, _| kind == ConnectionKind::Game)
    }

    /// Run one simulation tick and broadcast whatever changed
    pub fn tick(&mut self) -> TickReport {
        let report = self.simulation.tick();

        if report.state_changed {
            self.broadcast_state();
        }
        if report.chat_changed {
            self.broadcast_chat_log();
        }
        if self.options.debug_meshes {
            self.broadcast_debug_meshes();
        }

        let state = self.simulation.state();
        self.metrics
            .enemies
            .store(state.enemy_count() as u64, Ordering::Relaxed);
        self.metrics
            .chat_log_len
            .store(state.chat_log.len() as u64, Ordering::Relaxed);
        self.metrics
            .collision_hits
            .fetch_add(report.hits as u64, Ordering::Relaxed);
        self.metrics
            .enemies_killed
            .fetch_add(report.enemies_killed.len() as u64, Ordering::Relaxed);

        report
    }
}

/// Start the game loop background task
pub fn start_game_loop<P>(session: Arc<RwLock<GameSession<P>>>, metrics: Arc<Metrics>)
where
    P: PhysicsWorld + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let (tick_duration, tick_rate) = {
            let guard = session.read().await;
            let config = guard.simulation.config();
            (config.tick_interval(), config.tick_rate)
        };
        let mut ticker = interval(tick_duration);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Game loop started at {} Hz", tick_rate);
        let start = Instant::now();
        let mut tick_count: u64 = 0;

        loop {
            ticker.tick().await;
            tick_count += 1;

            let tick_start = Instant::now();
            let report = session.write().await.tick();
            metrics.record_tick_time(tick_start.elapsed());

            if report.missing_bodies > 0 {
                warn!("{} players without physics bodies", report.missing_bodies);
            }

            // Log stats periodically (every 30 seconds)
            if tick_count % (tick_rate as u64 * 30) == 0 {
                let guard = session.read().await;
                let state = guard.simulation.state();
                info!(
                    "Game: {}s, tick {}, {} players, {} enemies, {} chat lines | tick p95 {}us",
                    start.elapsed().as_secs(),
                    state.tick,
                    state.player_count(),
                    state.enemy_count(),
                    state.chat_log.len(),
                    metrics.tick_time_p95_us.load(Ordering::Relaxed)
                );
            }
        }
    });
}

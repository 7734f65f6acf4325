use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

use crate::game::constants::{enemy, net, physics, player, timing};
use crate::game::simulation::SimulationConfig;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the listeners to
    pub bind_address: IpAddr,
    /// Gameplay WebSocket port
    pub port: u16,
    /// Separate chat WebSocket port. `None` serves chat on the game port.
    pub chat_port: Option<u16>,
    /// Maximum concurrent players
    pub max_players: usize,
    /// Simulation ticks per second
    pub tick_rate: u32,
    /// How long an action tag stays set
    pub action_duration_ms: u64,
    /// How long a chat bubble stays up (0 = until replaced)
    pub chat_bubble_duration_ms: u64,
    /// Delay before the patrol enemy spawns
    pub enemy_spawn_delay_secs: f32,
    /// Spawn the patrol enemy at all
    pub spawn_enemy: bool,
    /// Broadcast collider wireframes every tick
    pub debug_meshes: bool,
    /// Largest accepted WebSocket message in bytes
    pub max_message_size: usize,
    /// Metrics HTTP port (0 = disabled)
    pub metrics_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: net::GAME_PORT,
            chat_port: None,
            max_players: player::MAX_PLAYERS,
            tick_rate: physics::TICK_RATE,
            action_duration_ms: timing::ACTION_DURATION_MS,
            chat_bubble_duration_ms: timing::CHAT_BUBBLE_DURATION_MS,
            enemy_spawn_delay_secs: enemy::SPAWN_DELAY_SECS,
            spawn_enemy: true,
            debug_meshes: false,
            max_message_size: net::MAX_MESSAGE_SIZE,
            metrics_port: 9090,
        }
    }
}

/// Parse `key` if set. Bad or out-of-range values are logged and ignored.
fn parse_var<T, F>(lookup: &F, key: &str, valid: impl Fn(&T) -> bool, hint: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(parsed) if valid(&parsed) => Some(parsed),
        Ok(_) => {
            tracing::warn!("{} must be {}, using default", key, hint);
            None
        }
        Err(_) => {
            tracing::warn!("Invalid {} '{}', using default", key, raw);
            None
        }
    }
}

fn parse_flag<F>(lookup: &F, key: &str) -> Option<bool>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            tracing::warn!("Invalid {} '{}', using default", key, raw);
            None
        }
    }
}

impl ServerConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key/value source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = parse_var(&lookup, "BIND_ADDRESS", |_: &IpAddr| true, "an IP address") {
            config.bind_address = addr;
        }
        if let Some(port) = parse_var(&lookup, "PORT", |p: &u16| *p > 0, "> 0") {
            config.port = port;
        }
        if let Some(port) = parse_var(&lookup, "CHAT_PORT", |p: &u16| *p > 0, "> 0") {
            config.chat_port = Some(port);
        }
        if let Some(max) = parse_var(&lookup, "MAX_PLAYERS", |n: &usize| (1..=1000).contains(n), "1-1000") {
            config.max_players = max;
        }
        if let Some(rate) = parse_var(&lookup, "TICK_RATE", |n: &u32| (1..=240).contains(n), "1-240") {
            config.tick_rate = rate;
        }
        if let Some(ms) = parse_var(&lookup, "ACTION_DURATION_MS", |_: &u64| true, "a duration") {
            config.action_duration_ms = ms;
        }
        if let Some(ms) = parse_var(&lookup, "CHAT_BUBBLE_DURATION_MS", |_: &u64| true, "a duration") {
            config.chat_bubble_duration_ms = ms;
        }
        if let Some(secs) = parse_var(
            &lookup,
            "ENEMY_SPAWN_DELAY_SECS",
            |s: &f32| s.is_finite() && *s >= 0.0,
            "a non-negative number",
        ) {
            config.enemy_spawn_delay_secs = secs;
        }
        if let Some(flag) = parse_flag(&lookup, "SPAWN_ENEMY") {
            config.spawn_enemy = flag;
        }
        if let Some(flag) = parse_flag(&lookup, "DEBUG_MESHES") {
            config.debug_meshes = flag;
        }
        if let Some(size) = parse_var(&lookup, "MAX_MESSAGE_SIZE", |n: &usize| *n >= 1024, ">= 1024") {
            config.max_message_size = size;
        }
        if let Some(port) = parse_var(&lookup, "METRICS_PORT", |_: &u16| true, "a port") {
            config.metrics_port = port;
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("Port cannot be 0".to_string());
        }
        if self.chat_port == Some(self.port) {
            return Err("CHAT_PORT must differ from PORT".to_string());
        }
        if self.metrics_port != 0 && self.metrics_port == self.port {
            return Err("METRICS_PORT must differ from PORT".to_string());
        }
        if self.max_players == 0 {
            return Err("max_players must be at least 1".to_string());
        }
        if self.tick_rate == 0 {
            return Err("tick_rate must be at least 1".to_string());
        }
        Ok(())
    }

    /// Gameplay settings for the simulation
    pub fn simulation(&self) -> SimulationConfig {
        SimulationConfig {
            tick_rate: self.tick_rate,
            max_players: self.max_players,
            player_speed: player::SPEED,
            action_duration: Duration::from_millis(self.action_duration_ms),
            chat_bubble_duration: (self.chat_bubble_duration_ms > 0)
                .then(|| Duration::from_millis(self.chat_bubble_duration_ms)),
            enemy_spawn_delay: self
                .spawn_enemy
                .then(|| Duration::from_secs_f32(self.enemy_spawn_delay_secs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.chat_port, None);
        assert_eq!(config.max_players, 10);
        assert_eq!(config.tick_rate, 60);
        assert!(config.spawn_enemy);
        assert!(!config.debug_meshes);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_or_default() {
        let config = ServerConfig::load_or_default();
        assert!(config.max_players > 0);
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("PORT", "9000"),
            ("CHAT_PORT", "9001"),
            ("MAX_PLAYERS", "4"),
            ("TICK_RATE", "30"),
            ("DEBUG_MESHES", "true"),
            ("SPAWN_ENEMY", "off"),
            ("BIND_ADDRESS", "127.0.0.1"),
        ]);
        assert_eq!(config.port, 9000);
        assert_eq!(config.chat_port, Some(9001));
        assert_eq!(config.max_players, 4);
        assert_eq!(config.tick_rate, 30);
        assert!(config.debug_meshes);
        assert!(!config.spawn_enemy);
        assert_eq!(config.bind_address, IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    #[test]
    fn test_bad_values_keep_defaults() {
        let config = from_pairs(&[
            ("PORT", "0"),
            ("MAX_PLAYERS", "lots"),
            ("TICK_RATE", "1000"),
            ("ENEMY_SPAWN_DELAY_SECS", "-3"),
            ("DEBUG_MESHES", "maybe"),
        ]);
        let defaults = ServerConfig::default();
        assert_eq!(config.port, defaults.port);
        assert_eq!(config.max_players, defaults.max_players);
        assert_eq!(config.tick_rate, defaults.tick_rate);
        assert_eq!(config.enemy_spawn_delay_secs, defaults.enemy_spawn_delay_secs);
        assert!(!config.debug_meshes);
    }

    #[test]
    fn test_validate_rejects_port_clash() {
        let config = ServerConfig {
            chat_port: Some(8080),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_simulation_config() {
        let sim = from_pairs(&[("CHAT_BUBBLE_DURATION_MS", "0"), ("SPAWN_ENEMY", "false")])
            .simulation();
        assert_eq!(sim.chat_bubble_duration, None);
        assert_eq!(sim.enemy_spawn_delay, None);
        assert_eq!(sim.action_duration, Duration::from_millis(1500));

        let sim = ServerConfig::default().simulation();
        assert_eq!(sim.enemy_spawn_delay, Some(Duration::from_secs(10)));
        assert_eq!(sim.max_players, 10);
    }
}

use tracing::{debug, info};

use crate::game::constants::enemy::DAMAGE_PER_HIT;
use crate::game::physics::{CollisionEvent, PhysicsWorld};
use crate::game::state::{EntityId, WorldState};

/// Result of resolving one step's collision events
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CombatOutcome {
    /// Player-enemy contacts that dealt damage
    pub hits: u32,
    pub enemies_killed: Vec<EntityId>,
}

/// Apply damage for player-enemy contacts.
///
/// Only contact *start* events count, so an overlap that persists across
/// ticks hits once. An enemy at or below zero health loses its body and is
/// dropped in the same pass; later events naming it are ignored.
pub fn update<P: PhysicsWorld + ?Sized>(
    state: &mut WorldState,
    physics: &mut P,
    events: &[CollisionEvent],
) -> CombatOutcome {
    let mut outcome = CombatOutcome::default();

    for event in events {
        if !event.started {
            continue;
        }

        let player = state
            .player_by_body(event.a)
            .or_else(|| state.player_by_body(event.b));
        let enemy_id = state
            .enemy_by_body(event.a)
            .or_else(|| state.enemy_by_body(event.b));

        let (Some(player_id), Some(enemy_id)) = (player, enemy_id) else {
            continue;
        };

        let Some(enemy) = state.get_enemy_mut(enemy_id) else {
            continue;
        };
        enemy.health -= DAMAGE_PER_HIT;
        outcome.hits += 1;
        debug!(
            "Player {} hit enemy {} (health {})",
            player_id, enemy_id, enemy.health
        );

        if enemy.is_dead() {
            let body = enemy.body;
            physics.remove_body(body);
            state.remove_enemy(enemy_id);
            outcome.enemies_killed.push(enemy_id);
            info!("Enemy {} destroyed by player {}", enemy_id, player_id);
        } else {
            state.mark_dirty();
        }
    }

    outcome
}

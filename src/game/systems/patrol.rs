use tracing::warn;

use crate::game::constants::enemy::{SPEED, WAYPOINT_THRESHOLD};
use crate::game::physics::PhysicsWorld;
use crate::game::state::WorldState;
use crate::util::math::{Quat, Vec3};

/// Drive every enemy along its two-point patrol route.
///
/// An enemy within [`WAYPOINT_THRESHOLD`] of its current waypoint turns to
/// the other one. Its local +Z is aligned with the direction of travel and
/// its velocity set to [`SPEED`] toward the waypoint; the resulting body
/// transform is mirrored into the cached entity.
pub fn update<P: PhysicsWorld + ?Sized>(state: &mut WorldState, physics: &mut P) {
    let mut changed = false;

    for enemy in state.enemies.values_mut() {
        let Some(current) = physics.transform(enemy.body) else {
            warn!("Enemy {} has no physics body", enemy.id);
            continue;
        };

        if current.position.distance_to(enemy.moving_towards) < WAYPOINT_THRESHOLD {
            enemy.moving_towards = enemy.other_waypoint();
        }

        let direction = (enemy.moving_towards - current.position).normalize();
        if direction.length_sq() > 0.0 {
            physics.set_rotation(enemy.body, Quat::from_unit_vectors(Vec3::Z, direction));
        }
        physics.set_linear_velocity(enemy.body, direction * SPEED);

        if let Some(transform) = physics.transform(enemy.body) {
            changed |= enemy.apply_transform(&transform);
        }
    }

    if changed {
        state.mark_dirty();
    }
}

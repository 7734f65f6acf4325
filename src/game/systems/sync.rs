use tracing::warn;

use crate::game::physics::PhysicsWorld;
use crate::game::state::WorldState;

/// Copy every player's body transform into the cached entity.
///
/// Marks the world dirty when any transform moved. A player whose body is
/// gone keeps its last cached transform. Returns the number of bodies that
/// could not be found.
pub fn update<P: PhysicsWorld + ?Sized>(state: &mut WorldState, physics: &P) -> usize {
    let mut changed = false;
    let mut missing = 0;

    for player in state.players.values_mut() {
        match physics.transform(player.body) {
            Some(transform) => changed |= player.apply_transform(&transform),
            None => {
                warn!("Player {} has no physics body", player.id);
                missing += 1;
            }
        }
    }

    if changed {
        state.mark_dirty();
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::physics::testing::ScriptedWorld;
    use crate::game::physics::{BodyKind, ColliderShape, Pose};
    use crate::game::state::Player;
    use crate::util::math::Vec3;

    #[test]
    fn test_refresh_copies_transform() {
        let mut state = WorldState::new();
        let mut physics = ScriptedWorld::new();
        let body = physics.create_body(
            Pose::default(),
            BodyKind::Dynamic,
            ColliderShape::cuboid(Vec3::X),
        );
        let id = state.next_entity_id();
        state.insert_player(Player::new(id, body, Vec3::ZERO));
        state.take_dirty();

        physics.set_linear_velocity(body, Vec3::new(0.0, 0.0, 6.0));
        physics.step(0.5);

        assert_eq!(update(&mut state, &physics), 0);
        let player = state.get_player(id).unwrap();
        assert_eq!(player.position, Vec3::new(0.0, 0.0, 3.0));
        assert_eq!(player.velocity, Vec3::new(0.0, 0.0, 6.0));
        assert!(state.take_dirty());

        // Nothing moved since: stays clean
        update(&mut state, &physics);
        assert!(!state.take_dirty());
    }

    #[test]
    fn test_missing_body_is_counted_not_fatal() {
        let mut state = WorldState::new();
        let mut physics = ScriptedWorld::new();
        let body = physics.create_body(
            Pose::at(Vec3::new(1.0, 2.0, 3.0)),
            BodyKind::Dynamic,
            ColliderShape::cuboid(Vec3::X),
        );
        let id = state.next_entity_id();
        state.insert_player(Player::new(id, body, Vec3::new(1.0, 2.0, 3.0)));
        physics.remove_body(body);

        assert_eq!(update(&mut state, &physics), 1);
        assert_eq!(state.get_player(id).unwrap().position, Vec3::new(1.0, 2.0, 3.0));
    }
}

use crate::game::state::WorldState;

/// Clear actions and chat bubbles whose deadline is at or before the
/// current simulation clock. Returns how many fields were cleared.
pub fn update(state: &mut WorldState) -> usize {
    let now = state.clock;
    let mut cleared = 0;

    for player in state.players.values_mut() {
        if player.action_expires_at.is_some_and(|t| t <= now) {
            player.current_action.clear();
            player.action_expires_at = None;
            cleared += 1;
        }
        if player.bubble_expires_at.is_some_and(|t| t <= now) {
            player.chat_bubble.clear();
            player.bubble_expires_at = None;
            cleared += 1;
        }
    }

    if cleared > 0 {
        state.mark_dirty();
    }
    cleared
}

use crate::game::commands::{CommandSink, UnitCommand};
use crate::game::constants::behavior::ALIGN_EPSILON;
use crate::game::unit::Avatar;
use crate::game::zone::Direction;
use crate::util::vec2::Vec2;

/// Move `avatar` toward `anchor` along the dominant axis of the remaining
/// offset, slowing on the final approach so one tick lands exactly on it.
/// Returns true once the avatar sits on the anchor.
pub(super) fn steer_to(avatar: &dyn Avatar, sink: &dyn CommandSink, anchor: Vec2, dt: f32) -> bool {
    let delta = anchor - avatar.position();
    if delta.is_zero(ALIGN_EPSILON) {
        return true;
    }
    let Some(direction) = Direction::from_vector(delta) else {
        return true;
    };

    let axis = direction.axis();
    let per_tick = avatar.max_speed().axis(axis) * dt;
    let factor = if per_tick > 0.0 {
        (delta.axis(axis).abs() / per_tick).min(1.0)
    } else {
        1.0
    };

    sink.send(UnitCommand::SpeedFactor(factor));
    sink.send(UnitCommand::Move(direction));
    false
}

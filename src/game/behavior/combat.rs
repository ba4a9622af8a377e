//! ChoosePattern, Hunt and OpportunityFire

use std::sync::Arc;

use rand::Rng;
use rand_distr::{Distribution, Triangular};

use super::motion::steer_to;
use super::{BehaviorController, BehaviorKind};
use crate::game::commands::UnitCommand;
use crate::game::constants::fire::DEFAULT_FIRE_RANGE;
use crate::game::systems::fire_solution::FireSolution;
use crate::game::unit::Avatar;
use crate::game::zone::{Direction, Zone};

impl BehaviorController {
    /// Valid fire solution for the current weapon against `target`. A stale
    /// one triggers a background recalculation and reads as `None` until it
    /// lands.
    pub(super) fn fresh_solution(&self, target: &dyn Avatar) -> Option<Arc<FireSolution>> {
        let weapon = self.avatar.weapon()?;
        let target_speed = target.max_speed();
        if let Some(solution) = self.solution.fresh_for(&weapon, target_speed) {
            return Some(solution);
        }
        self.solution
            .request(&self.ctx.fire, &self.ctx.workers, weapon.clone(), target_speed);
        // An inline pool has already finished
        self.solution.fresh_for(&weapon, target_speed)
    }

    /// Target zone shifted by the pattern offset. Aiming at our own cell
    /// falls back to the target itself.
    pub(super) fn aim_zone(&self, target: &dyn Avatar) -> Zone {
        let geometry = self.ctx.grid.geometry();
        let aim = geometry.clamp(target.zone() + self.target_offset);
        if aim == self.avatar.zone() {
            target.zone()
        } else {
            aim
        }
    }

    /// Direction to fire when `here` shares a row or column with `aim` within
    /// range
    pub(super) fn aligned_shot(&self, here: Zone, aim: Zone, solution: Option<&FireSolution>) -> Option<Direction> {
        let delta = aim - here;
        if delta.x != 0 && delta.y != 0 {
            return None;
        }
        let direction = Direction::from_delta(delta)?;
        let distance = delta.x.abs() + delta.y.abs();
        let range = solution.map_or(DEFAULT_FIRE_RANGE, |s| s.range(direction.axis()));
        (distance <= range).then_some(direction)
    }

    /// Direction of a snap shot at a target that is about to cross our
    /// firing line, if its predicted drift matches where it actually is
    pub(super) fn opportunity_shot(&self, target: &dyn Avatar, solution: Option<&FireSolution>) -> Option<Direction> {
        let solution = solution?;
        let heading = Direction::from_vector(target.speed())?;
        let move_axis = heading.axis();
        let shot_axis = move_axis.perpendicular();

        let delta = target.zone() - self.avatar.zone();
        // How far the target still has to travel to reach our line
        let gap = -delta.axis(move_axis);
        if gap == 0 || gap.signum() != heading.step().axis(move_axis) {
            return None;
        }

        let distance = delta.axis(shot_axis).abs();
        if distance == 0 {
            return None;
        }
        let lead = solution.lead(shot_axis, distance)?;
        if lead.axis(move_axis).abs() != gap.abs() {
            return None;
        }
        Direction::along(shot_axis, delta.axis(shot_axis))
    }

    pub(super) fn check_opportunity(&self) -> bool {
        let Some(target) = self.target.as_ref() else {
            return false;
        };
        let fresh = self
            .avatar
            .weapon()
            .and_then(|weapon| self.solution.fresh_for(&weapon, target.max_speed()));
        self.opportunity_shot(target.as_ref(), fresh.as_deref()).is_some()
    }

    /// Settle on the current anchor, face `direction` and fire. Returns true
    /// once the shot is out.
    pub(super) fn take_shot(&mut self, direction: Direction) -> bool {
        let anchor = self.ctx.grid.geometry().anchor(self.avatar.zone());
        if !steer_to(self.avatar.as_ref(), self.sink.as_ref(), anchor, self.ctx.dt) {
            return false;
        }

        self.sink.send(UnitCommand::Stop);
        if self.avatar.facing() != direction {
            self.sink.send(UnitCommand::Face(direction));
        }
        self.sink.send(UnitCommand::Fire);
        self.ctx.metrics.record_shot();
        true
    }

    /// Pick a fresh pattern offset along the target's facing
    pub(super) fn choose_pattern(&mut self) {
        self.target_offset = Zone::ZERO;
        let Some(target) = self.target.clone() else {
            return;
        };
        let Some(solution) = self.fresh_solution(target.as_ref()) else {
            return;
        };

        let max_lead = solution.max_lead();
        if max_lead <= 0 {
            return;
        }
        let Ok(spread) = Triangular::new(0.0, max_lead as f64, 0.0) else {
            return;
        };
        let magnitude = spread.sample(&mut self.rng).round() as i32;
        let sign = if self.rng.gen_bool(0.5) { 1 } else { -1 };
        self.target_offset = target.facing().step() * (magnitude * sign);
    }

    pub(super) fn update_hunt(&mut self) -> bool {
        let Some(target) = self.target.clone() else {
            return true;
        };
        let here = self.avatar.zone();
        let aim = self.aim_zone(target.as_ref());
        let solution = self.fresh_solution(target.as_ref());

        if let Some(direction) = self.aligned_shot(here, aim, solution.as_deref()) {
            return self.take_shot(direction);
        }

        if self.opportunity_shot(target.as_ref(), solution.as_deref()).is_some() {
            self.next(BehaviorKind::OpportunityFire);
        } else {
            self.next(BehaviorKind::Pursuit);
        }
        false
    }

    pub(super) fn update_opportunity_fire(&mut self) -> bool {
        let Some(target) = self.target.clone() else {
            return true;
        };
        let solution = self.fresh_solution(target.as_ref());
        match self.opportunity_shot(target.as_ref(), solution.as_deref()) {
            Some(direction) => self.take_shot(direction),
            None => {
                self.next(BehaviorKind::Hunt);
                false
            }
        }
    }
}

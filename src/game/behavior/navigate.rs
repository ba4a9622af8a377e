//! Pursuit and Path: walking planned routes toward the target

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use super::motion::steer_to;
use super::{BehaviorController, BehaviorKind, Route};
use crate::game::commands::UnitCommand;
use crate::game::systems::path_planner::{PathPlanner, PathReceiver, PathSlot};
use crate::game::tracker::ZoneSubscriber;
use crate::game::unit::Avatar;
use crate::game::zone::Zone;
use crate::util::ids::EntityId;

/// Replans a unit's route whenever its target changes zone
///
/// Subscribed to the target's tracker while the controller pursues. Every
/// reference is weak so a bridge never keeps a dead unit, planner or slot
/// alive.
pub struct PathBridge {
    unit: Weak<dyn Avatar>,
    planner: Weak<PathPlanner>,
    slot: Weak<dyn PathReceiver>,
    target: EntityId,
}

impl PathBridge {
    pub fn target(&self) -> EntityId {
        self.target
    }
}

impl ZoneSubscriber for PathBridge {
    fn zone_changed(&self, entity: EntityId, zone: Zone) {
        if entity != self.target || self.slot.strong_count() == 0 {
            return;
        }
        let (Some(unit), Some(planner)) = (self.unit.upgrade(), self.planner.upgrade()) else {
            return;
        };
        if unit.is_alive() {
            planner.schedule_path(unit.zone(), zone, self.slot.clone());
        }
    }
}

impl BehaviorController {
    fn attach_bridge(&mut self) {
        if self.bridge.is_some() {
            return;
        }
        let Some(target) = self.target.as_ref() else {
            return;
        };

        let slot: Weak<PathSlot> = Arc::downgrade(&self.path_slot);
        let bridge = Arc::new(PathBridge {
            unit: Arc::downgrade(&self.avatar),
            planner: Arc::downgrade(&self.ctx.planner),
            slot,
            target: target.id(),
        });
        target.tracker().subscribe(&bridge);
        self.bridge = Some(bridge);
    }

    pub(super) fn detach_bridge(&mut self) {
        let Some(bridge) = self.bridge.take() else {
            return;
        };
        if let Some(target) = self.target.as_ref() {
            target.tracker().unsubscribe(&bridge);
        }
    }

    fn request_path(&self) {
        let Some(target) = self.target.as_ref() else {
            return;
        };
        let slot: Weak<PathSlot> = Arc::downgrade(&self.path_slot);
        self.ctx
            .planner
            .schedule_path(self.avatar.zone(), target.zone(), slot);
    }

    /// Take over the slot's path if it is newer than the route being walked.
    /// The target's own cell is dropped, and so is whatever the unit already
    /// left behind.
    fn adopt_latest_path(&mut self) {
        let Some(accepted) = self.path_slot.latest() else {
            return;
        };
        if accepted.job <= self.route_job {
            return;
        }
        self.route_job = accepted.job;

        if accepted.path.is_empty() {
            self.route = Route::Unreachable;
            return;
        }

        let mut cells: VecDeque<Zone> = accepted.path.iter().copied().collect();
        cells.pop_back();
        let here = self.avatar.zone();
        if let Some(at) = cells.iter().position(|zone| *zone == here) {
            cells.drain(..at);
        }
        self.route = Route::Walking(cells);
    }

    pub(super) fn enter_pursuit(&mut self, prev: BehaviorKind) {
        self.attach_bridge();
        // Coming from Path the route it just adopted is kept
        if prev != BehaviorKind::Path {
            self.route = Route::Pending;
            self.path_slot.clear();
            self.request_path();
        }
    }

    pub(super) fn update_pursuit(&mut self) -> bool {
        let Some(target) = self.target.clone() else {
            return true;
        };
        let here = self.avatar.zone();
        let aim = self.aim_zone(target.as_ref());
        let solution = self.fresh_solution(target.as_ref());
        if self.aligned_shot(here, aim, solution.as_deref()).is_some() {
            self.next(BehaviorKind::Hunt);
            return false;
        }

        self.adopt_latest_path();
        if self.route == Route::Unreachable {
            self.next(BehaviorKind::Path);
            return false;
        }

        let geometry = *self.ctx.grid.geometry();
        let Route::Walking(cells) = &mut self.route else {
            return false;
        };
        while let Some(&next) = cells.front() {
            if !steer_to(self.avatar.as_ref(), self.sink.as_ref(), geometry.anchor(next), self.ctx.dt) {
                return false;
            }
            cells.pop_front();
        }
        true
    }

    pub(super) fn enter_path(&mut self) {
        self.attach_bridge();
        self.route = Route::Pending;
        self.request_path();
        self.replan_in = self.ctx.replan_ticks;
        self.sink.send(UnitCommand::Stop);
    }

    /// Wait in place for a usable route, replanning every few ticks
    pub(super) fn update_path(&mut self) -> bool {
        self.adopt_latest_path();
        if matches!(self.route, Route::Walking(_)) {
            self.next(BehaviorKind::Pursuit);
            return false;
        }

        self.replan_in = self.replan_in.saturating_sub(1);
        if self.replan_in == 0 {
            self.request_path();
            self.replan_in = self.ctx.replan_ticks.max(1);
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::game::behavior::test_support::{Arena, Recorder};
    use crate::game::behavior::{BehaviorKind, Route};
    use crate::game::commands::UnitCommand;
    use crate::game::systems::path_planner::PathReceiver;
    use crate::game::unit::{Avatar, WeaponSpec};
    use crate::game::zone::Zone;

    fn bolt() -> Option<WeaponSpec> {
        Some(WeaponSpec::new("bolt", 10.0))
    }

    #[test]
    fn test_pursuit_requests_then_walks_route() {
        let arena = Arena::new();
        let unit = arena.puppet(1, Zone::new(0, 0), bolt());
        let target = arena.puppet(2, Zone::new(5, 5), None);
        let sink = Arc::new(Recorder::default());
        let mut controller = arena.controller(&unit, &sink);
        controller.set_target(Some(target.clone()));
        controller.next(BehaviorKind::Pursuit);

        controller.update(0);
        assert_eq!(controller.current(), BehaviorKind::Pursuit);
        assert_eq!(controller.route(), &Route::Pending);
        assert_eq!(arena.ctx.planner.pending_jobs(), 1);
        assert!(controller.is_tracking_target());

        arena.ctx.planner.execute(0);
        sink.take();
        controller.update(1);

        match controller.route() {
            Route::Walking(cells) => {
                assert!(!cells.contains(&Zone::new(5, 5)));
                assert!(!cells.contains(&Zone::new(0, 0)));
            }
            other => panic!("unexpected route {:?}", other),
        }
        let commands = sink.take();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0], UnitCommand::SpeedFactor(1.0));
        assert!(matches!(commands[1], UnitCommand::Move(_)));
    }

    #[test]
    fn test_pursuit_switches_to_hunt_when_aligned() {
        let arena = Arena::new();
        let unit = arena.puppet(1, Zone::new(0, 0), bolt());
        let target = arena.puppet(2, Zone::new(4, 0), None);
        let sink = Arc::new(Recorder::default());
        let mut controller = arena.controller(&unit, &sink);
        controller.target = Some(target.clone());
        controller.current = BehaviorKind::Pursuit;

        assert!(!controller.update_pursuit());
        assert_eq!(controller.pending(), Some(BehaviorKind::Hunt));
    }

    #[test]
    fn test_target_move_triggers_replan() {
        let arena = Arena::new();
        let unit = arena.puppet(1, Zone::new(0, 0), bolt());
        let target = arena.puppet(2, Zone::new(5, 5), None);
        let sink = Arc::new(Recorder::default());
        let mut controller = arena.controller(&unit, &sink);
        controller.set_target(Some(target.clone()));
        controller.next(BehaviorKind::Pursuit);
        controller.update(0);
        arena.ctx.planner.execute(0);
        assert_eq!(arena.ctx.planner.pending_jobs(), 0);
        assert_eq!(target.tracker().subscriber_count(), 1);

        target.teleport(Zone::new(6, 6));
        assert_eq!(arena.ctx.planner.pending_jobs(), 1);

        controller.set_target(None);
        assert!(!controller.is_tracking_target());
        assert_eq!(target.tracker().subscriber_count(), 0);
    }

    #[test]
    fn test_newer_path_replaces_route() {
        let arena = Arena::new();
        let unit = arena.puppet(1, Zone::new(0, 0), bolt());
        let target = arena.puppet(2, Zone::new(3, 3), None);
        let sink = Arc::new(Recorder::default());
        let mut controller = arena.controller(&unit, &sink);
        controller.target = Some(target.clone());
        controller.current = BehaviorKind::Pursuit;

        let first = vec![Zone::new(0, 0), Zone::new(0, 1), Zone::new(1, 1), Zone::new(3, 3)];
        assert!(controller.path_slot().receive_path(first, 10));
        controller.adopt_latest_path();
        assert_eq!(
            controller.route(),
            &Route::Walking([Zone::new(0, 0), Zone::new(0, 1), Zone::new(1, 1)].into_iter().collect())
        );

        // Stale delivery never replaces the route
        assert!(!controller.path_slot().receive_path(vec![Zone::new(0, 0), Zone::new(3, 3)], 9));
        controller.adopt_latest_path();
        assert_eq!(controller.route_job, 10);

        let second = vec![Zone::new(0, 0), Zone::new(1, 0), Zone::new(3, 3)];
        assert!(controller.path_slot().receive_path(second, 11));
        controller.adopt_latest_path();
        assert_eq!(
            controller.route(),
            &Route::Walking([Zone::new(0, 0), Zone::new(1, 0)].into_iter().collect())
        );
    }

    #[test]
    fn test_unreachable_waits_in_path_and_replans() {
        let arena = Arena::new();
        let unit = arena.puppet(1, Zone::new(0, 0), bolt());
        let target = arena.puppet(2, Zone::new(5, 5), None);
        let sink = Arc::new(Recorder::default());
        let mut controller = arena.controller(&unit, &sink);
        controller.target = Some(target.clone());
        controller.current = BehaviorKind::Pursuit;

        assert!(controller.path_slot().receive_path(Vec::new(), 100));
        assert!(!controller.update_pursuit());
        assert_eq!(controller.route(), &Route::Unreachable);
        assert_eq!(controller.pending(), Some(BehaviorKind::Path));

        // Entering Path requests a route and stops the unit
        controller.update(1);
        assert_eq!(controller.current(), BehaviorKind::Path);
        assert_eq!(arena.ctx.planner.pending_jobs(), 1);
        assert!(sink.take().contains(&UnitCommand::Stop));

        // Replan after replan_ticks updates without a route
        controller.update(2);
        assert_eq!(arena.ctx.planner.pending_jobs(), 1);
        controller.update(3);
        assert_eq!(arena.ctx.planner.pending_jobs(), 2);

        // Job ids restart below the fake delivery, so feed a newer one by hand
        assert!(controller
            .path_slot()
            .receive_path(vec![Zone::new(0, 0), Zone::new(0, 1), Zone::new(5, 5)], 200));
        controller.update(4);
        assert_eq!(controller.pending(), Some(BehaviorKind::Pursuit));
        controller.update(5);
        assert_eq!(controller.current(), BehaviorKind::Pursuit);
        assert!(matches!(controller.route(), Route::Walking(_)));
        assert!(controller.is_tracking_target());
    }
}

//! Per-entity zone tracking
//!
//! An `EntityTracker` follows an entity's continuous position and decides,
//! using a distance threshold instead of exact cell geometry, when the entity
//! has moved far enough to need a new zone. Only then does it mark itself
//! dirty for the `ZoneGrid` and fan out a change notification, so sub-pixel
//! jitter never triggers the zone/path chain downstream.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::game::constants::tracker::COMPACT_MIN_SLOTS;
use crate::game::workers::WorkerPool;
use crate::game::zone::{GridGeometry, Zone};
use crate::util::ids::EntityId;
use crate::util::vec2::Vec2;

/// Receiver of zone change notifications
pub trait ZoneSubscriber: Send + Sync {
    /// `entity` now belongs to `zone`. Called from a worker, never while the
    /// tracker's own locks are held.
    fn zone_changed(&self, entity: EntityId, zone: Zone);
}

#[derive(Debug)]
struct TrackerState {
    position: Vec2,
    size: Vec2,
    /// Squared half-diagonal of `size`; movement beyond it forces a recompute
    half_diag_sq: f32,
    /// Anchor of `zone`, the reference point movement is measured from
    anchor: Vec2,
    zone: Zone,
    /// Cell the grid currently holds this entity in
    placed: Option<Zone>,
    dirty: bool,
}

type SubscriberSlot = Option<Weak<dyn ZoneSubscriber>>;

/// Continuous-position to zone-membership helper owned by one entity
pub struct EntityTracker {
    id: EntityId,
    geometry: GridGeometry,
    workers: Arc<WorkerPool>,
    state: Mutex<TrackerState>,
    /// Append/tombstone slot arena; compacted lazily on subscribe
    subscribers: Mutex<Vec<SubscriberSlot>>,
}

#[inline]
fn half_diag_sq(size: Vec2) -> f32 {
    let half = size * 0.5;
    half.length_sq()
}

impl EntityTracker {
    /// Tracker for an entity at `position` with bounding box `size`. The
    /// initial zone is computed right away and the tracker starts dirty so the
    /// grid picks it up on its next pass.
    pub fn new(
        id: EntityId,
        geometry: GridGeometry,
        workers: Arc<WorkerPool>,
        position: Vec2,
        size: Vec2,
    ) -> Self {
        let zone = geometry.nearest_zone(position);
        Self {
            id,
            geometry,
            workers,
            state: Mutex::new(TrackerState {
                position,
                size,
                half_diag_sq: half_diag_sq(size),
                anchor: geometry.anchor(zone),
                zone,
                placed: None,
                dirty: true,
            }),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    #[inline]
    pub fn id(&self) -> EntityId {
        self.id
    }

    #[inline]
    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    /// Current zone
    pub fn zone(&self) -> Zone {
        self.state.lock().zone
    }

    /// Anchor of the current zone
    pub fn anchor(&self) -> Vec2 {
        self.state.lock().anchor
    }

    pub fn position(&self) -> Vec2 {
        self.state.lock().position
    }

    pub fn size(&self) -> Vec2 {
        self.state.lock().size
    }

    /// True while the grid has not yet caught up with the current zone
    pub fn is_dirty(&self) -> bool {
        self.state.lock().dirty
    }

    /// Report a move. Returns true when the entity changed zone, in which case
    /// the tracker is now dirty and subscribers are notified asynchronously.
    pub fn update(&self, position: Vec2, size: Vec2) -> bool {
        let zone = {
            let mut state = self.state.lock();
            state.position = position;
            if state.size != size {
                state.size = size;
                state.half_diag_sq = half_diag_sq(size);
            }

            if position.distance_sq_to(state.anchor) <= state.half_diag_sq {
                return false;
            }

            let zone = self.geometry.nearest_zone(position);
            if zone == state.zone {
                return false;
            }

            state.zone = zone;
            state.anchor = self.geometry.anchor(zone);
            state.dirty = true;
            zone
        };

        self.notify(zone);
        true
    }

    /// Register for zone change notifications. Only a weak reference is kept.
    pub fn subscribe<S>(&self, subscriber: &Arc<S>)
    where
        S: ZoneSubscriber + 'static,
    {
        let weak: Weak<S> = Arc::downgrade(subscriber);
        let weak: Weak<dyn ZoneSubscriber> = weak;
        let mut slots = self.subscribers.lock();

        let tombstones = slots
            .iter()
            .filter(|slot| slot.as_ref().map_or(true, |w| w.strong_count() == 0))
            .count();
        if slots.len() >= COMPACT_MIN_SLOTS && tombstones * 2 > slots.len() {
            slots.retain(|slot| slot.as_ref().map_or(false, |w| w.strong_count() > 0));
        }

        slots.push(Some(weak));
    }

    /// Tombstone every slot registered for `subscriber`
    pub fn unsubscribe<S>(&self, subscriber: &Arc<S>)
    where
        S: ZoneSubscriber + 'static,
    {
        let target = Arc::as_ptr(subscriber) as *const ();
        let mut slots = self.subscribers.lock();
        for slot in slots.iter_mut() {
            let matches = slot
                .as_ref()
                .map_or(false, |w| w.as_ptr() as *const () == target);
            if matches {
                *slot = None;
            }
        }
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .iter()
            .filter(|slot| slot.as_ref().map_or(false, |w| w.strong_count() > 0))
            .count()
    }

    /// Total slots including tombstones
    pub fn subscriber_slots(&self) -> usize {
        self.subscribers.lock().len()
    }

    fn notify(&self, zone: Zone) {
        let live: Vec<Arc<dyn ZoneSubscriber>> = self
            .subscribers
            .lock()
            .iter()
            .filter_map(|slot| slot.as_ref().and_then(Weak::upgrade))
            .collect();

        if live.is_empty() {
            return;
        }

        let id = self.id;
        self.workers.spawn("zone-notify", move || {
            for subscriber in live {
                subscriber.zone_changed(id, zone);
            }
        });
    }

    // === Grid bookkeeping ===

    /// (current zone, placed zone) snapshot
    pub(crate) fn placement(&self) -> (Zone, Option<Zone>) {
        let state = self.state.lock();
        (state.zone, state.placed)
    }

    /// Record that the grid holds this entity at `zone`. The dirty flag is
    /// only consumed if the tracker has not moved on in the meantime.
    pub(crate) fn mark_placed(&self, zone: Zone) {
        let mut state = self.state.lock();
        state.placed = Some(zone);
        if state.zone == zone {
            state.dirty = false;
        }
    }

    pub(crate) fn mark_removed(&self) {
        let mut state = self.state.lock();
        state.placed = None;
        state.dirty = false;
    }
}

impl std::fmt::Debug for EntityTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("EntityTracker")
            .field("id", &self.id)
            .field("zone", &state.zone)
            .field("placed", &state.placed)
            .field("dirty", &state.dirty)
            .finish()
    }
}

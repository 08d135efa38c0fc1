//! Collision-event dispatch: raw native pairs become per-object event
//! queues with a keep-alive guarantee for subscribed actors.

use glam::Vec3;
use std::collections::{HashMap, HashSet};

use crate::config::TERRAIN_ID_LIMIT;
use crate::engine::{CollisionRecord, ShapeHandle};
use crate::utils::allocator::ObjectId;

/// What an object collided with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CollisionSource {
    Object(ObjectId),
    /// Terrain or water geometry below the reserved handle threshold.
    Ground,
}

/// One attributed collision event, delivered through [`super::WorldEvents`].
#[derive(Debug, Clone, Copy)]
pub struct CollisionEvent {
    pub other: CollisionSource,
    pub point: Vec3,
    pub normal: Vec3,
    pub penetration: f32,
}

/// Per-frame accumulator and notification bookkeeping.
///
/// Objects with events this frame are notified exactly once. An object that
/// had events last frame but none this frame receives one empty keep-alive
/// notification, enabling "collision ended" detection downstream, then drops
/// from the active set. Avatars stay in the notify set every frame because
/// downstream animation-state logic depends on a steady event cadence.
pub struct CollisionDispatcher {
    current: HashMap<ObjectId, Vec<CollisionEvent>>,
    active_last_frame: HashSet<ObjectId>,
    always_notify: HashSet<ObjectId>,
    terrain_limit: u32,
}

impl Default for CollisionDispatcher {
    fn default() -> Self {
        Self::new(TERRAIN_ID_LIMIT)
    }
}

impl CollisionDispatcher {
    pub fn new(terrain_limit: u32) -> Self {
        Self {
            current: HashMap::new(),
            active_last_frame: HashSet::new(),
            always_notify: HashSet::new(),
            terrain_limit,
        }
    }

    /// Puts an object (avatar) on the unconditional every-frame cadence.
    pub fn keep_always(&mut self, id: ObjectId) {
        self.always_notify.insert(id);
    }

    /// Forgets an object entirely (removal path).
    pub fn forget(&mut self, id: ObjectId) {
        self.current.remove(&id);
        self.active_last_frame.remove(&id);
        self.always_notify.remove(&id);
    }

    pub fn notifies_always(&self, id: ObjectId) -> bool {
        self.always_notify.contains(&id)
    }

    fn is_terrain(&self, shape: ShapeHandle) -> bool {
        shape.0 < self.terrain_limit
    }

    /// Accumulates one step's raw pair list. `resolve` maps a native shape
    /// handle to the owning object (linkset compounds resolve to the root).
    pub fn ingest<F>(&mut self, records: &[CollisionRecord], resolve: F)
    where
        F: Fn(ShapeHandle) -> Option<ObjectId>,
    {
        for record in records {
            let terrain_a = self.is_terrain(record.shape_a);
            let terrain_b = self.is_terrain(record.shape_b);
            if terrain_a && terrain_b {
                continue;
            }

            let id_a = if terrain_a { None } else { resolve(record.shape_a) };
            let id_b = if terrain_b { None } else { resolve(record.shape_b) };

            // Both sides need notification; a terrain side becomes a
            // synthetic ground source on the other.
            if let Some(a) = id_a {
                let other = match id_b {
                    Some(b) => CollisionSource::Object(b),
                    None => CollisionSource::Ground,
                };
                self.current.entry(a).or_default().push(CollisionEvent {
                    other,
                    point: record.point,
                    normal: record.normal,
                    penetration: record.penetration,
                });
            }
            if let Some(b) = id_b {
                let other = match id_a {
                    Some(a) => CollisionSource::Object(a),
                    None => CollisionSource::Ground,
                };
                self.current.entry(b).or_default().push(CollisionEvent {
                    other,
                    point: record.point,
                    normal: -record.normal,
                    penetration: record.penetration,
                });
            }
        }
    }

    /// Notifies every accumulated object once, sends keep-alive empties, and
    /// rolls the active set over to this frame. `live` filters out objects
    /// removed since their last contact.
    pub fn dispatch<L, N>(&mut self, live: L, mut notify: N)
    where
        L: Fn(ObjectId) -> bool,
        N: FnMut(ObjectId, &[CollisionEvent]),
    {
        let mut notified: HashSet<ObjectId> = HashSet::new();

        for (id, events) in self.current.drain() {
            if !live(id) {
                continue;
            }
            notify(id, &events);
            notified.insert(id);
        }

        // Avatars keep a steady cadence even with no contacts.
        for id in &self.always_notify {
            if live(*id) && !notified.contains(id) {
                notify(*id, &[]);
                notified.insert(*id);
            }
        }

        // One empty notification after real collisions stop, then drop.
        for id in self.active_last_frame.drain() {
            if live(id) && !notified.contains(&id) {
                notify(id, &[]);
            }
        }

        self.active_last_frame = notified;
    }
}

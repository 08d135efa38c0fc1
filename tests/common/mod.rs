#![allow(dead_code)]

//! Shared test fixtures: a recording stub for the native engine contract and
//! an event sink, both inspectable from outside the world.

use glam::Vec3;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use regionphys::engine::{
    BodyHandle, BodySpec, BodyUpdate, CollisionRecord, FlatHeights, NativeEngine, NoMesher,
    ShapeHandle, ShapeSpec, StepResults,
};
use regionphys::error::{PhysicsError, Result};
use regionphys::world::collisions::CollisionEvent;
use regionphys::world::{RegionWorld, WorldEvents};
use regionphys::{MassProperties, ObjectId, Transform, Velocity, WorldParams};

pub struct ShapeRec {
    pub spec: ShapeSpec,
    pub transform: Transform,
    pub category: u32,
    pub mask: u32,
}

pub struct BodyRec {
    pub shape: ShapeHandle,
    pub transform: Transform,
    pub velocity: Velocity,
    pub mass: MassProperties,
    pub gravity_scale: f32,
    pub force: Vec3,
    pub torque: Vec3,
}

/// Backing store of the stub engine, shared with the test through an `Arc`
/// so assertions can inspect it after the world has taken ownership.
pub struct EngineInner {
    next_shape: u32,
    next_body: u32,
    pub gravity: Vec3,
    pub shapes: HashMap<u32, ShapeRec>,
    pub bodies: HashMap<u32, BodyRec>,
    /// Collision pairs reported by the next step call.
    pub queued_collisions: Vec<CollisionRecord>,
    pub fail_next_shape: bool,
    pub fail_next_step: bool,
    pub shapes_created: u32,
    pub shapes_destroyed: u32,
    pub bodies_created: u32,
    pub bodies_destroyed: u32,
}

impl Default for EngineInner {
    fn default() -> Self {
        Self {
            // well above the reserved terrain handle range
            next_shape: 1000,
            next_body: 1,
            gravity: Vec3::ZERO,
            shapes: HashMap::new(),
            bodies: HashMap::new(),
            queued_collisions: Vec::new(),
            fail_next_shape: false,
            fail_next_step: false,
            shapes_created: 0,
            shapes_destroyed: 0,
            bodies_created: 0,
            bodies_destroyed: 0,
        }
    }
}

/// Native-engine stand-in: records every call and integrates bodies with a
/// single explicit Euler step so motion-dependent paths can be exercised.
#[derive(Clone, Default)]
pub struct StubEngine {
    pub inner: Arc<Mutex<EngineInner>>,
}

impl NativeEngine for StubEngine {
    fn create_shape(&mut self, spec: ShapeSpec) -> Result<ShapeHandle> {
        let mut inner = self.inner.lock();
        if inner.fail_next_shape {
            inner.fail_next_shape = false;
            return Err(PhysicsError::Engine("shape creation refused".into()));
        }
        let handle = ShapeHandle(inner.next_shape);
        inner.next_shape += 1;
        inner.shapes.insert(
            handle.0,
            ShapeRec {
                spec,
                transform: Transform::default(),
                category: u32::MAX,
                mask: u32::MAX,
            },
        );
        inner.shapes_created += 1;
        Ok(handle)
    }

    fn destroy_shape(&mut self, shape: ShapeHandle) {
        let mut inner = self.inner.lock();
        if inner.shapes.remove(&shape.0).is_some() {
            inner.shapes_destroyed += 1;
        }
    }

    fn set_shape_transform(&mut self, shape: ShapeHandle, transform: Transform) {
        if let Some(rec) = self.inner.lock().shapes.get_mut(&shape.0) {
            rec.transform = transform;
        }
    }

    fn set_shape_filter(&mut self, shape: ShapeHandle, category: u32, mask: u32) {
        if let Some(rec) = self.inner.lock().shapes.get_mut(&shape.0) {
            rec.category = category;
            rec.mask = mask;
        }
    }

    fn create_body(&mut self, spec: BodySpec) -> Result<BodyHandle> {
        let mut inner = self.inner.lock();
        let handle = BodyHandle(inner.next_body);
        inner.next_body += 1;
        inner.bodies.insert(
            handle.0,
            BodyRec {
                shape: spec.shape,
                transform: spec.transform,
                velocity: Velocity::default(),
                mass: spec.mass,
                gravity_scale: 1.0,
                force: Vec3::ZERO,
                torque: Vec3::ZERO,
            },
        );
        inner.bodies_created += 1;
        Ok(handle)
    }

    fn destroy_body(&mut self, body: BodyHandle) {
        let mut inner = self.inner.lock();
        if inner.bodies.remove(&body.0).is_some() {
            inner.bodies_destroyed += 1;
        }
    }

    fn set_transform(&mut self, body: BodyHandle, transform: Transform) {
        if let Some(rec) = self.inner.lock().bodies.get_mut(&body.0) {
            rec.transform = transform;
        }
    }

    fn get_transform(&self, body: BodyHandle) -> Option<Transform> {
        self.inner.lock().bodies.get(&body.0).map(|rec| rec.transform)
    }

    fn set_linear_velocity(&mut self, body: BodyHandle, velocity: Vec3) {
        if let Some(rec) = self.inner.lock().bodies.get_mut(&body.0) {
            rec.velocity.linear = velocity;
        }
    }

    fn set_angular_velocity(&mut self, body: BodyHandle, velocity: Vec3) {
        if let Some(rec) = self.inner.lock().bodies.get_mut(&body.0) {
            rec.velocity.angular = velocity;
        }
    }

    fn add_force(&mut self, body: BodyHandle, force: Vec3) {
        if let Some(rec) = self.inner.lock().bodies.get_mut(&body.0) {
            rec.force += force;
        }
    }

    fn add_torque(&mut self, body: BodyHandle, torque: Vec3) {
        if let Some(rec) = self.inner.lock().bodies.get_mut(&body.0) {
            rec.torque += torque;
        }
    }

    fn set_mass(&mut self, body: BodyHandle, mass: MassProperties) {
        if let Some(rec) = self.inner.lock().bodies.get_mut(&body.0) {
            rec.mass = mass;
        }
    }

    fn set_gravity_scale(&mut self, body: BodyHandle, scale: f32) {
        if let Some(rec) = self.inner.lock().bodies.get_mut(&body.0) {
            rec.gravity_scale = scale;
        }
    }

    fn set_gravity(&mut self, gravity: Vec3) {
        self.inner.lock().gravity = gravity;
    }

    fn step(&mut self, dt: f32, _max_substeps: u32, _substep_size: f32) -> Result<StepResults> {
        let mut inner = self.inner.lock();
        if inner.fail_next_step {
            inner.fail_next_step = false;
            return Err(PhysicsError::Engine("step refused".into()));
        }

        let gravity = inner.gravity;
        let mut updates = Vec::new();
        for (handle, rec) in inner.bodies.iter_mut() {
            let accel = gravity * rec.gravity_scale + rec.force / rec.mass.mass.max(1e-6);
            rec.velocity.linear += accel * dt;
            rec.transform.position += rec.velocity.linear * dt;
            rec.force = Vec3::ZERO;
            rec.torque = Vec3::ZERO;
            updates.push(BodyUpdate {
                body: BodyHandle(*handle),
                transform: rec.transform,
                velocity: rec.velocity,
            });
        }

        Ok(StepResults {
            updates,
            collisions: std::mem::take(&mut inner.queued_collisions),
        })
    }
}

impl StubEngine {
    pub fn queue_collision(&self, a: ShapeHandle, b: ShapeHandle) {
        self.inner.lock().queued_collisions.push(CollisionRecord {
            shape_a: a,
            shape_b: b,
            point: Vec3::ZERO,
            normal: Vec3::Z,
            penetration: 0.01,
        });
    }

    pub fn body_count(&self) -> usize {
        self.inner.lock().bodies.len()
    }

    pub fn shape_count(&self) -> usize {
        self.inner.lock().shapes.len()
    }

    pub fn body_mass(&self, body: BodyHandle) -> Option<f32> {
        self.inner.lock().bodies.get(&body.0).map(|rec| rec.mass.mass)
    }

    pub fn body_linear_velocity(&self, body: BodyHandle) -> Option<Vec3> {
        self.inner
            .lock()
            .bodies
            .get(&body.0)
            .map(|rec| rec.velocity.linear)
    }

    pub fn gravity_scale(&self, body: BodyHandle) -> Option<f32> {
        self.inner
            .lock()
            .bodies
            .get(&body.0)
            .map(|rec| rec.gravity_scale)
    }
}

/// Event sink recording every notification verbatim.
#[derive(Default)]
pub struct RecordingEvents {
    pub transforms: Vec<(ObjectId, Transform, Velocity)>,
    pub collisions: Vec<(ObjectId, Vec<CollisionEvent>)>,
    pub out_of_bounds: Vec<ObjectId>,
}

impl RecordingEvents {
    pub fn collision_calls_for(&self, id: ObjectId) -> Vec<usize> {
        self.collisions
            .iter()
            .filter(|(other, _)| *other == id)
            .map(|(_, events)| events.len())
            .collect()
    }

    pub fn clear(&mut self) {
        self.transforms.clear();
        self.collisions.clear();
        self.out_of_bounds.clear();
    }
}

impl WorldEvents for RecordingEvents {
    fn on_transform_update(&mut self, id: ObjectId, transform: Transform, velocity: Velocity) {
        self.transforms.push((id, transform, velocity));
    }

    fn on_collisions(&mut self, id: ObjectId, events: &[CollisionEvent]) {
        self.collisions.push((id, events.to_vec()));
    }

    fn on_out_of_bounds(&mut self, id: ObjectId, _last_position: Vec3) {
        self.out_of_bounds.push(id);
    }
}

/// A world over the stub engine plus a probe for inspecting native state.
pub fn stub_world() -> (RegionWorld, StubEngine) {
    let engine = StubEngine::default();
    let probe = engine.clone();
    let world = RegionWorld::new(
        WorldParams::default(),
        Box::new(engine),
        Box::new(NoMesher),
        Box::new(FlatHeights::default()),
    );
    (world, probe)
}

pub const DT: f32 = 1.0 / 45.0;

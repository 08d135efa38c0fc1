//! Region physics core for a multi-user virtual world server.
//!
//! This crate sits between the region host and a native rigid-body engine:
//! it owns the object roster, derives collision shapes and masses from prim
//! descriptors, composes linksets into compound bodies, runs the scripted
//! vehicle model, and coordinates the per-tick simulation step. All mutation
//! from other threads flows through a deferred taint queue drained at the
//! start of each tick.

pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod linkset;
pub mod taint;
pub mod utils;
pub mod vehicle;
pub mod world;

pub use glam::{Mat3, Quat, Vec3};

pub use config::WorldParams;
pub use crate::core::{
    object::{ObjectKind, PhysicalObject},
    shape::{HollowShape, PrimShape, ProfileFamily},
    types::{MassProperties, Transform, Velocity},
};
pub use engine::{
    BodyHandle, FlatHeights, HeightQuery, MeshData, MeshLod, MeshProducer, NativeEngine, NoMesher,
    ShapeHandle, ShapeSpec,
};
pub use error::{PhysicsError, Result};
pub use utils::allocator::{Arena, ObjectId};
pub use vehicle::{FloatParam, VectorParam, VehicleState, VehicleType};
pub use world::{
    collisions::{CollisionEvent, CollisionSource},
    RegionHandle, RegionWorld, WorldEvents,
};

/// High-level convenience wrapper that owns a [`RegionWorld`].
pub struct PhysicsService {
    world: RegionWorld,
}

impl PhysicsService {
    /// Creates a service over the given native engine with default world
    /// parameters, no mesh producer, and a flat terrain.
    pub fn new(engine: Box<dyn NativeEngine + Send>) -> Self {
        Self {
            world: RegionWorld::new(
                WorldParams::default(),
                engine,
                Box::new(NoMesher),
                Box::new(FlatHeights::default()),
            ),
        }
    }

    /// Creates a service with explicit collaborators.
    pub fn with_parts(
        params: WorldParams,
        engine: Box<dyn NativeEngine + Send>,
        mesher: Box<dyn MeshProducer + Send>,
        heights: Box<dyn HeightQuery + Send>,
    ) -> Self {
        Self {
            world: RegionWorld::new(params, engine, mesher, heights),
        }
    }

    /// Cross-thread mutation surface; cloneable and `Send`.
    pub fn handle(&self) -> RegionHandle {
        self.world.handle()
    }

    /// Registers a prim and returns its id immediately; native realization
    /// happens at the next step.
    pub fn add_prim(
        &mut self,
        transform: Transform,
        size: Vec3,
        shape: PrimShape,
        physical: bool,
    ) -> ObjectId {
        self.world.add_prim(transform, size, shape, physical)
    }

    /// Registers an avatar capsule at the given position.
    pub fn add_avatar(&mut self, position: Vec3) -> ObjectId {
        self.world.add_avatar(position)
    }

    /// Advances the simulation by `dt` seconds.
    pub fn step(&mut self, dt: f32, events: &mut dyn WorldEvents) {
        self.world.step(dt, events);
    }

    /// Immutable snapshot access to an object.
    pub fn object(&self, id: ObjectId) -> Option<&PhysicalObject> {
        self.world.object(id)
    }

    pub fn world(&self) -> &RegionWorld {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut RegionWorld {
        &mut self.world
    }
}

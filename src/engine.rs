//! Contracts for the external collaborators: the native rigid-body engine,
//! the mesh producer, and the terrain/water height queries.
//!
//! The engine's world handle is exclusively owned by the simulation
//! coordinator; no trait method here is ever invoked off the tick context.

use glam::Vec3;

use crate::core::shape::PrimShape;
use crate::core::types::{MassProperties, Transform, Velocity};
use crate::error::Result;

/// Opaque native dynamic-body handle. Bodies exist only while an object is
/// dynamic; static geometry is a placed shape without a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyHandle(pub u32);

/// Opaque native collision-shape handle. Values below
/// [`crate::config::TERRAIN_ID_LIMIT`] are reserved for terrain/water
/// geometry owned by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShapeHandle(pub u32);

/// Geometry request handed to the native engine.
#[derive(Debug, Clone)]
pub enum ShapeSpec {
    Box { half_extents: Vec3 },
    Sphere { radius: f32 },
    Cylinder { radius: f32, height: f32 },
    /// Avatar capsule aligned along Z.
    Capsule { radius: f32, height: f32 },
    Mesh { data: MeshData },
    /// Linkset compound: member shapes at local offsets in the root frame.
    /// A shape referenced by a compound is owned by the compound and must be
    /// excluded from standalone collision until the compound is destroyed.
    Compound { children: Vec<(Transform, ShapeHandle)> },
}

/// Vertex/index buffers produced for sculpted or mesh prims.
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub vertices: Vec<Vec3>,
    pub indices: Vec<[u32; 3]>,
}

/// Parameters for creating a native dynamic body over an existing shape.
#[derive(Debug, Clone)]
pub struct BodySpec {
    pub shape: ShapeHandle,
    pub transform: Transform,
    pub mass: MassProperties,
    pub friction: f32,
    pub restitution: f32,
    pub collision_category: u32,
    pub collision_mask: u32,
    pub collision_margin: f32,
    /// Deactivation thresholds below which the native engine may sleep the
    /// body.
    pub linear_sleep_threshold: f32,
    pub angular_sleep_threshold: f32,
}

/// One raw collision pair reported by the native step, identified by the
/// colliding shapes (static geometry collides without a body). Transient;
/// never persisted past dispatch.
#[derive(Debug, Clone, Copy)]
pub struct CollisionRecord {
    pub shape_a: ShapeHandle,
    pub shape_b: ShapeHandle,
    pub point: Vec3,
    pub normal: Vec3,
    pub penetration: f32,
}

/// Transform readback for one body that moved during the step.
#[derive(Debug, Clone, Copy)]
pub struct BodyUpdate {
    pub body: BodyHandle,
    pub transform: Transform,
    pub velocity: Velocity,
}

/// Everything a native step call reports back.
#[derive(Debug, Clone, Default)]
pub struct StepResults {
    pub updates: Vec<BodyUpdate>,
    pub collisions: Vec<CollisionRecord>,
}

/// The native rigid-body engine, consumed as a small contract. Creation
/// failures are recoverable: the object stays geometry-less and the request
/// is retried on a later taint.
pub trait NativeEngine {
    fn create_shape(&mut self, spec: ShapeSpec) -> Result<ShapeHandle>;
    fn destroy_shape(&mut self, shape: ShapeHandle);

    /// Places a shape as static geometry. A shape later wrapped by a body
    /// follows the body instead.
    fn set_shape_transform(&mut self, shape: ShapeHandle, transform: Transform);
    fn set_shape_filter(&mut self, shape: ShapeHandle, category: u32, mask: u32);

    fn create_body(&mut self, spec: BodySpec) -> Result<BodyHandle>;
    fn destroy_body(&mut self, body: BodyHandle);

    fn set_transform(&mut self, body: BodyHandle, transform: Transform);
    fn get_transform(&self, body: BodyHandle) -> Option<Transform>;

    fn set_linear_velocity(&mut self, body: BodyHandle, velocity: Vec3);
    fn set_angular_velocity(&mut self, body: BodyHandle, velocity: Vec3);

    fn add_force(&mut self, body: BodyHandle, force: Vec3);
    fn add_torque(&mut self, body: BodyHandle, torque: Vec3);

    fn set_mass(&mut self, body: BodyHandle, mass: MassProperties);

    /// Per-body gravity multiplier; buoyant objects scale it down, vehicles
    /// zero it and integrate their own gravity/buoyancy force.
    fn set_gravity_scale(&mut self, body: BodyHandle, scale: f32);
    fn set_gravity(&mut self, gravity: Vec3);

    /// Advances the native world. A failure degrades to an empty
    /// [`StepResults`] for the frame at the call site; it never aborts the
    /// simulation loop.
    fn step(&mut self, dt: f32, max_substeps: u32, substep_size: f32) -> Result<StepResults>;
}

/// Level of detail requested from the mesh producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MeshLod {
    Low,
    #[default]
    Medium,
    High,
}

/// Opaque mesh producer for sculpted/complex prim shapes. `None` signals
/// "use a primitive shape instead".
pub trait MeshProducer {
    fn create_mesh(
        &self,
        shape: &PrimShape,
        size: Vec3,
        lod: MeshLod,
        physical: bool,
    ) -> Option<MeshData>;
}

/// Terrain and water height queries used by vehicle hover.
pub trait HeightQuery {
    fn terrain_height_at(&self, x: f32, y: f32) -> f32;
    fn water_level(&self) -> f32;
}

/// Mesh producer that always falls back to primitive shapes.
pub struct NoMesher;

impl MeshProducer for NoMesher {
    fn create_mesh(
        &self,
        _shape: &PrimShape,
        _size: Vec3,
        _lod: MeshLod,
        _physical: bool,
    ) -> Option<MeshData> {
        None
    }
}

/// Flat world: terrain at a fixed height, water at a fixed level.
pub struct FlatHeights {
    pub terrain: f32,
    pub water: f32,
}

impl Default for FlatHeights {
    fn default() -> Self {
        Self {
            terrain: 0.0,
            water: 20.0,
        }
    }
}

impl HeightQuery for FlatHeights {
    fn terrain_height_at(&self, _x: f32, _y: f32) -> f32 {
        self.terrain
    }

    fn water_level(&self) -> f32 {
        self.water
    }
}

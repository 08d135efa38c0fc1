//! Per-world configuration constants and the loadable parameter block.

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Default gravity vector applied by the native engine (Z-up world).
pub const DEFAULT_GRAVITY: [f32; 3] = [0.0, 0.0, -9.81];

/// Default region heartbeat timestep (in seconds).
pub const DEFAULT_TIME_STEP: f32 = 1.0 / 45.0;

/// Default material density used when a shape does not override it (kg/m³-ish
/// virtual units; a 1 m cube weighs this much).
pub const DEFAULT_DENSITY: f32 = 10.0;

/// Smallest mass a dynamic body may carry; native engines reject zero mass.
pub const MIN_OBJECT_MASS: f32 = 0.0001;

/// Default ceiling for any single object's (or linkset root's) total mass.
pub const DEFAULT_MAX_OBJECT_MASS: f32 = 10_000.0;

/// Default substepping handed to the native step call.
pub const DEFAULT_MAX_SUBSTEPS: u32 = 10;
pub const DEFAULT_SUBSTEP_SIZE: f32 = 1.0 / 60.0;

/// Default collision margin added around shapes.
pub const DEFAULT_COLLISION_MARGIN: f32 = 0.04;

/// Default avatar capsule dimensions.
pub const DEFAULT_AVATAR_CAPSULE_RADIUS: f32 = 0.37;
pub const DEFAULT_AVATAR_CAPSULE_HEIGHT: f32 = 1.5;

/// Default square region edge length, in meters.
pub const DEFAULT_REGION_EXTENT: f32 = 256.0;

/// Consecutive position-resolution failures tolerated before an object is
/// reported out of bounds.
pub const DEFAULT_POSITION_FAILURE_LIMIT: u32 = 5;

/// Native body handles below this value are reserved for terrain and water
/// geometry; collision pairs touching them are attributed as ground contacts.
pub const TERRAIN_ID_LIMIT: u32 = 256;

/// Recursion bound when summing linkset masses over a malformed graph.
pub const MAX_LINK_DEPTH: u32 = 32;

/// World parameter block consumed by the core. Loaded by the host from region
/// configuration; every field can also be adjusted per object through taints
/// where it makes sense (density, friction, restitution, buoyancy).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldParams {
    pub gravity: Vec3,
    pub default_density: f32,
    pub default_friction: f32,
    pub default_restitution: f32,
    pub avatar_capsule_radius: f32,
    pub avatar_capsule_height: f32,
    pub max_object_mass: f32,
    pub max_substeps: u32,
    pub substep_size: f32,
    pub collision_margin: f32,
    pub linear_sleep_threshold: f32,
    pub angular_sleep_threshold: f32,
    pub region_extent: f32,
    pub position_failure_limit: u32,
}

impl Default for WorldParams {
    fn default() -> Self {
        Self {
            gravity: Vec3::from_slice(&DEFAULT_GRAVITY),
            default_density: DEFAULT_DENSITY,
            default_friction: 0.5,
            default_restitution: 0.1,
            avatar_capsule_radius: DEFAULT_AVATAR_CAPSULE_RADIUS,
            avatar_capsule_height: DEFAULT_AVATAR_CAPSULE_HEIGHT,
            max_object_mass: DEFAULT_MAX_OBJECT_MASS,
            max_substeps: DEFAULT_MAX_SUBSTEPS,
            substep_size: DEFAULT_SUBSTEP_SIZE,
            collision_margin: DEFAULT_COLLISION_MARGIN,
            linear_sleep_threshold: 0.8,
            angular_sleep_threshold: 1.0,
            region_extent: DEFAULT_REGION_EXTENT,
            position_failure_limit: DEFAULT_POSITION_FAILURE_LIMIT,
        }
    }
}

impl WorldParams {
    /// Clamps a proposed mass into the legal range for dynamic bodies.
    pub fn clamp_mass(&self, mass: f32) -> f32 {
        mass.clamp(MIN_OBJECT_MASS, self.max_object_mass)
    }
}

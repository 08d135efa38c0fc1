//! Per-object simulation state mirrored from the native engine.

use glam::{Quat, Vec3};
use log::warn;

use crate::config::WorldParams;
use crate::core::shape::{avatar_mass_properties, PrimShape};
use crate::core::types::{MassProperties, Transform, Velocity};
use crate::engine::{BodyHandle, ShapeHandle};
use crate::utils::allocator::ObjectId;
use crate::utils::math::{quat_finite, vec_finite};

/// Collision filter layers handed to the native engine.
pub mod category {
    pub const STATIC: u32 = 1;
    pub const DYNAMIC: u32 = 1 << 1;
    pub const AVATAR: u32 = 1 << 2;
    pub const GROUND: u32 = 1 << 3;
    pub const ALL: u32 = u32::MAX;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Prim,
    Avatar,
}

/// One simulated body: a prim or an avatar capsule.
///
/// Outside the taint-flush window exactly one of `{body: None}` (static
/// geometry only) and `{body: Some}` (dynamic) holds; the flush is the only
/// place that transitions between the two.
pub struct PhysicalObject {
    pub id: ObjectId,
    pub kind: ObjectKind,
    pub transform: Transform,
    pub velocity: Velocity,
    /// Derived from successive readbacks, never authoritative.
    pub acceleration: Vec3,
    pub size: Vec3,
    pub shape: PrimShape,
    /// Derived mass; refreshed by the mass-settle post-taint.
    pub mass: f32,
    pub mass_override: Option<f32>,
    pub is_physical: bool,
    pub is_selected: bool,
    pub friction: f32,
    pub restitution: f32,
    /// −1 doubles gravity, +1 cancels it; applied as a gravity scale for
    /// non-vehicle bodies.
    pub buoyancy: f32,
    /// Per-axis rotation lock; a zero component freezes that world axis.
    pub angular_lock: Vec3,
    pub collision_category: u32,
    pub collision_mask: u32,
    /// Native geometry handle, owned by this object unless linked.
    pub shape_handle: Option<ShapeHandle>,
    /// Native dynamic body handle. Children of a linkset never own one.
    pub body: Option<BodyHandle>,
    pub position_failures: u32,
    pub out_of_bounds: bool,
}

impl PhysicalObject {
    pub fn prim(kind_size: Vec3, shape: PrimShape, params: &WorldParams) -> Self {
        Self::new(ObjectKind::Prim, kind_size, shape, params)
    }

    pub fn avatar(params: &WorldParams) -> Self {
        let size = Vec3::new(
            params.avatar_capsule_radius * 2.0,
            params.avatar_capsule_radius * 2.0,
            params.avatar_capsule_height,
        );
        let mut object = Self::new(ObjectKind::Avatar, size, PrimShape::default(), params);
        object.is_physical = true;
        object.collision_category = category::AVATAR;
        object
    }

    fn new(kind: ObjectKind, size: Vec3, shape: PrimShape, params: &WorldParams) -> Self {
        let mass = shape.mass(size, params);
        Self {
            id: ObjectId::default(),
            kind,
            transform: Transform::default(),
            velocity: Velocity::default(),
            acceleration: Vec3::ZERO,
            size,
            shape,
            mass,
            mass_override: None,
            is_physical: false,
            is_selected: false,
            friction: params.default_friction,
            restitution: params.default_restitution,
            buoyancy: 0.0,
            angular_lock: Vec3::ONE,
            collision_category: category::STATIC,
            collision_mask: category::ALL,
            shape_handle: None,
            body: None,
            position_failures: 0,
            out_of_bounds: false,
        }
    }

    pub fn is_avatar(&self) -> bool {
        self.kind == ObjectKind::Avatar
    }

    /// Whether this object should carry a native dynamic body. Selection
    /// suspends the body so edits don't fight the solver.
    pub fn wants_body(&self) -> bool {
        self.is_physical && !self.is_selected && !self.out_of_bounds
    }

    /// Effective mass after any host override.
    pub fn effective_mass(&self) -> f32 {
        self.mass_override.unwrap_or(self.mass)
    }

    /// Setter boundary for caller-supplied positions: non-finite values are
    /// rejected, the previous value is retained, and a diagnostic is logged.
    pub fn set_position(&mut self, position: Vec3) {
        if !vec_finite(position) {
            warn!("object {}: rejected non-finite position {position:?}", self.id);
            return;
        }
        self.transform.position = position;
        self.position_failures = 0;
    }

    pub fn set_orientation(&mut self, rotation: Quat) {
        if !quat_finite(rotation) {
            warn!("object {}: rejected non-finite orientation {rotation:?}", self.id);
            return;
        }
        self.transform.rotation = rotation.normalize();
    }

    pub fn set_linear_velocity(&mut self, linear: Vec3) {
        if !vec_finite(linear) {
            warn!("object {}: rejected non-finite velocity {linear:?}", self.id);
            return;
        }
        self.velocity.linear = linear;
    }

    pub fn set_angular_velocity(&mut self, angular: Vec3) {
        if !vec_finite(angular) {
            warn!("object {}: rejected non-finite angular velocity {angular:?}", self.id);
            return;
        }
        self.velocity.angular = angular;
    }

    pub fn set_size(&mut self, size: Vec3) {
        if !vec_finite(size) || size.min_element() <= 0.0 {
            warn!("object {}: rejected degenerate size {size:?}", self.id);
            return;
        }
        self.size = size;
    }

    pub fn set_buoyancy(&mut self, buoyancy: f32) {
        if !buoyancy.is_finite() {
            warn!("object {}: rejected non-finite buoyancy", self.id);
            return;
        }
        self.buoyancy = buoyancy.clamp(-1.0, 1.0);
    }

    /// Recomputes derived mass from the shape descriptor at current size.
    pub fn refresh_mass(&mut self, params: &WorldParams) {
        self.mass = self.shape.mass(self.size, params);
    }

    /// Mass and inertia handed to the engine for this object alone.
    pub fn mass_properties(&self, params: &WorldParams) -> MassProperties {
        let mass = params.clamp_mass(self.effective_mass());
        match self.kind {
            ObjectKind::Avatar => avatar_mass_properties(params, mass),
            ObjectKind::Prim => self.shape.mass_properties(self.size, mass),
        }
    }
}

use glam::{Mat3, Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Position and orientation of a body. Object size is carried separately on
/// the object; physics transforms are rigid.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

impl Transform {
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    pub fn from_position_rotation(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    /// Builds a homogeneous matrix representation of the transform.
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.rotation, self.position)
    }

    /// Applies a local transform on top of this one, returning the composition.
    pub fn combine(&self, local: &Transform) -> Transform {
        Transform {
            position: self.position + self.rotation * local.position,
            rotation: (self.rotation * local.rotation).normalize(),
        }
    }

    /// Expresses a world transform relative to this one.
    pub fn relative_to(&self, world: &Transform) -> Transform {
        let inv = self.rotation.inverse();
        Transform {
            position: inv * (world.position - self.position),
            rotation: (inv * world.rotation).normalize(),
        }
    }
}

/// Linear and angular velocity of a body.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Velocity {
    pub linear: Vec3,
    pub angular: Vec3,
}

/// Mass and inertia tensor handed to the native engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MassProperties {
    pub mass: f32,
    pub inertia: Mat3,
}

impl Default for MassProperties {
    fn default() -> Self {
        Self {
            mass: 1.0,
            inertia: Mat3::IDENTITY,
        }
    }
}

impl MassProperties {
    pub fn solid_box(size: Vec3, mass: f32) -> Self {
        let factor = mass / 12.0;
        let inertia = Mat3::from_diagonal(Vec3::new(
            factor * (size.y * size.y + size.z * size.z),
            factor * (size.x * size.x + size.z * size.z),
            factor * (size.x * size.x + size.y * size.y),
        ));
        Self { mass, inertia }
    }

    pub fn solid_sphere(radius: f32, mass: f32) -> Self {
        let value = 0.4 * mass * radius * radius;
        Self {
            mass,
            inertia: Mat3::from_diagonal(Vec3::splat(value)),
        }
    }
}

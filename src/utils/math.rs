//! Math helpers layered on top of `glam` for frame changes and inertia.

use glam::{Mat3, Quat, Vec3};

/// Rotates a world-frame vector into the body's local frame.
pub fn to_local(rotation: Quat, v: Vec3) -> Vec3 {
    rotation.inverse() * v
}

/// Rotates a body-local vector back into the world frame.
pub fn to_world(rotation: Quat, v: Vec3) -> Vec3 {
    rotation * v
}

/// True when every component is finite (no NaN/inf).
pub fn vec_finite(v: Vec3) -> bool {
    v.x.is_finite() && v.y.is_finite() && v.z.is_finite()
}

/// True for a finite, non-degenerate quaternion.
pub fn quat_finite(q: Quat) -> bool {
    q.x.is_finite()
        && q.y.is_finite()
        && q.z.is_finite()
        && q.w.is_finite()
        && q.length_squared() > 1e-6
}

/// Inertia tensor for a solid capsule aligned along Z, used for avatar bodies.
pub fn inertia_capsule(radius: f32, height: f32, mass: f32) -> Mat3 {
    let cylinder_mass = mass * 0.6;
    let cap_mass = (mass - cylinder_mass) / 2.0;

    let lateral = (1.0 / 12.0) * cylinder_mass * (3.0 * radius * radius + height * height)
        + 0.4 * cap_mass * radius * radius;
    let axial = 0.5 * cylinder_mass * radius * radius + 0.4 * cap_mass * radius * radius;

    Mat3::from_diagonal(Vec3::new(lateral, lateral, axial))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_world_round_trip() {
        let q = Quat::from_rotation_z(1.1);
        let v = Vec3::new(1.0, -2.0, 3.0);
        let back = to_world(q, to_local(q, v));
        assert!((back - v).length() < 1e-5);
    }

    #[test]
    fn finite_checks_catch_nan() {
        assert!(vec_finite(Vec3::ONE));
        assert!(!vec_finite(Vec3::new(f32::NAN, 0.0, 0.0)));
        assert!(quat_finite(Quat::IDENTITY));
        assert!(!quat_finite(Quat::from_xyzw(f32::INFINITY, 0.0, 0.0, 1.0)));
    }
}

//! Procedural shape descriptors and the volume/mass derivation used to feed
//! the native engine's mass primitives.

use glam::{Mat3, Vec3};
use serde::{Deserialize, Serialize};

use crate::config::{WorldParams, DEFAULT_DENSITY, MIN_OBJECT_MASS};
use crate::core::types::MassProperties;
use crate::utils::math::inertia_capsule;

const PI_OVER_4: f32 = core::f32::consts::FRAC_PI_4;
const PI_OVER_6: f32 = core::f32::consts::PI / 6.0;
/// Cross-section area factor of an equilateral triangle inscribed in the
/// unit square footprint.
const TRIANGLE_SECTION: f32 = 0.324_759_5;

/// Raw hollow control range accepted from callers (maps to 0..=100%).
pub const HOLLOW_CONTROL_MAX: u32 = 50_000;
/// Combined path cut is capped so a fully cut prim keeps a sliver of volume.
pub const MAX_PATH_CUT: f32 = 0.99;

/// Closed set of profile/path families the volume model distinguishes.
/// Anything more exotic is approximated by the nearest family after the mesh
/// producer has had its say about collision geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProfileFamily {
    /// Square profile, straight path: a box.
    Box,
    /// Circular profile, straight path: elliptic cylinder.
    Cylinder,
    /// Half-circle profile revolved along a curved path: ellipsoid.
    Sphere,
    /// Equilateral-triangle profile, straight path.
    Prism,
}

impl ProfileFamily {
    /// Base volume of the un-cut, un-hollowed shape at the given size.
    pub fn volume(self, size: Vec3) -> f32 {
        let block = size.x * size.y * size.z;
        match self {
            ProfileFamily::Box => block,
            ProfileFamily::Cylinder => PI_OVER_4 * block,
            ProfileFamily::Sphere => PI_OVER_6 * block,
            ProfileFamily::Prism => TRIANGLE_SECTION * block,
        }
    }

    /// Fraction of the base volume an inner hollow of the same family
    /// occupies per unit of hollow fraction.
    fn hollow_section(self) -> f32 {
        match self {
            ProfileFamily::Box => 1.0,
            ProfileFamily::Cylinder | ProfileFamily::Sphere => PI_OVER_4,
            ProfileFamily::Prism => 0.5,
        }
    }
}

/// Cross-section of the hollow carved out of a prim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum HollowShape {
    /// Follow the outer profile.
    #[default]
    Same,
    Square,
    Circle,
    Triangle,
}

impl HollowShape {
    fn section(self, outer: ProfileFamily) -> f32 {
        match self {
            HollowShape::Same => outer.hollow_section(),
            HollowShape::Square => 1.0,
            HollowShape::Circle => PI_OVER_4,
            HollowShape::Triangle => 0.5,
        }
    }
}

/// Procedural shape description attached to every prim object.
///
/// `hollow` is the raw 0..=50000 control integer the wire protocol carries;
/// `cut_begin`/`cut_end` are fractions of the path retained; `path_scale_*`
/// are taper percentages where 100 means no taper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimShape {
    pub profile: ProfileFamily,
    pub hollow_shape: HollowShape,
    pub hollow: u32,
    pub cut_begin: f32,
    pub cut_end: f32,
    pub path_scale_x: u16,
    pub path_scale_y: u16,
    pub density: f32,
    /// Sculpted/mesh prims ask the mesh producer for collision geometry; the
    /// volume model still prices them by their bounding family.
    pub needs_mesh: bool,
}

impl Default for PrimShape {
    fn default() -> Self {
        Self {
            profile: ProfileFamily::Box,
            hollow_shape: HollowShape::default(),
            hollow: 0,
            cut_begin: 0.0,
            cut_end: 1.0,
            path_scale_x: 100,
            path_scale_y: 100,
            density: DEFAULT_DENSITY,
            needs_mesh: false,
        }
    }
}

impl PrimShape {
    pub fn with_profile(profile: ProfileFamily) -> Self {
        Self {
            profile,
            ..Self::default()
        }
    }

    /// Hollow control mapped onto a 0..=1 fraction of the cross-section.
    pub fn hollow_fraction(&self) -> f32 {
        self.hollow.min(HOLLOW_CONTROL_MAX) as f32 * 2.0e-5
    }

    /// Fraction of the path removed by the begin/end cut, capped below 1.
    pub fn cut_fraction(&self) -> f32 {
        let begin = self.cut_begin.clamp(0.0, 1.0);
        let end = self.cut_end.clamp(0.0, 1.0);
        (begin + (1.0 - end)).clamp(0.0, MAX_PATH_CUT)
    }

    fn taper_factor(scale_percent: u16) -> f32 {
        // Linear taper from full section to `scale` section averages to the
        // midpoint; scales above 100% never increase the estimate.
        let t = (1.0 - scale_percent as f32 / 100.0).clamp(0.0, 1.0);
        1.0 - t / 2.0
    }

    /// Derived physical volume at the given world size. Never returns a
    /// non-positive value; degenerate inputs floor to a tiny epsilon so a
    /// zero-mass dynamic body can never reach the native engine.
    pub fn volume(&self, size: Vec3) -> f32 {
        let mut volume = self.profile.volume(size);

        let hollow = self.hollow_fraction();
        if hollow > 0.0 {
            let carved = self.hollow_shape.section(self.profile) * hollow;
            volume *= (1.0 - carved).max(0.0);
        }

        volume *= 1.0 - self.cut_fraction();
        volume *= Self::taper_factor(self.path_scale_x);
        volume *= Self::taper_factor(self.path_scale_y);

        volume.max(1e-6)
    }

    /// Mass of a standalone prim of this shape, clamped into the legal range.
    pub fn mass(&self, size: Vec3, params: &WorldParams) -> f32 {
        let density = if self.density.is_finite() && self.density > 0.0 {
            self.density
        } else {
            params.default_density
        };
        params.clamp_mass(self.volume(size) * density)
    }

    /// Inertia approximation the native engine can consume, matched to the
    /// nearest mass primitive for the family.
    pub fn mass_properties(&self, size: Vec3, mass: f32) -> MassProperties {
        match self.profile {
            ProfileFamily::Box | ProfileFamily::Prism => MassProperties::solid_box(size, mass),
            ProfileFamily::Sphere => {
                MassProperties::solid_sphere(size.max_element() * 0.5, mass)
            }
            ProfileFamily::Cylinder => {
                let radius = 0.5 * size.x.max(size.y);
                MassProperties {
                    mass,
                    inertia: cylinder_inertia(radius, size.z, mass),
                }
            }
        }
    }
}

fn cylinder_inertia(radius: f32, height: f32, mass: f32) -> Mat3 {
    let lateral = (1.0 / 12.0) * mass * (3.0 * radius * radius + height * height);
    let axial = 0.5 * mass * radius * radius;
    Mat3::from_diagonal(Vec3::new(lateral, lateral, axial))
}

/// Mass properties for an avatar capsule of the configured dimensions.
pub fn avatar_mass_properties(params: &WorldParams, mass: f32) -> MassProperties {
    MassProperties {
        mass: mass.max(MIN_OBJECT_MASS),
        inertia: inertia_capsule(
            params.avatar_capsule_radius,
            params.avatar_capsule_height,
            mass,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> WorldParams {
        WorldParams::default()
    }

    #[test]
    fn unit_cube_mass_is_density() {
        let shape = PrimShape::default();
        let mass = shape.mass(Vec3::ONE, &params());
        assert!((mass - DEFAULT_DENSITY).abs() < 1e-4);
    }

    #[test]
    fn square_hollow_halves_cube_mass() {
        let shape = PrimShape {
            hollow_shape: HollowShape::Square,
            hollow: 25_000,
            ..PrimShape::default()
        };
        let mass = shape.mass(Vec3::ONE, &params());
        assert!((mass - DEFAULT_DENSITY * 0.5).abs() < 1e-3);
    }

    #[test]
    fn full_cut_keeps_positive_volume() {
        let shape = PrimShape {
            cut_begin: 1.0,
            cut_end: 0.0,
            ..PrimShape::default()
        };
        assert!(shape.volume(Vec3::ONE) > 0.0);
        assert!(shape.cut_fraction() <= MAX_PATH_CUT);
    }

    #[test]
    fn sphere_volume_below_box() {
        let sphere = ProfileFamily::Sphere.volume(Vec3::ONE);
        let cylinder = ProfileFamily::Cylinder.volume(Vec3::ONE);
        let cube = ProfileFamily::Box.volume(Vec3::ONE);
        assert!(sphere < cylinder && cylinder < cube);
    }

    #[test]
    fn taper_reduces_volume_monotonically() {
        let base = PrimShape::default();
        let tapered = PrimShape {
            path_scale_x: 0,
            path_scale_y: 0,
            ..PrimShape::default()
        };
        assert!(tapered.volume(Vec3::ONE) < base.volume(Vec3::ONE));
        // a 0% taper on both axes leaves a quarter of the block
        assert!((tapered.volume(Vec3::ONE) - 0.25).abs() < 1e-4);
    }

    #[test]
    fn mass_always_in_legal_range() {
        let p = params();
        let profiles = [
            ProfileFamily::Box,
            ProfileFamily::Cylinder,
            ProfileFamily::Sphere,
            ProfileFamily::Prism,
        ];
        for profile in profiles {
            for hollow in [0u32, 10_000, 50_000, 80_000] {
                for cut in [(0.0, 1.0), (0.5, 1.0), (1.0, 0.0)] {
                    let shape = PrimShape {
                        profile,
                        hollow,
                        cut_begin: cut.0,
                        cut_end: cut.1,
                        ..PrimShape::default()
                    };
                    for size in [Vec3::splat(0.01), Vec3::ONE, Vec3::splat(64.0)] {
                        let mass = shape.mass(size, &p);
                        assert!(mass > 0.0, "mass must stay positive");
                        assert!(mass <= p.max_object_mass);
                    }
                }
            }
        }
    }
}

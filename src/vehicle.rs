//! Vehicle dynamics: per-tick integration of linear/angular motors, friction
//! decay, hover/buoyancy, and vertical attraction.
//!
//! The update is a pure function over a [`VehicleState`] and a snapshot of
//! the body; it runs strictly inside the taint-flush window, before the
//! native step, and writes its results back in one batch.

use glam::{Quat, Vec3};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::engine::HeightQuery;
use crate::utils::math::{to_local, to_world, vec_finite};

/// Timescales below this clamp up to avoid divide-by-near-zero instability.
pub const TIMESCALE_FLOOR: f32 = 0.01;
/// Timescales at or above this are treated as "effectively disabled".
pub const TIMESCALE_CUTOFF: f32 = 300.0;

/// Below this magnitude a decaying motor steps linearly to zero instead of
/// decaying asymptotically.
const MOTOR_DECAY_BAND: f32 = 0.05;

/// Behavior flag bits, set per vehicle type and adjustable individually.
pub mod flags {
    /// Vertical attraction corrects roll only, never pitch.
    pub const LIMIT_ROLL_ONLY: u32 = 1;
    pub const HOVER_WATER_ONLY: u32 = 1 << 1;
    pub const HOVER_TERRAIN_ONLY: u32 = 1 << 2;
    pub const HOVER_GLOBAL_HEIGHT: u32 = 1 << 3;
    pub const HOVER_UP_ONLY: u32 = 1 << 4;
    /// The linear motor may never command upward motion.
    pub const LIMIT_MOTOR_UP: u32 = 1 << 5;

    pub const HOVER_ANY: u32 = HOVER_WATER_ONLY | HOVER_TERRAIN_ONLY | HOVER_GLOBAL_HEIGHT;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum VehicleType {
    #[default]
    None,
    Sled,
    Car,
    Boat,
    Airplane,
    Balloon,
}

/// Individually settable scalar parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatParam {
    LinearMotorTimescale,
    LinearMotorDecayTimescale,
    AngularMotorTimescale,
    AngularMotorDecayTimescale,
    HoverHeight,
    HoverEfficiency,
    HoverTimescale,
    Buoyancy,
    VerticalAttractionEfficiency,
    VerticalAttractionTimescale,
}

/// Individually settable vector parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorParam {
    LinearMotorDirection,
    AngularMotorDirection,
    LinearFrictionTimescale,
    AngularFrictionTimescale,
}

/// Full vehicle parameter block plus the decayed-motor accumulators.
/// Mutated only inside the per-tick update and the setter taints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleState {
    pub vehicle_type: VehicleType,
    pub flags: u32,

    /// Motor target the model attacks toward, decaying over time.
    pub linear_motor: Vec3,
    pub linear_motor_timescale: f32,
    pub linear_motor_decay: f32,
    pub linear_friction: Vec3,

    pub angular_motor: Vec3,
    pub angular_motor_timescale: f32,
    pub angular_motor_decay: f32,
    pub angular_friction: Vec3,

    pub hover_height: f32,
    pub hover_efficiency: f32,
    pub hover_timescale: f32,
    pub buoyancy: f32,

    pub vertical_attraction_efficiency: f32,
    pub vertical_attraction_timescale: f32,
}

impl Default for VehicleState {
    fn default() -> Self {
        Self {
            vehicle_type: VehicleType::None,
            flags: 0,
            linear_motor: Vec3::ZERO,
            linear_motor_timescale: TIMESCALE_CUTOFF,
            linear_motor_decay: 120.0,
            linear_friction: Vec3::splat(TIMESCALE_CUTOFF),
            angular_motor: Vec3::ZERO,
            angular_motor_timescale: TIMESCALE_CUTOFF,
            angular_motor_decay: 120.0,
            angular_friction: Vec3::splat(TIMESCALE_CUTOFF),
            hover_height: 0.0,
            hover_efficiency: 0.0,
            hover_timescale: TIMESCALE_CUTOFF,
            buoyancy: 0.0,
            vertical_attraction_efficiency: 0.0,
            vertical_attraction_timescale: TIMESCALE_CUTOFF,
        }
    }
}

impl VehicleState {
    pub fn is_active(&self) -> bool {
        self.vehicle_type != VehicleType::None
    }

    /// Selecting a type resets every constant to the per-type default table;
    /// per-parameter setters afterwards override individual fields.
    pub fn set_type(&mut self, vehicle_type: VehicleType) {
        *self = match vehicle_type {
            VehicleType::None => Self::default(),
            VehicleType::Sled => Self {
                vehicle_type,
                flags: flags::LIMIT_ROLL_ONLY | flags::LIMIT_MOTOR_UP,
                linear_motor_timescale: 1000.0,
                linear_motor_decay: 120.0,
                linear_friction: Vec3::new(30.0, 1.0, 1000.0),
                angular_motor_timescale: 1000.0,
                angular_motor_decay: 120.0,
                angular_friction: Vec3::splat(1000.0),
                hover_efficiency: 10.0,
                hover_timescale: 10.0,
                buoyancy: 0.0,
                vertical_attraction_efficiency: 1.0,
                vertical_attraction_timescale: 1000.0,
                ..Self::default()
            },
            VehicleType::Car => Self {
                vehicle_type,
                flags: flags::LIMIT_ROLL_ONLY | flags::HOVER_UP_ONLY | flags::LIMIT_MOTOR_UP,
                linear_motor_timescale: 1.0,
                linear_motor_decay: 60.0,
                linear_friction: Vec3::new(100.0, 2.0, 1000.0),
                angular_motor_timescale: 1.0,
                angular_motor_decay: 0.8,
                angular_friction: Vec3::splat(1000.0),
                hover_efficiency: 0.0,
                hover_timescale: 1000.0,
                buoyancy: -0.2,
                vertical_attraction_efficiency: 1.0,
                vertical_attraction_timescale: 10.0,
                ..Self::default()
            },
            VehicleType::Boat => Self {
                vehicle_type,
                flags: flags::HOVER_WATER_ONLY | flags::LIMIT_MOTOR_UP,
                linear_motor_timescale: 5.0,
                linear_motor_decay: 60.0,
                linear_friction: Vec3::new(10.0, 3.0, 2.0),
                angular_motor_timescale: 4.0,
                angular_motor_decay: 4.0,
                angular_friction: Vec3::splat(10.0),
                hover_height: 0.0,
                hover_efficiency: 0.5,
                hover_timescale: 2.0,
                buoyancy: 1.0,
                vertical_attraction_efficiency: 0.5,
                vertical_attraction_timescale: 5.0,
                ..Self::default()
            },
            VehicleType::Airplane => Self {
                vehicle_type,
                flags: flags::LIMIT_ROLL_ONLY,
                linear_motor_timescale: 2.0,
                linear_motor_decay: 60.0,
                linear_friction: Vec3::new(200.0, 10.0, 5.0),
                angular_motor_timescale: 4.0,
                angular_motor_decay: 4.0,
                angular_friction: Vec3::splat(20.0),
                hover_efficiency: 0.5,
                hover_timescale: 1000.0,
                buoyancy: 0.0,
                vertical_attraction_efficiency: 0.9,
                vertical_attraction_timescale: 2.0,
                ..Self::default()
            },
            VehicleType::Balloon => Self {
                vehicle_type,
                flags: flags::HOVER_GLOBAL_HEIGHT,
                linear_motor_timescale: 5.0,
                linear_motor_decay: 60.0,
                linear_friction: Vec3::splat(5.0),
                angular_motor_timescale: 6.0,
                angular_motor_decay: 10.0,
                angular_friction: Vec3::splat(10.0),
                hover_height: 5.0,
                hover_efficiency: 0.8,
                hover_timescale: 10.0,
                buoyancy: 1.0,
                vertical_attraction_efficiency: 1.0,
                vertical_attraction_timescale: 100.0,
                ..Self::default()
            },
        };
    }

    pub fn set_float(&mut self, param: FloatParam, value: f32) {
        if !value.is_finite() {
            warn!("vehicle: rejected non-finite {param:?}");
            return;
        }
        match param {
            FloatParam::LinearMotorTimescale => self.linear_motor_timescale = value,
            FloatParam::LinearMotorDecayTimescale => self.linear_motor_decay = value,
            FloatParam::AngularMotorTimescale => self.angular_motor_timescale = value,
            FloatParam::AngularMotorDecayTimescale => self.angular_motor_decay = value,
            FloatParam::HoverHeight => self.hover_height = value,
            FloatParam::HoverEfficiency => self.hover_efficiency = value.clamp(0.0, 1.0),
            FloatParam::HoverTimescale => self.hover_timescale = value,
            FloatParam::Buoyancy => self.buoyancy = value.clamp(-1.0, 1.0),
            FloatParam::VerticalAttractionEfficiency => {
                self.vertical_attraction_efficiency = value.clamp(0.0, 1.0)
            }
            FloatParam::VerticalAttractionTimescale => {
                self.vertical_attraction_timescale = value
            }
        }
    }

    pub fn set_vector(&mut self, param: VectorParam, value: Vec3) {
        if !vec_finite(value) {
            warn!("vehicle: rejected non-finite {param:?}");
            return;
        }
        match param {
            VectorParam::LinearMotorDirection => self.linear_motor = value,
            VectorParam::AngularMotorDirection => self.angular_motor = value,
            VectorParam::LinearFrictionTimescale => self.linear_friction = value,
            VectorParam::AngularFrictionTimescale => self.angular_friction = value,
        }
    }

    pub fn set_flag(&mut self, flag: u32, enabled: bool) {
        if enabled {
            self.flags |= flag;
        } else {
            self.flags &= !flag;
        }
    }

    fn has(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }
}

/// Snapshot of the body handed to the per-tick update.
pub struct VehicleStepInput<'a> {
    pub dt: f32,
    pub mass: f32,
    pub position: Vec3,
    pub rotation: Quat,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    pub gravity: Vec3,
    pub heights: &'a dyn HeightQuery,
}

/// One writes-per-tick batch the coordinator applies to the native body.
#[derive(Debug, Clone, Copy)]
pub struct VehicleStepOutput {
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    pub force: Vec3,
}

/// Effective timescale: clamped at the floor and at the timestep; `None`
/// when the axis is effectively disabled.
fn timescale(ts: f32, dt: f32) -> Option<f32> {
    if ts >= TIMESCALE_CUTOFF {
        None
    } else {
        Some(ts.max(TIMESCALE_FLOOR).max(dt))
    }
}

/// Decays one motor component toward zero. Small residuals step linearly so
/// the motor terminates instead of drifting asymptotically; larger values
/// decay by a logarithmically-scaled step.
fn decay_component(v: f32, factor: f32) -> f32 {
    if v == 0.0 {
        return 0.0;
    }
    if v.abs() < MOTOR_DECAY_BAND {
        let step = factor * MOTOR_DECAY_BAND;
        return v.signum() * (v.abs() - step).max(0.0);
    }
    let scale = (1.0 - factor * (1.0 + (1.0 + v.abs()).log10())).clamp(0.0, 1.0);
    v * scale
}

fn decay_motor(motor: Vec3, decay_ts: f32, dt: f32) -> Vec3 {
    let Some(ts) = timescale(decay_ts, dt) else {
        return motor;
    };
    let factor = dt / ts;
    Vec3::new(
        decay_component(motor.x, factor),
        decay_component(motor.y, factor),
        decay_component(motor.z, factor),
    )
}

/// Attack-toward-target correction followed by per-axis friction, in the
/// body's local frame.
fn motor_and_friction(
    mut local: Vec3,
    motor: Vec3,
    motor_ts: f32,
    friction: Vec3,
    dt: f32,
) -> Vec3 {
    if motor.length_squared() > 1e-8 || local.length_squared() > 1e-8 {
        if let Some(ts) = timescale(motor_ts, dt) {
            let error = motor - local;
            local += error / (ts / dt);
        }
    }

    for axis in 0..3 {
        if let Some(ts) = timescale(friction[axis], dt) {
            local[axis] -= local[axis] / (ts / dt);
        }
    }
    local
}

/// Hover target height for this tick, or `None` when no hover mode is set.
/// With HOVER_UP_ONLY the target never commands a downward correction.
fn hover_target(state: &VehicleState, input: &VehicleStepInput<'_>) -> Option<f32> {
    if !state.has(flags::HOVER_ANY) {
        return None;
    }
    let base = if state.has(flags::HOVER_WATER_ONLY) {
        input.heights.water_level()
    } else if state.has(flags::HOVER_TERRAIN_ONLY) {
        input
            .heights
            .terrain_height_at(input.position.x, input.position.y)
    } else {
        0.0
    };
    let mut target = base + state.hover_height;
    if state.has(flags::HOVER_UP_ONLY) && input.position.z > target {
        target = input.position.z;
    }
    Some(target)
}

/// Advances the vehicle model one tick and returns the velocity/force batch
/// to apply to the native body.
pub fn step(state: &mut VehicleState, input: &VehicleStepInput<'_>) -> VehicleStepOutput {
    let dt = input.dt;

    // Linear: world velocity into the body frame, decay the motor, attack,
    // rub off friction, back to world.
    state.linear_motor = decay_motor(state.linear_motor, state.linear_motor_decay, dt);
    let mut linear_target = state.linear_motor;
    if state.has(flags::LIMIT_MOTOR_UP) {
        linear_target.z = linear_target.z.min(0.0);
    }
    let local_linear = to_local(input.rotation, input.linear_velocity);
    let corrected = motor_and_friction(
        local_linear,
        linear_target,
        state.linear_motor_timescale,
        state.linear_friction,
        dt,
    );
    let mut world_linear = to_world(input.rotation, corrected);

    // Gravity/buoyancy force; buoyancy −1 doubles gravity, +1 cancels it.
    let force = input.gravity * input.mass * (1.0 - state.buoyancy);

    // Hover replaces the vertical component with a height correction rather
    // than summing a spring force, to avoid oscillation.
    if let Some(target) = hover_target(state, input) {
        if let Some(ts) = timescale(state.hover_timescale, dt) {
            let error = target - input.position.z;
            world_linear.z = error / (ts / dt) * state.hover_efficiency.max(0.0);
        }
    }

    // Angular: same decay/attack/friction treatment in the local frame.
    state.angular_motor = decay_motor(state.angular_motor, state.angular_motor_decay, dt);
    let local_angular = to_local(input.rotation, input.angular_velocity);
    let corrected_angular = motor_and_friction(
        local_angular,
        state.angular_motor,
        state.angular_motor_timescale,
        state.angular_friction,
        dt,
    );
    let mut world_angular = to_world(input.rotation, corrected_angular);

    // Vertical attraction nudges the body's up-axis toward world-up. The
    // axis swap (X ← Y-error, Y ← −X-error) is a compatibility contract;
    // yaw is never affected. LIMIT_ROLL_ONLY drops the pitch correction so
    // only roll rights itself.
    if state.vertical_attraction_efficiency > 0.0 {
        if let Some(ts) = timescale(state.vertical_attraction_timescale, dt) {
            let up = input.rotation * Vec3::Z;
            let gain = state.vertical_attraction_efficiency / (ts / dt);
            world_angular.x += up.y * gain;
            if !state.has(flags::LIMIT_ROLL_ONLY) {
                world_angular.y += -up.x * gain;
            }
        }
    }

    VehicleStepOutput {
        linear_velocity: world_linear,
        angular_velocity: world_angular,
        force,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::FlatHeights;

    fn input<'a>(heights: &'a FlatHeights) -> VehicleStepInput<'a> {
        VehicleStepInput {
            dt: 1.0 / 45.0,
            mass: 100.0,
            position: Vec3::new(128.0, 128.0, 25.0),
            rotation: Quat::IDENTITY,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            gravity: Vec3::new(0.0, 0.0, -9.81),
            heights,
        }
    }

    #[test]
    fn type_selection_resets_overrides() {
        let mut state = VehicleState::default();
        state.set_type(VehicleType::Car);
        state.set_float(FloatParam::LinearMotorTimescale, 7.0);
        assert_eq!(state.linear_motor_timescale, 7.0);

        state.set_type(VehicleType::Car);
        assert_eq!(state.linear_motor_timescale, 1.0);
    }

    #[test]
    fn motor_decay_terminates_at_zero() {
        let mut motor = Vec3::new(12.0, 0.0, 0.0);
        for _ in 0..20_000 {
            motor = decay_motor(motor, 1.0, 1.0 / 45.0);
        }
        assert_eq!(motor, Vec3::ZERO);
    }

    #[test]
    fn hover_up_only_never_pulls_down() {
        let heights = FlatHeights {
            terrain: 10.0,
            water: 20.0,
        };
        let mut state = VehicleState::default();
        state.set_type(VehicleType::Car);
        state.set_flag(flags::HOVER_TERRAIN_ONLY, true);
        state.set_float(FloatParam::HoverHeight, 2.0);

        // already above terrain+hover: target equals current height
        let snapshot = input(&heights);
        let target = hover_target(&state, &snapshot).expect("hover mode set");
        assert_eq!(target, snapshot.position.z);

        state.set_flag(flags::HOVER_UP_ONLY, false);
        let target = hover_target(&state, &snapshot).expect("hover mode set");
        assert_eq!(target, 12.0);
    }

    #[test]
    fn balloon_hovers_at_global_height() {
        let heights = FlatHeights::default();
        let mut state = VehicleState::default();
        state.set_type(VehicleType::Balloon);
        state.set_float(FloatParam::HoverHeight, 40.0);

        let snapshot = input(&heights);
        let out = step(&mut state, &snapshot);
        // below the target, correction points up
        assert!(out.linear_velocity.z > 0.0);
        // full buoyancy cancels gravity
        assert!(out.force.length() < 1e-4);
    }

    #[test]
    fn vertical_attraction_levels_a_tilted_body() {
        let heights = FlatHeights::default();
        let mut state = VehicleState::default();
        state.set_type(VehicleType::Car);
        state.set_flag(flags::LIMIT_ROLL_ONLY, false);

        let tilt = Quat::from_rotation_y(0.4);
        let mut snapshot = input(&heights);
        snapshot.rotation = tilt;

        let out = step(&mut state, &snapshot);
        let up = tilt * Vec3::Z;
        assert!(up.x > 0.0);
        // correction spins about Y opposing the +X lean, leaves yaw alone
        assert!(out.angular_velocity.y < 0.0);
        assert_eq!(out.angular_velocity.z, 0.0);
    }

    #[test]
    fn limit_roll_only_leaves_pitch_alone() {
        let heights = FlatHeights::default();
        let mut state = VehicleState::default();
        state.set_type(VehicleType::Car);
        assert!(state.flags & flags::LIMIT_ROLL_ONLY != 0);

        // pitched about Y: no correction at all
        let mut snapshot = input(&heights);
        snapshot.rotation = Quat::from_rotation_y(0.4);
        let out = step(&mut state, &snapshot);
        assert_eq!(out.angular_velocity.y, 0.0);

        // rolled about X: the roll correction still applies
        state.set_type(VehicleType::Car);
        let mut snapshot = input(&heights);
        snapshot.rotation = Quat::from_rotation_x(0.4);
        let out = step(&mut state, &snapshot);
        assert!(out.angular_velocity.x < 0.0);
    }

    #[test]
    fn limit_motor_up_clamps_upward_motor() {
        let heights = FlatHeights::default();
        let mut state = VehicleState::default();
        state.set_type(VehicleType::Car);
        state.set_vector(VectorParam::LinearMotorDirection, Vec3::new(0.0, 0.0, 8.0));

        let snapshot = input(&heights);
        let out = step(&mut state, &snapshot);
        assert_eq!(out.linear_velocity.z, 0.0);

        state.set_flag(flags::LIMIT_MOTOR_UP, false);
        let out = step(&mut state, &snapshot);
        assert!(out.linear_velocity.z > 0.0);
    }
}

//! End-to-end behavior of the step coordinator over the stub engine.

mod common;

use common::{stub_world, RecordingEvents, DT};
use glam::Vec3;
use regionphys::core::shape::HollowShape;
use regionphys::{PrimShape, Transform};

#[test]
fn unit_cube_realizes_with_density_mass() {
    let (mut world, probe) = stub_world();
    let mut events = RecordingEvents::default();

    let id = world.add_prim(
        Transform::from_position(Vec3::new(128.0, 128.0, 50.0)),
        Vec3::ONE,
        PrimShape::default(),
        true,
    );
    world.step(DT, &mut events);

    let object = world.object(id).unwrap();
    assert!((object.mass - 10.0).abs() < 1e-3);

    let body = object.body.expect("physical object carries a body");
    let native_mass = probe.body_mass(body).unwrap();
    assert!((native_mass - 10.0).abs() < 1e-3);
    assert_eq!(probe.body_count(), 1);
    assert_eq!(probe.shape_count(), 1);
}

#[test]
fn hollowing_a_cube_halves_its_mass() {
    let (mut world, probe) = stub_world();
    let mut events = RecordingEvents::default();

    let id = world.add_prim(
        Transform::from_position(Vec3::new(128.0, 128.0, 50.0)),
        Vec3::ONE,
        PrimShape::default(),
        true,
    );
    world.step(DT, &mut events);

    let handle = world.handle();
    handle.set_shape(
        id,
        PrimShape {
            hollow_shape: HollowShape::Square,
            hollow: 25_000,
            ..PrimShape::default()
        },
    );
    world.step(DT, &mut events);

    let object = world.object(id).unwrap();
    assert!((object.mass - 5.0).abs() < 1e-2);
    let native_mass = probe.body_mass(object.body.unwrap()).unwrap();
    assert!((native_mass - 5.0).abs() < 1e-2);
}

#[test]
fn growing_an_object_settles_mass_cubically() {
    let (mut world, _probe) = stub_world();
    let mut events = RecordingEvents::default();

    let id = world.add_prim(
        Transform::from_position(Vec3::new(128.0, 128.0, 50.0)),
        Vec3::ONE,
        PrimShape::default(),
        true,
    );
    world.step(DT, &mut events);

    world.handle().set_size(id, Vec3::splat(2.0));
    world.step(DT, &mut events);

    assert!((world.object(id).unwrap().mass - 80.0).abs() < 1e-2);
}

#[test]
fn resizing_a_moving_object_keeps_its_velocity() {
    let (mut world, probe) = stub_world();
    let mut events = RecordingEvents::default();

    let id = world.add_prim(
        Transform::from_position(Vec3::new(128.0, 128.0, 50.0)),
        Vec3::ONE,
        PrimShape::default(),
        true,
    );
    world.step(DT, &mut events);

    world.handle().set_linear_velocity(id, Vec3::new(5.0, 0.0, 0.0));
    world.step(DT, &mut events);
    assert!((world.object(id).unwrap().velocity.linear.x - 5.0).abs() < 1e-3);

    // resizing tears the native body down and recreates it
    world.handle().set_size(id, Vec3::splat(2.0));
    world.step(DT, &mut events);

    let body = world.object(id).unwrap().body.unwrap();
    let native = probe.body_linear_velocity(body).unwrap();
    assert!(
        (native.x - 5.0).abs() < 1e-3,
        "rebuild stopped the body, native velocity {native:?}"
    );
    assert!((world.object(id).unwrap().velocity.linear.x - 5.0).abs() < 1e-3);
}

#[test]
fn disabling_physics_drops_the_body_and_freezes_the_transform() {
    let (mut world, probe) = stub_world();
    let mut events = RecordingEvents::default();

    let id = world.add_prim(
        Transform::from_position(Vec3::new(128.0, 128.0, 50.0)),
        Vec3::ONE,
        PrimShape::default(),
        true,
    );
    world.step(DT, &mut events);
    world.step(DT, &mut events);
    assert_eq!(probe.body_count(), 1);
    // falling under gravity
    assert!(world.object(id).unwrap().transform.position.z < 50.0);

    world.handle().set_physical(id, false);
    world.step(DT, &mut events);
    assert_eq!(probe.body_count(), 0);
    // the collision shape survives as static geometry
    assert_eq!(probe.shape_count(), 1);

    let frozen = world.object(id).unwrap().transform.position;
    world.step(DT, &mut events);
    world.step(DT, &mut events);
    assert_eq!(world.object(id).unwrap().transform.position, frozen);
}

#[test]
fn remove_enqueued_before_first_step_runs_in_program_order() {
    let (mut world, probe) = stub_world();
    let mut events = RecordingEvents::default();

    let id = world.add_prim(
        Transform::from_position(Vec3::new(128.0, 128.0, 50.0)),
        Vec3::ONE,
        PrimShape::default(),
        true,
    );
    world.handle().remove(id);
    world.step(DT, &mut events);

    assert!(world.object(id).is_none());
    assert_eq!(probe.body_count(), 0);
    assert_eq!(probe.shape_count(), 0);
    // created first, destroyed second: program order was preserved
    let inner = probe.inner.lock();
    assert_eq!(inner.shapes_created, 1);
    assert_eq!(inner.shapes_destroyed, 1);
}

#[test]
fn runaway_object_is_parked_out_of_bounds() {
    let (mut world, probe) = stub_world();
    let mut events = RecordingEvents::default();

    let id = world.add_prim(
        Transform::from_position(Vec3::new(128.0, 128.0, 50.0)),
        Vec3::ONE,
        PrimShape::default(),
        true,
    );
    world.step(1.0, &mut events);

    world.handle().set_linear_velocity(id, Vec3::new(500.0, 0.0, 0.0));
    for _ in 0..10 {
        world.step(1.0, &mut events);
    }

    assert_eq!(events.out_of_bounds, vec![id]);
    let object = world.object(id).unwrap();
    assert!(object.out_of_bounds);
    assert!(object.body.is_none());
    assert_eq!(probe.body_count(), 0);
    // the last in-bounds transform is retained
    assert!(object.transform.position.x <= world.params().region_extent);
}

#[test]
fn native_step_failure_degrades_to_an_empty_frame() {
    let (mut world, probe) = stub_world();
    let mut events = RecordingEvents::default();

    let id = world.add_prim(
        Transform::from_position(Vec3::new(128.0, 128.0, 50.0)),
        Vec3::ONE,
        PrimShape::default(),
        true,
    );
    world.step(DT, &mut events);
    let before = world.object(id).unwrap().transform.position;

    events.clear();
    probe.inner.lock().fail_next_step = true;
    world.step(DT, &mut events);
    assert!(events.transforms.is_empty());
    assert_eq!(world.object(id).unwrap().transform.position, before);

    // recovers on the next frame
    world.step(DT, &mut events);
    assert!(world.object(id).unwrap().transform.position.z < before.z);
}

#[test]
fn buoyancy_scales_native_gravity() {
    let (mut world, probe) = stub_world();
    let mut events = RecordingEvents::default();

    let id = world.add_prim(
        Transform::from_position(Vec3::new(128.0, 128.0, 50.0)),
        Vec3::ONE,
        PrimShape::default(),
        true,
    );
    world.step(DT, &mut events);

    world.handle().set_buoyancy(id, 1.0);
    world.step(DT, &mut events);

    let body = world.object(id).unwrap().body.unwrap();
    assert_eq!(probe.gravity_scale(body), Some(0.0));
}

//! The simulation step coordinator.
//!
//! [`RegionWorld`] exclusively owns the native engine handle and is the only
//! place that calls into it. Producer threads (network handlers, script
//! mutators) never touch the engine: they enqueue taints through a cloned
//! [`RegionHandle`], and once per tick the coordinator drains the queue,
//! runs vehicle updates, invokes the native step, reads back the results and
//! dispatches collision/transform notifications. The phase order is
//! load-bearing and must not be rearranged.

pub mod collisions;

use glam::{Quat, Vec3};
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::config::WorldParams;
use crate::core::object::PhysicalObject;
use crate::core::shape::{PrimShape, ProfileFamily};
use crate::core::types::{Transform, Velocity};
use crate::engine::{
    BodyHandle, HeightQuery, MeshLod, MeshProducer, NativeEngine, ShapeHandle, ShapeSpec,
    StepResults,
};
use crate::error::{PhysicsError, Result};
use crate::linkset::{drop_standalone_body, realize_standalone_body, BodyCtx, Linkset};
use crate::taint::TaintQueue;
use crate::utils::allocator::{Arena, ObjectId};
use crate::utils::logging::{warn_if_frame_budget_exceeded, ScopedTimer};
use crate::vehicle::{self, FloatParam, VectorParam, VehicleState, VehicleStepInput, VehicleType};
use crate::world::collisions::{CollisionDispatcher, CollisionEvent};

/// Outbound notifications to the rest of the world.
pub trait WorldEvents {
    fn on_transform_update(&mut self, id: ObjectId, transform: Transform, velocity: Velocity);
    /// An empty slice is the keep-alive "collisions ended" notification.
    fn on_collisions(&mut self, id: ObjectId, events: &[CollisionEvent]);
    fn on_out_of_bounds(&mut self, id: ObjectId, last_position: Vec3);
}

/// Everything the taint actions mutate: the object arena, linkset edges,
/// vehicle states, and the native engine with its handle maps.
pub struct WorldState {
    pub params: WorldParams,
    pub objects: Arena<PhysicalObject>,
    pub links: Linkset,
    pub vehicles: HashMap<ObjectId, VehicleState>,
    engine: Box<dyn NativeEngine + Send>,
    mesher: Box<dyn MeshProducer + Send>,
    heights: Box<dyn HeightQuery + Send>,
    shape_owner: HashMap<ShapeHandle, ObjectId>,
    body_owner: HashMap<BodyHandle, ObjectId>,
    /// Objects removed since the last flush; the coordinator drains this to
    /// retire their collision bookkeeping.
    removed: Vec<ObjectId>,
}

impl WorldState {
    fn split(&mut self) -> (&mut Linkset, BodyCtx<'_>) {
        (
            &mut self.links,
            BodyCtx {
                objects: &mut self.objects,
                engine: self.engine.as_mut(),
                params: &self.params,
                shape_owner: &mut self.shape_owner,
                body_owner: &mut self.body_owner,
            },
        )
    }

    fn owner_of_shape(&self, shape: ShapeHandle) -> Option<ObjectId> {
        self.shape_owner.get(&shape).copied()
    }

    /// (Re)creates the native collision geometry for an object, asking the
    /// mesh producer first for sculpted/mesh shapes and falling back to a
    /// primitive. Retries linkset composition that was deferred on missing
    /// geometry.
    fn realize_geometry(&mut self, id: ObjectId) -> Result<()> {
        let spec = {
            let object = self
                .objects
                .get(id)
                .ok_or(PhysicsError::UnknownObject(id))?;
            self.shape_spec_for(object)
        };

        // A body wrapping the old shape must go first.
        let (_, mut ctx) = self.split();
        drop_standalone_body(&mut ctx, id);
        if let Some(object) = self.objects.get_mut(id) {
            if let Some(old) = object.shape_handle.take() {
                self.shape_owner.remove(&old);
                self.engine.destroy_shape(old);
            }
        }

        let shape = self.engine.create_shape(spec)?;
        self.shape_owner.insert(shape, id);
        let (transform, category, mask) = {
            let object = self
                .objects
                .get_mut(id)
                .ok_or(PhysicsError::UnknownObject(id))?;
            object.shape_handle = Some(shape);
            (
                object.transform,
                object.collision_category,
                object.collision_mask,
            )
        };
        self.engine.set_shape_transform(shape, transform);
        self.engine.set_shape_filter(shape, category, mask);

        self.refresh_body(id)
    }

    fn shape_spec_for(&self, object: &PhysicalObject) -> ShapeSpec {
        if object.is_avatar() {
            return ShapeSpec::Capsule {
                radius: self.params.avatar_capsule_radius,
                height: self.params.avatar_capsule_height,
            };
        }
        if object.shape.needs_mesh {
            if let Some(data) = self.mesher.create_mesh(
                &object.shape,
                object.size,
                MeshLod::default(),
                object.is_physical,
            ) {
                return ShapeSpec::Mesh { data };
            }
            debug!("object {}: mesh producer declined, using primitive", object.id);
        }
        let size = object.size;
        match object.shape.profile {
            ProfileFamily::Box | ProfileFamily::Prism => ShapeSpec::Box {
                half_extents: size * 0.5,
            },
            ProfileFamily::Cylinder => ShapeSpec::Cylinder {
                radius: 0.5 * size.x.max(size.y),
                height: size.z,
            },
            ProfileFamily::Sphere => ShapeSpec::Sphere {
                radius: 0.5 * size.max_element(),
            },
        }
    }

    /// Reconciles the native body (or linkset composition) with the
    /// object's current flags.
    fn refresh_body(&mut self, id: ObjectId) -> Result<()> {
        let (links, mut ctx) = self.split();
        let root = links.root_of(id);
        if links.is_linked(root) || links.is_linked(id) {
            links.rebuild_root(&mut ctx, root)
        } else {
            let wants = ctx.objects.get(id).map(|o| o.wants_body()).unwrap_or(false);
            if wants {
                realize_standalone_body(&mut ctx, id)
            } else {
                drop_standalone_body(&mut ctx, id);
                Ok(())
            }
        }
    }

    /// Pushes the object's authoritative transform into the engine,
    /// re-recording the linkset offset when the object is a linked child.
    fn apply_transform(&mut self, id: ObjectId) -> Result<()> {
        if let Some(parent) = self.links.parent_of(id) {
            let parent_world = self
                .objects
                .get(parent)
                .map(|o| o.transform)
                .unwrap_or_default();
            let child_world = self
                .objects
                .get(id)
                .map(|o| o.transform)
                .ok_or(PhysicsError::UnknownObject(id))?;
            let offset = parent_world.relative_to(&child_world);
            let (links, mut ctx) = self.split();
            links.set_offset(id, offset);
            let root = links.root_of(id);
            return links.rebuild_root(&mut ctx, root);
        }

        let object = self
            .objects
            .get(id)
            .ok_or(PhysicsError::UnknownObject(id))?;
        let transform = object.transform;
        if let Some(body) = object.body {
            self.engine.set_transform(body, transform);
        } else if let Some(compound) = self.links.compound_of(id) {
            self.engine.set_shape_transform(compound, transform);
        } else if let Some(shape) = object.shape_handle {
            self.engine.set_shape_transform(shape, transform);
        }
        Ok(())
    }

    fn apply_velocity(&mut self, id: ObjectId) -> Result<()> {
        let object = self
            .objects
            .get(id)
            .ok_or(PhysicsError::UnknownObject(id))?;
        if let Some(body) = object.body {
            self.engine.set_linear_velocity(body, object.velocity.linear);
            self.engine
                .set_angular_velocity(body, object.velocity.angular);
        }
        Ok(())
    }

    /// Mass settle: re-derives the object's mass and updates the owning
    /// body (the linkset root's when linked). Idempotent; queued as a
    /// latest-wins post-taint.
    fn settle_mass(&mut self, id: ObjectId) -> Result<()> {
        if let Some(object) = self.objects.get_mut(id) {
            let params = self.params.clone();
            object.refresh_mass(&params);
        } else {
            return Ok(());
        }

        let root = self.links.root_of(id);
        let Some(body) = self.objects.get(root).and_then(|o| o.body) else {
            return Ok(());
        };
        let props = if self.links.children_of(root).is_empty() {
            self.objects
                .get(root)
                .map(|o| o.mass_properties(&self.params))
                .ok_or(PhysicsError::UnknownObject(root))?
        } else {
            self.links
                .composed_mass_properties(&self.objects, root, &self.params)
        };
        self.engine.set_mass(body, props);
        Ok(())
    }

    /// Full removal: detaches linkset edges, frees native handles, and
    /// recomposes any trees the removal disturbed. Safe to run before the
    /// object's creation taint has realized geometry.
    fn remove_object(&mut self, id: ObjectId) -> Result<()> {
        let dirty = {
            let (links, mut ctx) = self.split();
            drop_standalone_body(&mut ctx, id);
            if let Some(compound) = links.compound_of(id) {
                ctx.shape_owner.remove(&compound);
                ctx.engine.destroy_shape(compound);
            }
            links.forget(id)
        };

        if let Some(object) = self.objects.get_mut(id) {
            if let Some(shape) = object.shape_handle.take() {
                self.shape_owner.remove(&shape);
                self.engine.destroy_shape(shape);
            }
        }
        self.objects.remove(id);
        self.vehicles.remove(&id);
        self.removed.push(id);

        let (links, mut ctx) = self.split();
        for root in dirty {
            if ctx.objects.contains(root) {
                links.rebuild_root(&mut ctx, root)?;
            }
        }
        Ok(())
    }

    fn set_vehicle_type(&mut self, id: ObjectId, vehicle_type: VehicleType) -> Result<()> {
        let object = self
            .objects
            .get(id)
            .ok_or(PhysicsError::UnknownObject(id))?;
        let body = object.body;
        let buoyancy = object.buoyancy;

        if vehicle_type == VehicleType::None {
            self.vehicles.remove(&id);
            if let Some(body) = body {
                // restore the plain buoyancy-scaled gravity
                self.engine.set_gravity_scale(body, 1.0 - buoyancy);
            }
        } else {
            let state = self.vehicles.entry(id).or_default();
            state.set_type(vehicle_type);
            if let Some(body) = body {
                // the vehicle model integrates its own gravity/buoyancy
                self.engine.set_gravity_scale(body, 0.0);
            }
        }
        Ok(())
    }
}

/// Cloneable cross-thread mutation surface. Every method queues a taint and
/// returns immediately; the change lands at the next flush.
#[derive(Clone)]
pub struct RegionHandle {
    taints: Arc<TaintQueue<WorldState>>,
}

impl RegionHandle {
    pub fn set_position(&self, id: ObjectId, position: Vec3) {
        self.taints.enqueue("set_position", move |state| {
            state
                .objects
                .get_mut(id)
                .ok_or(PhysicsError::UnknownObject(id))?
                .set_position(position);
            state.apply_transform(id)
        });
    }

    pub fn set_orientation(&self, id: ObjectId, rotation: Quat) {
        self.taints.enqueue("set_orientation", move |state| {
            state
                .objects
                .get_mut(id)
                .ok_or(PhysicsError::UnknownObject(id))?
                .set_orientation(rotation);
            state.apply_transform(id)
        });
    }

    pub fn set_linear_velocity(&self, id: ObjectId, velocity: Vec3) {
        self.taints.enqueue("set_linear_velocity", move |state| {
            state
                .objects
                .get_mut(id)
                .ok_or(PhysicsError::UnknownObject(id))?
                .set_linear_velocity(velocity);
            state.apply_velocity(id)
        });
    }

    pub fn set_angular_velocity(&self, id: ObjectId, velocity: Vec3) {
        self.taints.enqueue("set_angular_velocity", move |state| {
            state
                .objects
                .get_mut(id)
                .ok_or(PhysicsError::UnknownObject(id))?
                .set_angular_velocity(velocity);
            state.apply_velocity(id)
        });
    }

    /// Resizing re-realizes the geometry and settles mass afterwards.
    pub fn set_size(&self, id: ObjectId, size: Vec3) {
        let queue = Arc::clone(&self.taints);
        self.taints.enqueue("set_size", move |state| {
            state
                .objects
                .get_mut(id)
                .ok_or(PhysicsError::UnknownObject(id))?
                .set_size(size);
            let result = state.realize_geometry(id);
            queue.enqueue_post("settle_mass", id, move |state| state.settle_mass(id));
            result
        });
    }

    /// Replacing the shape descriptor re-realizes geometry and mass.
    pub fn set_shape(&self, id: ObjectId, shape: PrimShape) {
        let queue = Arc::clone(&self.taints);
        self.taints.enqueue("set_shape", move |state| {
            state
                .objects
                .get_mut(id)
                .ok_or(PhysicsError::UnknownObject(id))?
                .shape = shape;
            let result = state.realize_geometry(id);
            queue.enqueue_post("settle_mass", id, move |state| state.settle_mass(id));
            result
        });
    }

    /// Toggling physical creates or destroys the native body at the next
    /// flush; a disabled body leaves the last-known static transform behind.
    pub fn set_physical(&self, id: ObjectId, physical: bool) {
        let queue = Arc::clone(&self.taints);
        self.taints.enqueue("set_physical", move |state| {
            state
                .objects
                .get_mut(id)
                .ok_or(PhysicsError::UnknownObject(id))?
                .is_physical = physical;
            let result = state.refresh_body(id);
            queue.enqueue_post("settle_mass", id, move |state| state.settle_mass(id));
            result
        });
    }

    /// A selected object's body is suspended until deselection.
    pub fn set_selected(&self, id: ObjectId, selected: bool) {
        self.taints.enqueue("set_selected", move |state| {
            state
                .objects
                .get_mut(id)
                .ok_or(PhysicsError::UnknownObject(id))?
                .is_selected = selected;
            state.refresh_body(id)
        });
    }

    pub fn set_buoyancy(&self, id: ObjectId, buoyancy: f32) {
        self.taints.enqueue("set_buoyancy", move |state| {
            let object = state
                .objects
                .get_mut(id)
                .ok_or(PhysicsError::UnknownObject(id))?;
            object.set_buoyancy(buoyancy);
            let (body, value) = (object.body, object.buoyancy);
            if let Some(body) = body {
                if !state.vehicles.contains_key(&id) {
                    state.engine.set_gravity_scale(body, 1.0 - value);
                }
            }
            Ok(())
        });
    }

    /// Material override; the body is rebuilt so the native engine picks up
    /// the new coefficients.
    pub fn set_material(&self, id: ObjectId, friction: f32, restitution: f32) {
        self.taints.enqueue("set_material", move |state| {
            if !friction.is_finite() || !restitution.is_finite() {
                warn!("object {id}: rejected non-finite material");
                return Ok(());
            }
            let object = state
                .objects
                .get_mut(id)
                .ok_or(PhysicsError::UnknownObject(id))?;
            object.friction = friction.max(0.0);
            object.restitution = restitution.clamp(0.0, 1.0);

            let (links, mut ctx) = state.split();
            let root = links.root_of(id);
            if links.is_linked(root) || links.is_linked(id) {
                links.rebuild_root(&mut ctx, root)
            } else {
                drop_standalone_body(&mut ctx, id);
                realize_standalone_body(&mut ctx, id)
            }
        });
    }

    pub fn set_collision_filter(&self, id: ObjectId, category: u32, mask: u32) {
        self.taints.enqueue("set_collision_filter", move |state| {
            let object = state
                .objects
                .get_mut(id)
                .ok_or(PhysicsError::UnknownObject(id))?;
            object.collision_category = category;
            object.collision_mask = mask;
            if let Some(shape) = object.shape_handle {
                state.engine.set_shape_filter(shape, category, mask);
            }
            Ok(())
        });
    }

    /// Per-axis rotation lock; zero components freeze that axis.
    pub fn set_angular_lock(&self, id: ObjectId, lock: Vec3) {
        self.taints.enqueue("set_angular_lock", move |state| {
            state
                .objects
                .get_mut(id)
                .ok_or(PhysicsError::UnknownObject(id))?
                .angular_lock = lock.clamp(Vec3::ZERO, Vec3::ONE);
            Ok(())
        });
    }

    pub fn set_mass_override(&self, id: ObjectId, mass: Option<f32>) {
        let queue = Arc::clone(&self.taints);
        self.taints.enqueue("set_mass_override", move |state| {
            state
                .objects
                .get_mut(id)
                .ok_or(PhysicsError::UnknownObject(id))?
                .mass_override = mass.filter(|m| m.is_finite() && *m > 0.0);
            queue.enqueue_post("settle_mass", id, move |state| state.settle_mass(id));
            Ok(())
        });
    }

    /// Applies a world-frame force during the flush window.
    pub fn push_force(&self, id: ObjectId, force: Vec3) {
        self.taints.enqueue("push_force", move |state| {
            if !crate::utils::math::vec_finite(force) {
                warn!("object {id}: rejected non-finite force {force:?}");
                return Ok(());
            }
            let object = state
                .objects
                .get(id)
                .ok_or(PhysicsError::UnknownObject(id))?;
            match object.body {
                Some(body) => {
                    state.engine.add_force(body, force);
                    Ok(())
                }
                None => {
                    debug!("push_force on body-less object {id} dropped");
                    Ok(())
                }
            }
        });
    }

    pub fn push_torque(&self, id: ObjectId, torque: Vec3) {
        self.taints.enqueue("push_torque", move |state| {
            if !crate::utils::math::vec_finite(torque) {
                warn!("object {id}: rejected non-finite torque {torque:?}");
                return Ok(());
            }
            let object = state
                .objects
                .get(id)
                .ok_or(PhysicsError::UnknownObject(id))?;
            if let Some(body) = object.body {
                state.engine.add_torque(body, torque);
            }
            Ok(())
        });
    }

    /// Composes `child` into `parent`'s linkset at the next flush.
    pub fn link(&self, parent: ObjectId, child: ObjectId) {
        let queue = Arc::clone(&self.taints);
        self.taints.enqueue("link", move |state| {
            let (links, mut ctx) = state.split();
            links.link(&mut ctx, parent, child)?;
            queue.enqueue_post("settle_mass", parent, move |state| {
                state.settle_mass(parent)
            });
            Ok(())
        });
    }

    /// Detaches `child` and recomposes the remaining tree at the next flush.
    pub fn delink(&self, child: ObjectId) {
        self.taints.enqueue("delink", move |state| {
            let (links, mut ctx) = state.split();
            links.delink(&mut ctx, child)
        });
    }

    pub fn set_vehicle_type(&self, id: ObjectId, vehicle_type: VehicleType) {
        self.taints.enqueue("set_vehicle_type", move |state| {
            state.set_vehicle_type(id, vehicle_type)
        });
    }

    pub fn set_vehicle_float(&self, id: ObjectId, param: FloatParam, value: f32) {
        self.taints.enqueue("set_vehicle_float", move |state| {
            state
                .vehicles
                .get_mut(&id)
                .ok_or(PhysicsError::UnknownObject(id))?
                .set_float(param, value);
            Ok(())
        });
    }

    pub fn set_vehicle_vector(&self, id: ObjectId, param: VectorParam, value: Vec3) {
        self.taints.enqueue("set_vehicle_vector", move |state| {
            state
                .vehicles
                .get_mut(&id)
                .ok_or(PhysicsError::UnknownObject(id))?
                .set_vector(param, value);
            Ok(())
        });
    }

    pub fn set_vehicle_flag(&self, id: ObjectId, flag: u32, enabled: bool) {
        self.taints.enqueue("set_vehicle_flag", move |state| {
            state
                .vehicles
                .get_mut(&id)
                .ok_or(PhysicsError::UnknownObject(id))?
                .set_flag(flag, enabled);
            Ok(())
        });
    }

    /// Removes the object at the next flush, freeing its native handles
    /// before any subsequent step. Enqueued after a pending creation taint
    /// it still executes in program order: create, then destroy.
    pub fn remove(&self, id: ObjectId) {
        self.taints
            .enqueue("remove", move |state| state.remove_object(id));
    }
}

/// Central coordinator owning the world state, the taint queue, and the
/// collision dispatcher.
pub struct RegionWorld {
    state: WorldState,
    taints: Arc<TaintQueue<WorldState>>,
    dispatcher: CollisionDispatcher,
    frame: u64,
}

impl RegionWorld {
    pub fn new(
        params: WorldParams,
        mut engine: Box<dyn NativeEngine + Send>,
        mesher: Box<dyn MeshProducer + Send>,
        heights: Box<dyn HeightQuery + Send>,
    ) -> Self {
        engine.set_gravity(params.gravity);
        Self {
            state: WorldState {
                params,
                objects: Arena::new(),
                links: Linkset::new(),
                vehicles: HashMap::new(),
                engine,
                mesher,
                heights,
                shape_owner: HashMap::new(),
                body_owner: HashMap::new(),
                removed: Vec::new(),
            },
            taints: Arc::new(TaintQueue::new()),
            dispatcher: CollisionDispatcher::default(),
            frame: 0,
        }
    }

    /// Cross-thread mutation surface for producer threads.
    pub fn handle(&self) -> RegionHandle {
        RegionHandle {
            taints: Arc::clone(&self.taints),
        }
    }

    /// Registers a new prim. The arena slot exists immediately so the id can
    /// be returned; native geometry and body realize at the next flush.
    pub fn add_prim(
        &mut self,
        transform: Transform,
        size: Vec3,
        shape: PrimShape,
        physical: bool,
    ) -> ObjectId {
        let mut object = PhysicalObject::prim(size, shape, &self.state.params);
        object.transform = transform;
        object.is_physical = physical;
        let id = self.state.objects.insert(object);
        if let Some(stored) = self.state.objects.get_mut(id) {
            stored.id = id;
        }

        let queue = Arc::clone(&self.taints);
        self.taints.enqueue("add_prim", move |state| {
            if !state.objects.contains(id) {
                // removed before its creation taint flushed
                return Ok(());
            }
            let result = state.realize_geometry(id);
            queue.enqueue_post("settle_mass", id, move |state| state.settle_mass(id));
            result
        });
        id
    }

    /// Registers an avatar capsule. Avatars are always physical and stay on
    /// the unconditional collision-notify cadence.
    pub fn add_avatar(&mut self, position: Vec3) -> ObjectId {
        let mut object = PhysicalObject::avatar(&self.state.params);
        object.transform = Transform::from_position(position);
        let id = self.state.objects.insert(object);
        if let Some(stored) = self.state.objects.get_mut(id) {
            stored.id = id;
        }
        self.dispatcher.keep_always(id);

        self.taints.enqueue("add_avatar", move |state| {
            if !state.objects.contains(id) {
                return Ok(());
            }
            state.realize_geometry(id)
        });
        id
    }

    pub fn object(&self, id: ObjectId) -> Option<&PhysicalObject> {
        self.state.objects.get(id)
    }

    pub fn vehicle(&self, id: ObjectId) -> Option<&VehicleState> {
        self.state.vehicles.get(&id)
    }

    pub fn params(&self) -> &WorldParams {
        &self.state.params
    }

    pub fn links(&self) -> &Linkset {
        &self.state.links
    }

    pub fn objects(&self) -> &Arena<PhysicalObject> {
        &self.state.objects
    }

    pub fn collisions(&self) -> &CollisionDispatcher {
        &self.dispatcher
    }

    pub fn pending_taints(&self) -> usize {
        self.taints.pending_len()
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Advances the simulation one tick:
    /// flush taints → vehicle updates → flush post-taints → native step →
    /// transform readback → collision dispatch → object update notify.
    pub fn step(&mut self, dt: f32, events: &mut dyn WorldEvents) {
        let started = Instant::now();

        {
            let _timer = ScopedTimer::new("taints::flush");
            self.taints.flush(&mut self.state);
        }
        {
            let _timer = ScopedTimer::new("vehicles::update");
            self.update_vehicles(dt);
        }
        {
            let _timer = ScopedTimer::new("taints::post");
            self.taints.flush_post(&mut self.state);
        }

        // Objects removed by this frame's taints leave the dispatcher now,
        // before any dispatch; otherwise avatars linger on the steady
        // cadence forever.
        for id in std::mem::take(&mut self.state.removed) {
            self.dispatcher.forget(id);
        }

        let results = {
            let _timer = ScopedTimer::new("engine::step");
            let params = &self.state.params;
            match self
                .state
                .engine
                .step(dt, params.max_substeps, params.substep_size)
            {
                Ok(results) => results,
                Err(err) => {
                    warn!("native step failed, frame degraded to empty results: {err}");
                    StepResults::default()
                }
            }
        };

        let updates = {
            let _timer = ScopedTimer::new("readback");
            self.read_back(&results, dt, events)
        };

        {
            let _timer = ScopedTimer::new("collisions::dispatch");
            let state = &self.state;
            self.dispatcher
                .ingest(&results.collisions, |shape| state.owner_of_shape(shape));
            let objects = &self.state.objects;
            self.dispatcher.dispatch(
                |id| objects.contains(id),
                |id, collision_events| events.on_collisions(id, collision_events),
            );
        }

        for (id, transform, velocity) in updates {
            events.on_transform_update(id, transform, velocity);
        }

        warn_if_frame_budget_exceeded(started.elapsed(), dt * 1000.0);
        self.frame += 1;
    }

    /// Runs the vehicle model for every active vehicle, strictly inside the
    /// flush window, and applies the results to the native bodies in one
    /// batch per vehicle.
    fn update_vehicles(&mut self, dt: f32) {
        let ids: Vec<ObjectId> = self.state.vehicles.keys().copied().collect();
        for id in ids {
            let Some(object) = self.state.objects.get(id) else {
                self.state.vehicles.remove(&id);
                continue;
            };
            let Some(body) = object.body else {
                continue;
            };
            if !self.state.vehicles.get(&id).map(|v| v.is_active()).unwrap_or(false) {
                continue;
            }

            let mass = self
                .state
                .links
                .total_mass(&self.state.objects, id, &self.state.params);
            let input = VehicleStepInput {
                dt,
                mass,
                position: object.transform.position,
                rotation: object.transform.rotation,
                linear_velocity: object.velocity.linear,
                angular_velocity: object.velocity.angular,
                gravity: self.state.params.gravity,
                heights: self.state.heights.as_ref(),
            };
            let lock = object.angular_lock;

            let Some(vehicle_state) = self.state.vehicles.get_mut(&id) else {
                continue;
            };
            let output = vehicle::step(vehicle_state, &input);

            let angular = output.angular_velocity * lock;
            // a body rebuilt since the type was set needs its native gravity
            // re-zeroed; the model integrates gravity itself
            self.state.engine.set_gravity_scale(body, 0.0);
            self.state
                .engine
                .set_linear_velocity(body, output.linear_velocity);
            self.state.engine.set_angular_velocity(body, angular);
            self.state.engine.add_force(body, output.force);

            if let Some(object) = self.state.objects.get_mut(id) {
                object.velocity.linear = output.linear_velocity;
                object.velocity.angular = angular;
            }
        }
    }

    /// Applies the native step's transform readbacks, tracking per-object
    /// position-resolution failures and parking runaways out of bounds.
    fn read_back(
        &mut self,
        results: &StepResults,
        dt: f32,
        events: &mut dyn WorldEvents,
    ) -> Vec<(ObjectId, Transform, Velocity)> {
        let mut notified = Vec::new();
        let mut parked = Vec::new();
        let mut moved_roots = Vec::new();

        for update in &results.updates {
            let Some(&id) = self.state.body_owner.get(&update.body) else {
                continue;
            };
            let params = &self.state.params;
            let in_bounds = crate::utils::math::vec_finite(update.transform.position)
                && crate::utils::math::quat_finite(update.transform.rotation)
                && update.transform.position.x >= 0.0
                && update.transform.position.x <= params.region_extent
                && update.transform.position.y >= 0.0
                && update.transform.position.y <= params.region_extent;
            let failure_limit = params.position_failure_limit;

            let Some(object) = self.state.objects.get_mut(id) else {
                continue;
            };

            if !in_bounds {
                object.position_failures += 1;
                if object.position_failures > failure_limit {
                    object.out_of_bounds = true;
                    events.on_out_of_bounds(id, object.transform.position);
                    parked.push(id);
                } else {
                    debug!(
                        "object {id}: position failed to resolve ({} of {failure_limit})",
                        object.position_failures
                    );
                }
                continue;
            }

            object.position_failures = 0;
            let previous = object.velocity.linear;
            object.transform = update.transform;
            object.velocity = update.velocity;
            object.acceleration = if dt > 0.0 {
                (update.velocity.linear - previous) / dt
            } else {
                Vec3::ZERO
            };
            notified.push((id, object.transform, object.velocity));
            if !self.state.links.children_of(id).is_empty() {
                moved_roots.push(id);
            }
        }

        // Linked children mirror the root's motion; they own no body, so
        // their transforms are derived here.
        for root in moved_roots {
            let root_transform = self
                .state
                .objects
                .get(root)
                .map(|o| o.transform)
                .unwrap_or_default();
            let descendants = self.descendants_of(root);
            for child in descendants {
                let offset = self.state.links.offset_from_root(child);
                if let Some(object) = self.state.objects.get_mut(child) {
                    object.transform = root_transform.combine(&offset);
                }
            }
        }

        for id in parked {
            let (_, mut ctx) = self.state.split();
            drop_standalone_body(&mut ctx, id);
        }

        notified
    }

    fn descendants_of(&self, root: ObjectId) -> Vec<ObjectId> {
        let mut out = Vec::new();
        let mut stack: Vec<ObjectId> = self.state.links.children_of(root).to_vec();
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend_from_slice(self.state.links.children_of(id));
            if out.len() > 4096 {
                warn!("linkset under {root} too deep during readback");
                break;
            }
        }
        out
    }
}

//! Linkset composition: merging a tree of objects into one rigid body.
//!
//! Edges live in an adjacency structure separate from the object arena, so
//! composition and decomposition are operations over (arena, edges) rather
//! than pointer surgery. Any change to a linkset tears the root's compound
//! down and rebuilds it from scratch; incremental recomposition of inertia
//! is error-prone and deliberately avoided.

use glam::Mat3;
use log::{debug, warn};
use std::collections::HashMap;

use crate::config::{WorldParams, MAX_LINK_DEPTH};
use crate::core::object::PhysicalObject;
use crate::core::types::{MassProperties, Transform};
use crate::engine::{BodyHandle, BodySpec, NativeEngine, ShapeHandle, ShapeSpec};
use crate::error::{PhysicsError, Result};
use crate::utils::allocator::{Arena, ObjectId};

/// Borrowed world pieces the composer mutates. The coordinator assembles one
/// from its own fields for the duration of a taint.
pub struct BodyCtx<'a> {
    pub objects: &'a mut Arena<PhysicalObject>,
    pub engine: &'a mut dyn NativeEngine,
    pub params: &'a WorldParams,
    /// Shape handle → owning object (roots own their compound handles).
    pub shape_owner: &'a mut HashMap<ShapeHandle, ObjectId>,
    /// Body handle → owning object.
    pub body_owner: &'a mut HashMap<BodyHandle, ObjectId>,
}

/// Adjacency structure for all linksets in the world. Invariant: the graph
/// is a forest; `attach` rejects anything that would introduce a cycle.
#[derive(Default)]
pub struct Linkset {
    parents: HashMap<ObjectId, ObjectId>,
    children: HashMap<ObjectId, Vec<ObjectId>>,
    /// Child local offset relative to its immediate parent.
    offsets: HashMap<ObjectId, Transform>,
    /// Compound shape currently realized for each root.
    compounds: HashMap<ObjectId, ShapeHandle>,
}

impl Linkset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parent_of(&self, id: ObjectId) -> Option<ObjectId> {
        self.parents.get(&id).copied()
    }

    pub fn children_of(&self, id: ObjectId) -> &[ObjectId] {
        self.children.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_linked(&self, id: ObjectId) -> bool {
        self.parents.contains_key(&id) || !self.children_of(id).is_empty()
    }

    /// Walks up to the root of the tree containing `id`.
    pub fn root_of(&self, id: ObjectId) -> ObjectId {
        let mut current = id;
        let mut depth = 0;
        while let Some(parent) = self.parent_of(current) {
            current = parent;
            depth += 1;
            if depth > MAX_LINK_DEPTH {
                warn!("linkset walk from {id} exceeded depth bound; treating {current} as root");
                break;
            }
        }
        current
    }

    pub fn offset_of(&self, child: ObjectId) -> Transform {
        self.offsets.get(&child).copied().unwrap_or_default()
    }

    /// Re-records a linked child's local offset (child moved while linked).
    /// The caller is responsible for recomposing the root afterwards.
    pub fn set_offset(&mut self, child: ObjectId, offset: Transform) {
        if self.parents.contains_key(&child) {
            self.offsets.insert(child, offset);
        }
    }

    /// Accumulated offset of `id` relative to its root.
    pub fn offset_from_root(&self, id: ObjectId) -> Transform {
        let mut chain = Vec::new();
        let mut current = id;
        while let Some(parent) = self.parent_of(current) {
            chain.push(self.offset_of(current));
            current = parent;
            if chain.len() as u32 > MAX_LINK_DEPTH {
                break;
            }
        }
        chain
            .iter()
            .rev()
            .fold(Transform::default(), |acc, local| acc.combine(local))
    }

    fn is_ancestor(&self, maybe_ancestor: ObjectId, id: ObjectId) -> bool {
        let mut current = id;
        let mut depth = 0;
        while let Some(parent) = self.parent_of(current) {
            if parent == maybe_ancestor {
                return true;
            }
            current = parent;
            depth += 1;
            if depth > MAX_LINK_DEPTH {
                return false;
            }
        }
        false
    }

    /// Total mass of the subtree rooted at `root`, depth-bounded against
    /// malformed graphs, clamped to the configured maximum.
    pub fn total_mass(
        &self,
        objects: &Arena<PhysicalObject>,
        root: ObjectId,
        params: &WorldParams,
    ) -> f32 {
        params.clamp_mass(self.subtree_mass(objects, root, 0))
    }

    fn subtree_mass(&self, objects: &Arena<PhysicalObject>, id: ObjectId, depth: u32) -> f32 {
        if depth > MAX_LINK_DEPTH {
            warn!("linkset mass recursion exceeded depth bound at {id}");
            return 0.0;
        }
        let own = objects.get(id).map(|o| o.effective_mass()).unwrap_or(0.0);
        self.children_of(id)
            .iter()
            .fold(own, |acc, child| acc + self.subtree_mass(objects, *child, depth + 1))
    }

    /// Records the edge and recomposes the parent's tree. The child's local
    /// offset is captured from the current world transforms of both objects.
    pub fn link(&mut self, ctx: &mut BodyCtx<'_>, parent: ObjectId, child: ObjectId) -> Result<()> {
        if parent == child || self.is_ancestor(child, parent) {
            return Err(PhysicsError::LinksetCycle { parent, child });
        }
        if !ctx.objects.contains(parent) {
            return Err(PhysicsError::UnknownObject(parent));
        }
        if !ctx.objects.contains(child) {
            return Err(PhysicsError::UnknownObject(child));
        }

        // Re-parenting fully decomposes the old position first.
        if self.parent_of(child).is_some() {
            self.delink(ctx, child)?;
        }

        let parent_world = self.world_transform_of(ctx.objects, parent);
        let child_world = ctx
            .objects
            .get(child)
            .map(|o| o.transform)
            .ok_or(PhysicsError::UnknownObject(child))?;
        let offset = parent_world.relative_to(&child_world);

        self.parents.insert(child, parent);
        self.children.entry(parent).or_default().push(child);
        self.offsets.insert(child, offset);

        // The child gives up its own dynamic body while linked.
        drop_standalone_body(ctx, child);

        let root = self.root_of(parent);
        self.rebuild_root(ctx, root)
    }

    /// Detaches `child`, restores its independent body if it is physical,
    /// then recomposes the remaining tree fresh.
    pub fn delink(&mut self, ctx: &mut BodyCtx<'_>, child: ObjectId) -> Result<()> {
        let Some(parent) = self.parents.remove(&child) else {
            debug!("delink on unlinked object {child}");
            return Ok(());
        };
        if let Some(siblings) = self.children.get_mut(&parent) {
            siblings.retain(|c| *c != child);
            if siblings.is_empty() {
                self.children.remove(&parent);
            }
        }
        self.offsets.remove(&child);

        let root = self.root_of(parent);

        // The departing subtree becomes its own linkset rooted at `child`.
        if let Some(object) = ctx.objects.get_mut(child) {
            object.refresh_mass(ctx.params);
        }
        self.rebuild_root(ctx, child)?;
        self.rebuild_root(ctx, root)
    }

    /// Tears down and rebuilds the native realization of the tree rooted at
    /// `root`: compound shape, combined mass, dynamic body. Children whose
    /// geometry has not been realized yet are skipped with a warning and
    /// picked up on the next geometry-creation taint.
    pub fn rebuild_root(&mut self, ctx: &mut BodyCtx<'_>, root: ObjectId) -> Result<()> {
        drop_standalone_body(ctx, root);
        if let Some(compound) = self.compounds.remove(&root) {
            ctx.shape_owner.remove(&compound);
            ctx.engine.destroy_shape(compound);
        }

        let root_object = ctx
            .objects
            .get(root)
            .ok_or(PhysicsError::UnknownObject(root))?;
        let Some(root_shape) = root_object.shape_handle else {
            warn!("linkset root {root} has no realized geometry; composition deferred");
            return Ok(());
        };
        let root_transform = root_object.transform;

        let children = self.children_of(root).to_vec();
        if children.is_empty() {
            ctx.engine.set_shape_transform(root_shape, root_transform);
            realize_standalone_body(ctx, root)?;
            return Ok(());
        }

        let mut parts: Vec<(Transform, ShapeHandle)> =
            vec![(Transform::default(), root_shape)];
        self.collect_parts(ctx.objects, root, Transform::default(), 0, &mut parts);

        let compound = ctx
            .engine
            .create_shape(ShapeSpec::Compound { children: parts })?;
        ctx.shape_owner.insert(compound, root);
        ctx.engine.set_shape_transform(compound, root_transform);
        ctx.engine.set_shape_filter(
            compound,
            root_object.collision_category,
            root_object.collision_mask,
        );
        self.compounds.insert(root, compound);

        let mass_properties = self.composed_mass_properties(ctx.objects, root, ctx.params);
        let material = ctx
            .objects
            .get(root)
            .filter(|o| o.wants_body())
            .map(|o| {
                (
                    o.friction,
                    o.restitution,
                    o.collision_category,
                    o.collision_mask,
                )
            });
        if let Some((friction, restitution, category, mask)) = material {
            let body = ctx.engine.create_body(BodySpec {
                shape: compound,
                transform: root_transform,
                mass: mass_properties,
                friction,
                restitution,
                collision_category: category,
                collision_mask: mask,
                collision_margin: ctx.params.collision_margin,
                linear_sleep_threshold: ctx.params.linear_sleep_threshold,
                angular_sleep_threshold: ctx.params.angular_sleep_threshold,
            })?;
            ctx.body_owner.insert(body, root);
            if let Some(object) = ctx.objects.get_mut(root) {
                object.body = Some(body);
                ctx.engine.set_gravity_scale(body, 1.0 - object.buoyancy);
                // Recomposition must not stop a moving linkset.
                ctx.engine.set_linear_velocity(body, object.velocity.linear);
                ctx.engine.set_angular_velocity(body, object.velocity.angular);
            }
        }
        Ok(())
    }

    fn collect_parts(
        &self,
        objects: &Arena<PhysicalObject>,
        parent: ObjectId,
        parent_offset: Transform,
        depth: u32,
        parts: &mut Vec<(Transform, ShapeHandle)>,
    ) {
        if depth > MAX_LINK_DEPTH {
            warn!("linkset composition exceeded depth bound under {parent}");
            return;
        }
        for child in self.children_of(parent) {
            let offset = parent_offset.combine(&self.offset_of(*child));
            match objects.get(*child).and_then(|o| o.shape_handle) {
                Some(shape) => parts.push((offset, shape)),
                None => {
                    warn!("linkset child {child} has no realized geometry; skipped");
                }
            }
            self.collect_parts(objects, *child, offset, depth + 1, parts);
        }
    }

    /// Combined mass and inertia for the compound, accumulated by
    /// translating each member's inertia into the root frame and adding
    /// (rigid-body composition rules).
    pub fn composed_mass_properties(
        &self,
        objects: &Arena<PhysicalObject>,
        root: ObjectId,
        params: &WorldParams,
    ) -> MassProperties {
        let total = self.total_mass(objects, root, params);

        let mut inertia = objects
            .get(root)
            .map(|o| o.mass_properties(params).inertia)
            .unwrap_or(Mat3::IDENTITY);

        let mut stack = vec![(root, Transform::default(), 0u32)];
        while let Some((parent, parent_offset, depth)) = stack.pop() {
            if depth > MAX_LINK_DEPTH {
                continue;
            }
            for child in self.children_of(parent) {
                let offset = parent_offset.combine(&self.offset_of(*child));
                if let Some(object) = objects.get(*child) {
                    let mass = object.effective_mass();
                    let local = object.mass_properties(params).inertia;
                    let rot = Mat3::from_quat(offset.rotation);
                    let rotated = rot * local * rot.transpose();
                    inertia += rotated + parallel_axis_shift(offset.position, mass);
                }
                stack.push((*child, offset, depth + 1));
            }
        }

        MassProperties {
            mass: total,
            inertia,
        }
    }

    /// Forgets all edges touching `id` (object removal path). Returns every
    /// root whose composition must be rebuilt.
    pub fn forget(&mut self, id: ObjectId) -> Vec<ObjectId> {
        let mut dirty = Vec::new();
        if let Some(parent) = self.parents.remove(&id) {
            if let Some(siblings) = self.children.get_mut(&parent) {
                siblings.retain(|c| *c != id);
                if siblings.is_empty() {
                    self.children.remove(&parent);
                }
            }
            dirty.push(self.root_of(parent));
        }
        self.offsets.remove(&id);
        // Orphaned children become roots of their own trees.
        if let Some(children) = self.children.remove(&id) {
            for child in children {
                self.parents.remove(&child);
                self.offsets.remove(&child);
                dirty.push(child);
            }
        }
        self.compounds.remove(&id);
        dirty
    }

    pub fn compound_of(&self, root: ObjectId) -> Option<ShapeHandle> {
        self.compounds.get(&root).copied()
    }

    fn world_transform_of(&self, objects: &Arena<PhysicalObject>, id: ObjectId) -> Transform {
        objects.get(id).map(|o| o.transform).unwrap_or_default()
    }
}

/// Parallel-axis term `m · (|d|²·I − d·dᵀ)` for a point mass displaced by `d`.
fn parallel_axis_shift(d: glam::Vec3, mass: f32) -> Mat3 {
    let outer = Mat3::from_cols(d * d.x, d * d.y, d * d.z);
    (Mat3::from_diagonal(glam::Vec3::splat(d.length_squared())) - outer) * mass
}

/// Creates the native dynamic body for an unlinked object that wants one.
/// No-op when the object is static, selected, or still geometry-less.
pub fn realize_standalone_body(ctx: &mut BodyCtx<'_>, id: ObjectId) -> Result<()> {
    let Some(object) = ctx.objects.get(id) else {
        return Err(PhysicsError::UnknownObject(id));
    };
    if object.body.is_some() || !object.wants_body() {
        return Ok(());
    }
    let Some(shape) = object.shape_handle else {
        return Err(PhysicsError::GeometryMissing(id));
    };

    let spec = BodySpec {
        shape,
        transform: object.transform,
        mass: object.mass_properties(ctx.params),
        friction: object.friction,
        restitution: object.restitution,
        collision_category: object.collision_category,
        collision_mask: object.collision_mask,
        collision_margin: ctx.params.collision_margin,
        linear_sleep_threshold: ctx.params.linear_sleep_threshold,
        angular_sleep_threshold: ctx.params.angular_sleep_threshold,
    };
    let buoyancy = object.buoyancy;
    let velocity = object.velocity;

    let body = ctx.engine.create_body(spec)?;
    ctx.engine.set_gravity_scale(body, 1.0 - buoyancy);
    // The fresh native body starts at rest; carry the stored velocity over
    // so a rebuild (resize, material change, delink) does not stop motion.
    ctx.engine.set_linear_velocity(body, velocity.linear);
    ctx.engine.set_angular_velocity(body, velocity.angular);
    ctx.body_owner.insert(body, id);
    if let Some(object) = ctx.objects.get_mut(id) {
        object.body = Some(body);
    }
    Ok(())
}

/// Destroys the native body of `id`, if present. The shape survives as
/// static geometry at the last-known transform.
pub fn drop_standalone_body(ctx: &mut BodyCtx<'_>, id: ObjectId) {
    let Some(object) = ctx.objects.get_mut(id) else {
        return;
    };
    if let Some(body) = object.body.take() {
        ctx.body_owner.remove(&body);
        ctx.engine.destroy_body(body);
        let transform = object.transform;
        if let Some(shape) = object.shape_handle {
            ctx.engine.set_shape_transform(shape, transform);
        }
    }
}

// Worker-side simulation state store.
//
// `SimulationState` owns the rapier world plus every registry keyed by entity id:
// bodies, constraints, springs, vehicles, rays and subscriptions. It is only touched
// by the worker's message dispatch, one message at a time, so nothing here locks.

use crate::domain::body::{BodyKind, BodyParams, CollisionFilter, Material};
use crate::domain::buffers::PoseBuffers;
use crate::domain::errors::WorkerError;
use crate::domain::events::{CollideEvent, ContactChange, Observation, RayHit};
use crate::domain::ids::EntityId;
use crate::domain::joints::{
    ConstraintKind, ConstraintSpec, RaySpec, SpringSpec, SpringValue, VehicleSpec, WheelValue,
};
use crate::domain::properties::{BodyValue, DynamicsInput, SubscriptionSpec};
use crate::domain::shapes::{collider_parts, euler_to_quaternion};
use crate::domain::systems::contacts::{ContactCollector, ContactOutput, ContactTracker};
use crate::domain::systems::observation::Observed;
use crate::domain::systems::springs::{self, SpringEntry};
use crate::domain::systems::vehicles::{self, VehicleEntry};
use crate::domain::systems::{
    body_pose, interaction_groups, quaternion_array, rays, to_array, to_point, to_rotation,
    to_vector, unit_or,
};
use crate::domain::world::{WorldConfig, WorldValue};
use rapier3d::na::Translation3;
use rapier3d::prelude::*;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

// Velocity gain used when driving a hinge motor.
const MOTOR_FACTOR: f32 = 1.0;

/// The rapier sets and pipeline for one simulation instance.
pub struct PhysicsWorld {
    pub gravity: Vector<f32>,
    pub params: IntegrationParameters,
    pipeline: PhysicsPipeline,
    pub islands: IslandManager,
    pub broad_phase: BroadPhaseBvh,
    pub narrow_phase: NarrowPhase,
    pub bodies: RigidBodySet,
    pub colliders: ColliderSet,
    pub impulse_joints: ImpulseJointSet,
    pub multibody_joints: MultibodyJointSet,
    ccd: CCDSolver,
}

impl PhysicsWorld {
    pub fn new(config: &WorldConfig) -> Self {
        let mut world = Self {
            gravity: Vector::zeros(),
            params: IntegrationParameters::default(),
            pipeline: PhysicsPipeline::new(),
            islands: IslandManager::new(),
            broad_phase: BroadPhaseBvh::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd: CCDSolver::new(),
        };
        world.configure(config);
        world
    }

    pub fn configure(&mut self, config: &WorldConfig) {
        self.gravity = to_vector(config.gravity);
        self.params.dt = config.step_size;
        self.params.num_solver_iterations = (config.iterations as usize).max(1);
        self.params.normalized_allowed_linear_error = config.tolerance;
    }

    fn step(&mut self, events: &dyn EventHandler) {
        self.pipeline.step(
            &self.gravity,
            &self.params,
            &mut self.islands,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd,
            &(),
            events,
        );
    }

    pub fn query_pipeline<'a>(&'a self, filter: QueryFilter<'a>) -> QueryPipeline<'a> {
        self.broad_phase.as_query_pipeline(
            self.narrow_phase.query_dispatcher(),
            &self.bodies,
            &self.colliders,
            filter,
        )
    }

    fn pose(&self, handle: RigidBodyHandle) -> Option<Isometry<f32>> {
        self.bodies.get(handle).map(body_pose)
    }
}

/// Worker-side record of one body.
#[derive(Debug, Clone)]
pub struct BodyEntry {
    pub handle: RigidBodyHandle,
    pub colliders: Vec<ColliderHandle>,
    pub kind: BodyKind,
    pub mass: f32,
    pub material: Option<Material>,
    pub filter: CollisionFilter,
    pub collision_response: bool,
    pub is_trigger: bool,
    pub allow_sleep: bool,
    pub sleep_speed_limit: f32,
    pub sleep_time_limit: f32,
    pub linear_factor: [f32; 3],
    pub angular_factor: [f32; 3],
    pub fixed_rotation: bool,
    pub user_data: serde_json::Value,
    pub has_collide_callback: bool,
}

#[derive(Debug, Clone)]
struct ConstraintEntry {
    spec: ConstraintSpec,
    handle: ImpulseJointHandle,
    motor_enabled: bool,
    motor_speed: f32,
    motor_max_force: f32,
}

/// Everything one `step` produced, in the order the worker reports it.
#[derive(Debug, Default)]
pub struct StepOutput {
    pub internal_steps: u32,
    pub ray_hits: Vec<RayHit>,
    pub contact_begins: Vec<ContactChange>,
    pub collisions: Vec<CollideEvent>,
    pub contact_ends: Vec<ContactChange>,
    pub observations: Vec<Observation>,
    /// Any non-static body still awake.
    pub active: bool,
    /// Buffer slot order, present when it changed since the previous frame.
    pub body_order: Option<Vec<EntityId>>,
}

pub struct SimulationState {
    config: WorldConfig,
    world: PhysicsWorld,
    accumulator: f32,
    bodies: HashMap<EntityId, BodyEntry>,
    // Buffer slot order.
    order: Vec<EntityId>,
    order_dirty: bool,
    collider_owner: HashMap<ColliderHandle, EntityId>,
    constraints: HashMap<EntityId, ConstraintEntry>,
    springs: BTreeMap<EntityId, SpringEntry>,
    vehicles: BTreeMap<EntityId, VehicleEntry>,
    // Registration order.
    rays: Vec<RaySpec>,
    subscriptions: BTreeMap<u64, SubscriptionSpec>,
    collector: ContactCollector,
    contacts: ContactTracker,
}

impl SimulationState {
    pub fn new(config: WorldConfig) -> Self {
        Self {
            world: PhysicsWorld::new(&config),
            config,
            accumulator: 0.0,
            bodies: HashMap::new(),
            order: Vec::new(),
            order_dirty: false,
            collider_owner: HashMap::new(),
            constraints: HashMap::new(),
            springs: BTreeMap::new(),
            vehicles: BTreeMap::new(),
            rays: Vec::new(),
            subscriptions: BTreeMap::new(),
            collector: ContactCollector::default(),
            contacts: ContactTracker::default(),
        }
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn has_body(&self, id: &EntityId) -> bool {
        self.bodies.contains_key(id)
    }

    pub fn body_order(&self) -> &[EntityId] {
        &self.order
    }

    pub fn constraint_count(&self) -> usize {
        self.constraints.len()
    }

    pub fn spring_count(&self) -> usize {
        self.springs.len()
    }

    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    pub fn ray_count(&self) -> usize {
        self.rays.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Number of rigid bodies inside the physics engine, compound bodies counting once.
    pub fn engine_body_count(&self) -> usize {
        self.world.bodies.len()
    }

    pub fn touching(&self, a: &EntityId, b: &EntityId) -> bool {
        self.contacts.touching(a, b)
    }

    pub fn translation(&self, id: &EntityId) -> Option<[f32; 3]> {
        let entry = self.bodies.get(id)?;
        self.world
            .bodies
            .get(entry.handle)
            .map(|rb| to_array(rb.translation()))
    }

    pub fn linear_velocity(&self, id: &EntityId) -> Option<[f32; 3]> {
        let entry = self.bodies.get(id)?;
        self.world
            .bodies
            .get(entry.handle)
            .map(|rb| to_array(rb.linvel()))
    }

    pub fn body(&self, id: &EntityId) -> Option<&BodyEntry> {
        self.bodies.get(id)
    }

    pub fn is_sleeping(&self, id: &EntityId) -> Option<bool> {
        let entry = self.bodies.get(id)?;
        self.world.bodies.get(entry.handle).map(RigidBody::is_sleeping)
    }

    fn entry(&self, id: &EntityId) -> Result<&BodyEntry, WorkerError> {
        self.bodies
            .get(id)
            .ok_or_else(|| WorkerError::UnknownBody(id.clone()))
    }

    pub fn add_body(&mut self, id: EntityId, params: BodyParams) -> Result<(), WorkerError> {
        if self.bodies.contains_key(&id) {
            return Err(WorkerError::DuplicateEntity(id));
        }
        let parts = collider_parts(&params.shape)?;
        let kind = params.resolved_kind();

        let builder = match kind {
            BodyKind::Dynamic => RigidBodyBuilder::dynamic(),
            BodyKind::Static => RigidBodyBuilder::fixed(),
            BodyKind::Kinematic => RigidBodyBuilder::kinematic_velocity_based(),
        };
        let pose = Isometry::from_parts(
            Translation3::from(to_vector(params.position)),
            euler_to_quaternion(params.rotation),
        );
        let rigid_body = builder
            .pose(pose)
            .linvel(to_vector(params.velocity))
            .angvel(to_vector(params.angular_velocity))
            .linear_damping(params.linear_damping)
            .angular_damping(params.angular_damping)
            .build();
        let handle = self.world.bodies.insert(rigid_body);

        let mut entry = BodyEntry {
            handle,
            colliders: Vec::with_capacity(parts.len()),
            kind,
            mass: params.mass,
            material: params.material.clone(),
            filter: params.filter(),
            collision_response: params.collision_response,
            is_trigger: params.is_trigger,
            allow_sleep: params.allow_sleep,
            sleep_speed_limit: params.sleep_speed_limit,
            sleep_time_limit: params.sleep_time_limit,
            linear_factor: params.linear_factor,
            angular_factor: params.angular_factor,
            fixed_rotation: params.fixed_rotation,
            user_data: params.user_data,
            has_collide_callback: params.has_collide_callback,
        };

        let share = mass_share(entry.mass, parts.len());
        for part in parts {
            let material = part.material.or_else(|| entry.material.clone());
            let mut collider = part
                .builder
                .friction(self.friction_of(material.as_ref()))
                .restitution(self.restitution_of(material.as_ref()))
                .active_events(ActiveEvents::COLLISION_EVENTS)
                .collision_groups(interaction_groups(entry.filter))
                .solver_groups(solver_groups(&entry))
                .sensor(entry.is_trigger);
            if kind == BodyKind::Dynamic && share > 0.0 {
                collider = collider.mass(share);
            }
            let collider_handle = self.world.colliders.insert_with_parent(
                collider.build(),
                handle,
                &mut self.world.bodies,
            );
            self.collider_owner.insert(collider_handle, id.clone());
            entry.colliders.push(collider_handle);
        }

        if let Some(rb) = self.world.bodies.get_mut(handle) {
            apply_locks(rb, &entry);
            apply_sleep(rb, &entry, self.config.allow_sleep);
        }

        debug!(body = %id, kind = ?kind, colliders = entry.colliders.len(), "body added");
        self.bodies.insert(id.clone(), entry);
        self.order.push(id);
        self.order_dirty = true;
        Ok(())
    }

    /// Remove a body with its colliders and everything attached to it. Pending contacts
    /// involving it are dropped without end events.
    pub fn remove_body(&mut self, id: &EntityId) -> Result<(), WorkerError> {
        let entry = self
            .bodies
            .remove(id)
            .ok_or_else(|| WorkerError::UnknownBody(id.clone()))?;
        for collider in &entry.colliders {
            self.collider_owner.remove(collider);
        }
        let world = &mut self.world;
        world.bodies.remove(
            entry.handle,
            &mut world.islands,
            &mut world.colliders,
            &mut world.impulse_joints,
            &mut world.multibody_joints,
            true,
        );

        self.order.retain(|body| body != id);
        self.order_dirty = true;
        self.contacts.forget_body(id);

        // Rapier already dropped the joints with the body.
        self.constraints
            .retain(|_, c| &c.spec.body_a != id && &c.spec.body_b != id);
        self.springs
            .retain(|_, s| &s.spec.body_a != id && &s.spec.body_b != id);
        self.vehicles.retain(|_, v| !v.references(id));

        debug!(body = %id, "body removed");
        Ok(())
    }

    pub fn set_body(&mut self, id: &EntityId, value: BodyValue) -> Result<(), WorkerError> {
        let default_friction = self.config.default_friction();
        let default_restitution = self.config.default_restitution();
        let world_allows_sleep = self.config.allow_sleep;

        let entry = self
            .bodies
            .get_mut(id)
            .ok_or_else(|| WorkerError::UnknownBody(id.clone()))?;
        let world = &mut self.world;
        let rb = world
            .bodies
            .get_mut(entry.handle)
            .ok_or_else(|| WorkerError::UnknownBody(id.clone()))?;

        match value {
            BodyValue::Position(position) => rb.set_translation(to_vector(position), true),
            BodyValue::Rotation(euler) => rb.set_rotation(euler_to_quaternion(euler), true),
            BodyValue::Quaternion(quaternion) => rb.set_rotation(to_rotation(quaternion), true),
            BodyValue::Velocity(velocity) => rb.set_linvel(to_vector(velocity), true),
            BodyValue::AngularVelocity(velocity) => rb.set_angvel(to_vector(velocity), true),
            BodyValue::LinearFactor(factor) => {
                entry.linear_factor = factor;
                apply_locks(rb, entry);
            }
            BodyValue::AngularFactor(factor) => {
                entry.angular_factor = factor;
                apply_locks(rb, entry);
            }
            BodyValue::FixedRotation(fixed) => {
                entry.fixed_rotation = fixed;
                apply_locks(rb, entry);
            }
            BodyValue::Mass(mass) => {
                entry.mass = mass;
                // A massless dynamic body stops moving; a massive static one starts.
                if mass > 0.0 && entry.kind == BodyKind::Static {
                    entry.kind = BodyKind::Dynamic;
                    rb.set_body_type(RigidBodyType::Dynamic, true);
                } else if mass <= 0.0 && entry.kind == BodyKind::Dynamic {
                    entry.kind = BodyKind::Static;
                    rb.set_body_type(RigidBodyType::Fixed, true);
                }
                let share = mass_share(mass, entry.colliders.len());
                for handle in &entry.colliders {
                    if let Some(collider) = world.colliders.get_mut(*handle) {
                        collider.set_mass(share);
                    }
                }
            }
            BodyValue::LinearDamping(damping) => rb.set_linear_damping(damping),
            BodyValue::AngularDamping(damping) => rb.set_angular_damping(damping),
            BodyValue::AllowSleep(allow) => {
                entry.allow_sleep = allow;
                apply_sleep(rb, entry, world_allows_sleep);
            }
            BodyValue::SleepSpeedLimit(limit) => {
                entry.sleep_speed_limit = limit;
                apply_sleep(rb, entry, world_allows_sleep);
            }
            BodyValue::SleepTimeLimit(limit) => {
                entry.sleep_time_limit = limit;
                apply_sleep(rb, entry, world_allows_sleep);
            }
            BodyValue::CollisionFilterGroup(group) => {
                entry.filter.group = group;
                update_colliders(&mut world.colliders, entry, |collider, entry| {
                    collider.set_collision_groups(interaction_groups(entry.filter));
                    collider.set_solver_groups(solver_groups(entry));
                });
            }
            BodyValue::CollisionFilterMask(mask) => {
                entry.filter.mask = mask;
                update_colliders(&mut world.colliders, entry, |collider, entry| {
                    collider.set_collision_groups(interaction_groups(entry.filter));
                    collider.set_solver_groups(solver_groups(entry));
                });
            }
            BodyValue::CollisionResponse(response) => {
                entry.collision_response = response;
                update_colliders(&mut world.colliders, entry, |collider, entry| {
                    collider.set_solver_groups(solver_groups(entry));
                });
            }
            BodyValue::IsTrigger(trigger) => {
                entry.is_trigger = trigger;
                update_colliders(&mut world.colliders, entry, |collider, entry| {
                    collider.set_sensor(entry.is_trigger);
                });
            }
            BodyValue::Material(material) => {
                let friction = material.friction.unwrap_or(default_friction);
                let restitution = material.restitution.unwrap_or(default_restitution);
                entry.material = Some(material);
                update_colliders(&mut world.colliders, entry, |collider, _| {
                    collider.set_friction(friction);
                    collider.set_restitution(restitution);
                });
            }
            BodyValue::UserData(data) => entry.user_data = data,
        }
        Ok(())
    }

    pub fn apply_body(&mut self, id: &EntityId, input: DynamicsInput) -> Result<(), WorkerError> {
        let handle = self.entry(id)?.handle;
        let rb = self
            .world
            .bodies
            .get_mut(handle)
            .ok_or_else(|| WorkerError::UnknownBody(id.clone()))?;

        match input {
            DynamicsInput::Force { force, world_point } => {
                rb.add_force_at_point(to_vector(force), to_point(world_point), true)
            }
            DynamicsInput::Impulse {
                impulse,
                world_point,
            } => rb.apply_impulse_at_point(to_vector(impulse), to_point(world_point), true),
            DynamicsInput::LocalForce { force, local_point } => {
                let pose = body_pose(rb);
                rb.add_force_at_point(
                    pose.rotation * to_vector(force),
                    pose * to_point(local_point),
                    true,
                )
            }
            DynamicsInput::LocalImpulse {
                impulse,
                local_point,
            } => {
                let pose = body_pose(rb);
                rb.apply_impulse_at_point(
                    pose.rotation * to_vector(impulse),
                    pose * to_point(local_point),
                    true,
                )
            }
            DynamicsInput::Torque { torque } => rb.add_torque(to_vector(torque), true),
        }
        Ok(())
    }

    pub fn wake_up(&mut self, id: &EntityId) -> Result<(), WorkerError> {
        let handle = self.entry(id)?.handle;
        if let Some(rb) = self.world.bodies.get_mut(handle) {
            rb.wake_up(true);
        }
        Ok(())
    }

    pub fn sleep(&mut self, id: &EntityId) -> Result<(), WorkerError> {
        let handle = self.entry(id)?.handle;
        if let Some(rb) = self.world.bodies.get_mut(handle) {
            rb.sleep();
        }
        Ok(())
    }

    pub fn add_constraint(&mut self, spec: ConstraintSpec) -> Result<(), WorkerError> {
        if self.constraints.contains_key(&spec.id) {
            return Err(WorkerError::DuplicateEntity(spec.id));
        }
        let handle_a = self.entry(&spec.body_a)?.handle;
        let handle_b = self.entry(&spec.body_b)?.handle;
        let pose_a = self
            .world
            .pose(handle_a)
            .ok_or_else(|| WorkerError::UnknownBody(spec.body_a.clone()))?;
        let pose_b = self
            .world
            .pose(handle_b)
            .ok_or_else(|| WorkerError::UnknownBody(spec.body_b.clone()))?;

        let options = &spec.options;
        let pivot_a = to_point(options.pivot_a);
        let pivot_b = to_point(options.pivot_b);
        let joint: GenericJoint = match spec.kind {
            ConstraintKind::PointToPoint => SphericalJointBuilder::new()
                .local_anchor1(pivot_a)
                .local_anchor2(pivot_b)
                .contacts_enabled(options.collide_connected)
                .build()
                .into(),
            ConstraintKind::ConeTwist => SphericalJointBuilder::new()
                .local_anchor1(pivot_a)
                .local_anchor2(pivot_b)
                .limits(JointAxis::AngX, [-options.twist_angle, options.twist_angle])
                .limits(JointAxis::AngY, [-options.angle, options.angle])
                .limits(JointAxis::AngZ, [-options.angle, options.angle])
                .contacts_enabled(options.collide_connected)
                .build()
                .into(),
            ConstraintKind::Distance => {
                let distance = options
                    .distance
                    .unwrap_or_else(|| ((pose_b * pivot_b) - (pose_a * pivot_a)).norm());
                RopeJointBuilder::new(distance)
                    .local_anchor1(pivot_a)
                    .local_anchor2(pivot_b)
                    .contacts_enabled(options.collide_connected)
                    .build()
                    .into()
            }
            ConstraintKind::Hinge => {
                let mut joint: GenericJoint =
                    RevoluteJointBuilder::new(unit_or(options.axis_a, Vector::x_axis()))
                        .local_anchor1(pivot_a)
                        .local_anchor2(pivot_b)
                        .contacts_enabled(options.collide_connected)
                        .build()
                        .into();
                joint.set_local_axis2(unit_or(options.axis_b, Vector::x_axis()));
                joint
            }
            ConstraintKind::Lock => FixedJointBuilder::new()
                .local_frame1(Isometry::identity())
                .local_frame2(pose_b.inverse() * pose_a)
                .contacts_enabled(options.collide_connected)
                .build()
                .into(),
        };

        let handle = self
            .world
            .impulse_joints
            .insert(handle_a, handle_b, joint, true);
        debug!(constraint = %spec.id, kind = ?spec.kind, "constraint added");
        let entry = ConstraintEntry {
            handle,
            motor_enabled: false,
            motor_speed: 0.0,
            motor_max_force: options.max_force,
            spec,
        };
        self.constraints.insert(entry.spec.id.clone(), entry);
        Ok(())
    }

    pub fn remove_constraint(&mut self, id: &EntityId) -> Result<(), WorkerError> {
        let entry = self
            .constraints
            .remove(id)
            .ok_or_else(|| WorkerError::UnknownConstraint(id.clone()))?;
        self.world.impulse_joints.remove(entry.handle, true);
        Ok(())
    }

    pub fn set_constraint_enabled(&mut self, id: &EntityId, enabled: bool) -> Result<(), WorkerError> {
        let entry = self
            .constraints
            .get(id)
            .ok_or_else(|| WorkerError::UnknownConstraint(id.clone()))?;
        if let Some(joint) = self.world.impulse_joints.get_mut(entry.handle, true) {
            joint.data.set_enabled(enabled);
        }
        Ok(())
    }

    pub fn set_motor_enabled(&mut self, id: &EntityId, enabled: bool) -> Result<(), WorkerError> {
        self.update_motor(id, |entry| entry.motor_enabled = enabled)
    }

    pub fn set_motor_speed(&mut self, id: &EntityId, speed: f32) -> Result<(), WorkerError> {
        self.update_motor(id, |entry| entry.motor_speed = speed)
    }

    pub fn set_motor_max_force(&mut self, id: &EntityId, max_force: f32) -> Result<(), WorkerError> {
        self.update_motor(id, |entry| entry.motor_max_force = max_force)
    }

    fn update_motor(
        &mut self,
        id: &EntityId,
        update: impl FnOnce(&mut ConstraintEntry),
    ) -> Result<(), WorkerError> {
        let entry = self
            .constraints
            .get_mut(id)
            .ok_or_else(|| WorkerError::UnknownConstraint(id.clone()))?;
        if !entry.spec.kind.has_motor() {
            return Err(WorkerError::NoMotor(id.clone()));
        }
        update(entry);

        if let Some(joint) = self.world.impulse_joints.get_mut(entry.handle, true) {
            if entry.motor_enabled {
                joint
                    .data
                    .set_motor_velocity(JointAxis::AngX, entry.motor_speed, MOTOR_FACTOR)
                    .set_motor_max_force(JointAxis::AngX, entry.motor_max_force);
            } else {
                joint
                    .data
                    .set_motor_velocity(JointAxis::AngX, 0.0, 0.0)
                    .set_motor_max_force(JointAxis::AngX, 0.0);
            }
        }
        Ok(())
    }

    pub fn add_spring(&mut self, spec: SpringSpec) -> Result<(), WorkerError> {
        if self.springs.contains_key(&spec.id) {
            return Err(WorkerError::DuplicateEntity(spec.id));
        }
        let pose_a = self
            .world
            .pose(self.entry(&spec.body_a)?.handle)
            .ok_or_else(|| WorkerError::UnknownBody(spec.body_a.clone()))?;
        let pose_b = self
            .world
            .pose(self.entry(&spec.body_b)?.handle)
            .ok_or_else(|| WorkerError::UnknownBody(spec.body_b.clone()))?;

        self.springs
            .insert(spec.id.clone(), SpringEntry::new(spec, &pose_a, &pose_b));
        Ok(())
    }

    pub fn remove_spring(&mut self, id: &EntityId) -> Result<(), WorkerError> {
        self.springs
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| WorkerError::UnknownSpring(id.clone()))
    }

    pub fn set_spring(&mut self, id: &EntityId, value: SpringValue) -> Result<(), WorkerError> {
        self.springs
            .get_mut(id)
            .ok_or_else(|| WorkerError::UnknownSpring(id.clone()))?
            .set(value);
        Ok(())
    }

    pub fn add_vehicle(&mut self, spec: VehicleSpec) -> Result<(), WorkerError> {
        if self.vehicles.contains_key(&spec.id) {
            return Err(WorkerError::DuplicateEntity(spec.id));
        }
        self.entry(&spec.chassis)?;
        for wheel in &spec.wheels {
            self.entry(wheel)?;
        }
        let vehicle = VehicleEntry::new(spec)?;
        debug!(vehicle = %vehicle.spec.id, wheels = vehicle.wheels.len(), "vehicle added");
        self.vehicles.insert(vehicle.spec.id.clone(), vehicle);
        Ok(())
    }

    pub fn remove_vehicle(&mut self, id: &EntityId) -> Result<(), WorkerError> {
        self.vehicles
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| WorkerError::UnknownVehicle(id.clone()))
    }

    pub fn set_wheel(
        &mut self,
        id: &EntityId,
        wheel: usize,
        value: WheelValue,
    ) -> Result<(), WorkerError> {
        self.vehicles
            .get_mut(id)
            .ok_or_else(|| WorkerError::UnknownVehicle(id.clone()))?
            .set_wheel(wheel, value)
    }

    pub fn add_ray(&mut self, spec: RaySpec) -> Result<(), WorkerError> {
        if self.rays.iter().any(|ray| ray.id == spec.id) {
            return Err(WorkerError::DuplicateEntity(spec.id));
        }
        self.rays.push(spec);
        Ok(())
    }

    pub fn remove_ray(&mut self, id: &EntityId) -> Result<(), WorkerError> {
        let before = self.rays.len();
        self.rays.retain(|ray| &ray.id != id);
        if self.rays.len() == before {
            return Err(WorkerError::UnknownRay(id.clone()));
        }
        Ok(())
    }

    /// Register a subscription. Re-using an id replaces the earlier target.
    pub fn subscribe(&mut self, spec: SubscriptionSpec) {
        self.subscriptions.insert(spec.id, spec);
    }

    pub fn unsubscribe(&mut self, id: u64) -> Result<(), WorkerError> {
        self.subscriptions
            .remove(&id)
            .map(|_| ())
            .ok_or(WorkerError::UnknownSubscription(id))
    }

    pub fn set_world(&mut self, value: WorldValue) {
        self.config.apply(&value);
        self.world.configure(&self.config);

        match value {
            WorldValue::AllowSleep(_) => {
                for entry in self.bodies.values() {
                    if let Some(rb) = self.world.bodies.get_mut(entry.handle) {
                        apply_sleep(rb, entry, self.config.allow_sleep);
                    }
                }
            }
            // Bodies without their own material follow the world default.
            WorldValue::DefaultContactMaterial(_) => {
                let friction = self.config.default_friction();
                let restitution = self.config.default_restitution();
                for entry in self.bodies.values().filter(|e| e.material.is_none()) {
                    update_colliders(&mut self.world.colliders, entry, |collider, _| {
                        collider.set_friction(friction);
                        collider.set_restitution(restitution);
                    });
                }
            }
            _ => {}
        }
        debug!(topic = value.topic(), "world updated");
    }

    /// Advance the world and write the resulting poses into `buffers`.
    ///
    /// With `elapsed`, fixed steps are taken for the accumulated time (at most
    /// `max_sub_steps`); without it exactly one fixed step is taken.
    pub fn step(&mut self, elapsed: Option<f32>, buffers: &mut PoseBuffers) -> StepOutput {
        let internal_steps = self.internal_steps_for(elapsed);
        let dt = self.config.step_size;
        let mut output = StepOutput {
            internal_steps,
            ..StepOutput::default()
        };
        let mut contacts = ContactOutput::default();

        for _ in 0..internal_steps {
            output.ray_hits.extend(rays::cast_rays(
                &self.rays,
                &self.bodies,
                &self.collider_owner,
                &self.world,
            ));
            vehicles::pre_step(&mut self.vehicles, &self.bodies, &mut self.world, dt);
            springs::apply_springs(&self.springs, &self.bodies, &mut self.world.bodies);

            self.world.step(&self.collector);
            self.clear_forces();

            vehicles::post_step(&self.vehicles, &self.bodies, &mut self.world);
            let raw = self.collector.drain();
            self.contacts
                .process(raw, &self.collider_owner, &self.bodies, &mut contacts);
        }

        self.write_poses(buffers);
        output.contact_begins = contacts.begins;
        output.collisions = contacts.collisions;
        output.contact_ends = contacts.ends;
        output.observations = self.observe();
        output.active = self.is_active();
        if self.order_dirty {
            self.order_dirty = false;
            output.body_order = Some(self.order.clone());
        }
        output
    }

    fn internal_steps_for(&mut self, elapsed: Option<f32>) -> u32 {
        // No elapsed time, or none worth accumulating, advances exactly one fixed step.
        let elapsed = match elapsed {
            Some(elapsed) if elapsed > 0.0 => elapsed,
            _ => return 1,
        };
        let fixed = self.config.step_size;
        if fixed <= 0.0 {
            return 0;
        }

        self.accumulator += elapsed;
        let mut steps = 0;
        while self.accumulator >= fixed && steps < self.config.max_sub_steps {
            self.accumulator -= fixed;
            steps += 1;
        }
        // Time beyond the sub-step cap is dropped.
        self.accumulator %= fixed;
        steps
    }

    // Forces and torques only act for the internal step they were applied before.
    fn clear_forces(&mut self) {
        for entry in self.bodies.values() {
            if entry.kind != BodyKind::Dynamic {
                continue;
            }
            if let Some(rb) = self.world.bodies.get_mut(entry.handle) {
                rb.reset_forces(false);
                rb.reset_torques(false);
            }
        }
    }

    fn write_poses(&self, buffers: &mut PoseBuffers) {
        buffers.resize(self.order.len());
        for (index, id) in self.order.iter().enumerate() {
            let Some(rb) = self
                .bodies
                .get(id)
                .and_then(|entry| self.world.bodies.get(entry.handle))
            else {
                continue;
            };
            buffers.write(
                index,
                to_array(rb.translation()),
                quaternion_array(rb.rotation()),
            );
        }
    }

    fn observe(&self) -> Vec<Observation> {
        let observed = Observed {
            bodies: &self.bodies,
            rigid_bodies: &self.world.bodies,
            springs: &self.springs,
            vehicles: &self.vehicles,
        };
        self.subscriptions
            .values()
            .filter_map(|spec| observed.observe(spec))
            .collect()
    }

    fn is_active(&self) -> bool {
        self.bodies.values().any(|entry| {
            entry.kind != BodyKind::Static
                && self
                    .world
                    .bodies
                    .get(entry.handle)
                    .is_some_and(|rb| !rb.is_sleeping())
        })
    }

    fn friction_of(&self, material: Option<&Material>) -> f32 {
        material
            .and_then(|m| m.friction)
            .unwrap_or_else(|| self.config.default_friction())
    }

    fn restitution_of(&self, material: Option<&Material>) -> f32 {
        material
            .and_then(|m| m.restitution)
            .unwrap_or_else(|| self.config.default_restitution())
    }
}

fn mass_share(mass: f32, colliders: usize) -> f32 {
    if colliders == 0 || mass <= 0.0 {
        0.0
    } else {
        mass / colliders as f32
    }
}

fn solver_groups(entry: &BodyEntry) -> InteractionGroups {
    if entry.collision_response {
        interaction_groups(entry.filter)
    } else {
        InteractionGroups::none()
    }
}

fn update_colliders(
    colliders: &mut ColliderSet,
    entry: &BodyEntry,
    mut update: impl FnMut(&mut Collider, &BodyEntry),
) {
    for handle in &entry.colliders {
        if let Some(collider) = colliders.get_mut(*handle) {
            update(collider, entry);
        }
    }
}

/// Zero factor components lock the matching axis.
fn apply_locks(rb: &mut RigidBody, entry: &BodyEntry) {
    let [x, y, z] = entry.linear_factor.map(|f| f != 0.0);
    rb.set_enabled_translations(x, y, z, true);
    if entry.fixed_rotation {
        rb.lock_rotations(true, true);
    } else {
        let [x, y, z] = entry.angular_factor.map(|f| f != 0.0);
        rb.set_enabled_rotations(x, y, z, true);
    }
}

fn apply_sleep(rb: &mut RigidBody, entry: &BodyEntry, world_allows: bool) {
    let allowed = world_allows && entry.allow_sleep;
    let activation = rb.activation_mut();
    if allowed {
        activation.normalized_linear_threshold = entry.sleep_speed_limit;
        activation.angular_threshold = entry.sleep_speed_limit;
        activation.time_until_sleep = entry.sleep_time_limit;
    } else {
        activation.normalized_linear_threshold = -1.0;
        activation.angular_threshold = -1.0;
    }
    if !allowed && rb.is_sleeping() {
        rb.wake_up(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::joints::{
        ConstraintOptions, RayMode, RayOptions, SpringOptions, WheelInfo,
    };
    use crate::domain::properties::{BodyProperty, ObservedValue, SubscriptionTarget};
    use crate::domain::shapes::{CompoundChild, Shape};

    fn world() -> SimulationState {
        SimulationState::new(WorldConfig::default().with_gravity([0.0, -10.0, 0.0]))
    }

    fn sphere(mass: f32, position: [f32; 3]) -> BodyParams {
        BodyParams::new(Shape::Sphere { radius: 0.5 })
            .with_mass(mass)
            .at(position)
    }

    fn ground() -> BodyParams {
        BodyParams::new(Shape::Box {
            extents: [20.0, 0.5, 20.0],
        })
        .at([0.0, -0.5, 0.0])
    }

    fn id(value: &str) -> EntityId {
        EntityId::from(value)
    }

    fn run(state: &mut SimulationState, buffers: &mut PoseBuffers, steps: usize) -> Vec<StepOutput> {
        (0..steps).map(|_| state.step(None, buffers)).collect()
    }

    #[test]
    fn when_bodies_are_added_and_removed_then_buffer_order_follows() {
        let mut state = world();
        let mut buffers = PoseBuffers::default();
        state.add_body(id("a"), sphere(1.0, [0.0, 5.0, 0.0])).expect("a");
        state.add_body(id("b"), sphere(1.0, [3.0, 5.0, 0.0])).expect("b");

        let first = state.step(None, &mut buffers);
        assert_eq!(first.body_order, Some(vec![id("a"), id("b")]));
        assert_eq!(buffers.len(), 2);
        assert!(state.step(None, &mut buffers).body_order.is_none());

        state.remove_body(&id("a")).expect("remove a");
        let after = state.step(None, &mut buffers);
        assert_eq!(after.body_order, Some(vec![id("b")]));
        assert_eq!(buffers.len(), 1);
        assert!(buffers.position(0).expect("slot 0")[0] > 2.9);
    }

    #[test]
    fn when_body_id_is_reused_then_add_is_rejected() {
        let mut state = world();
        state.add_body(id("a"), sphere(1.0, [0.0; 3])).expect("first add");

        let err = state.add_body(id("a"), sphere(1.0, [0.0; 3]));

        assert!(matches!(err, Err(WorkerError::DuplicateEntity(_))));
    }

    #[test]
    fn when_unknown_body_is_mutated_then_error_is_returned() {
        let mut state = world();

        assert!(matches!(
            state.set_body(&id("ghost"), BodyValue::Mass(1.0)),
            Err(WorkerError::UnknownBody(_))
        ));
        assert!(state.remove_body(&id("ghost")).is_err());
    }

    #[test]
    fn when_dynamic_sphere_falls_then_it_lands_on_the_ground() {
        let mut state = world();
        let mut buffers = PoseBuffers::default();
        state.add_body(id("ground"), ground()).expect("ground");
        state
            .add_body(id("ball"), sphere(1.0, [0.0, 3.0, 0.0]))
            .expect("ball");

        run(&mut state, &mut buffers, 240);

        let y = state.translation(&id("ball")).expect("ball exists")[1];
        assert!((y - 0.5).abs() < 0.05, "ball rests at {y}");
        assert!(state.touching(&id("ground"), &id("ball")));
    }

    #[test]
    fn when_ball_lands_then_one_begin_and_one_collide_per_listener_are_reported() {
        let mut state = world();
        let mut buffers = PoseBuffers::default();
        state.add_body(id("ground"), ground()).expect("ground");
        let mut ball = sphere(1.0, [0.0, 2.0, 0.0]);
        ball.has_collide_callback = true;
        state.add_body(id("ball"), ball).expect("ball");

        let outputs = run(&mut state, &mut buffers, 180);
        let begins: usize = outputs.iter().map(|o| o.contact_begins.len()).sum();
        let collisions: Vec<&CollideEvent> =
            outputs.iter().flat_map(|o| o.collisions.iter()).collect();

        assert_eq!(begins, 1);
        assert_eq!(collisions.len(), 1);
        let collide = collisions[0];
        assert_eq!(collide.target, id("ball"));
        assert_eq!(collide.body, id("ground"));
        assert!(collide.contact.contact_normal[1] > 0.9);
        assert!(collide.contact.impact_velocity > 0.0);
    }

    #[test]
    fn when_touching_body_is_removed_then_no_end_is_reported() {
        let mut state = world();
        let mut buffers = PoseBuffers::default();
        state.add_body(id("ground"), ground()).expect("ground");
        state
            .add_body(id("ball"), sphere(1.0, [0.0, 0.5, 0.0]))
            .expect("ball");
        run(&mut state, &mut buffers, 10);
        assert!(state.touching(&id("ground"), &id("ball")));

        state.remove_body(&id("ball")).expect("remove ball");
        let outputs = run(&mut state, &mut buffers, 5);

        assert!(outputs.iter().all(|o| o.contact_ends.is_empty()));
        assert!(!state.touching(&id("ground"), &id("ball")));
    }

    #[test]
    fn when_compound_body_is_added_then_engine_holds_one_body() {
        let mut state = world();
        let child = |x: f32| CompoundChild {
            shape: Shape::Box {
                extents: [0.5, 0.5, 0.5],
            },
            position: [x, 0.0, 0.0],
            rotation: [0.0; 3],
            material: None,
        };
        let params = BodyParams::new(Shape::Compound {
            shapes: vec![child(-1.0), child(1.0)],
        })
        .with_mass(2.0);

        state.add_body(id("dumbbell"), params).expect("compound");

        assert_eq!(state.engine_body_count(), 1);
        assert_eq!(state.body(&id("dumbbell")).map(|b| b.colliders.len()), Some(2));
        state.remove_body(&id("dumbbell")).expect("remove");
        assert_eq!(state.engine_body_count(), 0);
    }

    #[test]
    fn when_static_body_gets_mass_then_it_starts_falling() {
        let mut state = world();
        let mut buffers = PoseBuffers::default();
        state
            .add_body(id("crate"), sphere(0.0, [0.0, 10.0, 0.0]))
            .expect("crate");

        run(&mut state, &mut buffers, 10);
        assert_eq!(state.translation(&id("crate")), Some([0.0, 10.0, 0.0]));

        state.set_body(&id("crate"), BodyValue::Mass(1.0)).expect("mass");
        run(&mut state, &mut buffers, 10);

        assert_eq!(state.body(&id("crate")).map(|b| b.kind), Some(BodyKind::Dynamic));
        assert!(state.translation(&id("crate")).expect("crate")[1] < 10.0);
    }

    #[test]
    fn when_elapsed_time_is_given_then_steps_follow_the_accumulator() {
        let mut state = world();
        let mut buffers = PoseBuffers::default();
        let step = state.config().step_size;

        assert_eq!(state.step(Some(step * 0.5), &mut buffers).internal_steps, 0);
        assert_eq!(state.step(Some(step * 0.5), &mut buffers).internal_steps, 1);
        assert_eq!(state.step(None, &mut buffers).internal_steps, 1);
        assert_eq!(state.step(Some(step * 100.0), &mut buffers).internal_steps, 10);
    }

    #[test]
    fn when_elapsed_time_is_zero_or_negative_then_one_fixed_step_runs() {
        let mut state = world();
        let mut buffers = PoseBuffers::default();
        state
            .add_body(id("ball"), sphere(1.0, [0.0, 5.0, 0.0]))
            .expect("ball");

        assert_eq!(state.step(Some(0.0), &mut buffers).internal_steps, 1);
        assert!(state.translation(&id("ball")).expect("ball")[1] < 5.0);
        assert_eq!(state.step(Some(-1.0), &mut buffers).internal_steps, 1);
        assert_eq!(state.step(Some(f32::NAN), &mut buffers).internal_steps, 1);
    }

    #[test]
    fn when_impulse_is_applied_then_velocity_changes_once() {
        let mut state = SimulationState::new(WorldConfig::default().with_gravity([0.0; 3]));
        let mut buffers = PoseBuffers::default();
        state
            .add_body(id("puck"), sphere(2.0, [0.0; 3]))
            .expect("puck");

        state
            .apply_body(
                &id("puck"),
                DynamicsInput::Impulse {
                    impulse: [4.0, 0.0, 0.0],
                    world_point: [0.0; 3],
                },
            )
            .expect("impulse");
        run(&mut state, &mut buffers, 3);

        let vx = state.linear_velocity(&id("puck")).expect("puck")[0];
        assert!((vx - 2.0).abs() < 0.05, "vx = {vx}");
    }

    #[test]
    fn when_subscribed_then_each_step_reports_the_value() {
        let mut state = world();
        let mut buffers = PoseBuffers::default();
        state
            .add_body(id("ball"), sphere(1.0, [0.0, 5.0, 0.0]))
            .expect("ball");
        state.subscribe(SubscriptionSpec {
            id: 7,
            uuid: id("ball"),
            target: SubscriptionTarget::Body(BodyProperty::Mass),
        });

        let output = state.step(None, &mut buffers);

        assert_eq!(output.observations.len(), 1);
        assert_eq!(output.observations[0].subscription, 7);
        assert_eq!(output.observations[0].value, ObservedValue::Number(1.0));
        assert_eq!(output.observations[0].property, "mass");

        state.unsubscribe(7).expect("unsubscribe");
        assert!(state.step(None, &mut buffers).observations.is_empty());
        assert!(state.unsubscribe(7).is_err());
    }

    #[test]
    fn when_ray_points_at_ground_then_closest_hit_is_reported() {
        let mut state = world();
        let mut buffers = PoseBuffers::default();
        state.add_body(id("ground"), ground()).expect("ground");
        state
            .add_ray(RaySpec {
                id: id("down"),
                mode: RayMode::Closest,
                options: RayOptions {
                    from: [0.0, 5.0, 0.0],
                    to: [0.0, -5.0, 0.0],
                    ..RayOptions::default()
                },
            })
            .expect("ray");

        run(&mut state, &mut buffers, 1);
        let output = state.step(None, &mut buffers);

        let hit = output.ray_hits.first().expect("one result per test");
        assert!(hit.has_hit);
        assert_eq!(hit.body, Some(id("ground")));
        assert!((hit.distance - 5.0).abs() < 1.0e-3);
        assert!(hit.hit_normal[1] > 0.99);
    }

    #[test]
    fn when_body_is_removed_then_attached_constraints_and_springs_go_with_it() {
        let mut state = world();
        state.add_body(id("a"), sphere(1.0, [0.0, 5.0, 0.0])).expect("a");
        state.add_body(id("b"), sphere(1.0, [2.0, 5.0, 0.0])).expect("b");
        state
            .add_constraint(ConstraintSpec {
                id: id("hinge"),
                kind: ConstraintKind::Hinge,
                body_a: id("a"),
                body_b: id("b"),
                options: ConstraintOptions::default(),
            })
            .expect("hinge");
        state
            .add_spring(SpringSpec {
                id: id("spring"),
                body_a: id("a"),
                body_b: id("b"),
                options: SpringOptions::default(),
            })
            .expect("spring");
        state.set_motor_enabled(&id("hinge"), true).expect("motor on");
        state.set_motor_speed(&id("hinge"), 2.0).expect("motor speed");

        state.remove_body(&id("b")).expect("remove b");

        assert_eq!(state.constraint_count(), 0);
        assert_eq!(state.spring_count(), 0);
    }

    #[test]
    fn when_motor_is_driven_on_a_joint_without_one_then_error() {
        let mut state = world();
        state.add_body(id("a"), sphere(1.0, [0.0, 5.0, 0.0])).expect("a");
        state.add_body(id("b"), sphere(1.0, [2.0, 5.0, 0.0])).expect("b");
        state
            .add_constraint(ConstraintSpec {
                id: id("lock"),
                kind: ConstraintKind::Lock,
                body_a: id("a"),
                body_b: id("b"),
                options: ConstraintOptions::default(),
            })
            .expect("lock");

        assert!(matches!(
            state.set_motor_speed(&id("lock"), 1.0),
            Err(WorkerError::NoMotor(_))
        ));
        state.set_constraint_enabled(&id("lock"), false).expect("disable");
        state.remove_constraint(&id("lock")).expect("remove");
        assert!(state.remove_constraint(&id("lock")).is_err());
    }

    #[test]
    fn when_world_gravity_changes_then_bodies_follow_it() {
        let mut state = world();
        let mut buffers = PoseBuffers::default();
        state
            .add_body(id("ball"), sphere(1.0, [0.0; 3]))
            .expect("ball");

        state.set_world(WorldValue::Gravity([0.0, 10.0, 0.0]));
        run(&mut state, &mut buffers, 10);

        assert_eq!(state.config().gravity, [0.0, 10.0, 0.0]);
        assert!(state.translation(&id("ball")).expect("ball")[1] > 0.0);
    }

    #[test]
    fn when_resting_ball_is_knocked_away_then_one_end_follows_the_begin() {
        let mut state = world();
        let mut buffers = PoseBuffers::default();
        state.add_body(id("ground"), ground()).expect("ground");
        state
            .add_body(id("ball"), sphere(1.0, [0.0, 0.5, 0.0]))
            .expect("ball");
        let mut outputs = run(&mut state, &mut buffers, 10);
        assert!(state.touching(&id("ground"), &id("ball")));

        state
            .apply_body(
                &id("ball"),
                DynamicsInput::Impulse {
                    impulse: [0.0, 20.0, 0.0],
                    world_point: [0.0, 0.5, 0.0],
                },
            )
            .expect("impulse");
        outputs.extend(run(&mut state, &mut buffers, 30));

        let pair = ContactChange::ordered(id("ground"), id("ball"));
        let begins = outputs
            .iter()
            .flat_map(|o| o.contact_begins.iter())
            .filter(|change| **change == pair)
            .count();
        let ends = outputs
            .iter()
            .flat_map(|o| o.contact_ends.iter())
            .filter(|change| **change == pair)
            .count();
        assert_eq!(begins, 1);
        assert_eq!(ends, 1);
        assert!(!state.touching(&id("ground"), &id("ball")));
    }

    fn car(state: &mut SimulationState) {
        state.add_body(id("ground"), ground()).expect("ground");
        state
            .add_body(
                id("chassis"),
                BodyParams::new(Shape::Box {
                    extents: [1.0, 0.25, 2.0],
                })
                .with_mass(150.0)
                .at([0.0, 1.0, 0.0]),
            )
            .expect("chassis");
        let corners = [[-1.0, 0.0, 1.5], [1.0, 0.0, 1.5], [-1.0, 0.0, -1.5], [1.0, 0.0, -1.5]];
        let mut wheels = Vec::new();
        let mut wheel_infos = Vec::new();
        for (i, corner) in corners.into_iter().enumerate() {
            let wheel = EntityId::new(format!("wheel-{i}"));
            let mut params = BodyParams::new(Shape::Sphere { radius: 0.5 })
                .with_kind(BodyKind::Kinematic)
                .at([corner[0], 0.5, corner[2]]);
            params.collision_response = false;
            state.add_body(wheel.clone(), params).expect("wheel");
            wheels.push(wheel);
            wheel_infos.push(WheelInfo {
                chassis_connection_point_local: corner,
                ..WheelInfo::default()
            });
        }
        state
            .add_vehicle(VehicleSpec {
                id: id("car"),
                chassis: id("chassis"),
                wheels,
                wheel_infos,
                index_forward_axis: 2,
                index_right_axis: 0,
                index_up_axis: 1,
            })
            .expect("vehicle");
    }

    #[test]
    fn when_vehicle_settles_then_suspension_holds_chassis_and_wheels_follow() {
        let mut state = world();
        let mut buffers = PoseBuffers::default();
        car(&mut state);

        run(&mut state, &mut buffers, 120);

        let chassis = state.translation(&id("chassis")).expect("chassis");
        let vy = state.linear_velocity(&id("chassis")).expect("chassis")[1];
        assert!(chassis[1] > 0.5 && chassis[1] < 1.0, "chassis rests at {}", chassis[1]);
        assert!(vy.abs() < 0.1, "chassis still bouncing, vy = {vy}");
        let wheel = state.translation(&id("wheel-0")).expect("wheel");
        assert!(wheel[1] < chassis[1], "wheel hangs below its connection point");
        assert!((wheel[1] - 0.5).abs() < 0.1, "wheel sits on the ground, y = {}", wheel[1]);
        assert!((wheel[2] - (chassis[2] + 1.5)).abs() < 0.05);
    }

    #[test]
    fn when_engine_force_is_applied_then_vehicle_drives_forward() {
        let mut state = world();
        let mut buffers = PoseBuffers::default();
        car(&mut state);
        run(&mut state, &mut buffers, 60);

        for wheel in 0..4 {
            state
                .set_wheel(&id("car"), wheel, WheelValue::EngineForce(500.0))
                .expect("engine force");
        }
        run(&mut state, &mut buffers, 120);

        let vz = state.linear_velocity(&id("chassis")).expect("chassis")[2];
        assert!(vz > 10.0, "chassis should accelerate along +Z, vz = {vz}");
        let chassis = state.translation(&id("chassis")).expect("chassis");
        let wheel = state.translation(&id("wheel-0")).expect("wheel");
        assert!((wheel[2] - (chassis[2] + 1.5)).abs() < 0.1);
        assert!(matches!(
            state.set_wheel(&id("car"), 4, WheelValue::Brake(1.0)),
            Err(WorkerError::UnknownWheel { .. })
        ));
    }

    #[test]
    fn when_wheel_body_is_removed_then_its_vehicle_goes_with_it() {
        let mut state = world();
        car(&mut state);
        assert_eq!(state.vehicle_count(), 1);

        state.remove_body(&id("wheel-2")).expect("remove wheel");

        assert_eq!(state.vehicle_count(), 0);
    }

    #[test]
    fn when_spring_is_stretched_then_stepping_pulls_the_bodies_together() {
        let mut state = SimulationState::new(WorldConfig::default().with_gravity([0.0; 3]));
        let mut buffers = PoseBuffers::default();
        state.add_body(id("a"), sphere(1.0, [0.0; 3])).expect("a");
        state.add_body(id("b"), sphere(1.0, [3.0, 0.0, 0.0])).expect("b");
        state
            .add_spring(SpringSpec {
                id: id("spring"),
                body_a: id("a"),
                body_b: id("b"),
                options: SpringOptions {
                    rest_length: 1.0,
                    stiffness: 50.0,
                    ..SpringOptions::default()
                },
            })
            .expect("spring");

        run(&mut state, &mut buffers, 10);

        let a = state.translation(&id("a")).expect("a");
        let b = state.translation(&id("b")).expect("b");
        assert!(a[0] > 0.0, "a pulled toward b, x = {}", a[0]);
        assert!(b[0] < 3.0, "b pulled toward a, x = {}", b[0]);
        assert!((a[0] + b[0] - 3.0).abs() < 1.0e-3, "equal masses meet in the middle");
        assert!(state.linear_velocity(&id("a")).expect("a")[0] > 0.0);
    }

    #[test]
    fn when_all_mode_ray_crosses_two_bodies_then_every_hit_is_reported_nearest_first() {
        let mut state = world();
        let mut buffers = PoseBuffers::default();
        state.add_body(id("ground"), ground()).expect("ground");
        state
            .add_body(id("ball"), sphere(0.0, [0.0, 2.0, 0.0]))
            .expect("ball");
        state
            .add_ray(RaySpec {
                id: id("down"),
                mode: RayMode::All,
                options: RayOptions {
                    from: [0.0, 5.0, 0.0],
                    to: [0.0, -5.0, 0.0],
                    ..RayOptions::default()
                },
            })
            .expect("ray");

        run(&mut state, &mut buffers, 1);
        let output = state.step(None, &mut buffers);

        assert_eq!(output.ray_hits.len(), 2);
        let (near, far) = (&output.ray_hits[0], &output.ray_hits[1]);
        assert_eq!(near.body, Some(id("ball")));
        assert_eq!(far.body, Some(id("ground")));
        assert!((near.distance - 2.5).abs() < 1.0e-3);
        assert!((far.distance - 5.0).abs() < 1.0e-3);
        assert!(output.ray_hits.iter().all(|hit| hit.has_hit && hit.ray.mode == RayMode::All));
    }
}

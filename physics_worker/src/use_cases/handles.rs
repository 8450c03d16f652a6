// Handles returned by the host proxy for the entities it created.

use super::host::HostProxy;
use super::types::WorkerCommand;
use crate::domain::shapes::euler_to_quaternion;
use crate::domain::systems::quaternion_array;
use crate::domain::{
    BodyProperty, BodyValue, DynamicsInput, EntityId, Material, ObservedValue, RenderRef,
    SpringProperty, SpringValue, SubscriptionTarget, VehicleProperty, WheelValue,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

enum Target {
    Single(EntityId),
    /// Root of an instanced batch. Only `destroy` and `at` act on it.
    Batch {
        root: EntityId,
        ids: Vec<EntityId>,
    },
    Instance(EntityId),
}

/// Control surface for one body, one instance, or an instanced batch.
pub struct BodyApi {
    proxy: HostProxy,
    render: RenderRef,
    target: Target,
    instances: Mutex<HashMap<usize, Arc<BodyApi>>>,
}

impl BodyApi {
    pub(crate) fn single(proxy: HostProxy, render: RenderRef, id: EntityId) -> Self {
        Self::with_target(proxy, render, Target::Single(id))
    }

    pub(crate) fn batch(
        proxy: HostProxy,
        render: RenderRef,
        root: EntityId,
        ids: Vec<EntityId>,
    ) -> Self {
        Self::with_target(proxy, render, Target::Batch { root, ids })
    }

    fn with_target(proxy: HostProxy, render: RenderRef, target: Target) -> Self {
        Self {
            proxy,
            render,
            target,
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Body id; `None` for a batch root.
    pub fn id(&self) -> Option<&EntityId> {
        match &self.target {
            Target::Single(id) | Target::Instance(id) => Some(id),
            Target::Batch { .. } => None,
        }
    }

    pub fn render(&self) -> &RenderRef {
        &self.render
    }

    /// Handle for instance `index` of a batch. Repeated calls return the same handle.
    pub fn at(&self, index: usize) -> Option<Arc<BodyApi>> {
        let Target::Batch { ids, .. } = &self.target else {
            return None;
        };
        let id = ids.get(index)?;
        let mut instances = self
            .instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let api = instances.entry(index).or_insert_with(|| {
            Arc::new(BodyApi::with_target(
                self.proxy.clone(),
                self.render.clone(),
                Target::Instance(id.clone()),
            ))
        });
        Some(api.clone())
    }

    fn set(&self, value: BodyValue) {
        match &self.target {
            Target::Single(id) | Target::Instance(id) => self.proxy.send_to_body(
                id,
                WorkerCommand::SetBody {
                    id: id.clone(),
                    value,
                },
            ),
            Target::Batch { root, .. } => {
                debug!(id = %root, property = %value.property(), "batch root ignores setter");
            }
        }
    }

    fn subscribe(
        &self,
        property: BodyProperty,
        callback: impl Fn(ObservedValue) + Send + Sync + 'static,
    ) -> Subscription {
        match &self.target {
            Target::Single(id) | Target::Instance(id) => self.proxy.subscribe(
                id,
                SubscriptionTarget::Body(property),
                Arc::new(callback),
            ),
            Target::Batch { .. } => Subscription::inert(),
        }
    }

    fn send(&self, make: impl FnOnce(EntityId) -> WorkerCommand) {
        if let Target::Single(id) | Target::Instance(id) = &self.target {
            self.proxy.send_to_body(id, make(id.clone()));
        }
    }

    fn apply(&self, input: DynamicsInput) {
        self.send(|id| WorkerCommand::ApplyBody { id, input });
    }

    pub fn position(&self) -> VectorHandle<'_> {
        VectorHandle::new(self, BodyProperty::Position, BodyValue::Position)
    }

    /// Euler angles (XYZ order).
    pub fn rotation(&self) -> VectorHandle<'_> {
        VectorHandle::new(self, BodyProperty::Rotation, BodyValue::Rotation)
    }

    pub fn velocity(&self) -> VectorHandle<'_> {
        VectorHandle::new(self, BodyProperty::Velocity, BodyValue::Velocity)
    }

    pub fn angular_velocity(&self) -> VectorHandle<'_> {
        VectorHandle::new(self, BodyProperty::AngularVelocity, BodyValue::AngularVelocity)
    }

    pub fn linear_factor(&self) -> VectorHandle<'_> {
        VectorHandle::new(self, BodyProperty::LinearFactor, BodyValue::LinearFactor)
    }

    pub fn angular_factor(&self) -> VectorHandle<'_> {
        VectorHandle::new(self, BodyProperty::AngularFactor, BodyValue::AngularFactor)
    }

    pub fn quaternion(&self) -> QuaternionHandle<'_> {
        QuaternionHandle { body: self }
    }

    pub fn mass(&self) -> AtomicHandle<'_, f32> {
        AtomicHandle::new(self, BodyProperty::Mass, BodyValue::Mass)
    }

    pub fn linear_damping(&self) -> AtomicHandle<'_, f32> {
        AtomicHandle::new(self, BodyProperty::LinearDamping, BodyValue::LinearDamping)
    }

    pub fn angular_damping(&self) -> AtomicHandle<'_, f32> {
        AtomicHandle::new(self, BodyProperty::AngularDamping, BodyValue::AngularDamping)
    }

    pub fn allow_sleep(&self) -> AtomicHandle<'_, bool> {
        AtomicHandle::new(self, BodyProperty::AllowSleep, BodyValue::AllowSleep)
    }

    pub fn sleep_speed_limit(&self) -> AtomicHandle<'_, f32> {
        AtomicHandle::new(self, BodyProperty::SleepSpeedLimit, BodyValue::SleepSpeedLimit)
    }

    pub fn sleep_time_limit(&self) -> AtomicHandle<'_, f32> {
        AtomicHandle::new(self, BodyProperty::SleepTimeLimit, BodyValue::SleepTimeLimit)
    }

    pub fn collision_filter_group(&self) -> AtomicHandle<'_, u32> {
        AtomicHandle::new(
            self,
            BodyProperty::CollisionFilterGroup,
            BodyValue::CollisionFilterGroup,
        )
    }

    pub fn collision_filter_mask(&self) -> AtomicHandle<'_, u32> {
        AtomicHandle::new(
            self,
            BodyProperty::CollisionFilterMask,
            BodyValue::CollisionFilterMask,
        )
    }

    pub fn collision_response(&self) -> AtomicHandle<'_, bool> {
        AtomicHandle::new(
            self,
            BodyProperty::CollisionResponse,
            BodyValue::CollisionResponse,
        )
    }

    pub fn fixed_rotation(&self) -> AtomicHandle<'_, bool> {
        AtomicHandle::new(self, BodyProperty::FixedRotation, BodyValue::FixedRotation)
    }

    pub fn is_trigger(&self) -> AtomicHandle<'_, bool> {
        AtomicHandle::new(self, BodyProperty::IsTrigger, BodyValue::IsTrigger)
    }

    pub fn material(&self) -> AtomicHandle<'_, Material> {
        AtomicHandle::new(self, BodyProperty::Material, BodyValue::Material)
    }

    pub fn user_data(&self) -> AtomicHandle<'_, serde_json::Value> {
        AtomicHandle::new(self, BodyProperty::UserData, BodyValue::UserData)
    }

    pub fn apply_force(&self, force: [f32; 3], world_point: [f32; 3]) {
        self.apply(DynamicsInput::Force { force, world_point });
    }

    pub fn apply_impulse(&self, impulse: [f32; 3], world_point: [f32; 3]) {
        self.apply(DynamicsInput::Impulse {
            impulse,
            world_point,
        });
    }

    pub fn apply_local_force(&self, force: [f32; 3], local_point: [f32; 3]) {
        self.apply(DynamicsInput::LocalForce { force, local_point });
    }

    pub fn apply_local_impulse(&self, impulse: [f32; 3], local_point: [f32; 3]) {
        self.apply(DynamicsInput::LocalImpulse {
            impulse,
            local_point,
        });
    }

    pub fn apply_torque(&self, torque: [f32; 3]) {
        self.apply(DynamicsInput::Torque { torque });
    }

    pub fn wake_up(&self) {
        self.send(|id| WorkerCommand::WakeUp { id });
    }

    pub fn sleep(&self) {
        self.send(|id| WorkerCommand::Sleep { id });
    }

    /// Remove the body; on a batch root, every instance.
    pub fn destroy(&self) {
        match &self.target {
            Target::Single(id) | Target::Instance(id) => {
                self.proxy.destroy_bodies(std::slice::from_ref(id))
            }
            Target::Batch { ids, .. } => self.proxy.destroy_bodies(ids),
        }
    }
}

pub struct VectorHandle<'a> {
    body: &'a BodyApi,
    property: BodyProperty,
    make: fn([f32; 3]) -> BodyValue,
}

impl<'a> VectorHandle<'a> {
    fn new(body: &'a BodyApi, property: BodyProperty, make: fn([f32; 3]) -> BodyValue) -> Self {
        Self {
            body,
            property,
            make,
        }
    }

    pub fn set(&self, value: [f32; 3]) {
        self.body.set((self.make)(value));
    }

    pub fn subscribe(&self, callback: impl Fn([f32; 3]) + Send + Sync + 'static) -> Subscription {
        self.body.subscribe(self.property, move |value| {
            if let ObservedValue::Vector(vector) = value {
                callback(vector);
            }
        })
    }
}

pub struct QuaternionHandle<'a> {
    body: &'a BodyApi,
}

impl QuaternionHandle<'_> {
    /// `[x, y, z, w]`.
    pub fn set(&self, value: [f32; 4]) {
        self.body.set(BodyValue::Quaternion(value));
    }

    /// Delivers `[x, y, z, w]`.
    pub fn subscribe(&self, callback: impl Fn([f32; 4]) + Send + Sync + 'static) -> Subscription {
        self.body.subscribe(BodyProperty::Quaternion, move |value| {
            // Orientation is observed as Euler angles.
            if let ObservedValue::Vector(euler) = value {
                callback(quaternion_array(&euler_to_quaternion(euler)));
            }
        })
    }
}

pub struct AtomicHandle<'a, T> {
    body: &'a BodyApi,
    property: BodyProperty,
    make: fn(T) -> BodyValue,
}

impl<'a, T> AtomicHandle<'a, T> {
    fn new(body: &'a BodyApi, property: BodyProperty, make: fn(T) -> BodyValue) -> Self {
        Self {
            body,
            property,
            make,
        }
    }

    pub fn set(&self, value: T) {
        self.body.set((self.make)(value));
    }

    pub fn subscribe(
        &self,
        callback: impl Fn(ObservedValue) + Send + Sync + 'static,
    ) -> Subscription {
        self.body.subscribe(self.property, callback)
    }
}

/// A live property stream. Dropping it keeps the stream; call `unsubscribe` to stop it.
#[must_use]
pub struct Subscription {
    proxy: Option<HostProxy>,
    id: u64,
}

impl Subscription {
    pub(crate) fn new(proxy: HostProxy, id: u64) -> Self {
        Self {
            proxy: Some(proxy),
            id,
        }
    }

    /// A subscription to an entity that no longer exists.
    pub(crate) fn inert() -> Self {
        Self { proxy: None, id: 0 }
    }

    pub fn is_active(&self) -> bool {
        self.proxy.is_some()
    }

    pub fn unsubscribe(self) {
        if let Some(proxy) = self.proxy {
            proxy.unsubscribe(self.id);
        }
    }
}

pub struct ConstraintApi {
    proxy: HostProxy,
    id: EntityId,
}

impl ConstraintApi {
    pub(crate) fn new(proxy: HostProxy, id: EntityId) -> Self {
        Self { proxy, id }
    }

    pub fn id(&self) -> &EntityId {
        &self.id
    }

    fn send(&self, make: impl FnOnce(EntityId) -> WorkerCommand) {
        self.proxy.send_to_auxiliary(&self.id, make(self.id.clone()));
    }

    pub fn enable(&self) {
        self.send(|id| WorkerCommand::EnableConstraint { id });
    }

    pub fn disable(&self) {
        self.send(|id| WorkerCommand::DisableConstraint { id });
    }

    /// Hinge only; the worker reports an error for other kinds.
    pub fn enable_motor(&self) {
        self.send(|id| WorkerCommand::EnableConstraintMotor { id });
    }

    pub fn disable_motor(&self) {
        self.send(|id| WorkerCommand::DisableConstraintMotor { id });
    }

    pub fn set_motor_speed(&self, speed: f32) {
        self.send(|id| WorkerCommand::SetConstraintMotorSpeed { id, speed });
    }

    pub fn set_motor_max_force(&self, max_force: f32) {
        self.send(|id| WorkerCommand::SetConstraintMotorMaxForce { id, max_force });
    }

    pub fn remove(&self) {
        self.proxy.remove_auxiliary(
            &self.id,
            WorkerCommand::RemoveConstraint {
                id: self.id.clone(),
            },
        );
    }
}

pub struct SpringApi {
    proxy: HostProxy,
    id: EntityId,
}

impl SpringApi {
    pub(crate) fn new(proxy: HostProxy, id: EntityId) -> Self {
        Self { proxy, id }
    }

    pub fn id(&self) -> &EntityId {
        &self.id
    }

    fn set(&self, value: SpringValue) {
        self.proxy.send_to_auxiliary(
            &self.id,
            WorkerCommand::SetSpring {
                id: self.id.clone(),
                value,
            },
        );
    }

    pub fn set_stiffness(&self, stiffness: f32) {
        self.set(SpringValue::Stiffness(stiffness));
    }

    pub fn set_rest_length(&self, rest_length: f32) {
        self.set(SpringValue::RestLength(rest_length));
    }

    pub fn set_damping(&self, damping: f32) {
        self.set(SpringValue::Damping(damping));
    }

    pub fn subscribe(
        &self,
        property: SpringProperty,
        callback: impl Fn(f32) + Send + Sync + 'static,
    ) -> Subscription {
        self.proxy.subscribe(
            &self.id,
            SubscriptionTarget::Spring(property),
            Arc::new(move |value| {
                if let ObservedValue::Number(number) = value {
                    callback(number);
                }
            }),
        )
    }

    pub fn remove(&self) {
        self.proxy.remove_auxiliary(
            &self.id,
            WorkerCommand::RemoveSpring {
                id: self.id.clone(),
            },
        );
    }
}

pub struct VehicleApi {
    proxy: HostProxy,
    id: EntityId,
}

impl VehicleApi {
    pub(crate) fn new(proxy: HostProxy, id: EntityId) -> Self {
        Self { proxy, id }
    }

    pub fn id(&self) -> &EntityId {
        &self.id
    }

    fn set_wheel(&self, wheel: usize, value: WheelValue) {
        self.proxy.send_to_auxiliary(
            &self.id,
            WorkerCommand::SetVehicleWheel {
                id: self.id.clone(),
                wheel,
                value,
            },
        );
    }

    /// Steering angle in radians.
    pub fn set_steering_value(&self, value: f32, wheel: usize) {
        self.set_wheel(wheel, WheelValue::Steering(value));
    }

    pub fn apply_engine_force(&self, value: f32, wheel: usize) {
        self.set_wheel(wheel, WheelValue::EngineForce(value));
    }

    pub fn set_brake(&self, brake: f32, wheel: usize) {
        self.set_wheel(wheel, WheelValue::Brake(brake));
    }

    pub fn subscribe_sliding(
        &self,
        callback: impl Fn(bool) + Send + Sync + 'static,
    ) -> Subscription {
        self.proxy.subscribe(
            &self.id,
            SubscriptionTarget::Vehicle(VehicleProperty::Sliding),
            Arc::new(move |value| {
                if let ObservedValue::Flag(sliding) = value {
                    callback(sliding);
                }
            }),
        )
    }

    pub fn remove(&self) {
        self.proxy.remove_auxiliary(
            &self.id,
            WorkerCommand::RemoveRaycastVehicle {
                id: self.id.clone(),
            },
        );
    }
}

pub struct RayApi {
    proxy: HostProxy,
    id: EntityId,
}

impl RayApi {
    pub(crate) fn new(proxy: HostProxy, id: EntityId) -> Self {
        Self { proxy, id }
    }

    pub fn id(&self) -> &EntityId {
        &self.id
    }

    pub fn remove(&self) {
        self.proxy.remove_auxiliary(
            &self.id,
            WorkerCommand::RemoveRay {
                id: self.id.clone(),
            },
        );
    }
}

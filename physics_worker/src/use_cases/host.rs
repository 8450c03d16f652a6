// Host proxy: the client-facing side of the simulation.
//
// The proxy turns method calls into `WorkerCommand`s, keeps the registry that maps
// entity ids back to render objects and callbacks, and owns the pose buffers while no
// step is in flight. Worker events are folded back in by `handle_event`, either from the
// event pump started by `spawn` or from a custom transport.
//
// Callbacks are always invoked after the registry lock is released, so a callback may
// call back into the proxy.

use super::handles::{
    BodyApi, ConstraintApi, RayApi, SpringApi, Subscription, VehicleApi,
};
use super::types::{Frame, WorkerCommand, WorkerEvent};
use super::worker::worker_task;
use crate::domain::render::{RenderKey, compose};
use crate::domain::systems::quaternion_array;
use crate::domain::{
    BodyParams, BufferSlot, CollideEvent, CollisionFilters, ConstraintKind, ConstraintOptions,
    ConstraintSpec, ContactChange, EntityId, HostError, ObservedValue, PoseBuffers, RayGeometry,
    RayHit, RayMode, RayOptions, RaySpec, RenderRef, SpringOptions, SpringSpec, StepError,
    SubscriptionSpec, SubscriptionTarget, VehicleSpec, WheelInfo, WorldConfig, WorldValue,
    shapes::euler_to_quaternion,
};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, Copy)]
pub struct ProxySettings {
    /// How long `step(.., true)` waits for its frame.
    pub step_timeout: Duration,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            step_timeout: DEFAULT_STEP_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// No bodies are tracked yet; nothing was sent.
    Skipped,
    /// Sent without waiting for the frame.
    Sent,
    /// The frame carrying `origin` has been applied.
    Completed { origin: u64 },
    /// A step was already in flight; this call rode on it instead of sending another.
    Coalesced,
}

/// A body resolved back to its render object.
#[derive(Clone)]
pub struct BodyRef {
    pub id: EntityId,
    pub render: RenderRef,
    /// Instance index inside a batched render object.
    pub instance: Option<usize>,
}

impl fmt::Debug for BodyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyRef")
            .field("id", &self.id)
            .field("instance", &self.instance)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct HostContact {
    pub id: u64,
    pub bi: Option<BodyRef>,
    pub bj: Option<BodyRef>,
    pub contact_point: [f32; 3],
    pub contact_normal: [f32; 3],
    pub impact_velocity: f32,
}

#[derive(Debug, Clone)]
pub struct HostCollide {
    pub body: Option<BodyRef>,
    pub target: Option<BodyRef>,
    pub contact: HostContact,
    pub collision_filters: CollisionFilters,
}

#[derive(Debug, Clone)]
pub struct HostContactChange {
    /// The other body of the pair.
    pub body: Option<BodyRef>,
    /// The body whose callback is being invoked.
    pub target: Option<BodyRef>,
}

#[derive(Debug, Clone)]
pub struct HostRayHit {
    pub ray: RayGeometry,
    pub has_hit: bool,
    pub body: Option<BodyRef>,
    pub hit_point: [f32; 3],
    pub hit_normal: [f32; 3],
    pub hit_face_index: i64,
    pub distance: f32,
}

pub type CollideCallback = Arc<dyn Fn(HostCollide) + Send + Sync>;
pub type ContactCallback = Arc<dyn Fn(HostContactChange) + Send + Sync>;
pub type RayCallback = Arc<dyn Fn(HostRayHit) + Send + Sync>;
pub type ObserveCallback = Arc<dyn Fn(ObservedValue) + Send + Sync>;

/// Collision callbacks registered with a body. Only the presence of `on_collide` is
/// sent to the worker.
#[derive(Clone, Default)]
pub struct BodyCallbacks {
    pub on_collide: Option<CollideCallback>,
    pub on_collide_begin: Option<ContactCallback>,
    pub on_collide_end: Option<ContactCallback>,
}

impl BodyCallbacks {
    pub fn on_collide(mut self, callback: impl Fn(HostCollide) + Send + Sync + 'static) -> Self {
        self.on_collide = Some(Arc::new(callback));
        self
    }

    pub fn on_collide_begin(
        mut self,
        callback: impl Fn(HostContactChange) + Send + Sync + 'static,
    ) -> Self {
        self.on_collide_begin = Some(Arc::new(callback));
        self
    }

    pub fn on_collide_end(
        mut self,
        callback: impl Fn(HostContactChange) + Send + Sync + 'static,
    ) -> Self {
        self.on_collide_end = Some(Arc::new(callback));
        self
    }
}

struct Tracked {
    render: RenderRef,
    batched: bool,
    bodies: Vec<BodyRef>,
}

struct HostInner {
    slot: BufferSlot,
    refs: HashMap<EntityId, BodyRef>,
    tracked: HashMap<RenderKey, Tracked>,
    callbacks: HashMap<EntityId, BodyCallbacks>,
    ray_callbacks: HashMap<EntityId, RayCallback>,
    subscriptions: HashMap<u64, ObserveCallback>,
    // Buffer slot per body id, rebuilt from frame orderings.
    index: HashMap<EntityId, usize>,
    // Constraints, springs, vehicles and rays.
    auxiliaries: HashSet<EntityId>,
    in_flight_origin: Option<u64>,
    pending: HashMap<u64, Vec<oneshot::Sender<()>>>,
    next_frame_waiters: Vec<oneshot::Sender<()>>,
    next_origin: u64,
    next_subscription: u64,
    closed: bool,
}

impl Default for HostInner {
    fn default() -> Self {
        Self {
            slot: BufferSlot::default(),
            refs: HashMap::new(),
            tracked: HashMap::new(),
            callbacks: HashMap::new(),
            ray_callbacks: HashMap::new(),
            subscriptions: HashMap::new(),
            index: HashMap::new(),
            auxiliaries: HashSet::new(),
            in_flight_origin: None,
            pending: HashMap::new(),
            next_frame_waiters: Vec::new(),
            next_origin: 1,
            next_subscription: 1,
            closed: false,
        }
    }
}

impl HostInner {
    fn body_ref(&self, id: &EntityId) -> Option<BodyRef> {
        self.refs.get(id).cloned()
    }

    fn resolve(&self, render: &RenderRef) -> Result<EntityId, HostError> {
        self.tracked
            .get(&RenderKey::of(render))
            .and_then(|tracked| tracked.bodies.first())
            .map(|body| body.id.clone())
            .ok_or(HostError::UnknownRenderObject)
    }

    /// Write each tracked object's transform from the buffers.
    fn apply_poses(&self, buffers: &PoseBuffers) {
        for tracked in self.tracked.values() {
            let mut render = tracked
                .render
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let scale = render.scale();
            for body in &tracked.bodies {
                let Some(&index) = self.index.get(&body.id) else {
                    continue;
                };
                let (Some(position), Some(quaternion)) =
                    (buffers.position(index), buffers.quaternion(index))
                else {
                    continue;
                };
                let matrix = compose(position, quaternion, scale);
                match (tracked.batched, body.instance) {
                    (true, Some(instance)) => render.set_instance_matrix(instance, matrix),
                    _ => render.set_matrix(matrix),
                }
            }
        }
    }

    fn release_waiters(&mut self) {
        self.pending.clear();
        self.next_frame_waiters.clear();
    }
}

type Shared = Arc<Mutex<HostInner>>;

fn lock(shared: &Mutex<HostInner>) -> MutexGuard<'_, HostInner> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cheap to clone; all clones share one registry and one worker.
#[derive(Clone)]
pub struct HostProxy {
    inner: Shared,
    commands: mpsc::UnboundedSender<WorkerCommand>,
    settings: ProxySettings,
}

enum PreparedStep {
    Send {
        buffers: PoseBuffers,
        origin: Option<u64>,
        done: Option<oneshot::Receiver<()>>,
    },
    Ride {
        origin: Option<u64>,
        done: oneshot::Receiver<()>,
    },
}

impl HostProxy {
    /// Start a worker task plus an event pump on the current runtime and initialize the
    /// world with `config`.
    pub fn spawn(config: WorldConfig, settings: ProxySettings) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        tokio::spawn(worker_task(command_rx, event_tx));

        let proxy = Self::new(command_tx, settings);
        // The pump only holds the registry, so dropping every proxy closes the worker.
        let shared = proxy.inner.clone();
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                dispatch_event(&shared, event);
            }
            debug!("worker event stream ended");
            close(&shared);
        });

        proxy.send(WorkerCommand::Init(config));
        proxy
    }

    /// Proxy over an existing command channel. Events from the worker must be fed to
    /// `handle_event`.
    pub fn new(commands: mpsc::UnboundedSender<WorkerCommand>, settings: ProxySettings) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HostInner::default())),
            commands,
            settings,
        }
    }

    pub fn handle_event(&self, event: WorkerEvent) {
        dispatch_event(&self.inner, event);
    }

    /// Mark the worker as gone: waiting steps fail and later steps are refused.
    pub fn close(&self) {
        close(&self.inner);
    }

    fn lock(&self) -> MutexGuard<'_, HostInner> {
        lock(&self.inner)
    }

    pub(crate) fn send(&self, command: WorkerCommand) -> bool {
        let topic = command.topic();
        match self.commands.send(command) {
            Ok(()) => true,
            Err(_) => {
                debug!(topic = %topic, "worker gone; command dropped");
                false
            }
        }
    }

    /// Send a body command if `id` is still registered; unknown ids are a no-op.
    pub(crate) fn send_to_body(&self, id: &EntityId, command: WorkerCommand) {
        if !self.lock().refs.contains_key(id) {
            debug!(id = %id, topic = %command.topic(), "unknown body; ignored");
            return;
        }
        self.send(command);
    }

    /// Send an auxiliary-entity command if `id` is still registered.
    pub(crate) fn send_to_auxiliary(&self, id: &EntityId, command: WorkerCommand) {
        if !self.lock().auxiliaries.contains(id) {
            debug!(id = %id, topic = %command.topic(), "unknown entity; ignored");
            return;
        }
        self.send(command);
    }

    pub fn set_world(&self, value: WorldValue) {
        self.send(WorkerCommand::SetWorld(value));
    }

    /// Create one body, or one per instance when `render` is a batch.
    ///
    /// `params` is called with each instance index (`0` for a single object). The
    /// initial pose is written into the render object right away.
    pub fn create_body(
        &self,
        render: &RenderRef,
        callbacks: BodyCallbacks,
        params: impl Fn(usize) -> BodyParams,
    ) -> Result<Arc<BodyApi>, HostError> {
        let key = RenderKey::of(render);
        if self.lock().tracked.contains_key(&key) {
            return Err(HostError::AlreadyRegistered);
        }

        let root = EntityId::generate();
        let instances = render
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .instance_count();
        let mut bodies: Vec<(EntityId, BodyParams, Option<usize>)> = match instances {
            None => vec![(root.clone(), params(0), None)],
            Some(0) => return Err(HostError::EmptyBatch),
            Some(count) => (0..count)
                .map(|i| (root.instance(i), params(i), Some(i)))
                .collect(),
        };

        let expected = bodies
            .first()
            .map(|(_, p, _)| p.shape.kind())
            .ok_or(HostError::EmptyBatch)?;
        if let Some((_, mismatched, _)) = bodies.iter().find(|(_, p, _)| p.shape.kind() != expected) {
            return Err(HostError::MixedShapeBatch {
                expected: expected.as_str().to_string(),
                found: mismatched.shape.kind().as_str().to_string(),
            });
        }
        for (_, body, _) in &mut bodies {
            body.has_collide_callback = callbacks.on_collide.is_some();
        }

        echo_initial_pose(render, &bodies);

        let refs: Vec<BodyRef> = bodies
            .iter()
            .map(|(id, _, instance)| BodyRef {
                id: id.clone(),
                render: render.clone(),
                instance: *instance,
            })
            .collect();
        let ids: Vec<EntityId> = refs.iter().map(|body| body.id.clone()).collect();
        let command = WorkerCommand::AddBodies {
            bodies: bodies.into_iter().map(|(id, p, _)| (id, p)).collect(),
        };
        if !self.send(command) {
            return Err(HostError::WorkerGone);
        }

        {
            let mut inner = self.lock();
            for body in &refs {
                inner.refs.insert(body.id.clone(), body.clone());
                inner.callbacks.insert(body.id.clone(), callbacks.clone());
            }
            inner.tracked.insert(
                key,
                Tracked {
                    render: render.clone(),
                    batched: instances.is_some(),
                    bodies: refs,
                },
            );
            let tracked_bodies = inner.refs.len();
            if let Some(buffers) = inner.slot.idle_mut() {
                buffers.resize(tracked_bodies);
            }
        }
        debug!(id = %root, bodies = ids.len(), shape = expected.as_str(), "bodies created");

        Ok(Arc::new(match instances {
            None => BodyApi::single(self.clone(), render.clone(), root),
            Some(_) => BodyApi::batch(self.clone(), render.clone(), root, ids),
        }))
    }

    /// Forget the given bodies locally and remove them in the worker. Unknown ids are
    /// skipped.
    pub(crate) fn destroy_bodies(&self, ids: &[EntityId]) {
        let removed: Vec<EntityId> = {
            let mut inner = self.lock();
            let removed: Vec<EntityId> = ids
                .iter()
                .filter(|id| inner.refs.contains_key(*id))
                .cloned()
                .collect();
            for id in &removed {
                let Some(body) = inner.refs.remove(id) else {
                    continue;
                };
                inner.callbacks.remove(id);
                let key = RenderKey::of(&body.render);
                let now_empty = match inner.tracked.get_mut(&key) {
                    Some(tracked) => {
                        tracked.bodies.retain(|b| &b.id != id);
                        tracked.bodies.is_empty()
                    }
                    None => false,
                };
                if now_empty {
                    inner.tracked.remove(&key);
                }
            }
            removed
        };

        if removed.is_empty() {
            debug!("destroy of unknown bodies ignored");
            return;
        }
        debug!(bodies = removed.len(), "bodies destroyed");
        self.send(WorkerCommand::RemoveBodies { ids: removed });
    }

    pub fn create_constraint(
        &self,
        kind: ConstraintKind,
        body_a: &RenderRef,
        body_b: &RenderRef,
        options: ConstraintOptions,
    ) -> Result<ConstraintApi, HostError> {
        let (a, b) = {
            let inner = self.lock();
            (inner.resolve(body_a)?, inner.resolve(body_b)?)
        };
        let id = EntityId::generate();
        self.register_auxiliary(
            &id,
            WorkerCommand::AddConstraint(ConstraintSpec {
                id: id.clone(),
                kind,
                body_a: a,
                body_b: b,
                options,
            }),
        )?;
        Ok(ConstraintApi::new(self.clone(), id))
    }

    pub fn create_spring(
        &self,
        body_a: &RenderRef,
        body_b: &RenderRef,
        options: SpringOptions,
    ) -> Result<SpringApi, HostError> {
        let (a, b) = {
            let inner = self.lock();
            (inner.resolve(body_a)?, inner.resolve(body_b)?)
        };
        let id = EntityId::generate();
        self.register_auxiliary(
            &id,
            WorkerCommand::AddSpring(SpringSpec {
                id: id.clone(),
                body_a: a,
                body_b: b,
                options,
            }),
        )?;
        Ok(SpringApi::new(self.clone(), id))
    }

    /// Fails fast when the chassis or any wheel is not a known body.
    pub fn create_raycast_vehicle(
        &self,
        chassis: &RenderRef,
        wheels: &[RenderRef],
        wheel_infos: Vec<WheelInfo>,
        axes: [usize; 3],
    ) -> Result<VehicleApi, HostError> {
        if wheels.len() != wheel_infos.len() {
            return Err(HostError::WheelMismatch {
                wheels: wheels.len(),
                infos: wheel_infos.len(),
            });
        }
        let (chassis, wheels) = {
            let inner = self.lock();
            let chassis = inner.resolve(chassis)?;
            let wheels = wheels
                .iter()
                .map(|wheel| inner.resolve(wheel))
                .collect::<Result<Vec<_>, _>>()?;
            (chassis, wheels)
        };

        let id = EntityId::generate();
        let [index_forward_axis, index_right_axis, index_up_axis] = axes;
        self.register_auxiliary(
            &id,
            WorkerCommand::AddRaycastVehicle(VehicleSpec {
                id: id.clone(),
                chassis,
                wheels,
                wheel_infos,
                index_forward_axis,
                index_right_axis,
                index_up_axis,
            }),
        )?;
        Ok(VehicleApi::new(self.clone(), id))
    }

    pub fn create_ray(
        &self,
        mode: RayMode,
        options: RayOptions,
        callback: impl Fn(HostRayHit) + Send + Sync + 'static,
    ) -> Result<RayApi, HostError> {
        let id = EntityId::generate();
        self.lock()
            .ray_callbacks
            .insert(id.clone(), Arc::new(callback));
        let registered = self.register_auxiliary(
            &id,
            WorkerCommand::AddRay(RaySpec {
                id: id.clone(),
                mode,
                options,
            }),
        );
        if let Err(err) = registered {
            self.lock().ray_callbacks.remove(&id);
            return Err(err);
        }
        Ok(RayApi::new(self.clone(), id))
    }

    fn register_auxiliary(&self, id: &EntityId, command: WorkerCommand) -> Result<(), HostError> {
        let topic = command.topic();
        if !self.send(command) {
            return Err(HostError::WorkerGone);
        }
        self.lock().auxiliaries.insert(id.clone());
        debug!(id = %id, topic = %topic, "entity created");
        Ok(())
    }

    /// Forget an auxiliary entity and send its removal. Unknown ids are a no-op.
    pub(crate) fn remove_auxiliary(&self, id: &EntityId, command: WorkerCommand) {
        let known = {
            let mut inner = self.lock();
            inner.ray_callbacks.remove(id);
            inner.auxiliaries.remove(id)
        };
        if known {
            self.send(command);
        } else {
            debug!(id = %id, "unknown entity; removal ignored");
        }
    }

    /// Stream `target` of `id` to `callback` every frame.
    pub(crate) fn subscribe(
        &self,
        id: &EntityId,
        target: SubscriptionTarget,
        callback: ObserveCallback,
    ) -> Subscription {
        let subscription = {
            let mut inner = self.lock();
            let known = match target {
                SubscriptionTarget::Body(_) => inner.refs.contains_key(id),
                _ => inner.auxiliaries.contains(id),
            };
            if !known {
                debug!(id = %id, "subscription to unknown entity ignored");
                return Subscription::inert();
            }
            let subscription = inner.next_subscription;
            inner.next_subscription += 1;
            inner.subscriptions.insert(subscription, callback);
            subscription
        };

        self.send(WorkerCommand::Subscribe(SubscriptionSpec {
            id: subscription,
            uuid: id.clone(),
            target,
        }));
        Subscription::new(self.clone(), subscription)
    }

    pub(crate) fn unsubscribe(&self, subscription: u64) {
        if self.lock().subscriptions.remove(&subscription).is_some() {
            self.send(WorkerCommand::Unsubscribe { id: subscription });
        }
    }

    /// Advance the simulation once.
    ///
    /// Without `wait_for_frame` this returns as soon as the step is sent. With it, the
    /// call resolves when the frame carrying this step's origin has been applied, or
    /// fails after `ProxySettings::step_timeout`. A call made while a step is in flight
    /// sends nothing and, when waiting, resolves with that step's frame.
    pub async fn step(
        &self,
        elapsed: Option<f32>,
        wait_for_frame: bool,
    ) -> Result<StepOutcome, StepError> {
        let prepared = {
            let mut inner = self.lock();
            if inner.closed {
                return Err(StepError::WorkerGone);
            }
            match inner.slot.idle().map(PoseBuffers::is_empty) {
                Some(true) => return Ok(StepOutcome::Skipped),
                Some(false) => {
                    let Some(buffers) = inner.slot.take_for_step() else {
                        return Ok(StepOutcome::Coalesced);
                    };
                    let (origin, done) = if wait_for_frame {
                        let origin = inner.next_origin;
                        inner.next_origin += 1;
                        let (tx, rx) = oneshot::channel();
                        inner.pending.entry(origin).or_default().push(tx);
                        (Some(origin), Some(rx))
                    } else {
                        (None, None)
                    };
                    inner.in_flight_origin = origin;
                    PreparedStep::Send {
                        buffers,
                        origin,
                        done,
                    }
                }
                None if !wait_for_frame => return Ok(StepOutcome::Coalesced),
                None => {
                    let (tx, rx) = oneshot::channel();
                    let origin = inner.in_flight_origin;
                    match origin {
                        Some(origin) => inner.pending.entry(origin).or_default().push(tx),
                        None => inner.next_frame_waiters.push(tx),
                    }
                    PreparedStep::Ride { origin, done: rx }
                }
            }
        };

        match prepared {
            PreparedStep::Send {
                buffers,
                origin,
                done,
            } => {
                let command = WorkerCommand::Step {
                    buffers,
                    elapsed,
                    origin,
                };
                if let Err(mpsc::error::SendError(command)) = self.commands.send(command) {
                    let mut inner = self.lock();
                    if let WorkerCommand::Step { buffers, .. } = command {
                        inner.slot.adopt(buffers);
                    }
                    inner.in_flight_origin = None;
                    if let Some(origin) = origin {
                        inner.pending.remove(&origin);
                    }
                    return Err(StepError::WorkerGone);
                }
                match (origin, done) {
                    (Some(origin), Some(done)) => {
                        self.await_frame(origin, done).await?;
                        Ok(StepOutcome::Completed { origin })
                    }
                    _ => Ok(StepOutcome::Sent),
                }
            }
            PreparedStep::Ride { origin, done } => {
                self.await_frame(origin.unwrap_or(0), done).await?;
                Ok(StepOutcome::Coalesced)
            }
        }
    }

    async fn await_frame(&self, origin: u64, done: oneshot::Receiver<()>) -> Result<(), StepError> {
        match tokio::time::timeout(self.settings.step_timeout, done).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(StepError::WorkerGone),
            Err(_) => {
                warn!(origin, timeout_ms = self.settings.step_timeout.as_millis() as u64, "step timed out");
                let mut inner = self.lock();
                inner.pending.retain(|_, waiters| {
                    waiters.retain(|waiter| !waiter.is_closed());
                    !waiters.is_empty()
                });
                inner.next_frame_waiters.retain(|waiter| !waiter.is_closed());
                Err(StepError::Timeout { origin })
            }
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.lock().slot.is_in_flight()
    }

    /// Body count the idle buffers describe; `None` while a step is in flight.
    pub fn buffer_len(&self) -> Option<usize> {
        self.lock().slot.idle().map(PoseBuffers::len)
    }

    /// Raw buffer lengths `(positions, quaternions)`; `None` while in flight.
    pub fn buffer_lengths(&self) -> Option<(usize, usize)> {
        self.lock()
            .slot
            .idle()
            .map(|buffers| (buffers.positions().len(), buffers.quaternions().len()))
    }

    pub fn body_index(&self, id: &EntityId) -> Option<usize> {
        self.lock().index.get(id).copied()
    }

    /// The id → buffer slot map, as of the latest frame.
    pub fn body_indices(&self) -> HashMap<EntityId, usize> {
        self.lock().index.clone()
    }

    pub fn tracked_bodies(&self) -> usize {
        self.lock().refs.len()
    }

    /// Latest pose of `id` from the idle buffers.
    pub fn pose_of(&self, id: &EntityId) -> Option<([f32; 3], [f32; 4])> {
        let inner = self.lock();
        let index = *inner.index.get(id)?;
        let buffers = inner.slot.idle()?;
        Some((buffers.position(index)?, buffers.quaternion(index)?))
    }
}

fn echo_initial_pose(render: &RenderRef, bodies: &[(EntityId, BodyParams, Option<usize>)]) {
    let mut render = render.lock().unwrap_or_else(PoisonError::into_inner);
    let scale = render.scale();
    for (_, params, instance) in bodies {
        let quaternion = quaternion_array(&euler_to_quaternion(params.rotation));
        let matrix = compose(params.position, quaternion, scale);
        match instance {
            Some(index) => render.set_instance_matrix(*index, matrix),
            None => {
                render.set_position(params.position);
                render.set_quaternion(quaternion);
                render.set_matrix(matrix);
            }
        }
    }
}

fn close(shared: &Mutex<HostInner>) {
    let mut inner = lock(shared);
    inner.closed = true;
    inner.release_waiters();
}

fn dispatch_event(shared: &Mutex<HostInner>, event: WorkerEvent) {
    match event {
        WorkerEvent::Frame(frame) => handle_frame(shared, frame),
        WorkerEvent::Collide(event) => handle_collide(shared, event),
        WorkerEvent::CollideBegin(change) => handle_contact_change(shared, change, true),
        WorkerEvent::CollideEnd(change) => handle_contact_change(shared, change, false),
        WorkerEvent::RayHit(hit) => handle_ray_hit(shared, hit),
        WorkerEvent::HandlerError { topic, message } => {
            warn!(topic = %topic, error = %message, "worker handler failed");
        }
    }
}

fn handle_frame(shared: &Mutex<HostInner>, frame: Frame) {
    let Frame {
        buffers,
        observations,
        active,
        body_order,
        origin,
    } = frame;

    let (deliveries, waiters) = {
        let mut inner = lock(shared);
        if let Some(order) = body_order {
            inner.index = order
                .into_iter()
                .enumerate()
                .map(|(index, id)| (id, index))
                .collect();
        }
        let deliveries: Vec<(ObserveCallback, ObservedValue)> = observations
            .into_iter()
            .filter_map(|observation| {
                inner
                    .subscriptions
                    .get(&observation.subscription)
                    .map(|callback| (callback.clone(), observation.value))
            })
            .collect();
        if active {
            inner.apply_poses(&buffers);
        }
        inner.slot.adopt(buffers);
        inner.in_flight_origin = None;

        let mut waiters = std::mem::take(&mut inner.next_frame_waiters);
        if let Some(origin) = origin {
            waiters.extend(inner.pending.remove(&origin).unwrap_or_default());
        }
        (deliveries, waiters)
    };

    for (callback, value) in deliveries {
        callback(value);
    }
    for waiter in waiters {
        let _ = waiter.send(());
    }
}

fn handle_collide(shared: &Mutex<HostInner>, event: CollideEvent) {
    let (callback, payload) = {
        let inner = lock(shared);
        let Some(callback) = inner
            .callbacks
            .get(&event.target)
            .and_then(|callbacks| callbacks.on_collide.clone())
        else {
            return;
        };
        let contact = &event.contact;
        let payload = HostCollide {
            body: inner.body_ref(&event.body),
            target: inner.body_ref(&event.target),
            contact: HostContact {
                id: contact.id,
                bi: inner.body_ref(&contact.bi),
                bj: inner.body_ref(&contact.bj),
                contact_point: contact.contact_point,
                contact_normal: contact.contact_normal,
                impact_velocity: contact.impact_velocity,
            },
            collision_filters: event.collision_filters,
        };
        (callback, payload)
    };
    callback(payload);
}

fn handle_contact_change(shared: &Mutex<HostInner>, change: ContactChange, begin: bool) {
    let calls: Vec<(ContactCallback, HostContactChange)> = {
        let inner = lock(shared);
        [
            (&change.body_a, &change.body_b),
            (&change.body_b, &change.body_a),
        ]
        .into_iter()
        .filter_map(|(target, other)| {
            let callbacks = inner.callbacks.get(target)?;
            let callback = match begin {
                true => callbacks.on_collide_begin.clone(),
                false => callbacks.on_collide_end.clone(),
            }?;
            Some((
                callback,
                HostContactChange {
                    body: inner.body_ref(other),
                    target: inner.body_ref(target),
                },
            ))
        })
        .collect()
    };
    for (callback, payload) in calls {
        callback(payload);
    }
}

fn handle_ray_hit(shared: &Mutex<HostInner>, hit: RayHit) {
    let (callback, payload) = {
        let inner = lock(shared);
        let Some(callback) = inner.ray_callbacks.get(&hit.ray_id).cloned() else {
            return;
        };
        let payload = HostRayHit {
            body: hit.body.as_ref().and_then(|id| inner.body_ref(id)),
            ray: hit.ray,
            has_hit: hit.has_hit,
            hit_point: hit.hit_point,
            hit_normal: hit.hit_normal,
            hit_face_index: hit.hit_face_index,
            distance: hit.distance,
        };
        (callback, payload)
    };
    callback(payload);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        CollisionFilters, ContactDetail, InstancedNode, Observation, SceneNode, Shape,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn proxy() -> (HostProxy, mpsc::UnboundedReceiver<WorkerCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (HostProxy::new(tx, ProxySettings::default()), rx)
    }

    fn sphere(_: usize) -> BodyParams {
        BodyParams::new(Shape::Sphere { radius: 0.5 })
            .with_mass(1.0)
            .at([1.0, 2.0, 3.0])
    }

    fn frame(buffers: PoseBuffers, order: Option<Vec<EntityId>>, origin: Option<u64>) -> WorkerEvent {
        WorkerEvent::Frame(Frame {
            buffers,
            observations: Vec::new(),
            active: true,
            body_order: order,
            origin,
        })
    }

    #[test]
    fn when_body_is_created_then_initial_pose_is_echoed_and_callback_flag_is_sent() {
        let (proxy, mut commands) = proxy();
        let node = SceneNode::shared();
        let render: RenderRef = node.clone();

        proxy
            .create_body(&render, BodyCallbacks::default().on_collide(|_| {}), sphere)
            .expect("body created");

        let node = node.lock().expect("node lock");
        assert_eq!(node.position, [1.0, 2.0, 3.0]);
        assert_eq!(node.matrix_position(), [1.0, 2.0, 3.0]);
        match commands.try_recv() {
            Ok(WorkerCommand::AddBodies { bodies }) => {
                assert_eq!(bodies.len(), 1);
                assert!(bodies[0].1.has_collide_callback);
            }
            other => panic!("expected ADD_BODIES, got {other:?}"),
        }
        assert_eq!(proxy.buffer_len(), Some(1));
    }

    #[test]
    fn when_batch_is_created_then_each_instance_gets_a_suffixed_id() {
        let (proxy, mut commands) = proxy();
        let render: RenderRef = InstancedNode::shared(3);

        let api = proxy
            .create_body(&render, BodyCallbacks::default(), sphere)
            .expect("batch created");

        let Ok(WorkerCommand::AddBodies { bodies }) = commands.try_recv() else {
            panic!("expected ADD_BODIES");
        };
        let indices: Vec<Option<usize>> = bodies.iter().map(|(id, _)| id.instance_index()).collect();
        assert_eq!(indices, vec![Some(0), Some(1), Some(2)]);
        let first = api.at(1).expect("instance 1");
        let again = api.at(1).expect("instance 1");
        assert!(Arc::ptr_eq(&first, &again));
        assert!(api.at(3).is_none());
    }

    #[test]
    fn when_batch_mixes_shapes_then_creation_fails() {
        let (proxy, _commands) = proxy();
        let render: RenderRef = InstancedNode::shared(2);

        let result = proxy.create_body(&render, BodyCallbacks::default(), |i| {
            if i == 0 {
                sphere(i)
            } else {
                BodyParams::new(Shape::Box {
                    extents: [1.0; 3],
                })
            }
        });

        assert!(matches!(result, Err(HostError::MixedShapeBatch { .. })));
    }

    #[test]
    fn when_mutating_unknown_ids_then_nothing_is_sent() {
        let (proxy, mut commands) = proxy();
        let render: RenderRef = SceneNode::shared();
        let api = proxy
            .create_body(&render, BodyCallbacks::default(), sphere)
            .expect("body");
        let _ = commands.try_recv();

        api.destroy();
        let _ = commands.try_recv();
        api.position().set([0.0; 3]);
        api.apply_impulse([1.0, 0.0, 0.0], [0.0; 3]);
        api.destroy();

        assert!(commands.try_recv().is_err());
    }

    #[test]
    fn when_vehicle_wheel_is_unknown_then_creation_fails_fast() {
        let (proxy, _commands) = proxy();
        let chassis: RenderRef = SceneNode::shared();
        let wheel: RenderRef = SceneNode::shared();
        proxy
            .create_body(&chassis, BodyCallbacks::default(), sphere)
            .expect("chassis");

        let result = proxy.create_raycast_vehicle(
            &chassis,
            &[wheel],
            vec![WheelInfo::default()],
            [2, 0, 1],
        );

        assert!(matches!(result, Err(HostError::UnknownRenderObject)));
    }

    #[tokio::test]
    async fn when_no_bodies_exist_then_step_is_skipped() {
        let (proxy, mut commands) = proxy();

        let outcome = proxy.step(None, true).await.expect("step");

        assert_eq!(outcome, StepOutcome::Skipped);
        assert!(commands.try_recv().is_err());
    }

    #[tokio::test]
    async fn when_waiting_step_frame_arrives_then_it_resolves_with_its_origin() {
        let (proxy, mut commands) = proxy();
        let render: RenderRef = SceneNode::shared();
        proxy
            .create_body(&render, BodyCallbacks::default(), sphere)
            .expect("body");
        let _ = commands.try_recv();

        let stepping = {
            let proxy = proxy.clone();
            tokio::spawn(async move { proxy.step(Some(1.0 / 60.0), true).await })
        };
        let Some(WorkerCommand::Step { buffers, origin, .. }) = commands.recv().await else {
            panic!("expected STEP");
        };
        assert!(proxy.is_in_flight());

        // A frame for another origin does not resolve the waiter.
        proxy.handle_event(frame(PoseBuffers::with_bodies(1), None, Some(999)));
        tokio::task::yield_now().await;
        assert!(!stepping.is_finished());

        let stepped = proxy.step(None, false).await.expect("fire and forget");
        assert_eq!(stepped, StepOutcome::Sent);
        let Some(WorkerCommand::Step { origin: None, .. }) = commands.recv().await else {
            panic!("expected second STEP");
        };

        proxy.handle_event(frame(buffers, None, origin));
        let outcome = stepping.await.expect("join").expect("step");
        assert_eq!(outcome, StepOutcome::Completed { origin: origin.expect("origin") });
    }

    #[tokio::test]
    async fn when_step_is_issued_while_in_flight_then_it_is_coalesced() {
        let (proxy, mut commands) = proxy();
        let render: RenderRef = SceneNode::shared();
        proxy
            .create_body(&render, BodyCallbacks::default(), sphere)
            .expect("body");
        let _ = commands.try_recv();

        assert_eq!(proxy.step(None, false).await, Ok(StepOutcome::Sent));
        assert_eq!(proxy.step(None, false).await, Ok(StepOutcome::Coalesced));

        let rider = {
            let proxy = proxy.clone();
            tokio::spawn(async move { proxy.step(None, true).await })
        };
        tokio::task::yield_now().await;
        let Some(WorkerCommand::Step { buffers, .. }) = commands.recv().await else {
            panic!("expected STEP");
        };
        assert!(commands.try_recv().is_err());

        proxy.handle_event(frame(buffers, None, None));
        assert_eq!(rider.await.expect("join"), Ok(StepOutcome::Coalesced));
    }

    #[tokio::test(start_paused = true)]
    async fn when_frame_never_arrives_then_waiting_step_times_out() {
        let (tx, mut commands) = mpsc::unbounded_channel();
        let proxy = HostProxy::new(
            tx,
            ProxySettings {
                step_timeout: Duration::from_millis(50),
            },
        );
        let render: RenderRef = SceneNode::shared();
        proxy
            .create_body(&render, BodyCallbacks::default(), sphere)
            .expect("body");
        let _ = commands.try_recv();

        let result = proxy.step(None, true).await;

        assert_eq!(result, Err(StepError::Timeout { origin: 1 }));
        assert!(proxy.is_in_flight());
    }

    #[tokio::test]
    async fn when_worker_is_gone_then_step_fails_and_buffers_stay_home() {
        let (proxy, commands) = proxy();
        let render: RenderRef = SceneNode::shared();
        proxy
            .create_body(&render, BodyCallbacks::default(), sphere)
            .expect("body");
        drop(commands);

        assert_eq!(proxy.step(None, true).await, Err(StepError::WorkerGone));
        assert_eq!(proxy.buffer_len(), Some(1));
    }

    #[test]
    fn when_frame_carries_order_then_index_is_rebuilt_and_matrices_written() {
        let (proxy, _commands) = proxy();
        let node = SceneNode::shared();
        let render: RenderRef = node.clone();
        let api = proxy
            .create_body(&render, BodyCallbacks::default(), sphere)
            .expect("body");
        let id = api.id().cloned().expect("single body id");

        let mut buffers = PoseBuffers::with_bodies(1);
        buffers.write(0, [4.0, 5.0, 6.0], [0.0, 0.0, 0.0, 1.0]);
        proxy.handle_event(frame(buffers, Some(vec![id.clone()]), None));

        assert_eq!(proxy.body_index(&id), Some(0));
        assert_eq!(node.lock().expect("node").matrix_position(), [4.0, 5.0, 6.0]);
        assert_eq!(proxy.pose_of(&id).map(|(p, _)| p), Some([4.0, 5.0, 6.0]));
    }

    #[test]
    fn when_contact_begins_then_both_sides_see_each_other() {
        let (proxy, _commands) = proxy();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = |seen: Arc<Mutex<Vec<(EntityId, EntityId)>>>| {
            BodyCallbacks::default().on_collide_begin(move |change| {
                let target = change.target.map(|b| b.id).expect("target");
                let body = change.body.map(|b| b.id).expect("body");
                seen.lock().expect("seen").push((target, body));
            })
        };
        let a: RenderRef = SceneNode::shared();
        let b: RenderRef = SceneNode::shared();
        let api_a = proxy.create_body(&a, record(seen.clone()), sphere).expect("a");
        let api_b = proxy.create_body(&b, record(seen.clone()), sphere).expect("b");
        let id_a = api_a.id().cloned().expect("a id");
        let id_b = api_b.id().cloned().expect("b id");

        proxy.handle_event(WorkerEvent::CollideBegin(ContactChange::ordered(
            id_a.clone(),
            id_b.clone(),
        )));

        let mut seen = seen.lock().expect("seen").clone();
        seen.sort();
        let mut expected = vec![(id_a.clone(), id_b.clone()), (id_b, id_a)];
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[test]
    fn when_collide_targets_body_without_callback_then_nothing_happens() {
        let (proxy, _commands) = proxy();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let a: RenderRef = SceneNode::shared();
        let api = proxy
            .create_body(
                &a,
                BodyCallbacks::default().on_collide(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
                sphere,
            )
            .expect("a");
        let id = api.id().cloned().expect("id");
        let collide = |target: EntityId| {
            WorkerEvent::Collide(CollideEvent {
                body: EntityId::from("ground"),
                target,
                contact: ContactDetail {
                    id: 1,
                    bi: EntityId::from("ground"),
                    bj: EntityId::from("x"),
                    contact_point: [0.0; 3],
                    contact_normal: [0.0, 1.0, 0.0],
                    impact_velocity: 1.0,
                },
                collision_filters: CollisionFilters {
                    body_filter_group: 1,
                    body_filter_mask: 1,
                    target_filter_group: 1,
                    target_filter_mask: 1,
                },
            })
        };

        proxy.handle_event(collide(EntityId::from("stranger")));
        proxy.handle_event(collide(id));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn when_unsubscribed_then_observations_are_no_longer_delivered() {
        let (proxy, mut commands) = proxy();
        let render: RenderRef = SceneNode::shared();
        let api = proxy
            .create_body(&render, BodyCallbacks::default(), sphere)
            .expect("body");
        let _ = commands.try_recv();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let subscription = api.mass().subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let Ok(WorkerCommand::Subscribe(spec)) = commands.try_recv() else {
            panic!("expected SUBSCRIBE");
        };
        let observed = |subscription: u64| {
            WorkerEvent::Frame(Frame {
                buffers: PoseBuffers::with_bodies(1),
                observations: vec![Observation {
                    subscription,
                    value: ObservedValue::Number(1.0),
                    property: "mass".to_string(),
                }],
                active: false,
                body_order: None,
                origin: None,
            })
        };

        proxy.handle_event(observed(spec.id));
        subscription.unsubscribe();
        proxy.handle_event(observed(spec.id));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            commands.try_recv(),
            Ok(WorkerCommand::Unsubscribe { id }) if id == spec.id
        ));
    }
}

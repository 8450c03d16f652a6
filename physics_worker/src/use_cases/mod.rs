// Use cases layer: the worker loop, the host proxy and the messages between them.

pub mod handles;
pub mod host;
pub mod types;
pub mod worker;

pub use handles::{
    AtomicHandle, BodyApi, ConstraintApi, QuaternionHandle, RayApi, SpringApi, Subscription,
    VectorHandle, VehicleApi,
};
pub use host::{
    BodyCallbacks, BodyRef, HostCollide, HostContact, HostContactChange, HostProxy, HostRayHit,
    ProxySettings, StepOutcome,
};
pub use types::{Frame, WorkerCommand, WorkerEvent};
pub use worker::{Worker, worker_task};

// Domain layer: simulation entities, descriptors and the worker-side state store.

pub mod body;
pub mod buffers;
pub mod errors;
pub mod events;
pub mod ids;
pub mod joints;
pub mod properties;
pub mod render;
pub mod shapes;
pub mod state;
pub mod systems;
pub mod world;

pub use body::{BodyKind, BodyParams, CollisionFilter, Material};
pub use buffers::{BufferSlot, PoseBuffers};
pub use errors::{HostError, ProtocolError, StepError, WorkerError};
pub use events::{
    CollideEvent, CollisionFilters, ContactChange, ContactDetail, Observation, RayGeometry,
    RayHit,
};
pub use ids::EntityId;
pub use joints::{
    ConstraintKind, ConstraintOptions, ConstraintSpec, RayMode, RayOptions, RaySpec,
    SpringOptions, SpringSpec, SpringValue, VehicleSpec, WheelInfo, WheelValue,
};
pub use properties::{
    BodyProperty, BodyValue, DynamicsInput, ObservedValue, SpringProperty, SubscriptionSpec,
    SubscriptionTarget, VehicleProperty,
};
pub use render::{InstancedNode, RenderObject, RenderRef, SceneNode};
pub use shapes::{CompoundChild, Shape, ShapeKind};
pub use state::SimulationState;
pub use world::{Broadphase, Solver, WorldConfig, WorldValue};

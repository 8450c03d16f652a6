// Error contracts for the worker handlers, the host proxy and the wire protocol.

use crate::domain::ids::EntityId;
use thiserror::Error;

/// Failures inside a worker message handler. Reported back to the host, never fatal
/// to the simulation loop.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("world is not initialized")]
    NotInitialized,
    #[error("unknown body {0}")]
    UnknownBody(EntityId),
    #[error("unknown constraint {0}")]
    UnknownConstraint(EntityId),
    #[error("unknown spring {0}")]
    UnknownSpring(EntityId),
    #[error("unknown vehicle {0}")]
    UnknownVehicle(EntityId),
    #[error("unknown ray {0}")]
    UnknownRay(EntityId),
    #[error("unknown subscription {0}")]
    UnknownSubscription(u64),
    #[error("entity {0} already exists")]
    DuplicateEntity(EntityId),
    #[error("invalid shape: {0}")]
    InvalidShape(String),
    #[error("vehicle {vehicle} has no wheel {wheel}")]
    UnknownWheel { vehicle: EntityId, wheel: usize },
    #[error("constraint {0} has no motor")]
    NoMotor(EntityId),
    #[error("vehicle {vehicle} has {wheels} wheel bodies but {infos} wheel infos")]
    WheelMismatch {
        vehicle: EntityId,
        wheels: usize,
        infos: usize,
    },
}

/// Failures raised synchronously by host proxy calls.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("render object has no simulation identifier")]
    UnknownRenderObject,
    #[error("unsupported shape: {0}")]
    UnsupportedShape(String),
    #[error("batch mixes shape {expected} with {found}")]
    MixedShapeBatch { expected: String, found: String },
    #[error("instanced batch is empty")]
    EmptyBatch,
    #[error("vehicle needs {wheels} wheel infos, got {infos}")]
    WheelMismatch { wheels: usize, infos: usize },
    #[error("render object is already registered as a body")]
    AlreadyRegistered,
    #[error("simulation worker is gone")]
    WorkerGone,
}

/// Failures of `HostProxy::step`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StepError {
    #[error("no frame for origin {origin} within the step timeout")]
    Timeout { origin: u64 },
    #[error("simulation worker is gone")]
    WorkerGone,
}

/// Failures decoding a wire message into a command.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown topic {0}")]
    UnknownTopic(String),
    #[error("{topic} requires {expected} identifier(s), got {found}")]
    MissingIdentifier {
        topic: String,
        expected: usize,
        found: usize,
    },
    #[error("bad props for {topic}: {reason}")]
    BadProps { topic: String, reason: String },
    #[error("unsupported shape type {0}")]
    UnsupportedShape(String),
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

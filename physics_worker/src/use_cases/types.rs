// Use-case level messages exchanged between the host proxy and the simulation worker.

use crate::domain::{
    BodyParams, BodyValue, CollideEvent, ConstraintSpec, ContactChange, DynamicsInput, EntityId,
    Observation, PoseBuffers, RayHit, RaySpec, SpringSpec, SpringValue, SubscriptionSpec,
    VehicleSpec, WheelValue, WorldConfig, WorldValue,
};
use std::borrow::Cow;

/// Host → worker.
#[derive(Debug)]
pub enum WorkerCommand {
    Init(WorldConfig),
    /// Carries the pose buffers; the sender gives them up until the matching frame.
    Step {
        buffers: PoseBuffers,
        /// Seconds since the previous step; `None` takes exactly one fixed step.
        elapsed: Option<f32>,
        origin: Option<u64>,
    },
    AddBodies {
        bodies: Vec<(EntityId, BodyParams)>,
    },
    RemoveBodies {
        ids: Vec<EntityId>,
    },
    SetBody {
        id: EntityId,
        value: BodyValue,
    },
    ApplyBody {
        id: EntityId,
        input: DynamicsInput,
    },
    WakeUp {
        id: EntityId,
    },
    Sleep {
        id: EntityId,
    },
    AddConstraint(ConstraintSpec),
    RemoveConstraint {
        id: EntityId,
    },
    EnableConstraint {
        id: EntityId,
    },
    DisableConstraint {
        id: EntityId,
    },
    EnableConstraintMotor {
        id: EntityId,
    },
    DisableConstraintMotor {
        id: EntityId,
    },
    SetConstraintMotorSpeed {
        id: EntityId,
        speed: f32,
    },
    SetConstraintMotorMaxForce {
        id: EntityId,
        max_force: f32,
    },
    AddSpring(SpringSpec),
    RemoveSpring {
        id: EntityId,
    },
    SetSpring {
        id: EntityId,
        value: SpringValue,
    },
    AddRaycastVehicle(VehicleSpec),
    RemoveRaycastVehicle {
        id: EntityId,
    },
    SetVehicleWheel {
        id: EntityId,
        wheel: usize,
        value: WheelValue,
    },
    AddRay(RaySpec),
    RemoveRay {
        id: EntityId,
    },
    Subscribe(SubscriptionSpec),
    Unsubscribe {
        id: u64,
    },
    SetWorld(WorldValue),
}

impl WorkerCommand {
    /// Wire topic of this command.
    pub fn topic(&self) -> Cow<'static, str> {
        let topic = match self {
            WorkerCommand::Init(_) => "INIT",
            WorkerCommand::Step { .. } => "STEP",
            WorkerCommand::AddBodies { .. } => "ADD_BODIES",
            WorkerCommand::RemoveBodies { .. } => "REMOVE_BODIES",
            WorkerCommand::SetBody { value, .. } => {
                return Cow::Owned(format!("SET_{}", value.property().topic_suffix()));
            }
            WorkerCommand::ApplyBody { input, .. } => input.topic(),
            WorkerCommand::WakeUp { .. } => "WAKE_UP",
            WorkerCommand::Sleep { .. } => "SLEEP",
            WorkerCommand::AddConstraint(_) => "ADD_CONSTRAINT",
            WorkerCommand::RemoveConstraint { .. } => "REMOVE_CONSTRAINT",
            WorkerCommand::EnableConstraint { .. } => "ENABLE_CONSTRAINT",
            WorkerCommand::DisableConstraint { .. } => "DISABLE_CONSTRAINT",
            WorkerCommand::EnableConstraintMotor { .. } => "ENABLE_CONSTRAINT_MOTOR",
            WorkerCommand::DisableConstraintMotor { .. } => "DISABLE_CONSTRAINT_MOTOR",
            WorkerCommand::SetConstraintMotorSpeed { .. } => "SET_CONSTRAINT_MOTOR_SPEED",
            WorkerCommand::SetConstraintMotorMaxForce { .. } => "SET_CONSTRAINT_MOTOR_MAX_FORCE",
            WorkerCommand::AddSpring(_) => "ADD_SPRING",
            WorkerCommand::RemoveSpring { .. } => "REMOVE_SPRING",
            WorkerCommand::SetSpring { value, .. } => value.topic(),
            WorkerCommand::AddRaycastVehicle(_) => "ADD_RAYCAST_VEHICLE",
            WorkerCommand::RemoveRaycastVehicle { .. } => "REMOVE_RAYCAST_VEHICLE",
            WorkerCommand::SetVehicleWheel { value, .. } => value.topic(),
            WorkerCommand::AddRay(_) => "ADD_RAY",
            WorkerCommand::RemoveRay { .. } => "REMOVE_RAY",
            WorkerCommand::Subscribe(_) => "SUBSCRIBE",
            WorkerCommand::Unsubscribe { .. } => "UNSUBSCRIBE",
            WorkerCommand::SetWorld(value) => value.topic(),
        };
        Cow::Borrowed(topic)
    }
}

/// Result of one `STEP`.
#[derive(Debug)]
pub struct Frame {
    pub buffers: PoseBuffers,
    pub observations: Vec<Observation>,
    /// Any non-static body still awake.
    pub active: bool,
    /// Identifier per buffer slot, present only when the body set changed.
    pub body_order: Option<Vec<EntityId>>,
    pub origin: Option<u64>,
}

/// Worker → host.
#[derive(Debug)]
pub enum WorkerEvent {
    Frame(Frame),
    Collide(CollideEvent),
    CollideBegin(ContactChange),
    CollideEnd(ContactChange),
    RayHit(RayHit),
    /// A handler failed; the simulation keeps running.
    HandlerError {
        topic: String,
        message: String,
    },
}

impl WorkerEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            WorkerEvent::Frame(_) => "FRAME",
            WorkerEvent::Collide(_) => "COLLIDE",
            WorkerEvent::CollideBegin(_) => "COLLIDE_BEGIN",
            WorkerEvent::CollideEnd(_) => "COLLIDE_END",
            WorkerEvent::RayHit(_) => "RAYHIT",
            WorkerEvent::HandlerError { .. } => "ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn when_body_setter_is_named_then_topic_uses_the_property_suffix() {
        let command = WorkerCommand::SetBody {
            id: EntityId::from("a"),
            value: BodyValue::AngularVelocity([0.0; 3]),
        };

        assert_eq!(command.topic(), "SET_ANGULAR_VELOCITY");
    }

    #[test]
    fn when_dynamics_and_world_commands_are_named_then_topics_match_the_wire() {
        let apply = WorkerCommand::ApplyBody {
            id: EntityId::from("a"),
            input: DynamicsInput::LocalImpulse {
                impulse: [0.0; 3],
                local_point: [0.0; 3],
            },
        };
        let world = WorkerCommand::SetWorld(WorldValue::Gravity([0.0, -10.0, 0.0]));

        assert_eq!(apply.topic(), "APPLY_LOCAL_IMPULSE");
        assert_eq!(world.topic(), "SET_GRAVITY");
    }
}

// Wire protocol DTOs and conversions for the simulation worker socket.
// Each message is decoded exactly once into a `WorkerCommand`; events are encoded from
// `WorkerEvent`.

use crate::domain::{
    BodyParams, BodyProperty, BodyValue, ConstraintKind, ConstraintOptions, ConstraintSpec,
    DynamicsInput, EntityId, Observation, PoseBuffers, ProtocolError, RayMode, RayOptions,
    RaySpec, ShapeKind, SpringOptions, SpringSpec, SpringValue, SubscriptionSpec,
    SubscriptionTarget, VehicleSpec, WheelInfo, WheelValue, WorldConfig, WorldValue,
};
use crate::use_cases::{Frame, WorkerCommand, WorkerEvent};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// One message on the socket, in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub topic: String,
    /// Entity identifiers the message refers to, in topic-specific order.
    #[serde(default)]
    pub uuid: Vec<String>,
    #[serde(default)]
    pub props: Value,
}

impl WireMessage {
    pub fn new(topic: impl Into<String>, uuid: Vec<String>, props: Value) -> Self {
        Self {
            topic: topic.into(),
            uuid,
            props,
        }
    }

    /// `ERROR` message sent back when an inbound message cannot be decoded.
    pub fn error(topic: Option<&str>, message: impl Into<String>) -> Self {
        Self::new(
            "ERROR",
            Vec::new(),
            json!({ "topic": topic, "message": message.into() }),
        )
    }

    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    fn id(&self, index: usize, expected: usize) -> Result<EntityId, ProtocolError> {
        self.uuid
            .get(index)
            .map(|id| EntityId::from(id.as_str()))
            .ok_or_else(|| ProtocolError::MissingIdentifier {
                topic: self.topic.clone(),
                expected,
                found: self.uuid.len(),
            })
    }

    fn ids(&self) -> Result<Vec<EntityId>, ProtocolError> {
        if self.uuid.is_empty() {
            return Err(ProtocolError::MissingIdentifier {
                topic: self.topic.clone(),
                expected: 1,
                found: 0,
            });
        }
        Ok(self.uuid.iter().map(|id| EntityId::from(id.as_str())).collect())
    }

    fn props<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        serde_json::from_value(self.props.clone()).map_err(|err| self.bad_props(err))
    }

    /// Props that may be omitted entirely.
    fn props_or_default<T: DeserializeOwned + Default>(&self) -> Result<T, ProtocolError> {
        if self.props.is_null() {
            return Ok(T::default());
        }
        self.props()
    }

    fn bad_props(&self, reason: impl ToString) -> ProtocolError {
        ProtocolError::BadProps {
            topic: self.topic.clone(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StepProps {
    positions: Vec<f32>,
    quaternions: Vec<f32>,
    time_since_last_called: Option<f32>,
    origin: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct AddBodiesProps {
    #[serde(rename = "type")]
    shape: String,
    params: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ConstraintProps {
    #[serde(rename = "type")]
    kind: ConstraintKind,
    #[serde(flatten)]
    options: ConstraintOptions,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VehicleProps {
    wheel_infos: Vec<WheelInfo>,
    #[serde(default = "default_forward_axis")]
    index_forward_axis: usize,
    #[serde(default)]
    index_right_axis: usize,
    #[serde(default = "default_up_axis")]
    index_up_axis: usize,
}

fn default_forward_axis() -> usize {
    2
}

fn default_up_axis() -> usize {
    1
}

#[derive(Debug, Deserialize)]
struct RayProps {
    mode: RayMode,
    #[serde(flatten)]
    options: RayOptions,
}

#[derive(Debug, Deserialize)]
struct SubscribeProps {
    id: u64,
    /// Property name, e.g. `position`.
    #[serde(rename = "type")]
    property: String,
    /// Registry: `bodies`, `vehicles` or `springs`.
    target: String,
}

impl TryFrom<WireMessage> for WorkerCommand {
    type Error = ProtocolError;

    fn try_from(message: WireMessage) -> Result<Self, Self::Error> {
        let topic = message.topic.as_str();
        let command = match topic {
            "INIT" => WorkerCommand::Init(message.props_or_default::<WorldConfig>()?),
            "STEP" => {
                let props: StepProps = message.props_or_default()?;
                WorkerCommand::Step {
                    buffers: PoseBuffers::from_raw(props.positions, props.quaternions)?,
                    elapsed: props.time_since_last_called,
                    origin: props.origin,
                }
            }
            "ADD_BODIES" => decode_add_bodies(&message)?,
            "REMOVE_BODIES" => WorkerCommand::RemoveBodies { ids: message.ids()? },
            "WAKE_UP" => WorkerCommand::WakeUp { id: message.id(0, 1)? },
            "SLEEP" => WorkerCommand::Sleep { id: message.id(0, 1)? },
            "APPLY_FORCE" | "APPLY_IMPULSE" | "APPLY_LOCAL_FORCE" | "APPLY_LOCAL_IMPULSE"
            | "APPLY_TORQUE" => decode_dynamics(&message)?,
            "ADD_CONSTRAINT" => {
                let props: ConstraintProps = message.props()?;
                WorkerCommand::AddConstraint(ConstraintSpec {
                    id: message.id(0, 3)?,
                    kind: props.kind,
                    body_a: message.id(1, 3)?,
                    body_b: message.id(2, 3)?,
                    options: props.options,
                })
            }
            "REMOVE_CONSTRAINT" => WorkerCommand::RemoveConstraint { id: message.id(0, 1)? },
            "ENABLE_CONSTRAINT" => WorkerCommand::EnableConstraint { id: message.id(0, 1)? },
            "DISABLE_CONSTRAINT" => WorkerCommand::DisableConstraint { id: message.id(0, 1)? },
            "ENABLE_CONSTRAINT_MOTOR" => {
                WorkerCommand::EnableConstraintMotor { id: message.id(0, 1)? }
            }
            "DISABLE_CONSTRAINT_MOTOR" => {
                WorkerCommand::DisableConstraintMotor { id: message.id(0, 1)? }
            }
            "SET_CONSTRAINT_MOTOR_SPEED" => WorkerCommand::SetConstraintMotorSpeed {
                id: message.id(0, 1)?,
                speed: message.props()?,
            },
            "SET_CONSTRAINT_MOTOR_MAX_FORCE" => WorkerCommand::SetConstraintMotorMaxForce {
                id: message.id(0, 1)?,
                max_force: message.props()?,
            },
            "ADD_SPRING" => WorkerCommand::AddSpring(SpringSpec {
                id: message.id(0, 3)?,
                body_a: message.id(1, 3)?,
                body_b: message.id(2, 3)?,
                options: message.props_or_default::<SpringOptions>()?,
            }),
            "REMOVE_SPRING" => WorkerCommand::RemoveSpring { id: message.id(0, 1)? },
            "SET_SPRING_STIFFNESS" | "SET_SPRING_REST_LENGTH" | "SET_SPRING_DAMPING" => {
                let value: f32 = message.props()?;
                WorkerCommand::SetSpring {
                    id: message.id(0, 1)?,
                    value: match topic {
                        "SET_SPRING_STIFFNESS" => SpringValue::Stiffness(value),
                        "SET_SPRING_REST_LENGTH" => SpringValue::RestLength(value),
                        _ => SpringValue::Damping(value),
                    },
                }
            }
            "ADD_RAYCAST_VEHICLE" => decode_vehicle(&message)?,
            "REMOVE_RAYCAST_VEHICLE" => {
                WorkerCommand::RemoveRaycastVehicle { id: message.id(0, 1)? }
            }
            "SET_RAYCAST_VEHICLE_STEERING_VALUE"
            | "APPLY_RAYCAST_VEHICLE_ENGINE_FORCE"
            | "SET_RAYCAST_VEHICLE_BRAKE" => {
                let (value, wheel): (f32, usize) = message.props()?;
                WorkerCommand::SetVehicleWheel {
                    id: message.id(0, 1)?,
                    wheel,
                    value: match topic {
                        "SET_RAYCAST_VEHICLE_STEERING_VALUE" => WheelValue::Steering(value),
                        "APPLY_RAYCAST_VEHICLE_ENGINE_FORCE" => WheelValue::EngineForce(value),
                        _ => WheelValue::Brake(value),
                    },
                }
            }
            "ADD_RAY" => {
                let props: RayProps = message.props()?;
                WorkerCommand::AddRay(RaySpec {
                    id: message.id(0, 1)?,
                    mode: props.mode,
                    options: props.options,
                })
            }
            "REMOVE_RAY" => WorkerCommand::RemoveRay { id: message.id(0, 1)? },
            "SUBSCRIBE" => {
                let props: SubscribeProps = message.props()?;
                let target = SubscriptionTarget::parse(&props.target, &props.property)
                    .ok_or_else(|| {
                        message.bad_props(format!(
                            "unknown subscription target {}.{}",
                            props.target, props.property
                        ))
                    })?;
                WorkerCommand::Subscribe(SubscriptionSpec {
                    id: props.id,
                    uuid: message.id(0, 1)?,
                    target,
                })
            }
            "UNSUBSCRIBE" => WorkerCommand::Unsubscribe {
                id: message.props()?,
            },
            world if WorldValue::is_world_topic(world) => WorkerCommand::SetWorld(
                WorldValue::from_json(world, message.props.clone())
                    .map_err(|err| message.bad_props(err))?,
            ),
            other => {
                let property = other
                    .strip_prefix("SET_")
                    .and_then(BodyProperty::from_topic_suffix)
                    .ok_or_else(|| ProtocolError::UnknownTopic(other.to_string()))?;
                WorkerCommand::SetBody {
                    id: message.id(0, 1)?,
                    value: BodyValue::from_json(property, message.props.clone())
                        .map_err(|err| message.bad_props(err))?,
                }
            }
        };
        Ok(command)
    }
}

/// `uuid` is `[vehicle, chassis, wheel...]`, one wheel info per wheel body.
fn decode_vehicle(message: &WireMessage) -> Result<WorkerCommand, ProtocolError> {
    let props: VehicleProps = message.props()?;
    let id = message.id(0, 2)?;
    let chassis = message.id(1, 2)?;
    let wheels: Vec<EntityId> = message.uuid[2..]
        .iter()
        .map(|wheel| EntityId::from(wheel.as_str()))
        .collect();
    if wheels.len() != props.wheel_infos.len() {
        return Err(message.bad_props(format!(
            "{} wheel identifiers but {} wheel infos",
            wheels.len(),
            props.wheel_infos.len()
        )));
    }
    Ok(WorkerCommand::AddRaycastVehicle(VehicleSpec {
        id,
        chassis,
        wheels,
        wheel_infos: props.wheel_infos,
        index_forward_axis: props.index_forward_axis,
        index_right_axis: props.index_right_axis,
        index_up_axis: props.index_up_axis,
    }))
}

fn decode_add_bodies(message: &WireMessage) -> Result<WorkerCommand, ProtocolError> {
    let props: AddBodiesProps = message.props()?;
    let kind: ShapeKind = props
        .shape
        .parse()
        .map_err(ProtocolError::UnsupportedShape)?;
    let ids = message.ids()?;
    if ids.len() != props.params.len() {
        return Err(message.bad_props(format!(
            "{} identifiers but {} param sets",
            ids.len(),
            props.params.len()
        )));
    }

    let bodies = ids
        .into_iter()
        .zip(props.params)
        .map(|(id, params)| {
            let params = body_params(kind, params).map_err(|err| message.bad_props(err))?;
            Ok((id, params))
        })
        .collect::<Result<Vec<_>, ProtocolError>>()?;
    Ok(WorkerCommand::AddBodies { bodies })
}

/// Body params carry the shape arguments under `args`; the shape type is shared by the
/// whole batch.
fn body_params(kind: ShapeKind, mut params: Value) -> Result<BodyParams, serde_json::Error> {
    if let Some(object) = params.as_object_mut() {
        let shape = match object.remove("args") {
            Some(args) if !args.is_null() => json!({ "type": kind.as_str(), "args": args }),
            _ => json!({ "type": kind.as_str() }),
        };
        object.insert("shape".to_string(), shape);
    }
    serde_json::from_value(params)
}

fn decode_dynamics(message: &WireMessage) -> Result<WorkerCommand, ProtocolError> {
    let id = message.id(0, 1)?;
    let input = if message.topic == "APPLY_TORQUE" {
        let (torque,): ([f32; 3],) = message.props()?;
        DynamicsInput::Torque { torque }
    } else {
        let (vector, point): ([f32; 3], [f32; 3]) = message.props()?;
        match message.topic.as_str() {
            "APPLY_FORCE" => DynamicsInput::Force {
                force: vector,
                world_point: point,
            },
            "APPLY_IMPULSE" => DynamicsInput::Impulse {
                impulse: vector,
                world_point: point,
            },
            "APPLY_LOCAL_FORCE" => DynamicsInput::LocalForce {
                force: vector,
                local_point: point,
            },
            _ => DynamicsInput::LocalImpulse {
                impulse: vector,
                local_point: point,
            },
        }
    };
    Ok(WorkerCommand::ApplyBody { id, input })
}

/// `FRAME` props as sent on the wire.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameProps {
    pub positions: Vec<f32>,
    pub quaternions: Vec<f32>,
    pub observations: Vec<Observation>,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bodies: Option<Vec<EntityId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<u64>,
}

impl From<Frame> for FrameProps {
    fn from(frame: Frame) -> Self {
        let (positions, quaternions) = frame.buffers.into_raw();
        Self {
            positions,
            quaternions,
            observations: frame.observations,
            active: frame.active,
            bodies: frame.body_order,
            origin: frame.origin,
        }
    }
}

impl TryFrom<WorkerEvent> for WireMessage {
    type Error = serde_json::Error;

    fn try_from(event: WorkerEvent) -> Result<Self, Self::Error> {
        let topic = event.topic();
        let (uuid, props) = match event {
            WorkerEvent::Frame(frame) => (Vec::new(), serde_json::to_value(FrameProps::from(frame))?),
            WorkerEvent::Collide(collide) => (
                vec![collide.target.to_string()],
                serde_json::to_value(&collide)?,
            ),
            WorkerEvent::CollideBegin(change) | WorkerEvent::CollideEnd(change) => (
                vec![change.body_a.to_string(), change.body_b.to_string()],
                serde_json::to_value(&change)?,
            ),
            WorkerEvent::RayHit(hit) => (vec![hit.ray_id.to_string()], serde_json::to_value(&hit)?),
            WorkerEvent::HandlerError { topic, message } => {
                (Vec::new(), json!({ "topic": topic, "message": message }))
            }
        };
        Ok(WireMessage::new(topic, uuid, props))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CollideEvent, CollisionFilters, ContactChange, ContactDetail, Shape};

    fn decode(value: Value) -> Result<WorkerCommand, ProtocolError> {
        let message: WireMessage = serde_json::from_value(value).expect("wire message");
        WorkerCommand::try_from(message)
    }

    #[test]
    fn when_add_bodies_is_decoded_then_each_id_gets_its_own_params() {
        let command = decode(json!({
            "topic": "ADD_BODIES",
            "uuid": ["a", "b"],
            "props": {
                "type": "Sphere",
                "params": [
                    { "args": { "radius": 0.5 }, "mass": 1.0, "position": [0, 5, 0] },
                    { "args": { "radius": 2.0 }, "isTrigger": true }
                ]
            }
        }))
        .expect("decodes");

        let WorkerCommand::AddBodies { bodies } = command else {
            panic!("expected AddBodies");
        };
        assert_eq!(bodies[0].0, EntityId::from("a"));
        assert_eq!(bodies[0].1.shape, Shape::Sphere { radius: 0.5 });
        assert_eq!(bodies[0].1.position, [0.0, 5.0, 0.0]);
        assert!(bodies[1].1.is_trigger);
        assert_eq!(bodies[1].1.mass, 0.0);
    }

    #[test]
    fn when_plane_has_no_args_then_it_still_decodes() {
        let command = decode(json!({
            "topic": "ADD_BODIES",
            "uuid": ["ground"],
            "props": { "type": "Plane", "params": [{ "rotation": [-1.57, 0, 0] }] }
        }))
        .expect("decodes");

        let WorkerCommand::AddBodies { bodies } = command else {
            panic!("expected AddBodies");
        };
        assert_eq!(bodies[0].1.shape, Shape::Plane);
    }

    #[test]
    fn when_shape_type_is_unknown_then_decode_fails_with_unsupported_shape() {
        let result = decode(json!({
            "topic": "ADD_BODIES",
            "uuid": ["a"],
            "props": { "type": "Particle", "params": [{}] }
        }));

        assert!(matches!(result, Err(ProtocolError::UnsupportedShape(kind)) if kind == "Particle"));
    }

    #[test]
    fn when_body_setter_topic_arrives_then_property_is_taken_from_the_suffix() {
        let command = decode(json!({
            "topic": "SET_LINEAR_DAMPING",
            "uuid": ["a"],
            "props": 0.5
        }))
        .expect("decodes");

        assert!(matches!(
            command,
            WorkerCommand::SetBody { value: BodyValue::LinearDamping(v), .. } if v == 0.5
        ));
    }

    #[test]
    fn when_world_setter_arrives_then_it_is_not_mistaken_for_a_body_setter() {
        let command = decode(json!({ "topic": "SET_GRAVITY", "props": [0, -10, 0] }))
            .expect("decodes");

        assert!(matches!(
            command,
            WorkerCommand::SetWorld(WorldValue::Gravity([_, y, _])) if y == -10.0
        ));
    }

    #[test]
    fn when_constraint_is_missing_a_body_then_identifier_error_is_reported() {
        let result = decode(json!({
            "topic": "ADD_CONSTRAINT",
            "uuid": ["c", "a"],
            "props": { "type": "Hinge" }
        }));

        assert!(matches!(
            result,
            Err(ProtocolError::MissingIdentifier { expected: 3, found: 2, .. })
        ));
    }

    #[test]
    fn when_vehicle_and_wheel_ops_arrive_then_ids_and_wheel_index_are_split() {
        let vehicle = decode(json!({
            "topic": "ADD_RAYCAST_VEHICLE",
            "uuid": ["car", "chassis", "w0", "w1"],
            "props": { "wheelInfos": [{ "radius": 0.4 }, { "radius": 0.4 }] }
        }))
        .expect("decodes");
        let steer = decode(json!({
            "topic": "SET_RAYCAST_VEHICLE_STEERING_VALUE",
            "uuid": ["car"],
            "props": [0.3, 1]
        }))
        .expect("decodes");

        let WorkerCommand::AddRaycastVehicle(spec) = vehicle else {
            panic!("expected AddRaycastVehicle");
        };
        assert_eq!(spec.wheels, vec![EntityId::from("w0"), EntityId::from("w1")]);
        assert_eq!(spec.index_forward_axis, 2);
        assert!(matches!(
            steer,
            WorkerCommand::SetVehicleWheel { wheel: 1, value: WheelValue::Steering(_), .. }
        ));
    }

    #[test]
    fn when_step_buffers_disagree_then_decode_is_rejected() {
        let result = decode(json!({
            "topic": "STEP",
            "props": { "positions": [0, 0, 0], "quaternions": [] }
        }));

        assert!(matches!(result, Err(ProtocolError::BadProps { .. })));
    }

    #[test]
    fn when_topic_is_unknown_then_decode_names_it() {
        let result = decode(json!({ "topic": "SET_WARP_DRIVE", "uuid": ["a"], "props": 1 }));

        assert!(matches!(result, Err(ProtocolError::UnknownTopic(topic)) if topic == "SET_WARP_DRIVE"));
    }

    #[test]
    fn when_subscription_is_decoded_then_target_and_property_resolve() {
        let command = decode(json!({
            "topic": "SUBSCRIBE",
            "uuid": ["a"],
            "props": { "id": 7, "type": "velocity", "target": "bodies" }
        }))
        .expect("decodes");

        assert!(matches!(
            command,
            WorkerCommand::Subscribe(SubscriptionSpec {
                id: 7,
                target: SubscriptionTarget::Body(BodyProperty::Velocity),
                ..
            })
        ));
    }

    #[test]
    fn when_frame_is_encoded_then_order_is_only_sent_when_present() {
        let frame = |order: Option<Vec<EntityId>>| {
            WorkerEvent::Frame(Frame {
                buffers: PoseBuffers::with_bodies(1),
                observations: Vec::new(),
                active: true,
                body_order: order,
                origin: Some(3),
            })
        };

        let with_order =
            WireMessage::try_from(frame(Some(vec![EntityId::from("a")]))).expect("encodes");
        let without = WireMessage::try_from(frame(None)).expect("encodes");

        assert_eq!(with_order.topic, "FRAME");
        assert_eq!(with_order.props["bodies"], json!(["a"]));
        assert_eq!(with_order.props["origin"], json!(3));
        assert_eq!(with_order.props["quaternions"], json!([0.0, 0.0, 0.0, 1.0]));
        assert!(without.props.get("bodies").is_none());
    }

    #[test]
    fn when_contact_events_are_encoded_then_identifiers_lead_the_message() {
        let collide = WorkerEvent::Collide(CollideEvent {
            body: EntityId::from("ground"),
            target: EntityId::from("ball"),
            contact: ContactDetail {
                id: 1,
                bi: EntityId::from("ball"),
                bj: EntityId::from("ground"),
                contact_point: [0.0; 3],
                contact_normal: [0.0, 1.0, 0.0],
                impact_velocity: 2.0,
            },
            collision_filters: CollisionFilters {
                body_filter_group: 1,
                body_filter_mask: 1,
                target_filter_group: 1,
                target_filter_mask: 1,
            },
        });
        let begin = WorkerEvent::CollideBegin(ContactChange::ordered(
            EntityId::from("ball"),
            EntityId::from("ground"),
        ));

        let collide = WireMessage::try_from(collide).expect("encodes");
        let begin = WireMessage::try_from(begin).expect("encodes");

        assert_eq!(collide.uuid, vec!["ball".to_string()]);
        assert_eq!(collide.props["contact"]["impactVelocity"], json!(2.0));
        assert_eq!(begin.topic, "COLLIDE_BEGIN");
        assert_eq!(begin.uuid.len(), 2);
    }
}

// Mutable and observable properties of simulation entities.

use crate::domain::body::Material;
use crate::domain::ids::EntityId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Named body property, used by `SET_<PROPERTY>` topics and subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BodyProperty {
    Position,
    Rotation,
    Quaternion,
    Velocity,
    AngularVelocity,
    LinearFactor,
    AngularFactor,
    Mass,
    LinearDamping,
    AngularDamping,
    AllowSleep,
    SleepSpeedLimit,
    SleepTimeLimit,
    CollisionFilterGroup,
    CollisionFilterMask,
    CollisionResponse,
    FixedRotation,
    IsTrigger,
    Material,
    UserData,
}

const BODY_PROPERTIES: [(BodyProperty, &str, &str); 20] = [
    (BodyProperty::Position, "position", "POSITION"),
    (BodyProperty::Rotation, "rotation", "ROTATION"),
    (BodyProperty::Quaternion, "quaternion", "QUATERNION"),
    (BodyProperty::Velocity, "velocity", "VELOCITY"),
    (BodyProperty::AngularVelocity, "angularVelocity", "ANGULAR_VELOCITY"),
    (BodyProperty::LinearFactor, "linearFactor", "LINEAR_FACTOR"),
    (BodyProperty::AngularFactor, "angularFactor", "ANGULAR_FACTOR"),
    (BodyProperty::Mass, "mass", "MASS"),
    (BodyProperty::LinearDamping, "linearDamping", "LINEAR_DAMPING"),
    (BodyProperty::AngularDamping, "angularDamping", "ANGULAR_DAMPING"),
    (BodyProperty::AllowSleep, "allowSleep", "ALLOW_SLEEP"),
    (BodyProperty::SleepSpeedLimit, "sleepSpeedLimit", "SLEEP_SPEED_LIMIT"),
    (BodyProperty::SleepTimeLimit, "sleepTimeLimit", "SLEEP_TIME_LIMIT"),
    (
        BodyProperty::CollisionFilterGroup,
        "collisionFilterGroup",
        "COLLISION_FILTER_GROUP",
    ),
    (
        BodyProperty::CollisionFilterMask,
        "collisionFilterMask",
        "COLLISION_FILTER_MASK",
    ),
    (
        BodyProperty::CollisionResponse,
        "collisionResponse",
        "COLLISION_RESPONSE",
    ),
    (BodyProperty::FixedRotation, "fixedRotation", "FIXED_ROTATION"),
    (BodyProperty::IsTrigger, "isTrigger", "IS_TRIGGER"),
    (BodyProperty::Material, "material", "MATERIAL"),
    (BodyProperty::UserData, "userData", "USER_DATA"),
];

impl BodyProperty {
    /// camelCase name used by subscriptions and observations.
    pub fn name(&self) -> &'static str {
        BODY_PROPERTIES
            .iter()
            .find(|(p, _, _)| p == self)
            .map(|(_, name, _)| *name)
            .unwrap_or("unknown")
    }

    /// Suffix of the `SET_` topic for this property.
    pub fn topic_suffix(&self) -> &'static str {
        BODY_PROPERTIES
            .iter()
            .find(|(p, _, _)| p == self)
            .map(|(_, _, suffix)| *suffix)
            .unwrap_or("UNKNOWN")
    }

    pub fn from_topic_suffix(suffix: &str) -> Option<Self> {
        BODY_PROPERTIES
            .iter()
            .find(|(_, _, s)| *s == suffix)
            .map(|(p, _, _)| *p)
    }
}

impl fmt::Display for BodyProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BodyProperty {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        BODY_PROPERTIES
            .iter()
            .find(|(_, name, _)| *name == value)
            .map(|(p, _, _)| *p)
            .ok_or_else(|| value.to_string())
    }
}

/// New value for one body property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BodyValue {
    Position([f32; 3]),
    /// Euler angles (XYZ, radians).
    Rotation([f32; 3]),
    Quaternion([f32; 4]),
    Velocity([f32; 3]),
    AngularVelocity([f32; 3]),
    LinearFactor([f32; 3]),
    AngularFactor([f32; 3]),
    Mass(f32),
    LinearDamping(f32),
    AngularDamping(f32),
    AllowSleep(bool),
    SleepSpeedLimit(f32),
    SleepTimeLimit(f32),
    CollisionFilterGroup(u32),
    CollisionFilterMask(u32),
    CollisionResponse(bool),
    FixedRotation(bool),
    IsTrigger(bool),
    Material(Material),
    UserData(serde_json::Value),
}

impl BodyValue {
    pub fn property(&self) -> BodyProperty {
        match self {
            BodyValue::Position(_) => BodyProperty::Position,
            BodyValue::Rotation(_) => BodyProperty::Rotation,
            BodyValue::Quaternion(_) => BodyProperty::Quaternion,
            BodyValue::Velocity(_) => BodyProperty::Velocity,
            BodyValue::AngularVelocity(_) => BodyProperty::AngularVelocity,
            BodyValue::LinearFactor(_) => BodyProperty::LinearFactor,
            BodyValue::AngularFactor(_) => BodyProperty::AngularFactor,
            BodyValue::Mass(_) => BodyProperty::Mass,
            BodyValue::LinearDamping(_) => BodyProperty::LinearDamping,
            BodyValue::AngularDamping(_) => BodyProperty::AngularDamping,
            BodyValue::AllowSleep(_) => BodyProperty::AllowSleep,
            BodyValue::SleepSpeedLimit(_) => BodyProperty::SleepSpeedLimit,
            BodyValue::SleepTimeLimit(_) => BodyProperty::SleepTimeLimit,
            BodyValue::CollisionFilterGroup(_) => BodyProperty::CollisionFilterGroup,
            BodyValue::CollisionFilterMask(_) => BodyProperty::CollisionFilterMask,
            BodyValue::CollisionResponse(_) => BodyProperty::CollisionResponse,
            BodyValue::FixedRotation(_) => BodyProperty::FixedRotation,
            BodyValue::IsTrigger(_) => BodyProperty::IsTrigger,
            BodyValue::Material(_) => BodyProperty::Material,
            BodyValue::UserData(_) => BodyProperty::UserData,
        }
    }

    /// Decode the wire value of `property`.
    pub fn from_json(
        property: BodyProperty,
        value: serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        use serde_json::from_value;
        Ok(match property {
            BodyProperty::Position => BodyValue::Position(from_value(value)?),
            BodyProperty::Rotation => BodyValue::Rotation(from_value(value)?),
            BodyProperty::Quaternion => BodyValue::Quaternion(from_value(value)?),
            BodyProperty::Velocity => BodyValue::Velocity(from_value(value)?),
            BodyProperty::AngularVelocity => BodyValue::AngularVelocity(from_value(value)?),
            BodyProperty::LinearFactor => BodyValue::LinearFactor(from_value(value)?),
            BodyProperty::AngularFactor => BodyValue::AngularFactor(from_value(value)?),
            BodyProperty::Mass => BodyValue::Mass(from_value(value)?),
            BodyProperty::LinearDamping => BodyValue::LinearDamping(from_value(value)?),
            BodyProperty::AngularDamping => BodyValue::AngularDamping(from_value(value)?),
            BodyProperty::AllowSleep => BodyValue::AllowSleep(from_value(value)?),
            BodyProperty::SleepSpeedLimit => BodyValue::SleepSpeedLimit(from_value(value)?),
            BodyProperty::SleepTimeLimit => BodyValue::SleepTimeLimit(from_value(value)?),
            BodyProperty::CollisionFilterGroup => {
                BodyValue::CollisionFilterGroup(from_value(value)?)
            }
            BodyProperty::CollisionFilterMask => BodyValue::CollisionFilterMask(from_value(value)?),
            BodyProperty::CollisionResponse => BodyValue::CollisionResponse(from_value(value)?),
            BodyProperty::FixedRotation => BodyValue::FixedRotation(from_value(value)?),
            BodyProperty::IsTrigger => BodyValue::IsTrigger(from_value(value)?),
            BodyProperty::Material => BodyValue::Material(from_value(value)?),
            BodyProperty::UserData => BodyValue::UserData(value),
        })
    }

    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            BodyValue::Position(v)
            | BodyValue::Rotation(v)
            | BodyValue::Velocity(v)
            | BodyValue::AngularVelocity(v)
            | BodyValue::LinearFactor(v)
            | BodyValue::AngularFactor(v) => json!(v),
            BodyValue::Quaternion(q) => json!(q),
            BodyValue::Mass(x)
            | BodyValue::LinearDamping(x)
            | BodyValue::AngularDamping(x)
            | BodyValue::SleepSpeedLimit(x)
            | BodyValue::SleepTimeLimit(x) => json!(x),
            BodyValue::CollisionFilterGroup(bits) | BodyValue::CollisionFilterMask(bits) => {
                json!(bits)
            }
            BodyValue::AllowSleep(flag)
            | BodyValue::CollisionResponse(flag)
            | BodyValue::FixedRotation(flag)
            | BodyValue::IsTrigger(flag) => json!(flag),
            BodyValue::Material(material) => json!(material),
            BodyValue::UserData(data) => data.clone(),
        }
    }
}

/// Dynamics input applied to a body for the next internal step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DynamicsInput {
    Force { force: [f32; 3], world_point: [f32; 3] },
    Impulse { impulse: [f32; 3], world_point: [f32; 3] },
    LocalForce { force: [f32; 3], local_point: [f32; 3] },
    LocalImpulse { impulse: [f32; 3], local_point: [f32; 3] },
    Torque { torque: [f32; 3] },
}

impl DynamicsInput {
    pub fn topic(&self) -> &'static str {
        match self {
            DynamicsInput::Force { .. } => "APPLY_FORCE",
            DynamicsInput::Impulse { .. } => "APPLY_IMPULSE",
            DynamicsInput::LocalForce { .. } => "APPLY_LOCAL_FORCE",
            DynamicsInput::LocalImpulse { .. } => "APPLY_LOCAL_IMPULSE",
            DynamicsInput::Torque { .. } => "APPLY_TORQUE",
        }
    }
}

/// Observable vehicle properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VehicleProperty {
    Sliding,
}

/// Observable spring properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SpringProperty {
    Stiffness,
    RestLength,
    Damping,
}

/// What a subscription watches: the target kind and the property on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionTarget {
    Body(BodyProperty),
    Vehicle(VehicleProperty),
    Spring(SpringProperty),
}

impl SubscriptionTarget {
    /// Registry the target lives in: `bodies`, `vehicles` or `springs`.
    pub fn kind(&self) -> &'static str {
        match self {
            SubscriptionTarget::Body(_) => "bodies",
            SubscriptionTarget::Vehicle(_) => "vehicles",
            SubscriptionTarget::Spring(_) => "springs",
        }
    }

    pub fn property_name(&self) -> &'static str {
        match self {
            SubscriptionTarget::Body(property) => property.name(),
            SubscriptionTarget::Vehicle(VehicleProperty::Sliding) => "sliding",
            SubscriptionTarget::Spring(SpringProperty::Stiffness) => "stiffness",
            SubscriptionTarget::Spring(SpringProperty::RestLength) => "restLength",
            SubscriptionTarget::Spring(SpringProperty::Damping) => "damping",
        }
    }

    /// Parse a `(kind, property)` pair as carried on the wire.
    pub fn parse(kind: &str, property: &str) -> Option<Self> {
        let value = serde_json::Value::String(property.to_string());
        match kind {
            "bodies" => property.parse().ok().map(SubscriptionTarget::Body),
            "vehicles" => serde_json::from_value(value)
                .ok()
                .map(SubscriptionTarget::Vehicle),
            "springs" => serde_json::from_value(value)
                .ok()
                .map(SubscriptionTarget::Spring),
            _ => None,
        }
    }
}

/// Standing request to stream one property of one entity every frame.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionSpec {
    pub id: u64,
    pub uuid: EntityId,
    pub target: SubscriptionTarget,
}

/// A value read off an entity for a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ObservedValue {
    Flag(bool),
    Number(f32),
    Vector([f32; 3]),
    Material(Material),
    Data(serde_json::Value),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn when_property_names_round_trip_then_tables_agree() {
        for (property, name, suffix) in BODY_PROPERTIES {
            assert_eq!(property.name(), name);
            assert_eq!(name.parse::<BodyProperty>(), Ok(property));
            assert_eq!(BodyProperty::from_topic_suffix(suffix), Some(property));
            // serde naming matches the table too.
            assert_eq!(serde_json::to_value(property).expect("serialize"), name);
        }
    }

    #[test]
    fn when_subscription_kind_is_parsed_then_property_must_exist_on_that_kind() {
        assert_eq!(
            SubscriptionTarget::parse("vehicles", "sliding"),
            Some(SubscriptionTarget::Vehicle(VehicleProperty::Sliding))
        );
        assert_eq!(
            SubscriptionTarget::parse("springs", "restLength"),
            Some(SubscriptionTarget::Spring(SpringProperty::RestLength))
        );
        assert_eq!(SubscriptionTarget::parse("springs", "sliding"), None);
        assert_eq!(SubscriptionTarget::parse("lights", "position"), None);
    }

    #[test]
    fn when_value_is_decoded_for_property_then_shape_is_checked() {
        let value = BodyValue::from_json(BodyProperty::Velocity, serde_json::json!([1, 2, 3]))
            .expect("vector decodes");
        assert_eq!(value, BodyValue::Velocity([1.0, 2.0, 3.0]));
        assert!(BodyValue::from_json(BodyProperty::Mass, serde_json::json!([1, 2])).is_err());
    }
}

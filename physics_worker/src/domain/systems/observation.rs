// Per-frame reads of subscribed properties.

use super::to_array;
use crate::domain::events::Observation;
use crate::domain::ids::EntityId;
use crate::domain::properties::{
    BodyProperty, ObservedValue, SpringProperty, SubscriptionSpec, SubscriptionTarget,
    VehicleProperty,
};
use crate::domain::state::BodyEntry;
use crate::domain::systems::springs::SpringEntry;
use crate::domain::systems::vehicles::VehicleEntry;
use rapier3d::prelude::*;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};

/// Read-only view over the registries a subscription can target.
pub struct Observed<'a> {
    pub bodies: &'a HashMap<EntityId, BodyEntry>,
    pub rigid_bodies: &'a RigidBodySet,
    pub springs: &'a BTreeMap<EntityId, SpringEntry>,
    pub vehicles: &'a BTreeMap<EntityId, VehicleEntry>,
}

impl Observed<'_> {
    /// `None` when the target no longer exists.
    pub fn observe(&self, spec: &SubscriptionSpec) -> Option<Observation> {
        let value = match spec.target {
            SubscriptionTarget::Body(property) => {
                let entry = self.bodies.get(&spec.uuid)?;
                let rb = self.rigid_bodies.get(entry.handle)?;
                body_value(property, entry, rb)
            }
            SubscriptionTarget::Vehicle(VehicleProperty::Sliding) => {
                ObservedValue::Flag(self.vehicles.get(&spec.uuid)?.sliding)
            }
            SubscriptionTarget::Spring(property) => {
                let options = &self.springs.get(&spec.uuid)?.spec.options;
                ObservedValue::Number(match property {
                    SpringProperty::Stiffness => options.stiffness,
                    SpringProperty::RestLength => options.rest_length,
                    SpringProperty::Damping => options.damping,
                })
            }
        };
        Some(Observation {
            subscription: spec.id,
            value,
            property: spec.target.property_name().to_string(),
        })
    }
}

fn body_value(property: BodyProperty, entry: &BodyEntry, rb: &RigidBody) -> ObservedValue {
    match property {
        BodyProperty::Position => ObservedValue::Vector(to_array(rb.translation())),
        // Orientation is reported as XYZ Euler angles for both properties.
        BodyProperty::Rotation | BodyProperty::Quaternion => {
            let (x, y, z) = rb.rotation().euler_angles();
            ObservedValue::Vector([x, y, z])
        }
        BodyProperty::Velocity => ObservedValue::Vector(to_array(rb.linvel())),
        BodyProperty::AngularVelocity => ObservedValue::Vector(to_array(rb.angvel())),
        BodyProperty::LinearFactor => ObservedValue::Vector(entry.linear_factor),
        BodyProperty::AngularFactor => ObservedValue::Vector(entry.angular_factor),
        BodyProperty::Mass => ObservedValue::Number(entry.mass),
        BodyProperty::LinearDamping => ObservedValue::Number(rb.linear_damping()),
        BodyProperty::AngularDamping => ObservedValue::Number(rb.angular_damping()),
        BodyProperty::AllowSleep => ObservedValue::Flag(entry.allow_sleep),
        BodyProperty::SleepSpeedLimit => ObservedValue::Number(entry.sleep_speed_limit),
        BodyProperty::SleepTimeLimit => ObservedValue::Number(entry.sleep_time_limit),
        BodyProperty::CollisionFilterGroup => ObservedValue::Data(json!(entry.filter.group)),
        BodyProperty::CollisionFilterMask => ObservedValue::Data(json!(entry.filter.mask)),
        BodyProperty::CollisionResponse => ObservedValue::Flag(entry.collision_response),
        BodyProperty::FixedRotation => ObservedValue::Flag(entry.fixed_rotation),
        BodyProperty::IsTrigger => ObservedValue::Flag(entry.is_trigger),
        BodyProperty::Material => {
            ObservedValue::Material(entry.material.clone().unwrap_or_default())
        }
        BodyProperty::UserData => ObservedValue::Data(entry.user_data.clone()),
    }
}

// Worker-originated event payloads. They only ever carry identifiers; the host resolves
// them back to render objects.

use crate::domain::ids::EntityId;
use crate::domain::joints::RayMode;
use crate::domain::properties::ObservedValue;
use serde::{Deserialize, Serialize};

/// Contact detail attached to a `COLLIDE` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactDetail {
    /// Per-world contact sequence number.
    pub id: u64,
    pub bi: EntityId,
    pub bj: EntityId,
    /// World-space contact point.
    pub contact_point: [f32; 3],
    /// Unit normal pointing from the other body toward the receiving body.
    pub contact_normal: [f32; 3],
    /// Relative velocity of the pair along the contact normal at first touch.
    pub impact_velocity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollisionFilters {
    pub body_filter_group: u32,
    pub body_filter_mask: u32,
    pub target_filter_group: u32,
    pub target_filter_mask: u32,
}

/// `target` is the body the event is delivered to, `body` the one it touched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollideEvent {
    pub body: EntityId,
    pub target: EntityId,
    pub contact: ContactDetail,
    pub collision_filters: CollisionFilters,
}

/// A body pair that started or stopped touching.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactChange {
    pub body_a: EntityId,
    pub body_b: EntityId,
}

impl ContactChange {
    /// Canonical pair ordering so `(a, b)` and `(b, a)` name the same contact.
    pub fn ordered(a: EntityId, b: EntityId) -> Self {
        if a <= b {
            Self {
                body_a: a,
                body_b: b,
            }
        } else {
            Self {
                body_a: b,
                body_b: a,
            }
        }
    }

    pub fn involves(&self, id: &EntityId) -> bool {
        &self.body_a == id || &self.body_b == id
    }
}

/// The tested ray, echoed with every hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RayGeometry {
    pub from: [f32; 3],
    pub to: [f32; 3],
    pub direction: [f32; 3],
    pub mode: RayMode,
    pub collision_filter_group: u32,
    pub collision_filter_mask: u32,
    pub check_collision_response: bool,
    pub skip_backfaces: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RayHit {
    pub ray_id: EntityId,
    pub ray: RayGeometry,
    pub has_hit: bool,
    pub body: Option<EntityId>,
    pub hit_point: [f32; 3],
    pub hit_normal: [f32; 3],
    /// Triangle or face index on the hit shape, `-1` when the shape has none.
    pub hit_face_index: i64,
    pub distance: f32,
}

impl RayHit {
    pub fn miss(ray_id: EntityId, ray: RayGeometry) -> Self {
        Self {
            ray_id,
            ray,
            has_hit: false,
            body: None,
            hit_point: [0.0; 3],
            hit_normal: [0.0; 3],
            hit_face_index: -1,
            distance: -1.0,
        }
    }
}

/// One observed property value for a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub subscription: u64,
    pub value: ObservedValue,
    pub property: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn when_pair_is_ordered_then_both_directions_match() {
        let a = EntityId::from("a");
        let b = EntityId::from("b");

        assert_eq!(
            ContactChange::ordered(a.clone(), b.clone()),
            ContactChange::ordered(b.clone(), a.clone())
        );
        assert!(ContactChange::ordered(a.clone(), b).involves(&a));
    }
}

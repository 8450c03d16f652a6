// Damped springs between two bodies, applied as a force pair before each internal step.

use super::{body_pose, to_point};
use crate::domain::ids::EntityId;
use crate::domain::joints::{SpringSpec, SpringValue};
use crate::domain::state::BodyEntry;
use rapier3d::prelude::*;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone)]
pub struct SpringEntry {
    pub spec: SpringSpec,
    pub local_anchor_a: Point<f32>,
    pub local_anchor_b: Point<f32>,
}

impl SpringEntry {
    /// Resolve anchors against the bodies' current poses. World anchors, when given,
    /// win over local ones.
    pub fn new(spec: SpringSpec, pose_a: &Isometry<f32>, pose_b: &Isometry<f32>) -> Self {
        let options = &spec.options;
        let local_anchor_a = match options.world_anchor_a {
            Some(world) => pose_a.inverse_transform_point(&to_point(world)),
            None => to_point(options.local_anchor_a),
        };
        let local_anchor_b = match options.world_anchor_b {
            Some(world) => pose_b.inverse_transform_point(&to_point(world)),
            None => to_point(options.local_anchor_b),
        };
        Self {
            spec,
            local_anchor_a,
            local_anchor_b,
        }
    }

    pub fn set(&mut self, value: SpringValue) {
        let options = &mut self.spec.options;
        match value {
            SpringValue::Stiffness(stiffness) => options.stiffness = stiffness,
            SpringValue::RestLength(rest) => options.rest_length = rest,
            SpringValue::Damping(damping) => options.damping = damping,
        }
    }

    /// Force on body B and the world anchors it acts through; body A receives the
    /// opposite force. `None` while the anchors coincide.
    pub fn force(&self, a: &RigidBody, b: &RigidBody) -> Option<(Vector<f32>, Point<f32>, Point<f32>)> {
        let anchor_a = body_pose(a) * self.local_anchor_a;
        let anchor_b = body_pose(b) * self.local_anchor_b;
        let delta = anchor_b - anchor_a;
        let length = delta.norm();
        if length <= f32::EPSILON {
            return None;
        }

        let direction = delta / length;
        let relative_velocity = b.velocity_at_point(&anchor_b) - a.velocity_at_point(&anchor_a);
        let options = &self.spec.options;
        let magnitude = -options.stiffness * (length - options.rest_length)
            - options.damping * relative_velocity.dot(&direction);

        Some((direction * magnitude, anchor_a, anchor_b))
    }
}

pub fn apply_springs(
    springs: &BTreeMap<EntityId, SpringEntry>,
    bodies: &HashMap<EntityId, BodyEntry>,
    rigid_bodies: &mut RigidBodySet,
) {
    for spring in springs.values() {
        let (Some(a), Some(b)) = (
            bodies.get(&spring.spec.body_a),
            bodies.get(&spring.spec.body_b),
        ) else {
            continue;
        };
        let force = match (rigid_bodies.get(a.handle), rigid_bodies.get(b.handle)) {
            (Some(rb_a), Some(rb_b)) => spring.force(rb_a, rb_b),
            _ => None,
        };
        let Some((force, anchor_a, anchor_b)) = force else {
            continue;
        };

        if let Some(rb) = rigid_bodies.get_mut(a.handle) {
            rb.add_force_at_point(-force, anchor_a, true);
        }
        if let Some(rb) = rigid_bodies.get_mut(b.handle) {
            rb.add_force_at_point(force, anchor_b, true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::joints::SpringOptions;

    fn spring(rest_length: f32) -> SpringSpec {
        SpringSpec {
            id: EntityId::from("spring"),
            body_a: EntityId::from("a"),
            body_b: EntityId::from("b"),
            options: SpringOptions {
                rest_length,
                stiffness: 10.0,
                damping: 0.0,
                ..SpringOptions::default()
            },
        }
    }

    fn body_at(x: f32) -> RigidBody {
        RigidBodyBuilder::dynamic()
            .translation(vector![x, 0.0, 0.0])
            .build()
    }

    #[test]
    fn when_spring_is_stretched_then_it_pulls_b_toward_a() {
        let a = body_at(0.0);
        let b = body_at(3.0);
        let entry = SpringEntry::new(spring(1.0), &body_pose(&a), &body_pose(&b));

        let (force, _, _) = entry.force(&a, &b).expect("anchors are apart");

        assert!((force.x + 20.0).abs() < 1.0e-4);
    }

    #[test]
    fn when_spring_is_compressed_then_it_pushes_b_away() {
        let a = body_at(0.0);
        let b = body_at(0.5);
        let entry = SpringEntry::new(spring(1.0), &body_pose(&a), &body_pose(&b));

        let (force, _, _) = entry.force(&a, &b).expect("anchors are apart");

        assert!(force.x > 0.0);
    }

    #[test]
    fn when_world_anchor_is_given_then_it_is_stored_in_body_space() {
        let a = body_at(2.0);
        let b = body_at(5.0);
        let mut spec = spring(1.0);
        spec.options.world_anchor_a = Some([2.5, 0.0, 0.0]);

        let entry = SpringEntry::new(spec, &body_pose(&a), &body_pose(&b));

        assert!((entry.local_anchor_a.x - 0.5).abs() < 1.0e-5);
    }
}

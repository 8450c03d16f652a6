// Per-step systems layered on top of the rapier pipeline, plus the small math
// conversions they share.

pub mod contacts;
pub mod observation;
pub mod rays;
pub mod springs;
pub mod vehicles;

use crate::domain::body::CollisionFilter;
use rapier3d::na::{Quaternion, Translation3, UnitQuaternion};
use rapier3d::prelude::*;

pub fn to_vector(v: [f32; 3]) -> Vector<f32> {
    vector![v[0], v[1], v[2]]
}

pub fn to_point(v: [f32; 3]) -> Point<f32> {
    point![v[0], v[1], v[2]]
}

pub fn to_array(v: &Vector<f32>) -> [f32; 3] {
    [v.x, v.y, v.z]
}

pub fn point_array(p: &Point<f32>) -> [f32; 3] {
    [p.x, p.y, p.z]
}

/// `[x, y, z, w]` to a unit quaternion (normalized).
pub fn to_rotation(q: [f32; 4]) -> UnitQuaternion<f32> {
    UnitQuaternion::from_quaternion(Quaternion::new(q[3], q[0], q[1], q[2]))
}

/// Unit quaternion to `[x, y, z, w]`.
pub fn quaternion_array(q: &UnitQuaternion<f32>) -> [f32; 4] {
    let c = q.quaternion().coords;
    [c.x, c.y, c.z, c.w]
}

pub fn body_pose(rb: &RigidBody) -> Isometry<f32> {
    Isometry::from_parts(Translation3::from(*rb.translation()), *rb.rotation())
}

/// Unit vector along `v`, falling back to `fallback` when `v` is degenerate.
pub fn unit_or(v: [f32; 3], fallback: UnitVector<f32>) -> UnitVector<f32> {
    UnitVector::try_new(to_vector(v), 1.0e-6).unwrap_or(fallback)
}

pub fn interaction_groups(filter: CollisionFilter) -> InteractionGroups {
    InteractionGroups::all()
        .with_memberships(Group::from_bits_truncate(filter.group))
        .with_filter(Group::from_bits_truncate(filter.mask))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn when_quaternion_round_trips_then_components_keep_xyzw_order() {
        let q = [0.0, 0.70710677, 0.0, 0.70710677];
        let back = quaternion_array(&to_rotation(q));

        for (a, b) in q.iter().zip(back.iter()) {
            assert!((a - b).abs() < 1.0e-5);
        }
    }

    #[test]
    fn when_axis_is_zero_then_fallback_is_used() {
        let axis = unit_or([0.0; 3], Vector::y_axis());
        assert_eq!(axis, Vector::y_axis());
    }
}

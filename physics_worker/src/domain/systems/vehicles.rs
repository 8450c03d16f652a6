// Raycast vehicles.
//
// The chassis is an ordinary dynamic body. Each wheel is a suspension ray cast from
// its chassis connection point; the suspension, engine, brake and side friction are
// applied to the chassis as impulses before the internal step. After the step the
// wheel bodies are moved to the resolved wheel poses so they render in place.

use super::{body_pose, to_point, to_vector, unit_or};
use crate::domain::errors::WorkerError;
use crate::domain::ids::EntityId;
use crate::domain::joints::{VehicleSpec, WheelInfo, WheelValue};
use crate::domain::state::{BodyEntry, PhysicsWorld};
use rapier3d::na::UnitQuaternion;
use rapier3d::prelude::*;
use std::collections::{BTreeMap, HashMap};

// Below this alignment between hit normal and suspension ray the suspension is
// treated as parallel to the ground.
const MIN_NORMAL_ALIGNMENT: f32 = -0.1;

#[derive(Debug, Clone)]
pub struct WheelState {
    pub info: WheelInfo,
    pub steering: f32,
    pub engine_force: f32,
    pub brake: f32,
    pub suspension_length: f32,
    /// Accumulated spin about the axle, radians.
    pub rotation: f32,
    pub in_contact: bool,
    pub sliding: bool,
}

impl WheelState {
    fn new(info: WheelInfo) -> Self {
        Self {
            suspension_length: info.suspension_rest_length,
            info,
            steering: 0.0,
            engine_force: 0.0,
            brake: 0.0,
            rotation: 0.0,
            in_contact: false,
            sliding: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VehicleEntry {
    pub spec: VehicleSpec,
    pub wheels: Vec<WheelState>,
    /// True while any wheel exceeds its friction budget.
    pub sliding: bool,
}

impl VehicleEntry {
    pub fn new(spec: VehicleSpec) -> Result<Self, WorkerError> {
        if spec.wheels.len() != spec.wheel_infos.len() {
            return Err(WorkerError::WheelMismatch {
                vehicle: spec.id.clone(),
                wheels: spec.wheels.len(),
                infos: spec.wheel_infos.len(),
            });
        }
        let wheels = spec.wheel_infos.iter().cloned().map(WheelState::new).collect();
        Ok(Self {
            spec,
            wheels,
            sliding: false,
        })
    }

    pub fn set_wheel(&mut self, wheel: usize, value: WheelValue) -> Result<(), WorkerError> {
        let state = self
            .wheels
            .get_mut(wheel)
            .ok_or_else(|| WorkerError::UnknownWheel {
                vehicle: self.spec.id.clone(),
                wheel,
            })?;
        match value {
            WheelValue::Steering(angle) => state.steering = angle,
            WheelValue::EngineForce(force) => state.engine_force = force,
            WheelValue::Brake(brake) => state.brake = brake,
        }
        Ok(())
    }

    /// Whether `id` is the chassis or one of the wheels.
    pub fn references(&self, id: &EntityId) -> bool {
        &self.spec.chassis == id || self.spec.wheels.contains(id)
    }
}

fn axis(index: usize) -> Vector<f32> {
    match index {
        0 => Vector::x(),
        1 => Vector::y(),
        _ => Vector::z(),
    }
}

struct WheelContact {
    point: Point<f32>,
    normal: Vector<f32>,
    distance: f32,
}

/// Suspension rays and chassis impulses for every vehicle.
pub fn pre_step(
    vehicles: &mut BTreeMap<EntityId, VehicleEntry>,
    bodies: &HashMap<EntityId, BodyEntry>,
    world: &mut PhysicsWorld,
    dt: f32,
) {
    for vehicle in vehicles.values_mut() {
        let Some(chassis) = bodies.get(&vehicle.spec.chassis) else {
            continue;
        };
        let excluded: Vec<RigidBodyHandle> = std::iter::once(chassis.handle)
            .chain(
                vehicle
                    .spec
                    .wheels
                    .iter()
                    .filter_map(|id| bodies.get(id))
                    .map(|entry| entry.handle),
            )
            .collect();

        let Some(rb) = world.bodies.get(chassis.handle) else {
            continue;
        };
        let pose = body_pose(rb);
        let contacts = cast_suspensions(vehicle, &pose, &excluded, world);
        let impulses = resolve_wheels(vehicle, rb, &pose, &contacts, dt);

        if let Some(rb) = world.bodies.get_mut(chassis.handle) {
            for (impulse, point) in impulses {
                rb.apply_impulse_at_point(impulse, point, true);
            }
        }
    }
}

fn cast_suspensions(
    vehicle: &VehicleEntry,
    pose: &Isometry<f32>,
    excluded: &[RigidBodyHandle],
    world: &PhysicsWorld,
) -> Vec<Option<WheelContact>> {
    let skip_vehicle = |_handle: ColliderHandle, collider: &Collider| {
        collider
            .parent()
            .is_none_or(|parent| !excluded.contains(&parent))
    };
    let query = world.query_pipeline(
        QueryFilter::default()
            .exclude_sensors()
            .predicate(&skip_vehicle),
    );

    vehicle
        .wheels
        .iter()
        .map(|wheel| {
            let info = &wheel.info;
            let origin = pose * to_point(info.chassis_connection_point_local);
            let direction = (pose.rotation * to_vector(info.direction_local))
                .try_normalize(f32::EPSILON)?;
            let max_length =
                info.suspension_rest_length + info.max_suspension_travel + info.radius;
            let ray = Ray::new(origin, direction);
            let (_, hit) = query.cast_ray_and_get_normal(&ray, max_length, true)?;
            Some(WheelContact {
                point: ray.point_at(hit.time_of_impact),
                normal: hit.normal,
                distance: hit.time_of_impact,
            })
        })
        .collect()
}

fn resolve_wheels(
    vehicle: &mut VehicleEntry,
    chassis: &RigidBody,
    pose: &Isometry<f32>,
    contacts: &[Option<WheelContact>],
    dt: f32,
) -> Vec<(Vector<f32>, Point<f32>)> {
    let mass = chassis.mass();
    let center_of_mass = *chassis.center_of_mass();
    let up = pose.rotation * axis(vehicle.spec.index_up_axis);
    let grounded = contacts.iter().filter(|c| c.is_some()).count().max(1) as f32;

    let mut impulses = Vec::new();
    let mut any_sliding = false;
    for (wheel, contact) in vehicle.wheels.iter_mut().zip(contacts) {
        let info = wheel.info.clone();
        let Some(contact) = contact else {
            wheel.in_contact = false;
            wheel.sliding = false;
            wheel.suspension_length = info.suspension_rest_length + info.max_suspension_travel;
            continue;
        };
        wheel.in_contact = true;

        let min_length = (info.suspension_rest_length - info.max_suspension_travel).max(0.0);
        let max_length = info.suspension_rest_length + info.max_suspension_travel;
        wheel.suspension_length = (contact.distance - info.radius).clamp(min_length, max_length);

        let direction = pose.rotation * to_vector(info.direction_local);
        let velocity = chassis.velocity_at_point(&contact.point);
        let alignment = contact.normal.dot(&direction);
        let (inverse_alignment, suspension_velocity) = if alignment >= MIN_NORMAL_ALIGNMENT {
            (10.0, 0.0)
        } else {
            let inverse = -1.0 / alignment;
            (inverse, contact.normal.dot(&velocity) * inverse)
        };

        let compression = info.suspension_rest_length - wheel.suspension_length;
        let damping = if suspension_velocity < 0.0 {
            info.damping_compression
        } else {
            info.damping_relaxation
        };
        let spring = info.suspension_stiffness * compression * inverse_alignment
            - damping * suspension_velocity;
        let suspension_force = (spring * mass).clamp(0.0, info.max_suspension_force);
        impulses.push((contact.normal * suspension_force * dt, contact.point));

        // Friction frame: the steered axle projected onto the contact plane, and the
        // rolling direction perpendicular to it.
        let axle_local = pose.rotation * to_vector(info.axle_local);
        let steer_axis = UnitVector::try_new(-direction, f32::EPSILON).unwrap_or(Vector::y_axis());
        let axle = UnitQuaternion::from_axis_angle(&steer_axis, wheel.steering) * axle_local;
        let Some(side) =
            (axle - contact.normal * contact.normal.dot(&axle)).try_normalize(f32::EPSILON)
        else {
            continue;
        };
        let forward = contact.normal.cross(&side);

        let forward_speed = velocity.dot(&forward);
        let side_speed = velocity.dot(&side);
        let share = mass / grounded;

        let mut forward_impulse = wheel.engine_force * dt;
        if wheel.brake > 0.0 {
            let stopping = (forward_speed * share).abs();
            forward_impulse -= (wheel.brake * dt).min(stopping) * forward_speed.signum();
        }
        let mut side_impulse = -side_speed * share;

        let budget = info.friction_slip * suspension_force * dt;
        let total = forward_impulse.hypot(side_impulse);
        wheel.sliding = total > budget;
        if wheel.sliding && total > 0.0 {
            let scale = budget / total;
            forward_impulse *= scale;
            side_impulse *= scale;
        }
        any_sliding |= wheel.sliding;

        // Lower the application point toward the center of mass to reduce roll.
        let height = (contact.point - center_of_mass).dot(&up);
        let friction_point = contact.point - up * (height * (1.0 - info.roll_influence));
        impulses.push((forward * forward_impulse + side * side_impulse, friction_point));

        if info.radius > 0.0 {
            wheel.rotation += forward_speed * dt / info.radius;
        }
    }

    vehicle.sliding = any_sliding;
    impulses
}

/// Move wheel bodies to their resolved poses.
pub fn post_step(
    vehicles: &BTreeMap<EntityId, VehicleEntry>,
    bodies: &HashMap<EntityId, BodyEntry>,
    world: &mut PhysicsWorld,
) {
    for vehicle in vehicles.values() {
        let Some(pose) = bodies
            .get(&vehicle.spec.chassis)
            .and_then(|chassis| world.bodies.get(chassis.handle))
            .map(body_pose)
        else {
            continue;
        };

        for (wheel, wheel_id) in vehicle.wheels.iter().zip(&vehicle.spec.wheels) {
            let Some(entry) = bodies.get(wheel_id) else {
                continue;
            };
            let Some(rb) = world.bodies.get_mut(entry.handle) else {
                continue;
            };
            let info = &wheel.info;
            let direction_local = unit_or(info.direction_local, -Vector::y_axis());
            let center = pose
                * (to_point(info.chassis_connection_point_local)
                    + direction_local.into_inner() * wheel.suspension_length);

            let steer = UnitQuaternion::from_axis_angle(&-direction_local, wheel.steering);
            let spin = UnitQuaternion::from_axis_angle(
                &unit_or(info.axle_local, -Vector::x_axis()),
                wheel.rotation,
            );
            rb.set_translation(center.coords, false);
            rb.set_rotation(pose.rotation * steer * spin, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(wheels: usize, infos: usize) -> VehicleSpec {
        VehicleSpec {
            id: EntityId::from("car"),
            chassis: EntityId::from("chassis"),
            wheels: (0..wheels)
                .map(|i| EntityId::new(format!("wheel-{i}")))
                .collect(),
            wheel_infos: vec![WheelInfo::default(); infos],
            index_forward_axis: 2,
            index_right_axis: 0,
            index_up_axis: 1,
        }
    }

    #[test]
    fn when_wheel_counts_disagree_then_vehicle_is_rejected() {
        assert!(matches!(
            VehicleEntry::new(spec(4, 2)),
            Err(WorkerError::WheelMismatch { wheels: 4, infos: 2, .. })
        ));
    }

    #[test]
    fn when_wheel_input_targets_missing_wheel_then_error() {
        let mut vehicle = VehicleEntry::new(spec(2, 2)).expect("vehicle builds");

        vehicle
            .set_wheel(1, WheelValue::EngineForce(50.0))
            .expect("wheel 1 exists");
        let missing = vehicle.set_wheel(5, WheelValue::Brake(1.0));

        assert_eq!(vehicle.wheels[1].engine_force, 50.0);
        assert!(matches!(missing, Err(WorkerError::UnknownWheel { wheel: 5, .. })));
    }

    #[test]
    fn when_body_is_chassis_or_wheel_then_vehicle_references_it() {
        let vehicle = VehicleEntry::new(spec(2, 2)).expect("vehicle builds");

        assert!(vehicle.references(&EntityId::from("chassis")));
        assert!(vehicle.references(&EntityId::from("wheel-1")));
        assert!(!vehicle.references(&EntityId::from("ground")));
    }
}

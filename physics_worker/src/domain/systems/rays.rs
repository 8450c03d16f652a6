// Registered rays, re-tested against the world before every internal step.

use super::{point_array, to_array, to_point, to_vector};
use crate::domain::body::CollisionFilter;
use crate::domain::events::{RayGeometry, RayHit};
use crate::domain::ids::EntityId;
use crate::domain::joints::{RayMode, RaySpec};
use crate::domain::state::{BodyEntry, PhysicsWorld};
use rapier3d::prelude::*;
use std::collections::HashMap;

/// Echo of the tested ray, direction normalized.
pub fn geometry(spec: &RaySpec) -> RayGeometry {
    let options = &spec.options;
    let delta = to_vector(options.to) - to_vector(options.from);
    let direction = delta.try_normalize(f32::EPSILON).unwrap_or_else(Vector::zeros);
    RayGeometry {
        from: options.from,
        to: options.to,
        direction: to_array(&direction),
        mode: spec.mode,
        collision_filter_group: options.collision_filter_group,
        collision_filter_mask: options.collision_filter_mask,
        check_collision_response: options.check_collision_response,
        skip_backfaces: options.skip_backfaces,
    }
}

pub fn cast_rays(
    rays: &[RaySpec],
    bodies: &HashMap<EntityId, BodyEntry>,
    owners: &HashMap<ColliderHandle, EntityId>,
    world: &PhysicsWorld,
) -> Vec<RayHit> {
    let mut hits = Vec::new();
    for spec in rays {
        cast_ray(spec, bodies, owners, world, &mut hits);
    }
    hits
}

fn cast_ray(
    spec: &RaySpec,
    bodies: &HashMap<EntityId, BodyEntry>,
    owners: &HashMap<ColliderHandle, EntityId>,
    world: &PhysicsWorld,
    hits: &mut Vec<RayHit>,
) {
    let geometry = geometry(spec);
    let from = to_point(spec.options.from);
    let delta = to_vector(spec.options.to) - from.coords;
    let length = delta.norm();
    if length <= f32::EPSILON {
        if spec.mode != RayMode::All {
            hits.push(RayHit::miss(spec.id.clone(), geometry));
        }
        return;
    }

    let ray = Ray::new(from, delta / length);
    let filter = spec.options.filter();
    let check_response = spec.options.check_collision_response;
    let accepts = |handle: ColliderHandle, _collider: &Collider| {
        owners
            .get(&handle)
            .and_then(|id| bodies.get(id))
            .is_some_and(|entry| accepts_body(entry, filter, check_response))
    };

    match spec.mode {
        RayMode::Closest | RayMode::Any => {
            let query = world.query_pipeline(QueryFilter::default().predicate(&accepts));
            let hit = query
                .cast_ray_and_get_normal(&ray, length, true)
                .map(|(handle, intersection)| {
                    hit_event(spec, &geometry, &ray, owners.get(&handle), &intersection)
                });
            hits.push(hit.unwrap_or_else(|| RayHit::miss(spec.id.clone(), geometry.clone())));
        }
        RayMode::All => {
            let mut found: Vec<(ColliderHandle, RayIntersection)> = world
                .colliders
                .iter()
                .filter(|(handle, collider)| accepts(*handle, collider))
                .filter_map(|(handle, collider)| {
                    collider
                        .shape()
                        .cast_ray_and_get_normal(collider.position(), &ray, length, true)
                        .map(|intersection| (handle, intersection))
                })
                .collect();
            found.sort_by(|a, b| a.1.time_of_impact.total_cmp(&b.1.time_of_impact));

            hits.extend(found.iter().map(|(handle, intersection)| {
                hit_event(spec, &geometry, &ray, owners.get(handle), intersection)
            }));
        }
    }
}

fn accepts_body(entry: &BodyEntry, ray_filter: CollisionFilter, check_response: bool) -> bool {
    if !ray_filter.accepts(&entry.filter) {
        return false;
    }
    !check_response || (entry.collision_response && !entry.is_trigger)
}

fn hit_event(
    spec: &RaySpec,
    geometry: &RayGeometry,
    ray: &Ray,
    body: Option<&EntityId>,
    intersection: &RayIntersection,
) -> RayHit {
    let hit_face_index = match intersection.feature {
        FeatureId::Face(index) => i64::from(index),
        _ => -1,
    };
    RayHit {
        ray_id: spec.id.clone(),
        ray: geometry.clone(),
        has_hit: true,
        body: body.cloned(),
        hit_point: point_array(&ray.point_at(intersection.time_of_impact)),
        hit_normal: to_array(&intersection.normal),
        hit_face_index,
        distance: intersection.time_of_impact,
    }
}

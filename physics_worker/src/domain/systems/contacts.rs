// Contact bookkeeping.
//
// Rapier reports collision start/stop per collider pair while the pipeline runs.
// `ContactCollector` captures those reports (with the contact geometry, taken before
// the solver touches the velocities) and `ContactTracker` folds them into body-pair
// transitions, so a compound body touching the ground with two children still yields
// a single begin and a single end.

use super::{point_array, to_array};
use crate::domain::events::{CollideEvent, CollisionFilters, ContactChange, ContactDetail};
use crate::domain::ids::EntityId;
use crate::domain::state::BodyEntry;
use rapier3d::prelude::*;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, Copy)]
pub struct RawDetail {
    pub point: Point<f32>,
    /// World-space normal, from collider 1 toward collider 2.
    pub normal: Vector<f32>,
    pub impact_velocity: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct RawContact {
    pub collider1: ColliderHandle,
    pub collider2: ColliderHandle,
    pub started: bool,
    pub detail: Option<RawDetail>,
}

/// Event sink handed to the physics pipeline.
#[derive(Default)]
pub struct ContactCollector {
    raw: Mutex<Vec<RawContact>>,
}

impl ContactCollector {
    pub fn drain(&self) -> Vec<RawContact> {
        let mut raw = self.raw.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *raw)
    }
}

impl EventHandler for ContactCollector {
    fn handle_collision_event(
        &self,
        bodies: &RigidBodySet,
        colliders: &ColliderSet,
        event: CollisionEvent,
        contact_pair: Option<&ContactPair>,
    ) {
        let detail = if event.started() {
            contact_pair.and_then(|pair| capture_detail(bodies, colliders, pair))
        } else {
            None
        };
        let contact = RawContact {
            collider1: event.collider1(),
            collider2: event.collider2(),
            started: event.started(),
            detail,
        };
        self.raw
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(contact);
    }

    fn handle_contact_force_event(
        &self,
        _dt: f32,
        _bodies: &RigidBodySet,
        _colliders: &ColliderSet,
        _contact_pair: &ContactPair,
        _total_force_magnitude: f32,
    ) {
    }
}

fn capture_detail(
    bodies: &RigidBodySet,
    colliders: &ColliderSet,
    pair: &ContactPair,
) -> Option<RawDetail> {
    let (manifold, contact) = pair.find_deepest_contact()?;
    let collider1 = colliders.get(pair.collider1)?;
    let collider2 = colliders.get(pair.collider2)?;

    let normal = manifold.data.normal;
    let point = collider1.position() * contact.local_p1;
    let velocity = |parent: Option<RigidBodyHandle>| {
        parent
            .and_then(|handle| bodies.get(handle))
            .map(|rb| rb.velocity_at_point(&point))
            .unwrap_or_else(Vector::zeros)
    };
    let v1 = velocity(collider1.parent());
    let v2 = velocity(collider2.parent());

    Some(RawDetail {
        point,
        normal,
        // Positive while the pair is approaching.
        impact_velocity: (v1 - v2).dot(&normal),
    })
}

#[derive(Debug, Default)]
pub struct ContactOutput {
    pub begins: Vec<ContactChange>,
    pub ends: Vec<ContactChange>,
    pub collisions: Vec<CollideEvent>,
}

/// Live touching body pairs, counted per collider pair.
#[derive(Debug, Default)]
pub struct ContactTracker {
    pairs: HashMap<ContactChange, usize>,
    next_contact_id: u64,
}

impl ContactTracker {
    pub fn process(
        &mut self,
        raw: Vec<RawContact>,
        owners: &HashMap<ColliderHandle, EntityId>,
        bodies: &HashMap<EntityId, BodyEntry>,
        out: &mut ContactOutput,
    ) {
        for contact in raw {
            // Colliders of bodies removed earlier in the frame no longer have an owner.
            let (Some(id1), Some(id2)) = (
                owners.get(&contact.collider1),
                owners.get(&contact.collider2),
            ) else {
                continue;
            };
            if id1 == id2 {
                continue;
            }

            let pair = ContactChange::ordered(id1.clone(), id2.clone());
            if contact.started {
                let first = {
                    let count = self.pairs.entry(pair.clone()).or_insert(0);
                    *count += 1;
                    *count == 1
                };
                if first {
                    self.collide(id1, id2, contact.detail, bodies, out);
                    out.begins.push(pair);
                }
            } else if let Some(count) = self.pairs.get_mut(&pair) {
                *count -= 1;
                if *count == 0 {
                    self.pairs.remove(&pair);
                    out.ends.push(pair);
                }
            }
        }
    }

    /// Drop every pair involving `id` without reporting an end.
    pub fn forget_body(&mut self, id: &EntityId) {
        self.pairs.retain(|pair, _| !pair.involves(id));
    }

    pub fn touching(&self, a: &EntityId, b: &EntityId) -> bool {
        self.pairs
            .contains_key(&ContactChange::ordered(a.clone(), b.clone()))
    }

    fn collide(
        &mut self,
        id1: &EntityId,
        id2: &EntityId,
        detail: Option<RawDetail>,
        bodies: &HashMap<EntityId, BodyEntry>,
        out: &mut ContactOutput,
    ) {
        let (Some(body1), Some(body2)) = (bodies.get(id1), bodies.get(id2)) else {
            return;
        };
        if !body1.has_collide_callback && !body2.has_collide_callback {
            return;
        }

        self.next_contact_id += 1;
        let (point, normal, impact_velocity) = match detail {
            Some(detail) => (
                point_array(&detail.point),
                detail.normal,
                detail.impact_velocity,
            ),
            // Sensors report overlap without contact geometry.
            None => ([0.0; 3], Vector::zeros(), 0.0),
        };

        let sides = [
            (id1, body1, id2, body2, -normal),
            (id2, body2, id1, body1, normal),
        ];
        for (target, target_entry, other, other_entry, toward_target) in sides {
            if !target_entry.has_collide_callback {
                continue;
            }
            out.collisions.push(CollideEvent {
                body: other.clone(),
                target: target.clone(),
                contact: ContactDetail {
                    id: self.next_contact_id,
                    bi: id1.clone(),
                    bj: id2.clone(),
                    contact_point: point,
                    contact_normal: to_array(&toward_target),
                    impact_velocity,
                },
                collision_filters: CollisionFilters {
                    body_filter_group: other_entry.filter.group,
                    body_filter_mask: other_entry.filter.mask,
                    target_filter_group: target_entry.filter.group,
                    target_filter_mask: target_entry.filter.mask,
                },
            });
        }
    }
}

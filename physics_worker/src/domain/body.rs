// Serializable body descriptors sent with `ADD_BODIES`.

use crate::domain::shapes::Shape;
use serde::{Deserialize, Serialize};

/// Simulation class of a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BodyKind {
    Dynamic,
    Static,
    Kinematic,
}

/// Surface material. Missing values fall back to the world's default contact material.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Material {
    #[serde(default)]
    pub friction: Option<f32>,
    #[serde(default)]
    pub restitution: Option<f32>,
}

impl Material {
    pub fn new(friction: f32, restitution: f32) -> Self {
        Self {
            friction: Some(friction),
            restitution: Some(restitution),
        }
    }
}

/// Collision filter bits: a body collides with another when each one's group
/// intersects the other's mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollisionFilter {
    pub group: u32,
    pub mask: u32,
}

impl Default for CollisionFilter {
    fn default() -> Self {
        Self {
            group: 1,
            mask: u32::MAX,
        }
    }
}

impl CollisionFilter {
    pub fn accepts(&self, other: &CollisionFilter) -> bool {
        (self.group & other.mask) != 0 && (other.group & self.mask) != 0
    }
}

/// Everything the worker needs to construct one body.
///
/// Callbacks never travel to the worker; the host replaces a collision callback with
/// `has_collide_callback` before sending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BodyParams {
    pub shape: Shape,
    /// Explicit class; when absent, a zero mass means static and anything else dynamic.
    pub kind: Option<BodyKind>,
    pub mass: f32,
    pub material: Option<Material>,
    pub position: [f32; 3],
    /// Euler angles (XYZ, radians).
    pub rotation: [f32; 3],
    pub velocity: [f32; 3],
    pub angular_velocity: [f32; 3],
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub linear_factor: [f32; 3],
    pub angular_factor: [f32; 3],
    pub fixed_rotation: bool,
    pub allow_sleep: bool,
    pub sleep_speed_limit: f32,
    pub sleep_time_limit: f32,
    pub collision_filter_group: u32,
    pub collision_filter_mask: u32,
    pub collision_response: bool,
    pub is_trigger: bool,
    pub user_data: serde_json::Value,
    pub has_collide_callback: bool,
}

impl Default for BodyParams {
    fn default() -> Self {
        let filter = CollisionFilter::default();
        Self {
            shape: Shape::default(),
            kind: None,
            mass: 0.0,
            material: None,
            position: [0.0; 3],
            rotation: [0.0; 3],
            velocity: [0.0; 3],
            angular_velocity: [0.0; 3],
            linear_damping: 0.01,
            angular_damping: 0.01,
            linear_factor: [1.0; 3],
            angular_factor: [1.0; 3],
            fixed_rotation: false,
            allow_sleep: true,
            sleep_speed_limit: 0.1,
            sleep_time_limit: 1.0,
            collision_filter_group: filter.group,
            collision_filter_mask: filter.mask,
            collision_response: true,
            is_trigger: false,
            user_data: serde_json::Value::Null,
            has_collide_callback: false,
        }
    }
}

impl BodyParams {
    pub fn new(shape: Shape) -> Self {
        Self {
            shape,
            ..Self::default()
        }
    }

    pub fn with_mass(mut self, mass: f32) -> Self {
        self.mass = mass;
        self
    }

    pub fn with_kind(mut self, kind: BodyKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn at(mut self, position: [f32; 3]) -> Self {
        self.position = position;
        self
    }

    pub fn rotated(mut self, rotation: [f32; 3]) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_material(mut self, material: Material) -> Self {
        self.material = Some(material);
        self
    }

    /// Class the body is created with.
    pub fn resolved_kind(&self) -> BodyKind {
        match self.kind {
            Some(kind) => kind,
            None if self.mass > 0.0 => BodyKind::Dynamic,
            None => BodyKind::Static,
        }
    }

    pub fn filter(&self) -> CollisionFilter {
        CollisionFilter {
            group: self.collision_filter_group,
            mask: self.collision_filter_mask,
        }
    }
}

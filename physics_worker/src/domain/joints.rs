// Descriptors for the auxiliary entities: constraints, springs, raycast vehicles and rays.

use crate::domain::body::CollisionFilter;
use crate::domain::ids::EntityId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintKind {
    PointToPoint,
    ConeTwist,
    Distance,
    Hinge,
    Lock,
}

impl ConstraintKind {
    /// Only hinges carry a motor.
    pub fn has_motor(&self) -> bool {
        matches!(self, ConstraintKind::Hinge)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConstraintOptions {
    /// Anchor on body A, in A's local frame.
    pub pivot_a: [f32; 3],
    /// Anchor on body B, in B's local frame.
    pub pivot_b: [f32; 3],
    pub axis_a: [f32; 3],
    pub axis_b: [f32; 3],
    /// Distance for distance constraints; defaults to the current anchor separation.
    pub distance: Option<f32>,
    pub max_force: f32,
    pub collide_connected: bool,
    /// Cone half-angle for cone-twist constraints (radians).
    pub angle: f32,
    pub twist_angle: f32,
}

impl Default for ConstraintOptions {
    fn default() -> Self {
        Self {
            pivot_a: [0.0; 3],
            pivot_b: [0.0; 3],
            axis_a: [1.0, 0.0, 0.0],
            axis_b: [1.0, 0.0, 0.0],
            distance: None,
            max_force: 1e6,
            collide_connected: true,
            angle: 0.0,
            twist_angle: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintSpec {
    pub id: EntityId,
    pub kind: ConstraintKind,
    pub body_a: EntityId,
    pub body_b: EntityId,
    pub options: ConstraintOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SpringOptions {
    pub rest_length: f32,
    pub stiffness: f32,
    pub damping: f32,
    pub local_anchor_a: [f32; 3],
    pub local_anchor_b: [f32; 3],
    /// World-space anchors override the local ones when present.
    pub world_anchor_a: Option<[f32; 3]>,
    pub world_anchor_b: Option<[f32; 3]>,
}

impl Default for SpringOptions {
    fn default() -> Self {
        Self {
            rest_length: 1.0,
            stiffness: 100.0,
            damping: 1.0,
            local_anchor_a: [0.0; 3],
            local_anchor_b: [0.0; 3],
            world_anchor_a: None,
            world_anchor_b: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpringSpec {
    pub id: EntityId,
    pub body_a: EntityId,
    pub body_b: EntityId,
    pub options: SpringOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SpringValue {
    Stiffness(f32),
    RestLength(f32),
    Damping(f32),
}

impl SpringValue {
    pub fn topic(&self) -> &'static str {
        match self {
            SpringValue::Stiffness(_) => "SET_SPRING_STIFFNESS",
            SpringValue::RestLength(_) => "SET_SPRING_REST_LENGTH",
            SpringValue::Damping(_) => "SET_SPRING_DAMPING",
        }
    }

    pub fn value(&self) -> f32 {
        match self {
            SpringValue::Stiffness(v) | SpringValue::RestLength(v) | SpringValue::Damping(v) => *v,
        }
    }
}

/// Suspension and friction tuning of one vehicle wheel. Points and directions are in
/// the chassis frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WheelInfo {
    pub radius: f32,
    pub chassis_connection_point_local: [f32; 3],
    pub direction_local: [f32; 3],
    pub axle_local: [f32; 3],
    pub suspension_rest_length: f32,
    pub suspension_stiffness: f32,
    pub max_suspension_travel: f32,
    pub max_suspension_force: f32,
    pub damping_compression: f32,
    pub damping_relaxation: f32,
    pub friction_slip: f32,
    pub roll_influence: f32,
}

impl Default for WheelInfo {
    fn default() -> Self {
        Self {
            radius: 0.5,
            chassis_connection_point_local: [0.0; 3],
            direction_local: [0.0, -1.0, 0.0],
            axle_local: [-1.0, 0.0, 0.0],
            suspension_rest_length: 0.3,
            suspension_stiffness: 30.0,
            max_suspension_travel: 0.3,
            max_suspension_force: 1e5,
            damping_compression: 4.4,
            damping_relaxation: 2.3,
            friction_slip: 5.0,
            roll_influence: 0.01,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VehicleSpec {
    pub id: EntityId,
    pub chassis: EntityId,
    pub wheels: Vec<EntityId>,
    pub wheel_infos: Vec<WheelInfo>,
    pub index_forward_axis: usize,
    pub index_right_axis: usize,
    pub index_up_axis: usize,
}

/// Per-wheel vehicle inputs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum WheelValue {
    Steering(f32),
    EngineForce(f32),
    Brake(f32),
}

impl WheelValue {
    pub fn topic(&self) -> &'static str {
        match self {
            WheelValue::Steering(_) => "SET_RAYCAST_VEHICLE_STEERING_VALUE",
            WheelValue::EngineForce(_) => "APPLY_RAYCAST_VEHICLE_ENGINE_FORCE",
            WheelValue::Brake(_) => "SET_RAYCAST_VEHICLE_BRAKE",
        }
    }
}

/// How many hits a ray reports per test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RayMode {
    /// Nearest hit, one event per test (with `has_hit` false on a miss).
    Closest,
    /// First hit found, one event per test.
    Any,
    /// One event per hit, nearest first.
    All,
}

impl RayMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RayMode::Closest => "Closest",
            RayMode::Any => "Any",
            RayMode::All => "All",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RayOptions {
    pub from: [f32; 3],
    pub to: [f32; 3],
    pub collision_filter_group: u32,
    pub collision_filter_mask: u32,
    /// Ignore bodies with collision response disabled (triggers and sensors).
    pub check_collision_response: bool,
    pub skip_backfaces: bool,
}

impl Default for RayOptions {
    fn default() -> Self {
        let filter = CollisionFilter::default();
        Self {
            from: [0.0; 3],
            to: [0.0; 3],
            collision_filter_group: filter.group,
            collision_filter_mask: filter.mask,
            check_collision_response: true,
            skip_backfaces: false,
        }
    }
}

impl RayOptions {
    pub fn filter(&self) -> CollisionFilter {
        CollisionFilter {
            group: self.collision_filter_group,
            mask: self.collision_filter_mask,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RaySpec {
    pub id: EntityId,
    pub mode: RayMode,
    pub options: RayOptions,
}

// World-level configuration sent with `INIT` and mutated by `SET_<world property>`.

use crate::domain::body::Material;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Solver {
    #[serde(rename = "GS")]
    GaussSeidel,
    Split,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Broadphase {
    Naive,
    #[serde(rename = "SAP")]
    SweepAndPrune,
}

/// Configuration the physics world is constructed from.
///
/// Rapier always uses its BVH broadphase and keeps rotations normalized, so
/// `broadphase`, `axis_index` and the quaternion normalization settings are kept for
/// observation and echo but do not alter integration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorldConfig {
    pub gravity: [f32; 3],
    pub solver: Solver,
    pub iterations: u32,
    pub tolerance: f32,
    pub broadphase: Broadphase,
    pub axis_index: u8,
    pub allow_sleep: bool,
    pub default_contact_material: Material,
    pub quat_normalize_fast: bool,
    pub quat_normalize_skip: u32,
    pub max_sub_steps: u32,
    /// Fixed integration delta in seconds.
    pub step_size: f32,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            gravity: [0.0, -9.81, 0.0],
            solver: Solver::GaussSeidel,
            iterations: 5,
            tolerance: 0.001,
            broadphase: Broadphase::Naive,
            axis_index: 0,
            allow_sleep: false,
            default_contact_material: Material::new(0.3, 0.0),
            quat_normalize_fast: false,
            quat_normalize_skip: 0,
            max_sub_steps: 10,
            step_size: 1.0 / 60.0,
        }
    }
}

impl WorldConfig {
    pub fn with_gravity(mut self, gravity: [f32; 3]) -> Self {
        self.gravity = gravity;
        self
    }

    pub fn with_allow_sleep(mut self, allow_sleep: bool) -> Self {
        self.allow_sleep = allow_sleep;
        self
    }

    pub fn default_friction(&self) -> f32 {
        self.default_contact_material.friction.unwrap_or(0.3)
    }

    pub fn default_restitution(&self) -> f32 {
        self.default_contact_material.restitution.unwrap_or(0.0)
    }

    /// Apply a post-init world property change.
    pub fn apply(&mut self, value: &WorldValue) {
        match value {
            WorldValue::Gravity(gravity) => self.gravity = *gravity,
            WorldValue::Tolerance(tolerance) => self.tolerance = *tolerance,
            WorldValue::Iterations(iterations) => self.iterations = *iterations,
            WorldValue::StepSize(step) => self.step_size = *step,
            WorldValue::MaxSubSteps(max) => self.max_sub_steps = *max,
            WorldValue::Solver(solver) => self.solver = *solver,
            WorldValue::Broadphase(broadphase) => self.broadphase = *broadphase,
            WorldValue::AxisIndex(axis) => self.axis_index = *axis,
            WorldValue::AllowSleep(allow) => self.allow_sleep = *allow,
            WorldValue::DefaultContactMaterial(material) => {
                self.default_contact_material = material.clone()
            }
            WorldValue::QuatNormalizeFast(fast) => self.quat_normalize_fast = *fast,
            WorldValue::QuatNormalizeSkip(skip) => self.quat_normalize_skip = *skip,
        }
    }
}

/// One world-level property change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorldValue {
    Gravity([f32; 3]),
    Tolerance(f32),
    Iterations(u32),
    StepSize(f32),
    MaxSubSteps(u32),
    Solver(Solver),
    Broadphase(Broadphase),
    AxisIndex(u8),
    AllowSleep(bool),
    DefaultContactMaterial(Material),
    QuatNormalizeFast(bool),
    QuatNormalizeSkip(u32),
}

const WORLD_TOPICS: [&str; 12] = [
    "SET_GRAVITY",
    "SET_TOLERANCE",
    "SET_ITERATIONS",
    "SET_STEP_SIZE",
    "SET_MAX_SUB_STEPS",
    "SET_SOLVER",
    "SET_BROADPHASE",
    "SET_AXIS_INDEX",
    "SET_ALLOW_SLEEP",
    "SET_DEFAULT_CONTACT_MATERIAL",
    "SET_QUAT_NORMALIZE_FAST",
    "SET_QUAT_NORMALIZE_SKIP",
];

impl WorldValue {
    pub fn topic(&self) -> &'static str {
        let index = match self {
            WorldValue::Gravity(_) => 0,
            WorldValue::Tolerance(_) => 1,
            WorldValue::Iterations(_) => 2,
            WorldValue::StepSize(_) => 3,
            WorldValue::MaxSubSteps(_) => 4,
            WorldValue::Solver(_) => 5,
            WorldValue::Broadphase(_) => 6,
            WorldValue::AxisIndex(_) => 7,
            WorldValue::AllowSleep(_) => 8,
            WorldValue::DefaultContactMaterial(_) => 9,
            WorldValue::QuatNormalizeFast(_) => 10,
            WorldValue::QuatNormalizeSkip(_) => 11,
        };
        WORLD_TOPICS[index]
    }

    pub fn is_world_topic(topic: &str) -> bool {
        WORLD_TOPICS.contains(&topic)
    }

    /// Decode the props of a world `SET_` topic.
    pub fn from_json(topic: &str, value: serde_json::Value) -> Result<Self, serde_json::Error> {
        use serde_json::from_value;
        Ok(match topic {
            "SET_GRAVITY" => WorldValue::Gravity(from_value(value)?),
            "SET_TOLERANCE" => WorldValue::Tolerance(from_value(value)?),
            "SET_ITERATIONS" => WorldValue::Iterations(from_value(value)?),
            "SET_STEP_SIZE" => WorldValue::StepSize(from_value(value)?),
            "SET_MAX_SUB_STEPS" => WorldValue::MaxSubSteps(from_value(value)?),
            "SET_SOLVER" => WorldValue::Solver(from_value(value)?),
            "SET_BROADPHASE" => WorldValue::Broadphase(from_value(value)?),
            "SET_AXIS_INDEX" => WorldValue::AxisIndex(from_value(value)?),
            "SET_ALLOW_SLEEP" => WorldValue::AllowSleep(from_value(value)?),
            "SET_DEFAULT_CONTACT_MATERIAL" => {
                WorldValue::DefaultContactMaterial(from_value(value)?)
            }
            "SET_QUAT_NORMALIZE_FAST" => WorldValue::QuatNormalizeFast(from_value(value)?),
            _ => WorldValue::QuatNormalizeSkip(from_value(value)?),
        })
    }

    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            WorldValue::Gravity(g) => json!(g),
            WorldValue::Tolerance(v) | WorldValue::StepSize(v) => json!(v),
            WorldValue::Iterations(v)
            | WorldValue::MaxSubSteps(v)
            | WorldValue::QuatNormalizeSkip(v) => json!(v),
            WorldValue::Solver(s) => json!(s),
            WorldValue::Broadphase(b) => json!(b),
            WorldValue::AxisIndex(a) => json!(a),
            WorldValue::AllowSleep(f) | WorldValue::QuatNormalizeFast(f) => json!(f),
            WorldValue::DefaultContactMaterial(m) => json!(m),
        }
    }
}

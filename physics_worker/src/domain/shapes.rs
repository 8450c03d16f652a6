// Shape descriptors and their translation into Rapier colliders.
//
// Conventions
// - Units are meters; rotations on the wire are Euler angles (XYZ, radians).
// - Planes are infinite half-spaces whose normal is the body's local `+Z`; a ground
//   plane is rotated by `[-π/2, 0, 0]`.
// - Box `extents` are full sizes, halved when the cuboid is built.

use crate::domain::body::Material;
use crate::domain::errors::WorkerError;
use rapier3d::na::{DMatrix, UnitQuaternion};
use rapier3d::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Shape family shared by every body in one `ADD_BODIES` batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShapeKind {
    Plane,
    Box,
    Sphere,
    Cylinder,
    Trimesh,
    Heightfield,
    ConvexPolyhedron,
    Compound,
}

impl ShapeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShapeKind::Plane => "Plane",
            ShapeKind::Box => "Box",
            ShapeKind::Sphere => "Sphere",
            ShapeKind::Cylinder => "Cylinder",
            ShapeKind::Trimesh => "Trimesh",
            ShapeKind::Heightfield => "Heightfield",
            ShapeKind::ConvexPolyhedron => "ConvexPolyhedron",
            ShapeKind::Compound => "Compound",
        }
    }
}

impl fmt::Display for ShapeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShapeKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Plane" => Ok(ShapeKind::Plane),
            "Box" => Ok(ShapeKind::Box),
            "Sphere" => Ok(ShapeKind::Sphere),
            "Cylinder" => Ok(ShapeKind::Cylinder),
            "Trimesh" => Ok(ShapeKind::Trimesh),
            "Heightfield" => Ok(ShapeKind::Heightfield),
            "ConvexPolyhedron" => Ok(ShapeKind::ConvexPolyhedron),
            "Compound" => Ok(ShapeKind::Compound),
            other => Err(other.to_string()),
        }
    }
}

/// Shape parameters for one body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "args", rename_all_fields = "camelCase")]
pub enum Shape {
    Plane,
    Box {
        extents: [f32; 3],
    },
    Sphere {
        radius: f32,
    },
    Cylinder {
        radius_top: f32,
        radius_bottom: f32,
        height: f32,
        segments: u32,
    },
    Trimesh {
        vertices: Vec<[f32; 3]>,
        indices: Vec<[u32; 3]>,
    },
    /// Row-major height samples spaced `element_size` apart on X and Z.
    Heightfield {
        heights: Vec<Vec<f32>>,
        element_size: f32,
    },
    /// Convex hull of the given points.
    ConvexPolyhedron {
        vertices: Vec<[f32; 3]>,
    },
    Compound {
        shapes: Vec<CompoundChild>,
    },
}

impl Default for Shape {
    fn default() -> Self {
        Shape::Box {
            extents: [1.0, 1.0, 1.0],
        }
    }
}

/// One sub-shape of a compound body, placed relative to the body origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompoundChild {
    pub shape: Shape,
    #[serde(default)]
    pub position: [f32; 3],
    #[serde(default)]
    pub rotation: [f32; 3],
    #[serde(default)]
    pub material: Option<Material>,
}

impl Shape {
    pub fn kind(&self) -> ShapeKind {
        match self {
            Shape::Plane => ShapeKind::Plane,
            Shape::Box { .. } => ShapeKind::Box,
            Shape::Sphere { .. } => ShapeKind::Sphere,
            Shape::Cylinder { .. } => ShapeKind::Cylinder,
            Shape::Trimesh { .. } => ShapeKind::Trimesh,
            Shape::Heightfield { .. } => ShapeKind::Heightfield,
            Shape::ConvexPolyhedron { .. } => ShapeKind::ConvexPolyhedron,
            Shape::Compound { .. } => ShapeKind::Compound,
        }
    }

    /// Composite shapes cannot be nested inside a compound.
    pub fn is_composite(&self) -> bool {
        matches!(
            self,
            Shape::Compound { .. } | Shape::Trimesh { .. } | Shape::Heightfield { .. }
        )
    }
}

/// A collider ready to be attached to a body, with the material it should carry.
pub struct ColliderPart {
    pub builder: ColliderBuilder,
    pub material: Option<Material>,
}

/// Build the collider parts for `shape`. Compound shapes yield one part per child,
/// each offset from the body origin; every other shape yields exactly one part.
pub fn collider_parts(shape: &Shape) -> Result<Vec<ColliderPart>, WorkerError> {
    match shape {
        Shape::Compound { shapes } => {
            if shapes.is_empty() {
                return Err(WorkerError::InvalidShape(
                    "compound needs at least one child".to_string(),
                ));
            }
            shapes
                .iter()
                .map(|child| {
                    if child.shape.is_composite() || matches!(child.shape, Shape::Plane) {
                        return Err(WorkerError::InvalidShape(format!(
                            "{} cannot be a compound child",
                            child.shape.kind()
                        )));
                    }
                    let rotation = euler_to_quaternion(child.rotation);
                    let builder = collider_builder(&child.shape)?
                        .translation(vector![
                            child.position[0],
                            child.position[1],
                            child.position[2]
                        ])
                        .rotation(rotation.scaled_axis());
                    Ok(ColliderPart {
                        builder,
                        material: child.material.clone(),
                    })
                })
                .collect()
        }
        other => Ok(vec![ColliderPart {
            builder: collider_builder(other)?,
            material: None,
        }]),
    }
}

// Ring resolution for tapered cylinders.
const MIN_CYLINDER_SEGMENTS: u32 = 3;
const MAX_CYLINDER_SEGMENTS: u32 = 256;

/// Build a Rapier collider builder for a single, non-compound shape.
fn collider_builder(shape: &Shape) -> Result<ColliderBuilder, WorkerError> {
    match shape {
        Shape::Plane => Ok(ColliderBuilder::halfspace(Vector::z_axis())),

        Shape::Box { extents } => Ok(ColliderBuilder::cuboid(
            extents[0] * 0.5,
            extents[1] * 0.5,
            extents[2] * 0.5,
        )),

        Shape::Sphere { radius } => {
            if *radius <= 0.0 {
                return Err(WorkerError::InvalidShape(format!(
                    "sphere radius must be positive, got {radius}"
                )));
            }
            Ok(ColliderBuilder::ball(*radius))
        }

        Shape::Cylinder {
            radius_top,
            radius_bottom,
            height,
            segments,
        } => {
            let half_height = height * 0.5;
            if (radius_top - radius_bottom).abs() <= f32::EPSILON {
                return Ok(ColliderBuilder::cylinder(half_height, *radius_top));
            }
            // Tapered cylinders become the hull of their two end rings.
            let segments = (*segments).clamp(MIN_CYLINDER_SEGMENTS, MAX_CYLINDER_SEGMENTS);
            let mut points = Vec::with_capacity(segments as usize * 2);
            for i in 0..segments {
                let angle = std::f32::consts::TAU * i as f32 / segments as f32;
                let (sin, cos) = angle.sin_cos();
                points.push(point![cos * radius_top, half_height, sin * radius_top]);
                points.push(point![cos * radius_bottom, -half_height, sin * radius_bottom]);
            }
            ColliderBuilder::convex_hull(&points).ok_or_else(|| {
                WorkerError::InvalidShape("degenerate tapered cylinder".to_string())
            })
        }

        Shape::Trimesh { vertices, indices } => {
            if let Some(index) = indices
                .iter()
                .flatten()
                .find(|&&i| i as usize >= vertices.len())
            {
                return Err(WorkerError::InvalidShape(format!(
                    "trimesh index {index} out of range for {} vertices",
                    vertices.len()
                )));
            }
            let points = vertices.iter().map(|v| point![v[0], v[1], v[2]]).collect();
            ColliderBuilder::trimesh(points, indices.clone())
                .map_err(|e| WorkerError::InvalidShape(format!("trimesh: {e:?}")))
        }

        Shape::Heightfield {
            heights,
            element_size,
        } => {
            let rows = heights.len();
            let cols = heights.first().map(Vec::len).unwrap_or(0);
            if rows < 2 || cols < 2 || heights.iter().any(|row| row.len() != cols) {
                return Err(WorkerError::InvalidShape(
                    "heightfield needs a rectangular grid of at least 2x2 samples".to_string(),
                ));
            }
            let matrix = DMatrix::from_fn(rows, cols, |r, c| heights[r][c]);
            let scale = vector![
                (cols - 1) as f32 * element_size,
                1.0,
                (rows - 1) as f32 * element_size
            ];
            Ok(ColliderBuilder::heightfield(matrix, scale))
        }

        Shape::ConvexPolyhedron { vertices } => {
            let points: Vec<_> = vertices.iter().map(|v| point![v[0], v[1], v[2]]).collect();
            ColliderBuilder::convex_hull(&points).ok_or_else(|| {
                WorkerError::InvalidShape("convex hull of the given points is degenerate".into())
            })
        }

        Shape::Compound { .. } => Err(WorkerError::InvalidShape(
            "nested compound shapes are not supported".to_string(),
        )),
    }
}

/// Euler angles (XYZ order, radians) to a unit quaternion.
pub fn euler_to_quaternion(euler: [f32; 3]) -> UnitQuaternion<f32> {
    UnitQuaternion::from_euler_angles(euler[0], euler[1], euler[2])
}

// Render-side boundary: the objects the host writes simulated poses into.
//
// The scene graph itself is not part of this crate. `SceneNode` and `InstancedNode`
// are minimal implementations used by the service and the tests.

use nalgebra::{Isometry3, Matrix4, Quaternion, Translation3, UnitQuaternion, Vector3};
use std::sync::{Arc, Mutex};

/// An object with a pose, a scale and a writable transform matrix.
///
/// Batched objects additionally expose a per-instance matrix array.
pub trait RenderObject: Send {
    fn position(&self) -> [f32; 3];
    fn quaternion(&self) -> [f32; 4];
    fn scale(&self) -> [f32; 3];

    fn set_position(&mut self, position: [f32; 3]);
    fn set_quaternion(&mut self, quaternion: [f32; 4]);

    /// Overwrite the column-major local transform matrix.
    fn set_matrix(&mut self, matrix: [f32; 16]);

    /// Number of instances for a batched object, `None` for a single object.
    fn instance_count(&self) -> Option<usize> {
        None
    }

    fn set_instance_matrix(&mut self, _index: usize, _matrix: [f32; 16]) {}
}

pub type RenderRef = Arc<Mutex<dyn RenderObject>>;

/// Identity of a render object, taken from its allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderKey(usize);

impl RenderKey {
    pub fn of(render: &RenderRef) -> Self {
        Self(Arc::as_ptr(render) as *const () as usize)
    }
}

pub const IDENTITY_MATRIX: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// Column-major `translation * rotation * scale` matrix.
pub fn compose(position: [f32; 3], quaternion: [f32; 4], scale: [f32; 3]) -> [f32; 16] {
    let rotation = UnitQuaternion::from_quaternion(Quaternion::new(
        quaternion[3],
        quaternion[0],
        quaternion[1],
        quaternion[2],
    ));
    let pose = Isometry3::from_parts(
        Translation3::new(position[0], position[1], position[2]),
        rotation,
    );
    let matrix: Matrix4<f32> = pose.to_homogeneous()
        * Matrix4::new_nonuniform_scaling(&Vector3::new(scale[0], scale[1], scale[2]));

    let mut out = [0.0; 16];
    out.copy_from_slice(matrix.as_slice());
    out
}

/// Translation column of a composed matrix.
pub fn matrix_position(matrix: &[f32; 16]) -> [f32; 3] {
    [matrix[12], matrix[13], matrix[14]]
}

/// A single scene-graph object.
#[derive(Debug, Clone)]
pub struct SceneNode {
    pub position: [f32; 3],
    pub quaternion: [f32; 4],
    pub scale: [f32; 3],
    pub matrix: [f32; 16],
    /// Number of transform writes received from frames.
    pub matrix_writes: u64,
}

impl Default for SceneNode {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            quaternion: [0.0, 0.0, 0.0, 1.0],
            scale: [1.0; 3],
            matrix: IDENTITY_MATRIX,
            matrix_writes: 0,
        }
    }
}

impl SceneNode {
    pub fn shared() -> Arc<Mutex<SceneNode>> {
        Arc::new(Mutex::new(SceneNode::default()))
    }

    /// Translation currently held by the transform matrix.
    pub fn matrix_position(&self) -> [f32; 3] {
        matrix_position(&self.matrix)
    }
}

impl RenderObject for SceneNode {
    fn position(&self) -> [f32; 3] {
        self.position
    }

    fn quaternion(&self) -> [f32; 4] {
        self.quaternion
    }

    fn scale(&self) -> [f32; 3] {
        self.scale
    }

    fn set_position(&mut self, position: [f32; 3]) {
        self.position = position;
    }

    fn set_quaternion(&mut self, quaternion: [f32; 4]) {
        self.quaternion = quaternion;
    }

    fn set_matrix(&mut self, matrix: [f32; 16]) {
        self.matrix = matrix;
        self.matrix_writes += 1;
    }
}

/// A batch drawn with one draw call and one transform per instance.
#[derive(Debug, Clone)]
pub struct InstancedNode {
    pub scale: [f32; 3],
    pub matrices: Vec<[f32; 16]>,
}

impl InstancedNode {
    pub fn new(count: usize) -> Self {
        Self {
            scale: [1.0; 3],
            matrices: vec![IDENTITY_MATRIX; count],
        }
    }

    pub fn shared(count: usize) -> Arc<Mutex<InstancedNode>> {
        Arc::new(Mutex::new(InstancedNode::new(count)))
    }

    pub fn instance_position(&self, index: usize) -> Option<[f32; 3]> {
        self.matrices.get(index).map(matrix_position)
    }
}

impl RenderObject for InstancedNode {
    fn position(&self) -> [f32; 3] {
        [0.0; 3]
    }

    fn quaternion(&self) -> [f32; 4] {
        [0.0, 0.0, 0.0, 1.0]
    }

    fn scale(&self) -> [f32; 3] {
        self.scale
    }

    fn set_position(&mut self, _position: [f32; 3]) {}

    fn set_quaternion(&mut self, _quaternion: [f32; 4]) {}

    fn set_matrix(&mut self, _matrix: [f32; 16]) {}

    fn instance_count(&self) -> Option<usize> {
        Some(self.matrices.len())
    }

    fn set_instance_matrix(&mut self, index: usize, matrix: [f32; 16]) {
        if let Some(slot) = self.matrices.get_mut(index) {
            *slot = matrix;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn when_pose_is_composed_then_translation_lands_in_last_column() {
        let matrix = compose([1.0, 2.0, 3.0], [0.0, 0.0, 0.0, 1.0], [1.0, 1.0, 1.0]);

        assert_eq!(matrix_position(&matrix), [1.0, 2.0, 3.0]);
        assert_eq!(matrix[0], 1.0);
        assert_eq!(matrix[15], 1.0);
    }

    #[test]
    fn when_scale_is_non_uniform_then_diagonal_carries_it() {
        let matrix = compose([0.0; 3], [0.0, 0.0, 0.0, 1.0], [2.0, 3.0, 4.0]);

        assert_eq!([matrix[0], matrix[5], matrix[10]], [2.0, 3.0, 4.0]);
    }

    #[test]
    fn when_two_refs_share_an_allocation_then_keys_match() {
        let node: RenderRef = SceneNode::shared();
        let same = node.clone();
        let other: RenderRef = SceneNode::shared();

        assert_eq!(RenderKey::of(&node), RenderKey::of(&same));
        assert_ne!(RenderKey::of(&node), RenderKey::of(&other));
    }
}

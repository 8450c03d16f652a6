// Pose buffers and the ownership slot the host keeps them in.
//
// `PoseBuffers` is deliberately move-only: a `STEP` moves the value into the
// message, the worker writes into it and moves it back inside `FRAME`. While it is
// in flight the host slot is `BufferSlot::InFlight` and holds nothing to read or
// write.

use crate::domain::errors::ProtocolError;

const IDENTITY_QUATERNION: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// Flat pose arrays: `3N` position floats and `4N` quaternion floats (x, y, z, w).
#[derive(Debug, Default, PartialEq)]
pub struct PoseBuffers {
    positions: Vec<f32>,
    quaternions: Vec<f32>,
}

impl PoseBuffers {
    /// Buffers sized for `bodies` entries, zeroed positions and identity rotations.
    pub fn with_bodies(bodies: usize) -> Self {
        let mut buffers = Self::default();
        buffers.resize(bodies);
        buffers
    }

    /// Adopt raw arrays received from a transport.
    pub fn from_raw(positions: Vec<f32>, quaternions: Vec<f32>) -> Result<Self, ProtocolError> {
        if positions.len() % 3 != 0
            || quaternions.len() % 4 != 0
            || positions.len() / 3 != quaternions.len() / 4
        {
            return Err(ProtocolError::BadProps {
                topic: "buffers".to_string(),
                reason: format!(
                    "mismatched pose buffers: {} position floats, {} quaternion floats",
                    positions.len(),
                    quaternions.len()
                ),
            });
        }
        Ok(Self {
            positions,
            quaternions,
        })
    }

    pub fn into_raw(self) -> (Vec<f32>, Vec<f32>) {
        (self.positions, self.quaternions)
    }

    /// Number of bodies the buffers describe.
    pub fn len(&self) -> usize {
        self.positions.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Resize to exactly `bodies` entries. New entries get the identity pose.
    pub fn resize(&mut self, bodies: usize) {
        self.positions.resize(bodies * 3, 0.0);
        let old = self.quaternions.len() / 4;
        self.quaternions.truncate(bodies * 4);
        for _ in old..bodies {
            self.quaternions.extend_from_slice(&IDENTITY_QUATERNION);
        }
    }

    pub fn write(&mut self, index: usize, position: [f32; 3], quaternion: [f32; 4]) {
        self.positions[index * 3..index * 3 + 3].copy_from_slice(&position);
        self.quaternions[index * 4..index * 4 + 4].copy_from_slice(&quaternion);
    }

    pub fn position(&self, index: usize) -> Option<[f32; 3]> {
        let slice = self.positions.get(index * 3..index * 3 + 3)?;
        Some([slice[0], slice[1], slice[2]])
    }

    pub fn quaternion(&self, index: usize) -> Option<[f32; 4]> {
        let slice = self.quaternions.get(index * 4..index * 4 + 4)?;
        Some([slice[0], slice[1], slice[2], slice[3]])
    }

    pub fn positions(&self) -> &[f32] {
        &self.positions
    }

    pub fn quaternions(&self) -> &[f32] {
        &self.quaternions
    }
}

/// Host-side holder for the pose buffers.
#[derive(Debug)]
pub enum BufferSlot {
    /// Host owns the buffers.
    Idle(PoseBuffers),
    /// A `STEP` carried the buffers away; nothing to touch until its `FRAME` returns.
    InFlight,
}

impl Default for BufferSlot {
    fn default() -> Self {
        BufferSlot::Idle(PoseBuffers::default())
    }
}

impl BufferSlot {
    pub fn is_in_flight(&self) -> bool {
        matches!(self, BufferSlot::InFlight)
    }

    pub fn idle(&self) -> Option<&PoseBuffers> {
        match self {
            BufferSlot::Idle(buffers) => Some(buffers),
            BufferSlot::InFlight => None,
        }
    }

    pub fn idle_mut(&mut self) -> Option<&mut PoseBuffers> {
        match self {
            BufferSlot::Idle(buffers) => Some(buffers),
            BufferSlot::InFlight => None,
        }
    }

    /// Move the buffers out for a `STEP`, leaving the slot in flight.
    /// Returns `None` when already in flight.
    pub fn take_for_step(&mut self) -> Option<PoseBuffers> {
        match std::mem::replace(self, BufferSlot::InFlight) {
            BufferSlot::Idle(buffers) => Some(buffers),
            BufferSlot::InFlight => None,
        }
    }

    /// Re-adopt buffers returned by a `FRAME`.
    pub fn adopt(&mut self, buffers: PoseBuffers) {
        *self = BufferSlot::Idle(buffers);
    }
}

// Opaque identifiers shared by the host proxy and the simulation worker.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Names one simulation entity. Assigned by the host, unique within a simulation instance.
///
/// Instanced batches derive one identifier per instance by appending `/index`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Fresh random identifier for a newly created entity.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Identifier of instance `index` inside a batch rooted at `self`.
    pub fn instance(&self, index: usize) -> Self {
        Self(format!("{}/{}", self.0, index))
    }

    /// Instance index carried in the `/index` suffix, if any.
    pub fn instance_index(&self) -> Option<usize> {
        let (_, suffix) = self.0.rsplit_once('/')?;
        suffix.parse().ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

//! Resource kinds and per-node declarations.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Sentinel for "no upper bound".
pub const UNBOUNDED: u64 = u64::MAX;

/// The resource kinds the runtime apportions per phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    /// Bytes of RAM.
    Memory,
    /// Open file handles.
    Files,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 2] = [ResourceKind::Memory, ResourceKind::Files];

    pub(crate) fn index(self) -> usize {
        match self {
            ResourceKind::Memory => 0,
            ResourceKind::Files => 1,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Memory => write!(f, "memory"),
            ResourceKind::Files => write!(f, "files"),
        }
    }
}

/// What a node asks for in one resource kind. `minimum <= maximum` and the
/// fraction is the node's weight when splitting the budget left over after
/// minimums are granted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub minimum: u64,
    pub maximum: u64,
    pub fraction: f64,
}

impl Default for ResourceRequest {
    fn default() -> Self {
        Self {
            minimum: 0,
            maximum: UNBOUNDED,
            fraction: 0.0,
        }
    }
}

/// A named long-lived memory region declared by a node. Declarations of the
/// same name are aggregated across nodes and phases; the region stays
/// allocated from the first to the last phase that declares it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatastructureDecl {
    pub name: String,
    pub minimum: u64,
    pub maximum: u64,
    pub priority: f64,
}

impl DatastructureDecl {
    pub fn new(name: impl Into<String>, minimum: u64, maximum: u64, priority: f64) -> Self {
        Self {
            name: name.into(),
            minimum,
            maximum,
            priority,
        }
    }
}

#![forbid(unsafe_code)]
//! empipe: a pipelining runtime for external-memory algorithms.
//!
//! Users compose a directed graph of stream-processing nodes; the runtime
//! partitions it into phases, orders the phases so memory-sharing ones run
//! back to back, apportions memory and file handles per phase, and drives
//! every node through its lifecycle with progress reporting.
//!
//! This crate is a facade over the workspace members.

pub use empipe_core::{config, disjoint, error, graph, id, satisfiable};
pub use empipe_node::{forwards, map, resource, traits};
pub use empipe_progress as progress;
pub use empipe_runtime::{datastructures, phases, resources, runtime};

pub use empipe_core::{Error, Result};
pub use empipe_node::{Node, NodeBase, NodeMap, NodeState, RelationKind, ResourceKind};
pub use empipe_runtime::{GoContext, Runtime, SourceLocation};

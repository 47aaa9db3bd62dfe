#![forbid(unsafe_code)]
//! empipe-runtime: executes a node graph phase by phase.
//!
//! The pipeline runs in three stages: partition the nodes into phases along
//! their push/pull relations (`phases`), apportion memory and file handles
//! to each phase (`resources`, `datastructures`), then drive every phase
//! through prepare/propagate/begin/go/end with progress reporting
//! (`runtime`).

pub mod datastructures;
pub mod phases;
pub mod resources;
pub mod runtime;

pub use datastructures::DatastructureRuntime;
pub use phases::{inverse_permutation, order_phases, phase_graph, phase_map, PhasePlan};
pub use runtime::{GoContext, Runtime, SourceLocation};

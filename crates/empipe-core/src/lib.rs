#![forbid(unsafe_code)]
//! empipe-core: ids, the canonical error enum, process-wide configuration and
//! the graph machinery the pipelining runtime is built on.
//!
//! Everything here is synchronous and allocation-light. The two graph types
//! (`graph::Graph` and `satisfiable::SatisfiableGraph`) carry the ordering
//! algorithms; `disjoint::DisjointSets` is the contraction primitive both the
//! phase partitioner and the satisfiable-edge search use.

pub mod config;
pub mod disjoint;
pub mod error;
pub mod graph;
pub mod id;
pub mod satisfiable;

pub use disjoint::DisjointSets;
pub use error::{Error, Result};
pub use graph::Graph;
pub use id::NodeId;
pub use satisfiable::{SatisfiableGraph, Strategy};

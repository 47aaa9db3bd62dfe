#![forbid(unsafe_code)]
//! empipe-node: the polymorphic node contract and the node catalogue.
//!
//! The runtime drives arbitrary stream-processing nodes through a fixed
//! lifecycle and never sees anything but the [`traits::Node`] interface.
//! [`map::NodeMap`] is the authoritative catalogue: it owns the nodes, the
//! typed relations between them, and the process-scoped datastructure store.

pub mod forwards;
pub mod map;
pub mod resource;
pub mod traits;

pub use forwards::Forwards;
pub use map::{DatastructureSlot, NodeMap, NodeMapRef, Relation, RelationKind};
pub use resource::{DatastructureDecl, ResourceKind, ResourceRequest, UNBOUNDED};
pub use traits::{Node, NodeBase, NodeState};

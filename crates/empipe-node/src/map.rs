//! The node catalogue: nodes, typed relations, the datastructure store and
//! authority resolution for merged maps.
//!
//! When pipelines are composed from factories, every fragment starts with
//! its own map; merging forwards one map to the other and moves its content
//! over. [`NodeMap::find_authority`] resolves any map reference to the
//! canonical root the runtime executes against.

use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use empipe_core::id::NodeId;

use crate::traits::Node;

/// How two nodes relate. Relations are recorded as `from → (to, kind)`
/// where `from` is the declaring endpoint: the active side for
/// `Pushes`/`Pulls`, the consumer for the dependency kinds (so `to` names
/// the producer that must finish first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    /// Producer actively writes to consumer. Intra-phase.
    Pushes,
    /// Consumer actively reads from producer. Intra-phase.
    Pulls,
    /// Producer must fully finish before consumer runs.
    Depends,
    /// Dependency without item forwarding.
    NoForwardDepends,
    /// Dependency where the producer retains memory the consumer reuses.
    MemoryShareDepends,
}

impl RelationKind {
    /// The kinds forming inter-phase edges; everything else keeps its
    /// endpoints in one phase.
    pub fn is_dependency(self) -> bool {
        matches!(
            self,
            RelationKind::Depends
                | RelationKind::NoForwardDepends
                | RelationKind::MemoryShareDepends
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Relation {
    pub from: NodeId,
    pub to: NodeId,
    pub kind: RelationKind,
}

/// A datastructure's slot in the process-scoped store: the memory granted
/// to it and the opaque instance nodes park there across phases.
pub struct DatastructureSlot {
    pub assigned: u64,
    pub storage: Option<Box<dyn Any>>,
}

pub type NodeMapRef = Rc<RefCell<NodeMap>>;

#[derive(Default)]
pub struct NodeMap {
    nodes: BTreeMap<NodeId, Box<dyn Node>>,
    relations: Vec<Relation>,
    datastructures: BTreeMap<String, DatastructureSlot>,
    forwarded_to: Option<NodeMapRef>,
}

impl NodeMap {
    pub fn new() -> NodeMapRef {
        Rc::new(RefCell::new(Self::default()))
    }

    pub fn insert(&mut self, node: Box<dyn Node>) -> NodeId {
        let id = node.id();
        self.nodes.insert(id, node);
        id
    }

    pub fn get(&self, id: NodeId) -> Option<&dyn Node> {
        self.nodes.get(&id).map(|n| n.as_ref())
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut (dyn Node + 'static)> {
        self.nodes.get_mut(&id).map(|n| n.as_mut())
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Node ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// `from` pushes items to `to`.
    pub fn add_push(&mut self, from: NodeId, to: NodeId) {
        self.relations.push(Relation {
            from,
            to,
            kind: RelationKind::Pushes,
        });
    }

    /// `from` pulls items from `to`.
    pub fn add_pull(&mut self, from: NodeId, to: NodeId) {
        self.relations.push(Relation {
            from,
            to,
            kind: RelationKind::Pulls,
        });
    }

    /// `of` runs only after `on` has fully finished.
    pub fn add_dependency(&mut self, of: NodeId, on: NodeId) {
        self.relations.push(Relation {
            from: of,
            to: on,
            kind: RelationKind::Depends,
        });
    }

    /// Dependency that does not forward items.
    pub fn add_no_forward_dependency(&mut self, of: NodeId, on: NodeId) {
        self.relations.push(Relation {
            from: of,
            to: on,
            kind: RelationKind::NoForwardDepends,
        });
    }

    /// Dependency where `on` keeps memory around for `of` to reuse.
    pub fn add_memory_share_dependency(&mut self, of: NodeId, on: NodeId) {
        self.relations.push(Relation {
            from: of,
            to: on,
            kind: RelationKind::MemoryShareDepends,
        });
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    pub fn relations_from(&self, id: NodeId) -> impl Iterator<Item = &Relation> + '_ {
        self.relations.iter().filter(move |r| r.from == id)
    }

    /// Number of relations of `kind` targeting `id`. An initiator has zero
    /// in-degree under both `Pushes` and `Pulls`.
    pub fn in_degree(&self, id: NodeId, kind: RelationKind) -> usize {
        self.relations
            .iter()
            .filter(|r| r.to == id && r.kind == kind)
            .count()
    }

    /// Nodes where items originate: nothing pushes to them and they do not
    /// pull, nor depend on anything.
    pub fn item_sources(&self) -> Vec<NodeId> {
        let mut candidates: BTreeMap<NodeId, ()> = self.nodes.keys().map(|&id| (id, ())).collect();
        for r in &self.relations {
            match r.kind {
                RelationKind::Pushes => {
                    candidates.remove(&r.to);
                }
                _ => {
                    candidates.remove(&r.from);
                }
            }
        }
        candidates.into_keys().collect()
    }

    /// Nodes where items come to rest: they push nowhere, nothing pulls
    /// from them and nothing depends on them.
    pub fn item_sinks(&self) -> Vec<NodeId> {
        let mut candidates: BTreeMap<NodeId, ()> = self.nodes.keys().map(|&id| (id, ())).collect();
        for r in &self.relations {
            match r.kind {
                RelationKind::Pushes => {
                    candidates.remove(&r.from);
                }
                _ => {
                    candidates.remove(&r.to);
                }
            }
        }
        candidates.into_keys().collect()
    }

    pub fn datastructures(&self) -> &BTreeMap<String, DatastructureSlot> {
        &self.datastructures
    }

    pub fn datastructures_mut(&mut self) -> &mut BTreeMap<String, DatastructureSlot> {
        &mut self.datastructures
    }

    /// The canonical root of a possibly-forwarded map, with path
    /// compression along the way.
    pub fn find_authority(map: &NodeMapRef) -> NodeMapRef {
        let parent = map.borrow().forwarded_to.clone();
        match parent {
            None => Rc::clone(map),
            Some(parent) => {
                let root = Self::find_authority(&parent);
                if !Rc::ptr_eq(&root, map) {
                    map.borrow_mut().forwarded_to = Some(Rc::clone(&root));
                }
                root
            }
        }
    }

    /// Merge the map containing `b` into the one containing `a`: `b`'s
    /// authority forwards to `a`'s, and its nodes, relations and
    /// datastructures move over. Returns the surviving authority.
    pub fn union(a: &NodeMapRef, b: &NodeMapRef) -> NodeMapRef {
        let root_a = Self::find_authority(a);
        let root_b = Self::find_authority(b);
        if Rc::ptr_eq(&root_a, &root_b) {
            return root_a;
        }
        {
            let mut src = root_b.borrow_mut();
            let mut dst = root_a.borrow_mut();
            let mut nodes = std::mem::take(&mut src.nodes);
            dst.nodes.append(&mut nodes);
            dst.relations.extend(src.relations.drain(..));
            let mut ds = std::mem::take(&mut src.datastructures);
            dst.datastructures.append(&mut ds);
            src.forwarded_to = Some(Rc::clone(&root_a));
        }
        root_a
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{Node, NodeBase};

    struct Plain {
        base: NodeBase,
    }

    impl Plain {
        fn boxed() -> Box<dyn Node> {
            Box::new(Plain {
                base: NodeBase::new(),
            })
        }
    }

    impl Node for Plain {
        fn base(&self) -> &NodeBase {
            &self.base
        }
        fn base_mut(&mut self) -> &mut NodeBase {
            &mut self.base
        }
    }

    #[test]
    fn in_degree_counts_relation_targets() {
        let map = NodeMap::new();
        let mut m = map.borrow_mut();
        let a = m.insert(Plain::boxed());
        let b = m.insert(Plain::boxed());
        let c = m.insert(Plain::boxed());
        m.add_push(a, b);
        m.add_pull(c, b);
        assert_eq!(m.in_degree(b, RelationKind::Pushes), 1);
        assert_eq!(m.in_degree(b, RelationKind::Pulls), 1);
        assert_eq!(m.in_degree(a, RelationKind::Pushes), 0);
        assert_eq!(m.in_degree(c, RelationKind::Pulls), 0);
    }

    #[test]
    fn sources_and_sinks_follow_item_direction() {
        // a pushes to b; c pulls from b.
        let map = NodeMap::new();
        let mut m = map.borrow_mut();
        let a = m.insert(Plain::boxed());
        let b = m.insert(Plain::boxed());
        let c = m.insert(Plain::boxed());
        m.add_push(a, b);
        m.add_pull(c, b);
        assert_eq!(m.item_sources(), vec![a]);
        assert_eq!(m.item_sinks(), vec![c]);
    }

    #[test]
    fn union_moves_content_to_the_authority() {
        let m1 = NodeMap::new();
        let m2 = NodeMap::new();
        let a = m1.borrow_mut().insert(Plain::boxed());
        let b = m2.borrow_mut().insert(Plain::boxed());
        m2.borrow_mut().add_dependency(b, a);

        let authority = NodeMap::union(&m1, &m2);
        assert!(Rc::ptr_eq(&authority, &m1));
        assert_eq!(authority.borrow().len(), 2);
        assert_eq!(authority.borrow().relations().len(), 1);
        assert!(m2.borrow().is_empty());

        // Any reference now resolves to the same authority.
        assert!(Rc::ptr_eq(&NodeMap::find_authority(&m2), &authority));
        assert!(Rc::ptr_eq(&NodeMap::find_authority(&m1), &authority));
    }

    #[test]
    fn union_chains_resolve_transitively() {
        let m1 = NodeMap::new();
        let m2 = NodeMap::new();
        let m3 = NodeMap::new();
        m1.borrow_mut().insert(Plain::boxed());
        m2.borrow_mut().insert(Plain::boxed());
        m3.borrow_mut().insert(Plain::boxed());

        NodeMap::union(&m1, &m2);
        NodeMap::union(&m2, &m3);
        let authority = NodeMap::find_authority(&m3);
        assert!(Rc::ptr_eq(&authority, &m1));
        assert_eq!(authority.borrow().len(), 3);
    }
}

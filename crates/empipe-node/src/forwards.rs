//! Forwarded auxiliary values.
//!
//! During `prepare` and `propagate` a node can publish small values (item
//! counts, key ranges, ...) that nodes downstream of it pick up before any
//! item flows. Values travel along `Pushes`/`Pulls` edges in item direction
//! and along ordinary and memory-share dependencies from producer to
//! consumer; a no-forward dependency is exactly a dependency that carries
//! nothing.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde_json::Value;

use empipe_core::id::NodeId;

use crate::map::{NodeMap, RelationKind};

pub struct Forwards {
    /// Forwarding successors in item direction.
    successors: HashMap<NodeId, Vec<NodeId>>,
    /// Values visible to each node.
    received: HashMap<NodeId, BTreeMap<String, Value>>,
    /// The node whose lifecycle entry point is currently running.
    current: Option<NodeId>,
}

impl Forwards {
    pub fn from_map(map: &NodeMap) -> Self {
        let mut successors: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for relation in map.relations() {
            let (source, target) = match relation.kind {
                RelationKind::Pushes => (relation.from, relation.to),
                RelationKind::Pulls => (relation.to, relation.from),
                RelationKind::Depends | RelationKind::MemoryShareDepends => {
                    (relation.to, relation.from)
                }
                RelationKind::NoForwardDepends => continue,
            };
            successors.entry(source).or_default().push(target);
        }
        Self {
            successors,
            received: HashMap::new(),
            current: None,
        }
    }

    /// Select the node about to run. The runtime calls this before every
    /// `prepare`/`propagate` invocation.
    pub fn set_current(&mut self, id: NodeId) {
        self.current = Some(id);
    }

    /// Publish `value` under `key` to every node downstream of the current
    /// one. Later publications of the same key overwrite earlier ones.
    pub fn forward(&mut self, key: &str, value: Value) {
        let Some(source) = self.current else {
            return;
        };
        let mut seen: HashSet<NodeId> = HashSet::new();
        let mut stack: Vec<NodeId> = self
            .successors
            .get(&source)
            .cloned()
            .unwrap_or_default();
        while let Some(target) = stack.pop() {
            if !seen.insert(target) {
                continue;
            }
            self.received
                .entry(target)
                .or_default()
                .insert(key.to_string(), value.clone());
            if let Some(next) = self.successors.get(&target) {
                stack.extend(next.iter().copied());
            }
        }
    }

    /// Look up a value published to the current node.
    pub fn fetch(&self, key: &str) -> Option<&Value> {
        self.received.get(&self.current?)?.get(key)
    }

    pub fn can_fetch(&self, key: &str) -> bool {
        self.fetch(key).is_some()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::map::NodeMap;
    use crate::traits::{Node, NodeBase};

    struct Plain {
        base: NodeBase,
    }

    impl Node for Plain {
        fn base(&self) -> &NodeBase {
            &self.base
        }
        fn base_mut(&mut self) -> &mut NodeBase {
            &mut self.base
        }
    }

    fn plain() -> Box<dyn Node> {
        Box::new(Plain {
            base: NodeBase::new(),
        })
    }

    #[test]
    fn values_travel_downstream_transitively() {
        let map = NodeMap::new();
        let mut m = map.borrow_mut();
        let a = m.insert(plain());
        let b = m.insert(plain());
        let c = m.insert(plain());
        m.add_push(a, b);
        m.add_push(b, c);

        let mut fw = Forwards::from_map(&m);
        fw.set_current(a);
        fw.forward("items", json!(128));

        fw.set_current(b);
        assert_eq!(fw.fetch("items"), Some(&json!(128)));
        fw.set_current(c);
        assert_eq!(fw.fetch("items"), Some(&json!(128)));
        fw.set_current(a);
        assert!(!fw.can_fetch("items"));
    }

    #[test]
    fn pulls_forward_in_item_direction() {
        // b pulls from a: items (and forwards) travel a -> b.
        let map = NodeMap::new();
        let mut m = map.borrow_mut();
        let a = m.insert(plain());
        let b = m.insert(plain());
        m.add_pull(b, a);

        let mut fw = Forwards::from_map(&m);
        fw.set_current(a);
        fw.forward("range", json!([0, 10]));
        fw.set_current(b);
        assert!(fw.can_fetch("range"));
    }

    #[test]
    fn no_forward_dependency_carries_nothing() {
        let map = NodeMap::new();
        let mut m = map.borrow_mut();
        let a = m.insert(plain());
        let b = m.insert(plain());
        let c = m.insert(plain());
        m.add_dependency(b, a);
        m.add_no_forward_dependency(c, a);

        let mut fw = Forwards::from_map(&m);
        fw.set_current(a);
        fw.forward("items", json!(7));
        fw.set_current(b);
        assert!(fw.can_fetch("items"));
        fw.set_current(c);
        assert!(!fw.can_fetch("items"));
    }
}

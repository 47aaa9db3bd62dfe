//! Phase partitioning and ordering.
//!
//! Nodes connected by `Pushes`/`Pulls` must run together: union-find over
//! those relations yields the phases. The dependency relations then induce
//! edges between phases, and the order has to do more than respect them:
//!
//! A memory-share dependency means a node in one phase keeps memory around
//! for a node in a later phase. If the two phases are not consecutive, the
//! shared memory has to be evacuated to disk so the phases in between get
//! their budget. Call an ordinary dependency edge *black*, a memory-share
//! edge *red* when its source can evacuate and *green* when it cannot. A
//! non-black edge is satisfied when its endpoints are consecutive in the
//! order; we maximize the number of satisfied edges and must satisfy every
//! green one, or the input is rejected.
//!
//! A non-black edge with an alternative path of length >= 2 between its
//! endpoints can never be satisfied, so such red edges degrade to black and
//! such green edges make the input invalid. Each phase can satisfy at most
//! one outgoing and one incoming edge, which is why more than one green
//! edge out of or into a phase is rejected up front. Green edges are
//! contracted before the search and expanded afterwards; the satisfiable
//! search (over red edges) then runs on the contracted graph.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use tracing::debug;

use empipe_core::disjoint::DisjointSets;
use empipe_core::error::{Error, Result};
use empipe_core::graph::Graph;
use empipe_core::id::NodeId;
use empipe_core::satisfiable::{SatisfiableGraph, Strategy};
use empipe_node::map::NodeMap;
use empipe_node::traits::Node;

/// The ordered phases plus the ids to evacuate when their phase ends.
#[derive(Debug)]
pub struct PhasePlan {
    pub phases: Vec<Vec<NodeId>>,
    pub evacuate_when_done: HashSet<NodeId>,
}

/// Assign each node to a phase: the equivalence classes of the union of the
/// `Pushes` and `Pulls` relations, numbered in first-seen node order.
pub fn phase_map(map: &NodeMap) -> Result<BTreeMap<NodeId, usize>> {
    let ids: Vec<NodeId> = map.ids().collect();
    let index: HashMap<NodeId, usize> = ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();

    let mut sets = DisjointSets::new(ids.len());
    for relation in map.relations() {
        if relation.kind.is_dependency() {
            continue;
        }
        let from = *index
            .get(&relation.from)
            .ok_or_else(|| Error::Invariant(format!("relation from unknown node {}", relation.from)))?;
        let to = *index
            .get(&relation.to)
            .ok_or_else(|| Error::Invariant(format!("relation to unknown node {}", relation.to)))?;
        sets.union(from, to);
    }

    let mut phase_of_root = vec![usize::MAX; ids.len()];
    let mut next_phase = 0;
    let mut result = BTreeMap::new();
    for (i, &id) in ids.iter().enumerate() {
        let root = sets.find(i);
        if phase_of_root[root] == usize::MAX {
            phase_of_root[root] = next_phase;
            next_phase += 1;
        }
        result.insert(id, phase_of_root[root]);
    }
    Ok(result)
}

/// The inter-phase dependency graph: an edge from the producer's phase to
/// the consumer's phase for every dependency relation.
pub fn phase_graph(map: &NodeMap, phases: &BTreeMap<NodeId, usize>) -> Result<Graph<usize>> {
    let mut graph = Graph::new();
    for &phase in phases.values() {
        graph.add_node(phase);
    }
    for relation in map.relations() {
        if !relation.kind.is_dependency() {
            continue;
        }
        let producer = phase_of(phases, relation.to)?;
        let consumer = phase_of(phases, relation.from)?;
        graph.add_edge(producer, consumer);
    }
    Ok(graph)
}

fn phase_of(phases: &BTreeMap<NodeId, usize>, id: NodeId) -> Result<usize> {
    phases
        .get(&id)
        .copied()
        .ok_or_else(|| Error::Invariant(format!("node {id} has no phase")))
}

/// Invert a permutation of `0..f.len()`. Validates that `f` really is one.
pub fn inverse_permutation(f: &[usize]) -> Result<Vec<usize>> {
    let n = f.len();
    let mut result = vec![n; n];
    for (i, &fi) in f.iter().enumerate() {
        if fi >= n {
            return Err(Error::Invariant(
                "inverse_permutation: value out of range".into(),
            ));
        }
        if result[fi] != n {
            return Err(Error::Invariant(
                "inverse_permutation: mapping is not injective".into(),
            ));
        }
        result[fi] = i;
    }
    if result.iter().any(|&v| v == n) {
        return Err(Error::Invariant(
            "inverse_permutation: mapping is not surjective".into(),
        ));
    }
    Ok(result)
}

/// Order the phases and derive the evacuation set.
pub fn order_phases(
    map: &NodeMap,
    phases: &BTreeMap<NodeId, usize>,
    graph: &Graph<usize>,
) -> Result<PhasePlan> {
    let mut black_edges: Vec<(usize, usize)> = Vec::new();
    let mut red_edges: Vec<(usize, usize)> = Vec::new();
    let mut green_edges: BTreeMap<usize, usize> = BTreeMap::new();
    let mut green_edges_rev: BTreeMap<usize, usize> = BTreeMap::new();

    use empipe_node::map::RelationKind;
    for relation in map.relations() {
        if !relation.kind.is_dependency() {
            continue;
        }
        let producer = relation.to;
        let consumer = relation.from;
        let from_phase = phase_of(phases, producer)?;
        let to_phase = phase_of(phases, consumer)?;
        if from_phase == to_phase {
            continue;
        }

        if relation.kind != RelationKind::MemoryShareDepends {
            debug!(from = from_phase, to = to_phase, "black edge");
            black_edges.push((from_phase, to_phase));
            continue;
        }

        let can_evacuate = map
            .get(producer)
            .ok_or_else(|| Error::Invariant(format!("unknown node {producer}")))?
            .can_evacuate();
        if can_evacuate {
            debug!(from = from_phase, to = to_phase, "red edge");
            red_edges.push((from_phase, to_phase));
        } else {
            debug!(from = from_phase, to = to_phase, "green edge");
            // A phase satisfies at most one outgoing and one incoming edge,
            // and green edges have no fallback.
            if green_edges.contains_key(&from_phase) || green_edges_rev.contains_key(&to_phase) {
                return Err(Error::CannotSatisfyAllGreenEdges);
            }
            green_edges.insert(from_phase, to_phase);
            green_edges_rev.insert(to_phase, from_phase);
        }
    }

    let phase_count = graph.len();
    let mut contracted = DisjointSets::new(phase_count);
    for (&from, &to) in &green_edges {
        contracted.union(from, to);
    }

    // Remember the topology inside each green contraction for expansion.
    let mut green_paths: BTreeMap<usize, Graph<usize>> = BTreeMap::new();
    for (&from, &to) in &green_edges {
        let rep = contracted.find(from);
        green_paths.entry(rep).or_default().add_edge(from, to);
    }

    let mut search = SatisfiableGraph::new();
    for &phase in graph.node_set() {
        search.add_node(contracted.find(phase));
    }

    // An edge between two contracted nodes either is a green edge or points
    // the same way as the green path, the graph being acyclic; an order of
    // the contracted graph therefore stays valid after expansion.
    //
    // When a black and a red edge coincide after contraction, only the red
    // copy is kept: the greedy DFS then visits that successor last and
    // tends to place it adjacently, preferring the evacuation-free order.
    let mut red_set: BTreeSet<(usize, usize)> = BTreeSet::new();
    for &(from, to) in &red_edges {
        let from = contracted.find(from);
        let to = contracted.find(to);
        if from != to {
            red_set.insert((from, to));
        }
    }
    let mut black_set: BTreeSet<(usize, usize)> = BTreeSet::new();
    for &(from, to) in &black_edges {
        let from = contracted.find(from);
        let to = contracted.find(to);
        if from != to && !red_set.contains(&(from, to)) {
            black_set.insert((from, to));
        }
    }
    for &(from, to) in &black_set {
        search.add_edge(from, to, false);
    }
    for &(from, to) in &red_set {
        search.add_edge(from, to, true);
    }

    let mut order = match search.topological_order(Strategy::Auto) {
        Ok(order) => order,
        Err(Error::NotADag) => return Err(Error::CannotSatisfyAllGreenEdges),
        Err(e) => return Err(e),
    };

    // Expand each green contraction by its internal topological order.
    for (rep, path_graph) in &green_paths {
        let path = path_graph.topological_order()?;
        let last = *path
            .last()
            .ok_or_else(|| Error::Invariant("empty green contraction".into()))?;
        let pos = order
            .iter()
            .position(|&p| p == *rep)
            .ok_or_else(|| Error::Invariant("contracted phase missing from order".into()))?;
        order[pos] = last;
        order.splice(pos..pos, path[..path.len() - 1].iter().copied());
    }

    // slot_of[p] is the position at which phase p runs.
    let slot_of = inverse_permutation(&order)?;

    let mut result = vec![Vec::new(); order.len()];
    for (&id, &phase) in phases {
        result[slot_of[phase]].push(id);
    }

    // A memory-share producer that is not in the phase immediately before
    // its consumer has to flush when its own phase ends.
    let mut evacuate_when_done: HashSet<NodeId> = HashSet::new();
    let mut previous_nodes: HashSet<NodeId> = HashSet::new();
    for phase_nodes in &result {
        for &id in phase_nodes {
            for relation in map.relations_from(id) {
                if relation.kind != RelationKind::MemoryShareDepends {
                    continue;
                }
                if previous_nodes.contains(&relation.to) {
                    continue;
                }
                evacuate_when_done.insert(relation.to);
            }
        }
        previous_nodes = phase_nodes.iter().copied().collect();
    }

    Ok(PhasePlan {
        phases: result,
        evacuate_when_done,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverse_permutation_inverts() {
        let f = vec![2, 0, 1];
        let inv = inverse_permutation(&f).unwrap();
        assert_eq!(inv, vec![1, 2, 0]);
        for (i, &fi) in f.iter().enumerate() {
            assert_eq!(inv[fi], i);
        }
    }

    #[test]
    fn inverse_permutation_rejects_bad_input() {
        assert!(inverse_permutation(&[0, 3]).is_err());
        assert!(inverse_permutation(&[0, 0]).is_err());
        assert!(inverse_permutation(&[1, 1]).is_err());
    }
}

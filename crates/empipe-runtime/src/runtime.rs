//! The phase-by-phase executor.
//!
//! [`Runtime::go`] runs a whole pipeline; [`Runtime::go_init`] plus
//! [`Runtime::go_until`] expose the same execution one phase group at a
//! time, pausing right after `begin` of the phase that contains a chosen
//! node so the caller can feed it manually.
//!
//! Error guarantees: progress indicators get their `done` only on the
//! success path, and a node that saw `begin` receives no `end` once an
//! error is unwinding. The broken parity is the abort signal; nodes do
//! their last-resort cleanup in `Drop`.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use tracing::{debug, warn};

use empipe_core::error::{Error, Result};
use empipe_core::graph::Graph;
use empipe_core::id::NodeId;
use empipe_node::forwards::Forwards;
use empipe_node::map::{NodeMap, NodeMapRef, RelationKind};
use empipe_node::traits::{Node, NodeState};
use empipe_progress::{
    subindicator_id, FractionalProgress, NullIndicator, ProgressHandle, ProgressIndicator,
};

use crate::datastructures::DatastructureRuntime;
use crate::phases::{order_phases, phase_graph, phase_map};
use crate::resources::{
    assign_files, assign_memory, reassign_files, reassign_memory,
};

/// Where a pipeline was invoked from, for progress bookkeeping. Without it
/// the run is silent (null subindicators).
#[derive(Debug, Clone, Copy)]
pub struct SourceLocation {
    pub file: &'static str,
    pub function: &'static str,
}

/// Executes the node graph behind a node map.
pub struct Runtime {
    map: NodeMapRef,
}

/// Suspended execution state returned by [`Runtime::go_init`].
pub struct GoContext {
    phases: Vec<Vec<NodeId>>,
    evacuate_when_done: HashSet<NodeId>,
    item_flow: Vec<Graph<NodeId>>,
    actor: Vec<Graph<NodeId>>,
    datastructures: DatastructureRuntime,
    forwards: Forwards,
    progress: ProgressIndicators,
    active_progress: Option<usize>,
    current: usize,
    files: u64,
    memory: u64,
}

impl GoContext {
    /// Index of the next phase to run.
    pub fn current_phase(&self) -> usize {
        self.current
    }

    pub fn phases(&self) -> &[Vec<NodeId>] {
        &self.phases
    }

    /// Ids evacuated at the end of their phase.
    pub fn evacuation_set(&self) -> &HashSet<NodeId> {
        &self.evacuate_when_done
    }

    fn start_phase_progress(&mut self, phase: usize, steps: u64, empty_face: bool) {
        if let Some(previous) = self.active_progress.take() {
            self.progress.done_phase(previous);
        }
        self.progress.init_phase(phase, steps, empty_face);
        self.active_progress = Some(phase);
    }

    fn finish_phase_progress(&mut self) {
        if let Some(phase) = self.active_progress.take() {
            self.progress.done_phase(phase);
        }
    }
}

impl Runtime {
    pub fn new(map: NodeMapRef) -> Self {
        Self { map }
    }

    pub fn node_count(&self) -> usize {
        NodeMap::find_authority(&self.map).borrow().len()
    }

    /// Run the whole pipeline.
    pub fn go(
        &mut self,
        items: u64,
        progress: ProgressHandle,
        files: u64,
        memory: u64,
        location: Option<SourceLocation>,
    ) -> Result<()> {
        let mut context = self.go_init(items, progress, files, memory, location)?;
        self.go_until(&mut context, None)
    }

    /// Partition, order, prepare and budget the pipeline, returning the
    /// context that [`Runtime::go_until`] consumes phase by phase.
    pub fn go_init(
        &mut self,
        items: u64,
        progress: ProgressHandle,
        files: u64,
        memory: u64,
        location: Option<SourceLocation>,
    ) -> Result<GoContext> {
        // Relations registered on fragment maps live with the authority.
        let authority = NodeMap::find_authority(&self.map);
        self.map = Rc::clone(&authority);
        let mut map = authority.borrow_mut();
        let map = &mut *map;

        if map.is_empty() {
            return Err(Error::EmptyPipeline);
        }

        let assignment = phase_map(map)?;
        if assignment.len() != map.len() {
            return Err(Error::Invariant(
                "phase assignment does not cover every node".into(),
            ));
        }
        let graph = phase_graph(map, &assignment)?;
        let plan = order_phases(map, &assignment, &graph)?;

        // Checked before the per-phase graphs: a phase without an initiator
        // is misassembled input, not an internal error, even when its pull
        // relations also happen to be cyclic.
        ensure_initiators(map, &plan.phases)?;

        let item_flow = phase_graphs(map, &plan.phases, true);
        let actor = phase_graphs(map, &plan.phases, false);

        let mut forwards = Forwards::from_map(map);
        prepare_all(map, &item_flow, &mut forwards)?;

        let mut datastructures = DatastructureRuntime::new(map, &plan.phases)?;
        assign_files(map, &plan.phases, files)?;
        assign_memory(map, &plan.phases, memory, &mut datastructures)?;

        let progress = ProgressIndicators::new(map, &plan.phases, progress, location, items);

        Ok(GoContext {
            phases: plan.phases,
            evacuate_when_done: plan.evacuate_when_done,
            item_flow,
            actor,
            datastructures,
            forwards,
            progress,
            active_progress: None,
            current: 0,
            files,
            memory,
        })
    }

    /// Run phases until the one containing `target` has had its `begin`,
    /// or to the end when `target` is `None`.
    ///
    /// When suspended, the begun phase's `end` fires at the start of the
    /// next call. A finished context stays finished: its phase counter
    /// advances past the end and further calls return immediately.
    pub fn go_until(&mut self, context: &mut GoContext, target: Option<NodeId>) -> Result<()> {
        let authority = NodeMap::find_authority(&self.map);
        let mut map = authority.borrow_mut();
        let map = &mut *map;

        if context.current > context.phases.len() {
            return Ok(());
        }
        if context.current != 0 {
            // Resuming: the previous phase is still begun.
            let begin_end = BeginEnd::new(&context.actor[context.current - 1])?;
            begin_end.end(map)?;
        }

        while context.current < context.phases.len() {
            let i = context.current;
            debug!(
                phase = i,
                name = %phase_label(map, &context.phases[i]),
                "running pipeline phase"
            );

            if i > 0 {
                evacuate_all(map, &context.phases[i - 1], &context.evacuate_when_done)?;
            }

            propagate_all(map, &context.item_flow[i], &mut context.forwards)?;
            reassign_files(map, &context.phases, i, context.files)?;
            reassign_memory(map, &context.phases, i, context.memory, &context.datastructures)?;

            let mut empty_face = true;
            let mut steps = 0;
            for &id in &context.phases[i] {
                let node = node_ref(map, id)?;
                steps += node.steps();
                if is_initiator(map, id) && !node.is_go_free() {
                    empty_face = false;
                }
            }

            context.start_phase_progress(i, steps, empty_face);
            for &id in &context.phases[i] {
                node_mut(map, id)?.set_progress_indicator(context.progress.handle(i));
            }

            let begin_end = BeginEnd::new(&context.actor[i])?;
            begin_end.begin(map)?;

            if let Some(target) = target {
                if context.phases[i].contains(&target) {
                    context.current += 1;
                    return Ok(());
                }
            }

            go_initiators(map, &context.phases[i])?;
            begin_end.end(map)?;

            context.datastructures.free_datastructures(i, map);
            context.finish_phase_progress();
            context.current += 1;
        }

        context.current += 1;
        context.progress.finish();
        Ok(())
    }
}

/// Diagnostic label for a phase: the non-empty `phase_name` with the
/// highest priority, falling back to the highest-priority node name.
pub fn phase_label(map: &NodeMap, phase: &[NodeId]) -> String {
    let mut best: Option<(i32, String)> = None;
    for &id in phase {
        if let Some(node) = map.get(id) {
            let name = node.phase_name();
            if name.is_empty() {
                continue;
            }
            let priority = node.phase_name_priority();
            if best.as_ref().map_or(true, |(p, _)| priority > *p) {
                best = Some((priority, name));
            }
        }
    }
    if let Some((_, name)) = best {
        return name;
    }

    let mut best: Option<(i32, String)> = None;
    for &id in phase {
        if let Some(node) = map.get(id) {
            let priority = node.name_priority();
            if best.as_ref().map_or(true, |(p, _)| priority > *p) {
                best = Some((priority, node.name()));
            }
        }
    }
    best.map(|(_, name)| name).unwrap_or_default()
}

/// A node with no push or pull in-edge starts the work of its phase.
pub fn is_initiator(map: &NodeMap, id: NodeId) -> bool {
    map.in_degree(id, RelationKind::Pushes) == 0 && map.in_degree(id, RelationKind::Pulls) == 0
}

fn has_initiator(map: &NodeMap, phase: &[NodeId]) -> bool {
    phase.iter().any(|&id| is_initiator(map, id))
}

fn ensure_initiators(map: &NodeMap, phases: &[Vec<NodeId>]) -> Result<()> {
    for phase in phases {
        if !has_initiator(map, phase) {
            return Err(Error::NoInitiatorNode);
        }
    }
    Ok(())
}

fn node_ref(map: &NodeMap, id: NodeId) -> Result<&dyn Node> {
    map.get(id)
        .ok_or_else(|| Error::Invariant(format!("unknown node {id}")))
}

fn node_mut(map: &mut NodeMap, id: NodeId) -> Result<&mut (dyn Node + 'static)> {
    map.get_mut(id)
        .ok_or_else(|| Error::Invariant(format!("unknown node {id}")))
}

/// Per-phase view of the intra-phase relations. The item-flow variant
/// orients every edge in item direction (pulls reversed); the actor
/// variant keeps declared direction, which is what begin/end follow.
fn phase_graphs(map: &NodeMap, phases: &[Vec<NodeId>], item_flow: bool) -> Vec<Graph<NodeId>> {
    phases
        .iter()
        .map(|phase| {
            let mut graph = Graph::new();
            for &id in phase {
                graph.add_node(id);
                for relation in map.relations_from(id) {
                    match relation.kind {
                        RelationKind::Pushes => graph.add_edge(relation.from, relation.to),
                        RelationKind::Pulls => {
                            if item_flow {
                                graph.add_edge(relation.to, relation.from);
                            } else {
                                graph.add_edge(relation.from, relation.to);
                            }
                        }
                        _ => {}
                    }
                }
            }
            graph
        })
        .collect()
}

fn prepare_all(
    map: &mut NodeMap,
    item_flow: &[Graph<NodeId>],
    forwards: &mut Forwards,
) -> Result<()> {
    for graph in item_flow {
        let order = graph.topological_order()?;
        for id in order {
            forwards.set_current(id);
            let node = node_mut(map, id)?;
            node.set_state(NodeState::InPrepare);
            node.prepare(forwards)?;
            node.set_state(NodeState::AfterPrepare);
        }
    }
    Ok(())
}

fn propagate_all(map: &mut NodeMap, item_flow: &Graph<NodeId>, forwards: &mut Forwards) -> Result<()> {
    let order = item_flow.topological_order()?;
    for id in order {
        forwards.set_current(id);
        let node = node_mut(map, id)?;
        node.set_state(NodeState::InPropagate);
        node.propagate(forwards)?;
        node.set_state(NodeState::AfterPropagate);
    }
    Ok(())
}

fn evacuate_all(
    map: &mut NodeMap,
    phase: &[NodeId],
    evacuate_when_done: &HashSet<NodeId>,
) -> Result<()> {
    for &id in phase {
        if !evacuate_when_done.contains(&id) {
            continue;
        }
        let node = node_mut(map, id)?;
        if node.can_evacuate() {
            node.evacuate()?;
            debug!(node = %id, "evacuated node");
        } else {
            warn!(node = %id, "node should evacuate but cannot");
        }
    }
    Ok(())
}

fn go_initiators(map: &mut NodeMap, phase: &[NodeId]) -> Result<()> {
    let initiators: Vec<NodeId> = phase
        .iter()
        .copied()
        .filter(|&id| is_initiator(map, id))
        .collect();
    for id in initiators {
        let node = node_mut(map, id)?;
        node.set_state(NodeState::InGo);
        node.go()?;
        node.set_state(NodeState::AfterBegin);
    }
    Ok(())
}

/// begin/end bracket over one phase's actor graph: begin leaf-to-root,
/// end root-to-leaf.
struct BeginEnd {
    order: Vec<NodeId>,
}

impl BeginEnd {
    fn new(actor: &Graph<NodeId>) -> Result<Self> {
        Ok(Self {
            order: actor.topological_order()?,
        })
    }

    fn begin(&self, map: &mut NodeMap) -> Result<()> {
        for &id in self.order.iter().rev() {
            let node = node_mut(map, id)?;
            node.set_state(NodeState::InBegin);
            node.begin()?;
            node.set_state(NodeState::AfterBegin);
        }
        Ok(())
    }

    fn end(&self, map: &mut NodeMap) -> Result<()> {
        for &id in &self.order {
            let node = node_mut(map, id)?;
            node.set_state(NodeState::InEnd);
            node.end()?;
            node.set_state(NodeState::AfterEnd);
        }
        Ok(())
    }
}

/// One fractional subindicator per phase, hanging off the caller's
/// indicator; null indicators when no source location was supplied.
struct ProgressIndicators {
    root: Option<FractionalProgress>,
    subindicators: Vec<ProgressHandle>,
}

impl ProgressIndicators {
    fn new(
        map: &NodeMap,
        phases: &[Vec<NodeId>],
        target: ProgressHandle,
        location: Option<SourceLocation>,
        items: u64,
    ) -> Self {
        if location.is_none() {
            return Self {
                root: None,
                subindicators: phases
                    .iter()
                    .map(|_| Rc::new(RefCell::new(NullIndicator)) as ProgressHandle)
                    .collect(),
            };
        }

        let mut root = FractionalProgress::new(target, items);
        let mut subindicators: Vec<ProgressHandle> = Vec::with_capacity(phases.len());
        for (i, phase) in phases.iter().enumerate() {
            let label = phase_label(map, phase);
            let names: Vec<String> = phase
                .iter()
                .filter_map(|&id| map.get(id).map(|n| n.name()))
                .collect();
            let id = subindicator_id(i, &label, names.iter().map(String::as_str));
            let sub = root.subindicator(id, &label);
            subindicators.push(Rc::new(RefCell::new(sub)) as ProgressHandle);
        }
        root.init();
        Self {
            root: Some(root),
            subindicators,
        }
    }

    fn init_phase(&self, phase: usize, steps: u64, empty_face: bool) {
        let mut sub = self.subindicators[phase].borrow_mut();
        if empty_face {
            sub.set_crumb("");
        }
        sub.init(steps);
    }

    fn done_phase(&self, phase: usize) {
        self.subindicators[phase].borrow_mut().done();
    }

    fn handle(&self, phase: usize) -> ProgressHandle {
        Rc::clone(&self.subindicators[phase])
    }

    fn finish(&mut self) {
        if let Some(root) = &mut self.root {
            root.done();
        }
    }
}

//! The node contract.
//!
//! Every stream-processing node implements [`Node`]. The trait provides the
//! bookkeeping methods as defaults delegating to an embedded [`NodeBase`],
//! so a concrete node only supplies `base`/`base_mut` and overrides the
//! lifecycle entry points it cares about.

use empipe_core::error::Result;
use empipe_core::id::NodeId;
use empipe_progress::{ProgressHandle, ProgressIndicator};

use crate::forwards::Forwards;
use crate::resource::{DatastructureDecl, ResourceKind, ResourceRequest};

/// Observable lifecycle state. A node passes through these once per
/// pipeline execution; initiators re-enter `AfterBegin` when `go` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Fresh,
    InPrepare,
    AfterPrepare,
    InPropagate,
    AfterPropagate,
    InBegin,
    AfterBegin,
    InGo,
    InEnd,
    AfterEnd,
}

/// Common node bookkeeping: identity, state, naming, resource declarations
/// and the installed progress indicator. Concrete nodes embed one and hand
/// it out through [`Node::base`].
pub struct NodeBase {
    id: NodeId,
    state: NodeState,
    name: Option<String>,
    name_priority: i32,
    phase_name: Option<String>,
    phase_name_priority: i32,
    requests: [ResourceRequest; 2],
    available: [u64; 2],
    being_assigned: Option<ResourceKind>,
    steps: u64,
    datastructures: Vec<DatastructureDecl>,
    progress: Option<ProgressHandle>,
}

impl Default for NodeBase {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeBase {
    pub fn new() -> Self {
        Self {
            id: NodeId::fresh(),
            state: NodeState::Fresh,
            name: None,
            name_priority: 0,
            phase_name: None,
            phase_name_priority: i32::MIN,
            requests: [ResourceRequest::default(); 2],
            available: [0; 2],
            being_assigned: None,
            steps: 0,
            datastructures: Vec::new(),
            progress: None,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn set_state(&mut self, state: NodeState) {
        self.state = state;
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: impl Into<String>, priority: i32) {
        self.name = Some(name.into());
        self.name_priority = priority;
    }

    pub fn name_priority(&self) -> i32 {
        self.name_priority
    }

    pub fn phase_name(&self) -> Option<&str> {
        self.phase_name.as_deref()
    }

    pub fn set_phase_name(&mut self, name: impl Into<String>, priority: i32) {
        self.phase_name = Some(name.into());
        self.phase_name_priority = priority;
    }

    pub fn phase_name_priority(&self) -> i32 {
        self.phase_name_priority
    }

    pub fn request(&self, kind: ResourceKind) -> ResourceRequest {
        self.requests[kind.index()]
    }

    pub fn set_resource_minimum(&mut self, kind: ResourceKind, bytes: u64) {
        self.requests[kind.index()].minimum = bytes;
    }

    pub fn set_resource_maximum(&mut self, kind: ResourceKind, bytes: u64) {
        self.requests[kind.index()].maximum = bytes;
    }

    pub fn set_resource_fraction(&mut self, kind: ResourceKind, fraction: f64) {
        self.requests[kind.index()].fraction = fraction;
    }

    /// The budget most recently assigned by the runtime.
    pub fn available(&self, kind: ResourceKind) -> u64 {
        self.available[kind.index()]
    }

    pub fn set_available(&mut self, kind: ResourceKind, amount: u64) {
        self.available[kind.index()] = amount;
    }

    pub fn resource_being_assigned(&self) -> Option<ResourceKind> {
        self.being_assigned
    }

    pub fn set_resource_being_assigned(&mut self, kind: Option<ResourceKind>) {
        self.being_assigned = kind;
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn set_steps(&mut self, steps: u64) {
        self.steps = steps;
    }

    pub fn add_datastructure(&mut self, decl: DatastructureDecl) {
        self.datastructures.push(decl);
    }

    pub fn datastructures(&self) -> &[DatastructureDecl] {
        &self.datastructures
    }

    pub fn set_progress_indicator(&mut self, pi: ProgressHandle) {
        self.progress = Some(pi);
    }

    /// Report `n` steps of work to the installed phase indicator.
    pub fn step(&mut self, n: u64) {
        if let Some(pi) = &self.progress {
            pi.borrow_mut().step(n);
        }
    }
}

/// The capability interface the runtime is polymorphic over.
pub trait Node {
    fn base(&self) -> &NodeBase;
    fn base_mut(&mut self) -> &mut NodeBase;

    fn id(&self) -> NodeId {
        self.base().id()
    }

    fn state(&self) -> NodeState {
        self.base().state()
    }

    fn set_state(&mut self, state: NodeState) {
        self.base_mut().set_state(state);
    }

    /// Diagnostic name. Falls back to the node id.
    fn name(&self) -> String {
        match self.base().name() {
            Some(n) => n.to_string(),
            None => self.base().id().to_string(),
        }
    }

    fn name_priority(&self) -> i32 {
        self.base().name_priority()
    }

    /// Label for the whole phase this node runs in; empty when the node has
    /// no opinion.
    fn phase_name(&self) -> String {
        self.base().phase_name().unwrap_or_default().to_string()
    }

    fn phase_name_priority(&self) -> i32 {
        self.base().phase_name_priority()
    }

    fn minimum_resource(&self, kind: ResourceKind) -> u64 {
        self.base().request(kind).minimum
    }

    fn maximum_resource(&self, kind: ResourceKind) -> u64 {
        self.base().request(kind).maximum
    }

    fn resource_fraction(&self, kind: ResourceKind) -> f64 {
        self.base().request(kind).fraction
    }

    fn set_available(&mut self, kind: ResourceKind, amount: u64) {
        self.base_mut().set_available(kind, amount);
    }

    fn set_resource_being_assigned(&mut self, kind: Option<ResourceKind>) {
        self.base_mut().set_resource_being_assigned(kind);
    }

    /// Progress weight of this node within its phase.
    fn steps(&self) -> u64 {
        self.base().steps()
    }

    /// Long-lived named memory regions this node takes part in.
    fn datastructures(&self) -> Vec<DatastructureDecl> {
        self.base().datastructures().to_vec()
    }

    /// Whether the node can flush its retained working set to external
    /// storage between phases.
    fn can_evacuate(&self) -> bool {
        false
    }

    fn evacuate(&mut self) -> Result<()> {
        Ok(())
    }

    /// Whether `go` is a no-op; phases where every initiator is go-free get
    /// their progress crumb hidden.
    fn is_go_free(&self) -> bool {
        false
    }

    fn set_progress_indicator(&mut self, pi: ProgressHandle) {
        self.base_mut().set_progress_indicator(pi);
    }

    fn prepare(&mut self, forwards: &mut Forwards) -> Result<()> {
        let _ = forwards;
        Ok(())
    }

    fn propagate(&mut self, forwards: &mut Forwards) -> Result<()> {
        let _ = forwards;
        Ok(())
    }

    fn begin(&mut self) -> Result<()> {
        Ok(())
    }

    /// Drive the phase. Called only on initiators.
    fn go(&mut self) -> Result<()> {
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        Ok(())
    }
}

//! Shared test fixture: a node that records every lifecycle event into a
//! log the assertions inspect afterwards.
#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use empipe_core::error::{Error, Result};
use empipe_node::forwards::Forwards;
use empipe_node::resource::{DatastructureDecl, ResourceKind};
use empipe_node::traits::{Node, NodeBase};

/// `(node name, event)` pairs in call order.
pub type EventLog = Rc<RefCell<Vec<(String, String)>>>;

pub fn event_log() -> EventLog {
    Rc::new(RefCell::new(Vec::new()))
}

/// Events of one kind, in order.
pub fn events_of(log: &EventLog, event: &str) -> Vec<String> {
    log.borrow()
        .iter()
        .filter(|(_, e)| e == event)
        .map(|(n, _)| n.clone())
        .collect()
}

/// Position of the first `(name, event)` entry.
pub fn position_of(log: &EventLog, name: &str, event: &str) -> Option<usize> {
    log.borrow()
        .iter()
        .position(|(n, e)| n == name && e == event)
}

pub struct RecordingNode {
    base: NodeBase,
    log: EventLog,
    tag: String,
    pub can_evacuate: bool,
    pub go_free: bool,
    pub fail_in: Option<&'static str>,
    pub steps_on_go: u64,
}

impl RecordingNode {
    pub fn new(log: &EventLog, tag: &str) -> Self {
        let mut base = NodeBase::new();
        base.set_name(tag, 0);
        Self {
            base,
            log: Rc::clone(log),
            tag: tag.to_string(),
            can_evacuate: false,
            go_free: false,
            fail_in: None,
            steps_on_go: 0,
        }
    }

    pub fn with_memory(mut self, minimum: u64, maximum: u64, fraction: f64) -> Self {
        self.base.set_resource_minimum(ResourceKind::Memory, minimum);
        self.base.set_resource_maximum(ResourceKind::Memory, maximum);
        self.base.set_resource_fraction(ResourceKind::Memory, fraction);
        self
    }

    pub fn with_files(mut self, minimum: u64, maximum: u64, fraction: f64) -> Self {
        self.base.set_resource_minimum(ResourceKind::Files, minimum);
        self.base.set_resource_maximum(ResourceKind::Files, maximum);
        self.base.set_resource_fraction(ResourceKind::Files, fraction);
        self
    }

    pub fn with_steps(mut self, steps: u64) -> Self {
        self.base.set_steps(steps);
        self.steps_on_go = steps;
        self
    }

    pub fn with_datastructure(mut self, decl: DatastructureDecl) -> Self {
        self.base.add_datastructure(decl);
        self
    }

    pub fn with_phase_name(mut self, name: &str, priority: i32) -> Self {
        self.base.set_phase_name(name, priority);
        self
    }

    pub fn evacuatable(mut self) -> Self {
        self.can_evacuate = true;
        self
    }

    pub fn go_free(mut self) -> Self {
        self.go_free = true;
        self
    }

    pub fn failing_in(mut self, entry_point: &'static str) -> Self {
        self.fail_in = Some(entry_point);
        self
    }

    pub fn boxed(self) -> Box<dyn Node> {
        Box::new(self)
    }

    fn record(&self, event: &str) -> Result<()> {
        self.log
            .borrow_mut()
            .push((self.tag.clone(), event.to_string()));
        if self.fail_in == Some(event) {
            return Err(Error::EndOfStream);
        }
        Ok(())
    }
}

impl Node for RecordingNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn can_evacuate(&self) -> bool {
        self.can_evacuate
    }

    fn evacuate(&mut self) -> Result<()> {
        self.record("evacuate")
    }

    fn is_go_free(&self) -> bool {
        self.go_free
    }

    fn prepare(&mut self, _forwards: &mut Forwards) -> Result<()> {
        self.record("prepare")
    }

    fn propagate(&mut self, _forwards: &mut Forwards) -> Result<()> {
        self.record("propagate")
    }

    fn begin(&mut self) -> Result<()> {
        self.record("begin")
    }

    fn go(&mut self) -> Result<()> {
        self.record("go")?;
        let steps = self.steps_on_go;
        self.base_mut().step(steps);
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        self.record("end")
    }
}

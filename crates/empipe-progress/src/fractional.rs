//! Fractional progress: one target indicator shared by several sub-tasks.
//!
//! Each subindicator owns an equal share of the target's range. A sub-task
//! reports progress in its own step unit; the subindicator rescales into
//! range units and forwards only the delta, so the target sees monotone
//! progress regardless of how unevenly the sub-tasks step.

use std::cell::RefCell;
use std::rc::Rc;

use crate::indicator::{ProgressHandle, ProgressIndicator};

/// Range units every subindicator contributes to the target.
pub const SUBINDICATOR_RESOLUTION: u64 = 10_000;

struct FractionalState {
    target: ProgressHandle,
    sub_count: usize,
    work_estimate: u64,
}

/// The aggregation root. Create the subindicators first, then call
/// [`FractionalProgress::init`] once, and [`FractionalProgress::done`] after
/// every subindicator has finished.
pub struct FractionalProgress {
    state: Rc<RefCell<FractionalState>>,
}

impl FractionalProgress {
    /// Wrap `target`. `work_estimate` is the caller's overall item-count
    /// hint; it is surfaced for diagnostics and does not affect scaling.
    pub fn new(target: ProgressHandle, work_estimate: u64) -> Self {
        Self {
            state: Rc::new(RefCell::new(FractionalState {
                target,
                sub_count: 0,
                work_estimate,
            })),
        }
    }

    /// Register a subindicator. `id` identifies the sub-task (see
    /// [`subindicator_id`]); `crumb` is its initial breadcrumb label.
    pub fn subindicator(&mut self, id: String, crumb: &str) -> FractionalSubindicator {
        self.state.borrow_mut().sub_count += 1;
        FractionalSubindicator {
            state: Rc::clone(&self.state),
            id,
            crumb: if crumb.is_empty() {
                None
            } else {
                Some(crumb.to_string())
            },
            total_steps: 0,
            local_steps: 0,
            emitted_units: 0,
        }
    }

    pub fn work_estimate(&self) -> u64 {
        self.state.borrow().work_estimate
    }

    /// Initialize the target with the combined range of all subindicators.
    pub fn init(&mut self) {
        let state = self.state.borrow();
        let total = state.sub_count as u64 * SUBINDICATOR_RESOLUTION;
        state.target.borrow_mut().init(total);
    }

    pub fn done(&mut self) {
        let state = self.state.borrow();
        state.target.borrow_mut().done();
    }
}

/// One sub-task's view of the shared target.
pub struct FractionalSubindicator {
    state: Rc<RefCell<FractionalState>>,
    id: String,
    crumb: Option<String>,
    total_steps: u64,
    local_steps: u64,
    emitted_units: u64,
}

impl FractionalSubindicator {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn crumb(&self) -> Option<&str> {
        self.crumb.as_deref()
    }
}

impl ProgressIndicator for FractionalSubindicator {
    fn init(&mut self, steps: u64) {
        self.total_steps = steps;
        self.local_steps = 0;
        self.emitted_units = 0;
    }

    fn step(&mut self, n: u64) {
        self.local_steps = self.local_steps.saturating_add(n).min(self.total_steps);
        if self.total_steps == 0 {
            return;
        }
        let units = (self.local_steps as u128 * SUBINDICATOR_RESOLUTION as u128
            / self.total_steps as u128) as u64;
        if units > self.emitted_units {
            let delta = units - self.emitted_units;
            self.emitted_units = units;
            let state = self.state.borrow();
            state.target.borrow_mut().step(delta);
        }
    }

    fn done(&mut self) {
        // Flush the unclaimed remainder of this sub-task's share so a
        // sub-task with zero or unreported steps still completes its slice.
        let remainder = SUBINDICATOR_RESOLUTION.saturating_sub(self.emitted_units);
        if remainder > 0 {
            self.emitted_units = SUBINDICATOR_RESOLUTION;
            let state = self.state.borrow();
            state.target.borrow_mut().step(remainder);
        }
    }

    fn set_crumb(&mut self, crumb: &str) {
        self.crumb = if crumb.is_empty() {
            None
        } else {
            Some(crumb.to_string())
        };
    }
}

/// Identifier for one sub-task: `p{phase:03}:{name:.100}:{hash:08X}` where
/// the hash combines the names of every node in the phase.
pub fn subindicator_id<'a, I>(phase: usize, name: &str, node_names: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut hasher = blake3::Hasher::new();
    for n in node_names {
        hasher.update(n.as_bytes());
        hasher.update(&[0]);
    }
    let digest = hasher.finalize();
    let bytes = digest.as_bytes();
    let word = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let truncated: String = name.chars().take(100).collect();
    format!("p{phase:03}:{truncated}:{word:08X}")
}

//! Per-phase apportionment of a resource kind.
//!
//! Every node in a phase declares `(minimum, maximum, fraction)`. Minimums
//! are granted unconditionally (with a warning when they alone exceed the
//! budget); the rest is split proportionally to the fractions, clamped per
//! node into `[minimum, maximum]`. Because the clamps make the assigned sum
//! piecewise linear in the scale factor, the largest feasible factor is
//! found numerically: exponential search for an upper bound, then bisection
//! to a fixed tolerance.

use tracing::{debug, warn};

use empipe_core::error::{Error, Result};
use empipe_core::id::NodeId;
use empipe_node::map::NodeMap;
use empipe_node::resource::{ResourceKind, UNBOUNDED};
use empipe_node::traits::Node;

use crate::datastructures::DatastructureRuntime;

const FACTOR_TOLERANCE: f64 = 1e-6;

/// `v` clamped into `[lo, hi]`, rounded to whole units inside the band.
pub fn clamp(lo: u64, hi: u64, v: f64) -> u64 {
    if v < lo as f64 {
        lo
    } else if v > hi as f64 {
        hi
    } else {
        v.round() as u64
    }
}

struct ResourceEntry {
    id: NodeId,
    minimum: u64,
    maximum: u64,
    fraction: f64,
    name: String,
}

/// Snapshot of one phase's declarations for one resource kind.
pub struct ResourceRuntime {
    kind: ResourceKind,
    entries: Vec<ResourceEntry>,
}

impl ResourceRuntime {
    pub fn new(map: &NodeMap, ids: &[NodeId], kind: ResourceKind) -> Result<Self> {
        let mut entries = Vec::with_capacity(ids.len());
        for &id in ids {
            let node = map
                .get(id)
                .ok_or_else(|| Error::Invariant(format!("unknown node {id}")))?;
            entries.push(ResourceEntry {
                id,
                minimum: node.minimum_resource(kind),
                maximum: node.maximum_resource(kind),
                fraction: node.resource_fraction(kind),
                name: node.name(),
            });
        }
        Ok(Self { kind, entries })
    }

    pub fn sum_minimum(&self) -> u64 {
        self.entries.iter().map(|e| e.minimum).sum()
    }

    pub fn sum_fraction(&self) -> f64 {
        self.entries.iter().map(|e| e.fraction).sum()
    }

    fn assigned(&self, entry: &ResourceEntry, factor: f64) -> u64 {
        clamp(entry.minimum, entry.maximum, factor * entry.fraction)
    }

    pub fn sum_assigned(&self, factor: f64) -> u64 {
        self.entries
            .iter()
            .map(|e| self.assigned(e, factor))
            .sum()
    }

    /// Install the per-node grants. The whole phase is bracketed so nodes
    /// can tell an in-progress reassignment from a settled one.
    pub fn assign(&self, map: &mut NodeMap, factor: f64) -> Result<()> {
        for entry in &self.entries {
            self.node_mut(map, entry.id)?
                .set_resource_being_assigned(Some(self.kind));
        }
        for entry in &self.entries {
            let amount = self.assigned(entry, factor);
            self.node_mut(map, entry.id)?.set_available(self.kind, amount);
        }
        for entry in &self.entries {
            self.node_mut(map, entry.id)?.set_resource_being_assigned(None);
        }
        Ok(())
    }

    fn node_mut<'m>(
        &self,
        map: &'m mut NodeMap,
        id: NodeId,
    ) -> Result<&'m mut (dyn Node + 'static)> {
        map.get_mut(id)
            .ok_or_else(|| Error::Invariant(format!("unknown node {id}")))
    }

    /// One table row per node: minimum, maximum, fraction, grant, name.
    pub fn log_usage(&self, factor: f64) {
        debug!(kind = %self.kind, "pipelining phase resource assignment");
        for entry in &self.entries {
            let maximum = if entry.maximum == UNBOUNDED {
                "inf".to_string()
            } else {
                entry.maximum.to_string()
            };
            debug!(
                minimum = entry.minimum,
                maximum = %maximum,
                fraction = %format!("{:.2}", entry.fraction),
                assigned = self.assigned(entry, factor),
                name = %truncate(&entry.name, 50),
            );
        }
    }
}

fn truncate(s: &str, limit: usize) -> &str {
    match s.char_indices().nth(limit) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// The largest factor whose assignment fits the budget.
///
/// With datastructures present they either float with the factor (first
/// memory pass) or contribute their frozen cost (second pass and every
/// reassignment).
fn resource_factor(
    budget: u64,
    runtime: &ResourceRuntime,
    datastructures: Option<(&DatastructureRuntime, usize, bool)>,
) -> f64 {
    let ds_minimum = datastructures.map_or(0, |(drt, phase, _)| drt.sum_minimum(phase));
    let minimum = runtime.sum_minimum() + ds_minimum;
    if minimum > budget {
        warn!(
            kind = %runtime.kind,
            required = minimum,
            budget,
            "not enough {} for pipelining phase",
            runtime.kind
        );
        return 0.0;
    }

    // Avoids dividing by zero below.
    let fraction_sum =
        runtime.sum_fraction() + datastructures.map_or(0.0, |(drt, phase, _)| drt.sum_fraction(phase));
    if fraction_sum < 1e-9 {
        return 0.0;
    }

    let assigned_at = |factor: f64| -> u64 {
        let ds = datastructures.map_or(0, |(drt, phase, locked)| {
            if locked {
                drt.sum_assigned_locked(phase)
            } else {
                drt.sum_assigned(factor, phase)
            }
        });
        runtime.sum_assigned(factor) + ds
    };

    let mut c_lo = 0.0_f64;
    let mut c_hi = 1.0_f64;

    // Exponential search: double the upper bound while the assignment still
    // fits and keeps growing.
    let mut previous = 0;
    loop {
        let factor = budget as f64 * c_hi / fraction_sum;
        let assigned = assigned_at(factor);
        if assigned < budget && assigned != previous {
            c_hi *= 2.0;
        } else {
            break;
        }
        previous = assigned;
    }

    while c_hi - c_lo > FACTOR_TOLERANCE {
        let c = c_lo + (c_hi - c_lo) / 2.0;
        let factor = budget as f64 * c / fraction_sum;
        if assigned_at(factor) > budget {
            c_hi = c;
        } else {
            c_lo = c;
        }
    }

    budget as f64 * c_lo / fraction_sum
}

/// Grant file handles to every phase. The grant is refreshed per phase
/// while the pipeline runs; this initial pass makes sure every node has a
/// budget before the first `begin`.
pub fn assign_files(map: &mut NodeMap, phases: &[Vec<NodeId>], files: u64) -> Result<()> {
    for ids in phases {
        let runtime = ResourceRuntime::new(map, ids, ResourceKind::Files)?;
        let factor = resource_factor(files, &runtime, None);
        runtime.log_usage(factor);
        runtime.assign(map, factor)?;
    }
    Ok(())
}

pub fn reassign_files(
    map: &mut NodeMap,
    phases: &[Vec<NodeId>],
    phase: usize,
    files: u64,
) -> Result<()> {
    let runtime = ResourceRuntime::new(map, &phases[phase], ResourceKind::Files)?;
    let factor = resource_factor(files, &runtime, None);
    runtime.log_usage(factor);
    runtime.assign(map, factor)
}

/// Grant memory to every phase in two passes: first freeze the
/// datastructure factors to the tightest phase, then assign nodes with the
/// datastructure cost fixed, and finally publish the datastructure grants.
pub fn assign_memory(
    map: &mut NodeMap,
    phases: &[Vec<NodeId>],
    memory: u64,
    datastructures: &mut DatastructureRuntime,
) -> Result<()> {
    for (phase, ids) in phases.iter().enumerate() {
        let runtime = ResourceRuntime::new(map, ids, ResourceKind::Memory)?;
        let factor = resource_factor(memory, &runtime, Some((datastructures, phase, false)));
        datastructures.minimize_factor(factor, phase);
    }
    for (phase, ids) in phases.iter().enumerate() {
        let runtime = ResourceRuntime::new(map, ids, ResourceKind::Memory)?;
        let factor = resource_factor(memory, &runtime, Some((datastructures, phase, true)));
        runtime.log_usage(factor);
        runtime.assign(map, factor)?;
    }
    datastructures.assign_memory(map);
    Ok(())
}

pub fn reassign_memory(
    map: &mut NodeMap,
    phases: &[Vec<NodeId>],
    phase: usize,
    memory: u64,
    datastructures: &DatastructureRuntime,
) -> Result<()> {
    let runtime = ResourceRuntime::new(map, &phases[phase], ResourceKind::Memory)?;
    let factor = resource_factor(memory, &runtime, Some((datastructures, phase, true)));
    runtime.log_usage(factor);
    runtime.assign(map, factor)
}

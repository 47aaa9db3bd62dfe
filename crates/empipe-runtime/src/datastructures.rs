//! Memory that outlives a single phase.
//!
//! Nodes declare named datastructures; declarations of one name aggregate
//! into a single region alive from the first to the last declaring phase.
//! Because the region's size must not change while it is alive, its budget
//! factor is frozen to the tightest phase's view before nodes get theirs:
//! pass one computes every phase's factor with the datastructures floating
//! and keeps the minimum per region, pass two treats the regions as fixed
//! cost and splits the remainder among the nodes.

use std::collections::BTreeMap;

use empipe_core::error::{Error, Result};
use empipe_core::id::NodeId;
use empipe_node::map::{DatastructureSlot, NodeMap};
use empipe_node::traits::Node;

use crate::resources::clamp;

#[derive(Debug, Clone)]
struct DatastructureInfo {
    minimum: u64,
    maximum: u64,
    priority: f64,
    left_most_phase: usize,
    right_most_phase: usize,
    factor: f64,
}

#[derive(Debug, Default)]
pub struct DatastructureRuntime {
    entries: BTreeMap<String, DatastructureInfo>,
}

impl DatastructureRuntime {
    /// Aggregate the declarations of every node, phase by phase.
    pub fn new(map: &NodeMap, phases: &[Vec<NodeId>]) -> Result<Self> {
        let mut entries: BTreeMap<String, DatastructureInfo> = BTreeMap::new();
        for (phase, ids) in phases.iter().enumerate() {
            for &id in ids {
                let node = map
                    .get(id)
                    .ok_or_else(|| Error::Invariant(format!("unknown node {id}")))?;
                for decl in node.datastructures() {
                    match entries.get_mut(&decl.name) {
                        None => {
                            entries.insert(
                                decl.name.clone(),
                                DatastructureInfo {
                                    minimum: decl.minimum,
                                    maximum: decl.maximum,
                                    priority: decl.priority,
                                    left_most_phase: phase,
                                    right_most_phase: phase,
                                    factor: f64::INFINITY,
                                },
                            );
                        }
                        Some(info) => {
                            info.minimum = info.minimum.max(decl.minimum);
                            info.maximum = info.maximum.min(decl.maximum);
                            info.priority = info.priority.min(decl.priority);
                            info.right_most_phase = phase;
                        }
                    }
                }
            }
        }
        Ok(Self { entries })
    }

    fn active(info: &DatastructureInfo, phase: usize) -> bool {
        info.left_most_phase <= phase && phase <= info.right_most_phase
    }

    /// Combined minimum memory of the regions alive in `phase`.
    pub fn sum_minimum(&self, phase: usize) -> u64 {
        self.entries
            .values()
            .filter(|info| Self::active(info, phase))
            .map(|info| info.minimum)
            .sum()
    }

    /// Combined weight of the regions alive in `phase`.
    pub fn sum_fraction(&self, phase: usize) -> f64 {
        self.entries
            .values()
            .filter(|info| Self::active(info, phase))
            .map(|info| info.priority)
            .sum()
    }

    /// Memory the regions alive in `phase` would take under `factor`.
    pub fn sum_assigned(&self, factor: f64, phase: usize) -> u64 {
        self.entries
            .values()
            .filter(|info| Self::active(info, phase))
            .map(|info| clamp(info.minimum, info.maximum, info.priority * factor))
            .sum()
    }

    /// Memory the regions alive in `phase` take under their frozen factors.
    pub fn sum_assigned_locked(&self, phase: usize) -> u64 {
        self.entries
            .values()
            .filter(|info| Self::active(info, phase))
            .map(|info| clamp(info.minimum, info.maximum, info.priority * info.factor))
            .sum()
    }

    /// Freeze: a region's factor never exceeds any of its phases' factors.
    pub fn minimize_factor(&mut self, factor: f64, phase: usize) {
        for info in self.entries.values_mut() {
            if Self::active(info, phase) {
                info.factor = info.factor.min(factor);
            }
        }
    }

    /// Publish the final grants into the node map's store. Existing slots
    /// are left untouched.
    pub fn assign_memory(&self, map: &mut NodeMap) {
        for (name, info) in &self.entries {
            let assigned = clamp(info.minimum, info.maximum, info.factor * info.priority);
            map.datastructures_mut()
                .entry(name.clone())
                .or_insert(DatastructureSlot {
                    assigned,
                    storage: None,
                });
        }
    }

    /// Grant for one region, after [`Self::minimize_factor`] passes.
    pub fn assigned(&self, name: &str) -> Option<u64> {
        self.entries
            .get(name)
            .map(|info| clamp(info.minimum, info.maximum, info.factor * info.priority))
    }

    pub fn lifetime(&self, name: &str) -> Option<(usize, usize)> {
        self.entries
            .get(name)
            .map(|info| (info.left_most_phase, info.right_most_phase))
    }

    /// Drop the stored instance of every region whose lifetime ends with
    /// `phase`. The grant entry stays; only the parked storage goes.
    pub fn free_datastructures(&self, phase: usize, map: &mut NodeMap) {
        for (name, info) in &self.entries {
            if info.right_most_phase != phase {
                continue;
            }
            if let Some(slot) = map.datastructures_mut().get_mut(name) {
                slot.storage = None;
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

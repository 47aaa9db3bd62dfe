//! Budget apportionment through the full pipeline: per-phase node grants,
//! shortfall handling, and datastructure memory across phases.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use empipe_node::map::NodeMap;
use empipe_node::resource::{DatastructureDecl, ResourceKind, UNBOUNDED};
use empipe_node::traits::Node;
use empipe_progress::{NullIndicator, ProgressHandle};
use empipe_runtime::Runtime;

use common::{event_log, RecordingNode};

fn null_progress() -> ProgressHandle {
    Rc::new(RefCell::new(NullIndicator))
}

#[test]
fn memory_splits_exactly_along_fractions_and_caps() {
    // Budget 800 between (min 100, max 1000, f 1) and (min 200, max 400,
    // f 3): the weighted share of the second is capped at 400, the first
    // takes the remaining 400.
    let log = event_log();
    let map = NodeMap::new();
    let (a, b);
    {
        let mut m = map.borrow_mut();
        a = m.insert(
            RecordingNode::new(&log, "flexible")
                .with_memory(100, 1000, 1.0)
                .boxed(),
        );
        b = m.insert(
            RecordingNode::new(&log, "capped")
                .with_memory(200, 400, 3.0)
                .boxed(),
        );
        m.add_push(a, b);
    }

    let mut runtime = Runtime::new(map.clone());
    runtime.go(0, null_progress(), 64, 800, None).unwrap();

    let m = map.borrow();
    assert_eq!(m.get(a).unwrap().base().available(ResourceKind::Memory), 400);
    assert_eq!(m.get(b).unwrap().base().available(ResourceKind::Memory), 400);
}

#[test]
fn minimums_are_granted_when_the_budget_is_short() {
    let log = event_log();
    let map = NodeMap::new();
    let (a, b);
    {
        let mut m = map.borrow_mut();
        a = m.insert(
            RecordingNode::new(&log, "a")
                .with_memory(500, UNBOUNDED, 1.0)
                .boxed(),
        );
        b = m.insert(
            RecordingNode::new(&log, "b")
                .with_memory(700, UNBOUNDED, 1.0)
                .boxed(),
        );
        m.add_push(a, b);
    }

    let mut runtime = Runtime::new(map.clone());
    // 500 + 700 > 1000: everyone falls back to its minimum.
    runtime.go(0, null_progress(), 64, 1000, None).unwrap();

    let m = map.borrow();
    assert_eq!(m.get(a).unwrap().base().available(ResourceKind::Memory), 500);
    assert_eq!(m.get(b).unwrap().base().available(ResourceKind::Memory), 700);
}

#[test]
fn file_handles_are_apportioned_per_phase() {
    let log = event_log();
    let map = NodeMap::new();
    let (a, b, c);
    {
        let mut m = map.borrow_mut();
        a = m.insert(
            RecordingNode::new(&log, "a")
                .with_files(2, 8, 1.0)
                .boxed(),
        );
        b = m.insert(
            RecordingNode::new(&log, "b")
                .with_files(2, 8, 1.0)
                .boxed(),
        );
        // Second phase alone, so it can take the whole file budget.
        c = m.insert(
            RecordingNode::new(&log, "c")
                .with_files(2, UNBOUNDED, 1.0)
                .boxed(),
        );
        m.add_push(a, b);
        m.add_dependency(c, b);
    }

    let mut runtime = Runtime::new(map.clone());
    runtime.go(0, null_progress(), 16, 1 << 20, None).unwrap();

    let m = map.borrow();
    // Phase one: 16 split two ways, capped at 8 each.
    assert_eq!(m.get(a).unwrap().base().available(ResourceKind::Files), 8);
    assert_eq!(m.get(b).unwrap().base().available(ResourceKind::Files), 8);
    // Phase two was reassigned for its own node set.
    assert_eq!(m.get(c).unwrap().base().available(ResourceKind::Files), 16);
}

#[test]
fn phase_budgets_sum_within_the_global_budget() {
    let log = event_log();
    let map = NodeMap::new();
    let mut ids = Vec::new();
    {
        let mut m = map.borrow_mut();
        let mut previous = None;
        for i in 0..6 {
            let id = m.insert(
                RecordingNode::new(&log, &format!("n{i}"))
                    .with_memory(50 * i as u64, 300 + 40 * i as u64, 1.0 + i as f64)
                    .boxed(),
            );
            if let Some(p) = previous {
                m.add_push(p, id);
            }
            previous = Some(id);
            ids.push(id);
        }
    }

    let budget = 1500;
    let mut runtime = Runtime::new(map.clone());
    runtime.go(0, null_progress(), 64, budget, None).unwrap();

    let m = map.borrow();
    let total: u64 = ids
        .iter()
        .map(|&id| m.get(id).unwrap().base().available(ResourceKind::Memory))
        .sum();
    assert!(total <= budget, "assigned {total} > budget {budget}");
    let minimums: u64 = ids
        .iter()
        .map(|&id| m.get(id).unwrap().minimum_resource(ResourceKind::Memory))
        .sum();
    assert!(total >= minimums);
}

#[test]
fn datastructure_memory_is_frozen_by_the_tightest_phase() {
    // A region alive in both phases: the second phase's 600-byte fixed node
    // leaves 400 for the region, and that is what it keeps in phase one
    // too, even though phase one alone would have granted 500.
    let log = event_log();
    let map = NodeMap::new();
    let (a, b);
    {
        let mut m = map.borrow_mut();
        a = m.insert(
            RecordingNode::new(&log, "first")
                .with_memory(0, UNBOUNDED, 1.0)
                .with_datastructure(DatastructureDecl::new("cache", 0, UNBOUNDED, 1.0))
                .boxed(),
        );
        b = m.insert(
            RecordingNode::new(&log, "second")
                .with_memory(600, 600, 0.0)
                .with_datastructure(DatastructureDecl::new("cache", 0, UNBOUNDED, 1.0))
                .boxed(),
        );
        m.add_dependency(b, a);
    }

    let mut runtime = Runtime::new(map.clone());
    runtime.go(0, null_progress(), 64, 1000, None).unwrap();

    let m = map.borrow();
    assert_eq!(m.datastructures()["cache"].assigned, 400);
    assert_eq!(m.get(a).unwrap().base().available(ResourceKind::Memory), 600);
    assert_eq!(m.get(b).unwrap().base().available(ResourceKind::Memory), 600);
}

#[test]
fn datastructure_storage_is_released_after_its_last_phase() {
    let log = event_log();
    let map = NodeMap::new();
    let (a, b);
    {
        let mut m = map.borrow_mut();
        a = m.insert(
            RecordingNode::new(&log, "a")
                .with_datastructure(DatastructureDecl::new("run", 64, 64, 1.0))
                .boxed(),
        );
        b = m.insert(RecordingNode::new(&log, "b").boxed());
        m.add_dependency(b, a);
    }
    let _ = (a, b);

    let mut runtime = Runtime::new(map.clone());
    let mut context = runtime
        .go_init(0, null_progress(), 64, 1 << 20, None)
        .unwrap();

    // Park an instance in the slot, as a node would during execution.
    map.borrow_mut()
        .datastructures_mut()
        .get_mut("run")
        .unwrap()
        .storage = Some(Box::new([0_u8; 16]));

    runtime.go_until(&mut context, None).unwrap();
    let m = map.borrow();
    assert!(m.datastructures()["run"].storage.is_none());
    assert_eq!(m.datastructures()["run"].assigned, 64);
}

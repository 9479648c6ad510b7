//! End-to-end propagation through linear and fan-out graphs

mod common;

use common::builders::{linear, GraphBuilder};
use common::{assert_terminated, assert_times_strictly_increasing, kinds_into, nexts_into, run};
use rxvis_rs::pipeline::{BranchId, ConnectLineId, Element, ElementType, RunOutcome};
use serde_json::json;
use std::collections::HashSet;

#[test]
fn test_range_delivers_values_then_complete() {
    let graph = GraphBuilder::new()
        .range("range", 1, 10)
        .result("result")
        .subscribe("range", "result")
        .build();
    let summary = run(&graph);
    assert_eq!(summary.outcome, RunOutcome::Completed);

    let events = summary.events();
    let expected: Vec<_> = (1..=10).map(|n| json!(n)).collect();
    assert_eq!(nexts_into(&events, "result"), expected);

    let kinds = kinds_into(&events, "result");
    assert_eq!(kinds.len(), 11);
    assert_eq!(kinds.last(), Some(&"complete"));
    assert_terminated(&events);
}

#[test]
fn test_linear_chain_completes_once_per_root_branch() {
    let graph = GraphBuilder::new()
        .range("range", 0, 4)
        .map("double", "value * 2")
        .result("result")
        .pipe("range", "double")
        .subscribe("double", "result")
        .build();
    let summary = run(&graph);
    let events = summary.events();

    let subscribe_line = ConnectLineId::from("l2");
    let completes_over_subscribe = events
        .iter()
        .filter(|e| e.is_complete() && e.connect_line_id.as_ref() == Some(&subscribe_line))
        .count();
    assert_eq!(completes_over_subscribe, summary.branches_spawned);
    assert_eq!(summary.branches_spawned, 1);
    assert_terminated(&events);
}

#[test]
fn test_time_is_strictly_increasing_and_unique() {
    let graph = GraphBuilder::new()
        .interval("tick", 2, 3)
        .range("range", 1, 5)
        .operator("merge", ElementType::Merge)
        .filter("odd", "value % 2 == 1")
        .result("result")
        .pipe_at("tick", "merge", 0)
        .pipe_at("range", "merge", 1)
        .pipe("merge", "odd")
        .subscribe("odd", "result")
        .build();
    let events = run(&graph).events();

    assert_times_strictly_increasing(&events);
    let times: HashSet<u64> = events.iter().map(|e| e.time).collect();
    assert_eq!(times.len(), events.len());
}

#[test]
fn test_filter_passes_only_matching_values() {
    let graph = GraphBuilder::new()
        .of("of", vec![json!(1), json!(2), json!(3)])
        .filter("filter", "value > 2")
        .result("result")
        .pipe("of", "filter")
        .subscribe("filter", "result")
        .build();
    let events = run(&graph).events();

    assert_eq!(nexts_into(&events, "result"), vec![json!(3)]);
    assert_eq!(kinds_into(&events, "result"), vec!["next", "complete"]);
}

#[test]
fn test_map_then_filter() {
    let graph = GraphBuilder::new()
        .range("range", 1, 3)
        .map("double", "value * 2")
        .filter("big", "value > 2")
        .result("result")
        .pipe("range", "double")
        .pipe("double", "big")
        .subscribe("big", "result")
        .build();
    let events = run(&graph).events();
    assert_eq!(nexts_into(&events, "result"), vec![json!(4), json!(6)]);
}

#[test]
fn test_map_index_counts_per_stream() {
    let graph = GraphBuilder::new()
        .of("of", vec![json!("a"), json!("b"), json!("c")])
        .map("indexed", "index")
        .result("result")
        .pipe("of", "indexed")
        .subscribe("indexed", "result")
        .build();
    let events = run(&graph).events();
    assert_eq!(
        nexts_into(&events, "result"),
        vec![json!(0), json!(1), json!(2)]
    );
}

#[test]
fn test_fan_out_shares_identity() {
    let graph = GraphBuilder::new()
        .of("of", vec![json!("x")])
        .result("left")
        .result("right")
        .subscribe("of", "left")
        .subscribe("of", "right")
        .build();
    let events = run(&graph).events();

    let nexts: Vec<_> = events.iter().filter(|e| e.is_next()).collect();
    assert_eq!(nexts.len(), 2);
    assert_eq!(nexts[0].id, nexts[1].id);
    assert_eq!(nexts[0].hash, nexts[1].hash);
    assert_ne!(nexts[0].connect_line_id, nexts[1].connect_line_id);

    let both = vec![ConnectLineId::from("l1"), ConnectLineId::from("l2")];
    assert!(nexts.iter().all(|e| e.connect_lines_id == both));
}

#[test]
fn test_interval_spaces_values_in_virtual_time() {
    let graph = GraphBuilder::new()
        .interval("tick", 2, 3)
        .result("result")
        .subscribe("tick", "result")
        .build();
    let events = run(&graph).events();

    let ticks: Vec<u64> = events.iter().filter(|e| e.is_next()).map(|e| e.tick).collect();
    assert_eq!(ticks, vec![2, 4, 6]);
    assert_eq!(
        nexts_into(&events, "result"),
        vec![json!(0), json!(1), json!(2)]
    );
}

#[test]
fn test_independent_seeds_run_on_separate_branches() {
    let graph = GraphBuilder::new()
        .of("a", vec![json!(1)])
        .of("b", vec![json!(2)])
        .result("ra")
        .result("rb")
        .subscribe("a", "ra")
        .subscribe("b", "rb")
        .build();
    let summary = run(&graph);
    let events = summary.events();

    let branches: HashSet<Option<BranchId>> = events
        .iter()
        .filter(|e| !e.terminal)
        .map(|e| e.branch_id)
        .collect();
    assert_eq!(branches.len(), 2);
    assert_eq!(summary.branches_spawned, 2);
}

#[test]
fn test_generate_emits_until_condition_fails() {
    let graph = linear(
        Element::new("gen", ElementType::Generate)
            .with_property("initialState", 1)
            .with_property("condition", "state < 20")
            .with_property("iterate", "state * 3"),
    );
    let events = run(&graph).events();
    assert_eq!(
        nexts_into(&events, "result"),
        vec![json!(1), json!(3), json!(9)]
    );
}

#[test]
fn test_timer_emits_once_after_due() {
    let graph = linear(Element::new("timer", ElementType::Timer).with_property("due", 5));
    let events = run(&graph).events();

    let next = events.iter().find(|e| e.is_next()).expect("timer value");
    assert_eq!(next.tick, 5);
    assert_eq!(next.raw, Some(json!(0)));
    assert_eq!(kinds_into(&events, "result"), vec!["next", "complete"]);
}

#[test]
fn test_rerun_is_deterministic() {
    let graph = GraphBuilder::new()
        .interval("tick", 1, 4)
        .of("of", vec![json!("a"), json!("b")])
        .operator("combine", ElementType::CombineLatest)
        .result("result")
        .pipe_at("tick", "combine", 0)
        .pipe_at("of", "combine", 1)
        .subscribe("combine", "result")
        .build();

    let shape = |events: Vec<rxvis_rs::FlowValueEvent>| {
        events
            .into_iter()
            .map(|e| (e.kind, e.raw, e.source_element_id, e.target_element_id, e.tick))
            .collect::<Vec<_>>()
    };
    let first = shape(run(&graph).events());
    let second = shape(run(&graph).events());
    assert_eq!(first, second);
}

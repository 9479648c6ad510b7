//! Higher-order operators and delegating creation elements

mod common;

use common::builders::{linear, GraphBuilder};
use common::{kinds_into, nexts_into, run};
use rxvis_rs::pipeline::{ConnectLineId, Element, ElementId, ElementType};
use serde_json::json;

fn flatten(id: &str, element_type: ElementType, observable: &str) -> Element {
    Element::new(id, element_type).with_property("observable", observable)
}

fn interval_inner(id: &str) -> Element {
    Element::new(id, ElementType::Interval)
        .with_property("period", 1)
        .with_property("count", 2)
}

/// `of [1, 2] -> <flatten over an interval sub-flow> -> result`, projecting
/// `outerValue * 10 + value`.
fn interval_flatten(element_type: ElementType) -> Vec<serde_json::Value> {
    let graph = GraphBuilder::new()
        .of("src", vec![json!(1), json!(2)])
        .element(interval_inner("inner"))
        .element(
            flatten("flat", element_type, "inner").with_property("project", "outerValue * 10 + value"),
        )
        .result("result")
        .pipe("src", "flat")
        .subscribe("flat", "result")
        .build();
    nexts_into(&run(&graph).events(), "result")
}

#[test]
fn test_merge_map_flattens_each_outer_value() {
    let graph = GraphBuilder::new()
        .range("src", 1, 3)
        .element(Element::new("inner", ElementType::Of).with_property("items", "[value, value * 10]"))
        .element(flatten("mm", ElementType::MergeMap, "inner"))
        .result("result")
        .pipe("src", "mm")
        .pipe("inner", "mm")
        .subscribe("mm", "result")
        .build();
    let summary = run(&graph);
    let events = summary.events();

    assert_eq!(
        nexts_into(&events, "result"),
        vec![json!(1), json!(10), json!(2), json!(20), json!(3), json!(30)]
    );
    assert_eq!(kinds_into(&events, "result").last(), Some(&"complete"));

    // Inner emissions are drawn on the sub-flow line, not fed as outer input.
    let drawn = ConnectLineId::from("l2");
    let on_drawn = events
        .iter()
        .filter(|e| e.connect_line_id.as_ref() == Some(&drawn))
        .count();
    assert_eq!(on_drawn, 9);
    assert_eq!(summary.branches_spawned, 4);
}

#[test]
fn test_merge_map_runs_inners_concurrently() {
    assert_eq!(
        interval_flatten(ElementType::MergeMap),
        vec![json!(10), json!(20), json!(11), json!(21)]
    );
}

#[test]
fn test_concat_map_runs_inners_in_sequence() {
    assert_eq!(
        interval_flatten(ElementType::ConcatMap),
        vec![json!(10), json!(11), json!(20), json!(21)]
    );
}

#[test]
fn test_exhaust_map_drops_outer_values_while_busy() {
    assert_eq!(
        interval_flatten(ElementType::ExhaustMap),
        vec![json!(10), json!(11)]
    );
}

#[test]
fn test_merge_map_concurrency_limit() {
    let graph = GraphBuilder::new()
        .of("src", vec![json!(1), json!(2)])
        .element(interval_inner("inner"))
        .element(
            flatten("flat", ElementType::MergeMap, "inner")
                .with_property("concurrent", 1)
                .with_property("project", "outerValue * 10 + value"),
        )
        .result("result")
        .pipe("src", "flat")
        .subscribe("flat", "result")
        .build();
    assert_eq!(
        nexts_into(&run(&graph).events(), "result"),
        vec![json!(10), json!(11), json!(20), json!(21)]
    );
}

#[test]
fn test_expand_recurses_to_max_depth() {
    let graph = GraphBuilder::new()
        .of("src", vec![json!(1)])
        .element(Element::new("double", ElementType::Of).with_property("items", "value * 2"))
        .element(flatten("ex", ElementType::Expand, "double").with_property("maxDepth", 3))
        .result("result")
        .pipe("src", "ex")
        .subscribe("ex", "result")
        .build();
    let events = run(&graph).events();

    assert_eq!(
        nexts_into(&events, "result"),
        vec![json!(1), json!(2), json!(4), json!(8)]
    );
    assert_eq!(kinds_into(&events, "result").last(), Some(&"complete"));
}

#[test]
fn test_defer_relays_its_sub_flow() {
    let graph = GraphBuilder::new()
        .element(Element::new("inner", ElementType::Of).with_property("items", json!([1, 2])))
        .element(flatten("deferred", ElementType::Defer, "inner"))
        .result("result")
        .subscribe("deferred", "result")
        .build();
    let events = run(&graph).events();

    assert_eq!(nexts_into(&events, "result"), vec![json!(1), json!(2)]);
    let deferred = ElementId::from("deferred");
    assert!(events
        .iter()
        .filter(|e| !e.terminal)
        .all(|e| e.source_element_id.as_ref() == Some(&deferred)));
}

#[test]
fn test_iif_picks_a_branch_per_subscription() {
    let graph = GraphBuilder::new()
        .range("src", 1, 2)
        .element(
            Element::new("choose", ElementType::Iif)
                .with_property("condition", "value > 1")
                .with_property("trueObservable", "big")
                .with_property("falseObservable", "small"),
        )
        .element(Element::new("big", ElementType::Of).with_property("items", "value * 100"))
        .element(Element::new("small", ElementType::Of).with_property("items", "value"))
        .element(flatten("mm", ElementType::MergeMap, "choose"))
        .result("result")
        .pipe("src", "mm")
        .subscribe("mm", "result")
        .build();
    let events = run(&graph).events();
    assert_eq!(nexts_into(&events, "result"), vec![json!(1), json!(200)]);
}

#[test]
fn test_ajax_responds_after_delay() {
    let graph = linear(
        Element::new("ajax", ElementType::Ajax)
            .with_property("url", "/users")
            .with_property("response", json!({"name": "ada"}))
            .with_property("delay", 3),
    );
    let events = run(&graph).events();

    let next = events.iter().find(|e| e.is_next()).expect("response");
    assert_eq!(next.tick, 3);
    assert_eq!(
        next.raw,
        Some(json!({"status": 200, "url": "/users", "response": {"name": "ada"}}))
    );
}

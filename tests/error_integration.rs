//! In-flow errors, recovery, and structural validation

mod common;

use common::builders::{linear, GraphBuilder};
use common::mock_helpers::{failing_evaluator, identity_evaluator};
use common::{assert_terminated, into, kinds_into, nexts_into, run, run_with};
use rxvis_rs::config::SimulationConfig;
use rxvis_rs::pipeline::{
    Element, ElementFamily, ElementId, ElementType, RunOutcome, Simulation, SimulationError,
};
use serde_json::json;
use std::sync::Arc;

fn tolerant() -> SimulationConfig {
    SimulationConfig {
        tolerate_partial_graphs: true,
        ..SimulationConfig::default()
    }
}

#[test]
fn test_error_reaching_result_is_fatal() {
    let graph = linear(Element::new("throw", ElementType::ThrowError).with_property("error", "boom"));
    let summary = run(&graph);
    let events = summary.events();

    assert_eq!(kinds_into(&events, "result"), vec!["error"]);
    let error = events.iter().find(|e| e.is_error()).unwrap();
    assert!(error.fatal);
    assert_eq!(error.raw, Some(json!("boom")));
    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_terminated(&events);
}

#[test]
fn test_failed_projection_tears_down_the_branch() {
    let graph = GraphBuilder::new()
        .range("range", 1, 3)
        .map("map", "if value == 2 { throw \"bad value\" } else { value }")
        .result("result")
        .pipe("range", "map")
        .subscribe("map", "result")
        .build();
    let events = run(&graph).events();

    assert_eq!(kinds_into(&events, "result"), vec!["next", "error"]);
    assert_eq!(nexts_into(&events, "result"), vec![json!(1)]);

    let error = into(&events, "result").find(|e| e.is_error()).unwrap();
    assert!(error.fatal);
    assert_eq!(error.raw.as_ref().unwrap()["elementId"], json!("map"));
    // Value 3 and the range's Complete never leave the source.
    assert_eq!(into(&events, "map").count(), 2);
}

#[test]
fn test_evaluator_failure_with_mock() {
    let graph = GraphBuilder::new()
        .range("range", 1, 3)
        .map("map", "value + 1")
        .result("result")
        .pipe("range", "map")
        .subscribe("map", "result")
        .build();
    let simulation = Simulation::new(SimulationConfig::default(), Arc::new(failing_evaluator("nope")));
    let events = simulation.run(&graph).unwrap().events();

    assert_eq!(kinds_into(&events, "result"), vec!["error"]);
    let error = into(&events, "result").next().unwrap();
    let message = error.raw.as_ref().unwrap()["message"].as_str().unwrap_or_default();
    assert!(message.contains("nope"));
}

#[test]
fn test_mock_evaluator_drives_filter() {
    let graph = GraphBuilder::new()
        .of("of", vec![json!(0), json!(5), json!(false), json!("x")])
        .filter("truthy", "value")
        .result("result")
        .pipe("of", "truthy")
        .subscribe("truthy", "result")
        .build();
    let simulation = Simulation::new(SimulationConfig::default(), Arc::new(identity_evaluator()));
    let events = simulation.run(&graph).unwrap().events();
    assert_eq!(nexts_into(&events, "result"), vec![json!(5), json!("x")]);
}

#[test]
fn test_catch_error_replaces_failed_stream() {
    let graph = GraphBuilder::new()
        .element(Element::new("throw", ElementType::ThrowError).with_property("error", "boom"))
        .of("fallback", vec![json!("safe")])
        .element(Element::new("catch", ElementType::CatchError).with_property("observable", "fallback"))
        .result("result")
        .pipe("throw", "catch")
        .subscribe("catch", "result")
        .build();
    let summary = run(&graph);
    let events = summary.events();

    assert_eq!(kinds_into(&events, "result"), vec!["next", "complete"]);
    assert_eq!(nexts_into(&events, "result"), vec![json!("safe")]);
    assert!(events.iter().all(|e| !e.fatal));

    // The error into catch-error is recorded but not fatal.
    let caught = into(&events, "catch").find(|e| e.is_error()).unwrap();
    assert!(!caught.fatal);

    // The replacement's Complete completes the original branch.
    let original = caught.branch_id;
    let complete = into(&events, "result").find(|e| e.is_complete()).unwrap();
    assert_eq!(complete.branch_id, original);
}

#[test]
fn test_catch_error_selector_rejects_error() {
    let graph = GraphBuilder::new()
        .element(Element::new("throw", ElementType::ThrowError).with_property("error", "boom"))
        .of("fallback", vec![json!("safe")])
        .element(
            Element::new("catch", ElementType::CatchError)
                .with_property("observable", "fallback")
                .with_property("selector", "error != \"boom\""),
        )
        .result("result")
        .pipe("throw", "catch")
        .subscribe("catch", "result")
        .build();
    let events = run(&graph).events();

    assert_eq!(kinds_into(&events, "result"), vec!["error"]);
    assert!(into(&events, "result").all(|e| e.fatal));
}

#[test]
fn test_ajax_failure_status_is_an_error() {
    let graph = linear(
        Element::new("ajax", ElementType::Ajax)
            .with_property("url", "/missing")
            .with_property("status", 404),
    );
    let events = run(&graph).events();

    let error = into(&events, "result").next().unwrap();
    assert!(error.is_error() && error.fatal);
    assert_eq!(error.raw, Some(json!({"status": 404, "url": "/missing"})));
}

#[test]
fn test_merge_forwards_error_after_earlier_values() {
    let graph = GraphBuilder::new()
        .of("ok", vec![json!(1)])
        .element(Element::new("throw", ElementType::ThrowError))
        .operator("merge", ElementType::Merge)
        .result("result")
        .pipe_at("ok", "merge", 0)
        .pipe_at("throw", "merge", 1)
        .subscribe("merge", "result")
        .build();
    let events = run(&graph).events();

    assert_eq!(kinds_into(&events, "result"), vec!["next", "error"]);
    assert_eq!(nexts_into(&events, "result"), vec![json!(1)]);
    assert_eq!(into(&events, "result").filter(|e| e.fatal).count(), 1);
}

#[test]
fn test_merge_stops_at_first_input_error() {
    let graph = GraphBuilder::new()
        .element(Element::new("throw", ElementType::ThrowError))
        .of("late", vec![json!(1)])
        .operator("merge", ElementType::Merge)
        .of("fallback", vec![json!("safe")])
        .element(Element::new("catch", ElementType::CatchError).with_property("observable", "fallback"))
        .result("result")
        .pipe_at("throw", "merge", 0)
        .pipe_at("late", "merge", 1)
        .pipe("merge", "catch")
        .subscribe("catch", "result")
        .build();
    let summary = run(&graph);
    let events = summary.events();

    // Nothing follows the error out of merge, not even the other input's value.
    assert_eq!(kinds_into(&events, "catch"), vec!["error"]);
    assert_eq!(kinds_into(&events, "result"), vec!["next", "complete"]);
    assert_eq!(nexts_into(&events, "result"), vec![json!("safe")]);
    assert!(!summary.pending_elements.contains(&ElementId::from("merge")));
    assert_terminated(&events);
}

// ── Fan-out isolation ──

#[test]
fn test_failing_path_leaves_sibling_fan_out_running() {
    let graph = GraphBuilder::new()
        .range("range", 1, 3)
        .map("map", "if value == 2 { throw \"bad value\" } else { value }")
        .result("bad_result")
        .result("good_result")
        .pipe("range", "map")
        .subscribe("map", "bad_result")
        .subscribe("range", "good_result")
        .build();
    let events = run(&graph).events();

    assert_eq!(kinds_into(&events, "bad_result"), vec!["next", "error"]);
    assert_eq!(
        kinds_into(&events, "good_result"),
        vec!["next", "next", "next", "complete"]
    );
    assert_eq!(
        nexts_into(&events, "good_result"),
        vec![json!(1), json!(2), json!(3)]
    );
    // The failed map stops consuming; range keeps feeding its sibling.
    assert_eq!(into(&events, "map").count(), 2);
    assert_terminated(&events);
}

#[test]
fn test_fatal_error_reaches_every_fan_out_path() {
    let graph = GraphBuilder::new()
        .element(Element::new("throw", ElementType::ThrowError).with_property("error", "boom"))
        .map("map", "value")
        .result("r1")
        .result("r2")
        .pipe("throw", "map")
        .subscribe("map", "r1")
        .subscribe("throw", "r2")
        .build();
    let events = run(&graph).events();

    assert_eq!(kinds_into(&events, "map"), vec!["error"]);
    assert_eq!(kinds_into(&events, "r1"), vec!["error"]);
    assert_eq!(kinds_into(&events, "r2"), vec!["error"]);
    assert!(into(&events, "r1").all(|e| e.fatal && e.raw == Some(json!("boom"))));
    assert!(into(&events, "r2").all(|e| e.fatal));
    assert!(!into(&events, "map").any(|e| e.fatal));
    assert_terminated(&events);
}

#[test]
fn test_failed_consumer_stops_its_source_early() {
    let graph = GraphBuilder::new()
        .interval("tick", 1, 1_000)
        .map("map", "if value == 1 { throw \"stop\" } else { value }")
        .result("result")
        .pipe("tick", "map")
        .subscribe("map", "result")
        .build();
    let summary = run(&graph);
    let events = summary.events();

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(kinds_into(&events, "result"), vec!["next", "error"]);
    assert_eq!(into(&events, "map").count(), 2);
    // Two emissions and their deliveries, not a thousand ticks.
    assert!(summary.steps < 10, "ran {} steps", summary.steps);
}

// ── Structural errors ──

#[test]
fn test_graph_without_creation_is_rejected() {
    let graph = GraphBuilder::new().result("result").build();
    let err = Simulation::with_script_engine(tolerant()).run(&graph).unwrap_err();
    assert_eq!(
        err,
        SimulationError::CreationNodeMissing {
            element_id: None,
            reference: None,
        }
    );
}

#[test]
fn test_missing_reference_is_reported() {
    let graph = GraphBuilder::new()
        .range("src", 1, 2)
        .element(Element::new("mm", ElementType::MergeMap).with_property("observable", "ghost"))
        .result("result")
        .pipe("src", "mm")
        .subscribe("mm", "result")
        .build();
    let err = Simulation::with_script_engine(SimulationConfig::default())
        .run(&graph)
        .unwrap_err();
    assert_eq!(
        err,
        SimulationError::MissingReferenceObservable {
            element_id: ElementId::from("mm"),
            reference: "ghost".to_string(),
        }
    );
}

#[test]
fn test_unsupported_element_type() {
    let mut zip = Element::new("zip", ElementType::Merge);
    zip.kind = "zip".to_string();
    let graph = GraphBuilder::new()
        .range("src", 1, 2)
        .element(zip)
        .result("result")
        .pipe("src", "zip")
        .subscribe("zip", "result")
        .build();
    let err = Simulation::with_script_engine(SimulationConfig::default())
        .run(&graph)
        .unwrap_err();
    assert!(matches!(
        err,
        SimulationError::UnsupportedElementType { ref kind, family: ElementFamily::JoinCreation, .. }
            if kind == "zip"
    ));
}

#[test]
fn test_cycle_is_rejected() {
    let graph = GraphBuilder::new()
        .range("src", 1, 2)
        .map("a", "value")
        .map("b", "value")
        .result("result")
        .pipe("src", "a")
        .pipe("a", "b")
        .pipe("b", "a")
        .subscribe("b", "result")
        .build();
    let err = Simulation::with_script_engine(SimulationConfig::default())
        .run(&graph)
        .unwrap_err();
    assert!(matches!(err, SimulationError::CycleDetected { .. }));
}

#[test]
fn test_broken_element_rejects_strict_run() {
    let graph = GraphBuilder::new()
        .range("src", 1, 2)
        .operator("bad", ElementType::Map)
        .result("result")
        .pipe("src", "bad")
        .subscribe("bad", "result")
        .build();
    let err = Simulation::with_script_engine(SimulationConfig::default())
        .run(&graph)
        .unwrap_err();
    assert!(matches!(
        err,
        SimulationError::InvalidElementPropertyValue { ref element_id, .. } if element_id.as_str() == "bad"
    ));
}

#[test]
fn test_tolerated_element_is_disabled() {
    let graph = GraphBuilder::new()
        .range("src", 1, 2)
        .operator("bad", ElementType::Map)
        .result("good_result")
        .result("bad_result")
        .subscribe("src", "good_result")
        .pipe("src", "bad")
        .subscribe("bad", "bad_result")
        .build();
    let summary = run_with(&graph, tolerant());

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.diagnostics.len(), 1);
    assert_eq!(summary.diagnostics[0].element_id().map(ElementId::as_str), Some("bad"));
    assert_eq!(summary.stats.disabled_elements, 1);

    let events = summary.events();
    assert_eq!(nexts_into(&events, "good_result"), vec![json!(1), json!(2)]);
    assert!(into(&events, "bad_result").next().is_none());
}

#[test]
fn test_error_on_seed_is_never_tolerated() {
    let graph = GraphBuilder::new()
        .element(Element::new("src", ElementType::Range).with_property("count", -1))
        .result("result")
        .subscribe("src", "result")
        .build();
    assert!(Simulation::with_script_engine(tolerant()).run(&graph).is_err());
}

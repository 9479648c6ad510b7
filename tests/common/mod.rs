//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use rxvis_rs::config::SimulationConfig;
use rxvis_rs::pipeline::{FlowValueEvent, Graph, RunSummary, Simulation};
use serde_json::Value;
use std::time::Duration;

/// Create a test timeout duration
pub fn test_timeout() -> Duration {
    Duration::from_millis(500)
}

/// Run `graph` with the default config and the Rhai engine.
pub fn run(graph: &Graph) -> RunSummary {
    run_with(graph, SimulationConfig::default())
}

pub fn run_with(graph: &Graph, config: SimulationConfig) -> RunSummary {
    Simulation::with_script_engine(config)
        .run(graph)
        .expect("graph should compile")
}

/// Payloads of `Next` events arriving at `target`, in order.
pub fn nexts_into(events: &[FlowValueEvent], target: &str) -> Vec<Value> {
    into(events, target)
        .filter(|e| e.is_next())
        .filter_map(|e| e.raw.clone())
        .collect()
}

/// Kinds of the events arriving at `target`, as `next`/`error`/`complete`.
pub fn kinds_into(events: &[FlowValueEvent], target: &str) -> Vec<&'static str> {
    into(events, target)
        .map(|e| match (e.is_next(), e.is_error()) {
            (true, _) => "next",
            (_, true) => "error",
            _ => "complete",
        })
        .collect()
}

pub fn into<'a>(
    events: &'a [FlowValueEvent],
    target: &'a str,
) -> impl Iterator<Item = &'a FlowValueEvent> + 'a {
    events.iter().filter(move |e| {
        e.target_element_id
            .as_ref()
            .is_some_and(|id| id.as_str() == target)
    })
}

/// Exactly one terminal event, and it is the last one.
pub fn assert_terminated(events: &[FlowValueEvent]) {
    let terminals = events.iter().filter(|e| e.terminal).count();
    assert_eq!(terminals, 1, "expected exactly one terminal event");
    assert!(events.last().is_some_and(|e| e.terminal), "terminal event is not last");
}

pub fn assert_times_strictly_increasing(events: &[FlowValueEvent]) {
    for pair in events.windows(2) {
        assert!(
            pair[0].time < pair[1].time,
            "time did not increase: {} then {}",
            pair[0].time,
            pair[1].time
        );
    }
}

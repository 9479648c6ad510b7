//! Per-element status folded from an event log.

use crate::pipeline::event::FlowValueEvent;
use crate::pipeline::id::ElementId;
use crate::pipeline::value::FlowValueKind;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// What one element did during a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementStatus {
    /// Traversals leaving this element, by kind
    pub next_out: u64,
    pub error_out: u64,
    pub complete_out: u64,
    /// Traversals arriving at this element
    pub received: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<Value>,
    /// A fatal error was recorded arriving here
    pub fatal: bool,
}

impl ElementStatus {
    pub fn has_errors(&self) -> bool {
        self.error_out > 0 || self.last_error.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    /// Elements in order of first appearance in the log
    pub elements: IndexMap<ElementId, ElementStatus>,
    pub total_events: usize,
    pub fatal_errors: usize,
    /// The log ends with the terminal `Complete`
    pub completed: bool,
}

impl RunReport {
    pub fn from_events(events: &[FlowValueEvent]) -> Self {
        let mut report = Self {
            total_events: events.len(),
            ..Self::default()
        };

        for event in events {
            if event.terminal {
                report.completed = true;
                continue;
            }
            if let Some(source) = &event.source_element_id {
                let status = report.elements.entry(source.clone()).or_default();
                match event.kind {
                    FlowValueKind::Next => status.next_out += 1,
                    FlowValueKind::Error => {
                        status.error_out += 1;
                        status.last_error = event.raw.clone();
                    }
                    FlowValueKind::Complete => status.complete_out += 1,
                }
            }
            if let Some(target) = &event.target_element_id {
                let status = report.elements.entry(target.clone()).or_default();
                status.received += 1;
                if event.is_error() {
                    status.last_error = event.raw.clone();
                }
                if event.fatal {
                    status.fatal = true;
                    report.fatal_errors += 1;
                }
            }
        }
        report
    }

    pub fn element(&self, id: &ElementId) -> Option<&ElementStatus> {
        self.elements.get(id)
    }

    /// Elements that saw an error, fatal or not.
    pub fn failing_elements(&self) -> impl Iterator<Item = &ElementId> {
        self.elements
            .iter()
            .filter(|(_, s)| s.has_errors())
            .map(|(id, _)| id)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} events, {} fatal, {}",
            self.total_events,
            self.fatal_errors,
            if self.completed { "completed" } else { "not completed" }
        )?;
        for (id, s) in &self.elements {
            write!(
                f,
                "  {:<16} next={:<4} error={:<3} complete={:<3} received={:<4}",
                id.as_str(),
                s.next_out,
                s.error_out,
                s.complete_out,
                s.received
            )?;
            if s.fatal {
                write!(f, " FATAL")?;
            }
            if let Some(err) = &s.last_error {
                write!(f, " last_error={}", err)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

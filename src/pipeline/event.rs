//! Externally observable records of flow values traversing edges.

use crate::pipeline::id::{BranchId, ConnectLineId, ElementId, FlowValueId};
use crate::pipeline::value::FlowValueKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The edge a flow value is being recorded on.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowEdge {
    pub connect_line_id: ConnectLineId,
    pub source: ElementId,
    pub target: ElementId,
    /// Every edge this emission was routed onto (fan-out siblings included).
    pub routed_onto: Vec<ConnectLineId>,
    /// Virtual scheduler time of the traversal.
    pub tick: u64,
}

/// One value traversing one edge, as seen by the rendering layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowValueEvent {
    pub id: FlowValueId,
    pub hash: String,
    /// Sequence number of this traversal among the source element's
    /// outbound traversals.
    pub index: u64,
    pub connect_lines_id: Vec<ConnectLineId>,
    /// Edge the traversal happened on. Absent on the terminal event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_line_id: Option<ConnectLineId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_element_id: Option<ElementId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_element_id: Option<ElementId>,
    /// Logical clock value. Strictly increasing and unique within a run.
    pub time: u64,
    /// Virtual scheduler time, for animation spacing.
    pub tick: u64,
    pub kind: FlowValueKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<BranchId>,
    /// The error escaped every handler.
    #[serde(default)]
    pub fatal: bool,
    /// The single closing `Complete` of a run.
    #[serde(default)]
    pub terminal: bool,
}

impl FlowValueEvent {
    pub fn is_next(&self) -> bool {
        self.kind == FlowValueKind::Next
    }

    pub fn is_error(&self) -> bool {
        self.kind == FlowValueKind::Error
    }

    pub fn is_complete(&self) -> bool {
        self.kind == FlowValueKind::Complete
    }

    /// Short human-readable form, used by the CLI text output.
    pub fn summary(&self) -> String {
        if self.terminal {
            return format!("t={:<5} COMPLETE (run finished)", self.time);
        }
        let source = self
            .source_element_id
            .as_ref()
            .map(ElementId::as_str)
            .unwrap_or("?");
        let target = self
            .target_element_id
            .as_ref()
            .map(ElementId::as_str)
            .unwrap_or("?");
        let payload = match &self.raw {
            Some(v) => v.to_string(),
            None => String::new(),
        };
        let kind = match (self.kind, self.fatal) {
            (FlowValueKind::Next, _) => "next",
            (FlowValueKind::Error, false) => "error",
            (FlowValueKind::Error, true) => "FATAL",
            (FlowValueKind::Complete, _) => "complete",
        };
        let branch = self
            .branch_id
            .map(|b| b.0.to_string())
            .unwrap_or_else(|| "-".to_string());
        format!(
            "t={:<5} tick={:<4} {} -> {} [{}] branch={} {}",
            self.time, self.tick, source, target, kind, branch, payload
        )
    }
}

/// Items delivered to stream subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowNotification {
    Event(FlowValueEvent),
    /// The stream is closed; no further events follow.
    Closed,
}

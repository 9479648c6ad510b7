//! Flow values: the unit of data travelling along an edge.

use crate::pipeline::id::{BranchId, ElementId, FlowValueId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a flow value signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowValueKind {
    Next,
    Error,
    Complete,
}

/// A payload-less description of one emission, produced by creation
/// operators before identities are assigned.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Next(Value),
    Error(Value),
    Complete,
}

impl Signal {
    pub fn kind(&self) -> FlowValueKind {
        match self {
            Signal::Next(_) => FlowValueKind::Next,
            Signal::Error(_) => FlowValueKind::Error,
            Signal::Complete => FlowValueKind::Complete,
        }
    }
}

/// One emission produced by an element.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowValue {
    pub id: FlowValueId,
    /// Opaque correlation token derived from `id`.
    pub hash: String,
    pub raw: Option<Value>,
    pub element_id: ElementId,
    pub branch_id: BranchId,
    pub kind: FlowValueKind,
    /// Set once an error escaped every handler; it is then only recorded,
    /// never intercepted again.
    pub fatal: bool,
}

impl FlowValue {
    fn new(
        raw: Option<Value>,
        element_id: ElementId,
        branch_id: BranchId,
        kind: FlowValueKind,
    ) -> Self {
        let id = FlowValueId::random();
        Self {
            hash: id.correlation_hash(),
            id,
            raw,
            element_id,
            branch_id,
            kind,
            fatal: false,
        }
    }

    pub fn next(raw: Value, element_id: ElementId, branch_id: BranchId) -> Self {
        Self::new(Some(raw), element_id, branch_id, FlowValueKind::Next)
    }

    pub fn error(raw: Value, element_id: ElementId, branch_id: BranchId) -> Self {
        Self::new(Some(raw), element_id, branch_id, FlowValueKind::Error)
    }

    pub fn complete(element_id: ElementId, branch_id: BranchId) -> Self {
        Self::new(None, element_id, branch_id, FlowValueKind::Complete)
    }

    pub fn from_signal(signal: Signal, element_id: ElementId, branch_id: BranchId) -> Self {
        match signal {
            Signal::Next(v) => Self::next(v, element_id, branch_id),
            Signal::Error(v) => Self::error(v, element_id, branch_id),
            Signal::Complete => Self::complete(element_id, branch_id),
        }
    }

    /// Re-emit this value from another element: fresh identity, same payload,
    /// kind, branch and fatal marker.
    pub fn forward(&self, element_id: &ElementId) -> Self {
        let mut value = Self::new(
            self.raw.clone(),
            element_id.clone(),
            self.branch_id,
            self.kind,
        );
        value.fatal = self.fatal;
        value
    }

    pub fn with_branch(mut self, branch_id: BranchId) -> Self {
        self.branch_id = branch_id;
        self
    }

    pub fn into_fatal(mut self) -> Self {
        self.fatal = true;
        self
    }

    pub fn is_next(&self) -> bool {
        self.kind == FlowValueKind::Next
    }

    pub fn is_error(&self) -> bool {
        self.kind == FlowValueKind::Error
    }

    pub fn is_complete(&self) -> bool {
        self.kind == FlowValueKind::Complete
    }

    /// Payload, or `null` for markers.
    pub fn payload(&self) -> Value {
        self.raw.clone().unwrap_or(Value::Null)
    }
}

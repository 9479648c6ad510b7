//! Structural error taxonomy for simulation runs.
//!
//! These are raised when a graph or an element's configuration is invalid.
//! Operator-level runtime failures (a thrown value, a failed request, a
//! projector that does not evaluate) are not errors here: they travel through
//! the graph as `Error` flow values.

use crate::pipeline::element::ElementFamily;
use crate::pipeline::id::{ConnectLineId, ElementId};
use thiserror::Error;

/// Errors that can abort (part of) a simulation run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimulationError {
    #[error("Element {element_id} references missing observable '{reference}'")]
    MissingReferenceObservable {
        element_id: ElementId,
        reference: String,
    },

    #[error("Element {element_id} has unsupported type '{kind}' in family {family}")]
    UnsupportedElementType {
        element_id: ElementId,
        kind: String,
        family: ElementFamily,
    },

    #[error("{}", creation_missing_message(.element_id, .reference))]
    CreationNodeMissing {
        element_id: Option<ElementId>,
        reference: Option<String>,
    },

    #[error("Element {element_id} has invalid property '{property}': {message}")]
    InvalidElementPropertyValue {
        element_id: ElementId,
        property: String,
        message: String,
    },

    #[error("Element {element_id} has no outgoing connection")]
    MissingNextElement { element_id: ElementId },

    #[error("Element {element_id} has no inbound pipe connection")]
    MissingInboundConnection { element_id: ElementId },

    #[error("Element {element_id} has more than one input with index {index}")]
    DuplicateInputIndex { element_id: ElementId, index: u32 },

    #[error("Invalid connect line {connect_line_id}: {message}")]
    InvalidConnectLine {
        connect_line_id: ConnectLineId,
        message: String,
    },

    #[error("Cycle detected in pipeline graph at element {element_id}")]
    CycleDetected { element_id: ElementId },
}

fn creation_missing_message(element_id: &Option<ElementId>, reference: &Option<String>) -> String {
    match (element_id, reference) {
        (Some(id), Some(reference)) => format!(
            "Element {} references '{}', which is not a creation element",
            id, reference
        ),
        (Some(id), None) => format!("Element {} is missing a required creation reference", id),
        _ => "Graph has no creation element to seed the simulation".to_string(),
    }
}

impl SimulationError {
    /// The element this error should be highlighted on, if any.
    pub fn element_id(&self) -> Option<&ElementId> {
        match self {
            SimulationError::MissingReferenceObservable { element_id, .. }
            | SimulationError::UnsupportedElementType { element_id, .. }
            | SimulationError::InvalidElementPropertyValue { element_id, .. }
            | SimulationError::MissingNextElement { element_id }
            | SimulationError::MissingInboundConnection { element_id }
            | SimulationError::DuplicateInputIndex { element_id, .. }
            | SimulationError::CycleDetected { element_id } => Some(element_id),
            SimulationError::CreationNodeMissing { element_id, .. } => element_id.as_ref(),
            SimulationError::InvalidConnectLine { .. } => None,
        }
    }

    /// Whether this error makes the whole graph unusable, regardless of the
    /// partial-graph setting.
    pub fn is_graph_wide(&self) -> bool {
        matches!(
            self,
            SimulationError::CreationNodeMissing {
                element_id: None,
                ..
            } | SimulationError::CycleDetected { .. }
        )
    }

    pub(crate) fn invalid_property(
        element_id: &ElementId,
        property: &str,
        message: impl Into<String>,
    ) -> Self {
        SimulationError::InvalidElementPropertyValue {
            element_id: element_id.clone(),
            property: property.to_string(),
            message: message.into(),
        }
    }
}

pub type SimulationResult<T> = std::result::Result<T, SimulationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_carries_identity() {
        let err = SimulationError::UnsupportedElementType {
            element_id: ElementId::from("op-3"),
            kind: "switch-map".to_string(),
            family: ElementFamily::Transformation,
        };
        let msg = err.to_string();
        assert!(msg.contains("op-3"));
        assert!(msg.contains("switch-map"));
        assert!(msg.contains("transformation"));
    }

    #[test]
    fn test_creation_missing_messages() {
        let graph_wide = SimulationError::CreationNodeMissing {
            element_id: None,
            reference: None,
        };
        assert!(graph_wide.is_graph_wide());
        assert!(graph_wide.to_string().contains("no creation element"));

        let missing_ref = SimulationError::CreationNodeMissing {
            element_id: Some(ElementId::from("iif-1")),
            reference: Some("of-9".to_string()),
        };
        assert!(!missing_ref.is_graph_wide());
        assert_eq!(missing_ref.element_id(), Some(&ElementId::from("iif-1")));
        assert!(missing_ref.to_string().contains("of-9"));
    }

    #[test]
    fn test_connect_line_error_has_no_element() {
        let err = SimulationError::InvalidConnectLine {
            connect_line_id: ConnectLineId::from("l1"),
            message: "dangling".to_string(),
        };
        assert!(err.element_id().is_none());
    }
}

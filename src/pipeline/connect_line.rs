//! Connect lines: directed, typed edges between element connect points.

use crate::pipeline::id::{ConnectLineId, ElementId};
use serde::{Deserialize, Serialize};

/// Whether a connect point is an input or output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectPointRole {
    Input,
    Output,
}

/// One end of a connect line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectPoint {
    pub id: ElementId,
    pub role: ConnectPointRole,
    /// Positional slot on the element, for elements with several ports.
    #[serde(default)]
    pub slot: u32,
}

impl ConnectPoint {
    pub fn output(id: impl Into<String>) -> Self {
        Self {
            id: ElementId::new(id),
            role: ConnectPointRole::Output,
            slot: 0,
        }
    }

    pub fn input(id: impl Into<String>, slot: u32) -> Self {
        Self {
            id: ElementId::new(id),
            role: ConnectPointRole::Input,
            slot,
        }
    }
}

/// Kind of relation a connect line expresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectLineType {
    /// Normal operator chaining.
    #[default]
    Pipe,
    /// Terminal observation by a result element. Never forwards further.
    Subscribe,
}

/// A directed edge between two elements.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectLine {
    pub id: ConnectLineId,
    pub source: ConnectPoint,
    pub target: ConnectPoint,
    #[serde(rename = "type", default)]
    pub line_type: ConnectLineType,
    /// Input ordering for elements with several same-role inputs.
    #[serde(default)]
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ConnectLine {
    pub fn pipe(id: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            id: ConnectLineId::new(id),
            source: ConnectPoint::output(from),
            target: ConnectPoint::input(to, 0),
            line_type: ConnectLineType::Pipe,
            index: 0,
            name: None,
        }
    }

    pub fn subscribe(
        id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self {
            line_type: ConnectLineType::Subscribe,
            ..Self::pipe(id, from, to)
        }
    }

    /// Set the input index (and slot) used to order join inputs.
    pub fn with_index(mut self, index: u32) -> Self {
        self.index = index;
        self.target.slot = index;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn source_id(&self) -> &ElementId {
        &self.source.id
    }

    pub fn target_id(&self) -> &ElementId {
        &self.target.id
    }

    pub fn is_subscribe(&self) -> bool {
        self.line_type == ConnectLineType::Subscribe
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_connect_line_defaults() {
        let line: ConnectLine = serde_json::from_value(json!({
            "id": "l1",
            "source": { "id": "a", "role": "output" },
            "target": { "id": "b", "role": "input" }
        }))
        .unwrap();
        assert_eq!(line.line_type, ConnectLineType::Pipe);
        assert_eq!(line.index, 0);
        assert_eq!(line.target.slot, 0);
    }

    #[test]
    fn test_with_index_sets_slot() {
        let line = ConnectLine::pipe("l2", "b", "merge").with_index(1);
        assert_eq!(line.index, 1);
        assert_eq!(line.target.slot, 1);
        assert!(!line.is_subscribe());
        assert!(ConnectLine::subscribe("l3", "m", "r").is_subscribe());
    }
}

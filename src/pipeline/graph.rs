//! The graph model: elements plus connect lines.
//!
//! A `Graph` is mutated by the authoring surface between runs. Every mutation
//! bumps its generation, so derived structures (the edge index, compiled
//! plans) can be keyed by [`SnapshotId`] and recomputed lazily. A run always
//! receives an immutable `Arc<Graph>` snapshot.

use crate::pipeline::connect_line::ConnectLine;
use crate::pipeline::element::Element;
use crate::pipeline::id::{ConnectLineId, ElementId};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Identity of one immutable graph state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SnapshotId {
    pub graph: Uuid,
    pub generation: u64,
}

/// Serialized form of a graph, as produced by the editor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphDocument {
    #[serde(default)]
    pub elements: Vec<Element>,
    #[serde(default)]
    pub connect_lines: Vec<ConnectLine>,
}

/// Pipeline graph: element collection keyed by id plus ordered connect lines.
#[derive(Debug, Clone)]
pub struct Graph {
    id: Uuid,
    generation: u64,
    elements: IndexMap<ElementId, Element>,
    connect_lines: Vec<ConnectLine>,
}

impl Graph {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            generation: 0,
            elements: IndexMap::new(),
            connect_lines: Vec::new(),
        }
    }

    pub fn from_document(doc: GraphDocument) -> Self {
        let mut graph = Self::new();
        for element in doc.elements {
            graph.add_element(element);
        }
        for line in doc.connect_lines {
            graph.add_connect_line(line);
        }
        graph
    }

    pub fn to_document(&self) -> GraphDocument {
        GraphDocument {
            elements: self.elements.values().cloned().collect(),
            connect_lines: self.connect_lines.clone(),
        }
    }

    pub fn from_json_str(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str::<GraphDocument>(json).map(Self::from_document)
    }

    // ── Mutation ──

    /// Insert or replace an element.
    pub fn add_element(&mut self, element: Element) -> &mut Self {
        self.elements.insert(element.id.clone(), element);
        self.generation += 1;
        self
    }

    /// Remove an element and every connect line touching it.
    pub fn remove_element(&mut self, id: &ElementId) -> Option<Element> {
        let removed = self.elements.shift_remove(id)?;
        self.connect_lines
            .retain(|l| l.source_id() != id && l.target_id() != id);
        self.generation += 1;
        Some(removed)
    }

    pub fn add_connect_line(&mut self, line: ConnectLine) -> &mut Self {
        self.connect_lines.push(line);
        self.generation += 1;
        self
    }

    pub fn remove_connect_line(&mut self, id: &ConnectLineId) -> Option<ConnectLine> {
        let pos = self.connect_lines.iter().position(|l| &l.id == id)?;
        self.generation += 1;
        Some(self.connect_lines.remove(pos))
    }

    // ── Access ──

    pub fn element(&self, id: &ElementId) -> Option<&Element> {
        self.elements.get(id)
    }

    pub fn contains(&self, id: &ElementId) -> bool {
        self.elements.contains_key(id)
    }

    /// Elements in insertion order.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.elements.values()
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    pub fn connect_lines(&self) -> &[ConnectLine] {
        &self.connect_lines
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn snapshot_id(&self) -> SnapshotId {
        SnapshotId {
            graph: self.id,
            generation: self.generation,
        }
    }

    /// Freeze the current state for a run.
    pub fn snapshot(&self) -> Arc<Graph> {
        Arc::new(self.clone())
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

use crate::pipeline::element::ElementType;
use crate::pipeline::error::SimulationError;
use crate::pipeline::graph::SnapshotId;
use crate::pipeline::id::{ConnectLineId, ElementId};
use crate::pipeline::node::OperatorConfig;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};

/// Compiled execution plan for one graph snapshot.
///
/// Holds validated operator configuration for every usable element, the
/// seeds a run starts from, and the structural facts the executor routes by.
#[derive(Debug, Clone)]
pub struct CompiledPlan {
    /// Snapshot this plan was compiled from
    pub snapshot: SnapshotId,

    /// Creation elements subscribed when a run starts, in graph order
    pub seeds: Vec<ElementId>,

    /// Operator configuration per element, in graph order
    pub operators: IndexMap<ElementId, OperatorConfig>,

    pub element_types: HashMap<ElementId, ElementType>,

    /// Inbound pipe/subscribe lines per element, ordered by edge `index`.
    /// A delivery's input position is its line's position in this list.
    pub source_inputs: HashMap<ElementId, Vec<ConnectLineId>>,

    /// Creation elements named by a reference property (sub-flows)
    pub referenced: HashSet<ElementId>,

    /// Elements switched off by tolerated structural errors
    pub disabled: HashSet<ElementId>,

    /// Lines that failed validation and carry nothing
    pub ignored_lines: HashSet<ConnectLineId>,

    /// Tolerated structural errors
    pub diagnostics: Vec<SimulationError>,

    /// Result elements no seed can reach
    pub unreachable_results: Vec<ElementId>,

    /// Compilation statistics
    pub stats: PlanStats,
}

/// Statistics about the compiled plan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanStats {
    /// Total number of elements in the graph
    pub total_elements: usize,

    /// Elements reachable from a seed
    pub active_elements: usize,

    /// Elements no seed can reach
    pub disconnected_elements: usize,

    pub seed_elements: usize,

    pub referenced_elements: usize,

    pub result_elements: usize,

    pub disabled_elements: usize,

    /// Compilation time in microseconds
    pub compile_time_us: u64,
}

impl CompiledPlan {
    pub fn operator(&self, id: &ElementId) -> Option<&OperatorConfig> {
        self.operators.get(id)
    }

    pub fn element_type(&self, id: &ElementId) -> Option<ElementType> {
        self.element_types.get(id).copied()
    }

    pub fn is_disabled(&self, id: &ElementId) -> bool {
        self.disabled.contains(id)
    }

    pub fn is_referenced(&self, id: &ElementId) -> bool {
        self.referenced.contains(id)
    }

    pub fn is_result(&self, id: &ElementId) -> bool {
        self.element_type(id).is_some_and(|t| t.is_result())
    }

    pub fn is_ignored(&self, line: &ConnectLineId) -> bool {
        self.ignored_lines.contains(line)
    }

    /// Position of `line` among `target`'s ordered inputs.
    pub fn input_position(&self, target: &ElementId, line: &ConnectLineId) -> Option<usize> {
        self.source_inputs
            .get(target)
            .and_then(|lines| lines.iter().position(|l| l == line))
    }

    pub fn input_count(&self, target: &ElementId) -> usize {
        self.source_inputs.get(target).map(Vec::len).unwrap_or(0)
    }

    /// Check if the plan has anything to run
    pub fn is_empty(&self) -> bool {
        self.seeds.is_empty()
    }
}

use super::compiled_plan::{CompiledPlan, PlanStats};
use super::edge_index::EdgeIndex;
use super::element::ElementType;
use super::error::{SimulationError, SimulationResult};
use super::graph::Graph;
use super::id::{ConnectLineId, ElementId};
use super::node::OperatorConfig;
use super::nodes::CreationSpec;
use crate::config::SimulationConfig;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet, VecDeque};

/// Compiles a graph snapshot into an execution plan
pub struct PipelineCompiler;

/// Facts gathered while validating, before errors are resolved.
#[derive(Default)]
struct Analysis {
    errors: Vec<SimulationError>,
    element_types: HashMap<ElementId, ElementType>,
    operators: IndexMap<ElementId, OperatorConfig>,
    ignored_lines: HashSet<ConnectLineId>,
    /// Referencing element -> referenced creation elements
    references: HashMap<ElementId, Vec<ElementId>>,
    /// Referenced creation element -> elements referencing it
    referrers: HashMap<ElementId, Vec<ElementId>>,
    source_inputs: HashMap<ElementId, Vec<ConnectLineId>>,
}

impl PipelineCompiler {
    /// Validate `graph` and compile it into a plan.
    ///
    /// Every structural check runs before any error is reported, so that with
    /// `tolerate_partial_graphs` all element-scoped problems are collected as
    /// diagnostics. Without it, the first error is returned, graph-wide
    /// errors first.
    pub fn compile(
        graph: &Graph,
        index: &EdgeIndex,
        config: &SimulationConfig,
    ) -> SimulationResult<CompiledPlan> {
        let start_time = std::time::Instant::now();
        let mut analysis = Analysis::default();

        Self::resolve_types(graph, &mut analysis);
        Self::check_connect_lines(graph, &mut analysis);
        Self::parse_operators(graph, config, &mut analysis);
        Self::check_references(graph, &mut analysis);
        Self::collect_inputs(graph, index, &mut analysis);
        Self::check_outputs(graph, index, &mut analysis);
        Self::detect_cycles(graph, &mut analysis);
        Self::detect_delegation_cycles(graph, &mut analysis);

        let seeds: Vec<ElementId> = graph
            .elements()
            .filter(|el| {
                analysis
                    .element_types
                    .get(&el.id)
                    .is_some_and(|t| t.is_creation())
                    && !analysis.referrers.contains_key(&el.id)
            })
            .map(|el| el.id.clone())
            .collect();
        if seeds.is_empty() {
            analysis.errors.push(SimulationError::CreationNodeMissing {
                element_id: None,
                reference: None,
            });
        }

        let (disabled, diagnostics) = Self::resolve_errors(&mut analysis, &seeds, config)?;

        let reachable = Self::reachability(&seeds, index, &analysis);
        let unreachable_results: Vec<ElementId> = graph
            .elements()
            .filter(|el| {
                analysis
                    .element_types
                    .get(&el.id)
                    .is_some_and(|t| t.is_result())
                    && !reachable.contains(&el.id)
            })
            .map(|el| el.id.clone())
            .collect();
        for id in &unreachable_results {
            tracing::warn!("Result element {} is not reachable from any creation element", id);
        }

        let referenced: HashSet<ElementId> = analysis.referrers.keys().cloned().collect();
        let total_elements = graph.element_count();
        let active_elements = graph
            .elements()
            .filter(|el| reachable.contains(&el.id))
            .count();

        let stats = PlanStats {
            total_elements,
            active_elements,
            disconnected_elements: total_elements.saturating_sub(active_elements),
            seed_elements: seeds.len(),
            referenced_elements: referenced.len(),
            result_elements: analysis
                .element_types
                .values()
                .filter(|t| t.is_result())
                .count(),
            disabled_elements: disabled.len(),
            compile_time_us: start_time.elapsed().as_micros() as u64,
        };

        Ok(CompiledPlan {
            snapshot: graph.snapshot_id(),
            seeds,
            operators: analysis.operators,
            element_types: analysis.element_types,
            source_inputs: analysis.source_inputs,
            referenced,
            disabled,
            ignored_lines: analysis.ignored_lines,
            diagnostics,
            unreachable_results,
            stats,
        })
    }

    fn resolve_types(graph: &Graph, analysis: &mut Analysis) {
        for element in graph.elements() {
            match element.element_type() {
                Ok(t) => {
                    analysis.element_types.insert(element.id.clone(), t);
                }
                Err(e) => analysis.errors.push(e),
            }
        }
    }

    /// Dangling endpoints, and subscribe lines that do not end in a result.
    fn check_connect_lines(graph: &Graph, analysis: &mut Analysis) {
        for line in graph.connect_lines() {
            let message = if !graph.contains(line.source_id()) {
                Some(format!("source element '{}' does not exist", line.source_id()))
            } else if !graph.contains(line.target_id()) {
                Some(format!("target element '{}' does not exist", line.target_id()))
            } else if line.is_subscribe()
                && analysis
                    .element_types
                    .get(line.target_id())
                    .is_some_and(|t| !t.is_result())
            {
                Some(format!(
                    "subscribe line must target a result element, not '{}'",
                    line.target_id()
                ))
            } else {
                None
            };

            if let Some(message) = message {
                analysis.ignored_lines.insert(line.id.clone());
                analysis.errors.push(SimulationError::InvalidConnectLine {
                    connect_line_id: line.id.clone(),
                    message,
                });
            }
        }
    }

    fn parse_operators(graph: &Graph, config: &SimulationConfig, analysis: &mut Analysis) {
        for element in graph.elements() {
            let Some(&t) = analysis.element_types.get(&element.id) else {
                continue;
            };
            match OperatorConfig::parse(element, t, config) {
                Ok(op) => {
                    analysis.operators.insert(element.id.clone(), op);
                }
                Err(e) => analysis.errors.push(e),
            }
        }
    }

    fn check_references(graph: &Graph, analysis: &mut Analysis) {
        let mut found = Vec::new();
        for (id, op) in &analysis.operators {
            for reference in op.references() {
                if !graph.contains(reference) {
                    analysis.errors.push(SimulationError::MissingReferenceObservable {
                        element_id: id.clone(),
                        reference: reference.to_string(),
                    });
                } else if !analysis
                    .element_types
                    .get(reference)
                    .is_some_and(|t| t.is_creation())
                {
                    analysis.errors.push(SimulationError::CreationNodeMissing {
                        element_id: Some(id.clone()),
                        reference: Some(reference.to_string()),
                    });
                } else {
                    found.push((id.clone(), reference.clone()));
                }
            }
        }
        for (referrer, reference) in found {
            analysis
                .references
                .entry(referrer.clone())
                .or_default()
                .push(reference.clone());
            analysis
                .referrers
                .entry(reference)
                .or_default()
                .push(referrer);
        }
    }

    /// Ordered input lines of every non-creation element. Lines drawn from a
    /// referenced sub-flow into its referrer only record inner traversals and
    /// are not inputs.
    fn collect_inputs(graph: &Graph, index: &EdgeIndex, analysis: &mut Analysis) {
        for element in graph.elements() {
            let Some(&t) = analysis.element_types.get(&element.id) else {
                continue;
            };
            if t.is_creation() {
                continue;
            }
            let own_references = analysis.references.get(&element.id);
            let lines: Vec<_> = index
                .incoming(&element.id)
                .iter()
                .filter(|l| !analysis.ignored_lines.contains(&l.id))
                .filter(|l| !own_references.is_some_and(|refs| refs.contains(l.source_id())))
                .collect();

            if lines.is_empty() {
                analysis
                    .errors
                    .push(SimulationError::MissingInboundConnection {
                        element_id: element.id.clone(),
                    });
            }

            if t.is_join() || t == ElementType::Buffer {
                let mut seen = HashSet::new();
                for line in &lines {
                    if !seen.insert(line.index) {
                        analysis.errors.push(SimulationError::DuplicateInputIndex {
                            element_id: element.id.clone(),
                            index: line.index,
                        });
                        break;
                    }
                }
            }

            analysis.source_inputs.insert(
                element.id.clone(),
                lines.iter().map(|l| l.id.clone()).collect(),
            );
        }
    }

    /// Every element except results and referenced sub-flows must lead
    /// somewhere.
    fn check_outputs(graph: &Graph, index: &EdgeIndex, analysis: &mut Analysis) {
        for element in graph.elements() {
            let Some(t) = analysis.element_types.get(&element.id) else {
                continue;
            };
            if t.is_result() || analysis.referrers.contains_key(&element.id) {
                continue;
            }
            let has_output = index
                .outgoing(&element.id)
                .iter()
                .any(|l| !analysis.ignored_lines.contains(&l.id));
            if !has_output {
                analysis.errors.push(SimulationError::MissingNextElement {
                    element_id: element.id.clone(),
                });
            }
        }
    }

    /// Kahn's algorithm over the usable lines; whatever is left has a cycle.
    fn detect_cycles(graph: &Graph, analysis: &mut Analysis) {
        let mut in_degree: IndexMap<&ElementId, usize> =
            graph.elements().map(|el| (&el.id, 0)).collect();
        let mut adj: HashMap<&ElementId, Vec<&ElementId>> = HashMap::new();

        for line in graph.connect_lines() {
            if analysis.ignored_lines.contains(&line.id) {
                continue;
            }
            adj.entry(line.source_id()).or_default().push(line.target_id());
            if let Some(d) = in_degree.get_mut(line.target_id()) {
                *d += 1;
            }
        }

        let mut queue: VecDeque<&ElementId> = in_degree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(&id, _)| id)
            .collect();
        let mut visited = 0;

        while let Some(node) = queue.pop_front() {
            visited += 1;
            for &neighbor in adj.get(node).map(Vec::as_slice).unwrap_or(&[]) {
                if let Some(d) = in_degree.get_mut(neighbor) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(neighbor);
                    }
                }
            }
        }

        if visited < in_degree.len() {
            if let Some((id, _)) = in_degree.iter().find(|(_, &d)| d > 0) {
                analysis.errors.push(SimulationError::CycleDetected {
                    element_id: (*id).clone(),
                });
            }
        }
    }

    /// `defer`/`iif` chains that lead back to themselves would never produce
    /// a signal.
    fn detect_delegation_cycles(graph: &Graph, analysis: &mut Analysis) {
        let delegates = |id: &ElementId| -> Vec<ElementId> {
            match analysis.operators.get(id) {
                Some(OperatorConfig::Creation(
                    spec @ (CreationSpec::Defer { .. } | CreationSpec::Iif { .. }),
                )) => spec.references().into_iter().cloned().collect(),
                _ => Vec::new(),
            }
        };

        let mut cleared: HashSet<ElementId> = HashSet::new();
        let mut found = None;
        'outer: for element in graph.elements() {
            if cleared.contains(&element.id) {
                continue;
            }
            // Iterative DFS with an explicit path.
            let mut path: Vec<(ElementId, Vec<ElementId>)> =
                vec![(element.id.clone(), delegates(&element.id))];
            while let Some((_, pending)) = path.last_mut() {
                match pending.pop() {
                    Some(next) => {
                        if path.iter().any(|(id, _)| id == &next) {
                            found = Some(next);
                            break 'outer;
                        }
                        if !cleared.contains(&next) {
                            let children = delegates(&next);
                            path.push((next, children));
                        }
                    }
                    None => {
                        if let Some((done, _)) = path.pop() {
                            cleared.insert(done);
                        }
                    }
                }
            }
        }

        if let Some(element_id) = found {
            analysis
                .errors
                .push(SimulationError::CycleDetected { element_id });
        }
    }

    /// Apply the partial-graph policy. Returns disabled elements and the
    /// tolerated errors.
    fn resolve_errors(
        analysis: &mut Analysis,
        seeds: &[ElementId],
        config: &SimulationConfig,
    ) -> SimulationResult<(HashSet<ElementId>, Vec<SimulationError>)> {
        let mut errors = std::mem::take(&mut analysis.errors);
        errors.sort_by_key(|e| !e.is_graph_wide());

        if !config.tolerate_partial_graphs {
            return match errors.into_iter().next() {
                Some(e) => Err(e),
                None => Ok((HashSet::new(), Vec::new())),
            };
        }

        let mut disabled = HashSet::new();
        let mut diagnostics = Vec::new();
        for e in errors {
            if e.is_graph_wide() {
                return Err(e);
            }
            match e.element_id() {
                Some(id) if seeds.contains(id) => return Err(e),
                Some(id) => {
                    tracing::warn!("Disabling element {}: {}", id, e);
                    disabled.insert(id.clone());
                }
                None => tracing::warn!("Ignoring: {}", e),
            }
            diagnostics.push(e);
        }

        // A referrer cannot run without its sub-flow.
        let mut worklist: Vec<ElementId> = disabled.iter().cloned().collect();
        while let Some(id) = worklist.pop() {
            let Some(referrers) = analysis.referrers.get(&id) else {
                continue;
            };
            for referrer in referrers {
                if disabled.contains(referrer) {
                    continue;
                }
                if seeds.contains(referrer) {
                    let cause = diagnostics
                        .iter()
                        .find(|d: &&SimulationError| d.element_id() == Some(&id))
                        .cloned()
                        .unwrap_or(SimulationError::CreationNodeMissing {
                            element_id: Some(referrer.clone()),
                            reference: Some(id.to_string()),
                        });
                    return Err(cause);
                }
                tracing::warn!("Disabling element {}: sub-flow {} is disabled", referrer, id);
                disabled.insert(referrer.clone());
                worklist.push(referrer.clone());
            }
        }

        Ok((disabled, diagnostics))
    }

    /// Elements reachable from a seed over usable lines and references.
    fn reachability(
        seeds: &[ElementId],
        index: &EdgeIndex,
        analysis: &Analysis,
    ) -> HashSet<ElementId> {
        let mut reachable: HashSet<ElementId> = seeds.iter().cloned().collect();
        let mut stack: Vec<ElementId> = seeds.to_vec();

        while let Some(node) = stack.pop() {
            let via_lines = index
                .outgoing(&node)
                .iter()
                .filter(|l| !analysis.ignored_lines.contains(&l.id))
                .map(|l| l.target_id().clone());
            let via_references = analysis
                .references
                .get(&node)
                .into_iter()
                .flatten()
                .cloned();
            for neighbor in via_lines.chain(via_references).collect::<Vec<_>>() {
                if reachable.insert(neighbor.clone()) {
                    stack.push(neighbor);
                }
            }
        }

        reachable
    }
}

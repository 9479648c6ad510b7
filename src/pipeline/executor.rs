//! Simulation executor.
//!
//! A run walks one compiled snapshot to exhaustion:
//!
//! 1. Every seed creation element is subscribed on its own root branch.
//! 2. The loop drains the pending delivery queue (FIFO) completely, then pops
//!    the next scheduled creation emission, which advances virtual time.
//! 3. Every traversal of a connect line is recorded by the [`FlowManager`],
//!    which assigns the logical clock and publishes the event.
//! 4. When no work is left, the terminal `Complete` closes the stream.
//!
//! Each outgoing line of an element is its own path. An element that emits
//! an error stops consuming on that branch, and an upstream element stops
//! once all of its consumers on the branch did; siblings keep running.
//!
//! Propagation is single-threaded. [`Simulation::spawn`] moves a run onto a
//! dedicated thread that can be aborted between steps.

use crate::config::SimulationConfig;
use crate::error::{Result, RxVisError};
use crate::pipeline::compiled_plan::{CompiledPlan, PlanStats};
use crate::pipeline::compiler::PipelineCompiler;
use crate::pipeline::connect_line::ConnectLine;
use crate::pipeline::edge_index::{EdgeIndex, EdgeIndexCache};
use crate::pipeline::error::{SimulationError, SimulationResult};
use crate::pipeline::event::{FlowEdge, FlowValueEvent};
use crate::pipeline::graph::Graph;
use crate::pipeline::id::{BranchAllocator, BranchId, ConnectLineId, ElementId, SubscriptionId};
use crate::pipeline::manager::{FlowManager, FlowSubscription};
use crate::pipeline::node::{Effect, Inlet, NodeContext, OperatorConfig, OperatorNode, SubscriptionScope};
use crate::pipeline::nodes::Production;
use crate::pipeline::scheduler::{Cursor, Route, ScheduledEmission, Scheduler};
use crate::pipeline::value::{FlowValue, FlowValueKind};
use crate::scripting::{ExpressionEvaluator, ScriptEngine};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Instant;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// All work was exhausted; the terminal `Complete` was emitted.
    Completed,
    /// Stopped by [`SimulationHandle::abort`].
    Aborted,
    /// Stopped by `SimulationConfig::step_limit`.
    StepLimitExceeded,
}

/// Result of one run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    /// The run's event stream; still replayable after the run.
    pub manager: FlowManager,
    pub stats: PlanStats,
    /// Structural errors tolerated at compile time.
    pub diagnostics: Vec<SimulationError>,
    pub branches_spawned: usize,
    pub steps: u64,
    /// Operators left holding state (unsatisfied joins, withheld completions).
    pub pending_elements: Vec<ElementId>,
    pub started_at: DateTime<Utc>,
    pub elapsed_us: u64,
}

impl RunSummary {
    pub fn events(&self) -> Vec<FlowValueEvent> {
        self.manager.events()
    }

    pub fn is_completed(&self) -> bool {
        self.outcome == RunOutcome::Completed
    }
}

/// Entry point for running pipeline graphs.
///
/// Caches the edge index and the compiled plan of the last snapshot it saw,
/// so re-running an unchanged graph skips validation.
pub struct Simulation {
    config: SimulationConfig,
    evaluator: Arc<dyn ExpressionEvaluator>,
    edge_cache: EdgeIndexCache,
    plan_cache: Mutex<Option<Arc<CompiledPlan>>>,
}

impl Simulation {
    pub fn new(config: SimulationConfig, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        Self {
            config,
            evaluator,
            edge_cache: EdgeIndexCache::new(),
            plan_cache: Mutex::new(None),
        }
    }

    /// Simulation backed by the default Rhai engine, limited per `config`.
    pub fn with_script_engine(config: SimulationConfig) -> Self {
        let engine = ScriptEngine::with_limits(&config.script_limits);
        Self::new(config, Arc::new(engine))
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn edge_index(&self, graph: &Graph) -> Arc<EdgeIndex> {
        self.edge_cache.index_for(graph)
    }

    /// Validate and compile `graph`, reusing the cached plan when the
    /// snapshot is unchanged.
    pub fn compile(&self, graph: &Graph) -> SimulationResult<Arc<CompiledPlan>> {
        let snapshot = graph.snapshot_id();
        let mut cached = self
            .plan_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(plan) = cached.as_ref() {
            if plan.snapshot == snapshot {
                return Ok(plan.clone());
            }
        }

        let index = self.edge_cache.index_for(graph);
        let plan = Arc::new(PipelineCompiler::compile(graph, &index, &self.config)?);
        tracing::info!(
            "Pipeline compiled: {} active / {} total, {} seeds (gen {}, {} us)",
            plan.stats.active_elements,
            plan.stats.total_elements,
            plan.stats.seed_elements,
            snapshot.generation,
            plan.stats.compile_time_us,
        );
        *cached = Some(plan.clone());
        Ok(plan)
    }

    /// Run `graph` to completion on the calling thread.
    pub fn run(&self, graph: &Graph) -> SimulationResult<RunSummary> {
        let propagation = self.prepare(graph, Arc::new(AtomicBool::new(false)))?;
        Ok(propagation.run())
    }

    /// Run `graph` on a dedicated thread. Structural errors are still
    /// reported here, before the thread starts.
    pub fn spawn(&self, graph: &Graph) -> Result<SimulationHandle> {
        let abort = Arc::new(AtomicBool::new(false));
        let propagation = self.prepare(graph, abort.clone())?;
        let manager = propagation.manager.clone();
        let thread = std::thread::Builder::new()
            .name("rxvis-simulation".to_string())
            .spawn(move || propagation.run())?;
        Ok(SimulationHandle {
            manager,
            abort,
            thread,
        })
    }

    fn prepare(&self, graph: &Graph, abort: Arc<AtomicBool>) -> SimulationResult<Propagation> {
        let plan = self.compile(graph).inspect_err(|e| {
            tracing::warn!("Simulation rejected: {}", e);
        })?;
        let index = self.edge_cache.index_for(graph);
        Ok(Propagation::new(
            plan,
            index,
            self.evaluator.clone(),
            FlowManager::new(),
            abort,
            self.config.step_limit,
        ))
    }
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// A run in progress on its own thread.
pub struct SimulationHandle {
    manager: FlowManager,
    abort: Arc<AtomicBool>,
    thread: JoinHandle<RunSummary>,
}

impl SimulationHandle {
    /// Subscribe to the run's events: history first, then live events.
    pub fn events(&self) -> FlowSubscription {
        self.manager.as_observable()
    }

    pub fn manager(&self) -> &FlowManager {
        &self.manager
    }

    /// Stop the run before its next step. The stream is closed without a
    /// terminal `Complete`.
    pub fn abort(&self) {
        self.abort.store(true, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    pub fn join(self) -> Result<RunSummary> {
        self.thread
            .join()
            .map_err(|_| RxVisError::Worker("simulation thread panicked".to_string()))
    }
}

/// A value waiting to be handed to an operator.
#[derive(Debug)]
struct Delivery {
    target: ElementId,
    inlet: Inlet,
    value: FlowValue,
}

enum Work {
    Deliver(Delivery),
    Emit(ScheduledEmission),
}

/// State of one run.
struct Propagation {
    plan: Arc<CompiledPlan>,
    index: Arc<EdgeIndex>,
    evaluator: Arc<dyn ExpressionEvaluator>,
    manager: FlowManager,
    abort: Arc<AtomicBool>,
    step_limit: u64,
    nodes: HashMap<ElementId, OperatorNode>,
    scheduler: Scheduler,
    pending: VecDeque<Delivery>,
    branches: BranchAllocator,
    next_subscription: u64,
    /// Inner subscription -> element that opened it
    subscriptions: HashMap<SubscriptionId, ElementId>,
    /// (branch, element) pairs that stopped consuming: the element emitted an
    /// error on that branch, or every consumer of its output did.
    torn_down: HashSet<(BranchId, ElementId)>,
    warned_disabled: HashSet<ElementId>,
    steps: u64,
}

impl Propagation {
    fn new(
        plan: Arc<CompiledPlan>,
        index: Arc<EdgeIndex>,
        evaluator: Arc<dyn ExpressionEvaluator>,
        manager: FlowManager,
        abort: Arc<AtomicBool>,
        step_limit: u64,
    ) -> Self {
        let nodes = plan
            .operators
            .iter()
            .filter(|(id, _)| !plan.is_disabled(id))
            .filter_map(|(id, op)| {
                op.instantiate(plan.input_count(id))
                    .map(|node| (id.clone(), node))
            })
            .collect();

        Self {
            plan,
            index,
            evaluator,
            manager,
            abort,
            step_limit,
            nodes,
            scheduler: Scheduler::new(),
            pending: VecDeque::new(),
            branches: BranchAllocator::new(),
            next_subscription: 0,
            subscriptions: HashMap::new(),
            torn_down: HashSet::new(),
            warned_disabled: HashSet::new(),
            steps: 0,
        }
    }

    fn run(mut self) -> RunSummary {
        let started_at = Utc::now();
        let start = Instant::now();
        tracing::info!("Simulation started with {} seeds", self.plan.seeds.len());

        for seed in self.plan.seeds.clone() {
            let branch = self.branches.allocate();
            self.subscribe(&seed, branch, SubscriptionScope::root(), Route::Outer);
        }

        let outcome = loop {
            if self.abort.load(Ordering::Relaxed) {
                tracing::info!("Simulation aborted after {} steps", self.steps);
                break RunOutcome::Aborted;
            }

            let work = if let Some(delivery) = self.pending.pop_front() {
                Work::Deliver(delivery)
            } else if let Some(emission) = self.scheduler.pop() {
                Work::Emit(emission)
            } else {
                break RunOutcome::Completed;
            };

            self.steps += 1;
            if self.steps > self.step_limit {
                tracing::warn!(
                    "Simulation exceeded the step limit of {}; aborting",
                    self.step_limit
                );
                break RunOutcome::StepLimitExceeded;
            }

            match work {
                Work::Deliver(delivery) => self.deliver(delivery),
                Work::Emit(emission) => self.emit_scheduled(emission),
            }
        };

        match outcome {
            RunOutcome::Completed => {
                self.manager.handle_complete();
            }
            RunOutcome::Aborted | RunOutcome::StepLimitExceeded => self.manager.close(),
        }

        let pending_elements: Vec<ElementId> = self
            .plan
            .operators
            .keys()
            .filter(|id| self.nodes.get(*id).is_some_and(OperatorNode::is_pending))
            .cloned()
            .collect();
        for id in &pending_elements {
            tracing::debug!("Element {} finished with pending state", id);
        }

        let elapsed_us = start.elapsed().as_micros() as u64;
        tracing::info!(
            "Simulation finished ({:?}): {} steps, {} events, {} branches in {} us",
            outcome,
            self.steps,
            self.manager.event_count(),
            self.branches.spawned(),
            elapsed_us
        );

        RunSummary {
            outcome,
            manager: self.manager.clone(),
            stats: self.plan.stats.clone(),
            diagnostics: self.plan.diagnostics.clone(),
            branches_spawned: self.branches.spawned(),
            steps: self.steps.min(self.step_limit),
            pending_elements,
            started_at,
            elapsed_us,
        }
    }

    // ── Subscriptions ──

    /// Schedule what one subscription to `source` produces.
    fn subscribe(
        &mut self,
        source: &ElementId,
        branch: BranchId,
        scope: SubscriptionScope,
        route: Route,
    ) {
        if self.skip_disabled(source) {
            return;
        }
        let plan = self.plan.clone();
        let Some(OperatorConfig::Creation(spec)) = plan.operator(source) else {
            tracing::warn!("Cannot subscribe to {}: not a creation element", source);
            return;
        };

        tracing::trace!("Subscribing {} ({}) on {}", source, spec.name(), branch);
        match spec.produce(&scope, self.evaluator.as_ref(), source) {
            Production::Signals(signals) => {
                for timed in signals {
                    self.scheduler.schedule(
                        timed.delay,
                        ScheduledEmission {
                            source: source.clone(),
                            branch,
                            signal: timed.signal,
                            route: route.clone(),
                            cursor: None,
                        },
                    );
                }
            }
            Production::Sequence(sequence) => {
                let delay = sequence.delay(0);
                let cursor = Cursor::start(sequence);
                self.scheduler.schedule(
                    delay,
                    ScheduledEmission {
                        source: source.clone(),
                        branch,
                        signal: cursor.signal(),
                        route,
                        cursor: Some(cursor),
                    },
                );
            }
            Production::Delegate(target) => {
                let relay = Route::Relay {
                    via: source.clone(),
                    then: Box::new(route),
                };
                self.subscribe(&target, branch, scope, relay);
            }
        }
    }

    fn emit_scheduled(&mut self, emission: ScheduledEmission) {
        if self.route_closed(&emission.source, emission.branch, &emission.route) {
            // The rest of a sequence goes with it.
            tracing::trace!(
                "Dropping emission of {} on finished {}",
                emission.source,
                emission.branch
            );
            return;
        }
        if let Some((delay, following)) = emission.following() {
            self.scheduler.schedule_following(delay, following);
        }
        let value = FlowValue::from_signal(emission.signal, emission.source, emission.branch);
        if value.is_error() {
            self.tear_down(value.branch_id, &value.element_id);
        }
        self.dispatch(value, emission.route);
    }

    fn dispatch(&mut self, value: FlowValue, route: Route) {
        match route {
            Route::Outer => self.route_outer(value),
            Route::Inner(sub) => self.route_inner(sub, value),
            Route::Relay { via, then } => {
                let lines = self.lines_between(&value.element_id, &via);
                self.record_all(&value, &lines);
                let relayed = value.forward(&via);
                if relayed.is_error() {
                    self.tear_down(relayed.branch_id, &via);
                }
                self.dispatch(relayed, *then);
            }
        }
    }

    // ── Teardown ──

    /// Whether `element` stopped consuming on `branch`.
    fn is_closed(&self, branch: BranchId, element: &ElementId) -> bool {
        self.torn_down.contains(&(branch, element.clone()))
            || self.manager.is_halted(branch, element)
    }

    /// Whether an emission of `source` along `route` has anyone left to
    /// reach.
    fn route_closed(&self, source: &ElementId, branch: BranchId, route: &Route) -> bool {
        if self.is_closed(branch, source) {
            return true;
        }
        match route {
            Route::Outer => false,
            Route::Inner(sub) => self
                .subscriptions
                .get(sub)
                .is_some_and(|subscriber| self.is_closed(branch, subscriber)),
            Route::Relay { via, then } => self.route_closed(via, branch, then),
        }
    }

    /// Stop `element` on `branch`, then every upstream element on that branch
    /// whose consumers have all stopped.
    fn tear_down(&mut self, branch: BranchId, element: &ElementId) {
        let mut stack = vec![element.clone()];
        while let Some(id) = stack.pop() {
            if !self.torn_down.insert((branch, id.clone())) {
                continue;
            }
            tracing::trace!("Tore down {} on {}", id, branch);
            for line in self.index.incoming(&id) {
                let upstream = line.source_id();
                if self.plan.is_ignored(&line.id) || self.is_closed(branch, upstream) {
                    continue;
                }
                let consumers_gone = self
                    .index
                    .outgoing(upstream)
                    .iter()
                    .filter(|l| !self.plan.is_ignored(&l.id))
                    .all(|l| {
                        let target = l.target_id();
                        target == &id || self.torn_down.contains(&(branch, target.clone()))
                    });
                if consumers_gone {
                    stack.push(upstream.clone());
                }
            }
        }
    }

    // ── Routing ──

    /// Fan `value` out along every usable outgoing line of its element. Each
    /// line is an independent path: consumers that already stopped on the
    /// value's branch are skipped, the others still receive it.
    fn route_outer(&mut self, value: FlowValue) {
        let lines: Vec<ConnectLine> = self
            .index
            .outgoing(&value.element_id)
            .iter()
            .filter(|l| !self.plan.is_ignored(&l.id))
            .filter(|l| !self.is_closed(value.branch_id, l.target_id()))
            .cloned()
            .collect();
        if lines.is_empty() {
            return;
        }
        self.record_all(&value, &lines);

        for line in &lines {
            let target = line.target_id();
            let Some(position) = self.plan.input_position(target, &line.id) else {
                continue;
            };
            self.pending.push_back(Delivery {
                target: target.clone(),
                inlet: Inlet::Source(position),
                value: value.clone(),
            });
        }
    }

    /// Hand an inner emission back to the operator that subscribed.
    fn route_inner(&mut self, sub: SubscriptionId, value: FlowValue) {
        let Some(subscriber) = self.subscriptions.get(&sub).cloned() else {
            tracing::warn!("Emission for unknown {} from {}", sub, value.element_id);
            return;
        };
        if self.is_closed(value.branch_id, &subscriber) {
            tracing::trace!("Dropping inner {:?} for stopped {}", value.kind, subscriber);
            return;
        }
        let lines = self.lines_between(&value.element_id, &subscriber);
        self.record_all(&value, &lines);
        self.pending.push_back(Delivery {
            target: subscriber,
            inlet: Inlet::Inner(sub),
            value,
        });
    }

    fn lines_between(&self, source: &ElementId, target: &ElementId) -> Vec<ConnectLine> {
        self.index
            .outgoing(source)
            .iter()
            .filter(|l| l.target_id() == target && !self.plan.is_ignored(&l.id))
            .cloned()
            .collect()
    }

    /// Record one traversal per line, all sharing the value's identity.
    fn record_all(&self, value: &FlowValue, lines: &[ConnectLine]) {
        let routed_onto: Vec<ConnectLineId> = lines.iter().map(|l| l.id.clone()).collect();
        for line in lines {
            let edge = FlowEdge {
                connect_line_id: line.id.clone(),
                source: line.source_id().clone(),
                target: line.target_id().clone(),
                routed_onto: routed_onto.clone(),
                tick: self.scheduler.now(),
            };
            match value.kind {
                FlowValueKind::Next => self.manager.handle_next_event(value, &edge),
                FlowValueKind::Complete => self.manager.handle_complete_event(value, &edge),
                FlowValueKind::Error if value.fatal || self.plan.is_result(&edge.target) => {
                    self.manager.handle_fatal_error(value, &edge)
                }
                FlowValueKind::Error => self.manager.handle_error(value, &edge),
            };
        }
    }

    // ── Operators ──

    fn deliver(&mut self, delivery: Delivery) {
        let Delivery {
            target,
            inlet,
            value,
        } = delivery;
        if self.skip_disabled(&target) {
            return;
        }
        if self.is_closed(value.branch_id, &target) {
            tracing::trace!("Dropping delivery to stopped {} on {}", target, value.branch_id);
            return;
        }
        let Some(node) = self.nodes.get_mut(&target) else {
            tracing::trace!("{} does not consume inbound values", target);
            return;
        };

        let mut ctx = NodeContext::new(
            &target,
            self.scheduler.now(),
            self.evaluator.as_ref(),
            &mut self.branches,
            &mut self.next_subscription,
        );
        node.on_value(inlet, value, &mut ctx);
        let effects = ctx.into_effects();
        self.apply(&target, effects);
    }

    fn apply(&mut self, element: &ElementId, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Emit(value) => {
                    if value.is_error() {
                        self.tear_down(value.branch_id, &value.element_id);
                    }
                    self.route_outer(value);
                }
                Effect::Subscribe {
                    id,
                    source,
                    branch,
                    scope,
                } => {
                    self.subscriptions.insert(id, element.clone());
                    self.subscribe(&source, branch, scope, Route::Inner(id));
                }
            }
        }
    }

    fn skip_disabled(&mut self, id: &ElementId) -> bool {
        if !self.plan.is_disabled(id) {
            return false;
        }
        if self.warned_disabled.insert(id.clone()) {
            tracing::warn!("Element {} is disabled; dropping its deliveries", id);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::element::{Element, ElementType};

    fn range_to_result(count: i64) -> Graph {
        let mut g = Graph::new();
        g.add_element(Element::new("range", ElementType::Range).with_property("count", count))
            .add_element(Element::new("result", ElementType::Result))
            .add_connect_line(ConnectLine::subscribe("l1", "range", "result"));
        g
    }

    #[test]
    fn test_run_linear_graph() {
        let sim = Simulation::with_script_engine(SimulationConfig::default());
        let summary = sim.run(&range_to_result(3)).unwrap();
        assert_eq!(summary.outcome, RunOutcome::Completed);

        let events = summary.events();
        assert_eq!(events.len(), 5);
        assert_eq!(events.iter().filter(|e| e.is_next()).count(), 3);
        assert!(events[3].is_complete() && !events[3].terminal);
        assert!(events[4].terminal);
        assert!(summary.manager.is_closed());
        assert_eq!(summary.branches_spawned, 1);
        assert!(summary.pending_elements.is_empty());
    }

    #[test]
    fn test_plan_is_cached_per_snapshot() {
        let sim = Simulation::with_script_engine(SimulationConfig::default());
        let mut g = range_to_result(1);
        let a = sim.compile(&g).unwrap();
        let b = sim.compile(&g).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        g.add_element(Element::new("range", ElementType::Range).with_property("count", 2));
        let c = sim.compile(&g).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn test_structural_error_is_raised_before_run() {
        let sim = Simulation::with_script_engine(SimulationConfig::default());
        let mut g = Graph::new();
        g.add_element(Element::new("result", ElementType::Result));
        assert!(matches!(
            sim.run(&g),
            Err(SimulationError::CreationNodeMissing { element_id: None, .. })
        ));
        assert!(sim.spawn(&g).is_err());
    }

    #[test]
    fn test_step_limit_closes_without_terminal() {
        let config = SimulationConfig {
            step_limit: 4,
            ..SimulationConfig::default()
        };
        let sim = Simulation::with_script_engine(config);
        let summary = sim.run(&range_to_result(100)).unwrap();
        assert_eq!(summary.outcome, RunOutcome::StepLimitExceeded);
        assert_eq!(summary.steps, 4);
        assert!(summary.manager.is_closed());
        assert!(summary.events().iter().all(|e| !e.terminal));
    }

    #[test]
    fn test_preset_abort_stops_before_first_step() {
        let sim = Simulation::with_script_engine(SimulationConfig::default());
        let propagation = sim
            .prepare(&range_to_result(3), Arc::new(AtomicBool::new(true)))
            .unwrap();
        let summary = propagation.run();
        assert_eq!(summary.outcome, RunOutcome::Aborted);
        assert_eq!(summary.manager.event_count(), 0);
        assert!(summary.manager.is_closed());
    }

    #[test]
    fn test_spawn_and_join() {
        let sim = Simulation::with_script_engine(SimulationConfig::default());
        let handle = sim.spawn(&range_to_result(2)).unwrap();
        let subscription = handle.events();
        let summary = handle.join().unwrap();
        assert!(summary.is_completed());
        let streamed: Vec<_> = subscription.collect();
        assert_eq!(streamed.len(), summary.events().len());
    }
}

//! Operator abstraction for the pipeline.
//!
//! Two layers:
//! - **`OperatorConfig`**: validated, immutable configuration of one element,
//!   produced once per snapshot by the compiler.
//! - **`OperatorNode`**: enum dispatch over the runtime operators. One
//!   instance per element per run holds that run's join/buffer/inner state.
//!
//! Creation elements have no `OperatorNode`: they only produce signals when
//! subscribed (see [`CreationSpec::produce`]).

use crate::config::SimulationConfig;
use crate::pipeline::element::{Element, ElementType};
use crate::pipeline::error::SimulationResult;
use crate::pipeline::id::{BranchAllocator, BranchId, ElementId, SubscriptionId};
use crate::pipeline::nodes::{
    BufferCountConfig, BufferCountNode, BufferNode, CatchErrorConfig, CatchErrorNode,
    CombineLatestNode, CreationSpec, FilterConfig, FilterNode, FlattenConfig, FlattenNode,
    ForkJoinNode, MapConfig, MapNode, MergeNode, ResultNode,
};
use crate::pipeline::value::FlowValue;
use crate::scripting::{ExpressionArgs, ExpressionEvaluator, ScriptError, ScriptResult};
use serde_json::{json, Value};

/// Where a delivery enters an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Inlet {
    /// Inbound pipe edge, by position in the element's ordered inputs.
    Source(usize),
    /// Emission of an inner subscription the operator opened.
    Inner(SubscriptionId),
}

/// Context a creation element is subscribed in. Expression parameters see
/// it as `value` / `index`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriptionScope {
    pub value: Value,
    pub index: u64,
}

impl SubscriptionScope {
    pub fn new(value: Value, index: u64) -> Self {
        Self { value, index }
    }

    /// Scope of a seed subscription.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn args(&self) -> ExpressionArgs {
        ExpressionArgs::value_index(self.value.clone(), self.index)
    }
}

/// Side effects requested by an operator, applied by the executor in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Route a value along the element's outgoing edges.
    Emit(FlowValue),
    /// Subscribe to a creation element; its emissions come back as
    /// `Inlet::Inner(id)`.
    Subscribe {
        id: SubscriptionId,
        source: ElementId,
        branch: BranchId,
        scope: SubscriptionScope,
    },
}

/// Context passed to an operator for each delivery.
pub struct NodeContext<'a> {
    pub element_id: &'a ElementId,
    /// Current virtual time.
    pub tick: u64,
    evaluator: &'a dyn ExpressionEvaluator,
    branches: &'a mut BranchAllocator,
    next_subscription: &'a mut u64,
    effects: Vec<Effect>,
}

impl<'a> NodeContext<'a> {
    pub fn new(
        element_id: &'a ElementId,
        tick: u64,
        evaluator: &'a dyn ExpressionEvaluator,
        branches: &'a mut BranchAllocator,
        next_subscription: &'a mut u64,
    ) -> Self {
        Self {
            element_id,
            tick,
            evaluator,
            branches,
            next_subscription,
            effects: Vec::new(),
        }
    }

    pub fn emit(&mut self, value: FlowValue) {
        self.effects.push(Effect::Emit(value));
    }

    /// Re-emit an inbound value from this element, unchanged.
    pub fn forward(&mut self, value: &FlowValue) {
        let forwarded = value.forward(self.element_id);
        self.emit(forwarded);
    }

    pub fn next(&mut self, raw: Value, branch: BranchId) {
        let value = FlowValue::next(raw, self.element_id.clone(), branch);
        self.emit(value);
    }

    pub fn error(&mut self, raw: Value, branch: BranchId) {
        let value = FlowValue::error(raw, self.element_id.clone(), branch);
        self.emit(value);
    }

    pub fn complete(&mut self, branch: BranchId) {
        let value = FlowValue::complete(self.element_id.clone(), branch);
        self.emit(value);
    }

    pub fn allocate_branch(&mut self) -> BranchId {
        self.branches.allocate()
    }

    pub fn subscribe(
        &mut self,
        source: &ElementId,
        branch: BranchId,
        scope: SubscriptionScope,
    ) -> SubscriptionId {
        let id = SubscriptionId(*self.next_subscription);
        *self.next_subscription += 1;
        self.effects.push(Effect::Subscribe {
            id,
            source: source.clone(),
            branch,
            scope,
        });
        id
    }

    pub fn evaluate(&self, expression: &str, args: &ExpressionArgs) -> ScriptResult<Value> {
        self.evaluator.evaluate(expression, args)
    }

    /// Payload of the in-flow error raised when an expression fails.
    pub fn expression_failure(&self, err: &ScriptError) -> Value {
        expression_failure(self.element_id, err)
    }

    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    pub fn into_effects(self) -> Vec<Effect> {
        self.effects
    }
}

pub(crate) fn expression_failure(element_id: &ElementId, err: &ScriptError) -> Value {
    json!({
        "elementId": element_id.as_str(),
        "message": err.to_string(),
    })
}

/// Validated configuration of one element.
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorConfig {
    Creation(CreationSpec),
    Map(MapConfig),
    Filter(FilterConfig),
    Buffer,
    BufferCount(BufferCountConfig),
    Flatten(FlattenConfig),
    Merge,
    CombineLatest,
    ForkJoin,
    CatchError(CatchErrorConfig),
    Result,
}

impl OperatorConfig {
    pub fn parse(
        element: &Element,
        element_type: ElementType,
        config: &SimulationConfig,
    ) -> SimulationResult<Self> {
        let op = match element_type {
            t if t.is_creation() => {
                OperatorConfig::Creation(CreationSpec::parse(element, t, config)?)
            }
            ElementType::Map => OperatorConfig::Map(MapConfig::parse(element)?),
            ElementType::Filter => OperatorConfig::Filter(FilterConfig::parse(element)?),
            ElementType::Buffer => OperatorConfig::Buffer,
            ElementType::BufferCount => {
                OperatorConfig::BufferCount(BufferCountConfig::parse(element)?)
            }
            ElementType::ConcatMap
            | ElementType::MergeMap
            | ElementType::ExhaustMap
            | ElementType::Expand => {
                OperatorConfig::Flatten(FlattenConfig::parse(element, element_type, config)?)
            }
            ElementType::Merge => OperatorConfig::Merge,
            ElementType::CombineLatest => OperatorConfig::CombineLatest,
            ElementType::ForkJoin => OperatorConfig::ForkJoin,
            ElementType::CatchError => {
                OperatorConfig::CatchError(CatchErrorConfig::parse(element)?)
            }
            _ => OperatorConfig::Result,
        };
        Ok(op)
    }

    /// Elements this configuration subscribes to.
    pub fn references(&self) -> Vec<&ElementId> {
        match self {
            OperatorConfig::Creation(spec) => spec.references(),
            OperatorConfig::Flatten(c) => vec![&c.observable],
            OperatorConfig::CatchError(c) => vec![&c.observable],
            _ => Vec::new(),
        }
    }

    pub fn is_creation(&self) -> bool {
        matches!(self, OperatorConfig::Creation(_))
    }

    /// Fresh runtime state for one run. `None` for creation elements.
    pub fn instantiate(&self, inputs: usize) -> Option<OperatorNode> {
        let node = match self {
            OperatorConfig::Creation(_) => return None,
            OperatorConfig::Map(c) => OperatorNode::Map(MapNode::new(c.clone())),
            OperatorConfig::Filter(c) => OperatorNode::Filter(FilterNode::new(c.clone())),
            OperatorConfig::Buffer => OperatorNode::Buffer(BufferNode::new()),
            OperatorConfig::BufferCount(c) => {
                OperatorNode::BufferCount(BufferCountNode::new(c.clone()))
            }
            OperatorConfig::Flatten(c) => OperatorNode::Flatten(FlattenNode::new(c.clone())),
            OperatorConfig::Merge => OperatorNode::Merge(MergeNode::new(inputs)),
            OperatorConfig::CombineLatest => {
                OperatorNode::CombineLatest(CombineLatestNode::new(inputs))
            }
            OperatorConfig::ForkJoin => OperatorNode::ForkJoin(ForkJoinNode::new(inputs)),
            OperatorConfig::CatchError(c) => {
                OperatorNode::CatchError(CatchErrorNode::new(c.clone()))
            }
            OperatorConfig::Result => OperatorNode::Result(ResultNode::new()),
        };
        Some(node)
    }
}

/// Enum dispatch for runtime operators.
#[derive(Debug)]
pub enum OperatorNode {
    Map(MapNode),
    Filter(FilterNode),
    Buffer(BufferNode),
    BufferCount(BufferCountNode),
    Flatten(FlattenNode),
    Merge(MergeNode),
    CombineLatest(CombineLatestNode),
    ForkJoin(ForkJoinNode),
    CatchError(CatchErrorNode),
    Result(ResultNode),
}

impl OperatorNode {
    pub fn name(&self) -> &'static str {
        match self {
            OperatorNode::Map(n) => n.name(),
            OperatorNode::Filter(n) => n.name(),
            OperatorNode::Buffer(n) => n.name(),
            OperatorNode::BufferCount(n) => n.name(),
            OperatorNode::Flatten(n) => n.name(),
            OperatorNode::Merge(n) => n.name(),
            OperatorNode::CombineLatest(n) => n.name(),
            OperatorNode::ForkJoin(n) => n.name(),
            OperatorNode::CatchError(n) => n.name(),
            OperatorNode::Result(n) => n.name(),
        }
    }

    pub fn on_value(&mut self, inlet: Inlet, value: FlowValue, ctx: &mut NodeContext) {
        match self {
            OperatorNode::Map(n) => n.on_value(inlet, value, ctx),
            OperatorNode::Filter(n) => n.on_value(inlet, value, ctx),
            OperatorNode::Buffer(n) => n.on_value(inlet, value, ctx),
            OperatorNode::BufferCount(n) => n.on_value(inlet, value, ctx),
            OperatorNode::Flatten(n) => n.on_value(inlet, value, ctx),
            OperatorNode::Merge(n) => n.on_value(inlet, value, ctx),
            OperatorNode::CombineLatest(n) => n.on_value(inlet, value, ctx),
            OperatorNode::ForkJoin(n) => n.on_value(inlet, value, ctx),
            OperatorNode::CatchError(n) => n.on_value(inlet, value, ctx),
            OperatorNode::Result(n) => n.on_value(inlet, value, ctx),
        }
    }

    /// Whether the operator still holds state waiting for more input
    /// (an unsatisfied join, a withheld completion).
    pub fn is_pending(&self) -> bool {
        match self {
            OperatorNode::Map(_) | OperatorNode::Filter(_) | OperatorNode::Result(_) => false,
            OperatorNode::Buffer(n) => n.is_pending(),
            OperatorNode::BufferCount(n) => n.is_pending(),
            OperatorNode::Flatten(n) => n.is_pending(),
            OperatorNode::Merge(n) => n.is_pending(),
            OperatorNode::CombineLatest(n) => n.is_pending(),
            OperatorNode::ForkJoin(n) => n.is_pending(),
            OperatorNode::CatchError(n) => n.is_pending(),
        }
    }
}

//! Higher-order mapping: merge-map, concat-map, exhaust-map, expand.
//!
//! For each outer `Next` the node subscribes to the referenced creation
//! element on a fresh branch, with the outer value as the subscription
//! scope. Inner emissions come back through `Inlet::Inner` and are re-emitted
//! from this element on the inner branch, optionally through `project`.
//!
//! | mode   | concurrency            | outer value while busy |
//! |--------|------------------------|------------------------|
//! | merge  | `concurrent` or all    | queued                 |
//! | concat | 1                      | queued                 |
//! | exhaust| 1                      | dropped                |
//! | expand | `concurrent` or all    | queued                 |
//!
//! `expand` also re-emits each outer value and feeds every inner value back
//! as a new outer value, up to `maxDepth` levels.
//!
//! The outer `Complete` is withheld until no inner is active and nothing is
//! queued. An error from the outer stream, an inner, or `project` is forwarded
//! once and ends that outer stream: its inners are dropped and no `Complete`
//! follows.

use crate::config::SimulationConfig;
use crate::pipeline::element::{Element, ElementType};
use crate::pipeline::error::{SimulationError, SimulationResult};
use crate::pipeline::id::{BranchId, ElementId, SubscriptionId};
use crate::pipeline::node::{Inlet, NodeContext, SubscriptionScope};
use crate::pipeline::value::{FlowValue, FlowValueKind};
use crate::scripting::ExpressionArgs;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlattenMode {
    Merge,
    Concat,
    Exhaust,
    Expand,
}

impl FlattenMode {
    fn from_type(element_type: ElementType) -> Option<Self> {
        match element_type {
            ElementType::MergeMap => Some(FlattenMode::Merge),
            ElementType::ConcatMap => Some(FlattenMode::Concat),
            ElementType::ExhaustMap => Some(FlattenMode::Exhaust),
            ElementType::Expand => Some(FlattenMode::Expand),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FlattenMode::Merge => "merge-map",
            FlattenMode::Concat => "concat-map",
            FlattenMode::Exhaust => "exhaust-map",
            FlattenMode::Expand => "expand",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlattenConfig {
    pub mode: FlattenMode,
    pub observable: ElementId,
    pub concurrent: Option<usize>,
    pub project: Option<String>,
    pub max_depth: usize,
}

impl FlattenConfig {
    pub fn parse(
        element: &Element,
        element_type: ElementType,
        config: &SimulationConfig,
    ) -> SimulationResult<Self> {
        let id = &element.id;
        let props = &element.properties;
        let mode = FlattenMode::from_type(element_type).ok_or_else(|| {
            SimulationError::UnsupportedElementType {
                element_id: id.clone(),
                kind: element_type.kind_name().to_string(),
                family: element_type.family(),
            }
        })?;
        let observable =
            props
                .reference("observable")
                .ok_or_else(|| SimulationError::CreationNodeMissing {
                    element_id: Some(id.clone()),
                    reference: None,
                })?;

        let concurrent = match mode {
            FlattenMode::Merge | FlattenMode::Expand => props.positive_count(id, "concurrent")?,
            FlattenMode::Concat | FlattenMode::Exhaust => Some(1),
        };
        let project = match mode {
            FlattenMode::Expand => None,
            _ => props.optional_expression(id, "project")?,
        };
        let max_depth = match mode {
            FlattenMode::Expand => props
                .positive_count(id, "maxDepth")?
                .unwrap_or(config.max_expand_depth),
            _ => 1,
        };

        Ok(Self {
            mode,
            observable,
            concurrent,
            project,
            max_depth,
        })
    }

    fn limit(&self) -> usize {
        self.concurrent.unwrap_or(usize::MAX)
    }
}

#[derive(Debug)]
struct Queued {
    value: Value,
    index: u64,
    depth: usize,
}

#[derive(Debug, Default)]
struct OuterState {
    next_index: u64,
    active: usize,
    queued: VecDeque<Queued>,
    /// Branch of the withheld outer `Complete`.
    completion: Option<BranchId>,
    done: bool,
}

#[derive(Debug)]
struct InnerState {
    position: usize,
    outer_value: Value,
    outer_index: u64,
    emitted: u64,
    depth: usize,
}

#[derive(Debug)]
pub struct FlattenNode {
    config: FlattenConfig,
    outers: HashMap<usize, OuterState>,
    inners: HashMap<SubscriptionId, InnerState>,
}

impl FlattenNode {
    pub fn new(config: FlattenConfig) -> Self {
        Self {
            config,
            outers: HashMap::new(),
            inners: HashMap::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.config.mode.name()
    }

    pub fn is_pending(&self) -> bool {
        !self.inners.is_empty()
            || self
                .outers
                .values()
                .any(|o| !o.queued.is_empty() || (o.completion.is_some() && !o.done))
    }

    pub fn on_value(&mut self, inlet: Inlet, value: FlowValue, ctx: &mut NodeContext) {
        match inlet {
            Inlet::Source(position) => self.on_outer(position, value, ctx),
            Inlet::Inner(sub) => self.on_inner(sub, value, ctx),
        }
    }

    fn on_outer(&mut self, position: usize, value: FlowValue, ctx: &mut NodeContext) {
        if self.outers.get(&position).is_some_and(|o| o.done) {
            tracing::trace!("{} ignores {:?} after finishing", ctx.element_id, value.kind);
            return;
        }
        match value.kind {
            FlowValueKind::Next => {
                if self.config.mode == FlattenMode::Expand {
                    ctx.forward(&value);
                }
                self.offer(position, value.payload(), 1, ctx);
            }
            FlowValueKind::Error => {
                ctx.forward(&value);
                self.fail(position);
            }
            FlowValueKind::Complete => {
                let outer = self.outers.entry(position).or_default();
                if outer.completion.is_none() {
                    outer.completion = Some(value.branch_id);
                }
                self.maybe_complete(position, ctx);
            }
        }
    }

    /// Start an inner for `payload` now, queue it, or drop it (exhaust).
    fn offer(&mut self, position: usize, payload: Value, depth: usize, ctx: &mut NodeContext) {
        let limit = self.config.limit();
        let mode = self.config.mode;
        let outer = self.outers.entry(position).or_default();
        let index = outer.next_index;
        outer.next_index += 1;

        if outer.active < limit {
            self.start_inner(position, payload, index, depth, ctx);
        } else if mode == FlattenMode::Exhaust {
            tracing::trace!(
                "{} {} busy, dropping outer value {}",
                mode.name(),
                ctx.element_id,
                index
            );
        } else {
            outer.queued.push_back(Queued {
                value: payload,
                index,
                depth,
            });
        }
    }

    fn start_inner(
        &mut self,
        position: usize,
        outer_value: Value,
        outer_index: u64,
        depth: usize,
        ctx: &mut NodeContext,
    ) {
        let branch = ctx.allocate_branch();
        let scope = SubscriptionScope::new(outer_value.clone(), outer_index);
        let sub = ctx.subscribe(&self.config.observable, branch, scope);
        self.outers.entry(position).or_default().active += 1;
        self.inners.insert(
            sub,
            InnerState {
                position,
                outer_value,
                outer_index,
                emitted: 0,
                depth,
            },
        );
    }

    fn on_inner(&mut self, sub: SubscriptionId, value: FlowValue, ctx: &mut NodeContext) {
        let Some(inner) = self.inners.get_mut(&sub) else {
            tracing::trace!("{} ignores value from finished {}", ctx.element_id, sub);
            return;
        };

        match value.kind {
            FlowValueKind::Next => {
                let index = inner.emitted;
                inner.emitted += 1;
                let (position, depth) = (inner.position, inner.depth);

                let projected = match &self.config.project {
                    Some(project) => {
                        let args = ExpressionArgs::value_index(value.payload(), index)
                            .with("outerValue", inner.outer_value.clone())
                            .with("outerIndex", inner.outer_index);
                        ctx.evaluate(project, &args).map(Some)
                    }
                    None => Ok(None),
                };
                match projected {
                    Ok(Some(projected)) => ctx.next(projected, value.branch_id),
                    Ok(None) => ctx.forward(&value),
                    Err(e) => {
                        let payload = ctx.expression_failure(&e);
                        ctx.error(payload, value.branch_id);
                        self.fail(position);
                        return;
                    }
                }

                if self.config.mode == FlattenMode::Expand {
                    if depth < self.config.max_depth {
                        self.offer(position, value.payload(), depth + 1, ctx);
                    } else {
                        tracing::debug!(
                            "expand {} reached max depth {}",
                            ctx.element_id,
                            self.config.max_depth
                        );
                    }
                }
            }
            FlowValueKind::Error => {
                let position = inner.position;
                ctx.forward(&value);
                self.fail(position);
            }
            FlowValueKind::Complete => self.finish_inner(sub, ctx),
        }
    }

    /// End the outer stream at `position` after an error.
    fn fail(&mut self, position: usize) {
        let outer = self.outers.entry(position).or_default();
        outer.done = true;
        outer.active = 0;
        outer.queued.clear();
        self.inners.retain(|_, inner| inner.position != position);
    }

    fn finish_inner(&mut self, sub: SubscriptionId, ctx: &mut NodeContext) {
        let Some(inner) = self.inners.remove(&sub) else {
            return;
        };
        let position = inner.position;
        let limit = self.config.limit();

        let mut outer = self.outers.entry(position).or_default();
        outer.active = outer.active.saturating_sub(1);
        while outer.active < limit {
            let Some(queued) = outer.queued.pop_front() else {
                break;
            };
            self.start_inner(position, queued.value, queued.index, queued.depth, ctx);
            outer = self.outers.entry(position).or_default();
        }
        self.maybe_complete(position, ctx);
    }

    fn maybe_complete(&mut self, position: usize, ctx: &mut NodeContext) {
        let outer = self.outers.entry(position).or_default();
        if outer.done || outer.active > 0 || !outer.queued.is_empty() {
            return;
        }
        if let Some(branch) = outer.completion {
            outer.done = true;
            ctx.complete(branch);
        }
    }
}

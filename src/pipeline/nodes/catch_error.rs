//! catch-error: replaces a failed stream with a referenced creation element.
//!
//! A non-fatal `Error` on an input is intercepted. When there is no
//! `selector`, or it evaluates truthy for `(value, error, index)`, the node
//! subscribes to `observable` on a fresh branch and re-emits its values; the
//! replacement's `Complete` completes the original branch. A falsy or failing
//! selector lets the error through marked fatal.

use crate::pipeline::element::Element;
use crate::pipeline::error::{SimulationError, SimulationResult};
use crate::pipeline::id::{BranchId, ElementId, SubscriptionId};
use crate::pipeline::node::{Inlet, NodeContext, SubscriptionScope};
use crate::pipeline::value::{FlowValue, FlowValueKind};
use crate::scripting::{is_truthy, ExpressionArgs};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq)]
pub struct CatchErrorConfig {
    pub observable: ElementId,
    pub selector: Option<String>,
}

impl CatchErrorConfig {
    pub fn parse(element: &Element) -> SimulationResult<Self> {
        let observable = element.properties.reference("observable").ok_or_else(|| {
            SimulationError::CreationNodeMissing {
                element_id: Some(element.id.clone()),
                reference: None,
            }
        })?;
        Ok(Self {
            observable,
            selector: element
                .properties
                .optional_expression(&element.id, "selector")?,
        })
    }
}

#[derive(Debug)]
struct Replacement {
    original_branch: BranchId,
}

#[derive(Debug)]
pub struct CatchErrorNode {
    config: CatchErrorConfig,
    /// Inputs already replaced; their later values are ignored.
    switched: HashSet<usize>,
    replacements: HashMap<SubscriptionId, Replacement>,
    caught: u64,
}

impl CatchErrorNode {
    pub fn new(config: CatchErrorConfig) -> Self {
        Self {
            config,
            switched: HashSet::new(),
            replacements: HashMap::new(),
            caught: 0,
        }
    }

    pub fn name(&self) -> &'static str {
        "catch-error"
    }

    pub fn is_pending(&self) -> bool {
        !self.replacements.is_empty()
    }

    pub fn on_value(&mut self, inlet: Inlet, value: FlowValue, ctx: &mut NodeContext) {
        match inlet {
            Inlet::Source(position) => self.on_source(position, value, ctx),
            Inlet::Inner(sub) => self.on_replacement(sub, value, ctx),
        }
    }

    fn on_source(&mut self, position: usize, value: FlowValue, ctx: &mut NodeContext) {
        if self.switched.contains(&position) {
            tracing::trace!("catch-error {} ignores replaced input {}", ctx.element_id, position);
            return;
        }
        if !value.is_error() || value.fatal {
            ctx.forward(&value);
            return;
        }

        let index = self.caught;
        self.caught += 1;
        let error = value.payload();

        let recover = match &self.config.selector {
            None => true,
            Some(selector) => {
                let args = ExpressionArgs::value_index(error.clone(), index).with("error", error.clone());
                match ctx.evaluate(selector, &args) {
                    Ok(verdict) => is_truthy(&verdict),
                    Err(e) => {
                        tracing::debug!("catch-error {} selector failed: {}", ctx.element_id, e);
                        false
                    }
                }
            }
        };

        if recover {
            let branch = ctx.allocate_branch();
            let scope = SubscriptionScope::new(error, index);
            let sub = ctx.subscribe(&self.config.observable, branch, scope);
            self.switched.insert(position);
            self.replacements.insert(
                sub,
                Replacement {
                    original_branch: value.branch_id,
                },
            );
            tracing::debug!(
                "catch-error {} recovered {} via {} on {}",
                ctx.element_id,
                value.branch_id,
                self.config.observable,
                branch
            );
        } else {
            let fatal = value.forward(ctx.element_id).into_fatal();
            ctx.emit(fatal);
        }
    }

    fn on_replacement(&mut self, sub: SubscriptionId, value: FlowValue, ctx: &mut NodeContext) {
        let Some(replacement) = self.replacements.get(&sub) else {
            return;
        };
        let original_branch = replacement.original_branch;
        match value.kind {
            FlowValueKind::Next => ctx.forward(&value),
            FlowValueKind::Error => {
                self.replacements.remove(&sub);
                ctx.forward(&value);
            }
            FlowValueKind::Complete => {
                self.replacements.remove(&sub);
                ctx.complete(original_branch);
            }
        }
    }
}

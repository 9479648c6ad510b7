//! Map operator: projects every `Next` through an expression.

use crate::pipeline::element::Element;
use crate::pipeline::error::SimulationResult;
use crate::pipeline::node::{Inlet, NodeContext};
use crate::pipeline::value::FlowValue;
use crate::scripting::ExpressionArgs;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct MapConfig {
    pub project: String,
}

impl MapConfig {
    pub fn parse(element: &Element) -> SimulationResult<Self> {
        Ok(Self {
            project: element.properties.expression(&element.id, "project")?,
        })
    }
}

/// Exactly one output per `Next`, evaluated with `(value, index)`.
#[derive(Debug)]
pub struct MapNode {
    config: MapConfig,
    /// Next count per input position.
    indices: HashMap<usize, u64>,
}

impl MapNode {
    pub fn new(config: MapConfig) -> Self {
        Self {
            config,
            indices: HashMap::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        "map"
    }

    pub fn on_value(&mut self, inlet: Inlet, value: FlowValue, ctx: &mut NodeContext) {
        let Inlet::Source(position) = inlet else {
            return;
        };
        if !value.is_next() {
            ctx.forward(&value);
            return;
        }

        let index = self.indices.entry(position).or_insert(0);
        let args = ExpressionArgs::value_index(value.payload(), *index);
        *index += 1;

        match ctx.evaluate(&self.config.project, &args) {
            Ok(projected) => ctx.next(projected, value.branch_id),
            Err(e) => {
                tracing::debug!("map {} failed: {}", ctx.element_id, e);
                let payload = ctx.expression_failure(&e);
                ctx.error(payload, value.branch_id);
            }
        }
    }
}

//! Filter operator.
//!
//! Passes a `Next` through unchanged when `predicate` is truthy for
//! `(value, index)`. Errors and completes pass through.

use crate::pipeline::element::Element;
use crate::pipeline::error::SimulationResult;
use crate::pipeline::node::{Inlet, NodeContext};
use crate::pipeline::value::FlowValue;
use crate::scripting::{is_truthy, ExpressionArgs};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct FilterConfig {
    pub predicate: String,
}

impl FilterConfig {
    pub fn parse(element: &Element) -> SimulationResult<Self> {
        Ok(Self {
            predicate: element.properties.expression(&element.id, "predicate")?,
        })
    }
}

#[derive(Debug)]
pub struct FilterNode {
    config: FilterConfig,
    indices: HashMap<usize, u64>,
}

impl FilterNode {
    pub fn new(config: FilterConfig) -> Self {
        Self {
            config,
            indices: HashMap::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        "filter"
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

        match ctx.evaluate(&self.config.predicate, &args) {
            Ok(verdict) if is_truthy(&verdict) => ctx.forward(&value),
            Ok(_) => {}
            Err(e) => {
                let payload = ctx.expression_failure(&e);
                ctx.error(payload, value.branch_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::element::ElementType;
    use crate::pipeline::id::{BranchAllocator, BranchId, ElementId};
    use crate::pipeline::node::Effect;
    use crate::scripting::{MockExpressionEvaluator, ScriptError};
    use serde_json::json;

    fn filter() -> FilterNode {
        let el = Element::new("f", ElementType::Filter).with_property("predicate", "value > 2");
        FilterNode::new(FilterConfig::parse(&el).unwrap())
    }

    #[test]
    fn test_keeps_matching_values() {
        let mut evaluator = MockExpressionEvaluator::new();
        evaluator
            .expect_evaluate()
            .returning(|_, args| Ok(json!(args.get("value").and_then(|v| v.as_i64()) > Some(2))));

        let mut node = filter();
        let mut branches = BranchAllocator::new();
        let mut next_sub = 0;
        let id = ElementId::from("f");
        let mut kept = Vec::new();
        for n in 1..=3 {
            let mut ctx = NodeContext::new(&id, 0, &evaluator, &mut branches, &mut next_sub);
            let input = FlowValue::next(json!(n), ElementId::from("of"), BranchId(0));
            node.on_value(Inlet::Source(0), input, &mut ctx);
            kept.extend(ctx.into_effects());
        }
        assert_eq!(kept.len(), 1);
        assert!(matches!(&kept[0], Effect::Emit(v) if v.payload() == json!(3)));
    }

    #[test]
    fn test_predicate_failure_is_error() {
        let mut evaluator = MockExpressionEvaluator::new();
        evaluator.expect_evaluate().times(1).returning(|expr, _| {
            Err(ScriptError::Runtime {
                expression: expr.to_string(),
                message: "boom".to_string(),
            })
        });
        let mut node = filter();
        let mut branches = BranchAllocator::new();
        let mut next_sub = 0;
        let id = ElementId::from("f");
        let mut ctx = NodeContext::new(&id, 0, &evaluator, &mut branches, &mut next_sub);
        let input = FlowValue::next(json!(1), ElementId::from("of"), BranchId(2));
        node.on_value(Inlet::Source(0), input, &mut ctx);
        let effects = ctx.into_effects();
        assert!(matches!(&effects[..], [Effect::Emit(v)] if v.is_error() && v.branch_id == BranchId(2)));
    }
}

//! Result sink: the terminal element.
//!
//! Traversals into a result are recorded while routing (an `Error` arriving
//! here is recorded fatal). The node itself only keeps per-branch totals for
//! diagnostics and never forwards.

use crate::pipeline::id::BranchId;
use crate::pipeline::node::{Inlet, NodeContext};
use crate::pipeline::value::{FlowValue, FlowValueKind};
use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct ResultNode {
    received: u64,
    finished: HashSet<BranchId>,
    failed: HashSet<BranchId>,
}

impl ResultNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(&self) -> &'static str {
        "result"
    }

    pub fn on_value(&mut self, _inlet: Inlet, value: FlowValue, ctx: &mut NodeContext) {
        self.received += 1;
        match value.kind {
            FlowValueKind::Next => {}
            FlowValueKind::Complete => {
                self.finished.insert(value.branch_id);
            }
            FlowValueKind::Error => {
                tracing::debug!("result {} received error on {}", ctx.element_id, value.branch_id);
                self.failed.insert(value.branch_id);
            }
        }
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn finished_branches(&self) -> usize {
        self.finished.len()
    }

    pub fn failed_branches(&self) -> usize {
        self.failed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::id::{BranchAllocator, ElementId};
    use crate::scripting::MockExpressionEvaluator;
    use serde_json::json;

    #[test]
    fn test_result_never_forwards() {
        let evaluator = MockExpressionEvaluator::new();
        let mut branches = BranchAllocator::new();
        let mut next_sub = 0;
        let id = ElementId::from("res");
        let mut node = ResultNode::new();

        let values = [
            FlowValue::next(json!(1), ElementId::from("a"), BranchId(0)),
            FlowValue::error(json!("x"), ElementId::from("a"), BranchId(1)),
            FlowValue::complete(ElementId::from("a"), BranchId(0)),
        ];
        for v in values {
            let mut ctx = NodeContext::new(&id, 0, &evaluator, &mut branches, &mut next_sub);
            node.on_value(Inlet::Source(0), v, &mut ctx);
            assert!(ctx.effects().is_empty());
        }
        assert_eq!(node.received(), 3);
        assert_eq!(node.finished_branches(), 1);
        assert_eq!(node.failed_branches(), 1);
    }
}

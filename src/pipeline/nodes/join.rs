//! Join-creation operators over ordered inputs: merge, combine-latest,
//! fork-join.
//!
//! Inputs are positions in the element's inbound edges ordered by edge
//! `index`. Composites are JSON arrays in that order and are emitted on a
//! join branch allocated the first time one is produced.

use crate::pipeline::id::BranchId;
use crate::pipeline::node::{Inlet, NodeContext};
use crate::pipeline::value::{FlowValue, FlowValueKind};
use serde_json::Value;
use std::collections::HashSet;

/// Forwards every value with its originating branch; completes once every
/// input completed. The first input error is forwarded and ends the merge.
#[derive(Debug)]
pub struct MergeNode {
    inputs: usize,
    finished: HashSet<usize>,
    done: bool,
}

impl MergeNode {
    pub fn new(inputs: usize) -> Self {
        Self {
            inputs,
            finished: HashSet::new(),
            done: false,
        }
    }

    pub fn name(&self) -> &'static str {
        "merge"
    }

    pub fn is_pending(&self) -> bool {
        !self.done && !self.finished.is_empty()
    }

    pub fn on_value(&mut self, inlet: Inlet, value: FlowValue, ctx: &mut NodeContext) {
        let Inlet::Source(position) = inlet else {
            return;
        };
        if self.done {
            return;
        }
        match value.kind {
            FlowValueKind::Next => ctx.forward(&value),
            FlowValueKind::Error => {
                self.done = true;
                ctx.forward(&value);
            }
            FlowValueKind::Complete => {
                self.finished.insert(position);
                if self.finished.len() >= self.inputs {
                    self.done = true;
                    ctx.complete(value.branch_id);
                }
            }
        }
    }
}

/// Shared bookkeeping for combine-latest and fork-join.
#[derive(Debug)]
struct JoinState {
    values: Vec<Option<Value>>,
    completed: HashSet<usize>,
    branch: Option<BranchId>,
    done: bool,
}

impl JoinState {
    fn new(inputs: usize) -> Self {
        Self {
            values: vec![None; inputs],
            completed: HashSet::new(),
            branch: None,
            done: false,
        }
    }

    fn all_present(&self) -> bool {
        self.values.iter().all(Option::is_some)
    }

    fn composite(&self) -> Value {
        Value::Array(
            self.values
                .iter()
                .map(|v| v.clone().unwrap_or(Value::Null))
                .collect(),
        )
    }

    fn join_branch(&mut self, ctx: &mut NodeContext) -> BranchId {
        *self.branch.get_or_insert_with(|| ctx.allocate_branch())
    }

    fn is_pending(&self) -> bool {
        !self.done && (self.values.iter().any(Option::is_some) || !self.completed.is_empty())
    }

    /// Error forwarding and empty completion, common to both joins. Returns
    /// `true` when the value was fully handled.
    fn settle(&mut self, position: usize, value: &FlowValue, ctx: &mut NodeContext) -> bool {
        if self.done || position >= self.values.len() {
            return true;
        }
        match value.kind {
            FlowValueKind::Error => {
                self.done = true;
                ctx.forward(value);
                true
            }
            FlowValueKind::Complete if self.values[position].is_none() => {
                self.done = true;
                let branch = self.branch.unwrap_or(value.branch_id);
                ctx.complete(branch);
                true
            }
            _ => false,
        }
    }
}

/// Withholds until every input produced, then re-emits the latest values on
/// every further `Next`.
#[derive(Debug)]
pub struct CombineLatestNode {
    state: JoinState,
}

impl CombineLatestNode {
    pub fn new(inputs: usize) -> Self {
        Self {
            state: JoinState::new(inputs),
        }
    }

    pub fn name(&self) -> &'static str {
        "combine-latest"
    }

    pub fn is_pending(&self) -> bool {
        self.state.is_pending()
    }

    pub fn on_value(&mut self, inlet: Inlet, value: FlowValue, ctx: &mut NodeContext) {
        let Inlet::Source(position) = inlet else {
            return;
        };
        if self.state.settle(position, &value, ctx) {
            return;
        }
        match value.kind {
            FlowValueKind::Next => {
                self.state.values[position] = Some(value.payload());
                if self.state.all_present() {
                    let branch = self.state.join_branch(ctx);
                    ctx.next(self.state.composite(), branch);
                }
            }
            FlowValueKind::Complete => {
                self.state.completed.insert(position);
                if self.state.completed.len() >= self.state.values.len() {
                    self.state.done = true;
                    let branch = self.state.join_branch(ctx);
                    ctx.complete(branch);
                }
            }
            FlowValueKind::Error => {}
        }
    }
}

/// Emits one composite of the last values, then completes, once every input
/// completed.
#[derive(Debug)]
pub struct ForkJoinNode {
    state: JoinState,
}

impl ForkJoinNode {
    pub fn new(inputs: usize) -> Self {
        Self {
            state: JoinState::new(inputs),
        }
    }

    pub fn name(&self) -> &'static str {
        "fork-join"
    }

    pub fn is_pending(&self) -> bool {
        self.state.is_pending()
    }

    pub fn on_value(&mut self, inlet: Inlet, value: FlowValue, ctx: &mut NodeContext) {
        let Inlet::Source(position) = inlet else {
            return;
        };
        if self.state.settle(position, &value, ctx) {
            return;
        }
        match value.kind {
            FlowValueKind::Next => {
                self.state.values[position] = Some(value.payload());
            }
            FlowValueKind::Complete => {
                self.state.completed.insert(position);
                if self.state.completed.len() >= self.state.values.len() {
                    self.state.done = true;
                    let branch = self.state.join_branch(ctx);
                    ctx.next(self.state.composite(), branch);
                    ctx.complete(branch);
                }
            }
            FlowValueKind::Error => {}
        }
    }
}

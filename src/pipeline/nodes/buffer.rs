//! Buffering operators.
//!
//! - `buffer`: input 0 is the source, input 1 the closing notifier. Every
//!   notifier `Next` emits what was collected since the previous one.
//! - `buffer-count`: fixed-size windows, a new one opened every
//!   `startBufferEvery` values (overlapping when smaller than `bufferSize`).

use crate::pipeline::element::Element;
use crate::pipeline::error::SimulationResult;
use crate::pipeline::id::BranchId;
use crate::pipeline::node::{Inlet, NodeContext};
use crate::pipeline::value::{FlowValue, FlowValueKind};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};

const SOURCE: usize = 0;
const NOTIFIER: usize = 1;

#[derive(Debug, Default)]
pub struct BufferNode {
    buffer: Vec<Value>,
    source_branch: Option<BranchId>,
    completed: bool,
}

impl BufferNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(&self) -> &'static str {
        "buffer"
    }

    pub fn is_pending(&self) -> bool {
        !self.completed && !self.buffer.is_empty()
    }

    pub fn on_value(&mut self, inlet: Inlet, value: FlowValue, ctx: &mut NodeContext) {
        let Inlet::Source(position) = inlet else {
            return;
        };
        if self.completed {
            return;
        }

        match (position, value.kind) {
            (SOURCE, FlowValueKind::Next) => {
                self.source_branch = Some(value.branch_id);
                self.buffer.push(value.payload());
            }
            (SOURCE, FlowValueKind::Complete) => {
                self.completed = true;
                if !self.buffer.is_empty() {
                    let flushed = std::mem::take(&mut self.buffer);
                    ctx.next(Value::Array(flushed), value.branch_id);
                }
                ctx.complete(value.branch_id);
            }
            (NOTIFIER, FlowValueKind::Next) => {
                let branch = self.source_branch.unwrap_or(value.branch_id);
                let flushed = std::mem::take(&mut self.buffer);
                ctx.next(Value::Array(flushed), branch);
            }
            (NOTIFIER, FlowValueKind::Complete) => {}
            (_, FlowValueKind::Error) => ctx.forward(&value),
            _ => tracing::trace!("buffer {} ignores input {}", ctx.element_id, position),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BufferCountConfig {
    pub size: usize,
    pub every: usize,
}

impl BufferCountConfig {
    pub fn parse(element: &Element) -> SimulationResult<Self> {
        let props = &element.properties;
        let size = props
            .positive_count(&element.id, "bufferSize")?
            .ok_or_else(|| {
                crate::pipeline::error::SimulationError::invalid_property(
                    &element.id,
                    "bufferSize",
                    "required value is missing",
                )
            })?;
        let every = props
            .positive_count(&element.id, "startBufferEvery")?
            .unwrap_or(size);
        Ok(Self { size, every })
    }
}

#[derive(Debug, Default)]
struct Windows {
    open: VecDeque<Vec<Value>>,
    seen: usize,
}

#[derive(Debug)]
pub struct BufferCountNode {
    config: BufferCountConfig,
    windows: HashMap<usize, Windows>,
}

impl BufferCountNode {
    pub fn new(config: BufferCountConfig) -> Self {
        Self {
            config,
            windows: HashMap::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        "buffer-count"
    }

    pub fn is_pending(&self) -> bool {
        self.windows
            .values()
            .any(|w| w.open.iter().any(|b| !b.is_empty()))
    }

    pub fn on_value(&mut self, inlet: Inlet, value: FlowValue, ctx: &mut NodeContext) {
        let Inlet::Source(position) = inlet else {
            return;
        };
        let windows = self.windows.entry(position).or_default();

        match value.kind {
            FlowValueKind::Next => {
                if windows.seen % self.config.every == 0 {
                    windows.open.push_back(Vec::new());
                }
                windows.seen += 1;
                let payload = value.payload();
                for window in windows.open.iter_mut() {
                    window.push(payload.clone());
                }
                while windows
                    .open
                    .front()
                    .is_some_and(|w| w.len() >= self.config.size)
                {
                    if let Some(full) = windows.open.pop_front() {
                        ctx.next(Value::Array(full), value.branch_id);
                    }
                }
            }
            FlowValueKind::Complete => {
                for window in windows.open.drain(..) {
                    if !window.is_empty() {
                        ctx.next(Value::Array(window), value.branch_id);
                    }
                }
                ctx.forward(&value);
            }
            FlowValueKind::Error => {
                windows.open.clear();
                ctx.forward(&value);
            }
        }
    }
}

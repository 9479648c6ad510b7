//! Flow manager: sequences, records and republishes flow events.
//!
//! The manager owns the logical clock. Every accepted traversal gets the next
//! `time`, is appended to the run's log, and is pushed to every subscriber.
//! Subscribing replays the full log first, so a consumer that attaches after
//! the run finished still sees the whole sequence followed by `Closed`.

use crate::pipeline::event::{FlowEdge, FlowNotification, FlowValueEvent};
use crate::pipeline::id::{BranchId, ElementId, FlowValueId};
use crate::pipeline::value::{FlowValue, FlowValueKind};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Default)]
struct ManagerState {
    clock: u64,
    log: Vec<FlowValueEvent>,
    subscribers: Vec<Sender<FlowNotification>>,
    outbound_index: HashMap<ElementId, u64>,
    /// (branch, element) paths whose error reached a result
    halted: HashSet<(BranchId, ElementId)>,
    closed: bool,
}

impl ManagerState {
    fn tick_clock(&mut self) -> u64 {
        let t = self.clock;
        self.clock += 1;
        t
    }

    fn publish(&mut self, event: FlowValueEvent) {
        self.subscribers
            .retain(|tx| tx.send(FlowNotification::Event(event.clone())).is_ok());
        self.log.push(event);
    }
}

/// Propagation coordinator handle. Cheap to clone; clones share one log.
#[derive(Clone, Default)]
pub struct FlowManager {
    state: Arc<Mutex<ManagerState>>,
}

impl FlowManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, value: &FlowValue, edge: &FlowEdge, fatal: bool) -> Option<FlowValueEvent> {
        let mut state = self.lock();
        if state.closed {
            tracing::warn!(
                "Dropping {:?} on {} after the stream closed",
                value.kind,
                edge.connect_line_id
            );
            return None;
        }

        let time = state.tick_clock();
        let counter = state.outbound_index.entry(edge.source.clone()).or_insert(0);
        let index = *counter;
        *counter += 1;

        let event = FlowValueEvent {
            id: value.id,
            hash: value.hash.clone(),
            index,
            connect_lines_id: edge.routed_onto.clone(),
            connect_line_id: Some(edge.connect_line_id.clone()),
            source_element_id: Some(edge.source.clone()),
            target_element_id: Some(edge.target.clone()),
            time,
            tick: edge.tick,
            kind: value.kind,
            raw: value.raw.clone(),
            branch_id: Some(value.branch_id),
            fatal,
            terminal: false,
        };
        tracing::trace!("{}", event.summary());
        state.publish(event.clone());
        Some(event)
    }

    /// Record a `Next` traversal of `value` across `edge`.
    pub fn handle_next_event(&self, value: &FlowValue, edge: &FlowEdge) -> Option<FlowValueEvent> {
        self.record(value, edge, false)
    }

    /// Record a recoverable error traversal.
    pub fn handle_error(&self, value: &FlowValue, edge: &FlowEdge) -> Option<FlowValueEvent> {
        self.record(value, edge, false)
    }

    /// Record an error that escaped interception. Halts the path that carried
    /// it: the edge's source on the value's branch. Sibling fan-out paths of
    /// the same branch are unaffected.
    pub fn handle_fatal_error(
        &self,
        value: &FlowValue,
        edge: &FlowEdge,
    ) -> Option<FlowValueEvent> {
        let event = self.record(value, edge, true);
        if event.is_some() {
            self.halt_path(value.branch_id, &edge.source);
        }
        event
    }

    /// Record a per-edge completion traversal.
    pub fn handle_complete_event(
        &self,
        value: &FlowValue,
        edge: &FlowEdge,
    ) -> Option<FlowValueEvent> {
        self.record(value, edge, false)
    }

    /// Emit the terminal `Complete` and close the stream.
    pub fn handle_complete(&self) -> Option<FlowValueEvent> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }
        let time = state.tick_clock();
        let id = FlowValueId::random();
        let tick = state.log.last().map(|e| e.tick).unwrap_or(0);
        let event = FlowValueEvent {
            id,
            hash: id.correlation_hash(),
            index: 0,
            connect_lines_id: Vec::new(),
            connect_line_id: None,
            source_element_id: None,
            target_element_id: None,
            time,
            tick,
            kind: FlowValueKind::Complete,
            raw: None,
            branch_id: None,
            fatal: false,
            terminal: true,
        };
        state.publish(event.clone());
        Self::close_locked(&mut state);
        Some(event)
    }

    /// Close without a terminal event (aborted runs).
    pub fn close(&self) {
        let mut state = self.lock();
        if !state.closed {
            Self::close_locked(&mut state);
        }
    }

    fn close_locked(state: &mut ManagerState) {
        state.closed = true;
        for tx in state.subscribers.drain(..) {
            let _ = tx.send(FlowNotification::Closed);
        }
    }

    /// Mark the output of `element` on `branch` as terminated.
    pub fn halt_path(&self, branch: BranchId, element: &ElementId) {
        if self.lock().halted.insert((branch, element.clone())) {
            tracing::debug!("Path {} on {} halted", element, branch);
        }
    }

    pub fn is_halted(&self, branch: BranchId, element: &ElementId) -> bool {
        self.lock().halted.contains(&(branch, element.clone()))
    }

    /// Subscribe to the stream. The full history is replayed first.
    pub fn as_observable(&self) -> FlowSubscription {
        let mut state = self.lock();
        let (tx, rx) = unbounded();
        for event in &state.log {
            let _ = tx.send(FlowNotification::Event(event.clone()));
        }
        if state.closed {
            let _ = tx.send(FlowNotification::Closed);
        } else {
            state.subscribers.push(tx);
        }
        FlowSubscription { rx, closed: false }
    }

    /// Snapshot of the log so far.
    pub fn events(&self) -> Vec<FlowValueEvent> {
        self.lock().log.clone()
    }

    pub fn event_count(&self) -> usize {
        self.lock().log.len()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl std::fmt::Debug for FlowManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("FlowManager")
            .field("clock", &state.clock)
            .field("events", &state.log.len())
            .field("subscribers", &state.subscribers.len())
            .field("closed", &state.closed)
            .finish()
    }
}

/// Subscriber side of the event stream.
///
/// Iterating blocks until the next event and ends at `Closed` (or when the
/// manager is dropped).
pub struct FlowSubscription {
    rx: Receiver<FlowNotification>,
    closed: bool,
}

impl FlowSubscription {
    /// Try to receive a single notification without blocking.
    pub fn try_recv(&self) -> Option<FlowNotification> {
        self.rx.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<FlowNotification> {
        match self.rx.recv_timeout(timeout) {
            Ok(n) => Some(n),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Drain all pending notifications.
    pub fn drain(&self) -> Vec<FlowNotification> {
        let mut out = Vec::new();
        while let Ok(n) = self.rx.try_recv() {
            out.push(n);
        }
        out
    }
}

impl Iterator for FlowSubscription {
    type Item = FlowValueEvent;

    fn next(&mut self) -> Option<FlowValueEvent> {
        if self.closed {
            return None;
        }
        match self.rx.recv() {
            Ok(FlowNotification::Event(event)) => Some(event),
            Ok(FlowNotification::Closed) | Err(_) => {
                self.closed = true;
                None
            }
        }
    }
}

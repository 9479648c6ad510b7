//! Virtual-time scheduler for creation emissions.
//!
//! Creation elements produce timed signals relative to the tick they were
//! subscribed at. The scheduler hands them back in `(due tick, sequence)`
//! order, so emissions due at the same tick keep the order they were
//! scheduled in. Time only moves forward, and only when the next emission
//! is popped; it is unrelated to wall-clock time.
//!
//! Counted sequences are scheduled one position at a time. The follow-up of
//! a popped position inherits its sequence number, so it sorts exactly where
//! it would have if the whole sequence had been scheduled up front.

use crate::pipeline::id::{BranchId, ElementId, SubscriptionId};
use crate::pipeline::nodes::Sequence;
use crate::pipeline::value::Signal;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// How a creation emission reaches its consumers.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// Along the element's own outgoing edges (a seed).
    Outer,
    /// Back into the operator that opened the subscription.
    Inner(SubscriptionId),
    /// Through a delegating element (`defer`, `iif`), then onwards.
    Relay { via: ElementId, then: Box<Route> },
}

/// Position of an emission within its counted sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    pub sequence: Sequence,
    pub position: u64,
}

impl Cursor {
    pub fn start(sequence: Sequence) -> Self {
        Self {
            sequence,
            position: 0,
        }
    }

    pub fn signal(&self) -> Signal {
        self.sequence.signal(self.position)
    }

    /// The next position and its delay after this one.
    pub fn advance(&self) -> Option<(u64, Cursor)> {
        let next = self.sequence.following(self.position)?;
        let delay = self
            .sequence
            .delay(next)
            .saturating_sub(self.sequence.delay(self.position));
        Some((
            delay,
            Cursor {
                sequence: self.sequence.clone(),
                position: next,
            },
        ))
    }
}

/// One signal waiting for its tick.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledEmission {
    pub source: ElementId,
    pub branch: BranchId,
    pub signal: Signal,
    pub route: Route,
    /// Set when the signal is one position of a counted sequence.
    pub cursor: Option<Cursor>,
}

impl ScheduledEmission {
    /// The emission for the position after this one, with its delay.
    pub fn following(&self) -> Option<(u64, ScheduledEmission)> {
        let (delay, cursor) = self.cursor.as_ref()?.advance()?;
        Some((
            delay,
            ScheduledEmission {
                source: self.source.clone(),
                branch: self.branch,
                signal: cursor.signal(),
                route: self.route.clone(),
                cursor: Some(cursor),
            },
        ))
    }
}

#[derive(Debug)]
struct Entry {
    due: u64,
    seq: u64,
    /// Position within a sequence sharing `seq`
    part: u64,
    emission: ScheduledEmission,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq && self.part == other.part
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap on (due, seq, part)
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
            .then_with(|| other.part.cmp(&self.part))
    }
}

#[derive(Debug, Default)]
pub struct Scheduler {
    queue: BinaryHeap<Entry>,
    now: u64,
    next_seq: u64,
    /// `(seq, part)` of the last popped entry
    popped: Option<(u64, u64)>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time.
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Schedule `emission` `delay` ticks from now.
    pub fn schedule(&mut self, delay: u64, emission: ScheduledEmission) {
        let entry = Entry {
            due: self.now.saturating_add(delay),
            seq: self.next_seq,
            part: 0,
            emission,
        };
        self.next_seq += 1;
        self.queue.push(entry);
    }

    /// Schedule the follow-up of the last popped emission `delay` ticks from
    /// now, in its predecessor's sequence slot.
    pub fn schedule_following(&mut self, delay: u64, emission: ScheduledEmission) {
        let Some((seq, part)) = self.popped else {
            self.schedule(delay, emission);
            return;
        };
        self.queue.push(Entry {
            due: self.now.saturating_add(delay),
            seq,
            part: part + 1,
            emission,
        });
    }

    /// Pop the next emission and advance time to its tick.
    pub fn pop(&mut self) -> Option<ScheduledEmission> {
        let entry = self.queue.pop()?;
        self.now = self.now.max(entry.due);
        self.popped = Some((entry.seq, entry.part));
        Some(entry.emission)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

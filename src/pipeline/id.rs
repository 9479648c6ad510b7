//! Identity types for the pipeline graph and flow values.
//!
//! Element and connect-line ids come from the authoring surface and are
//! opaque strings. Branch ids are allocated per run and are dense `u32`
//! counters. Flow value ids are random and only used for correlation.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// Identifier of an element (operator node) in the graph.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(pub String);

impl ElementId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ElementId({})", self.0)
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ElementId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Identifier of a connect line (edge).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectLineId(pub String);

impl ConnectLineId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ConnectLineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectLineId({})", self.0)
    }
}

impl fmt::Display for ConnectLineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectLineId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Logical branch a flow value belongs to. Allocated densely per run.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchId(pub u32);

impl BranchId {
    pub const INVALID: BranchId = BranchId(u32::MAX);

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "BranchId(INVALID)")
        } else {
            write!(f, "BranchId({})", self.0)
        }
    }
}

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Hands out branch ids for one simulation run.
#[derive(Debug, Default)]
pub struct BranchAllocator {
    next: u32,
}

impl BranchAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self) -> BranchId {
        let id = BranchId(self.next);
        self.next += 1;
        id
    }

    /// Number of branches handed out so far.
    pub fn spawned(&self) -> usize {
        self.next as usize
    }
}

/// One inner subscription opened by a higher-order or error-handler element.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SubscriptionId(pub u64);

impl fmt::Debug for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriptionId({})", self.0)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// Random per-emission identity.
///
/// The `hash` is an opaque correlation token derived from the random id. It
/// says nothing about the payload: two emissions of the same value have
/// different hashes, and fanned-out copies of one emission share a hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowValueId(pub Uuid);

impl FlowValueId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn correlation_hash(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        format!("{:x}", digest)
    }
}

impl fmt::Debug for FlowValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FlowValueId({})", self.0)
    }
}

impl fmt::Display for FlowValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

//! Reactive pipeline simulation.
//!
//! A graph of operator elements joined by connect lines is compiled into a
//! plan, then run to exhaustion in virtual time. Every flow value crossing a
//! line is recorded as a [`FlowValueEvent`] on a replayable stream.
//!
//! # Architecture
//!
//! ```text
//! Graph ──► EdgeIndex ──► PipelineCompiler ──► CompiledPlan
//!                                                  │
//!             Scheduler ◄── Propagation ◄──────────┘
//!                               │
//!                               └──► FlowManager ──► FlowSubscription
//! ```
//!
//! # Design
//!
//! - **Enum dispatch** - `OperatorNode` enum for all operator kinds.
//! - **Effects, not callbacks** - operators push emissions and subscriptions
//!   into their `NodeContext`; the executor applies them.
//! - **Branches** - independent subscriptions are kept apart by `BranchId`.
//! - **Structural checks up front** - nothing runs until the plan compiles.

pub mod compiled_plan;
pub mod compiler;
pub mod connect_line;
pub mod edge_index;
pub mod element;
pub mod error;
pub mod event;
pub mod executor;
pub mod graph;
pub mod id;
pub mod manager;
pub mod node;
pub mod nodes;
pub mod report;
pub mod scheduler;
pub mod value;

pub use compiled_plan::{CompiledPlan, PlanStats};
pub use compiler::PipelineCompiler;
pub use connect_line::{ConnectLine, ConnectLineType, ConnectPoint};
pub use edge_index::{EdgeIndex, EdgeIndexCache};
pub use element::{Element, ElementFamily, ElementProperties, ElementType};
pub use error::{SimulationError, SimulationResult};
pub use event::{FlowEdge, FlowNotification, FlowValueEvent};
pub use executor::{RunOutcome, RunSummary, Simulation, SimulationHandle};
pub use graph::{Graph, GraphDocument, SnapshotId};
pub use id::{BranchId, ConnectLineId, ElementId, FlowValueId, SubscriptionId};
pub use manager::{FlowManager, FlowSubscription};
pub use node::{Effect, Inlet, NodeContext, OperatorConfig, OperatorNode};
pub use report::{ElementStatus, RunReport};
pub use value::{FlowValue, FlowValueKind, Signal};

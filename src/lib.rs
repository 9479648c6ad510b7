//! # RxVis-RS: Reactive Pipeline Simulator
//!
//! Runs visual reactive-pipeline diagrams (creation operators feeding
//! transforms, joins and higher-order operators into result sinks) and
//! records every value that crosses every connect line, so an editor can
//! animate the flow.
//!
//! ## Architecture
//!
//! - **Pipeline**: graph model, compiler, operator executor and event stream
//! - **Scripting**: Rhai-based expressions for predicates, projectors and selectors
//! - **Config**: TOML simulation settings
//!
//! ## Example
//!
//! ```no_run
//! use rxvis_rs::config::SimulationConfig;
//! use rxvis_rs::pipeline::{ConnectLine, Element, ElementType, Graph, Simulation};
//!
//! let mut graph = Graph::new();
//! graph
//!     .add_element(Element::new("range", ElementType::Range).with_property("count", 3))
//!     .add_element(Element::new("result", ElementType::Result))
//!     .add_connect_line(ConnectLine::subscribe("l1", "range", "result"));
//!
//! let simulation = Simulation::with_script_engine(SimulationConfig::default());
//! let summary = simulation.run(&graph)?;
//! for event in summary.events() {
//!     println!("{}", event.summary());
//! }
//! # Ok::<(), rxvis_rs::pipeline::SimulationError>(())
//! ```

pub mod config;
pub mod error;
pub mod pipeline;
pub mod scripting;

// Re-export commonly used types
pub use config::SimulationConfig;
pub use error::{Result, RxVisError};
pub use pipeline::{FlowValueEvent, Graph, RunReport, RunSummary, Simulation, SimulationError};
pub use scripting::{ExpressionEvaluator, ScriptEngine};

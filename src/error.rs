//! Error handling for rxvis-rs
//!
//! Pipeline structural errors and expression errors have their own enums;
//! this module wraps them together with IO, configuration and serialization
//! failures for the crate's public entry points.

use crate::pipeline::SimulationError;
use crate::scripting::ScriptError;
use thiserror::Error;

/// Main error type for rxvis-rs operations
#[derive(Error, Debug)]
pub enum RxVisError {
    /// The graph is structurally invalid
    #[error("Simulation error: {0}")]
    Simulation(#[from] SimulationError),

    /// Expression compilation or evaluation failed
    #[error("Script error: {0}")]
    Script(#[from] ScriptError),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// A background simulation thread failed
    #[error("Worker error: {0}")]
    Worker(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<RxVisError>,
    },
}

impl RxVisError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        RxVisError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The structural error underneath any context layers, if any.
    pub fn simulation_error(&self) -> Option<&SimulationError> {
        match self {
            RxVisError::Simulation(e) => Some(e),
            RxVisError::WithContext { source, .. } => source.simulation_error(),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for RxVisError {
    fn from(err: serde_json::Error) -> Self {
        RxVisError::Serialization(err.to_string())
    }
}

/// Result type alias for rxvis-rs operations
pub type Result<T> = std::result::Result<T, RxVisError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, SimulationError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| RxVisError::from(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| RxVisError::from(e).with_context(f()))
    }
}

impl<T> ResultExt<T> for std::io::Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| RxVisError::from(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| RxVisError::from(e).with_context(f()))
    }
}

//! Expression evaluation for element properties.
//!
//! Predicates, projectors, selectors and numeric creation parameters are
//! stored on elements as source text. The engine never interprets them
//! itself: it calls an injected [`ExpressionEvaluator`] with named bindings
//! and uses the returned JSON value.
//!
//! ## Bindings
//!
//! - `value` - the current value (outer value for creation parameters)
//! - `index` - zero-based position of `value` in its stream
//! - operator-specific extras, e.g. `outerValue` / `outerIndex` for merge-map
//!   projectors or `error` for catch-error selectors
//!
//! ## Example Expressions
//!
//! ```rhai
//! value > 2
//! ```
//!
//! ```rhai
//! #{ id: index, doubled: value * 2 }
//! ```

mod engine;

pub use engine::ScriptEngine;

use indexmap::IndexMap;
use rhai::{Engine, AST};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Failures raised while evaluating an expression property.
///
/// These never abort a run: the executor turns them into in-flow `Error`
/// values carrying the message.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScriptError {
    #[error("Compilation error in '{expression}': {message}")]
    Compile { expression: String, message: String },

    #[error("Execution error in '{expression}': {message}")]
    Runtime { expression: String, message: String },

    #[error("Conversion error: {0}")]
    Conversion(String),
}

pub type ScriptResult<T> = std::result::Result<T, ScriptError>;

/// Named bindings passed to an expression, in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpressionArgs {
    bindings: IndexMap<String, Value>,
}

impl ExpressionArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// The common `(value, index)` pair.
    pub fn value_index(value: Value, index: u64) -> Self {
        Self::new().with("value", value).with("index", index)
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.bindings.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.bindings.iter()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Injected evaluation capability.
#[cfg_attr(test, mockall::automock)]
pub trait ExpressionEvaluator: Send + Sync {
    fn evaluate(&self, expression: &str, args: &ExpressionArgs) -> ScriptResult<Value>;
}

/// Truthiness used for predicates, conditions and selectors.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// A compiled expression that can be evaluated repeatedly.
#[derive(Clone)]
pub struct CompiledExpression {
    ast: AST,
    source: String,
}

impl CompiledExpression {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub(crate) fn ast(&self) -> &AST {
        &self.ast
    }
}

impl std::fmt::Debug for CompiledExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledExpression")
            .field("source", &self.source)
            .finish()
    }
}

/// Cache for compiled expressions to avoid recompilation
#[derive(Default)]
pub struct ScriptCache {
    /// Map from expression source to compiled form
    cache: HashMap<String, CompiledExpression>,
}

impl ScriptCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a cached expression or compile and cache it
    pub fn get_or_compile(&mut self, engine: &Engine, source: &str) -> ScriptResult<CompiledExpression> {
        if let Some(compiled) = self.cache.get(source) {
            return Ok(compiled.clone());
        }

        let ast = engine
            .compile_expression(source)
            .or_else(|_| engine.compile(source))
            .map_err(|e| ScriptError::Compile {
                expression: source.to_string(),
                message: e.to_string(),
            })?;

        let compiled = CompiledExpression {
            ast,
            source: source.to_string(),
        };
        self.cache.insert(source.to_string(), compiled.clone());
        Ok(compiled)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }

    pub fn invalidate(&mut self, source: &str) {
        self.cache.remove(source);
    }
}

/// Thread-safe script cache wrapper
pub type SharedScriptCache = Arc<RwLock<ScriptCache>>;

pub fn create_shared_cache() -> SharedScriptCache {
    Arc::new(RwLock::new(ScriptCache::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_script_cache() {
        let engine = Engine::new();
        let mut cache = ScriptCache::new();

        let a = cache.get_or_compile(&engine, "value * 2").unwrap();
        let b = cache.get_or_compile(&engine, "value * 2").unwrap();
        assert_eq!(a.source(), b.source());
        assert_eq!(cache.len(), 1);

        cache.invalidate("value * 2");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_reports_compile_errors() {
        let engine = Engine::new();
        let mut cache = ScriptCache::new();
        let err = cache.get_or_compile(&engine, "value * ").unwrap_err();
        assert!(matches!(err, ScriptError::Compile { .. }));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&Value::Null));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(is_truthy(&json!(0.5)));
        assert!(is_truthy(&json!("x")));
        assert!(is_truthy(&json!([])));
    }

    #[test]
    fn test_args_keep_insertion_order() {
        let args = ExpressionArgs::value_index(json!(7), 2).with("outerValue", json!("a"));
        let names: Vec<_> = args.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, vec!["value", "index", "outerValue"]);
        assert_eq!(args.get("index"), Some(&json!(2)));
    }

    #[test]
    fn test_mock_evaluator() {
        let mut mock = MockExpressionEvaluator::new();
        mock.expect_evaluate()
            .withf(|expr, args| expr == "value > 2" && args.get("value") == Some(&json!(3)))
            .returning(|_, _| Ok(json!(true)));
        let result = mock
            .evaluate("value > 2", &ExpressionArgs::value_index(json!(3), 0))
            .unwrap();
        assert_eq!(result, json!(true));
    }
}

//! Rhai implementation of [`ExpressionEvaluator`].
//!
//! Bindings are pushed into a fresh scope for every evaluation, so compiled
//! ASTs can be shared across runs through the [`ScriptCache`].
//!
//! ## Helper Functions
//!
//! - `clamp(x, lo, hi)` - Clamp a number into a range
//! - `map_range(x, in_lo, in_hi, out_lo, out_hi)` - Linear range mapping
//! - `is_even(n)` / `is_odd(n)` - Integer parity

use crate::config::ScriptLimits;
use crate::scripting::{
    CompiledExpression, ExpressionArgs, ExpressionEvaluator, ScriptCache, ScriptError,
    ScriptResult, SharedScriptCache,
};
use rhai::{Dynamic, Engine, Scope, FLOAT, INT};
use serde_json::Value;
use std::sync::{Arc, PoisonError, RwLock};

/// The sandboxed expression engine used by default.
pub struct ScriptEngine {
    engine: Engine,
    cache: SharedScriptCache,
}

impl ScriptEngine {
    /// Create a new script engine with default limits
    pub fn new() -> Self {
        Self::with_limits(&ScriptLimits::default())
    }

    pub fn with_limits(limits: &ScriptLimits) -> Self {
        Self::with_cache(Arc::new(RwLock::new(ScriptCache::new())), limits)
    }

    /// Create a new script engine sharing an existing cache
    pub fn with_cache(cache: SharedScriptCache, limits: &ScriptLimits) -> Self {
        let mut engine = Engine::new();
        Self::configure_engine(&mut engine, limits);
        Self { engine, cache }
    }

    /// Configure the Rhai engine with helper functions and safety limits
    fn configure_engine(engine: &mut Engine, limits: &ScriptLimits) {
        engine.set_max_expr_depths(limits.max_expr_depth, limits.max_function_expr_depth);
        engine.set_max_call_levels(limits.max_call_levels);
        engine.set_max_operations(limits.max_operations);
        engine.set_max_string_size(limits.max_string_size);
        engine.set_max_array_size(limits.max_array_size);
        engine.set_max_map_size(limits.max_map_size);

        engine.register_fn("clamp", |x: FLOAT, lo: FLOAT, hi: FLOAT| -> FLOAT {
            x.max(lo).min(hi)
        });
        engine.register_fn("clamp", |x: INT, lo: INT, hi: INT| -> INT { x.max(lo).min(hi) });
        engine.register_fn(
            "map_range",
            |x: FLOAT, in_lo: FLOAT, in_hi: FLOAT, out_lo: FLOAT, out_hi: FLOAT| -> FLOAT {
                if (in_hi - in_lo).abs() < FLOAT::EPSILON {
                    out_lo
                } else {
                    out_lo + (x - in_lo) * (out_hi - out_lo) / (in_hi - in_lo)
                }
            },
        );
        engine.register_fn("is_even", |n: INT| n % 2 == 0);
        engine.register_fn("is_odd", |n: INT| n % 2 != 0);
    }

    /// Compile an expression and cache it
    pub fn compile(&self, source: &str) -> ScriptResult<CompiledExpression> {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        cache.get_or_compile(&self.engine, source)
    }

    /// Validate an expression without executing it
    pub fn validate(&self, source: &str) -> ScriptResult<()> {
        self.compile(source).map(|_| ())
    }

    pub fn execute(&self, compiled: &CompiledExpression, args: &ExpressionArgs) -> ScriptResult<Value> {
        let mut scope = Scope::new();
        for (name, value) in args.iter() {
            let dynamic = rhai::serde::to_dynamic(value)
                .map_err(|e| ScriptError::Conversion(format!("binding '{}': {}", name, e)))?;
            scope.push_dynamic(name.as_str(), dynamic);
        }

        let result = self
            .engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, compiled.ast())
            .map_err(|e| ScriptError::Runtime {
                expression: compiled.source().to_string(),
                message: e.to_string(),
            })?;

        rhai::serde::from_dynamic::<Value>(&result)
            .map_err(|e| ScriptError::Conversion(format!("result of '{}': {}", compiled.source(), e)))
    }

    pub fn clear_cache(&self) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn cache(&self) -> &SharedScriptCache {
        &self.cache
    }
}

impl ExpressionEvaluator for ScriptEngine {
    fn evaluate(&self, expression: &str, args: &ExpressionArgs) -> ScriptResult<Value> {
        let compiled = self.compile(expression)?;
        self.execute(&compiled, args)
    }
}

impl Default for ScriptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ScriptEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptEngine")
            .field("cache_size", &self.cache.read().map(|c| c.len()).ok())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(engine: &ScriptEngine, expr: &str, value: Value) -> ScriptResult<Value> {
        engine.evaluate(expr, &ExpressionArgs::value_index(value, 0))
    }

    #[test]
    fn test_predicate() {
        let engine = ScriptEngine::new();
        assert_eq!(eval(&engine, "value > 2", json!(3)).unwrap(), json!(true));
        assert_eq!(eval(&engine, "value > 2", json!(1)).unwrap(), json!(false));
    }

    #[test]
    fn test_projection_with_index() {
        let engine = ScriptEngine::new();
        let args = ExpressionArgs::value_index(json!(10), 4);
        assert_eq!(engine.evaluate("value + index", &args).unwrap(), json!(14));
    }

    #[test]
    fn test_object_and_array_values() {
        let engine = ScriptEngine::new();
        let out = eval(&engine, "#{ doubled: value.n * 2 }", json!({ "n": 21 })).unwrap();
        assert_eq!(out, json!({ "doubled": 42 }));

        let out = eval(&engine, "[value, value + 1]", json!(1)).unwrap();
        assert_eq!(out, json!([1, 2]));
    }

    #[test]
    fn test_statement_blocks_compile() {
        let engine = ScriptEngine::new();
        let out = eval(&engine, "let x = value * 3; x - 1", json!(2)).unwrap();
        assert_eq!(out, json!(5));
    }

    #[test]
    fn test_helpers() {
        let engine = ScriptEngine::new();
        assert_eq!(eval(&engine, "clamp(value, 0, 10)", json!(15)).unwrap(), json!(10));
        assert_eq!(eval(&engine, "is_even(value)", json!(4)).unwrap(), json!(true));
    }

    #[test]
    fn test_runtime_error() {
        let engine = ScriptEngine::new();
        let err = eval(&engine, "value.missing_fn()", json!(1)).unwrap_err();
        assert!(matches!(err, ScriptError::Runtime { .. }));
    }

    #[test]
    fn test_operation_limit() {
        let limits = ScriptLimits {
            max_operations: 100,
            ..ScriptLimits::default()
        };
        let engine = ScriptEngine::with_limits(&limits);
        let err = eval(&engine, "let x = 0; loop { x += 1; }", json!(0)).unwrap_err();
        assert!(matches!(err, ScriptError::Runtime { .. }));
    }

    #[test]
    fn test_caching() {
        let engine = ScriptEngine::new();
        eval(&engine, "value * 2", json!(1)).unwrap();
        eval(&engine, "value * 2", json!(2)).unwrap();
        assert_eq!(engine.cache().read().unwrap().len(), 1);
        engine.clear_cache();
        assert!(engine.cache().read().unwrap().is_empty());
    }
}

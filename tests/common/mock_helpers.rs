//! Mock construction helpers

use mockall::mock;
use rxvis_rs::scripting::{ExpressionArgs, ExpressionEvaluator, ScriptError, ScriptResult};
use serde_json::Value;

mock! {
    pub Evaluator {}

    impl ExpressionEvaluator for Evaluator {
        fn evaluate(&self, expression: &str, args: &ExpressionArgs) -> ScriptResult<Value>;
    }
}

/// Evaluator that fails every expression with a runtime error.
pub fn failing_evaluator(message: &'static str) -> MockEvaluator {
    let mut mock = MockEvaluator::new();
    mock.expect_evaluate().returning(move |expression, _| {
        Err(ScriptError::Runtime {
            expression: expression.to_string(),
            message: message.to_string(),
        })
    });
    mock
}

/// Evaluator that echoes the `value` argument for every expression.
pub fn identity_evaluator() -> MockEvaluator {
    let mut mock = MockEvaluator::new();
    mock.expect_evaluate()
        .returning(|_, args| Ok(args.get("value").cloned().unwrap_or(Value::Null)));
    mock
}

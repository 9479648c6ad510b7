//! Built-in operator implementations.

pub mod buffer;
pub mod catch_error;
pub mod creation;
pub mod filter;
pub mod higher_order;
pub mod join;
pub mod result_sink;
pub mod transform;

pub use buffer::{BufferCountConfig, BufferCountNode, BufferNode};
pub use catch_error::{CatchErrorConfig, CatchErrorNode};
pub use creation::{CreationSpec, Production, Sequence, TimedSignal};
pub use filter::{FilterConfig, FilterNode};
pub use higher_order::{FlattenConfig, FlattenMode, FlattenNode};
pub use join::{CombineLatestNode, ForkJoinNode, MergeNode};
pub use result_sink::ResultNode;
pub use transform::{MapConfig, MapNode};

use serde_json::Value;

/// JSON number for an engine-computed value: integral values stay integers.
pub(crate) fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_number_value() {
        assert_eq!(number_value(3.0), json!(3));
        assert_eq!(number_value(-2.0), json!(-2));
        assert_eq!(number_value(1.5), json!(1.5));
        assert_eq!(number_value(f64::NAN), Value::Null);
    }
}

//! Elements: the operator nodes of a pipeline graph.
//!
//! An element declares its family and kind as two strings, exactly as the
//! authoring surface stores them. They are resolved to an [`ElementType`] when
//! a graph is compiled, so that an unknown combination surfaces as a
//! structural error with the offending element id instead of a parse failure.

use crate::pipeline::error::{SimulationError, SimulationResult};
use crate::pipeline::id::ElementId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Operator families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ElementFamily {
    /// Emits values without inbound dependency.
    Creation,
    /// Combines several ordered inbound sources.
    JoinCreation,
    Transformation,
    ErrorHandler,
    /// Terminal sink.
    Result,
}

impl ElementFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementFamily::Creation => "creation",
            ElementFamily::JoinCreation => "join-creation",
            ElementFamily::Transformation => "transformation",
            ElementFamily::ErrorHandler => "error-handler",
            ElementFamily::Result => "result",
        }
    }
}

impl fmt::Display for ElementFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed catalog of operator kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    // Creation
    Range,
    Interval,
    Of,
    Timer,
    Defer,
    Ajax,
    ThrowError,
    Generate,
    Iif,
    // Join creation
    Merge,
    CombineLatest,
    ForkJoin,
    // Transformation
    Map,
    Filter,
    Buffer,
    BufferCount,
    ConcatMap,
    MergeMap,
    ExhaustMap,
    Expand,
    // Error handler
    CatchError,
    // Result
    Result,
}

impl ElementType {
    /// Get all element types.
    pub fn all() -> &'static [ElementType] {
        &[
            ElementType::Range,
            ElementType::Interval,
            ElementType::Of,
            ElementType::Timer,
            ElementType::Defer,
            ElementType::Ajax,
            ElementType::ThrowError,
            ElementType::Generate,
            ElementType::Iif,
            ElementType::Merge,
            ElementType::CombineLatest,
            ElementType::ForkJoin,
            ElementType::Map,
            ElementType::Filter,
            ElementType::Buffer,
            ElementType::BufferCount,
            ElementType::ConcatMap,
            ElementType::MergeMap,
            ElementType::ExhaustMap,
            ElementType::Expand,
            ElementType::CatchError,
            ElementType::Result,
        ]
    }

    pub fn family(&self) -> ElementFamily {
        match self {
            ElementType::Range
            | ElementType::Interval
            | ElementType::Of
            | ElementType::Timer
            | ElementType::Defer
            | ElementType::Ajax
            | ElementType::ThrowError
            | ElementType::Generate
            | ElementType::Iif => ElementFamily::Creation,
            ElementType::Merge | ElementType::CombineLatest | ElementType::ForkJoin => {
                ElementFamily::JoinCreation
            }
            ElementType::Map
            | ElementType::Filter
            | ElementType::Buffer
            | ElementType::BufferCount
            | ElementType::ConcatMap
            | ElementType::MergeMap
            | ElementType::ExhaustMap
            | ElementType::Expand => ElementFamily::Transformation,
            ElementType::CatchError => ElementFamily::ErrorHandler,
            ElementType::Result => ElementFamily::Result,
        }
    }

    /// Serialized kind name, e.g. `"throw-error"`.
    pub fn kind_name(&self) -> &'static str {
        match self {
            ElementType::Range => "range",
            ElementType::Interval => "interval",
            ElementType::Of => "of",
            ElementType::Timer => "timer",
            ElementType::Defer => "defer",
            ElementType::Ajax => "ajax",
            ElementType::ThrowError => "throw-error",
            ElementType::Generate => "generate",
            ElementType::Iif => "iif",
            ElementType::Merge => "merge",
            ElementType::CombineLatest => "combine-latest",
            ElementType::ForkJoin => "fork-join",
            ElementType::Map => "map",
            ElementType::Filter => "filter",
            ElementType::Buffer => "buffer",
            ElementType::BufferCount => "buffer-count",
            ElementType::ConcatMap => "concat-map",
            ElementType::MergeMap => "merge-map",
            ElementType::ExhaustMap => "exhaust-map",
            ElementType::Expand => "expand",
            ElementType::CatchError => "catch-error",
            ElementType::Result => "result",
        }
    }

    /// Resolve a family/kind pair. Returns `None` when the kind is unknown or
    /// belongs to a different family.
    pub fn resolve(family: ElementFamily, kind: &str) -> Option<ElementType> {
        ElementType::all()
            .iter()
            .copied()
            .find(|t| t.family() == family && t.kind_name() == kind)
    }

    pub fn is_creation(&self) -> bool {
        self.family() == ElementFamily::Creation
    }

    pub fn is_join(&self) -> bool {
        self.family() == ElementFamily::JoinCreation
    }

    pub fn is_result(&self) -> bool {
        matches!(self, ElementType::Result)
    }

    /// Higher-order mapping operators that subscribe to a referenced sub-flow
    /// for each outer value.
    pub fn is_higher_order(&self) -> bool {
        matches!(
            self,
            ElementType::ConcatMap
                | ElementType::MergeMap
                | ElementType::ExhaustMap
                | ElementType::Expand
        )
    }

    /// Property keys that name other elements.
    pub fn reference_properties(&self) -> &'static [&'static str] {
        match self {
            ElementType::Defer
            | ElementType::ConcatMap
            | ElementType::MergeMap
            | ElementType::ExhaustMap
            | ElementType::Expand
            | ElementType::CatchError => &["observable"],
            ElementType::Iif => &["trueObservable", "falseObservable"],
            _ => &[],
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.family(), self.kind_name())
    }
}

/// A numeric creation property: either a literal or an expression evaluated
/// against the subscription context (`value`, `index`).
#[derive(Debug, Clone, PartialEq)]
pub enum Numeric {
    Literal(f64),
    Expression(String),
}

/// Operator-specific configuration. Opaque to the engine except where an
/// operator interprets a key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementProperties(BTreeMap<String, Value>);

impl ElementProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// A non-empty expression string, or an error naming the property.
    pub fn expression(&self, element_id: &ElementId, key: &str) -> SimulationResult<String> {
        match self.0.get(key) {
            Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
            Some(other) => Err(SimulationError::invalid_property(
                element_id,
                key,
                format!("expected an expression string, got {}", other),
            )),
            None => Err(SimulationError::invalid_property(
                element_id,
                key,
                "required expression is missing",
            )),
        }
    }

    pub fn optional_expression(
        &self,
        element_id: &ElementId,
        key: &str,
    ) -> SimulationResult<Option<String>> {
        if self.0.contains_key(key) {
            self.expression(element_id, key).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Strict positive integer property (`bufferSize`, `concurrent`, ...).
    pub fn positive_count(
        &self,
        element_id: &ElementId,
        key: &str,
    ) -> SimulationResult<Option<usize>> {
        let Some(value) = self.0.get(key) else {
            return Ok(None);
        };
        match value.as_u64() {
            Some(n) if n > 0 => Ok(Some(n as usize)),
            _ => Err(SimulationError::invalid_property(
                element_id,
                key,
                format!("expected a positive integer, got {}", value),
            )),
        }
    }

    /// Number literal or expression string.
    pub fn numeric(&self, element_id: &ElementId, key: &str) -> SimulationResult<Option<Numeric>> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n.as_f64().map(|f| Some(Numeric::Literal(f))).ok_or_else(
                || SimulationError::invalid_property(element_id, key, "number out of range"),
            ),
            Some(Value::String(s)) if !s.trim().is_empty() => {
                Ok(Some(Numeric::Expression(s.clone())))
            }
            Some(other) => Err(SimulationError::invalid_property(
                element_id,
                key,
                format!("expected a number or expression, got {}", other),
            )),
        }
    }

    /// Element reference (sub-flow) property.
    pub fn reference(&self, key: &str) -> Option<ElementId> {
        self.str(key)
            .filter(|s| !s.trim().is_empty())
            .map(ElementId::from)
    }
}

/// A node in the pipeline graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub id: ElementId,
    pub family: ElementFamily,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub properties: ElementProperties,
}

impl Element {
    pub fn new(id: impl Into<String>, element_type: ElementType) -> Self {
        Self {
            id: ElementId::new(id),
            family: element_type.family(),
            kind: element_type.kind_name().to_string(),
            properties: ElementProperties::new(),
        }
    }

    /// Builder-style property setter.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key, value);
        self
    }

    /// Resolve the declared family/kind pair.
    pub fn element_type(&self) -> SimulationResult<ElementType> {
        ElementType::resolve(self.family, &self.kind).ok_or_else(|| {
            SimulationError::UnsupportedElementType {
                element_id: self.id.clone(),
                kind: self.kind.clone(),
                family: self.family,
            }
        })
    }
}

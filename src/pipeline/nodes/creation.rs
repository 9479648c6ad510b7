//! Creation operators: range, of, interval, timer, defer, ajax, throw-error,
//! generate, iif.
//!
//! A creation element never reacts to inbound values. Each time it is
//! subscribed it produces a finite, timed list of signals relative to the
//! subscription tick, a counted [`Sequence`] that is stepped one value at a
//! time (`range`, `interval`, periodic `timer`), or delegates to another
//! creation element (`defer`, `iif`).
//!
//! Numeric parameters accept a literal or an expression evaluated against the
//! subscription scope (`value`, `index`). Literals are validated when the
//! graph is compiled; evaluated values are validated at subscription time and
//! a bad value becomes an in-flow `Error`.

use crate::config::SimulationConfig;
use crate::pipeline::element::{Element, ElementType, Numeric};
use crate::pipeline::error::{SimulationError, SimulationResult};
use crate::pipeline::id::ElementId;
use crate::pipeline::node::{expression_failure, SubscriptionScope};
use crate::pipeline::nodes::number_value;
use crate::pipeline::value::Signal;
use crate::scripting::{is_truthy, ExpressionArgs, ExpressionEvaluator};
use serde_json::{json, Value};

/// A signal and its offset, in virtual ticks, from the subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedSignal {
    pub delay: u64,
    pub signal: Signal,
}

impl TimedSignal {
    pub fn now(signal: Signal) -> Self {
        Self { delay: 0, signal }
    }

    pub fn at(delay: u64, signal: Signal) -> Self {
        Self { delay, signal }
    }
}

/// A counted run of `Next` values followed by `Complete`. Positions are
/// produced on demand, so a large `count` costs nothing until the run gets
/// that far (and the step limit usually stops it first).
#[derive(Debug, Clone, PartialEq)]
pub struct Sequence {
    /// Payload of value `k` is `start + k`; `None` emits `k` itself.
    start: Option<f64>,
    count: u64,
    /// Delay of value 0 from the subscription.
    first: u64,
    period: u64,
    /// Delay of the `Complete` when `count` is zero.
    empty_due: u64,
}

impl Sequence {
    /// `start, start + 1, ...`, all due immediately.
    pub fn range(start: f64, count: u64) -> Self {
        Self {
            start: Some(start),
            count,
            first: 0,
            period: 0,
            empty_due: 0,
        }
    }

    /// `0, 1, ...`, the first after `first` ticks and then every `period`.
    /// An empty run completes after `empty_due` ticks.
    pub fn ticks(count: u64, first: u64, period: u64, empty_due: u64) -> Self {
        Self {
            start: None,
            count,
            first,
            period,
            empty_due,
        }
    }

    pub fn len(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Delay of position `k` from the subscription. Position `len()` is the
    /// `Complete`, due with the last value.
    pub fn delay(&self, k: u64) -> u64 {
        if k < self.count {
            self.first.saturating_add(self.period.saturating_mul(k))
        } else if self.count == 0 {
            self.empty_due
        } else {
            self.delay(self.count - 1)
        }
    }

    pub fn signal(&self, k: u64) -> Signal {
        if k >= self.count {
            return Signal::Complete;
        }
        match self.start {
            Some(start) => Signal::Next(number_value(start + k as f64)),
            None => Signal::Next(json!(k)),
        }
    }

    /// Position after `k`; `None` once the `Complete` was reached.
    pub fn following(&self, k: u64) -> Option<u64> {
        (k < self.count).then_some(k + 1)
    }

    /// Every position in order, lazily.
    pub fn signals(&self) -> impl Iterator<Item = TimedSignal> + '_ {
        (0..=self.count).map(|k| TimedSignal::at(self.delay(k), self.signal(k)))
    }
}

/// What one subscription to a creation element yields.
#[derive(Debug, Clone, PartialEq)]
pub enum Production {
    Signals(Vec<TimedSignal>),
    Sequence(Sequence),
    /// Subscribe to another creation element instead.
    Delegate(ElementId),
}

/// Constraint on a numeric parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rule {
    Any,
    /// Non-negative integer.
    Count,
    /// Non-negative whole number of ticks.
    Ticks,
    /// Positive whole number of ticks.
    Period,
    Status,
}

impl Rule {
    fn check(self, n: f64) -> Result<f64, String> {
        if !n.is_finite() {
            return Err(format!("expected a finite number, got {}", n));
        }
        match self {
            Rule::Count | Rule::Ticks if n < 0.0 || n.fract() != 0.0 => {
                Err(format!("expected a non-negative integer, got {}", n))
            }
            Rule::Period if n <= 0.0 || n.fract() != 0.0 => {
                Err(format!("expected a positive integer, got {}", n))
            }
            Rule::Status if !(100.0..=599.0).contains(&n) || n.fract() != 0.0 => {
                Err(format!("expected an HTTP status between 100 and 599, got {}", n))
            }
            _ => Ok(n),
        }
    }
}

/// A numeric parameter with its constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    key: &'static str,
    source: Numeric,
    rule: Rule,
}

impl Param {
    fn parse(
        element: &Element,
        key: &'static str,
        rule: Rule,
        default: Option<f64>,
    ) -> SimulationResult<Self> {
        let source = match element.properties.numeric(&element.id, key)? {
            Some(source) => source,
            None => match default {
                Some(n) => Numeric::Literal(n),
                None => {
                    return Err(SimulationError::invalid_property(
                        &element.id,
                        key,
                        "required value is missing",
                    ))
                }
            },
        };
        if let Numeric::Literal(n) = source {
            rule.check(n)
                .map_err(|message| SimulationError::invalid_property(&element.id, key, message))?;
        }
        Ok(Self { key, source, rule })
    }

    fn resolve(
        &self,
        args: &ExpressionArgs,
        evaluator: &dyn ExpressionEvaluator,
        element_id: &ElementId,
    ) -> Result<f64, Value> {
        match &self.source {
            Numeric::Literal(n) => Ok(*n),
            Numeric::Expression(expr) => {
                let value = evaluator
                    .evaluate(expr, args)
                    .map_err(|e| expression_failure(element_id, &e))?;
                let n = value.as_f64().ok_or_else(|| {
                    failure(
                        element_id,
                        format!("'{}' evaluated to {}, expected a number", self.key, value),
                    )
                })?;
                self.rule
                    .check(n)
                    .map_err(|message| failure(element_id, format!("'{}': {}", self.key, message)))
            }
        }
    }

    fn resolve_ticks(
        &self,
        args: &ExpressionArgs,
        evaluator: &dyn ExpressionEvaluator,
        element_id: &ElementId,
    ) -> Result<u64, Value> {
        self.resolve(args, evaluator, element_id).map(|n| n as u64)
    }
}

fn failure(element_id: &ElementId, message: String) -> Value {
    json!({
        "elementId": element_id.as_str(),
        "message": message,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub enum OfItems {
    Literal(Vec<Value>),
    Expression(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum InitialState {
    Literal(Value),
    Expression(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerateSpec {
    initial_state: InitialState,
    condition: String,
    iterate: String,
    result_selector: Option<String>,
    max_iterations: usize,
}

/// Validated configuration of a creation element.
#[derive(Debug, Clone, PartialEq)]
pub enum CreationSpec {
    Range {
        start: Param,
        count: Param,
    },
    Of {
        items: OfItems,
    },
    Interval {
        period: Param,
        count: Param,
    },
    Timer {
        due: Param,
        period: Option<Param>,
        count: Param,
    },
    Defer {
        observable: ElementId,
    },
    Ajax {
        response: Value,
        status: Param,
        delay: Param,
        url: Value,
    },
    ThrowError {
        error: Value,
    },
    Generate(GenerateSpec),
    Iif {
        condition: String,
        when_true: ElementId,
        when_false: ElementId,
    },
}

fn required_reference(element: &Element, key: &str) -> SimulationResult<ElementId> {
    element
        .properties
        .reference(key)
        .ok_or_else(|| SimulationError::CreationNodeMissing {
            element_id: Some(element.id.clone()),
            reference: None,
        })
}

impl CreationSpec {
    pub fn parse(
        element: &Element,
        element_type: ElementType,
        config: &SimulationConfig,
    ) -> SimulationResult<Self> {
        let id = &element.id;
        let props = &element.properties;
        let default_count = Some(config.default_interval_count as f64);
        let default_period = Some(config.default_interval_period as f64);

        let spec = match element_type {
            ElementType::Range => CreationSpec::Range {
                start: Param::parse(element, "start", Rule::Any, Some(0.0))?,
                count: Param::parse(element, "count", Rule::Count, None)?,
            },
            ElementType::Of => {
                let items = match props.get("items") {
                    None | Some(Value::Null) => OfItems::Literal(Vec::new()),
                    Some(Value::Array(items)) => OfItems::Literal(items.clone()),
                    Some(Value::String(_)) => OfItems::Expression(props.expression(id, "items")?),
                    Some(other) => OfItems::Literal(vec![other.clone()]),
                };
                CreationSpec::Of { items }
            }
            ElementType::Interval => CreationSpec::Interval {
                period: Param::parse(element, "period", Rule::Period, default_period)?,
                count: Param::parse(element, "count", Rule::Count, default_count)?,
            },
            ElementType::Timer => {
                let period = if props.contains("period") {
                    Some(Param::parse(element, "period", Rule::Period, None)?)
                } else {
                    None
                };
                CreationSpec::Timer {
                    due: Param::parse(element, "due", Rule::Ticks, Some(0.0))?,
                    period,
                    count: Param::parse(element, "count", Rule::Count, default_count)?,
                }
            }
            ElementType::Defer => CreationSpec::Defer {
                observable: required_reference(element, "observable")?,
            },
            ElementType::Ajax => CreationSpec::Ajax {
                response: props.get("response").cloned().unwrap_or(Value::Null),
                status: Param::parse(element, "status", Rule::Status, Some(200.0))?,
                delay: Param::parse(element, "delay", Rule::Ticks, Some(1.0))?,
                url: props.get("url").cloned().unwrap_or(Value::Null),
            },
            ElementType::ThrowError => CreationSpec::ThrowError {
                error: props
                    .get("error")
                    .cloned()
                    .unwrap_or_else(|| Value::String("Error".to_string())),
            },
            ElementType::Generate => {
                let initial_state = match props.get("initialState") {
                    Some(Value::String(_)) => {
                        InitialState::Expression(props.expression(id, "initialState")?)
                    }
                    Some(other) => InitialState::Literal(other.clone()),
                    None => {
                        return Err(SimulationError::invalid_property(
                            id,
                            "initialState",
                            "required value is missing",
                        ))
                    }
                };
                CreationSpec::Generate(GenerateSpec {
                    initial_state,
                    condition: props.expression(id, "condition")?,
                    iterate: props.expression(id, "iterate")?,
                    result_selector: props.optional_expression(id, "resultSelector")?,
                    max_iterations: config.max_generate_iterations,
                })
            }
            ElementType::Iif => CreationSpec::Iif {
                condition: props.expression(id, "condition")?,
                when_true: required_reference(element, "trueObservable")?,
                when_false: required_reference(element, "falseObservable")?,
            },
            other => {
                return Err(SimulationError::UnsupportedElementType {
                    element_id: id.clone(),
                    kind: other.kind_name().to_string(),
                    family: other.family(),
                })
            }
        };
        Ok(spec)
    }

    pub fn name(&self) -> &'static str {
        match self {
            CreationSpec::Range { .. } => "range",
            CreationSpec::Of { .. } => "of",
            CreationSpec::Interval { .. } => "interval",
            CreationSpec::Timer { .. } => "timer",
            CreationSpec::Defer { .. } => "defer",
            CreationSpec::Ajax { .. } => "ajax",
            CreationSpec::ThrowError { .. } => "throw-error",
            CreationSpec::Generate(_) => "generate",
            CreationSpec::Iif { .. } => "iif",
        }
    }

    pub fn references(&self) -> Vec<&ElementId> {
        match self {
            CreationSpec::Defer { observable } => vec![observable],
            CreationSpec::Iif {
                when_true,
                when_false,
                ..
            } => vec![when_true, when_false],
            _ => Vec::new(),
        }
    }

    /// Signals for one subscription. Evaluation failures yield a single
    /// `Error` signal (after whatever `generate` produced so far).
    pub fn produce(
        &self,
        scope: &SubscriptionScope,
        evaluator: &dyn ExpressionEvaluator,
        element_id: &ElementId,
    ) -> Production {
        let args = scope.args();
        let mut signals = Vec::new();
        match self.produce_into(&args, evaluator, element_id, &mut signals) {
            Ok(Some(production)) => production,
            Ok(None) => Production::Signals(signals),
            Err(payload) => {
                let delay = signals.last().map(|s| s.delay).unwrap_or(0);
                signals.push(TimedSignal::at(delay, Signal::Error(payload)));
                Production::Signals(signals)
            }
        }
    }

    fn produce_into(
        &self,
        args: &ExpressionArgs,
        evaluator: &dyn ExpressionEvaluator,
        element_id: &ElementId,
        out: &mut Vec<TimedSignal>,
    ) -> Result<Option<Production>, Value> {
        match self {
            CreationSpec::Range { start, count } => {
                let start = start.resolve(args, evaluator, element_id)?;
                let count = count.resolve_ticks(args, evaluator, element_id)?;
                return Ok(Some(Production::Sequence(Sequence::range(start, count))));
            }
            CreationSpec::Of { items } => {
                let items = match items {
                    OfItems::Literal(items) => items.clone(),
                    OfItems::Expression(expr) => match evaluator
                        .evaluate(expr, args)
                        .map_err(|e| expression_failure(element_id, &e))?
                    {
                        Value::Array(items) => items,
                        single => vec![single],
                    },
                };
                out.extend(items.into_iter().map(|v| TimedSignal::now(Signal::Next(v))));
                out.push(TimedSignal::now(Signal::Complete));
            }
            CreationSpec::Interval { period, count } => {
                let period = period.resolve_ticks(args, evaluator, element_id)?;
                let count = count.resolve_ticks(args, evaluator, element_id)?;
                return Ok(Some(Production::Sequence(Sequence::ticks(
                    count, period, period, 0,
                ))));
            }
            CreationSpec::Timer { due, period, count } => {
                let due = due.resolve_ticks(args, evaluator, element_id)?;
                match period {
                    None => {
                        out.push(TimedSignal::at(due, Signal::Next(json!(0))));
                        out.push(TimedSignal::at(due, Signal::Complete));
                    }
                    Some(period) => {
                        let period = period.resolve_ticks(args, evaluator, element_id)?;
                        let count = count.resolve_ticks(args, evaluator, element_id)?;
                        return Ok(Some(Production::Sequence(Sequence::ticks(
                            count, due, period, due,
                        ))));
                    }
                }
            }
            CreationSpec::Defer { observable } => {
                return Ok(Some(Production::Delegate(observable.clone())))
            }
            CreationSpec::Ajax {
                response,
                status,
                delay,
                url,
            } => {
                let status = status.resolve(args, evaluator, element_id)? as u64;
                let delay = delay.resolve_ticks(args, evaluator, element_id)?;
                if status >= 400 {
                    out.push(TimedSignal::at(
                        delay,
                        Signal::Error(json!({ "status": status, "url": url })),
                    ));
                } else {
                    out.push(TimedSignal::at(
                        delay,
                        Signal::Next(json!({
                            "status": status,
                            "url": url,
                            "response": response,
                        })),
                    ));
                    out.push(TimedSignal::at(delay, Signal::Complete));
                }
            }
            CreationSpec::ThrowError { error } => {
                out.push(TimedSignal::now(Signal::Error(error.clone())));
            }
            CreationSpec::Generate(spec) => {
                spec.run(args, evaluator, element_id, out)?;
                out.push(TimedSignal::now(Signal::Complete));
            }
            CreationSpec::Iif {
                condition,
                when_true,
                when_false,
            } => {
                let verdict = evaluator
                    .evaluate(condition, args)
                    .map_err(|e| expression_failure(element_id, &e))?;
                let target = if is_truthy(&verdict) {
                    when_true
                } else {
                    when_false
                };
                return Ok(Some(Production::Delegate(target.clone())));
            }
        }
        Ok(None)
    }
}

impl GenerateSpec {
    fn run(
        &self,
        args: &ExpressionArgs,
        evaluator: &dyn ExpressionEvaluator,
        element_id: &ElementId,
        out: &mut Vec<TimedSignal>,
    ) -> Result<(), Value> {
        let eval = |expr: &str, args: &ExpressionArgs| {
            evaluator
                .evaluate(expr, args)
                .map_err(|e| expression_failure(element_id, &e))
        };

        let mut state = match &self.initial_state {
            InitialState::Literal(v) => v.clone(),
            InitialState::Expression(expr) => eval(expr, args)?,
        };

        for iteration in 0.. {
            if iteration >= self.max_iterations {
                tracing::warn!(
                    "generate {} stopped after {} iterations",
                    element_id,
                    self.max_iterations
                );
                break;
            }
            let scoped = args.clone().with("state", state.clone());
            if !is_truthy(&eval(&self.condition, &scoped)?) {
                break;
            }
            let emitted = match &self.result_selector {
                Some(selector) => eval(selector, &scoped)?,
                None => state.clone(),
            };
            out.push(TimedSignal::now(Signal::Next(emitted)));
            state = eval(&self.iterate, &scoped)?;
        }
        Ok(())
    }
}

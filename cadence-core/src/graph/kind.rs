//! Node Kinds
//!
//! The closed set of node behaviours, and the table that maps kind names to
//! constructors.
//!
//! Every kind reads its inputs positionally from the node's children, so the
//! order of `connect` calls is significant. Configuration arrives as a JSON
//! object and is decoded by the kind's constructor at creation time.

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value as Json;

use super::node::{GraphContext, Node, NodeId};
use super::value::NodeValue;
use crate::error::{GraphError, Result};

/// Builds a [`NodeKind`] from its JSON configuration.
pub type Constructor = fn(&Json) -> std::result::Result<NodeKind, serde_json::Error>;

/// What a node does when evaluated.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Holds a value written by `set` nodes, events or the host.
    Value {
        /// Value the node starts with.
        initial: NodeValue,
    },

    /// Evaluates to the current frame timestamp in milliseconds. Ticks every
    /// frame while running.
    Clock,

    /// Starts every clock among its children.
    ClockStart,

    /// Stops every clock among its children.
    ClockStop,

    /// `1` if its first child is a running clock, `0` otherwise.
    ClockTest,

    /// Arithmetic, comparison or logic over the children.
    Op(Operator),

    /// `[test, then, else?]`.
    Cond,

    /// `[target, source]`: writes the source's value into the target value node.
    Set,

    /// Evaluates all children in order and yields the last.
    Block,

    /// Final node that evaluates its children on every update pass.
    Always,

    /// Final node that writes named child values to its connected views.
    Props(PropsSpec),

    /// Receives events and writes payload fields into value nodes.
    Event(EventSpec),

    /// Cubic bezier easing of its first child.
    Bezier(BezierCurve),

    /// Forwards its evaluated children to the host.
    Call,
}

impl NodeKind {
    /// The registration name of this kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Value { .. } => "value",
            Self::Clock => "clock",
            Self::ClockStart => "clockStart",
            Self::ClockStop => "clockStop",
            Self::ClockTest => "clockTest",
            Self::Op(_) => "op",
            Self::Cond => "cond",
            Self::Set => "set",
            Self::Block => "block",
            Self::Always => "always",
            Self::Props(_) => "props",
            Self::Event(_) => "event",
            Self::Bezier(_) => "bezier",
            Self::Call => "call",
        }
    }

    /// Final nodes are the sinks evaluated when something upstream changes.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Props(_) | Self::Always)
    }

    /// Whether this kind can be the target of an event binding.
    pub fn is_event(&self) -> bool {
        matches!(self, Self::Event(_))
    }

    /// Whether this kind can be connected to view outputs.
    pub fn is_props(&self) -> bool {
        matches!(self, Self::Props(_))
    }

    /// The value a freshly created node of this kind holds.
    pub(crate) fn initial_value(&self) -> NodeValue {
        match self {
            Self::Value { initial } => initial.clone(),
            _ => NodeValue::Null,
        }
    }

    pub(crate) fn evaluate(&self, node: &Node, cx: &dyn GraphContext) -> Result<NodeValue> {
        let children = node.children();
        let child = |index: usize| {
            children.get(index).copied().ok_or(GraphError::MissingChild {
                id: node.id(),
                index,
            })
        };

        match self {
            Self::Value { .. } => Ok(node.cached_value()),
            Self::Clock => Ok(NodeValue::Number(cx.frame_time_ms())),
            Self::ClockStart => {
                for &clock in &children {
                    cx.start_clock(clock)?;
                }
                Ok(NodeValue::Null)
            }
            Self::ClockStop => {
                for &clock in &children {
                    cx.stop_clock(clock)?;
                }
                Ok(NodeValue::Null)
            }
            Self::ClockTest => Ok(cx.clock_running(child(0)?)?.into()),
            Self::Op(op) => op.apply(node.id(), &children, cx),
            Self::Cond => {
                let branch = if cx.evaluate(child(0)?)?.is_truthy() {
                    children.get(1)
                } else {
                    children.get(2)
                };
                match branch {
                    Some(&id) => cx.evaluate(id),
                    None => Ok(NodeValue::Null),
                }
            }
            Self::Set => {
                let target = child(0)?;
                let value = cx.evaluate(child(1)?)?;
                cx.set_value(target, value.clone())?;
                Ok(value)
            }
            Self::Block => {
                let mut last = NodeValue::Null;
                for &id in &children {
                    last = cx.evaluate(id)?;
                }
                Ok(last)
            }
            Self::Always => {
                for &id in &children {
                    cx.evaluate(id)?;
                }
                Ok(NodeValue::Null)
            }
            Self::Props(spec) => {
                let mut props = IndexMap::with_capacity(spec.props.len());
                for (name, &id) in spec.props.iter().zip(children.iter()) {
                    props.insert(name.clone(), cx.evaluate(id)?);
                }
                for view in node.views() {
                    cx.update_props(view, &props);
                }
                Ok(NodeValue::Null)
            }
            Self::Event(_) => Ok(NodeValue::Null),
            Self::Bezier(curve) => {
                let input = cx.evaluate(child(0)?)?.as_f64();
                Ok(NodeValue::Number(curve.solve(input)))
            }
            Self::Call => {
                let args = children
                    .iter()
                    .map(|&id| cx.evaluate(id))
                    .collect::<Result<Vec<_>>>()?;
                cx.call_host(node.id(), &args);
                Ok(NodeValue::Null)
            }
        }
    }
}

/// Config for [`NodeKind::Props`]: prop names aligned with the node's children.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PropsSpec {
    /// The n-th name labels the n-th child.
    pub props: Vec<String>,
}

/// Config for [`NodeKind::Event`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EventSpec {
    /// `(json pointer into the payload, value node to write)` pairs.
    pub mapping: Vec<(String, NodeId)>,
}

/// Operators understood by [`NodeKind::Op`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    Add,
    Sub,
    Multiply,
    Divide,
    Modulo,
    Pow,
    Min,
    Max,
    Abs,
    Sqrt,
    Sin,
    Cos,
    Exp,
    Round,
    Floor,
    Ceil,
    Not,
    LessThan,
    GreaterThan,
    Eq,
    Neq,
    LessOrEq,
    GreaterOrEq,
    And,
    Or,
}

impl Operator {
    fn apply(self, id: NodeId, children: &[NodeId], cx: &dyn GraphContext) -> Result<NodeValue> {
        let operand = |index: usize| -> Result<f64> {
            let child = children
                .get(index)
                .copied()
                .ok_or(GraphError::MissingChild { id, index })?;
            Ok(cx.evaluate(child)?.as_f64())
        };

        let value = match self {
            Self::Add
            | Self::Sub
            | Self::Multiply
            | Self::Divide
            | Self::Modulo
            | Self::Pow
            | Self::Min
            | Self::Max => {
                let mut acc = operand(0)?;
                for index in 1..children.len() {
                    let rhs = operand(index)?;
                    acc = match self {
                        Self::Add => acc + rhs,
                        Self::Sub => acc - rhs,
                        Self::Multiply => acc * rhs,
                        Self::Divide => acc / rhs,
                        Self::Modulo => acc.rem_euclid(rhs),
                        Self::Pow => acc.powf(rhs),
                        Self::Min => acc.min(rhs),
                        _ => acc.max(rhs),
                    };
                }
                NodeValue::Number(acc)
            }
            Self::Abs => NodeValue::Number(operand(0)?.abs()),
            Self::Sqrt => NodeValue::Number(operand(0)?.sqrt()),
            Self::Sin => NodeValue::Number(operand(0)?.sin()),
            Self::Cos => NodeValue::Number(operand(0)?.cos()),
            Self::Exp => NodeValue::Number(operand(0)?.exp()),
            Self::Round => NodeValue::Number(operand(0)?.round()),
            Self::Floor => NodeValue::Number(operand(0)?.floor()),
            Self::Ceil => NodeValue::Number(operand(0)?.ceil()),
            Self::Not => (operand(0)? == 0.0).into(),
            Self::LessThan => (operand(0)? < operand(1)?).into(),
            Self::GreaterThan => (operand(0)? > operand(1)?).into(),
            Self::Eq => (operand(0)? == operand(1)?).into(),
            Self::Neq => (operand(0)? != operand(1)?).into(),
            Self::LessOrEq => (operand(0)? <= operand(1)?).into(),
            Self::GreaterOrEq => (operand(0)? >= operand(1)?).into(),
            // Logic short-circuits: later children are not evaluated
            Self::And => {
                for &child in children {
                    if !cx.evaluate(child)?.is_truthy() {
                        return Ok(false.into());
                    }
                }
                true.into()
            }
            Self::Or => {
                for &child in children {
                    if cx.evaluate(child)?.is_truthy() {
                        return Ok(true.into());
                    }
                }
                false.into()
            }
        };
        Ok(value)
    }
}

/// A CSS-style cubic bezier easing curve through `(0,0)` and `(1,1)`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct BezierCurve {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BezierCurve {
    const EPSILON: f64 = 1e-7;

    fn coefficients(p1: f64, p2: f64) -> (f64, f64, f64) {
        let c = 3.0 * p1;
        let b = 3.0 * (p2 - p1) - c;
        let a = 1.0 - c - b;
        (a, b, c)
    }

    fn sample(p1: f64, p2: f64, t: f64) -> f64 {
        let (a, b, c) = Self::coefficients(p1, p2);
        ((a * t + b) * t + c) * t
    }

    fn slope_x(&self, t: f64) -> f64 {
        let (a, b, c) = Self::coefficients(self.x1, self.x2);
        (3.0 * a * t + 2.0 * b) * t + c
    }

    /// Find the curve parameter whose x coordinate is `x`.
    fn solve_t(&self, x: f64) -> f64 {
        // Newton's method converges fast for well-behaved curves
        let mut t = x;
        for _ in 0..8 {
            let err = Self::sample(self.x1, self.x2, t) - x;
            if err.abs() < Self::EPSILON {
                return t;
            }
            let slope = self.slope_x(t);
            if slope.abs() < 1e-6 {
                break;
            }
            t -= err / slope;
        }

        // Fall back to bisection
        let (mut lo, mut hi) = (0.0, 1.0);
        t = x;
        while lo < hi {
            let sample = Self::sample(self.x1, self.x2, t);
            if (sample - x).abs() < Self::EPSILON {
                break;
            }
            if x > sample {
                lo = t;
            } else {
                hi = t;
            }
            let next = (hi - lo) * 0.5 + lo;
            if next == t {
                break;
            }
            t = next;
        }
        t
    }

    /// Eased output for progress `x`, clamped to `[0, 1]`.
    pub fn solve(&self, x: f64) -> f64 {
        if x.is_nan() {
            return x;
        }
        let x = x.clamp(0.0, 1.0);
        Self::sample(self.y1, self.y2, self.solve_t(x))
    }
}

/// Kind name → constructor lookup used by the registry.
#[derive(Debug, Clone)]
pub struct KindTable {
    constructors: IndexMap<&'static str, Constructor>,
}

impl KindTable {
    /// A table with no kinds registered.
    pub fn empty() -> Self {
        Self {
            constructors: IndexMap::new(),
        }
    }

    /// The table of built-in kinds.
    pub fn builtin() -> Self {
        let mut table = Self::empty();
        table.register("value", |config| {
            #[derive(Deserialize, Default)]
            struct ValueConfig {
                #[serde(default)]
                value: NodeValue,
            }
            let config: ValueConfig = decode(config)?;
            Ok(NodeKind::Value {
                initial: config.value,
            })
        });
        table.register("clock", |_| Ok(NodeKind::Clock));
        table.register("clockStart", |_| Ok(NodeKind::ClockStart));
        table.register("clockStop", |_| Ok(NodeKind::ClockStop));
        table.register("clockTest", |_| Ok(NodeKind::ClockTest));
        table.register("op", |config| {
            #[derive(Deserialize)]
            struct OpConfig {
                op: Operator,
            }
            let config: OpConfig = decode(config)?;
            Ok(NodeKind::Op(config.op))
        });
        table.register("cond", |_| Ok(NodeKind::Cond));
        table.register("set", |_| Ok(NodeKind::Set));
        table.register("block", |_| Ok(NodeKind::Block));
        table.register("always", |_| Ok(NodeKind::Always));
        table.register("props", |config| Ok(NodeKind::Props(decode(config)?)));
        table.register("event", |config| Ok(NodeKind::Event(decode(config)?)));
        table.register("bezier", |config| Ok(NodeKind::Bezier(decode(config)?)));
        table.register("call", |_| Ok(NodeKind::Call));
        table
    }

    /// Register (or replace) the constructor for `name`.
    pub fn register(
        &mut self,
        name: &'static str,
        constructor: Constructor,
    ) -> Option<Constructor> {
        self.constructors.insert(name, constructor)
    }

    /// Look up the constructor for `name`.
    pub fn get(&self, name: &str) -> Option<Constructor> {
        self.constructors.get(name).copied()
    }

    /// Registered kind names, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.constructors.keys().copied()
    }
}

impl Default for KindTable {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Decode a kind config; a missing (`null`) config reads as an empty object.
fn decode<T: DeserializeOwned>(config: &Json) -> std::result::Result<T, serde_json::Error> {
    if config.is_null() {
        T::deserialize(&Json::Object(serde_json::Map::new()))
    } else {
        T::deserialize(config)
    }
}

//! Validated abstract syntax tree for derived field formulas.
//!
//! Nodes defined here only ever come out of the normalizer (or the
//! constructors below, which must be re-validated through
//! [`Compiler::compile_ast`](crate::expr::Compiler::compile_ast) before they
//! are trusted). The tree owns its children, so it is always finite.

use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

use serde::de::{Deserialize, Deserializer, Error as _};
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::expr::normalize::{normalize_with, Limits};

/// Reference to a field on a reporting model.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnRef {
    /// Reporting model identifier (trimmed, non-empty).
    pub model_id: String,
    /// Field identifier within the model (trimmed, non-empty).
    pub field_id: String,
}

impl ColumnRef {
    /// Creates a column reference.
    pub fn new(model_id: impl Into<String>, field_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            field_id: field_id.into(),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.model_id, self.field_id)
    }
}

/// Declared type tag carried by a literal (`valueType`).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LiteralType {
    /// Finite IEEE-754 double.
    Number,
    /// UTF-8 string.
    String,
    /// `true` / `false`.
    Boolean,
}

impl LiteralType {
    /// Every accepted `valueType` tag.
    pub const ALL: [LiteralType; 3] = [
        LiteralType::Number,
        LiteralType::String,
        LiteralType::Boolean,
    ];

    /// Wire name of the tag.
    pub const fn as_str(self) -> &'static str {
        match self {
            LiteralType::Number => "number",
            LiteralType::String => "string",
            LiteralType::Boolean => "boolean",
        }
    }

    /// Parses a wire tag. Matching is exact.
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|ty| ty.as_str() == raw)
    }
}

impl fmt::Display for LiteralType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Literal value. The `valueType` tag is derived from the variant, so a
/// literal can never disagree with its own declared type.
#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    /// Numeric literal.
    Number(f64),
    /// String literal.
    String(String),
    /// Boolean literal.
    Boolean(bool),
}

impl Literal {
    /// Declared type of this literal.
    pub fn value_type(&self) -> LiteralType {
        match self {
            Literal::Number(_) => LiteralType::Number,
            Literal::String(_) => LiteralType::String,
            Literal::Boolean(_) => LiteralType::Boolean,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Number(value) => write!(f, "{value}"),
            Literal::String(value) => write!(f, "'{}'", value.replace('\'', "''")),
            Literal::Boolean(value) => write!(f, "{value}"),
        }
    }
}

/// Arithmetic operators accepted in `binary` nodes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum BinaryOperator {
    /// `+`
    Add,
    /// `-`
    Subtract,
    /// `*`
    Multiply,
    /// `/`
    Divide,
}

impl BinaryOperator {
    /// The closed whitelist of binary operators.
    pub const ALL: [BinaryOperator; 4] = [
        BinaryOperator::Add,
        BinaryOperator::Subtract,
        BinaryOperator::Multiply,
        BinaryOperator::Divide,
    ];

    /// Operator symbol as it appears on the wire.
    pub const fn symbol(self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
        }
    }

    /// Looks up an operator by its exact symbol.
    pub fn from_symbol(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.symbol() == raw)
    }

    /// Binding strength used when rendering infix text.
    pub const fn precedence(self) -> u8 {
        match self {
            BinaryOperator::Add | BinaryOperator::Subtract => 1,
            BinaryOperator::Multiply | BinaryOperator::Divide => 2,
        }
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Sign operators accepted in `unary` nodes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum UnaryOperator {
    /// `+`
    Plus,
    /// `-`
    Minus,
}

impl UnaryOperator {
    /// The closed whitelist of unary operators.
    pub const ALL: [UnaryOperator; 2] = [UnaryOperator::Plus, UnaryOperator::Minus];

    /// Operator symbol as it appears on the wire.
    pub const fn symbol(self) -> &'static str {
        match self {
            UnaryOperator::Plus => "+",
            UnaryOperator::Minus => "-",
        }
    }

    /// Looks up an operator by its exact symbol.
    pub fn from_symbol(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.symbol() == raw)
    }
}

impl fmt::Display for UnaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Built-in functions callable from a formula.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum FunctionName {
    /// `abs(x)`
    Abs,
    /// `ceil(x)`
    Ceil,
    /// `coalesce(a, b, ...)`
    Coalesce,
    /// `floor(x)`
    Floor,
    /// `greatest(a, b, ...)`
    Greatest,
    /// `least(a, b, ...)`
    Least,
    /// `round(x[, digits])`
    Round,
}

impl FunctionName {
    /// The closed whitelist of callable functions, sorted by name.
    pub const ALL: [FunctionName; 7] = [
        FunctionName::Abs,
        FunctionName::Ceil,
        FunctionName::Coalesce,
        FunctionName::Floor,
        FunctionName::Greatest,
        FunctionName::Least,
        FunctionName::Round,
    ];

    /// Canonical lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            FunctionName::Abs => "abs",
            FunctionName::Ceil => "ceil",
            FunctionName::Coalesce => "coalesce",
            FunctionName::Floor => "floor",
            FunctionName::Greatest => "greatest",
            FunctionName::Least => "least",
            FunctionName::Round => "round",
        }
    }

    /// Resolves an authored name. Surrounding whitespace and case are ignored.
    pub fn lookup(raw: &str) -> Option<Self> {
        let name = raw.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|func| func.as_str() == name)
    }
}

impl fmt::Display for FunctionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node of a validated formula.
#[derive(Clone, Debug, PartialEq)]
pub enum ExpressionNode {
    /// Field reference (`type: "column"`).
    Column(ColumnRef),
    /// Constant (`type: "literal"`).
    Literal(Literal),
    /// Arithmetic (`type: "binary"`).
    Binary {
        /// Operator applied to both operands.
        operator: BinaryOperator,
        /// Left operand.
        left: Box<ExpressionNode>,
        /// Right operand.
        right: Box<ExpressionNode>,
    },
    /// Sign change (`type: "unary"`).
    Unary {
        /// Sign operator.
        operator: UnaryOperator,
        /// Operand.
        argument: Box<ExpressionNode>,
    },
    /// Built-in call (`type: "function"`).
    Function {
        /// Normalized function name.
        name: FunctionName,
        /// Call arguments in authored order.
        args: Vec<ExpressionNode>,
    },
}

impl ExpressionNode {
    /// Column reference node.
    pub fn column(model_id: impl Into<String>, field_id: impl Into<String>) -> Self {
        ExpressionNode::Column(ColumnRef::new(model_id, field_id))
    }

    /// Numeric literal node.
    pub fn number(value: f64) -> Self {
        ExpressionNode::Literal(Literal::Number(value))
    }

    /// String literal node.
    pub fn string(value: impl Into<String>) -> Self {
        ExpressionNode::Literal(Literal::String(value.into()))
    }

    /// Boolean literal node.
    pub fn boolean(value: bool) -> Self {
        ExpressionNode::Literal(Literal::Boolean(value))
    }

    /// Binary node.
    pub fn binary(operator: BinaryOperator, left: ExpressionNode, right: ExpressionNode) -> Self {
        ExpressionNode::Binary {
            operator,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Unary node.
    pub fn unary(operator: UnaryOperator, argument: ExpressionNode) -> Self {
        ExpressionNode::Unary {
            operator,
            argument: Box::new(argument),
        }
    }

    /// Function call node.
    pub fn call(name: FunctionName, args: impl IntoIterator<Item = ExpressionNode>) -> Self {
        ExpressionNode::Function {
            name,
            args: args.into_iter().collect(),
        }
    }

    /// Wire discriminant of this node.
    pub fn type_name(&self) -> &'static str {
        match self {
            ExpressionNode::Column(_) => "column",
            ExpressionNode::Literal(_) => "literal",
            ExpressionNode::Binary { .. } => "binary",
            ExpressionNode::Unary { .. } => "unary",
            ExpressionNode::Function { .. } => "function",
        }
    }

    /// Visits every node in pre-order.
    pub fn walk<F>(&self, visitor: &mut F)
    where
        F: FnMut(&ExpressionNode),
    {
        visitor(self);
        match self {
            ExpressionNode::Column(_) | ExpressionNode::Literal(_) => {}
            ExpressionNode::Binary { left, right, .. } => {
                left.walk(visitor);
                right.walk(visitor);
            }
            ExpressionNode::Unary { argument, .. } => argument.walk(visitor),
            ExpressionNode::Function { args, .. } => {
                for arg in args {
                    arg.walk(visitor);
                }
            }
        }
    }

    /// Total number of nodes in the tree.
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        self.walk(&mut |_| count += 1);
        count
    }

    /// Nesting depth in JSON levels, matching the normalizer's budget. A leaf
    /// has depth 1 and a call's `args` array adds a level.
    pub fn depth(&self) -> usize {
        match self {
            ExpressionNode::Column(_) | ExpressionNode::Literal(_) => 1,
            ExpressionNode::Binary { left, right, .. } => 1 + left.depth().max(right.depth()),
            ExpressionNode::Unary { argument, .. } => 1 + argument.depth(),
            ExpressionNode::Function { args, .. } => {
                2 + args.iter().map(ExpressionNode::depth).max().unwrap_or(0)
            }
        }
    }

    fn fmt_operand(
        &self,
        f: &mut fmt::Formatter<'_>,
        parent: BinaryOperator,
        right_side: bool,
    ) -> fmt::Result {
        match self {
            ExpressionNode::Binary { operator, .. }
                if operator.precedence() < parent.precedence()
                    || (right_side && operator.precedence() == parent.precedence()) =>
            {
                write!(f, "({self})")
            }
            _ => write!(f, "{self}"),
        }
    }
}

impl fmt::Display for ExpressionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpressionNode::Column(column) => write!(f, "{column}"),
            ExpressionNode::Literal(literal) => write!(f, "{literal}"),
            ExpressionNode::Binary {
                operator,
                left,
                right,
            } => {
                left.fmt_operand(f, *operator, false)?;
                write!(f, " {operator} ")?;
                right.fmt_operand(f, *operator, true)
            }
            ExpressionNode::Unary { operator, argument } => match argument.as_ref() {
                ExpressionNode::Binary { .. } | ExpressionNode::Unary { .. } => {
                    write!(f, "{operator}({argument})")
                }
                ExpressionNode::Literal(Literal::Number(value)) if value.is_sign_negative() => {
                    write!(f, "{operator}({argument})")
                }
                _ => write!(f, "{operator}{argument}"),
            },
            ExpressionNode::Function { name, args } => {
                write!(f, "{name}(")?;
                for (idx, arg) in args.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
        }
    }
}

impl Serialize for ExpressionNode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            ExpressionNode::Column(column) => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("type", "column")?;
                map.serialize_entry("modelId", &column.model_id)?;
                map.serialize_entry("fieldId", &column.field_id)?;
                map.end()
            }
            ExpressionNode::Literal(literal) => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("type", "literal")?;
                match literal {
                    Literal::Number(value) => map.serialize_entry("value", value)?,
                    Literal::String(value) => map.serialize_entry("value", value)?,
                    Literal::Boolean(value) => map.serialize_entry("value", value)?,
                }
                map.serialize_entry("valueType", &literal.value_type())?;
                map.end()
            }
            ExpressionNode::Binary {
                operator,
                left,
                right,
            } => {
                let mut map = serializer.serialize_map(Some(4))?;
                map.serialize_entry("type", "binary")?;
                map.serialize_entry("operator", operator.symbol())?;
                map.serialize_entry("left", left)?;
                map.serialize_entry("right", right)?;
                map.end()
            }
            ExpressionNode::Unary { operator, argument } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("type", "unary")?;
                map.serialize_entry("operator", operator.symbol())?;
                map.serialize_entry("argument", argument)?;
                map.end()
            }
            ExpressionNode::Function { name, args } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("type", "function")?;
                map.serialize_entry("name", name.as_str())?;
                map.serialize_entry("args", args)?;
                map.end()
            }
        }
    }
}

/// Deserialization always runs the normalizer, under [`Limits::stored`] so a
/// tree accepted by any compiler configuration loads back.
impl<'de> Deserialize<'de> for ExpressionNode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = serde_json::Value::deserialize(deserializer)?;
        normalize_with(&raw, &Limits::stored()).map_err(D::Error::custom)
    }
}

impl Add for ExpressionNode {
    type Output = ExpressionNode;

    fn add(self, rhs: ExpressionNode) -> ExpressionNode {
        ExpressionNode::binary(BinaryOperator::Add, self, rhs)
    }
}

impl Sub for ExpressionNode {
    type Output = ExpressionNode;

    fn sub(self, rhs: ExpressionNode) -> ExpressionNode {
        ExpressionNode::binary(BinaryOperator::Subtract, self, rhs)
    }
}

impl Mul for ExpressionNode {
    type Output = ExpressionNode;

    fn mul(self, rhs: ExpressionNode) -> ExpressionNode {
        ExpressionNode::binary(BinaryOperator::Multiply, self, rhs)
    }
}

impl Div for ExpressionNode {
    type Output = ExpressionNode;

    fn div(self, rhs: ExpressionNode) -> ExpressionNode {
        ExpressionNode::binary(BinaryOperator::Divide, self, rhs)
    }
}

impl Neg for ExpressionNode {
    type Output = ExpressionNode;

    fn neg(self) -> ExpressionNode {
        ExpressionNode::unary(UnaryOperator::Minus, self)
    }
}

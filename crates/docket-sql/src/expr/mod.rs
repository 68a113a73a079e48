//! Expression trees and evaluation.
//!
//! Every expression node evaluates purely against an [`Environment`]:
//! no side effects, three-valued comparison logic, and NULL for any
//! reference that doesn't resolve.

mod aggregate;
mod env;
mod eval;

use std::fmt;

pub use aggregate::Aggregator;
pub use env::{Environment, Param};
pub use eval::{eval, like_match};

use docket_core::{Path, Value, ValueKind};

/// A node of the expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A literal value.
    Literal(Value),
    /// A path into the current document.
    Path(Path),
    /// A `$name` placeholder.
    NamedParam(String),
    /// A `?` placeholder, 1-based.
    PositionalParam(usize),
    /// `*`, valid only in projections.
    Wildcard,
    /// A document literal `{a: 1, b: x + 1}`.
    DocumentLiteral(Vec<(String, Expr)>),
    /// An expression list, from `[1, 2]` or `(1, 2)`.
    List(Vec<Expr>),
    /// A parenthesized expression.
    Parens(Box<Expr>),
    /// `CAST(e AS type)`.
    Cast {
        /// Expression to convert.
        expr: Box<Expr>,
        /// Target type.
        target: ValueKind,
    },
    /// An aggregate function call.
    Aggregate(AggregateFunc),
    /// `PK()`: the current document's key.
    Pk,
    /// A binary operation.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// `x BETWEEN low AND high`.
    Between {
        /// Tested expression.
        expr: Box<Expr>,
        /// Lower bound, inclusive.
        low: Box<Expr>,
        /// Upper bound, inclusive.
        high: Box<Expr>,
    },
    /// Unary `NOT`.
    Not(Box<Expr>),
    /// Unary minus.
    Neg(Box<Expr>),
}

/// Binary operators, in the order of the precedence ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    NotIn,
    Like,
    NotLike,
    Is,
    IsNot,
    BitOr,
    BitXor,
    BitAnd,
    Concat,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOp {
    /// Returns true for =, !=, <, <=, >, >=, IN, LIKE, IS and their
    /// negations.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::Neq
                | BinaryOp::Lt
                | BinaryOp::Lte
                | BinaryOp::Gt
                | BinaryOp::Gte
                | BinaryOp::In
                | BinaryOp::NotIn
                | BinaryOp::Like
                | BinaryOp::NotLike
                | BinaryOp::Is
                | BinaryOp::IsNot
        )
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Or => "OR",
            BinaryOp::And => "AND",
            BinaryOp::Eq => "=",
            BinaryOp::Neq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Lte => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Gte => ">=",
            BinaryOp::In => "IN",
            BinaryOp::NotIn => "NOT IN",
            BinaryOp::Like => "LIKE",
            BinaryOp::NotLike => "NOT LIKE",
            BinaryOp::Is => "IS",
            BinaryOp::IsNot => "IS NOT",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::BitAnd => "&",
            BinaryOp::Concat => "||",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
        };
        write!(f, "{s}")
    }
}

/// An aggregate function appearing in a projection.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregateFunc {
    /// `COUNT(*)`.
    CountWildcard,
    /// `COUNT(e)`: rows where `e` is not NULL.
    Count(Box<Expr>),
    /// `SUM(e)` over numeric values.
    Sum(Box<Expr>),
    /// `AVG(e)`, always a double.
    Avg(Box<Expr>),
    /// `MIN(e)`.
    Min(Box<Expr>),
    /// `MAX(e)`.
    Max(Box<Expr>),
}

impl AggregateFunc {
    /// The canonical rendering, also used as the output field name.
    pub fn name(&self) -> String {
        self.to_string()
    }

    /// Creates a fresh accumulator for one group.
    pub fn aggregator(&self) -> Aggregator {
        Aggregator::new(self)
    }
}

impl fmt::Display for AggregateFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateFunc::CountWildcard => write!(f, "COUNT(*)"),
            AggregateFunc::Count(e) => write!(f, "COUNT({e})"),
            AggregateFunc::Sum(e) => write!(f, "SUM({e})"),
            AggregateFunc::Avg(e) => write!(f, "AVG({e})"),
            AggregateFunc::Min(e) => write!(f, "MIN({e})"),
            AggregateFunc::Max(e) => write!(f, "MAX({e})"),
        }
    }
}

/// A projected expression with an optional alias.
///
/// The parser snapshots the raw source text of the expression; unaliased
/// projections use it as their output field name, so `SELECT a+1` yields
/// a field literally named `a+1`.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedExpr {
    /// The projected expression.
    pub expr: Expr,
    /// `AS` alias, if any.
    pub alias: Option<String>,
    /// Raw source text of the expression, when parsed from SQL.
    pub text: Option<String>,
}

impl NamedExpr {
    /// Creates an unaliased projection.
    pub fn new(expr: Expr) -> Self {
        Self {
            expr,
            alias: None,
            text: None,
        }
    }

    /// The output field name: the alias, the raw source text, or the
    /// canonical rendering of the expression.
    pub fn name(&self) -> String {
        if let Some(alias) = &self.alias {
            return alias.clone();
        }
        if let Some(text) = &self.text {
            return text.clone();
        }
        self.expr.to_string()
    }
}

impl fmt::Display for NamedExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.text {
            Some(text) => write!(f, "{text}")?,
            None => write!(f, "{}", self.expr)?,
        }
        if let Some(alias) = &self.alias {
            write!(f, " AS {alias}")?;
        }
        Ok(())
    }
}

impl Expr {
    /// Wraps a value as a literal node.
    pub fn literal(value: Value) -> Self {
        Expr::Literal(value)
    }

    /// Builds a path node over a single field.
    pub fn field(name: impl Into<String>) -> Self {
        Expr::Path(Path::field(name))
    }

    /// Returns true when the expression references nothing outside
    /// itself: no paths, parameters, wildcards, aggregates or PK().
    pub fn is_constant(&self) -> bool {
        match self {
            Expr::Literal(_) => true,
            Expr::Path(_)
            | Expr::NamedParam(_)
            | Expr::PositionalParam(_)
            | Expr::Wildcard
            | Expr::Aggregate(_)
            | Expr::Pk => false,
            Expr::DocumentLiteral(pairs) => pairs.iter().all(|(_, e)| e.is_constant()),
            Expr::List(items) => items.iter().all(Expr::is_constant),
            Expr::Parens(e) | Expr::Cast { expr: e, .. } | Expr::Not(e) | Expr::Neg(e) => {
                e.is_constant()
            }
            Expr::Binary { left, right, .. } => left.is_constant() && right.is_constant(),
            Expr::Between { expr, low, high } => {
                expr.is_constant() && low.is_constant() && high.is_constant()
            }
        }
    }

    /// Collects the root field of every path referenced by the
    /// expression, for planner pushdown safety checks.
    pub fn referenced_fields(&self, out: &mut Vec<String>) {
        match self {
            Expr::Path(path) => {
                if let Some(field) = path.first_field() {
                    out.push(field.to_string());
                }
            }
            Expr::Literal(_)
            | Expr::NamedParam(_)
            | Expr::PositionalParam(_)
            | Expr::Wildcard
            | Expr::Pk => {}
            Expr::DocumentLiteral(pairs) => {
                for (_, e) in pairs {
                    e.referenced_fields(out);
                }
            }
            Expr::List(items) => {
                for e in items {
                    e.referenced_fields(out);
                }
            }
            Expr::Parens(e) | Expr::Cast { expr: e, .. } | Expr::Not(e) | Expr::Neg(e) => {
                e.referenced_fields(out)
            }
            Expr::Aggregate(func) => match func {
                AggregateFunc::CountWildcard => {}
                AggregateFunc::Count(e)
                | AggregateFunc::Sum(e)
                | AggregateFunc::Avg(e)
                | AggregateFunc::Min(e)
                | AggregateFunc::Max(e) => e.referenced_fields(out),
            },
            Expr::Binary { left, right, .. } => {
                left.referenced_fields(out);
                right.referenced_fields(out);
            }
            Expr::Between { expr, low, high } => {
                expr.referenced_fields(out);
                low.referenced_fields(out);
                high.referenced_fields(out);
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(v) => write!(f, "{v}"),
            Expr::Path(p) => write!(f, "{p}"),
            Expr::NamedParam(name) => write!(f, "${name}"),
            Expr::PositionalParam(_) => write!(f, "?"),
            Expr::Wildcard => write!(f, "*"),
            Expr::DocumentLiteral(pairs) => {
                write!(f, "{{")?;
                for (i, (name, expr)) in pairs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {expr}")?;
                }
                write!(f, "}}")
            }
            Expr::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Expr::Parens(e) => write!(f, "({e})"),
            Expr::Cast { expr, target } => {
                write!(f, "CAST({expr} AS {})", kind_keyword(*target))
            }
            Expr::Aggregate(func) => write!(f, "{func}"),
            Expr::Pk => write!(f, "PK()"),
            Expr::Binary { op, left, right } => write!(f, "{left} {op} {right}"),
            Expr::Between { expr, low, high } => {
                write!(f, "{expr} BETWEEN {low} AND {high}")
            }
            Expr::Not(e) => write!(f, "NOT {e}"),
            Expr::Neg(e) => write!(f, "-{e}"),
        }
    }
}

/// Renders a value kind as the SQL keyword that parses back to it.
pub fn kind_keyword(kind: ValueKind) -> &'static str {
    match kind {
        ValueKind::Null => "NULL",
        ValueKind::Bool => "BOOL",
        ValueKind::Integer => "INTEGER",
        ValueKind::Double => "DOUBLE",
        ValueKind::Text => "TEXT",
        ValueKind::Blob => "BLOB",
        ValueKind::Array => "ARRAY",
        ValueKind::Document => "DOCUMENT",
    }
}

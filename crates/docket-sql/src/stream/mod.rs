//! Stream operators.
//!
//! A statement executes as a linear chain of operator stages driven in a
//! single cooperative pass: each stage consumes one upstream environment
//! and invokes its downstream zero or more times. The chain is a plain
//! vector of enum values so the planner can inspect and rewrite it.

mod exec;

use std::fmt;

use docket_core::{Document, Path, Value};

use crate::expr::{AggregateFunc, Expr, NamedExpr};

/// One bound of values over an index or primary key scan.
///
/// Bounds compare tuple-wise against the scanned values; a bound shorter
/// than the indexed paths constrains only the leading slots.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IndexRange {
    /// Lower bound, `None` for unbounded.
    pub min: Option<Vec<Value>>,
    /// Upper bound, `None` for unbounded.
    pub max: Option<Vec<Value>>,
    /// Whether the lower bound itself is excluded.
    pub min_exclusive: bool,
    /// Whether the upper bound itself is excluded.
    pub max_exclusive: bool,
}

impl IndexRange {
    /// A range matching exactly one value tuple.
    pub fn exact(values: Vec<Value>) -> Self {
        Self {
            min: Some(values.clone()),
            max: Some(values),
            min_exclusive: false,
            max_exclusive: false,
        }
    }

    /// Returns the exact value tuple if this range pins one.
    pub fn as_exact(&self) -> Option<&[Value]> {
        match (&self.min, &self.max) {
            (Some(min), Some(max))
                if min == max && !self.min_exclusive && !self.max_exclusive =>
            {
                Some(min)
            }
            _ => None,
        }
    }

    fn fmt_with_paths(&self, paths: &[Path], f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path_name = |i: usize| -> String {
            paths
                .get(i)
                .map(|p| p.to_string())
                .unwrap_or_else(|| "pk".to_string())
        };
        if let Some(values) = self.as_exact() {
            for (i, v) in values.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}={v}", path_name(i))?;
            }
            return Ok(());
        }
        let mut wrote = false;
        if let Some(min) = &self.min {
            let i = min.len().saturating_sub(1);
            let op = if self.min_exclusive { ">" } else { ">=" };
            write!(f, "{} {op} {}", path_name(i), min[i])?;
            wrote = true;
        }
        if let Some(max) = &self.max {
            if wrote {
                write!(f, " AND ")?;
            }
            let i = max.len().saturating_sub(1);
            let op = if self.max_exclusive { "<" } else { "<=" };
            write!(f, "{} {op} {}", path_name(i), max[i])?;
        }
        Ok(())
    }
}

/// One stage of a stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamOperator {
    /// Emits in-memory documents.
    Docs(Vec<Document>),
    /// Evaluates expressions into documents and emits them.
    Expressions(Vec<Expr>),
    /// Scans a table in key order.
    SeqScan {
        /// Scanned table.
        table: String,
        /// Descending key order when true.
        reverse: bool,
    },
    /// Scans a table over primary key ranges.
    PkScan {
        /// Scanned table.
        table: String,
        /// Key ranges, in scan order.
        ranges: Vec<IndexRange>,
        /// Descending key order when true.
        reverse: bool,
    },
    /// Scans an index over value ranges, fetching each referenced row.
    IndexScan {
        /// Index name.
        index: String,
        /// Indexed paths, for display and bound checks.
        paths: Vec<Path>,
        /// Value ranges, in scan order.
        ranges: Vec<IndexRange>,
        /// Descending index order when true.
        reverse: bool,
    },
    /// Passes environments whose predicate is truthy.
    Filter(Expr),
    /// Replaces the document with named projections.
    Project(Vec<NamedExpr>),
    /// Replaces the document with the result of an expression.
    Map(Expr),
    /// Rewrites one path of the document.
    Set {
        /// Target path.
        path: Path,
        /// Value expression.
        expr: Expr,
    },
    /// Removes one top-level field of the document.
    Unset(String),
    /// Inserts the document into a table, assigning its key.
    TableInsert {
        /// Target table.
        table: String,
    },
    /// Rewrites the document at the environment's current key.
    TableReplace {
        /// Target table.
        table: String,
    },
    /// Deletes the document at the environment's current key.
    TableDelete {
        /// Target table.
        table: String,
    },
    /// Materializes the upstream and re-emits in sorted order.
    Sort {
        /// Sort key expression.
        expr: Expr,
        /// Descending order when true.
        desc: bool,
    },
    /// Tags each environment with its group key.
    GroupBy(Expr),
    /// Partitions by group key and accumulates aggregates per group.
    HashAggregate(Vec<AggregateFunc>),
    /// Stops after `n` emissions.
    Take(i64),
    /// Drops the first `n` environments.
    Skip(i64),
}

impl fmt::Display for StreamOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamOperator::Docs(docs) => {
                write!(f, "docs(")?;
                for (i, d) in docs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{d}")?;
                }
                write!(f, ")")
            }
            StreamOperator::Expressions(exprs) => {
                write!(f, "expressions(")?;
                for (i, e) in exprs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{e}")?;
                }
                write!(f, ")")
            }
            StreamOperator::SeqScan { table, reverse } => {
                if *reverse {
                    write!(f, "seqScanReverse({table})")
                } else {
                    write!(f, "seqScan({table})")
                }
            }
            StreamOperator::PkScan {
                table,
                ranges,
                reverse,
            } => {
                if *reverse {
                    write!(f, "pkScanReverse({table}")?;
                } else {
                    write!(f, "pkScan({table}")?;
                }
                for range in ranges {
                    write!(f, ", ")?;
                    range.fmt_with_paths(&[], f)?;
                }
                write!(f, ")")
            }
            StreamOperator::IndexScan {
                index,
                paths,
                ranges,
                reverse,
            } => {
                if *reverse {
                    write!(f, "indexScanReverse({index}")?;
                } else {
                    write!(f, "indexScan({index}")?;
                }
                for (i, range) in ranges.iter().enumerate() {
                    write!(f, "{}", if i == 0 { ", " } else { " OR " })?;
                    range.fmt_with_paths(paths, f)?;
                }
                write!(f, ")")
            }
            StreamOperator::Filter(e) => write!(f, "filter({e})"),
            StreamOperator::Project(exprs) => {
                write!(f, "project(")?;
                for (i, ne) in exprs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{ne}")?;
                }
                write!(f, ")")
            }
            StreamOperator::Map(e) => write!(f, "map({e})"),
            StreamOperator::Set { path, expr } => write!(f, "set({path}, {expr})"),
            StreamOperator::Unset(field) => write!(f, "unset({field})"),
            StreamOperator::TableInsert { table } => write!(f, "tableInsert({table})"),
            StreamOperator::TableReplace { table } => write!(f, "tableReplace({table})"),
            StreamOperator::TableDelete { table } => write!(f, "tableDelete({table})"),
            StreamOperator::Sort { expr, desc } => {
                if *desc {
                    write!(f, "sort({expr} DESC)")
                } else {
                    write!(f, "sort({expr})")
                }
            }
            StreamOperator::GroupBy(e) => write!(f, "groupBy({e})"),
            StreamOperator::HashAggregate(funcs) => {
                write!(f, "hashAggregate(")?;
                for (i, func) in funcs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{func}")?;
                }
                write!(f, ")")
            }
            StreamOperator::Take(n) => write!(f, "take({n})"),
            StreamOperator::Skip(n) => write!(f, "skip({n})"),
        }
    }
}

/// A linear chain of operator stages.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Stream {
    /// The stages, source first.
    pub ops: Vec<StreamOperator>,
}

impl Stream {
    /// Creates a stream from a source operator.
    pub fn new(source: StreamOperator) -> Self {
        Self { ops: vec![source] }
    }

    /// Appends a stage.
    pub fn pipe(mut self, op: StreamOperator) -> Self {
        self.ops.push(op);
        self
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, op) in self.ops.iter().enumerate() {
            if i > 0 {
                write!(f, " | ")?;
            }
            write!(f, "{op}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docket_core::Value;

    #[test]
    fn test_display_pipe_form() {
        let s = Stream::new(StreamOperator::SeqScan {
            table: "t".to_string(),
            reverse: false,
        })
        .pipe(StreamOperator::Filter(Expr::Binary {
            op: crate::expr::BinaryOp::Gt,
            left: Box::new(Expr::field("a")),
            right: Box::new(Expr::Literal(Value::Integer(1))),
        }))
        .pipe(StreamOperator::Take(10));

        assert_eq!(s.to_string(), "seqScan(t) | filter(a > 1) | take(10)");
    }

    #[test]
    fn test_index_scan_display() {
        let op = StreamOperator::IndexScan {
            index: "ix".to_string(),
            paths: vec![Path::field("x")],
            ranges: vec![IndexRange::exact(vec![Value::Integer(5)])],
            reverse: false,
        };
        assert_eq!(op.to_string(), "indexScan(ix, x=5)");

        let op = StreamOperator::IndexScan {
            index: "ix".to_string(),
            paths: vec![Path::field("x")],
            ranges: vec![IndexRange {
                min: Some(vec![Value::Integer(1)]),
                max: Some(vec![Value::Integer(9)]),
                min_exclusive: true,
                max_exclusive: false,
            }],
            reverse: false,
        };
        assert_eq!(op.to_string(), "indexScan(ix, x > 1 AND x <= 9)");
    }
}

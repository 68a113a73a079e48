//! Aggregate accumulators.
//!
//! Each [`AggregateFunc`] builds one [`Aggregator`] per group; the
//! aggregate stage feeds it every row of the group and reads the final
//! value out at the end.

use docket_core::Value;

use crate::error::SqlResult;

use super::{eval, AggregateFunc, Environment, Expr};

/// A running accumulator for one aggregate in one group.
#[derive(Debug)]
pub enum Aggregator {
    /// `COUNT(*)` / `COUNT(e)`.
    Count {
        /// Counted expression, `None` for the wildcard form.
        expr: Option<Expr>,
        /// Rows counted so far.
        count: i64,
        /// Canonical output name.
        name: String,
    },
    /// `SUM(e)`: integer until a double appears, NULL without numeric
    /// input.
    Sum {
        /// Summed expression.
        expr: Expr,
        /// Running total.
        sum: Option<Value>,
        /// Canonical output name.
        name: String,
    },
    /// `AVG(e)`: always a double, 0.0 without numeric input.
    Avg {
        /// Averaged expression.
        expr: Expr,
        /// Sum of numeric inputs.
        sum: f64,
        /// Count of numeric inputs.
        count: i64,
        /// Canonical output name.
        name: String,
    },
    /// `MIN(e)` under the total value ordering.
    Min {
        /// Tracked expression.
        expr: Expr,
        /// Smallest value seen.
        min: Option<Value>,
        /// Canonical output name.
        name: String,
    },
    /// `MAX(e)` under the total value ordering.
    Max {
        /// Tracked expression.
        expr: Expr,
        /// Largest value seen.
        max: Option<Value>,
        /// Canonical output name.
        name: String,
    },
}

impl Aggregator {
    pub(super) fn new(func: &AggregateFunc) -> Self {
        let name = func.name();
        match func {
            AggregateFunc::CountWildcard => Aggregator::Count {
                expr: None,
                count: 0,
                name,
            },
            AggregateFunc::Count(e) => Aggregator::Count {
                expr: Some((**e).clone()),
                count: 0,
                name,
            },
            AggregateFunc::Sum(e) => Aggregator::Sum {
                expr: (**e).clone(),
                sum: None,
                name,
            },
            AggregateFunc::Avg(e) => Aggregator::Avg {
                expr: (**e).clone(),
                sum: 0.0,
                count: 0,
                name,
            },
            AggregateFunc::Min(e) => Aggregator::Min {
                expr: (**e).clone(),
                min: None,
                name,
            },
            AggregateFunc::Max(e) => Aggregator::Max {
                expr: (**e).clone(),
                max: None,
                name,
            },
        }
    }

    /// The output field name.
    pub fn name(&self) -> &str {
        match self {
            Aggregator::Count { name, .. }
            | Aggregator::Sum { name, .. }
            | Aggregator::Avg { name, .. }
            | Aggregator::Min { name, .. }
            | Aggregator::Max { name, .. } => name,
        }
    }

    /// Feeds one row into the accumulator.
    pub fn aggregate(&mut self, env: &Environment<'_>) -> SqlResult<()> {
        match self {
            Aggregator::Count { expr, count, .. } => {
                match expr {
                    None => *count += 1,
                    Some(e) => {
                        if !eval(e, env)?.is_null() {
                            *count += 1;
                        }
                    }
                }
                Ok(())
            }
            Aggregator::Sum { expr, sum, .. } => {
                let v = eval(expr, env)?;
                match (&v, sum.as_mut()) {
                    (Value::Integer(_) | Value::Double(_), None) => *sum = Some(v),
                    (Value::Integer(b), Some(total)) => {
                        *total = add_numeric(total, *b as f64, Some(*b));
                    }
                    (Value::Double(b), Some(total)) => {
                        *total = add_numeric(total, *b, None);
                    }
                    _ => {}
                }
                Ok(())
            }
            Aggregator::Avg {
                expr, sum, count, ..
            } => {
                if let Some(v) = eval(expr, env)?.as_f64() {
                    *sum += v;
                    *count += 1;
                }
                Ok(())
            }
            Aggregator::Min { expr, min, .. } => {
                let v = eval(expr, env)?;
                if !v.is_null() {
                    match min {
                        Some(current) if v.sort_cmp(current).is_lt() => *min = Some(v),
                        None => *min = Some(v),
                        _ => {}
                    }
                }
                Ok(())
            }
            Aggregator::Max { expr, max, .. } => {
                let v = eval(expr, env)?;
                if !v.is_null() {
                    match max {
                        Some(current) if v.sort_cmp(current).is_gt() => *max = Some(v),
                        None => *max = Some(v),
                        _ => {}
                    }
                }
                Ok(())
            }
        }
    }

    /// Reads the final value out.
    pub fn finish(&self) -> Value {
        match self {
            Aggregator::Count { count, .. } => Value::Integer(*count),
            Aggregator::Sum { sum, .. } => sum.clone().unwrap_or(Value::Null),
            Aggregator::Avg { sum, count, .. } => {
                if *count == 0 {
                    Value::Double(0.0)
                } else {
                    Value::Double(sum / *count as f64)
                }
            }
            Aggregator::Min { min, .. } => min.clone().unwrap_or(Value::Null),
            Aggregator::Max { max, .. } => max.clone().unwrap_or(Value::Null),
        }
    }
}

/// Adds a numeric value onto a running sum, staying Integer for as long
/// as every input is an integer that doesn't overflow.
fn add_numeric(total: &Value, as_double: f64, as_int: Option<i64>) -> Value {
    match (total, as_int) {
        (Value::Integer(a), Some(b)) => a
            .checked_add(b)
            .map(Value::Integer)
            .unwrap_or(Value::Double(*a as f64 + as_double)),
        (Value::Integer(a), None) => Value::Double(*a as f64 + as_double),
        (Value::Double(a), _) => Value::Double(a + as_double),
        _ => Value::Double(as_double),
    }
}

//! Rule-based stream rewriter.
//!
//! The planner rewrites a compiled stream to a fixpoint: parameters are
//! bound, constant sub-expressions folded, conjunctive filters split,
//! selections pushed below projections, index and primary key scans
//! picked up, redundant sorts removed, and no-op operators dropped. A
//! constant-false filter proves the stream empty, in which case
//! [`optimize`] returns `None` and the executor yields nothing.

use std::cmp::Ordering;

use tracing::debug;

use docket_core::{Path, Transaction, Value};

use crate::error::SqlResult;
use crate::expr::{eval, AggregateFunc, BinaryOp, Environment, Expr, Param};
use crate::stream::{IndexRange, Stream, StreamOperator};

const MAX_PASSES: usize = 10;

/// Optimizes a stream against the current catalog and parameters.
///
/// Returns `None` when the stream is proven to yield no rows.
pub fn optimize(
    mut stream: Stream,
    tx: &Transaction,
    params: &[Param],
) -> SqlResult<Option<Stream>> {
    bind_params(&mut stream, params);

    for _ in 0..MAX_PASSES {
        let mut changed = false;
        changed |= fold_constants(&mut stream, tx, params);
        changed |= split_and_filters(&mut stream);
        changed |= push_down_filters(&mut stream);
        match remove_useless(&mut stream) {
            Useless::ProvenEmpty => {
                debug!("stream proven empty");
                return Ok(None);
            }
            Useless::Changed => changed = true,
            Useless::Unchanged => {}
        }
        changed |= select_index(&mut stream, tx);
        changed |= use_scan_order(&mut stream, tx);
        if !changed {
            break;
        }
    }
    Ok(Some(stream))
}

/// Applies a function to every top-level expression slot of a stream.
fn for_each_expr(stream: &mut Stream, f: &mut impl FnMut(&mut Expr) -> bool) -> bool {
    let mut changed = false;
    for op in &mut stream.ops {
        match op {
            StreamOperator::Filter(e)
            | StreamOperator::Map(e)
            | StreamOperator::GroupBy(e)
            | StreamOperator::Sort { expr: e, .. }
            | StreamOperator::Set { expr: e, .. } => changed |= f(e),
            StreamOperator::Expressions(exprs) => {
                for e in exprs {
                    changed |= f(e);
                }
            }
            StreamOperator::Project(nes) => {
                for ne in nes {
                    changed |= f(&mut ne.expr);
                }
            }
            StreamOperator::HashAggregate(funcs) => {
                for func in funcs {
                    match func {
                        AggregateFunc::CountWildcard => {}
                        AggregateFunc::Count(e)
                        | AggregateFunc::Sum(e)
                        | AggregateFunc::Avg(e)
                        | AggregateFunc::Min(e)
                        | AggregateFunc::Max(e) => changed |= f(e),
                    }
                }
            }
            _ => {}
        }
    }
    changed
}

// =============================================================================
// Rule: bind parameters
// =============================================================================

fn bind_params(stream: &mut Stream, params: &[Param]) {
    if params.is_empty() {
        return;
    }
    for_each_expr(stream, &mut |e| bind_expr(e, params));
}

fn bind_expr(e: &mut Expr, params: &[Param]) -> bool {
    let mut changed = false;
    match e {
        Expr::NamedParam(name) => {
            if let Some(p) = params.iter().find(|p| p.name.as_deref() == Some(name)) {
                *e = Expr::Literal(p.value.clone());
                changed = true;
            }
        }
        Expr::PositionalParam(n) => {
            if let Some(p) = params
                .iter()
                .filter(|p| p.name.is_none())
                .nth(n.saturating_sub(1))
            {
                *e = Expr::Literal(p.value.clone());
                changed = true;
            }
        }
        _ => {
            changed |= visit_children(e, &mut |child| bind_expr(child, params));
        }
    }
    changed
}

fn visit_children(e: &mut Expr, f: &mut impl FnMut(&mut Expr) -> bool) -> bool {
    let mut changed = false;
    match e {
        Expr::Binary { left, right, .. } => {
            changed |= f(left);
            changed |= f(right);
        }
        Expr::Between { expr, low, high } => {
            changed |= f(expr);
            changed |= f(low);
            changed |= f(high);
        }
        Expr::Parens(inner)
        | Expr::Cast { expr: inner, .. }
        | Expr::Not(inner)
        | Expr::Neg(inner) => changed |= f(inner),
        Expr::List(items) => {
            for item in items {
                changed |= f(item);
            }
        }
        Expr::DocumentLiteral(pairs) => {
            for (_, value) in pairs {
                changed |= f(value);
            }
        }
        Expr::Aggregate(func) => match func {
            AggregateFunc::CountWildcard => {}
            AggregateFunc::Count(inner)
            | AggregateFunc::Sum(inner)
            | AggregateFunc::Avg(inner)
            | AggregateFunc::Min(inner)
            | AggregateFunc::Max(inner) => changed |= f(inner),
        },
        _ => {}
    }
    changed
}

// =============================================================================
// Rule: constant folding
// =============================================================================

fn fold_constants(stream: &mut Stream, tx: &Transaction, params: &[Param]) -> bool {
    let env = Environment::new(tx, params);
    for_each_expr(stream, &mut |e| fold_expr(e, &env))
}

fn fold_expr(e: &mut Expr, env: &Environment<'_>) -> bool {
    let mut changed = visit_children(e, &mut |child| fold_expr(child, env));
    if !matches!(e, Expr::Literal(_)) && e.is_constant() {
        if let Ok(v) = eval(e, env) {
            *e = Expr::Literal(v);
            changed = true;
        }
    }
    changed
}

// =============================================================================
// Rule: split conjunctive filters
// =============================================================================

fn split_and_filters(stream: &mut Stream) -> bool {
    let mut changed = false;
    let mut i = 0;
    while i < stream.ops.len() {
        // Unwrap parenthesized predicates so the other rules can see
        // their shape.
        if let StreamOperator::Filter(Expr::Parens(inner)) = &stream.ops[i] {
            stream.ops[i] = StreamOperator::Filter((**inner).clone());
            changed = true;
            continue;
        }
        if let StreamOperator::Filter(Expr::Binary {
            op: BinaryOp::And,
            left,
            right,
        }) = &stream.ops[i]
        {
            let (left, right) = ((**left).clone(), (**right).clone());
            stream.ops[i] = StreamOperator::Filter(left);
            stream.ops.insert(i + 1, StreamOperator::Filter(right));
            changed = true;
            continue;
        }
        i += 1;
    }
    changed
}

// =============================================================================
// Rule: push selections below projections
// =============================================================================

fn push_down_filters(stream: &mut Stream) -> bool {
    let mut changed = false;
    let mut i = 1;
    while i < stream.ops.len() {
        let can_push = if let StreamOperator::Filter(pred) = &stream.ops[i] {
            let mut refs = Vec::new();
            pred.referenced_fields(&mut refs);
            match &stream.ops[i - 1] {
                StreamOperator::Project(nes) => {
                    let has_wildcard = nes.iter().any(|ne| matches!(ne.expr, Expr::Wildcard));
                    let redefines = nes
                        .iter()
                        .filter(|ne| !matches!(ne.expr, Expr::Wildcard))
                        .any(|ne| refs.contains(&ne.name()));
                    has_wildcard && !redefines
                }
                StreamOperator::Set { path, .. } => path
                    .first_field()
                    .is_some_and(|field| !refs.iter().any(|r| r == field)),
                StreamOperator::Unset(field) => !refs.iter().any(|r| r == field),
                _ => false,
            }
        } else {
            false
        };

        if can_push && i >= 2 {
            stream.ops.swap(i - 1, i);
            changed = true;
            // The filter may keep sinking on the next pass.
            i = i.saturating_sub(1).max(1);
        } else {
            i += 1;
        }
    }
    changed
}

// =============================================================================
// Rule: drop no-op operators, detect provably empty streams
// =============================================================================

enum Useless {
    ProvenEmpty,
    Changed,
    Unchanged,
}

fn remove_useless(stream: &mut Stream) -> Useless {
    let mut changed = false;
    let mut i = 0;
    while i < stream.ops.len() {
        match &stream.ops[i] {
            StreamOperator::Filter(Expr::Literal(v)) => {
                if v.is_truthy() {
                    stream.ops.remove(i);
                    changed = true;
                    continue;
                }
                // A constant falsy filter rejects every row; since
                // filters always precede write operators, the whole
                // stream is a no-op.
                return Useless::ProvenEmpty;
            }
            StreamOperator::Skip(0) => {
                stream.ops.remove(i);
                changed = true;
                continue;
            }
            StreamOperator::Take(0) => return Useless::ProvenEmpty,
            _ => {}
        }
        i += 1;
    }
    if changed {
        Useless::Changed
    } else {
        Useless::Unchanged
    }
}

// =============================================================================
// Rule: pick up indexes
// =============================================================================

/// A predicate usable for an index lookup.
#[derive(Debug, Clone)]
enum Pred {
    Eq(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Between(Value, Value),
    /// Combined one-sided bounds; the flag marks an exclusive bound.
    Range {
        lo: Option<(Value, bool)>,
        hi: Option<(Value, bool)>,
    },
}

fn classify(e: &Expr) -> Option<(Path, Pred)> {
    match e {
        Expr::Binary { op, left, right } => {
            let (path, value, flipped) = match (left.as_ref(), right.as_ref()) {
                (Expr::Path(p), Expr::Literal(v)) => (p.clone(), v.clone(), false),
                (Expr::Literal(v), Expr::Path(p)) => (p.clone(), v.clone(), true),
                _ => return None,
            };
            if value.is_null() {
                return None;
            }
            let pred = match (op, flipped) {
                (BinaryOp::Eq, _) => Pred::Eq(value),
                (BinaryOp::Gt, false) | (BinaryOp::Lt, true) => Pred::Gt(value),
                (BinaryOp::Gte, false) | (BinaryOp::Lte, true) => Pred::Gte(value),
                (BinaryOp::Lt, false) | (BinaryOp::Gt, true) => Pred::Lt(value),
                (BinaryOp::Lte, false) | (BinaryOp::Gte, true) => Pred::Lte(value),
                (BinaryOp::In, false) => match value {
                    Value::Array(items) if !items.is_empty() => Pred::In(items),
                    _ => return None,
                },
                _ => return None,
            };
            Some((path, pred))
        }
        Expr::Between { expr, low, high } => match (expr.as_ref(), low.as_ref(), high.as_ref()) {
            (Expr::Path(p), Expr::Literal(lo), Expr::Literal(hi))
                if !lo.is_null() && !hi.is_null() =>
            {
                Some((p.clone(), Pred::Between(lo.clone(), hi.clone())))
            }
            _ => None,
        },
        _ => None,
    }
}

struct Candidate {
    /// `None` targets the primary key, otherwise the named index.
    index: Option<(String, Vec<Path>)>,
    unique: bool,
    /// Filter op indices consumed by this candidate.
    used: Vec<usize>,
    eq_prefix: Vec<Value>,
    last: Option<Pred>,
}

impl Candidate {
    fn score(&self) -> usize {
        self.eq_prefix.len() + usize::from(self.last.is_some())
    }
}

fn select_index(stream: &mut Stream, tx: &Transaction) -> bool {
    let table = match stream.ops.first() {
        Some(StreamOperator::SeqScan {
            table,
            reverse: false,
        }) => table.clone(),
        _ => return false,
    };
    let Ok(info) = tx.catalog().get_table(&table) else {
        return false;
    };

    // Classify the contiguous run of filters following the scan.
    let mut preds: Vec<(usize, Path, Pred)> = Vec::new();
    for (i, op) in stream.ops.iter().enumerate().skip(1) {
        match op {
            StreamOperator::Filter(e) => {
                if let Some((path, pred)) = classify(e) {
                    preds.push((i, path, pred));
                }
            }
            _ => break,
        }
    }
    if preds.is_empty() {
        return false;
    }

    let mut candidates = Vec::new();
    if let Some(pk) = info.primary_key() {
        if let Some(candidate) = match_candidate(None, &[pk.path.clone()], true, &preds) {
            candidates.push(candidate);
        }
    }
    for index in tx.catalog().indexes_for_table(&table) {
        if let Some(candidate) = match_candidate(
            Some((index.name.clone(), index.paths.clone())),
            &index.paths,
            index.unique,
            &preds,
        ) {
            candidates.push(candidate);
        }
    }

    // Most leading paths wins; unique breaks ties, the primary key wins
    // over an equally-covering unique index.
    let Some(best) = candidates.into_iter().max_by_key(|c| {
        (c.score(), c.unique, c.index.is_none())
    }) else {
        return false;
    };
    if best.score() == 0 {
        return false;
    }

    let ranges = build_ranges(&best.eq_prefix, &best.last);
    for &i in best.used.iter().rev() {
        stream.ops.remove(i);
    }
    stream.ops[0] = match best.index {
        None => StreamOperator::PkScan {
            table,
            ranges,
            reverse: false,
        },
        Some((name, paths)) => StreamOperator::IndexScan {
            index: name,
            paths,
            ranges,
            reverse: false,
        },
    };
    true
}

/// Matches a candidate key layout against the classified predicates:
/// an equality per leading path, optionally ending with one range, IN
/// or BETWEEN on the next path.
fn match_candidate(
    index: Option<(String, Vec<Path>)>,
    paths: &[Path],
    unique: bool,
    preds: &[(usize, Path, Pred)],
) -> Option<Candidate> {
    let mut used = Vec::new();
    let mut eq_prefix = Vec::new();
    let mut last = None;

    for path in paths {
        let matching: Vec<&(usize, Path, Pred)> =
            preds.iter().filter(|(_, p, _)| p == path).collect();
        if matching.is_empty() {
            break;
        }

        if let Some((i, _, Pred::Eq(v))) = matching
            .iter()
            .find(|(_, _, pred)| matches!(pred, Pred::Eq(_)))
        {
            eq_prefix.push(v.clone());
            used.push(*i);
            continue;
        }

        // No equality: this path ends the prefix, possibly with a range.
        // Combine one-sided bounds so `x >= a AND x < b` becomes a
        // single range.
        let mut lower: Option<(usize, Value, bool)> = None;
        let mut upper: Option<(usize, Value, bool)> = None;
        let mut single: Option<(usize, Pred)> = None;
        for (i, _, pred) in &matching {
            match pred {
                Pred::Gt(v) if lower.is_none() => lower = Some((*i, v.clone(), true)),
                Pred::Gte(v) if lower.is_none() => lower = Some((*i, v.clone(), false)),
                Pred::Lt(v) if upper.is_none() => upper = Some((*i, v.clone(), true)),
                Pred::Lte(v) if upper.is_none() => upper = Some((*i, v.clone(), false)),
                Pred::In(_) | Pred::Between(_, _) if single.is_none() => {
                    single = Some((*i, pred.clone()))
                }
                _ => {}
            }
        }
        match (lower, upper, single) {
            (None, None, Some((i, pred))) => {
                used.push(i);
                last = Some(pred);
            }
            (None, None, None) => {}
            (lo, hi, _) => {
                if let Some((i, _, _)) = &lo {
                    used.push(*i);
                }
                if let Some((i, _, _)) = &hi {
                    used.push(*i);
                }
                last = Some(Pred::Range {
                    lo: lo.map(|(_, v, ex)| (v, ex)),
                    hi: hi.map(|(_, v, ex)| (v, ex)),
                });
            }
        }
        break;
    }

    if eq_prefix.is_empty() && last.is_none() {
        return None;
    }
    used.sort_unstable();
    Some(Candidate {
        index,
        unique,
        used,
        eq_prefix,
        last,
    })
}

fn build_ranges(eq_prefix: &[Value], last: &Option<Pred>) -> Vec<IndexRange> {
    let with_last = |v: &Value| -> Vec<Value> {
        let mut values = eq_prefix.to_vec();
        values.push(v.clone());
        values
    };
    let prefix_bound = || -> Option<Vec<Value>> {
        if eq_prefix.is_empty() {
            None
        } else {
            Some(eq_prefix.to_vec())
        }
    };

    match last {
        None => vec![IndexRange::exact(eq_prefix.to_vec())],
        Some(Pred::Eq(v)) => vec![IndexRange::exact(with_last(v))],
        Some(Pred::Gt(v)) => vec![IndexRange {
            min: Some(with_last(v)),
            max: prefix_bound(),
            min_exclusive: true,
            max_exclusive: false,
        }],
        Some(Pred::Gte(v)) => vec![IndexRange {
            min: Some(with_last(v)),
            max: prefix_bound(),
            min_exclusive: false,
            max_exclusive: false,
        }],
        Some(Pred::Lt(v)) => vec![IndexRange {
            min: prefix_bound(),
            max: Some(with_last(v)),
            min_exclusive: false,
            max_exclusive: true,
        }],
        Some(Pred::Lte(v)) => vec![IndexRange {
            min: prefix_bound(),
            max: Some(with_last(v)),
            min_exclusive: false,
            max_exclusive: false,
        }],
        Some(Pred::Between(lo, hi)) => vec![IndexRange {
            min: Some(with_last(lo)),
            max: Some(with_last(hi)),
            min_exclusive: false,
            max_exclusive: false,
        }],
        Some(Pred::In(items)) => {
            let mut sorted = items.clone();
            sorted.sort_by(|a, b| a.sort_cmp(b));
            sorted
                .into_iter()
                .map(|v| IndexRange::exact(with_last(&v)))
                .collect()
        }
        Some(Pred::Range { lo, hi }) => vec![IndexRange {
            min: lo.as_ref().map(|(v, _)| with_last(v)),
            max: hi.as_ref().map(|(v, _)| with_last(v)),
            min_exclusive: lo.as_ref().is_some_and(|(_, ex)| *ex),
            max_exclusive: hi.as_ref().is_some_and(|(_, ex)| *ex),
        }],
    }
}

// =============================================================================
// Rule: use scan order instead of sorting
// =============================================================================

fn use_scan_order(stream: &mut Stream, tx: &Transaction) -> bool {
    let sort_idx = stream.ops.iter().position(|op| {
        matches!(
            op,
            StreamOperator::Sort {
                expr: Expr::Path(_),
                ..
            }
        )
    });
    let Some(sort_idx) = sort_idx else {
        return false;
    };

    // Only order-preserving, one-to-one operators may sit between the
    // scan and the sort.
    let order_preserved = stream.ops[1..sort_idx].iter().all(|op| {
        matches!(
            op,
            StreamOperator::Filter(_)
                | StreamOperator::Project(_)
                | StreamOperator::Map(_)
                | StreamOperator::Set { .. }
                | StreamOperator::Unset(_)
        )
    });
    if !order_preserved {
        return false;
    }

    let StreamOperator::Sort {
        expr: Expr::Path(sort_path),
        desc,
    } = stream.ops[sort_idx].clone()
    else {
        return false;
    };

    let matches_scan = match &stream.ops[0] {
        StreamOperator::IndexScan {
            paths,
            reverse: false,
            ..
        } => paths.first() == Some(&sort_path),
        StreamOperator::SeqScan {
            table,
            reverse: false,
        }
        | StreamOperator::PkScan {
            table,
            reverse: false,
            ..
        } => tx
            .catalog()
            .get_table(table)
            .ok()
            .and_then(|info| info.primary_key().map(|pk| pk.path == sort_path))
            .unwrap_or(false),
        _ => false,
    };
    if !matches_scan {
        return false;
    }

    stream.ops.remove(sort_idx);
    if desc {
        match &mut stream.ops[0] {
            StreamOperator::SeqScan { reverse, .. }
            | StreamOperator::PkScan { reverse, .. }
            | StreamOperator::IndexScan { reverse, .. } => *reverse = true,
            _ => {}
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;
    use crate::query::{self, Statement};
    use docket_core::{catalog::IndexInfo, catalog::TableInfo, Database, Document};
    use docket_engine::MemoryEngine;

    fn seeded_db() -> Database {
        let db = Database::new(Box::new(MemoryEngine::new())).unwrap();
        let mut tx = db.begin(true).unwrap();
        tx.create_table(TableInfo::new("t")).unwrap();
        for (x, y) in [(1, 10), (2, 20), (3, 30), (4, 40), (5, 50)] {
            let mut doc = Document::new();
            doc.set("x", Value::Integer(x));
            doc.set("y", Value::Integer(y));
            tx.insert_document("t", doc).unwrap();
        }
        tx.create_index(IndexInfo::new("ix", "t", vec![Path::field("x")]))
            .unwrap();
        tx.commit().unwrap();
        db
    }

    fn select_stream(db: &Database, sql: &str) -> (Stream, Vec<Param>) {
        let Statement::Select(stmt) = parser::parse_statement(sql).unwrap() else {
            panic!("expected SELECT");
        };
        let tx = db.begin(false).unwrap();
        let stream = query::select_stream(&stmt, &tx, &[]).unwrap();
        tx.rollback().unwrap();
        (stream, Vec::new())
    }

    fn run(db: &Database, stream: &Stream, params: &[Param]) -> Vec<Document> {
        let tx = db.begin(false).unwrap();
        let mut env = Environment::new(&tx, params);
        let mut docs = Vec::new();
        stream
            .iterate(&mut env, &mut |env| {
                if let Some(doc) = &env.doc {
                    docs.push(doc.clone());
                }
                Ok(())
            })
            .unwrap();
        tx.rollback().unwrap();
        docs
    }

    fn optimized(db: &Database, stream: Stream) -> Option<Stream> {
        let tx = db.begin(false).unwrap();
        let out = optimize(stream, &tx, &[]).unwrap();
        tx.rollback().unwrap();
        out
    }

    #[test]
    fn test_split_and_filters() {
        let db = seeded_db();
        let (stream, _) = select_stream(&db, "SELECT * FROM t WHERE x > 1 AND y < 50 AND x < 4");
        let mut stream = stream;
        assert!(split_and_filters(&mut stream));
        let filters = stream
            .ops
            .iter()
            .filter(|op| matches!(op, StreamOperator::Filter(_)))
            .count();
        assert_eq!(filters, 3);
    }

    #[test]
    fn test_constant_folding() {
        let db = seeded_db();
        let (stream, _) = select_stream(&db, "SELECT * FROM t WHERE x = 1 + 2 * 3");
        let out = optimized(&db, stream).unwrap();
        // The folded predicate becomes an index range on x = 7.
        let display = out.to_string();
        assert!(display.contains("x=7"), "{display}");
    }

    #[test]
    fn test_index_pickup_eq() {
        let db = seeded_db();
        let (stream, _) = select_stream(&db, "SELECT * FROM t WHERE x = 3");
        let out = optimized(&db, stream).unwrap();
        assert!(
            matches!(&out.ops[0], StreamOperator::IndexScan { index, .. } if index == "ix"),
            "{out}"
        );
        // The consumed filter is gone.
        assert!(!out.ops.iter().any(|op| matches!(op, StreamOperator::Filter(_))));
    }

    #[test]
    fn test_index_pickup_combined_range() {
        let db = seeded_db();
        let (stream, _) = select_stream(&db, "SELECT * FROM t WHERE x >= 2 AND x < 5");
        let out = optimized(&db, stream).unwrap();
        let StreamOperator::IndexScan { ranges, .. } = &out.ops[0] else {
            panic!("expected index scan: {out}");
        };
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].min, Some(vec![Value::Integer(2)]));
        assert_eq!(ranges[0].max, Some(vec![Value::Integer(5)]));
        assert!(!ranges[0].min_exclusive);
        assert!(ranges[0].max_exclusive);
    }

    #[test]
    fn test_index_pickup_in_list() {
        let db = seeded_db();
        let (stream, _) = select_stream(&db, "SELECT * FROM t WHERE x IN (5, 1, 3)");
        let out = optimized(&db, stream).unwrap();
        let StreamOperator::IndexScan { ranges, .. } = &out.ops[0] else {
            panic!("expected index scan: {out}");
        };
        // IN expands to exact ranges in index order.
        let values: Vec<&[Value]> = ranges.iter().filter_map(|r| r.as_exact()).collect();
        assert_eq!(
            values,
            vec![
                &[Value::Integer(1)][..],
                &[Value::Integer(3)][..],
                &[Value::Integer(5)][..],
            ]
        );
    }

    #[test]
    fn test_unindexed_filter_stays() {
        let db = seeded_db();
        let (stream, _) = select_stream(&db, "SELECT * FROM t WHERE y = 20");
        let out = optimized(&db, stream).unwrap();
        assert!(matches!(&out.ops[0], StreamOperator::SeqScan { .. }));
        assert!(out
            .ops
            .iter()
            .any(|op| matches!(op, StreamOperator::Filter(_))));
    }

    #[test]
    fn test_sort_removed_on_index_order() {
        let db = seeded_db();
        let (stream, _) = select_stream(&db, "SELECT * FROM t WHERE x > 0 ORDER BY x");
        let out = optimized(&db, stream).unwrap();
        assert!(
            !out.ops.iter().any(|op| matches!(op, StreamOperator::Sort { .. })),
            "{out}"
        );
    }

    #[test]
    fn test_filter_true_removed_false_proves_empty() {
        let db = seeded_db();
        let (stream, _) = select_stream(&db, "SELECT * FROM t WHERE 1 = 1");
        let out = optimized(&db, stream).unwrap();
        assert!(!out.ops.iter().any(|op| matches!(op, StreamOperator::Filter(_))));

        let (stream, _) = select_stream(&db, "SELECT * FROM t WHERE 1 = 2");
        assert!(optimized(&db, stream).is_none());
    }

    #[test]
    fn test_param_binding_enables_index() {
        let db = seeded_db();
        let Statement::Select(stmt) =
            parser::parse_statement("SELECT * FROM t WHERE x = ?").unwrap()
        else {
            panic!("expected SELECT");
        };
        let tx = db.begin(false).unwrap();
        let params = vec![Param::positional(Value::Integer(3))];
        let stream = crate::query::select_stream(&stmt, &tx, &params).unwrap();
        let out = optimize(stream, &tx, &params).unwrap().unwrap();
        tx.rollback().unwrap();
        assert!(
            matches!(&out.ops[0], StreamOperator::IndexScan { .. }),
            "{out}"
        );
    }

    #[test]
    fn test_optimized_streams_yield_same_documents() {
        let db = seeded_db();
        for sql in [
            "SELECT * FROM t",
            "SELECT * FROM t WHERE x = 3",
            "SELECT * FROM t WHERE x > 1 AND x <= 4",
            "SELECT * FROM t WHERE x IN (1, 4, 5)",
            "SELECT * FROM t WHERE x > 0 ORDER BY x",
            "SELECT * FROM t WHERE x > 0 ORDER BY x DESC",
            "SELECT y FROM t WHERE x BETWEEN 2 AND 4",
            "SELECT * FROM t WHERE x = 2 OR y = 30",
            "SELECT * FROM t WHERE 1 = 1",
        ] {
            let (stream, params) = select_stream(&db, sql);
            let raw = run(&db, &stream, &params);
            let opt = match optimized(&db, stream) {
                Some(stream) => run(&db, &stream, &params),
                None => Vec::new(),
            };
            // Same multiset; ORDER BY cases must match exactly.
            if sql.contains("ORDER BY") {
                assert_eq!(raw, opt, "{sql}");
            } else {
                let mut raw_sorted: Vec<String> = raw.iter().map(|d| d.to_string()).collect();
                let mut opt_sorted: Vec<String> = opt.iter().map(|d| d.to_string()).collect();
                raw_sorted.sort();
                opt_sorted.sort();
                assert_eq!(raw_sorted, opt_sorted, "{sql}");
            }
        }
    }
}

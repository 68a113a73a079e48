//! Stream execution.
//!
//! The driver walks the operator chain recursively: each stage wraps the
//! downstream sink in a closure and hands it to its upstream, so one
//! statement executes as a single cooperative pass with per-stage state
//! living on the stack. Any stage may raise the `StreamClosed` sentinel
//! to end iteration cleanly; the top-level driver converts it to normal
//! completion.

use std::cmp::Ordering;
use std::collections::HashMap;

use docket_core::{codec, Document, Value};

use crate::error::{SqlError, SqlResult};
use crate::expr::{eval, Environment, Expr};

use super::{IndexRange, Stream, StreamOperator};

type Sink<'a, 's> = dyn FnMut(&mut Environment<'a>) -> SqlResult<()> + 's;

impl Stream {
    /// Drives the stream to completion, invoking `sink` once per emitted
    /// environment.
    pub fn iterate<'a>(
        &self,
        env: &mut Environment<'a>,
        sink: &mut Sink<'a, '_>,
    ) -> SqlResult<()> {
        if self.ops.is_empty() {
            return Ok(());
        }
        match run(&self.ops, env, sink) {
            Err(SqlError::StreamClosed) => Ok(()),
            other => other,
        }
    }
}

fn run<'a>(
    ops: &[StreamOperator],
    env: &mut Environment<'a>,
    sink: &mut Sink<'a, '_>,
) -> SqlResult<()> {
    let (op, upstream) = ops
        .split_last()
        .expect("run invoked on an empty operator chain");
    if upstream.is_empty() {
        return run_source(op, env, sink);
    }

    match op {
        StreamOperator::Filter(e) => run(upstream, env, &mut |env| {
            if eval(e, env)?.is_truthy() {
                sink(env)
            } else {
                Ok(())
            }
        }),

        StreamOperator::Project(exprs) => run(upstream, env, &mut |env| {
            let mut out = Document::new();
            for ne in exprs {
                match &ne.expr {
                    Expr::Wildcard => {
                        if let Some(doc) = &env.doc {
                            for (name, value) in doc.iter() {
                                out.set(name.to_string(), value.clone());
                            }
                        }
                    }
                    e => {
                        let value = eval(e, env)?;
                        out.set(ne.name(), value);
                    }
                }
            }
            env.doc = Some(out);
            sink(env)
        }),

        StreamOperator::Map(e) => run(upstream, env, &mut |env| {
            match eval(e, env)? {
                Value::Document(doc) => env.doc = Some(doc),
                other => return Err(SqlError::NotADocument(other.kind().to_string())),
            }
            sink(env)
        }),

        StreamOperator::Set { path, expr } => run(upstream, env, &mut |env| {
            let value = eval(expr, env)?;
            let mut doc = env
                .doc
                .take()
                .ok_or_else(|| SqlError::NotADocument("null".to_string()))?;
            path.set_document(&mut doc, value)?;
            env.doc = Some(doc);
            sink(env)
        }),

        StreamOperator::Unset(field) => run(upstream, env, &mut |env| {
            if let Some(doc) = env.doc.as_mut() {
                doc.remove(field);
            }
            sink(env)
        }),

        StreamOperator::TableInsert { table } => run(upstream, env, &mut |env| {
            let doc = env
                .doc
                .take()
                .ok_or_else(|| SqlError::NotADocument("null".to_string()))?;
            let (key, doc) = env.tx.insert_document(table, doc)?;
            env.key = Some(key);
            env.doc = Some(doc);
            sink(env)
        }),

        StreamOperator::TableReplace { table } => run(upstream, env, &mut |env| {
            let doc = env
                .doc
                .take()
                .ok_or_else(|| SqlError::NotADocument("null".to_string()))?;
            let key = env
                .key
                .clone()
                .ok_or_else(|| SqlError::Internal("replace without a key".to_string()))?;
            let doc = env.tx.replace_document(table, &key, doc)?;
            env.doc = Some(doc);
            sink(env)
        }),

        StreamOperator::TableDelete { table } => run(upstream, env, &mut |env| {
            let key = env
                .key
                .clone()
                .ok_or_else(|| SqlError::Internal("delete without a key".to_string()))?;
            env.tx.delete_document(table, &key)?;
            sink(env)
        }),

        StreamOperator::Sort { expr, desc } => {
            let mut rows: Vec<(Value, Option<Document>, Option<Vec<u8>>)> = Vec::new();
            run(upstream, env, &mut |env| {
                let key = eval(expr, env)?;
                rows.push((key, env.doc.take(), env.key.take()));
                Ok(())
            })?;
            rows.sort_by(|a, b| {
                let ord = a.0.sort_cmp(&b.0);
                if *desc {
                    ord.reverse()
                } else {
                    ord
                }
            });
            for (_, doc, key) in rows {
                env.doc = doc;
                env.key = key;
                sink(env)?;
            }
            Ok(())
        }

        StreamOperator::GroupBy(e) => {
            let name = e.to_string();
            run(upstream, env, &mut |env| {
                let value = eval(e, env)?;
                env.group = Some((name.clone(), value));
                sink(env)
            })
        }

        StreamOperator::HashAggregate(funcs) => {
            let grouped = upstream
                .iter()
                .any(|op| matches!(op, StreamOperator::GroupBy(_)));
            let mut groups: Vec<(Option<(String, Value)>, Vec<crate::expr::Aggregator>)> =
                Vec::new();
            let mut lookup: HashMap<Vec<u8>, usize> = HashMap::new();

            run(upstream, env, &mut |env| {
                let tag = env.group.clone();
                let map_key = match &tag {
                    Some((_, value)) => {
                        let mut buf = Vec::new();
                        codec::encode_value(value, &mut buf);
                        buf
                    }
                    None => Vec::new(),
                };
                let idx = match lookup.get(&map_key) {
                    Some(idx) => *idx,
                    None => {
                        let idx = groups.len();
                        lookup.insert(map_key, idx);
                        groups.push((tag, funcs.iter().map(|f| f.aggregator()).collect()));
                        idx
                    }
                };
                for acc in &mut groups[idx].1 {
                    acc.aggregate(env)?;
                }
                Ok(())
            })?;

            // Without GROUP BY, aggregates over an empty input still
            // produce one row of zero values.
            if groups.is_empty() && !grouped {
                groups.push((None, funcs.iter().map(|f| f.aggregator()).collect()));
            }

            for (tag, accs) in groups {
                let mut doc = Document::new();
                if let Some((name, value)) = tag {
                    doc.set(name, value);
                }
                for acc in &accs {
                    doc.set(acc.name().to_string(), acc.finish());
                }
                env.doc = Some(doc);
                env.key = None;
                env.group = None;
                sink(env)?;
            }
            Ok(())
        }

        StreamOperator::Take(n) => {
            let n = *n;
            let mut taken = 0i64;
            run(upstream, env, &mut |env| {
                taken += 1;
                if taken <= n {
                    sink(env)?;
                }
                if taken >= n {
                    return Err(SqlError::StreamClosed);
                }
                Ok(())
            })
        }

        StreamOperator::Skip(n) => {
            let n = *n;
            let mut skipped = 0i64;
            run(upstream, env, &mut |env| {
                if skipped < n {
                    skipped += 1;
                    Ok(())
                } else {
                    sink(env)
                }
            })
        }

        source => Err(SqlError::Internal(format!(
            "source operator {source} in the middle of a stream"
        ))),
    }
}

fn run_source<'a>(
    op: &StreamOperator,
    env: &mut Environment<'a>,
    sink: &mut Sink<'a, '_>,
) -> SqlResult<()> {
    match op {
        StreamOperator::Docs(docs) => {
            for doc in docs {
                env.doc = Some(doc.clone());
                env.key = None;
                sink(env)?;
            }
            Ok(())
        }

        StreamOperator::Expressions(exprs) => {
            for e in exprs {
                match eval(e, env)? {
                    Value::Document(doc) => env.doc = Some(doc),
                    other => return Err(SqlError::NotADocument(other.kind().to_string())),
                }
                env.key = None;
                sink(env)?;
            }
            Ok(())
        }

        StreamOperator::SeqScan { table, reverse } => {
            let tx = env.tx;
            let tbl = tx.get_table(table)?;
            let mut inner: Option<SqlError> = None;
            tbl.iterate(*reverse, |key, doc| {
                env.doc = Some(doc);
                env.key = Some(key.to_vec());
                match sink(env) {
                    Ok(()) => Ok(true),
                    Err(err) => {
                        inner = Some(err);
                        Ok(false)
                    }
                }
            })?;
            match inner {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }

        StreamOperator::PkScan {
            table,
            ranges,
            reverse,
        } => {
            let tx = env.tx;
            let tbl = tx.get_table(table)?;

            let ordered: Vec<&IndexRange> = if *reverse {
                ranges.iter().rev().collect()
            } else {
                ranges.iter().collect()
            };
            for range in ordered {
                let min = bound_key(&tbl, &range.min)?;
                let max = bound_key(&tbl, &range.max)?;
                let pivot = if *reverse {
                    max.clone().unwrap_or_default()
                } else {
                    min.clone().unwrap_or_default()
                };

                let mut inner: Option<SqlError> = None;
                tbl.iterate_from(&pivot, *reverse, &mut |key, doc| {
                    if !*reverse {
                        if let Some(max) = &max {
                            if key > max.as_slice() || (range.max_exclusive && key == max.as_slice())
                            {
                                return Ok(false);
                            }
                        }
                        if range.min_exclusive
                            && min.as_deref().is_some_and(|min| key == min)
                        {
                            return Ok(true);
                        }
                    } else {
                        if let Some(min) = &min {
                            if key < min.as_slice() || (range.min_exclusive && key == min.as_slice())
                            {
                                return Ok(false);
                            }
                        }
                        if range.max_exclusive
                            && max.as_deref().is_some_and(|max| key == max)
                        {
                            return Ok(true);
                        }
                    }
                    env.doc = Some(doc);
                    env.key = Some(key.to_vec());
                    match sink(env) {
                        Ok(()) => Ok(true),
                        Err(err) => {
                            inner = Some(err);
                            Ok(false)
                        }
                    }
                })?;
                if let Some(err) = inner {
                    return Err(err);
                }
            }
            Ok(())
        }

        StreamOperator::IndexScan {
            index,
            ranges,
            reverse,
            ..
        } => {
            let tx = env.tx;
            let idx = tx.get_index(index)?;
            let tbl = tx.get_table(&idx.info().table_name)?;

            let ordered: Vec<&IndexRange> = if *reverse {
                ranges.iter().rev().collect()
            } else {
                ranges.iter().collect()
            };
            for range in ordered {
                let mut inner: Option<SqlError> = None;
                let visit = |values: &[Value], key: &[u8]| -> docket_core::CoreResult<bool> {
                    if !*reverse {
                        if let Some(max) = &range.max {
                            match tuple_cmp(values, max) {
                                Ordering::Greater => return Ok(false),
                                Ordering::Equal if range.max_exclusive => return Ok(false),
                                _ => {}
                            }
                        }
                        if range.min_exclusive {
                            if let Some(min) = &range.min {
                                if tuple_cmp(values, min) == Ordering::Equal {
                                    return Ok(true);
                                }
                            }
                        }
                    } else {
                        if let Some(min) = &range.min {
                            match tuple_cmp(values, min) {
                                Ordering::Less => return Ok(false),
                                Ordering::Equal if range.min_exclusive => return Ok(false),
                                _ => {}
                            }
                        }
                        if range.max_exclusive {
                            if let Some(max) = &range.max {
                                if tuple_cmp(values, max) == Ordering::Equal {
                                    return Ok(true);
                                }
                            }
                        }
                    }
                    let doc = tbl.get(key)?;
                    env.doc = Some(doc);
                    env.key = Some(key.to_vec());
                    match sink(env) {
                        Ok(()) => Ok(true),
                        Err(err) => {
                            inner = Some(err);
                            Ok(false)
                        }
                    }
                };
                if *reverse {
                    idx.descend_less_or_equal(range.max.as_deref(), visit)?;
                } else {
                    idx.ascend_greater_or_equal(range.min.as_deref(), visit)?;
                }
                if let Some(err) = inner {
                    return Err(err);
                }
            }
            Ok(())
        }

        other => Err(SqlError::Internal(format!(
            "operator {other} cannot start a stream"
        ))),
    }
}

/// Compares scanned values against a bound tuple, prefix-wise: a bound
/// shorter than the value tuple constrains only the leading slots.
fn tuple_cmp(values: &[Value], bound: &[Value]) -> Ordering {
    for (v, b) in values.iter().zip(bound.iter()) {
        match v.sort_cmp(b) {
            Ordering::Equal => continue,
            ord => return ord,
        }
    }
    Ordering::Equal
}

/// Encodes the single-value bound of a primary key range.
fn bound_key(
    tbl: &docket_core::Table,
    bound: &Option<Vec<Value>>,
) -> SqlResult<Option<Vec<u8>>> {
    match bound {
        Some(values) => {
            let value = values
                .first()
                .ok_or_else(|| SqlError::Internal("empty range bound".to_string()))?;
            Ok(Some(tbl.encode_pk_value(value)?))
        }
        None => Ok(None),
    }
}

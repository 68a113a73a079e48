//! Expression evaluation.
//!
//! `eval` is pure: it reads the environment and produces a value or an
//! error, never mutating anything. Comparisons follow three-valued
//! logic: NULL beside any comparison yields NULL, except IS / IS NOT
//! which are null-safe.

use std::cmp::Ordering;

use docket_core::{Document, Value};

use crate::error::{SqlError, SqlResult};

use super::{AggregateFunc, BinaryOp, Environment, Expr};

/// Evaluates an expression against an environment.
pub fn eval(expr: &Expr, env: &Environment<'_>) -> SqlResult<Value> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Path(path) => Ok(match &env.doc {
            Some(doc) => path.resolve_document(doc).unwrap_or(Value::Null),
            None => Value::Null,
        }),
        Expr::NamedParam(name) => env
            .named_param(name)
            .cloned()
            .ok_or_else(|| SqlError::UnknownParameter(format!("${name}"))),
        Expr::PositionalParam(n) => env
            .positional_param(*n)
            .cloned()
            .ok_or_else(|| SqlError::UnknownParameter(format!("?{n}"))),
        Expr::Wildcard => Err(SqlError::Internal(
            "wildcard outside a projection".to_string(),
        )),
        Expr::DocumentLiteral(pairs) => {
            let mut doc = Document::new();
            for (name, e) in pairs {
                doc.set(name.clone(), eval(e, env)?);
            }
            Ok(Value::Document(doc))
        }
        Expr::List(items) => {
            let values = items
                .iter()
                .map(|e| eval(e, env))
                .collect::<SqlResult<Vec<_>>>()?;
            Ok(Value::Array(values))
        }
        Expr::Parens(e) => eval(e, env),
        Expr::Cast { expr, target } => Ok(eval(expr, env)?.cast(*target)?),
        // Outside aggregation an aggregate resolves to the field the
        // aggregate stage wrote under its canonical name.
        Expr::Aggregate(func) => Ok(match &env.doc {
            Some(doc) => doc.get(&func.name()).cloned().unwrap_or(Value::Null),
            None => Value::Null,
        }),
        Expr::Pk => Ok(match &env.key {
            Some(key) => Value::blob(key.clone()),
            None => Value::Null,
        }),
        Expr::Binary { op, left, right } => eval_binary(*op, left, right, env),
        Expr::Between { expr, low, high } => eval_between(expr, low, high, env),
        Expr::Not(e) => Ok(Value::Bool(!eval(e, env)?.is_truthy())),
        Expr::Neg(e) => Ok(match eval(e, env)? {
            Value::Integer(i) => i
                .checked_neg()
                .map(Value::Integer)
                .unwrap_or(Value::Double(-(i as f64))),
            Value::Double(d) => Value::Double(-d),
            _ => Value::Null,
        }),
    }
}

fn eval_binary(op: BinaryOp, left: &Expr, right: &Expr, env: &Environment<'_>) -> SqlResult<Value> {
    match op {
        BinaryOp::And => {
            if !eval(left, env)?.is_truthy() {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(eval(right, env)?.is_truthy()))
        }
        BinaryOp::Or => {
            if eval(left, env)?.is_truthy() {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(eval(right, env)?.is_truthy()))
        }
        _ => {
            let l = eval(left, env)?;
            let r = eval(right, env)?;
            eval_binary_values(op, &l, &r)
        }
    }
}

fn eval_binary_values(op: BinaryOp, l: &Value, r: &Value) -> SqlResult<Value> {
    match op {
        // IS and IS NOT are null-safe: NULL IS NULL is true.
        BinaryOp::Is => Ok(Value::Bool(l.is_equal(r))),
        BinaryOp::IsNot => Ok(Value::Bool(!l.is_equal(r))),
        _ if l.is_null() || r.is_null() => Ok(Value::Null),

        BinaryOp::Eq => Ok(Value::Bool(l.is_equal(r))),
        BinaryOp::Neq => Ok(Value::Bool(!l.is_equal(r))),
        BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte => match l.compare(r) {
            Some(ord) => Ok(Value::Bool(match op {
                BinaryOp::Lt => ord == Ordering::Less,
                BinaryOp::Lte => ord != Ordering::Greater,
                BinaryOp::Gt => ord == Ordering::Greater,
                BinaryOp::Gte => ord != Ordering::Less,
                _ => unreachable!(),
            })),
            // Cross-type ordering is undefined.
            None => Ok(Value::Null),
        },

        BinaryOp::In => Ok(array_contains(r, l)),
        BinaryOp::NotIn => Ok(match array_contains(r, l) {
            Value::Bool(b) => Value::Bool(!b),
            other => other,
        }),

        BinaryOp::Like => Ok(match (l, r) {
            (Value::Text(s), Value::Text(pattern)) => Value::Bool(like_match(pattern, s)),
            _ => Value::Null,
        }),
        BinaryOp::NotLike => Ok(match (l, r) {
            (Value::Text(s), Value::Text(pattern)) => Value::Bool(!like_match(pattern, s)),
            _ => Value::Null,
        }),

        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            Ok(eval_arithmetic(op, l, r))
        }

        BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor => Ok(match (l, r) {
            (Value::Integer(a), Value::Integer(b)) => Value::Integer(match op {
                BinaryOp::BitAnd => a & b,
                BinaryOp::BitOr => a | b,
                BinaryOp::BitXor => a ^ b,
                _ => unreachable!(),
            }),
            _ => Value::Null,
        }),

        BinaryOp::Concat => Ok(match (l, r) {
            (Value::Text(a), Value::Text(b)) => {
                let mut out = String::with_capacity(a.len() + b.len());
                out.push_str(a);
                out.push_str(b);
                Value::Text(out)
            }
            _ => Value::Null,
        }),

        BinaryOp::And | BinaryOp::Or => unreachable!("handled with short-circuit"),
    }
}

fn eval_arithmetic(op: BinaryOp, l: &Value, r: &Value) -> Value {
    match (l, r) {
        (Value::Integer(a), Value::Integer(b)) => {
            let (a, b) = (*a, *b);
            match op {
                BinaryOp::Add => a
                    .checked_add(b)
                    .map(Value::Integer)
                    .unwrap_or(Value::Double(a as f64 + b as f64)),
                BinaryOp::Sub => a
                    .checked_sub(b)
                    .map(Value::Integer)
                    .unwrap_or(Value::Double(a as f64 - b as f64)),
                BinaryOp::Mul => a
                    .checked_mul(b)
                    .map(Value::Integer)
                    .unwrap_or(Value::Double(a as f64 * b as f64)),
                BinaryOp::Div => {
                    if b == 0 {
                        Value::Null
                    } else {
                        a.checked_div(b)
                            .map(Value::Integer)
                            .unwrap_or(Value::Double(a as f64 / b as f64))
                    }
                }
                BinaryOp::Mod => {
                    if b == 0 {
                        Value::Null
                    } else {
                        a.checked_rem(b).map(Value::Integer).unwrap_or(Value::Null)
                    }
                }
                _ => unreachable!(),
            }
        }
        _ => match (l.as_f64(), r.as_f64()) {
            (Some(a), Some(b)) => match op {
                BinaryOp::Add => Value::Double(a + b),
                BinaryOp::Sub => Value::Double(a - b),
                BinaryOp::Mul => Value::Double(a * b),
                BinaryOp::Div => {
                    if b == 0.0 {
                        Value::Null
                    } else {
                        Value::Double(a / b)
                    }
                }
                BinaryOp::Mod => {
                    if b == 0.0 {
                        Value::Null
                    } else {
                        Value::Double(a % b)
                    }
                }
                _ => unreachable!(),
            },
            _ => Value::Null,
        },
    }
}

fn array_contains(haystack: &Value, needle: &Value) -> Value {
    match haystack {
        Value::Array(items) => Value::Bool(items.iter().any(|item| item.is_equal(needle))),
        _ => Value::Bool(false),
    }
}

fn eval_between(expr: &Expr, low: &Expr, high: &Expr, env: &Environment<'_>) -> SqlResult<Value> {
    let x = eval(expr, env)?;
    let lo = eval(low, env)?;
    let hi = eval(high, env)?;
    if x.is_null() || lo.is_null() || hi.is_null() {
        return Ok(Value::Null);
    }
    let ge = matches!(x.compare(&lo), Some(Ordering::Greater | Ordering::Equal));
    if !ge {
        return Ok(Value::Bool(false));
    }
    let le = matches!(x.compare(&hi), Some(Ordering::Less | Ordering::Equal));
    Ok(Value::Bool(le))
}

/// Matches `s` against a LIKE pattern where `%` spans any sequence and
/// `_` exactly one character. Case-sensitive.
pub fn like_match(pattern: &str, s: &str) -> bool {
    fn matches(p: &[char], s: &[char]) -> bool {
        match p.split_first() {
            None => s.is_empty(),
            Some(('%', rest)) => (0..=s.len()).any(|i| matches(rest, &s[i..])),
            Some(('_', rest)) => !s.is_empty() && matches(rest, &s[1..]),
            Some((c, rest)) => s.first() == Some(c) && matches(rest, &s[1..]),
        }
    }
    let p: Vec<char> = pattern.chars().collect();
    let s: Vec<char> = s.chars().collect();
    matches(&p, &s)
}

#[cfg(test)]
mod tests {
    use super::super::Param;
    use super::*;
    use docket_core::{Database, Transaction};
    use docket_engine::MemoryEngine;

    fn with_env(f: impl FnOnce(&Environment<'_>)) {
        let db = Database::new(Box::new(MemoryEngine::new())).unwrap();
        let tx: Transaction = db.begin(false).unwrap();
        let env = Environment::new(&tx, &[]);
        f(&env);
        tx.rollback().unwrap();
    }

    fn b(op: BinaryOp, l: Expr, r: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(l),
            right: Box::new(r),
        }
    }

    fn int(i: i64) -> Expr {
        Expr::Literal(Value::Integer(i))
    }

    fn null() -> Expr {
        Expr::Literal(Value::Null)
    }

    #[test]
    fn test_three_valued_logic() {
        with_env(|env| {
            // NULL = NULL yields NULL, NULL IS NULL yields true.
            assert_eq!(
                eval(&b(BinaryOp::Eq, null(), null()), env).unwrap(),
                Value::Null
            );
            assert_eq!(
                eval(&b(BinaryOp::Is, null(), null()), env).unwrap(),
                Value::Bool(true)
            );
            assert_eq!(
                eval(&b(BinaryOp::IsNot, null(), int(1)), env).unwrap(),
                Value::Bool(true)
            );
            assert_eq!(
                eval(&b(BinaryOp::Lt, null(), int(1)), env).unwrap(),
                Value::Null
            );
        });
    }

    #[test]
    fn test_comparisons() {
        with_env(|env| {
            assert_eq!(
                eval(&b(BinaryOp::Lt, int(1), int(2)), env).unwrap(),
                Value::Bool(true)
            );
            assert_eq!(
                eval(
                    &b(
                        BinaryOp::Eq,
                        int(1),
                        Expr::Literal(Value::Double(1.0))
                    ),
                    env
                )
                .unwrap(),
                Value::Bool(true)
            );
            // Cross-type equality is false, ordering is NULL.
            assert_eq!(
                eval(
                    &b(BinaryOp::Eq, int(1), Expr::Literal(Value::text("1"))),
                    env
                )
                .unwrap(),
                Value::Bool(false)
            );
            assert_eq!(
                eval(
                    &b(BinaryOp::Lt, int(1), Expr::Literal(Value::text("1"))),
                    env
                )
                .unwrap(),
                Value::Null
            );
        });
    }

    #[test]
    fn test_arithmetic() {
        with_env(|env| {
            assert_eq!(
                eval(&b(BinaryOp::Add, int(1), int(2)), env).unwrap(),
                Value::Integer(3)
            );
            assert_eq!(
                eval(
                    &b(BinaryOp::Mul, int(2), Expr::Literal(Value::Double(1.5))),
                    env
                )
                .unwrap(),
                Value::Double(3.0)
            );
            // Integer division truncates; division by zero is NULL.
            assert_eq!(
                eval(&b(BinaryOp::Div, int(7), int(2)), env).unwrap(),
                Value::Integer(3)
            );
            assert_eq!(
                eval(&b(BinaryOp::Div, int(1), int(0)), env).unwrap(),
                Value::Null
            );
            assert_eq!(
                eval(&b(BinaryOp::Mod, int(7), int(3)), env).unwrap(),
                Value::Integer(1)
            );
            // Arithmetic over non-numbers is NULL.
            assert_eq!(
                eval(
                    &b(BinaryOp::Add, int(1), Expr::Literal(Value::text("x"))),
                    env
                )
                .unwrap(),
                Value::Null
            );
            // Overflow promotes to double.
            assert_eq!(
                eval(&b(BinaryOp::Add, int(i64::MAX), int(1)), env).unwrap(),
                Value::Double(i64::MAX as f64 + 1.0)
            );
        });
    }

    #[test]
    fn test_logic_short_circuit() {
        with_env(|env| {
            // The divide-by-zero in the right operand is never reached.
            let e = b(
                BinaryOp::And,
                Expr::Literal(Value::Bool(false)),
                b(BinaryOp::Div, int(1), int(0)),
            );
            assert_eq!(eval(&e, env).unwrap(), Value::Bool(false));

            let e = b(
                BinaryOp::Or,
                Expr::Literal(Value::Bool(true)),
                Expr::NamedParam("missing".to_string()),
            );
            assert_eq!(eval(&e, env).unwrap(), Value::Bool(true));
        });
    }

    #[test]
    fn test_in_list() {
        with_env(|env| {
            let list = Expr::List(vec![int(1), int(2), int(3)]);
            assert_eq!(
                eval(&b(BinaryOp::In, int(2), list.clone()), env).unwrap(),
                Value::Bool(true)
            );
            assert_eq!(
                eval(&b(BinaryOp::NotIn, int(5), list), env).unwrap(),
                Value::Bool(true)
            );
            assert_eq!(
                eval(
                    &b(BinaryOp::In, null(), Expr::List(vec![int(1)])),
                    env
                )
                .unwrap(),
                Value::Null
            );
        });
    }

    #[test]
    fn test_between() {
        with_env(|env| {
            let e = Expr::Between {
                expr: Box::new(int(5)),
                low: Box::new(int(1)),
                high: Box::new(int(10)),
            };
            assert_eq!(eval(&e, env).unwrap(), Value::Bool(true));

            let e = Expr::Between {
                expr: Box::new(int(0)),
                low: Box::new(int(1)),
                high: Box::new(int(10)),
            };
            assert_eq!(eval(&e, env).unwrap(), Value::Bool(false));

            let e = Expr::Between {
                expr: Box::new(int(5)),
                low: Box::new(null()),
                high: Box::new(int(10)),
            };
            assert_eq!(eval(&e, env).unwrap(), Value::Null);
        });
    }

    #[test]
    fn test_like() {
        assert!(like_match("he%o", "hello"));
        assert!(like_match("h_llo", "hello"));
        assert!(like_match("%", ""));
        assert!(!like_match("he%o", "help"));
        assert!(!like_match("h_llo", "hllo"));

        with_env(|env| {
            assert_eq!(
                eval(
                    &b(
                        BinaryOp::Like,
                        Expr::Literal(Value::text("abc")),
                        Expr::Literal(Value::text("a%"))
                    ),
                    env
                )
                .unwrap(),
                Value::Bool(true)
            );
            assert_eq!(
                eval(
                    &b(BinaryOp::Like, int(1), Expr::Literal(Value::text("a%"))),
                    env
                )
                .unwrap(),
                Value::Null
            );
        });
    }

    #[test]
    fn test_concat_and_bitwise() {
        with_env(|env| {
            assert_eq!(
                eval(
                    &b(
                        BinaryOp::Concat,
                        Expr::Literal(Value::text("ab")),
                        Expr::Literal(Value::text("cd"))
                    ),
                    env
                )
                .unwrap(),
                Value::text("abcd")
            );
            assert_eq!(
                eval(&b(BinaryOp::BitAnd, int(6), int(3)), env).unwrap(),
                Value::Integer(2)
            );
            assert_eq!(
                eval(
                    &b(BinaryOp::Concat, int(1), Expr::Literal(Value::text("x"))),
                    env
                )
                .unwrap(),
                Value::Null
            );
        });
    }

    #[test]
    fn test_path_resolution() {
        let db = Database::new(Box::new(MemoryEngine::new())).unwrap();
        let tx = db.begin(false).unwrap();
        let mut env = Environment::new(&tx, &[]);
        let mut doc = Document::new();
        doc.set("a", Value::Integer(7));
        env.doc = Some(doc);

        assert_eq!(eval(&Expr::field("a"), &env).unwrap(), Value::Integer(7));
        assert_eq!(eval(&Expr::field("missing"), &env).unwrap(), Value::Null);
        tx.rollback().unwrap();
    }

    #[test]
    fn test_params() {
        let db = Database::new(Box::new(MemoryEngine::new())).unwrap();
        let tx = db.begin(false).unwrap();
        let params = vec![
            Param::positional(Value::Integer(10)),
            Param::positional(Value::text("x")),
        ];
        let env = Environment::new(&tx, &params);

        assert_eq!(
            eval(&Expr::PositionalParam(1), &env).unwrap(),
            Value::Integer(10)
        );
        assert_eq!(
            eval(&Expr::PositionalParam(2), &env).unwrap(),
            Value::text("x")
        );
        assert!(matches!(
            eval(&Expr::PositionalParam(3), &env),
            Err(SqlError::UnknownParameter(_))
        ));

        let named = vec![Param::named("age", Value::Integer(30))];
        let env = Environment::new(&tx, &named);
        assert_eq!(
            eval(&Expr::NamedParam("age".to_string()), &env).unwrap(),
            Value::Integer(30)
        );
        tx.rollback().unwrap();
    }

    #[test]
    fn test_document_literal_sees_outer_scope_only() {
        let db = Database::new(Box::new(MemoryEngine::new())).unwrap();
        let tx = db.begin(false).unwrap();
        let mut env = Environment::new(&tx, &[]);
        let mut doc = Document::new();
        doc.set("a", Value::Integer(1));
        env.doc = Some(doc);

        // {a: 2, b: a}: `a` resolves against the outer document, not the
        // literal being built.
        let e = Expr::DocumentLiteral(vec![
            ("a".to_string(), int(2)),
            ("b".to_string(), Expr::field("a")),
        ]);
        let Value::Document(result) = eval(&e, &env).unwrap() else {
            panic!("expected document");
        };
        assert_eq!(result.get("a"), Some(&Value::Integer(2)));
        assert_eq!(result.get("b"), Some(&Value::Integer(1)));
        tx.rollback().unwrap();
    }
}

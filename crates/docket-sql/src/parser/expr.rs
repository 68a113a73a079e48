//! Expression parsing by precedence climbing.
//!
//! Binary operators bind by the ladder (loosest first): OR; AND; NOT;
//! comparisons including IN, LIKE, IS and BETWEEN; `|`; `^`; `&`; `||`;
//! `+`/`-`; `*`/`/`/`%`; unary minus; member access. Higher-precedence
//! operators are absorbed by recursing with a raised minimum.

use docket_core::Value;

use crate::error::ParseError;
use crate::expr::{AggregateFunc, BinaryOp, Expr};
use crate::scanner::{Keyword, Token};

use super::Parser;

/// What the operator scanner found.
enum Op {
    Binary(BinaryOp),
    Between,
}

impl Parser<'_> {
    /// Parses a full expression.
    pub(crate) fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_expr(0)
    }

    fn parse_binary_expr(&mut self, min_prec: i32) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary_expr()?;
        loop {
            let Some((op, prec)) = self.parse_operator(min_prec)? else {
                return Ok(lhs);
            };
            match op {
                Op::Between => {
                    let low = self.parse_binary_expr(prec + 1)?;
                    self.expect_keyword(Keyword::And)?;
                    let high = self.parse_binary_expr(prec + 1)?;
                    lhs = Expr::Between {
                        expr: Box::new(lhs),
                        low: Box::new(low),
                        high: Box::new(high),
                    };
                }
                Op::Binary(op) => {
                    let rhs = self.parse_binary_expr(prec + 1)?;
                    lhs = Expr::Binary {
                        op,
                        left: Box::new(lhs),
                        right: Box::new(rhs),
                    };
                }
            }
        }
    }

    /// Consumes the next binary operator if it binds at least as tightly
    /// as `min_prec`; otherwise consumes nothing.
    fn parse_operator(&mut self, min_prec: i32) -> Result<Option<(Op, i32)>, ParseError> {
        let item = self.scan_ignore_whitespace();

        if item.tok == Token::Keyword(Keyword::Not) {
            // NOT IN / NOT LIKE bind like the comparison they negate.
            let prec = Token::Keyword(Keyword::In).precedence();
            if prec < min_prec {
                self.unscan();
                return Ok(None);
            }
            let next = self.scan_ignore_whitespace();
            return match next.tok {
                Token::Keyword(Keyword::In) => Ok(Some((Op::Binary(BinaryOp::NotIn), prec))),
                Token::Keyword(Keyword::Like) => Ok(Some((Op::Binary(BinaryOp::NotLike), prec))),
                _ => Err(self.unexpected(&next, "IN or LIKE")),
            };
        }

        let prec = item.tok.precedence();
        if prec == 0 || prec < min_prec {
            self.unscan();
            return Ok(None);
        }

        let op = match item.tok {
            Token::Eq => BinaryOp::Eq,
            Token::Neq => BinaryOp::Neq,
            Token::Lt => BinaryOp::Lt,
            Token::Lte => BinaryOp::Lte,
            Token::Gt => BinaryOp::Gt,
            Token::Gte => BinaryOp::Gte,
            Token::Plus => BinaryOp::Add,
            Token::Minus => BinaryOp::Sub,
            Token::Star => BinaryOp::Mul,
            Token::Slash => BinaryOp::Div,
            Token::Percent => BinaryOp::Mod,
            Token::Ampersand => BinaryOp::BitAnd,
            Token::Pipe => BinaryOp::BitOr,
            Token::Caret => BinaryOp::BitXor,
            Token::Concat => BinaryOp::Concat,
            Token::Keyword(Keyword::And) => BinaryOp::And,
            Token::Keyword(Keyword::Or) => BinaryOp::Or,
            Token::Keyword(Keyword::In) => BinaryOp::In,
            Token::Keyword(Keyword::Like) => BinaryOp::Like,
            Token::Keyword(Keyword::Is) => {
                if self.try_keyword(Keyword::Not) {
                    BinaryOp::IsNot
                } else {
                    BinaryOp::Is
                }
            }
            Token::Keyword(Keyword::Between) => return Ok(Some((Op::Between, prec))),
            _ => {
                self.unscan();
                return Ok(None);
            }
        };
        Ok(Some((Op::Binary(op), prec)))
    }

    /// Parses a non-binary expression.
    pub(crate) fn parse_unary_expr(&mut self) -> Result<Expr, ParseError> {
        let item = self.scan_ignore_whitespace();
        match item.tok {
            Token::Keyword(Keyword::Cast) => {
                self.unscan();
                self.parse_cast_expression()
            }
            Token::Ident => {
                if self.peek_raw() == Token::Lparen {
                    self.unscan();
                    return self.parse_function();
                }
                self.unscan();
                Ok(Expr::Path(self.parse_path()?))
            }
            Token::NamedParam => {
                if item.lit.is_empty() {
                    return Err(ParseError::MissingParamName);
                }
                if self.positional_params > 0 {
                    return Err(ParseError::MixedParams);
                }
                self.named_params += 1;
                Ok(Expr::NamedParam(item.lit))
            }
            Token::PositionalParam => {
                if self.named_params > 0 {
                    return Err(ParseError::MixedParams);
                }
                self.positional_params += 1;
                Ok(Expr::PositionalParam(self.positional_params))
            }
            Token::String => Ok(Expr::Literal(Value::text(item.lit))),
            Token::BadString => Err(ParseError::BadString {
                line: item.pos.line,
                column: item.pos.column,
            }),
            Token::BadEscape => Err(ParseError::BadEscape {
                line: item.pos.line,
                column: item.pos.column,
            }),
            Token::Integer => match item.lit.parse::<i64>() {
                Ok(i) => Ok(Expr::Literal(Value::Integer(i))),
                // Too large for an i64: fall back to a double.
                Err(_) => match item.lit.parse::<f64>() {
                    Ok(d) => Ok(Expr::Literal(Value::Double(d))),
                    Err(_) => Err(ParseError::InvalidNumber {
                        line: item.pos.line,
                        column: item.pos.column,
                    }),
                },
            },
            Token::Number => match item.lit.parse::<f64>() {
                Ok(d) => Ok(Expr::Literal(Value::Double(d))),
                Err(_) => Err(ParseError::InvalidNumber {
                    line: item.pos.line,
                    column: item.pos.column,
                }),
            },
            Token::Keyword(Keyword::True) => Ok(Expr::Literal(Value::Bool(true))),
            Token::Keyword(Keyword::False) => Ok(Expr::Literal(Value::Bool(false))),
            Token::Keyword(Keyword::Null) => Ok(Expr::Literal(Value::Null)),
            Token::Lbrace => {
                self.unscan();
                self.parse_document_literal()
            }
            Token::Lbracket => {
                self.unscan();
                self.parse_expr_list(Token::Lbracket, Token::Rbracket)
            }
            Token::Lparen => {
                let e = self.parse_expr()?;
                let next = self.scan_ignore_whitespace();
                match next.tok {
                    Token::Rparen => Ok(Expr::Parens(Box::new(e))),
                    Token::Comma => {
                        let mut items = vec![e];
                        loop {
                            items.push(self.parse_expr()?);
                            if !self.try_token(Token::Comma) {
                                break;
                            }
                        }
                        self.expect(Token::Rparen, ")")?;
                        Ok(Expr::List(items))
                    }
                    _ => Err(self.unexpected(&next, ") or ,")),
                }
            }
            Token::Keyword(Keyword::Not) => {
                // NOT binds tighter than AND, looser than comparisons.
                let inner = self.parse_binary_expr(Token::Eq.precedence())?;
                Ok(Expr::Not(Box::new(inner)))
            }
            Token::Minus => {
                let inner = self.parse_unary_expr()?;
                Ok(match inner {
                    Expr::Literal(Value::Integer(i)) => Expr::Literal(Value::Integer(-i)),
                    Expr::Literal(Value::Double(d)) => Expr::Literal(Value::Double(-d)),
                    inner => Expr::Neg(Box::new(inner)),
                })
            }
            _ => Err(self.unexpected(&item, "identifier, string, number, bool")),
        }
    }

    /// Parses a bracketed or parenthesized expression list.
    fn parse_expr_list(&mut self, open: Token, close: Token) -> Result<Expr, ParseError> {
        self.expect(open, "list opener")?;
        let mut items = Vec::new();
        if self.peek() == close {
            self.scan_ignore_whitespace();
            return Ok(Expr::List(items));
        }
        loop {
            items.push(self.parse_expr()?);
            if !self.try_token(Token::Comma) {
                break;
            }
        }
        let next = self.scan_ignore_whitespace();
        if next.tok != close {
            return Err(self.unexpected(&next, "list closer"));
        }
        Ok(Expr::List(items))
    }

    /// Parses a function call. `COUNT(*)` is special-cased; unknown
    /// names are rejected at parse time.
    fn parse_function(&mut self) -> Result<Expr, ParseError> {
        let name = self.parse_ident()?;
        self.expect(Token::Lparen, "(")?;
        let upper = name.to_ascii_uppercase();

        if upper == "COUNT" && self.try_token(Token::Star) {
            self.expect(Token::Rparen, ")")?;
            return Ok(Expr::Aggregate(AggregateFunc::CountWildcard));
        }

        if self.try_token(Token::Rparen) {
            return match upper.as_str() {
                "PK" => Ok(Expr::Pk),
                _ => Err(ParseError::UnknownFunction(name)),
            };
        }

        let mut args = Vec::new();
        loop {
            args.push(self.parse_expr()?);
            if !self.try_token(Token::Comma) {
                break;
            }
        }
        self.expect(Token::Rparen, ")")?;

        let one_arg = |args: Vec<Expr>| -> Result<Box<Expr>, ParseError> {
            let mut args = args;
            if args.len() != 1 {
                return Err(ParseError::Message(format!(
                    "{name} expects exactly one argument"
                )));
            }
            Ok(Box::new(args.remove(0)))
        };
        match upper.as_str() {
            "COUNT" => Ok(Expr::Aggregate(AggregateFunc::Count(one_arg(args)?))),
            "SUM" => Ok(Expr::Aggregate(AggregateFunc::Sum(one_arg(args)?))),
            "AVG" => Ok(Expr::Aggregate(AggregateFunc::Avg(one_arg(args)?))),
            "MIN" => Ok(Expr::Aggregate(AggregateFunc::Min(one_arg(args)?))),
            "MAX" => Ok(Expr::Aggregate(AggregateFunc::Max(one_arg(args)?))),
            _ => Err(ParseError::UnknownFunction(name)),
        }
    }

    /// Parses `CAST(expr AS type)`.
    fn parse_cast_expression(&mut self) -> Result<Expr, ParseError> {
        self.expect_keyword(Keyword::Cast)?;
        self.expect(Token::Lparen, "(")?;
        let e = self.parse_expr()?;
        self.expect_keyword(Keyword::As)?;
        let target = self.parse_type()?;
        self.expect(Token::Rparen, ")")?;
        Ok(Expr::Cast {
            expr: Box::new(e),
            target,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_expression;

    fn bin(op: BinaryOp, l: Expr, r: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(l),
            right: Box::new(r),
        }
    }

    fn int(i: i64) -> Expr {
        Expr::Literal(Value::Integer(i))
    }

    #[test]
    fn test_arithmetic_precedence() {
        // 1 + 2 * 3 parses as 1 + (2 * 3).
        assert_eq!(
            parse_expression("1 + 2 * 3").unwrap(),
            bin(BinaryOp::Add, int(1), bin(BinaryOp::Mul, int(2), int(3)))
        );
    }

    #[test]
    fn test_logic_precedence() {
        // 1 AND 0 OR 1 parses as (1 AND 0) OR 1.
        assert_eq!(
            parse_expression("1 AND 0 OR 1").unwrap(),
            bin(BinaryOp::Or, bin(BinaryOp::And, int(1), int(0)), int(1))
        );
    }

    #[test]
    fn test_comparison_binds_tighter_than_and() {
        assert_eq!(
            parse_expression("a = 1 AND b = 2").unwrap(),
            bin(
                BinaryOp::And,
                bin(BinaryOp::Eq, Expr::field("a"), int(1)),
                bin(BinaryOp::Eq, Expr::field("b"), int(2)),
            )
        );
    }

    #[test]
    fn test_not_precedence() {
        // NOT binds tighter than AND, looser than comparisons.
        assert_eq!(
            parse_expression("NOT a = 1 AND b").unwrap(),
            bin(
                BinaryOp::And,
                Expr::Not(Box::new(bin(BinaryOp::Eq, Expr::field("a"), int(1)))),
                Expr::field("b"),
            )
        );
    }

    #[test]
    fn test_parens_override() {
        assert_eq!(
            parse_expression("(1 + 2) * 3").unwrap(),
            bin(
                BinaryOp::Mul,
                Expr::Parens(Box::new(bin(BinaryOp::Add, int(1), int(2)))),
                int(3)
            )
        );
    }

    #[test]
    fn test_between() {
        assert_eq!(
            parse_expression("a BETWEEN 1 AND 5").unwrap(),
            Expr::Between {
                expr: Box::new(Expr::field("a")),
                low: Box::new(int(1)),
                high: Box::new(int(5)),
            }
        );
        // The AND after the bound still parses as a logical AND.
        assert_eq!(
            parse_expression("a BETWEEN 1 AND 5 AND b").unwrap(),
            bin(
                BinaryOp::And,
                Expr::Between {
                    expr: Box::new(Expr::field("a")),
                    low: Box::new(int(1)),
                    high: Box::new(int(5)),
                },
                Expr::field("b"),
            )
        );
    }

    #[test]
    fn test_is_and_is_not() {
        assert_eq!(
            parse_expression("a IS NULL").unwrap(),
            bin(BinaryOp::Is, Expr::field("a"), Expr::Literal(Value::Null))
        );
        assert_eq!(
            parse_expression("a IS NOT NULL").unwrap(),
            bin(
                BinaryOp::IsNot,
                Expr::field("a"),
                Expr::Literal(Value::Null)
            )
        );
    }

    #[test]
    fn test_not_in_and_not_like() {
        assert_eq!(
            parse_expression("a NOT IN (1, 2)").unwrap(),
            bin(BinaryOp::NotIn, Expr::field("a"), Expr::List(vec![int(1), int(2)]))
        );
        assert_eq!(
            parse_expression("a NOT LIKE \"x%\"").unwrap(),
            bin(
                BinaryOp::NotLike,
                Expr::field("a"),
                Expr::Literal(Value::text("x%"))
            )
        );
        assert!(parse_expression("a NOT 5").is_err());
    }

    #[test]
    fn test_unary_minus_folds_literals() {
        assert_eq!(parse_expression("-5").unwrap(), int(-5));
        assert_eq!(
            parse_expression("-a").unwrap(),
            Expr::Neg(Box::new(Expr::field("a")))
        );
        assert_eq!(
            parse_expression("1 - -2").unwrap(),
            bin(BinaryOp::Sub, int(1), int(-2))
        );
    }

    #[test]
    fn test_document_and_array_literals() {
        assert_eq!(
            parse_expression("{a: 1, b: [1, 2]}").unwrap(),
            Expr::DocumentLiteral(vec![
                ("a".to_string(), int(1)),
                ("b".to_string(), Expr::List(vec![int(1), int(2)])),
            ])
        );
    }

    #[test]
    fn test_duplicate_document_field_rejected() {
        assert_eq!(
            parse_expression("{a: 1, a: 2}"),
            Err(ParseError::DuplicateField("a".to_string()))
        );
    }

    #[test]
    fn test_mixed_params_rejected() {
        assert_eq!(
            parse_expression("? + $x"),
            Err(ParseError::MixedParams)
        );
        assert_eq!(
            parse_expression("$x + ?"),
            Err(ParseError::MixedParams)
        );
        assert_eq!(parse_expression("$"), Err(ParseError::MissingParamName));
    }

    #[test]
    fn test_positional_params_are_ordinal() {
        assert_eq!(
            parse_expression("? + ?").unwrap(),
            bin(
                BinaryOp::Add,
                Expr::PositionalParam(1),
                Expr::PositionalParam(2)
            )
        );
    }

    #[test]
    fn test_functions() {
        assert_eq!(
            parse_expression("COUNT(*)").unwrap(),
            Expr::Aggregate(AggregateFunc::CountWildcard)
        );
        assert_eq!(
            parse_expression("sum(a)").unwrap(),
            Expr::Aggregate(AggregateFunc::Sum(Box::new(Expr::field("a"))))
        );
        assert_eq!(parse_expression("PK()").unwrap(), Expr::Pk);
        assert_eq!(
            parse_expression("nope(a)"),
            Err(ParseError::UnknownFunction("nope".to_string()))
        );
    }

    #[test]
    fn test_cast() {
        assert_eq!(
            parse_expression("CAST(a AS INTEGER)").unwrap(),
            Expr::Cast {
                expr: Box::new(Expr::field("a")),
                target: docket_core::ValueKind::Integer,
            }
        );
    }

    #[test]
    fn test_concat_vs_bitor() {
        assert_eq!(
            parse_expression("a || b | c").unwrap(),
            // | binds looser than ||.
            bin(
                BinaryOp::BitOr,
                bin(BinaryOp::Concat, Expr::field("a"), Expr::field("b")),
                Expr::field("c"),
            )
        );
    }

    #[test]
    fn test_display_roundtrip() {
        for src in [
            "1 + 2 * 3",
            "a = 1 AND b = 2",
            "a BETWEEN 1 AND 5",
            "a IS NOT NULL",
            "NOT a",
            "{a: 1, b: \"x\"}",
            "[1, 2, 3]",
            "(1 + 2) * 3",
            "CAST(a AS INTEGER)",
            "COUNT(*)",
            "a.b[0] > 4.5",
            "x NOT IN [1, 2]",
            "name LIKE \"A%\"",
        ] {
            let parsed = parse_expression(src).unwrap();
            let reparsed = parse_expression(&parsed.to_string()).unwrap();
            assert_eq!(parsed, reparsed, "display of {src:?} didn't reparse");
        }
    }
}

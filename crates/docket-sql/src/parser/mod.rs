//! Recursive descent SQL parser.
//!
//! Statements parse by recursive descent; expressions by precedence
//! climbing (see `expr.rs`). The parser works over the full token vector
//! with an unscan stack, and keeps token spans so the raw source text of
//! any sub-expression can be recovered for result field naming and error
//! messages.

mod expr;
mod statement;

use std::collections::HashSet;

use docket_core::{Path, PathFragment, ValueKind};

use crate::error::ParseError;
use crate::query::Statement;
use crate::scanner::{Keyword, Scanner, Token, TokenItem};

/// Parses a query string into statements.
pub fn parse(src: &str) -> Result<Vec<Statement>, ParseError> {
    Parser::new(src).parse_query()
}

/// Parses a single statement.
pub fn parse_statement(src: &str) -> Result<Statement, ParseError> {
    let mut statements = parse(src)?;
    if statements.len() != 1 {
        return Err(ParseError::Message(format!(
            "expected 1 statement, got {}",
            statements.len()
        )));
    }
    Ok(statements.remove(0))
}

/// Parses a single expression.
pub fn parse_expression(src: &str) -> Result<crate::expr::Expr, ParseError> {
    let mut parser = Parser::new(src);
    let e = parser.parse_expr()?;
    let trailing = parser.scan_ignore_whitespace();
    if trailing.tok != Token::Eof {
        return Err(parser.unexpected(&trailing, "EOF"));
    }
    Ok(e)
}

/// The SQL parser.
pub struct Parser<'a> {
    src: &'a str,
    tokens: Vec<TokenItem>,
    idx: usize,
    marks: Vec<usize>,
    pub(crate) named_params: usize,
    pub(crate) positional_params: usize,
}

impl<'a> Parser<'a> {
    /// Creates a parser over the given source text.
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            tokens: Scanner::scan_all(src),
            idx: 0,
            marks: Vec::new(),
            named_params: 0,
            positional_params: 0,
        }
    }

    /// Parses all statements, separated by semicolons.
    pub fn parse_query(&mut self) -> Result<Vec<Statement>, ParseError> {
        let mut statements = Vec::new();
        let mut semi = true;
        loop {
            let item = self.scan_ignore_whitespace();
            match item.tok {
                Token::Eof => return Ok(statements),
                Token::Semicolon => semi = true,
                _ => {
                    if !semi {
                        return Err(self.unexpected(&item, ";"));
                    }
                    self.unscan();
                    statements.push(self.parse_statement()?);
                    semi = false;
                }
            }
        }
    }

    /// Parses one statement, dispatching on its leading keyword.
    pub fn parse_statement(&mut self) -> Result<Statement, ParseError> {
        let item = self.scan_ignore_whitespace();
        match item.tok {
            Token::Keyword(Keyword::Alter) => self.parse_alter_statement(),
            Token::Keyword(Keyword::Begin) => self.parse_begin_statement(),
            Token::Keyword(Keyword::Commit) => self.parse_commit_statement(),
            Token::Keyword(Keyword::Rollback) => self.parse_rollback_statement(),
            Token::Keyword(Keyword::Select) => {
                Ok(Statement::Select(self.parse_select_statement()?))
            }
            Token::Keyword(Keyword::Delete) => self.parse_delete_statement(),
            Token::Keyword(Keyword::Update) => self.parse_update_statement(),
            Token::Keyword(Keyword::Insert) => self.parse_insert_statement(),
            Token::Keyword(Keyword::Create) => self.parse_create_statement(),
            Token::Keyword(Keyword::Drop) => self.parse_drop_statement(),
            Token::Keyword(Keyword::Explain) => self.parse_explain_statement(),
            Token::Keyword(Keyword::Reindex) => self.parse_reindex_statement(),
            _ => Err(self.unexpected(
                &item,
                "ALTER, BEGIN, COMMIT, SELECT, DELETE, UPDATE, INSERT, CREATE, DROP, \
                 EXPLAIN, REINDEX, ROLLBACK",
            )),
        }
    }

    // =========================================================================
    // Token plumbing
    // =========================================================================

    fn raw_next(&mut self) -> TokenItem {
        let item = self.tokens[self.idx].clone();
        if item.tok != Token::Eof {
            self.idx += 1;
        }
        item
    }

    /// Scans the next token, whitespace included.
    pub(crate) fn scan(&mut self) -> TokenItem {
        self.marks.push(self.idx);
        self.raw_next()
    }

    /// Scans the next token, skipping whitespace and comments.
    pub(crate) fn scan_ignore_whitespace(&mut self) -> TokenItem {
        let mark = self.idx;
        loop {
            let item = self.raw_next();
            if !matches!(item.tok, Token::Ws | Token::Comment) {
                self.marks.push(mark);
                return item;
            }
        }
    }

    /// Puts back the last scanned token (and any whitespace skipped with
    /// it).
    pub(crate) fn unscan(&mut self) {
        if let Some(mark) = self.marks.pop() {
            self.idx = mark;
        }
    }

    /// Peeks the kind of the very next token without consuming it.
    pub(crate) fn peek_raw(&mut self) -> Token {
        let item = self.scan();
        let tok = item.tok;
        self.unscan();
        tok
    }

    /// Peeks the kind of the next significant token.
    pub(crate) fn peek(&mut self) -> Token {
        let item = self.scan_ignore_whitespace();
        let tok = item.tok;
        self.unscan();
        tok
    }

    /// Byte offset where the next significant token starts.
    pub(crate) fn next_token_start(&mut self) -> usize {
        let item = self.scan_ignore_whitespace();
        let start = item.start;
        self.unscan();
        start
    }

    /// Source text consumed since `start`, trimmed.
    pub(crate) fn consumed_src(&self, start: usize) -> String {
        let end = self.tokens[..self.idx]
            .iter()
            .rev()
            .find(|t| !matches!(t.tok, Token::Ws | Token::Comment | Token::Eof))
            .map(|t| t.end)
            .unwrap_or(start);
        self.src.get(start..end.max(start)).unwrap_or("").trim().to_string()
    }

    pub(crate) fn unexpected(&self, item: &TokenItem, expected: &str) -> ParseError {
        let found = if item.lit.is_empty() {
            item.tok.to_string()
        } else {
            item.lit.clone()
        };
        ParseError::UnexpectedToken {
            found,
            expected: expected.to_string(),
            line: item.pos.line,
            column: item.pos.column,
        }
    }

    /// Consumes one expected token kind.
    pub(crate) fn expect(&mut self, tok: Token, expected: &str) -> Result<TokenItem, ParseError> {
        let item = self.scan_ignore_whitespace();
        if item.tok == tok {
            Ok(item)
        } else {
            Err(self.unexpected(&item, expected))
        }
    }

    /// Consumes one expected keyword.
    pub(crate) fn expect_keyword(&mut self, kw: Keyword) -> Result<(), ParseError> {
        self.expect(Token::Keyword(kw), &format!("{kw:?}").to_uppercase())?;
        Ok(())
    }

    /// Consumes the keyword if it is next; reports whether it was.
    pub(crate) fn try_keyword(&mut self, kw: Keyword) -> bool {
        let item = self.scan_ignore_whitespace();
        if item.tok == Token::Keyword(kw) {
            true
        } else {
            self.unscan();
            false
        }
    }

    /// Consumes a whole keyword sequence, or nothing at all.
    pub(crate) fn try_keywords(&mut self, kws: &[Keyword]) -> bool {
        let mut consumed = 0;
        for kw in kws {
            let item = self.scan_ignore_whitespace();
            consumed += 1;
            if item.tok != Token::Keyword(*kw) {
                for _ in 0..consumed {
                    self.unscan();
                }
                return false;
            }
        }
        true
    }

    // =========================================================================
    // Shared grammar pieces
    // =========================================================================

    /// Parses an identifier, possibly backtick-quoted.
    pub(crate) fn parse_ident(&mut self) -> Result<String, ParseError> {
        let item = self.scan_ignore_whitespace();
        if item.tok == Token::Ident {
            Ok(item.lit)
        } else {
            Err(self.unexpected(&item, "identifier"))
        }
    }

    /// Parses a comma-separated identifier list.
    pub(crate) fn parse_ident_list(&mut self) -> Result<Vec<String>, ParseError> {
        let mut idents = vec![self.parse_ident()?];
        while self.try_token(Token::Comma) {
            idents.push(self.parse_ident()?);
        }
        Ok(idents)
    }

    pub(crate) fn try_token(&mut self, tok: Token) -> bool {
        let item = self.scan_ignore_whitespace();
        if item.tok == tok {
            true
        } else {
            self.unscan();
            false
        }
    }

    /// Parses a dotted/indexed path: `a.b[0].c`.
    pub(crate) fn parse_path(&mut self) -> Result<Path, ParseError> {
        let first = self.parse_ident()?;
        let mut path = Path::field(first);
        loop {
            let item = self.scan();
            match item.tok {
                Token::Dot => {
                    let field = self.scan();
                    if field.tok != Token::Ident {
                        return Err(self.unexpected(&field, "identifier"));
                    }
                    path.push(PathFragment::Field(field.lit));
                }
                Token::Lbracket => {
                    let index = self.scan();
                    if index.tok != Token::Integer {
                        return Err(self.unexpected(&index, "array index"));
                    }
                    let idx: usize = index
                        .lit
                        .parse()
                        .map_err(|_| self.unexpected(&index, "array index"))?;
                    let close = self.scan();
                    if close.tok != Token::Rbracket {
                        return Err(self.unexpected(&close, "]"));
                    }
                    path.push(PathFragment::Index(idx));
                }
                _ => {
                    self.unscan();
                    return Ok(path);
                }
            }
        }
    }

    /// Parses a parenthesized comma-separated path list.
    pub(crate) fn parse_path_list(&mut self) -> Result<Vec<Path>, ParseError> {
        self.expect(Token::Lparen, "(")?;
        let mut paths = vec![self.parse_path()?];
        while self.try_token(Token::Comma) {
            paths.push(self.parse_path()?);
        }
        self.expect(Token::Rparen, ")")?;
        Ok(paths)
    }

    /// Parses a type name into a value kind.
    pub(crate) fn parse_type(&mut self) -> Result<ValueKind, ParseError> {
        let item = self.scan_ignore_whitespace();
        match item.tok {
            Token::Keyword(
                Keyword::TypeInteger | Keyword::TypeInt | Keyword::TypeBigint | Keyword::TypeSmallint,
            ) => Ok(ValueKind::Integer),
            Token::Keyword(Keyword::TypeDouble) => {
                // Allow DOUBLE PRECISION.
                self.try_keyword(Keyword::Precision);
                Ok(ValueKind::Double)
            }
            Token::Keyword(Keyword::TypeReal) => Ok(ValueKind::Double),
            Token::Keyword(Keyword::TypeText) => Ok(ValueKind::Text),
            Token::Keyword(Keyword::TypeVarchar) => {
                // The size between parentheses is accepted and ignored.
                self.expect(Token::Lparen, "(")?;
                self.expect(Token::Integer, "integer")?;
                self.expect(Token::Rparen, ")")?;
                Ok(ValueKind::Text)
            }
            Token::Keyword(Keyword::TypeBool | Keyword::TypeBoolean) => Ok(ValueKind::Bool),
            Token::Keyword(Keyword::TypeBlob | Keyword::TypeBytes) => Ok(ValueKind::Blob),
            Token::Keyword(Keyword::TypeArray) => Ok(ValueKind::Array),
            Token::Keyword(Keyword::TypeDocument) => Ok(ValueKind::Document),
            _ => Err(self.unexpected(&item, "type")),
        }
    }

    /// Parses a type if one is next.
    pub(crate) fn try_parse_type(&mut self) -> Result<Option<ValueKind>, ParseError> {
        match self.peek() {
            Token::Keyword(
                Keyword::TypeInteger
                | Keyword::TypeInt
                | Keyword::TypeBigint
                | Keyword::TypeSmallint
                | Keyword::TypeDouble
                | Keyword::TypeReal
                | Keyword::TypeText
                | Keyword::TypeVarchar
                | Keyword::TypeBool
                | Keyword::TypeBoolean
                | Keyword::TypeBlob
                | Keyword::TypeBytes
                | Keyword::TypeArray
                | Keyword::TypeDocument,
            ) => Ok(Some(self.parse_type()?)),
            _ => Ok(None),
        }
    }

    /// Parses a document literal: `{k: expr, ...}`.
    pub(crate) fn parse_document_literal(&mut self) -> Result<crate::expr::Expr, ParseError> {
        self.expect(Token::Lbrace, "{")?;
        let mut pairs = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        loop {
            let item = self.scan_ignore_whitespace();
            let key = match item.tok {
                Token::Ident | Token::String => item.lit,
                _ => {
                    self.unscan();
                    break;
                }
            };
            self.expect(Token::Colon, ":")?;
            let value = self.parse_expr()?;
            if !seen.insert(key.clone()) {
                return Err(ParseError::DuplicateField(key));
            }
            pairs.push((key, value));
            if !self.try_token(Token::Comma) {
                break;
            }
        }
        self.expect(Token::Rbrace, "}")?;
        Ok(crate::expr::Expr::DocumentLiteral(pairs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_path_forms() {
        let mut p = Parser::new("a.b[2].c");
        let path = p.parse_path().unwrap();
        assert_eq!(path.to_string(), "a.b[2].c");
    }

    #[test]
    fn test_multiple_statements_need_semicolons() {
        assert!(parse("SELECT 1; SELECT 2").is_ok());
        assert!(parse("SELECT 1 SELECT 2").is_err());
        assert!(parse("SELECT 1;; SELECT 2;").is_ok());
    }

    #[test]
    fn test_unknown_leading_keyword() {
        assert!(matches!(
            parse("FOO 1"),
            Err(ParseError::UnexpectedToken { .. })
        ));
    }
}

//! Statement parsing.

use docket_core::{
    catalog::{FieldConstraint, IndexInfo, TableInfo},
    Value,
};

use crate::error::ParseError;
use crate::expr::{Expr, NamedExpr};
use crate::query::{
    CreateIndexStmt, CreateTableStmt, DeleteStmt, DropIndexStmt, DropTableStmt, InsertStmt,
    SelectStmt, Statement, UpdateAction, UpdateStmt,
};
use crate::scanner::{Keyword, Token};

use super::Parser;

impl Parser<'_> {
    /// Parses a SELECT statement. The SELECT keyword has been consumed.
    pub(crate) fn parse_select_statement(&mut self) -> Result<SelectStmt, ParseError> {
        let projections = self.parse_result_fields()?;

        let from = if self.try_keyword(Keyword::From) {
            Some(self.parse_ident()?)
        } else {
            None
        };

        let filter = self.parse_condition()?;

        let group_by = if self.try_keyword(Keyword::Group) {
            self.expect_keyword(Keyword::By)?;
            Some(self.parse_expr()?)
        } else {
            None
        };

        let order_by = if self.try_keyword(Keyword::Order) {
            self.expect_keyword(Keyword::By)?;
            let path = self.parse_path()?;
            let desc = if self.try_keyword(Keyword::Desc) {
                true
            } else {
                self.try_keyword(Keyword::Asc);
                false
            };
            Some((path, desc))
        } else {
            None
        };

        let limit = if self.try_keyword(Keyword::Limit) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        let offset = if self.try_keyword(Keyword::Offset) {
            Some(self.parse_expr()?)
        } else {
            None
        };

        Ok(SelectStmt {
            projections,
            from,
            filter,
            group_by,
            order_by,
            limit,
            offset,
        })
    }

    fn parse_result_fields(&mut self) -> Result<Vec<NamedExpr>, ParseError> {
        let mut fields = vec![self.parse_result_field()?];
        while self.try_token(Token::Comma) {
            fields.push(self.parse_result_field()?);
        }
        Ok(fields)
    }

    fn parse_result_field(&mut self) -> Result<NamedExpr, ParseError> {
        if self.try_token(Token::Star) {
            return Ok(NamedExpr {
                expr: Expr::Wildcard,
                alias: None,
                text: Some("*".to_string()),
            });
        }
        let start = self.next_token_start();
        let expr = self.parse_expr()?;
        let text = self.consumed_src(start);
        let alias = if self.try_keyword(Keyword::As) {
            Some(self.parse_ident()?)
        } else {
            None
        };
        Ok(NamedExpr {
            expr,
            alias,
            text: Some(text),
        })
    }

    /// Parses the WHERE clause if present.
    pub(crate) fn parse_condition(&mut self) -> Result<Option<Expr>, ParseError> {
        if !self.try_keyword(Keyword::Where) {
            return Ok(None);
        }
        Ok(Some(self.parse_expr()?))
    }

    /// Parses an INSERT statement. INSERT has been consumed.
    pub(crate) fn parse_insert_statement(&mut self) -> Result<Statement, ParseError> {
        self.expect_keyword(Keyword::Into)?;
        let table = self.parse_ident()?;

        let fields = if self.peek() == Token::Lparen {
            self.scan_ignore_whitespace();
            let idents = self.parse_ident_list()?;
            self.expect(Token::Rparen, ")")?;
            Some(idents)
        } else {
            None
        };

        let item = self.scan_ignore_whitespace();
        match item.tok {
            Token::Keyword(Keyword::Values) => {
                let mut values = Vec::new();
                loop {
                    values.push(match &fields {
                        Some(fields) => self.parse_value_row(fields)?,
                        None => self.parse_document_or_param()?,
                    });
                    if !self.try_token(Token::Comma) {
                        break;
                    }
                }
                Ok(Statement::Insert(InsertStmt {
                    table,
                    values,
                    select: None,
                }))
            }
            Token::Keyword(Keyword::Select) => {
                if fields.is_some() {
                    return Err(ParseError::Message(
                        "INSERT with a field list requires VALUES".to_string(),
                    ));
                }
                let select = self.parse_select_statement()?;
                Ok(Statement::Insert(InsertStmt {
                    table,
                    values: Vec::new(),
                    select: Some(select),
                }))
            }
            _ => Err(self.unexpected(&item, "VALUES or SELECT")),
        }
    }

    /// Parses `(e1, e2, ...)` against a declared field list, producing a
    /// document literal.
    fn parse_value_row(&mut self, fields: &[String]) -> Result<Expr, ParseError> {
        self.expect(Token::Lparen, "(")?;
        let mut exprs = Vec::new();
        loop {
            exprs.push(self.parse_expr()?);
            if !self.try_token(Token::Comma) {
                break;
            }
        }
        self.expect(Token::Rparen, ")")?;
        if exprs.len() != fields.len() {
            return Err(ParseError::Message(format!(
                "{} values for {} fields",
                exprs.len(),
                fields.len()
            )));
        }
        Ok(Expr::DocumentLiteral(
            fields.iter().cloned().zip(exprs).collect(),
        ))
    }

    fn parse_document_or_param(&mut self) -> Result<Expr, ParseError> {
        let item = self.scan_ignore_whitespace();
        match item.tok {
            Token::Lbrace => {
                self.unscan();
                self.parse_document_literal()
            }
            Token::NamedParam | Token::PositionalParam => {
                self.unscan();
                self.parse_unary_expr()
            }
            _ => Err(self.unexpected(&item, "document or parameter")),
        }
    }

    /// Parses an UPDATE statement. UPDATE has been consumed.
    pub(crate) fn parse_update_statement(&mut self) -> Result<Statement, ParseError> {
        let table = self.parse_ident()?;
        let item = self.scan_ignore_whitespace();
        let actions = match item.tok {
            Token::Keyword(Keyword::Set) => {
                let mut pairs = Vec::new();
                loop {
                    let path = self.parse_path()?;
                    self.expect(Token::Eq, "=")?;
                    let value = self.parse_expr()?;
                    pairs.push((path, value));
                    if !self.try_token(Token::Comma) {
                        break;
                    }
                }
                UpdateAction::Set(pairs)
            }
            Token::Keyword(Keyword::Unset) => UpdateAction::Unset(self.parse_ident_list()?),
            _ => return Err(self.unexpected(&item, "SET or UNSET")),
        };
        let filter = self.parse_condition()?;
        Ok(Statement::Update(UpdateStmt {
            table,
            actions,
            filter,
        }))
    }

    /// Parses a DELETE statement. DELETE has been consumed.
    pub(crate) fn parse_delete_statement(&mut self) -> Result<Statement, ParseError> {
        self.expect_keyword(Keyword::From)?;
        let table = self.parse_ident()?;
        let filter = self.parse_condition()?;
        Ok(Statement::Delete(DeleteStmt { table, filter }))
    }

    /// Parses CREATE TABLE / CREATE [UNIQUE] INDEX. CREATE has been
    /// consumed.
    pub(crate) fn parse_create_statement(&mut self) -> Result<Statement, ParseError> {
        let item = self.scan_ignore_whitespace();
        match item.tok {
            Token::Keyword(Keyword::Table) => self.parse_create_table(),
            Token::Keyword(Keyword::Unique) => {
                self.expect_keyword(Keyword::Index)?;
                self.parse_create_index(true)
            }
            Token::Keyword(Keyword::Index) => self.parse_create_index(false),
            _ => Err(self.unexpected(&item, "TABLE, INDEX or UNIQUE")),
        }
    }

    fn parse_create_table(&mut self) -> Result<Statement, ParseError> {
        let if_not_exists = self.try_keywords(&[Keyword::If, Keyword::Not, Keyword::Exists]);
        let name = self.parse_ident()?;
        let mut info = TableInfo::new(name);

        if self.try_token(Token::Lparen) {
            loop {
                let fc = self.parse_field_definition()?;
                info.add_constraint(fc)
                    .map_err(|err| ParseError::Message(err.to_string()))?;
                if !self.try_token(Token::Comma) {
                    break;
                }
            }
            self.expect(Token::Rparen, ")")?;
        }

        Ok(Statement::CreateTable(CreateTableStmt {
            info,
            if_not_exists,
        }))
    }

    /// Parses one field definition: a path, an optional type, and any
    /// number of PRIMARY KEY / NOT NULL / UNIQUE / DEFAULT clauses.
    pub(crate) fn parse_field_definition(&mut self) -> Result<FieldConstraint, ParseError> {
        let path = self.parse_path()?;
        let mut fc = FieldConstraint::new(path);
        fc.kind = self.try_parse_type()?;

        loop {
            if self.try_keywords(&[Keyword::Primary, Keyword::Key]) {
                fc.primary_key = true;
            } else if self.try_keywords(&[Keyword::Not, Keyword::Null]) {
                fc.not_null = true;
            } else if self.try_keyword(Keyword::Unique) {
                fc.unique = true;
            } else if self.try_keyword(Keyword::Default) {
                let e = self.parse_expr()?;
                fc.default_value = Some(literal_value(&e).ok_or_else(|| {
                    ParseError::Message("DEFAULT value must be a literal".to_string())
                })?);
            } else {
                return Ok(fc);
            }
        }
    }

    fn parse_create_index(&mut self, unique: bool) -> Result<Statement, ParseError> {
        let if_not_exists = self.try_keywords(&[Keyword::If, Keyword::Not, Keyword::Exists]);
        let name = self.parse_ident()?;
        self.expect_keyword(Keyword::On)?;
        let table = self.parse_ident()?;
        let paths = self.parse_path_list()?;

        let info = IndexInfo::new(name, table, paths).with_unique(unique);
        Ok(Statement::CreateIndex(CreateIndexStmt {
            info,
            if_not_exists,
        }))
    }

    /// Parses DROP TABLE / DROP INDEX. DROP has been consumed.
    pub(crate) fn parse_drop_statement(&mut self) -> Result<Statement, ParseError> {
        let item = self.scan_ignore_whitespace();
        match item.tok {
            Token::Keyword(Keyword::Table) => {
                let if_exists = self.try_keywords(&[Keyword::If, Keyword::Exists]);
                let name = self.parse_ident()?;
                Ok(Statement::DropTable(DropTableStmt { name, if_exists }))
            }
            Token::Keyword(Keyword::Index) => {
                let if_exists = self.try_keywords(&[Keyword::If, Keyword::Exists]);
                let name = self.parse_ident()?;
                Ok(Statement::DropIndex(DropIndexStmt { name, if_exists }))
            }
            _ => Err(self.unexpected(&item, "TABLE or INDEX")),
        }
    }

    /// Parses ALTER TABLE. ALTER has been consumed.
    pub(crate) fn parse_alter_statement(&mut self) -> Result<Statement, ParseError> {
        self.expect_keyword(Keyword::Table)?;
        let table = self.parse_ident()?;
        let item = self.scan_ignore_whitespace();
        match item.tok {
            Token::Keyword(Keyword::Rename) => {
                self.expect_keyword(Keyword::To)?;
                let new_name = self.parse_ident()?;
                Ok(Statement::AlterRename { table, new_name })
            }
            Token::Keyword(Keyword::Add) => {
                self.expect_keyword(Keyword::Field)?;
                let constraint = self.parse_field_definition()?;
                Ok(Statement::AlterAddField { table, constraint })
            }
            _ => Err(self.unexpected(&item, "RENAME or ADD")),
        }
    }

    /// Parses REINDEX [name]. REINDEX has been consumed.
    pub(crate) fn parse_reindex_statement(&mut self) -> Result<Statement, ParseError> {
        let item = self.scan_ignore_whitespace();
        if item.tok == Token::Ident {
            Ok(Statement::ReIndex(Some(item.lit)))
        } else {
            self.unscan();
            Ok(Statement::ReIndex(None))
        }
    }

    /// Parses EXPLAIN statement. EXPLAIN has been consumed.
    pub(crate) fn parse_explain_statement(&mut self) -> Result<Statement, ParseError> {
        let inner = self.parse_statement()?;
        Ok(Statement::Explain(Box::new(inner)))
    }

    /// Parses BEGIN [TRANSACTION] [READ ONLY | READ WRITE].
    pub(crate) fn parse_begin_statement(&mut self) -> Result<Statement, ParseError> {
        self.try_keyword(Keyword::Transaction);
        if !self.try_keyword(Keyword::Read) {
            return Ok(Statement::Begin { writable: true });
        }
        if self.try_keyword(Keyword::Only) {
            return Ok(Statement::Begin { writable: false });
        }
        let item = self.scan_ignore_whitespace();
        if item.tok == Token::Keyword(Keyword::Write) {
            Ok(Statement::Begin { writable: true })
        } else {
            Err(self.unexpected(&item, "ONLY or WRITE"))
        }
    }

    /// Parses COMMIT [TRANSACTION].
    pub(crate) fn parse_commit_statement(&mut self) -> Result<Statement, ParseError> {
        self.try_keyword(Keyword::Transaction);
        Ok(Statement::Commit)
    }

    /// Parses ROLLBACK [TRANSACTION].
    pub(crate) fn parse_rollback_statement(&mut self) -> Result<Statement, ParseError> {
        self.try_keyword(Keyword::Transaction);
        Ok(Statement::Rollback)
    }
}

/// Reduces a parsed expression to a literal value, unwrapping
/// parentheses. Used for DEFAULT clauses.
fn literal_value(e: &Expr) -> Option<Value> {
    match e {
        Expr::Literal(v) => Some(v.clone()),
        Expr::Parens(inner) => literal_value(inner),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_statement;
    use docket_core::ValueKind;

    #[test]
    fn test_parse_select() {
        let Statement::Select(s) =
            parse_statement("SELECT a, b FROM t WHERE a > 1 ORDER BY a DESC LIMIT 10 OFFSET 2")
                .unwrap()
        else {
            panic!("expected SELECT");
        };
        assert_eq!(s.projections.len(), 2);
        assert_eq!(s.from.as_deref(), Some("t"));
        assert!(s.filter.is_some());
        assert_eq!(s.order_by.as_ref().unwrap().1, true);
        assert!(s.limit.is_some());
        assert!(s.offset.is_some());
    }

    #[test]
    fn test_select_wildcard_and_alias() {
        let Statement::Select(s) = parse_statement("SELECT *, a + 1 AS next FROM t").unwrap()
        else {
            panic!("expected SELECT");
        };
        assert_eq!(s.projections[0].expr, Expr::Wildcard);
        assert_eq!(s.projections[1].alias.as_deref(), Some("next"));
        assert_eq!(s.projections[1].text.as_deref(), Some("a + 1"));
    }

    #[test]
    fn test_parse_insert_documents() {
        let Statement::Insert(s) =
            parse_statement("INSERT INTO t VALUES {a: 1}, {a: 2}").unwrap()
        else {
            panic!("expected INSERT");
        };
        assert_eq!(s.table, "t");
        assert_eq!(s.values.len(), 2);
    }

    #[test]
    fn test_parse_insert_field_list() {
        let Statement::Insert(s) =
            parse_statement("INSERT INTO t (a, b) VALUES (1, 2), (3, 4)").unwrap()
        else {
            panic!("expected INSERT");
        };
        assert_eq!(
            s.values[0],
            Expr::DocumentLiteral(vec![
                ("a".to_string(), Expr::Literal(Value::Integer(1))),
                ("b".to_string(), Expr::Literal(Value::Integer(2))),
            ])
        );
        assert!(parse_statement("INSERT INTO t (a, b) VALUES (1)").is_err());
    }

    #[test]
    fn test_parse_insert_select() {
        let Statement::Insert(s) = parse_statement("INSERT INTO t SELECT * FROM s").unwrap()
        else {
            panic!("expected INSERT");
        };
        assert!(s.select.is_some());
    }

    #[test]
    fn test_parse_update() {
        let Statement::Update(s) =
            parse_statement("UPDATE t SET a = 1, b.c = 2 WHERE a > 0").unwrap()
        else {
            panic!("expected UPDATE");
        };
        let UpdateAction::Set(pairs) = &s.actions else {
            panic!("expected SET");
        };
        assert_eq!(pairs.len(), 2);
        assert!(s.filter.is_some());

        let Statement::Update(s) = parse_statement("UPDATE t UNSET a, b").unwrap() else {
            panic!("expected UPDATE");
        };
        assert_eq!(s.actions, UpdateAction::Unset(vec!["a".into(), "b".into()]));
    }

    #[test]
    fn test_parse_delete() {
        let Statement::Delete(s) = parse_statement("DELETE FROM t WHERE a = 1").unwrap() else {
            panic!("expected DELETE");
        };
        assert_eq!(s.table, "t");
        assert!(s.filter.is_some());
    }

    #[test]
    fn test_parse_create_table() {
        let Statement::CreateTable(s) = parse_statement(
            "CREATE TABLE IF NOT EXISTS t (id INTEGER PRIMARY KEY, name TEXT NOT NULL, \
             age INTEGER DEFAULT 18, email TEXT UNIQUE)",
        )
        .unwrap() else {
            panic!("expected CREATE TABLE");
        };
        assert!(s.if_not_exists);
        assert_eq!(s.info.field_constraints.len(), 4);
        let pk = s.info.primary_key().unwrap();
        assert_eq!(pk.path.to_string(), "id");
        assert_eq!(pk.kind, Some(ValueKind::Integer));
        assert_eq!(
            s.info.field_constraints[2].default_value,
            Some(Value::Integer(18))
        );
        assert!(s.info.field_constraints[3].unique);
    }

    #[test]
    fn test_parse_create_table_schemaless() {
        let Statement::CreateTable(s) = parse_statement("CREATE TABLE t").unwrap() else {
            panic!("expected CREATE TABLE");
        };
        assert!(s.info.field_constraints.is_empty());
    }

    #[test]
    fn test_parse_create_index() {
        let Statement::CreateIndex(s) =
            parse_statement("CREATE UNIQUE INDEX ix ON t (a, b.c)").unwrap()
        else {
            panic!("expected CREATE INDEX");
        };
        assert!(s.info.unique);
        assert_eq!(s.info.table_name, "t");
        assert_eq!(s.info.paths.len(), 2);
    }

    #[test]
    fn test_parse_drop() {
        assert_eq!(
            parse_statement("DROP TABLE IF EXISTS t").unwrap(),
            Statement::DropTable(DropTableStmt {
                name: "t".to_string(),
                if_exists: true
            })
        );
        assert_eq!(
            parse_statement("DROP INDEX ix").unwrap(),
            Statement::DropIndex(DropIndexStmt {
                name: "ix".to_string(),
                if_exists: false
            })
        );
    }

    #[test]
    fn test_parse_alter() {
        assert_eq!(
            parse_statement("ALTER TABLE t RENAME TO u").unwrap(),
            Statement::AlterRename {
                table: "t".to_string(),
                new_name: "u".to_string()
            }
        );
        let Statement::AlterAddField { table, constraint } =
            parse_statement("ALTER TABLE t ADD FIELD score DOUBLE NOT NULL").unwrap()
        else {
            panic!("expected ALTER ADD FIELD");
        };
        assert_eq!(table, "t");
        assert_eq!(constraint.kind, Some(ValueKind::Double));
        assert!(constraint.not_null);
    }

    #[test]
    fn test_parse_transactions() {
        assert_eq!(
            parse_statement("BEGIN").unwrap(),
            Statement::Begin { writable: true }
        );
        assert_eq!(
            parse_statement("BEGIN TRANSACTION READ ONLY").unwrap(),
            Statement::Begin { writable: false }
        );
        assert_eq!(
            parse_statement("BEGIN READ WRITE").unwrap(),
            Statement::Begin { writable: true }
        );
        assert_eq!(parse_statement("COMMIT").unwrap(), Statement::Commit);
        assert_eq!(
            parse_statement("ROLLBACK TRANSACTION").unwrap(),
            Statement::Rollback
        );
    }

    #[test]
    fn test_parse_reindex_and_explain() {
        assert_eq!(
            parse_statement("REINDEX").unwrap(),
            Statement::ReIndex(None)
        );
        assert_eq!(
            parse_statement("REINDEX ix").unwrap(),
            Statement::ReIndex(Some("ix".to_string()))
        );
        assert!(matches!(
            parse_statement("EXPLAIN SELECT * FROM t").unwrap(),
            Statement::Explain(_)
        ));
    }

    #[test]
    fn test_statement_display_reparses() {
        for src in [
            "SELECT a, SUM(b) FROM t WHERE a > 1 GROUP BY a ORDER BY a DESC LIMIT 5 OFFSET 1",
            "SELECT * FROM t",
            "INSERT INTO t VALUES {a: 1, b: \"x\"}",
            "UPDATE t SET a = 1 WHERE b = 2",
            "UPDATE t UNSET a",
            "DELETE FROM t WHERE a = 1",
            "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT NOT NULL DEFAULT \"anon\")",
            "CREATE TABLE IF NOT EXISTS t",
            "CREATE UNIQUE INDEX ix ON t (a, b)",
            "DROP TABLE IF EXISTS t",
            "DROP INDEX ix",
            "ALTER TABLE t RENAME TO u",
            "ALTER TABLE t ADD FIELD score DOUBLE",
            "BEGIN READ ONLY",
            "COMMIT",
            "ROLLBACK",
            "REINDEX ix",
            "EXPLAIN SELECT * FROM t WHERE x = 5",
        ] {
            let parsed = parse_statement(src).unwrap();
            let printed = parsed.to_string();
            let reparsed = parse_statement(&printed)
                .unwrap_or_else(|err| panic!("{printed:?} failed to reparse: {err}"));
            assert_eq!(parsed, reparsed, "{src:?} printed as {printed:?}");
        }
    }
}

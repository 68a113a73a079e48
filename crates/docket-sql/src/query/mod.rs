//! Parsed statements and their execution.
//!
//! A parsed statement either manipulates the catalog directly (DDL) or
//! compiles to a [`Stream`] that the planner rewrites and the executor
//! drives. Transaction control statements are surfaced to the session
//! layer, which owns transaction lifecycles.

use std::fmt;

use tracing::debug;

use docket_core::{
    catalog::{FieldConstraint, IndexInfo, TableInfo},
    CoreError, Document, Path, Transaction, Value,
};

use crate::error::{SqlError, SqlResult};
use crate::expr::{eval, kind_keyword, AggregateFunc, Environment, Expr, NamedExpr, Param};
use crate::planner;
use crate::stream::{Stream, StreamOperator};

/// A parsed SQL statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// `BEGIN [TRANSACTION] [READ ONLY | READ WRITE]`.
    Begin {
        /// False for READ ONLY sessions.
        writable: bool,
    },
    /// `COMMIT [TRANSACTION]`.
    Commit,
    /// `ROLLBACK [TRANSACTION]`.
    Rollback,
    /// `CREATE TABLE`.
    CreateTable(CreateTableStmt),
    /// `CREATE [UNIQUE] INDEX`.
    CreateIndex(CreateIndexStmt),
    /// `DROP TABLE`.
    DropTable(DropTableStmt),
    /// `DROP INDEX`.
    DropIndex(DropIndexStmt),
    /// `ALTER TABLE ... RENAME TO ...`.
    AlterRename {
        /// Current table name.
        table: String,
        /// New table name.
        new_name: String,
    },
    /// `ALTER TABLE ... ADD FIELD ...`.
    AlterAddField {
        /// Target table.
        table: String,
        /// The added constraint.
        constraint: FieldConstraint,
    },
    /// `INSERT INTO`.
    Insert(InsertStmt),
    /// `SELECT`.
    Select(SelectStmt),
    /// `UPDATE`.
    Update(UpdateStmt),
    /// `DELETE FROM`.
    Delete(DeleteStmt),
    /// `REINDEX [name]`.
    ReIndex(Option<String>),
    /// `EXPLAIN <statement>`.
    Explain(Box<Statement>),
}

/// A parsed SELECT.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectStmt {
    /// Projected result fields.
    pub projections: Vec<NamedExpr>,
    /// Source table, if any.
    pub from: Option<String>,
    /// WHERE predicate.
    pub filter: Option<Expr>,
    /// GROUP BY expression.
    pub group_by: Option<Expr>,
    /// ORDER BY path and descending flag.
    pub order_by: Option<(Path, bool)>,
    /// LIMIT expression.
    pub limit: Option<Expr>,
    /// OFFSET expression.
    pub offset: Option<Expr>,
}

/// A parsed INSERT.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertStmt {
    /// Target table.
    pub table: String,
    /// Document expressions for the VALUES form.
    pub values: Vec<Expr>,
    /// Source query for the INSERT ... SELECT form.
    pub select: Option<SelectStmt>,
}

/// A parsed UPDATE.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStmt {
    /// Target table.
    pub table: String,
    /// SET or UNSET actions.
    pub actions: UpdateAction,
    /// WHERE predicate.
    pub filter: Option<Expr>,
}

/// The mutation side of an UPDATE.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateAction {
    /// `SET path = expr, ...`.
    Set(Vec<(Path, Expr)>),
    /// `UNSET field, ...`.
    Unset(Vec<String>),
}

/// A parsed DELETE.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStmt {
    /// Target table.
    pub table: String,
    /// WHERE predicate.
    pub filter: Option<Expr>,
}

/// A parsed CREATE TABLE.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateTableStmt {
    /// Table metadata, constraints included.
    pub info: TableInfo,
    /// Suppress the already-exists error.
    pub if_not_exists: bool,
}

/// A parsed CREATE INDEX.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateIndexStmt {
    /// Index metadata.
    pub info: IndexInfo,
    /// Suppress the already-exists error.
    pub if_not_exists: bool,
}

/// A parsed DROP TABLE.
#[derive(Debug, Clone, PartialEq)]
pub struct DropTableStmt {
    /// Dropped table.
    pub name: String,
    /// Suppress the not-found error.
    pub if_exists: bool,
}

/// A parsed DROP INDEX.
#[derive(Debug, Clone, PartialEq)]
pub struct DropIndexStmt {
    /// Dropped index.
    pub name: String,
    /// Suppress the not-found error.
    pub if_exists: bool,
}

impl Statement {
    /// Reports whether the statement only reads the database.
    pub fn is_read_only(&self) -> bool {
        match self {
            Statement::Select(_) => true,
            Statement::Explain(_) => true,
            _ => false,
        }
    }

    /// Reports whether this is BEGIN, COMMIT or ROLLBACK.
    pub fn is_transaction_control(&self) -> bool {
        matches!(
            self,
            Statement::Begin { .. } | Statement::Commit | Statement::Rollback
        )
    }
}

// =============================================================================
// Stream construction
// =============================================================================

/// Compiles a SELECT into an unoptimized stream.
pub fn select_stream(
    stmt: &SelectStmt,
    tx: &Transaction,
    params: &[Param],
) -> SqlResult<Stream> {
    let mut stream = match &stmt.from {
        Some(table) => Stream::new(StreamOperator::SeqScan {
            table: table.clone(),
            reverse: false,
        }),
        None => Stream::new(StreamOperator::Docs(vec![Document::new()])),
    };

    if let Some(filter) = &stmt.filter {
        stream = stream.pipe(StreamOperator::Filter(filter.clone()));
    }

    let mut aggregates = Vec::new();
    for ne in &stmt.projections {
        collect_aggregates(&ne.expr, &mut aggregates);
    }
    if stmt.group_by.is_some() || !aggregates.is_empty() {
        if let Some(group) = &stmt.group_by {
            stream = stream.pipe(StreamOperator::GroupBy(group.clone()));
        }
        stream = stream.pipe(StreamOperator::HashAggregate(aggregates));
    }

    stream = stream.pipe(StreamOperator::Project(stmt.projections.clone()));

    if let Some((path, desc)) = &stmt.order_by {
        stream = stream.pipe(StreamOperator::Sort {
            expr: Expr::Path(path.clone()),
            desc: *desc,
        });
    }
    if let Some(offset) = &stmt.offset {
        stream = stream.pipe(StreamOperator::Skip(eval_integer(offset, tx, params, "OFFSET")?));
    }
    if let Some(limit) = &stmt.limit {
        stream = stream.pipe(StreamOperator::Take(eval_integer(limit, tx, params, "LIMIT")?));
    }
    Ok(stream)
}

fn collect_aggregates(expr: &Expr, out: &mut Vec<AggregateFunc>) {
    match expr {
        Expr::Aggregate(func) => {
            if !out.contains(func) {
                out.push(func.clone());
            }
        }
        Expr::Parens(e) | Expr::Cast { expr: e, .. } | Expr::Not(e) | Expr::Neg(e) => {
            collect_aggregates(e, out)
        }
        Expr::Binary { left, right, .. } => {
            collect_aggregates(left, out);
            collect_aggregates(right, out);
        }
        Expr::Between { expr, low, high } => {
            collect_aggregates(expr, out);
            collect_aggregates(low, out);
            collect_aggregates(high, out);
        }
        Expr::List(items) => {
            for e in items {
                collect_aggregates(e, out);
            }
        }
        Expr::DocumentLiteral(pairs) => {
            for (_, e) in pairs {
                collect_aggregates(e, out);
            }
        }
        _ => {}
    }
}

fn eval_integer(
    expr: &Expr,
    tx: &Transaction,
    params: &[Param],
    clause: &str,
) -> SqlResult<i64> {
    let env = Environment::new(tx, params);
    match eval(expr, &env)? {
        Value::Integer(i) if i >= 0 => Ok(i),
        other => Err(SqlError::Query(format!(
            "{clause} must be a non-negative integer, got {other}"
        ))),
    }
}

/// Compiles an INSERT into an unoptimized stream.
pub fn insert_stream(
    stmt: &InsertStmt,
    tx: &Transaction,
    params: &[Param],
) -> SqlResult<Stream> {
    let stream = match &stmt.select {
        Some(select) => select_stream(select, tx, params)?,
        None => Stream::new(StreamOperator::Expressions(stmt.values.clone())),
    };
    Ok(stream.pipe(StreamOperator::TableInsert {
        table: stmt.table.clone(),
    }))
}

/// Compiles an UPDATE into an unoptimized stream.
pub fn update_stream(stmt: &UpdateStmt) -> Stream {
    let mut stream = Stream::new(StreamOperator::SeqScan {
        table: stmt.table.clone(),
        reverse: false,
    });
    if let Some(filter) = &stmt.filter {
        stream = stream.pipe(StreamOperator::Filter(filter.clone()));
    }
    match &stmt.actions {
        UpdateAction::Set(pairs) => {
            for (path, expr) in pairs {
                stream = stream.pipe(StreamOperator::Set {
                    path: path.clone(),
                    expr: expr.clone(),
                });
            }
        }
        UpdateAction::Unset(fields) => {
            for field in fields {
                stream = stream.pipe(StreamOperator::Unset(field.clone()));
            }
        }
    }
    stream.pipe(StreamOperator::TableReplace {
        table: stmt.table.clone(),
    })
}

/// Compiles a DELETE into an unoptimized stream.
pub fn delete_stream(stmt: &DeleteStmt) -> Stream {
    let mut stream = Stream::new(StreamOperator::SeqScan {
        table: stmt.table.clone(),
        reverse: false,
    });
    if let Some(filter) = &stmt.filter {
        stream = stream.pipe(StreamOperator::Filter(filter.clone()));
    }
    stream.pipe(StreamOperator::TableDelete {
        table: stmt.table.clone(),
    })
}

// =============================================================================
// Execution
// =============================================================================

/// Executes one statement inside a transaction, passing every produced
/// document to `out`.
///
/// Transaction control statements are rejected here; they are handled by
/// the session that owns the transaction.
pub fn execute_statement(
    tx: &mut Transaction,
    stmt: &Statement,
    params: &[Param],
    out: &mut dyn FnMut(&Document) -> SqlResult<()>,
) -> SqlResult<()> {
    match stmt {
        Statement::Begin { .. } | Statement::Commit | Statement::Rollback => {
            Err(SqlError::Query(
                "transaction control statements are managed by the session".to_string(),
            ))
        }

        Statement::CreateTable(s) => {
            if let Err(err) = tx.create_table(s.info.clone()) {
                if s.if_not_exists && matches!(err, CoreError::TableAlreadyExists(_)) {
                    return Ok(());
                }
                return Err(err.into());
            }
            // A UNIQUE field constraint materializes as a unique index.
            let mut counter = 0;
            for fc in &s.info.field_constraints {
                if fc.unique {
                    counter += 1;
                    let name = format!("__docket_autoindex_{}_{}", s.info.name, counter);
                    let info = IndexInfo::new(name, &s.info.name, vec![fc.path.clone()])
                        .with_unique(true)
                        .with_kinds(vec![fc.kind]);
                    tx.create_index(info)?;
                }
            }
            Ok(())
        }

        Statement::CreateIndex(s) => {
            if let Err(err) = tx.create_index(s.info.clone()) {
                if s.if_not_exists && matches!(err, CoreError::IndexAlreadyExists(_)) {
                    return Ok(());
                }
                return Err(err.into());
            }
            Ok(())
        }

        Statement::DropTable(s) => {
            if let Err(err) = tx.drop_table(&s.name) {
                if s.if_exists && matches!(err, CoreError::TableNotFound(_)) {
                    return Ok(());
                }
                return Err(err.into());
            }
            Ok(())
        }

        Statement::DropIndex(s) => {
            if let Err(err) = tx.drop_index(&s.name) {
                if s.if_exists && matches!(err, CoreError::IndexNotFound(_)) {
                    return Ok(());
                }
                return Err(err.into());
            }
            Ok(())
        }

        Statement::AlterRename { table, new_name } => {
            tx.rename_table(table, new_name)?;
            Ok(())
        }

        Statement::AlterAddField { table, constraint } => {
            tx.add_field_constraint(table, constraint.clone())?;
            Ok(())
        }

        Statement::ReIndex(None) => {
            tx.reindex_all()?;
            Ok(())
        }
        Statement::ReIndex(Some(name)) => {
            if tx.catalog().table_exists(name) {
                for index in tx.catalog().indexes_for_table(name) {
                    tx.reindex(&index.name)?;
                }
            } else {
                tx.reindex(name)?;
            }
            Ok(())
        }

        Statement::Select(s) => {
            let stream = select_stream(s, tx, params)?;
            run_stream(tx, stream, params, out)
        }
        Statement::Insert(s) => {
            let stream = insert_stream(s, tx, params)?;
            run_stream(tx, stream, params, out)
        }
        Statement::Update(s) => run_stream(tx, update_stream(s), params, out),
        Statement::Delete(s) => run_stream(tx, delete_stream(s), params, out),

        Statement::Explain(inner) => {
            let stream = match inner.as_ref() {
                Statement::Select(s) => select_stream(s, tx, params)?,
                Statement::Insert(s) => insert_stream(s, tx, params)?,
                Statement::Update(s) => update_stream(s),
                Statement::Delete(s) => delete_stream(s),
                _ => {
                    return Err(SqlError::Query(
                        "EXPLAIN only works on SELECT, INSERT, UPDATE and DELETE".to_string(),
                    ))
                }
            };
            let plan = match planner::optimize(stream, tx, params)? {
                Some(optimized) => optimized.to_string(),
                None => "no exec".to_string(),
            };
            let mut doc = Document::new();
            doc.set("plan", Value::text(plan));
            out(&doc)
        }
    }
}

fn run_stream(
    tx: &Transaction,
    stream: Stream,
    params: &[Param],
    out: &mut dyn FnMut(&Document) -> SqlResult<()>,
) -> SqlResult<()> {
    let Some(stream) = planner::optimize(stream, tx, params)? else {
        return Ok(());
    };
    debug!(plan = %stream, "running stream");
    let mut env = Environment::new(tx, params);
    stream.iterate(&mut env, &mut |env| match &env.doc {
        Some(doc) => out(doc),
        None => Ok(()),
    })
}

// =============================================================================
// Display
// =============================================================================

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Begin { writable } => {
                if *writable {
                    write!(f, "BEGIN")
                } else {
                    write!(f, "BEGIN READ ONLY")
                }
            }
            Statement::Commit => write!(f, "COMMIT"),
            Statement::Rollback => write!(f, "ROLLBACK"),
            Statement::CreateTable(s) => {
                write!(f, "CREATE TABLE ")?;
                if s.if_not_exists {
                    write!(f, "IF NOT EXISTS ")?;
                }
                write!(f, "{}", s.info.name)?;
                if !s.info.field_constraints.is_empty() {
                    write!(f, " (")?;
                    for (i, fc) in s.info.field_constraints.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", DisplayConstraint(fc))?;
                    }
                    write!(f, ")")?;
                }
                Ok(())
            }
            Statement::CreateIndex(s) => {
                write!(f, "CREATE ")?;
                if s.info.unique {
                    write!(f, "UNIQUE ")?;
                }
                write!(f, "INDEX ")?;
                if s.if_not_exists {
                    write!(f, "IF NOT EXISTS ")?;
                }
                write!(f, "{} ON {} (", s.info.name, s.info.table_name)?;
                for (i, path) in s.info.paths.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{path}")?;
                }
                write!(f, ")")
            }
            Statement::DropTable(s) => {
                write!(f, "DROP TABLE ")?;
                if s.if_exists {
                    write!(f, "IF EXISTS ")?;
                }
                write!(f, "{}", s.name)
            }
            Statement::DropIndex(s) => {
                write!(f, "DROP INDEX ")?;
                if s.if_exists {
                    write!(f, "IF EXISTS ")?;
                }
                write!(f, "{}", s.name)
            }
            Statement::AlterRename { table, new_name } => {
                write!(f, "ALTER TABLE {table} RENAME TO {new_name}")
            }
            Statement::AlterAddField { table, constraint } => {
                write!(f, "ALTER TABLE {table} ADD FIELD {}", DisplayConstraint(constraint))
            }
            Statement::Insert(s) => {
                write!(f, "INSERT INTO {}", s.table)?;
                match &s.select {
                    Some(select) => write!(f, " {}", DisplaySelect(select)),
                    None => {
                        write!(f, " VALUES ")?;
                        for (i, value) in s.values.iter().enumerate() {
                            if i > 0 {
                                write!(f, ", ")?;
                            }
                            write!(f, "{value}")?;
                        }
                        Ok(())
                    }
                }
            }
            Statement::Select(s) => write!(f, "{}", DisplaySelect(s)),
            Statement::Update(s) => {
                write!(f, "UPDATE {} ", s.table)?;
                match &s.actions {
                    UpdateAction::Set(pairs) => {
                        write!(f, "SET ")?;
                        for (i, (path, expr)) in pairs.iter().enumerate() {
                            if i > 0 {
                                write!(f, ", ")?;
                            }
                            write!(f, "{path} = {expr}")?;
                        }
                    }
                    UpdateAction::Unset(fields) => {
                        write!(f, "UNSET {}", fields.join(", "))?;
                    }
                }
                if let Some(filter) = &s.filter {
                    write!(f, " WHERE {filter}")?;
                }
                Ok(())
            }
            Statement::Delete(s) => {
                write!(f, "DELETE FROM {}", s.table)?;
                if let Some(filter) = &s.filter {
                    write!(f, " WHERE {filter}")?;
                }
                Ok(())
            }
            Statement::ReIndex(None) => write!(f, "REINDEX"),
            Statement::ReIndex(Some(name)) => write!(f, "REINDEX {name}"),
            Statement::Explain(inner) => write!(f, "EXPLAIN {inner}"),
        }
    }
}

struct DisplaySelect<'a>(&'a SelectStmt);

impl fmt::Display for DisplaySelect<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0;
        write!(f, "SELECT ")?;
        for (i, ne) in s.projections.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{ne}")?;
        }
        if let Some(from) = &s.from {
            write!(f, " FROM {from}")?;
        }
        if let Some(filter) = &s.filter {
            write!(f, " WHERE {filter}")?;
        }
        if let Some(group) = &s.group_by {
            write!(f, " GROUP BY {group}")?;
        }
        if let Some((path, desc)) = &s.order_by {
            write!(f, " ORDER BY {path}")?;
            if *desc {
                write!(f, " DESC")?;
            }
        }
        if let Some(limit) = &s.limit {
            write!(f, " LIMIT {limit}")?;
        }
        if let Some(offset) = &s.offset {
            write!(f, " OFFSET {offset}")?;
        }
        Ok(())
    }
}

struct DisplayConstraint<'a>(&'a FieldConstraint);

impl fmt::Display for DisplayConstraint<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fc = self.0;
        write!(f, "{}", fc.path)?;
        if let Some(kind) = fc.kind {
            write!(f, " {}", kind_keyword(kind))?;
        }
        if fc.primary_key {
            write!(f, " PRIMARY KEY")?;
        }
        if fc.not_null {
            write!(f, " NOT NULL")?;
        }
        if fc.unique {
            write!(f, " UNIQUE")?;
        }
        if let Some(default) = &fc.default_value {
            write!(f, " DEFAULT {default}")?;
        }
        Ok(())
    }
}

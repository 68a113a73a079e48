//! Database facade: statement dispatch and session transactions.
//!
//! Statements auto-open a transaction of the matching kind, run to
//! completion and commit on success (roll back on error). An explicit
//! BEGIN switches the session to manual mode: every following statement
//! runs in the session transaction without auto-commit, until COMMIT or
//! ROLLBACK closes it.

use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use docket_core::{Document, Transaction};
use docket_engine::{Cancellation, Engine, MemoryEngine};
use docket_sql::{execute_statement, parser, Param, SqlError, Statement};

use crate::error::{Error, Result};

/// A collection of tables stored in a pluggable storage engine.
pub struct Database {
    inner: docket_core::Database,
    session: Mutex<Option<Transaction>>,
}

impl Database {
    /// Opens a database over the given storage engine.
    pub fn new(engine: Box<dyn Engine>) -> Result<Self> {
        Ok(Self {
            inner: docket_core::Database::new(engine)?,
            session: Mutex::new(None),
        })
    }

    /// Opens a database over a fresh in-memory engine.
    pub fn memory() -> Result<Self> {
        Self::new(Box::new(MemoryEngine::new()))
    }

    /// Runs every statement in `sql`, discarding any produced documents.
    pub fn exec(&self, sql: &str, params: &[Param]) -> Result<()> {
        self.exec_with_cancel(sql, params, Cancellation::new())
    }

    /// Runs every statement in `sql` under a cancellation token. A fired
    /// token fails the in-flight statement with a cancellation error and
    /// rolls its transaction back.
    pub fn exec_with_cancel(
        &self,
        sql: &str,
        params: &[Param],
        cancel: Cancellation,
    ) -> Result<()> {
        let statements = parser::parse(sql).map_err(SqlError::from)?;
        for stmt in &statements {
            self.run_statement(stmt, params, &cancel, &mut |_| Ok(()))?;
        }
        Ok(())
    }

    /// Runs a single result-producing statement and returns its lazy
    /// result. The result must be closed (or collected) to release the
    /// transaction it may hold.
    pub fn query(&self, sql: &str, params: &[Param]) -> Result<QueryResult<'_>> {
        let stmt = parser::parse_statement(sql).map_err(SqlError::from)?;
        if stmt.is_transaction_control() {
            return Err(Error::Query(
                "transaction control statements cannot be queried; use exec".to_string(),
            ));
        }

        let session = self.session.lock();
        let tx = if session.is_some() {
            ResultTx::Session(session)
        } else {
            drop(session);
            let writable = !stmt.is_read_only();
            ResultTx::Auto(Some(self.inner.begin(writable)?))
        };
        Ok(QueryResult {
            tx,
            writable: !stmt.is_read_only(),
            stmt,
            params: params.to_vec(),
            failed: false,
        })
    }

    /// Convenience wrapper running a query and collecting every document.
    pub fn query_documents(&self, sql: &str, params: &[Param]) -> Result<Vec<Document>> {
        self.query(sql, params)?.collect()
    }

    fn run_statement(
        &self,
        stmt: &Statement,
        params: &[Param],
        cancel: &Cancellation,
        out: &mut dyn FnMut(&Document) -> docket_sql::SqlResult<()>,
    ) -> Result<()> {
        match stmt {
            Statement::Begin { writable } => {
                let mut session = self.session.lock();
                if session.is_some() {
                    return Err(Error::AlreadyInTransaction);
                }
                debug!(writable, "opening session transaction");
                *session = Some(self.inner.begin_with(*writable, cancel.clone())?);
                Ok(())
            }
            Statement::Commit => {
                let tx = self
                    .session
                    .lock()
                    .take()
                    .ok_or(Error::NoActiveTransaction)?;
                tx.commit()?;
                Ok(())
            }
            Statement::Rollback => {
                let tx = self
                    .session
                    .lock()
                    .take()
                    .ok_or(Error::NoActiveTransaction)?;
                tx.rollback()?;
                Ok(())
            }
            _ => {
                let mut session = self.session.lock();
                match session.as_mut() {
                    // Inside an explicit transaction nothing auto-commits;
                    // the statement's outcome is the caller's to settle.
                    Some(tx) => {
                        execute_statement(tx, stmt, params, out)?;
                        Ok(())
                    }
                    None => {
                        drop(session);
                        let writable = !stmt.is_read_only();
                        let mut tx = self.inner.begin_with(writable, cancel.clone())?;
                        match execute_statement(&mut tx, stmt, params, out) {
                            Ok(()) => {
                                if writable {
                                    tx.commit()?;
                                } else {
                                    tx.rollback()?;
                                }
                                Ok(())
                            }
                            Err(err) => {
                                let _ = tx.rollback();
                                Err(err.into())
                            }
                        }
                    }
                }
            }
        }
    }
}

enum ResultTx<'a> {
    /// A transaction opened for this result, settled at close.
    Auto(Option<Transaction>),
    /// The session transaction; left open at close.
    Session(MutexGuard<'a, Option<Transaction>>),
}

/// A lazy sequence of documents produced by one statement.
///
/// Iteration drives the statement's stream; nothing runs until
/// [`iterate`](QueryResult::iterate) or [`collect`](QueryResult::collect)
/// is called. Closing releases the auto-opened transaction: a write
/// statement commits, a read-only one rolls back. Dropping the result
/// without closing settles it the same way, swallowing errors.
pub struct QueryResult<'a> {
    tx: ResultTx<'a>,
    stmt: Statement,
    params: Vec<Param>,
    writable: bool,
    failed: bool,
}

impl QueryResult<'_> {
    /// Runs the statement, invoking `f` for every produced document.
    /// Returning an error from `f` stops iteration cleanly.
    pub fn iterate(&mut self, mut f: impl FnMut(&Document) -> Result<()>) -> Result<()> {
        let tx = match &mut self.tx {
            ResultTx::Auto(tx) => tx.as_mut(),
            ResultTx::Session(guard) => guard.as_mut(),
        }
        .ok_or(Error::NoActiveTransaction)?;

        let mut user_err: Option<Error> = None;
        let result = execute_statement(tx, &self.stmt, &self.params, &mut |doc| {
            match f(doc) {
                Ok(()) => Ok(()),
                Err(err) => {
                    user_err = Some(err);
                    // The driver treats the sentinel as a clean stop.
                    Err(SqlError::StreamClosed)
                }
            }
        });
        if let Some(err) = user_err {
            self.failed = true;
            return Err(err);
        }
        if let Err(err) = result {
            self.failed = true;
            return Err(err.into());
        }
        Ok(())
    }

    /// Runs the statement, collects every document and closes the
    /// result.
    pub fn collect(mut self) -> Result<Vec<Document>> {
        let mut docs = Vec::new();
        self.iterate(|doc| {
            docs.push(doc.clone());
            Ok(())
        })?;
        self.close()?;
        Ok(docs)
    }

    /// Settles the underlying transaction if this result owns one.
    pub fn close(mut self) -> Result<()> {
        self.finish()
    }

    fn finish(&mut self) -> Result<()> {
        if let ResultTx::Auto(slot) = &mut self.tx {
            if let Some(tx) = slot.take() {
                if self.writable && !self.failed {
                    tx.commit()?;
                } else {
                    tx.rollback()?;
                }
            }
        }
        Ok(())
    }
}

impl Drop for QueryResult<'_> {
    fn drop(&mut self) {
        let _ = self.finish();
    }
}

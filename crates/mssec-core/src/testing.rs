//! In-memory connection for unit tests
//!
//! `MockConnection` records every statement, answers queries from scripted
//! rows matched by SQL substring, and can inject failures into executes,
//! pings and rollbacks, or leave an execute or a rollback unanswered.
//! Statements executed inside a transaction only reach
//! [`MockConnection::applied`] once the transaction commits, which makes
//! atomicity observable.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::{
    Connection, MssecError, QueryResult, Result, Row, Statement, StatementResult, Transaction,
    Value,
};

/// Transaction lifecycle events, in the order they happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxEvent {
    Begin,
    Commit,
    Rollback,
}

struct ScriptedQuery {
    needle: String,
    rows: Vec<Row>,
    remaining: Option<usize>,
}

#[derive(Default)]
struct MockState {
    statements: Vec<Statement>,
    applied: Vec<Statement>,
    queries: Vec<Statement>,
    scripted: Vec<ScriptedQuery>,
    failing_needles: Vec<(String, String)>,
    fail_execute_at: Option<(usize, String)>,
    execute_count: usize,
    failing_pings: u32,
    ping_count: u32,
    fail_rollback: bool,
    stall_execute_at: Option<usize>,
    stall_rollback: bool,
    events: Vec<TxEvent>,
    closed: bool,
}

/// Scriptable in-memory [`Connection`]
#[derive(Clone, Default)]
pub struct MockConnection {
    state: Arc<Mutex<MockState>>,
}

impl MockConnection {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Answer every query whose SQL contains `needle` with `rows`
    pub fn on_query(&self, needle: &str, rows: Vec<Row>) -> &Self {
        self.lock().scripted.push(ScriptedQuery {
            needle: needle.to_string(),
            rows,
            remaining: None,
        });
        self
    }

    /// Answer the next query containing `needle` with `rows`, once
    pub fn on_query_once(&self, needle: &str, rows: Vec<Row>) -> &Self {
        self.lock().scripted.push(ScriptedQuery {
            needle: needle.to_string(),
            rows,
            remaining: Some(1),
        });
        self
    }

    /// Fail every execute whose SQL contains `needle`
    pub fn fail_execute_containing(&self, needle: &str, message: &str) -> &Self {
        self.lock()
            .failing_needles
            .push((needle.to_string(), message.to_string()));
        self
    }

    /// Fail the `n`-th execute call (1-based), counting from now
    pub fn fail_nth_execute(&self, n: usize, message: &str) -> &Self {
        let mut state = self.lock();
        let at = state.execute_count + n;
        state.fail_execute_at = Some((at, message.to_string()));
        drop(state);
        self
    }

    /// Make the next `n` pings fail with a connection error
    pub fn fail_pings(&self, n: u32) -> &Self {
        self.lock().failing_pings = n;
        self
    }

    pub fn fail_rollback(&self) -> &Self {
        self.lock().fail_rollback = true;
        self
    }

    /// Leave the `n`-th execute call (1-based, counting from now) unanswered
    pub fn stall_nth_execute(&self, n: usize) -> &Self {
        let mut state = self.lock();
        let at = state.execute_count + n;
        state.stall_execute_at = Some(at);
        drop(state);
        self
    }

    /// Leave every rollback unanswered
    pub fn stall_rollback(&self) -> &Self {
        self.lock().stall_rollback = true;
        self
    }

    fn stalls_current_execute(&self) -> bool {
        let state = self.lock();
        state.stall_execute_at == Some(state.execute_count)
    }

    /// Every execute attempt, in order, including failed ones
    pub fn statements(&self) -> Vec<Statement> {
        self.lock().statements.clone()
    }

    /// Statements whose effects persisted (committed or auto-committed)
    pub fn applied(&self) -> Vec<Statement> {
        self.lock().applied.clone()
    }

    /// Every query, in order
    pub fn queries(&self) -> Vec<Statement> {
        self.lock().queries.clone()
    }

    pub fn events(&self) -> Vec<TxEvent> {
        self.lock().events.clone()
    }

    pub fn ping_count(&self) -> u32 {
        self.lock().ping_count
    }

    fn run_query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let mut state = self.lock();
        if state.closed {
            return Err(MssecError::Connection("connection is closed".into()));
        }
        state.queries.push(Statement {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        let hit = state
            .scripted
            .iter_mut()
            .find(|s| sql.contains(&s.needle) && s.remaining != Some(0));
        let rows = match hit {
            Some(scripted) => {
                if let Some(remaining) = scripted.remaining.as_mut() {
                    *remaining -= 1;
                }
                scripted.rows.clone()
            }
            None => Vec::new(),
        };
        Ok(QueryResult::from_rows(rows))
    }

    /// Record an execute; returns the statement if it succeeded
    fn run_execute(&self, sql: &str, params: &[Value]) -> Result<Statement> {
        let mut state = self.lock();
        if state.closed {
            return Err(MssecError::Connection("connection is closed".into()));
        }
        let statement = Statement {
            sql: sql.to_string(),
            params: params.to_vec(),
        };
        state.statements.push(statement.clone());
        state.execute_count += 1;

        if let Some((at, message)) = state.fail_execute_at.clone() {
            if at == state.execute_count {
                return Err(MssecError::Driver(message));
            }
        }
        if let Some((_, message)) = state
            .failing_needles
            .iter()
            .find(|(needle, _)| sql.contains(needle.as_str()))
        {
            return Err(MssecError::Driver(message.clone()));
        }
        Ok(statement)
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn driver_name(&self) -> &str {
        "mock"
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        let statement = self.run_execute(sql, params)?;
        if self.stalls_current_execute() {
            std::future::pending::<()>().await;
        }
        self.lock().applied.push(statement);
        Ok(StatementResult { affected_rows: 0 })
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.run_query(sql, params)
    }

    async fn ping(&self) -> Result<()> {
        let mut state = self.lock();
        state.ping_count += 1;
        if state.failing_pings > 0 {
            state.failing_pings -= 1;
            return Err(MssecError::Connection("ping failed".into()));
        }
        if state.closed {
            return Err(MssecError::Connection("connection is closed".into()));
        }
        Ok(())
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
        self.lock().events.push(TxEvent::Begin);
        Ok(Box::new(MockTransaction {
            conn: self.clone(),
            pending: Mutex::new(Vec::new()),
        }))
    }

    async fn close(&self) -> Result<()> {
        self.lock().closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

struct MockTransaction {
    conn: MockConnection,
    pending: Mutex<Vec<Statement>>,
}

impl MockTransaction {
    fn take_pending(&self) -> Vec<Statement> {
        std::mem::take(
            &mut *self
                .pending
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }
}

#[async_trait]
impl Transaction for MockTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        let pending = self.take_pending();
        let mut state = self.conn.lock();
        state.applied.extend(pending);
        state.events.push(TxEvent::Commit);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.take_pending();
        let (fail, stall) = {
            let mut state = self.conn.lock();
            state.events.push(TxEvent::Rollback);
            (state.fail_rollback, state.stall_rollback)
        };
        if stall {
            std::future::pending::<()>().await;
        }
        if fail {
            return Err(MssecError::Driver("rollback failed".into()));
        }
        Ok(())
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.conn.run_query(sql, params)
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        let statement = self.conn.run_execute(sql, params)?;
        if self.conn.stalls_current_execute() {
            std::future::pending::<()>().await;
        }
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(statement);
        Ok(StatementResult { affected_rows: 0 })
    }
}

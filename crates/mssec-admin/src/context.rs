//! Shared state for principal and permission operations

use mssec_connection::ConnectionGuard;
use mssec_core::{
    CancellationToken, Connection, MssecError, QueryResult, Result, ServerInfo, Session,
    Statement, TxOp, cancellable, run_in_transaction,
};

use crate::database_role::DatabaseRoleService;
use crate::login::LoginService;
use crate::permission::PermissionService;
use crate::server_role::ServerRoleService;
use crate::user::UserService;

/// A connected session plus the guard run before each operation.
///
/// The services returned by [`logins`](Self::logins),
/// [`users`](Self::users) and friends borrow the context; they are cheap to
/// create and hold no state of their own.
#[derive(Debug, Clone)]
pub struct AdminContext {
    session: Session,
    guard: ConnectionGuard,
}

impl AdminContext {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            guard: ConnectionGuard::default(),
        }
    }

    pub fn with_guard(mut self, guard: ConnectionGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn server(&self) -> &ServerInfo {
        self.session.server()
    }

    pub fn logins(&self) -> LoginService<'_> {
        LoginService::new(self)
    }

    pub fn server_roles(&self) -> ServerRoleService<'_> {
        ServerRoleService::new(self)
    }

    pub fn users(&self) -> UserService<'_> {
        UserService::new(self)
    }

    pub fn database_roles(&self) -> DatabaseRoleService<'_> {
        DatabaseRoleService::new(self)
    }

    pub fn permissions(&self) -> PermissionService<'_> {
        PermissionService::new(self)
    }

    pub(crate) fn connection(&self) -> &dyn Connection {
        self.session.connection()
    }

    /// Make sure the connection answers before the first round trip
    pub(crate) async fn ready(&self, cancel: &CancellationToken) -> Result<()> {
        self.guard.ensure_live(self.connection(), cancel).await
    }

    /// Server-scoped principals can only be changed from `master`
    pub(crate) fn require_master(&self, what: &str) -> Result<()> {
        if self.server().is_master() {
            return Ok(());
        }
        Err(MssecError::topology(format!(
            "{} requires the master database, connected to '{}'",
            what,
            self.server().database
        )))
    }

    pub(crate) fn forbid_azure(&self, what: &str) -> Result<()> {
        if self.server().is_azure {
            return Err(MssecError::topology(format!(
                "{} is not supported on Azure SQL Database",
                what
            )));
        }
        Ok(())
    }

    pub(crate) async fn execute(
        &self,
        statement: &Statement,
        cancel: &CancellationToken,
    ) -> Result<()> {
        tracing::debug!(sql = %statement.sql, params = statement.params.len(), "executing");
        cancellable(cancel, statement.execute(self.connection())).await?;
        Ok(())
    }

    pub(crate) async fn query(
        &self,
        statement: &Statement,
        cancel: &CancellationToken,
    ) -> Result<QueryResult> {
        let result = cancellable(cancel, statement.query(self.connection())).await?;
        tracing::debug!(row_count = result.row_count(), "query returned");
        Ok(result)
    }

    pub(crate) async fn execute_atomic(
        &self,
        statements: Vec<Statement>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let ops: Vec<TxOp> = statements
            .into_iter()
            .map(mssec_core::statement_op)
            .collect();
        run_in_transaction(self.connection(), cancel, ops).await
    }
}

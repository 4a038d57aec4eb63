//! Pooled SQL Server connection using tiberius and bb8

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bb8::{Pool, PooledConnection, RunError};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use tiberius::{AuthMethod, Client, ColumnData, Config, FromSql, Row as TiberiusRow, ToSql};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use mssec_core::{
    Connection, MssecError, QueryResult, Result, Row, StatementResult, Transaction, Value,
};

use crate::Authentication;
use crate::token::{SQL_TOKEN_RESOURCE, TokenProvider};

/// SQL Server connection errors
#[derive(Debug, thiserror::Error)]
pub enum MssqlConnectionError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Type conversion error: {0}")]
    TypeConversion(String),

    #[error("Connection is closed")]
    ConnectionClosed,

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Tiberius error: {0}")]
    Tiberius(#[from] tiberius::error::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MssqlConnectionError {
    /// Whether the underlying socket can no longer be trusted
    fn is_transport(&self) -> bool {
        match self {
            MssqlConnectionError::Tiberius(err) => is_transport_error(err),
            MssqlConnectionError::Io(_)
            | MssqlConnectionError::ConnectionFailed(_)
            | MssqlConnectionError::ConnectionClosed => true,
            _ => false,
        }
    }
}

fn is_transport_error(err: &tiberius::error::Error) -> bool {
    use tiberius::error::Error as TdsError;
    matches!(
        err,
        TdsError::Io { .. } | TdsError::Tls(_) | TdsError::Routing { .. } | TdsError::Protocol(_)
    )
}

impl From<MssqlConnectionError> for MssecError {
    fn from(err: MssqlConnectionError) -> Self {
        match err {
            MssqlConnectionError::Timeout(msg) => MssecError::Timeout(msg),
            MssqlConnectionError::Tiberius(tiberius::error::Error::Server(token)) => {
                MssecError::Driver(format!("{} (error {})", token.message(), token.code()))
            }
            other if other.is_transport() => MssecError::Connection(other.to_string()),
            MssqlConnectionError::AuthenticationFailed(msg) => MssecError::Connection(msg),
            other => MssecError::Driver(other.to_string()),
        }
    }
}

impl From<RunError<MssqlConnectionError>> for MssqlConnectionError {
    fn from(err: RunError<MssqlConnectionError>) -> Self {
        match err {
            RunError::User(err) => err,
            RunError::TimedOut => {
                MssqlConnectionError::Timeout("waiting for a pooled connection".into())
            }
        }
    }
}

/// A tiberius client plus the bookkeeping the pool needs to decide whether
/// it can be handed out again.
pub struct PooledClient {
    client: Client<Compat<TcpStream>>,
    /// Set while a request is on the wire. Still set after a request future
    /// was dropped part way, which leaves the TDS stream unusable.
    in_flight: bool,
    broken: bool,
}

impl PooledClient {
    fn new(client: Client<Compat<TcpStream>>) -> Self {
        Self {
            client,
            in_flight: false,
            broken: false,
        }
    }

    fn settle<T>(&mut self, result: &std::result::Result<T, tiberius::error::Error>) {
        self.in_flight = false;
        if let Err(err) = result {
            if is_transport_error(err) {
                self.broken = true;
            }
        }
    }

    async fn execute(
        &mut self,
        sql: &str,
        params: &[Value],
    ) -> std::result::Result<u64, MssqlConnectionError> {
        let params = values_to_tiberius_params(params);
        let refs: Vec<&dyn ToSql> = params.iter().map(|p| p as &dyn ToSql).collect();

        self.in_flight = true;
        let result = self.client.execute(sql, &refs[..]).await;
        self.settle(&result);
        Ok(result?.rows_affected().iter().sum())
    }

    async fn query(
        &mut self,
        sql: &str,
        params: &[Value],
    ) -> std::result::Result<Vec<TiberiusRow>, MssqlConnectionError> {
        let params = values_to_tiberius_params(params);
        let refs: Vec<&dyn ToSql> = params.iter().map(|p| p as &dyn ToSql).collect();

        self.in_flight = true;
        let result = match self.client.query(sql, &refs[..]).await {
            Ok(stream) => stream.into_first_result().await,
            Err(err) => Err(err),
        };
        self.settle(&result);
        Ok(result?)
    }

    /// Run a batch without parameters, discarding any rows
    async fn simple(&mut self, sql: &str) -> std::result::Result<(), MssqlConnectionError> {
        self.in_flight = true;
        let result = match self.client.simple_query(sql).await {
            Ok(stream) => stream.into_results().await.map(|_| ()),
            Err(err) => Err(err),
        };
        self.settle(&result);
        Ok(result?)
    }
}

/// bb8 manager opening tiberius clients for one descriptor
pub struct TiberiusConnectionManager {
    config: Config,
    authentication: Authentication,
    token_provider: Option<Arc<dyn TokenProvider>>,
}

impl TiberiusConnectionManager {
    pub fn new(
        config: Config,
        authentication: Authentication,
        token_provider: Option<Arc<dyn TokenProvider>>,
    ) -> Self {
        Self {
            config,
            authentication,
            token_provider,
        }
    }

    async fn config_for_new_connection(
        &self,
    ) -> std::result::Result<Config, MssqlConnectionError> {
        let mut config = self.config.clone();
        match &self.authentication {
            Authentication::Local { user, password } => {
                config.authentication(AuthMethod::sql_server(user, password));
            }
            directory => {
                let provider = self.token_provider.as_ref().ok_or_else(|| {
                    MssqlConnectionError::AuthenticationFailed(
                        "directory authentication requires a token provider".into(),
                    )
                })?;
                let token = provider
                    .access_token(directory, SQL_TOKEN_RESOURCE)
                    .await
                    .map_err(|e| MssqlConnectionError::AuthenticationFailed(e.to_string()))?;
                config.authentication(AuthMethod::aad_token(token));
            }
        }
        Ok(config)
    }
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = PooledClient;
    type Error = MssqlConnectionError;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let config = self.config_for_new_connection().await?;

        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| MssqlConnectionError::ConnectionFailed(e.to_string()))?;
        tcp.set_nodelay(true)?;

        let client = Client::connect(config, tcp.compat_write())
            .await
            .map_err(|e| match e {
                tiberius::error::Error::Server(token) => {
                    MssqlConnectionError::AuthenticationFailed(token.message().to_string())
                }
                other => MssqlConnectionError::ConnectionFailed(other.to_string()),
            })?;

        tracing::debug!("opened SQL Server connection");
        Ok(PooledClient::new(client))
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple("SELECT 1").await
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        conn.in_flight || conn.broken
    }
}

/// Pool sizing and timeouts
#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub max_size: u32,
    pub connection_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_size: 4,
            connection_timeout: Duration::from_secs(30),
        }
    }
}

/// SQL Server connection pool implementing [`Connection`]
pub struct MssqlConnection {
    pool: Pool<TiberiusConnectionManager>,
    closed: AtomicBool,
    database: String,
    rollback_timeout: Duration,
}

impl MssqlConnection {
    /// Build the pool. No physical connection is opened until first use.
    pub async fn open(
        manager: TiberiusConnectionManager,
        options: &PoolOptions,
        database: impl Into<String>,
    ) -> std::result::Result<Self, MssqlConnectionError> {
        let pool = Pool::builder()
            .max_size(options.max_size.max(1))
            .connection_timeout(options.connection_timeout)
            .test_on_check_out(false)
            .build(manager)
            .await?;

        Ok(Self {
            pool,
            closed: AtomicBool::new(false),
            database: database.into(),
            rollback_timeout: options.connection_timeout,
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    fn ensure_not_closed(&self) -> std::result::Result<(), MssqlConnectionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MssqlConnectionError::ConnectionClosed);
        }
        Ok(())
    }

    async fn checkout(
        &self,
    ) -> std::result::Result<PooledConnection<'_, TiberiusConnectionManager>, MssqlConnectionError>
    {
        self.ensure_not_closed()?;
        Ok(self.pool.get().await?)
    }
}

#[async_trait]
impl Connection for MssqlConnection {
    fn driver_name(&self) -> &str {
        "mssql"
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        let start = Instant::now();
        let mut conn = self.checkout().await?;

        let affected_rows = conn.execute(sql, params).await.inspect_err(|e| {
            tracing::error!(error = %e, "execute failed");
        })?;

        tracing::debug!(
            affected_rows,
            duration_ms = start.elapsed().as_millis() as u64,
            "execute completed"
        );
        Ok(StatementResult { affected_rows })
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let start = Instant::now();
        let mut conn = self.checkout().await?;

        let tib_rows = conn.query(sql, params).await.inspect_err(|e| {
            tracing::error!(error = %e, "query failed");
        })?;
        let result = rows_to_result(tib_rows, start)?;

        tracing::debug!(
            row_count = result.rows.len(),
            duration_ms = result.execution_time_ms,
            "query completed"
        );
        Ok(result)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.checkout().await?;
        conn.simple("SELECT 1").await?;
        Ok(())
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
        self.ensure_not_closed()?;
        let mut conn = self
            .pool
            .get_owned()
            .await
            .map_err(MssqlConnectionError::from)?;
        conn.simple("BEGIN TRANSACTION").await?;
        tracing::debug!("transaction started");
        Ok(Box::new(MssqlTransaction {
            conn: Mutex::new(Some(conn)),
            rollback_timeout: self.rollback_timeout,
        }))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        tracing::debug!("SQL Server connection pool closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for MssqlConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MssqlConnection")
            .field("database", &self.database)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

/// A transaction pinned to one pooled connection.
///
/// Dropped without `commit`/`rollback`, the connection is marked broken so
/// the pool closes it and the server rolls the work back.
pub struct MssqlTransaction {
    conn: Mutex<Option<PooledConnection<'static, TiberiusConnectionManager>>>,
    rollback_timeout: Duration,
}

impl MssqlTransaction {
    fn take(&mut self) -> std::result::Result<PooledConnection<'static, TiberiusConnectionManager>, MssqlConnectionError> {
        self.conn
            .get_mut()
            .take()
            .ok_or(MssqlConnectionError::ConnectionClosed)
    }

    async fn finish(mut self: Box<Self>, sql: &str) -> Result<()> {
        let mut conn = self.take()?;
        let result = conn.simple(sql).await;
        if result.is_err() {
            conn.broken = true;
        }
        Ok(result?)
    }
}

#[async_trait]
impl Transaction for MssqlTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.finish("COMMIT TRANSACTION").await?;
        tracing::debug!("transaction committed");
        Ok(())
    }

    /// Roll back on the pinned connection.
    ///
    /// A connection whose last request was abandoned part way cannot carry
    /// another one; it is discarded instead and the server rolls back when
    /// the session drops.
    async fn rollback(mut self: Box<Self>) -> Result<()> {
        let mut conn = self.take()?;
        if conn.in_flight || conn.broken {
            conn.broken = true;
            tracing::warn!("connection interrupted mid-request; discarding it to roll back");
            return Ok(());
        }

        let sent = tokio::time::timeout(
            self.rollback_timeout,
            conn.simple("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION"),
        )
        .await;
        match sent {
            Ok(Ok(())) => {
                tracing::debug!("transaction rolled back");
                Ok(())
            }
            Ok(Err(err)) => {
                conn.broken = true;
                Err(err.into())
            }
            Err(_) => {
                conn.broken = true;
                Err(MssqlConnectionError::Timeout(format!(
                    "rollback did not finish within {}s",
                    self.rollback_timeout.as_secs()
                ))
                .into())
            }
        }
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let start = Instant::now();
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(MssqlConnectionError::ConnectionClosed)?;
        let tib_rows = conn.query(sql, params).await?;
        rows_to_result(tib_rows, start)
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(MssqlConnectionError::ConnectionClosed)?;
        let affected_rows = conn.execute(sql, params).await?;
        Ok(StatementResult { affected_rows })
    }
}

impl Drop for MssqlTransaction {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.get_mut().as_mut() {
            conn.broken = true;
            tracing::warn!("transaction dropped while open; discarding its connection");
        }
    }
}

fn rows_to_result(tib_rows: Vec<TiberiusRow>, start: Instant) -> Result<QueryResult> {
    let columns: Vec<String> = tib_rows
        .first()
        .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();

    let mut rows = Vec::with_capacity(tib_rows.len());
    for tib_row in tib_rows {
        let values = tib_row
            .into_iter()
            .map(column_data_to_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.push(Row::new(columns.clone(), values));
    }

    Ok(QueryResult {
        columns,
        rows,
        execution_time_ms: start.elapsed().as_millis() as u64,
    })
}

fn date_time<T>(
    col_data: &ColumnData<'static>,
    wrap: impl FnOnce(T) -> Value,
) -> std::result::Result<Value, MssqlConnectionError>
where
    T: for<'a> FromSql<'a>,
{
    Ok(T::from_sql(col_data)?.map(wrap).unwrap_or(Value::Null))
}

/// Convert tiberius ColumnData to a mssec Value
pub(crate) fn column_data_to_value(
    col_data: ColumnData<'static>,
) -> std::result::Result<Value, MssqlConnectionError> {
    let value = match col_data {
        ColumnData::Bit(v) => v.map(Value::Bool).unwrap_or(Value::Null),
        ColumnData::U8(v) => v.map(|v| Value::Int16(v as i16)).unwrap_or(Value::Null),
        ColumnData::I16(v) => v.map(Value::Int16).unwrap_or(Value::Null),
        ColumnData::I32(v) => v.map(Value::Int32).unwrap_or(Value::Null),
        ColumnData::I64(v) => v.map(Value::Int64).unwrap_or(Value::Null),
        ColumnData::F32(v) => v.map(|v| Value::String(v.to_string())).unwrap_or(Value::Null),
        ColumnData::F64(v) => v.map(|v| Value::String(v.to_string())).unwrap_or(Value::Null),
        ColumnData::Numeric(v) => v.map(|v| Value::String(v.to_string())).unwrap_or(Value::Null),
        ColumnData::String(v) => v.map(|v| Value::String(v.into_owned())).unwrap_or(Value::Null),
        ColumnData::Guid(v) => v.map(Value::Uuid).unwrap_or(Value::Null),
        ColumnData::Binary(v) => v.map(|v| Value::Bytes(v.into_owned())).unwrap_or(Value::Null),
        ColumnData::Xml(v) => v
            .map(|v| Value::String(v.into_owned().into_string()))
            .unwrap_or(Value::Null),
        ref dt @ (ColumnData::DateTime(_)
        | ColumnData::SmallDateTime(_)
        | ColumnData::DateTime2(_)) => date_time::<NaiveDateTime>(dt, Value::DateTime)?,
        ref dto @ ColumnData::DateTimeOffset(_) => {
            date_time::<DateTime<Utc>>(dto, |v| Value::DateTime(v.naive_utc()))?
        }
        ref d @ ColumnData::Date(_) => {
            date_time::<NaiveDate>(d, |v| Value::DateTime(v.and_time(NaiveTime::MIN)))?
        }
        ref t @ ColumnData::Time(_) => {
            date_time::<NaiveTime>(t, |v| Value::String(v.to_string()))?
        }
    };
    Ok(value)
}

/// Container for tiberius parameter values
#[derive(Debug)]
pub(crate) enum TiberiusParam {
    Null,
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    String(String),
    Bytes(Vec<u8>),
    Uuid(uuid::Uuid),
    DateTime(NaiveDateTime),
}

impl ToSql for TiberiusParam {
    fn to_sql(&self) -> ColumnData<'_> {
        match self {
            TiberiusParam::Null => ColumnData::String(None),
            TiberiusParam::Bool(v) => ColumnData::Bit(Some(*v)),
            TiberiusParam::I16(v) => ColumnData::I16(Some(*v)),
            TiberiusParam::I32(v) => ColumnData::I32(Some(*v)),
            TiberiusParam::I64(v) => ColumnData::I64(Some(*v)),
            TiberiusParam::String(v) => {
                ColumnData::String(Some(std::borrow::Cow::Borrowed(v.as_str())))
            }
            TiberiusParam::Bytes(v) => {
                ColumnData::Binary(Some(std::borrow::Cow::Borrowed(v.as_slice())))
            }
            TiberiusParam::Uuid(v) => ColumnData::Guid(Some(*v)),
            TiberiusParam::DateTime(v) => v.to_sql(),
        }
    }
}

/// Convert mssec Values to tiberius parameters
pub(crate) fn values_to_tiberius_params(values: &[Value]) -> Vec<TiberiusParam> {
    values
        .iter()
        .map(|v| match v {
            Value::Null => TiberiusParam::Null,
            Value::Bool(b) => TiberiusParam::Bool(*b),
            Value::Int16(i) => TiberiusParam::I16(*i),
            Value::Int32(i) => TiberiusParam::I32(*i),
            Value::Int64(i) => TiberiusParam::I64(*i),
            Value::String(s) => TiberiusParam::String(s.clone()),
            Value::Bytes(b) => TiberiusParam::Bytes(b.clone()),
            Value::Uuid(u) => TiberiusParam::Uuid(*u),
            Value::DateTime(dt) => TiberiusParam::DateTime(*dt),
        })
        .collect()
}

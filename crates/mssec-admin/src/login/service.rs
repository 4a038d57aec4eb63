//! Login service implementation

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use mssec_core::{
    CancellationToken, MssecError, Result, ResultExt, Row, ServerInfo, Statement,
};

use crate::context::AdminContext;
use crate::ddl::{DynamicSql, list_separator};
use crate::validate::validate_principal_name;

const LOGIN_COLUMNS: &str = "name, principal_id, type, is_disabled, \
     default_database_name, default_language_name, create_date, modify_date";

pub(crate) const ACTIVE_SESSIONS_QUERY: &str = "SELECT session_id FROM sys.dm_exec_sessions \
     WHERE login_name = @P1 AND session_id <> @@SPID";

/// Fallback default database for on-premises logins
pub const DEFAULT_LOGIN_DATABASE: &str = "master";

/// A server login
///
/// `principal_id` 0 means "not known yet"; reads then go by name. The
/// password is input only and never read back.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Login {
    pub name: String,
    #[serde(default)]
    pub principal_id: i32,
    /// `S` (SQL), `E` (external user), `X` (external group)
    #[serde(default)]
    pub type_code: String,
    #[serde(default)]
    pub is_disabled: bool,
    #[serde(default)]
    pub default_database: String,
    #[serde(default)]
    pub default_language: String,
    /// Directory (Microsoft Entra) login created `FROM EXTERNAL PROVIDER`
    #[serde(default)]
    pub external: bool,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default)]
    pub create_date: Option<NaiveDateTime>,
    #[serde(default)]
    pub modify_date: Option<NaiveDateTime>,
}

impl Login {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// A SQL-authenticated login
    pub fn sql(name: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new(name).with_password(password)
    }

    /// A directory login
    pub fn external(name: impl Into<String>) -> Self {
        Self {
            external: true,
            ..Self::new(name)
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_principal_id(mut self, principal_id: i32) -> Self {
        self.principal_id = principal_id;
        self
    }

    pub fn with_default_database(mut self, database: impl Into<String>) -> Self {
        self.default_database = database.into();
        self
    }

    pub fn with_default_language(mut self, language: impl Into<String>) -> Self {
        self.default_language = language.into();
        self
    }

    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.is_disabled = disabled;
        self
    }

    fn from_row(row: &Row, external: bool) -> Result<Self> {
        Ok(Self {
            name: row.string("name")?,
            principal_id: row.i32("principal_id")?,
            type_code: row.string("type")?.trim().to_string(),
            is_disabled: row.bool("is_disabled")?,
            default_database: row.string("default_database_name")?,
            default_language: row.string("default_language_name")?,
            external,
            password: None,
            create_date: row.datetime("create_date"),
            modify_date: row.datetime("modify_date"),
        })
    }
}

impl std::fmt::Debug for Login {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Login")
            .field("name", &self.name)
            .field("principal_id", &self.principal_id)
            .field("type_code", &self.type_code)
            .field("is_disabled", &self.is_disabled)
            .field("default_database", &self.default_database)
            .field("default_language", &self.default_language)
            .field("external", &self.external)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn login_query(external: bool, by_principal_id: bool) -> String {
    let source = if external {
        "sys.server_principals WHERE type IN ('E', 'X') AND"
    } else {
        "sys.sql_logins WHERE"
    };
    let key = if by_principal_id { "principal_id" } else { "name" };
    format!("SELECT {} FROM {} {} = @P1", LOGIN_COLUMNS, source, key)
}

/// DDL for a new login, in execution order
pub(crate) fn plan_create(login: &Login, server: &ServerInfo) -> Result<Vec<Statement>> {
    let mut sql = DynamicSql::new()
        .text("CREATE LOGIN ")
        .identifier("name", login.name.as_str());

    if login.external {
        if login.password.is_some() {
            return Err(MssecError::validation(
                "external login cannot have a password",
            ));
        }
        sql = sql.text(" FROM EXTERNAL PROVIDER");
    } else {
        let password = login
            .password
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| MssecError::validation("password is required for SQL logins"))?;
        sql = sql.text(" WITH PASSWORD = ").literal("password", password);
    }

    if !server.is_azure {
        let database = if login.default_database.is_empty() {
            DEFAULT_LOGIN_DATABASE
        } else {
            login.default_database.as_str()
        };
        sql = sql
            .text(if login.external { " WITH " } else { ", " })
            .text("DEFAULT_DATABASE = ")
            .identifier("database", database);
        if !login.default_language.is_empty()
            && !server.is_default_language(&login.default_language)
        {
            sql = sql
                .text(", DEFAULT_LANGUAGE = ")
                .identifier("language", login.default_language.as_str());
        }
    }

    let mut statements = vec![sql.build()];
    if login.is_disabled {
        statements.push(enable_statement(&login.name, false));
    }
    Ok(statements)
}

/// DDL turning `current` into `desired`; empty when nothing differs
pub(crate) fn plan_alter(
    current: &Login,
    desired: &Login,
    server: &ServerInfo,
) -> Result<Vec<Statement>> {
    let mut statements = Vec::new();

    let mut with = DynamicSql::new()
        .text("ALTER LOGIN ")
        .identifier("name", current.name.as_str())
        .text(" WITH ");
    let mut options = 0;

    if let Some(password) = desired.password.as_deref().filter(|p| !p.is_empty()) {
        if current.external || desired.external {
            return Err(MssecError::validation(
                "external login cannot have a password",
            ));
        }
        with = with
            .text(list_separator(options))
            .text("PASSWORD = ")
            .literal("password", password);
        options += 1;
    }

    if !server.is_azure {
        if !desired.default_database.is_empty()
            && !desired
                .default_database
                .eq_ignore_ascii_case(&current.default_database)
        {
            with = with
                .text(list_separator(options))
                .text("DEFAULT_DATABASE = ")
                .identifier("database", desired.default_database.as_str());
            options += 1;
        }
        if !desired.default_language.is_empty()
            && !desired
                .default_language
                .eq_ignore_ascii_case(&current.default_language)
        {
            with = with
                .text(list_separator(options))
                .text("DEFAULT_LANGUAGE = ")
                .identifier("language", desired.default_language.as_str());
            options += 1;
        }
    }

    if options > 0 {
        statements.push(with.build());
    }

    if desired.is_disabled != current.is_disabled {
        statements.push(enable_statement(&current.name, !desired.is_disabled));
    }

    // Rename last so every earlier statement still finds the login
    if !desired.name.is_empty() && desired.name != current.name {
        validate_principal_name("login", &desired.name)?;
        statements.push(
            DynamicSql::new()
                .text("ALTER LOGIN ")
                .identifier("name", current.name.as_str())
                .text(" WITH NAME = ")
                .identifier("new_name", desired.name.as_str())
                .build(),
        );
    }

    Ok(statements)
}

fn enable_statement(name: &str, enabled: bool) -> Statement {
    DynamicSql::new()
        .text("ALTER LOGIN ")
        .identifier("name", name)
        .text(if enabled { " ENABLE" } else { " DISABLE" })
        .build()
}

/// Error text SQL Server uses when the session ended before `KILL` ran
fn is_session_gone(err: &MssecError) -> bool {
    err.to_string().contains("is not an active process")
}

/// Login operations, available through [`AdminContext::logins`]
pub struct LoginService<'a> {
    ctx: &'a AdminContext,
}

impl<'a> LoginService<'a> {
    pub(crate) fn new(ctx: &'a AdminContext) -> Self {
        Self { ctx }
    }

    /// Read a login by principal id, or by name when the id is 0.
    ///
    /// `login.external` selects the catalog view. Fails with `NotFound`
    /// when no such login exists.
    #[tracing::instrument(skip(self, login, cancel), fields(login = %login.name))]
    pub async fn get(&self, login: &Login, cancel: &CancellationToken) -> Result<Login> {
        self.read_login(login, cancel).await.during("get login")
    }

    /// All SQL logins followed by all directory logins
    #[tracing::instrument(skip(self, cancel))]
    pub async fn list(&self, cancel: &CancellationToken) -> Result<Vec<Login>> {
        self.read_all(cancel).await.during("list logins")
    }

    /// Create a login. `login` is never modified; defaults are applied to
    /// the generated DDL only.
    #[tracing::instrument(skip(self, login, cancel), fields(login = %login.name, external = login.external))]
    pub async fn create(&self, login: &Login, cancel: &CancellationToken) -> Result<()> {
        self.create_login(login, cancel).await.during("create login")
    }

    /// Apply the differences between `current` and `desired`.
    ///
    /// Nothing is sent to the server when the two agree.
    #[tracing::instrument(skip(self, current, desired, cancel), fields(login = %current.name))]
    pub async fn alter(
        &self,
        current: &Login,
        desired: &Login,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.alter_login(current, desired, cancel)
            .await
            .during("alter login")
    }

    /// Kill the login's sessions, then drop it
    #[tracing::instrument(skip(self, login, cancel), fields(login = %login.name))]
    pub async fn drop(&self, login: &Login, cancel: &CancellationToken) -> Result<()> {
        self.drop_login(login, cancel).await.during("drop login")
    }

    /// Kill every session of `login_name` except the current one.
    ///
    /// Returns how many sessions were killed. Sessions that end on their
    /// own before their `KILL` arrives are skipped.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn kill_sessions(&self, login_name: &str, cancel: &CancellationToken) -> Result<usize> {
        self.kill_login_sessions(login_name, cancel)
            .await
            .during("kill sessions")
    }

    fn require_master_for_reads(&self) -> Result<()> {
        if self.ctx.server().is_azure {
            self.ctx.require_master("reading logins")?;
        }
        Ok(())
    }

    async fn read_login(&self, login: &Login, cancel: &CancellationToken) -> Result<Login> {
        self.require_master_for_reads()?;
        let by_id = login.principal_id != 0;
        let statement = if by_id {
            Statement::new(login_query(login.external, true)).bind(login.principal_id)
        } else {
            validate_principal_name("login", &login.name)?;
            Statement::new(login_query(login.external, false)).bind(login.name.as_str())
        };

        self.ctx.ready(cancel).await?;
        let row = self
            .ctx
            .query(&statement, cancel)
            .await?
            .into_first_row()
            .ok_or_else(|| {
                if by_id {
                    MssecError::not_found(format!(
                        "login with principal id {}",
                        login.principal_id
                    ))
                } else {
                    MssecError::not_found(format!("login '{}'", login.name))
                }
            })?;
        Login::from_row(&row, login.external)
    }

    async fn read_all(&self, cancel: &CancellationToken) -> Result<Vec<Login>> {
        self.require_master_for_reads()?;
        self.ctx.ready(cancel).await?;

        let mut logins = Vec::new();
        for external in [false, true] {
            let source = if external {
                "sys.server_principals WHERE type IN ('E', 'X')"
            } else {
                "sys.sql_logins"
            };
            let statement = Statement::new(format!(
                "SELECT {} FROM {} ORDER BY name",
                LOGIN_COLUMNS, source
            ));
            for row in &self.ctx.query(&statement, cancel).await?.rows {
                logins.push(Login::from_row(row, external)?);
            }
        }
        tracing::debug!(count = logins.len(), "listed logins");
        Ok(logins)
    }

    async fn create_login(&self, login: &Login, cancel: &CancellationToken) -> Result<()> {
        validate_principal_name("login", &login.name)?;
        self.ctx.require_master("creating logins")?;
        let statements = plan_create(login, self.ctx.server())?;

        self.ctx.ready(cancel).await?;
        for statement in &statements {
            self.ctx.execute(statement, cancel).await?;
        }
        Ok(())
    }

    async fn alter_login(
        &self,
        current: &Login,
        desired: &Login,
        cancel: &CancellationToken,
    ) -> Result<()> {
        validate_principal_name("login", &current.name)?;
        self.ctx.require_master("altering logins")?;
        let statements = plan_alter(current, desired, self.ctx.server())?;
        if statements.is_empty() {
            tracing::debug!("login unchanged");
            return Ok(());
        }

        self.ctx.ready(cancel).await?;
        for statement in &statements {
            self.ctx.execute(statement, cancel).await?;
        }
        Ok(())
    }

    async fn drop_login(&self, login: &Login, cancel: &CancellationToken) -> Result<()> {
        validate_principal_name("login", &login.name)?;
        self.ctx.require_master("dropping logins")?;

        self.ctx.ready(cancel).await?;
        let killed = self.kill_active_sessions(&login.name, cancel).await?;
        if killed > 0 {
            tracing::debug!(killed, "killed sessions before drop");
        }
        let statement = DynamicSql::new()
            .text("DROP LOGIN ")
            .identifier("name", login.name.as_str())
            .build();
        self.ctx.execute(&statement, cancel).await
    }

    async fn kill_login_sessions(&self, login_name: &str, cancel: &CancellationToken) -> Result<usize> {
        validate_principal_name("login", login_name)?;
        self.ctx.require_master("killing sessions")?;
        self.ctx.ready(cancel).await?;
        self.kill_active_sessions(login_name, cancel).await
    }

    async fn kill_active_sessions(&self, login_name: &str, cancel: &CancellationToken) -> Result<usize> {
        let sessions = self
            .ctx
            .query(&Statement::new(ACTIVE_SESSIONS_QUERY).bind(login_name), cancel)
            .await?;

        let mut killed = 0;
        for row in &sessions.rows {
            let session_id = row.i32("session_id")?;
            let statement = DynamicSql::new()
                .text("KILL ")
                .number("session", session_id)
                .build();
            match self.ctx.execute(&statement, cancel).await {
                Ok(()) => killed += 1,
                Err(err) if is_session_gone(&err) => {
                    tracing::debug!(session_id, error = %err, "session already ended");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(killed)
    }
}

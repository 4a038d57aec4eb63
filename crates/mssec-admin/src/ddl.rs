//! Dynamic DDL composition
//!
//! DDL verbs (`CREATE LOGIN`, `GRANT`, `ALTER ROLE`, ...) do not accept bound
//! parameters. Instead of formatting names into SQL text, [`DynamicSql`]
//! assembles a T-SQL string *expression* on the server side:
//!
//! ```text
//! DECLARE @sql NVARCHAR(MAX); SET @sql = N'CREATE USER ' + QUOTENAME(@P1) + N' FOR LOGIN ' + QUOTENAME(@P2); EXEC(@sql);
//! ```
//!
//! Caller-supplied names travel as parameters and are quoted by `QUOTENAME`;
//! the only unquoted tokens are fixed keywords, validated schema names and
//! validated permission names.
//!
//! Values are bound by name while building. Each distinct name is assigned the
//! next positional slot on first use and reuses it afterwards, so the
//! resulting [`Statement`] carries `@P1..@Pn` in first-use order.
//!
//! # Example
//!
//! ```
//! use mssec_admin::DynamicSql;
//!
//! let stmt = DynamicSql::new()
//!     .text("DROP USER ")
//!     .identifier("user", "app_reader")
//!     .build();
//! assert_eq!(
//!     stmt.sql,
//!     "DECLARE @sql NVARCHAR(MAX); SET @sql = N'DROP USER ' + QUOTENAME(@P1); EXEC(@sql);"
//! );
//! ```

use std::collections::HashMap;

use mssec_core::{Statement, Value};

use crate::validate::{PermissionName, SqlIdentifier};

#[derive(Debug, Clone, PartialEq)]
enum Part {
    /// Literal SQL text, emitted as an `N'...'` constant
    Text(String),
    /// A server-side expression over bound parameters
    Expr(String),
}

/// Builder for injection-resistant dynamic DDL
#[derive(Debug, Clone, Default)]
pub struct DynamicSql {
    parts: Vec<Part>,
    positions: HashMap<String, usize>,
    values: Vec<Value>,
}

impl DynamicSql {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append fixed SQL text. Only string constants are accepted.
    pub fn text(mut self, sql: &'static str) -> Self {
        self.push_text(sql);
        self
    }

    /// Append a name quoted by `QUOTENAME` on the server
    pub fn identifier(mut self, name: &str, value: impl Into<String>) -> Self {
        let position = self.bind(name, Value::String(value.into()));
        self.parts
            .push(Part::Expr(format!("QUOTENAME(@P{})", position)));
        self
    }

    /// Append a single-quoted string literal (passwords, object ids)
    pub fn literal(mut self, name: &str, value: impl Into<String>) -> Self {
        let position = self.bind(name, Value::String(value.into()));
        self.push_text("'");
        self.parts.push(Part::Expr(format!(
            "REPLACE(@P{}, N'''', N'''''')",
            position
        )));
        self.push_text("'");
        self
    }

    /// Append an integer rendered as text (session ids for `KILL`)
    pub fn number(mut self, name: &str, value: i32) -> Self {
        let position = self.bind(name, Value::Int32(value));
        self.parts
            .push(Part::Expr(format!("CAST(@P{} AS NVARCHAR(20))", position)));
        self
    }

    /// Append a validated identifier unquoted-but-bracketed, e.g. a schema in
    /// `ON SCHEMA::[sales]`
    pub fn raw_identifier(mut self, identifier: &SqlIdentifier) -> Self {
        self.push_text("[");
        self.push_text(identifier.as_str());
        self.push_text("]");
        self
    }

    /// Append a validated permission name such as `VIEW DEFINITION`
    pub fn permission(mut self, permission: &PermissionName) -> Self {
        self.push_text(permission.as_str());
        self
    }

    /// The `SET @sql = ...` right-hand side
    pub fn expression(&self) -> String {
        if self.parts.is_empty() {
            return "N''".to_string();
        }
        self.parts
            .iter()
            .map(|part| match part {
                Part::Text(text) => format!("N'{}'", text.replace('\'', "''")),
                Part::Expr(expr) => expr.clone(),
            })
            .collect::<Vec<_>>()
            .join(" + ")
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Wrap the expression in `DECLARE`/`SET`/`EXEC` with positional values
    pub fn build(self) -> Statement {
        Statement {
            sql: format!(
                "DECLARE @sql NVARCHAR(MAX); SET @sql = {}; EXEC(@sql);",
                self.expression()
            ),
            params: self.values,
        }
    }

    fn push_text(&mut self, sql: &str) {
        match self.parts.last_mut() {
            Some(Part::Text(existing)) => existing.push_str(sql),
            _ => self.parts.push(Part::Text(sql.to_string())),
        }
    }

    /// Slot for `name`; the first binding of a name wins
    fn bind(&mut self, name: &str, value: Value) -> usize {
        if let Some(&position) = self.positions.get(name) {
            return position;
        }
        self.values.push(value);
        let position = self.values.len();
        self.positions.insert(name.to_string(), position);
        position
    }
}

/// Text in front of the `index`-th item of a `WITH a, b, c` option list
pub(crate) fn list_separator(index: usize) -> &'static str {
    if index == 0 { "" } else { ", " }
}

#[cfg(test)]
mod tests;

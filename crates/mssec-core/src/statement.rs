//! A SQL text together with its positional parameters

use crate::{Connection, QueryResult, Result, StatementResult, Transaction, Value};

/// SQL text plus the values bound to `@P1..@Pn`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Bind the next positional parameter
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    pub async fn execute(&self, conn: &dyn Connection) -> Result<StatementResult> {
        conn.execute(&self.sql, &self.params).await
    }

    pub async fn query(&self, conn: &dyn Connection) -> Result<QueryResult> {
        conn.query(&self.sql, &self.params).await
    }

    pub async fn execute_in(&self, tx: &dyn Transaction) -> Result<StatementResult> {
        tx.execute(&self.sql, &self.params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_bind_appends_in_order() {
        let stmt = Statement::new("SELECT name FROM sys.sql_logins WHERE name = @P1 OR principal_id = @P2")
            .bind("app")
            .bind(42);
        assert_eq!(stmt.params, vec![Value::from("app"), Value::Int32(42)]);
    }
}

//! Database trait definitions

use crate::error::{DbError, DbResult};
use crate::types::{QueryResult, Statement};
use async_trait::async_trait;

/// Connection pool against one cluster.
///
/// Statements issued through the pool are self-contained: consecutive calls
/// may land on different physical connections. Work that depends on
/// connection-local state must [`acquire`](Database::acquire) a [`Session`].
#[async_trait]
pub trait Database: Send + Sync {
    /// Verify the server is reachable
    async fn ping(&self) -> DbResult<()>;

    /// Execute a statement that returns no rows
    async fn execute(&self, stmt: Statement) -> DbResult<()>;

    /// Execute a row-returning statement
    async fn query(&self, stmt: Statement) -> DbResult<QueryResult>;

    /// Check out a dedicated session, waiting while the pool is at capacity
    async fn acquire(&self) -> DbResult<Box<dyn Session>>;

    /// Close the pool; later calls fail with `DbError::Closed`
    async fn close(&self) -> DbResult<()>;

    /// Name of the server answering this pool
    async fn hostname(&self) -> DbResult<String> {
        let result = self.query(Statement::new("SELECT hostName()")).await?;
        result
            .first_column_strings()
            .into_iter()
            .next()
            .ok_or_else(|| DbError::Decode("hostName() returned no rows".to_string()))
    }

    /// Database type identifier for logging
    fn db_type(&self) -> &'static str;
}

/// An exclusively held connection.
///
/// Statements issued on one session share server-side state such as the
/// current database. The session returns to the pool when dropped.
#[async_trait]
pub trait Session: Send {
    /// Session identifier, stable for the session's lifetime
    fn id(&self) -> &str;

    /// Execute a statement that returns no rows
    async fn execute(&mut self, stmt: Statement) -> DbResult<()>;

    /// Execute a row-returning statement
    async fn query(&mut self, stmt: Statement) -> DbResult<QueryResult>;
}

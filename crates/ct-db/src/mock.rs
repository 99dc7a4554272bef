//! Scripted in-process database for tests.
//!
//! Statements are matched against substring rules; the most recently added
//! matching rule wins. Unmatched statements succeed, and unmatched queries
//! return an empty result. Every statement is recorded with the session it
//! ran on.

use crate::error::{DbError, DbResult};
use crate::traits::{Database, Session};
use crate::types::{QueryResult, Statement};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Canned outcome of a rule
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Succeed; queries return an empty result
    Ok,
    /// Return rows
    Rows(QueryResult),
    /// Fail with `DbError::ExecutionError`
    Error(String),
}

#[derive(Debug, Clone)]
struct Rule {
    pattern: String,
    response: MockResponse,
    delay: Option<Duration>,
    remaining: Option<usize>,
}

/// A statement observed by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    pub sql: String,
    pub params: Vec<(String, String)>,
    /// Session the statement ran on, `None` for pool-level calls
    pub session: Option<String>,
}

#[derive(Default)]
struct MockState {
    rules: Mutex<Vec<Rule>>,
    log: Mutex<Vec<Recorded>>,
    ping_error: Mutex<Option<String>>,
    pings: AtomicUsize,
    next_session: AtomicUsize,
    open_sessions: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    closed: AtomicBool,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockState {
    fn take_response(&self, sql: &str) -> (MockResponse, Option<Duration>) {
        let mut rules = lock(&self.rules);
        for rule in rules.iter_mut().rev() {
            if rule.remaining == Some(0) || !sql.contains(&rule.pattern) {
                continue;
            }
            if let Some(n) = rule.remaining.as_mut() {
                *n -= 1;
            }
            return (rule.response.clone(), rule.delay);
        }
        (MockResponse::Ok, None)
    }

    async fn run(&self, stmt: Statement, session: Option<&str>) -> DbResult<QueryResult> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DbError::Closed);
        }

        lock(&self.log).push(Recorded {
            sql: stmt.sql().to_string(),
            params: stmt.params().to_vec(),
            session: session.map(str::to_string),
        });
        let (response, delay) = self.take_response(stmt.sql());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match response {
            MockResponse::Ok => Ok(QueryResult::default()),
            MockResponse::Rows(rows) => Ok(rows),
            MockResponse::Error(message) => Err(DbError::ExecutionError(message)),
        }
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Scripted database. Clones share rules and the statement log.
#[derive(Clone, Default)]
pub struct MockDatabase {
    state: Arc<MockState>,
}

/// Builder returned by [`MockDatabase::when`]
#[must_use]
pub struct MockRule<'a> {
    db: &'a MockDatabase,
    pattern: String,
    delay: Option<Duration>,
    remaining: Option<usize>,
}

impl MockRule<'_> {
    /// Sleep before answering
    pub fn delays(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Apply the rule only to the next `n` matching statements
    pub fn times(mut self, n: usize) -> Self {
        self.remaining = Some(n);
        self
    }

    /// Apply the rule only to the next matching statement
    pub fn once(self) -> Self {
        self.times(1)
    }

    /// Answer with rows
    pub fn returns(self, result: QueryResult) {
        self.finish(MockResponse::Rows(result));
    }

    /// Fail with `message`
    pub fn fails(self, message: &str) {
        self.finish(MockResponse::Error(message.to_string()));
    }

    /// Succeed without rows
    pub fn succeeds(self) {
        self.finish(MockResponse::Ok);
    }

    fn finish(self, response: MockResponse) {
        lock(&self.db.state.rules).push(Rule {
            pattern: self.pattern,
            response,
            delay: self.delay,
            remaining: self.remaining,
        });
    }
}

impl MockDatabase {
    /// Mock with no rules
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a rule for statements containing `pattern`
    pub fn when(&self, pattern: &str) -> MockRule<'_> {
        MockRule {
            db: self,
            pattern: pattern.to_string(),
            delay: None,
            remaining: None,
        }
    }

    /// Make `ping` fail with `message`
    pub fn fail_ping(&self, message: &str) {
        *lock(&self.state.ping_error) = Some(message.to_string());
    }

    /// Every statement observed so far, in arrival order
    pub fn statements(&self) -> Vec<Recorded> {
        lock(&self.state.log).clone()
    }

    /// SQL of every statement observed so far
    pub fn executed_sql(&self) -> Vec<String> {
        lock(&self.state.log).iter().map(|r| r.sql.clone()).collect()
    }

    /// Observed statements containing `pattern`
    pub fn count_matching(&self, pattern: &str) -> usize {
        lock(&self.state.log)
            .iter()
            .filter(|r| r.sql.contains(pattern))
            .count()
    }

    /// Forget recorded statements, keeping rules
    pub fn clear_log(&self) {
        lock(&self.state.log).clear();
    }

    /// Number of `ping` calls
    pub fn ping_count(&self) -> usize {
        self.state.pings.load(Ordering::SeqCst)
    }

    /// Sessions currently checked out
    pub fn open_sessions(&self) -> usize {
        self.state.open_sessions.load(Ordering::SeqCst)
    }

    /// Highest number of statements that were executing at once
    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    /// Whether `close` was called
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Database for MockDatabase {
    async fn ping(&self) -> DbResult<()> {
        self.state.pings.fetch_add(1, Ordering::SeqCst);
        if self.is_closed() {
            return Err(DbError::Closed);
        }
        match lock(&self.state.ping_error).clone() {
            Some(message) => Err(DbError::ConnectionError(message)),
            None => Ok(()),
        }
    }

    async fn execute(&self, stmt: Statement) -> DbResult<()> {
        self.state.run(stmt, None).await.map(|_| ())
    }

    async fn query(&self, stmt: Statement) -> DbResult<QueryResult> {
        self.state.run(stmt, None).await
    }

    async fn acquire(&self) -> DbResult<Box<dyn Session>> {
        if self.is_closed() {
            return Err(DbError::Closed);
        }
        let n = self.state.next_session.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSession {
            state: Arc::clone(&self.state),
            id: format!("session-{n}"),
        }))
    }

    async fn close(&self) -> DbResult<()> {
        self.state.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn db_type(&self) -> &'static str {
        "mock"
    }
}

struct MockSession {
    state: Arc<MockState>,
    id: String,
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.state.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Session for MockSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&mut self, stmt: Statement) -> DbResult<()> {
        self.state.run(stmt, Some(&self.id)).await.map(|_| ())
    }

    async fn query(&mut self, stmt: Statement) -> DbResult<QueryResult> {
        self.state.run(stmt, Some(&self.id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_latest_matching_rule_wins() {
        let db = MockDatabase::new();
        db.when("count()").returns(QueryResult::scalar("c", 1));
        db.when("count()").once().returns(QueryResult::scalar("c", 5));

        let first = db.query("SELECT count() FROM t".into()).await.unwrap();
        let second = db.query("SELECT count() FROM t".into()).await.unwrap();
        assert_eq!(first.first_u64().unwrap(), 5);
        assert_eq!(second.first_u64().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unmatched_statements_succeed() {
        let db = MockDatabase::new();
        db.execute("CREATE DATABASE x".into()).await.unwrap();
        assert!(db.query("SELECT 1".into()).await.unwrap().is_empty());
        assert_eq!(db.executed_sql(), vec!["CREATE DATABASE x", "SELECT 1"]);
    }

    #[tokio::test]
    async fn test_session_records_its_id() {
        let db = MockDatabase::new();
        let mut session = db.acquire().await.unwrap();
        session.execute("USE db".into()).await.unwrap();
        session.query("SELECT 1".into()).await.unwrap();
        assert_eq!(db.open_sessions(), 1);
        drop(session);
        assert_eq!(db.open_sessions(), 0);

        let log = db.statements();
        assert_eq!(log[0].session.as_deref(), Some("session-1"));
        assert_eq!(log[0].session, log[1].session);
    }

    #[tokio::test]
    async fn test_failure_rule() {
        let db = MockDatabase::new();
        db.when("t3_local").fails("Code: 60. Table does not exist");
        let err = db.execute("INSERT INTO t3_local".into()).await.unwrap_err();
        assert!(err.to_string().contains("Code: 60"));
    }

    #[tokio::test]
    async fn test_closed_rejects() {
        let db = MockDatabase::new();
        db.close().await.unwrap();
        assert!(matches!(db.execute("SELECT 1".into()).await, Err(DbError::Closed)));
        assert!(matches!(db.ping().await, Err(DbError::Closed)));
    }
}

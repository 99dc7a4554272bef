//! Parallel assertion execution

use crate::compare::{evaluate, ActualRow};
use crate::error::{AssertError, AssertResult, AssertionError};
use crate::result::{AssertionResult, RunResult};
use crate::sync::SyncGate;
use ct_core::config::{DEFAULT_ASSERTION_TIMEOUT, DEFAULT_WORKERS};
use ct_core::sql_utils::quote_ident;
use ct_core::{Assertion, HarnessConfig};
use ct_db::{verify_safe_host, ClickHouseBackend, ClickHouseOptions, Database, Datum, QueryResult, Statement};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Tuning for an [`AssertionRunner`]
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Assertions executing at once
    pub workers: usize,

    /// Deadline of one attempt (session checkout, `USE`, query)
    pub assertion_timeout: Duration,

    /// Extra attempts after `no rows` or a mismatch
    pub max_retries: usize,

    /// Delay before the first retry, doubled for each further retry
    pub retry_delay: Duration,

    /// Maximum pinned sessions of the pool opened by `start`
    pub max_sessions: usize,

    /// Hosts `start` accepts; empty accepts any
    pub safe_hostnames: Vec<String>,

    /// Gate run before any assertion
    pub sync: SyncGate,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            assertion_timeout: DEFAULT_ASSERTION_TIMEOUT,
            max_retries: 0,
            retry_delay: Duration::from_secs(2),
            max_sessions: 16,
            safe_hostnames: Vec::new(),
            sync: SyncGate::default(),
        }
    }
}

impl RunnerOptions {
    /// Options taken from the harness configuration
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            workers: config.workers,
            assertion_timeout: config.assertion_timeout,
            max_retries: config.assertion_max_retries,
            retry_delay: config.assertion_retry_delay,
            max_sessions: config.max_sessions,
            safe_hostnames: config.safe_hostnames.clone(),
            sync: SyncGate::from_config(config),
        }
    }
}

enum PoolSource {
    Dsn(String),
    Provided(Arc<dyn Database>),
}

/// Runs assertions against derived databases.
///
/// Call [`start`](Self::start) before [`run`](Self::run) and
/// [`stop`](Self::stop) when done.
pub struct AssertionRunner {
    source: PoolSource,
    options: RunnerOptions,
    db: Option<Arc<dyn Database>>,
}

impl AssertionRunner {
    /// Runner that opens a ClickHouse pool for `connection` on start
    pub fn new(connection: impl Into<String>, options: RunnerOptions) -> Self {
        Self {
            source: PoolSource::Dsn(connection.into()),
            options,
            db: None,
        }
    }

    /// Runner for the derived cluster of `config`
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(config.derived_connection.clone(), RunnerOptions::from_config(config))
    }

    /// Runner over an already opened pool
    pub fn with_database(db: Arc<dyn Database>, options: RunnerOptions) -> Self {
        Self {
            source: PoolSource::Provided(db),
            options,
            db: None,
        }
    }

    /// Open the pool, ping it and check the host whitelist
    pub async fn start(&mut self) -> AssertResult<()> {
        let db: Arc<dyn Database> = match &self.source {
            PoolSource::Dsn(dsn) => {
                let options = ClickHouseOptions {
                    max_sessions: self.options.max_sessions,
                    ..Default::default()
                };
                Arc::new(ClickHouseBackend::open(dsn, options).map_err(AssertError::Connect)?)
            }
            PoolSource::Provided(db) => Arc::clone(db),
        };

        let checked = async {
            db.ping().await?;
            verify_safe_host(db.as_ref(), &self.options.safe_hostnames).await
        };
        if let Err(e) = checked.await {
            if let Err(close_err) = db.close().await {
                log::warn!("Failed to close assertion pool after failed start: {}", close_err);
            }
            return Err(AssertError::Connect(e));
        }

        log::debug!("Assertion runner connected ({})", db.db_type());
        self.db = Some(db);
        Ok(())
    }

    /// Close the pool
    pub async fn stop(&mut self) -> AssertResult<()> {
        if let Some(db) = self.db.take() {
            db.close().await.map_err(AssertError::Connect)?;
        }
        Ok(())
    }

    /// Wait for replication, then run `assertions` against `database`.
    ///
    /// Results are returned in input order. Individual failures are recorded
    /// in the result set; only a sync failure or cancellation aborts the run.
    pub async fn run(
        &self,
        database: &str,
        assertions: &[Assertion],
        cancel: &CancellationToken,
    ) -> AssertResult<RunResult> {
        let db = self.db.clone().ok_or(AssertError::NotStarted)?;
        let started = Instant::now();

        self.options
            .sync
            .wait_for_sync(db.as_ref(), database, cancel)
            .await?;

        let semaphore = Arc::new(Semaphore::new(self.options.workers.max(1)));
        let group = cancel.child_token();
        let database: Arc<str> = Arc::from(database);

        let mut handles = Vec::with_capacity(assertions.len());
        for assertion in assertions {
            let assertion = assertion.clone();
            let db = Arc::clone(&db);
            let semaphore = Arc::clone(&semaphore);
            let group = group.clone();
            let database = Arc::clone(&database);
            let options = self.options.clone();

            handles.push(tokio::spawn(async move {
                let _permit = tokio::select! {
                    biased;
                    _ = group.cancelled() => {
                        return AssertionResult::error(
                            &assertion.name,
                            assertion.expected.clone(),
                            AssertionError::Cancelled,
                            Duration::ZERO,
                            0,
                        );
                    }
                    permit = semaphore.acquire_owned() => permit,
                };
                execute_assertion(db.as_ref(), &database, &assertion, &options, &group).await
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (handle, assertion) in handles.into_iter().zip(assertions) {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => AssertionResult::error(
                    &assertion.name,
                    assertion.expected.clone(),
                    AssertionError::Query(format!("assertion task failed: {e}")),
                    Duration::ZERO,
                    0,
                ),
            };
            results.push(result);
        }

        if cancel.is_cancelled() {
            return Err(AssertError::Cancelled);
        }

        let run = RunResult::from_results(&database, results, started.elapsed());
        log::info!(
            "Assertions on {}: {} passed, {} failed, {} total in {:?}",
            run.database,
            run.passed,
            run.failed,
            run.total,
            run.duration
        );
        Ok(run)
    }
}

/// Run one assertion, retrying `no rows` and mismatches when configured
async fn execute_assertion(
    db: &dyn Database,
    database: &str,
    assertion: &Assertion,
    options: &RunnerOptions,
    cancel: &CancellationToken,
) -> AssertionResult {
    let started = Instant::now();
    let sql = assertion.render_sql(database);
    let mut delay = options.retry_delay;
    let mut attempt = 0;

    loop {
        attempt += 1;
        let can_retry = attempt <= options.max_retries;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AssertionError::Cancelled),
            read = tokio::time::timeout(options.assertion_timeout, fetch_first_row(db, database, &sql)) => {
                read.unwrap_or(Err(AssertionError::Timeout(options.assertion_timeout)))
            }
        };

        let result = match outcome {
            Ok(actual) => match evaluate(assertion, &actual) {
                Ok(()) => {
                    return finish(AssertionResult::pass(
                        &assertion.name,
                        assertion.expected.clone(),
                        actual,
                        started.elapsed(),
                        attempt,
                    ))
                }
                Err(problems) => AssertionResult::fail(
                    &assertion.name,
                    assertion.expected.clone(),
                    actual,
                    &problems,
                    started.elapsed(),
                    attempt,
                ),
            },
            Err(AssertionError::NoRows) => AssertionResult::error(
                &assertion.name,
                assertion.expected.clone(),
                AssertionError::NoRows,
                started.elapsed(),
                attempt,
            ),
            Err(e) => {
                return finish(AssertionResult::error(
                    &assertion.name,
                    assertion.expected.clone(),
                    e,
                    started.elapsed(),
                    attempt,
                ))
            }
        };

        if !can_retry {
            return finish(result);
        }

        log::debug!(
            "Assertion '{}' attempt {} did not pass, retrying in {:?}",
            assertion.name,
            attempt,
            delay
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return finish(AssertionResult::error(
                    &assertion.name,
                    assertion.expected.clone(),
                    AssertionError::Cancelled,
                    started.elapsed(),
                    attempt,
                ));
            }
            _ = tokio::time::sleep(delay) => {}
        }
        delay = delay.saturating_mul(2);
    }
}

fn finish(result: AssertionResult) -> AssertionResult {
    log::debug!(
        "Assertion '{}' {} in {:?}",
        result.name,
        result.status,
        result.duration
    );
    result
}

/// `USE <database>` and the query on one pinned session; first row only
async fn fetch_first_row(
    db: &dyn Database,
    database: &str,
    sql: &str,
) -> Result<ActualRow, AssertionError> {
    let query_err = |e: ct_db::DbError| AssertionError::Query(e.to_string());

    let mut session = db.acquire().await.map_err(query_err)?;
    session
        .execute(Statement::new(format!("USE {}", quote_ident(database))))
        .await
        .map_err(query_err)?;
    let result = session
        .query(Statement::new(sql))
        .await
        .map_err(query_err)?;
    drop(session);

    first_row(&result)
}

/// Normalize the first row into column name to JSON value
fn first_row(result: &QueryResult) -> Result<ActualRow, AssertionError> {
    let row = result.first_row().ok_or(AssertionError::NoRows)?;
    if row.len() != result.columns.len() {
        return Err(AssertionError::Scan(format!(
            "{} cells for {} columns",
            row.len(),
            result.columns.len()
        )));
    }

    let mut actual = ActualRow::new();
    for (column, cell) in result.columns.iter().zip(row) {
        let value = match cell {
            Datum::Bytes(bytes) => String::from_utf8(bytes.clone())
                .map(serde_json::Value::String)
                .map_err(|e| AssertionError::Scan(format!("column `{}`: {e}", column.name)))?,
            Datum::Value(v) => v.clone(),
        };
        actual.insert(column.name.clone(), value);
    }
    Ok(actual)
}

#[cfg(test)]
#[path = "runner_test.rs"]
mod tests;

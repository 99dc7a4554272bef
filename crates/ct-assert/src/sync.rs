//! Replication sync gate
//!
//! Blocks until the cluster's replication queue holds no entries for a
//! database, the gate's deadline passes, or the caller cancels.

use crate::error::{AssertError, AssertResult};
use ct_core::config::{
    DEFAULT_REPLICATION_QUEUE_TABLE, DEFAULT_SYNC_MAX_WAIT, DEFAULT_SYNC_POLL_INTERVAL,
};
use ct_core::HarnessConfig;
use ct_db::{Database, DbError, Statement};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Polls the replication queue until it drains
#[derive(Debug, Clone)]
pub struct SyncGate {
    queue_table: String,
    poll_interval: Duration,
    max_wait: Duration,
}

impl Default for SyncGate {
    fn default() -> Self {
        Self::new(
            DEFAULT_REPLICATION_QUEUE_TABLE,
            DEFAULT_SYNC_POLL_INTERVAL,
            DEFAULT_SYNC_MAX_WAIT,
        )
    }
}

impl SyncGate {
    /// Create a gate polling `queue_table`
    pub fn new(queue_table: impl Into<String>, poll_interval: Duration, max_wait: Duration) -> Self {
        Self {
            queue_table: queue_table.into(),
            poll_interval,
            max_wait,
        }
    }

    /// Gate configured from `sync_*` and `replication_queue_table`
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(
            config.replication_queue_table.clone(),
            config.sync_poll_interval,
            config.sync_max_wait,
        )
    }

    /// Upper bound on waiting
    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    fn pending_statement(&self, database: &str) -> Statement {
        Statement::new(format!(
            "SELECT count() FROM {} WHERE database = {{database:String}}",
            self.queue_table
        ))
        .bind("database", database)
    }

    /// Wait until the replication queue for `database` is empty.
    ///
    /// Checks immediately, then once per poll interval. A failed queue read
    /// ends the wait at once.
    pub async fn wait_for_sync(
        &self,
        db: &dyn Database,
        database: &str,
        cancel: &CancellationToken,
    ) -> AssertResult<()> {
        let started = Instant::now();
        let deadline = started + self.max_wait;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AssertError::Cancelled),
                read = tokio::time::timeout(
                    remaining.max(self.poll_interval),
                    db.query(self.pending_statement(database)),
                ) => read,
            };
            let sync_err = |source| AssertError::SyncQuery {
                database: database.to_string(),
                source,
            };
            let result = match read {
                Ok(result) => result.map_err(sync_err)?,
                Err(_) => return Err(sync_err(DbError::Timeout(remaining.max(self.poll_interval)))),
            };
            let pending = result.first_u64().map_err(sync_err)?;

            if pending == 0 {
                log::debug!(
                    "Replication queue for {} drained after {:?}",
                    database,
                    started.elapsed()
                );
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(AssertError::SyncTimeout {
                    database: database.to_string(),
                    pending,
                    waited: self.max_wait,
                });
            }

            log::debug!("{} replication entries pending for {}", pending, database);
            let pause = self.poll_interval.min(deadline - now);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AssertError::Cancelled),
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
}

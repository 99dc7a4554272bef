//! Parallel parquet ingestion into replicated `_local` tables
//!
//! Every fixture table is first truncated cluster-wide, then a fixed pool of
//! workers drains a shared job queue, inserting each parquet file with
//! `INSERT INTO <db>.<table>_local SELECT * FROM file(...)`.

use crate::error::{HarnessError, HarnessResult};
use ct_core::config::{DEFAULT_LOAD_WORKERS, DEFAULT_QUERY_TIMEOUT};
use ct_core::sql_utils::{escape_sql_string, on_cluster, quote_qualified};
use ct_core::{ClusterName, DatabaseName, FixtureSet, HarnessConfig, TableName};
use ct_db::{cancellable, with_deadline, Database, Statement};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Loads fixture sets into the source cluster
#[derive(Debug, Clone)]
pub struct BulkLoader {
    cluster: ClusterName,
    database: DatabaseName,
    workers: usize,
    statement_timeout: Duration,
}

struct Job {
    table: TableName,
    path: PathBuf,
}

impl BulkLoader {
    /// Loader targeting `default` on `cluster`
    pub fn new(cluster: ClusterName) -> Self {
        Self {
            cluster,
            database: DatabaseName::default_database(),
            workers: DEFAULT_LOAD_WORKERS,
            statement_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    /// Loader for the source cluster of `config`
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(config.source_cluster_name.clone())
            .with_workers(config.load_workers)
            .with_statement_timeout(config.query_timeout)
    }

    /// Set the number of concurrent insert workers
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set the per-statement deadline
    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }

    /// Cluster-wide synchronous truncate of the table's `_local` sibling
    pub fn truncate_sql(&self, table: &TableName) -> String {
        format!(
            "TRUNCATE TABLE {} {} SYNC",
            quote_qualified(self.database.as_str(), &table.local()),
            on_cluster(self.cluster.as_str())
        )
    }

    /// Insert of one parquet file into the table's `_local` sibling
    pub fn insert_sql(&self, table: &TableName, path: &std::path::Path) -> String {
        format!(
            "INSERT INTO {} SELECT * FROM file('{}', Parquet)",
            quote_qualified(self.database.as_str(), &table.local()),
            escape_sql_string(&path.to_string_lossy())
        )
    }

    /// Truncate then load every table of `fixtures`.
    ///
    /// Truncate failures are logged and skipped. The first insert failure
    /// is returned once all workers have stopped.
    pub async fn load(
        &self,
        db: Arc<dyn Database>,
        fixtures: &FixtureSet,
        cancel: &CancellationToken,
    ) -> HarnessResult<()> {
        if fixtures.is_empty() {
            log::debug!("No fixtures to load");
            return Ok(());
        }
        let started = Instant::now();

        for (table, _) in fixtures {
            let sql = self.truncate_sql(table);
            log::debug!("{}", sql);
            let result = cancellable(
                cancel,
                with_deadline(self.statement_timeout, db.execute(Statement::new(sql))),
            )
            .await;
            if let Err(e) = result {
                log::warn!("Failed to truncate {} (non-fatal): {}", table.local(), e);
            }
        }

        let queue: VecDeque<Job> = fixtures
            .iter()
            .map(|(table, path)| Job {
                table: table.clone(),
                path: path.clone(),
            })
            .collect();
        let worker_count = self.workers.min(queue.len());
        let queue = Arc::new(Mutex::new(queue));
        let (err_tx, mut err_rx) = mpsc::channel::<HarnessError>(worker_count);

        let mut handles = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let queue = Arc::clone(&queue);
            let db = Arc::clone(&db);
            let err_tx = err_tx.clone();
            let cancel = cancel.clone();
            let loader = self.clone();

            handles.push(tokio::spawn(async move {
                loop {
                    let next = queue.lock().unwrap_or_else(|p| p.into_inner()).pop_front();
                    let Some(job) = next else {
                        return;
                    };
                    let sql = loader.insert_sql(&job.table, &job.path);
                    log::debug!("{}", sql);
                    let result = cancellable(
                        &cancel,
                        with_deadline(loader.statement_timeout, db.execute(Statement::new(sql))),
                    )
                    .await;
                    if let Err(source) = result {
                        let _ = err_tx
                            .send(HarnessError::Ingest {
                                table: job.table.to_string(),
                                source,
                            })
                            .await;
                        return;
                    }
                }
            }));
        }
        drop(err_tx);

        for handle in handles {
            if let Err(e) = handle.await {
                log::warn!("Fixture load task join error: {}", e);
            }
        }

        if let Some(err) = err_rx.recv().await {
            return Err(err);
        }

        log::info!(
            "Loaded {} fixture table(s) into {} in {:?}",
            fixtures.len(),
            self.database,
            started.elapsed()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_statement_shapes() {
        let loader = BulkLoader::new(ClusterName::new("xatu_cluster"));
        let table = TableName::new("beacon_api_eth_v1_events_block");
        assert_eq!(
            loader.truncate_sql(&table),
            "TRUNCATE TABLE `default`.`beacon_api_eth_v1_events_block_local` ON CLUSTER `xatu_cluster` SYNC"
        );
        assert_eq!(
            loader.insert_sql(&table, Path::new("/data/it's.parquet")),
            "INSERT INTO `default`.`beacon_api_eth_v1_events_block_local` SELECT * FROM file('/data/it\\'s.parquet', Parquet)"
        );
    }

    #[test]
    fn test_workers_floor_at_one() {
        let loader = BulkLoader::new(ClusterName::new("c")).with_workers(0);
        assert_eq!(loader.workers, 1);
    }
}

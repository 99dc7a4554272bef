//! Source and derived cluster lifecycle
//!
//! The source cluster is prepared once per suite: supporting databases are
//! created, and unless the migration state shows the cluster is already
//! prepared, its user objects are cleared and the source migrations re-run.
//! Each test case then gets its own derived database, created with
//! [`DatabaseManager::create_derived`] and removed with
//! [`DatabaseManager::drop_derived`].

use crate::error::{HarnessError, HarnessResult};
use crate::loader::BulkLoader;
use crate::naming::generate_name;
use ct_core::sql_utils::{on_cluster, quote_ident, quote_qualified};
use ct_core::{ClusterName, DatabaseName, FixtureSet, HarnessConfig, ObjectKind};
use ct_db::{
    cancellable, verify_safe_host, with_deadline, ClickHouseBackend, ClickHouseOptions, Database,
    DbResult, Statement,
};
use ct_migrate::{FileMigrationRunner, MigrationRunner, MigrationSource};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Databases that must exist on the source cluster
pub const SOURCE_DATABASES: [&str; 4] = ["default", "tmp", "admin", "dbt"];

/// Source databases whose objects are dropped before re-migrating
pub const CLEARED_DATABASES: [&str; 3] = ["default", "admin", "dbt"];

/// What [`DatabaseManager::prepare_source`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareOutcome {
    /// Migration state showed the cluster was already prepared
    Skipped,
    /// The cluster was cleared and migrated
    Prepared,
}

enum Pools {
    Dsn,
    Provided {
        source: Arc<dyn Database>,
        derived: Arc<dyn Database>,
    },
}

/// Manages both clusters for a test suite.
///
/// Call [`start`](Self::start) before any other operation and
/// [`stop`](Self::stop) when the suite is done.
pub struct DatabaseManager {
    config: HarnessConfig,
    pools: Pools,
    source: Option<Arc<dyn Database>>,
    derived: Option<Arc<dyn Database>>,
    source_migrations: Arc<dyn MigrationRunner>,
    derived_migrations: Arc<dyn MigrationRunner>,
    loader: BulkLoader,
}

impl DatabaseManager {
    /// Manager that opens ClickHouse pools for the configured connections.
    ///
    /// Migration directories are read here so that a broken migration set
    /// fails before any cluster is touched.
    pub fn new(config: HarnessConfig) -> HarnessResult<Self> {
        let source_migrations = file_runner(&config, config.source_migration_dir.as_deref())?;
        let derived_migrations = file_runner(&config, config.derived_migration_dir.as_deref())?;
        Ok(Self::build(config, Pools::Dsn, source_migrations, derived_migrations))
    }

    /// Manager over already opened pools, with no migrations.
    ///
    /// Use [`with_source_migrations`](Self::with_source_migrations) and
    /// [`with_derived_migrations`](Self::with_derived_migrations) to attach
    /// runners.
    pub fn with_databases(
        config: HarnessConfig,
        source: Arc<dyn Database>,
        derived: Arc<dyn Database>,
    ) -> Self {
        let empty: Arc<dyn MigrationRunner> =
            Arc::new(FileMigrationRunner::new(MigrationSource::default()));
        Self::build(
            config,
            Pools::Provided { source, derived },
            Arc::clone(&empty),
            empty,
        )
    }

    fn build(
        config: HarnessConfig,
        pools: Pools,
        source_migrations: Arc<dyn MigrationRunner>,
        derived_migrations: Arc<dyn MigrationRunner>,
    ) -> Self {
        let loader = BulkLoader::from_config(&config);
        Self {
            config,
            pools,
            source: None,
            derived: None,
            source_migrations,
            derived_migrations,
            loader,
        }
    }

    /// Replace the runner applied to the source `default` database
    pub fn with_source_migrations(mut self, runner: Arc<dyn MigrationRunner>) -> Self {
        self.source_migrations = runner;
        self
    }

    /// Replace the runner applied to every derived database
    pub fn with_derived_migrations(mut self, runner: Arc<dyn MigrationRunner>) -> Self {
        self.derived_migrations = runner;
        self
    }

    /// Configuration the manager was built with
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Source cluster pool
    pub fn source(&self) -> HarnessResult<Arc<dyn Database>> {
        self.source.clone().ok_or(HarnessError::NotStarted)
    }

    /// Derived cluster pool
    pub fn derived(&self) -> HarnessResult<Arc<dyn Database>> {
        self.derived.clone().ok_or(HarnessError::NotStarted)
    }

    /// Open and verify both pools.
    ///
    /// If the derived pool cannot be opened the source pool is closed again.
    pub async fn start(&mut self) -> HarnessResult<()> {
        let (source, derived) = match &self.pools {
            Pools::Dsn => (
                open_pool(&self.config.source_connection, self.config.max_sessions)
                    .map_err(|source| HarnessError::Connect { cluster: "source", source })?,
                None,
            ),
            Pools::Provided { source, derived } => (Arc::clone(source), Some(Arc::clone(derived))),
        };
        self.verify(&source, "source").await?;

        let derived = match derived {
            Some(db) => Ok(db),
            None => open_pool(&self.config.derived_connection, self.config.max_sessions)
                .map_err(|source| HarnessError::Connect { cluster: "derived", source }),
        };
        let verified = match derived {
            Ok(db) => self.verify(&db, "derived").await.map(|_| db),
            Err(e) => Err(e),
        };
        let derived = match verified {
            Ok(db) => db,
            Err(e) => {
                if let Err(close_err) = source.close().await {
                    log::warn!("Failed to close source pool after failed start: {}", close_err);
                }
                return Err(e);
            }
        };

        log::info!(
            "Database manager started (source: {}, derived: {})",
            source.db_type(),
            derived.db_type()
        );
        self.source = Some(source);
        self.derived = Some(derived);
        Ok(())
    }

    async fn verify(&self, db: &Arc<dyn Database>, cluster: &'static str) -> HarnessResult<()> {
        let checked = async {
            db.ping().await?;
            verify_safe_host(db.as_ref(), &self.config.safe_hostnames).await
        };
        if let Err(source) = checked.await {
            if let Err(close_err) = db.close().await {
                log::warn!("Failed to close {} pool after failed start: {}", cluster, close_err);
            }
            return Err(HarnessError::Connect { cluster, source });
        }
        Ok(())
    }

    /// Close both pools, reporting every close failure together
    pub async fn stop(&mut self) -> HarnessResult<()> {
        let mut errors = Vec::new();
        for db in [self.source.take(), self.derived.take()].into_iter().flatten() {
            if let Err(e) = db.close().await {
                errors.push(e);
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(HarnessError::Shutdown { errors })
        }
    }

    /// Make the source cluster ready for fixture loading.
    ///
    /// Supporting databases are always created (idempotently). The clear and
    /// migrate steps run only when the cluster is not yet prepared or
    /// `force_rebuild` is set.
    pub async fn prepare_source(
        &self,
        network: &str,
        cancel: &CancellationToken,
    ) -> HarnessResult<PrepareOutcome> {
        let db = self.source()?;
        let cluster = &self.config.source_cluster_name;

        for database in SOURCE_DATABASES {
            let sql = format!(
                "CREATE DATABASE IF NOT EXISTS {} {}",
                quote_ident(database),
                on_cluster(cluster.as_str())
            );
            self.execute_ddl(db.as_ref(), sql, cancel).await?;
        }

        if !self.config.force_rebuild && self.is_source_prepared().await? {
            log::info!("Source cluster already prepared for {}, skipping", network);
            return Ok(PrepareOutcome::Skipped);
        }

        for database in CLEARED_DATABASES {
            self.clear_database(db.as_ref(), database, cancel).await?;
        }

        let target = DatabaseName::default_database();
        self.source_migrations
            .run_migrations(db.as_ref(), target.as_str(), cancel)
            .await
            .map_err(|source| HarnessError::Migration {
                database: target.to_string(),
                source,
            })?;

        log::info!("Source cluster prepared for {}", network);
        Ok(PrepareOutcome::Prepared)
    }

    /// Whether the source migration state table exists and has rows.
    ///
    /// Any query failure is treated as "not prepared".
    pub async fn is_source_prepared(&self) -> HarnessResult<bool> {
        let db = self.source()?;
        let table = self.config.migrations_table(DatabaseName::default_database().as_str());

        let exists = Statement::new(
            "SELECT name FROM system.tables WHERE database = 'default' AND name = {table:String}",
        )
        .bind("table", &table);
        match with_deadline(self.config.query_timeout, db.query(exists)).await {
            Ok(result) if !result.is_empty() => {}
            Ok(_) => {
                log::debug!("Migration state table {} does not exist", table);
                return Ok(false);
            }
            Err(e) => {
                log::debug!("Could not check for migration state table {}: {}", table, e);
                return Ok(false);
            }
        }

        let count = Statement::new(format!(
            "SELECT count() FROM {}",
            quote_qualified(DatabaseName::default_database().as_str(), &table)
        ));
        let rows = with_deadline(self.config.query_timeout, db.query(count))
            .await
            .and_then(|result| result.first_u64());
        match rows {
            Ok(n) => Ok(n > 0),
            Err(e) => {
                log::debug!("Could not count migration state rows in {}: {}", table, e);
                Ok(false)
            }
        }
    }

    fn is_migrations_table(&self, name: &str) -> bool {
        let prefix = &self.config.schema_migrations_prefix;
        name == prefix.trim_end_matches('_')
            || name == self.config.migrations_table(DatabaseName::default_database().as_str())
    }

    /// Drop every object in `database` on the source cluster.
    ///
    /// The migration state table survives unless `force_rebuild` is set.
    /// Individual drop failures are logged and skipped.
    async fn clear_database(
        &self,
        db: &dyn Database,
        database: &str,
        cancel: &CancellationToken,
    ) -> HarnessResult<()> {
        let listing = Statement::new(
            "SELECT name, engine FROM system.tables WHERE database = {database:String}",
        )
        .bind("database", database);
        let objects = cancellable(cancel, with_deadline(self.config.query_timeout, db.query(listing)))
            .await
            .map_err(|source| HarnessError::Ddl {
                statement: format!("list objects of {}", database),
                source,
            })?;

        let cluster = on_cluster(self.config.source_cluster_name.as_str());
        let mut dropped = 0usize;
        for row in &objects.rows {
            let (Some(name), Some(engine)) = (row.first(), row.get(1)) else {
                continue;
            };
            let name = name.to_text_lossy();
            if !self.config.force_rebuild && self.is_migrations_table(&name) {
                log::debug!("Keeping migration state table {}.{}", database, name);
                continue;
            }

            let kind = ObjectKind::from_engine(&engine.to_text_lossy());
            let sql = format!(
                "DROP {} IF EXISTS {} {} SYNC",
                kind.drop_keyword(),
                quote_qualified(database, &name),
                cluster
            );
            log::debug!("{}", sql);
            let result = cancellable(
                cancel,
                with_deadline(self.config.query_timeout, db.execute(Statement::new(sql))),
            )
            .await;
            match result {
                Ok(()) => dropped += 1,
                Err(e) => log::warn!("Failed to drop {} {}.{} (non-fatal): {}", kind, database, name, e),
            }
        }

        log::debug!("Cleared {} object(s) from {}", dropped, database);
        Ok(())
    }

    /// Load `fixtures` into the source cluster
    pub async fn load_fixtures(
        &self,
        network: &str,
        fixtures: &FixtureSet,
        cancel: &CancellationToken,
    ) -> HarnessResult<()> {
        let db = self.source()?;
        log::info!("Loading {} fixture table(s) for {}", fixtures.len(), network);
        self.loader.load(db, fixtures, cancel).await
    }

    /// Create and migrate a fresh derived database, returning its name.
    ///
    /// If migrations fail the database is dropped before the error is returned.
    pub async fn create_derived(
        &self,
        network: &str,
        spec: &str,
        cancel: &CancellationToken,
    ) -> HarnessResult<String> {
        let db = self.derived()?;
        let name = generate_name(network, spec);

        let sql = format!(
            "CREATE DATABASE {} {}",
            quote_ident(&name),
            on_cluster(self.config.derived_cluster_name.as_str())
        );
        self.execute_ddl(db.as_ref(), sql, cancel).await?;

        if let Err(source) = self
            .derived_migrations
            .run_migrations(db.as_ref(), &name, cancel)
            .await
        {
            if let Err(drop_err) = self.drop_derived(&name).await {
                log::warn!("Failed to drop {} after failed migrations: {}", name, drop_err);
            }
            return Err(HarnessError::Migration {
                database: name,
                source,
            });
        }

        log::info!("Derived database {} ready", name);
        Ok(name)
    }

    /// Drop a derived database and its migration state table.
    ///
    /// Failure to drop the state table is logged and ignored.
    pub async fn drop_derived(&self, name: &str) -> HarnessResult<()> {
        let db = self.derived()?;
        drop_derived_database(
            db.as_ref(),
            &self.config.derived_cluster_name,
            &self.config.migrations_table(name),
            name,
            self.config.query_timeout,
        )
        .await
    }

    /// Run `f` against a fresh derived database, dropping it afterwards.
    ///
    /// The database is dropped whatever `f` returns. If the returned future
    /// is dropped before completion, the drop is spawned onto the current
    /// runtime.
    pub async fn with_derived_database<F, Fut, T, E>(
        &self,
        network: &str,
        spec: &str,
        cancel: &CancellationToken,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<HarnessError>,
    {
        let name = self.create_derived(network, spec, cancel).await?;
        let mut guard = DropOnExit {
            db: Some(self.derived()?),
            cluster: self.config.derived_cluster_name.clone(),
            state_table: self.config.migrations_table(&name),
            name: name.clone(),
            timeout: self.config.query_timeout,
        };

        let result = f(name.clone()).await;

        guard.db = None;
        if let Err(e) = self.drop_derived(&name).await {
            log::warn!("Failed to drop derived database {}: {}", name, e);
        }
        result
    }

    async fn execute_ddl(
        &self,
        db: &dyn Database,
        sql: String,
        cancel: &CancellationToken,
    ) -> HarnessResult<()> {
        log::debug!("{}", sql);
        cancellable(
            cancel,
            with_deadline(self.config.query_timeout, db.execute(Statement::new(sql.as_str()))),
        )
        .await
        .map_err(|source| HarnessError::Ddl {
            statement: sql,
            source,
        })
    }
}

fn file_runner(
    config: &HarnessConfig,
    dir: Option<&std::path::Path>,
) -> HarnessResult<Arc<dyn MigrationRunner>> {
    let runner = match dir {
        Some(dir) => FileMigrationRunner::from_dir(dir).map_err(HarnessError::MigrationSource)?,
        None => FileMigrationRunner::new(MigrationSource::default()),
    };
    Ok(Arc::new(
        runner
            .with_table_prefix(config.schema_migrations_prefix.clone())
            .with_statement_timeout(config.query_timeout),
    ))
}

fn open_pool(dsn: &str, max_sessions: usize) -> DbResult<Arc<dyn Database>> {
    let options = ClickHouseOptions {
        max_sessions,
        ..Default::default()
    };
    Ok(Arc::new(ClickHouseBackend::open(dsn, options)?))
}

async fn drop_derived_database(
    db: &dyn Database,
    cluster: &ClusterName,
    state_table: &str,
    name: &str,
    timeout: Duration,
) -> HarnessResult<()> {
    let sql = format!(
        "DROP DATABASE IF EXISTS {} {}",
        quote_ident(name),
        on_cluster(cluster.as_str())
    );
    log::debug!("{}", sql);
    with_deadline(timeout, db.execute(Statement::new(sql.as_str())))
        .await
        .map_err(|source| HarnessError::Ddl {
            statement: sql,
            source,
        })?;

    let sql = format!(
        "DROP TABLE IF EXISTS {}",
        quote_qualified(DatabaseName::default_database().as_str(), state_table)
    );
    log::debug!("{}", sql);
    if let Err(e) = with_deadline(timeout, db.execute(Statement::new(sql))).await {
        log::warn!("Failed to drop migration state table {} (non-fatal): {}", state_table, e);
    }

    log::info!("Derived database {} dropped", name);
    Ok(())
}

/// Drops a derived database if the owning future is abandoned
struct DropOnExit {
    db: Option<Arc<dyn Database>>,
    cluster: ClusterName,
    state_table: String,
    name: String,
    timeout: Duration,
}

impl Drop for DropOnExit {
    fn drop(&mut self) {
        let Some(db) = self.db.take() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            log::warn!("No runtime to drop abandoned derived database {}", self.name);
            return;
        };
        let cluster = self.cluster.clone();
        let state_table = std::mem::take(&mut self.state_table);
        let name = std::mem::take(&mut self.name);
        let timeout = self.timeout;
        handle.spawn(async move {
            if let Err(e) =
                drop_derived_database(db.as_ref(), &cluster, &state_table, &name, timeout).await
            {
                log::warn!("Failed to drop abandoned derived database {}: {}", name, e);
            }
        });
    }
}

#[cfg(test)]
#[path = "manager_test.rs"]
mod tests;

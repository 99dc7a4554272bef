//! Migration runner contract and the file-backed implementation.
//!
//! Applied versions are tracked in `default.<prefix><database>`; each run
//! applies only versions missing from that table, so repeated runs converge.

use crate::error::{MigrateError, MigrateResult};
use crate::source::MigrationSource;
use crate::split::split_statements;
use async_trait::async_trait;
use ct_core::config::DEFAULT_SCHEMA_MIGRATIONS_PREFIX;
use ct_core::sql_utils::{quote_ident, quote_qualified};
use ct_core::DatabaseName;
use ct_db::{with_deadline, Database, DbError, Session, Statement};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Applies schema migrations into a named database
#[async_trait]
pub trait MigrationRunner: Send + Sync {
    /// Apply every unapplied migration to `database`.
    ///
    /// Must be idempotent with respect to the runner's persisted state.
    async fn run_migrations(
        &self,
        db: &dyn Database,
        database: &str,
        cancel: &CancellationToken,
    ) -> MigrateResult<()>;
}

/// Runner backed by a directory of `<version>_<name>.up.sql` files
#[derive(Debug, Clone)]
pub struct FileMigrationRunner {
    source: MigrationSource,
    table_prefix: String,
    statement_timeout: Duration,
}

/// Versions recorded in a state table
#[derive(Debug, Default)]
struct AppliedVersions {
    clean: BTreeSet<u64>,
    dirty: BTreeSet<u64>,
}

impl FileMigrationRunner {
    /// Runner over migrations already loaded into `source`
    pub fn new(source: MigrationSource) -> Self {
        Self {
            source,
            table_prefix: DEFAULT_SCHEMA_MIGRATIONS_PREFIX.to_string(),
            statement_timeout: Duration::from_secs(5 * 60),
        }
    }

    /// Runner over the migrations in `dir`
    pub fn from_dir(dir: &Path) -> MigrateResult<Self> {
        Ok(Self::new(MigrationSource::load(dir)?))
    }

    /// Override the state table prefix
    pub fn with_table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = prefix.into();
        self
    }

    /// Override the per-statement deadline
    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }

    /// Number of migrations this runner knows about
    pub fn len(&self) -> usize {
        self.source.len()
    }

    /// Whether the runner has no migrations
    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    /// Fully qualified state table for `database`
    pub fn state_table(&self, database: &str) -> String {
        quote_qualified(
            DatabaseName::default_database().as_str(),
            &format!("{}{}", self.table_prefix, database),
        )
    }

    async fn ensure_state_table(&self, session: &mut dyn Session, database: &str) -> MigrateResult<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (version Int64, dirty UInt8, applied_at DateTime DEFAULT now()) ENGINE = TinyLog",
            self.state_table(database)
        );
        with_deadline(self.statement_timeout, session.execute(Statement::new(sql)))
            .await
            .map_err(|source| MigrateError::State {
                database: database.to_string(),
                source,
            })
    }

    async fn applied_versions(
        &self,
        session: &mut dyn Session,
        database: &str,
    ) -> MigrateResult<AppliedVersions> {
        let sql = format!(
            "SELECT version, max(dirty = 0) AS clean FROM {} GROUP BY version ORDER BY version",
            self.state_table(database)
        );
        let result = with_deadline(self.statement_timeout, session.query(Statement::new(sql)))
            .await
            .map_err(|source| MigrateError::State {
                database: database.to_string(),
                source,
            })?;

        let mut applied = AppliedVersions::default();
        for row in &result.rows {
            let parsed = match row.as_slice() {
                [version, clean] => version.as_u64().zip(clean.as_u64()),
                _ => None,
            };
            let Some((version, clean)) = parsed else {
                return Err(MigrateError::State {
                    database: database.to_string(),
                    source: DbError::Decode(format!("unexpected state row {row:?}")),
                });
            };
            if clean == 1 {
                applied.clean.insert(version);
            } else {
                applied.dirty.insert(version);
            }
        }
        Ok(applied)
    }

    async fn record(
        &self,
        session: &mut dyn Session,
        database: &str,
        version: u64,
        dirty: bool,
    ) -> MigrateResult<()> {
        let stmt = Statement::new(format!(
            "INSERT INTO {} (version, dirty) VALUES ({{version:Int64}}, {{dirty:UInt8}})",
            self.state_table(database)
        ))
        .bind("version", version)
        .bind("dirty", u8::from(dirty));
        with_deadline(self.statement_timeout, session.execute(stmt))
            .await
            .map_err(|source| MigrateError::State {
                database: database.to_string(),
                source,
            })
    }
}

#[async_trait]
impl MigrationRunner for FileMigrationRunner {
    async fn run_migrations(
        &self,
        db: &dyn Database,
        database: &str,
        cancel: &CancellationToken,
    ) -> MigrateResult<()> {
        let cancelled = || MigrateError::Cancelled(database.to_string());
        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        log::debug!("Running migrations for {}", database);

        let mut session = db.acquire().await.map_err(|source| MigrateError::State {
            database: database.to_string(),
            source,
        })?;
        let session = session.as_mut();

        self.ensure_state_table(session, database).await?;
        let applied = self.applied_versions(session, database).await?;
        if let Some(&version) = applied.dirty.difference(&applied.clean).next() {
            return Err(MigrateError::Dirty {
                database: database.to_string(),
                version,
            });
        }

        let use_db = format!("USE {}", quote_ident(database));
        let mut session_in_target = false;
        let mut count = 0usize;

        for migration in self.source.migrations() {
            if applied.clean.contains(&migration.version) {
                continue;
            }

            let statements = split_statements(&migration.render(database));
            if statements.is_empty() {
                log::debug!(
                    "Migration {} ({}) is empty, recording as applied",
                    migration.version,
                    migration.name
                );
            }

            if !session_in_target && !statements.is_empty() {
                with_deadline(self.statement_timeout, session.execute(Statement::new(use_db.clone())))
                    .await
                    .map_err(|source| MigrateError::Statement {
                        database: database.to_string(),
                        version: migration.version,
                        name: migration.name.clone(),
                        source,
                    })?;
                session_in_target = true;
            }

            self.record(session, database, migration.version, true).await?;
            for sql in statements {
                if cancel.is_cancelled() {
                    return Err(cancelled());
                }
                log::debug!("Migration {}: {}", migration.version, sql);
                with_deadline(self.statement_timeout, session.execute(Statement::new(sql)))
                    .await
                    .map_err(|source| MigrateError::Statement {
                        database: database.to_string(),
                        version: migration.version,
                        name: migration.name.clone(),
                        source,
                    })?;
            }
            self.record(session, database, migration.version, false).await?;
            count += 1;
        }

        log::debug!("Applied {} migration(s) to {}", count, database);
        Ok(())
    }
}

#[cfg(test)]
#[path = "runner_test.rs"]
mod tests;

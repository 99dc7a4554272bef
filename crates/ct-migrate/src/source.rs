//! Migration file discovery and templating.

use crate::error::{MigrateError, MigrateResult};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Suffix of forward migration files
pub const UP_SUFFIX: &str = ".up.sql";

/// Placeholders replaced by the target database name
pub const PLACEHOLDERS: [&str; 2] = ["${NETWORK_NAME}", "${DATABASE}"];

/// Database whose migrations are applied untemplated
pub const NATIVE_DATABASE: &str = "default";

/// One forward migration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub version: u64,
    pub name: String,
    pub path: PathBuf,
    pub sql: String,
}

impl Migration {
    /// SQL with placeholders replaced by `database`
    pub fn render(&self, database: &str) -> String {
        if database == NATIVE_DATABASE {
            return self.sql.trim().to_string();
        }
        PLACEHOLDERS
            .iter()
            .fold(self.sql.clone(), |sql, placeholder| {
                sql.replace(placeholder, database)
            })
            .trim()
            .to_string()
    }
}

/// Migrations read from one directory, ordered by version
#[derive(Debug, Clone, Default)]
pub struct MigrationSource {
    migrations: Vec<Migration>,
}

/// Split `<version>_<name>.up.sql` into its parts
fn parse_file_name(file_name: &str) -> Option<(u64, String)> {
    let stem = file_name.strip_suffix(UP_SUFFIX)?;
    let (version, name) = stem.split_once('_')?;
    let version = version.parse().ok()?;
    Some((version, name.to_string()))
}

impl MigrationSource {
    /// Read every `*.up.sql` file in `dir` (not recursive).
    ///
    /// `.down.sql` and non-SQL files are ignored.
    pub fn load(dir: &Path) -> MigrateResult<Self> {
        let io_err = |e| MigrateError::Io {
            path: dir.display().to_string(),
            source: e,
        };
        let entries = std::fs::read_dir(dir).map_err(io_err)?;

        let mut by_version: BTreeMap<u64, Migration> = BTreeMap::new();
        for entry in entries {
            let path = entry.map_err(io_err)?.path();
            if !path.is_file() {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !file_name.ends_with(UP_SUFFIX) {
                log::debug!("Ignoring non-migration file {}", path.display());
                continue;
            }

            let (version, name) = parse_file_name(file_name)
                .ok_or_else(|| MigrateError::InvalidFileName(file_name.to_string()))?;
            if let Some(existing) = by_version.get(&version) {
                return Err(MigrateError::DuplicateVersion {
                    version,
                    first: existing.path.display().to_string(),
                    second: path.display().to_string(),
                });
            }

            let sql = std::fs::read_to_string(&path).map_err(|e| MigrateError::Io {
                path: path.display().to_string(),
                source: e,
            })?;
            by_version.insert(
                version,
                Migration {
                    version,
                    name,
                    path,
                    sql,
                },
            );
        }

        Ok(Self {
            migrations: by_version.into_values().collect(),
        })
    }

    /// Build a source from in-memory migrations
    pub fn from_migrations(mut migrations: Vec<Migration>) -> Self {
        migrations.sort_by_key(|m| m.version);
        Self { migrations }
    }

    /// Migrations in ascending version order
    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    /// Number of migrations
    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    /// Whether the directory had no migrations
    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, sql: &str) {
        std::fs::write(dir.join(name), sql).unwrap();
    }

    #[test]
    fn test_parse_file_name() {
        assert_eq!(
            parse_file_name("001_create_blocks.up.sql"),
            Some((1, "create_blocks".to_string()))
        );
        assert_eq!(parse_file_name("001_create_blocks.down.sql"), None);
        assert_eq!(parse_file_name("create_blocks.up.sql"), None);
        assert_eq!(parse_file_name("v1_x.up.sql"), None);
    }

    #[test]
    fn test_load_orders_by_version() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "010_second.up.sql", "SELECT 10");
        write(dir.path(), "002_first.up.sql", "SELECT 2");
        write(dir.path(), "002_first.down.sql", "DROP TABLE x");
        write(dir.path(), "README.md", "docs");

        let source = MigrationSource::load(dir.path()).unwrap();
        let versions: Vec<u64> = source.migrations().iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![2, 10]);
        assert_eq!(source.migrations()[0].name, "first");
    }

    #[test]
    fn test_duplicate_version_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "001_a.up.sql", "SELECT 1");
        write(dir.path(), "1_b.up.sql", "SELECT 1");
        let err = MigrationSource::load(dir.path()).unwrap_err();
        assert!(matches!(err, MigrateError::DuplicateVersion { version: 1, .. }));
    }

    #[test]
    fn test_bad_name_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "init.up.sql", "SELECT 1");
        assert!(matches!(
            MigrationSource::load(dir.path()),
            Err(MigrateError::InvalidFileName(_))
        ));
    }

    #[test]
    fn test_missing_dir() {
        assert!(matches!(
            MigrationSource::load(Path::new("/nonexistent/migrations")),
            Err(MigrateError::Io { .. })
        ));
    }

    #[test]
    fn test_render_templates_placeholders() {
        let m = Migration {
            version: 1,
            name: "t".to_string(),
            path: PathBuf::from("001_t.up.sql"),
            sql: "CREATE TABLE ${NETWORK_NAME}.t ENGINE = Distributed('{cluster}', ${DATABASE}, t_local)\n"
                .to_string(),
        };
        assert_eq!(
            m.render("test_mainnet_x"),
            "CREATE TABLE test_mainnet_x.t ENGINE = Distributed('{cluster}', test_mainnet_x, t_local)"
        );
        assert!(m.render("default").contains("${NETWORK_NAME}"));
    }
}

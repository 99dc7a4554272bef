//! Parquet fixture sets
//!
//! A fixture set maps a fixture table name to the parquet file loaded into
//! its replicated `<name>_local` sibling on the source cluster.

use crate::error::{CoreError, CoreResult};
use crate::table_name::TableName;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// File extension recognised by [`FixtureSet::discover`]
pub const PARQUET_EXTENSION: &str = "parquet";

/// Table name to parquet file path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixtureSet {
    files: BTreeMap<TableName, PathBuf>,
}

impl FixtureSet {
    /// Create an empty fixture set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the file for `table`
    pub fn insert(&mut self, table: TableName, path: impl Into<PathBuf>) -> Option<PathBuf> {
        self.files.insert(table, path.into())
    }

    /// Number of tables in the set
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the set has no tables
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Iterate tables and files in table-name order
    pub fn iter(&self) -> impl Iterator<Item = (&TableName, &PathBuf)> {
        self.files.iter()
    }

    /// Path registered for `table`
    pub fn get(&self, table: &str) -> Option<&PathBuf> {
        self.files.get(table)
    }

    /// Discover every `*.parquet` file below `dir`; the file stem names the table.
    ///
    /// Two files with the same stem in different subdirectories are rejected.
    pub fn discover(dir: &Path) -> CoreResult<Self> {
        if !dir.is_dir() {
            return Err(CoreError::InvalidFixture {
                path: dir.display().to_string(),
                reason: "not a directory".to_string(),
            });
        }

        let mut set = Self::new();
        discover_recursive(dir, &mut set)?;
        Ok(set)
    }
}

impl FromIterator<(TableName, PathBuf)> for FixtureSet {
    fn from_iter<I: IntoIterator<Item = (TableName, PathBuf)>>(iter: I) -> Self {
        Self {
            files: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a FixtureSet {
    type Item = (&'a TableName, &'a PathBuf);
    type IntoIter = std::collections::btree_map::Iter<'a, TableName, PathBuf>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.iter()
    }
}

fn discover_recursive(dir: &Path, set: &mut FixtureSet) -> CoreResult<()> {
    let entries = std::fs::read_dir(dir).map_err(|e| CoreError::IoWithPath {
        path: dir.display().to_string(),
        source: e,
    })?;

    for entry in entries.flatten() {
        let path = entry.path();

        if path.is_dir() {
            discover_recursive(&path, set)?;
            continue;
        }

        if path.extension().and_then(|e| e.to_str()) != Some(PARQUET_EXTENSION) {
            continue;
        }

        let Some(table) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|stem| TableName::try_new(stem))
        else {
            log::warn!("Skipping fixture with unusable name: {}", path.display());
            continue;
        };

        if let Some(previous) = set.files.get(&table) {
            return Err(CoreError::InvalidFixture {
                path: path.display().to_string(),
                reason: format!("table '{}' already provided by {}", table, previous.display()),
            });
        }
        set.files.insert(table, path);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discover_parquet_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("blocks.parquet"), b"PAR1").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/attestations.parquet"), b"PAR1").unwrap();

        let set = FixtureSet::discover(dir.path()).unwrap();
        let tables: Vec<&str> = set.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(tables, vec!["attestations", "blocks"]);
        assert!(set.get("blocks").unwrap().ends_with("blocks.parquet"));
    }

    #[test]
    fn test_discover_rejects_duplicate_stems() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("blocks.parquet"), b"PAR1").unwrap();
        std::fs::create_dir(dir.path().join("more")).unwrap();
        std::fs::write(dir.path().join("more/blocks.parquet"), b"PAR1").unwrap();

        let err = FixtureSet::discover(dir.path()).unwrap_err();
        assert!(err.to_string().contains("already provided"));
    }

    #[test]
    fn test_discover_missing_dir() {
        let err = FixtureSet::discover(Path::new("/nonexistent/fixtures")).unwrap_err();
        assert!(matches!(err, CoreError::InvalidFixture { .. }));
    }

    #[test]
    fn test_collect_from_pairs() {
        let set: FixtureSet = vec![
            (TableName::new("b"), PathBuf::from("/data/b.parquet")),
            (TableName::new("a"), PathBuf::from("/data/a.parquet")),
        ]
        .into_iter()
        .collect();
        assert_eq!(set.len(), 2);
        assert_eq!(set.iter().next().unwrap().0, "a");
    }
}

//! Drop dispatch for cluster metadata objects.

use std::fmt;

/// Engine reported by `system.tables` for materialized views
pub const MATERIALIZED_VIEW_ENGINE: &str = "MaterializedView";

/// Kind of a database object, derived from its `engine` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// Materialized view; dropped with `DROP VIEW`
    View,
    /// Any table engine; dropped with `DROP TABLE`
    Table,
}

impl ObjectKind {
    /// Classify an object by the engine string from cluster metadata
    pub fn from_engine(engine: &str) -> Self {
        if engine == MATERIALIZED_VIEW_ENGINE {
            ObjectKind::View
        } else {
            ObjectKind::Table
        }
    }

    /// SQL keyword following `DROP`
    pub fn drop_keyword(self) -> &'static str {
        match self {
            ObjectKind::View => "VIEW",
            ObjectKind::Table => "TABLE",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::View => write!(f, "view"),
            ObjectKind::Table => write!(f, "table"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_engine() {
        assert_eq!(ObjectKind::from_engine("MaterializedView"), ObjectKind::View);
        assert_eq!(ObjectKind::from_engine("ReplicatedMergeTree"), ObjectKind::Table);
        assert_eq!(ObjectKind::from_engine("Distributed"), ObjectKind::Table);
        assert_eq!(ObjectKind::from_engine("View"), ObjectKind::Table);
    }

    #[test]
    fn test_drop_keyword() {
        assert_eq!(ObjectKind::View.drop_keyword(), "VIEW");
        assert_eq!(ObjectKind::Table.drop_keyword(), "TABLE");
    }
}

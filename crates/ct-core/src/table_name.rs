//! Strongly-typed identifiers for databases, tables and clusters.

use crate::newtype_string::define_identifier;

define_identifier! {
    /// Name of a database on either cluster (e.g. `default`, or an ephemeral
    /// `test_mainnet_blocks_1717243200_9f86d081`).
    pub struct DatabaseName;
}

define_identifier! {
    /// Name of a fixture table, without the `_local` replication suffix.
    pub struct TableName;
}

define_identifier! {
    /// Cluster identifier used in `ON CLUSTER` clauses.
    pub struct ClusterName;
}

/// Suffix of the replicated sibling that receives direct writes.
pub const LOCAL_SUFFIX: &str = "_local";

impl TableName {
    /// Name of the replicated `<name>_local` sibling.
    pub fn local(&self) -> String {
        format!("{}{}", self.as_str(), LOCAL_SUFFIX)
    }
}

impl DatabaseName {
    /// The `default` database, which holds fixture tables and migration state.
    pub fn default_database() -> Self {
        Self::new("default")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_local_sibling() {
        let name = TableName::new("beacon_api_eth_v1_events_block");
        assert_eq!(name.local(), "beacon_api_eth_v1_events_block_local");
    }

    #[test]
    fn test_rejects_empty() {
        assert!(DatabaseName::try_new("").is_none());
        assert!(TableName::try_from("").is_err());
    }

    #[test]
    fn test_rejects_backtick() {
        assert!(DatabaseName::try_new("evil`; DROP DATABASE x").is_none());
    }

    #[test]
    fn test_rejects_control_characters() {
        assert!(ClusterName::try_new("cluster\n").is_none());
    }

    #[test]
    #[should_panic(expected = "must not be empty")]
    fn test_new_panics_on_empty() {
        let _ = TableName::new("");
    }

    #[test]
    fn test_comparisons() {
        let db = DatabaseName::default_database();
        assert_eq!(db, "default");
        assert_eq!(db, "default".to_string());
        assert_eq!(&*db, "default");
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: DatabaseName = serde_yaml::from_str("\"dbt\"").unwrap();
        assert_eq!(ok.as_str(), "dbt");

        let err = serde_yaml::from_str::<DatabaseName>("\"a`b\"").unwrap_err();
        assert!(err.to_string().contains("backtick"));
    }

    #[test]
    fn test_serialize_transparent() {
        let json = serde_json::to_string(&ClusterName::new("xatu_cluster")).unwrap();
        assert_eq!(json, "\"xatu_cluster\"");
    }
}

//! ClickHouse identifier quoting and DDL text builders
//!
//! Every statement the harness issues against a cluster is built here so
//! that quoting and `ON CLUSTER ... SYNC` placement stay consistent.

/// Quote a ClickHouse identifier with backticks.
///
/// Embedded backslashes and backticks are backslash-escaped.
///
/// # Examples
/// ```
/// use ct_core::sql_utils::quote_ident;
/// assert_eq!(quote_ident("blocks"), "`blocks`");
/// assert_eq!(quote_ident("we`ird"), "`we\\`ird`");
/// ```
pub fn quote_ident(ident: &str) -> String {
    format!("`{}`", ident.replace('\\', "\\\\").replace('`', "\\`"))
}

/// Quote a `database.object` pair.
///
/// # Examples
/// ```
/// use ct_core::sql_utils::quote_qualified;
/// assert_eq!(quote_qualified("default", "blocks_local"), "`default`.`blocks_local`");
/// ```
pub fn quote_qualified(database: &str, object: &str) -> String {
    format!("{}.{}", quote_ident(database), quote_ident(object))
}

/// Escape a value for use inside a single-quoted ClickHouse string literal.
pub fn escape_sql_string(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// `ON CLUSTER` clause for `cluster`
pub fn on_cluster(cluster: &str) -> String {
    format!("ON CLUSTER {}", quote_ident(cluster))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident_simple() {
        assert_eq!(quote_ident("default"), "`default`");
    }

    #[test]
    fn test_quote_ident_escapes() {
        assert_eq!(quote_ident("a`b"), "`a\\`b`");
        assert_eq!(quote_ident("a\\b"), "`a\\\\b`");
    }

    #[test]
    fn test_quote_qualified() {
        assert_eq!(quote_qualified("dbt", "x"), "`dbt`.`x`");
    }

    #[test]
    fn test_escape_sql_string() {
        assert_eq!(escape_sql_string("/data/o'brien.parquet"), "/data/o\\'brien.parquet");
        assert_eq!(escape_sql_string("C:\\x"), "C:\\\\x");
    }

    #[test]
    fn test_on_cluster() {
        assert_eq!(on_cluster("xatu_cluster"), "ON CLUSTER `xatu_cluster`");
    }
}

//! Host safety guard for destructive operations

use crate::error::{DbError, DbResult};
use crate::traits::Database;

/// Refuse to continue unless the server behind `db` is listed in `allowed`.
///
/// An empty list disables the check.
pub async fn verify_safe_host(db: &dyn Database, allowed: &[String]) -> DbResult<()> {
    if allowed.is_empty() {
        log::debug!("No safe hostnames configured, skipping host check");
        return Ok(());
    }

    let hostname = db.hostname().await?;
    if allowed.iter().any(|h| h == &hostname) {
        log::debug!("Host '{}' is whitelisted", hostname);
        return Ok(());
    }

    Err(DbError::UnsafeHost {
        hostname,
        allowed: allowed.to_vec(),
    })
}

#[cfg(all(test, feature = "test-support"))]
mod tests {
    use super::*;
    use crate::mock::MockDatabase;
    use crate::types::{Datum, QueryResult};

    fn db_on(host: &str) -> MockDatabase {
        let db = MockDatabase::new();
        db.when("hostName()")
            .returns(QueryResult::single_row(vec![("hostName()", Datum::text(host))]));
        db
    }

    #[tokio::test]
    async fn test_listed_host_passes() {
        let db = db_on("clickhouse-test-01");
        let allowed = vec!["clickhouse-test-01".to_string()];
        verify_safe_host(&db, &allowed).await.unwrap();
    }

    #[tokio::test]
    async fn test_unlisted_host_refused() {
        let db = db_on("prod-ch-07");
        let allowed = vec!["clickhouse-test-01".to_string()];
        let err = verify_safe_host(&db, &allowed).await.unwrap_err();
        assert!(matches!(err, DbError::UnsafeHost { ref hostname, .. } if hostname == "prod-ch-07"));
    }

    #[tokio::test]
    async fn test_empty_list_skips_query() {
        let db = db_on("anything");
        verify_safe_host(&db, &[]).await.unwrap();
        assert!(db.statements().is_empty());
    }
}

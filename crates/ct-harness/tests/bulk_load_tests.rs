//! Parallel fixture loading against a scripted cluster

use ct_core::{ClusterName, FixtureSet, TableName};
use ct_db::mock::MockDatabase;
use ct_db::DbError;
use ct_harness::{BulkLoader, HarnessError};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const INSERT_DELAY: Duration = Duration::from_millis(100);

fn fixtures(n: usize) -> FixtureSet {
    (0..n)
        .map(|i| {
            let name = format!("table_{i:02}");
            let path = PathBuf::from(format!("/fixtures/{name}.parquet"));
            (TableName::new(name), path)
        })
        .collect()
}

fn loader() -> BulkLoader {
    BulkLoader::new(ClusterName::new("xatu_cluster")).with_workers(10)
}

/// Twenty tables on ten workers finish in a fifth of the serial time
#[tokio::test(start_paused = true)]
async fn test_parallel_load_is_bounded_and_fast() {
    let db = MockDatabase::new();
    db.when("INSERT INTO").delays(INSERT_DELAY).succeeds();
    let set = fixtures(20);

    let started = Instant::now();
    loader()
        .load(Arc::new(db.clone()), &set, &CancellationToken::new())
        .await
        .unwrap();
    let elapsed = started.elapsed();

    let serial = INSERT_DELAY * 20;
    assert!(elapsed <= serial / 5, "took {elapsed:?}");
    assert_eq!(db.max_in_flight(), 10);
    for (table, _) in &set {
        assert_eq!(
            db.count_matching(&format!("INSERT INTO `default`.`{}`", table.local())),
            1
        );
    }
}

/// Every table is truncated cluster-wide before the first insert
#[tokio::test]
async fn test_truncate_precedes_inserts() {
    let db = MockDatabase::new();
    let set = fixtures(3);

    loader()
        .load(Arc::new(db.clone()), &set, &CancellationToken::new())
        .await
        .unwrap();

    let sql = db.executed_sql();
    assert_eq!(sql.len(), 6);
    for statement in &sql[..3] {
        assert!(statement.starts_with("TRUNCATE TABLE `default`.`table_0"));
        assert!(statement.ends_with("ON CLUSTER `xatu_cluster` SYNC"));
    }
    for statement in &sql[3..] {
        assert!(statement.starts_with("INSERT INTO"));
        assert!(statement.contains("FROM file('/fixtures/table_0"));
    }
}

/// A failed truncate does not stop the load
#[tokio::test]
async fn test_truncate_failure_is_not_fatal() {
    let db = MockDatabase::new();
    db.when("TRUNCATE TABLE `default`.`table_01_local`")
        .fails("Code: 60. Table default.table_01_local does not exist");
    let set = fixtures(3);

    loader()
        .load(Arc::new(db.clone()), &set, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(db.count_matching("INSERT INTO"), 3);
}

/// One failing insert is reported exactly once, naming its table
#[tokio::test(start_paused = true)]
async fn test_single_failure_is_reported() {
    let db = MockDatabase::new();
    db.when("INSERT INTO").delays(INSERT_DELAY).succeeds();
    db.when("`table_07_local`")
        .delays(INSERT_DELAY)
        .fails("Code: 27. Cannot parse input");
    let set = fixtures(20);

    let err = loader()
        .load(Arc::new(db.clone()), &set, &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        HarnessError::Ingest { table, source } => {
            assert_eq!(table, "table_07");
            assert!(matches!(source, DbError::ExecutionError(ref m) if m.contains("Code: 27")));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(db.count_matching("INSERT INTO"), 20);
}

/// Several failures still produce a single error
#[tokio::test]
async fn test_many_failures_return_one_error() {
    let db = MockDatabase::new();
    db.when("INSERT INTO").fails("Code: 241. Memory limit exceeded");
    let set = fixtures(5);

    let err = loader()
        .with_workers(5)
        .load(Arc::new(db.clone()), &set, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::Ingest { .. }));
}

/// Inserts exceeding the statement deadline fail with a timeout
#[tokio::test(start_paused = true)]
async fn test_insert_timeout() {
    let db = MockDatabase::new();
    db.when("INSERT INTO").delays(Duration::from_secs(10)).succeeds();

    let err = loader()
        .with_statement_timeout(Duration::from_secs(1))
        .load(Arc::new(db.clone()), &fixtures(1), &CancellationToken::new())
        .await
        .unwrap_err();

    let HarnessError::Ingest { source, .. } = err else {
        panic!("expected an ingest error");
    };
    assert!(source.is_timeout());
}

/// A cancelled load stops without inserting
#[tokio::test]
async fn test_cancelled_load() {
    let db = MockDatabase::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = loader()
        .load(Arc::new(db.clone()), &fixtures(2), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::Ingest { source: DbError::Cancelled, .. }));
}

/// An empty fixture set issues no statements
#[tokio::test]
async fn test_empty_fixture_set() {
    let db = MockDatabase::new();
    loader()
        .load(Arc::new(db.clone()), &FixtureSet::new(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(db.executed_sql().is_empty());
}

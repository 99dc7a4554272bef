use super::*;
use ct_core::{CheckOperator, ExpectedRow, TypedCheck};
use ct_db::mock::MockDatabase;
use serde_json::json;

const QUEUE: &str = "system.replication_queue";

fn mock() -> MockDatabase {
    let db = MockDatabase::new();
    db.when(QUEUE).returns(QueryResult::scalar("count()", 0));
    db
}

fn options() -> RunnerOptions {
    RunnerOptions {
        sync: SyncGate::new(QUEUE, Duration::from_millis(10), Duration::from_secs(1)),
        ..Default::default()
    }
}

async fn started(db: &MockDatabase, options: RunnerOptions) -> AssertionRunner {
    let mut runner = AssertionRunner::with_database(Arc::new(db.clone()), options);
    runner.start().await.unwrap();
    runner
}

fn expected(pairs: &[(&str, serde_json::Value)]) -> ExpectedRow {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn t_row() -> QueryResult {
    QueryResult::single_row(vec![("a", Datum::value(42)), ("b", Datum::text("x"))])
}

#[tokio::test]
async fn test_happy_path() {
    let db = mock();
    db.when("FROM t").returns(t_row());
    let runner = started(&db, options()).await;

    let assertions = vec![Assertion::new(
        "happy",
        "SELECT a, b FROM t",
        expected(&[("a", json!(42)), ("b", json!("x"))]),
    )];
    let run = runner
        .run("test_db", &assertions, &CancellationToken::new())
        .await
        .unwrap();

    assert!(run.all_passed());
    assert_eq!((run.total, run.passed, run.failed), (1, 1, 0));
    let result = &run.results[0];
    assert_eq!(result.status, crate::AssertionStatus::Passed);
    assert_eq!(result.actual["b"], json!("x"));
}

#[tokio::test]
async fn test_use_and_query_share_a_session() {
    let db = mock();
    db.when("FROM t").returns(t_row());
    let runner = started(&db, options()).await;

    let assertions = vec![Assertion::new(
        "pinned",
        "SELECT a, b FROM t",
        expected(&[("a", json!(42)), ("b", json!("x"))]),
    )];
    runner
        .run("test_db", &assertions, &CancellationToken::new())
        .await
        .unwrap();

    let log = db.statements();
    let use_stmt = log.iter().find(|r| r.sql == "USE `test_db`").unwrap();
    let query = log.iter().find(|r| r.sql == "SELECT a, b FROM t").unwrap();
    assert!(use_stmt.session.is_some());
    assert_eq!(use_stmt.session, query.session);
    assert_eq!(db.open_sessions(), 0);
}

#[tokio::test]
async fn test_mismatch_reports_values() {
    let db = mock();
    db.when("FROM t").returns(t_row());
    let runner = started(&db, options()).await;

    let assertions = vec![Assertion::new(
        "mismatch",
        "SELECT a, b FROM t",
        expected(&[("a", json!(41)), ("b", json!("x"))]),
    )];
    let run = runner
        .run("test_db", &assertions, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(run.failed, 1);
    let result = &run.results[0];
    assert_eq!(result.status, crate::AssertionStatus::Failed);
    let message = result.error.as_ref().unwrap().to_string();
    assert!(message.contains("expected 41, got 42"), "{message}");
}

#[tokio::test]
async fn test_timestamp_equivalence() {
    let db = mock();
    db.when("FROM events").returns(QueryResult::new(
        vec![ct_db::Column::new("ts", "DateTime('UTC')")],
        vec![vec![Datum::value("2024-06-01 12:00:00")]],
    ));
    let runner = started(&db, options()).await;

    let assertions = vec![Assertion::new(
        "ts",
        "SELECT ts FROM events",
        expected(&[("ts", json!("2024-06-01T12:00:00Z"))]),
    )];
    let run = runner
        .run("test_db", &assertions, &CancellationToken::new())
        .await
        .unwrap();
    assert!(run.all_passed());
}

#[tokio::test]
async fn test_no_rows_is_errored() {
    let db = mock();
    let runner = started(&db, options()).await;

    let assertions = vec![Assertion::new(
        "empty",
        "SELECT a FROM empty_table",
        expected(&[("a", json!(1))]),
    )];
    let run = runner
        .run("test_db", &assertions, &CancellationToken::new())
        .await
        .unwrap();

    let result = &run.results[0];
    assert_eq!(result.status, crate::AssertionStatus::Errored);
    assert_eq!(result.error, Some(AssertionError::NoRows));
}

#[tokio::test]
async fn test_query_error_is_errored() {
    let db = mock();
    db.when("FROM missing").fails("Code: 60. Table test_db.missing does not exist");
    let runner = started(&db, options()).await;

    let assertions = vec![Assertion::new(
        "broken",
        "SELECT a FROM missing",
        expected(&[("a", json!(1))]),
    )];
    let run = runner
        .run("test_db", &assertions, &CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(run.results[0].error, Some(AssertionError::Query(ref m)) if m.contains("Code: 60")));
}

#[tokio::test(start_paused = true)]
async fn test_sync_timeout_skips_assertions() {
    let db = MockDatabase::new();
    db.when(QUEUE).returns(QueryResult::scalar("count()", 5));
    let runner = started(
        &db,
        RunnerOptions {
            sync: SyncGate::new(QUEUE, Duration::from_millis(500), Duration::from_secs(1)),
            ..Default::default()
        },
    )
    .await;

    let assertions = vec![Assertion::new("a", "SELECT 1 AS x", expected(&[("x", json!(1))]))];
    let err = runner
        .run("test_db", &assertions, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, AssertError::SyncTimeout { pending: 5, .. }));
    assert_eq!(db.count_matching("USE "), 0);
    assert_eq!(db.count_matching("SELECT 1 AS x"), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bounded_workers_and_order() {
    let db = mock();
    db.when("FROM slow")
        .delays(Duration::from_millis(40))
        .returns(QueryResult::scalar("x", 1));
    let runner = started(
        &db,
        RunnerOptions {
            workers: 3,
            ..options()
        },
    )
    .await;

    let assertions: Vec<Assertion> = (0..12)
        .map(|i| {
            Assertion::new(
                format!("a{i:02}"),
                format!("SELECT x FROM slow /* {i} */"),
                expected(&[("x", json!(1))]),
            )
        })
        .collect();
    let run = runner
        .run("test_db", &assertions, &CancellationToken::new())
        .await
        .unwrap();

    assert!(run.all_passed());
    let names: Vec<&str> = run.results.iter().map(|r| r.name.as_str()).collect();
    let want: Vec<String> = (0..12).map(|i| format!("a{i:02}")).collect();
    assert_eq!(names, want);
    assert!(db.max_in_flight() <= 3, "max in flight {}", db.max_in_flight());
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_no_rows() {
    let db = mock();
    db.when("FROM t").returns(t_row());
    db.when("FROM t").once().returns(QueryResult::default());
    let runner = started(
        &db,
        RunnerOptions {
            max_retries: 2,
            retry_delay: Duration::from_millis(100),
            ..options()
        },
    )
    .await;

    let assertions = vec![Assertion::new(
        "eventually",
        "SELECT a, b FROM t",
        expected(&[("a", json!(42)), ("b", json!("x"))]),
    )];
    let run = runner
        .run("test_db", &assertions, &CancellationToken::new())
        .await
        .unwrap();

    assert!(run.all_passed());
    assert_eq!(run.results[0].attempts, 2);
}

#[tokio::test(start_paused = true)]
async fn test_retries_exhausted_on_mismatch() {
    let db = mock();
    db.when("FROM t").returns(t_row());
    let runner = started(
        &db,
        RunnerOptions {
            max_retries: 2,
            retry_delay: Duration::from_millis(100),
            ..options()
        },
    )
    .await;

    let assertions = vec![Assertion::new(
        "never",
        "SELECT a, b FROM t",
        expected(&[("a", json!(0)), ("b", json!("x"))]),
    )];
    let run = runner
        .run("test_db", &assertions, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(run.results[0].status, crate::AssertionStatus::Failed);
    assert_eq!(run.results[0].attempts, 3);
    assert_eq!(db.count_matching("FROM t"), 3);
}

#[tokio::test(start_paused = true)]
async fn test_assertion_timeout() {
    let db = mock();
    db.when("FROM slow")
        .delays(Duration::from_secs(60))
        .returns(QueryResult::scalar("x", 1));
    let runner = started(
        &db,
        RunnerOptions {
            assertion_timeout: Duration::from_millis(200),
            ..options()
        },
    )
    .await;

    let assertions = vec![Assertion::new("slow", "SELECT x FROM slow", expected(&[("x", json!(1))]))];
    let run = runner
        .run("test_db", &assertions, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        run.results[0].error,
        Some(AssertionError::Timeout(Duration::from_millis(200)))
    );
}

#[tokio::test]
async fn test_database_placeholder_substituted() {
    let db = mock();
    let runner = started(&db, options()).await;

    let assertions = vec![Assertion::new(
        "placeholder",
        "SELECT count() AS c FROM {database}.fct_block",
        expected(&[("c", json!(0))]),
    )];
    runner
        .run("test_db", &assertions, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(db.count_matching("FROM test_db.fct_block"), 1);
}

#[tokio::test]
async fn test_remote_cluster_tables_run_in_target_database() {
    let db = mock();
    let runner = started(&db, options()).await;

    let assertions = vec![Assertion::new(
        "remote",
        "SELECT count() AS c FROM cluster('{remote_cluster}', default.beacon_block)",
        expected(&[("c", json!(0))]),
    )];
    runner
        .run("test_db", &assertions, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(db.count_matching("SELECT count() AS c FROM beacon_block"), 1);
    assert_eq!(db.count_matching("remote_cluster"), 0);
}

#[tokio::test]
async fn test_typed_checks() {
    let db = mock();
    db.when("FROM t").returns(t_row());
    let runner = started(&db, options()).await;

    let assertions = vec![
        Assertion::with_checks(
            "in range",
            "SELECT a, b FROM t",
            vec![
                TypedCheck::new("a", CheckOperator::GreaterThan, 40),
                TypedCheck::new("a", CheckOperator::LessThanOrEqual, 42.0),
                TypedCheck::new("b", CheckOperator::NotEquals, "y"),
            ],
        ),
        Assertion::with_checks(
            "too small",
            "SELECT a, b FROM t",
            vec![TypedCheck::new("a", CheckOperator::GreaterThanOrEqual, 100)],
        ),
    ];
    let run = runner
        .run("test_db", &assertions, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!((run.passed, run.failed), (1, 1));
    assert_eq!(run.results[0].status, crate::AssertionStatus::Passed);
    let failed = &run.results[1];
    assert_eq!(failed.status, crate::AssertionStatus::Failed);
    let message = failed.error.as_ref().unwrap().to_string();
    assert!(
        message.contains("column `a`: expected greater_than_or_equal 100, got 42"),
        "{message}"
    );
}

#[tokio::test]
async fn test_cancelled_run() {
    let db = mock();
    let runner = started(&db, options()).await;
    let token = CancellationToken::new();
    token.cancel();

    let assertions = vec![Assertion::new("a", "SELECT 1 AS x", expected(&[("x", json!(1))]))];
    let err = runner.run("test_db", &assertions, &token).await.unwrap_err();
    assert!(matches!(err, AssertError::Cancelled));
}

#[tokio::test]
async fn test_run_before_start() {
    let runner = AssertionRunner::with_database(Arc::new(mock()), options());
    let err = runner
        .run("test_db", &[], &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AssertError::NotStarted));
}

#[tokio::test]
async fn test_start_fails_on_ping_and_closes() {
    let db = mock();
    db.fail_ping("connection refused");
    let mut runner = AssertionRunner::with_database(Arc::new(db.clone()), options());

    let err = runner.start().await.unwrap_err();
    assert!(matches!(err, AssertError::Connect(_)));
    assert!(db.is_closed());
}

#[tokio::test]
async fn test_start_refuses_unlisted_host() {
    let db = mock();
    db.when("hostName()")
        .returns(QueryResult::single_row(vec![("hostName()", Datum::text("prod-01"))]));
    let mut runner = AssertionRunner::with_database(
        Arc::new(db.clone()),
        RunnerOptions {
            safe_hostnames: vec!["test-01".to_string()],
            ..options()
        },
    );

    let err = runner.start().await.unwrap_err();
    assert!(matches!(err, AssertError::Connect(ct_db::DbError::UnsafeHost { .. })));
}

#[tokio::test]
async fn test_stop_closes_pool() {
    let db = mock();
    let mut runner = started(&db, options()).await;
    runner.stop().await.unwrap();
    assert!(db.is_closed());
}

#[test]
fn test_first_row_rejects_invalid_utf8() {
    let result = QueryResult::new(
        vec![ct_db::Column::new("b", "String")],
        vec![vec![Datum::Bytes(vec![0xff, 0xfe])]],
    );
    assert!(matches!(first_row(&result), Err(AssertionError::Scan(_))));
}

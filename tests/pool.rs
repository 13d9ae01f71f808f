mod common;

use std::time::{Duration, Instant};

use common::TestDb;
use expensetrack::table::quote_ident;
use expensetrack::{ConnectionPool, ExpenseVectors, QueryGuard, VectorError};
use uuid::Uuid;

#[tokio::test(flavor = "current_thread")]
async fn exhausted_pool_times_out_then_recovers() {
    let Some(db) = TestDb::connect(4).await else {
        return;
    };
    let config = db
        .config
        .clone()
        .with_pool_size(1)
        .with_acquire_timeout(Duration::from_millis(200));
    let pool = ConnectionPool::new(&config).expect("pool");

    let held = pool.acquire().await.expect("first lease");
    let started = Instant::now();
    let err = pool
        .acquire()
        .await
        .err()
        .expect("pool of one is busy");
    assert!(matches!(err, VectorError::PoolExhausted { .. }));
    assert!(err.is_retryable());
    assert!(started.elapsed() >= Duration::from_millis(150));

    pool.release(held);
    assert_eq!(pool.stats().in_use, 0);
    let again = pool.acquire().await.expect("lease after release");
    assert_eq!(pool.stats().in_use, 1);
    drop(again);

    pool.shutdown();
    db.drop_schema().await;
}

#[tokio::test(flavor = "current_thread")]
async fn sessions_use_the_store_schema() {
    let Some(db) = TestDb::connect(4).await else {
        return;
    };
    let pool = ConnectionPool::new(&db.config).expect("pool");
    let conn = pool.acquire().await.expect("lease");
    let row = conn
        .query_one("SELECT current_schema()::text, current_setting('statement_timeout')", &[])
        .await
        .expect("session settings");
    let schema: String = row.get(0);
    let timeout: String = row.get(1);
    assert_eq!(schema, db.schema());
    assert_eq!(timeout, "30s");
    drop(conn);

    pool.shutdown();
    db.drop_schema().await;
}

#[tokio::test(flavor = "current_thread")]
async fn mixed_case_schema_is_the_session_schema() {
    let Some(db) = TestDb::connect(4).await else {
        return;
    };
    let schema = format!("Mixed_{}", Uuid::new_v4().simple());
    db.admin()
        .batch_execute(&format!("CREATE SCHEMA {}", quote_ident(&schema)))
        .await
        .expect("create mixed-case schema");
    let config = db.config.clone().with_schema(schema.clone());

    let pool = ConnectionPool::new(&config).expect("pool");
    let conn = pool.acquire().await.expect("lease");
    let current: Option<String> = conn
        .query_one("SELECT current_schema()::text", &[])
        .await
        .expect("current schema")
        .get(0);
    assert_eq!(current.as_deref(), Some(schema.as_str()));
    drop(conn);
    pool.shutdown();

    let vectors = ExpenseVectors::start(config)
        .await
        .expect("provision mixed-case schema");
    assert!(vectors.provisioner().is_provisioned().await.expect("lookup"));
    vectors.shutdown();

    db.admin()
        .batch_execute(&format!("DROP SCHEMA {} CASCADE", quote_ident(&schema)))
        .await
        .expect("drop mixed-case schema");
    db.drop_schema().await;
}

#[tokio::test(flavor = "current_thread")]
async fn statement_timeout_surfaces_as_storage_error() {
    let Some(db) = TestDb::connect(4).await else {
        return;
    };
    let mut config = db.config.clone();
    config.statement_timeout = Duration::from_millis(50);
    let pool = ConnectionPool::new(&config).expect("pool");
    let guard = QueryGuard::new(pool.clone(), config.dimension);

    let err = guard
        .safe_query("SELECT pg_sleep(2)", &[])
        .await
        .expect_err("statement outlives the timeout");
    match &err {
        // 57014: query_canceled
        VectorError::Storage(message) => assert!(message.starts_with("57014"), "{message}"),
        other => panic!("expected Storage, got {other:?}"),
    }
    assert!(!err.is_retryable());
    assert_eq!(pool.stats().in_use, 0);

    pool.shutdown();
    db.drop_schema().await;
}

mod common;

use common::TestDb;
use expensetrack::{ExpenseVectors, SchemaProvisioner};
use tokio_postgres::types::ToSql;

async fn count(db: &TestDb, sql: &str, params: &[&(dyn ToSql + Sync)]) -> i64 {
    db.admin()
        .query_one(sql, params)
        .await
        .expect("count query")
        .get(0)
}

#[tokio::test(flavor = "current_thread")]
async fn provisioning_twice_is_a_no_op() {
    let Some(db) = TestDb::connect(8).await else {
        return;
    };
    let vectors = ExpenseVectors::new(db.config.clone()).expect("store");
    let provisioner: &SchemaProvisioner = vectors.provisioner();
    assert!(!provisioner.is_provisioned().await.expect("lookup"));

    assert!(provisioner.ensure_provisioned().await.expect("first run"));
    assert!(provisioner.ensure_provisioned().await.expect("second run"));
    assert!(provisioner.is_provisioned().await.expect("lookup"));

    let extensions = count(
        &db,
        "SELECT COUNT(*) FROM pg_extension WHERE extname = 'vector'",
        &[],
    )
    .await;
    assert_eq!(extensions, 1);
    let tables = count(
        &db,
        "SELECT COUNT(*) FROM information_schema.tables \
         WHERE table_schema = $1 AND table_name = 'expense_embeddings'",
        &[&db.schema()],
    )
    .await;
    assert_eq!(tables, 1);
    let width = count(
        &db,
        "SELECT atttypmod::bigint FROM pg_attribute \
         WHERE attrelid = $1::text::regclass AND attname = 'embedding'",
        &[&format!("{}.expense_embeddings", db.schema())],
    )
    .await;
    assert_eq!(width, 8);

    vectors.shutdown();
    db.drop_schema().await;
}

#[tokio::test(flavor = "current_thread")]
async fn concurrent_starters_both_succeed() {
    let Some(db) = TestDb::connect(8).await else {
        return;
    };
    let (first, second) = tokio::join!(
        ExpenseVectors::start(db.config.clone()),
        ExpenseVectors::start(db.config.clone())
    );
    let first = first.expect("first starter");
    let second = second.expect("second starter");
    assert!(first.provisioner().is_provisioned().await.expect("lookup"));

    first.shutdown();
    second.shutdown();
    db.drop_schema().await;
}

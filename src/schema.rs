//! Idempotent provisioning of the vector extension and the embedding table.

use std::time::Instant;

use tracing::info;

use crate::config::{AnnIndex, StoreConfig};
use crate::error::Result;
use crate::pool::ConnectionPool;
use crate::table::{quote_ident, TableName};

// Arbitrary constant shared by every process provisioning this store.
const PROVISION_LOCK_KEY: i64 = 0x6578_7065_6e73_6501;

/// Creates the schema objects the store needs, tolerating concurrent callers.
#[derive(Clone)]
pub struct SchemaProvisioner {
    pool: ConnectionPool,
    table: TableName,
    dimension: usize,
    ann_index: AnnIndex,
}

impl SchemaProvisioner {
    /// Provisioner for the embedding table described by `config`.
    pub fn new(pool: ConnectionPool, config: &StoreConfig) -> Result<Self> {
        Ok(Self {
            pool,
            table: config.tables()?.embeddings,
            dimension: config.dimension,
            ann_index: config.ann_index,
        })
    }

    /// Table this provisioner manages.
    pub fn table(&self) -> &TableName {
        &self.table
    }

    /// Ensures the schema, `vector` extension, embedding table and indexes exist.
    ///
    /// Every statement is `IF NOT EXISTS`. The statements run in one transaction holding an
    /// advisory lock, because concurrent `CREATE ... IF NOT EXISTS` can still collide on the
    /// catalog's unique indexes. Failures are returned as-is and never retried here.
    pub async fn ensure_provisioned(&self) -> Result<bool> {
        let started = Instant::now();
        let mut conn = self.pool.acquire().await?;
        let tx = conn.transaction().await?;
        tx.execute("SELECT pg_advisory_xact_lock($1)", &[&PROVISION_LOCK_KEY])
            .await?;
        for statement in self.statements() {
            tx.batch_execute(&statement).await?;
        }
        tx.commit().await?;
        info!(
            table = %self.table.qualified(),
            dimension = self.dimension,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "embedding schema provisioned"
        );
        Ok(true)
    }

    /// Whether the embedding table is already visible.
    pub async fn is_provisioned(&self) -> Result<bool> {
        let conn = self.pool.acquire().await?;
        let row = conn
            .query_one(
                "SELECT EXISTS (
                    SELECT 1 FROM information_schema.tables
                    WHERE table_schema = $1 AND table_name = $2
                )",
                &[&self.table.schema(), &self.table.table()],
            )
            .await?;
        Ok(row.try_get(0)?)
    }

    fn statements(&self) -> Vec<String> {
        let schema = quote_ident(self.table.schema());
        let table = self.table.qualified();
        let mut statements = vec![
            format!("CREATE SCHEMA IF NOT EXISTS {schema}"),
            format!("CREATE EXTENSION IF NOT EXISTS vector WITH SCHEMA {schema}"),
            format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id BIGSERIAL PRIMARY KEY,
                    expense_id TEXT NOT NULL,
                    user_id TEXT NOT NULL,
                    content TEXT,
                    embedding VECTOR({dims}) NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )",
                dims = self.dimension
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {table} (user_id, expense_id)",
                self.table.index_name("owner_idx")
            ),
        ];
        statements.extend(self.ann_index.create_index_sql(&self.table));
        statements
    }
}

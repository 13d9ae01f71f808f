#![allow(dead_code)]

use expensetrack::table::quote_ident;
use expensetrack::StoreConfig;
use tokio_postgres::{Client, NoTls};
use uuid::Uuid;

pub const DATABASE_URL_ENV: &str = "EXPENSETRACK_TEST_DATABASE_URL";

/// Throwaway schema holding the expense tables the CRUD layer would normally own.
pub struct TestDb {
    pub config: StoreConfig,
    admin: Client,
    schema: String,
}

impl TestDb {
    /// `None` when no test database is configured.
    pub async fn connect(dimension: usize) -> Option<Self> {
        let Ok(url) = std::env::var(DATABASE_URL_ENV) else {
            eprintln!("skipping: {DATABASE_URL_ENV} is not set");
            return None;
        };
        let (admin, connection) = tokio_postgres::connect(&url, NoTls)
            .await
            .expect("connect to test database");
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                eprintln!("postgres connection error: {err}");
            }
        });

        // Install the extension outside the per-test schema so dropping one schema
        // never takes the vector type away from tests running alongside it.
        admin
            .batch_execute(
                "BEGIN;
                 SELECT pg_advisory_xact_lock(7);
                 CREATE EXTENSION IF NOT EXISTS vector;
                 COMMIT;",
            )
            .await
            .expect("vector extension");

        let schema = format!("t_{}", Uuid::new_v4().simple());
        let quoted = quote_ident(&schema);
        admin
            .batch_execute(&format!(
                "CREATE SCHEMA {quoted};
                 CREATE TABLE {quoted}.categories (
                     category_id TEXT PRIMARY KEY,
                     user_id TEXT NOT NULL,
                     name TEXT NOT NULL
                 );
                 CREATE TABLE {quoted}.payment_methods (
                     payment_method_id TEXT PRIMARY KEY,
                     user_id TEXT NOT NULL,
                     name TEXT NOT NULL
                 );
                 CREATE TABLE {quoted}.expenses (
                     expense_id TEXT PRIMARY KEY,
                     user_id TEXT NOT NULL,
                     category_id TEXT NOT NULL REFERENCES {quoted}.categories (category_id),
                     payment_method_id TEXT NOT NULL
                         REFERENCES {quoted}.payment_methods (payment_method_id),
                     amount NUMERIC(10, 2) NOT NULL,
                     description TEXT,
                     expense_date DATE NOT NULL,
                     is_recurring BOOLEAN DEFAULT false,
                     receipt TEXT,
                     notes TEXT,
                     created_at TIMESTAMPTZ DEFAULT NOW(),
                     updated_at TIMESTAMPTZ DEFAULT NOW()
                 );"
            ))
            .await
            .expect("create expense tables");

        let config = StoreConfig::new(url)
            .with_schema(schema.clone())
            .with_dimension(dimension)
            .with_pool_size(4);
        Some(Self {
            config,
            admin,
            schema,
        })
    }

    pub fn admin(&self) -> &Client {
        &self.admin
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Inserts an expense with its category and payment method.
    pub async fn seed_expense(&self, user_id: &str, expense_id: &str, description: &str) {
        let schema = quote_ident(&self.schema);
        let category_id = format!("{user_id}_cat_1");
        let payment_method_id = format!("{user_id}_pm_1");
        self.admin
            .execute(
                &format!(
                    "INSERT INTO {schema}.categories (category_id, user_id, name) \
                     VALUES ($1, $2, 'Groceries') ON CONFLICT DO NOTHING"
                ),
                &[&category_id, &user_id],
            )
            .await
            .expect("seed category");
        self.admin
            .execute(
                &format!(
                    "INSERT INTO {schema}.payment_methods (payment_method_id, user_id, name) \
                     VALUES ($1, $2, 'Credit card') ON CONFLICT DO NOTHING"
                ),
                &[&payment_method_id, &user_id],
            )
            .await
            .expect("seed payment method");
        self.admin
            .execute(
                &format!(
                    "INSERT INTO {schema}.expenses \
                     (expense_id, user_id, category_id, payment_method_id, amount, description, \
                      expense_date, receipt) \
                     VALUES ($1, $2, $3, $4, 42.50, $5, DATE '2024-03-01', 'receipt-' || $1::text || '.jpg')"
                ),
                &[&expense_id, &user_id, &category_id, &payment_method_id, &description],
            )
            .await
            .expect("seed expense");
    }

    /// Embedding rows stored for `user_id`.
    pub async fn embedding_count(&self, user_id: &str) -> i64 {
        let row = self
            .admin
            .query_one(
                &format!(
                    "SELECT COUNT(*) FROM {}.expense_embeddings WHERE user_id = $1",
                    quote_ident(&self.schema)
                ),
                &[&user_id],
            )
            .await
            .expect("count embeddings");
        row.get(0)
    }

    pub async fn drop_schema(self) {
        self.admin
            .batch_execute(&format!(
                "DROP SCHEMA IF EXISTS {} CASCADE",
                quote_ident(&self.schema)
            ))
            .await
            .expect("drop test schema");
    }
}

/// Unit vector at cosine distance `distance` from `[1, 0, 0]`.
pub fn at_distance(distance: f32) -> Vec<f32> {
    let cos = 1.0 - distance;
    vec![cos, (1.0 - cos * cos).sqrt(), 0.0]
}

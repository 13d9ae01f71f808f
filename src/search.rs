//! Per-user nearest-neighbour search over expense embeddings.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_postgres::Row;
use tracing::debug;

use crate::config::StoreConfig;
use crate::error::Result;
use crate::guard::{BoundParam, Embedding, Identifier, QueryGuard};
use crate::table::StoreTables;

/// One ranked match, enriched with category and payment-method names.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarExpense {
    /// Expense identifier.
    pub expense_id: String,
    /// Owner; always the user the search was scoped to.
    pub user_id: String,
    /// Category identifier.
    pub category_id: String,
    /// Payment-method identifier.
    pub payment_method_id: String,
    /// Expense amount.
    pub amount: f64,
    /// Free-text description.
    pub description: Option<String>,
    /// Date the expense occurred.
    pub expense_date: DateTime<Utc>,
    /// Whether the expense repeats.
    pub is_recurring: bool,
    /// Free-text notes.
    pub notes: Option<String>,
    /// Stored receipt file name, if one was uploaded.
    pub receipt: Option<String>,
    /// When the expense row was created.
    pub created_at: Option<DateTime<Utc>>,
    /// When the expense row was last edited.
    pub updated_at: Option<DateTime<Utc>>,
    /// Category display name.
    pub category_name: String,
    /// Payment-method display name.
    pub payment_method_name: String,
    /// Text the stored embedding was computed from.
    pub content: Option<String>,
    /// Cosine distance to the query (smaller is closer).
    pub distance: f64,
    /// `1 - distance`; in `[0, 1]` only for normalized embeddings.
    pub similarity: f64,
}

impl SimilarExpense {
    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            expense_id: row.try_get("expense_id")?,
            user_id: row.try_get("user_id")?,
            category_id: row.try_get("category_id")?,
            payment_method_id: row.try_get("payment_method_id")?,
            amount: row.try_get("amount")?,
            description: row.try_get("description")?,
            expense_date: row.try_get("expense_date")?,
            is_recurring: row.try_get("is_recurring")?,
            notes: row.try_get("notes")?,
            receipt: row.try_get("receipt")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            category_name: row.try_get("category_name")?,
            payment_method_name: row.try_get("payment_method_name")?,
            content: row.try_get("content")?,
            distance: row.try_get("distance")?,
            similarity: row.try_get("similarity")?,
        })
    }
}

/// Runs the similarity query through the guard.
#[derive(Clone)]
pub struct SimilaritySearch {
    guard: QueryGuard,
    sql: String,
    default_limit: usize,
    max_limit: usize,
}

impl SimilaritySearch {
    /// Search engine over the tables and limits in `config`.
    pub fn new(guard: QueryGuard, config: &StoreConfig) -> Result<Self> {
        Ok(Self {
            guard,
            sql: select_sql(&config.tables()?),
            default_limit: config.default_limit,
            max_limit: config.max_limit,
        })
    }

    /// Returns up to `limit` (default 5) of `user_id`'s expenses, closest first.
    ///
    /// `limit` is clamped into `1..=max_limit`; callers that must reject a zero or oversized
    /// limit do so before calling. Ties in distance go to the newest embedding. An empty
    /// result is not an error.
    pub async fn search(
        &self,
        embedding: &Embedding,
        user_id: &Identifier,
        limit: Option<usize>,
    ) -> Result<Vec<SimilarExpense>> {
        let limit = self.effective_limit(limit);
        let params = [
            BoundParam::Embedding(embedding.clone()),
            BoundParam::Identifier(user_id.clone()),
            BoundParam::Integer(limit as i64),
        ];
        let started = Instant::now();
        let rows = self.guard.safe_query(&self.sql, &params).await?;
        let matches = rows
            .iter()
            .map(SimilarExpense::from_row)
            .collect::<Result<Vec<_>>>()?;
        debug!(
            %user_id,
            limit,
            matches = matches.len(),
            elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            "similarity search finished"
        );
        Ok(matches)
    }

    /// Limit a search with `requested` will actually use: the default when `None`, otherwise
    /// `requested` clamped into `1..=max_limit`.
    pub fn effective_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_limit)
            .clamp(1, self.max_limit)
    }
}

fn select_sql(tables: &StoreTables) -> String {
    format!(
        "SELECT \
            e.expense_id::text AS expense_id, \
            e.user_id::text AS user_id, \
            e.category_id::text AS category_id, \
            e.payment_method_id::text AS payment_method_id, \
            e.amount::float8 AS amount, \
            e.description::text AS description, \
            e.expense_date::timestamptz AS expense_date, \
            COALESCE(e.is_recurring, false) AS is_recurring, \
            e.notes::text AS notes, \
            e.receipt::text AS receipt, \
            e.created_at::timestamptz AS created_at, \
            e.updated_at::timestamptz AS updated_at, \
            c.name::text AS category_name, \
            pm.name::text AS payment_method_name, \
            ee.content AS content, \
            (ee.embedding <=> $1)::float8 AS distance, \
            (1 - (ee.embedding <=> $1))::float8 AS similarity \
        FROM {embeddings} ee \
        JOIN {expenses} e ON e.expense_id::text = ee.expense_id AND e.user_id::text = ee.user_id \
        JOIN {categories} c ON c.category_id = e.category_id \
        JOIN {payment_methods} pm ON pm.payment_method_id = e.payment_method_id \
        WHERE ee.user_id = $2 \
        ORDER BY ee.embedding <=> $1 ASC, ee.created_at DESC, ee.id DESC \
        LIMIT $3",
        embeddings = tables.embeddings.qualified(),
        expenses = tables.expenses.qualified(),
        categories = tables.categories.qualified(),
        payment_methods = tables.payment_methods.qualified(),
    )
}

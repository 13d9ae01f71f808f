//! Embedding ingestion: one row per expense, scoped by owner.
//!
//! Callers must already have authorized `expense_id` for `user_id`; the expense-creation flow
//! does that right before it ingests, so the pipeline does not re-verify ownership.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Result, VectorError};
use crate::guard::{sql_params, BoundParam, Embedding, Identifier, QueryGuard};
use crate::table::TableName;

/// Validated embedding row ready for insertion.
#[derive(Debug, Clone)]
pub struct NewEmbedding {
    /// Owner of the expense.
    pub user_id: Identifier,
    /// Expense the embedding describes.
    pub expense_id: Identifier,
    /// Text that was embedded.
    pub content: String,
    /// Model output.
    pub embedding: Embedding,
}

impl NewEmbedding {
    /// Builds a row from typed model output.
    pub fn new(
        user_id: impl Into<Identifier>,
        expense_id: impl Into<Identifier>,
        content: impl Into<String>,
        embedding: Vec<f32>,
    ) -> Result<Self> {
        Ok(Self {
            user_id: user_id.into(),
            expense_id: expense_id.into(),
            content: content.into(),
            embedding: Embedding::new(embedding)?,
        })
    }
}

/// Untyped ingestion input as it arrives in request bodies and JSONL files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingDraft {
    /// Owner; must be a string or number.
    pub user_id: Value,
    /// Expense id; must be a string or number.
    pub expense_id: Value,
    /// Text that was embedded.
    #[serde(default)]
    pub content: String,
    /// Array of numbers.
    pub embedding: Value,
}

impl EmbeddingDraft {
    /// Rejects structured identifiers and non-numeric embedding elements.
    pub fn validate(&self) -> Result<NewEmbedding> {
        Ok(NewEmbedding {
            user_id: Identifier::parse("user ID", &self.user_id)?,
            expense_id: Identifier::parse("expense ID", &self.expense_id)?,
            content: self.content.clone(),
            embedding: Embedding::parse(&self.embedding)?,
        })
    }
}

/// Writes embedding rows through the query guard.
#[derive(Clone)]
pub struct EmbeddingIngestor {
    guard: QueryGuard,
    insert_sql: String,
    delete_sql: String,
}

impl EmbeddingIngestor {
    /// Ingestor writing into `table`.
    pub fn new(guard: QueryGuard, table: &TableName) -> Self {
        Self {
            guard,
            insert_sql: insert_sql(table),
            delete_sql: delete_sql(table),
        }
    }

    /// Inserts one embedding row and returns its generated id.
    pub async fn ingest(&self, record: NewEmbedding) -> Result<i64> {
        let user_id = record.user_id.clone();
        let expense_id = record.expense_id.clone();
        let rows = self
            .guard
            .safe_query(&self.insert_sql, &insert_params(record))
            .await?;
        let row = rows
            .first()
            .ok_or_else(|| VectorError::Storage("insert returned no id".to_string()))?;
        let id: i64 = row.try_get("id")?;
        debug!(%user_id, %expense_id, id, "embedding stored");
        Ok(id)
    }

    /// Replaces every embedding of `(user_id, expense_id)` with `record` atomically.
    ///
    /// Used when an expense's description changes and it is re-embedded.
    pub async fn replace(&self, record: NewEmbedding) -> Result<i64> {
        let user_id = record.user_id.clone();
        let expense_id = record.expense_id.clone();
        let scope = [
            BoundParam::from(user_id.clone()),
            BoundParam::from(expense_id.clone()),
        ];
        let params = insert_params(record);
        self.guard.check(&scope)?;
        self.guard.check(&params)?;

        let mut conn = self.guard.pool().acquire().await?;
        let tx = conn.transaction().await?;
        let removed = tx.execute(self.delete_sql.as_str(), &sql_params(&scope)).await?;
        let row = tx.query_one(self.insert_sql.as_str(), &sql_params(&params)).await?;
        tx.commit().await?;
        let id: i64 = row.try_get("id")?;
        debug!(%user_id, %expense_id, id, removed, "embedding replaced");
        Ok(id)
    }

    /// Deletes the embeddings of an expense; returns how many rows went away.
    pub async fn remove(&self, user_id: &Identifier, expense_id: &Identifier) -> Result<u64> {
        let removed = self
            .guard
            .safe_execute(
                &self.delete_sql,
                &[user_id.clone().into(), expense_id.clone().into()],
            )
            .await?;
        debug!(%user_id, %expense_id, removed, "embeddings removed");
        Ok(removed)
    }

    /// Ingestion hook for the expense-creation flow.
    ///
    /// The expense row is already committed, so a failure here is logged and reported as
    /// `None` instead of failing the request.
    pub async fn ingest_after_create(&self, record: NewEmbedding) -> Option<i64> {
        let user_id = record.user_id.clone();
        let expense_id = record.expense_id.clone();
        match self.ingest(record).await {
            Ok(id) => Some(id),
            Err(err) => {
                warn!(%user_id, %expense_id, error = %err, "embedding ingestion failed");
                None
            }
        }
    }
}

fn insert_params(record: NewEmbedding) -> [BoundParam; 4] {
    [
        BoundParam::Identifier(record.expense_id),
        BoundParam::Identifier(record.user_id),
        BoundParam::Text(record.content),
        BoundParam::Embedding(record.embedding),
    ]
}

fn insert_sql(table: &TableName) -> String {
    format!(
        "INSERT INTO {} (expense_id, user_id, content, embedding) \
         VALUES ($1, $2, $3, $4) \
         RETURNING id",
        table.qualified()
    )
}

fn delete_sql(table: &TableName) -> String {
    format!(
        "DELETE FROM {} WHERE user_id = $1 AND expense_id = $2",
        table.qualified()
    )
}

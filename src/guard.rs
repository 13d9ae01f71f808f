//! Parameterized query guard.
//!
//! Parameters are typed values built by the caller: identifiers can only hold a string or a
//! number, embeddings only finite floats. Untyped input (request bodies, JSONL drafts) goes
//! through [`Identifier::parse`] and [`Embedding::parse`], which reject structured values and
//! non-numeric elements. [`QueryGuard::safe_query`] then checks every embedding against the
//! configured dimension before a connection is leased, so doomed queries never hold a
//! pooled connection.

use pgvector::Vector;
use serde_json::Value;
use tokio_postgres::types::ToSql;
use tokio_postgres::Row;
use tracing::debug;

use crate::error::{Result, VectorError};
use crate::pool::ConnectionPool;

/// Scalar identifier bound to an equality filter (user id, expense id).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier(String);

impl Identifier {
    /// Accepts a JSON string or number; objects, arrays, booleans and null are rejected.
    pub fn parse(column: &'static str, value: &Value) -> Result<Self> {
        match value {
            Value::String(text) => Ok(Self(text.clone())),
            Value::Number(number) => Ok(Self(number.to_string())),
            other => Err(VectorError::InvalidIdentifierType {
                column,
                found: json_kind(other),
            }),
        }
    }

    /// Borrow the identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Identifier {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<i64> for Identifier {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Embedding whose elements are all finite. Length is checked against the store by the guard.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding(Vector);

impl Embedding {
    /// Wraps model output, rejecting NaN and infinities.
    pub fn new(values: Vec<f32>) -> Result<Self> {
        if let Some((idx, value)) = values.iter().enumerate().find(|(_, v)| !v.is_finite()) {
            return Err(VectorError::invalid_embedding(format!(
                "element {idx} is not finite ({value})"
            )));
        }
        Ok(Self(Vector::from(values)))
    }

    /// Accepts a JSON array of numbers; strings, nulls, objects and nested arrays are rejected.
    pub fn parse(value: &Value) -> Result<Self> {
        let Value::Array(items) = value else {
            return Err(VectorError::invalid_embedding(format!(
                "expected an array of numbers, got {}",
                json_kind(value)
            )));
        };
        let mut values = Vec::with_capacity(items.len());
        for (idx, item) in items.iter().enumerate() {
            let number = item.as_f64().ok_or_else(|| {
                VectorError::invalid_embedding(format!(
                    "element {idx} is {}, not a number",
                    json_kind(item)
                ))
            })?;
            let narrowed = number as f32;
            if !narrowed.is_finite() {
                return Err(VectorError::invalid_embedding(format!(
                    "element {idx} ({number}) overflows f32"
                )));
            }
            values.push(narrowed);
        }
        Ok(Self(Vector::from(values)))
    }

    /// Number of elements.
    pub fn dimension(&self) -> usize {
        self.0.as_slice().len()
    }

    /// Borrow the raw values.
    pub fn as_slice(&self) -> &[f32] {
        self.0.as_slice()
    }
}

/// A value bound to a `$n` placeholder.
#[derive(Debug, Clone)]
pub enum BoundParam {
    /// Identifier column (user id, expense id).
    Identifier(Identifier),
    /// Embedding column.
    Embedding(Embedding),
    /// Free text; passed through unchanged.
    Text(String),
    /// Integer; passed through unchanged.
    Integer(i64),
}

impl BoundParam {
    fn as_sql(&self) -> &(dyn ToSql + Sync) {
        match self {
            Self::Identifier(id) => &id.0,
            Self::Embedding(embedding) => &embedding.0,
            Self::Text(text) => text,
            Self::Integer(value) => value,
        }
    }
}

impl From<Identifier> for BoundParam {
    fn from(value: Identifier) -> Self {
        Self::Identifier(value)
    }
}

impl From<Embedding> for BoundParam {
    fn from(value: Embedding) -> Self {
        Self::Embedding(value)
    }
}

/// Borrowed `ToSql` views over already-checked parameters.
pub(crate) fn sql_params(params: &[BoundParam]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(BoundParam::as_sql).collect()
}

/// Validates parameters, then runs the statement through the pool.
#[derive(Clone)]
pub struct QueryGuard {
    pool: ConnectionPool,
    dimension: usize,
}

impl QueryGuard {
    /// Guard enforcing `dimension` on every embedding parameter.
    pub fn new(pool: ConnectionPool, dimension: usize) -> Self {
        Self { pool, dimension }
    }

    /// Configured embedding dimension.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Pool used for execution.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Synchronous pre-flight check; never touches the pool.
    pub fn check(&self, params: &[BoundParam]) -> Result<()> {
        for (idx, param) in params.iter().enumerate() {
            match param {
                BoundParam::Embedding(embedding) if embedding.dimension() != self.dimension => {
                    return Err(VectorError::invalid_embedding(format!(
                        "parameter ${} has {} dimensions, expected {}",
                        idx + 1,
                        embedding.dimension(),
                        self.dimension
                    )));
                }
                BoundParam::Identifier(id) if id.as_str().is_empty() => {
                    return Err(VectorError::InvalidIdentifierType {
                        column: "identifier",
                        found: "empty string",
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Runs a row-returning statement after [`QueryGuard::check`] passes.
    pub async fn safe_query(&self, sql: &str, params: &[BoundParam]) -> Result<Vec<Row>> {
        self.check(params)?;
        let conn = self.pool.acquire().await?;
        let rows = conn.query(sql, &sql_params(params)).await?;
        debug!(rows = rows.len(), "guarded query finished");
        Ok(rows)
    }

    /// Runs a statement after [`QueryGuard::check`] passes and returns the affected row count.
    pub async fn safe_execute(&self, sql: &str, params: &[BoundParam]) -> Result<u64> {
        self.check(params)?;
        let conn = self.pool.acquire().await?;
        Ok(conn.execute(sql, &sql_params(params)).await?)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

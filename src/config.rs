//! Store configuration and the CLI/env surface binaries flatten into their own parsers.

use std::time::Duration;

use clap::{Args, ValueEnum};

use crate::error::{Result, VectorError};
use crate::table::{StoreTables, TableName};

/// Embedding width produced by `text-embedding-3-small`.
pub const DEFAULT_DIMENSION: usize = 1536;
/// Upper bound accepted by the pgvector `vector` type.
pub const MAX_DIMENSION: usize = 16_000;
/// Search limit applied when the caller does not pass one.
pub const DEFAULT_SEARCH_LIMIT: usize = 5;

/// Optional approximate nearest-neighbour index over the embedding column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnnIndex {
    /// Exact scan; fine for per-user result sets.
    #[default]
    None,
    /// HNSW graph index.
    Hnsw {
        /// Connections per layer.
        m: u32,
        /// Candidate list size while building.
        ef_construction: u32,
    },
    /// IVFFlat index; needs existing rows to train well.
    IvfFlat {
        /// Number of inverted lists.
        lists: u32,
    },
}

impl AnnIndex {
    /// `CREATE INDEX IF NOT EXISTS` statement for the cosine opclass, or `None` for exact scans.
    pub fn create_index_sql(&self, table: &TableName) -> Option<String> {
        match self {
            Self::None => None,
            Self::Hnsw { m, ef_construction } => Some(format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} USING hnsw (embedding vector_cosine_ops) \
                 WITH (m = {m}, ef_construction = {ef_construction})",
                table.index_name("embedding_hnsw_idx"),
                table.qualified()
            )),
            Self::IvfFlat { lists } => Some(format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} USING ivfflat (embedding vector_cosine_ops) \
                 WITH (lists = {lists})",
                table.index_name("embedding_ivfflat_idx"),
                table.qualified()
            )),
        }
    }
}

/// Connection, layout and limit settings for the embedding store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Postgres connection string (postgres://...).
    pub database_url: String,
    /// Schema holding the embedding table and the vector extension.
    pub schema: String,
    /// Embedding table name.
    pub embeddings_table: String,
    /// Expense table owned by the CRUD layer.
    pub expenses_table: String,
    /// Category table owned by the CRUD layer.
    pub categories_table: String,
    /// Payment-method table owned by the CRUD layer.
    pub payment_methods_table: String,
    /// Required length of every embedding.
    pub dimension: usize,
    /// Maximum pooled connections.
    pub pool_size: usize,
    /// Longest `acquire()` waits for a free connection.
    pub acquire_timeout: Duration,
    /// Longest a new connection may take to establish.
    pub connect_timeout: Duration,
    /// Server-side `statement_timeout` applied to every pooled connection.
    pub statement_timeout: Duration,
    /// Result count when search callers omit a limit.
    pub default_limit: usize,
    /// Largest limit a search may request.
    pub max_limit: usize,
    /// ANN index created during provisioning.
    pub ann_index: AnnIndex,
}

impl StoreConfig {
    /// Configuration with the reference layout (`expensestrack.expense_embeddings`, 1536 dims).
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            schema: "expensestrack".to_string(),
            embeddings_table: "expense_embeddings".to_string(),
            expenses_table: "expenses".to_string(),
            categories_table: "categories".to_string(),
            payment_methods_table: "payment_methods".to_string(),
            dimension: DEFAULT_DIMENSION,
            pool_size: 10,
            acquire_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            statement_timeout: Duration::from_secs(30),
            default_limit: DEFAULT_SEARCH_LIMIT,
            max_limit: 50,
            ann_index: AnnIndex::None,
        }
    }

    /// Set the schema name.
    #[must_use]
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    /// Set the embedding dimension.
    #[must_use]
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    /// Set the pool size.
    #[must_use]
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Set the acquire timeout.
    #[must_use]
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the ANN index.
    #[must_use]
    pub fn with_ann_index(mut self, index: AnnIndex) -> Self {
        self.ann_index = index;
        self
    }

    /// Rejects settings the store cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.database_url.trim().is_empty() {
            return Err(VectorError::InvalidConfig(
                "database URL is required".to_string(),
            ));
        }
        if self.dimension == 0 || self.dimension > MAX_DIMENSION {
            return Err(VectorError::InvalidConfig(format!(
                "invalid dimension: {} (must be 1-{MAX_DIMENSION})",
                self.dimension
            )));
        }
        if self.pool_size == 0 {
            return Err(VectorError::InvalidConfig(
                "pool size must be > 0".to_string(),
            ));
        }
        if self.acquire_timeout.is_zero() {
            return Err(VectorError::InvalidConfig(
                "acquire timeout must be > 0".to_string(),
            ));
        }
        if self.default_limit == 0 || self.default_limit > self.max_limit {
            return Err(VectorError::InvalidConfig(format!(
                "default limit {} must be within 1-{}",
                self.default_limit, self.max_limit
            )));
        }
        if let AnnIndex::Hnsw { .. } = self.ann_index {
            if self.dimension > 2000 {
                return Err(VectorError::InvalidConfig(format!(
                    "hnsw index supports at most 2000 dimensions, got {}",
                    self.dimension
                )));
            }
        }
        self.tables().map(|_| ())
    }

    /// Qualified names of every table the store touches.
    pub fn tables(&self) -> Result<StoreTables> {
        Ok(StoreTables {
            embeddings: TableName::new(&self.schema, &self.embeddings_table)?,
            expenses: TableName::new(&self.schema, &self.expenses_table)?,
            categories: TableName::new(&self.schema, &self.categories_table)?,
            payment_methods: TableName::new(&self.schema, &self.payment_methods_table)?,
        })
    }
}

/// ANN index choice exposed on the command line.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum AnnIndexArg {
    /// No ANN index.
    None,
    /// HNSW with m = 16, ef_construction = 64.
    Hnsw,
    /// IVFFlat with 100 lists.
    Ivfflat,
}

/// Store flags shared by every binary.
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Postgres connection string (postgres://...)
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Schema holding the embedding table
    #[arg(long, env = "EXPENSETRACK_SCHEMA", default_value = "expensestrack")]
    pub schema: String,

    /// Embedding table name
    #[arg(long, env = "EXPENSETRACK_EMBEDDING_TABLE", default_value = "expense_embeddings")]
    pub embedding_table: String,

    /// Required embedding dimension
    #[arg(long, env = "EXPENSETRACK_DIMENSION", default_value_t = DEFAULT_DIMENSION)]
    pub dimension: usize,

    /// Maximum pooled Postgres connections
    #[arg(long, env = "EXPENSETRACK_POOL_SIZE", default_value_t = 10)]
    pub pool_size: usize,

    /// Milliseconds to wait for a free pooled connection
    #[arg(long, env = "EXPENSETRACK_ACQUIRE_TIMEOUT_MS", default_value_t = 5_000)]
    pub acquire_timeout_ms: u64,

    /// Server-side statement timeout in milliseconds
    #[arg(long, env = "EXPENSETRACK_STATEMENT_TIMEOUT_MS", default_value_t = 30_000)]
    pub statement_timeout_ms: u64,

    /// Largest search limit a caller may request
    #[arg(long, env = "EXPENSETRACK_MAX_LIMIT", default_value_t = 50)]
    pub max_limit: usize,

    /// Approximate nearest-neighbour index to create while provisioning
    #[arg(long, env = "EXPENSETRACK_ANN_INDEX", value_enum, default_value = "none")]
    pub ann_index: AnnIndexArg,
}

impl StoreArgs {
    /// Converts the parsed flags into a validated `StoreConfig`.
    pub fn build_config(&self) -> Result<StoreConfig> {
        let mut config = StoreConfig::new(self.database_url.clone())
            .with_schema(self.schema.clone())
            .with_dimension(self.dimension)
            .with_pool_size(self.pool_size)
            .with_acquire_timeout(Duration::from_millis(self.acquire_timeout_ms))
            .with_ann_index(match self.ann_index {
                AnnIndexArg::None => AnnIndex::None,
                AnnIndexArg::Hnsw => AnnIndex::Hnsw {
                    m: 16,
                    ef_construction: 64,
                },
                AnnIndexArg::Ivfflat => AnnIndex::IvfFlat { lists: 100 },
            });
        config.embeddings_table = self.embedding_table.clone();
        config.statement_timeout = Duration::from_millis(self.statement_timeout_ms);
        config.max_limit = self.max_limit.max(1);
        config.default_limit = config.default_limit.min(config.max_limit);
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = StoreConfig::new("postgres://localhost/expenses");
        config.validate().expect("defaults are valid");
        let tables = config.tables().expect("tables");
        assert_eq!(
            tables.embeddings.qualified(),
            "\"expensestrack\".\"expense_embeddings\""
        );
        assert_eq!(tables.categories.table(), "categories");
    }

    #[test]
    fn rejects_bad_settings() {
        let base = StoreConfig::new("postgres://localhost/expenses");
        assert!(base.clone().with_dimension(0).validate().is_err());
        assert!(base.clone().with_pool_size(0).validate().is_err());
        assert!(base.clone().with_schema("bad schema").validate().is_err());
        assert!(base
            .clone()
            .with_ann_index(AnnIndex::Hnsw {
                m: 16,
                ef_construction: 64
            })
            .with_dimension(3072)
            .validate()
            .is_err());
        assert!(StoreConfig::new("  ").validate().is_err());
    }

    #[test]
    fn ann_index_sql() {
        let table = TableName::new("expensestrack", "expense_embeddings").expect("table");
        assert!(AnnIndex::None.create_index_sql(&table).is_none());
        let sql = AnnIndex::Hnsw {
            m: 16,
            ef_construction: 64,
        }
        .create_index_sql(&table)
        .expect("hnsw sql");
        assert!(sql.contains("USING hnsw (embedding vector_cosine_ops)"));
        assert!(sql.contains("WITH (m = 16, ef_construction = 64)"));
    }
}

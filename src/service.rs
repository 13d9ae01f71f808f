//! Process-wide handle wiring the pool, guard, provisioner, ingestor and search together.

use tracing::info;

use crate::config::StoreConfig;
use crate::error::Result;
use crate::guard::QueryGuard;
use crate::ingest::EmbeddingIngestor;
use crate::pool::ConnectionPool;
use crate::schema::SchemaProvisioner;
use crate::search::SimilaritySearch;

/// Built once at startup and passed to whatever needs embeddings; clones share the pool.
#[derive(Clone)]
pub struct ExpenseVectors {
    config: StoreConfig,
    pool: ConnectionPool,
    guard: QueryGuard,
    provisioner: SchemaProvisioner,
    ingestor: EmbeddingIngestor,
    search: SimilaritySearch,
}

impl ExpenseVectors {
    /// Builds every component over one lazily-connecting pool.
    pub fn new(config: StoreConfig) -> Result<Self> {
        let pool = ConnectionPool::new(&config)?;
        let tables = config.tables()?;
        let guard = QueryGuard::new(pool.clone(), config.dimension);
        let provisioner = SchemaProvisioner::new(pool.clone(), &config)?;
        let ingestor = EmbeddingIngestor::new(guard.clone(), &tables.embeddings);
        let search = SimilaritySearch::new(guard.clone(), &config)?;
        Ok(Self {
            config,
            pool,
            guard,
            provisioner,
            ingestor,
            search,
        })
    }

    /// Builds the handle and provisions the schema; a provisioning failure is fatal.
    pub async fn start(config: StoreConfig) -> Result<Self> {
        let vectors = Self::new(config)?;
        vectors.provisioner.ensure_provisioned().await?;
        info!(
            schema = %vectors.config.schema,
            dimension = vectors.config.dimension,
            "expense vector store started"
        );
        Ok(vectors)
    }

    /// Active configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Shared connection pool.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Query guard for ad hoc statements.
    pub fn guard(&self) -> &QueryGuard {
        &self.guard
    }

    /// Schema provisioner.
    pub fn provisioner(&self) -> &SchemaProvisioner {
        &self.provisioner
    }

    /// Ingestion pipeline.
    pub fn ingestor(&self) -> &EmbeddingIngestor {
        &self.ingestor
    }

    /// Similarity search engine.
    pub fn search(&self) -> &SimilaritySearch {
        &self.search
    }

    /// Closes the pool.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }
}

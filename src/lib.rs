#![warn(missing_docs)]
//! Embedding-backed similarity retrieval for expense records.
//!
//! Embeddings live in a pgvector column next to the expense tables. Every read and write is
//! scoped to one user, parameters are validated before a pooled connection is leased, and the
//! schema is provisioned idempotently at startup.

pub mod config;
pub mod embedder;
pub mod error;
pub mod guard;
pub mod ids;
pub mod ingest;
pub mod pool;
pub mod schema;
pub mod search;
pub mod service;
pub mod table;

pub use config::{AnnIndex, StoreArgs, StoreConfig, DEFAULT_DIMENSION, DEFAULT_SEARCH_LIMIT};
pub use error::{Result, VectorError};
pub use guard::{BoundParam, Embedding, Identifier, QueryGuard};
pub use ids::EntityTag;
pub use ingest::{EmbeddingDraft, EmbeddingIngestor, NewEmbedding};
pub use pool::{ConnectionPool, PoolStats, PooledConnection};
pub use schema::SchemaProvisioner;
pub use search::{SimilarExpense, SimilaritySearch};
pub use service::ExpenseVectors;
pub use table::{StoreTables, TableName};

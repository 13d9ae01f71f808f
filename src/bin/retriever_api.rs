use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use clap::Parser;
use expensetrack::embedder::openai::{OpenAiEmbedder, OpenAiSettings};
use expensetrack::embedder::TextEmbedder;
use expensetrack::ids::{self, EntityTag};
use expensetrack::{
    Embedding, EmbeddingDraft, ExpenseVectors, Identifier, NewEmbedding, SimilarExpense,
    StoreArgs, VectorError,
};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::runtime::Runtime;
use tokio::sync::Mutex;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Header the upstream auth middleware sets to the authenticated user id.
const USER_HEADER: &str = "x-user-id";

#[derive(Parser, Debug)]
#[command(
    name = "expensetrack-retriever",
    about = "HTTP API for expense embedding ingestion and per-user similarity search"
)]
struct ApiCli {
    /// Address to bind the HTTP server to (host:port).
    #[arg(long, env = "EXPENSETRACK_BIND", default_value = "127.0.0.1:8080")]
    bind: String,

    /// OpenAI API key used for expense and query embeddings.
    #[arg(long, env = "OPENAI_API_KEY")]
    openai_api_key: String,

    /// Embedding model identifier.
    #[arg(
        long,
        env = "EXPENSETRACK_OPENAI_MODEL",
        default_value = "text-embedding-3-small"
    )]
    openai_model: String,

    /// Base URL for OpenAI-compatible endpoints.
    #[arg(
        long,
        env = "EXPENSETRACK_OPENAI_BASE",
        default_value = "https://api.openai.com/v1"
    )]
    openai_base_url: String,

    /// Seconds before OpenAI requests time out.
    #[arg(long, env = "EXPENSETRACK_OPENAI_TIMEOUT_SECS", default_value_t = 30)]
    openai_timeout_secs: u64,

    /// Retry attempts for transient embedding errors.
    #[arg(long, env = "EXPENSETRACK_OPENAI_MAX_RETRIES", default_value_t = 5)]
    max_retries: usize,

    /// Max cached query embeddings kept in-memory (0 disables caching).
    #[arg(long, default_value_t = 1024)]
    embedding_cache_size: usize,

    #[command(flatten)]
    store: StoreArgs,
}

#[derive(Clone)]
struct AppState {
    vectors: ExpenseVectors,
    embedder: Arc<OpenAiEmbedder>,
    embedding_cache: Option<Arc<Mutex<LruCache<String, Vec<f32>>>>>,
}

#[derive(Debug, Deserialize)]
struct IngestRequest {
    expense_id: Value,
    #[serde(default)]
    content: String,
    /// Precomputed vector; `content` is embedded when absent.
    #[serde(default)]
    embedding: Option<Value>,
    /// Drop earlier embeddings of the same expense first.
    #[serde(default)]
    replace: bool,
}

#[derive(Debug, Serialize)]
struct IngestResponse {
    id: i64,
    expense_id: String,
}

#[derive(Debug, Serialize)]
struct RemoveResponse {
    removed: u64,
}

#[derive(Debug, Deserialize)]
struct SimilarRequest {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct SimilarResponse {
    matches: Vec<SimilarExpense>,
    meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
struct ResponseMeta {
    limit: usize,
    latency_ms: f64,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    let cli = ApiCli::parse();
    let config = cli.store.build_config()?;
    // The blocking client must be built outside the async runtime.
    let embedder = Arc::new(OpenAiEmbedder::new(OpenAiSettings {
        api_key: cli.openai_api_key.clone(),
        base_url: cli.openai_base_url.clone(),
        model: cli.openai_model.clone(),
        dimensions: config.dimension,
        timeout: Duration::from_secs(cli.openai_timeout_secs.max(1)),
        max_attempts: cli.max_retries.max(1),
    })?);
    let addr: SocketAddr = cli
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", cli.bind))?;

    let runtime = Runtime::new().context("failed to start tokio runtime")?;
    let served = runtime.block_on(async {
        let vectors = ExpenseVectors::start(config)
            .await
            .context("failed to provision embedding schema")?;
        let state = AppState {
            vectors: vectors.clone(),
            embedder: embedder.clone(),
            embedding_cache: build_cache(cli.embedding_cache_size),
        };
        let result = serve(addr, state).await;
        vectors.shutdown();
        result
    });
    if let Err(err) = &served {
        error!(error = %format!("{err:#}"), "retriever stopped");
    }
    served
}

async fn serve(addr: SocketAddr, state: AppState) -> Result<()> {
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/embeddings", post(ingest_handler))
        .route("/v1/embeddings/:expense_id", delete(remove_handler))
        .route("/v1/similar", post(similar_handler))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "expensetrack-retriever listening");
    axum::serve(listener, app)
        .await
        .context("server shutdown")?;
    Ok(())
}

async fn healthz(State(state): State<AppState>) -> StatusCode {
    if state.vectors.pool().is_closed() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

async fn ingest_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, ApiError> {
    let user_id = caller_id(&headers)?;
    let expense_id = Identifier::parse("expense ID", &request.expense_id).map_err(store_error)?;
    if !ids::owns(user_id.as_str(), EntityTag::Expense, expense_id.as_str()) {
        return Err(forbidden("expense does not belong to the caller"));
    }

    let record = match request.embedding {
        Some(embedding) => EmbeddingDraft {
            user_id: Value::String(user_id.to_string()),
            expense_id: request.expense_id,
            content: request.content,
            embedding,
        }
        .validate()
        .map_err(store_error)?,
        None => {
            if request.content.trim().is_empty() {
                return Err(bad_request("content must not be empty without an embedding"));
            }
            let vector = embed_text(&state, request.content.clone())
                .await
                .map_err(upstream_error)?;
            NewEmbedding::new(user_id, expense_id.clone(), request.content, vector)
                .map_err(store_error)?
        }
    };

    let ingestor = state.vectors.ingestor();
    let written = if request.replace {
        ingestor.replace(record).await
    } else {
        ingestor.ingest(record).await
    };
    let id = written.map_err(store_error)?;
    Ok(Json(IngestResponse {
        id,
        expense_id: expense_id.to_string(),
    }))
}

async fn remove_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(expense_id): Path<String>,
) -> Result<Json<RemoveResponse>, ApiError> {
    let user_id = caller_id(&headers)?;
    if !ids::owns(user_id.as_str(), EntityTag::Expense, &expense_id) {
        return Err(forbidden("expense does not belong to the caller"));
    }
    let removed = state
        .vectors
        .ingestor()
        .remove(&user_id, &Identifier::from(expense_id))
        .await
        .map_err(store_error)?;
    Ok(Json(RemoveResponse { removed }))
}

async fn similar_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SimilarRequest>,
) -> Result<Json<SimilarResponse>, ApiError> {
    let user_id = caller_id(&headers)?;
    let query = request.query.trim().to_string();
    if query.is_empty() {
        return Err(bad_request("query text must not be empty"));
    }
    let requested = requested_limit(request.limit)?;
    let search = state.vectors.search();
    let limit = search.effective_limit(requested);
    let start = Instant::now();
    let vector = embed_text(&state, query).await.map_err(upstream_error)?;
    let embedding = Embedding::new(vector).map_err(store_error)?;
    let matches = search
        .search(&embedding, &user_id, Some(limit))
        .await
        .map_err(store_error)?;
    Ok(Json(SimilarResponse {
        matches,
        meta: ResponseMeta {
            limit,
            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
        },
    }))
}

fn requested_limit(limit: Option<usize>) -> Result<Option<usize>, ApiError> {
    match limit {
        Some(0) => Err(bad_request("limit must be a positive integer")),
        other => Ok(other),
    }
}

fn caller_id(headers: &HeaderMap) -> Result<Identifier, ApiError> {
    let value = headers
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| error_body(StatusCode::UNAUTHORIZED, "missing x-user-id header"))?;
    Ok(Identifier::from(value))
}

fn status_for(err: &VectorError) -> StatusCode {
    if err.is_validation() {
        StatusCode::BAD_REQUEST
    } else if err.is_retryable() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

fn store_error(err: VectorError) -> ApiError {
    let status = status_for(&err);
    if status.is_server_error() {
        error!(error = %err, "embedding store request failed");
    }
    error_body(status, err.to_string())
}

fn upstream_error(err: anyhow::Error) -> ApiError {
    error!(error = %format!("{err:#}"), "embedding request failed");
    error_body(StatusCode::BAD_GATEWAY, format!("{err:#}"))
}

fn bad_request(message: impl Into<String>) -> ApiError {
    error_body(StatusCode::BAD_REQUEST, message)
}

fn forbidden(message: impl Into<String>) -> ApiError {
    error_body(StatusCode::FORBIDDEN, message)
}

fn error_body(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}

async fn embed_text(state: &AppState, text: String) -> Result<Vec<f32>> {
    if let Some(cache) = &state.embedding_cache {
        if let Some(hit) = {
            let mut guard = cache.lock().await;
            guard.get(&text).cloned()
        } {
            return Ok(hit);
        }
    }

    let embedder = state.embedder.clone();
    let input = text.clone();
    let embedding = tokio::task::spawn_blocking(move || embedder.embed(&input))
        .await
        .map_err(|err| anyhow!("embedding task join error: {err}"))??;

    if let Some(cache) = &state.embedding_cache {
        let mut guard = cache.lock().await;
        guard.put(text, embedding.clone());
    }
    Ok(embedding)
}

fn build_cache(size: usize) -> Option<Arc<Mutex<LruCache<String, Vec<f32>>>>> {
    NonZeroUsize::new(size).map(|capacity| Arc::new(Mutex::new(LruCache::new(capacity))))
}

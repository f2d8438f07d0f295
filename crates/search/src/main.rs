//! Quarry Search Service
//!
//! Hybrid document search over hierarchically chunked documents:
//! - Semantic search (cosine similarity over CHILD chunk embeddings)
//! - Lexical search (term overlap against derived lexical keys)
//! - Relation search (slot matching over extracted triples)
//! - RRF fusion with an optional cross-encoder rerank stage

mod assemble;
mod handlers;
mod pipeline;
mod query;
mod rerank;
mod retrieval;

use axum::{
    routing::{delete, get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use pipeline::SearchPipeline;
use quarry_common::{
    config::AppConfig,
    embeddings::{create_embedder, Embedder},
    metrics::{register_metrics, LATENCY_BUCKETS},
    store::{ChunkStore, VectorIndex},
    VERSION,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<ChunkStore>,
    pub vectors: Arc<VectorIndex>,
    pub embedder: Arc<dyn Embedder>,
    pub pipeline: Arc<SearchPipeline>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {e}");
        e
    })?;
    let config = Arc::new(config);

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.observability.log_level.clone()));
    if config.observability.json_logging {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .compact()
            .init();
    }

    info!("Starting Quarry Search Service v{}", VERSION);

    // Initialize metrics
    register_metrics();
    if config.observability.metrics_port > 0 {
        let metrics_addr =
            SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        PrometheusBuilder::new()
            .with_http_listener(metrics_addr)
            .set_buckets(LATENCY_BUCKETS)?
            .install()?;
        info!("Metrics exposition on {}", metrics_addr);
    }

    // Initialize the store, vector index, and embedding provider
    let store = Arc::new(ChunkStore::new());
    let vectors = Arc::new(VectorIndex::new(
        config.embedding.dimension,
        config.embedding.model.clone(),
    ));
    let embedder = create_embedder(&config.embedding)?;
    info!(
        model = embedder.model_name(),
        dimension = embedder.dimension(),
        "Embedding provider ready"
    );

    let pipeline = Arc::new(SearchPipeline::new(
        store.clone(),
        vectors.clone(),
        embedder.clone(),
        &config.search,
        &config.rerank,
    ));

    let state = AppState {
        config: config.clone(),
        store,
        vectors,
        embedder,
        pipeline,
    };

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let api_routes = Router::new()
        // Search
        .route("/search", post(handlers::search))
        // Document ingest
        .route("/documents", post(handlers::create_document))
        .route("/documents/{id}/chunks", post(handlers::ingest_chunks))
        .route("/documents/{id}", delete(handlers::delete_document));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/health/index", get(handlers::index_health))
        .nest("/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

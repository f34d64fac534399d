//! BioSearch API Gateway
//!
//! HTTP entry point for the retrieval-augmented search service.
//! Handles:
//! - RAG queries over the paper corpus
//! - Raw document inspection
//! - Health, readiness, and Prometheus metrics
//! - Observability (logging, request ids)

mod handlers;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use biosearch_common::{
    config::AppConfig,
    db::{DbPool, PaperStore, Repository},
    embeddings::create_embedder,
    metrics::{self, metric_name, EMBEDDING_BUCKETS, LATENCY_BUCKETS},
    rag::{create_generator, RagEngine},
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub engine: Arc<RagEngine>,
    pub metrics: Option<PrometheusHandle>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Arc::new(AppConfig::load().context("Failed to load configuration")?);

    init_tracing(&config);

    info!(
        service = %config.observability.service_name,
        "Starting BioSearch API Gateway v{}",
        biosearch_common::VERSION
    );

    // Initialize metrics
    metrics::register_metrics();
    let metrics_handle = install_prometheus().context("Failed to install metrics recorder")?;

    // Unreachable database is fatal
    let pool = DbPool::new(&config.database).await.map_err(|e| {
        error!(error = %e, "Database unavailable at startup");
        e
    })?;
    let repository = Repository::new(pool);

    match repository.vector_index_exists(&config.search.vector_index).await {
        Ok(true) => info!(index = %config.search.vector_index, "Vector index found"),
        Ok(false) => warn!(
            index = %config.search.vector_index,
            "Vector index not found, searches will fall back to exact scans"
        ),
        Err(e) => warn!(error = %e, "Could not verify vector index"),
    }

    let embedder = create_embedder(&config.embedding)?;
    let generator = create_generator(&config.generation);
    if !config.generation_enabled() {
        warn!("No generation API key set, generate=true returns the context echo");
    }
    let store: Arc<dyn PaperStore> = Arc::new(repository);

    let engine = RagEngine::new(store, embedder, generator, config.search.vector_index.clone());

    let state = AppState {
        config: config.clone(),
        engine: Arc::new(engine),
        metrics: Some(metrics_handle),
    };

    let app = create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    serve(listener, app, &config).await?;

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.observability.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn install_prometheus() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(metric_name("rag_duration_seconds")), LATENCY_BUCKETS)?
        .set_buckets_for_metric(
            Matcher::Full(metric_name("embedding_duration_seconds")),
            EMBEDDING_BUCKETS,
        )?
        .install_recorder()?;

    info!("Prometheus metrics recorder installed");
    Ok(handle)
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

    Router::new()
        // Health endpoints
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .route("/metrics", get(handlers::health::metrics))

        // Query endpoints
        .route("/rag", post(handlers::rag::rag))
        .route("/5-docs", get(handlers::docs::sample_documents))

        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Serve until a shutdown signal arrives, then give in-flight requests the
/// configured grace period.
async fn serve(listener: tokio::net::TcpListener, app: Router, config: &AppConfig) -> anyhow::Result<()> {
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);

    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = shutdown_rx.changed().await;
    });
    let mut server = tokio::spawn(async move { server.await });

    tokio::select! {
        result = &mut server => {
            result??;
            return Ok(());
        }
        _ = shutdown_signal() => {}
    }

    let _ = shutdown_tx.send(true);

    match tokio::time::timeout(config.shutdown_timeout(), server).await {
        Ok(result) => result??,
        Err(_) => warn!(
            timeout_secs = config.server.shutdown_timeout_secs,
            "Graceful shutdown timed out, dropping remaining connections"
        ),
    }

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use biosearch_common::db::models::{FieldValues, Paper};
    use biosearch_common::db::{PaperResult, VectorQuery};
    use biosearch_common::embeddings::HashEmbedder;
    use biosearch_common::errors::{AppError, Result};
    use biosearch_common::rag::{ContextEcho, Predicate};
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    struct FakeStore {
        records: Vec<PaperResult>,
        healthy: bool,
    }

    #[async_trait]
    impl PaperStore for FakeStore {
        async fn vector_search(&self, query: &VectorQuery, _filter: &Predicate) -> Result<Vec<PaperResult>> {
            Ok(self.records.iter().take(query.limit).cloned().collect())
        }

        async fn sample_documents(&self, limit: u64) -> Result<Vec<Value>> {
            let docs = (0..7).map(|n| json!({"_id": {"$oid": format!("oid-{}", n)}, "n": n}));
            Ok(docs.take(limit as usize).collect())
        }

        async fn papers_after(&self, _after: Option<Uuid>, _limit: u64) -> Result<Vec<Paper>> {
            Ok(Vec::new())
        }

        async fn set_embedding(&self, _id: Uuid, _embedding: &[f32], _model: &str) -> Result<()> {
            Ok(())
        }

        async fn ping(&self) -> Result<()> {
            if self.healthy {
                Ok(())
            } else {
                Err(AppError::DatabaseConnection { message: "connection refused".into() })
            }
        }
    }

    fn record(n: u128) -> PaperResult {
        PaperResult {
            title: Some(format!("Spaceflight and bone {}", n)),
            abstract_text: Some("Microgravity reduces bone mineral density. ".repeat(20)),
            publication_date: Some(json!("2021-02-01")),
            categories: Some(FieldValues::List(vec!["Article".into()])),
            ..PaperResult::bare(Uuid::from_u128(n), 0.8)
        }
    }

    fn app(healthy: bool) -> Router {
        let store = Arc::new(FakeStore {
            records: (1..=10).map(record).collect(),
            healthy,
        });
        let engine = RagEngine::new(store, Arc::new(HashEmbedder::new(16)), Arc::new(ContextEcho), "idx");

        create_router(AppState {
            config: Arc::new(AppConfig::default()),
            engine: Arc::new(engine),
            metrics: None,
        })
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn post_rag(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/rag")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_rag_endpoint() {
        let (status, body) = send(app(true), post_rag(json!({"query": "microgravity bone density", "k": 3}))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["query"], "microgravity bone density");
        assert_eq!(body["count"], 3);
        assert_eq!(body["results"].as_array().unwrap().len(), 3);
        assert_eq!(body["results"][0]["year"], 2021);
        assert_eq!(body["results"][0]["categorias"], json!(["Article"]));
        assert!(body["results"][0].get("autores").is_some());
        assert!(body["results"][0].get("tipo_articulo").is_some());
        assert!(body["results"][0].get("categories").is_none());
        assert_eq!(body["answer"], Value::Null);
        assert!(body["context_preview"].as_str().unwrap().chars().count() <= 1000);
    }

    #[tokio::test]
    async fn test_rag_generate_echoes_context() {
        let (status, body) = send(app(true), post_rag(json!({"query": "bone", "generate": true}))).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body["answer"].as_str().unwrap().starts_with("Relevant context:\n"));
    }

    #[tokio::test]
    async fn test_rag_rejects_empty_query() {
        let (status, body) = send(app(true), post_rag(json!({"query": ""}))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_rag_rejects_out_of_range_k() {
        let (status, _) = send(app(true), post_rag(json!({"query": "bone", "k": 0}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_rag_rejects_malformed_body() {
        let request = Request::builder()
            .method("POST")
            .uri("/rag")
            .header("content-type", "application/json")
            .body(Body::from("{\"k\": 3}"))
            .unwrap();

        let (status, _) = send(app(true), request).await;
        assert!(status.is_client_error());
    }

    #[tokio::test]
    async fn test_five_docs() {
        let request = Request::builder().uri("/5-docs").body(Body::empty()).unwrap();
        let (status, body) = send(app(true), request).await;

        assert_eq!(status, StatusCode::OK);
        let docs = body["docs"].as_array().unwrap();
        assert_eq!(docs.len(), 5);
        assert_eq!(docs[0]["_id"], "oid-0");
    }

    #[tokio::test]
    async fn test_health_and_ready() {
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, body) = send(app(true), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");

        let request = Request::builder().uri("/ready").body(Body::empty()).unwrap();
        let (status, body) = send(app(true), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");
        assert_eq!(body["checks"]["database"]["status"], "up");
        assert_eq!(body["checks"]["generator"], "context-echo");
    }

    #[tokio::test]
    async fn test_ready_reports_database_down() {
        let request = Request::builder().uri("/ready").body(Body::empty()).unwrap();
        let (status, body) = send(app(false), request).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "not_ready");
        assert_eq!(body["checks"]["database"]["status"], "down");
    }

    #[tokio::test]
    async fn test_metrics_without_recorder() {
        let request = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let response = app(true).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}

//! HTTP API over the search engine
//!
//! | Route | Operation |
//! |---|---|
//! | `GET /` | service banner |
//! | `GET /health` | store check, 503 when the store cannot be read |
//! | `POST /search` | vector search |
//! | `POST /search_rerank` | vector search + LLM reranking |
//! | `POST /search_hybrid` | description vectors + tag vectors, fused by RRF |
//! | `POST /search_hybrid_bm25` | description vectors + BM25 keywords, fused by RRF |

pub mod models;

use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::engine::{HybridMode, SearchEngine};
use crate::error::SearchError;
use crate::info_print;
use models::{
    ErrorBody, HybridSearchRequest, HybridSearchResponse, RerankRequest, RerankResponse,
    SearchRequest, SearchResponse,
};

const ENDPOINTS: [&str; 5] = [
    "/search",
    "/search_rerank",
    "/search_hybrid",
    "/search_hybrid_bm25",
    "/health",
];

#[derive(Clone)]
pub struct AppState {
    engine: Arc<SearchEngine>,
}

/// Errors returned to HTTP clients as `{"detail": ...}`
#[derive(Debug)]
pub enum ApiError {
    /// Request body missing, malformed or out of range (422)
    Validation(String),
    /// The engine could not complete the operation (500)
    Failed {
        operation: &'static str,
        error: SearchError,
    },
    /// A dependency is down (503)
    Unavailable(String),
}

impl ApiError {
    fn failed(operation: &'static str) -> impl FnOnce(SearchError) -> Self {
        move |error| Self::Failed { operation, error }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            Self::Validation(detail) => (StatusCode::UNPROCESSABLE_ENTITY, detail),
            Self::Failed { operation, error } => {
                error!(operation, error = %error, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("{} failed: {}", operation, error),
                )
            }
            Self::Unavailable(detail) => (StatusCode::SERVICE_UNAVAILABLE, detail),
        };
        (status, Json(ErrorBody { detail })).into_response()
    }
}

pub fn router(engine: Arc<SearchEngine>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/search", post(search))
        .route("/search_rerank", post(search_rerank))
        .route("/search_hybrid", post(search_hybrid))
        .route("/search_hybrid_bm25", post(search_hybrid_bm25))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(AppState { engine })
}

async fn root() -> impl IntoResponse {
    Json(json!({
        "message": "Tablescout table search API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": ENDPOINTS,
    }))
}

async fn health(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let health = state
        .engine
        .health()
        .await
        .map_err(|e| ApiError::Unavailable(format!("Store error: {:#}", e)))?;

    Ok(Json(json!({
        "status": "healthy",
        "store": health,
    })))
}

async fn search(
    State(state): State<AppState>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, ApiError> {
    let Json(request) = payload?;
    let top_n = request.validated_top_n().map_err(ApiError::Validation)?;

    let results = state
        .engine
        .vector_search(&request.query, top_n, request.method)
        .await
        .map_err(ApiError::failed("Search"))?;

    Ok(Json(results.into()))
}

async fn search_rerank(
    State(state): State<AppState>,
    payload: Result<Json<RerankRequest>, JsonRejection>,
) -> Result<Json<RerankResponse>, ApiError> {
    let Json(request) = payload?;
    let top_n = request.validated_top_n().map_err(ApiError::Validation)?;

    let outcome = state
        .engine
        .search_rerank(&request.query, &request.prompt, top_n, request.method)
        .await
        .map_err(ApiError::failed("Reranking"))?;

    if outcome.is_degraded() {
        warn!(
            degraded_batches = outcome.degraded_batches,
            unscored = outcome.unscored,
            "rerank response contains fallback scores"
        );
    }
    Ok(Json(outcome.into()))
}

async fn search_hybrid(
    state: State<AppState>,
    payload: Result<Json<HybridSearchRequest>, JsonRejection>,
) -> Result<Json<HybridSearchResponse>, ApiError> {
    hybrid(state, payload, HybridMode::Tags).await
}

async fn search_hybrid_bm25(
    state: State<AppState>,
    payload: Result<Json<HybridSearchRequest>, JsonRejection>,
) -> Result<Json<HybridSearchResponse>, ApiError> {
    hybrid(state, payload, HybridMode::Bm25).await
}

async fn hybrid(
    State(state): State<AppState>,
    payload: Result<Json<HybridSearchRequest>, JsonRejection>,
    mode: HybridMode,
) -> Result<Json<HybridSearchResponse>, ApiError> {
    let Json(request) = payload?;
    let options = request.options(mode).map_err(ApiError::Validation)?;

    let operation = match mode {
        HybridMode::Tags => "Hybrid search",
        HybridMode::Bm25 => "Hybrid BM25 search",
    };
    let results = state
        .engine
        .hybrid_search(&request.query, &options)
        .await
        .map_err(ApiError::failed(operation))?;

    Ok(Json(results.into()))
}

/// Run the API until Ctrl-C, then close the engine
pub async fn serve(config: &Config, host: Option<String>, port: Option<u16>) -> Result<()> {
    let host = host.unwrap_or_else(|| config.server.host.clone());
    let port = port.unwrap_or(config.server.port);

    let engine = Arc::new(SearchEngine::open(config)?);
    let app = router(Arc::clone(&engine));

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info_print!("🚀 Serving table search API on http://{}", addr);
    info!(%addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    match Arc::try_unwrap(engine) {
        Ok(engine) => engine.close()?,
        Err(_) => warn!("search engine still referenced after shutdown, skipping close"),
    }
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    fn app() -> Router {
        let engine = engine_with(
            ListSource::new("vector", vec![("t1", 0.9), ("t2", 0.8), ("t3", 0.7)]),
            ListSource::new("tags", vec![("t2", 0.9), ("t1", 0.8), ("t4", 0.7)]),
            metadata(&["t1", "t2", "t3"]),
            scorer(&[("t1", 0.3), ("t2", 0.6), ("t3", 0.9)]),
        );
        router(Arc::new(engine))
    }

    async fn post_json(app: Router, uri: &str, body: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_root_lists_endpoints() {
        let response = app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["endpoints"].as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_search() {
        let (status, body) = post_json(app(), "/search", r#"{"query": "pupils", "top_n": 2}"#).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 2);
        assert_eq!(body["results"][0]["table_name"], "t1");
    }

    #[tokio::test]
    async fn test_out_of_range_top_n_is_422() {
        let (status, body) = post_json(app(), "/search", r#"{"query": "q", "top_n": 0}"#).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["detail"].as_str().unwrap().contains("top_n"));
    }

    #[tokio::test]
    async fn test_malformed_body_is_422() {
        let (status, body) = post_json(app(), "/search", r#"{"top_n": 5}"#).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["detail"].is_string());

        let (status, _) =
            post_json(app(), "/search", r#"{"query": "q", "method": "manhattan"}"#).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_hybrid_reports_both_ranks() {
        let (status, body) = post_json(app(), "/search_hybrid", r#"{"query": "q", "top_n": 4}"#).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 4);
        let first = &body["results"][0];
        assert_eq!(first["table_name"], "t1");
        assert_eq!(first["vector_rank"], 1);
        assert_eq!(first["tags_rank"], 2);
        let last = &body["results"][3];
        assert_eq!(last["table_name"], "t4");
        assert_eq!(last["vector_rank"], Value::Null);
    }

    #[tokio::test]
    async fn test_hybrid_bm25_route() {
        let (status, body) =
            post_json(app(), "/search_hybrid_bm25", r#"{"query": "q", "rrf_k": 20}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 4);
    }

    #[tokio::test]
    async fn test_rerank_orders_by_llm_score() {
        let (status, body) =
            post_json(app(), "/search_rerank", r#"{"query": "q", "top_n": 3}"#).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["degraded"], false);
        let names: Vec<&str> = body["results"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["table_name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["t3", "t2", "t1"]);
    }

    #[tokio::test]
    async fn test_rerank_degraded_flag() {
        let engine = engine_with(
            ListSource::new("vector", vec![("t1", 0.9)]),
            ListSource::new("tags", vec![]),
            metadata(&["t1"]),
            TableScorer::failing(),
        );
        let (status, body) = post_json(
            router(Arc::new(engine)),
            "/search_rerank",
            r#"{"query": "q"}"#,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["degraded"], true);
        assert_eq!(body["results"][0]["score"], 0.0);
    }

    #[tokio::test]
    async fn test_retrieval_failure_is_500() {
        let engine = engine_with(
            ListSource::new("vector", vec![("t1", 0.9)]),
            ListSource::failing("tags"),
            metadata(&[]),
            scorer(&[]),
        );
        let (status, body) =
            post_json(router(Arc::new(engine)), "/search_hybrid", r#"{"query": "q"}"#).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["detail"]
            .as_str()
            .unwrap()
            .starts_with("Hybrid search failed"));
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

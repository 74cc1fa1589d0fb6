use std::sync::Arc;
use std::time::Instant;

use axum::extract::{DefaultBodyLimit, MatchedPath, Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::{
    Json, Router,
    routing::{get, post},
};
use serde_json::json;
use tower::ServiceBuilder;

use super::{assets, tags};
use crate::auth::Identity;
use crate::config::Config;
use crate::error::Result;
use crate::metrics::{Metrics, MetricsSummary, UNMATCHED_ROUTE};
use crate::registry::Registry;
use crate::storage::LocalStorage;
use crate::store::{SqliteStore, StorageStats, Store};

// Room for multipart boundaries and text fields on top of the file itself.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

pub struct AppState {
    pub registry: Registry<LocalStorage>,
    pub identity: Identity,
    pub metrics: Metrics,
}

impl AppState {
    /// Opens the database and blob directory named by `config`. The data
    /// directory must already exist.
    pub fn open(config: &Config) -> Result<Self> {
        let store = SqliteStore::new(config.server.db_path())?;
        store.initialize()?;
        let blobs = LocalStorage::new(&config.server.blob_dir());

        Ok(Self {
            registry: Registry::new(
                Arc::new(store),
                Arc::new(blobs),
                config.server.max_upload_bytes,
            ),
            identity: Identity::from_config(&config.identity),
            metrics: Metrics::new()?,
        })
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Response {
    match state.registry.store().ping() {
        Ok(()) => Json(json!({ "status": "ok", "database": "sqlite" })).into_response(),
        Err(e) => {
            tracing::error!("Health check failed: {e}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "degraded", "issues": [format!("database: {e}")] })),
            )
                .into_response()
        }
    }
}

fn storage_stats(state: &AppState) -> Option<StorageStats> {
    state
        .registry
        .store()
        .storage_stats()
        .inspect_err(|e| tracing::warn!("Cannot read storage totals: {e}"))
        .ok()
}

async fn metrics_summary(State(state): State<Arc<AppState>>) -> Json<MetricsSummary> {
    Json(state.metrics.summary(storage_stats(&state)))
}

async fn metrics_prometheus(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.render(storage_stats(&state)) {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            tracing::error!("Failed to render metrics: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn log_request(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string());
    let start = Instant::now();

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status();

    tracing::info!(
        "{} {} {} {}ms",
        method,
        uri.path(),
        status.as_u16(),
        latency.as_millis()
    );

    // Scrapes are not traffic.
    if !uri.path().starts_with("/metrics") {
        state.metrics.observe_request(
            method.as_str(),
            route.as_deref().unwrap_or(UNMATCHED_ROUTE),
            status.as_u16(),
            latency,
        );
    }

    response
}

fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        // Assets
        .route(
            "/assets",
            get(assets::search_assets).post(assets::create_asset),
        )
        .route(
            "/assets/{id}",
            get(assets::get_asset)
                .patch(assets::update_asset)
                .delete(assets::delete_asset),
        )
        .route(
            "/assets/{id}/file",
            get(assets::download_current).put(assets::upload_version),
        )
        .route("/assets/{id}/versions", get(assets::list_versions))
        .route(
            "/assets/{id}/versions/{number}/file",
            get(assets::download_version),
        )
        .route(
            "/assets/{id}/tags",
            post(assets::add_tags).put(assets::set_tags),
        )
        // Tags
        .route("/tags", get(tags::list_tags))
        .route("/tags/popular", get(tags::popular_tags))
        .route("/tags/categories", get(tags::list_categories))
        .route("/tags/search", get(tags::search_tags))
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let body_limit = usize::try_from(state.registry.max_upload_bytes())
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_summary))
        .route("/metrics/prometheus", get(metrics_prometheus))
        .nest("/api/v1", api_router())
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn_with_state(
                    Arc::clone(&state),
                    log_request,
                ))
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .with_state(state)
}

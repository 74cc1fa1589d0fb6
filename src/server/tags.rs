use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
    response::IntoResponse,
};

use crate::auth::RequireRead;
use crate::server::AppState;
use crate::server::dto::{PopularParams, TagListParams, TagSearchParams};
use crate::server::response::{ApiError, ApiResponse};

/// GET /tags?category= - All tags, most used first
pub async fn list_tags(
    _auth: RequireRead,
    State(state): State<Arc<AppState>>,
    Query(params): Query<TagListParams>,
) -> Result<impl IntoResponse, ApiError> {
    let tags = state.registry.list_tags(params.category()?)?;
    Ok(Json(ApiResponse::success(tags)))
}

/// GET /tags/popular?limit=
pub async fn popular_tags(
    _auth: RequireRead,
    State(state): State<Arc<AppState>>,
    Query(params): Query<PopularParams>,
) -> Result<impl IntoResponse, ApiError> {
    let tags = state.registry.popular_tags(params.limit)?;
    Ok(Json(ApiResponse::success(tags)))
}

/// GET /tags/search?q=
pub async fn search_tags(
    _auth: RequireRead,
    State(state): State<Arc<AppState>>,
    Query(params): Query<TagSearchParams>,
) -> Result<impl IntoResponse, ApiError> {
    let tags = state.registry.search_tags(&params.q)?;
    Ok(Json(ApiResponse::success(tags)))
}

/// GET /tags/categories
pub async fn list_categories(
    _auth: RequireRead,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    Json(ApiResponse::success(state.registry.categories()))
}

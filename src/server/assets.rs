use std::sync::Arc;

use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Multipart, Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;

use crate::auth::{OptionalActor, RequireRead, RequireWrite};
use crate::registry::Download;
use crate::server::AppState;
use crate::server::dto::{AssetFields, SearchParams, TagsRequest};
use crate::server::response::{ApiError, ApiResponse};
use crate::types::AssetUpdate;

/// GET /assets - Search assets visible to the caller
pub async fn search_assets(
    OptionalActor(actor): OptionalActor,
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<impl IntoResponse, ApiError> {
    let query = params.into_query()?;
    let page = state.registry.search(&actor, &query)?;
    Ok(Json(ApiResponse::success(page)))
}

/// POST /assets - Register a new asset from a multipart upload
pub async fn create_asset(
    RequireWrite(actor): RequireWrite,
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut fields = AssetFields::default();
    let mut file: Option<(Option<String>, Bytes)> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        ApiError::new(e.status(), format!("Failed to read multipart: {}", e.body_text()))
    })? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        if name == "file" {
            let file_name = field.file_name().map(str::to_string);
            let data = field.bytes().await.map_err(|e| {
                ApiError::new(e.status(), format!("Failed to read file: {}", e.body_text()))
            })?;
            file = Some((file_name, data));
        } else {
            let value = field.text().await.map_err(|e| {
                ApiError::new(e.status(), format!("Failed to read field '{name}': {}", e.body_text()))
            })?;
            if !fields.set(&name, value) {
                tracing::debug!("Ignoring unknown upload field '{name}'");
            }
        }
    }

    let (file_name, data) = file.ok_or_else(|| ApiError::bad_request("File field is required"))?;
    let request = fields.into_request(file_name.as_deref())?;

    let asset = state.registry.create_asset(&actor, request, data).await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(asset))))
}

/// GET /assets/{id}
pub async fn get_asset(
    RequireRead(actor): RequireRead,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let asset = state.registry.get_asset(&actor, &id)?;
    Ok(Json(ApiResponse::success(asset)))
}

/// PATCH /assets/{id} - Update name and/or description
pub async fn update_asset(
    RequireWrite(actor): RequireWrite,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(update): Json<AssetUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let asset = state.registry.update_details(&actor, &id, &update)?;
    Ok(Json(ApiResponse::success(asset)))
}

/// DELETE /assets/{id}
pub async fn delete_asset(
    RequireWrite(actor): RequireWrite,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.registry.delete_asset(&actor, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /assets/{id}/file - Stream the current payload
pub async fn download_current(
    RequireRead(actor): RequireRead,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let download = state.registry.download(&actor, &id, None).await?;
    Ok(stream_download(download))
}

/// GET /assets/{id}/versions/{n}/file - Stream a historical payload
pub async fn download_version(
    RequireRead(actor): RequireRead,
    State(state): State<Arc<AppState>>,
    Path((id, number)): Path<(String, i64)>,
) -> Result<Response, ApiError> {
    let download = state.registry.download(&actor, &id, Some(number)).await?;
    Ok(stream_download(download))
}

/// PUT /assets/{id}/file - Upload a new version
pub async fn upload_version(
    RequireWrite(actor): RequireWrite,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut data: Option<Bytes> = None;
    let mut changes: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        ApiError::new(e.status(), format!("Failed to read multipart: {}", e.body_text()))
    })? {
        match field.name() {
            Some("file") => {
                data = Some(field.bytes().await.map_err(|e| {
                    ApiError::new(e.status(), format!("Failed to read file: {}", e.body_text()))
                })?);
            }
            Some("changes") => {
                let text = field.text().await.map_err(|e| {
                    ApiError::new(e.status(), format!("Failed to read changes: {}", e.body_text()))
                })?;
                changes = Some(text).filter(|c| !c.trim().is_empty());
            }
            _ => {}
        }
    }

    let data = data.ok_or_else(|| ApiError::bad_request("File field is required"))?;
    let version = state
        .registry
        .upload_version(&actor, &id, data, changes.as_deref())
        .await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(version))))
}

/// GET /assets/{id}/versions - Version history, newest first
pub async fn list_versions(
    RequireRead(actor): RequireRead,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let versions = state.registry.list_versions(&actor, &id)?;
    Ok(Json(ApiResponse::success(versions)))
}

/// POST /assets/{id}/tags - Add tags
pub async fn add_tags(
    RequireWrite(actor): RequireWrite,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<TagsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.registry.attach_tags(&actor, &id, &req.tags)?;
    let asset = state.registry.get_asset(&actor, &id)?;
    Ok(Json(ApiResponse::success(asset)))
}

/// PUT /assets/{id}/tags - Replace the tag set
pub async fn set_tags(
    RequireWrite(actor): RequireWrite,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<TagsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.registry.replace_tags(&actor, &id, &req.tags)?;
    let asset = state.registry.get_asset(&actor, &id)?;
    Ok(Json(ApiResponse::success(asset)))
}

fn stream_download<R: AsyncRead + Send + 'static>(download: Download<R>) -> Response {
    let body = Body::from_stream(ReaderStream::new(download.reader));

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, download.mime_type)
        .header(header::CONTENT_LENGTH, download.size)
        .header("X-Asset-Version", download.version)
        .header("X-Content-Type-Options", "nosniff")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());

    if let Ok(etag) = HeaderValue::from_str(&format!("\"{}\"", download.checksum)) {
        response.headers_mut().insert(header::ETAG, etag);
    }
    // Stems only contain [A-Za-z0-9_-], so the name is always a valid header.
    if let Ok(value) =
        HeaderValue::from_str(&format!("attachment; filename=\"{}\"", download.file_name))
    {
        response.headers_mut().insert(header::CONTENT_DISPOSITION, value);
    }

    response
}

//! Material page routes
//!
//! Serves rendered pages of uploaded materials as images.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get},
    Router,
};

use crate::error::{AppError, Result};
use crate::state::AppState;

const CACHE_CONTROL: &str = "public, max-age=86400";

/// Create the materials router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:material_id", delete(delete_material))
        .route("/:material_id/page/:page", get(get_page))
}

/// Serve one rendered page
async fn get_page(
    State(state): State<AppState>,
    Path((material_id, page)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response> {
    let page_index: u32 = page
        .parse()
        .map_err(|_| AppError::BadRequest(format!("Invalid page number: {}", page)))?;

    let content = state.pages().read_page(&material_id, page_index).await?;

    if etag_matches(&headers, &content.etag) {
        return Response::builder()
            .status(StatusCode::NOT_MODIFIED)
            .header(header::ETAG, &content.etag)
            .header(header::CACHE_CONTROL, CACHE_CONTROL)
            .body(Body::empty())
            .map_err(|e| AppError::Internal(e.to_string()));
    }

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content.page.content_type())
        .header(header::CONTENT_LENGTH, content.bytes.len())
        .header(header::ETAG, &content.etag)
        .header(header::CACHE_CONTROL, CACHE_CONTROL)
        .body(Body::from(content.bytes))
        .map_err(|e| AppError::Internal(e.to_string()))
}

/// Delete a material and everything rendered from it
async fn delete_material(
    State(state): State<AppState>,
    Path(material_id): Path<String>,
) -> Result<impl IntoResponse> {
    if state.pages().delete_document(&material_id).await? {
        tracing::info!(material_id = %material_id, "Deleted material");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("Material {} not found", material_id)))
    }
}

/// Whether `If-None-Match` names the current representation
fn etag_matches(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get_all(header::IF_NONE_MATCH)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .any(|candidate| {
            candidate == "*" || candidate == etag || candidate.strip_prefix("W/") == Some(etag)
        })
}

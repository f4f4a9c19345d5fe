//! Document library endpoints.

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    response::IntoResponse,
    routing::{delete, get, post},
};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use super::error::ApiError;
use crate::auth::AdminUser;
use crate::db::Database;
use crate::documents::DocumentLibrary;
use crate::impl_has_auth_backend;
use crate::jwt::JwtConfig;

/// Maximum upload size (100 MB).
const MAX_UPLOAD_SIZE: usize = 100 * 1024 * 1024;

#[derive(Clone)]
pub struct DocumentsState {
    pub db: Database,
    pub jwt: Arc<JwtConfig>,
    pub library: Arc<DocumentLibrary>,
}

impl_has_auth_backend!(DocumentsState);

pub fn router(state: DocumentsState) -> Router {
    Router::new()
        .route("/list", get(list_documents))
        .route(
            "/upload",
            post(upload_document).layer(DefaultBodyLimit::max(MAX_UPLOAD_SIZE)),
        )
        .route("/delete/{filename}", delete(delete_document))
        .route("/rebuild-index", post(rebuild_index))
        .with_state(state)
}

async fn list_documents(
    State(state): State<DocumentsState>,
    _admin: AdminUser,
) -> Result<impl IntoResponse, ApiError> {
    let documents = state.library.list().await?;
    Ok(Json(documents))
}

#[derive(Serialize)]
struct UploadResponse {
    success: bool,
    filename: String,
    file_path: String,
    message: String,
}

async fn upload_document(
    State(state): State<DocumentsState>,
    _admin: AdminUser,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        warn!(error = %e, "Failed to read multipart field");
        ApiError::bad_request("Invalid multipart data")
    })? {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ApiError::bad_request("Missing file name"))?;

        let bytes = field.bytes().await.map_err(|e| {
            warn!(error = %e, "Failed to read upload");
            ApiError::bad_request("Failed to read upload")
        })?;

        let document = state.library.save_upload(&filename, &bytes).await?;

        return Ok(Json(UploadResponse {
            success: true,
            message: format!("Document '{}' uploaded successfully", document.filename),
            filename: document.filename,
            file_path: document.file_path,
        }));
    }

    Err(ApiError::bad_request("Missing 'file' field"))
}

#[derive(Serialize)]
struct DeleteResponse {
    success: bool,
    message: String,
}

async fn delete_document(
    State(state): State<DocumentsState>,
    _admin: AdminUser,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.library.delete(&filename).await?;
    Ok(Json(DeleteResponse {
        success: true,
        message: format!("Document '{}' deleted successfully", filename),
    }))
}

#[derive(Serialize)]
struct RebuildResponse {
    success: bool,
    message: String,
    documents_indexed: usize,
    output: String,
}

async fn rebuild_index(
    State(state): State<DocumentsState>,
    _admin: AdminUser,
) -> Result<impl IntoResponse, ApiError> {
    let report = state.library.rebuild_index().await?;
    Ok(Json(RebuildResponse {
        success: true,
        message: format!(
            "Index rebuilt successfully with {} documents",
            report.documents_indexed
        ),
        documents_indexed: report.documents_indexed,
        output: report.output,
    }))
}

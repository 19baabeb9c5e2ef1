use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, Request, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use log::error;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower::ServiceExt;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};

use crate::error::LibraryError;
use crate::files;
use crate::library::Library;
use crate::store::Record;
use crate::sweep::SweepReport;

#[derive(Clone)]
pub struct AppState {
    pub library: Arc<Library>,
}

#[derive(Deserialize)]
pub struct UpdateAssetRequest {
    pub title: String,
    pub description: String,
}

#[derive(Deserialize)]
pub struct SweepQuery {
    pub remove: Option<bool>,
}

#[derive(Serialize)]
pub struct UploadResponse {
    pub status: String,
    pub file: String,
    pub asset: Record,
}

#[derive(Serialize)]
pub struct DeleteResponse {
    pub deleted: String,
}

pub enum ApiError {
    Library(LibraryError),
    BadRequest(String),
}

impl From<LibraryError> for ApiError {
    fn from(e: LibraryError) -> Self {
        ApiError::Library(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, "bad_request", message),
            ApiError::Library(e) => {
                let status = match &e {
                    LibraryError::InvalidAssetType(_) | LibraryError::InvalidPath(_) => StatusCode::BAD_REQUEST,
                    LibraryError::NotFound(_) => StatusCode::NOT_FOUND,
                    LibraryError::NoFileReference(_) => StatusCode::CONFLICT,
                    LibraryError::FileMissingOnDisk(_) => StatusCode::GONE,
                    LibraryError::PersistenceFailure(_) | LibraryError::Io(_) => {
                        error!("Request failed: {}", e);
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, e.kind(), e.to_string())
            }
        };
        (status, Json(json!({ "error": message, "kind": kind }))).into_response()
    }
}

pub fn create_router(state: AppState, client_path: &str, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/api/songs", get(list_songs))
        .route("/api/assets", get(list_assets).post(upload_asset))
        .route("/api/assets/:id", get(get_asset).put(update_asset).delete(delete_asset))
        .route("/api/assets/:id/cover", post(set_cover))
        .route("/api/maintenance/sweep", post(sweep))
        .route("/upload", post(upload_asset))
        .route("/music/:id", get(stream_audio))
        .route("/covers/:cover", get(serve_cover))
        .fallback_service(ServeDir::new(client_path))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// GET /api/songs - Audio filenames for the game client
async fn list_songs(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.library.list_song_files().await)
}

// GET /api/assets - Every record
async fn list_assets(State(state): State<AppState>) -> Json<Vec<Record>> {
    Json(state.library.list_assets().await)
}

// GET /api/assets/:id
async fn get_asset(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Record>, ApiError> {
    Ok(Json(state.library.get_asset(&id).await?))
}

// POST /upload, POST /api/assets - Multipart upload of one mp3 in field `file`
async fn upload_asset(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let (name, content) = read_file_field(multipart).await?;
    let asset = state.library.create_asset(&name, &content).await?;

    Ok(Json(UploadResponse {
        status: "success".to_string(),
        file: asset.filename.clone(),
        asset,
    }))
}

// PUT /api/assets/:id - Replace title and description
async fn update_asset(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateAssetRequest>,
) -> Result<Json<Record>, ApiError> {
    let record = state
        .library
        .update_asset(&id, &body.title, &body.description)
        .await?;
    Ok(Json(record))
}

// POST /api/assets/:id/cover - Multipart image upload in field `file`
async fn set_cover(
    State(state): State<AppState>,
    Path(id): Path<String>,
    multipart: Multipart,
) -> Result<Json<Record>, ApiError> {
    let (name, content) = read_file_field(multipart).await?;
    let extension = files::extension_of(&name)
        .ok_or_else(|| LibraryError::InvalidAssetType(name.clone()))?;

    Ok(Json(state.library.set_cover(&id, &content, &extension).await?))
}

// DELETE /api/assets/:id
async fn delete_asset(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let deleted = state.library.delete_asset(&id).await?;
    Ok(Json(DeleteResponse { deleted }))
}

// POST /api/maintenance/sweep?remove=true - Report (and optionally delete) orphans
async fn sweep(
    State(state): State<AppState>,
    Query(params): Query<SweepQuery>,
) -> Result<Json<SweepReport>, ApiError> {
    let remove = params.remove.unwrap_or(false);
    Ok(Json(state.library.sweep(remove).await?))
}

// GET /music/:id - Stream the audio file, with range support
async fn stream_audio(
    State(state): State<AppState>,
    Path(id): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    let path = state.library.resolve_audio(&id).await?;
    match ServeFile::new(path).oneshot(request).await {
        Ok(response) => Ok(response.into_response()),
        Err(never) => match never {},
    }
}

// GET /covers/:cover - Serve a stored cover image
async fn serve_cover(
    State(state): State<AppState>,
    Path(cover): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    let path = state.library.resolve_cover(&cover).await?;
    match ServeFile::new(path).oneshot(request).await {
        Ok(response) => Ok(response.into_response()),
        Err(never) => match never {},
    }
}

/// Buffers the `file` field completely so no library lock is ever held
/// while the client is still sending.
async fn read_file_field(mut multipart: Multipart) -> Result<(String, Bytes), ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_string();
        if name.is_empty() {
            return Err(ApiError::BadRequest("No selected file".to_string()));
        }
        let content = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        return Ok((name, content));
    }
    Err(ApiError::BadRequest("No file part".to_string()))
}

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::TryStreamExt as _;
use http::HeaderMap;
use komik_types::claim::Role;
use tracing::debug;

use super::{file_ext, error::StoreError, Store, StoreInfo, ValidatedPath};
use crate::{auth::token::RequiredRolesLayer, error::ApiError, state::AppState};

/// Only raster page and cover images are accepted for upload.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif"];

#[derive(Clone, serde::Serialize, serde::Deserialize, Debug)]
pub struct UploadInfo {
    pub final_path: String,
    pub size: u64,
    /// SHA256 hash
    pub hash: String,
    pub original_name: Option<String>,
}

impl UploadInfo {
    fn from_store_info(info: StoreInfo, original_name: Option<String>) -> Self {
        Self {
            final_path: info.final_path.to_string_lossy().to_string(),
            size: info.size,
            hash: info.hash,
            original_name,
        }
    }
}

pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(field) = multipart
        .next_field()
        .await
        .map_err(StoreError::MultipartError)?
    {
        let file_name = field
            .file_name()
            .ok_or_else(|| ApiError::InvalidRequest("Missing file name".into()))?
            .to_string();
        let ext = file_ext(&file_name)
            .ok_or_else(|| ApiError::UnprocessableRequest("Missing file extension".into()))?;
        if !IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            return Err(ApiError::UnprocessableRequest(format!(
                "Unsupported image extension: {ext}"
            )));
        }

        let dest_path = ValidatedPath::new(format!("uploads/{}.{}", uuid::Uuid::new_v4(), ext))?;
        debug!("Uploading file {} to {:?}", file_name, dest_path.as_ref());
        let stream = field.map_err(|e| {
            StoreError::StreamError(format!("Error reading multipart field in request: {e}"))
        });
        let info = state.store().store_stream(&dest_path, stream).await?;

        let info = UploadInfo::from_store_info(info, Some(file_name));

        Ok((StatusCode::CREATED, Json(info)))
    } else {
        Err(ApiError::InvalidRequest("Missing file field".into()))
    }
}

pub async fn download(
    State(state): State<AppState>,
    path: ValidatedPath,
) -> Result<impl IntoResponse, ApiError> {
    let store = state.store();
    let data = store.load_data(&path).await?;
    let size = store.size(&path).await?;
    let body = Body::from_stream(data);
    let mut headers = HeaderMap::new();

    let mime = file_ext(path.as_ref())
        .and_then(|ext| new_mime_guess::from_ext(&ext).first().map(|m| m.to_string()))
        .unwrap_or_else(|| "application/octet-stream".to_string());

    headers.insert(
        http::header::CONTENT_TYPE,
        mime.parse().unwrap(), // safe as MIME is ASCII
    );

    headers.insert(
        http::header::CONTENT_LENGTH,
        size.to_string().parse().unwrap(), // safe - number is ASCII
    );

    Ok((StatusCode::OK, headers, body))
}

pub fn store_router(limit_mb: usize) -> Router<AppState> {
    Router::new()
        .route("/upload", post(upload))
        .layer(RequiredRolesLayer::new([Role::Admin, Role::Translator]))
        .route("/download/{*path}", get(download))
        .layer(DefaultBodyLimit::max(1024 * 1024 * limit_mb))
}

//! HTTP handlers for video assets.

use crate::{
    AppState,
    errors::AppError,
    models::{
        asset::{Asset, EncodingUpdate},
        grant::{AccessGrant, GrantPermission},
    },
    services::asset_service::{AssetService, VideoUpload},
};
use axum::{
    Json,
    extract::{Multipart, Path, Query, State, multipart::MultipartError},
    http::StatusCode,
    response::IntoResponse,
};
use bytes::Bytes;
use serde::Deserialize;
use uuid::Uuid;

/// Query params accepted by the access endpoint.
#[derive(Debug, Deserialize)]
pub struct AccessQuery {
    pub ttl_minutes: Option<u32>,
    #[serde(default)]
    pub permission: GrantPermission,
}

fn multipart_error(err: MultipartError) -> AppError {
    AppError::new(err.status(), "validation", err.body_text())
}

/// `POST /lectures/{lecture_id}/videos`
///
/// Multipart body with a `file` part and an optional `user_id` part. The
/// declared content type of `file` is checked before its bytes are read.
pub async fn upload_video(
    State(state): State<AppState>,
    Path(lecture_id): Path<String>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    AssetService::validate_lecture_id(&lecture_id)?;

    let mut user_id = None;
    let mut file: Option<(String, String, Bytes)> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        match field.name() {
            Some("file") => {
                let mime_type = AssetService::validate_mime(field.content_type().unwrap_or(""))?;
                let original = field.file_name().unwrap_or("video").to_string();
                let data = field.bytes().await.map_err(multipart_error)?;
                file = Some((original, mime_type, data));
            }
            Some("user_id") => {
                user_id = Some(field.text().await.map_err(multipart_error)?);
            }
            _ => {}
        }
    }

    let (original_filename, mime_type, data) =
        file.ok_or_else(|| AppError::validation("missing `file` part"))?;

    let asset = state
        .assets
        .ingest(VideoUpload {
            lecture_id,
            user_id,
            original_filename,
            mime_type,
            data,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(asset)))
}

/// `GET /lectures/{lecture_id}/videos`, newest first.
pub async fn list_videos(
    State(state): State<AppState>,
    Path(lecture_id): Path<String>,
) -> Result<Json<Vec<Asset>>, AppError> {
    Ok(Json(state.assets.list(&lecture_id).await?))
}

pub async fn get_video(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Asset>, AppError> {
    Ok(Json(state.assets.get(id).await?))
}

pub async fn delete_video(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.assets.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `PATCH /videos/{id}/encoding`, called by the encoding pipeline.
pub async fn update_encoding(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(update): Json<EncodingUpdate>,
) -> Result<Json<Asset>, AppError> {
    Ok(Json(state.assets.update_encoding(id, update).await?))
}

/// `GET /videos/{id}/access?ttl_minutes=&permission=`
pub async fn access_grant(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(q): Query<AccessQuery>,
) -> Result<Json<AccessGrant>, AppError> {
    Ok(Json(
        state
            .assets
            .access_grant(id, q.ttl_minutes, q.permission)
            .await?,
    ))
}

//! Gateway for objects in local storage.
//!
//! - `GET /media/{*name}` streams an object of the default container. With a
//!   remote backend objects are reached through signed URLs only and the
//!   gateway answers 404.
//! - `PUT /media/{*name}` accepts transcription artifacts (`.json`, `.vtt`)
//!   written through the URLs handed out in local mode.

use crate::{AppState, errors::AppError, storage::StorageBackend};
use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};

const ARTIFACT_EXTENSIONS: [&str; 2] = ["json", "vtt"];

pub async fn get_media(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    let storage = state.assets.storage();
    if storage.backend() != StorageBackend::Local {
        return Err(AppError::not_found("no such media object"));
    }
    let stream = storage.get(storage.container(), &name).await?;

    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type_for(&name)),
    );
    Ok(response)
}

pub async fn put_media(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let storage = state.assets.storage();
    if storage.backend() != StorageBackend::Local {
        return Err(AppError::new(
            StatusCode::METHOD_NOT_ALLOWED,
            "validation",
            "uploads go directly to remote storage",
        ));
    }
    let is_artifact = name
        .rsplit_once('.')
        .is_some_and(|(_, ext)| ARTIFACT_EXTENSIONS.contains(&ext));
    if !is_artifact {
        return Err(AppError::validation(
            "only transcript and caption files can be written here",
        ));
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_else(|| content_type_for(&name));
    storage.put(&name, body, content_type).await?;
    tracing::info!(object = %name, "artifact stored");
    Ok(StatusCode::CREATED)
}

fn content_type_for(name: &str) -> &'static str {
    match name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()) {
        Some(ext) => match ext.as_str() {
            "mp4" | "m4v" => "video/mp4",
            "webm" => "video/webm",
            "mov" => "video/quicktime",
            "avi" => "video/x-msvideo",
            "mkv" => "video/x-matroska",
            "mpeg" | "mpg" => "video/mpeg",
            "ogv" | "ogg" => "video/ogg",
            "json" => "application/json",
            "vtt" => "text/vtt",
            _ => "application/octet-stream",
        },
        None => "application/octet-stream",
    }
}

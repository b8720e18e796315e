//! Defines routes for video assets, transcription and the local gateway.
//!
//! ## Structure
//! - **Lecture-level endpoints**
//!   - `POST /lectures/{lecture_id}/videos`: upload a video (multipart)
//!   - `GET  /lectures/{lecture_id}/videos`: list videos, newest first
//!   - `POST /lectures/{lecture_id}/transcription`: start transcription
//!   - `GET  /lectures/{lecture_id}/transcription`: transcription status
//!
//! - **Video-level endpoints**
//!   - `GET    /videos/{id}`: fetch one
//!   - `DELETE /videos/{id}`: delete object and record
//!   - `PATCH  /videos/{id}/encoding`: encoding status update
//!   - `GET    /videos/{id}/access`: time-scoped access URL
//!
//! - **Gateway**: `GET|PUT /media/{*name}`
//! - **Ops**: `/healthz`, `/readyz`, `/metrics`

use crate::{
    AppState,
    handlers::{
        asset_handlers::{
            access_grant, delete_video, get_video, list_videos, update_encoding, upload_video,
        },
        health_handlers::{healthz, metrics, readyz},
        media_handlers::{get_media, put_media},
        transcription_handlers::{start_transcription, transcription_status},
    },
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, patch, post},
};

/// Room for multipart boundaries and the small text parts.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Build the full router. `max_upload_bytes` bounds request bodies.
pub fn routes(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        // Lecture-level routes
        .route(
            "/lectures/{lecture_id}/videos",
            post(upload_video).get(list_videos),
        )
        .route(
            "/lectures/{lecture_id}/transcription",
            post(start_transcription).get(transcription_status),
        )
        // Video-level routes
        .route("/videos/{id}", get(get_video).delete(delete_video))
        .route("/videos/{id}/encoding", patch(update_encoding))
        .route("/videos/{id}/access", get(access_grant))
        // Gateway
        .route("/media/{*name}", get(get_media).put(put_media))
        .layer(DefaultBodyLimit::max(
            max_upload_bytes.saturating_add(MULTIPART_OVERHEAD),
        ))
        .with_state(state)
}

//! Health, readiness and metrics handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness of the metadata store
//! - GET /metrics  -> Prometheus text exposition

use crate::{AppState, errors::AppError, storage::StorageBackend};
use axum::{
    Json,
    extract::State,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::collections::HashMap;

/// `GET /healthz`
///
/// Liveness only, never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Runs `SELECT 1` against the metadata store. HTTP 200 when it answers, 503
/// otherwise. The storage backend is reported but never touched.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let db_check = match state.assets.repo().ping().await {
        Ok(()) => CheckStatus::ok(),
        Err(e) => {
            tracing::warn!(error = %e, "readiness: metadata store check failed");
            CheckStatus::failed("metadata store unreachable")
        }
    };

    let ready = db_check.ok;
    let mut checks = HashMap::new();
    checks.insert("database", db_check);

    let body = ReadyResponse {
        status: if ready { "ok" } else { "error" },
        backend: state.assets.backend(),
        checks,
    };
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

/// `GET /metrics`
pub async fn metrics(State(state): State<AppState>) -> Result<Response, AppError> {
    let text = state
        .metrics
        .render()
        .map_err(|e| AppError::internal(format!("metrics encoding failed: {}", e)))?;
    let mut response = text.into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    Ok(response)
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    backend: StorageBackend,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    fn failed(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(reason.into()),
        }
    }
}

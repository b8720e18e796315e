//! Video asset storage and access-grant service.
//!
//! Uploads land in remote blob storage or on local disk behind
//! [`storage::Storage`]; metadata lives in SQLite; clients and the external
//! transcription service receive short-lived grants instead of credentials.

pub mod clients;
pub mod clock;
pub mod config;
pub mod errors;
pub mod grants;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod routes;
pub mod services;
pub mod storage;

use crate::{
    clients::HttpTranscriptionClient,
    clock::{Clock, SystemClock},
    config::AppConfig,
    metrics::Metrics,
    services::{
        asset_repository::AssetRepository,
        asset_service::{AssetService, AssetSettings},
        transcription_service::{TranscriptionService, TranscriptionSettings},
    },
    storage::Storage,
};
use anyhow::{Context, Result};
use axum::Router;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub assets: AssetService,
    pub transcription: TranscriptionService,
    pub metrics: Metrics,
}

impl AppState {
    /// Wire the services over an existing pool and storage backend.
    pub fn new(cfg: &AppConfig, db: Arc<SqlitePool>, storage: Arc<dyn Storage>) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let metrics = Metrics::new().context("registering metrics")?;
        let assets = AssetService::new(
            AssetRepository::new(db),
            storage,
            clock,
            metrics.clone(),
            AssetSettings {
                public_base_url: cfg.public_base_url.clone(),
                initial_status: cfg.initial_encoding_status,
                default_grant_ttl_minutes: cfg.grant_ttl_minutes,
                max_upload_bytes: cfg.max_upload_bytes,
            },
        );
        let client = HttpTranscriptionClient::new(cfg.transcription_url.clone())
            .context("building transcription client")?;
        let transcription = TranscriptionService::new(
            assets.clone(),
            Arc::new(client),
            TranscriptionSettings {
                default_language: cfg.transcription_language.clone(),
                job_grant_ttl_minutes: cfg.transcription_grant_ttl_minutes,
                result_grant_ttl_minutes: cfg.result_grant_ttl_minutes,
            },
        );
        Ok(Self {
            assets,
            transcription,
            metrics,
        })
    }
}

/// Build the routed application.
pub fn build_app(cfg: &AppConfig, state: AppState) -> Router {
    routes::routes::routes(state, cfg.max_upload_bytes)
}

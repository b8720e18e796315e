use axum_test::TestServer;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tempfile::TempDir;
use video_asset_store::{
    AppState, build_app,
    config::{AppConfig, Args},
    services::asset_repository::AssetRepository,
    storage::create_storage,
};

pub const BASE_URL: &str = "http://localhost:3000";

pub struct TestApp {
    pub server: TestServer,
    pub dir: TempDir,
}

/// Local-storage configuration rooted in a fresh temp dir.
pub fn local_config(dir: &TempDir, transcription_url: &str) -> AppConfig {
    let mut cfg = AppConfig::from_args(Args::default()).unwrap();
    cfg.storage_dir = dir.path().to_string_lossy().into_owned();
    cfg.public_base_url = BASE_URL.into();
    cfg.container = "videos".into();
    cfg.connection_string = None;
    cfg.account_name = None;
    cfg.blob_endpoint = None;
    cfg.transcription_url = transcription_url.into();
    cfg.max_upload_bytes = 32 * 1024 * 1024;
    cfg
}

pub async fn spawn(cfg: AppConfig, dir: TempDir) -> TestApp {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let db = Arc::new(pool);
    AssetRepository::new(db.clone()).migrate().await.unwrap();

    let storage = create_storage(&cfg).await.unwrap();
    let state = AppState::new(&cfg, db, storage).unwrap();
    let server = TestServer::new(build_app(&cfg, state)).unwrap();
    TestApp { server, dir }
}

pub async fn spawn_local(transcription_url: &str) -> TestApp {
    let dir = TempDir::new().unwrap();
    let cfg = local_config(&dir, transcription_url);
    spawn(cfg, dir).await
}

/// Files currently stored in the local container.
pub fn stored_files(app: &TestApp) -> Vec<String> {
    std::fs::read_dir(app.dir.path().join("videos"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect()
}

/// Path part of a gateway URL.
pub fn gateway_path(url: &str) -> String {
    url.strip_prefix(BASE_URL).unwrap().to_string()
}

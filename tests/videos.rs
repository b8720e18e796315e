mod common;

use axum::http::StatusCode;
use axum_test::multipart::{MultipartForm, Part};
use common::{gateway_path, spawn_local, stored_files};
use serde_json::{Value, json};
use video_asset_store::models::{asset::Asset, grant::AccessGrant};

fn video_form(name: &str, mime: &str, data: Vec<u8>) -> MultipartForm {
    MultipartForm::new()
        .add_text("user_id", "instructor-1")
        .add_part("file", Part::bytes(data).file_name(name).mime_type(mime))
}

#[tokio::test]
async fn ten_megabyte_upload_round_trips() {
    let app = spawn_local("http://127.0.0.1:9").await;
    let data: Vec<u8> = (0..10 * 1024 * 1024).map(|i| (i % 251) as u8).collect();

    let response = app
        .server
        .post("/lectures/L1/videos")
        .multipart(video_form("week one.mp4", "video/mp4", data.clone()))
        .await;
    response.assert_status(StatusCode::CREATED);
    let asset: Asset = response.json();
    assert_eq!(asset.lecture_id, "L1");
    assert_eq!(asset.file_size, 10 * 1024 * 1024);
    assert_eq!(asset.user_id.as_deref(), Some("instructor-1"));
    assert_eq!(asset.original_filename, "week one.mp4");
    assert!(asset.blob_name.ends_with("_week_one.mp4"));

    let fetched: Asset = app.server.get(&format!("/videos/{}", asset.id)).await.json();
    assert_eq!(fetched, asset);

    let listed: Vec<Asset> = app.server.get("/lectures/L1/videos").await.json();
    assert_eq!(listed, vec![asset.clone()]);

    let media = app.server.get(&gateway_path(&asset.blob_url)).await;
    media.assert_status_ok();
    assert_eq!(media.header("content-type"), "video/mp4");
    assert_eq!(media.as_bytes().as_ref(), data.as_slice());
}

#[tokio::test]
async fn unsupported_type_is_rejected_without_side_effects() {
    let app = spawn_local("http://127.0.0.1:9").await;

    let response = app
        .server
        .post("/lectures/L1/videos")
        .multipart(video_form("slides.pdf", "application/pdf", b"%PDF-1.7".to_vec()))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["kind"], "validation");
    assert_eq!(body["status"], 400);

    assert!(stored_files(&app).is_empty());
    let listed: Vec<Asset> = app.server.get("/lectures/L1/videos").await.json();
    assert!(listed.is_empty());
}

#[tokio::test]
async fn missing_file_part_is_rejected() {
    let app = spawn_local("http://127.0.0.1:9").await;
    let response = app
        .server
        .post("/lectures/L1/videos")
        .multipart(MultipartForm::new().add_text("user_id", "u"))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn identical_uploads_get_unique_names() {
    let app = spawn_local("http://127.0.0.1:9").await;
    let mut names = Vec::new();
    for _ in 0..3 {
        let asset: Asset = app
            .server
            .post("/lectures/L1/videos")
            .multipart(video_form("same.mp4", "video/mp4", b"frames".to_vec()))
            .await
            .json();
        names.push(asset.blob_name);
    }
    names.sort();
    names.dedup();
    assert_eq!(names.len(), 3);
    assert_eq!(stored_files(&app).len(), 3);

    // newest first
    let listed: Vec<Asset> = app.server.get("/lectures/L1/videos").await.json();
    assert_eq!(listed.len(), 3);
    assert!(listed.windows(2).all(|w| w[0].created_at >= w[1].created_at));
}

#[tokio::test]
async fn delete_removes_bytes_and_record() {
    let app = spawn_local("http://127.0.0.1:9").await;
    let asset: Asset = app
        .server
        .post("/lectures/L1/videos")
        .multipart(video_form("a.webm", "video/webm", b"webm".to_vec()))
        .await
        .json();

    app.server
        .delete(&format!("/videos/{}", asset.id))
        .await
        .assert_status(StatusCode::NO_CONTENT);
    assert!(stored_files(&app).is_empty());

    let missing = app.server.get(&format!("/videos/{}", asset.id)).await;
    missing.assert_status_not_found();
    let body: Value = missing.json();
    assert_eq!(body["kind"], "not_found");

    app.server
        .delete(&format!("/videos/{}", asset.id))
        .await
        .assert_status_not_found();
    app.server
        .get(&gateway_path(&asset.blob_url))
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn encoding_updates_respect_terminal_states() {
    let app = spawn_local("http://127.0.0.1:9").await;
    let asset: Asset = app
        .server
        .post("/lectures/L1/videos")
        .multipart(video_form("a.mp4", "video/mp4", b"mp4".to_vec()))
        .await
        .json();
    // default initial status
    assert_eq!(asset.encoding_status.as_str(), "completed");

    let path = format!("/videos/{}/encoding", asset.id);
    let updated: Asset = app
        .server
        .patch(&path)
        .json(&json!({"hls_url": "https://cdn.example/a.m3u8", "resolution": "1920x1080"}))
        .await
        .json();
    assert_eq!(updated.hls_url.as_deref(), Some("https://cdn.example/a.m3u8"));
    assert!(updated.updated_at >= asset.updated_at);

    let conflict = app
        .server
        .patch(&path)
        .json(&json!({"encoding_status": "processing"}))
        .await;
    conflict.assert_status(StatusCode::CONFLICT);
    let body: Value = conflict.json();
    assert_eq!(body["kind"], "conflict");
}

#[tokio::test]
async fn local_access_grant_points_at_gateway() {
    let app = spawn_local("http://127.0.0.1:9").await;
    let asset: Asset = app
        .server
        .post("/lectures/L1/videos")
        .multipart(video_form("a.mp4", "video/mp4", b"mp4".to_vec()))
        .await
        .json();

    let grant: AccessGrant = app
        .server
        .get(&format!("/videos/{}/access", asset.id))
        .add_query_param("ttl_minutes", 15)
        .await
        .json();
    assert_eq!(grant.url, asset.blob_url);
    assert!(!grant.signed);
    assert!(grant.ttl_minutes.is_none());
}

#[tokio::test]
async fn ops_endpoints_report_health_and_metrics() {
    let app = spawn_local("http://127.0.0.1:9").await;
    app.server.get("/healthz").await.assert_status_ok();

    let ready = app.server.get("/readyz").await;
    ready.assert_status_ok();
    let body: Value = ready.json();
    assert_eq!(body["backend"], "local");
    assert_eq!(body["checks"]["database"]["ok"], true);
    assert!(body["checks"].get("storage").is_none());
    assert!(stored_files(&app).is_empty());

    app.server
        .post("/lectures/L1/videos")
        .multipart(video_form("a.mp4", "video/mp4", b"mp4".to_vec()))
        .await
        .assert_status(StatusCode::CREATED);
    let metrics = app.server.get("/metrics").await;
    metrics.assert_status_ok();
    assert!(metrics.text().contains("video_uploads_total 1"));
}

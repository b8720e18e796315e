//! Remote backend against a mocked blob endpoint.

mod common;

use axum::http::StatusCode;
use axum_test::multipart::{MultipartForm, Part};
use chrono::{Duration, Utc};
use common::{local_config, spawn};
use mockito::{Matcher, ServerGuard};
use tempfile::TempDir;
use video_asset_store::{
    grants::sas::{BlobOperation, SasError, SasToken, canonical_resource},
    models::{asset::Asset, grant::AccessGrant},
};

const ACCOUNT: &str = "devacct";
const KEY: &str = "a2V5LWZvci10ZXN0cw==";

async fn remote_app(blob: &ServerGuard) -> common::TestApp {
    let dir = TempDir::new().unwrap();
    let mut cfg = local_config(&dir, "http://127.0.0.1:9");
    cfg.connection_string = Some(format!(
        "DefaultEndpointsProtocol=http;AccountName={};AccountKey={};BlobEndpoint={}/{}",
        ACCOUNT,
        KEY,
        blob.url(),
        ACCOUNT
    ));
    spawn(cfg, dir).await
}

#[tokio::test]
async fn remote_upload_grant_and_delete() {
    let mut blob = mockito::Server::new_async().await;
    let container = blob
        .mock("PUT", "/devacct/videos")
        .match_query(Matcher::UrlEncoded("restype".into(), "container".into()))
        .with_status(201)
        .expect(1)
        .create_async()
        .await;
    let put = blob
        .mock("PUT", Matcher::Regex(r"^/devacct/videos/L1_.+\.mp4$".into()))
        .match_header("x-ms-blob-type", "BlockBlob")
        .match_header("x-ms-blob-content-type", "video/mp4")
        .match_header("authorization", Matcher::Regex("^SharedKey devacct:".into()))
        .with_status(201)
        .with_header("etag", "\"0x8D\"")
        .expect(2)
        .create_async()
        .await;

    let app = remote_app(&blob).await;
    let mut assets = Vec::new();
    for _ in 0..2 {
        let response = app
            .server
            .post("/lectures/L1/videos")
            .multipart(MultipartForm::new().add_part(
                "file",
                Part::bytes(b"remote-bytes".to_vec())
                    .file_name("clip.mp4")
                    .mime_type("video/mp4"),
            ))
            .await;
        response.assert_status(StatusCode::CREATED);
        assets.push(response.json::<Asset>());
    }
    container.assert_async().await;
    put.assert_async().await;

    let asset = &assets[0];
    assert_eq!(asset.container, "videos");
    assert_eq!(
        asset.blob_url,
        format!("{}/devacct/videos/{}", blob.url(), asset.blob_name)
    );

    let issued_at = Utc::now();
    let grant: AccessGrant = app
        .server
        .get(&format!("/videos/{}/access", asset.id))
        .add_query_param("ttl_minutes", 30)
        .add_query_param("permission", "read")
        .await
        .json();
    assert!(grant.signed);
    assert_eq!(grant.ttl_minutes, Some(30));

    let token = SasToken::parse(&grant.url).unwrap();
    let resource = canonical_resource(ACCOUNT, "videos", &asset.blob_name);
    assert_eq!(token.permissions.to_string(), "r");
    assert_eq!(token.protocol, "https,http");
    token
        .authorize(KEY, &resource, issued_at + Duration::minutes(1), BlobOperation::Read)
        .unwrap();
    assert_eq!(
        token.authorize(KEY, &resource, issued_at + Duration::minutes(1), BlobOperation::Write),
        Err(SasError::PermissionDenied(BlobOperation::Write))
    );
    assert_eq!(
        token.authorize(KEY, &resource, issued_at + Duration::minutes(31), BlobOperation::Read),
        Err(SasError::Expired)
    );

    let write: AccessGrant = app
        .server
        .get(&format!("/videos/{}/access", asset.id))
        .add_query_param("permission", "write")
        .add_query_param("ttl_minutes", 100_000)
        .await
        .json();
    assert_eq!(write.ttl_minutes, Some(1440));
    let token = SasToken::parse(&write.url).unwrap();
    assert_eq!(token.permissions.to_string(), "cw");
    assert_eq!(
        token.authorize(KEY, &resource, Utc::now(), BlobOperation::Delete),
        Err(SasError::PermissionDenied(BlobOperation::Delete))
    );

    let delete = blob
        .mock("DELETE", format!("/devacct/videos/{}", asset.blob_name).as_str())
        .with_status(202)
        .expect(1)
        .create_async()
        .await;
    app.server
        .delete(&format!("/videos/{}", asset.id))
        .await
        .assert_status(StatusCode::NO_CONTENT);
    delete.assert_async().await;
}

#[tokio::test]
async fn remote_write_failure_is_service_unavailable() {
    let mut blob = mockito::Server::new_async().await;
    blob.mock("PUT", "/devacct/videos")
        .match_query(Matcher::UrlEncoded("restype".into(), "container".into()))
        .with_status(201)
        .create_async()
        .await;
    blob.mock("PUT", Matcher::Regex(r"^/devacct/videos/.+$".into()))
        .with_status(500)
        .with_body("<Error><Code>InternalError</Code><Message>AccountKey leaked?</Message></Error>")
        .create_async()
        .await;

    let app = remote_app(&blob).await;
    let response = app
        .server
        .post("/lectures/L1/videos")
        .multipart(MultipartForm::new().add_part(
            "file",
            Part::bytes(b"x".to_vec()).file_name("a.mp4").mime_type("video/mp4"),
        ))
        .await;
    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    assert!(!response.text().contains("AccountKey"));

    let listed: Vec<Asset> = app.server.get("/lectures/L1/videos").await.json();
    assert!(listed.is_empty());
}

#[tokio::test]
async fn media_gateway_is_closed_in_remote_mode() {
    let mut blob = mockito::Server::new_async().await;
    let upstream = blob
        .mock("GET", Matcher::Any)
        .with_status(200)
        .with_header("etag", "\"0x8D\"")
        .with_header("last-modified", "Mon, 01 Jan 2024 00:00:00 GMT")
        .with_body("private-bytes")
        .expect(0)
        .create_async()
        .await;

    let app = remote_app(&blob).await;
    let response = app.server.get("/media/L1_secret.mp4").await;
    response.assert_status(StatusCode::NOT_FOUND);
    assert!(!response.text().contains("private-bytes"));

    app.server
        .put("/media/L1_secret.json")
        .bytes("{}".into())
        .await
        .assert_status(StatusCode::METHOD_NOT_ALLOWED);
    upstream.assert_async().await;
}

#[tokio::test]
async fn readiness_does_not_touch_remote_storage() {
    let mut blob = mockito::Server::new_async().await;
    let writes = blob
        .mock("PUT", Matcher::Any)
        .with_status(500)
        .expect(0)
        .create_async()
        .await;
    let reads = blob
        .mock("GET", Matcher::Any)
        .with_status(500)
        .expect(0)
        .create_async()
        .await;

    let app = remote_app(&blob).await;
    let ready = app.server.get("/readyz").await;
    ready.assert_status_ok();
    let body: serde_json::Value = ready.json();
    assert_eq!(body["backend"], "remote");
    assert_eq!(body["checks"]["database"]["ok"], true);

    writes.assert_async().await;
    reads.assert_async().await;
}

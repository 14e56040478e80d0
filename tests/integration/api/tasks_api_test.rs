// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::integration::helpers::{conversion_deps, setup, TestEnv};
use axum::http::StatusCode;
use axum_test::TestServer;
use bytes::Bytes;
use rasterflow::application::dto::task_request::{SubmitResponseDto, TaskViewDto};
use rasterflow::domain::models::task::{OutputKind, TaskStatus};
use rasterflow::domain::repositories::task_repository::TaskRepository;
use rasterflow::engines::synthetic_engine::SyntheticManifest;
use rasterflow::infrastructure::liveness::SlotRegistry;
use rasterflow::presentation::routes;
use rasterflow::workers::conversion_worker::ConversionWorker;
use serde_json::Value;
use tokio::sync::watch;
use uuid::Uuid;

fn server(env: &TestEnv, max_upload_bytes: usize) -> TestServer {
    let app = routes::routes(env.service.clone(), max_upload_bytes);
    TestServer::new(app).unwrap()
}

fn manifest() -> Bytes {
    Bytes::from(SyntheticManifest::default().page(200.0, 100.0).to_bytes())
}

async fn submit(server: &TestServer, output: &str) -> Uuid {
    let response = server
        .post("/v1/tasks")
        .add_query_param("filename", "report.pdf")
        .add_query_param("output", output)
        .bytes(manifest())
        .await;
    assert_eq!(response.status_code(), StatusCode::ACCEPTED);
    let body: SubmitResponseDto = response.json();
    assert_eq!(body.status, TaskStatus::Queued);
    body.task_id
}

#[tokio::test]
async fn test_health_check() {
    let env = setup().await;
    let server = server(&env, 1024 * 1024);

    let response = server.get("/health").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.text(), "OK");
}

#[tokio::test]
async fn test_submit_and_get_status() {
    let env = setup().await;
    let server = server(&env, 1024 * 1024);
    let id = submit(&server, "png").await;

    let response = server.get(&format!("/v1/tasks/{}", id)).await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let view: TaskViewDto = response.json();
    assert_eq!(view.id, id);
    assert_eq!(view.status, TaskStatus::Queued);
    assert_eq!(view.output, OutputKind::Png);
    assert_eq!(view.progress, 0);
    assert_eq!(view.original_filename.as_deref(), Some("report.pdf"));
}

#[tokio::test]
async fn test_unknown_task_is_404() {
    let env = setup().await;
    let server = server(&env, 1024 * 1024);
    let id = Uuid::new_v4();

    for path in [
        format!("/v1/tasks/{}", id),
        format!("/v1/tasks/{}/download", id),
    ] {
        assert_eq!(server.get(&path).await.status_code(), StatusCode::NOT_FOUND);
    }
    assert_eq!(
        server
            .post(&format!("/v1/tasks/{}/cancel", id))
            .await
            .status_code(),
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        server
            .delete(&format!("/v1/tasks/{}", id))
            .await
            .status_code(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn test_invalid_parameters_are_rejected() {
    let env = setup().await;
    let server = server(&env, 1024 * 1024);

    let response = server
        .post("/v1/tasks")
        .add_query_param("dpi", "5000")
        .bytes(manifest())
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert!(body["details"].get("dpi").is_some(), "{}", body);

    let response = server
        .post("/v1/tasks")
        .add_query_param("quality", "0")
        .bytes(manifest())
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    let response = server.post("/v1/tasks").bytes(Bytes::new()).await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_limit_is_enforced() {
    let env = setup().await;
    let server = server(&env, 16);

    let response = server
        .post("/v1/tasks")
        .bytes(Bytes::from(vec![b'x'; 64]))
        .await;
    assert_eq!(response.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_cancel_queued_task_then_conflict_after_completion() {
    let env = setup().await;
    let server = server(&env, 1024 * 1024);

    let queued = submit(&server, "pdf").await;
    let response = server.post(&format!("/v1/tasks/{}/cancel", queued)).await;
    assert_eq!(response.status_code(), StatusCode::ACCEPTED);
    let body: Value = response.json();
    assert_eq!(body["result"], "accepted");
    assert!(env.repo.find_by_id(queued).await.unwrap().is_none());

    let id = submit(&server, "pdf").await;
    let (_tx, rx) = watch::channel(false);
    let slot = ConversionWorker::new(
        0,
        conversion_deps(env.repo.clone(), &env, SlotRegistry::new(), 256),
        rx,
    );
    assert!(slot.process_next().await.unwrap());

    let response = server.post(&format!("/v1/tasks/{}/cancel", id)).await;
    assert_eq!(response.status_code(), StatusCode::CONFLICT);
    let body: Value = response.json();
    assert_eq!(body["result"], "already_terminal");
}

#[tokio::test]
async fn test_download_and_delete_completed_task() {
    let env = setup().await;
    let server = server(&env, 1024 * 1024);
    let id = submit(&server, "jpeg").await;

    // 未完成时不可下载
    assert_eq!(
        server
            .get(&format!("/v1/tasks/{}/download", id))
            .await
            .status_code(),
        StatusCode::NOT_FOUND
    );

    let (_tx, rx) = watch::channel(false);
    let slot = ConversionWorker::new(
        0,
        conversion_deps(env.repo.clone(), &env, SlotRegistry::new(), 256),
        rx,
    );
    assert!(slot.process_next().await.unwrap());

    let response = server.get(&format!("/v1/tasks/{}/download", id)).await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.header("content-type"), "image/jpeg");
    let disposition = response.header("content-disposition");
    assert_eq!(
        disposition.to_str().unwrap(),
        "attachment; filename=\"report.jpg\""
    );
    let length: usize = response
        .header("content-length")
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(length > 0);
    assert_eq!(response.as_bytes().len(), length);

    let response = server.delete(&format!("/v1/tasks/{}", id)).await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["result"], "deleted");

    let response = server.delete(&format!("/v1/tasks/{}", id)).await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_processing_task_initiates_cancel() {
    let env = setup().await;
    let server = server(&env, 1024 * 1024);
    let id = submit(&server, "pdf").await;
    assert!(env.repo.claim(id, "1:0:lease").await.unwrap());

    let response = server.delete(&format!("/v1/tasks/{}", id)).await;
    assert_eq!(response.status_code(), StatusCode::ACCEPTED);
    let body: Value = response.json();
    assert_eq!(body["result"], "cancel_initiated");

    let view: TaskViewDto = server.get(&format!("/v1/tasks/{}", id)).await.json();
    assert_eq!(view.status, TaskStatus::Cancelling);
    assert!(view.cancel_requested);
}

#[tokio::test]
async fn test_control_characters_in_filename_do_not_break_download() {
    let env = setup().await;
    let server = server(&env, 1024 * 1024);

    let response = server
        .post("/v1/tasks")
        .add_query_param("filename", "a\nb \"x\".pdf")
        .add_query_param("output", "png")
        .bytes(manifest())
        .await;
    assert_eq!(response.status_code(), StatusCode::ACCEPTED);
    let id = response.json::<SubmitResponseDto>().task_id;

    let (_tx, rx) = watch::channel(false);
    let slot = ConversionWorker::new(
        0,
        conversion_deps(env.repo.clone(), &env, SlotRegistry::new(), 256),
        rx,
    );
    assert!(slot.process_next().await.unwrap());

    let response = server.get(&format!("/v1/tasks/{}/download", id)).await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(
        response.header("content-disposition").to_str().unwrap(),
        "attachment; filename=\"a_b_x.png\""
    );
}

// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::integration::helpers::{
    conversion_deps, setup, setup_file_db, submit_manifest, wait_until, RecordingRepository,
};
use rasterflow::application::usecases::task_service::CancelOutcome;
use rasterflow::domain::models::task::{OutputKind, TaskStatus};
use rasterflow::domain::repositories::storage_repository::StorageRepository;
use rasterflow::domain::repositories::task_repository::{CheckpointOutcome, TaskRepository};
use rasterflow::engines::synthetic_engine::SyntheticManifest;
use rasterflow::infrastructure::liveness::SlotRegistry;
use rasterflow::workers::conversion_worker::{ConversionWorker, COMPLETED_MESSAGE};
use rasterflow::workers::manager::WorkerManager;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

const TILE_EDGE: u32 = 256;

fn worker(deps: rasterflow::workers::conversion_worker::ConversionDeps) -> ConversionWorker {
    let (_tx, rx) = watch::channel(false);
    ConversionWorker::new(0, deps, rx)
}

#[tokio::test]
async fn test_multi_page_document_completes_with_monotonic_progress() {
    let env = setup().await;
    // 第二页 600x600 点，在 72 dpi 下切为 3x3 个瓦片
    let manifest = SyntheticManifest::default()
        .page(200.0, 200.0)
        .page(600.0, 600.0)
        .page(200.0, 300.0);
    let task = submit_manifest(&env, &manifest, OutputKind::Pdf).await;

    let recording = Arc::new(RecordingRepository::new(env.repo.clone()));
    let registry = SlotRegistry::new();
    let slot = worker(conversion_deps(
        recording.clone(),
        &env,
        registry.clone(),
        TILE_EDGE,
    ));

    assert!(slot.process_next().await.unwrap());
    assert_eq!(registry.active(), 0);

    let entries = recording.entries();
    assert!(entries
        .iter()
        .all(|e| e.outcome == CheckpointOutcome::Continue));
    let progress: Vec<i32> = entries.iter().map(|e| e.progress).collect();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{:?}", progress);
    let mut distinct = progress.clone();
    distinct.dedup();
    assert!(distinct.len() >= 10, "{:?}", distinct);
    assert_eq!(progress.first(), Some(&5));
    assert_eq!(progress.last(), Some(&95));

    let stored = env.repo.find_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Completed);
    assert_eq!(stored.progress, 100);
    assert_eq!(stored.message, COMPLETED_MESSAGE);
    assert!(stored.owner.is_none());
    assert!(stored.size_out.unwrap_or(0) > 0);

    let output = stored.output_ref.as_deref().unwrap();
    let bytes = env.storage.get(output).await.unwrap().unwrap();
    assert!(bytes.starts_with(b"%PDF-"));
    assert_eq!(bytes.len() as i64, stored.size_out.unwrap());
    // 输入制品在任务结束后被删除
    assert!(!env.storage.exists(&task.input_ref).await.unwrap());

    let download = env.service.download(task.id).await.unwrap().unwrap();
    assert_eq!(download.filename, "Compressed_synthetic.pdf");
    assert_eq!(download.content_type, "application/pdf");
    assert_eq!(download.size as i64, stored.size_out.unwrap());
    assert_eq!(std::fs::read(&download.path).unwrap(), bytes);
}

#[tokio::test]
async fn test_composite_image_output() {
    let env = setup().await;
    let manifest = SyntheticManifest::default()
        .page(300.0, 100.0)
        .page(200.0, 400.0);
    let task = submit_manifest(&env, &manifest, OutputKind::Png).await;

    let slot = worker(conversion_deps(
        env.repo.clone(),
        &env,
        SlotRegistry::new(),
        TILE_EDGE,
    ));
    assert!(slot.process_next().await.unwrap());

    let stored = env.repo.find_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Completed);

    let bytes = env
        .storage
        .get(stored.output_ref.as_deref().unwrap())
        .await
        .unwrap()
        .unwrap();
    let image = image::load_from_memory(&bytes).unwrap();
    // 页面纵向拼接，宽度取最宽页
    assert_eq!(image.width(), 300);
    assert_eq!(image.height(), 500);
}

#[tokio::test]
async fn test_cancel_before_claim_is_never_processed() {
    let env = setup().await;
    let manifest = SyntheticManifest::default().page(200.0, 200.0);
    let task = submit_manifest(&env, &manifest, OutputKind::Pdf).await;

    assert_eq!(
        env.service.request_cancel(task.id).await.unwrap(),
        CancelOutcome::Accepted
    );

    let recording = Arc::new(RecordingRepository::new(env.repo.clone()));
    let slot = worker(conversion_deps(
        recording.clone(),
        &env,
        SlotRegistry::new(),
        TILE_EDGE,
    ));
    assert!(!slot.process_next().await.unwrap());

    assert!(recording.entries().is_empty());
    assert!(env.repo.find_by_id(task.id).await.unwrap().is_none());
    assert!(!env.storage.exists(&task.input_ref).await.unwrap());
}

#[tokio::test]
async fn test_cancel_during_processing_stops_within_one_tile() {
    let env = setup_file_db().await;
    // 单页 2048x2048 点切为 8x8 个瓦片
    let manifest = SyntheticManifest::default()
        .page(2048.0, 2048.0)
        .with_delay(Duration::from_millis(40));
    let task = submit_manifest(&env, &manifest, OutputKind::Pdf).await;

    let recording = Arc::new(RecordingRepository::new(env.repo.clone()));
    let slot = worker(conversion_deps(
        recording.clone(),
        &env,
        SlotRegistry::new(),
        TILE_EDGE,
    ));
    let handle = tokio::spawn(async move { slot.process_next().await });

    // 等到至少一个瓦片完成
    let started = wait_until(Duration::from_secs(10), || {
        let recording = recording.clone();
        async move { recording.entries().iter().any(|e| e.progress > 10) }
    })
    .await;
    assert!(started);

    let cancelled_at = Instant::now();
    assert_eq!(
        env.service.request_cancel(task.id).await.unwrap(),
        CancelOutcome::Accepted
    );

    assert!(handle.await.unwrap().unwrap());

    let entries = recording.entries();
    let after_cancel: Vec<_> = entries.iter().filter(|e| e.at > cancelled_at).collect();
    let continued = after_cancel
        .iter()
        .filter(|e| e.outcome == CheckpointOutcome::Continue)
        .count();
    assert!(continued <= 1, "{:?}", after_cancel);
    assert_eq!(
        entries.last().map(|e| e.outcome),
        Some(CheckpointOutcome::CancelRequested)
    );
    assert!(entries.len() < 64);

    assert!(env.repo.find_by_id(task.id).await.unwrap().is_none());
    assert!(!env.storage.exists(&task.input_ref).await.unwrap());
    assert!(!env
        .storage
        .exists(task.output_ref.as_deref().unwrap())
        .await
        .unwrap());
}

#[tokio::test]
async fn test_zero_page_document() {
    let env = setup().await;
    let empty = SyntheticManifest::default();

    let pdf = submit_manifest(&env, &empty, OutputKind::Pdf).await;
    let png = submit_manifest(&env, &empty, OutputKind::Png).await;

    let slot = worker(conversion_deps(
        env.repo.clone(),
        &env,
        SlotRegistry::new(),
        TILE_EDGE,
    ));
    assert!(slot.process_next().await.unwrap());
    assert!(slot.process_next().await.unwrap());
    assert!(!slot.process_next().await.unwrap());

    // 文档输出：一个没有页面的合法 PDF
    let stored = env.repo.find_by_id(pdf.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Completed);
    assert!(stored.size_out.unwrap_or(0) > 0);

    // 合成图输出：没有可拼接的页面
    let stored = env.repo.find_by_id(png.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Failed);
    assert!(stored.message.starts_with("Error: "), "{}", stored.message);
    assert!(stored.output_ref.is_none());
    assert!(!env
        .storage
        .exists(png.output_ref.as_deref().unwrap())
        .await
        .unwrap());
}

#[tokio::test]
async fn test_render_failure_marks_task_failed() {
    let env = setup().await;
    let manifest = SyntheticManifest::default()
        .page(200.0, 200.0)
        .page(200.0, 200.0)
        .failing_on(1);
    let task = submit_manifest(&env, &manifest, OutputKind::Pdf).await;

    let slot = worker(conversion_deps(
        env.repo.clone(),
        &env,
        SlotRegistry::new(),
        TILE_EDGE,
    ));
    assert!(slot.process_next().await.unwrap());

    let stored = env.repo.find_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Failed);
    assert!(stored.message.starts_with("Error: "));
    assert!(stored.message.chars().count() <= 103);
    assert!(stored.owner.is_none());
    assert!(!env.storage.exists(&task.input_ref).await.unwrap());
    assert!(!env
        .storage
        .exists(task.output_ref.as_deref().unwrap())
        .await
        .unwrap());
}

#[tokio::test]
async fn test_missing_input_marks_task_failed() {
    let env = setup().await;
    let manifest = SyntheticManifest::default().page(100.0, 100.0);
    let task = submit_manifest(&env, &manifest, OutputKind::Jpeg).await;
    assert!(env.storage.delete(&task.input_ref).await.unwrap());

    let slot = worker(conversion_deps(
        env.repo.clone(),
        &env,
        SlotRegistry::new(),
        TILE_EDGE,
    ));
    assert!(slot.process_next().await.unwrap());

    let stored = env.repo.find_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Failed);
}

#[tokio::test]
async fn test_worker_manager_processes_queue_and_shuts_down() {
    let env = setup_file_db().await;
    let manifest = SyntheticManifest::default().page(300.0, 300.0);
    let mut tasks = Vec::new();
    for _ in 0..3 {
        tasks.push(submit_manifest(&env, &manifest, OutputKind::Pdf).await);
    }

    let mut manager = WorkerManager::new();
    manager.start_workers(
        2,
        conversion_deps(env.repo.clone(), &env, SlotRegistry::new(), TILE_EDGE),
    );
    assert_eq!(manager.len(), 2);

    let repo = env.repo.clone();
    let ids: Vec<_> = tasks.iter().map(|t| t.id).collect();
    let done = wait_until(Duration::from_secs(20), || {
        let repo = repo.clone();
        let ids = ids.clone();
        async move {
            for id in ids {
                match repo.find_by_id(id).await {
                    Ok(Some(task)) if task.status == TaskStatus::Completed => {}
                    _ => return false,
                }
            }
            true
        }
    })
    .await;
    assert!(done);

    manager.shutdown(Duration::from_secs(5)).await;
    assert!(manager.is_empty());
}

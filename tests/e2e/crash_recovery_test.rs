// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::integration::helpers::{
    conversion_deps, setup_file_db, submit_manifest, wait_until, watchdog_settings, TestEnv,
};
use chrono::{Duration as ChronoDuration, Utc};
use rasterflow::domain::models::task::{OutputKind, TaskRecord, TaskStatus};
use rasterflow::domain::repositories::storage_repository::StorageRepository;
use rasterflow::domain::repositories::task_repository::TaskRepository;
use rasterflow::engines::synthetic_engine::SyntheticManifest;
use rasterflow::infrastructure::liveness::{ProcessLiveness, SlotRegistry};
use rasterflow::workers::conversion_worker::ConversionWorker;
use rasterflow::workers::watchdog_worker::{WatchdogWorker, ORPHAN_MESSAGE};
use rasterflow::workers::Worker;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// 启动一个执行槽处理慢速任务，等到它写入至少一次瓦片心跳
async fn start_slow_task(
    env: &TestEnv,
    registry: &SlotRegistry,
) -> (TaskRecord, JoinHandle<()>) {
    let manifest = SyntheticManifest::default()
        .page(2048.0, 2048.0)
        .with_delay(Duration::from_millis(100));
    let task = submit_manifest(env, &manifest, OutputKind::Pdf).await;

    let (_tx, rx) = watch::channel(false);
    let slot = ConversionWorker::new(
        0,
        conversion_deps(env.repo.clone(), env, registry.clone(), 256),
        rx,
    );
    let handle = tokio::spawn(async move {
        let _ = slot.process_next().await;
    });

    let repo = env.repo.clone();
    let id = task.id;
    let heartbeat = wait_until(Duration::from_secs(10), || {
        let repo = repo.clone();
        async move {
            matches!(
                repo.find_by_id(id).await,
                Ok(Some(t)) if t.status == TaskStatus::Processing && t.progress > 10
            )
        }
    })
    .await;
    assert!(heartbeat);

    (task, handle)
}

#[tokio::test]
async fn test_live_worker_is_not_failed_but_crashed_worker_is() {
    let env = setup_file_db().await;
    let registry = SlotRegistry::new();
    let (task, handle) = start_slow_task(&env, &registry).await;

    let (_tx, rx) = watch::channel(false);
    let watchdog = WatchdogWorker::new(
        env.repo.clone(),
        env.storage.clone(),
        Arc::new(ProcessLiveness::new(registry.clone())),
        watchdog_settings(1),
        rx,
    );

    // 以未来时间扫描：心跳已过期，但租约仍在
    let report = watchdog
        .check_stale_once(Utc::now() + ChronoDuration::seconds(3))
        .await
        .unwrap();
    assert_eq!(report.alive, 1);
    assert_eq!(report.failed, 0);
    let stored = env.repo.find_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Processing);

    // 模拟崩溃：执行槽被中止，租约随之释放
    handle.abort();
    let _ = handle.await;
    assert_eq!(registry.active(), 0);

    let report = watchdog
        .check_stale_once(Utc::now() + ChronoDuration::seconds(3))
        .await
        .unwrap();
    assert_eq!(report.failed, 1);

    let stored = env.repo.find_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Failed);
    assert_eq!(stored.message, ORPHAN_MESSAGE);
    assert!(stored.owner.is_none());
    assert!(!env.storage.exists(&task.input_ref).await.unwrap());
    assert!(!env
        .storage
        .exists(task.output_ref.as_deref().unwrap())
        .await
        .unwrap());
}

#[tokio::test]
async fn test_running_watchdog_recovers_crashed_worker() {
    let env = setup_file_db().await;
    let registry = SlotRegistry::new();
    let (task, handle) = start_slow_task(&env, &registry).await;

    handle.abort();
    let _ = handle.await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watchdog = Arc::new(WatchdogWorker::new(
        env.repo.clone(),
        env.storage.clone(),
        Arc::new(ProcessLiveness::new(registry.clone())),
        watchdog_settings(1),
        shutdown_rx,
    ));
    let runner = {
        let watchdog = watchdog.clone();
        tokio::spawn(async move { watchdog.run().await })
    };

    // 过期阈值 1 秒加扫描间隔 1 秒，留出余量
    let repo = env.repo.clone();
    let id = task.id;
    let failed = wait_until(Duration::from_secs(5), || {
        let repo = repo.clone();
        async move {
            matches!(
                repo.find_by_id(id).await,
                Ok(Some(t)) if t.status == TaskStatus::Failed
            )
        }
    })
    .await;
    assert!(failed);

    shutdown_tx.send(true).unwrap();
    runner.await.unwrap().unwrap();
}

// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use migration::{Migrator, MigratorTrait};
use parking_lot::Mutex;
use rasterflow::application::dto::task_request::SubmitRequestDto;
use rasterflow::application::usecases::task_service::TaskService;
use rasterflow::config::settings::{DatabaseSettings, SubmissionSettings, WatchdogSettings};
use rasterflow::domain::models::task::{OutputKind, TaskRecord, TaskStatus};
use rasterflow::domain::repositories::task_repository::{
    CheckpointOutcome, RepositoryError, TaskOutcome, TaskPatch, TaskRepository,
};
use rasterflow::engines::synthetic_engine::{SyntheticManifest, SyntheticRenderer};
use rasterflow::infrastructure::database::connection::create_pool;
use rasterflow::infrastructure::liveness::SlotRegistry;
use rasterflow::infrastructure::repositories::task_repo_impl::TaskRepositoryImpl;
use rasterflow::infrastructure::storage::LocalStorage;
use rasterflow::workers::conversion_worker::ConversionDeps;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use uuid::Uuid;

/// 测试环境：迁移过的数据库、制品目录与任务服务
#[allow(dead_code)]
pub struct TestEnv {
    pub db: Arc<DatabaseConnection>,
    pub repo: Arc<TaskRepositoryImpl>,
    pub storage: Arc<LocalStorage>,
    pub service: Arc<TaskService>,
    pub dir: TempDir,
}

async fn build_env(url: String, max_connections: u32, dir: TempDir) -> TestEnv {
    let db = create_pool(&DatabaseSettings {
        url,
        max_connections: Some(max_connections),
        min_connections: Some(1),
        connect_timeout: None,
        idle_timeout: None,
    })
    .await
    .unwrap();
    Migrator::up(&db, None).await.unwrap();

    let db = Arc::new(db);
    let repo = Arc::new(TaskRepositoryImpl::new(db.clone()));
    let storage = Arc::new(LocalStorage::new(dir.path().join("storage")));
    let service = Arc::new(TaskService::new(
        repo.clone(),
        storage.clone(),
        submission_settings(),
    ));

    TestEnv {
        db,
        repo,
        storage,
        service,
        dir,
    }
}

/// 单连接的内存数据库
pub async fn setup() -> TestEnv {
    let dir = tempfile::tempdir().unwrap();
    build_env("sqlite::memory:".to_string(), 1, dir).await
}

/// 文件数据库，允许多个连接并发访问，中止的执行槽不会影响其他连接
pub async fn setup_file_db() -> TestEnv {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("tasks.db").display());
    build_env(url, 4, dir).await
}

pub fn submission_settings() -> SubmissionSettings {
    SubmissionSettings {
        min_dpi: 10,
        max_dpi: 600,
        default_dpi: 72,
        default_quality: 85,
    }
}

pub fn watchdog_settings(stale_threshold_secs: u64) -> WatchdogSettings {
    WatchdogSettings {
        stale_threshold_secs,
        stale_check_interval_secs: 1,
        cleanup_interval_secs: 3600,
        retention_hours: 72,
    }
}

/// 提交一份合成文档
pub async fn submit_manifest(
    env: &TestEnv,
    manifest: &SyntheticManifest,
    output: OutputKind,
) -> TaskRecord {
    env.service
        .submit(
            &manifest.to_bytes(),
            SubmitRequestDto {
                filename: Some("synthetic.pdf".to_string()),
                dpi: Some(72),
                output: Some(output),
                ..Default::default()
            },
        )
        .await
        .unwrap()
}

/// 使用合成渲染器的执行槽依赖
pub fn conversion_deps(
    repository: Arc<dyn TaskRepository>,
    env: &TestEnv,
    registry: SlotRegistry,
    tile_edge: u32,
) -> ConversionDeps {
    ConversionDeps {
        repository,
        storage: env.storage.clone(),
        renderer: Arc::new(SyntheticRenderer::new()),
        ocr: None,
        registry,
        tile_edge,
        poll_interval: Duration::from_millis(20),
    }
}

/// 轮询直到条件满足或超时
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// 一次检查点调用的记录
#[derive(Debug, Clone, Copy)]
pub struct CheckpointEntry {
    pub at: Instant,
    pub progress: i32,
    pub outcome: CheckpointOutcome,
}

/// 记录检查点调用的任务仓库包装
pub struct RecordingRepository {
    inner: Arc<TaskRepositoryImpl>,
    log: Mutex<Vec<CheckpointEntry>>,
}

impl RecordingRepository {
    pub fn new(inner: Arc<TaskRepositoryImpl>) -> Self {
        Self {
            inner,
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn entries(&self) -> Vec<CheckpointEntry> {
        self.log.lock().clone()
    }
}

#[async_trait]
impl TaskRepository for RecordingRepository {
    async fn create(&self, task: &TaskRecord) -> Result<TaskRecord, RepositoryError> {
        self.inner.create(task).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<TaskRecord>, RepositoryError> {
        self.inner.find_by_id(id).await
    }

    async fn update(&self, id: Uuid, patch: TaskPatch) -> Result<bool, RepositoryError> {
        self.inner.update(id, patch).await
    }

    async fn claim(&self, id: Uuid, owner: &str) -> Result<bool, RepositoryError> {
        self.inner.claim(id, owner).await
    }

    async fn claim_next(&self, owner: &str) -> Result<Option<TaskRecord>, RepositoryError> {
        self.inner.claim_next(owner).await
    }

    async fn checkpoint(
        &self,
        id: Uuid,
        owner: &str,
        progress: i32,
        message: &str,
    ) -> Result<CheckpointOutcome, RepositoryError> {
        let outcome = self.inner.checkpoint(id, owner, progress, message).await?;
        self.log.lock().push(CheckpointEntry {
            at: Instant::now(),
            progress,
            outcome,
        });
        Ok(outcome)
    }

    async fn finish(
        &self,
        id: Uuid,
        owner: &str,
        outcome: TaskOutcome,
    ) -> Result<bool, RepositoryError> {
        self.inner.finish(id, owner, outcome).await
    }

    async fn request_cancel(&self, id: Uuid) -> Result<bool, RepositoryError> {
        self.inner.request_cancel(id).await
    }

    async fn delete_if_queued(&self, id: Uuid) -> Result<bool, RepositoryError> {
        self.inner.delete_if_queued(id).await
    }

    async fn delete_owned(&self, id: Uuid, owner: &str) -> Result<bool, RepositoryError> {
        self.inner.delete_owned(id, owner).await
    }

    async fn delete(&self, id: Uuid) -> Result<bool, RepositoryError> {
        self.inner.delete(id).await
    }

    async fn list_stale(
        &self,
        heartbeat_before: DateTime<FixedOffset>,
    ) -> Result<Vec<TaskRecord>, RepositoryError> {
        self.inner.list_stale(heartbeat_before).await
    }

    async fn fail_orphan(
        &self,
        id: Uuid,
        owner: Option<&str>,
        heartbeat_before: DateTime<FixedOffset>,
        message: &str,
    ) -> Result<bool, RepositoryError> {
        self.inner
            .fail_orphan(id, owner, heartbeat_before, message)
            .await
    }

    async fn list_retirable(
        &self,
        updated_before: DateTime<FixedOffset>,
        statuses: &[TaskStatus],
    ) -> Result<Vec<TaskRecord>, RepositoryError> {
        self.inner.list_retirable(updated_before, statuses).await
    }
}

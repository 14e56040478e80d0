// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::task::TaskRecord;
use crate::domain::repositories::storage_repository::StorageRepository;
use crate::domain::repositories::task_repository::{TaskOutcome, TaskRepository};
use crate::domain::services::artifacts::{remove_artifacts, remove_input, remove_output};
use crate::domain::services::liveness::OwnerId;
use crate::engines::traits::{OcrEngine, Renderer};
use crate::infrastructure::liveness::SlotRegistry;
use crate::infrastructure::metrics::{
    TASKS_CANCELLED, TASKS_CLAIMED, TASKS_COMPLETED, TASKS_FAILED,
};
use crate::processing::checkpoint::{Checkpoint, Interrupt, StoreCheckpoint};
use crate::processing::sink::sink_for;
use crate::processing::tiled_processor::{ProcessError, TiledProcessor};
use crate::utils::errors::{truncate_for_user, WorkerError};
use crate::workers::worker::Worker;
use async_trait::async_trait;
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

/// 打开文档时写入的进度
pub const PROGRESS_OPENED: i32 = 5;

/// 完成时面向用户的消息
pub const COMPLETED_MESSAGE: &str = "Conversion complete! Your file is ready for download.";

/// 转换执行槽的依赖
#[derive(Clone)]
pub struct ConversionDeps {
    pub repository: Arc<dyn TaskRepository>,
    pub storage: Arc<dyn StorageRepository>,
    pub renderer: Arc<dyn Renderer>,
    pub ocr: Option<Arc<dyn OcrEngine>>,
    pub registry: SlotRegistry,
    pub tile_edge: u32,
    pub poll_interval: Duration,
}

/// 转换工作器
///
/// 每个实例是一个执行槽：一次只处理一个任务，直到任务结束。
pub struct ConversionWorker {
    name: String,
    slot: usize,
    deps: ConversionDeps,
    processor: TiledProcessor,
    shutdown: watch::Receiver<bool>,
}

impl ConversionWorker {
    pub fn new(slot: usize, deps: ConversionDeps, shutdown: watch::Receiver<bool>) -> Self {
        let processor = TiledProcessor::new(deps.tile_edge);
        Self {
            name: format!("conversion-{}", slot),
            slot,
            deps,
            processor,
            shutdown,
        }
    }

    /// 领取并执行下一个排队任务
    ///
    /// # 返回值
    ///
    /// 领取到任务时返回 `true`，队列为空时返回 `false`
    pub async fn process_next(&self) -> Result<bool, WorkerError> {
        // 租约在领取前登记，看门狗看到持有者时它一定已存在
        let lease = self.deps.registry.register(OwnerId::new(self.slot));
        let owner = lease.token();

        let Some(task) = self.deps.repository.claim_next(&owner).await? else {
            return Ok(false);
        };
        counter!(TASKS_CLAIMED).increment(1);

        self.execute(task, &owner).await?;
        drop(lease);
        Ok(true)
    }

    #[instrument(skip_all, fields(task_id = %task.id, slot = self.slot))]
    async fn execute(&self, task: TaskRecord, owner: &str) -> Result<(), WorkerError> {
        info!(output = ?task.config.output, dpi = task.config.dpi, "Conversion started");

        let mut checkpoint = StoreCheckpoint::new(
            self.deps.repository.clone(),
            task.id,
            owner.to_string(),
        );

        match self.convert(&task, &mut checkpoint).await {
            Ok(size) => self.complete(&task, owner, size).await,
            Err(ProcessError::Interrupted(Interrupt::Cancelled)) => {
                self.acknowledge_cancel(&task, owner).await
            }
            Err(ProcessError::Interrupted(Interrupt::Lost)) => {
                warn!("Task record is gone or owned elsewhere, abandoning");
                remove_output(self.deps.storage.as_ref(), &task).await;
                Ok(())
            }
            Err(e) => self.fail(&task, owner, e).await,
        }
    }

    async fn convert(
        &self,
        task: &TaskRecord,
        checkpoint: &mut StoreCheckpoint,
    ) -> Result<u64, ProcessError> {
        checkpoint
            .reached(PROGRESS_OPENED, "Preparing: Opening your document...")
            .await?;

        let output_key = task
            .output_ref
            .as_deref()
            .ok_or_else(|| ProcessError::Output("task has no output location".to_string()))?;
        let input = self.deps.storage.prepare_path(&task.input_ref).await?;
        let output = self.deps.storage.prepare_path(output_key).await?;

        let document = self.deps.renderer.open(&input).await?;
        let config = task.config.clone();
        let sink = tokio::task::spawn_blocking(move || sink_for(&config, &output)).await??;

        self.processor
            .run(
                document.as_ref(),
                sink,
                &task.config,
                self.deps.ocr.as_deref(),
                checkpoint,
            )
            .await
    }

    async fn complete(&self, task: &TaskRecord, owner: &str, size: u64) -> Result<(), WorkerError> {
        let outcome = TaskOutcome::Completed {
            size_out: i64::try_from(size).unwrap_or(i64::MAX),
            message: COMPLETED_MESSAGE.to_string(),
        };

        if self
            .deps
            .repository
            .finish(task.id, owner, outcome)
            .await?
        {
            remove_input(self.deps.storage.as_ref(), task).await;
            counter!(TASKS_COMPLETED).increment(1);
            info!(size_out = size, "Conversion completed");
        } else {
            // 记录已被删除或被看门狗接管，产物无人引用
            warn!("Task lost before completion could be recorded");
            remove_output(self.deps.storage.as_ref(), task).await;
        }
        Ok(())
    }

    async fn acknowledge_cancel(&self, task: &TaskRecord, owner: &str) -> Result<(), WorkerError> {
        remove_artifacts(self.deps.storage.as_ref(), task).await;
        let deleted = self.deps.repository.delete_owned(task.id, owner).await?;
        counter!(TASKS_CANCELLED).increment(1);
        info!(deleted, "Conversion cancelled");
        Ok(())
    }

    async fn fail(
        &self,
        task: &TaskRecord,
        owner: &str,
        e: ProcessError,
    ) -> Result<(), WorkerError> {
        error!("Conversion failed: {}", e);
        remove_output(self.deps.storage.as_ref(), task).await;

        let outcome = TaskOutcome::Failed {
            message: truncate_for_user(&format!("Error: {}", e)),
        };
        if self
            .deps
            .repository
            .finish(task.id, owner, outcome)
            .await?
        {
            remove_input(self.deps.storage.as_ref(), task).await;
            counter!(TASKS_FAILED).increment(1);
        }
        Ok(())
    }
}

#[async_trait]
impl Worker for ConversionWorker {
    async fn run(&self) -> Result<(), WorkerError> {
        info!("Conversion worker {} started", self.name);
        let mut shutdown = self.shutdown.clone();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let idle = match self.process_next().await {
                Ok(processed) => !processed,
                Err(e) => {
                    error!("Worker {} error: {}", self.name, e);
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = sleep(self.deps.poll_interval) => {}
                    changed = shutdown.changed() => {
                        // 发送端已释放，视同关闭
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        info!("Conversion worker {} stopped", self.name);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

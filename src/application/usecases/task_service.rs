// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::application::dto::task_request::SubmitRequestDto;
use crate::config::settings::SubmissionSettings;
use crate::domain::models::task::{secure_filename, TaskConfig, TaskRecord, TaskStatus};
use crate::domain::repositories::storage_repository::{StorageError, StorageRepository};
use crate::domain::repositories::task_repository::{RepositoryError, TaskRepository};
use crate::domain::services::artifacts::remove_artifacts;

/// 提交参数校验错误
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("the uploaded document is empty")]
    EmptyInput,
}

/// 任务服务错误类型
#[derive(Error, Debug)]
pub enum TaskServiceError {
    #[error(transparent)]
    Invalid(#[from] SubmitError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// 取消请求的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Accepted,
    AlreadyTerminal,
    NotFound,
}

/// 删除请求的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    CancelInitiated,
    NotFound,
}

/// 可下载的输出制品，内容由调用方按路径流式读取
#[derive(Debug)]
pub struct Download {
    pub filename: String,
    pub content_type: &'static str,
    pub path: PathBuf,
    pub size: u64,
}

// === Section: Use Case Definition ===

/// 任务服务
///
/// 请求处理器只通过它访问任务存储；所有状态变更都走存储的原子操作。
pub struct TaskService {
    repository: Arc<dyn TaskRepository>,
    storage: Arc<dyn StorageRepository>,
    submission: SubmissionSettings,
}

// === Section: Implementation ===

impl TaskService {
    pub fn new(
        repository: Arc<dyn TaskRepository>,
        storage: Arc<dyn StorageRepository>,
        submission: SubmissionSettings,
    ) -> Self {
        Self {
            repository,
            storage,
            submission,
        }
    }

    /// 提交新任务
    ///
    /// # 参数
    ///
    /// * `document` - 上传的原始文档
    /// * `request` - 转换参数
    ///
    /// # 返回值
    ///
    /// 处于 `queued` 状态的新任务记录
    pub async fn submit(
        &self,
        document: &[u8],
        request: SubmitRequestDto,
    ) -> Result<TaskRecord, TaskServiceError> {
        if document.is_empty() {
            return Err(SubmitError::EmptyInput.into());
        }
        // 文件名会进入响应头，只保留安全的单段名称
        let filename = request.filename.as_deref().and_then(secure_filename);
        let config = self.build_config(request)?;

        let id = Uuid::new_v4();
        let input_ref = format!("uploads/{}.pdf", id);
        let output_ref = format!("processed/{}.{}", id, config.output.extension());

        self.storage.save(&input_ref, document).await?;

        let record = TaskRecord {
            id,
            ..TaskRecord::new(
                config,
                input_ref,
                output_ref,
                i64::try_from(document.len()).ok(),
                filename,
            )
        };

        match self.repository.create(&record).await {
            Ok(created) => {
                info!(task_id = %created.id, size_in = document.len(), "Task submitted");
                Ok(created)
            }
            Err(e) => {
                // 记录没有写入，输入制品不再有人引用
                remove_artifacts(self.storage.as_ref(), &record).await;
                Err(e.into())
            }
        }
    }

    fn build_config(&self, request: SubmitRequestDto) -> Result<TaskConfig, SubmitError> {
        let defaults = TaskConfig::default();
        let config = TaskConfig {
            dpi: request.dpi.unwrap_or(self.submission.default_dpi),
            output: request.output.unwrap_or(defaults.output),
            quality: request.quality.unwrap_or(self.submission.default_quality),
            tile_encoding: request.tile_encoding.unwrap_or(defaults.tile_encoding),
            ocr: request.ocr.unwrap_or(defaults.ocr),
            ocr_language: request.ocr_language.unwrap_or(defaults.ocr_language),
        };

        let mut errors = match config.validate() {
            Ok(()) => ValidationErrors::new(),
            Err(errors) => errors,
        };

        // 分辨率范围来自部署配置，而不是编译期常量
        let (min, max) = (self.submission.min_dpi, self.submission.max_dpi);
        if config.dpi < min || config.dpi > max {
            let mut error = ValidationError::new("range");
            error.add_param("min".into(), &min);
            error.add_param("max".into(), &max);
            error.add_param("value".into(), &config.dpi);
            errors.add("dpi", error);
        }

        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors.into())
        }
    }

    /// 查询任务状态
    pub async fn get_status(&self, id: Uuid) -> Result<Option<TaskRecord>, TaskServiceError> {
        Ok(self.repository.find_by_id(id).await?)
    }

    /// 请求取消任务
    ///
    /// 尚未被领取的任务直接删除；处理中的任务设置取消标志，由执行槽在下一个检查点确认。
    pub async fn request_cancel(&self, id: Uuid) -> Result<CancelOutcome, TaskServiceError> {
        let Some(task) = self.repository.find_by_id(id).await? else {
            return Ok(CancelOutcome::NotFound);
        };

        if self.repository.delete_if_queued(id).await? {
            remove_artifacts(self.storage.as_ref(), &task).await;
            info!(task_id = %id, "Queued task cancelled");
            return Ok(CancelOutcome::Accepted);
        }

        if self.repository.request_cancel(id).await? {
            info!(task_id = %id, "Cancellation requested");
            return Ok(CancelOutcome::Accepted);
        }

        // 与执行槽的终止写入或删除竞争，以当前状态为准
        Ok(match self.repository.find_by_id(id).await? {
            None => CancelOutcome::NotFound,
            Some(current) if current.status == TaskStatus::Cancelling => CancelOutcome::Accepted,
            Some(_) => CancelOutcome::AlreadyTerminal,
        })
    }

    /// 删除任务
    ///
    /// 终止状态的任务连同制品一起删除；仍在进行中的任务转为取消。
    pub async fn delete(&self, id: Uuid) -> Result<DeleteOutcome, TaskServiceError> {
        let Some(task) = self.repository.find_by_id(id).await? else {
            return Ok(DeleteOutcome::NotFound);
        };

        if task.status.is_terminal() {
            return self.delete_terminal(&task).await;
        }

        if self.repository.delete_if_queued(id).await? {
            remove_artifacts(self.storage.as_ref(), &task).await;
            return Ok(DeleteOutcome::Deleted);
        }

        if self.repository.request_cancel(id).await? {
            return Ok(DeleteOutcome::CancelInitiated);
        }

        match self.repository.find_by_id(id).await? {
            None => Ok(DeleteOutcome::NotFound),
            Some(current) if current.status.is_terminal() => self.delete_terminal(&current).await,
            Some(_) => Ok(DeleteOutcome::CancelInitiated),
        }
    }

    async fn delete_terminal(&self, task: &TaskRecord) -> Result<DeleteOutcome, TaskServiceError> {
        if self.repository.delete(task.id).await? {
            remove_artifacts(self.storage.as_ref(), task).await;
            info!(task_id = %task.id, "Task deleted");
            Ok(DeleteOutcome::Deleted)
        } else {
            Ok(DeleteOutcome::NotFound)
        }
    }

    /// 读取已完成任务的输出制品
    ///
    /// # 返回值
    ///
    /// 任务不存在、未完成或制品缺失时返回 `None`
    pub async fn download(&self, id: Uuid) -> Result<Option<Download>, TaskServiceError> {
        let Some(task) = self.repository.find_by_id(id).await? else {
            return Ok(None);
        };
        if task.status != TaskStatus::Completed {
            return Ok(None);
        }
        let Some(key) = task.output_ref.as_deref() else {
            return Ok(None);
        };

        match self.storage.size(key).await? {
            Some(size) => Ok(Some(Download {
                filename: task.download_name(),
                content_type: task.config.output.content_type(),
                path: self.storage.prepare_path(key).await?,
                size,
            })),
            None => {
                warn!(task_id = %id, "Completed task is missing its output artifact");
                Ok(None)
            }
        }
    }
}

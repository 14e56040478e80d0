// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::task::{TaskRecord, TaskStatus};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use sea_orm::DbErr;
use thiserror::Error;
use uuid::Uuid;

/// 仓库错误类型
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// 数据库错误
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
    /// 记录未找到
    #[error("Record not found")]
    NotFound,
    /// 记录内容无法解析
    #[error("Corrupt task record {id}: {reason}")]
    Corrupt { id: Uuid, reason: String },
}

/// 部分字段更新
///
/// 只有 `Some` 的字段会被写入；`updated_at` 总是被刷新。
#[derive(Debug, Default, Clone)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub message: Option<String>,
    pub progress: Option<i32>,
    pub output_ref: Option<Option<String>>,
    pub size_out: Option<Option<i64>>,
    pub heartbeat_at: Option<DateTime<FixedOffset>>,
    pub owner: Option<Option<String>>,
}

impl TaskPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn progress(mut self, progress: i32) -> Self {
        self.progress = Some(progress.clamp(0, 100));
        self
    }
}

/// 检查点写入结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointOutcome {
    /// 心跳与进度已写入，可以继续处理
    Continue,
    /// 外部已请求取消
    CancelRequested,
    /// 记录已被删除，或已不再属于调用者
    Lost,
}

/// 任务终止结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// 成功完成
    Completed { size_out: i64, message: String },
    /// 处理失败，进度保持不变
    Failed { message: String },
}

/// 任务仓库特质
///
/// 所有会修改记录的操作都是单条带条件的 UPDATE/DELETE 语句，
/// 调用者之间的竞争由存储本身仲裁。
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// 插入新任务
    async fn create(&self, task: &TaskRecord) -> Result<TaskRecord, RepositoryError>;

    /// 根据ID查找任务
    async fn find_by_id(&self, id: Uuid) -> Result<Option<TaskRecord>, RepositoryError>;

    /// 部分更新，返回记录是否存在
    async fn update(&self, id: Uuid, patch: TaskPatch) -> Result<bool, RepositoryError>;

    /// 原子领取指定任务：queued 且未请求取消时才会成功
    async fn claim(&self, id: Uuid, owner: &str) -> Result<bool, RepositoryError>;

    /// 领取最早入队的可领取任务
    async fn claim_next(&self, owner: &str) -> Result<Option<TaskRecord>, RepositoryError>;

    /// 写入心跳与进度，同时检查取消请求
    async fn checkpoint(
        &self,
        id: Uuid,
        owner: &str,
        progress: i32,
        message: &str,
    ) -> Result<CheckpointOutcome, RepositoryError>;

    /// 由持有者写入终止状态，返回是否仍由调用者持有
    async fn finish(
        &self,
        id: Uuid,
        owner: &str,
        outcome: TaskOutcome,
    ) -> Result<bool, RepositoryError>;

    /// 设置取消标志：仅对 queued/processing 有效
    async fn request_cancel(&self, id: Uuid) -> Result<bool, RepositoryError>;

    /// 删除尚未被领取的任务
    async fn delete_if_queued(&self, id: Uuid) -> Result<bool, RepositoryError>;

    /// 持有者删除自己的任务（取消确认）
    async fn delete_owned(&self, id: Uuid, owner: &str) -> Result<bool, RepositoryError>;

    /// 删除任务，重复删除返回 `Ok(false)`
    async fn delete(&self, id: Uuid) -> Result<bool, RepositoryError>;

    /// 心跳早于给定时间的 processing/cancelling 任务
    async fn list_stale(
        &self,
        heartbeat_before: DateTime<FixedOffset>,
    ) -> Result<Vec<TaskRecord>, RepositoryError>;

    /// 强制将孤儿任务标记为失败
    ///
    /// 只有当任务仍属于同一个持有者且心跳仍然过期时才会生效。
    async fn fail_orphan(
        &self,
        id: Uuid,
        owner: Option<&str>,
        heartbeat_before: DateTime<FixedOffset>,
        message: &str,
    ) -> Result<bool, RepositoryError>;

    /// 指定状态中 `updated_at` 早于给定时间的任务
    async fn list_retirable(
        &self,
        updated_before: DateTime<FixedOffset>,
        statuses: &[TaskStatus],
    ) -> Result<Vec<TaskRecord>, RepositoryError>;
}

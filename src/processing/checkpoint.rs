// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::repositories::task_repository::{CheckpointOutcome, TaskRepository};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// 检查点中断原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// 外部请求取消
    Cancelled,
    /// 任务记录已被删除或不再属于当前执行槽
    Lost,
}

/// 处理过程中的检查点
///
/// 每个瓦片之后、每个页面边界和收尾之前都会调用一次。
#[async_trait]
pub trait Checkpoint: Send {
    /// 上报进度并检查是否需要停止
    async fn reached(&mut self, progress: i32, message: &str) -> Result<(), Interrupt>;
}

/// 写入任务存储的检查点
///
/// 进度只增不减；存储暂时不可用时记录警告并继续处理，
/// 缺失的心跳由看门狗按过期规则处理。
pub struct StoreCheckpoint {
    repo: Arc<dyn TaskRepository>,
    task_id: Uuid,
    owner: String,
    progress: i32,
}

impl StoreCheckpoint {
    pub fn new(repo: Arc<dyn TaskRepository>, task_id: Uuid, owner: String) -> Self {
        Self {
            repo,
            task_id,
            owner,
            progress: 0,
        }
    }

    /// 最近一次成功写入的进度
    pub fn progress(&self) -> i32 {
        self.progress
    }
}

#[async_trait]
impl Checkpoint for StoreCheckpoint {
    async fn reached(&mut self, progress: i32, message: &str) -> Result<(), Interrupt> {
        let progress = progress.clamp(0, 100).max(self.progress);

        match self
            .repo
            .checkpoint(self.task_id, &self.owner, progress, message)
            .await
        {
            Ok(CheckpointOutcome::Continue) => {
                self.progress = progress;
                Ok(())
            }
            Ok(CheckpointOutcome::CancelRequested) => Err(Interrupt::Cancelled),
            Ok(CheckpointOutcome::Lost) => Err(Interrupt::Lost),
            Err(e) => {
                warn!(task_id = %self.task_id, "Checkpoint write failed, continuing: {}", e);
                Ok(())
            }
        }
    }
}

// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::WatchdogSettings;
use crate::domain::models::task::{TaskRecord, TaskStatus};
use crate::domain::repositories::storage_repository::StorageRepository;
use crate::domain::repositories::task_repository::TaskRepository;
use crate::domain::services::artifacts::remove_artifacts;
use crate::domain::services::liveness::{Liveness, LivenessProbe};
use crate::infrastructure::metrics::{RETENTION_DELETED, WATCHDOG_ORPHANS};
use crate::utils::errors::WorkerError;
use crate::workers::worker::Worker;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// 孤儿任务的失败消息
pub const ORPHAN_MESSAGE: &str = "Task failed due to vanished or crashed worker process.";

/// 一次过期扫描的结果
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StaleReport {
    /// 持有者已死亡，被标记为失败
    pub failed: usize,
    /// 持有者仍存活，只记录日志
    pub alive: usize,
    /// 无法判断持有者状态，保守地不做处理
    pub unknown: usize,
    /// 无人确认的取消，记录被回收
    pub collected: usize,
}

/// 看门狗工作器
///
/// 独立于执行槽运行两个周期任务：
/// 过期心跳检测，以及终止任务的保留期清理。
pub struct WatchdogWorker {
    repository: Arc<dyn TaskRepository>,
    storage: Arc<dyn StorageRepository>,
    liveness: Arc<dyn LivenessProbe>,
    settings: WatchdogSettings,
    shutdown: watch::Receiver<bool>,
}

impl WatchdogWorker {
    pub fn new(
        repository: Arc<dyn TaskRepository>,
        storage: Arc<dyn StorageRepository>,
        liveness: Arc<dyn LivenessProbe>,
        settings: WatchdogSettings,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            repository,
            storage,
            liveness,
            settings,
            shutdown,
        }
    }

    /// 扫描心跳过期的任务
    ///
    /// # 参数
    ///
    /// * `now` - 当前时间，过期阈值以此为基准
    pub async fn check_stale_once(&self, now: DateTime<Utc>) -> Result<StaleReport, WorkerError> {
        let before = cutoff(now, self.settings.stale_threshold())?;
        let stale = self.repository.list_stale(before).await?;
        let mut report = StaleReport::default();

        for task in stale {
            let liveness = self.liveness.check(task.owner.as_deref());

            match (task.status, liveness) {
                (TaskStatus::Processing, Liveness::Dead) => {
                    let failed = self
                        .repository
                        .fail_orphan(task.id, task.owner.as_deref(), before, ORPHAN_MESSAGE)
                        .await?;
                    if failed {
                        remove_artifacts(self.storage.as_ref(), &task).await;
                        counter!(WATCHDOG_ORPHANS).increment(1);
                        warn!(task_id = %task.id, owner = ?task.owner, "Orphaned task marked as failed");
                        report.failed += 1;
                    }
                }
                (TaskStatus::Cancelling, Liveness::Dead) => {
                    self.collect(&task).await?;
                    report.collected += 1;
                }
                (TaskStatus::Cancelling, Liveness::Unknown) if task.owner.is_none() => {
                    // 排队时被取消、从未被领取
                    self.collect(&task).await?;
                    report.collected += 1;
                }
                (_, Liveness::Alive) => {
                    info!(
                        task_id = %task.id,
                        status = %task.status,
                        "Task heartbeat is stale but its worker is alive"
                    );
                    report.alive += 1;
                }
                (_, _) => {
                    warn!(
                        task_id = %task.id,
                        owner = ?task.owner,
                        "Cannot determine owner of stale task, leaving it alone"
                    );
                    report.unknown += 1;
                }
            }
        }

        Ok(report)
    }

    /// 删除超过保留期的终止任务及其制品
    ///
    /// # 返回值
    ///
    /// 本次删除的记录数
    pub async fn cleanup_once(&self, now: DateTime<Utc>) -> Result<u64, WorkerError> {
        let before = cutoff(now, self.settings.retention())?;
        let retirable = self
            .repository
            .list_retirable(before, &[TaskStatus::Completed, TaskStatus::Failed])
            .await?;

        let mut deleted = 0u64;
        for task in retirable {
            // 与用户删除竞争时只有赢家清理制品
            if self.repository.delete(task.id).await? {
                remove_artifacts(self.storage.as_ref(), &task).await;
                deleted += 1;
            }
        }

        if deleted > 0 {
            counter!(RETENTION_DELETED).increment(deleted);
        }
        Ok(deleted)
    }

    async fn collect(&self, task: &TaskRecord) -> Result<(), WorkerError> {
        if self.repository.delete(task.id).await? {
            remove_artifacts(self.storage.as_ref(), task).await;
            info!(task_id = %task.id, "Collected unacknowledged cancellation");
        }
        Ok(())
    }
}

fn cutoff(now: DateTime<Utc>, age: Duration) -> Result<DateTime<FixedOffset>, WorkerError> {
    let age = chrono::Duration::from_std(age)
        .map_err(|e| WorkerError::InternalError(format!("invalid watchdog duration: {}", e)))?;
    Ok((now - age).fixed_offset())
}

#[async_trait]
impl Worker for WatchdogWorker {
    async fn run(&self) -> Result<(), WorkerError> {
        info!("Watchdog worker started");
        let mut shutdown = self.shutdown.clone();

        let mut stale_tick = tokio::time::interval(self.settings.stale_check_interval());
        stale_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cleanup_tick = tokio::time::interval(self.settings.cleanup_interval());
        cleanup_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = stale_tick.tick() => {
                    match self.check_stale_once(Utc::now()).await {
                        Ok(report) if report != StaleReport::default() => {
                            info!(?report, "Stale task scan finished");
                        }
                        Ok(_) => debug!("No stale tasks"),
                        Err(e) => error!("Failed to scan for stale tasks: {}", e),
                    }
                }
                _ = cleanup_tick.tick() => {
                    match self.cleanup_once(Utc::now()).await {
                        Ok(count) => {
                            if count > 0 {
                                info!("Cleaned up {} expired tasks", count);
                            }
                        }
                        Err(e) => error!("Failed to cleanup expired tasks: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Watchdog worker stopped");
        Ok(())
    }

    fn name(&self) -> &str {
        "watchdog"
    }
}

#[cfg(test)]
#[path = "watchdog_worker_test.rs"]
mod tests;

// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::workers::conversion_worker::{ConversionDeps, ConversionWorker};
use crate::workers::worker::Worker;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{error, info, warn};

/// 工作管理器
///
/// 负责启动执行槽与看门狗，并在关闭时通知它们退出。
pub struct WorkerManager {
    shutdown: watch::Sender<bool>,
    handles: Vec<(String, JoinHandle<()>)>,
}

impl Default for WorkerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerManager {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shutdown,
            handles: Vec::new(),
        }
    }

    /// 关闭信号的接收端，传给新建的工作器
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// 启动转换执行槽
    ///
    /// # 参数
    ///
    /// * `count` - 执行槽数量
    /// * `deps` - 所有执行槽共享的依赖
    pub fn start_workers(&mut self, count: usize, deps: ConversionDeps) {
        for slot in 0..count {
            let worker = ConversionWorker::new(slot, deps.clone(), self.subscribe());
            self.spawn(Arc::new(worker));
        }
    }

    /// 在独立任务中运行工作器
    pub fn spawn(&mut self, worker: Arc<dyn Worker>) {
        let name = worker.name().to_string();
        let handle = tokio::spawn(async move {
            if let Err(e) = worker.run().await {
                error!("Worker {} exited with error: {}", worker.name(), e);
            }
        });
        self.handles.push((name, handle));
    }

    /// 正在运行的工作器数量
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// 等待关闭信号并关闭工作进程
    pub async fn wait_for_shutdown(&mut self, grace: Duration) {
        match signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(err) => error!("Unable to listen for shutdown signal: {}", err),
        }
        self.shutdown(grace).await;
    }

    /// 通知所有工作器退出
    ///
    /// 正在执行的任务在宽限期内可以走到下一个检查点之后的结束；
    /// 超时的工作器被中止，其任务由看门狗按过期规则回收。
    pub async fn shutdown(&mut self, grace: Duration) {
        info!("Shutting down workers...");
        // 没有接收端时发送失败，可以忽略
        let _ = self.shutdown.send(true);

        let deadline = Instant::now() + grace;
        for (name, mut handle) in self.handles.drain(..) {
            match timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Worker {} panicked or was cancelled: {}", name, e),
                Err(_) => {
                    warn!("Worker {} did not stop within the grace period, aborting", name);
                    handle.abort();
                }
            }
        }

        info!("Workers shut down successfully");
    }
}

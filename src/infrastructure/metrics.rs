// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use metrics::{describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::time::Duration;
use sysinfo::{MemoryRefreshKind, RefreshKind, System};
use tracing::{info, warn};

pub const TASKS_CLAIMED: &str = "rasterflow_tasks_claimed_total";
pub const TASKS_COMPLETED: &str = "rasterflow_tasks_completed_total";
pub const TASKS_FAILED: &str = "rasterflow_tasks_failed_total";
pub const TASKS_CANCELLED: &str = "rasterflow_tasks_cancelled_total";
pub const TILES_RENDERED: &str = "rasterflow_tiles_rendered_total";
pub const WATCHDOG_ORPHANS: &str = "rasterflow_watchdog_orphans_total";
pub const RETENTION_DELETED: &str = "rasterflow_retention_deleted_total";
pub const MEMORY_USAGE: &str = "rasterflow_memory_usage_ratio";

static SYSTEM: Lazy<Mutex<System>> = Lazy::new(|| {
    Mutex::new(System::new_with_specifics(
        RefreshKind::nothing().with_memory(MemoryRefreshKind::everything()),
    ))
});

/// 初始化指标系统
///
/// 安装 Prometheus 导出器并注册转换相关的计数器。
/// 地址被占用时只记录警告，服务仍然可以运行。
///
/// # 参数
///
/// * `addr` - 导出器监听地址
pub fn init_metrics(addr: SocketAddr) {
    let builder = PrometheusBuilder::new();

    if let Err(e) = builder.with_http_listener(addr).install() {
        warn!(
            "Failed to install Prometheus recorder: {}. This might happen if the port is already in use.",
            e
        );
        return;
    }

    describe_counter!(TASKS_CLAIMED, "Tasks claimed by an execution slot");
    describe_counter!(TASKS_COMPLETED, "Tasks that reached completed");
    describe_counter!(TASKS_FAILED, "Tasks that reached failed");
    describe_counter!(TASKS_CANCELLED, "Tasks removed after a cancellation");
    describe_counter!(TILES_RENDERED, "Tiles rendered across all tasks");
    describe_counter!(WATCHDOG_ORPHANS, "Orphaned tasks failed by the watchdog");
    describe_counter!(RETENTION_DELETED, "Terminal tasks removed by retention cleanup");
    describe_gauge!(MEMORY_USAGE, "Current memory usage ratio (0.0 to 1.0)");

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        loop {
            interval.tick().await;
            update_memory_gauge();
        }
    });

    info!("Metrics exporter listening on {}", addr);
}

fn update_memory_gauge() {
    let mut sys = SYSTEM.lock();
    sys.refresh_memory();

    let total = sys.total_memory();
    if total > 0 {
        let ratio = sys.used_memory() as f64 / total as f64;
        gauge!(MEMORY_USAGE).set(ratio);
        if ratio > 0.9 {
            warn!("ALARM: System memory usage is high: {:.2}%", ratio * 100.0);
        }
    }
}

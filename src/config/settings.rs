// Copyright 2025 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// 默认瓦片边长（设备像素）
pub const DEFAULT_TILE_EDGE: u32 = 9600;
/// 瓦片边长下限（设备像素）
pub const MIN_TILE_EDGE: u32 = 256;

/// 应用程序配置设置
///
/// 包含服务器、数据库、存储、执行槽、看门狗与渲染等所有配置项
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// 服务器配置
    pub server: ServerSettings,
    /// 数据库配置
    pub database: DatabaseSettings,
    /// 存储配置
    pub storage: StorageSettings,
    /// 执行槽配置
    pub worker: WorkerSettings,
    /// 看门狗配置
    pub watchdog: WatchdogSettings,
    /// 渲染配置
    pub rendering: RenderingSettings,
    /// 提交参数配置
    pub submission: SubmissionSettings,
    /// 指标配置
    pub metrics: MetricsSettings,
}

/// 服务器配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// 服务器监听主机地址
    pub host: String,
    /// 服务器监听端口
    pub port: u16,
    /// 上传文件大小上限（字节）
    pub max_upload_bytes: usize,
}

/// 数据库配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// 数据库连接URL
    pub url: String,
    /// 最大连接数
    pub max_connections: Option<u32>,
    /// 最小连接数
    pub min_connections: Option<u32>,
    /// 连接超时时间（秒）
    pub connect_timeout: Option<u64>,
    /// 空闲连接超时时间（秒）
    pub idle_timeout: Option<u64>,
}

/// 存储配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    /// 本地制品根目录
    pub local_path: String,
}

/// 执行槽配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSettings {
    /// 执行槽数量
    pub slots: usize,
    /// 队列为空时的轮询间隔（毫秒）
    pub poll_interval_ms: u64,
    /// 瓦片最大边长（设备像素）
    pub tile_max_edge: u32,
    /// 瓦片边长下限（设备像素）
    pub tile_min_edge: u32,
}

impl WorkerSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// 实际使用的瓦片边长：不低于下限
    pub fn tile_edge(&self) -> u32 {
        self.tile_max_edge.max(self.tile_min_edge.max(1))
    }
}

/// 看门狗配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct WatchdogSettings {
    /// 心跳超过该时长视为过期（秒）
    pub stale_threshold_secs: u64,
    /// 过期检测间隔（秒）
    pub stale_check_interval_secs: u64,
    /// 保留期清理间隔（秒）
    pub cleanup_interval_secs: u64,
    /// 终止任务保留时长（小时）
    pub retention_hours: u64,
}

impl WatchdogSettings {
    pub fn stale_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_threshold_secs)
    }

    pub fn stale_check_interval(&self) -> Duration {
        Duration::from_secs(self.stale_check_interval_secs.max(1))
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours * 3600)
    }
}

/// 渲染后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderBackend {
    /// poppler-utils 命令行工具
    Poppler,
    /// JSON 页面清单，用于测试与演示
    Synthetic,
}

/// 渲染配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct RenderingSettings {
    /// 渲染后端
    pub backend: RenderBackend,
    /// pdfinfo 可执行文件
    pub pdfinfo_bin: String,
    /// pdftoppm 可执行文件
    pub pdftoppm_bin: String,
    /// OCR 可执行文件
    pub ocr_bin: String,
    /// OCR 默认语言
    pub ocr_language: String,
}

/// 提交参数配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionSettings {
    /// 最低分辨率
    pub min_dpi: u32,
    /// 最高分辨率
    pub max_dpi: u32,
    /// 默认分辨率
    pub default_dpi: u32,
    /// 默认 JPEG 质量
    pub default_quality: u8,
}

/// 指标配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsSettings {
    /// 是否启用 Prometheus 导出器
    pub enabled: bool,
    /// 导出器监听地址
    pub addr: String,
}

impl Settings {
    /// 创建新的配置实例
    ///
    /// 依次叠加默认值、`config/default.toml`、`config/{APP_ENVIRONMENT}.toml`
    /// 与 `RASTERFLOW__` 前缀的环境变量
    ///
    /// # Returns
    ///
    /// * `Ok(Settings)` - 成功加载的配置
    /// * `Err(ConfigError)` - 配置加载失败
    pub fn new() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| "default".to_string());
        let builder = Self::defaults()?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(Environment::with_prefix("RASTERFLOW").separator("__"));

        builder.build()?.try_deserialize()
    }

    /// 仅包含内置默认值的配置构建器
    pub fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1) as u64;

        Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 7001)?
            .set_default("server.max_upload_bytes", 100 * 1024 * 1024)?
            .set_default("database.url", "sqlite://tasks.db?mode=rwc")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 1)?
            .set_default("database.connect_timeout", 10)?
            .set_default("database.idle_timeout", 300)?
            .set_default("storage.local_path", "./storage")?
            .set_default("worker.slots", cpus)?
            .set_default("worker.poll_interval_ms", 1000)?
            .set_default("worker.tile_max_edge", DEFAULT_TILE_EDGE)?
            .set_default("worker.tile_min_edge", MIN_TILE_EDGE)?
            .set_default("watchdog.stale_threshold_secs", 300)?
            .set_default("watchdog.stale_check_interval_secs", 60)?
            .set_default("watchdog.cleanup_interval_secs", 3600)?
            .set_default("watchdog.retention_hours", 72)?
            .set_default("rendering.backend", "poppler")?
            .set_default("rendering.pdfinfo_bin", "pdfinfo")?
            .set_default("rendering.pdftoppm_bin", "pdftoppm")?
            .set_default("rendering.ocr_bin", "tesseract")?
            .set_default("rendering.ocr_language", "eng")?
            .set_default("submission.min_dpi", 10)?
            .set_default("submission.max_dpi", 600)?
            .set_default("submission.default_dpi", 72)?
            .set_default("submission.default_quality", 85)?
            .set_default("metrics.enabled", true)?
            .set_default("metrics.addr", "0.0.0.0:9000")
    }
}

// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, FixedOffset, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;
use validator::Validate;

/// OCR 语言代码：一个或多个以 `+` 连接的语言名
static OCR_LANGUAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_]+(\+[A-Za-z_]+)*$").expect("Failed to compile ocr language regex")
});

/// 任务记录
///
/// 每个转换作业对应一行记录，是任务状态的唯一可信来源。
/// 除 `config` 外的字段都由任务存储按行原子地修改。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// 任务唯一标识符，创建后不可变
    pub id: Uuid,
    /// 任务状态
    pub status: TaskStatus,
    /// 最近一次的人类可读状态描述，不参与控制流
    pub message: String,
    /// 进度百分比（0-100），单调不减
    pub progress: i32,
    /// 输入制品的存储键
    pub input_ref: String,
    /// 输出制品的存储键
    pub output_ref: Option<String>,
    /// 创建时捕获的配置快照，之后不再修改
    pub config: TaskConfig,
    /// 输入字节数
    pub size_in: Option<i64>,
    /// 输出字节数，完成后才可知
    pub size_out: Option<i64>,
    /// 用户上传时的原始文件名
    pub original_filename: Option<String>,
    /// 创建时间
    pub created_at: DateTime<FixedOffset>,
    /// 每次修改都会刷新的更新时间
    pub updated_at: DateTime<FixedOffset>,
    /// 活跃工作器写入的心跳时间
    pub heartbeat_at: Option<DateTime<FixedOffset>>,
    /// 外部取消请求标志，只能由 false 变为 true
    pub cancel_requested: bool,
    /// 当前持有任务的执行槽标识
    pub owner: Option<String>,
}

/// 任务状态枚举
///
/// 状态转换遵循以下流程：
/// Queued → Processing → Completed/Failed
/// Processing → Cancelling → （删除）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// 已入队，尚未被执行槽领取
    #[default]
    Queued,
    /// 处理中，由某个执行槽持有
    Processing,
    /// 已请求取消，等待持有者在检查点上确认
    Cancelling,
    /// 已完成
    Completed,
    /// 已失败
    Failed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Queued,
        TaskStatus::Processing,
        TaskStatus::Cancelling,
        TaskStatus::Completed,
        TaskStatus::Failed,
    ];

    /// 终止状态：之后只允许被删除
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// 可以转换到 `target` 的全部状态，任务存储以此构造条件更新的守卫
    pub fn sources(target: TaskStatus) -> Vec<TaskStatus> {
        Self::ALL
            .into_iter()
            .filter(|status| status.can_transition_to(target))
            .collect()
    }

    /// 状态机允许的转换
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Queued, Processing)
                | (Queued, Cancelling)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cancelling)
                // 取消请求到达时持有者可能已经开始收尾
                | (Cancelling, Completed)
                | (Cancelling, Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TaskStatus::Queued => write!(f, "queued"),
            TaskStatus::Processing => write!(f, "processing"),
            TaskStatus::Cancelling => write!(f, "cancelling"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(TaskStatus::Queued),
            "processing" => Ok(TaskStatus::Processing),
            "cancelling" => Ok(TaskStatus::Cancelling),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(DomainError::UnknownStatus(other.to_string())),
        }
    }
}

/// 输出类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    /// 逐页重新编码的 PDF 文档
    #[default]
    Pdf,
    /// 所有页面纵向拼接的 PNG 长图
    Png,
    /// 所有页面纵向拼接的 JPEG 长图
    Jpeg,
}

impl OutputKind {
    /// 输出文件扩展名
    pub fn extension(&self) -> &'static str {
        match self {
            OutputKind::Pdf => "pdf",
            OutputKind::Png => "png",
            OutputKind::Jpeg => "jpg",
        }
    }

    /// 下载时使用的 MIME 类型
    pub fn content_type(&self) -> &'static str {
        match self {
            OutputKind::Pdf => "application/pdf",
            OutputKind::Png => "image/png",
            OutputKind::Jpeg => "image/jpeg",
        }
    }

    /// 文档模式（逐页输出）还是合成图模式
    pub fn is_document(&self) -> bool {
        matches!(self, OutputKind::Pdf)
    }
}

impl FromStr for OutputKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pdf" => Ok(OutputKind::Pdf),
            "png" => Ok(OutputKind::Png),
            "jpeg" | "jpg" => Ok(OutputKind::Jpeg),
            other => Err(DomainError::ValidationError(format!(
                "unsupported output kind: {}",
                other
            ))),
        }
    }
}

/// PDF 输出中瓦片图像的编码方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TileEncoding {
    /// 有损 JPEG（DCTDecode）
    #[default]
    Jpeg,
    /// 无损 deflate（FlateDecode）
    Flate,
}

impl FromStr for TileEncoding {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(TileEncoding::Jpeg),
            "flate" | "deflate" => Ok(TileEncoding::Flate),
            other => Err(DomainError::ValidationError(format!(
                "unsupported tile encoding: {}",
                other
            ))),
        }
    }
}

/// 任务配置快照
///
/// 在提交时校验并写入记录，之后不可变。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct TaskConfig {
    /// 渲染分辨率（DPI），范围由提交配置决定
    pub dpi: u32,
    /// 输出类型
    pub output: OutputKind,
    /// JPEG 质量（1-100）
    #[validate(range(min = 1, max = 100))]
    pub quality: u8,
    /// PDF 输出中瓦片的编码方式
    #[serde(default)]
    pub tile_encoding: TileEncoding,
    /// 是否为每页生成 OCR 文本层
    #[serde(default)]
    pub ocr: bool,
    /// OCR 语言代码，例如 `eng` 或 `eng+deu`
    #[validate(length(min = 1, max = 32), regex(path = *OCR_LANGUAGE))]
    #[serde(default = "default_ocr_language")]
    pub ocr_language: String,
}

fn default_ocr_language() -> String {
    "eng".to_string()
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            dpi: 72,
            output: OutputKind::Pdf,
            quality: 85,
            tile_encoding: TileEncoding::Jpeg,
            ocr: false,
            ocr_language: default_ocr_language(),
        }
    }
}

/// 领域错误类型
#[derive(Error, Debug)]
pub enum DomainError {
    /// 未知的状态字符串
    #[error("Unknown task status: {0}")]
    UnknownStatus(String),

    /// 验证错误
    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// 把用户提供的文件名规整为安全的单段文件名
///
/// 路径分隔符与空白折叠为 `_`，只保留 ASCII 字母数字和 `._-`，
/// 去掉首尾的 `.` 与 `_`。结果为空时返回 `None`。
pub fn secure_filename(name: &str) -> Option<String> {
    let joined = name
        .replace(['/', '\\'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_");

    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();

    let trimmed = kept.trim_matches(|c| c == '.' || c == '_');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl TaskRecord {
    /// 创建一个新的排队任务
    ///
    /// # 参数
    ///
    /// * `config` - 已校验的配置快照
    /// * `input_ref` - 输入制品键
    /// * `output_ref` - 预留的输出制品键
    /// * `size_in` - 输入字节数
    /// * `original_filename` - 原始文件名
    pub fn new(
        config: TaskConfig,
        input_ref: String,
        output_ref: String,
        size_in: Option<i64>,
        original_filename: Option<String>,
    ) -> Self {
        let now: DateTime<FixedOffset> = Utc::now().into();
        Self {
            id: Uuid::new_v4(),
            status: TaskStatus::Queued,
            message: "File received. Your document is now in the processing queue.".to_string(),
            progress: 0,
            input_ref,
            output_ref: Some(output_ref),
            config,
            size_in,
            size_out: None,
            original_filename,
            created_at: now,
            updated_at: now,
            heartbeat_at: None,
            cancel_requested: false,
            owner: None,
        }
    }

    /// 面向用户的下载文件名
    pub fn download_name(&self) -> String {
        let original = self
            .original_filename
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or("document.pdf");

        if self.config.output.is_document() {
            format!("Compressed_{}", original)
        } else {
            let stem = original
                .rsplit_once('.')
                .map(|(stem, _)| stem)
                .filter(|stem| !stem.is_empty())
                .unwrap_or(original);
            format!("{}.{}", stem, self.config.output.extension())
        }
    }
}

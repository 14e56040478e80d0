// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::task::{OutputKind, TaskRecord, TaskStatus, TileEncoding};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 提交任务的查询参数
///
/// 文档本身作为请求体上传，缺省的参数使用配置中的默认值。
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct SubmitRequestDto {
    /// 原始文件名
    pub filename: Option<String>,
    pub dpi: Option<u32>,
    pub output: Option<OutputKind>,
    pub quality: Option<u8>,
    pub tile_encoding: Option<TileEncoding>,
    pub ocr: Option<bool>,
    pub ocr_language: Option<String>,
}

/// 提交任务响应DTO
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponseDto {
    pub task_id: Uuid,
    pub status: TaskStatus,
}

/// 任务状态响应DTO
#[derive(Debug, Serialize, Deserialize)]
pub struct TaskViewDto {
    pub id: Uuid,
    pub status: TaskStatus,
    pub message: String,
    pub progress: i32,
    pub output: OutputKind,
    pub dpi: u32,
    pub size_in: Option<i64>,
    pub size_out: Option<i64>,
    pub original_filename: Option<String>,
    pub cancel_requested: bool,
    pub created_at: DateTime<FixedOffset>,
    pub updated_at: DateTime<FixedOffset>,
    pub heartbeat_at: Option<DateTime<FixedOffset>>,
}

impl From<TaskRecord> for TaskViewDto {
    fn from(task: TaskRecord) -> Self {
        Self {
            id: task.id,
            status: task.status,
            message: task.message,
            progress: task.progress,
            output: task.config.output,
            dpi: task.config.dpi,
            size_in: task.size_in,
            size_out: task.size_out,
            original_filename: task.original_filename,
            cancel_requested: task.cancel_requested,
            created_at: task.created_at,
            updated_at: task.updated_at,
            heartbeat_at: task.heartbeat_at,
        }
    }
}

/// 取消与删除请求的响应DTO
#[derive(Debug, Serialize, Deserialize)]
pub struct TaskActionResponseDto {
    pub task_id: Uuid,
    /// accepted / already_terminal / deleted / cancel_initiated
    pub result: String,
}

// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::application::dto::task_request::{
    SubmitRequestDto, SubmitResponseDto, TaskActionResponseDto, TaskViewDto,
};
use crate::application::usecases::task_service::{CancelOutcome, DeleteOutcome, TaskService};
use crate::presentation::errors::AppError;
use axum::{
    body::{Body, Bytes},
    extract::{Extension, Path, Query},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::io::ErrorKind;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

fn not_found(id: Uuid) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("task {} not found", id) })),
    )
        .into_response()
}

fn action(status: StatusCode, task_id: Uuid, result: &str) -> Response {
    (
        status,
        Json(TaskActionResponseDto {
            task_id,
            result: result.to_string(),
        }),
    )
        .into_response()
}

/// 提交转换任务
///
/// 原始文档作为请求体，转换参数来自查询字符串。
pub async fn submit_task(
    Extension(service): Extension<Arc<TaskService>>,
    Query(request): Query<SubmitRequestDto>,
    body: Bytes,
) -> Result<Response, AppError> {
    let task = service.submit(&body, request).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponseDto {
            task_id: task.id,
            status: task.status,
        }),
    )
        .into_response())
}

/// 查询任务状态
pub async fn get_task(
    Extension(service): Extension<Arc<TaskService>>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    Ok(match service.get_status(id).await? {
        Some(task) => Json(TaskViewDto::from(task)).into_response(),
        None => not_found(id),
    })
}

/// 下载已完成任务的输出
pub async fn download_task(
    Extension(service): Extension<Arc<TaskService>>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let Some(download) = service.download(id).await? else {
        return Ok(not_found(id));
    };

    // 制品可能在查询后被删除
    let file = match tokio::fs::File::open(&download.path).await {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(not_found(id)),
        Err(e) => return Err(e.into()),
    };

    // 文件名在提交时已规整为安全字符
    let disposition = format!("attachment; filename=\"{}\"", download.filename);
    Ok((
        [
            (header::CONTENT_TYPE, download.content_type.to_string()),
            (header::CONTENT_LENGTH, download.size.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

/// 请求取消任务
pub async fn cancel_task(
    Extension(service): Extension<Arc<TaskService>>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    Ok(match service.request_cancel(id).await? {
        CancelOutcome::Accepted => action(StatusCode::ACCEPTED, id, "accepted"),
        CancelOutcome::AlreadyTerminal => action(StatusCode::CONFLICT, id, "already_terminal"),
        CancelOutcome::NotFound => not_found(id),
    })
}

/// 删除任务
pub async fn delete_task(
    Extension(service): Extension<Arc<TaskService>>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    Ok(match service.delete(id).await? {
        DeleteOutcome::Deleted => action(StatusCode::OK, id, "deleted"),
        DeleteOutcome::CancelInitiated => action(StatusCode::ACCEPTED, id, "cancel_initiated"),
        DeleteOutcome::NotFound => not_found(id),
    })
}

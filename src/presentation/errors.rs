// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::application::usecases::task_service::{SubmitError, TaskServiceError};
use crate::domain::repositories::task_repository::RepositoryError;

/// 应用错误类型
///
/// 封装所有可能的应用层错误，提供统一的错误处理接口
#[derive(Debug)]
pub struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let error_message = self.0.to_string();

        let (status, details) = match self.0.downcast_ref::<TaskServiceError>() {
            Some(TaskServiceError::Invalid(SubmitError::Validation(errors))) => (
                StatusCode::BAD_REQUEST,
                serde_json::to_value(errors).ok(),
            ),
            Some(TaskServiceError::Invalid(_)) => (StatusCode::BAD_REQUEST, None),
            Some(TaskServiceError::Repository(RepositoryError::NotFound)) => {
                (StatusCode::NOT_FOUND, None)
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, None),
        };

        if status.is_server_error() {
            error!("Request failed: {:#}", self.0);
        }

        let body = match details {
            Some(details) => json!({ "error": error_message, "details": details }),
            None => json!({ "error": error_message }),
        };
        (status, Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

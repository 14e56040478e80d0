// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::repositories::storage_repository::StorageError;
use crate::domain::repositories::task_repository::RepositoryError;
use thiserror::Error;

/// 面向用户的失败消息最大字符数
pub const USER_MESSAGE_LIMIT: usize = 100;

/// Worker错误类型
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("仓库错误: {0}")]
    RepositoryError(#[from] RepositoryError),

    #[error("存储错误: {0}")]
    StorageError(#[from] StorageError),

    #[error("内部错误: {0}")]
    InternalError(String),
}

/// 截断面向用户的消息，超出部分以 `...` 结尾
///
/// 完整诊断只写入日志。
pub fn truncate_for_user(message: &str) -> String {
    if message.chars().count() <= USER_MESSAGE_LIMIT {
        return message.to_string();
    }
    let mut truncated: String = message.chars().take(USER_MESSAGE_LIMIT).collect();
    truncated.push_str("...");
    truncated
}

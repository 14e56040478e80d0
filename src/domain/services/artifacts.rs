// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::task::TaskRecord;
use crate::domain::repositories::storage_repository::StorageRepository;
use tracing::warn;

/// 删除任务的输入与输出制品
///
/// 幂等且尽力而为：单个制品删除失败只记录警告。
///
/// # 返回值
///
/// 实际删除的制品数量
pub async fn remove_artifacts(storage: &dyn StorageRepository, task: &TaskRecord) -> usize {
    let mut removed = remove_input(storage, task).await;
    removed += remove_output(storage, task).await;
    removed
}

/// 删除输入制品
pub async fn remove_input(storage: &dyn StorageRepository, task: &TaskRecord) -> usize {
    remove_key(storage, task, &task.input_ref).await
}

/// 删除输出制品（可能是未完成的部分输出）
pub async fn remove_output(storage: &dyn StorageRepository, task: &TaskRecord) -> usize {
    match task.output_ref.as_deref() {
        Some(key) => remove_key(storage, task, key).await,
        None => 0,
    }
}

async fn remove_key(storage: &dyn StorageRepository, task: &TaskRecord, key: &str) -> usize {
    match storage.delete(key).await {
        Ok(true) => 1,
        Ok(false) => 0,
        Err(e) => {
            warn!(task_id = %task.id, "Failed to remove artifact {}: {}", key, e);
            0
        }
    }
}

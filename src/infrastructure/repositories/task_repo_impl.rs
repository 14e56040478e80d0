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

use crate::domain::models::task::{TaskConfig, TaskRecord, TaskStatus};
use crate::domain::repositories::task_repository::{
    CheckpointOutcome, RepositoryError, TaskOutcome, TaskPatch, TaskRepository,
};
use crate::infrastructure::database::entities::task as task_entity;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::{
    sea_query::{Expr, SimpleExpr},
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use std::sync::Arc;
use uuid::Uuid;

/// `claim_next` 在竞争失败后重新挑选候选任务的次数
const CLAIM_ATTEMPTS: usize = 5;

/// 任务仓库实现
///
/// 基于SeaORM实现的任务数据访问层。每个状态转换都是一条
/// 带守卫条件的 UPDATE/DELETE，通过 `rows_affected` 判断胜负。
#[derive(Clone)]
pub struct TaskRepositoryImpl {
    /// 数据库连接
    db: Arc<DatabaseConnection>,
}

impl TaskRepositoryImpl {
    /// 创建新的任务仓库实例
    ///
    /// # 参数
    ///
    /// * `db` - 数据库连接
    ///
    /// # 返回值
    ///
    /// 返回新的任务仓库实例
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

fn now() -> DateTime<FixedOffset> {
    Utc::now().into()
}

impl TryFrom<task_entity::Model> for TaskRecord {
    type Error = RepositoryError;

    fn try_from(model: task_entity::Model) -> Result<Self, Self::Error> {
        let status: TaskStatus = model.status.parse().map_err(|e| RepositoryError::Corrupt {
            id: model.id,
            reason: format!("{}", e),
        })?;
        let config: TaskConfig =
            serde_json::from_value(model.config).map_err(|e| RepositoryError::Corrupt {
                id: model.id,
                reason: format!("config: {}", e),
            })?;

        Ok(Self {
            id: model.id,
            status,
            message: model.message,
            progress: model.progress,
            input_ref: model.input_ref,
            output_ref: model.output_ref,
            config,
            size_in: model.size_in,
            size_out: model.size_out,
            original_filename: model.original_filename,
            created_at: model.created_at,
            updated_at: model.updated_at,
            heartbeat_at: model.heartbeat_at,
            cancel_requested: model.cancel_requested,
            owner: model.owner,
        })
    }
}

impl TryFrom<&TaskRecord> for task_entity::ActiveModel {
    type Error = RepositoryError;

    fn try_from(task: &TaskRecord) -> Result<Self, Self::Error> {
        let config = serde_json::to_value(&task.config).map_err(|e| RepositoryError::Corrupt {
            id: task.id,
            reason: format!("config: {}", e),
        })?;

        Ok(Self {
            id: Set(task.id),
            status: Set(task.status.to_string()),
            message: Set(task.message.clone()),
            progress: Set(task.progress),
            input_ref: Set(task.input_ref.clone()),
            output_ref: Set(task.output_ref.clone()),
            config: Set(config),
            size_in: Set(task.size_in),
            size_out: Set(task.size_out),
            original_filename: Set(task.original_filename.clone()),
            created_at: Set(task.created_at),
            updated_at: Set(task.updated_at),
            heartbeat_at: Set(task.heartbeat_at),
            cancel_requested: Set(task.cancel_requested),
            owner: Set(task.owner.clone()),
        })
    }
}

/// 状态守卫：只匹配状态机允许转换到 `target` 的行
fn may_become(target: TaskStatus) -> SimpleExpr {
    task_entity::Column::Status.is_in(
        TaskStatus::sources(target)
            .into_iter()
            .map(|status| status.to_string()),
    )
}

fn into_records(models: Vec<task_entity::Model>) -> Result<Vec<TaskRecord>, RepositoryError> {
    models.into_iter().map(TaskRecord::try_from).collect()
}

#[async_trait]
impl TaskRepository for TaskRepositoryImpl {
    async fn create(&self, task: &TaskRecord) -> Result<TaskRecord, RepositoryError> {
        let model = task_entity::ActiveModel::try_from(task)?;

        let inserted = model.insert(self.db.as_ref()).await?;
        TaskRecord::try_from(inserted)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<TaskRecord>, RepositoryError> {
        let model = task_entity::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?;

        model.map(TaskRecord::try_from).transpose()
    }

    async fn update(&self, id: Uuid, patch: TaskPatch) -> Result<bool, RepositoryError> {
        let mut query = task_entity::Entity::update_many()
            .col_expr(task_entity::Column::UpdatedAt, Expr::value(now()));

        if let Some(status) = patch.status {
            query = query.col_expr(task_entity::Column::Status, Expr::value(status.to_string()));
        }
        if let Some(message) = patch.message {
            query = query.col_expr(task_entity::Column::Message, Expr::value(message));
        }
        if let Some(progress) = patch.progress {
            query = query.col_expr(task_entity::Column::Progress, Expr::value(progress));
        }
        if let Some(output_ref) = patch.output_ref {
            query = query.col_expr(task_entity::Column::OutputRef, Expr::value(output_ref));
        }
        if let Some(size_out) = patch.size_out {
            query = query.col_expr(task_entity::Column::SizeOut, Expr::value(size_out));
        }
        if let Some(heartbeat_at) = patch.heartbeat_at {
            query = query.col_expr(
                task_entity::Column::HeartbeatAt,
                Expr::value(Some(heartbeat_at)),
            );
        }
        if let Some(owner) = patch.owner {
            query = query.col_expr(task_entity::Column::Owner, Expr::value(owner));
        }

        let result = query
            .filter(task_entity::Column::Id.eq(id))
            .exec(self.db.as_ref())
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn claim(&self, id: Uuid, owner: &str) -> Result<bool, RepositoryError> {
        let now = now();
        let result = task_entity::Entity::update_many()
            .col_expr(
                task_entity::Column::Status,
                Expr::value(TaskStatus::Processing.to_string()),
            )
            .col_expr(
                task_entity::Column::Owner,
                Expr::value(Some(owner.to_string())),
            )
            .col_expr(task_entity::Column::HeartbeatAt, Expr::value(Some(now)))
            .col_expr(task_entity::Column::UpdatedAt, Expr::value(now))
            .filter(task_entity::Column::Id.eq(id))
            .filter(may_become(TaskStatus::Processing))
            .filter(task_entity::Column::CancelRequested.eq(false))
            .exec(self.db.as_ref())
            .await?;

        Ok(result.rows_affected == 1)
    }

    async fn claim_next(&self, owner: &str) -> Result<Option<TaskRecord>, RepositoryError> {
        for _ in 0..CLAIM_ATTEMPTS {
            let candidate = task_entity::Entity::find()
                .filter(task_entity::Column::Status.eq(TaskStatus::Queued.to_string()))
                .filter(task_entity::Column::CancelRequested.eq(false))
                .order_by_asc(task_entity::Column::CreatedAt)
                .one(self.db.as_ref())
                .await?;

            let Some(candidate) = candidate else {
                return Ok(None);
            };

            if self.claim(candidate.id, owner).await? {
                return self.find_by_id(candidate.id).await;
            }
            // 另一个执行槽抢先领取，或任务刚被取消
        }

        Ok(None)
    }

    async fn checkpoint(
        &self,
        id: Uuid,
        owner: &str,
        progress: i32,
        message: &str,
    ) -> Result<CheckpointOutcome, RepositoryError> {
        let now = now();
        let result = task_entity::Entity::update_many()
            .col_expr(task_entity::Column::HeartbeatAt, Expr::value(Some(now)))
            .col_expr(task_entity::Column::UpdatedAt, Expr::value(now))
            .col_expr(
                task_entity::Column::Progress,
                Expr::value(progress.clamp(0, 100)),
            )
            .col_expr(task_entity::Column::Message, Expr::value(message))
            .filter(task_entity::Column::Id.eq(id))
            .filter(task_entity::Column::Owner.eq(owner))
            .filter(task_entity::Column::Status.eq(TaskStatus::Processing.to_string()))
            .filter(task_entity::Column::CancelRequested.eq(false))
            .exec(self.db.as_ref())
            .await?;

        if result.rows_affected == 1 {
            return Ok(CheckpointOutcome::Continue);
        }

        // 守卫未命中：区分取消请求与失去所有权
        let outcome = match self.find_by_id(id).await? {
            Some(task) if task.owner.as_deref() == Some(owner) && task.cancel_requested => {
                CheckpointOutcome::CancelRequested
            }
            _ => CheckpointOutcome::Lost,
        };

        Ok(outcome)
    }

    async fn finish(
        &self,
        id: Uuid,
        owner: &str,
        outcome: TaskOutcome,
    ) -> Result<bool, RepositoryError> {
        let now = now();
        let target = match outcome {
            TaskOutcome::Completed { .. } => TaskStatus::Completed,
            TaskOutcome::Failed { .. } => TaskStatus::Failed,
        };
        let mut query = task_entity::Entity::update_many()
            .col_expr(task_entity::Column::UpdatedAt, Expr::value(now))
            .col_expr(task_entity::Column::HeartbeatAt, Expr::value(Some(now)))
            .col_expr(task_entity::Column::Owner, Expr::value(Option::<String>::None));

        query = match outcome {
            TaskOutcome::Completed { size_out, message } => query
                .col_expr(
                    task_entity::Column::Status,
                    Expr::value(TaskStatus::Completed.to_string()),
                )
                .col_expr(task_entity::Column::Progress, Expr::value(100))
                .col_expr(task_entity::Column::SizeOut, Expr::value(Some(size_out)))
                .col_expr(task_entity::Column::Message, Expr::value(message)),
            TaskOutcome::Failed { message } => query
                .col_expr(
                    task_entity::Column::Status,
                    Expr::value(TaskStatus::Failed.to_string()),
                )
                .col_expr(
                    task_entity::Column::OutputRef,
                    Expr::value(Option::<String>::None),
                )
                .col_expr(task_entity::Column::Message, Expr::value(message)),
        };

        let result = query
            .filter(task_entity::Column::Id.eq(id))
            .filter(task_entity::Column::Owner.eq(owner))
            .filter(may_become(target))
            .exec(self.db.as_ref())
            .await?;

        Ok(result.rows_affected == 1)
    }

    async fn request_cancel(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let result = task_entity::Entity::update_many()
            .col_expr(
                task_entity::Column::Status,
                Expr::value(TaskStatus::Cancelling.to_string()),
            )
            .col_expr(task_entity::Column::CancelRequested, Expr::value(true))
            .col_expr(
                task_entity::Column::Message,
                Expr::value("Cancellation requested. Stopping the conversion..."),
            )
            .col_expr(task_entity::Column::UpdatedAt, Expr::value(now()))
            .filter(task_entity::Column::Id.eq(id))
            .filter(may_become(TaskStatus::Cancelling))
            .exec(self.db.as_ref())
            .await?;

        Ok(result.rows_affected == 1)
    }

    async fn delete_if_queued(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let result = task_entity::Entity::delete_many()
            .filter(task_entity::Column::Id.eq(id))
            .filter(task_entity::Column::Status.eq(TaskStatus::Queued.to_string()))
            .exec(self.db.as_ref())
            .await?;

        Ok(result.rows_affected == 1)
    }

    async fn delete_owned(&self, id: Uuid, owner: &str) -> Result<bool, RepositoryError> {
        let result = task_entity::Entity::delete_many()
            .filter(task_entity::Column::Id.eq(id))
            .filter(task_entity::Column::Owner.eq(owner))
            .exec(self.db.as_ref())
            .await?;

        Ok(result.rows_affected == 1)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let result = task_entity::Entity::delete_by_id(id)
            .exec(self.db.as_ref())
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn list_stale(
        &self,
        heartbeat_before: DateTime<FixedOffset>,
    ) -> Result<Vec<TaskRecord>, RepositoryError> {
        let models = task_entity::Entity::find()
            .filter(task_entity::Column::Status.is_in([
                TaskStatus::Processing.to_string(),
                TaskStatus::Cancelling.to_string(),
            ]))
            .filter(
                Condition::any()
                    .add(task_entity::Column::HeartbeatAt.lt(heartbeat_before))
                    .add(
                        // 从未写过心跳的记录以更新时间计
                        Condition::all()
                            .add(task_entity::Column::HeartbeatAt.is_null())
                            .add(task_entity::Column::UpdatedAt.lt(heartbeat_before)),
                    ),
            )
            .order_by_asc(task_entity::Column::HeartbeatAt)
            .all(self.db.as_ref())
            .await?;

        into_records(models)
    }

    async fn fail_orphan(
        &self,
        id: Uuid,
        owner: Option<&str>,
        heartbeat_before: DateTime<FixedOffset>,
        message: &str,
    ) -> Result<bool, RepositoryError> {
        let owner_guard = match owner {
            Some(owner) => task_entity::Column::Owner.eq(owner),
            None => task_entity::Column::Owner.is_null(),
        };

        let result = task_entity::Entity::update_many()
            .col_expr(
                task_entity::Column::Status,
                Expr::value(TaskStatus::Failed.to_string()),
            )
            .col_expr(task_entity::Column::Message, Expr::value(message))
            .col_expr(task_entity::Column::Owner, Expr::value(Option::<String>::None))
            .col_expr(
                task_entity::Column::OutputRef,
                Expr::value(Option::<String>::None),
            )
            .col_expr(task_entity::Column::UpdatedAt, Expr::value(now()))
            .filter(task_entity::Column::Id.eq(id))
            .filter(task_entity::Column::Status.eq(TaskStatus::Processing.to_string()))
            .filter(owner_guard)
            .filter(task_entity::Column::HeartbeatAt.lt(heartbeat_before))
            .exec(self.db.as_ref())
            .await?;

        Ok(result.rows_affected == 1)
    }

    async fn list_retirable(
        &self,
        updated_before: DateTime<FixedOffset>,
        statuses: &[TaskStatus],
    ) -> Result<Vec<TaskRecord>, RepositoryError> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let models = task_entity::Entity::find()
            .filter(task_entity::Column::Status.is_in(statuses.iter().map(|s| s.to_string())))
            .filter(task_entity::Column::UpdatedAt.lt(updated_before))
            .order_by_asc(task_entity::Column::UpdatedAt)
            .all(self.db.as_ref())
            .await?;

        into_records(models)
    }
}

// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use sea_orm_migration::prelude::*;

/// 任务表初始迁移
#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Tasks::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Tasks::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Tasks::Status).string().not_null())
                    .col(ColumnDef::new(Tasks::Message).string().not_null().default(""))
                    .col(ColumnDef::new(Tasks::Progress).integer().not_null().default(0))
                    .col(ColumnDef::new(Tasks::InputRef).string().not_null())
                    .col(ColumnDef::new(Tasks::OutputRef).string())
                    .col(ColumnDef::new(Tasks::Config).json().not_null())
                    .col(ColumnDef::new(Tasks::SizeIn).big_integer())
                    .col(ColumnDef::new(Tasks::SizeOut).big_integer())
                    .col(
                        ColumnDef::new(Tasks::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Tasks::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(Tasks::HeartbeatAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Tasks::CancelRequested)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Tasks::Owner).string())
                    .to_owned(),
            )
            .await?;

        // 看门狗按 (status, heartbeat_at) 扫描卡住的任务
        manager
            .create_index(
                Index::create()
                    .name("idx_tasks_status_heartbeat")
                    .table(Tasks::Table)
                    .col(Tasks::Status)
                    .col(Tasks::HeartbeatAt)
                    .to_owned(),
            )
            .await?;

        // 保留期清理按 (status, updated_at) 扫描
        manager
            .create_index(
                Index::create()
                    .name("idx_tasks_status_updated")
                    .table(Tasks::Table)
                    .col(Tasks::Status)
                    .col(Tasks::UpdatedAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Tasks::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Tasks {
    Table,
    Id,
    Status,
    Message,
    Progress,
    InputRef,
    OutputRef,
    Config,
    SizeIn,
    SizeOut,
    CreatedAt,
    UpdatedAt,
    HeartbeatAt,
    CancelRequested,
    Owner,
}

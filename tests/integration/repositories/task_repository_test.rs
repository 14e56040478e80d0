// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::integration::helpers::{setup, setup_file_db, TestEnv};
use chrono::{Duration as ChronoDuration, Utc};
use rasterflow::domain::models::task::{TaskConfig, TaskRecord, TaskStatus};
use rasterflow::domain::repositories::task_repository::{
    CheckpointOutcome, TaskOutcome, TaskPatch, TaskRepository,
};
use std::sync::Arc;
use uuid::Uuid;

async fn queued(env: &TestEnv) -> TaskRecord {
    let record = TaskRecord::new(
        TaskConfig::default(),
        format!("uploads/{}.pdf", Uuid::new_v4()),
        format!("processed/{}.pdf", Uuid::new_v4()),
        Some(10),
        None,
    );
    env.repo.create(&record).await.unwrap()
}

#[tokio::test]
async fn test_create_and_find_round_trip() {
    let env = setup().await;
    let task = queued(&env).await;

    let stored = env.repo.find_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Queued);
    assert_eq!(stored.progress, 0);
    assert_eq!(stored.config, TaskConfig::default());
    assert!(stored.owner.is_none());
    assert!(stored.heartbeat_at.is_none());
    assert!(!stored.cancel_requested);

    assert!(env.repo.find_by_id(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_update_missing_record_reports_not_found() {
    let env = setup().await;
    let updated = env
        .repo
        .update(Uuid::new_v4(), TaskPatch::new().message("gone"))
        .await
        .unwrap();
    assert!(!updated);
}

#[tokio::test]
async fn test_update_stamps_updated_at() {
    let env = setup().await;
    let task = queued(&env).await;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    assert!(env
        .repo
        .update(task.id, TaskPatch::new().message("Still waiting").progress(150))
        .await
        .unwrap());

    let stored = env.repo.find_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(stored.message, "Still waiting");
    assert_eq!(stored.progress, 100);
    assert!(stored.updated_at > task.updated_at);
}

#[tokio::test]
async fn test_claim_is_exclusive() {
    let env = setup().await;
    let task = queued(&env).await;

    assert!(env.repo.claim(task.id, "1:0:a").await.unwrap());
    assert!(!env.repo.claim(task.id, "1:1:b").await.unwrap());

    let stored = env.repo.find_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Processing);
    assert_eq!(stored.owner.as_deref(), Some("1:0:a"));
    assert!(stored.heartbeat_at.is_some());
}

#[tokio::test]
async fn test_concurrent_claim_next_has_single_winner() {
    let env = setup_file_db().await;
    let task = queued(&env).await;

    let mut handles = Vec::new();
    for slot in 0..4 {
        let repo = env.repo.clone();
        handles.push(tokio::spawn(async move {
            repo.claim_next(&format!("1:{}:lease", slot)).await.unwrap()
        }));
    }

    let mut winners = Vec::new();
    for handle in handles {
        if let Some(claimed) = handle.await.unwrap() {
            winners.push(claimed);
        }
    }

    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].id, task.id);
    assert_eq!(winners[0].status, TaskStatus::Processing);
}

#[tokio::test]
async fn test_claim_next_takes_oldest_first() {
    let env = setup().await;
    let first = queued(&env).await;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = queued(&env).await;

    let claimed = env.repo.claim_next("1:0:a").await.unwrap().unwrap();
    assert_eq!(claimed.id, first.id);
    let claimed = env.repo.claim_next("1:0:b").await.unwrap().unwrap();
    assert_eq!(claimed.id, second.id);
    assert!(env.repo.claim_next("1:0:c").await.unwrap().is_none());
}

#[tokio::test]
async fn test_checkpoint_outcomes() {
    let env = setup().await;
    let task = queued(&env).await;
    assert!(env.repo.claim(task.id, "1:0:a").await.unwrap());

    let outcome = env
        .repo
        .checkpoint(task.id, "1:0:a", 40, "Processing page 1/1")
        .await
        .unwrap();
    assert_eq!(outcome, CheckpointOutcome::Continue);
    let stored = env.repo.find_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(stored.progress, 40);
    assert_eq!(stored.message, "Processing page 1/1");

    // 其他持有者的检查点不会生效
    let outcome = env
        .repo
        .checkpoint(task.id, "1:1:b", 50, "intruder")
        .await
        .unwrap();
    assert_eq!(outcome, CheckpointOutcome::Lost);

    assert!(env.repo.request_cancel(task.id).await.unwrap());
    let outcome = env
        .repo
        .checkpoint(task.id, "1:0:a", 60, "next tile")
        .await
        .unwrap();
    assert_eq!(outcome, CheckpointOutcome::CancelRequested);

    let stored = env.repo.find_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Cancelling);
    assert_eq!(stored.progress, 40);

    assert!(env.repo.delete_owned(task.id, "1:0:a").await.unwrap());
    let outcome = env
        .repo
        .checkpoint(task.id, "1:0:a", 70, "after delete")
        .await
        .unwrap();
    assert_eq!(outcome, CheckpointOutcome::Lost);
}

#[tokio::test]
async fn test_finish_requires_ownership() {
    let env = setup().await;
    let task = queued(&env).await;

    // 未领取的任务不能直接完成
    let done = TaskOutcome::Completed {
        size_out: 1234,
        message: "done".to_string(),
    };
    assert!(!env.repo.finish(task.id, "1:0:a", done.clone()).await.unwrap());

    assert!(env.repo.claim(task.id, "1:0:a").await.unwrap());
    assert!(!env.repo.finish(task.id, "1:0:b", done.clone()).await.unwrap());
    assert!(env.repo.finish(task.id, "1:0:a", done.clone()).await.unwrap());

    let stored = env.repo.find_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Completed);
    assert_eq!(stored.progress, 100);
    assert_eq!(stored.size_out, Some(1234));
    assert!(stored.owner.is_none());
    assert!(stored.output_ref.is_some());

    // 终止状态不会被再次写入
    assert!(!env.repo.finish(task.id, "1:0:a", done).await.unwrap());
}

#[tokio::test]
async fn test_owner_may_complete_after_cancel_request() {
    let env = setup().await;
    let task = queued(&env).await;
    assert!(env.repo.claim(task.id, "1:0:a").await.unwrap());
    assert!(env.repo.request_cancel(task.id).await.unwrap());

    let done = TaskOutcome::Completed {
        size_out: 77,
        message: "done".to_string(),
    };
    // 取消请求不改变所有权，非持有者仍被拒绝
    assert!(!env.repo.finish(task.id, "1:0:b", done.clone()).await.unwrap());
    assert!(env.repo.finish(task.id, "1:0:a", done).await.unwrap());

    let stored = env.repo.find_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Completed);
    assert_eq!(stored.progress, 100);
    assert_eq!(stored.size_out, Some(77));
    assert!(stored.owner.is_none());
}

#[tokio::test]
async fn test_failed_outcome_clears_output() {
    let env = setup().await;
    let task = queued(&env).await;
    assert!(env.repo.claim(task.id, "1:0:a").await.unwrap());

    assert!(env
        .repo
        .finish(
            task.id,
            "1:0:a",
            TaskOutcome::Failed {
                message: "Error: boom".to_string()
            }
        )
        .await
        .unwrap());

    let stored = env.repo.find_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Failed);
    assert_eq!(stored.message, "Error: boom");
    assert!(stored.output_ref.is_none());
    assert!(stored.owner.is_none());
}

#[tokio::test]
async fn test_request_cancel_only_for_active_tasks() {
    let env = setup().await;
    let task = queued(&env).await;
    assert!(env.repo.claim(task.id, "1:0:a").await.unwrap());
    assert!(env
        .repo
        .finish(
            task.id,
            "1:0:a",
            TaskOutcome::Completed {
                size_out: 1,
                message: "done".to_string()
            }
        )
        .await
        .unwrap());

    assert!(!env.repo.request_cancel(task.id).await.unwrap());
    assert!(!env.repo.request_cancel(Uuid::new_v4()).await.unwrap());
}

#[tokio::test]
async fn test_cancelled_queued_task_cannot_be_claimed() {
    let env = setup().await;
    let task = queued(&env).await;
    assert!(env.repo.request_cancel(task.id).await.unwrap());

    assert!(!env.repo.claim(task.id, "1:0:a").await.unwrap());
    assert!(env.repo.claim_next("1:0:a").await.unwrap().is_none());
    assert!(!env.repo.delete_if_queued(task.id).await.unwrap());
}

#[tokio::test]
async fn test_delete_twice_is_harmless() {
    let env = setup().await;
    let task = queued(&env).await;

    assert!(env.repo.delete(task.id).await.unwrap());
    assert!(!env.repo.delete(task.id).await.unwrap());
    assert!(env.repo.find_by_id(task.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_if_queued_skips_claimed_tasks() {
    let env = setup().await;
    let task = queued(&env).await;
    assert!(env.repo.claim(task.id, "1:0:a").await.unwrap());

    assert!(!env.repo.delete_if_queued(task.id).await.unwrap());
    assert!(!env.repo.delete_owned(task.id, "1:0:b").await.unwrap());
    assert!(env.repo.find_by_id(task.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_list_stale_and_fail_orphan() {
    let env = setup().await;
    let task = queued(&env).await;
    let fresh = queued(&env).await;
    assert!(env.repo.claim(task.id, "1:0:a").await.unwrap());
    assert!(env.repo.claim(fresh.id, "1:1:b").await.unwrap());

    // 所有心跳都早于一个未来的时间点
    let future = (Utc::now() + ChronoDuration::seconds(5)).fixed_offset();
    let past = (Utc::now() - ChronoDuration::seconds(60)).fixed_offset();

    let stale = env.repo.list_stale(future).await.unwrap();
    assert_eq!(stale.len(), 2);
    assert!(env.repo.list_stale(past).await.unwrap().is_empty());

    // 心跳未过期时不会失败
    assert!(!env
        .repo
        .fail_orphan(task.id, Some("1:0:a"), past, "orphan")
        .await
        .unwrap());
    // 持有者不一致时不会失败
    assert!(!env
        .repo
        .fail_orphan(task.id, Some("1:9:z"), future, "orphan")
        .await
        .unwrap());
    assert!(env
        .repo
        .fail_orphan(task.id, Some("1:0:a"), future, "orphan")
        .await
        .unwrap());

    let stored = env.repo.find_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Failed);
    assert_eq!(stored.message, "orphan");
    assert!(stored.owner.is_none());

    let stale = env.repo.list_stale(future).await.unwrap();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].id, fresh.id);
}

#[tokio::test]
async fn test_list_retirable_filters_by_status() {
    let env = setup().await;
    let task = queued(&env).await;
    let other = queued(&env).await;
    assert!(env.repo.claim(task.id, "1:0:a").await.unwrap());
    assert!(env
        .repo
        .finish(
            task.id,
            "1:0:a",
            TaskOutcome::Completed {
                size_out: 1,
                message: "done".to_string()
            }
        )
        .await
        .unwrap());

    let future = (Utc::now() + ChronoDuration::seconds(5)).fixed_offset();
    let retirable = env
        .repo
        .list_retirable(future, &[TaskStatus::Completed, TaskStatus::Failed])
        .await
        .unwrap();
    assert_eq!(retirable.len(), 1);
    assert_eq!(retirable[0].id, task.id);

    let queued_only = env
        .repo
        .list_retirable(future, &[TaskStatus::Queued])
        .await
        .unwrap();
    assert_eq!(queued_only.len(), 1);
    assert_eq!(queued_only[0].id, other.id);
}

#[tokio::test]
async fn test_repository_is_usable_as_trait_object() {
    let env = setup().await;
    let repo: Arc<dyn TaskRepository> = env.repo.clone();
    let task = queued(&env).await;
    assert!(repo.find_by_id(task.id).await.unwrap().is_some());
}

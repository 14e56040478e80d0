// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::application::usecases::task_service::TaskService;
use crate::presentation::handlers::task_handler;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// 创建应用路由
///
/// # 参数
///
/// * `service` - 任务服务
/// * `max_upload_bytes` - 上传文档大小上限
///
/// # 返回值
///
/// 返回配置好的路由
pub fn routes(service: Arc<TaskService>, max_upload_bytes: usize) -> Router {
    let task_routes = Router::new()
        .route(
            "/v1/tasks",
            post(task_handler::submit_task).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route(
            "/v1/tasks/{id}",
            get(task_handler::get_task).delete(task_handler::delete_task),
        )
        .route("/v1/tasks/{id}/download", get(task_handler::download_task))
        .route("/v1/tasks/{id}/cancel", post(task_handler::cancel_task))
        .layer(Extension(service));

    Router::new()
        .route("/health", get(health_check))
        .route("/v1/version", get(version))
        .merge(task_routes)
        .layer(TraceLayer::new_for_http())
}

/// 健康检查端点
///
/// # 返回值
///
/// 返回"OK"字符串
pub async fn health_check() -> &'static str {
    "OK"
}

/// 版本信息端点
pub async fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// HTTP请求处理器模块
///
/// 每个处理器只做参数提取与响应映射，业务逻辑在任务服务中
pub mod task_handler;

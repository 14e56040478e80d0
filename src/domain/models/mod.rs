// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域模型模块
///
/// 任务（task）：转换作业的记录、状态机与不可变配置快照
pub mod task;

// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 基础设施层模块
///
/// 包含的子模块：
/// - 数据库（database）：提供数据库连接和实体映射
/// - 存活探测（liveness）：执行槽租约表与进程存活检查
/// - 指标（metrics）：Prometheus 导出器与计数器名称
/// - 仓库实现（repositories）：提供领域仓库接口的具体实现
/// - 存储（storage）：本地文件制品存储
///
/// 基础设施层依赖于领域层的抽象接口。
pub mod database;
pub mod liveness;
pub mod metrics;
pub mod repositories;
pub mod storage;

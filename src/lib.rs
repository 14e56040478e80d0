// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 应用程序模块
///
/// 面向请求处理器的任务服务与数据传输对象
pub mod application;

/// 配置模块
///
/// 处理应用程序的配置设置和环境变量
pub mod config;

/// 领域模块
///
/// 包含任务记录、状态机、仓库接口与领域服务
pub mod domain;

/// 引擎模块
///
/// 渲染器、文字识别与输出编码
pub mod engines;

/// 基础设施模块
///
/// 提供数据库、制品存储、存活检测与指标
pub mod infrastructure;

/// 表示层模块
///
/// 处理HTTP请求和响应，包括路由与处理器
pub mod presentation;

/// 分块处理模块
///
/// 内存受限的逐瓦片处理算法
pub mod processing;

/// 工具模块
///
/// 提供日志初始化与错误类型
pub mod utils;

/// 工作器模块
///
/// 转换执行槽、看门狗与工作器管理
pub mod workers;

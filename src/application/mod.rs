// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 应用程序模块
///
/// 面向请求处理器的任务服务：提交、查询、取消、删除与下载
pub mod dto;
pub mod usecases;

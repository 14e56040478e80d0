// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 分块处理模块
///
/// - 分块几何（tiling）：页面到瓦片网格的切分
/// - 分块处理器（tiled_processor）：逐瓦片渲染、放置并在检查点上报进度
/// - 输出目标（sink）：PDF 文档与纵向拼接的合成图
/// - 检查点（checkpoint）：进度、心跳与取消检查
pub mod checkpoint;
pub mod sink;
pub mod tiled_processor;
pub mod tiling;

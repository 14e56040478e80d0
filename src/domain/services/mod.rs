// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域服务模块
///
/// 包含的服务：
/// - 制品清理（artifacts）：按任务记录删除输入与输出制品
/// - 存活判定（liveness）：持有者标识与存活探测接口
pub mod artifacts;
pub mod liveness;

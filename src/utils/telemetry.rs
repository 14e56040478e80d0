// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// 默认日志过滤规则，可被 `RUST_LOG` 覆盖
pub const DEFAULT_FILTER: &str = "info,rasterflow=debug";

/// 初始化日志订阅器
///
/// 重复初始化（例如多个测试共享进程）时保持已有订阅器不变。
pub fn init_telemetry() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

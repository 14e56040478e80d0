// Copyright 2025 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::processing::tiling::{LogicalRect, PageSize};
use async_trait::async_trait;
use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// 渲染错误类型
#[derive(Error, Debug)]
pub enum RenderError {
    /// 输入文件不存在
    #[error("Input not found: {0}")]
    InputNotFound(PathBuf),
    /// 无法打开或解析输入文档
    #[error("Cannot open document: {0}")]
    Open(String),
    /// 页码越界
    #[error("Page {page} out of range (document has {count} pages)")]
    PageOutOfRange { page: usize, count: usize },
    /// 外部工具以非零状态退出
    #[error("{tool} exited with {code:?}: {stderr}")]
    Tool {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },
    /// 外部工具无法启动
    #[error("Failed to launch {tool}: {source}")]
    Launch {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    /// 图像编解码错误
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    /// IO错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// 阻塞线程上的任务失败
    #[error("Blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    /// 不支持的操作
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

/// 文字识别错误类型
#[derive(Error, Debug)]
pub enum OcrError {
    /// 识别工具以非零状态退出
    #[error("{tool} exited with {code:?}: {stderr}")]
    Failed {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },
    /// 识别工具无法启动
    #[error("Failed to launch {tool}: {source}")]
    Launch {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    /// IO错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// 文档渲染器特质
#[async_trait]
pub trait Renderer: Send + Sync {
    /// 打开输入文档
    ///
    /// # 参数
    ///
    /// * `input` - 输入文件路径
    ///
    /// # 返回值
    ///
    /// 可按区域渲染的源文档
    async fn open(&self, input: &Path) -> Result<Box<dyn SourceDocument>, RenderError>;

    /// 渲染器名称
    fn name(&self) -> &'static str;
}

/// 已打开的源文档
///
/// 页码从 0 开始。
#[async_trait]
pub trait SourceDocument: Send + Sync {
    /// 页数
    fn page_count(&self) -> usize;

    /// 页面逻辑尺寸（点）
    fn page_size(&self, page: usize) -> Result<PageSize, RenderError>;

    /// 以指定分辨率渲染页面的一个逻辑区域
    ///
    /// 返回的像素尺寸应等于 `region.to_pixels(dpi)`；调用者会对偏差做裁剪或补白。
    async fn render_region(
        &self,
        page: usize,
        region: &LogicalRect,
        dpi: u32,
    ) -> Result<RgbImage, RenderError>;
}

/// 文字识别引擎特质
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// 识别一张页面图像，返回页面级文本
    async fn recognize(&self, image: &Path, language: &str) -> Result<String, OcrError>;

    /// 引擎名称
    fn name(&self) -> &'static str;
}

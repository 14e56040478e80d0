// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::engines::traits::{RenderError, Renderer, SourceDocument};
use crate::processing::tiling::{LogicalRect, PageSize};
use async_trait::async_trait;
use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 棋盘格单元边长（设备像素）
const CHECKER: u32 = 32;

/// 合成文档的页面描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticPage {
    /// 宽度（点）
    pub width: f64,
    /// 高度（点）
    pub height: f64,
    #[serde(default = "default_color")]
    pub color: [u8; 3],
}

fn default_color() -> [u8; 3] {
    [230, 230, 230]
}

/// 合成文档清单
///
/// 以 JSON 形式作为输入文件，不依赖外部工具即可产生确定的页面像素。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyntheticManifest {
    pub pages: Vec<SyntheticPage>,
    /// 每次区域渲染前的延迟
    #[serde(default)]
    pub render_delay_ms: u64,
    /// 渲染该页（从 0 开始）时返回错误
    #[serde(default)]
    pub fail_page: Option<usize>,
}

impl SyntheticManifest {
    pub fn new(pages: Vec<SyntheticPage>) -> Self {
        Self {
            pages,
            ..Default::default()
        }
    }

    /// 追加一页
    pub fn page(mut self, width: f64, height: f64) -> Self {
        self.pages.push(SyntheticPage {
            width,
            height,
            color: default_color(),
        });
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.render_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn failing_on(mut self, page: usize) -> Self {
        self.fail_page = Some(page);
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// 读取 JSON 清单的合成渲染器
#[derive(Debug, Clone, Default)]
pub struct SyntheticRenderer;

impl SyntheticRenderer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Renderer for SyntheticRenderer {
    async fn open(&self, input: &Path) -> Result<Box<dyn SourceDocument>, RenderError> {
        let raw = match tokio::fs::read(input).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RenderError::InputNotFound(input.to_path_buf()));
            }
            Err(e) => return Err(RenderError::Io(e)),
        };

        let manifest: SyntheticManifest = serde_json::from_slice(&raw)
            .map_err(|e| RenderError::Open(format!("invalid synthetic manifest: {}", e)))?;

        Ok(Box::new(SyntheticDocument { manifest }))
    }

    fn name(&self) -> &'static str {
        "synthetic"
    }
}

struct SyntheticDocument {
    manifest: SyntheticManifest,
}

#[async_trait]
impl SourceDocument for SyntheticDocument {
    fn page_count(&self) -> usize {
        self.manifest.pages.len()
    }

    fn page_size(&self, page: usize) -> Result<PageSize, RenderError> {
        self.manifest
            .pages
            .get(page)
            .map(|p| PageSize::new(p.width, p.height))
            .ok_or(RenderError::PageOutOfRange {
                page,
                count: self.manifest.pages.len(),
            })
    }

    async fn render_region(
        &self,
        page: usize,
        region: &LogicalRect,
        dpi: u32,
    ) -> Result<RgbImage, RenderError> {
        let layout = self
            .manifest
            .pages
            .get(page)
            .ok_or(RenderError::PageOutOfRange {
                page,
                count: self.manifest.pages.len(),
            })?;

        if self.manifest.render_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.manifest.render_delay_ms)).await;
        }

        if self.manifest.fail_page == Some(page) {
            return Err(RenderError::Tool {
                tool: "synthetic".to_string(),
                code: Some(1),
                stderr: format!("synthetic render failure on page {}", page + 1),
            });
        }

        let rect = region.to_pixels(dpi);
        let [r, g, b] = layout.color;
        let dark = Rgb([r / 2, g / 2, b / 2]);
        let light = Rgb([r, g, b]);

        // 图案只依赖页面绝对像素坐标，分块渲染与整页渲染结果一致
        Ok(RgbImage::from_fn(rect.width, rect.height, |x, y| {
            let ax = rect.x + x;
            let ay = rect.y + y;
            if (ax / CHECKER + ay / CHECKER) % 2 == 0 {
                light
            } else {
                dark
            }
        }))
    }
}

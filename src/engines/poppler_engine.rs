// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::engines::traits::{RenderError, Renderer, SourceDocument};
use crate::processing::tiling::{LogicalRect, PageSize};
use async_trait::async_trait;
use image::RgbImage;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// pdfinfo 不会超出文档实际页数，上限只用于要求逐页输出尺寸
const PDFINFO_LAST_PAGE: &str = "1000000";

static PAGES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^Pages:\s+(\d+)").expect("Failed to compile pages regex"));
static PAGE_SIZE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^Page\s+(\d+)\s+size:\s+([\d.]+)\s+x\s+([\d.]+)\s+pts")
        .expect("Failed to compile page size regex")
});
static DEFAULT_SIZE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^Page size:\s+([\d.]+)\s+x\s+([\d.]+)\s+pts")
        .expect("Failed to compile default size regex")
});
static PAGE_ROT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^Page\s+(\d+)\s+rot:\s+(\d+)").expect("Failed to compile rotation regex")
});

/// 基于 poppler-utils 的渲染器
///
/// `pdfinfo` 读取页数与页面尺寸，`pdftoppm` 按裁剪区域光栅化。
#[derive(Debug, Clone)]
pub struct PopplerRenderer {
    pdfinfo_bin: String,
    pdftoppm_bin: String,
}

impl PopplerRenderer {
    pub fn new(pdfinfo_bin: impl Into<String>, pdftoppm_bin: impl Into<String>) -> Self {
        Self {
            pdfinfo_bin: pdfinfo_bin.into(),
            pdftoppm_bin: pdftoppm_bin.into(),
        }
    }
}

impl Default for PopplerRenderer {
    fn default() -> Self {
        Self::new("pdfinfo", "pdftoppm")
    }
}

#[async_trait]
impl Renderer for PopplerRenderer {
    async fn open(&self, input: &Path) -> Result<Box<dyn SourceDocument>, RenderError> {
        if !tokio::fs::try_exists(input).await? {
            return Err(RenderError::InputNotFound(input.to_path_buf()));
        }

        let output = Command::new(&self.pdfinfo_bin)
            .arg("-f")
            .arg("1")
            .arg("-l")
            .arg(PDFINFO_LAST_PAGE)
            .arg(input)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| RenderError::Launch {
                tool: self.pdfinfo_bin.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(RenderError::Tool {
                tool: self.pdfinfo_bin.clone(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let pages = parse_pdfinfo(&String::from_utf8_lossy(&output.stdout))?;
        debug!("pdfinfo reported {} pages for {}", pages.len(), input.display());

        Ok(Box::new(PopplerDocument {
            input: input.to_path_buf(),
            pdftoppm_bin: self.pdftoppm_bin.clone(),
            pages,
        }))
    }

    fn name(&self) -> &'static str {
        "poppler"
    }
}

struct PopplerDocument {
    input: PathBuf,
    pdftoppm_bin: String,
    pages: Vec<PageSize>,
}

#[async_trait]
impl SourceDocument for PopplerDocument {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_size(&self, page: usize) -> Result<PageSize, RenderError> {
        self.pages
            .get(page)
            .copied()
            .ok_or(RenderError::PageOutOfRange {
                page,
                count: self.pages.len(),
            })
    }

    async fn render_region(
        &self,
        page: usize,
        region: &LogicalRect,
        dpi: u32,
    ) -> Result<RgbImage, RenderError> {
        self.page_size(page)?;
        let rect = region.to_pixels(dpi);
        if rect.is_empty() {
            return Err(RenderError::Unsupported(format!(
                "empty region on page {}",
                page + 1
            )));
        }

        let page_no = (page + 1).to_string();
        let output = Command::new(&self.pdftoppm_bin)
            .args(["-r", &dpi.to_string()])
            .args(["-f", &page_no, "-l", &page_no])
            .args(["-x", &rect.x.to_string(), "-y", &rect.y.to_string()])
            .args(["-W", &rect.width.to_string(), "-H", &rect.height.to_string()])
            .args(["-png", "-singlefile"])
            .arg(&self.input)
            .arg("-")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| RenderError::Launch {
                tool: self.pdftoppm_bin.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(RenderError::Tool {
                tool: self.pdftoppm_bin.clone(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        // PNG 解码在阻塞线程池上进行，不占用运行时线程
        let png = output.stdout;
        let image = tokio::task::spawn_blocking(move || {
            image::load_from_memory_with_format(&png, image::ImageFormat::Png)
                .map(|image| image.to_rgb8())
        })
        .await??;
        Ok(image)
    }
}

/// 解析 `pdfinfo -f 1 -l N` 的输出
///
/// 页面旋转 90/270 度时交换宽高，与 pdftoppm 的输出方向一致。
pub fn parse_pdfinfo(stdout: &str) -> Result<Vec<PageSize>, RenderError> {
    let count: usize = PAGES_RE
        .captures(stdout)
        .and_then(|c| c[1].parse().ok())
        .ok_or_else(|| RenderError::Open("pdfinfo output has no page count".to_string()))?;

    let default_size = DEFAULT_SIZE_RE.captures(stdout).and_then(|c| {
        let w: f64 = c[1].parse().ok()?;
        let h: f64 = c[2].parse().ok()?;
        Some(PageSize::new(w, h))
    });

    let mut sizes: HashMap<usize, PageSize> = HashMap::new();
    for c in PAGE_SIZE_RE.captures_iter(stdout) {
        if let (Ok(n), Ok(w), Ok(h)) = (c[1].parse(), c[2].parse(), c[3].parse()) {
            sizes.insert(n, PageSize::new(w, h));
        }
    }

    let mut rotations: HashMap<usize, u32> = HashMap::new();
    for c in PAGE_ROT_RE.captures_iter(stdout) {
        if let (Ok(n), Ok(r)) = (c[1].parse(), c[2].parse::<u32>()) {
            rotations.insert(n, r % 360);
        }
    }

    (1..=count)
        .map(|n| {
            let size = sizes
                .get(&n)
                .copied()
                .or(default_size)
                .ok_or_else(|| RenderError::Open(format!("no size reported for page {}", n)))?;
            Ok(match rotations.get(&n) {
                Some(90) | Some(270) => PageSize::new(size.height, size.width),
                _ => size,
            })
        })
        .collect()
}

// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::task::TaskConfig;
use crate::domain::repositories::storage_repository::StorageError;
use crate::engines::encoder::{encode_image, fit_exact, ImageFormat};
use crate::engines::pdf_writer::PdfError;
use crate::engines::traits::{OcrEngine, OcrError, RenderError, SourceDocument};
use crate::infrastructure::metrics::TILES_RENDERED;
use crate::processing::checkpoint::{Checkpoint, Interrupt};
use crate::processing::sink::{PageGeometry, TileSink};
use crate::processing::tiling::{LogicalRect, PageSize, TileGrid, BASE_RESOLUTION};
use metrics::counter;
use std::io::Write;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::task::{spawn_blocking, JoinError};
use tracing::debug;

/// 分析完成后的进度
pub const PROGRESS_ANALYSED: i32 = 10;
/// 全部瓦片完成后的进度
pub const PROGRESS_TILES_DONE: i32 = 90;
/// 收尾阶段的进度
pub const PROGRESS_FINALIZING: i32 = 95;

/// 分块处理错误类型
#[derive(Error, Debug)]
pub enum ProcessError {
    /// 渲染或编码失败
    #[error("Render error: {0}")]
    Render(#[from] RenderError),
    /// 文字识别失败
    #[error("OCR error: {0}")]
    Ocr(#[from] OcrError),
    /// PDF 写入失败
    #[error("PDF error: {0}")]
    Pdf(#[from] PdfError),
    /// 制品存储错误
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    /// IO错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// 输出目标错误
    #[error("Output error: {0}")]
    Output(String),
    /// 合成图没有任何页面
    #[error("The document has no pages to compose into an image")]
    EmptyOutput,
    /// 阻塞线程上的任务失败
    #[error("Blocking task failed: {0}")]
    Join(#[from] JoinError),
    /// 在检查点被中断
    #[error("Processing interrupted: {0:?}")]
    Interrupted(Interrupt),
}

impl From<Interrupt> for ProcessError {
    fn from(interrupt: Interrupt) -> Self {
        ProcessError::Interrupted(interrupt)
    }
}

/// 在阻塞线程池上操作输出目标
///
/// 编码、压缩、拼接与文件写入都是同步的重计算，不能占用运行时线程。
/// 目标的所有权随闭包移入阻塞线程，完成后交还调用者。
async fn on_blocking<T, F>(
    mut sink: Box<dyn TileSink>,
    op: F,
) -> Result<(Box<dyn TileSink>, T), ProcessError>
where
    T: Send + 'static,
    F: FnOnce(&mut Box<dyn TileSink>) -> Result<T, ProcessError> + Send + 'static,
{
    spawn_blocking(move || {
        let value = op(&mut sink)?;
        Ok((sink, value))
    })
    .await?
}

/// 分块处理器
///
/// 任意大小的页面都被切分为边长不超过 `tile_edge` 像素的瓦片逐个处理，
/// 峰值内存与瓦片面积成正比（合成图模式还需保存页面画布）。
#[derive(Debug, Clone, Copy)]
pub struct TiledProcessor {
    tile_edge: u32,
}

impl TiledProcessor {
    pub fn new(tile_edge: u32) -> Self {
        Self {
            tile_edge: tile_edge.max(1),
        }
    }

    /// 为每一页计算瓦片网格
    pub fn plan(
        &self,
        document: &dyn SourceDocument,
        dpi: u32,
    ) -> Result<Vec<TileGrid>, ProcessError> {
        (0..document.page_count())
            .map(|page| {
                let size = document.page_size(page)?;
                Ok(TileGrid::for_page(size, dpi, self.tile_edge))
            })
            .collect()
    }

    /// 处理整个文档
    ///
    /// # 参数
    ///
    /// * `document` - 已打开的源文档
    /// * `sink` - 输出目标
    /// * `config` - 任务配置快照
    /// * `ocr` - 文字识别引擎，仅在配置开启且目标接受文本层时使用
    /// * `checkpoint` - 检查点
    ///
    /// # 返回值
    ///
    /// 输出制品的字节数
    pub async fn run(
        &self,
        document: &dyn SourceDocument,
        mut sink: Box<dyn TileSink>,
        config: &TaskConfig,
        ocr: Option<&dyn OcrEngine>,
        checkpoint: &mut dyn Checkpoint,
    ) -> Result<u64, ProcessError> {
        let grids = self.plan(document, config.dpi)?;
        let pages = grids.len();
        let total: usize = grids.iter().map(TileGrid::len).sum();

        checkpoint
            .reached(
                PROGRESS_ANALYSED,
                &format!(
                    "Analysed {} page(s), {} tile(s). Starting conversion...",
                    pages, total
                ),
            )
            .await?;

        let mut done = 0usize;
        for (page, grid) in grids.iter().enumerate() {
            let geometry = PageGeometry {
                index: page,
                size: grid.page_size(),
                width_px: grid.width_px(),
                height_px: grid.height_px(),
            };
            debug!(
                page,
                width_px = geometry.width_px,
                height_px = geometry.height_px,
                tiles = grid.len(),
                "Processing page"
            );

            (sink, _) = on_blocking(sink, move |s| s.begin_page(&geometry)).await?;
            let tiles_on_page = grid.len();

            for tile in grid.tiles() {
                let pixels = document
                    .render_region(page, &tile.logical, config.dpi)
                    .await?;
                (sink, _) = on_blocking(sink, move |s| {
                    let pixels = fit_exact(pixels, tile.pixels.width, tile.pixels.height);
                    s.place_tile(&tile, pixels)
                })
                .await?;

                done += 1;
                counter!(TILES_RENDERED).increment(1);
                checkpoint
                    .reached(
                        tile_progress(done, total),
                        &format!(
                            "Processing page {}/{}, tile {}/{}...",
                            page + 1,
                            pages,
                            tile.index + 1,
                            tiles_on_page
                        ),
                    )
                    .await?;
            }

            if config.ocr && sink.wants_text_layer() {
                if let Some(ocr) = ocr {
                    let text = self.recognize_page(document, page, config, ocr).await?;
                    (sink, _) = on_blocking(sink, move |s| s.set_page_text(&text)).await?;
                }
            }

            (sink, _) = on_blocking(sink, |s| s.end_page()).await?;
            checkpoint
                .reached(
                    tile_progress(done, total),
                    &format!("Finished page {}/{}.", page + 1, pages),
                )
                .await?;
        }

        checkpoint
            .reached(PROGRESS_FINALIZING, "Finalizing: Saving the output file...")
            .await?;

        let (_, size) = on_blocking(sink, |s| s.finish()).await?;
        Ok(size)
    }

    /// 以单瓦片可容纳的分辨率渲染整页并识别文字
    async fn recognize_page(
        &self,
        document: &dyn SourceDocument,
        page: usize,
        config: &TaskConfig,
        ocr: &dyn OcrEngine,
    ) -> Result<String, ProcessError> {
        let size = document.page_size(page)?;
        let dpi = ocr_resolution(size, config.dpi, self.tile_edge);

        let pixels = document
            .render_region(page, &LogicalRect::page(size), dpi)
            .await?;
        let file = spawn_blocking(move || -> Result<NamedTempFile, ProcessError> {
            let png = encode_image(&pixels, ImageFormat::Png)?;
            drop(pixels);

            let mut file = tempfile::Builder::new()
                .prefix("rasterflow-ocr-")
                .suffix(".png")
                .tempfile()?;
            file.write_all(&png)?;
            file.flush()?;
            Ok(file)
        })
        .await??;

        let text = ocr.recognize(file.path(), &config.ocr_language).await?;
        Ok(text)
    }
}

/// 瓦片阶段的进度：10 到 90 之间线性分布
fn tile_progress(done: usize, total: usize) -> i32 {
    if total == 0 {
        return PROGRESS_TILES_DONE;
    }
    let span = (PROGRESS_TILES_DONE - PROGRESS_ANALYSED) as usize;
    PROGRESS_ANALYSED + (span * done.min(total) / total) as i32
}

/// OCR 渲染分辨率：不超过任务分辨率，且整页最长边不超过一个瓦片
fn ocr_resolution(size: PageSize, dpi: u32, tile_edge: u32) -> u32 {
    let longest = size.longest_edge();
    if longest <= 0.0 {
        return dpi.max(1);
    }
    let fit = (tile_edge as f64 * BASE_RESOLUTION / longest).floor() as u32;
    dpi.min(fit).max(1)
}

// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::task::{OutputKind, TaskConfig, TileEncoding};
use crate::engines::encoder::{encode_image, ImageFormat};
use crate::engines::pdf_writer::{PdfImage, PdfWriter, PlacementRect};
use crate::processing::tiled_processor::ProcessError;
use crate::processing::tiling::{PageSize, Tile};
use image::{Rgb, RgbImage};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// 输出页面的几何信息
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    /// 页码（从 0 开始）
    pub index: usize,
    /// 输出页面逻辑尺寸（点）
    pub size: PageSize,
    pub width_px: u32,
    pub height_px: u32,
}

/// 瓦片输出目标
///
/// 文档模式与合成图模式共用同一套分块算法，只有目标不同。
pub trait TileSink: Send {
    fn begin_page(&mut self, geometry: &PageGeometry) -> Result<(), ProcessError>;

    /// 放置一个已渲染的瓦片，像素尺寸与 `tile.pixels` 一致
    fn place_tile(&mut self, tile: &Tile, pixels: RgbImage) -> Result<(), ProcessError>;

    /// 是否接受页面文本层
    fn wants_text_layer(&self) -> bool {
        false
    }

    fn set_page_text(&mut self, _text: &str) -> Result<(), ProcessError> {
        Ok(())
    }

    fn end_page(&mut self) -> Result<(), ProcessError>;

    /// 写完输出制品，返回字节数
    fn finish(&mut self) -> Result<u64, ProcessError>;
}

/// 根据输出类型创建目标
pub fn sink_for(config: &TaskConfig, output: &Path) -> Result<Box<dyn TileSink>, ProcessError> {
    Ok(match config.output {
        OutputKind::Pdf => Box::new(DocumentSink::create(
            output,
            config.tile_encoding,
            config.quality,
        )?),
        OutputKind::Png => Box::new(CompositeSink::new(output, ImageFormat::Png)),
        OutputKind::Jpeg => Box::new(CompositeSink::new(output, ImageFormat::Jpeg(config.quality))),
    })
}

/// 文档重编码目标：每个瓦片作为图像放到新页面的对应子矩形
pub struct DocumentSink {
    writer: Option<PdfWriter<BufWriter<File>>>,
    encoding: TileEncoding,
    quality: u8,
    page: Option<PageGeometry>,
}

impl DocumentSink {
    pub fn create(path: &Path, encoding: TileEncoding, quality: u8) -> Result<Self, ProcessError> {
        let file = File::create(path)?;
        Ok(Self {
            writer: Some(PdfWriter::new(BufWriter::new(file))?),
            encoding,
            quality,
            page: None,
        })
    }

    fn writer(&mut self) -> Result<&mut PdfWriter<BufWriter<File>>, ProcessError> {
        self.writer
            .as_mut()
            .ok_or_else(|| ProcessError::Output("document already finished".to_string()))
    }
}

impl TileSink for DocumentSink {
    fn begin_page(&mut self, geometry: &PageGeometry) -> Result<(), ProcessError> {
        self.writer()?
            .begin_page(geometry.size.width, geometry.size.height)?;
        self.page = Some(*geometry);
        Ok(())
    }

    fn place_tile(&mut self, tile: &Tile, pixels: RgbImage) -> Result<(), ProcessError> {
        let page = self
            .page
            .ok_or_else(|| ProcessError::Output("tile placed outside a page".to_string()))?;

        // 逻辑坐标原点在左上角，PDF 原点在左下角
        let rect = PlacementRect {
            x: tile.logical.x0,
            y: page.size.height - tile.logical.y1,
            width: tile.logical.width(),
            height: tile.logical.height(),
        };

        let (width, height) = pixels.dimensions();
        match self.encoding {
            TileEncoding::Jpeg => {
                let data = encode_image(&pixels, ImageFormat::Jpeg(self.quality))?;
                drop(pixels);
                self.writer()?.place_image(
                    rect,
                    PdfImage::Jpeg {
                        data: &data,
                        width,
                        height,
                    },
                )?;
            }
            TileEncoding::Flate => {
                self.writer()?.place_image(
                    rect,
                    PdfImage::Rgb {
                        pixels: pixels.as_raw(),
                        width,
                        height,
                    },
                )?;
            }
        }

        Ok(())
    }

    fn wants_text_layer(&self) -> bool {
        true
    }

    fn set_page_text(&mut self, text: &str) -> Result<(), ProcessError> {
        self.writer()?.add_invisible_text(text)?;
        Ok(())
    }

    fn end_page(&mut self) -> Result<(), ProcessError> {
        self.page = None;
        self.writer()?.end_page()?;
        Ok(())
    }

    fn finish(&mut self) -> Result<u64, ProcessError> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| ProcessError::Output("document already finished".to_string()))?;
        let (size, _file) = writer.finish()?;
        Ok(size)
    }
}

/// 合成图目标：瓦片拼入页面画布，所有画布纵向拼接为一张长图
pub struct CompositeSink {
    path: PathBuf,
    format: ImageFormat,
    canvas: Option<RgbImage>,
    pages: Vec<RgbImage>,
}

impl CompositeSink {
    pub fn new(path: &Path, format: ImageFormat) -> Self {
        Self {
            path: path.to_path_buf(),
            format,
            canvas: None,
            pages: Vec::new(),
        }
    }
}

impl TileSink for CompositeSink {
    fn begin_page(&mut self, geometry: &PageGeometry) -> Result<(), ProcessError> {
        self.canvas = Some(RgbImage::from_pixel(
            geometry.width_px,
            geometry.height_px,
            Rgb([255, 255, 255]),
        ));
        Ok(())
    }

    fn place_tile(&mut self, tile: &Tile, pixels: RgbImage) -> Result<(), ProcessError> {
        let canvas = self
            .canvas
            .as_mut()
            .ok_or_else(|| ProcessError::Output("tile placed outside a page".to_string()))?;
        image::imageops::replace(canvas, &pixels, tile.pixels.x as i64, tile.pixels.y as i64);
        Ok(())
    }

    fn end_page(&mut self) -> Result<(), ProcessError> {
        if let Some(canvas) = self.canvas.take() {
            if canvas.width() > 0 && canvas.height() > 0 {
                self.pages.push(canvas);
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<u64, ProcessError> {
        if self.pages.is_empty() {
            return Err(ProcessError::EmptyOutput);
        }

        let width = self.pages.iter().map(|p| p.width()).max().unwrap_or(0);
        let height: u64 = self.pages.iter().map(|p| p.height() as u64).sum();
        let height = u32::try_from(height)
            .map_err(|_| ProcessError::Output(format!("composite image too tall: {} px", height)))?;

        // 左对齐，白色背景
        let mut stitched = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
        let mut offset: i64 = 0;
        for page in self.pages.drain(..) {
            image::imageops::replace(&mut stitched, &page, 0, offset);
            offset += page.height() as i64;
        }

        let bytes = encode_image(&stitched, self.format)?;
        std::fs::write(&self.path, &bytes)?;
        Ok(bytes.len() as u64)
    }
}

// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 页面分块几何
//!
//! 页面以逻辑单位（点，1/72 英寸）描述，渲染时按 `dpi / 72` 换算为设备像素。
//! 瓦片的逻辑矩形由像素边界除以缩放系数得到，相邻瓦片共享完全相同的边。

/// 逻辑单位对应的基准分辨率
pub const BASE_RESOLUTION: f64 = 72.0;

/// 分辨率对应的缩放系数
pub fn scale_for(dpi: u32) -> f64 {
    dpi as f64 / BASE_RESOLUTION
}

/// 页面尺寸（点）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width: f64,
    pub height: f64,
}

impl PageSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// 在指定分辨率下的设备像素尺寸
    pub fn pixels_at(&self, dpi: u32) -> (u32, u32) {
        let scale = scale_for(dpi);
        (to_pixels(self.width * scale), to_pixels(self.height * scale))
    }

    pub fn longest_edge(&self) -> f64 {
        self.width.max(self.height)
    }
}

fn to_pixels(value: f64) -> u32 {
    if value.is_finite() && value > 0.0 {
        value.round().min(u32::MAX as f64) as u32
    } else {
        0
    }
}

/// 设备像素矩形，原点在左上角
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }
}

/// 逻辑矩形（点），原点在左上角
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogicalRect {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl LogicalRect {
    /// 覆盖整页的矩形
    pub fn page(size: PageSize) -> Self {
        Self {
            x0: 0.0,
            y0: 0.0,
            x1: size.width,
            y1: size.height,
        }
    }

    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }

    /// 在指定分辨率下对应的像素矩形
    pub fn to_pixels(&self, dpi: u32) -> PixelRect {
        let scale = scale_for(dpi);
        let x = to_pixels(self.x0 * scale);
        let y = to_pixels(self.y0 * scale);
        let right = to_pixels(self.x1 * scale).max(x);
        let bottom = to_pixels(self.y1 * scale).max(y);
        PixelRect {
            x,
            y,
            width: right - x,
            height: bottom - y,
        }
    }
}

/// 单个瓦片
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tile {
    /// 页面内的行优先序号
    pub index: usize,
    pub col: u32,
    pub row: u32,
    /// 设备像素范围
    pub pixels: PixelRect,
    /// 逻辑范围
    pub logical: LogicalRect,
}

/// 页面瓦片网格
///
/// 瓦片边长不超过 `edge` 个设备像素；最后一行、最后一列被裁剪到页面边缘。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileGrid {
    width_px: u32,
    height_px: u32,
    edge: u32,
    scale: f64,
}

impl TileGrid {
    /// 创建瓦片网格
    ///
    /// # 参数
    ///
    /// * `width_px` / `height_px` - 页面设备像素尺寸
    /// * `edge` - 瓦片最大边长（像素）
    /// * `scale` - 设备像素与逻辑单位之比
    pub fn new(width_px: u32, height_px: u32, edge: u32, scale: f64) -> Self {
        Self {
            width_px,
            height_px,
            edge: edge.max(1),
            scale: if scale > 0.0 { scale } else { 1.0 },
        }
    }

    /// 按页面尺寸与分辨率创建网格
    pub fn for_page(page: PageSize, dpi: u32, edge: u32) -> Self {
        let (width_px, height_px) = page.pixels_at(dpi);
        Self::new(width_px, height_px, edge, scale_for(dpi))
    }

    pub fn width_px(&self) -> u32 {
        self.width_px
    }

    pub fn height_px(&self) -> u32 {
        self.height_px
    }

    pub fn cols(&self) -> u32 {
        self.width_px.div_ceil(self.edge)
    }

    pub fn rows(&self) -> u32 {
        self.height_px.div_ceil(self.edge)
    }

    /// 非退化瓦片数量
    pub fn len(&self) -> usize {
        self.cols() as usize * self.rows() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 输出页面的逻辑尺寸
    pub fn page_size(&self) -> PageSize {
        PageSize::new(
            self.width_px as f64 / self.scale,
            self.height_px as f64 / self.scale,
        )
    }

    /// 行优先遍历（外层 y，内层 x）
    pub fn tiles(&self) -> impl Iterator<Item = Tile> + '_ {
        let cols = self.cols();
        (0..self.rows())
            .flat_map(move |row| (0..cols).map(move |col| (col, row)))
            .filter_map(move |(col, row)| self.tile_at(col, row))
            .enumerate()
            .map(|(index, tile)| Tile { index, ..tile })
    }

    fn tile_at(&self, col: u32, row: u32) -> Option<Tile> {
        let x = col.checked_mul(self.edge)?;
        let y = row.checked_mul(self.edge)?;
        let right = x.saturating_add(self.edge).min(self.width_px);
        let bottom = y.saturating_add(self.edge).min(self.height_px);

        let pixels = PixelRect {
            x,
            y,
            width: right.checked_sub(x)?,
            height: bottom.checked_sub(y)?,
        };
        if pixels.is_empty() {
            return None;
        }

        let logical = LogicalRect {
            x0: x as f64 / self.scale,
            y0: y as f64 / self.scale,
            x1: right as f64 / self.scale,
            y1: bottom as f64 / self.scale,
        };

        Some(Tile {
            index: 0,
            col,
            row,
            pixels,
            logical,
        })
    }
}

// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::engines::traits::RenderError;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, Rgb, RgbImage};

/// 图像编码格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    /// 质量 1-100
    Jpeg(u8),
}

/// 将 RGB 像素编码为 PNG 或 JPEG 字节
pub fn encode_image(image: &RgbImage, format: ImageFormat) -> Result<Vec<u8>, RenderError> {
    let mut out = Vec::new();

    match format {
        ImageFormat::Png => {
            PngEncoder::new(&mut out).write_image(
                image.as_raw(),
                image.width(),
                image.height(),
                ExtendedColorType::Rgb8,
            )?;
        }
        ImageFormat::Jpeg(quality) => {
            JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100)).write_image(
                image.as_raw(),
                image.width(),
                image.height(),
                ExtendedColorType::Rgb8,
            )?;
        }
    }

    Ok(out)
}

/// 将图像裁剪或补白到精确尺寸
///
/// 外部渲染器在边界取整上可能多出或缺少一个像素。
pub fn fit_exact(image: RgbImage, width: u32, height: u32) -> RgbImage {
    if image.width() == width && image.height() == height {
        return image;
    }

    let mut canvas = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
    image::imageops::replace(&mut canvas, &image, 0, 0);
    canvas
}

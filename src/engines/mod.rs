// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 引擎模块
///
/// 该模块包含渲染与文字识别的协作方实现：
/// - poppler 渲染器：调用 pdfinfo/pdftoppm 按区域光栅化
/// - 合成渲染器：读取 JSON 页面清单，生成确定的像素
/// - tesseract 引擎：外部进程文字识别
/// - 编码器与流式 PDF 写入器
pub mod encoder;
pub mod pdf_writer;
pub mod poppler_engine;
pub mod synthetic_engine;
pub mod tesseract_engine;
pub mod traits;

use crate::config::settings::{RenderBackend, RenderingSettings};
use std::sync::Arc;
use traits::{OcrEngine, Renderer};

/// 根据配置选择渲染器
pub fn renderer_from_settings(settings: &RenderingSettings) -> Arc<dyn Renderer> {
    match settings.backend {
        RenderBackend::Poppler => Arc::new(poppler_engine::PopplerRenderer::new(
            settings.pdfinfo_bin.clone(),
            settings.pdftoppm_bin.clone(),
        )),
        RenderBackend::Synthetic => Arc::new(synthetic_engine::SyntheticRenderer::new()),
    }
}

/// 根据配置创建文字识别引擎
pub fn ocr_from_settings(settings: &RenderingSettings) -> Arc<dyn OcrEngine> {
    Arc::new(tesseract_engine::TesseractEngine::new(settings.ocr_bin.clone()))
}

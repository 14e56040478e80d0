// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{self, Write};
use thiserror::Error;

const CATALOG_ID: usize = 1;
const PAGES_ID: usize = 2;
const FONT_ID: usize = 3;
const FIRST_FREE_ID: usize = 4;

/// 文本层字号（点）
const TEXT_SIZE: f64 = 10.0;
const TEXT_LEADING: f64 = 12.0;

/// PDF 写入错误
#[derive(Error, Debug)]
pub enum PdfError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid writer state: {0}")]
    State(&'static str),
}

/// 页面上放置的图像数据
#[derive(Debug, Clone, Copy)]
pub enum PdfImage<'a> {
    /// 完整的 JPEG 文件，以 DCTDecode 嵌入
    Jpeg {
        data: &'a [u8],
        width: u32,
        height: u32,
    },
    /// 原始 RGB8 像素，以 FlateDecode 嵌入
    Rgb {
        pixels: &'a [u8],
        width: u32,
        height: u32,
    },
}

/// 放置矩形（点，PDF 坐标系：原点在左下角）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacementRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

struct CountingWriter<W: Write> {
    inner: W,
    written: u64,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct OpenPage {
    width: f64,
    height: f64,
    images: Vec<usize>,
    content: Vec<u8>,
}

/// 流式 PDF 写入器
///
/// 图像对象在放置时立即写出，内存中只保留当前页的内容流；
/// 交叉引用表在 [`PdfWriter::finish`] 时写入。
pub struct PdfWriter<W: Write> {
    out: CountingWriter<W>,
    offsets: Vec<u64>,
    page_ids: Vec<usize>,
    current: Option<OpenPage>,
}

impl<W: Write> PdfWriter<W> {
    pub fn new(inner: W) -> Result<Self, PdfError> {
        let mut writer = Self {
            out: CountingWriter { inner, written: 0 },
            offsets: vec![0; FIRST_FREE_ID],
            page_ids: Vec::new(),
            current: None,
        };

        writer.out.write_all(b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n")?;

        writer.begin_object(FONT_ID)?;
        writer.out.write_all(
            b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>\nendobj\n",
        )?;

        Ok(writer)
    }

    /// 已写出的页数
    pub fn page_count(&self) -> usize {
        self.page_ids.len()
    }

    pub fn begin_page(&mut self, width: f64, height: f64) -> Result<(), PdfError> {
        if self.current.is_some() {
            return Err(PdfError::State("begin_page while a page is open"));
        }
        self.current = Some(OpenPage {
            width,
            height,
            images: Vec::new(),
            content: Vec::new(),
        });
        Ok(())
    }

    /// 写出图像对象并把它放到当前页的指定矩形
    pub fn place_image(&mut self, rect: PlacementRect, image: PdfImage<'_>) -> Result<(), PdfError> {
        if self.current.is_none() {
            return Err(PdfError::State("place_image without an open page"));
        }

        let id = self.alloc();
        self.begin_object(id)?;
        match image {
            PdfImage::Jpeg {
                data,
                width,
                height,
            } => {
                write!(
                    self.out,
                    "<< /Type /XObject /Subtype /Image /Width {} /Height {} /ColorSpace /DeviceRGB /BitsPerComponent 8 /Filter /DCTDecode /Length {} >>\nstream\n",
                    width,
                    height,
                    data.len()
                )?;
                self.out.write_all(data)?;
            }
            PdfImage::Rgb {
                pixels,
                width,
                height,
            } => {
                let data = deflate(pixels)?;
                write!(
                    self.out,
                    "<< /Type /XObject /Subtype /Image /Width {} /Height {} /ColorSpace /DeviceRGB /BitsPerComponent 8 /Filter /FlateDecode /Length {} >>\nstream\n",
                    width,
                    height,
                    data.len()
                )?;
                self.out.write_all(&data)?;
            }
        }
        self.out.write_all(b"\nendstream\nendobj\n")?;

        let page = self
            .current
            .as_mut()
            .ok_or(PdfError::State("page closed while placing an image"))?;
        page.images.push(id);
        writeln!(
            page.content,
            "q {} 0 0 {} {} {} cm /Im{} Do Q",
            num(rect.width),
            num(rect.height),
            num(rect.x),
            num(rect.y),
            id
        )?;

        Ok(())
    }

    /// 在当前页加入不可见文本层（渲染模式 3）
    pub fn add_invisible_text(&mut self, text: &str) -> Result<(), PdfError> {
        let page = self
            .current
            .as_mut()
            .ok_or(PdfError::State("add_invisible_text without an open page"))?;

        let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
        if lines.is_empty() {
            return Ok(());
        }

        writeln!(
            page.content,
            "BT 3 Tr /F1 {} Tf {} TL 0 {} Td",
            num(TEXT_SIZE),
            num(TEXT_LEADING),
            num((page.height - TEXT_SIZE).max(0.0))
        )?;
        for (i, line) in lines.iter().enumerate() {
            if i > 0 {
                page.content.extend_from_slice(b"T* ");
            }
            page.content.push(b'(');
            page.content.extend(escape_text(line));
            page.content.extend_from_slice(b") Tj\n");
        }
        page.content.extend_from_slice(b"ET\n");

        Ok(())
    }

    pub fn end_page(&mut self) -> Result<(), PdfError> {
        let page = self
            .current
            .take()
            .ok_or(PdfError::State("end_page without an open page"))?;

        let content_id = self.alloc();
        let content = deflate(&page.content)?;
        self.begin_object(content_id)?;
        write!(
            self.out,
            "<< /Filter /FlateDecode /Length {} >>\nstream\n",
            content.len()
        )?;
        self.out.write_all(&content)?;
        self.out.write_all(b"\nendstream\nendobj\n")?;

        let page_id = self.alloc();
        self.begin_object(page_id)?;
        let xobjects: String = page
            .images
            .iter()
            .map(|id| format!("/Im{} {} 0 R ", id, id))
            .collect();
        write!(
            self.out,
            "<< /Type /Page /Parent {} 0 R /MediaBox [0 0 {} {}] /Resources << /XObject << {}>> /Font << /F1 {} 0 R >> >> /Contents {} 0 R >>\nendobj\n",
            PAGES_ID,
            num(page.width),
            num(page.height),
            xobjects,
            FONT_ID,
            content_id
        )?;
        self.page_ids.push(page_id);

        Ok(())
    }

    /// 写出页树、目录与交叉引用表
    ///
    /// # 返回值
    ///
    /// 写出的总字节数与底层写入器
    pub fn finish(mut self) -> Result<(u64, W), PdfError> {
        if self.current.is_some() {
            return Err(PdfError::State("finish while a page is open"));
        }

        self.begin_object(PAGES_ID)?;
        let kids: Vec<String> = self
            .page_ids
            .iter()
            .map(|id| format!("{} 0 R", id))
            .collect();
        write!(
            self.out,
            "<< /Type /Pages /Kids [{}] /Count {} >>\nendobj\n",
            kids.join(" "),
            self.page_ids.len()
        )?;

        self.begin_object(CATALOG_ID)?;
        write!(
            self.out,
            "<< /Type /Catalog /Pages {} 0 R >>\nendobj\n",
            PAGES_ID
        )?;

        let xref_offset = self.out.written;
        write!(self.out, "xref\n0 {}\n", self.offsets.len())?;
        self.out.write_all(b"0000000000 65535 f \n")?;
        for offset in &self.offsets[1..] {
            write!(self.out, "{:010} 00000 n \n", offset)?;
        }
        write!(
            self.out,
            "trailer\n<< /Size {} /Root {} 0 R >>\nstartxref\n{}\n%%EOF\n",
            self.offsets.len(),
            CATALOG_ID,
            xref_offset
        )?;
        self.out.flush()?;

        Ok((self.out.written, self.out.inner))
    }

    fn alloc(&mut self) -> usize {
        self.offsets.push(0);
        self.offsets.len() - 1
    }

    fn begin_object(&mut self, id: usize) -> Result<(), PdfError> {
        self.offsets[id] = self.out.written;
        write!(self.out, "{} 0 obj\n", id)?;
        Ok(())
    }
}

fn deflate(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// 数字格式：最多四位小数，去掉多余的零
fn num(value: f64) -> String {
    let formatted = format!("{:.4}", value);
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() || trimmed == "-0" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// 字符串转义；WinAnsi 之外的字符替换为 `?`
fn escape_text(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\\' | '(' | ')' => {
                out.push(b'\\');
                out.push(ch as u8);
            }
            c if (c as u32) < 0x20 => out.push(b' '),
            c if (c as u32) <= 0xFF => out.push(c as u32 as u8),
            _ => out.push(b'?'),
        }
    }
    out
}

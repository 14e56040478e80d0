// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::engines::traits::{OcrEngine, OcrError};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// 调用 `tesseract <image> stdout -l <lang>` 的文字识别引擎
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    binary: String,
}

impl TesseractEngine {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for TesseractEngine {
    fn default() -> Self {
        Self::new("tesseract")
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    async fn recognize(&self, image: &Path, language: &str) -> Result<String, OcrError> {
        let output = Command::new(&self.binary)
            .arg(image)
            .arg("stdout")
            .args(["-l", language])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| OcrError::Launch {
                tool: self.binary.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(OcrError::Failed {
                tool: self.binary.clone(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn name(&self) -> &'static str {
        "tesseract"
    }
}

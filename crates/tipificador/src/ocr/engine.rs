//! OCR engine seam and the tesseract CLI backend.

use std::path::Path;
use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{Result, TipificadorError};

/// Narrow interface over the OCR engine: one rendered image in, text out.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Recognise the text of a rendered page image.
    async fn recognize(&self, image: &Path, lang: &str, psm: &str) -> Result<String>;
}

/// OCR backend shelling out to the `tesseract` binary.
///
/// Runs `tesseract <image> stdout -l <lang> --psm <psm>`. When the primary
/// language pack is missing or broken the invocation fails; a single retry
/// with `eng` keeps degraded hosts limping along instead of failing the whole
/// page.
pub struct TesseractCli;

impl TesseractCli {
    pub fn new() -> Self {
        Self
    }

    async fn run(&self, image: &Path, lang: &str, psm: &str) -> Result<Output> {
        Command::new("tesseract")
            .arg(image)
            .arg("stdout")
            .args(["-l", lang, "--psm", psm])
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    TipificadorError::ocr("tesseract not found (install tesseract-ocr)")
                } else {
                    TipificadorError::Io(e)
                }
            })
    }
}

impl Default for TesseractCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OcrEngine for TesseractCli {
    async fn recognize(&self, image: &Path, lang: &str, psm: &str) -> Result<String> {
        let output = self.run(image, lang, psm).await?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if lang != "eng" {
            tracing::warn!(lang, "tesseract failed ({}), retrying with eng", stderr.trim());
            let fallback = self.run(image, "eng", psm).await?;
            if fallback.status.success() {
                return Ok(String::from_utf8_lossy(&fallback.stdout).into_owned());
            }
        }

        Err(TipificadorError::ocr(format!("tesseract failed: {stderr}")))
    }
}

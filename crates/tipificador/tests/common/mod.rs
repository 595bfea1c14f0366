//! Shared test support: mock PDF and OCR engines over plain text files.
//!
//! Tests model a "PDF" as a UTF-8 file whose pages are separated by form
//! feeds. Each page holds up to three sections separated by the record
//! separator: embedded text, header-OCR text and full-OCR text. The mock PDF
//! engine renders pages into `OCR:`-prefixed pseudo-PNGs that the mock OCR
//! engine reads back, so the whole tiered extraction pipeline runs without
//! pdfium or tesseract installed.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};

use async_trait::async_trait;
use tipificador::api::AppState;
use tipificador::core::config::ServiceConfig;
use tipificador::error::{Result, TipificadorError};
use tipificador::ocr::OcrEngine;
use tipificador::pdf::{PageBlocks, PdfEngine, RenderSpec, TextBlock};

pub const PAGE_SEP: char = '\u{000C}';
pub const PART_SEP: char = '\u{001E}';

/// One page of a mock document.
#[derive(Debug, Clone, Default)]
pub struct MockPage {
    pub embedded: String,
    pub header_ocr: String,
    pub full_ocr: String,
}

impl MockPage {
    /// A page whose embedded text is all the pipeline ever needs.
    pub fn embedded(text: &str) -> Self {
        Self {
            embedded: text.to_string(),
            ..Default::default()
        }
    }

    /// A scanned page: no embedded text, only OCR output.
    pub fn scanned(header_ocr: &str, full_ocr: &str) -> Self {
        Self {
            embedded: String::new(),
            header_ocr: header_ocr.to_string(),
            full_ocr: full_ocr.to_string(),
        }
    }
}

/// Serialise mock pages into the on-disk format.
pub fn mock_pdf_string(pages: &[MockPage]) -> String {
    pages
        .iter()
        .map(|page| {
            format!(
                "{}{PART_SEP}{}{PART_SEP}{}",
                page.embedded, page.header_ocr, page.full_ocr
            )
        })
        .collect::<Vec<_>>()
        .join(&PAGE_SEP.to_string())
}

pub fn write_mock_pdf(path: &Path, pages: &[MockPage]) {
    std::fs::write(path, mock_pdf_string(pages)).expect("mock PDF should be writable");
}

fn parse_mock_pdf(path: &Path) -> Result<Vec<MockPage>> {
    let content = std::fs::read_to_string(path)
        .map_err(|_| TipificadorError::corrupt_pdf(format!("{}", path.display())))?;
    Ok(content
        .split(PAGE_SEP)
        .map(|page| {
            let mut parts = page.split(PART_SEP);
            MockPage {
                embedded: parts.next().unwrap_or("").to_string(),
                header_ocr: parts.next().unwrap_or("").to_string(),
                full_ocr: parts.next().unwrap_or("").to_string(),
            }
        })
        .collect())
}

/// Blocks mock engine calls until released; used to hold a batch package
/// mid-extraction while the test flips the cancel flag.
pub struct Gate {
    released: Mutex<bool>,
    condvar: Condvar,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            released: Mutex::new(false),
            condvar: Condvar::new(),
        })
    }

    pub fn release(&self) {
        let mut released = self.released.lock().expect("gate lock");
        *released = true;
        self.condvar.notify_all();
    }

    fn wait(&self) {
        let mut released = self.released.lock().expect("gate lock");
        while !*released {
            released = self.condvar.wait(released).expect("gate wait");
        }
    }
}

/// Mock PDF engine reading the text-file format above.
#[derive(Default)]
pub struct MockPdfEngine {
    /// When set, `page_text` blocks on the gate for pages whose embedded
    /// text contains the needle.
    pub gate: Option<(String, Arc<Gate>)>,
}

impl MockPdfEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gate(needle: &str, gate: Arc<Gate>) -> Self {
        Self {
            gate: Some((needle.to_string(), gate)),
        }
    }
}

impl PdfEngine for MockPdfEngine {
    fn page_count(&self, path: &Path) -> Result<usize> {
        Ok(parse_mock_pdf(path)?.len())
    }

    fn render_png(&self, path: &Path, page: usize, spec: RenderSpec) -> Result<Vec<u8>> {
        let pages = parse_mock_pdf(path)?;
        let page = pages
            .get(page)
            .ok_or_else(|| TipificadorError::not_found("page out of range"))?;
        let bytes = match spec {
            RenderSpec::Width(_) => b"PNG-PREVIEW".to_vec(),
            RenderSpec::HeaderBand { .. } => format!("OCR:{}", page.header_ocr).into_bytes(),
            RenderSpec::Dpi(_) => format!("OCR:{}", page.full_ocr).into_bytes(),
        };
        Ok(bytes)
    }

    fn page_text(&self, path: &Path, page: usize) -> Result<String> {
        let pages = parse_mock_pdf(path)?;
        let page = pages
            .get(page)
            .ok_or_else(|| TipificadorError::not_found("page out of range"))?;
        if let Some((needle, gate)) = &self.gate
            && !needle.is_empty()
            && page.embedded.contains(needle)
        {
            gate.wait();
        }
        Ok(page.embedded.clone())
    }

    fn text_blocks(&self, path: &Path, page: usize) -> Result<PageBlocks> {
        let text = self.page_text(path, page)?;
        let blocks = text
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| TextBlock {
                x: 10.0,
                y: (i as f32 + 1.0) * 20.0,
                text: line.to_string(),
            })
            .collect();
        Ok(PageBlocks {
            width: 600.0,
            height: 800.0,
            blocks,
        })
    }

    fn concatenate(&self, pages: &[(PathBuf, usize)]) -> Result<Vec<u8>> {
        let mut out = String::from("%PDF-MOCK");
        for (path, local) in pages {
            let parsed = parse_mock_pdf(path)?;
            let page = parsed
                .get(*local)
                .ok_or_else(|| TipificadorError::not_found("page out of range"))?;
            out.push_str("\n--PAGE--\n");
            out.push_str(&page.embedded);
        }
        Ok(out.into_bytes())
    }
}

/// Mock OCR engine decoding the pseudo-PNGs produced by [`MockPdfEngine`].
pub struct MockOcrEngine;

#[async_trait]
impl OcrEngine for MockOcrEngine {
    async fn recognize(&self, image: &Path, _lang: &str, _psm: &str) -> Result<String> {
        let bytes = tokio::fs::read(image).await?;
        let content = String::from_utf8_lossy(&bytes);
        Ok(content
            .strip_prefix("OCR:")
            .unwrap_or_default()
            .to_string())
    }
}

/// Service configuration tuned for the mock pipeline.
pub fn test_config(root: &Path) -> ServiceConfig {
    ServiceConfig {
        job_root: root.to_path_buf(),
        ocr_min_text_len: 10,
        ocr_workers: 2,
        ..Default::default()
    }
}

/// Full application state over the mock engines.
pub fn test_state(root: &Path) -> AppState {
    test_state_with_engine(root, MockPdfEngine::new())
}

pub fn test_state_with_engine(root: &Path, pdf: MockPdfEngine) -> AppState {
    AppState::new(
        test_config(root),
        Arc::new(pdf),
        Arc::new(MockOcrEngine),
        None,
    )
    .expect("state should initialise")
}

/// Split a mock concatenated PDF back into page texts.
pub fn mock_pdf_pages(bytes: &[u8]) -> Vec<String> {
    let content = String::from_utf8_lossy(bytes);
    content
        .split("\n--PAGE--\n")
        .skip(1)
        .map(str::to_string)
        .collect()
}

/// Names of the entries inside a zip archive, in order.
pub fn zip_entry_names(bytes: &[u8]) -> Vec<String> {
    let mut archive =
        zip::ZipArchive::new(std::io::Cursor::new(bytes.to_vec())).expect("zip should parse");
    (0..archive.len())
        .map(|i| archive.by_index(i).expect("zip entry").name().to_string())
        .collect()
}

/// Contents of one entry inside a zip archive.
pub fn zip_entry_bytes(bytes: &[u8], name: &str) -> Vec<u8> {
    use std::io::Read;
    let mut archive =
        zip::ZipArchive::new(std::io::Cursor::new(bytes.to_vec())).expect("zip should parse");
    let mut entry = archive.by_name(name).expect("zip entry should exist");
    let mut content = Vec::new();
    entry.read_to_end(&mut content).expect("zip entry readable");
    content
}

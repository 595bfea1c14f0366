//! PDF engine seam.
//!
//! Everything the service needs from a PDF library goes through the
//! [`PdfEngine`] trait: page counting, rasterisation, embedded text (flat and
//! with coordinates) and page concatenation. The production implementation
//! lives in [`pdfium`]; tests substitute their own.
//!
//! All methods are synchronous and CPU-bound; async callers wrap them in
//! `tokio::task::spawn_blocking`.

pub mod pdfium;

use std::path::{Path, PathBuf};

use crate::error::Result;

pub use pdfium::PdfiumEngine;

/// How a page should be rasterised.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RenderSpec {
    /// Scale the page so its width matches the given pixel width.
    Width(u32),
    /// Render the full page at the given DPI.
    Dpi(u32),
    /// Render only the top `ratio` of the page at the given DPI.
    HeaderBand { ratio: f32, dpi: u32 },
}

/// A text run with its position on the page.
///
/// Coordinates use a top-left origin in page points: `y` grows downwards, so
/// smaller `y` means closer to the top of the page.
#[derive(Debug, Clone, PartialEq)]
pub struct TextBlock {
    pub x: f32,
    pub y: f32,
    pub text: String,
}

/// All positioned text of a page plus the page geometry.
#[derive(Debug, Clone)]
pub struct PageBlocks {
    pub width: f32,
    pub height: f32,
    pub blocks: Vec<TextBlock>,
}

impl PageBlocks {
    /// Blocks whose top edge falls within the top `ratio` of the page.
    pub fn header_blocks(&self, ratio: f32) -> impl Iterator<Item = &TextBlock> {
        let limit = self.height * ratio;
        self.blocks.iter().filter(move |b| b.y <= limit)
    }
}

/// Narrow interface over the PDF library.
pub trait PdfEngine: Send + Sync {
    /// Number of pages in the document, or `CorruptPdf` when it cannot be
    /// opened.
    fn page_count(&self, path: &Path) -> Result<usize>;

    /// Rasterise one page to PNG bytes.
    fn render_png(&self, path: &Path, page: usize, spec: RenderSpec) -> Result<Vec<u8>>;

    /// Embedded text of one page, without positions.
    fn page_text(&self, path: &Path, page: usize) -> Result<String>;

    /// Embedded text of one page with block coordinates and page geometry.
    fn text_blocks(&self, path: &Path, page: usize) -> Result<PageBlocks>;

    /// Build a new PDF containing exactly the given `(source, local page)`
    /// sequence, in order, and serialise it.
    fn concatenate(&self, pages: &[(PathBuf, usize)]) -> Result<Vec<u8>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_blocks_filters_by_top_band() {
        let page = PageBlocks {
            width: 600.0,
            height: 800.0,
            blocks: vec![
                TextBlock { x: 10.0, y: 30.0, text: "top".into() },
                TextBlock { x: 10.0, y: 500.0, text: "bottom".into() },
            ],
        };
        let header: Vec<_> = page.header_blocks(0.4).map(|b| b.text.as_str()).collect();
        assert_eq!(header, vec!["top"]);
    }
}

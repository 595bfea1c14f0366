//! Pdfium-backed implementation of [`PdfEngine`].
//!
//! pdfium wraps a C++ library with thread-local state; the `thread_safe`
//! feature serialises access internally, and callers are expected to invoke
//! these methods from `spawn_blocking`.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::ImageFormat;
use indexmap::IndexMap;
use pdfium_render::prelude::*;

use super::{PageBlocks, PdfEngine, RenderSpec, TextBlock};
use crate::error::{Result, TipificadorError};

/// Points per inch in PDF user space.
const POINTS_PER_INCH: f32 = 72.0;

pub struct PdfiumEngine;

impl PdfiumEngine {
    pub fn new() -> Self {
        Self
    }

    /// Bind to a pdfium library next to the executable, falling back to the
    /// system library.
    fn pdfium(&self) -> Result<Pdfium> {
        Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library())
            .map(Pdfium::new)
            .map_err(|e| TipificadorError::pdf(format!("failed to bind pdfium: {e:?}")))
    }

    fn load<'a>(&self, pdfium: &'a Pdfium, path: &Path) -> Result<PdfDocument<'a>> {
        pdfium
            .load_pdf_from_file(path, None)
            .map_err(|e| TipificadorError::corrupt_pdf(format!("{}: {e:?}", path.display())))
    }

    fn page<'a>(&self, document: &PdfDocument<'a>, page: usize) -> Result<PdfPage<'a>> {
        document
            .pages()
            .get(page as u16)
            .map_err(|e| TipificadorError::not_found(format!("page {page} not found: {e:?}")))
    }

    fn encode_png(&self, image: image::DynamicImage) -> Result<Vec<u8>> {
        let mut buf = Cursor::new(Vec::new());
        image
            .write_to(&mut buf, ImageFormat::Png)
            .map_err(|e| TipificadorError::pdf(format!("PNG encoding failed: {e}")))?;
        Ok(buf.into_inner())
    }
}

impl Default for PdfiumEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfEngine for PdfiumEngine {
    fn page_count(&self, path: &Path) -> Result<usize> {
        let pdfium = self.pdfium()?;
        let document = self.load(&pdfium, path)?;
        Ok(document.pages().len() as usize)
    }

    fn render_png(&self, path: &Path, page: usize, spec: RenderSpec) -> Result<Vec<u8>> {
        let pdfium = self.pdfium()?;
        let document = self.load(&pdfium, path)?;
        let page = self.page(&document, page)?;
        let page_width = page.width().value;

        let target_width = match spec {
            RenderSpec::Width(width) => width,
            RenderSpec::Dpi(dpi) | RenderSpec::HeaderBand { dpi, .. } => {
                (page_width * dpi as f32 / POINTS_PER_INCH).round() as u32
            }
        };

        let config = PdfRenderConfig::new().set_target_width(target_width.max(1) as i32);
        let bitmap = page
            .render_with_config(&config)
            .map_err(|e| TipificadorError::pdf(format!("page render failed: {e:?}")))?;
        let mut image = bitmap.as_image();

        if let RenderSpec::HeaderBand { ratio, .. } = spec {
            let band = ((image.height() as f32) * ratio).round().max(1.0) as u32;
            image = image.crop_imm(0, 0, image.width(), band.min(image.height()));
        }

        self.encode_png(image)
    }

    fn page_text(&self, path: &Path, page: usize) -> Result<String> {
        let pdfium = self.pdfium()?;
        let document = self.load(&pdfium, path)?;
        let page = self.page(&document, page)?;
        let text = page
            .text()
            .map_err(|e| TipificadorError::pdf(format!("text extraction failed: {e:?}")))?;
        Ok(text.all())
    }

    fn text_blocks(&self, path: &Path, page: usize) -> Result<PageBlocks> {
        let pdfium = self.pdfium()?;
        let document = self.load(&pdfium, path)?;
        let page = self.page(&document, page)?;
        let width = page.width().value;
        let height = page.height().value;
        let text = page
            .text()
            .map_err(|e| TipificadorError::pdf(format!("text extraction failed: {e:?}")))?;

        let mut blocks = Vec::new();
        for segment in text.segments().iter() {
            let run = segment.text();
            if run.trim().is_empty() {
                continue;
            }
            let bounds = segment.bounds();
            // pdfium uses a bottom-left origin; flip to top-left so smaller y
            // means nearer the top of the page.
            blocks.push(TextBlock {
                x: bounds.left.value,
                y: height - bounds.top.value,
                text: run,
            });
        }

        Ok(PageBlocks { width, height, blocks })
    }

    fn concatenate(&self, pages: &[(PathBuf, usize)]) -> Result<Vec<u8>> {
        let pdfium = self.pdfium()?;
        let mut output = pdfium
            .create_new_pdf()
            .map_err(|e| TipificadorError::pdf(format!("failed to create output PDF: {e:?}")))?;

        // Source documents stay open for the whole copy; the same file often
        // contributes many pages.
        let mut sources: IndexMap<PathBuf, PdfDocument<'_>> = IndexMap::new();
        for (path, _) in pages {
            if !sources.contains_key(path) {
                let document = self.load(&pdfium, path)?;
                sources.insert(path.clone(), document);
            }
        }

        let mut destination = 0u16;
        for (path, local) in pages {
            let source = sources
                .get(path)
                .ok_or_else(|| TipificadorError::pdf("source document vanished".to_string()))?;
            output
                .pages_mut()
                .copy_page_from_document(source, *local as u16, destination)
                .map_err(|e| {
                    TipificadorError::pdf(format!(
                        "failed to copy page {local} of {}: {e:?}",
                        path.display()
                    ))
                })?;
            destination += 1;
        }

        output
            .save_to_bytes()
            .map_err(|e| TipificadorError::pdf(format!("failed to serialise output PDF: {e:?}")))
    }
}

//! Tiered per-page text extraction.
//!
//! Classification needs text for every page, and full-page OCR at 300 DPI is
//! by far the most expensive way to get it. The extractor therefore works in
//! tiers, short-circuiting as soon as the classifier can make a call:
//!
//! 1. embedded text, when long enough to be trusted;
//! 2. OCR of the page's header band only, where the classifying titles live;
//! 3. full-page OCR.
//!
//! Every tier caches its output under the job's cache directory, keyed by the
//! global page index, so retries and concurrent workers converge on the same
//! files instead of repeating work.

use std::path::PathBuf;
use std::sync::Arc;

use crate::classify::rules::classify_text;
use crate::core::config::ServiceConfig;
use crate::error::{Result, TipificadorError};
use crate::pdf::{PdfEngine, RenderSpec};
use crate::store::ScratchStore;
use crate::types::JobMeta;

use super::engine::OcrEngine;

/// Cooperative cancellation predicate, polled at tier boundaries.
pub type CancelFn = Arc<dyn Fn() -> bool + Send + Sync>;

fn check_cancel(cancel: Option<&CancelFn>) -> Result<()> {
    if let Some(cancel) = cancel
        && cancel()
    {
        return Err(TipificadorError::Cancelled);
    }
    Ok(())
}

/// Produces classification text and full-page OCR text for job pages.
#[derive(Clone)]
pub struct TextExtractor {
    config: Arc<ServiceConfig>,
    store: ScratchStore,
    pdf: Arc<dyn PdfEngine>,
    ocr: Arc<dyn OcrEngine>,
}

impl TextExtractor {
    pub fn new(
        config: Arc<ServiceConfig>,
        store: ScratchStore,
        pdf: Arc<dyn PdfEngine>,
        ocr: Arc<dyn OcrEngine>,
    ) -> Self {
        Self { config, store, pdf, ocr }
    }

    /// Resolve a global page index into the owning source PDF.
    fn resolve(&self, meta: &JobMeta, job_id: &str, global: usize) -> Result<(PathBuf, usize)> {
        let (pdf_idx, local) = meta
            .resolve(global)
            .ok_or_else(|| TipificadorError::not_found("page out of range"))?;
        Ok((self.store.source_pdf_path(job_id, pdf_idx), local))
    }

    async fn render_to_cache(
        &self,
        source: PathBuf,
        local: usize,
        spec: RenderSpec,
        png_path: PathBuf,
    ) -> Result<()> {
        let pdf = Arc::clone(&self.pdf);
        let png = tokio::task::spawn_blocking(move || pdf.render_png(&source, local, spec))
            .await
            .map_err(|e| TipificadorError::internal(format!("render task panicked: {e}")))??;
        tokio::fs::write(&png_path, &png).await?;
        Ok(())
    }

    /// Embedded text of one page, cached as `text_<g>.txt`.
    pub async fn embedded_text(&self, job_id: &str, global: usize) -> Result<String> {
        let meta = self.store.read_job_meta(job_id)?;
        self.embedded_text_with_meta(&meta, job_id, global).await
    }

    async fn embedded_text_with_meta(
        &self,
        meta: &JobMeta,
        job_id: &str,
        global: usize,
    ) -> Result<String> {
        let cache = self.store.cache_path(job_id, &format!("text_{global}.txt"));
        if let Ok(text) = tokio::fs::read_to_string(&cache).await {
            return Ok(text);
        }

        let (source, local) = self.resolve(meta, job_id, global)?;
        let pdf = Arc::clone(&self.pdf);
        let text = tokio::task::spawn_blocking(move || pdf.page_text(&source, local))
            .await
            .map_err(|e| TipificadorError::internal(format!("text task panicked: {e}")))??;
        tokio::fs::write(&cache, &text).await?;
        Ok(text)
    }

    /// One OCR tier: render (full page or header band), recognise, cache.
    async fn ocr_tier(
        &self,
        meta: &JobMeta,
        job_id: &str,
        global: usize,
        header: bool,
    ) -> Result<String> {
        let suffix = if header { "_head" } else { "" };
        let txt_path = self
            .store
            .cache_path(job_id, &format!("ocr_{global}{suffix}.txt"));
        if let Ok(text) = tokio::fs::read_to_string(&txt_path).await {
            return Ok(text);
        }

        if !self.config.ocr_enabled {
            return Err(TipificadorError::OcrDisabled);
        }

        let (source, local) = self.resolve(meta, job_id, global)?;
        let spec = if header {
            RenderSpec::HeaderBand {
                ratio: self.config.ocr_header_ratio,
                dpi: self.config.ocr_header_dpi.min(self.config.ocr_dpi),
            }
        } else {
            RenderSpec::Dpi(self.config.ocr_dpi)
        };
        let png_path = self
            .store
            .cache_path(job_id, &format!("ocr_{global}{suffix}.png"));
        self.render_to_cache(source, local, spec, png_path.clone())
            .await?;

        let text = self
            .ocr
            .recognize(&png_path, &self.config.ocr_lang, &self.config.ocr_psm)
            .await?;
        tokio::fs::write(&txt_path, &text).await?;

        if !self.config.ocr_keep_images {
            let _ = tokio::fs::remove_file(&png_path).await;
        }
        Ok(text)
    }

    /// Full-page OCR text for the `ocr.txt` endpoint.
    ///
    /// `refresh` drops the cached text (and any retained image) first.
    pub async fn full_text(&self, job_id: &str, global: usize, refresh: bool) -> Result<String> {
        let meta = self.store.read_job_meta(job_id)?;
        if global >= meta.total_pages {
            return Err(TipificadorError::not_found("page out of range"));
        }
        if !self.config.ocr_enabled {
            return Err(TipificadorError::OcrDisabled);
        }
        if refresh {
            for name in [format!("ocr_{global}.txt"), format!("ocr_{global}.png")] {
                let _ = tokio::fs::remove_file(self.store.cache_path(job_id, &name)).await;
            }
        }
        self.ocr_tier(&meta, job_id, global, false).await
    }

    /// Text rich enough for classification, doing the least work possible.
    ///
    /// With OCR disabled the embedded text is returned as-is, whatever its
    /// quality; the auto-classify surface rejects requests upfront in that
    /// case, so this path only matters for direct library use.
    pub async fn text_for_classification(
        &self,
        job_id: &str,
        global: usize,
        cancel: Option<&CancelFn>,
    ) -> Result<String> {
        let meta = self.store.read_job_meta(job_id)?;

        check_cancel(cancel)?;
        let embedded = self.embedded_text_with_meta(&meta, job_id, global).await?;
        let useful = embedded.trim().len() >= self.config.ocr_min_text_len;

        if useful && classify_text(&embedded, false).is_some() {
            return Ok(embedded);
        }

        check_cancel(cancel)?;
        match self.ocr_tier(&meta, job_id, global, true).await {
            Ok(header) => {
                if classify_text(&header, false).is_some() {
                    return Ok(header);
                }
                if useful {
                    // No strong rule anywhere; long embedded text is still the
                    // more faithful representation.
                    return Ok(embedded);
                }
                check_cancel(cancel)?;
                self.ocr_tier(&meta, job_id, global, false).await
            }
            Err(TipificadorError::OcrDisabled) => Ok(embedded),
            Err(err) => Err(err),
        }
    }
}

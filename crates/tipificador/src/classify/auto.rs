//! Automatic whole-job classification.
//!
//! Two passes over the per-page texts plus a propagation step:
//!
//! 1. strong pass: rules only, no table heuristic; these are the anchors;
//! 2. weak pass: pages without a strong match retry with the CRC table
//!    heuristic enabled, but only inside source PDFs that anchored a strong
//!    CRC page; anything still unmatched defaults to HEV;
//! 3. propagation: a source PDF whose strong anchors name exactly one of
//!    {FEV, CRC, PDE} drags its non-anchored pages to that category.
//!
//! Propagation is what makes mixed-quality scans workable: one clean title
//! page classifies its whole source document.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use tokio::sync::Semaphore;

use crate::core::config::ServiceConfig;
use crate::error::{Result, TipificadorError};
use crate::ocr::extractor::{CancelFn, TextExtractor};
use crate::store::ScratchStore;
use crate::types::Category;

use super::rules::classify_text;

/// Classification result for every page of a job, keyed by the string form of
/// the global page index, in page order.
pub type AutoClassification = IndexMap<String, Category>;

#[derive(Clone)]
pub struct AutoClassifier {
    config: Arc<ServiceConfig>,
    store: ScratchStore,
    extractor: TextExtractor,
}

impl AutoClassifier {
    pub fn new(config: Arc<ServiceConfig>, store: ScratchStore, extractor: TextExtractor) -> Self {
        Self { config, store, extractor }
    }

    /// Classify every page of a job.
    ///
    /// Without a cancel predicate, pages run on a bounded worker pool; the
    /// on-disk cache deduplicates work between workers. With one (batch
    /// mode), pages run serially so the predicate is honoured page by page,
    /// since the batch level already provides the parallelism.
    pub async fn classify_job(
        &self,
        job_id: &str,
        cancel: Option<CancelFn>,
    ) -> Result<AutoClassification> {
        if !self.config.ocr_enabled {
            return Err(TipificadorError::OcrDisabled);
        }
        let meta = self.store.read_job_meta(job_id)?;
        let total = meta.total_pages;

        let texts = match &cancel {
            Some(cancel) => {
                let mut texts = HashMap::with_capacity(total);
                for global in 0..total {
                    let text = self
                        .extractor
                        .text_for_classification(job_id, global, Some(cancel))
                        .await?;
                    texts.insert(global, text);
                }
                // One more poll after the page loop: a cancel that landed
                // while the last page was in flight still wins before the
                // job is classified and assembled.
                if cancel() {
                    return Err(TipificadorError::Cancelled);
                }
                texts
            }
            None => self.extract_parallel(job_id, total).await?,
        };

        // Pass 1: strong rules only.
        let strong: HashMap<usize, Option<Category>> = (0..total)
            .map(|g| (g, classify_text(texts.get(&g).map_or("", |t| t.as_str()), false)))
            .collect();

        let per_pdf = meta.pages_by_pdf();
        let crc_pdfs: HashMap<usize, bool> = per_pdf
            .iter()
            .map(|(pdf_idx, pages)| {
                let has_crc = pages.iter().any(|g| strong[g] == Some(Category::CRC));
                (*pdf_idx, has_crc)
            })
            .collect();

        // Pass 2: table heuristic where anchored, HEV as the default.
        let mut classifications: AutoClassification = IndexMap::with_capacity(total);
        for global in 0..total {
            let category = match strong[&global] {
                Some(category) => category,
                None => {
                    let pdf_idx = meta.page_map[global].0;
                    let allow_crc = crc_pdfs.get(&pdf_idx).copied().unwrap_or(false);
                    classify_text(texts.get(&global).map_or("", |t| t.as_str()), allow_crc)
                        .unwrap_or(Category::HEV)
                }
            };
            classifications.insert(global.to_string(), category);
        }

        // Propagation, on strong anchors only.
        for pages in per_pdf.values() {
            let mut anchors: Vec<Category> = pages
                .iter()
                .filter_map(|g| strong[g])
                .filter(|c| matches!(c, Category::FEV | Category::CRC | Category::PDE))
                .collect();
            anchors.sort();
            anchors.dedup();
            if anchors.len() == 1 {
                let chosen = anchors[0];
                for global in pages {
                    if strong[global].is_none() {
                        classifications.insert(global.to_string(), chosen);
                    }
                }
            }
        }

        Ok(classifications)
    }

    async fn extract_parallel(&self, job_id: &str, total: usize) -> Result<HashMap<usize, String>> {
        let semaphore = Arc::new(Semaphore::new(self.config.ocr_workers.max(1)));
        let mut handles = Vec::with_capacity(total);
        for global in 0..total {
            let semaphore = Arc::clone(&semaphore);
            let extractor = self.extractor.clone();
            let job_id = job_id.to_string();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|_| TipificadorError::internal("worker pool closed"))?;
                let text = extractor
                    .text_for_classification(&job_id, global, None)
                    .await?;
                Ok::<_, TipificadorError>((global, text))
            }));
        }

        let mut texts = HashMap::with_capacity(total);
        for handle in handles {
            let (global, text) = handle
                .await
                .map_err(|e| TipificadorError::internal(format!("page worker panicked: {e}")))??;
            texts.insert(global, text);
        }
        Ok(texts)
    }
}

//! Assembly of per-category PDFs and the delivery archive.
//!
//! Pages keep the order in which the caller's classification map listed them,
//! with one exception: HEV bundles are sorted by the `FECHA DE CREACION` date
//! printed on each page, so the clinical history reads chronologically no
//! matter how the scans were uploaded. Pages without a parseable date go
//! last, in their original order.

use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use zip::CompressionMethod;
use zip::write::{SimpleFileOptions, ZipWriter};

use crate::classify::rules::normalize;
use crate::error::{Result, TipificadorError};
use crate::pdf::PdfEngine;
use crate::store::ScratchStore;
use crate::types::{Category, Classifications, JobMeta};

static FECHA_CREACION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"FECHA DE CREACION\s*[:\-]?\s*(\d{1,2}/\d{1,2}/\d{4})")
        .expect("creation date regex compiles")
});

/// Group classified pages by category, in the caller's insertion order.
///
/// Non-numeric keys, out-of-range indices and explicit nulls are skipped, not
/// rejected; the front-end sends the whole page grid including unclassified
/// entries.
pub fn pages_by_category(
    classifications: &Classifications,
    total_pages: usize,
) -> IndexMap<Category, Vec<usize>> {
    let mut grouped: IndexMap<Category, Vec<usize>> =
        Category::ALL.iter().map(|c| (*c, Vec::new())).collect();
    for (key, value) in classifications {
        let Ok(index) = key.parse::<usize>() else {
            continue;
        };
        if index >= total_pages {
            continue;
        }
        if let Some(category) = value {
            grouped[category].push(index);
        }
    }
    grouped
}

/// Builds category PDFs and zips them for delivery.
#[derive(Clone)]
pub struct Assembler {
    store: ScratchStore,
    pdf: Arc<dyn PdfEngine>,
}

impl Assembler {
    pub fn new(store: ScratchStore, pdf: Arc<dyn PdfEngine>) -> Self {
        Self { store, pdf }
    }

    /// Date a page carries in its cached text, if any.
    ///
    /// Reads whichever text the extraction stage cached for the page, in
    /// decreasing order of fidelity.
    fn page_date(&self, job_id: &str, global: usize) -> Option<NaiveDate> {
        for name in [
            format!("text_{global}.txt"),
            format!("ocr_{global}.txt"),
            format!("ocr_{global}_head.txt"),
        ] {
            let Ok(text) = std::fs::read_to_string(self.store.cache_path(job_id, &name)) else {
                continue;
            };
            if text.trim().is_empty() {
                continue;
            }
            if let Some(captures) = FECHA_CREACION_RE.captures(&normalize(&text)) {
                return NaiveDate::parse_from_str(&captures[1], "%d/%m/%Y").ok();
            }
            return None;
        }
        None
    }

    /// Sort HEV pages by creation date, undated last, stable within ties.
    fn sort_hev_pages(&self, job_id: &str, pages: &mut [usize]) {
        let keys: Vec<NaiveDate> = pages
            .iter()
            .map(|g| self.page_date(job_id, *g).unwrap_or(NaiveDate::MAX))
            .collect();
        let mut order: Vec<usize> = (0..pages.len()).collect();
        order.sort_by_key(|i| keys[*i]);
        let sorted: Vec<usize> = order.iter().map(|i| pages[*i]).collect();
        pages.copy_from_slice(&sorted);
    }

    /// Produce the named per-category PDFs for a job.
    pub async fn build(
        &self,
        job_id: &str,
        meta: &JobMeta,
        mut grouped: IndexMap<Category, Vec<usize>>,
        nit: &str,
        invoice: &str,
    ) -> Result<Vec<(String, Vec<u8>)>> {
        if let Some(hev_pages) = grouped.get_mut(&Category::HEV) {
            self.sort_hev_pages(job_id, hev_pages);
        }

        let mut outputs = Vec::new();
        for category in Category::ALL {
            let pages = &grouped[&category];
            if pages.is_empty() {
                continue;
            }

            let mut sources: Vec<(PathBuf, usize)> = Vec::with_capacity(pages.len());
            for &global in pages {
                let (pdf_idx, local) = meta
                    .resolve(global)
                    .ok_or_else(|| TipificadorError::not_found("page out of range"))?;
                sources.push((self.store.source_pdf_path(job_id, pdf_idx), local));
            }

            let pdf = Arc::clone(&self.pdf);
            let bytes = tokio::task::spawn_blocking(move || pdf.concatenate(&sources))
                .await
                .map_err(|e| TipificadorError::internal(format!("assembly task panicked: {e}")))??;

            outputs.push((format!("{category}_{nit}_{invoice}.pdf"), bytes));
        }
        Ok(outputs)
    }
}

/// Zip a set of named files with DEFLATE compression.
pub fn zip_files(files: &[(String, Vec<u8>)]) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, bytes) in files {
        writer
            .start_file(name.as_str(), options)
            .map_err(|e| TipificadorError::internal(format!("zip write failed: {e}")))?;
        writer.write_all(bytes)?;
    }
    let cursor = writer
        .finish()
        .map_err(|e| TipificadorError::internal(format!("zip finish failed: {e}")))?;
    Ok(cursor.into_inner())
}

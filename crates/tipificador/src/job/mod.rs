//! Job lifecycle: admission, page previews, processing.
//!
//! A job is one package's unit of work: an ordered set of source PDFs flattened
//! into a global page index. Admission builds the index; previews render lazily
//! through the cache; processing turns a classification map into the final
//! archive and normally retires the job.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::assemble::{Assembler, pages_by_category, zip_files};
use crate::core::config::{ServiceConfig, THUMB_WIDTH, VIEW_WIDTH};
use crate::error::{Result, TipificadorError};
use crate::invoice::InvoiceResolver;
use crate::pdf::{PdfEngine, RenderSpec};
use crate::store::ScratchStore;
use crate::types::{Category, JobMeta, ProcessRequest, unix_now};

#[derive(Clone)]
pub struct JobService {
    config: Arc<ServiceConfig>,
    store: ScratchStore,
    pdf: Arc<dyn PdfEngine>,
}

impl JobService {
    pub fn new(config: Arc<ServiceConfig>, store: ScratchStore, pdf: Arc<dyn PdfEngine>) -> Self {
        Self { config, store, pdf }
    }

    /// Remove expired jobs; piggybacked on admission.
    pub fn sweep(&self) {
        self.store
            .sweep_expired(Duration::from_secs(self.config.job_ttl_seconds));
    }

    /// Create the scratch skeleton for a job whose sources the caller will
    /// stream in as `pdfs/src_<i>.pdf`.
    pub fn begin(&self) -> Result<String> {
        self.store.mk_job()
    }

    /// Validate a claimed upload before any bytes are written.
    pub fn check_upload(&self, file_name: &str, content_type: Option<&str>) -> Result<()> {
        if !file_name.to_lowercase().ends_with(".pdf") {
            return Err(TipificadorError::bad_input(format!(
                "not a PDF file: {file_name}"
            )));
        }
        if let Some(ctype) = content_type {
            let ctype = ctype.to_lowercase();
            if !ctype.is_empty() && !ctype.contains("pdf") {
                return Err(TipificadorError::bad_input(format!(
                    "not a PDF file: {file_name}"
                )));
            }
        }
        Ok(())
    }

    /// Open every stored source, build the page index and persist the job
    /// metadata. Any failure removes the partial job directory.
    pub async fn finalize(&self, job_id: &str, files: usize) -> Result<JobMeta> {
        let result = self.build_page_index(job_id, files).await;
        match result {
            Ok(meta) => Ok(meta),
            Err(err) => {
                self.store.remove_job(job_id);
                Err(err)
            }
        }
    }

    async fn build_page_index(&self, job_id: &str, files: usize) -> Result<JobMeta> {
        let pdf = Arc::clone(&self.pdf);
        let paths: Vec<PathBuf> = (0..files)
            .map(|i| self.store.source_pdf_path(job_id, i))
            .collect();

        let counts = tokio::task::spawn_blocking(move || {
            paths
                .iter()
                .map(|path| pdf.page_count(path))
                .collect::<Result<Vec<usize>>>()
        })
        .await
        .map_err(|e| TipificadorError::internal(format!("page-count task panicked: {e}")))??;

        let mut page_map = Vec::new();
        for (pdf_idx, count) in counts.iter().enumerate() {
            for local in 0..*count {
                page_map.push((pdf_idx, local));
            }
        }

        let meta = JobMeta {
            job_id: job_id.to_string(),
            files,
            total_pages: page_map.len(),
            page_map,
            created_at: unix_now(),
        };
        self.store.write_job_meta(job_id, &meta)?;
        tracing::info!(job_id, files, total_pages = meta.total_pages, "job admitted");
        Ok(meta)
    }

    /// Build a job from PDFs already on disk (batch package admission).
    pub async fn create_from_paths(&self, pdf_paths: &[PathBuf]) -> Result<JobMeta> {
        if pdf_paths.is_empty() {
            return Err(TipificadorError::bad_input("package contains no PDFs"));
        }
        if pdf_paths.len() > self.config.max_files {
            return Err(TipificadorError::too_large(format!(
                "at most {} PDFs per package",
                self.config.max_files
            )));
        }

        let job_id = self.begin()?;
        let result: Result<()> = async {
            for (i, path) in pdf_paths.iter().enumerate() {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if !name.to_lowercase().ends_with(".pdf") {
                    return Err(TipificadorError::bad_input(format!("not a PDF file: {name}")));
                }
                let size = tokio::fs::metadata(path).await?.len();
                if size > self.config.max_file_bytes {
                    return Err(TipificadorError::too_large("file too large"));
                }
                tokio::fs::copy(path, self.store.source_pdf_path(&job_id, i)).await?;
            }
            Ok(())
        }
        .await;

        if let Err(err) = result {
            self.store.remove_job(&job_id);
            return Err(err);
        }
        self.finalize(&job_id, pdf_paths.len()).await
    }

    fn resolve(&self, meta: &JobMeta, job_id: &str, global: usize) -> Result<(PathBuf, usize)> {
        let (pdf_idx, local) = meta
            .resolve(global)
            .ok_or_else(|| TipificadorError::not_found("page out of range"))?;
        let path = self.store.source_pdf_path(job_id, pdf_idx);
        if !path.exists() {
            return Err(TipificadorError::not_found("source PDF not found"));
        }
        Ok((path, local))
    }

    async fn render_cached(
        &self,
        job_id: &str,
        global: usize,
        cache_name: String,
        width: u32,
        use_cache: bool,
    ) -> Result<Vec<u8>> {
        let meta = self.store.read_job_meta(job_id)?;
        let cache = self.store.cache_path(job_id, &cache_name);
        if use_cache
            && let Ok(png) = tokio::fs::read(&cache).await
        {
            return Ok(png);
        }

        let (source, local) = self.resolve(&meta, job_id, global)?;
        let pdf = Arc::clone(&self.pdf);
        let png = tokio::task::spawn_blocking(move || {
            pdf.render_png(&source, local, RenderSpec::Width(width))
        })
        .await
        .map_err(|e| TipificadorError::internal(format!("render task panicked: {e}")))??;

        if use_cache {
            tokio::fs::write(&cache, &png).await?;
        }
        Ok(png)
    }

    /// Thumbnail PNG for one page.
    pub async fn thumb(&self, job_id: &str, global: usize) -> Result<Vec<u8>> {
        self.render_cached(job_id, global, format!("thumb_{global}.png"), THUMB_WIDTH, true)
            .await
    }

    /// Preview PNG for one page. Persisting the preview is feature-flagged;
    /// thumbnails are always cached.
    pub async fn view(&self, job_id: &str, global: usize) -> Result<Vec<u8>> {
        self.render_cached(
            job_id,
            global,
            format!("view_{global}.png"),
            VIEW_WIDTH,
            self.config.cache_view,
        )
        .await
    }

    /// Run the processing stage: validate the classification map, resolve
    /// invoice metadata, assemble category PDFs and zip them.
    ///
    /// Returns the archive name and its bytes. The job scratch is removed on
    /// success unless `keep_job`; on assembly failure it is retained only when
    /// `keep_job` was requested.
    pub async fn process(&self, job_id: &str, request: &ProcessRequest) -> Result<(String, Vec<u8>)> {
        let meta = self.store.read_job_meta(job_id)?;
        let grouped = pages_by_category(&request.classifications, meta.total_pages);

        let fev_pages = grouped[&Category::FEV].clone();
        if fev_pages.is_empty() {
            return Err(TipificadorError::FevRequired);
        }

        let resolver = InvoiceResolver::new(self.store.clone(), Arc::clone(&self.pdf));
        let (nit, invoice) = resolver
            .resolve(
                job_id,
                &fev_pages,
                request.nit_override.as_deref(),
                request.ocfe_override.as_deref(),
            )
            .await?;

        let assembler = Assembler::new(self.store.clone(), Arc::clone(&self.pdf));
        let result: Result<Vec<u8>> = async {
            let outputs = assembler.build(job_id, &meta, grouped, &nit, &invoice).await?;
            zip_files(&outputs)
        }
        .await;

        match result {
            Ok(archive) => {
                if !request.keep_job {
                    self.store.remove_job(job_id);
                }
                tracing::info!(job_id, nit, invoice, "job processed");
                Ok((format!("{invoice}.zip"), archive))
            }
            Err(err) => {
                if !request.keep_job {
                    self.store.remove_job(job_id);
                }
                Err(err)
            }
        }
    }
}

/// Recursively collect PDF paths under a directory, sorted for determinism.
pub fn collect_pdf_paths(root: &Path) -> Vec<PathBuf> {
    fn walk(dir: &Path, found: &mut Vec<PathBuf>) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                walk(&path, found);
            } else if path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
            {
                found.push(path);
            }
        }
    }

    let mut found = Vec::new();
    walk(root, &mut found);
    found.sort();
    found
}

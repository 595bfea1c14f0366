//! Batch orchestration: expand a multi-package archive, process each package
//! as its own job, consolidate the results.
//!
//! One background worker per batch walks the packages sequentially; the batch
//! metadata file is the only channel between the worker and request handlers,
//! so every update goes through an atomic read-modify-write. Cancellation is
//! cooperative: handlers set `cancelRequested` and the worker (and the OCR
//! extractor below it) poll the flag between packages, pages and tiers.

use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::assemble::zip_files;
use crate::blob::BlobStore;
use crate::classify::AutoClassifier;
use crate::core::config::ServiceConfig;
use crate::error::{Result, TipificadorError};
use crate::job::{JobService, collect_pdf_paths};
use crate::ocr::CancelFn;
use crate::store::ScratchStore;
use crate::types::{
    BatchMeta, BatchStatus, Classifications, PackageMeta, PackageStatus, ProcessRequest, unix_now,
};

/// Name of the consolidated archive inside the results directory.
pub const ALL_ZIP: &str = "all.zip";

/// Client-facing name of the consolidated archive.
pub const ALL_ZIP_DOWNLOAD_NAME: &str = "TIPIFICADO_LOTE.zip";

#[derive(Clone)]
pub struct BatchOrchestrator {
    config: Arc<ServiceConfig>,
    store: ScratchStore,
    jobs: JobService,
    auto: AutoClassifier,
    blob: Option<Arc<dyn BlobStore>>,
}

impl BatchOrchestrator {
    pub fn new(
        config: Arc<ServiceConfig>,
        store: ScratchStore,
        jobs: JobService,
        auto: AutoClassifier,
        blob: Option<Arc<dyn BlobStore>>,
    ) -> Self {
        Self { config, store, jobs, auto, blob }
    }

    /// Create the batch directory skeleton. The caller streams the archive to
    /// [`Self::archive_path`] and then calls [`Self::register`].
    pub fn admit(&self) -> Result<String> {
        self.store.mk_batch()
    }

    pub fn archive_path(&self, batch_id: &str) -> PathBuf {
        self.store.batch_dir(batch_id).join("batch.zip")
    }

    /// Discard a half-admitted batch.
    pub fn abort_admission(&self, batch_id: &str) {
        self.store.remove_batch(batch_id);
    }

    /// Expand the uploaded archive, discover packages and persist the batch
    /// as `ready`. Removes the batch directory on failure.
    pub async fn register(&self, batch_id: &str) -> Result<BatchMeta> {
        match self.register_inner(batch_id).await {
            Ok(meta) => Ok(meta),
            Err(err) => {
                self.store.remove_batch(batch_id);
                Err(err)
            }
        }
    }

    async fn register_inner(&self, batch_id: &str) -> Result<BatchMeta> {
        let archive = self.archive_path(batch_id);
        let input_dir = self.store.input_dir(batch_id);
        tokio::task::spawn_blocking(move || extract_zip_safely(&archive, &input_dir))
            .await
            .map_err(|e| TipificadorError::internal(format!("extract task panicked: {e}")))??;

        let mut folders: Vec<String> = std::fs::read_dir(self.store.input_dir(batch_id))?
            .flatten()
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .filter(|name| !name.starts_with("__"))
            .collect();
        folders.sort();

        if folders.is_empty() {
            return Err(TipificadorError::bad_input("archive has no package folders"));
        }
        if folders.len() > self.config.max_batch_packages {
            return Err(TipificadorError::too_large(format!(
                "at most {} packages per batch",
                self.config.max_batch_packages
            )));
        }

        let meta = BatchMeta {
            batch_id: batch_id.to_string(),
            created_at: unix_now(),
            status: BatchStatus::Ready,
            cancel_requested: false,
            packages: folders.into_iter().map(PackageMeta::new).collect(),
            all_zip: None,
        };
        self.store.write_batch_meta(batch_id, &meta)?;
        tracing::info!(batch_id, packages = meta.packages.len(), "batch admitted");
        Ok(meta)
    }

    /// Fetch an archive from the blob store and admit it as a batch.
    pub async fn admit_from_blob(&self, object: &str) -> Result<BatchMeta> {
        let blob = self
            .blob
            .as_ref()
            .ok_or_else(|| TipificadorError::bad_input("blob store is not configured"))?;
        let bytes = blob.get(object).await?;
        if bytes.len() as u64 > self.config.max_batch_bytes {
            return Err(TipificadorError::too_large("batch archive too large"));
        }

        let batch_id = self.admit()?;
        if let Err(err) = tokio::fs::write(self.archive_path(&batch_id), &bytes).await {
            self.store.remove_batch(&batch_id);
            return Err(err.into());
        }
        self.register(&batch_id).await
    }

    /// Current batch state, reconciled against on-disk results.
    pub fn status(&self, batch_id: &str) -> Result<BatchMeta> {
        let meta = self.store.read_batch_meta(batch_id)?;
        self.reconcile(batch_id, meta)
    }

    /// Recompute statuses from on-disk evidence, persisting only on change.
    ///
    /// Makes progress observable even if the worker died mid-batch: a result
    /// file on disk is proof the package finished.
    fn reconcile(&self, batch_id: &str, mut meta: BatchMeta) -> Result<BatchMeta> {
        let results_dir = self.store.results_dir(batch_id);
        let mut changed = false;

        if results_dir.is_dir() {
            for package in &mut meta.packages {
                if package.status == PackageStatus::Done {
                    continue;
                }
                let result_file = package
                    .result_file
                    .clone()
                    .unwrap_or_else(|| format!("{}.zip", package.name));
                if results_dir.join(&result_file).exists() {
                    package.result_file = Some(result_file);
                    package.status = PackageStatus::Done;
                    package.error = None;
                    changed = true;
                }
            }
            if results_dir.join(ALL_ZIP).exists() && meta.all_zip.as_deref() != Some(ALL_ZIP) {
                meta.all_zip = Some(ALL_ZIP.to_string());
                changed = true;
            }
        }

        if changed {
            meta.status = aggregate_status(&meta);
            self.store.write_batch_meta(batch_id, &meta)?;
        }
        Ok(meta)
    }

    /// Start processing. Idempotent while the batch is already processing or
    /// done.
    pub fn start(&self, batch_id: &str) -> Result<BatchMeta> {
        let meta = self.store.read_batch_meta(batch_id)?;
        if matches!(meta.status, BatchStatus::Processing | BatchStatus::Done) {
            return Ok(meta);
        }
        let meta = self.store.update_batch_meta(batch_id, |meta| {
            meta.cancel_requested = false;
            meta.status = BatchStatus::Processing;
        })?;
        self.spawn_worker(batch_id.to_string(), None);
        Ok(meta)
    }

    /// Request cancellation. A batch that never started goes straight to
    /// `cancelled`; a running one drains cooperatively through `cancelling`.
    pub fn cancel(&self, batch_id: &str) -> Result<BatchMeta> {
        let meta = self.store.read_batch_meta(batch_id)?;
        if matches!(meta.status, BatchStatus::Ready | BatchStatus::Pending) {
            return self.store.update_batch_meta(batch_id, |meta| {
                meta.cancel_requested = false;
                meta.status = BatchStatus::Cancelled;
            });
        }
        self.store.update_batch_meta(batch_id, |meta| {
            meta.cancel_requested = true;
            meta.status = BatchStatus::Cancelling;
        })
    }

    /// Relaunch the worker over error-status packages only. Returns how many
    /// packages were queued for retry.
    pub fn retry_errors(&self, batch_id: &str) -> Result<usize> {
        let meta = self.store.read_batch_meta(batch_id)?;
        let targets: HashSet<String> = meta
            .packages
            .iter()
            .filter(|p| p.status == PackageStatus::Error)
            .map(|p| p.name.clone())
            .collect();
        if targets.is_empty() {
            return Ok(0);
        }
        self.store.update_batch_meta(batch_id, |meta| {
            meta.cancel_requested = false;
            meta.status = BatchStatus::Processing;
        })?;
        let count = targets.len();
        self.spawn_worker(batch_id.to_string(), Some(targets));
        Ok(count)
    }

    /// Path of the consolidated archive, once available.
    pub fn all_zip_path(&self, batch_id: &str) -> Result<PathBuf> {
        let meta = self.status(batch_id)?;
        let name = meta
            .all_zip
            .ok_or_else(|| TipificadorError::not_found("consolidated archive not available"))?;
        let path = self.store.results_dir(batch_id).join(name);
        if !path.exists() {
            return Err(TipificadorError::not_found("consolidated archive not available"));
        }
        Ok(path)
    }

    /// Path and download name of one package's result archive.
    pub fn package_zip_path(&self, batch_id: &str, package: &str) -> Result<(PathBuf, String)> {
        let meta = self.status(batch_id)?;
        let record = meta
            .package(package)
            .filter(|p| p.status == PackageStatus::Done)
            .ok_or_else(|| TipificadorError::not_found("package not available"))?;
        let result_file = record
            .result_file
            .as_ref()
            .ok_or_else(|| TipificadorError::not_found("package not available"))?;
        let path = self.store.results_dir(batch_id).join(result_file);
        if !path.exists() {
            return Err(TipificadorError::not_found("package not available"));
        }
        let download_name = record
            .download_name
            .clone()
            .unwrap_or_else(|| format!("{package}.zip"));
        Ok((path, download_name))
    }

    fn spawn_worker(&self, batch_id: String, targets: Option<HashSet<String>>) {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            orchestrator.run_worker(&batch_id, targets).await;
        });
    }

    fn cancel_requested(&self, batch_id: &str) -> bool {
        self.store
            .read_batch_meta(batch_id)
            .map(|meta| meta.cancel_requested)
            .unwrap_or(false)
    }

    /// The batch worker. Failures are per-package; only cancellation stops
    /// the loop early.
    pub async fn run_worker(&self, batch_id: &str, targets: Option<HashSet<String>>) {
        let Ok(meta) = self.store.read_batch_meta(batch_id) else {
            tracing::warn!(batch_id, "batch worker could not read metadata, giving up");
            return;
        };
        let package_names: Vec<String> = meta.packages.iter().map(|p| p.name.clone()).collect();

        let mut cancelled = false;
        for name in package_names {
            if self.cancel_requested(batch_id) {
                cancelled = true;
                break;
            }
            if let Some(targets) = &targets
                && !targets.contains(&name)
            {
                continue;
            }

            if self
                .store
                .update_batch_meta(batch_id, |meta| {
                    if let Some(package) = meta.package_mut(&name) {
                        package.status = PackageStatus::Processing;
                        package.error = None;
                    }
                })
                .is_err()
            {
                tracing::warn!(batch_id, package = %name, "failed to update batch metadata");
            }

            match self.process_package(batch_id, &name).await {
                Ok((result_file, download_name)) => {
                    let _ = self.store.update_batch_meta(batch_id, |meta| {
                        if let Some(package) = meta.package_mut(&name) {
                            package.status = PackageStatus::Done;
                            package.result_file = Some(result_file.clone());
                            package.download_name = Some(download_name.clone());
                            package.error = None;
                        }
                    });
                }
                Err(err) if err.is_cancelled() => {
                    let _ = self.store.update_batch_meta(batch_id, |meta| {
                        if let Some(package) = meta.package_mut(&name) {
                            package.status = PackageStatus::Cancelled;
                            package.error = Some("cancelled".to_string());
                        }
                    });
                    cancelled = true;
                    break;
                }
                Err(err) => {
                    tracing::warn!(batch_id, package = %name, "package failed: {err}");
                    let _ = self.store.update_batch_meta(batch_id, |meta| {
                        if let Some(package) = meta.package_mut(&name) {
                            package.status = PackageStatus::Error;
                            package.error = Some(err.to_string());
                        }
                    });
                }
            }
        }

        if let Err(err) = self.consolidate(batch_id).await {
            tracing::warn!(batch_id, "consolidation failed: {err}");
        }

        let _ = self.store.update_batch_meta(batch_id, |meta| {
            meta.all_zip = Some(ALL_ZIP.to_string());
            if cancelled {
                meta.status = BatchStatus::Cancelled;
                meta.cancel_requested = false;
                for package in &mut meta.packages {
                    if matches!(
                        package.status,
                        PackageStatus::Pending | PackageStatus::Processing
                    ) {
                        package.status = PackageStatus::Cancelled;
                    }
                }
            } else {
                meta.status = aggregate_status(meta);
            }
        });
        tracing::info!(batch_id, cancelled, "batch worker finished");
    }

    /// Run one package end to end: job admission, auto-classification with a
    /// cancel probe, processing, result write.
    async fn process_package(&self, batch_id: &str, package: &str) -> Result<(String, String)> {
        let meta = self.store.read_batch_meta(batch_id)?;
        let folder = meta
            .package(package)
            .map(|p| p.folder.clone())
            .ok_or_else(|| TipificadorError::not_found("package not found"))?;

        let package_dir = self.store.input_dir(batch_id).join(folder);
        let pdfs = collect_pdf_paths(&package_dir);
        let job = self.jobs.create_from_paths(&pdfs).await?;
        let job_id = job.job_id.clone();

        let _ = self.store.update_batch_meta(batch_id, |meta| {
            if let Some(record) = meta.package_mut(package) {
                record.job_id = Some(job_id.clone());
            }
        });

        let cancel: CancelFn = {
            let orchestrator = self.clone();
            let batch_id = batch_id.to_string();
            Arc::new(move || orchestrator.cancel_requested(&batch_id))
        };
        let classifications = self.auto.classify_job(&job.job_id, Some(cancel)).await?;

        let request = ProcessRequest {
            classifications: classifications
                .into_iter()
                .map(|(key, category)| (key, Some(category)))
                .collect::<Classifications>(),
            ..Default::default()
        };
        let (download_name, archive) = self.jobs.process(&job.job_id, &request).await?;

        let result_file = format!("{package}.zip");
        tokio::fs::write(self.store.results_dir(batch_id).join(&result_file), &archive).await?;
        Ok((result_file, download_name))
    }

    /// Build `all.zip` from every done package's result file and mirror the
    /// results to the blob store when one is configured.
    async fn consolidate(&self, batch_id: &str) -> Result<()> {
        let meta = self.store.read_batch_meta(batch_id)?;
        let results_dir = self.store.results_dir(batch_id);

        let mut entries: Vec<(String, Vec<u8>)> = Vec::new();
        for package in &meta.packages {
            if package.status != PackageStatus::Done {
                continue;
            }
            let Some(result_file) = &package.result_file else {
                continue;
            };
            let bytes = tokio::fs::read(results_dir.join(result_file)).await?;
            let entry_name = package
                .download_name
                .clone()
                .unwrap_or_else(|| result_file.clone());
            entries.push((entry_name, bytes));
        }

        let archive = zip_files(&entries)?;
        tokio::fs::write(results_dir.join(ALL_ZIP), &archive).await?;

        if let Some(blob) = &self.blob {
            let prefix = format!("batches/{batch_id}");
            for (name, bytes) in &entries {
                if let Err(err) = blob.put(&format!("{prefix}/{name}"), bytes).await {
                    tracing::warn!(batch_id, name = %name, "blob mirror failed: {err}");
                }
            }
            if let Err(err) = blob.put(&format!("{prefix}/{ALL_ZIP}"), &archive).await {
                tracing::warn!(batch_id, "blob mirror failed: {err}");
            }
        }
        Ok(())
    }
}

/// Derive the batch status from its package aggregates.
pub fn aggregate_status(meta: &BatchMeta) -> BatchStatus {
    let done = meta.count(PackageStatus::Done);
    let errors = meta.count(PackageStatus::Error);
    let pending = meta.count(PackageStatus::Pending) + meta.count(PackageStatus::Processing);

    if pending > 0 {
        BatchStatus::Processing
    } else if errors > 0 && done > 0 {
        BatchStatus::Partial
    } else if errors > 0 {
        BatchStatus::Error
    } else if done > 0 {
        BatchStatus::Done
    } else {
        meta.status
    }
}

/// Extract a zip archive, refusing unsafe entry paths.
///
/// Directory entries are skipped; files create their parent directories.
/// `enclosed_name` rejects absolute paths and `..` traversal.
fn extract_zip_safely(archive_path: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive_path)
        .map_err(|_| TipificadorError::bad_input("invalid or corrupt ZIP archive"))?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|_| TipificadorError::bad_input("invalid or corrupt ZIP archive"))?;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|_| TipificadorError::bad_input("invalid or corrupt ZIP archive"))?;
        if entry.is_dir() {
            continue;
        }
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| TipificadorError::bad_input("ZIP contains unsafe paths"))?;
        let target = dest.join(relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        std::io::copy(&mut entry, &mut out)?;
    }
    Ok(())
}

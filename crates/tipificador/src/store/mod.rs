//! On-disk scratch store for jobs and batches.
//!
//! Layout, rooted at `ServiceConfig::job_root`:
//!
//! ```text
//! <root>/<jobId>/meta.json
//! <root>/<jobId>/pdfs/src_<i>.pdf
//! <root>/<jobId>/cache/{thumb|view|text|ocr}_<g>.<ext>
//! <root>/batches/<batchId>/{batch.zip, meta.json, input/, results/}
//! ```
//!
//! Metadata writes go through a sibling temp file, fsync and rename so that
//! concurrent readers always see a complete JSON document. Batch metadata is
//! the communication channel between request handlers and the batch worker;
//! readers tolerate a torn read by retrying before giving up with `MetaBusy`.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Result, TipificadorError};
use crate::types::{BatchMeta, JobMeta, unix_now};

static ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-f0-9]{32}$").expect("identifier regex compiles"));

const META_READ_RETRIES: usize = 3;
const META_READ_BACKOFF: Duration = Duration::from_millis(50);

/// Returns true for a well-formed job or batch identifier.
pub fn is_valid_id(id: &str) -> bool {
    ID_RE.is_match(id)
}

/// Mint a fresh identifier: 32 lowercase hex digits.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Directory-per-job / directory-per-batch scratch store.
#[derive(Debug, Clone)]
pub struct ScratchStore {
    root: PathBuf,
}

impl ScratchStore {
    /// Open (and create) the scratch root and its `batches/` subdirectory.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        fs::create_dir_all(root.join("batches"))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.root.join(job_id)
    }

    pub fn batch_dir(&self, batch_id: &str) -> PathBuf {
        self.root.join("batches").join(batch_id)
    }

    /// Create the directory skeleton for a new job and return its id.
    pub fn mk_job(&self) -> Result<String> {
        let job_id = new_id();
        let dir = self.job_dir(&job_id);
        fs::create_dir_all(dir.join("pdfs"))?;
        fs::create_dir_all(dir.join("cache"))?;
        Ok(job_id)
    }

    /// Create the directory skeleton for a new batch and return its id.
    pub fn mk_batch(&self) -> Result<String> {
        let batch_id = new_id();
        let dir = self.batch_dir(&batch_id);
        fs::create_dir_all(dir.join("input"))?;
        fs::create_dir_all(dir.join("results"))?;
        Ok(batch_id)
    }

    pub fn source_pdf_path(&self, job_id: &str, pdf_idx: usize) -> PathBuf {
        self.job_dir(job_id).join("pdfs").join(format!("src_{pdf_idx}.pdf"))
    }

    pub fn cache_path(&self, job_id: &str, file_name: &str) -> PathBuf {
        self.job_dir(job_id).join("cache").join(file_name)
    }

    pub fn results_dir(&self, batch_id: &str) -> PathBuf {
        self.batch_dir(batch_id).join("results")
    }

    pub fn input_dir(&self, batch_id: &str) -> PathBuf {
        self.batch_dir(batch_id).join("input")
    }

    /// Read a job's metadata. A malformed id or missing file is `NotFound`,
    /// which covers expired jobs as well.
    pub fn read_job_meta(&self, job_id: &str) -> Result<JobMeta> {
        if !is_valid_id(job_id) {
            return Err(TipificadorError::not_found("job does not exist or expired"));
        }
        let path = self.job_dir(job_id).join("meta.json");
        let bytes = fs::read(&path)
            .map_err(|_| TipificadorError::not_found("job does not exist or expired"))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn write_job_meta(&self, job_id: &str, meta: &JobMeta) -> Result<()> {
        let path = self.job_dir(job_id).join("meta.json");
        write_atomic(&path, &serde_json::to_vec_pretty(meta)?)
    }

    /// Read a batch's metadata, retrying torn reads.
    ///
    /// The batch worker rewrites this file while requests read it; an
    /// interrupted read parses as invalid JSON and is retried with a short
    /// backoff before surfacing `MetaBusy`.
    pub fn read_batch_meta(&self, batch_id: &str) -> Result<BatchMeta> {
        if !is_valid_id(batch_id) {
            return Err(TipificadorError::not_found("batch does not exist or expired"));
        }
        let path = self.batch_dir(batch_id).join("meta.json");
        if !path.exists() {
            return Err(TipificadorError::not_found("batch does not exist or expired"));
        }
        for attempt in 0..META_READ_RETRIES {
            match fs::read(&path) {
                Ok(bytes) => match serde_json::from_slice(&bytes) {
                    Ok(meta) => return Ok(meta),
                    Err(err) => {
                        tracing::debug!(batch_id, attempt, "batch meta parse failed: {err}");
                    }
                },
                Err(err) => {
                    tracing::debug!(batch_id, attempt, "batch meta read failed: {err}");
                }
            }
            std::thread::sleep(META_READ_BACKOFF);
        }
        Err(TipificadorError::MetaBusy)
    }

    pub fn write_batch_meta(&self, batch_id: &str, meta: &BatchMeta) -> Result<()> {
        let path = self.batch_dir(batch_id).join("meta.json");
        write_atomic(&path, &serde_json::to_vec_pretty(meta)?)
    }

    /// Read-modify-write a batch's metadata under the atomic write discipline.
    ///
    /// Keeps concurrent flags (notably `cancelRequested`) intact when the
    /// worker updates a package record.
    pub fn update_batch_meta<F>(&self, batch_id: &str, mutate: F) -> Result<BatchMeta>
    where
        F: FnOnce(&mut BatchMeta),
    {
        let mut meta = self.read_batch_meta(batch_id)?;
        mutate(&mut meta);
        self.write_batch_meta(batch_id, &meta)?;
        Ok(meta)
    }

    /// Remove a job directory. Best-effort.
    pub fn remove_job(&self, job_id: &str) {
        if is_valid_id(job_id) {
            let _ = fs::remove_dir_all(self.job_dir(job_id));
        }
    }

    /// Remove a batch directory. Best-effort.
    pub fn remove_batch(&self, batch_id: &str) {
        if is_valid_id(batch_id) {
            let _ = fs::remove_dir_all(self.batch_dir(batch_id));
        }
    }

    /// Remove every job directory older than `ttl`. Best-effort: unreadable
    /// metadata or filesystem failures are skipped silently.
    pub fn sweep_expired(&self, ttl: Duration) {
        let now = unix_now();
        let Ok(entries) = fs::read_dir(&self.root) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !is_valid_id(name) {
                continue;
            }
            let meta_path = entry.path().join("meta.json");
            let created_at = fs::read(&meta_path)
                .ok()
                .and_then(|bytes| serde_json::from_slice::<JobMeta>(&bytes).ok())
                .map(|meta| meta.created_at)
                .unwrap_or(0);
            if created_at > 0 && now.saturating_sub(created_at) > ttl.as_secs() {
                tracing::debug!(job_id = name, "sweeping expired job");
                let _ = fs::remove_dir_all(entry.path());
            }
        }
    }
}

/// Write `bytes` to `path` atomically: sibling temp file, fsync, rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BatchStatus, PackageMeta};
    use tempfile::TempDir;

    fn sample_job_meta(job_id: &str, created_at: u64) -> JobMeta {
        JobMeta {
            job_id: job_id.to_string(),
            files: 1,
            total_pages: 1,
            page_map: vec![(0, 0)],
            created_at,
        }
    }

    #[test]
    fn test_id_validation() {
        assert!(is_valid_id(&"a".repeat(32)));
        assert!(is_valid_id(&new_id()));
        assert!(!is_valid_id("ABCDEF"));
        assert!(!is_valid_id(&"g".repeat(32)));
        assert!(!is_valid_id("../escape"));
    }

    #[test]
    fn test_job_meta_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = ScratchStore::new(dir.path()).unwrap();
        let job_id = store.mk_job().unwrap();
        let meta = sample_job_meta(&job_id, 100);
        store.write_job_meta(&job_id, &meta).unwrap();
        let back = store.read_job_meta(&job_id).unwrap();
        assert_eq!(back.page_map, vec![(0, 0)]);
    }

    #[test]
    fn test_missing_job_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = ScratchStore::new(dir.path()).unwrap();
        let err = store.read_job_meta(&"c".repeat(32)).unwrap_err();
        assert!(matches!(err, TipificadorError::NotFound(_)));
    }

    #[test]
    fn test_atomic_write_leaves_prior_meta_on_interrupted_write() {
        let dir = TempDir::new().unwrap();
        let store = ScratchStore::new(dir.path()).unwrap();
        let batch_id = store.mk_batch().unwrap();
        let meta = BatchMeta {
            batch_id: batch_id.clone(),
            created_at: 1,
            status: BatchStatus::Ready,
            cancel_requested: false,
            packages: vec![PackageMeta::new("p1")],
            all_zip: None,
        };
        store.write_batch_meta(&batch_id, &meta).unwrap();

        // A crash between temp-file write and rename leaves a stray temp file;
        // the published meta must still parse.
        let tmp = store.batch_dir(&batch_id).join("meta.json.tmp");
        fs::write(&tmp, b"{\"truncat").unwrap();
        let back = store.read_batch_meta(&batch_id).unwrap();
        assert_eq!(back.packages.len(), 1);
    }

    #[test]
    fn test_torn_batch_meta_is_busy_after_retries() {
        let dir = TempDir::new().unwrap();
        let store = ScratchStore::new(dir.path()).unwrap();
        let batch_id = store.mk_batch().unwrap();
        fs::write(store.batch_dir(&batch_id).join("meta.json"), b"{not json").unwrap();
        let err = store.read_batch_meta(&batch_id).unwrap_err();
        assert!(matches!(err, TipificadorError::MetaBusy));
    }

    #[test]
    fn test_update_batch_meta_preserves_concurrent_flags() {
        let dir = TempDir::new().unwrap();
        let store = ScratchStore::new(dir.path()).unwrap();
        let batch_id = store.mk_batch().unwrap();
        let meta = BatchMeta {
            batch_id: batch_id.clone(),
            created_at: 1,
            status: BatchStatus::Processing,
            cancel_requested: true,
            packages: vec![PackageMeta::new("p1")],
            all_zip: None,
        };
        store.write_batch_meta(&batch_id, &meta).unwrap();
        let updated = store
            .update_batch_meta(&batch_id, |m| {
                m.packages[0].status = crate::types::PackageStatus::Done;
            })
            .unwrap();
        assert!(updated.cancel_requested);
    }

    #[test]
    fn test_sweep_removes_only_expired_jobs() {
        let dir = TempDir::new().unwrap();
        let store = ScratchStore::new(dir.path()).unwrap();

        let old_id = store.mk_job().unwrap();
        store
            .write_job_meta(&old_id, &sample_job_meta(&old_id, 1))
            .unwrap();

        let fresh_id = store.mk_job().unwrap();
        store
            .write_job_meta(&fresh_id, &sample_job_meta(&fresh_id, unix_now()))
            .unwrap();

        store.sweep_expired(Duration::from_secs(60));
        assert!(!store.job_dir(&old_id).exists());
        assert!(store.job_dir(&fresh_id).exists());
    }
}

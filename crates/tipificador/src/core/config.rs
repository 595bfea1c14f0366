//! Service configuration loaded from the environment.
//!
//! Every knob has a `TIPIFICADOR_*` environment variable. Invalid values fall
//! back to the default with a warning rather than aborting startup.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Width in points used for page thumbnails.
pub const THUMB_WIDTH: u32 = 240;

/// Width in points used for page previews.
pub const VIEW_WIDTH: u32 = 1100;

/// Runtime configuration for the service.
///
/// Defaults are tuned for a single-host deployment processing scanned
/// clinical-administrative packages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Root directory for job and batch scratch space.
    pub job_root: PathBuf,

    /// Maximum size of a single uploaded PDF in bytes.
    pub max_file_bytes: u64,

    /// Maximum number of PDFs per job.
    pub max_files: usize,

    /// Job (and batch) time-to-live in seconds.
    pub job_ttl_seconds: u64,

    /// Persist rendered previews to the cache directory.
    pub cache_view: bool,

    /// Master OCR switch. When off, OCR-backed endpoints answer 503.
    pub ocr_enabled: bool,

    /// Primary tesseract language list, e.g. `spa+eng`.
    pub ocr_lang: String,

    /// Render DPI for full-page OCR.
    pub ocr_dpi: u32,

    /// Render DPI for header-band OCR.
    pub ocr_header_dpi: u32,

    /// Fraction of the page height considered the header band.
    pub ocr_header_ratio: f32,

    /// Tesseract page segmentation mode.
    pub ocr_psm: String,

    /// Minimum trimmed length for embedded text to count as useful.
    pub ocr_min_text_len: usize,

    /// Keep rendered OCR input images instead of deleting them.
    pub ocr_keep_images: bool,

    /// Concurrent page workers during auto-classification.
    pub ocr_workers: usize,

    /// Maximum top-level package folders per batch archive.
    pub max_batch_packages: usize,

    /// Maximum batch archive size in bytes.
    pub max_batch_bytes: u64,

    /// Root directory of the filesystem blob store. `None` disables the
    /// object-store batch endpoints.
    pub blob_root: Option<PathBuf>,

    /// Key prefix for blob store objects.
    pub blob_prefix: String,

    /// Lifetime of signed blob URLs in seconds.
    pub signed_url_ttl_seconds: u64,

    /// Comma-separated list of allowed CORS origins. Empty means permissive.
    pub cors_origins: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            job_root: PathBuf::from("/tmp/tipificador_jobs"),
            max_file_bytes: 100 * 1024 * 1024,
            max_files: 20,
            job_ttl_seconds: 21_600,
            cache_view: true,
            ocr_enabled: true,
            ocr_lang: "spa+eng".to_string(),
            ocr_dpi: 300,
            ocr_header_dpi: 200,
            ocr_header_ratio: 0.35,
            ocr_psm: "4".to_string(),
            ocr_min_text_len: 80,
            ocr_keep_images: false,
            ocr_workers: 4,
            max_batch_packages: 10,
            max_batch_bytes: 500 * 1024 * 1024,
            blob_root: None,
            blob_prefix: "tipificador".to_string(),
            signed_url_ttl_seconds: 3600,
            cors_origins: None,
        }
    }
}

impl ServiceConfig {
    /// Build a configuration from `TIPIFICADOR_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(root) = env_string("TIPIFICADOR_JOB_ROOT") {
            config.job_root = PathBuf::from(root);
        }
        env_parse("TIPIFICADOR_MAX_FILE_BYTES", &mut config.max_file_bytes);
        env_parse("TIPIFICADOR_MAX_FILES", &mut config.max_files);
        env_parse("TIPIFICADOR_JOB_TTL_SECONDS", &mut config.job_ttl_seconds);
        env_bool("TIPIFICADOR_CACHE_VIEW", &mut config.cache_view);
        env_bool("TIPIFICADOR_OCR_ENABLED", &mut config.ocr_enabled);
        if let Some(lang) = env_string("TIPIFICADOR_OCR_LANG") {
            config.ocr_lang = lang;
        }
        env_parse("TIPIFICADOR_OCR_DPI", &mut config.ocr_dpi);
        // The header band never needs full resolution.
        config.ocr_header_dpi = config.ocr_header_dpi.min(config.ocr_dpi);
        env_parse("TIPIFICADOR_OCR_HEADER_DPI", &mut config.ocr_header_dpi);
        env_parse("TIPIFICADOR_OCR_HEADER_RATIO", &mut config.ocr_header_ratio);
        if let Some(psm) = env_string("TIPIFICADOR_OCR_PSM") {
            config.ocr_psm = psm;
        }
        env_parse("TIPIFICADOR_OCR_MIN_TEXT_LEN", &mut config.ocr_min_text_len);
        env_bool("TIPIFICADOR_OCR_KEEP_IMAGES", &mut config.ocr_keep_images);
        env_parse("TIPIFICADOR_OCR_WORKERS", &mut config.ocr_workers);
        env_parse(
            "TIPIFICADOR_MAX_BATCH_PACKAGES",
            &mut config.max_batch_packages,
        );
        env_parse("TIPIFICADOR_MAX_BATCH_BYTES", &mut config.max_batch_bytes);
        if let Some(root) = env_string("TIPIFICADOR_BLOB_ROOT") {
            config.blob_root = Some(PathBuf::from(root));
        }
        if let Some(prefix) = env_string("TIPIFICADOR_BLOB_PREFIX") {
            config.blob_prefix = prefix;
        }
        env_parse(
            "TIPIFICADOR_SIGNED_URL_TTL_SECONDS",
            &mut config.signed_url_ttl_seconds,
        );
        config.cors_origins = env_string("TIPIFICADOR_CORS_ORIGINS");

        if config.ocr_workers == 0 {
            tracing::warn!("TIPIFICADOR_OCR_WORKERS must be > 0, using 1");
            config.ocr_workers = 1;
        }

        config
    }

    /// Batch scratch root, nested under the job root.
    pub fn batch_root(&self) -> PathBuf {
        self.job_root.join("batches")
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, target: &mut T) {
    if let Ok(raw) = std::env::var(key) {
        match raw.parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => tracing::warn!("ignoring invalid value for {}: '{}'", key, raw),
        }
    }
}

fn env_bool(key: &str, target: &mut bool) {
    if let Ok(raw) = std::env::var(key) {
        *target = !matches!(raw.to_lowercase().as_str(), "0" | "false" | "no");
    }
}

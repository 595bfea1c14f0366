//! API state and request/response types.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::blob::BlobStore;
use crate::classify::AutoClassifier;
use crate::core::config::ServiceConfig;
use crate::error::Result;
use crate::job::JobService;
use crate::ocr::{OcrEngine, TextExtractor};
use crate::pdf::PdfEngine;
use crate::store::ScratchStore;
use crate::types::{BatchStatus, Classifications, PackageStatus};

/// Shared server state: configuration, scratch store, engines and the
/// services built from them.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub store: ScratchStore,
    pub jobs: JobService,
    pub extractor: TextExtractor,
    pub auto: AutoClassifier,
    pub batch: crate::batch::BatchOrchestrator,
    pub blob: Option<Arc<dyn BlobStore>>,
}

impl AppState {
    /// Wire the services together over the given engines.
    pub fn new(
        config: ServiceConfig,
        pdf: Arc<dyn PdfEngine>,
        ocr: Arc<dyn OcrEngine>,
        blob: Option<Arc<dyn BlobStore>>,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let store = ScratchStore::new(config.job_root.clone())?;
        let jobs = JobService::new(Arc::clone(&config), store.clone(), Arc::clone(&pdf));
        let extractor = TextExtractor::new(
            Arc::clone(&config),
            store.clone(),
            Arc::clone(&pdf),
            Arc::clone(&ocr),
        );
        let auto = AutoClassifier::new(Arc::clone(&config), store.clone(), extractor.clone());
        let batch = crate::batch::BatchOrchestrator::new(
            Arc::clone(&config),
            store.clone(),
            jobs.clone(),
            auto.clone(),
            blob.clone(),
        );
        Ok(Self {
            config,
            store,
            jobs,
            extractor,
            auto,
            batch,
            blob,
        })
    }
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Response of job admission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobResponse {
    pub job_id: String,
    pub total_pages: usize,
    pub files: usize,
}

/// Response of auto-classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoClassifyResponse {
    pub classifications: Classifications,
    pub ocr_enabled: bool,
}

/// Query parameters of the OCR text endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OcrTextQuery {
    #[serde(default)]
    pub refresh: bool,
}

/// Response of batch admission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCreateResponse {
    pub batch_id: String,
    pub packages: usize,
}

/// Response of the upload-url endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrlResponse {
    pub upload_url: String,
    pub object_name: String,
}

/// Body of the object-store batch admission endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct FromBlobRequest {
    pub object: String,
}

/// Per-package state in the batch status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageStatusResponse {
    pub name: String,
    pub status: PackageStatus,
    pub job_id: Option<String>,
    pub download_name: Option<String>,
    pub error: Option<String>,
    /// Signed URL of the mirrored result, when a blob store is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
}

/// Batch status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatusResponse {
    pub batch_id: String,
    pub created_at: u64,
    pub status: BatchStatus,
    pub cancel_requested: bool,
    pub packages: Vec<PackageStatusResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all_zip_url: Option<String>,
}

/// Response of batch lifecycle transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchTransitionResponse {
    pub batch_id: String,
    pub status: BatchStatus,
}

/// Response of the retry-errors endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryResponse {
    pub batch_id: String,
    pub retried: usize,
}

/// What was detected before invoice metadata resolution gave up.
///
/// Serialised with explicit nulls: the front-end distinguishes "not detected"
/// from "not an unresolved-metadata error" by the presence of these keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnresolvedDetail {
    pub nit_detected: Option<String>,
    pub ocfe_detected: Option<String>,
}

/// Error response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error_type: String,
    pub message: String,
    pub status_code: u16,
    #[serde(flatten)]
    pub unresolved: Option<UnresolvedDetail>,
}

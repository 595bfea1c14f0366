//! REST API for the classification service.
//!
//! An Axum-based HTTP server over the job and batch pipelines.
//!
//! # Endpoints
//!
//! - `GET /health` - Liveness check
//! - `POST /jobs` - Admit a job (multipart `files` fields)
//! - `GET /jobs/{id}/pages/{g}/thumb.png` - Page thumbnail
//! - `GET /jobs/{id}/pages/{g}/view.png` - Page preview
//! - `GET /jobs/{id}/pages/{g}/ocr.txt?refresh=` - Full-page OCR text
//! - `POST /jobs/{id}/auto-classify` - Classify every page
//! - `POST /jobs/{id}/process` - Assemble and stream the final archive
//! - `POST /batch` - Admit a batch (multipart `file` field, ZIP)
//! - `POST /batch/upload-url` / `POST /batch/from-gcs` - Object-store hand-off
//! - `GET /batch/{id}` - Batch status
//! - `POST /batch/{id}/{start|cancel|retry-errors}` - Lifecycle transitions
//! - `GET /batch/{id}/download/all.zip` - Consolidated archive
//! - `GET /batch/{id}/download/{pkg}.zip` - Per-package archive
//!
//! # cURL examples
//!
//! ```bash
//! # Admit a job
//! curl -F "files=@invoice.pdf" -F "files=@history.pdf" http://localhost:8000/jobs
//!
//! # Classify and process
//! curl -X POST http://localhost:8000/jobs/<id>/auto-classify
//! curl -X POST http://localhost:8000/jobs/<id>/process \
//!      -H "Content-Type: application/json" \
//!      -d '{"classifications":{"0":"FEV","1":"HEV"}}' -O -J
//!
//! # Batch mode
//! curl -F "file=@lote.zip" http://localhost:8000/batch
//! curl -X POST http://localhost:8000/batch/<id>/start
//! curl http://localhost:8000/batch/<id>
//! ```

mod error;
mod handlers;
mod server;
mod types;

pub use error::ApiError;
pub use server::{create_router, serve};
pub use types::{
    AppState, AutoClassifyResponse, BatchCreateResponse, BatchStatusResponse,
    BatchTransitionResponse, CreateJobResponse, ErrorResponse, HealthResponse,
    PackageStatusResponse, RetryResponse, UnresolvedDetail, UploadUrlResponse,
};

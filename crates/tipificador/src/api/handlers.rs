//! API request handlers.

use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
};
use tokio::io::AsyncWriteExt;

use crate::error::TipificadorError;
use crate::store::new_id;
use crate::types::ProcessRequest;

use super::error::ApiError;
use super::types::{
    AppState, AutoClassifyResponse, BatchCreateResponse, BatchStatusResponse,
    BatchTransitionResponse, CreateJobResponse, FromBlobRequest, HealthResponse, OcrTextQuery,
    PackageStatusResponse, RetryResponse, UploadUrlResponse,
};

fn bad_multipart(err: axum::extract::multipart::MultipartError) -> ApiError {
    TipificadorError::bad_input(format!("invalid multipart body: {err}")).into()
}

fn png_response(bytes: Vec<u8>) -> Response {
    ([(header::CONTENT_TYPE, "image/png")], bytes).into_response()
}

fn zip_attachment(name: &str, bytes: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{name}\""),
            ),
        ],
        bytes,
    )
        .into_response()
}

/// Health check endpoint handler.
///
/// GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Job admission handler.
///
/// POST /jobs
///
/// Accepts multipart form data with one or more `files` fields, each a PDF.
/// Files stream to the job's scratch directory in 1 MiB chunks with an early
/// abort at the per-file size limit, so an oversized upload never lands on
/// disk in full. Expired jobs are swept before admission.
pub async fn create_job_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<CreateJobResponse>, ApiError> {
    state.jobs.sweep();

    let job_id = state.jobs.begin().map_err(ApiError::from)?;
    let mut files = 0usize;

    let admit = async {
        while let Some(mut field) = multipart.next_field().await.map_err(bad_multipart)? {
            if field.name() != Some("files") {
                continue;
            }
            if files >= state.config.max_files {
                return Err(TipificadorError::too_large(format!(
                    "at most {} files per upload",
                    state.config.max_files
                ))
                .into());
            }

            let file_name = field.file_name().unwrap_or("").to_string();
            let content_type = field.content_type().map(|s| s.to_string());
            state
                .jobs
                .check_upload(&file_name, content_type.as_deref())
                .map_err(ApiError::from)?;

            let path = state.store.source_pdf_path(&job_id, files);
            let mut out = tokio::fs::File::create(&path)
                .await
                .map_err(|e| ApiError::from(TipificadorError::Io(e)))?;
            let mut written = 0u64;
            while let Some(chunk) = field.chunk().await.map_err(bad_multipart)? {
                written += chunk.len() as u64;
                if written > state.config.max_file_bytes {
                    return Err(TipificadorError::too_large("file too large").into());
                }
                out.write_all(&chunk)
                    .await
                    .map_err(|e| ApiError::from(TipificadorError::Io(e)))?;
            }
            out.flush()
                .await
                .map_err(|e| ApiError::from(TipificadorError::Io(e)))?;
            files += 1;
        }
        Ok::<_, ApiError>(())
    }
    .await;

    if let Err(err) = admit {
        state.store.remove_job(&job_id);
        return Err(err);
    }
    if files == 0 {
        state.store.remove_job(&job_id);
        return Err(TipificadorError::bad_input("upload at least one PDF").into());
    }

    let meta = state.jobs.finalize(&job_id, files).await.map_err(ApiError::from)?;
    Ok(Json(CreateJobResponse {
        job_id: meta.job_id,
        total_pages: meta.total_pages,
        files: meta.files,
    }))
}

/// Thumbnail handler.
///
/// GET /jobs/{job_id}/pages/{page}/thumb.png
pub async fn thumb_handler(
    State(state): State<AppState>,
    Path((job_id, page)): Path<(String, usize)>,
) -> Result<Response, ApiError> {
    let png = state.jobs.thumb(&job_id, page).await?;
    Ok(png_response(png))
}

/// Preview handler.
///
/// GET /jobs/{job_id}/pages/{page}/view.png
pub async fn view_handler(
    State(state): State<AppState>,
    Path((job_id, page)): Path<(String, usize)>,
) -> Result<Response, ApiError> {
    let png = state.jobs.view(&job_id, page).await?;
    Ok(png_response(png))
}

/// Full-page OCR text handler.
///
/// GET /jobs/{job_id}/pages/{page}/ocr.txt?refresh=
pub async fn ocr_text_handler(
    State(state): State<AppState>,
    Path((job_id, page)): Path<(String, usize)>,
    Query(query): Query<OcrTextQuery>,
) -> Result<Response, ApiError> {
    let text = state.extractor.full_text(&job_id, page, query.refresh).await?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        text,
    )
        .into_response())
}

/// Auto-classification handler.
///
/// POST /jobs/{job_id}/auto-classify
pub async fn auto_classify_handler(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<AutoClassifyResponse>, ApiError> {
    let classifications = state.auto.classify_job(&job_id, None).await?;
    Ok(Json(AutoClassifyResponse {
        classifications: classifications
            .into_iter()
            .map(|(key, category)| (key, Some(category)))
            .collect(),
        ocr_enabled: state.config.ocr_enabled,
    }))
}

/// Processing handler: classification map in, final archive out.
///
/// POST /jobs/{job_id}/process
pub async fn process_handler(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Json(request): Json<ProcessRequest>,
) -> Result<Response, ApiError> {
    let (name, archive) = state.jobs.process(&job_id, &request).await?;
    Ok(zip_attachment(&name, archive))
}

/// Batch admission handler.
///
/// POST /batch
///
/// Accepts multipart form data with a single `file` field holding a ZIP whose
/// top-level folders are the packages.
pub async fn create_batch_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<BatchCreateResponse>, ApiError> {
    let batch_id = state.batch.admit().map_err(ApiError::from)?;

    let upload = async {
        let mut received = false;
        while let Some(mut field) = multipart.next_field().await.map_err(bad_multipart)? {
            if field.name() != Some("file") {
                continue;
            }
            let file_name = field.file_name().unwrap_or("").to_lowercase();
            if !file_name.ends_with(".zip") {
                return Err(TipificadorError::bad_input("upload a .zip archive").into());
            }

            let path = state.batch.archive_path(&batch_id);
            let mut out = tokio::fs::File::create(&path)
                .await
                .map_err(|e| ApiError::from(TipificadorError::Io(e)))?;
            let mut written = 0u64;
            while let Some(chunk) = field.chunk().await.map_err(bad_multipart)? {
                written += chunk.len() as u64;
                if written > state.config.max_batch_bytes {
                    return Err(TipificadorError::too_large("batch archive too large").into());
                }
                out.write_all(&chunk)
                    .await
                    .map_err(|e| ApiError::from(TipificadorError::Io(e)))?;
            }
            out.flush()
                .await
                .map_err(|e| ApiError::from(TipificadorError::Io(e)))?;
            received = true;
        }
        if !received {
            return Err(TipificadorError::bad_input("upload a .zip archive").into());
        }
        Ok::<_, ApiError>(())
    }
    .await;

    if let Err(err) = upload {
        state.batch.abort_admission(&batch_id);
        return Err(err);
    }

    let meta = state.batch.register(&batch_id).await.map_err(ApiError::from)?;
    Ok(Json(BatchCreateResponse {
        batch_id: meta.batch_id,
        packages: meta.packages.len(),
    }))
}

/// Upload-URL handler for object-store batch hand-off.
///
/// POST /batch/upload-url
pub async fn batch_upload_url_handler(
    State(state): State<AppState>,
) -> Result<Json<UploadUrlResponse>, ApiError> {
    let blob = state
        .blob
        .as_ref()
        .ok_or_else(|| ApiError::from(TipificadorError::bad_input("blob store is not configured")))?;
    let object_name = format!("uploads/{}.zip", new_id());
    let upload_url = blob.upload_url(&object_name).await?;
    Ok(Json(UploadUrlResponse {
        upload_url,
        object_name,
    }))
}

/// Object-store batch admission handler.
///
/// POST /batch/from-gcs
pub async fn batch_from_blob_handler(
    State(state): State<AppState>,
    Json(request): Json<FromBlobRequest>,
) -> Result<Json<BatchCreateResponse>, ApiError> {
    let meta = state.batch.admit_from_blob(&request.object).await?;
    Ok(Json(BatchCreateResponse {
        batch_id: meta.batch_id,
        packages: meta.packages.len(),
    }))
}

/// Batch status handler.
///
/// GET /batch/{batch_id}
pub async fn get_batch_handler(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> Result<Json<BatchStatusResponse>, ApiError> {
    let meta = state.batch.status(&batch_id)?;

    let mut packages = Vec::with_capacity(meta.packages.len());
    for package in &meta.packages {
        let result_url = match (&state.blob, &package.download_name) {
            (Some(blob), Some(download_name))
                if package.status == crate::types::PackageStatus::Done =>
            {
                blob.download_url(&format!("batches/{batch_id}/{download_name}"))
                    .await
                    .ok()
            }
            _ => None,
        };
        packages.push(PackageStatusResponse {
            name: package.name.clone(),
            status: package.status,
            job_id: package.job_id.clone(),
            download_name: package.download_name.clone(),
            error: package.error.clone(),
            result_url,
        });
    }

    let all_zip_url = match (&state.blob, &meta.all_zip) {
        (Some(blob), Some(_)) => blob
            .download_url(&format!("batches/{batch_id}/all.zip"))
            .await
            .ok(),
        _ => None,
    };

    Ok(Json(BatchStatusResponse {
        batch_id: meta.batch_id,
        created_at: meta.created_at,
        status: meta.status,
        cancel_requested: meta.cancel_requested,
        packages,
        all_zip_url,
    }))
}

/// Batch start handler.
///
/// POST /batch/{batch_id}/start
pub async fn start_batch_handler(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> Result<Json<BatchTransitionResponse>, ApiError> {
    let meta = state.batch.start(&batch_id)?;
    Ok(Json(BatchTransitionResponse {
        batch_id: meta.batch_id,
        status: meta.status,
    }))
}

/// Batch cancel handler.
///
/// POST /batch/{batch_id}/cancel
pub async fn cancel_batch_handler(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> Result<Json<BatchTransitionResponse>, ApiError> {
    let meta = state.batch.cancel(&batch_id)?;
    Ok(Json(BatchTransitionResponse {
        batch_id: meta.batch_id,
        status: meta.status,
    }))
}

/// Batch retry handler, relaunching error packages only.
///
/// POST /batch/{batch_id}/retry-errors
pub async fn retry_batch_handler(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> Result<Json<RetryResponse>, ApiError> {
    let retried = state.batch.retry_errors(&batch_id)?;
    Ok(Json(RetryResponse {
        batch_id,
        retried,
    }))
}

/// Consolidated archive download handler.
///
/// GET /batch/{batch_id}/download/all.zip
pub async fn download_all_handler(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> Result<Response, ApiError> {
    let path = state.batch.all_zip_path(&batch_id)?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| ApiError::from(TipificadorError::not_found("consolidated archive not available")))?;
    Ok(zip_attachment(crate::batch::ALL_ZIP_DOWNLOAD_NAME, bytes))
}

/// Per-package archive download handler.
///
/// GET /batch/{batch_id}/download/{package}.zip
pub async fn download_package_handler(
    State(state): State<AppState>,
    Path((batch_id, file)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let package = file
        .strip_suffix(".zip")
        .ok_or_else(|| ApiError::from(TipificadorError::not_found("package not available")))?;
    let (path, download_name) = state.batch.package_zip_path(&batch_id, package)?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| ApiError::from(TipificadorError::not_found("package not available")))?;
    Ok(zip_attachment(&download_name, bytes))
}

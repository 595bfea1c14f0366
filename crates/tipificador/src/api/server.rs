//! API server setup and configuration.

use std::net::{IpAddr, SocketAddr};

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

use crate::error::{Result, TipificadorError};

use super::handlers::{
    auto_classify_handler, batch_from_blob_handler, batch_upload_url_handler,
    cancel_batch_handler, create_batch_handler, create_job_handler, download_all_handler,
    download_package_handler, get_batch_handler, health_handler, ocr_text_handler,
    process_handler, retry_batch_handler, start_batch_handler, thumb_handler, view_handler,
};
use super::types::AppState;

/// Build the CORS layer from the configured origin list.
///
/// Without explicit origins the layer is permissive, which is fine for the
/// usual same-host front-end but should be narrowed for anything public.
fn cors_layer(origins: Option<&str>) -> CorsLayer {
    if let Some(origins_str) = origins {
        let origins: Vec<_> = origins_str
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .filter_map(|s| s.trim().parse::<axum::http::HeaderValue>().ok())
            .collect();
        if !origins.is_empty() {
            tracing::info!("CORS configured with {} explicit allowed origin(s)", origins.len());
            return CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any);
        }
        tracing::warn!("TIPIFICADOR_CORS_ORIGINS set but empty/invalid, falling back to permissive CORS");
    }
    CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
}

/// Create the API router with all routes configured.
///
/// Public so the router can be embedded into a larger application.
pub fn create_router(state: AppState) -> Router {
    // The widest legitimate request is either a batch archive or a full
    // multi-PDF upload; cap the body a little above that.
    let body_limit = state
        .config
        .max_batch_bytes
        .max(state.config.max_file_bytes * state.config.max_files as u64)
        as usize
        + 1024 * 1024;

    let cors = cors_layer(state.config.cors_origins.as_deref());

    Router::new()
        .route("/health", get(health_handler))
        .route("/jobs", post(create_job_handler))
        .route("/jobs/{job_id}/pages/{page}/thumb.png", get(thumb_handler))
        .route("/jobs/{job_id}/pages/{page}/view.png", get(view_handler))
        .route("/jobs/{job_id}/pages/{page}/ocr.txt", get(ocr_text_handler))
        .route("/jobs/{job_id}/auto-classify", post(auto_classify_handler))
        .route("/jobs/{job_id}/process", post(process_handler))
        .route("/batch", post(create_batch_handler))
        .route("/batch/upload-url", post(batch_upload_url_handler))
        .route("/batch/from-gcs", post(batch_from_blob_handler))
        .route("/batch/{batch_id}", get(get_batch_handler))
        .route("/batch/{batch_id}/start", post(start_batch_handler))
        .route("/batch/{batch_id}/cancel", post(cancel_batch_handler))
        .route("/batch/{batch_id}/retry-errors", post(retry_batch_handler))
        .route("/batch/{batch_id}/download/all.zip", get(download_all_handler))
        .route(
            "/batch/{batch_id}/download/{file}",
            get(download_package_handler),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the API server.
pub async fn serve(state: AppState, host: impl AsRef<str>, port: u16) -> Result<()> {
    let ip: IpAddr = host
        .as_ref()
        .parse()
        .map_err(|e| TipificadorError::bad_input(format!("invalid host address: {e}")))?;

    let addr = SocketAddr::new(ip, port);
    let app = create_router(state);

    tracing::info!("starting tipificador API server on http://{ip}:{port}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(TipificadorError::Io)?;
    axum::serve(listener, app)
        .await
        .map_err(|e| TipificadorError::internal(e.to_string()))?;
    Ok(())
}

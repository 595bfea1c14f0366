//! API error handling.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::error::TipificadorError;

use super::types::{ErrorResponse, UnresolvedDetail};

/// API-specific error wrapper.
#[derive(Debug)]
pub struct ApiError {
    /// HTTP status code
    pub status: StatusCode,
    /// Error response body
    pub body: ErrorResponse,
}

fn error_type(error: &TipificadorError) -> &'static str {
    match error {
        TipificadorError::BadInput(_) => "ValidationError",
        TipificadorError::NotFound(_) => "NotFoundError",
        TipificadorError::TooLarge(_) => "PayloadTooLargeError",
        TipificadorError::CorruptPdf(_) => "CorruptPdfError",
        TipificadorError::FevRequired => "FevRequiredError",
        TipificadorError::Unresolved { .. } => "UnresolvedMetadataError",
        TipificadorError::Cancelled => "CancelledError",
        TipificadorError::OcrDisabled => "OCRDisabledError",
        TipificadorError::MetaBusy => "MetadataBusyError",
        TipificadorError::Ocr(_) => "OCRError",
        TipificadorError::Pdf(_) => "PdfError",
        TipificadorError::Io(_) => "IOError",
        TipificadorError::Serialization(_) => "SerializationError",
        TipificadorError::Internal(_) => "Error",
    }
}

fn status_for(error: &TipificadorError) -> StatusCode {
    match error {
        TipificadorError::BadInput(_)
        | TipificadorError::CorruptPdf(_)
        | TipificadorError::FevRequired => StatusCode::BAD_REQUEST,
        TipificadorError::NotFound(_) => StatusCode::NOT_FOUND,
        TipificadorError::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        TipificadorError::Unresolved { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        TipificadorError::OcrDisabled | TipificadorError::MetaBusy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<TipificadorError> for ApiError {
    fn from(error: TipificadorError) -> Self {
        let status = status_for(&error);
        let unresolved = match &error {
            TipificadorError::Unresolved {
                nit_detected,
                ocfe_detected,
            } => Some(UnresolvedDetail {
                nit_detected: nit_detected.clone(),
                ocfe_detected: ocfe_detected.clone(),
            }),
            _ => None,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("internal error: {error}");
        }

        Self {
            status,
            body: ErrorResponse {
                error_type: error_type(&error).to_string(),
                message: error.to_string(),
                status_code: status.as_u16(),
                unresolved,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

//! Error types for the tipificador service.
//!
//! A single error enum covers every failure the service can surface. The API
//! layer maps each variant to an HTTP status code; everything else propagates
//! with `?`.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, TipificadorError>;

/// All errors produced by the service.
#[derive(Debug, Error)]
pub enum TipificadorError {
    /// Malformed request input (non-PDF upload, bad archive, bad body).
    #[error("{0}")]
    BadInput(String),

    /// Missing or expired resource (job, batch, page, source PDF).
    #[error("{0}")]
    NotFound(String),

    /// Upload or archive exceeds a configured limit.
    #[error("{0}")]
    TooLarge(String),

    /// A source file the PDF engine refused to open.
    #[error("invalid or corrupt PDF: {0}")]
    CorruptPdf(String),

    /// Processing requires at least one page classified as FEV.
    #[error("at least one page must be classified as FEV")]
    FevRequired,

    /// Invoice metadata could not be resolved from the FEV pages.
    ///
    /// Carries whatever was detected so the caller can ask for manual input.
    #[error("could not detect NIT and/or invoice number from the FEV pages")]
    Unresolved {
        nit_detected: Option<String>,
        ocfe_detected: Option<String>,
    },

    /// Cooperative cancellation observed mid-pipeline.
    #[error("operation cancelled")]
    Cancelled,

    /// OCR is disabled by configuration.
    #[error("OCR is disabled on this server")]
    OcrDisabled,

    /// Shared metadata could not be read consistently after retries.
    #[error("metadata temporarily busy, retry shortly")]
    MetaBusy,

    /// OCR engine failure (missing binary, non-zero exit).
    #[error("OCR failed: {0}")]
    Ocr(String),

    /// PDF engine failure that is not a corrupt input.
    #[error("PDF engine error: {0}")]
    Pdf(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Anything unexpected.
    #[error("{0}")]
    Internal(String),
}

impl TipificadorError {
    pub fn bad_input(message: impl Into<String>) -> Self {
        Self::BadInput(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn too_large(message: impl Into<String>) -> Self {
        Self::TooLarge(message.into())
    }

    pub fn corrupt_pdf(message: impl Into<String>) -> Self {
        Self::CorruptPdf(message.into())
    }

    pub fn ocr(message: impl Into<String>) -> Self {
        Self::Ocr(message.into())
    }

    pub fn pdf(message: impl Into<String>) -> Self {
        Self::Pdf(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether this error is the cooperative cancellation signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            TipificadorError::bad_input("no files").to_string(),
            "no files"
        );
        assert_eq!(
            TipificadorError::FevRequired.to_string(),
            "at least one page must be classified as FEV"
        );
    }

    #[test]
    fn test_is_cancelled() {
        assert!(TipificadorError::Cancelled.is_cancelled());
        assert!(!TipificadorError::OcrDisabled.is_cancelled());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: TipificadorError = io.into();
        assert!(matches!(err, TipificadorError::Io(_)));
    }
}

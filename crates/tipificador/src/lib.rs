//! Tipificador: page classification and bundling for clinical-administrative
//! invoice packages.
//!
//! The service ingests the PDFs belonging to a single healthcare invoice,
//! classifies every page into one of five business categories (CRC, FEV, HEV,
//! OPF, PDE) and assembles per-category PDFs into a delivery archive. Batch
//! mode expands a multi-package ZIP and runs the same pipeline per package.
//!
//! # Architecture
//!
//! - [`store`] - directory-per-job scratch space with atomic metadata writes
//! - [`pdf`] / [`ocr`] - narrow seams over pdfium and tesseract
//! - [`ocr::TextExtractor`] - tiered text extraction (embedded text, header
//!   OCR, full OCR) with per-page caching
//! - [`classify`] - deterministic rule classifier with per-PDF propagation
//! - [`invoice`] - NIT and invoice-code detection on FEV pages
//! - [`assemble`] - per-category concatenation and archive packaging
//! - [`job`] / [`batch`] - the single-job and multi-package pipelines
//! - [`api`] - the Axum HTTP surface
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tipificador::api::{AppState, serve};
//! use tipificador::core::config::ServiceConfig;
//! use tipificador::ocr::TesseractCli;
//! use tipificador::pdf::PdfiumEngine;
//!
//! #[tokio::main]
//! async fn main() -> tipificador::Result<()> {
//!     let state = AppState::new(
//!         ServiceConfig::from_env(),
//!         Arc::new(PdfiumEngine::new()),
//!         Arc::new(TesseractCli::new()),
//!         None,
//!     )?;
//!     serve(state, "127.0.0.1", 8000).await
//! }
//! ```

pub mod api;
pub mod assemble;
pub mod batch;
pub mod blob;
pub mod classify;
pub mod core;
pub mod error;
pub mod invoice;
pub mod job;
pub mod ocr;
pub mod pdf;
pub mod store;
pub mod types;

pub use crate::core::config::ServiceConfig;
pub use error::{Result, TipificadorError};
pub use types::{BatchMeta, BatchStatus, Category, JobMeta, PackageStatus, ProcessRequest};

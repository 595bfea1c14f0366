//! OCR engine seam and the tiered page-text extractor.

pub mod engine;
pub mod extractor;

pub use engine::{OcrEngine, TesseractCli};
pub use extractor::{CancelFn, TextExtractor};

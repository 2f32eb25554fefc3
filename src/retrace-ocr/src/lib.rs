//! retrace-ocr - Text extraction for Retrace
//!
//! One tagged engine per supported backend with a single `recognize`
//! entry point, plus the bounded background worker that drains accepted
//! frames into the relational store. OCR is best-effort: losses are
//! logged, never fatal.

mod engine;
mod error;
mod worker;

pub use engine::{check_tesseract, OcrEngine, OcrLine, OcrOutput, OcrWord};
pub use error::{OcrError, Result};
pub use worker::{OcrTask, OcrTaskTarget, OcrWorker, OcrWorkerHandle, OCR_QUEUE_CAPACITY};

//! Capture error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture backend error: {0}")]
    Backend(String),

    #[error("no monitors found")]
    NoMonitors,

    #[error("monitor not found: {0}")]
    MonitorNotFound(u32),

    #[error("frame acquisition failed: {0}")]
    FrameAcquisition(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

impl From<xcap::XCapError> for CaptureError {
    fn from(e: xcap::XCapError) -> Self {
        CaptureError::Backend(e.to_string())
    }
}

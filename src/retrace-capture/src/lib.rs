//! retrace-capture - Screen and window capture for Retrace
//!
//! Delivers timestamped full-screen captures together with one frame per
//! visible application window, ready for frame-difference filtering.

pub mod error;
pub mod filters;
pub mod models;
pub mod source;

pub use error::CaptureError;
pub use filters::WindowFilters;
pub use models::{image_hash, MonitorInfo, ScreenObject, WindowFrame, WindowKey};
pub use source::{FrameSource, XcapSource};

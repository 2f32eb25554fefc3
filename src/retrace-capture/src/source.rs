//! Frame source backed by xcap
//!
//! One source instance per recorded monitor. Each capture returns the full
//! screen plus every visible, non-system window on that monitor.

use chrono::Utc;
use image::DynamicImage;
use tracing::{debug, warn};
use xcap::{Monitor, Window};

use crate::error::CaptureError;
use crate::filters::WindowFilters;
use crate::models::{image_hash, resize_to_max_width, MonitorInfo, ScreenObject, WindowFrame};

/// Opaque source of raw frames and window metadata.
///
/// A failed capture is not fatal; callers count the error and move on to
/// the next tick.
pub trait FrameSource: Send {
    fn capture(&mut self) -> Result<ScreenObject, CaptureError>;
    fn monitor(&self) -> &MonitorInfo;
}

/// Cross-platform capture source using the xcap backend.
pub struct XcapSource {
    info: MonitorInfo,
    filters: WindowFilters,
    capture_windows: bool,
    capture_unfocused_windows: bool,
    max_image_width: u32,
}

impl XcapSource {
    /// Enumerate all available monitors.
    pub fn list_monitors() -> Result<Vec<MonitorInfo>, CaptureError> {
        let monitors = Monitor::all()?;
        let mut infos = Vec::with_capacity(monitors.len());
        for m in &monitors {
            infos.push(MonitorInfo {
                id: m.id().unwrap_or_default(),
                name: m.name().unwrap_or_else(|_| "unknown".to_string()),
                width: m.width().unwrap_or_default(),
                height: m.height().unwrap_or_default(),
                is_primary: m.is_primary().unwrap_or(false),
            });
        }
        if infos.is_empty() {
            return Err(CaptureError::NoMonitors);
        }
        debug!("enumerated {} monitor(s)", infos.len());
        Ok(infos)
    }

    /// Create a source for one monitor id.
    pub fn new(
        monitor_id: u32,
        capture_windows: bool,
        capture_unfocused_windows: bool,
        max_image_width: u32,
    ) -> Result<Self, CaptureError> {
        let infos = Self::list_monitors()?;
        let info = infos
            .iter()
            .find(|m| m.id == monitor_id)
            .or_else(|| infos.iter().find(|m| m.is_primary))
            .or_else(|| infos.first())
            .cloned()
            .ok_or(CaptureError::MonitorNotFound(monitor_id))?;

        Ok(Self {
            info,
            filters: WindowFilters::default(),
            capture_windows,
            capture_unfocused_windows,
            max_image_width,
        })
    }

    fn find_monitor(&self) -> Result<Monitor, CaptureError> {
        let monitors = Monitor::all()?;
        monitors
            .into_iter()
            .find(|m| m.id().map(|id| id == self.info.id).unwrap_or(false))
            .ok_or(CaptureError::MonitorNotFound(self.info.id))
    }

    fn capture_window_frames(&self, timestamp: chrono::DateTime<Utc>) -> Vec<WindowFrame> {
        let windows = match Window::all() {
            Ok(w) => w,
            Err(e) => {
                warn!("window enumeration failed: {}, continuing without windows", e);
                return Vec::new();
            }
        };

        let mut frames = Vec::new();
        for window in windows {
            if window.is_minimized().unwrap_or(false) {
                continue;
            }

            // Only windows that belong to this monitor
            let on_this_monitor = window
                .current_monitor()
                .and_then(|m| m.id())
                .map(|id| id == self.info.id)
                .unwrap_or(true);
            if !on_this_monitor {
                continue;
            }

            let app_name = window.app_name().unwrap_or_default();
            let window_title = window.title().unwrap_or_default();
            if self.filters.should_skip(&app_name, &window_title) {
                continue;
            }

            // Backends may not supply focus or pid; downstream code must
            // not rely on non-zero values.
            let is_focused = window.is_focused().unwrap_or(false);
            if !self.capture_unfocused_windows && !is_focused {
                continue;
            }
            let process_id = window.pid().unwrap_or(0);

            let image = match window.capture_image() {
                Ok(buf) => DynamicImage::ImageRgba8(buf).to_rgb8(),
                Err(e) => {
                    debug!("window capture failed for {}/{}: {}", app_name, window_title, e);
                    continue;
                }
            };
            let image = resize_to_max_width(DynamicImage::ImageRgb8(image), self.max_image_width);
            let hash = image_hash(&image);

            frames.push(WindowFrame {
                app_name,
                window_title,
                process_id,
                is_focused,
                image,
                image_hash: hash,
                timestamp,
            });
        }

        frames
    }
}

impl FrameSource for XcapSource {
    fn capture(&mut self) -> Result<ScreenObject, CaptureError> {
        let monitor = self.find_monitor()?;
        let buffer = monitor
            .capture_image()
            .map_err(|e| CaptureError::FrameAcquisition(e.to_string()))?;

        let timestamp = Utc::now();
        let full = DynamicImage::ImageRgba8(buffer).to_rgb8();
        let full = resize_to_max_width(DynamicImage::ImageRgb8(full), self.max_image_width);
        let full_hash = image_hash(&full);

        let windows = if self.capture_windows {
            self.capture_window_frames(timestamp)
        } else {
            Vec::new()
        };

        debug!(
            "captured monitor {} ({}x{}) with {} window(s)",
            self.info.id,
            full.width(),
            full.height(),
            windows.len()
        );

        Ok(ScreenObject {
            monitor_id: self.info.id,
            device_name: self.info.name.clone(),
            timestamp,
            full_screen_image: full,
            full_screen_hash: full_hash,
            windows,
        })
    }

    fn monitor(&self) -> &MonitorInfo {
        &self.info
    }
}

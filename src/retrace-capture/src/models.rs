//! Transient capture data models

use chrono::{DateTime, Utc};
use image::imageops::FilterType;
use image::DynamicImage;
use std::hash::{DefaultHasher, Hash, Hasher};

/// Information about a display monitor
#[derive(Debug, Clone)]
pub struct MonitorInfo {
    pub id: u32,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub is_primary: bool,
}

/// Identity of a window stream: `(app_name, window_title, process_id)`.
///
/// Both diff-engine state and video writers are keyed by this triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey {
    pub app_name: String,
    pub window_title: String,
    pub process_id: u32,
}

impl WindowKey {
    pub fn new(app_name: &str, window_title: &str, process_id: u32) -> Self {
        Self {
            app_name: app_name.to_string(),
            window_title: window_title.to_string(),
            process_id,
        }
    }

    /// Stream identifier used in chunk file names and chunk callbacks.
    pub fn identifier(&self) -> String {
        format!("{}::{}::{}", self.app_name, self.window_title, self.process_id)
    }
}

impl std::fmt::Display for WindowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.identifier())
    }
}

/// Single application window captured within one tick
#[derive(Clone)]
pub struct WindowFrame {
    pub app_name: String,
    pub window_title: String,
    pub process_id: u32,
    pub is_focused: bool,
    pub image: DynamicImage,
    pub image_hash: u64,
    pub timestamp: DateTime<Utc>,
}

impl WindowFrame {
    pub fn key(&self) -> WindowKey {
        WindowKey::new(&self.app_name, &self.window_title, self.process_id)
    }
}

impl std::fmt::Debug for WindowFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowFrame")
            .field("app_name", &self.app_name)
            .field("window_title", &self.window_title)
            .field("process_id", &self.process_id)
            .field("is_focused", &self.is_focused)
            .field("image_hash", &self.image_hash)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

/// One complete monitor capture: full screen plus visible windows.
///
/// Created by a [`crate::FrameSource`], consumed within a single pipeline
/// tick, never persisted directly.
#[derive(Clone)]
pub struct ScreenObject {
    pub monitor_id: u32,
    pub device_name: String,
    pub timestamp: DateTime<Utc>,
    pub full_screen_image: DynamicImage,
    pub full_screen_hash: u64,
    pub windows: Vec<WindowFrame>,
}

impl ScreenObject {
    /// Keys of every window present in this capture.
    pub fn window_keys(&self) -> Vec<WindowKey> {
        self.windows.iter().map(|w| w.key()).collect()
    }
}

impl std::fmt::Debug for ScreenObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScreenObject")
            .field("monitor_id", &self.monitor_id)
            .field("device_name", &self.device_name)
            .field("timestamp", &self.timestamp)
            .field("full_screen_hash", &self.full_screen_hash)
            .field("windows", &self.windows.len())
            .finish()
    }
}

/// 64-bit fingerprint of a 64x64 grayscale downsample.
///
/// Equality means near-certain visual equality; inequality carries no
/// semantic guarantee.
pub fn image_hash(image: &DynamicImage) -> u64 {
    let small = image.resize_exact(64, 64, FilterType::Lanczos3).to_luma8();
    let mut hasher = DefaultHasher::new();
    small.as_raw().hash(&mut hasher);
    hasher.finish()
}

/// Proportionally downscale to `max_width` if wider; 0 disables scaling.
pub fn resize_to_max_width(image: DynamicImage, max_width: u32) -> DynamicImage {
    if max_width == 0 || image.width() <= max_width {
        return image;
    }
    let ratio = max_width as f64 / image.width() as f64;
    let new_height = (image.height() as f64 * ratio).round().max(1.0) as u32;
    image.resize_exact(max_width, new_height, FilterType::Lanczos3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn solid(w: u32, h: u32, px: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb(px)))
    }

    #[test]
    fn hash_is_stable_for_identical_images() {
        let a = solid(200, 100, [10, 20, 30]);
        let b = solid(200, 100, [10, 20, 30]);
        assert_eq!(image_hash(&a), image_hash(&b));
    }

    #[test]
    fn hash_differs_for_distinct_images() {
        let white = solid(200, 100, [255, 255, 255]);
        let black = solid(200, 100, [0, 0, 0]);
        assert_ne!(image_hash(&white), image_hash(&black));
    }

    #[test]
    fn resize_respects_max_width() {
        let img = solid(1920, 1080, [1, 2, 3]);
        let resized = resize_to_max_width(img, 960);
        assert_eq!(resized.width(), 960);
        assert_eq!(resized.height(), 540);
    }

    #[test]
    fn resize_zero_is_noop() {
        let img = solid(1920, 1080, [1, 2, 3]);
        let resized = resize_to_max_width(img, 0);
        assert_eq!(resized.width(), 1920);
    }

    #[test]
    fn window_key_identifier_joins_triple() {
        let key = WindowKey::new("firefox", "tab one", 4242);
        assert_eq!(key.identifier(), "firefox::tab one::4242");
    }
}

//! Frame difference detection
//!
//! Decides per stream whether a newly captured image differs enough from
//! the previously accepted one to be worth storing. A cheap hash check
//! rejects pixel-identical frames; a Hellinger histogram distance catches
//! global content shifts; structural similarity catches layout changes the
//! histogram misses. The two scores are averaged into one scalar that is
//! compared against the stream threshold.

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage};
use image_compare::{Algorithm, Metric};
use std::collections::HashMap;
use tracing::{debug, warn};

use retrace_capture::{ScreenObject, WindowFrame, WindowKey};

/// Default threshold separating "same view" from "user did something".
pub const DEFAULT_DIFF_THRESHOLD: f64 = 0.006;

/// Outcome of one stream comparison
#[derive(Debug, Clone)]
pub struct FrameDiffResult {
    pub should_store: bool,
    pub diff_score: f64,
    pub histogram_diff: f64,
    pub ssim_diff: f64,
    pub reason: String,
}

impl FrameDiffResult {
    fn first_frame(reason: &str) -> Self {
        Self {
            should_store: true,
            diff_score: 1.0,
            histogram_diff: 1.0,
            ssim_diff: 1.0,
            reason: reason.to_string(),
        }
    }
}

#[derive(Default)]
struct ScreenDiffState {
    previous_image: Option<DynamicImage>,
    previous_hash: u64,
    frame_count: u64,
    // Highest-scoring rejected frame within the current stable run
    best_rejected: Option<(DynamicImage, f64, u64)>,
}

#[derive(Default)]
struct WindowDiffState {
    previous_image: Option<DynamicImage>,
    previous_hash: u64,
    frame_count: u64,
}

/// Per-stream change detector for screens and windows.
pub struct FrameDiffEngine {
    screen_threshold: f64,
    window_threshold: f64,
    screen_states: HashMap<u32, ScreenDiffState>,
    window_states: HashMap<WindowKey, WindowDiffState>,
}

impl FrameDiffEngine {
    pub fn new(screen_threshold: f64, window_threshold: f64) -> Self {
        Self {
            screen_threshold,
            window_threshold,
            screen_states: HashMap::new(),
            window_states: HashMap::new(),
        }
    }

    /// Check whether the full-screen image changed enough to store.
    pub fn check_screen(&mut self, screen: &ScreenObject) -> FrameDiffResult {
        let state = self.screen_states.entry(screen.monitor_id).or_default();
        state.frame_count += 1;

        let previous = match &state.previous_image {
            Some(prev) => prev,
            None => {
                state.previous_image = Some(screen.full_screen_image.clone());
                state.previous_hash = screen.full_screen_hash;
                return FrameDiffResult::first_frame("first frame");
            }
        };

        let (combined, histogram_diff, ssim_diff) = compare_with_hashes(
            &screen.full_screen_image,
            previous,
            screen.full_screen_hash,
            state.previous_hash,
        );

        debug!(
            "screen diff (monitor {}): combined={:.4} histogram={:.4} ssim={:.4}",
            screen.monitor_id, combined, histogram_diff, ssim_diff
        );

        if combined >= self.screen_threshold {
            state.previous_image = Some(screen.full_screen_image.clone());
            state.previous_hash = screen.full_screen_hash;
            state.best_rejected = None;
            FrameDiffResult {
                should_store: true,
                diff_score: combined,
                histogram_diff,
                ssim_diff,
                reason: format!(
                    "changed (diff={:.4} >= threshold={})",
                    combined, self.screen_threshold
                ),
            }
        } else {
            let tracked = state.best_rejected.as_ref().map(|(_, score, _)| *score);
            if tracked.map(|s| combined > s).unwrap_or(true) && combined > 0.0 {
                state.best_rejected =
                    Some((screen.full_screen_image.clone(), combined, state.frame_count));
            }
            FrameDiffResult {
                should_store: false,
                diff_score: combined,
                histogram_diff,
                ssim_diff,
                reason: format!(
                    "unchanged (diff={:.4} < threshold={})",
                    combined, self.screen_threshold
                ),
            }
        }
    }

    /// Check whether a window image changed enough to store.
    pub fn check_window(&mut self, window: &WindowFrame) -> FrameDiffResult {
        let key = window.key();
        let state = self.window_states.entry(key).or_default();
        state.frame_count += 1;

        let previous = match &state.previous_image {
            Some(prev) => prev,
            None => {
                state.previous_image = Some(window.image.clone());
                state.previous_hash = window.image_hash;
                return FrameDiffResult::first_frame("first frame for this window");
            }
        };

        let (combined, histogram_diff, ssim_diff) = compare_with_hashes(
            &window.image,
            previous,
            window.image_hash,
            state.previous_hash,
        );

        debug!(
            "window diff ({}/{}): combined={:.4}",
            window.app_name, window.window_title, combined
        );

        if combined >= self.window_threshold {
            state.previous_image = Some(window.image.clone());
            state.previous_hash = window.image_hash;
            FrameDiffResult {
                should_store: true,
                diff_score: combined,
                histogram_diff,
                ssim_diff,
                reason: format!(
                    "changed (diff={:.4} >= threshold={})",
                    combined, self.window_threshold
                ),
            }
        } else {
            FrameDiffResult {
                should_store: false,
                diff_score: combined,
                histogram_diff,
                ssim_diff,
                reason: format!(
                    "unchanged (diff={:.4} < threshold={})",
                    combined, self.window_threshold
                ),
            }
        }
    }

    /// Best representative of the current quiet period, if any.
    pub fn best_rejected_screen(&self, monitor_id: u32) -> Option<(&DynamicImage, f64)> {
        self.screen_states
            .get(&monitor_id)
            .and_then(|s| s.best_rejected.as_ref())
            .map(|(img, score, _)| (img, *score))
    }

    /// Drop tracking state for windows no longer present on screen.
    pub fn cleanup_stale_windows(&mut self, active_keys: &[WindowKey]) {
        let before = self.window_states.len();
        self.window_states.retain(|key, _| active_keys.contains(key));
        let removed = before - self.window_states.len();
        if removed > 0 {
            debug!("cleaned up {} stale window diff state(s)", removed);
        }
    }

    pub fn tracked_window_count(&self) -> usize {
        self.window_states.len()
    }

    pub fn reset(&mut self) {
        self.screen_states.clear();
        self.window_states.clear();
    }
}

fn compare_with_hashes(
    current: &DynamicImage,
    previous: &DynamicImage,
    current_hash: u64,
    previous_hash: u64,
) -> (f64, f64, f64) {
    if current_hash == previous_hash {
        return (0.0, 0.0, 0.0);
    }
    compare_images(current, previous)
}

/// Combined difference of two images: `(combined, histogram, 1 - ssim)`.
///
/// Grayscale buffers are resized to their common minimum dimensions when
/// shapes differ. Range of every component is [0, 1].
pub fn compare_images(a: &DynamicImage, b: &DynamicImage) -> (f64, f64, f64) {
    let mut gray_a = a.to_luma8();
    let mut gray_b = b.to_luma8();

    if gray_a.dimensions() != gray_b.dimensions() {
        let min_w = gray_a.width().min(gray_b.width());
        let min_h = gray_a.height().min(gray_b.height());
        gray_a = image::imageops::resize(&gray_a, min_w, min_h, FilterType::Nearest);
        gray_b = image::imageops::resize(&gray_b, min_w, min_h, FilterType::Nearest);
    }

    let histogram_diff =
        match image_compare::gray_similarity_histogram(Metric::Hellinger, &gray_a, &gray_b) {
            Ok(d) => d.clamp(0.0, 1.0),
            Err(e) => {
                warn!("histogram comparison failed: {}, using direct computation", e);
                hellinger_distance(&gray_a, &gray_b)
            }
        };

    let ssim = match image_compare::gray_similarity_structure(&Algorithm::MSSIMSimple, &gray_a, &gray_b)
    {
        Ok(similarity) => similarity.score,
        Err(e) => {
            warn!("structural comparison failed: {}, using global SSIM", e);
            global_ssim(&gray_a, &gray_b)
        }
    };
    let ssim_diff = (1.0 - ssim).clamp(0.0, 1.0);

    let combined = (histogram_diff + ssim_diff) / 2.0;
    (combined, histogram_diff, ssim_diff)
}

/// Hellinger distance between 256-bin grayscale probability distributions.
fn hellinger_distance(a: &GrayImage, b: &GrayImage) -> f64 {
    let hist_a = normalized_histogram(a);
    let hist_b = normalized_histogram(b);

    let sum: f64 = hist_a
        .iter()
        .zip(hist_b.iter())
        .map(|(p, q)| {
            let d = p.sqrt() - q.sqrt();
            d * d
        })
        .sum();
    (0.5 * sum).sqrt()
}

fn normalized_histogram(image: &GrayImage) -> [f64; 256] {
    let mut hist = [0.0f64; 256];
    for px in image.pixels() {
        hist[px.0[0] as usize] += 1.0;
    }
    let total: f64 = (image.width() as f64) * (image.height() as f64);
    if total > 0.0 {
        for bin in hist.iter_mut() {
            *bin /= total;
        }
    }
    hist
}

/// Global SSIM with the standard constants, used when the windowed
/// computation cannot run (images smaller than the window).
fn global_ssim(a: &GrayImage, b: &GrayImage) -> f64 {
    const C1: f64 = (0.01 * 255.0) * (0.01 * 255.0);
    const C2: f64 = (0.03 * 255.0) * (0.03 * 255.0);

    let n = (a.width() * a.height()) as f64;
    if n == 0.0 {
        return 1.0;
    }

    let mean = |img: &GrayImage| img.pixels().map(|p| p.0[0] as f64).sum::<f64>() / n;
    let mu_a = mean(a);
    let mu_b = mean(b);

    let mut var_a = 0.0;
    let mut var_b = 0.0;
    let mut cov = 0.0;
    for (pa, pb) in a.pixels().zip(b.pixels()) {
        let da = pa.0[0] as f64 - mu_a;
        let db = pb.0[0] as f64 - mu_b;
        var_a += da * da;
        var_b += db * db;
        cov += da * db;
    }
    var_a /= n;
    var_b /= n;
    cov /= n;

    let numerator = (2.0 * mu_a * mu_b + C1) * (2.0 * cov + C2);
    let denominator = (mu_a * mu_a + mu_b * mu_b + C1) * (var_a + var_b + C2);
    if denominator == 0.0 {
        return 1.0;
    }
    numerator / denominator
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use image::{Rgb, RgbImage};

    fn solid(w: u32, h: u32, px: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb(px)))
    }

    fn screen_object(monitor_id: u32, image: DynamicImage) -> ScreenObject {
        let hash = retrace_capture::image_hash(&image);
        ScreenObject {
            monitor_id,
            device_name: "test".to_string(),
            timestamp: Utc::now(),
            full_screen_image: image,
            full_screen_hash: hash,
            windows: Vec::new(),
        }
    }

    fn window_frame(app: &str, title: &str, pid: u32, image: DynamicImage) -> WindowFrame {
        let hash = retrace_capture::image_hash(&image);
        WindowFrame {
            app_name: app.to_string(),
            window_title: title.to_string(),
            process_id: pid,
            is_focused: false,
            image,
            image_hash: hash,
            timestamp: Utc::now(),
        }
    }

    /// Mostly-white screen with a red square in the corner.
    fn red_square_desktop() -> DynamicImage {
        let mut img = RgbImage::from_pixel(192, 108, Rgb([255, 255, 255]));
        for y in 0..20 {
            for x in 0..20 {
                img.put_pixel(x, y, Rgb([255, 0, 0]));
            }
        }
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn first_frame_is_always_accepted() {
        let mut engine = FrameDiffEngine::new(DEFAULT_DIFF_THRESHOLD, DEFAULT_DIFF_THRESHOLD);
        let result = engine.check_screen(&screen_object(0, red_square_desktop()));
        assert!(result.should_store);
        assert_eq!(result.diff_score, 1.0);
        assert!(result.reason.contains("first frame"));
    }

    #[test]
    fn identical_frames_are_rejected_with_zero_diff() {
        let mut engine = FrameDiffEngine::new(DEFAULT_DIFF_THRESHOLD, DEFAULT_DIFF_THRESHOLD);
        engine.check_screen(&screen_object(0, red_square_desktop()));

        // t=1 and t=2 replay the exact same image (hash short-circuit)
        for _ in 0..2 {
            let result = engine.check_screen(&screen_object(0, red_square_desktop()));
            assert!(!result.should_store);
            assert_eq!(result.diff_score, 0.0);
        }
    }

    #[test]
    fn tab_switch_white_to_black_is_accepted() {
        let mut engine = FrameDiffEngine::new(DEFAULT_DIFF_THRESHOLD, DEFAULT_DIFF_THRESHOLD);
        let white = engine.check_screen(&screen_object(0, solid(192, 108, [250, 250, 250])));
        assert!(white.should_store);

        let black = engine.check_screen(&screen_object(0, solid(192, 108, [3, 3, 3])));
        assert!(black.should_store);
        assert!(black.diff_score > 0.5, "diff was {}", black.diff_score);
    }

    #[test]
    fn diff_of_image_with_itself_is_zero() {
        let img = red_square_desktop();
        let (combined, hist, ssim) = compare_images(&img, &img);
        assert_eq!(hist, 0.0);
        assert!(ssim.abs() < 1e-9);
        assert!(combined.abs() < 1e-9);
    }

    #[test]
    fn combined_equal_to_threshold_accepts() {
        // Measure the diff of a crafted pair, then use it as the threshold:
        // combined == threshold must accept.
        let mut base = RgbImage::from_pixel(64, 64, Rgb([128, 128, 128]));
        for x in 0..32 {
            base.put_pixel(x, 0, Rgb([140, 140, 140]));
        }
        let variant = DynamicImage::ImageRgb8(base);
        let original = solid(64, 64, [128, 128, 128]);

        let (combined, _, _) = compare_images(&variant, &original);
        assert!(combined > 0.0);

        let mut engine = FrameDiffEngine::new(combined, combined);
        engine.check_screen(&screen_object(0, original));
        let result = engine.check_screen(&screen_object(0, variant));
        assert!(result.should_store);
    }

    #[test]
    fn window_streams_are_independent() {
        let mut engine = FrameDiffEngine::new(DEFAULT_DIFF_THRESHOLD, DEFAULT_DIFF_THRESHOLD);

        let a = engine.check_window(&window_frame("editor", "a.rs", 1, solid(64, 64, [10, 10, 10])));
        let b = engine.check_window(&window_frame("browser", "b", 2, solid(64, 64, [200, 200, 200])));
        assert!(a.should_store && b.should_store);

        // Repeating one stream's image rejects on that stream only
        let again =
            engine.check_window(&window_frame("editor", "a.rs", 1, solid(64, 64, [10, 10, 10])));
        assert!(!again.should_store);
        let changed =
            engine.check_window(&window_frame("browser", "b", 2, solid(64, 64, [2, 2, 2])));
        assert!(changed.should_store);
    }

    #[test]
    fn stale_window_states_are_purged() {
        let mut engine = FrameDiffEngine::new(DEFAULT_DIFF_THRESHOLD, DEFAULT_DIFF_THRESHOLD);
        engine.check_window(&window_frame("editor", "a.rs", 1, solid(32, 32, [1, 1, 1])));
        engine.check_window(&window_frame("browser", "b", 2, solid(32, 32, [2, 2, 2])));
        assert_eq!(engine.tracked_window_count(), 2);

        engine.cleanup_stale_windows(&[WindowKey::new("editor", "a.rs", 1)]);
        assert_eq!(engine.tracked_window_count(), 1);

        // The purged stream starts over with a first-frame accept
        let reopened =
            engine.check_window(&window_frame("browser", "b", 2, solid(32, 32, [2, 2, 2])));
        assert!(reopened.should_store);
    }

    #[test]
    fn shape_mismatch_compares_at_common_minimum() {
        let big = solid(128, 128, [50, 50, 50]);
        let small = solid(64, 96, [50, 50, 50]);
        let (combined, _, _) = compare_images(&big, &small);
        assert!(combined < 0.01, "same-content resize should be near zero, got {combined}");
    }

    #[test]
    fn best_rejected_tracks_quiet_period_peak() {
        let mut engine = FrameDiffEngine::new(0.9, 0.9);
        engine.check_screen(&screen_object(0, solid(64, 64, [100, 100, 100])));

        engine.check_screen(&screen_object(0, solid(64, 64, [110, 110, 110])));
        engine.check_screen(&screen_object(0, solid(64, 64, [101, 101, 101])));

        let (_, score) = engine.best_rejected_screen(0).expect("tracked best frame");
        assert!(score > 0.0);
    }
}

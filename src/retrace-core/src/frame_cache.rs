//! Frame cache for the lightweight storage mode
//!
//! Without a vector store, queries draw from a bounded most-recent window
//! of frames. `update` pulls frames newer than the last check from the
//! relational store, filters near-duplicates against the cache tail with
//! the same combined diff metric the ingest pipeline uses, and evicts the
//! oldest entries past `max_size`.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use image::DynamicImage;
use std::collections::VecDeque;
use std::path::Path;
use tracing::{debug, info, warn};

use retrace_db::Database;
use retrace_processing::frame_diff::compare_images;

/// One cached frame ready for a VLM prompt
#[derive(Clone)]
pub struct CachedFrame {
    pub frame_id: String,
    pub timestamp: DateTime<Utc>,
    pub image: DynamicImage,
    pub ocr_text: String,
}

/// Bounded MRU window with intra-cache diff filtering.
pub struct FrameCache {
    max_size: usize,
    diff_threshold: f64,
    last_check_time: Option<DateTime<Utc>>,
    frames: VecDeque<CachedFrame>,
}

impl FrameCache {
    pub fn new(max_size: usize, diff_threshold: f64) -> Self {
        Self {
            max_size: max_size.max(1),
            diff_threshold,
            last_check_time: None,
            frames: VecDeque::new(),
        }
    }

    /// Pull unseen frames from storage into the cache. Returns how many
    /// frames were admitted.
    pub fn update(&mut self, db: &Database, images_root: &Path) -> Result<usize> {
        let start = self
            .last_check_time
            .map(|t| t + Duration::microseconds(1))
            .unwrap_or(DateTime::UNIX_EPOCH);
        let end = Utc::now() + Duration::seconds(1);

        let candidates = retrace_db::get_frames_in_range(db.connection(), start, end, 10_000)?;
        if candidates.is_empty() {
            return Ok(0);
        }

        let mut admitted = 0;
        for frame in candidates {
            self.last_check_time = Some(
                self.last_check_time
                    .map(|t| t.max(frame.timestamp))
                    .unwrap_or(frame.timestamp),
            );

            let image = match load_image(&frame.image_path, images_root, &frame.frame_id, frame.timestamp) {
                Some(image) => image,
                None => continue,
            };

            // Compare against the newest cached frame; near-duplicates
            // are dropped.
            if let Some(tail) = self.frames.back() {
                let (combined, _, _) = compare_images(&image, &tail.image);
                if combined <= self.diff_threshold {
                    debug!(
                        "cache dropped near-duplicate frame {} (diff={:.4})",
                        frame.frame_id, combined
                    );
                    continue;
                }
            }

            self.frames.push_back(CachedFrame {
                frame_id: frame.frame_id,
                timestamp: frame.timestamp,
                image,
                ocr_text: frame.ocr_text,
            });
            admitted += 1;

            while self.frames.len() > self.max_size {
                self.frames.pop_front();
            }
        }

        if admitted > 0 {
            info!("frame cache admitted {} new frame(s), size {}", admitted, self.frames.len());
        }
        Ok(admitted)
    }

    /// Cached frames, newest first.
    pub fn frames(&self) -> Vec<&CachedFrame> {
        self.frames.iter().rev().collect()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

fn load_image(
    image_path: &str,
    images_root: &Path,
    frame_id: &str,
    timestamp: DateTime<Utc>,
) -> Option<DynamicImage> {
    let mut candidates = Vec::new();
    if !image_path.is_empty() && !image_path.starts_with("video_chunk:") {
        candidates.push(std::path::PathBuf::from(image_path));
    }
    candidates.push(crate::storage_paths::image_path_for(images_root, frame_id, timestamp));

    for path in candidates {
        if path.exists() {
            match image::open(&path) {
                Ok(image) => return Some(image),
                Err(e) => warn!("failed to load cached frame image {:?}: {}", path, e),
            }
        }
    }
    None
}

//! On-disk storage layout
//!
//! Everything hangs off the configured storage root:
//! `images/YYYYMMDD/<frame_id>.jpg`, `video_chunks/{screens,windows}/...`,
//! `ocr.db`, `vectors.db`, `text_vectors.db`.

use anyhow::Result;
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use std::path::{Path, PathBuf};

/// Per-frame JPEG path under the images root.
pub fn image_path_for(images_root: &Path, frame_id: &str, timestamp: DateTime<Utc>) -> PathBuf {
    images_root
        .join(timestamp.format("%Y%m%d").to_string())
        .join(format!("{}.jpg", frame_id))
}

/// Write an RGB JPEG at the given quality, creating parent directories.
pub fn save_jpeg(image: &DynamicImage, path: &Path, quality: u8) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let rgb = image.to_rgb8();
    let mut buffer = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
    encoder.encode(
        rgb.as_raw(),
        rgb.width(),
        rgb.height(),
        image::ExtendedColorType::Rgb8,
    )?;
    std::fs::write(path, &buffer)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn image_path_groups_by_date() {
        let ts = Utc.with_ymd_and_hms(2026, 7, 1, 13, 4, 38).unwrap();
        let path = image_path_for(Path::new("/data/images"), "20260701_130438_000000", ts);
        assert_eq!(
            path,
            PathBuf::from("/data/images/20260701/20260701_130438_000000.jpg")
        );
    }

    #[test]
    fn save_jpeg_writes_loadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("frame.jpg");
        let image = DynamicImage::new_rgb8(16, 16);

        save_jpeg(&image, &path, 80).unwrap();
        let loaded = image::open(&path).unwrap();
        assert_eq!(loaded.width(), 16);
    }
}

//! Frame extraction from MP4 chunks
//!
//! Pulls a single frame out of a chunk by its offset index, for query-time
//! image loading when no standalone JPEG exists. Dimensions come from
//! ffprobe; the frame itself is decoded to raw RGB over a pipe.

use anyhow::{anyhow, Result};
use image::{DynamicImage, RgbImage};
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};

/// Extract the frame at `offset_index` from a chunk file.
pub fn extract_chunk_frame(video_path: &Path, offset_index: i64) -> Result<DynamicImage> {
    let (width, height) = probe_dimensions(video_path)?;

    let frame_filter = format!("select=eq(n\\,{})", offset_index);
    let mut child = Command::new("ffmpeg")
        .args(["-i"])
        .arg(video_path)
        .args(["-vf", &frame_filter])
        .args(["-vframes", "1"])
        .args(["-f", "rawvideo"])
        .args(["-pix_fmt", "rgb24"])
        .arg("-")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| anyhow!("failed to spawn ffmpeg: {}", e))?;

    let mut frame_data = Vec::new();
    child
        .stdout
        .as_mut()
        .ok_or_else(|| anyhow!("failed to capture ffmpeg stdout"))?
        .read_to_end(&mut frame_data)?;

    let status = child.wait()?;
    if !status.success() {
        return Err(anyhow!("ffmpeg failed with exit code {:?}", status.code()));
    }

    raw_rgb_to_image(width, height, frame_data)
}

fn probe_dimensions(video_path: &Path) -> Result<(u32, u32)> {
    let output = Command::new("ffprobe")
        .args(["-v", "error"])
        .args(["-select_streams", "v:0"])
        .args(["-show_entries", "stream=width,height"])
        .args(["-of", "csv=p=0"])
        .arg(video_path)
        .output()
        .map_err(|e| anyhow!("failed to run ffprobe: {}", e))?;

    let text = String::from_utf8_lossy(&output.stdout);
    let parts: Vec<&str> = text.trim().split(',').collect();
    if parts.len() != 2 {
        return Err(anyhow!("invalid ffprobe output: {}", text));
    }
    Ok((parts[0].parse()?, parts[1].parse()?))
}

fn raw_rgb_to_image(width: u32, height: u32, data: Vec<u8>) -> Result<DynamicImage> {
    let expected = (width as usize) * (height as usize) * 3;
    if data.len() != expected {
        return Err(anyhow!(
            "unexpected frame data size: got {}, expected {}",
            data.len(),
            expected
        ));
    }
    let buffer = RgbImage::from_raw(width, height, data)
        .ok_or_else(|| anyhow!("failed to build image buffer"))?;
    Ok(DynamicImage::ImageRgb8(buffer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_buffer_of_right_size_becomes_image() {
        let data = vec![128u8; 4 * 2 * 3];
        let image = raw_rgb_to_image(4, 2, data).unwrap();
        assert_eq!(image.width(), 4);
        assert_eq!(image.height(), 2);
    }

    #[test]
    fn short_buffer_is_rejected() {
        assert!(raw_rgb_to_image(4, 2, vec![0u8; 5]).is_err());
    }
}

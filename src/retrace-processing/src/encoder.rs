//! Video chunk encoding via FFmpeg
//!
//! Each stream (one per monitor, one per window) owns a child FFmpeg
//! process fed PNG frames over stdin. Chunks roll once `fps x
//! chunk_duration` frames are written, when the stream goes inactive, or
//! on shutdown.

use anyhow::{anyhow, Result};
use image::DynamicImage;
use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use retrace_capture::WindowKey;

const MAX_FPS: f64 = 30.0;
const CLOSE_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Stream class a chunk belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStreamType {
    Screen,
    Window,
}

impl ChunkStreamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStreamType::Screen => "screen",
            ChunkStreamType::Window => "window",
        }
    }
}

/// Invoked when a new chunk file is opened, before any frame row that
/// references it is written.
pub type ChunkCreatedCallback = Arc<dyn Fn(&Path, ChunkStreamType, &str) + Send + Sync>;

/// Invoked when a chunk is sealed, with the number of frames it holds.
pub type ChunkClosedCallback = Arc<dyn Fn(&Path, ChunkStreamType, &str, u64) + Send + Sync>;

/// Per-stream writer configuration
#[derive(Debug, Clone)]
pub struct ChunkEncoderConfig {
    pub output_dir: PathBuf,
    pub chunk_type: ChunkStreamType,
    pub identifier: String,
    pub fps: f64,
    pub chunk_duration_secs: u64,
}

struct WriterState {
    ffmpeg_process: Option<Child>,
    ffmpeg_stdin: Option<ChildStdin>,
    current_chunk_path: Option<PathBuf>,
    frame_count: u64,
}

/// Writes frames of one stream into H.265 MP4 chunks.
pub struct VideoChunkWriter {
    config: ChunkEncoderConfig,
    frames_per_chunk: u64,
    ffmpeg_path: Option<PathBuf>,
    on_chunk_created: Option<ChunkCreatedCallback>,
    on_chunk_closed: Option<ChunkClosedCallback>,
    state: Mutex<WriterState>,
}

impl VideoChunkWriter {
    pub fn new(
        mut config: ChunkEncoderConfig,
        on_chunk_created: Option<ChunkCreatedCallback>,
        on_chunk_closed: Option<ChunkClosedCallback>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&config.output_dir)?;

        if config.fps <= 0.0 {
            config.fps = 1.0;
        }
        config.fps = config.fps.min(MAX_FPS);
        let frames_per_chunk = ((config.fps * config.chunk_duration_secs as f64) as u64).max(1);

        let ffmpeg_path = find_ffmpeg_path();
        if ffmpeg_path.is_none() {
            error!(
                "ffmpeg not found; chunk writing disabled for {}/{}",
                config.chunk_type.as_str(),
                config.identifier
            );
        }

        info!(
            "chunk writer initialized: {}/{} fps={} chunk_duration={}s",
            config.chunk_type.as_str(),
            config.identifier,
            config.fps,
            config.chunk_duration_secs
        );

        Ok(Self {
            config,
            frames_per_chunk,
            ffmpeg_path,
            on_chunk_created,
            on_chunk_closed,
            state: Mutex::new(WriterState {
                ffmpeg_process: None,
                ffmpeg_stdin: None,
                current_chunk_path: None,
                frame_count: 0,
            }),
        })
    }

    fn generate_chunk_path(&self) -> PathBuf {
        let timestamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
        let filename = format!(
            "{}_{}_{}.mp4",
            self.config.chunk_type.as_str(),
            sanitize_identifier(&self.config.identifier),
            timestamp
        );
        self.config.output_dir.join(filename)
    }

    fn start_ffmpeg(&self, state: &mut WriterState) -> Result<()> {
        let ffmpeg = self
            .ffmpeg_path
            .as_ref()
            .ok_or_else(|| anyhow!("ffmpeg not available"))?;

        let chunk_path = self.generate_chunk_path();

        let mut child = Command::new(ffmpeg)
            .arg("-y")
            .args(["-f", "image2pipe"])
            .args(["-vcodec", "png"])
            .args(["-r", &self.config.fps.to_string()])
            .args(["-i", "-"])
            // Pad to even dimensions, required by H.265
            .args(["-vf", "pad=width=ceil(iw/2)*2:height=ceil(ih/2)*2"])
            .args(["-vcodec", "libx265"])
            .args(["-tag:v", "hvc1"])
            .args(["-preset", "ultrafast"])
            .args(["-crf", "23"])
            .args(["-pix_fmt", "yuv420p"])
            .arg(&chunk_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("failed to open ffmpeg stdin"))?;

        state.ffmpeg_process = Some(child);
        state.ffmpeg_stdin = Some(stdin);
        state.current_chunk_path = Some(chunk_path.clone());
        state.frame_count = 0;

        info!("started new video chunk: {:?}", chunk_path);

        if let Some(cb) = &self.on_chunk_created {
            cb(&chunk_path, self.config.chunk_type, &self.config.identifier);
        }

        Ok(())
    }

    fn finish_ffmpeg(&self, state: &mut WriterState) {
        // EOF to ffmpeg
        state.ffmpeg_stdin.take();

        if let Some(mut child) = state.ffmpeg_process.take() {
            let deadline = Instant::now() + CLOSE_WAIT_TIMEOUT;
            loop {
                match child.try_wait() {
                    Ok(Some(status)) => {
                        if !status.success() {
                            warn!("ffmpeg exited with {:?} for {}", status.code(), self.config.identifier);
                        }
                        break;
                    }
                    Ok(None) => {
                        if Instant::now() >= deadline {
                            warn!("ffmpeg close timed out, killing process");
                            let _ = child.kill();
                            let _ = child.wait();
                            break;
                        }
                        std::thread::sleep(Duration::from_millis(100));
                    }
                    Err(e) => {
                        error!("error waiting for ffmpeg: {}", e);
                        let _ = child.kill();
                        break;
                    }
                }
            }
        }

        if let Some(path) = state.current_chunk_path.take() {
            info!(
                "finished video chunk: {:?} ({} frames)",
                path, state.frame_count
            );
            if let Some(cb) = &self.on_chunk_closed {
                cb(
                    &path,
                    self.config.chunk_type,
                    &self.config.identifier,
                    state.frame_count,
                );
            }
        }
    }

    /// Append a frame, returning `(chunk_path, offset_index)`.
    ///
    /// The offset index is the zero-based position inside the current
    /// chunk; retrieval time equals `offset_index / fps`.
    pub fn write_frame(&self, image: &DynamicImage) -> Result<(PathBuf, u64)> {
        let mut state = self.state.lock().map_err(|_| anyhow!("writer lock poisoned"))?;

        if state.ffmpeg_process.is_none() || state.frame_count >= self.frames_per_chunk {
            if state.ffmpeg_process.is_some() {
                self.finish_ffmpeg(&mut state);
            }
            self.start_ffmpeg(&mut state)?;
        }

        let mut png_data = Vec::new();
        image.write_to(&mut Cursor::new(&mut png_data), image::ImageFormat::Png)?;

        let write_result = match state.ffmpeg_stdin.as_mut() {
            Some(stdin) => stdin.write_all(&png_data).and_then(|_| stdin.flush()),
            None => return Err(anyhow!("ffmpeg stdin not available")),
        };

        if let Err(e) = write_result {
            // Broken pipe: seal what we have, next write opens a fresh chunk
            error!("ffmpeg pipe write failed: {}, closing chunk", e);
            self.finish_ffmpeg(&mut state);
            return Err(anyhow!("frame dropped: ffmpeg pipe failed"));
        }

        let chunk_path = state
            .current_chunk_path
            .clone()
            .ok_or_else(|| anyhow!("no active chunk"))?;
        let offset_index = state.frame_count;
        state.frame_count += 1;

        Ok((chunk_path, offset_index))
    }

    /// Frames written to the current chunk so far.
    pub fn current_frame_count(&self) -> u64 {
        self.state.lock().map(|s| s.frame_count).unwrap_or(0)
    }

    pub fn current_chunk_path(&self) -> Option<PathBuf> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.current_chunk_path.clone())
    }

    /// Seal the current chunk, if any.
    pub fn close(&self) {
        if let Ok(mut state) = self.state.lock() {
            if state.ffmpeg_process.is_some() {
                self.finish_ffmpeg(&mut state);
            }
        }
        debug!(
            "chunk writer closed: {}/{}",
            self.config.chunk_type.as_str(),
            self.config.identifier
        );
    }
}

impl Drop for VideoChunkWriter {
    fn drop(&mut self) {
        self.close();
    }
}

/// One writer per stream: screens keyed by monitor, windows by
/// `(app, title, pid)`.
pub struct VideoChunkManager {
    output_dir: PathBuf,
    fps: f64,
    chunk_duration_secs: u64,
    on_chunk_created: Option<ChunkCreatedCallback>,
    on_chunk_closed: Option<ChunkClosedCallback>,
    screen_writers: HashMap<u32, VideoChunkWriter>,
    window_writers: HashMap<WindowKey, VideoChunkWriter>,
}

impl VideoChunkManager {
    pub fn new(
        output_dir: impl Into<PathBuf>,
        fps: f64,
        chunk_duration_secs: u64,
        on_chunk_created: Option<ChunkCreatedCallback>,
        on_chunk_closed: Option<ChunkClosedCallback>,
    ) -> Self {
        Self {
            output_dir: output_dir.into(),
            fps,
            chunk_duration_secs,
            on_chunk_created,
            on_chunk_closed,
            screen_writers: HashMap::new(),
            window_writers: HashMap::new(),
        }
    }

    fn screen_writer(&mut self, monitor_id: u32) -> Result<&VideoChunkWriter> {
        if !self.screen_writers.contains_key(&monitor_id) {
            let identifier = format!("monitor_{}", monitor_id);
            let config = ChunkEncoderConfig {
                output_dir: self
                    .output_dir
                    .join("video_chunks")
                    .join("screens")
                    .join(sanitize_identifier(&identifier)),
                chunk_type: ChunkStreamType::Screen,
                identifier,
                fps: self.fps,
                chunk_duration_secs: self.chunk_duration_secs,
            };
            let writer = VideoChunkWriter::new(
                config,
                self.on_chunk_created.clone(),
                self.on_chunk_closed.clone(),
            )?;
            self.screen_writers.insert(monitor_id, writer);
        }
        Ok(&self.screen_writers[&monitor_id])
    }

    fn window_writer(&mut self, key: &WindowKey) -> Result<&VideoChunkWriter> {
        if !self.window_writers.contains_key(key) {
            let identifier = key.identifier();
            let config = ChunkEncoderConfig {
                output_dir: self
                    .output_dir
                    .join("video_chunks")
                    .join("windows")
                    .join(sanitize_identifier(&identifier)),
                chunk_type: ChunkStreamType::Window,
                identifier,
                fps: self.fps,
                chunk_duration_secs: self.chunk_duration_secs,
            };
            let writer = VideoChunkWriter::new(
                config,
                self.on_chunk_created.clone(),
                self.on_chunk_closed.clone(),
            )?;
            self.window_writers.insert(key.clone(), writer);
        }
        Ok(&self.window_writers[key])
    }

    /// Write a full-screen frame, returning `(chunk_path, offset_index)`.
    pub fn write_screen_frame(
        &mut self,
        monitor_id: u32,
        image: &DynamicImage,
    ) -> Result<(PathBuf, u64)> {
        self.screen_writer(monitor_id)?.write_frame(image)
    }

    /// Write a window frame, returning `(chunk_path, offset_index)`.
    pub fn write_window_frame(
        &mut self,
        key: &WindowKey,
        image: &DynamicImage,
    ) -> Result<(PathBuf, u64)> {
        self.window_writer(key)?.write_frame(image)
    }

    /// Close and drop writers whose window is no longer on screen.
    pub fn cleanup_inactive_windows(&mut self, active_keys: &[WindowKey]) {
        let inactive: Vec<WindowKey> = self
            .window_writers
            .keys()
            .filter(|k| !active_keys.contains(k))
            .cloned()
            .collect();

        for key in &inactive {
            if let Some(writer) = self.window_writers.remove(key) {
                writer.close();
            }
        }
        if !inactive.is_empty() {
            debug!("cleaned up {} inactive window writer(s)", inactive.len());
        }
    }

    pub fn active_window_count(&self) -> usize {
        self.window_writers.len()
    }

    /// Seal every open chunk.
    pub fn close_all(&mut self) {
        for writer in self.screen_writers.values() {
            writer.close();
        }
        for writer in self.window_writers.values() {
            writer.close();
        }
        self.screen_writers.clear();
        self.window_writers.clear();
        info!("all chunk writers closed");
    }
}

impl Drop for VideoChunkManager {
    fn drop(&mut self) {
        self.close_all();
    }
}

/// Check whether FFmpeg is available on this system.
pub fn check_ffmpeg() -> bool {
    find_ffmpeg_path().is_some()
}

fn find_ffmpeg_path() -> Option<PathBuf> {
    if Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
    {
        return Some(PathBuf::from("ffmpeg"));
    }

    for candidate in ["/usr/bin/ffmpeg", "/usr/local/bin/ffmpeg", "/opt/homebrew/bin/ffmpeg"] {
        let path = PathBuf::from(candidate);
        if path.exists() {
            return Some(path);
        }
    }
    None
}

fn sanitize_identifier(identifier: &str) -> String {
    let sanitized: String = identifier
        .chars()
        .map(|c| match c {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | ' ' => '_',
            '\0'..='\x1f' => '_',
            _ => c,
        })
        .collect();
    let sanitized = sanitized.replace("..", "_");
    let trimmed = sanitized.trim_matches(|c| c == '_' || c == '.').to_string();
    let truncated: String = trimmed.chars().take(100).collect();
    if truncated.is_empty() {
        "stream".to_string()
    } else {
        truncated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_separators() {
        assert_eq!(sanitize_identifier("firefox::tab one::42"), "firefox__tab_one__42");
        assert_eq!(sanitize_identifier("a/b\\c:d"), "a_b_c_d");
    }

    #[test]
    fn sanitize_strips_traversal_and_edges() {
        assert_eq!(sanitize_identifier("../../etc"), "_____etc");
        assert_eq!(sanitize_identifier("__name__"), "name");
    }

    #[test]
    fn sanitize_never_returns_empty() {
        assert_eq!(sanitize_identifier(""), "stream");
        assert_eq!(sanitize_identifier("..."), "stream");
    }

    #[test]
    fn frames_per_chunk_is_fps_times_duration() {
        // fps=1, duration=3 -> rollover after 3 frames: offsets 0,1,2 in
        // chunk one, offset 0 in chunk two.
        let config = ChunkEncoderConfig {
            output_dir: std::env::temp_dir().join("retrace-writer-test"),
            chunk_type: ChunkStreamType::Screen,
            identifier: "monitor_0".to_string(),
            fps: 1.0,
            chunk_duration_secs: 3,
        };
        let writer = VideoChunkWriter::new(config, None, None).unwrap();
        assert_eq!(writer.frames_per_chunk, 3);
    }

    #[test]
    fn fps_is_clamped_to_sane_range() {
        let config = ChunkEncoderConfig {
            output_dir: std::env::temp_dir().join("retrace-writer-test"),
            chunk_type: ChunkStreamType::Screen,
            identifier: "monitor_0".to_string(),
            fps: 0.0,
            chunk_duration_secs: 60,
        };
        let writer = VideoChunkWriter::new(config, None, None).unwrap();
        assert_eq!(writer.config.fps, 1.0);

        let config = ChunkEncoderConfig {
            output_dir: std::env::temp_dir().join("retrace-writer-test"),
            chunk_type: ChunkStreamType::Screen,
            identifier: "monitor_0".to_string(),
            fps: 500.0,
            chunk_duration_secs: 60,
        };
        let writer = VideoChunkWriter::new(config, None, None).unwrap();
        assert_eq!(writer.config.fps, MAX_FPS);
    }
}

//! Relational store record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Full-screen MP4 chunk metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoChunk {
    pub id: i64,
    pub file_path: String,
    pub monitor_id: i64,
    pub device_name: Option<String>,
    pub fps: f64,
    pub frame_count: i64,
    pub created_at: DateTime<Utc>,
}

/// Per-window MP4 chunk metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowChunk {
    pub id: i64,
    pub file_path: String,
    pub app_name: String,
    pub window_name: String,
    pub monitor_id: i64,
    pub fps: f64,
    pub frame_count: i64,
    pub created_at: DateTime<Utc>,
}

/// Accepted full-screen frame.
///
/// Either `image_path` points at a standalone JPEG (lightweight mode) or
/// `(video_chunk_id, offset_index)` reference a chunk (chunked mode).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameRecord {
    pub frame_id: String,
    pub timestamp: DateTime<Utc>,
    pub image_path: String,
    pub device_name: Option<String>,
    pub metadata_json: Option<String>,
    pub video_chunk_id: Option<i64>,
    pub offset_index: Option<i64>,
    pub monitor_id: i64,
    pub image_hash: Option<i64>,
}

/// Accepted per-window frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubFrameRecord {
    pub sub_frame_id: String,
    pub window_chunk_id: Option<i64>,
    pub offset_index: i64,
    pub timestamp: DateTime<Utc>,
    pub app_name: String,
    pub window_name: String,
    pub process_id: i64,
    pub is_focused: bool,
    pub image_hash: Option<i64>,
}

/// Which entity an OCR row belongs to; exactly one side is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OcrParent {
    Frame(String),
    SubFrame(String),
}

/// OCR result row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrText {
    pub id: i64,
    pub frame_id: Option<String>,
    pub sub_frame_id: Option<String>,
    pub text: String,
    pub text_json: Option<String>,
    pub ocr_engine: String,
    pub text_length: i64,
    pub confidence: f64,
}

/// New full-screen chunk to insert
#[derive(Debug, Clone)]
pub struct NewVideoChunk {
    pub file_path: String,
    pub monitor_id: i64,
    pub device_name: Option<String>,
    pub fps: f64,
}

/// New window chunk to insert
#[derive(Debug, Clone)]
pub struct NewWindowChunk {
    pub file_path: String,
    pub app_name: String,
    pub window_name: String,
    pub monitor_id: i64,
    pub fps: f64,
}

/// New frame to upsert
#[derive(Debug, Clone)]
pub struct NewFrame {
    pub frame_id: String,
    pub timestamp: DateTime<Utc>,
    pub image_path: String,
    pub device_name: Option<String>,
    pub metadata_json: Option<String>,
    pub video_chunk_id: Option<i64>,
    pub offset_index: Option<i64>,
    pub monitor_id: i64,
    pub image_hash: Option<i64>,
}

/// New sub-frame to upsert
#[derive(Debug, Clone)]
pub struct NewSubFrame {
    pub sub_frame_id: String,
    pub window_chunk_id: Option<i64>,
    pub offset_index: i64,
    pub timestamp: DateTime<Utc>,
    pub app_name: String,
    pub window_name: String,
    pub process_id: i64,
    pub is_focused: bool,
    pub image_hash: Option<i64>,
}

/// New OCR row
#[derive(Debug, Clone)]
pub struct NewOcrText {
    pub parent: OcrParent,
    pub text: String,
    pub text_json: Option<String>,
    pub ocr_engine: String,
    pub confidence: f64,
}

/// Frame with its optional OCR text (LEFT JOIN semantics)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameWithOcr {
    pub frame_id: String,
    pub timestamp: DateTime<Utc>,
    pub image_path: String,
    pub device_name: Option<String>,
    pub metadata_json: Option<String>,
    pub ocr_text: String,
    pub ocr_confidence: f64,
}

/// One full-text search hit over OCR text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrSearchHit {
    pub frame_id: String,
    pub timestamp: DateTime<Utc>,
    pub image_path: String,
    pub device_name: Option<String>,
    pub text: String,
    pub confidence: f64,
    pub ocr_engine: String,
    /// BM25-derived relevance; higher is better. Zero-score rows are
    /// dropped by callers.
    pub score: f64,
}

/// Chunk reference needed to extract a frame image
#[derive(Debug, Clone)]
pub struct FrameVideoInfo {
    pub frame_id: String,
    pub chunk_id: i64,
    pub offset_index: i64,
    pub file_path: String,
    pub fps: f64,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate table counts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageStats {
    pub total_frames: i64,
    pub total_ocr_results: i64,
    pub total_text_length: i64,
    pub total_video_chunks: i64,
    pub total_window_chunks: i64,
    pub total_sub_frames: i64,
}

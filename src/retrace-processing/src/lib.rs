//! retrace-processing - Frame filtering and video encoding
//!
//! Frame-difference detection decides which captures are worth keeping;
//! accepted frames are piped into per-stream FFmpeg processes that roll
//! MP4 chunks by duration.

pub mod encoder;
pub mod extract;
pub mod frame_diff;

pub use encoder::{check_ffmpeg, ChunkEncoderConfig, VideoChunkManager, VideoChunkWriter};
pub use extract::extract_chunk_frame;
pub use frame_diff::{FrameDiffEngine, FrameDiffResult};

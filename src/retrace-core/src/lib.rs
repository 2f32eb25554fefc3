//! Retrace Core Library
//!
//! The recording coordinator, offline index rebuilder, frame cache for
//! the lightweight storage mode, configuration and logging.

pub mod config;
pub mod frame_cache;
pub mod frame_id;
pub mod logging;
pub mod rebuild;
pub mod recorder;
pub mod storage_paths;

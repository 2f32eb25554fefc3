//! Configuration management
//!
//! Every option is an environment variable with a default; CLI flags
//! override a handful of them. Invalid values that cannot be recovered
//! fail fast at startup.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Storage configuration: lightweight JPEGs or chunked video + vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageMode {
    Simple,
    Vector,
}

impl StorageMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageMode::Simple => "simple",
            StorageMode::Vector => "vector",
        }
    }
}

impl std::str::FromStr for StorageMode {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "simple" => Ok(StorageMode::Simple),
            "vector" => Ok(StorageMode::Vector),
            other => Err(anyhow!("invalid STORAGE_MODE: {} (expected simple|vector)", other)),
        }
    }
}

/// Full configuration resolved from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub storage_root: PathBuf,
    pub storage_mode: StorageMode,

    // Capture & encoding
    pub fps: f64,
    pub chunk_duration_secs: u64,
    pub monitor_id: Option<u32>,
    pub capture_windows: bool,
    pub capture_unfocused_windows: bool,
    pub max_image_width: u32,
    pub image_quality: u8,

    // Frame difference thresholds
    pub simple_filter_diff_threshold: f64,
    pub screen_diff_threshold: f64,
    pub window_diff_threshold: f64,

    // Pipeline toggles
    pub enable_ocr: bool,
    pub enable_hybrid: bool,
    pub enable_rerank: bool,
    pub rerank_top_k: usize,
    pub enable_llm_rewrite: bool,
    pub enable_time_filter: bool,
    pub query_rewrite_num: usize,
    pub max_images_to_load: usize,
    pub enable_query_frame_diff: bool,

    // Models & engines
    pub embedding_model: String,
    pub embedding_api_url: Option<String>,
    pub embedding_dim: usize,
    pub rerank_model: String,
    pub ocr_engine_type: String,
    pub ocr_remote_endpoint: Option<String>,

    // Store locations
    pub ocr_db_path: PathBuf,
    pub vector_db_path: PathBuf,
    pub text_vector_db_path: PathBuf,
    pub image_storage_path: PathBuf,

    // VLM endpoint
    pub vlm_api_uri: String,
    pub vlm_api_key: Option<String>,
    pub vlm_api_model: String,
    pub vlm_backend_type: String,

    // Optional dedicated rewrite endpoint
    pub query_rewrite_base_url: Option<String>,
    pub query_rewrite_model: Option<String>,
    pub query_rewrite_api_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        let storage_root = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Retrace");
        Self::with_root(storage_root)
    }
}

impl Config {
    fn with_root(storage_root: PathBuf) -> Self {
        Self {
            ocr_db_path: storage_root.join("ocr.db"),
            vector_db_path: storage_root.join("vectors.db"),
            text_vector_db_path: storage_root.join("text_vectors.db"),
            image_storage_path: storage_root.join("images"),
            storage_root,
            storage_mode: StorageMode::Vector,
            fps: 1.0,
            chunk_duration_secs: 60,
            monitor_id: None,
            capture_windows: true,
            capture_unfocused_windows: true,
            max_image_width: 0,
            image_quality: 80,
            simple_filter_diff_threshold: 0.05,
            screen_diff_threshold: 0.006,
            window_diff_threshold: 0.006,
            enable_ocr: true,
            enable_hybrid: true,
            enable_rerank: false,
            rerank_top_k: 5,
            enable_llm_rewrite: false,
            enable_time_filter: false,
            query_rewrite_num: 3,
            max_images_to_load: 10,
            enable_query_frame_diff: false,
            embedding_model: "clip-vit-base-patch32".to_string(),
            embedding_api_url: None,
            embedding_dim: 512,
            rerank_model: "qwen3-vl-reranker".to_string(),
            ocr_engine_type: "tesseract".to_string(),
            ocr_remote_endpoint: None,
            vlm_api_uri: "http://127.0.0.1:8000".to_string(),
            vlm_api_key: None,
            vlm_api_model: "qwen2.5-vl".to_string(),
            vlm_backend_type: "vllm".to_string(),
            query_rewrite_base_url: None,
            query_rewrite_model: None,
            query_rewrite_api_key: None,
        }
    }

    /// Read the configuration from the environment.
    pub fn from_env() -> Result<Self> {
        let storage_root = env_var("STORAGE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::data_local_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("Retrace")
            });
        let mut config = Self::with_root(storage_root);

        if let Some(mode) = env_var("STORAGE_MODE") {
            config.storage_mode = mode.parse()?;
        }

        // CAPTURE_INTERVAL_SECONDS takes precedence over FPS when both
        // are set: the interval is the reciprocal of the effective fps.
        if let Some(fps) = env_parse::<f64>("FPS")? {
            config.fps = fps;
        }
        if let Some(interval) = env_parse::<f64>("CAPTURE_INTERVAL_SECONDS")? {
            if interval > 0.0 {
                config.fps = 1.0 / interval;
            }
        }
        if config.fps <= 0.0 {
            return Err(anyhow!("FPS must be positive"));
        }

        set_parse(&mut config.chunk_duration_secs, "CHUNK_DURATION_SECONDS")?;
        set_parse(&mut config.simple_filter_diff_threshold, "SIMPLE_FILTER_DIFF_THRESHOLD")?;
        set_parse(&mut config.screen_diff_threshold, "SCREEN_DIFF_THRESHOLD")?;
        set_parse(&mut config.window_diff_threshold, "WINDOW_DIFF_THRESHOLD")?;

        set_bool(&mut config.enable_ocr, "ENABLE_OCR");
        set_bool(&mut config.enable_hybrid, "ENABLE_HYBRID");
        set_bool(&mut config.enable_rerank, "ENABLE_RERANK");
        set_parse(&mut config.rerank_top_k, "RERANK_TOP_K")?;
        set_bool(&mut config.enable_llm_rewrite, "ENABLE_LLM_REWRITE");
        set_bool(&mut config.enable_time_filter, "ENABLE_TIME_FILTER");
        set_parse(&mut config.query_rewrite_num, "QUERY_REWRITE_NUM")?;
        set_parse(&mut config.max_images_to_load, "MAX_IMAGES_TO_LOAD")?;
        set_bool(&mut config.enable_query_frame_diff, "ENABLE_QUERY_FRAME_DIFF");

        if let Some(v) = env_var("EMBEDDING_MODEL") {
            config.embedding_model = v;
        }
        config.embedding_api_url = env_var("EMBEDDING_API_URL");
        set_parse(&mut config.embedding_dim, "EMBEDDING_DIM")?;
        if let Some(v) = env_var("RERANK_MODEL") {
            config.rerank_model = v;
        }
        if let Some(v) = env_var("OCR_ENGINE_TYPE") {
            config.ocr_engine_type = v;
        }
        config.ocr_remote_endpoint = env_var("OCR_REMOTE_ENDPOINT");

        if let Some(v) = env_var("OCR_DB_PATH") {
            config.ocr_db_path = PathBuf::from(v);
        }
        if let Some(v) = env_var("LANCEDB_PATH") {
            config.vector_db_path = PathBuf::from(v);
        }
        if let Some(v) = env_var("TEXT_LANCEDB_PATH") {
            config.text_vector_db_path = PathBuf::from(v);
        }
        if let Some(v) = env_var("IMAGE_STORAGE_PATH") {
            config.image_storage_path = PathBuf::from(v);
        }

        if let Some(v) = env_var("VLM_API_URI") {
            config.vlm_api_uri = v;
        }
        config.vlm_api_key = env_var("VLM_API_KEY");
        if let Some(v) = env_var("VLM_API_MODEL") {
            config.vlm_api_model = v;
        }
        if let Some(v) = env_var("VLM_BACKEND_TYPE") {
            config.vlm_backend_type = v;
        }

        config.query_rewrite_base_url = env_var("QUERY_REWRITE_BASE_URL");
        config.query_rewrite_model = env_var("QUERY_REWRITE_MODEL");
        config.query_rewrite_api_key = env_var("QUERY_REWRITE_API_KEY");

        set_parse(&mut config.max_image_width, "MAX_IMAGE_WIDTH")?;
        if let Some(quality) = env_parse::<u8>("IMAGE_QUALITY")? {
            if !(1..=100).contains(&quality) {
                return Err(anyhow!("IMAGE_QUALITY must be in 1..=100, got {}", quality));
            }
            config.image_quality = quality;
        }

        if let Some(monitor) = env_parse::<u32>("MONITOR_ID")? {
            config.monitor_id = Some(monitor);
        }
        set_bool(&mut config.capture_windows, "CAPTURE_WINDOWS");
        set_bool(&mut config.capture_unfocused_windows, "CAPTURE_UNFOCUSED_WINDOWS");

        Ok(config)
    }

    /// Base URL, key and model for the rewrite LLM: the dedicated
    /// endpoint when configured, otherwise the VLM endpoint.
    pub fn rewrite_endpoint(&self) -> (String, Option<String>, String) {
        match &self.query_rewrite_base_url {
            Some(base) if !base.trim().is_empty() => (
                base.clone(),
                self.query_rewrite_api_key.clone(),
                self.query_rewrite_model
                    .clone()
                    .unwrap_or_else(|| self.vlm_api_model.clone()),
            ),
            _ => (
                self.vlm_api_uri.clone(),
                self.vlm_api_key.clone(),
                self.vlm_api_model.clone(),
            ),
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env_var(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow!("invalid {}: {}", name, e)),
        None => Ok(None),
    }
}

fn set_parse<T: std::str::FromStr>(target: &mut T, name: &str) -> Result<()>
where
    T::Err: std::fmt::Display,
{
    if let Some(value) = env_parse(name)? {
        *target = value;
    }
    Ok(())
}

fn set_bool(target: &mut bool, name: &str) {
    if let Some(raw) = env_var(name) {
        *target = matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_mode_parses_both_values() {
        assert_eq!("simple".parse::<StorageMode>().unwrap(), StorageMode::Simple);
        assert_eq!("VECTOR".parse::<StorageMode>().unwrap(), StorageMode::Vector);
        assert!("other".parse::<StorageMode>().is_err());
    }

    #[test]
    fn default_paths_hang_off_storage_root() {
        let config = Config::with_root(PathBuf::from("/data/retrace"));
        assert_eq!(config.ocr_db_path, PathBuf::from("/data/retrace/ocr.db"));
        assert_eq!(config.vector_db_path, PathBuf::from("/data/retrace/vectors.db"));
        assert_eq!(config.image_storage_path, PathBuf::from("/data/retrace/images"));
    }

    #[test]
    fn rewrite_endpoint_prefers_dedicated_config() {
        let mut config = Config::with_root(PathBuf::from("/tmp/x"));
        config.vlm_api_uri = "http://vlm:8000".to_string();
        config.vlm_api_model = "vlm-model".to_string();

        let (base, _, model) = config.rewrite_endpoint();
        assert_eq!(base, "http://vlm:8000");
        assert_eq!(model, "vlm-model");

        config.query_rewrite_base_url = Some("http://rewrite:9000".to_string());
        let (base, _, model) = config.rewrite_endpoint();
        assert_eq!(base, "http://rewrite:9000");
        // Model falls back to the VLM model when unset
        assert_eq!(model, "vlm-model");
    }
}

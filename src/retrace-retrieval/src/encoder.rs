//! Embedding encoder collaborator
//!
//! One tagged variant per backend, chosen once at startup. The remote
//! variant talks to an OpenAI-compatible embeddings endpoint; the hashing
//! variant is a deterministic offline stand-in used by tests and by
//! environments without an embedding service.

use base64::Engine as _;
use image::imageops::FilterType;
use image::DynamicImage;
use serde_json::{json, Value};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use crate::error::RetrievalError;
use crate::vlm::image_to_data_url;
use retrace_db::l2_normalize;

const EMBEDDING_TIMEOUT: Duration = Duration::from_secs(30);

/// Tagged encoder; `encode_*` always returns an L2-normalized vector of
/// `dim()` components.
pub enum Encoder {
    Remote(RemoteEncoder),
    Hashing(HashingEncoder),
}

impl Encoder {
    pub fn dim(&self) -> usize {
        match self {
            Encoder::Remote(e) => e.dim,
            Encoder::Hashing(e) => e.dim,
        }
    }

    pub async fn encode_text(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        match self {
            Encoder::Remote(e) => e.embed(json!(text)).await,
            Encoder::Hashing(e) => Ok(e.encode_text(text)),
        }
    }

    pub async fn encode_image(&self, image: &DynamicImage) -> Result<Vec<f32>, RetrievalError> {
        match self {
            Encoder::Remote(e) => {
                let data_url = image_to_data_url(image, 80)?;
                e.embed(json!(data_url)).await
            }
            Encoder::Hashing(e) => Ok(e.encode_image(image)),
        }
    }
}

/// OpenAI-compatible `/v1/embeddings` client. Image inputs are sent as
/// data URLs, which multimodal embedding servers accept as input items.
pub struct RemoteEncoder {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub dim: usize,
    client: reqwest::Client,
}

impl RemoteEncoder {
    pub fn new(base_url: String, api_key: Option<String>, model: String, dim: usize) -> Self {
        Self {
            base_url,
            api_key,
            model,
            dim,
            client: reqwest::Client::new(),
        }
    }

    async fn embed(&self, input: Value) -> Result<Vec<f32>, RetrievalError> {
        let endpoint = format!("{}/v1/embeddings", self.base_url.trim_end_matches('/'));
        let payload = json!({
            "model": self.model,
            "input": [input],
        });

        let mut request = self
            .client
            .post(&endpoint)
            .timeout(EMBEDDING_TIMEOUT)
            .json(&payload);
        if let Some(key) = &self.api_key {
            if !key.is_empty() {
                request = request.header("Authorization", format!("Bearer {}", key));
            }
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RetrievalError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let body: Value = response.json().await?;
        let embedding = body
            .pointer("/data/0/embedding")
            .and_then(Value::as_array)
            .ok_or_else(|| RetrievalError::ResponseShape("missing data[0].embedding".to_string()))?;

        let mut vector: Vec<f32> = embedding
            .iter()
            .filter_map(Value::as_f64)
            .map(|v| v as f32)
            .collect();

        if vector.len() != self.dim {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.dim,
                got: vector.len(),
            });
        }

        l2_normalize(&mut vector);
        Ok(vector)
    }
}

/// Deterministic feature-hashing encoder producing unit vectors.
///
/// Text features are lowercase tokens; image features are the pixels of a
/// 16x16 grayscale downsample. Not semantically meaningful, but identical
/// inputs map to identical vectors and token overlap yields similarity,
/// which is what the offline/test paths need.
pub struct HashingEncoder {
    pub dim: usize,
}

impl HashingEncoder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    pub fn encode_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];
        for token in text.to_lowercase().split_whitespace() {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let bucket = (hasher.finish() as usize) % self.dim;
            vector[bucket] += 1.0;
        }
        finish(vector)
    }

    pub fn encode_image(&self, image: &DynamicImage) -> Vec<f32> {
        let small = image.resize_exact(16, 16, FilterType::Triangle).to_luma8();
        let mut vector = vec![0.0f32; self.dim];
        for (i, px) in small.as_raw().iter().enumerate() {
            vector[i % self.dim] += *px as f32 / 255.0;
        }
        finish(vector)
    }
}

fn finish(mut vector: Vec<f32>) -> Vec<f32> {
    l2_normalize(&mut vector);
    if vector.iter().all(|v| *v == 0.0) {
        // Degenerate input: fall back to a fixed unit vector so the
        // unit-norm invariant holds for every stored row.
        vector[0] = 1.0;
    }
    vector
}

//! VLM API client
//!
//! Two wire formats behind one client: the OpenAI-compatible
//! `/v1/chat/completions` path (vllm backend) with interleaved timestamp
//! text and `image_url` items, and the flat `/generate` path
//! (transformer backend) taking `{images, text}`.

use base64::Engine as _;
use chrono::{DateTime, Local, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::RetrievalError;

const CHAT_ENDPOINT: &str = "/v1/chat/completions";
const GENERATE_ENDPOINT: &str = "/generate";

const IMAGE_CALL_TIMEOUT: Duration = Duration::from_secs(360);
const TEXT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Which serving stack the VLM endpoint runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VlmBackend {
    Vllm,
    Transformer,
}

impl VlmBackend {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "transformer" => VlmBackend::Transformer,
            _ => VlmBackend::Vllm,
        }
    }
}

/// VLM endpoint configuration
#[derive(Debug, Clone)]
pub struct VlmSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub backend: VlmBackend,
    pub image_quality: u8,
}

/// HTTP client for the answer VLM.
pub struct VlmClient {
    settings: VlmSettings,
    client: reqwest::Client,
}

impl VlmClient {
    pub fn new(settings: VlmSettings) -> Self {
        debug!(
            "VLM client initialized: {} model={} backend={:?}",
            settings.base_url, settings.model, settings.backend
        );
        Self {
            settings,
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self) -> String {
        let base = self.settings.base_url.trim_end_matches('/');
        match self.settings.backend {
            VlmBackend::Vllm => format!("{base}{CHAT_ENDPOINT}"),
            VlmBackend::Transformer => format!("{base}{GENERATE_ENDPOINT}"),
        }
    }

    /// Answer a question over a set of images with optional per-image
    /// timestamps. Returns the model's content verbatim.
    pub async fn chat_with_images(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        images: &[(DynamicImage, Option<DateTime<Utc>>)],
    ) -> Result<String, RetrievalError> {
        // Current local time helps the model resolve relative phrases
        let local_now = Local::now().format("%Y-%m-%d %H:%M:%S");
        let prompt = format!("Current Local Time: {local_now}\n\n{prompt}");

        let mut data_urls = Vec::with_capacity(images.len());
        for (image, _) in images {
            data_urls.push(image_to_data_url(image, self.settings.image_quality)?);
        }
        info!(
            "sending {} image(s) to VLM (backend {:?})",
            data_urls.len(),
            self.settings.backend
        );

        let payload = match self.settings.backend {
            VlmBackend::Vllm => {
                let timestamps: Vec<Option<DateTime<Utc>>> =
                    images.iter().map(|(_, ts)| *ts).collect();
                build_chat_payload(
                    &self.settings.model,
                    &prompt,
                    system_prompt,
                    &data_urls,
                    &timestamps,
                )
            }
            VlmBackend::Transformer => json!({
                "images": data_urls,
                "text": prompt,
            }),
        };

        let body = self.post(payload, IMAGE_CALL_TIMEOUT).await?;
        self.parse_content(body)
    }

    /// Text-only question; no images attached.
    pub async fn chat_text_only(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
    ) -> Result<String, RetrievalError> {
        let payload = match self.settings.backend {
            VlmBackend::Vllm => {
                let mut messages = Vec::new();
                if let Some(system) = system_prompt {
                    messages.push(json!({"role": "system", "content": system}));
                }
                messages.push(json!({"role": "user", "content": prompt}));
                json!({
                    "model": self.settings.model,
                    "messages": messages,
                    "max_tokens": 4096,
                    "temperature": 0.7,
                })
            }
            VlmBackend::Transformer => json!({
                "images": [],
                "text": prompt,
            }),
        };

        let body = self.post(payload, TEXT_CALL_TIMEOUT).await?;
        self.parse_content(body)
    }

    /// Raw chat call with caller-supplied messages. Only the
    /// OpenAI-compatible backend supports this.
    pub async fn chat_messages(
        &self,
        messages: Vec<Value>,
        temperature: f64,
        timeout: Duration,
    ) -> Result<String, RetrievalError> {
        if self.settings.backend != VlmBackend::Vllm {
            return Err(RetrievalError::ResponseShape(
                "chat_messages requires the OpenAI-compatible backend".to_string(),
            ));
        }
        let payload = json!({
            "model": self.settings.model,
            "messages": messages,
            "temperature": temperature,
        });
        let body = self.post(payload, timeout).await?;
        self.parse_content(body)
    }

    async fn post(&self, payload: Value, timeout: Duration) -> Result<Value, RetrievalError> {
        let mut request = self
            .client
            .post(self.endpoint())
            .timeout(timeout)
            .json(&payload);
        if let Some(key) = &self.settings.api_key {
            if !key.is_empty() && key.to_lowercase() != "none" {
                request = request.header("Authorization", format!("Bearer {}", key));
            }
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RetrievalError::Status {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }
        Ok(response.json().await?)
    }

    fn parse_content(&self, body: Value) -> Result<String, RetrievalError> {
        let content = match self.settings.backend {
            VlmBackend::Vllm => body
                .pointer("/choices/0/message/content")
                .and_then(Value::as_str)
                .map(|s| s.to_string())
                .ok_or_else(|| {
                    RetrievalError::ResponseShape("missing choices[0].message.content".to_string())
                })?,
            VlmBackend::Transformer => body
                .get("response")
                .or_else(|| body.get("text"))
                .or_else(|| body.get("output"))
                .or_else(|| body.get("content"))
                .and_then(Value::as_str)
                .map(|s| s.to_string())
                .unwrap_or_else(|| body.to_string()),
        };
        Ok(strip_think_tags(&content).to_string())
    }
}

/// Build the OpenAI-compatible multimodal message list: each image is
/// preceded by its timestamp as a text item, the final text item is the
/// user prompt.
pub fn build_chat_payload(
    model: &str,
    prompt: &str,
    system_prompt: Option<&str>,
    data_urls: &[String],
    timestamps: &[Option<DateTime<Utc>>],
) -> Value {
    let mut content = Vec::new();

    for (idx, data_url) in data_urls.iter().enumerate() {
        if let Some(Some(ts)) = timestamps.get(idx) {
            let local = ts.with_timezone(&Local);
            content.push(json!({
                "type": "text",
                "text": format!(
                    "Image {} Timestamp (Local Time): {}",
                    idx + 1,
                    local.format("%Y-%m-%d %H:%M:%S")
                ),
            }));
        }
        content.push(json!({
            "type": "image_url",
            "image_url": { "url": data_url },
        }));
    }

    content.push(json!({ "type": "text", "text": prompt }));

    let mut messages = Vec::new();
    if let Some(system) = system_prompt {
        messages.push(json!({"role": "system", "content": system}));
    }
    messages.push(json!({"role": "user", "content": content}));

    json!({
        "model": model,
        "messages": messages,
        "max_tokens": 4096,
        "temperature": 0.7,
    })
}

/// Encode an image as a `data:image/jpeg;base64,...` URL.
pub fn image_to_data_url(image: &DynamicImage, quality: u8) -> Result<String, RetrievalError> {
    let rgb = image.to_rgb8();
    let mut buffer = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
    encoder
        .encode(
            rgb.as_raw(),
            rgb.width(),
            rgb.height(),
            image::ExtendedColorType::Rgb8,
        )
        .map_err(|e| RetrievalError::ImageEncode(e.to_string()))?;

    let encoded = base64::engine::general_purpose::STANDARD.encode(&buffer);
    Ok(format!("data:image/jpeg;base64,{encoded}"))
}

/// Strip a leading `<think>...</think>` wrapper emitted by thinking
/// models.
pub fn strip_think_tags(content: &str) -> &str {
    let trimmed = content.trim();
    if let Some(rest) = trimmed.strip_prefix("<think>") {
        if let Some(end) = rest.find("</think>") {
            return rest[end + "</think>".len()..].trim();
        }
    }
    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn strip_think_removes_wrapper() {
        let wrapped = "<think>internal reasoning</think>\nThe answer is 42.";
        assert_eq!(strip_think_tags(wrapped), "The answer is 42.");
    }

    #[test]
    fn strip_think_passes_plain_content() {
        assert_eq!(strip_think_tags("  plain  "), "plain");
        assert_eq!(strip_think_tags("<think>unterminated"), "<think>unterminated");
    }

    #[test]
    fn chat_payload_interleaves_timestamps_and_images() {
        let urls = vec![
            "data:image/jpeg;base64,AAAA".to_string(),
            "data:image/jpeg;base64,BBBB".to_string(),
            "data:image/jpeg;base64,CCCC".to_string(),
        ];
        let ts: Vec<Option<DateTime<Utc>>> = (0..3)
            .map(|i| Some(Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, i).unwrap()))
            .collect();

        let payload = build_chat_payload("test-model", "the question", Some("system"), &urls, &ts);

        let messages = payload["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");

        let content = messages[1]["content"].as_array().unwrap();
        // 3 timestamp texts + 3 images + 1 final prompt
        assert_eq!(content.len(), 7);

        let image_items: Vec<&Value> = content
            .iter()
            .filter(|item| item["type"] == "image_url")
            .collect();
        assert_eq!(image_items.len(), 3);

        // Each image_url item is directly preceded by a timestamp text
        for (i, item) in content.iter().enumerate() {
            if item["type"] == "image_url" {
                let prev = &content[i - 1];
                assert_eq!(prev["type"], "text");
                assert!(prev["text"].as_str().unwrap().contains("Timestamp"));
            }
        }

        // The last item is the user prompt
        let last = content.last().unwrap();
        assert_eq!(last["type"], "text");
        assert_eq!(last["text"], "the question");
    }

    #[test]
    fn chat_payload_without_timestamps_has_no_timestamp_items() {
        let urls = vec!["data:image/jpeg;base64,AAAA".to_string()];
        let payload = build_chat_payload("m", "q", None, &urls, &[None]);
        let content = payload["messages"][0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 2); // image + prompt
    }

    #[test]
    fn data_url_has_jpeg_prefix() {
        let image = DynamicImage::new_rgb8(8, 8);
        let url = image_to_data_url(&image, 80).unwrap();
        assert!(url.starts_with("data:image/jpeg;base64,"));
    }

    #[test]
    fn backend_parse_is_case_insensitive() {
        assert_eq!(VlmBackend::from_str_lossy("TRANSFORMER"), VlmBackend::Transformer);
        assert_eq!(VlmBackend::from_str_lossy("vllm"), VlmBackend::Vllm);
        assert_eq!(VlmBackend::from_str_lossy("anything"), VlmBackend::Vllm);
    }
}

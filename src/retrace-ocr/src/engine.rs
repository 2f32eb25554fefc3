//! OCR engine variants
//!
//! The engine kind is chosen once at startup from configuration; every
//! variant answers the same `recognize` call.

use base64::Engine as _;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::process::Stdio;
use tracing::{debug, warn};

use crate::error::{OcrError, Result};

/// Recognized word with bounding box and confidence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrWord {
    pub text: String,
    pub confidence: f32,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Recognized line of words
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrLine {
    pub text: String,
    pub words: Vec<OcrWord>,
}

/// Complete OCR result for one image
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OcrOutput {
    pub text: String,
    pub lines: Vec<OcrLine>,
    pub confidence: f32,
    pub engine: String,
}

impl OcrOutput {
    /// Word-level layout serialized for the `text_json` column.
    pub fn text_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.lines)?)
    }
}

/// Tagged OCR engine; one variant per backend kind.
pub enum OcrEngine {
    /// Shells out to the system `tesseract` binary (TSV output).
    Tesseract { lang: String },
    /// HTTP OCR service taking a base64 PNG and returning JSON.
    Remote {
        endpoint: String,
        api_key: Option<String>,
        client: reqwest::Client,
    },
    /// No-op engine; recognize always returns an empty result.
    Disabled,
}

impl OcrEngine {
    /// Build the engine named by `OCR_ENGINE_TYPE`.
    pub fn from_config(
        engine_type: &str,
        remote_endpoint: Option<String>,
        api_key: Option<String>,
    ) -> Result<Self> {
        match engine_type.to_lowercase().as_str() {
            "tesseract" | "pytesseract" => Ok(Self::Tesseract {
                lang: "eng".to_string(),
            }),
            "remote" | "paddleocr" | "paddle" => {
                let endpoint = remote_endpoint.ok_or_else(|| {
                    OcrError::EngineInitFailed(
                        "remote OCR selected but no endpoint configured".to_string(),
                    )
                })?;
                Ok(Self::Remote {
                    endpoint,
                    api_key,
                    client: reqwest::Client::new(),
                })
            }
            "disabled" | "none" | "dummy" => Ok(Self::Disabled),
            other => Err(OcrError::EngineInitFailed(format!(
                "unknown OCR engine type: {}",
                other
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OcrEngine::Tesseract { .. } => "tesseract",
            OcrEngine::Remote { .. } => "remote",
            OcrEngine::Disabled => "disabled",
        }
    }

    /// Extract text from an image.
    pub async fn recognize(&self, image: &DynamicImage) -> Result<OcrOutput> {
        match self {
            OcrEngine::Tesseract { lang } => recognize_tesseract(image, lang).await,
            OcrEngine::Remote {
                endpoint,
                api_key,
                client,
            } => recognize_remote(image, endpoint, api_key.as_deref(), client).await,
            OcrEngine::Disabled => Ok(OcrOutput {
                engine: "disabled".to_string(),
                ..Default::default()
            }),
        }
    }
}

/// Check whether the tesseract binary is available.
pub fn check_tesseract() -> bool {
    std::process::Command::new("tesseract")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

async fn recognize_tesseract(image: &DynamicImage, lang: &str) -> Result<OcrOutput> {
    let dir = std::env::temp_dir();
    let input = dir.join(format!("retrace-ocr-{}.png", std::process::id()));
    image.save_with_format(&input, image::ImageFormat::Png)?;

    let output = tokio::process::Command::new("tesseract")
        .arg(&input)
        .arg("stdout")
        .args(["-l", lang])
        .arg("tsv")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .await?;

    let _ = std::fs::remove_file(&input);

    if !output.status.success() {
        return Err(OcrError::ProcessingError(format!(
            "tesseract exited with {:?}",
            output.status.code()
        )));
    }

    let tsv = String::from_utf8_lossy(&output.stdout);
    Ok(parse_tesseract_tsv(&tsv))
}

/// Parse tesseract TSV output into lines of words with confidences.
fn parse_tesseract_tsv(tsv: &str) -> OcrOutput {
    let mut lines: Vec<OcrLine> = Vec::new();
    let mut current_key: Option<(u32, u32, u32)> = None;
    let mut current_words: Vec<OcrWord> = Vec::new();
    let mut conf_sum = 0.0f32;
    let mut word_count = 0u32;

    let mut flush = |words: &mut Vec<OcrWord>, lines: &mut Vec<OcrLine>| {
        if !words.is_empty() {
            let text = words.iter().map(|w| w.text.as_str()).collect::<Vec<_>>().join(" ");
            lines.push(OcrLine {
                text,
                words: std::mem::take(words),
            });
        }
    };

    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.split('\t').collect();
        // level page block par line word left top width height conf text
        if cols.len() < 12 {
            continue;
        }
        let level: u32 = cols[0].parse().unwrap_or(0);
        if level != 5 {
            continue;
        }
        let conf: f32 = cols[10].parse().unwrap_or(-1.0);
        let text = cols[11].trim();
        if conf < 0.0 || text.is_empty() {
            continue;
        }

        let key = (
            cols[2].parse().unwrap_or(0),
            cols[3].parse().unwrap_or(0),
            cols[4].parse().unwrap_or(0),
        );
        if current_key != Some(key) {
            flush(&mut current_words, &mut lines);
            current_key = Some(key);
        }

        let confidence = (conf / 100.0).clamp(0.0, 1.0);
        conf_sum += confidence;
        word_count += 1;
        current_words.push(OcrWord {
            text: text.to_string(),
            confidence,
            x: cols[6].parse().unwrap_or(0.0),
            y: cols[7].parse().unwrap_or(0.0),
            width: cols[8].parse().unwrap_or(0.0),
            height: cols[9].parse().unwrap_or(0.0),
        });
    }
    flush(&mut current_words, &mut lines);

    let text = lines.iter().map(|l| l.text.as_str()).collect::<Vec<_>>().join("\n");
    let confidence = if word_count > 0 {
        conf_sum / word_count as f32
    } else {
        0.0
    };

    debug!(
        "tesseract parsed {} line(s), {} word(s), confidence {:.2}",
        lines.len(),
        word_count,
        confidence
    );

    OcrOutput {
        text,
        lines,
        confidence,
        engine: "tesseract".to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct RemoteOcrResponse {
    #[serde(default)]
    text: String,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    lines: Vec<OcrLine>,
}

async fn recognize_remote(
    image: &DynamicImage,
    endpoint: &str,
    api_key: Option<&str>,
    client: &reqwest::Client,
) -> Result<OcrOutput> {
    let mut png = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
        .map_err(OcrError::Image)?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(&png);

    let mut request = client
        .post(endpoint)
        .timeout(std::time::Duration::from_secs(30))
        .json(&serde_json::json!({ "image": encoded }));
    if let Some(key) = api_key {
        request = request.header("Authorization", format!("Bearer {}", key));
    }

    let response = request
        .send()
        .await
        .map_err(|e| OcrError::RequestFailed(e.to_string()))?;

    if !response.status().is_success() {
        return Err(OcrError::RequestFailed(format!(
            "OCR endpoint returned {}",
            response.status()
        )));
    }

    let parsed: RemoteOcrResponse = response
        .json()
        .await
        .map_err(|e| OcrError::RequestFailed(e.to_string()))?;

    if parsed.text.is_empty() {
        warn!("remote OCR returned no text");
    }

    let confidence = parsed.confidence.unwrap_or(0.0).clamp(0.0, 1.0);
    Ok(OcrOutput {
        text: parsed.text,
        lines: parsed.lines,
        confidence,
        engine: "remote".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext\n\
1\t1\t0\t0\t0\t0\t0\t0\t640\t480\t-1\t\n\
5\t1\t1\t1\t1\t1\t10\t10\t50\t20\t96.5\thello\n\
5\t1\t1\t1\t1\t2\t70\t10\t60\t20\t91.0\tworld\n\
5\t1\t1\t1\t2\t1\t10\t40\t80\t20\t88.0\tsecond\n";

    #[test]
    fn tsv_parse_groups_words_into_lines() {
        let out = parse_tesseract_tsv(SAMPLE_TSV);
        assert_eq!(out.lines.len(), 2);
        assert_eq!(out.lines[0].text, "hello world");
        assert_eq!(out.lines[1].text, "second");
        assert_eq!(out.text, "hello world\nsecond");
    }

    #[test]
    fn tsv_parse_confidence_is_mean_of_words() {
        let out = parse_tesseract_tsv(SAMPLE_TSV);
        let expected = (0.965 + 0.91 + 0.88) / 3.0;
        assert!((out.confidence - expected).abs() < 1e-3);
        assert!(out.confidence <= 1.0);
    }

    #[test]
    fn tsv_parse_skips_negative_confidence_rows() {
        let tsv = "header\n5\t1\t1\t1\t1\t1\t0\t0\t1\t1\t-1\tghost\n";
        let out = parse_tesseract_tsv(tsv);
        assert!(out.text.is_empty());
        assert_eq!(out.confidence, 0.0);
    }

    #[test]
    fn disabled_engine_returns_empty() {
        let engine = OcrEngine::from_config("disabled", None, None).unwrap();
        let image = DynamicImage::new_rgb8(4, 4);
        let out = tokio::runtime::Runtime::new()
            .unwrap()
            .block_on(engine.recognize(&image))
            .unwrap();
        assert!(out.text.is_empty());
        assert_eq!(out.engine, "disabled");
    }

    #[test]
    fn remote_without_endpoint_fails_fast() {
        assert!(OcrEngine::from_config("remote", None, None).is_err());
    }

    #[test]
    fn unknown_engine_type_is_rejected() {
        assert!(OcrEngine::from_config("magic", None, None).is_err());
    }
}

//! Candidate reranking with a judge VLM
//!
//! Each candidate is scored by asking the judge whether the screenshot
//! helps answer the query, with the first-token logprobs requested. The
//! score is the softmax over the "yes"/"no" token log-probabilities; the
//! top-K candidates survive. Rerank failure is non-fatal: the caller
//! keeps the pre-rerank ordering.

use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::RetrievalError;
use crate::types::RetrievedFrame;
use crate::vlm::image_to_data_url;

const RERANK_TIMEOUT: Duration = Duration::from_secs(30);

/// Judge-VLM reranker over an OpenAI-compatible endpoint with logprobs.
pub struct VlmReranker {
    base_url: String,
    api_key: Option<String>,
    model: String,
    image_quality: u8,
    client: reqwest::Client,
}

impl VlmReranker {
    pub fn new(base_url: String, api_key: Option<String>, model: String, image_quality: u8) -> Self {
        Self {
            base_url,
            api_key,
            model,
            image_quality,
            client: reqwest::Client::new(),
        }
    }

    /// Score and reorder candidates, keeping the `top_k` best. On any
    /// scoring failure the input ordering is returned unchanged.
    pub async fn rerank(
        &self,
        query: &str,
        mut frames: Vec<RetrievedFrame>,
        top_k: usize,
    ) -> Vec<RetrievedFrame> {
        if frames.is_empty() {
            return frames;
        }

        let mut scores = Vec::with_capacity(frames.len());
        for frame in &frames {
            match self.score_candidate(query, frame).await {
                Ok(score) => scores.push(score),
                Err(e) => {
                    warn!("rerank failed ({}), keeping pre-rerank ordering", e);
                    return frames;
                }
            }
        }

        for (frame, score) in frames.iter_mut().zip(scores.iter()) {
            frame.rerank_score = Some(*score);
        }
        frames.sort_by(|a, b| {
            b.rerank_score
                .partial_cmp(&a.rerank_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        frames.truncate(top_k);

        info!("rerank kept top-{} candidate(s)", frames.len());
        frames
    }

    async fn score_candidate(
        &self,
        query: &str,
        frame: &RetrievedFrame,
    ) -> Result<f64, RetrievalError> {
        let mut content = Vec::new();
        if let Some(image) = &frame.image {
            let data_url = image_to_data_url(image, self.image_quality)?;
            content.push(json!({
                "type": "image_url",
                "image_url": { "url": data_url },
            }));
        }

        let mut judge_prompt = format!(
            "Does this screenshot contain information relevant to the query \"{query}\"? \
             Answer with exactly one word: yes or no."
        );
        if frame.image.is_none() && !frame.ocr_text.is_empty() {
            judge_prompt = format!(
                "Screen text: {}\n\n{}",
                frame.ocr_text.chars().take(1000).collect::<String>(),
                judge_prompt
            );
        }
        content.push(json!({ "type": "text", "text": judge_prompt }));

        let payload = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": content}],
            "max_tokens": 1,
            "temperature": 0,
            "logprobs": true,
            "top_logprobs": 20,
        });

        let endpoint = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let mut request = self
            .client
            .post(&endpoint)
            .timeout(RERANK_TIMEOUT)
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
        let top_logprobs = body
            .pointer("/choices/0/logprobs/content/0/top_logprobs")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                RetrievalError::ResponseShape("missing first-token top_logprobs".to_string())
            })?;

        let score = yes_probability(top_logprobs);
        debug!("rerank score {:.3} for frame {}", score, frame.frame_id);
        Ok(score)
    }
}

/// Softmax over the yes/no first-token log-probabilities.
///
/// A missing side is treated as effectively impossible; with neither
/// present the candidate is uninformative and scores 0.5.
pub fn yes_probability(top_logprobs: &[Value]) -> f64 {
    let mut yes_logprob: Option<f64> = None;
    let mut no_logprob: Option<f64> = None;

    for entry in top_logprobs {
        let token = entry
            .get("token")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_lowercase();
        let logprob = entry.get("logprob").and_then(Value::as_f64);

        match token.as_str() {
            "yes" => yes_logprob = yes_logprob.or(logprob),
            "no" => no_logprob = no_logprob.or(logprob),
            _ => {}
        }
    }

    match (yes_logprob, no_logprob) {
        (Some(yes), Some(no)) => {
            let max = yes.max(no);
            let exp_yes = (yes - max).exp();
            let exp_no = (no - max).exp();
            exp_yes / (exp_yes + exp_no)
        }
        (Some(_), None) => 1.0,
        (None, Some(_)) => 0.0,
        (None, None) => 0.5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(token: &str, logprob: f64) -> Value {
        json!({"token": token, "logprob": logprob})
    }

    #[test]
    fn softmax_over_yes_no_logprobs() {
        let probs = vec![entry("yes", -0.1), entry("no", -2.5)];
        let score = yes_probability(&probs);
        let expected = (-0.1f64).exp() / ((-0.1f64).exp() + (-2.5f64).exp());
        assert!((score - expected).abs() < 1e-9);
        assert!(score > 0.9);
    }

    #[test]
    fn missing_no_token_scores_one() {
        let probs = vec![entry("yes", -0.2), entry("maybe", -1.0)];
        assert_eq!(yes_probability(&probs), 1.0);
    }

    #[test]
    fn missing_both_tokens_scores_half() {
        let probs = vec![entry("hmm", -0.2)];
        assert_eq!(yes_probability(&probs), 0.5);
    }

    #[test]
    fn token_matching_ignores_case_and_whitespace() {
        let probs = vec![entry(" Yes", -0.5), entry("NO", -0.5)];
        let score = yes_probability(&probs);
        assert!((score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn first_occurrence_of_each_token_wins() {
        let probs = vec![entry("yes", -1.0), entry("yes", -0.1), entry("no", -1.0)];
        let score = yes_probability(&probs);
        assert!((score - 0.5).abs() < 1e-9);
    }
}

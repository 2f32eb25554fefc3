//! Query expansion and time-range extraction
//!
//! A strict-JSON chat call produces N semantically related dense queries,
//! extracted sparse keywords, and an optional time range. Any failure
//! falls back to the original query with no time filter.

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{info, warn};

use crate::error::RetrievalError;
use crate::prompts::{COMBINED_EXAMPLES, QUERY_REWRITE_EXAMPLES, TIME_RANGE_EXAMPLES};
use crate::vlm::strip_think_tags;

const REWRITE_TIMEOUT: Duration = Duration::from_secs(120);

/// Result of the rewrite call, always usable: on failure the queries fall
/// back to the original and the time range to `None`.
#[derive(Debug, Clone)]
pub struct RewriteOutcome {
    pub dense_queries: Vec<String>,
    pub sparse_queries: Vec<String>,
    pub time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

impl RewriteOutcome {
    pub fn passthrough(query: &str) -> Self {
        Self {
            dense_queries: vec![query.to_string()],
            sparse_queries: vec![query.to_string()],
            time_range: None,
        }
    }
}

/// Client for the rewrite LLM. Uses the dedicated rewrite endpoint when
/// configured, otherwise the VLM endpoint.
pub struct QueryRewriter {
    base_url: String,
    api_key: Option<String>,
    model: String,
    client: reqwest::Client,
}

impl QueryRewriter {
    pub fn new(base_url: String, api_key: Option<String>, model: String) -> Self {
        Self {
            base_url,
            api_key,
            model,
            client: reqwest::Client::new(),
        }
    }

    /// Expand `query` and extract a time range.
    pub async fn rewrite_and_time(
        &self,
        query: &str,
        enable_rewrite: bool,
        enable_time: bool,
        expand_n: usize,
    ) -> RewriteOutcome {
        if !(enable_rewrite || enable_time) {
            return RewriteOutcome::passthrough(query);
        }

        let system_prompt = build_combined_prompt(expand_n, enable_rewrite, enable_time);
        let user_content = format!(
            "{}, current time for reference: {} /no_think",
            query,
            Utc::now().to_rfc3339()
        );

        let content = match self.call_api(&system_prompt, &user_content).await {
            Ok(content) => content,
            Err(e) => {
                warn!("query rewrite failed, using original query: {}", e);
                return RewriteOutcome::passthrough(query);
            }
        };

        let outcome = parse_rewrite_response(&content, query, enable_rewrite, enable_time);
        info!(
            "rewrite produced {} dense, {} sparse, time_range={:?}",
            outcome.dense_queries.len(),
            outcome.sparse_queries.len(),
            outcome.time_range
        );
        outcome
    }

    async fn call_api(&self, system: &str, user: &str) -> Result<String, RetrievalError> {
        let endpoint = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let payload = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "temperature": 0,
        });

        let mut request = self
            .client
            .post(&endpoint)
            .timeout(REWRITE_TIMEOUT)
            .json(&payload);
        if let Some(key) = &self.api_key {
            if !key.is_empty() && key.to_lowercase() != "none" {
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
        let content = body
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| RetrievalError::ResponseShape("missing message content".to_string()))?;

        let content = strip_think_tags(content);
        if content.is_empty() {
            return Err(RetrievalError::ResponseShape("empty content".to_string()));
        }
        Ok(content.to_string())
    }
}

fn build_combined_prompt(expand_n: usize, rewrite: bool, need_time: bool) -> String {
    let examples = if rewrite && need_time {
        COMBINED_EXAMPLES
    } else if rewrite {
        QUERY_REWRITE_EXAMPLES
    } else {
        TIME_RANGE_EXAMPLES
    };

    format!(
        r#"You are part of an academic information system that processes researchers' queries about computer systems.
For each query, return JSON only. If you cannot infer, fall back to the original query and time_range null.

Fields:
- dense_queries: {expand_n} queries that are similar in meaning and semantically related to the original query
- sparse_queries: Important keywords and key phrases extracted from the query
- time_range: object with "start"/"end" in ISO "YYYY-MM-DD HH:MM:SS", or "null" if you cannot infer the time range

Your Task:
Generate both dense and sparse query expansions for the following query. Return only valid JSON in the specified format. No extra text.

{examples}"#
    )
}

/// Parse the rewrite response; never fails, every miss falls back.
pub fn parse_rewrite_response(
    content: &str,
    query: &str,
    enable_rewrite: bool,
    enable_time: bool,
) -> RewriteOutcome {
    let mut outcome = RewriteOutcome::passthrough(query);
    let content = strip_think_tags(content);

    let parsed: Value = match serde_json::from_str(content) {
        Ok(v) => v,
        Err(e) => {
            warn!("rewrite response is not valid JSON: {}", e);
            if enable_time {
                outcome.time_range = extract_time_range(content);
            }
            return outcome;
        }
    };

    if enable_rewrite {
        if let Some(queries) = string_array(&parsed, "dense_queries") {
            if !queries.is_empty() {
                outcome.dense_queries = queries;
            }
        }
        if let Some(queries) = string_array(&parsed, "sparse_queries") {
            if !queries.is_empty() {
                outcome.sparse_queries = queries;
            }
        }
    }

    if enable_time {
        let range = parsed.get("time_range").or_else(|| parsed.get("time_range_str"));
        outcome.time_range = match range {
            Some(Value::Object(obj)) => {
                let start = obj.get("start").and_then(Value::as_str).and_then(parse_loose_datetime);
                let end = obj.get("end").and_then(Value::as_str).and_then(parse_loose_datetime);
                match (start, end) {
                    (Some(start), Some(end)) => Some(order_range(start, end)),
                    _ => None,
                }
            }
            Some(Value::String(s)) => extract_time_range(s),
            _ => None,
        };
    }

    outcome
}

fn string_array(value: &Value, key: &str) -> Option<Vec<String>> {
    value.get(key)?.as_array().map(|arr| {
        arr.iter()
            .filter_map(Value::as_str)
            .map(|s| s.to_string())
            .collect()
    })
}

/// Pull a `(start, end)` range out of free text by matching
/// `YYYY-MM-DD HH:MM[:SS]` pairs.
pub fn extract_time_range(text: &str) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    if text.trim() == "null" {
        return None;
    }

    let pattern = Regex::new(r"(\d{4}-\d{2}-\d{2}[ T]\d{2}:\d{2}(?::\d{2})?)").ok()?;
    let matches: Vec<&str> = pattern.find_iter(text).map(|m| m.as_str()).collect();
    if matches.len() < 2 {
        return None;
    }

    let start = parse_loose_datetime(matches[0])?;
    let end = parse_loose_datetime(matches[1])?;
    Some(order_range(start, end))
}

fn order_range(start: DateTime<Utc>, end: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    if start > end {
        (end, start)
    } else {
        (start, end)
    }
}

/// Accepts `YYYY-MM-DD HH:MM[:SS]` with a space or `T` separator;
/// naive values are interpreted as UTC.
fn parse_loose_datetime(s: &str) -> Option<DateTime<Utc>> {
    let normalized = s.trim().replace('T', " ");
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&normalized, format) {
            return Some(naive.and_utc());
        }
    }
    DateTime::parse_from_rfc3339(s.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn valid_json_response_is_fully_parsed() {
        let content = r#"{
            "dense_queries": ["q one", "q two"],
            "sparse_queries": ["kw1", "kw2", "kw3"],
            "time_range": {"start": "2026-06-01 08:00:00", "end": "2026-06-02 20:00:00"}
        }"#;
        let outcome = parse_rewrite_response(content, "orig", true, true);
        assert_eq!(outcome.dense_queries, vec!["q one", "q two"]);
        assert_eq!(outcome.sparse_queries.len(), 3);

        let (start, end) = outcome.time_range.unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 6, 2, 20, 0, 0).unwrap());
    }

    #[test]
    fn swapped_range_is_reordered() {
        let content = r#"{
            "time_range": {"start": "2026-06-05 00:00:00", "end": "2026-06-01 00:00:00"}
        }"#;
        let outcome = parse_rewrite_response(content, "orig", false, true);
        let (start, end) = outcome.time_range.unwrap();
        assert!(start < end);
    }

    #[test]
    fn invalid_json_falls_back_to_original_query() {
        let outcome = parse_rewrite_response("not json at all", "orig", true, true);
        assert_eq!(outcome.dense_queries, vec!["orig"]);
        assert_eq!(outcome.sparse_queries, vec!["orig"]);
        assert!(outcome.time_range.is_none());
    }

    #[test]
    fn think_wrapper_is_stripped_before_parsing() {
        let content = "<think>let me think</think>{\"dense_queries\": [\"expanded\"], \"sparse_queries\": [\"kw\"]}";
        let outcome = parse_rewrite_response(content, "orig", true, false);
        assert_eq!(outcome.dense_queries, vec!["expanded"]);
    }

    #[test]
    fn string_time_range_uses_regex_fallback() {
        let content = r#"{"time_range": "from 2026-06-01 08:00 to 2026-06-01 18:00"}"#;
        let outcome = parse_rewrite_response(content, "orig", false, true);
        let (start, end) = outcome.time_range.unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 6, 1, 18, 0, 0).unwrap());
    }

    #[test]
    fn extract_time_range_handles_null_and_single_match() {
        assert!(extract_time_range("null").is_none());
        assert!(extract_time_range("only 2026-06-01 08:00 here").is_none());
    }

    #[test]
    fn extract_time_range_swaps_reversed_pairs() {
        let (start, end) =
            extract_time_range("2026-06-05 10:00:00 then 2026-06-01 10:00:00").unwrap();
        assert!(start < end);
    }

    #[test]
    fn empty_arrays_fall_back_to_original() {
        let content = r#"{"dense_queries": [], "sparse_queries": []}"#;
        let outcome = parse_rewrite_response(content, "orig", true, false);
        assert_eq!(outcome.dense_queries, vec!["orig"]);
        assert_eq!(outcome.sparse_queries, vec!["orig"]);
    }
}

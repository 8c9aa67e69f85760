use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, Client, StatusCode};
use serde_json::{json, Value};
use std::env;
use std::time::Duration;

use crate::agent::Reasoner;
use crate::error::ReasonerError;
use crate::planner::PlanningRequest;

#[derive(Clone)]
pub struct GeminiConfig {
    pub api_base: String, // e.g. "https://generativelanguage.googleapis.com/v1beta"
    pub api_key: String,  // env GEMINI_API_KEY
    pub model: String,    // e.g. "gemini-2.5-flash"
    pub request_timeout: Duration,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_base: env::var("GEMINI_BASE_URL")
                .unwrap_or_else(|_| "https://generativelanguage.googleapis.com/v1beta".into()),
            api_key: env::var("GEMINI_API_KEY").unwrap_or_default(),
            model: env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-2.5-flash".into()),
            request_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    cfg: GeminiConfig,
}

impl GeminiClient {
    pub fn new(cfg: GeminiConfig) -> Result<Self> {
        if cfg.api_key.trim().is_empty() {
            bail!("GEMINI_API_KEY missing");
        }
        let http = Client::builder().timeout(cfg.request_timeout).build()?;
        Ok(Self { http, cfg })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.cfg.api_base.trim_end_matches('/'),
            self.cfg.model
        )
    }

    fn body(prompt: &str) -> Value {
        // JSON mime type keeps the reply to a bare object most of the time.
        json!({
          "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
          "generationConfig": { "responseMimeType": "application/json" }
        })
    }
}

/// Concatenated text parts of the first candidate; empty when the reply was blocked.
fn candidate_text(v: &Value) -> String {
    v.pointer("/candidates/0/content/parts")
        .and_then(|x| x.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

fn retry_after(resp: &reqwest::Response) -> Option<Duration> {
    resp.headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[async_trait]
impl Reasoner for GeminiClient {
    async fn complete(&self, request: &PlanningRequest) -> Result<String, ReasonerError> {
        let resp = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", &self.cfg.api_key)
            .json(&Self::body(&request.prompt()))
            .send()
            .await
            .map_err(|e| ReasonerError::Unavailable(e.to_string()))?;
        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ReasonerError::RateLimited { retry_after: retry_after(&resp) });
        }
        let text = resp
            .text()
            .await
            .map_err(|e| ReasonerError::Unavailable(e.to_string()))?;
        if !status.is_success() {
            return Err(ReasonerError::Unavailable(format!("Gemini error {}: {}", status, text)));
        }
        let v: Value = serde_json::from_str(&text)
            .map_err(|e| ReasonerError::Unavailable(format!("malformed Gemini envelope: {e}")))?;
        Ok(candidate_text(&v))
    }
}

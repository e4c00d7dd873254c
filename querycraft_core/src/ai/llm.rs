use crate::config::LlmConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::{Value, json};

/// Single-turn text generation. Each part becomes one text part of a single
/// user message.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, parts: &[String]) -> Result<String>;
}

/// Gemini `generateContent` client.
#[derive(Clone)]
pub struct GeminiClient {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl GeminiClient {
    pub fn new(cfg: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| Error::backend("build llm http client", e))?;
        Ok(Self {
            client,
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
        })
    }

    fn url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.api_base, self.model
        )
    }
}

pub(crate) fn request_body(parts: &[String]) -> Value {
    let parts: Vec<Value> = parts.iter().map(|p| json!({ "text": p })).collect();
    json!({
        "contents": [{ "role": "user", "parts": parts }]
    })
}

/// Concatenate the text parts of the first candidate.
pub(crate) fn extract_text(value: &Value) -> Option<String> {
    let parts = value
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();
    Some(text)
}

#[async_trait]
impl TextGenerator for GeminiClient {
    #[tracing::instrument(level = "debug", skip_all, fields(model = %self.model, parts = parts.len()))]
    async fn generate(&self, parts: &[String]) -> Result<String> {
        let response = self
            .client
            .post(self.url())
            .query(&[("key", self.api_key.as_str())])
            .json(&request_body(parts))
            .send()
            .await
            .map_err(Error::backend_reqwest)?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            return Err(Error::BackendMessage(format!(
                "llm request failed ({status}): {body}"
            )));
        }
        let value: Value = response
            .json()
            .await
            .map_err(|e| Error::backend("llm response decode", e))?;
        if let Some(usage) = value.get("usageMetadata") {
            tracing::debug!(
                prompt_tokens = usage.get("promptTokenCount").and_then(serde_json::Value::as_i64),
                output_tokens = usage.get("candidatesTokenCount").and_then(serde_json::Value::as_i64),
                "llm usage"
            );
        }
        extract_text(&value)
            .ok_or_else(|| Error::BackendMessage("llm response had no candidates".to_string()))
    }
}

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MODEL: &str = "text-embedding-3-small";

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding request failed: {0}")]
    Request(String),

    #[error("embedding endpoint returned an unrecognized response shape")]
    UnrecognizedShape,
}

/// Client for an external embedding endpoint. Tries the legacy per-model
/// path first (`/v1/engines/{model}/embeddings`, the older OpenAI-style
/// contract some self-hosted/proxy providers still only implement), and
/// falls back to the modern `/v1/embeddings` path on a 404.
pub struct EmbeddingClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl EmbeddingClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            base_url: base_url.into(),
            api_key,
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let legacy_url = format!("{}/v1/engines/{}/embeddings", self.base_url, self.model);
        let legacy_body = serde_json::json!({ "input": text });

        match self.post(&legacy_url, &legacy_body).await {
            Ok(resp) if resp.status() == reqwest::StatusCode::NOT_FOUND => {
                debug!("legacy embedding path 404, falling back to modern path");
            }
            Ok(resp) if resp.status().is_success() => {
                let value: Value = resp
                    .json()
                    .await
                    .map_err(|e| EmbeddingError::Request(e.to_string()))?;
                return extract_embedding(&value);
            }
            Ok(resp) => {
                let status = resp.status();
                warn!(%status, "legacy embedding request failed, trying modern path");
            }
            Err(e) => {
                warn!(error = %e, "legacy embedding request failed, trying modern path");
            }
        }

        let modern_url = format!("{}/v1/embeddings", self.base_url);
        let modern_body = serde_json::json!({ "input": text, "model": self.model });
        let resp = self
            .post(&modern_url, &modern_body)
            .await
            .map_err(|e| EmbeddingError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(EmbeddingError::Request(format!(
                "modern embedding path returned {}",
                resp.status()
            )));
        }

        let value: Value = resp
            .json()
            .await
            .map_err(|e| EmbeddingError::Request(e.to_string()))?;
        extract_embedding(&value)
    }

    async fn post(&self, url: &str, body: &Value) -> reqwest::Result<reqwest::Response> {
        let mut req = self.http.post(url).json(body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        req.send().await
    }
}

/// Tolerate a handful of response shapes: a bare array of numbers, the
/// OpenAI-style `{"data":[{"embedding":[...]}, ...]}` object, or a bare
/// array-of-objects `[{"embedding":[...]}]`.
fn extract_embedding(value: &Value) -> Result<Vec<f32>, EmbeddingError> {
    if let Some(arr) = value.as_array() {
        if let Some(first) = arr.first() {
            if first.is_number() {
                return as_f32_vec(arr);
            }
            if let Some(embedding) = first.get("embedding").and_then(|e| e.as_array()) {
                return as_f32_vec(embedding);
            }
        }
    }

    if let Some(data) = value.get("data").and_then(|d| d.as_array()) {
        if let Some(embedding) = data.first().and_then(|d| d.get("embedding")).and_then(|e| e.as_array()) {
            return as_f32_vec(embedding);
        }
    }

    if let Some(embedding) = value.get("embedding").and_then(|e| e.as_array()) {
        return as_f32_vec(embedding);
    }

    Err(EmbeddingError::UnrecognizedShape)
}

fn as_f32_vec(arr: &[Value]) -> Result<Vec<f32>, EmbeddingError> {
    arr.iter()
        .map(|v| v.as_f64().map(|f| f as f32).ok_or(EmbeddingError::UnrecognizedShape))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bare_array() {
        let v = serde_json::json!([0.1, 0.2, 0.3]);
        assert_eq!(extract_embedding(&v).unwrap(), vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn extracts_openai_style_data_array() {
        let v = serde_json::json!({ "data": [{ "embedding": [0.5, 0.6] }] });
        assert_eq!(extract_embedding(&v).unwrap(), vec![0.5, 0.6]);
    }

    #[test]
    fn extracts_array_of_objects() {
        let v = serde_json::json!([{ "embedding": [0.9] }]);
        assert_eq!(extract_embedding(&v).unwrap(), vec![0.9]);
    }

    #[test]
    fn extracts_nested_embedding_field() {
        let v = serde_json::json!({ "embedding": [1.0, 2.0] });
        assert_eq!(extract_embedding(&v).unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn unrecognized_shape_errors() {
        let v = serde_json::json!({ "unexpected": true });
        assert!(matches!(extract_embedding(&v), Err(EmbeddingError::UnrecognizedShape)));
    }
}

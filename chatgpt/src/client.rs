use base64::Engine;
use serde::{Deserialize, Serialize};
use slide_common::ImageBytes;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://ark.cn-beijing.volces.com/api/v3";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("upstream returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ClientError {
    /// Whether retrying the same call may succeed (timeouts, connection
    /// failures, rate limiting, server errors).
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Timeout | ClientError::Transport(_) => true,
            ClientError::Status { status, .. } => {
                *status == 408 || *status == 429 || *status >= 500
            }
            ClientError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ClientError::Timeout
        } else if e.is_decode() {
            ClientError::Decode(e.to_string())
        } else {
            ClientError::Transport(e)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }
}

#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub id: String,
    pub model: String,
    pub content: String,
}

fn build_http(timeout: Option<Duration>) -> reqwest::Client {
    let mut builder = reqwest::Client::builder();
    if let Some(t) = timeout {
        builder = builder.timeout(t);
    }
    builder.build().unwrap_or_else(|e| {
        tracing::warn!("falling back to default HTTP client: {e}");
        reqwest::Client::new()
    })
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let body: String = body.chars().take(200).collect();
    Err(ClientError::Status { status: status.as_u16(), body })
}

/// Non-streaming chat-completions client for OpenAI-compatible endpoints.
pub struct OpenAiModelClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    pub model: String,
    pub temperature: f32,
}

impl OpenAiModelClient {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        Self {
            http: build_http(None),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            temperature: 0.7,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.http = build_http(Some(timeout));
        self
    }

    pub async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatCompletion, ClientError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
        });

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let resp = check_status(resp).await?;
        let value: serde_json::Value = resp.json().await?;
        let completion = parse_chat_completion(&value)?;

        tracing::info!(request_id = %completion.id, model = %completion.model, "chat completion received");
        Ok(completion)
    }
}

pub fn parse_chat_completion(value: &serde_json::Value) -> Result<ChatCompletion, ClientError> {
    let content = value["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| ClientError::Decode("missing choices[0].message.content".to_string()))?;
    Ok(ChatCompletion {
        id: value["id"].as_str().unwrap_or("N/A").to_string(),
        model: value["model"].as_str().unwrap_or_default().to_string(),
        content: content.trim().to_string(),
    })
}

/// Where the generated image can be found in an images/generations response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImagePayload {
    Base64(String),
    Url(String),
}

pub fn parse_image_payload(value: &serde_json::Value) -> Result<ImagePayload, ClientError> {
    let first = value["data"]
        .get(0)
        .ok_or_else(|| ClientError::Decode("no image data in response".to_string()))?;
    if let Some(b64) = first["b64_json"].as_str().or_else(|| first["image"].as_str()) {
        if !b64.is_empty() {
            return Ok(ImagePayload::Base64(b64.to_string()));
        }
    }
    if let Some(url) = first["url"].as_str() {
        if !url.is_empty() {
            return Ok(ImagePayload::Url(url.to_string()));
        }
    }
    Err(ClientError::Decode("image entry has neither b64_json nor url".to_string()))
}

/// Decodes base64 image data, tolerating a `data:<mime>;base64,` prefix.
pub fn decode_base64_image(data: &str) -> Result<Vec<u8>, ClientError> {
    let payload = match data.split_once(',') {
        Some((_, rest)) => rest,
        None => data,
    };
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| ClientError::Decode(format!("invalid base64 image: {e}")))
}

/// Text-to-image client for OpenAI-compatible `images/generations` endpoints.
pub struct OpenAiImageClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    pub model: String,
}

impl OpenAiImageClient {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        Self {
            http: build_http(None),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.http = build_http(Some(timeout));
        self
    }

    pub async fn generate(&self, prompt: &str, size: &str) -> Result<ImageBytes, ClientError> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "n": 1,
            "size": size,
            "response_format": "b64_json",
            "watermark": false,
        });

        let resp = self
            .http
            .post(format!("{}/images/generations", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let request_id = resp
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("N/A")
            .to_string();
        let resp = check_status(resp).await?;
        let value: serde_json::Value = resp.json().await?;
        tracing::debug!(%request_id, model = %self.model, "image generation response received");

        let bytes = match parse_image_payload(&value)? {
            ImagePayload::Base64(b64) => decode_base64_image(&b64)?,
            ImagePayload::Url(url) => self.download(&url).await?,
        };
        if bytes.is_empty() {
            return Err(ClientError::Decode("empty image body".to_string()));
        }
        Ok(ImageBytes::new(bytes))
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, ClientError> {
        let resp = self.http.get(url).send().await?;
        let resp = check_status(resp).await?;
        Ok(resp.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chat_completion() {
        let value = serde_json::json!({
            "id": "req-1",
            "model": "seed",
            "choices": [{"message": {"role": "assistant", "content": "  [1,2]  "}}]
        });
        let completion = parse_chat_completion(&value).unwrap();
        assert_eq!(completion.id, "req-1");
        assert_eq!(completion.content, "[1,2]");
    }

    #[test]
    fn test_parse_chat_completion_without_content_is_decode_error() {
        let value = serde_json::json!({"choices": []});
        let err = parse_chat_completion(&value).unwrap_err();
        assert!(matches!(err, ClientError::Decode(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_parse_image_payload_prefers_base64() {
        let value = serde_json::json!({"data": [{"b64_json": "aGk=", "url": "http://x"}]});
        assert_eq!(parse_image_payload(&value).unwrap(), ImagePayload::Base64("aGk=".into()));

        let value = serde_json::json!({"data": [{"url": "http://x/img.png"}]});
        assert_eq!(
            parse_image_payload(&value).unwrap(),
            ImagePayload::Url("http://x/img.png".into())
        );

        let value = serde_json::json!({"data": []});
        assert!(parse_image_payload(&value).is_err());
    }

    #[test]
    fn test_decode_base64_strips_data_url_prefix() {
        assert_eq!(decode_base64_image("data:image/png;base64,aGk=").unwrap(), b"hi");
        assert_eq!(decode_base64_image("aGk=").unwrap(), b"hi");
        assert!(decode_base64_image("***").is_err());
    }

    #[test]
    fn test_status_classification() {
        let status = |code| ClientError::Status { status: code, body: String::new() };
        assert!(status(429).is_transient());
        assert!(status(503).is_transient());
        assert!(status(408).is_transient());
        assert!(!status(400).is_transient());
        assert!(ClientError::Timeout.is_transient());
    }
}

//! CAPTCHA solving capability.
//!
//! The flow treats CAPTCHA solving as an external oracle: image bytes in,
//! text out. The production oracle asks a vision model through an
//! OpenAI-compatible chat-completions endpoint.

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

/// CAPTCHA solving errors.
#[derive(Debug, Error)]
pub enum CaptchaError {
    #[error("captcha provider error: {0}")]
    Provider(String),
    #[error("captcha provider returned an empty answer")]
    EmptyAnswer,
    #[error("captcha request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Text-for-image oracle contract.
#[async_trait]
pub trait CaptchaOracle: Send + Sync {
    async fn solve(&self, image_png: &[u8]) -> Result<String, CaptchaError>;
}

/// Vision oracle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptchaSettings {
    /// Chat-completions endpoint to post the image to.
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
}

impl Default for CaptchaSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

const PROMPT: &str = "Read the text shown in this CAPTCHA image. Return ONLY the characters you see, no explanation, no quotes, just the text.";

/// Asks a vision model to read the CAPTCHA.
pub struct VisionOracle {
    http: reqwest::Client,
    settings: CaptchaSettings,
    api_key: String,
}

impl VisionOracle {
    /// Build the oracle, reading the API key from the configured
    /// environment variable.
    pub fn new(settings: CaptchaSettings) -> Result<Self, CaptchaError> {
        let api_key = std::env::var(&settings.api_key_env)
            .map_err(|_| CaptchaError::Provider(format!("{} is not set", settings.api_key_env)))?;
        Ok(Self {
            http: reqwest::Client::new(),
            settings,
            api_key,
        })
    }
}

#[async_trait]
impl CaptchaOracle for VisionOracle {
    async fn solve(&self, image_png: &[u8]) -> Result<String, CaptchaError> {
        let image = base64::engine::general_purpose::STANDARD.encode(image_png);
        let payload = json!({
            "model": self.settings.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": PROMPT },
                    {
                        "type": "image_url",
                        "image_url": { "url": format!("data:image/png;base64,{}", image) }
                    }
                ]
            }],
            "max_tokens": 50
        });

        let response = self
            .http
            .post(&self.settings.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CaptchaError::Provider(format!("{}: {}", status, body)));
        }

        let body: serde_json::Value = response.json().await?;
        let answer = body
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| CaptchaError::Provider("malformed completion response".to_string()))?;
        if answer.is_empty() {
            return Err(CaptchaError::EmptyAnswer);
        }
        Ok(answer)
    }
}

/// Fixed-answer oracle for tests.
pub struct StaticOracle(pub String);

#[async_trait]
impl CaptchaOracle for StaticOracle {
    async fn solve(&self, _image_png: &[u8]) -> Result<String, CaptchaError> {
        Ok(self.0.clone())
    }
}

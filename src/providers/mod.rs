//! # External Providers
//!
//! Transcription, generation and synthesis all happen in hosted services. Each
//! capability is a small async trait so the session code never sees vendor
//! request shapes, and tests can swap in an in-memory provider.
//!
//! ## Vendors:
//! The provider-name string from configuration parses into a closed
//! [`ProviderKind`]. Each HTTP adapter matches on it to pick the URL, body
//! shape and response decoding for that vendor.

pub mod generation;
pub mod synthesis;
pub mod transcription;

use crate::error::{AppError, ProviderError};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Hosted vendors that can back a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    HuggingFace,
    Groq,
    OpenAi,
    OpenRouter,
    Together,
    Gemini,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::HuggingFace => "huggingface",
            ProviderKind::Groq => "groq",
            ProviderKind::OpenAi => "openai",
            ProviderKind::OpenRouter => "openrouter",
            ProviderKind::Together => "together",
            ProviderKind::Gemini => "gemini",
        }
    }

    /// Vendors with a text-to-speech API we know how to call.
    pub fn supports_synthesis(&self) -> bool {
        matches!(
            self,
            ProviderKind::HuggingFace | ProviderKind::Groq | ProviderKind::OpenAi | ProviderKind::OpenRouter
        )
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown provider '{0}'")]
pub struct UnknownProvider(pub String);

impl FromStr for ProviderKind {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "huggingface" | "hf" => Ok(ProviderKind::HuggingFace),
            "groq" => Ok(ProviderKind::Groq),
            "openai" => Ok(ProviderKind::OpenAi),
            "openrouter" => Ok(ProviderKind::OpenRouter),
            "together" => Ok(ProviderKind::Together),
            "gemini" => Ok(ProviderKind::Gemini),
            _ => Err(UnknownProvider(s.to_string())),
        }
    }
}

/// Segment of mono audio in, text out.
#[async_trait]
pub trait TranscriptionProvider: Send + Sync {
    async fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String, ProviderError>;

    fn name(&self) -> &str;
}

/// Text in, an audio container (WAV) out.
#[async_trait]
pub trait SynthesisProvider: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, ProviderError>;

    fn name(&self) -> &str;
}

/// Rendered conversation in, reply text out.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn generate(&self, conversation: &str) -> Result<String, ProviderError>;

    fn name(&self) -> &str;
}

/// Shared HTTP client for every provider adapter.
pub fn http_client() -> Result<reqwest::Client, AppError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(120))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))
}

/// Attach bearer auth only when a usable key is configured.
pub(crate) fn authorized(builder: reqwest::RequestBuilder, api_key: Option<&str>) -> reqwest::RequestBuilder {
    match api_key {
        Some(key) => builder.bearer_auth(key),
        None => builder,
    }
}

/// Turn a non-success response into `ProviderError::Status`, keeping the body for logs.
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::Status {
        status: status.as_u16(),
        body: truncate(&body, 300),
    })
}

pub(crate) fn trim_endpoint(endpoint: &str) -> &str {
    endpoint.trim().trim_end_matches('/')
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_names_parse() {
        assert_eq!("groq".parse::<ProviderKind>().unwrap(), ProviderKind::Groq);
        assert_eq!(" HuggingFace ".parse::<ProviderKind>().unwrap(), ProviderKind::HuggingFace);
        assert_eq!("openrouter".parse::<ProviderKind>().unwrap(), ProviderKind::OpenRouter);

        let err = "whisper-local".parse::<ProviderKind>().unwrap_err();
        assert_eq!(err.to_string(), "unknown provider 'whisper-local'");
    }

    #[test]
    fn test_synthesis_support() {
        assert!(ProviderKind::Groq.supports_synthesis());
        assert!(ProviderKind::HuggingFace.supports_synthesis());
        assert!(!ProviderKind::Together.supports_synthesis());
        assert!(!ProviderKind::Gemini.supports_synthesis());
    }

    #[test]
    fn test_trim_endpoint() {
        assert_eq!(trim_endpoint(" https://api.groq.com/openai/v1/ "), "https://api.groq.com/openai/v1");
    }
}

//! # Synthesis
//!
//! Text in, float audio out, plus the two wire encodings derived from it.
//!
//! The vendor returns a self-describing container (WAV). The synthesizer decodes
//! it, optionally downmixes to mono and resamples to the configured target rate,
//! all off the async runtime. The PCM16 and WAV encodings are pure functions of
//! the float samples and can be derived any number of times.

use crate::audio::codec::{decode_wav, encode_pcm16_le, encode_wav};
use crate::audio::signal::{resample, resample_interleaved, to_mono};
use crate::config::{credential, TtsConfig};
use crate::error::{AppError, ProviderError, SessionError};
use crate::providers::{authorized, check_status, trim_endpoint, ProviderKind, SynthesisProvider};
use async_trait::async_trait;
use base64::Engine as _;
use serde_json::{json, Value};
use std::io;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisResult {
    /// Interleaved samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl SynthesisResult {
    /// Little-endian PCM16 bytes as streamed to clients.
    pub fn to_pcm16(&self) -> Vec<u8> {
        encode_pcm16_le(&self.samples)
    }

    /// Self-describing WAV file at the result's rate.
    pub fn to_wav(&self) -> io::Result<Vec<u8>> {
        encode_wav(&self.samples, self.sample_rate, self.channels)
    }

    pub fn duration_seconds(&self) -> f64 {
        let frames = self.samples.len() / self.channels.max(1) as usize;
        frames as f64 / self.sample_rate.max(1) as f64
    }
}

pub struct Synthesizer {
    provider: Arc<dyn SynthesisProvider>,
    target_rate: u32,
    mono: bool,
}

impl Synthesizer {
    pub fn new(provider: Arc<dyn SynthesisProvider>, target_rate: u32, mono: bool) -> Self {
        Self {
            provider,
            target_rate,
            mono,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Synthesize `text`.
    ///
    /// ## Errors:
    /// - **Validation**: `text` is empty or whitespace; no call is made
    /// - **Provider**: the call failed, or the payload held no usable audio
    pub async fn synthesize(&self, text: &str) -> Result<SynthesisResult, SessionError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::Validation("synthesis text must be non-empty".to_string()));
        }

        let payload = self.provider.synthesize(text).await?;
        if payload.is_empty() {
            return Err(ProviderError::Malformed("synthesis returned empty audio".to_string()).into());
        }

        let (target_rate, mono) = (self.target_rate, self.mono);
        let result = tokio::task::spawn_blocking(move || -> Result<SynthesisResult, ProviderError> {
            let decoded = decode_wav(&payload)
                .map_err(|e| ProviderError::Malformed(format!("undecodable synthesis audio: {}", e)))?;
            if decoded.samples.is_empty() {
                return Err(ProviderError::Malformed("synthesis audio has no samples".to_string()));
            }

            if mono || decoded.channels <= 1 {
                let samples = to_mono(&decoded.samples, decoded.channels);
                Ok(SynthesisResult {
                    samples: resample(&samples, decoded.sample_rate, target_rate),
                    sample_rate: target_rate,
                    channels: 1,
                })
            } else {
                Ok(SynthesisResult {
                    samples: resample_interleaved(&decoded.samples, decoded.channels, decoded.sample_rate, target_rate),
                    sample_rate: target_rate,
                    channels: decoded.channels,
                })
            }
        })
        .await
        .map_err(|e| ProviderError::Malformed(format!("audio decoding failed: {}", e)))??;

        debug!(
            "Synthesized {:.2}s of audio at {} Hz with {}",
            result.duration_seconds(),
            result.sample_rate,
            self.provider.name()
        );
        Ok(result)
    }
}

/// Synthesis over a vendor's HTTP API.
pub struct HttpSynthesisProvider {
    client: reqwest::Client,
    kind: ProviderKind,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    voice: String,
}

impl HttpSynthesisProvider {
    pub fn new(config: &TtsConfig, client: reqwest::Client) -> Result<Self, AppError> {
        let kind: ProviderKind = config
            .provider
            .parse()
            .map_err(|e: crate::providers::UnknownProvider| AppError::ConfigError(e.to_string()))?;

        if !kind.supports_synthesis() {
            return Err(AppError::ConfigError(format!(
                "provider '{}' does not offer speech synthesis",
                kind
            )));
        }

        Ok(Self {
            client,
            kind,
            endpoint: trim_endpoint(&config.endpoint_url).to_string(),
            api_key: credential(&config.api_key).map(str::to_string),
            model: config.model.clone(),
            voice: config.voice.clone(),
        })
    }

    fn request(&self, text: &str) -> (String, Value) {
        match self.kind {
            ProviderKind::HuggingFace => (format!("{}/{}", self.endpoint, self.model), json!({ "inputs": text })),
            ProviderKind::Groq => (
                format!("{}/audio/speech", self.endpoint),
                json!({
                    "model": self.model,
                    "input": text,
                    "voice": self.voice,
                    "response_format": "wav",
                }),
            ),
            _ => (self.endpoint.clone(), json!({ "model": self.model, "input": text })),
        }
    }
}

/// OpenAI-style gateways may wrap the audio as base64 in a JSON body.
fn unwrap_audio_payload(body: Vec<u8>) -> Result<Vec<u8>, ProviderError> {
    let Ok(value) = serde_json::from_slice::<Value>(&body) else {
        return Ok(body);
    };

    let encoded = ["audio", "data"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .unwrap_or_default();

    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| ProviderError::Malformed(format!("invalid base64 audio: {}", e)))
}

#[async_trait]
impl SynthesisProvider for HttpSynthesisProvider {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, ProviderError> {
        let (url, body) = self.request(text);
        let request = authorized(self.client.post(url), self.api_key.as_deref()).json(&body);

        let response = check_status(request.send().await?).await?;
        let bytes = response.bytes().await?.to_vec();

        match self.kind {
            ProviderKind::OpenAi | ProviderKind::OpenRouter => unwrap_audio_payload(bytes),
            _ => Ok(bytes),
        }
    }

    fn name(&self) -> &str {
        self.kind.as_str()
    }
}

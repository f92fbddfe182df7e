//! # Transcription
//!
//! Turns a whole turn of captured audio into text.
//!
//! ## Flow:
//! 1. **Segment**: split the turn end to end into fixed-duration windows
//! 2. **Prepare**: downmix each window to mono and resample it to the provider rate
//! 3. **Transcribe**: one provider call per window, issued concurrently
//! 4. **Clean and join**: trim, fix shouting transcripts, join in temporal order

use crate::audio::codec::encode_wav;
use crate::audio::signal::{resample, to_mono};
use crate::config::{credential, SttConfig};
use crate::error::{AppError, ProviderError};
use crate::providers::{authorized, check_status, trim_endpoint, ProviderKind, TranscriptionProvider};
use async_trait::async_trait;
use base64::Engine as _;
use futures_util::future::try_join_all;
use reqwest::multipart::{Form, Part};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

/// A contiguous window of a turn's audio.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Position within the turn, starting at 0
    pub index: usize,
    /// Interleaved samples
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionResult {
    /// Cleaned text
    pub text: String,
    pub segment: Segment,
}

/// Split mono audio into windows of `chunk_seconds * sample_rate` samples.
pub fn segment(buffer: &[f32], sample_rate: u32, chunk_seconds: u32) -> Vec<Segment> {
    segment_channels(buffer, sample_rate, 1, chunk_seconds)
}

/// Split interleaved audio into windows of `chunk_seconds` each. Windows never
/// split a frame; the last one may be short.
pub fn segment_channels(buffer: &[f32], sample_rate: u32, channels: u16, chunk_seconds: u32) -> Vec<Segment> {
    let step = (chunk_seconds as usize * sample_rate as usize * channels.max(1) as usize).max(1);

    buffer
        .chunks(step)
        .enumerate()
        .map(|(index, window)| Segment {
            index,
            samples: window.to_vec(),
            sample_rate,
            channels: channels.max(1),
        })
        .collect()
}

/// Trim, and if the transcript is entirely upper case, capitalize it
/// (first letter upper, the rest lower).
pub fn clean(text: &str) -> String {
    let text = text.trim();
    if is_all_upper(text) {
        capitalize(text)
    } else {
        text.to_string()
    }
}

/// Join cleaned segment texts with single spaces, skipping empty ones.
pub fn join_transcripts(results: &[TranscriptionResult]) -> String {
    results
        .iter()
        .map(|r| r.text.as_str())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_all_upper(text: &str) -> bool {
    let mut cased = false;
    for c in text.chars() {
        if c.is_lowercase() {
            return false;
        }
        if c.is_uppercase() {
            cased = true;
        }
    }
    cased
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

/// Segments a turn and drives the transcription provider.
pub struct Transcriber {
    provider: Arc<dyn TranscriptionProvider>,
    chunk_seconds: u32,
    target_rate: u32,
}

impl Transcriber {
    pub fn new(provider: Arc<dyn TranscriptionProvider>, chunk_seconds: u32, target_rate: u32) -> Self {
        Self {
            provider,
            chunk_seconds: chunk_seconds.max(1),
            target_rate,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }

    /// Transcribe one segment: downmix, resample to the provider rate, call the
    /// provider and clean the result.
    pub async fn transcribe_chunk(&self, segment: Segment) -> Result<TranscriptionResult, ProviderError> {
        let samples = segment.samples.clone();
        let (channels, from_rate, to_rate) = (segment.channels, segment.sample_rate, self.target_rate);

        let prepared = tokio::task::spawn_blocking(move || {
            let mono = if channels > 1 { to_mono(&samples, channels) } else { samples };
            resample(&mono, from_rate, to_rate)
        })
        .await
        .map_err(|e| ProviderError::Malformed(format!("audio preparation failed: {}", e)))?;

        debug!(
            "Transcribing segment {} ({} samples at {} Hz) with {}",
            segment.index,
            prepared.len(),
            to_rate,
            self.provider.name()
        );

        let text = self.provider.transcribe(&prepared, to_rate).await?;

        Ok(TranscriptionResult {
            text: clean(&text),
            segment,
        })
    }

    /// Transcribe a whole turn of mono audio. Segments are sent concurrently and
    /// reassembled in their original order; the first failure fails the turn.
    pub async fn transcribe(&self, samples: Vec<f32>, sample_rate: u32) -> Result<String, ProviderError> {
        let segments = segment(&samples, sample_rate, self.chunk_seconds);
        if segments.is_empty() {
            return Ok(String::new());
        }

        info!("Transcribing {} samples in {} segment(s)", samples.len(), segments.len());

        let results = try_join_all(segments.into_iter().map(|s| self.transcribe_chunk(s))).await?;
        Ok(join_transcripts(&results))
    }
}

/// Transcription over a vendor's HTTP API.
pub struct HttpTranscriptionProvider {
    client: reqwest::Client,
    kind: ProviderKind,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl HttpTranscriptionProvider {
    pub fn new(config: &SttConfig, client: reqwest::Client) -> Result<Self, AppError> {
        let kind: ProviderKind = config
            .provider
            .parse()
            .map_err(|e: crate::providers::UnknownProvider| AppError::ConfigError(e.to_string()))?;

        Ok(Self {
            client,
            kind,
            endpoint: trim_endpoint(&config.endpoint_url).to_string(),
            api_key: credential(&config.api_key).map(str::to_string),
            model: config.model.clone(),
        })
    }

    fn url(&self) -> String {
        match self.kind {
            ProviderKind::Groq => format!("{}/audio/transcriptions", self.endpoint),
            ProviderKind::HuggingFace if self.endpoint.is_empty() => {
                format!("https://router.huggingface.co/hf-inference/models/{}", self.model)
            }
            _ => self.endpoint.clone(),
        }
    }

    async fn post(&self, wav: Vec<u8>) -> Result<reqwest::Response, ProviderError> {
        let request = self.client.post(self.url());
        let request = authorized(request, self.api_key.as_deref());

        let request = match self.kind {
            ProviderKind::Groq => {
                let mut form = Form::new().part(
                    "file",
                    Part::bytes(wav).file_name("audio.wav").mime_str("audio/wav")?,
                );
                if !self.model.is_empty() {
                    form = form.text("model", self.model.clone());
                }
                request.multipart(form)
            }
            ProviderKind::HuggingFace => request
                .header(reqwest::header::CONTENT_TYPE, "audio/wav")
                .header(reqwest::header::ACCEPT, "application/json")
                .body(wav),
            ProviderKind::OpenAi | ProviderKind::OpenRouter | ProviderKind::Together | ProviderKind::Gemini => {
                request.json(&json!({
                    "model": self.model,
                    "audio": base64::engine::general_purpose::STANDARD.encode(&wav),
                }))
            }
        };

        Ok(request.send().await?)
    }
}

/// `text` if present and non-empty, else `output`, else empty.
fn transcript_text(body: &Value) -> String {
    ["text", "output"]
        .iter()
        .filter_map(|key| body.get(*key).and_then(Value::as_str))
        .find(|text| !text.trim().is_empty())
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl TranscriptionProvider for HttpTranscriptionProvider {
    async fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String, ProviderError> {
        let wav = encode_wav(samples, sample_rate, 1)
            .map_err(|e| ProviderError::Malformed(format!("failed to encode WAV: {}", e)))?;

        let response = check_status(self.post(wav).await?).await?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(format!("transcription response was not JSON: {}", e)))?;

        Ok(transcript_text(&body))
    }

    fn name(&self) -> &str {
        self.kind.as_str()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Replies by segment marker: the first sample of a segment, times ten,
    /// picks the reply. Lower markers answer slower so completion order differs
    /// from segment order.
    pub(crate) struct ScriptedTranscription {
        pub replies: Vec<Result<String, u16>>,
        pub calls: AtomicUsize,
        /// Sample count of every segment received
        pub lengths: std::sync::Mutex<Vec<usize>>,
    }

    impl ScriptedTranscription {
        pub fn new(replies: Vec<Result<String, u16>>) -> Self {
            Self {
                replies,
                calls: AtomicUsize::new(0),
                lengths: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TranscriptionProvider for ScriptedTranscription {
        async fn transcribe(&self, samples: &[f32], _rate: u32) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.lengths.lock().unwrap().push(samples.len());
            let marker = samples.first().map(|s| (s * 10.0).round() as usize).unwrap_or(0);
            let remaining = self.replies.len().saturating_sub(marker) as u64;
            tokio::time::sleep(Duration::from_millis(remaining * 5)).await;
            match self.replies.get(marker).cloned() {
                Some(Ok(text)) => Ok(text),
                Some(Err(status)) => Err(ProviderError::Status {
                    status,
                    body: "scripted failure".to_string(),
                }),
                None => Ok(String::new()),
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    /// Segments of the given lengths, segment i filled with `i / 10`.
    fn marked(lengths: &[usize]) -> Vec<f32> {
        lengths
            .iter()
            .enumerate()
            .flat_map(|(i, len)| std::iter::repeat(i as f32 / 10.0).take(*len))
            .collect()
    }

    #[test]
    fn test_segment_count_and_reconstruction() {
        for (len, rate, seconds) in [(0usize, 16000u32, 10u32), (1000, 16000, 10), (160000, 16000, 10), (160001, 16000, 10), (33000, 8000, 2)] {
            let buffer: Vec<f32> = (0..len).map(|i| i as f32).collect();
            let segments = segment(&buffer, rate, seconds);
            let step = (rate * seconds) as usize;

            assert_eq!(segments.len(), len.div_ceil(step), "len {}", len);
            if let Some((last, rest)) = segments.split_last() {
                assert!(rest.iter().all(|s| s.samples.len() == step));
                assert!(!last.samples.is_empty() && last.samples.len() <= step);
            }

            let rebuilt: Vec<f32> = segments.iter().flat_map(|s| s.samples.iter().copied()).collect();
            assert_eq!(rebuilt, buffer);
            assert!(segments.iter().enumerate().all(|(i, s)| s.index == i));
        }
    }

    #[test]
    fn test_segment_channels_keeps_frames_whole() {
        let buffer = vec![0.0; 2 * 3 * 4 + 2];
        let segments = segment_channels(&buffer, 4, 2, 3);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].samples.len(), 24);
        assert_eq!(segments[1].samples.len(), 2);
        assert_eq!(segments[1].channels, 2);
    }

    #[test]
    fn test_clean_casing() {
        assert_eq!(clean("  hello doctor "), "hello doctor");
        assert_eq!(clean("HELLO DOCTOR"), "Hello doctor");
        assert_eq!(clean("I NEED HELP, 2 DAYS"), "I need help, 2 days");
        assert_eq!(clean("Hello Doctor"), "Hello Doctor");
        assert_eq!(clean("123"), "123");
        assert_eq!(clean("   "), "");
    }

    #[test]
    fn test_transcript_text_fallbacks() {
        assert_eq!(transcript_text(&json!({"text": "hi"})), "hi");
        assert_eq!(transcript_text(&json!({"text": "", "output": "there"})), "there");
        assert_eq!(transcript_text(&json!({"other": 1})), "");
    }

    #[tokio::test]
    async fn test_segments_joined_in_order() {
        let provider = Arc::new(ScriptedTranscription::new(vec![
            Ok("first".to_string()),
            Ok(" ".to_string()),
            Ok("THIRD PART".to_string()),
        ]));
        let transcriber = Transcriber::new(provider.clone(), 1, 16000);

        let text = transcriber.transcribe(marked(&[16000, 16000, 10]), 16000).await.unwrap();
        assert_eq!(text, "first Third part");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_segment_failure_fails_turn() {
        let provider = Arc::new(ScriptedTranscription::new(vec![Ok("ok".to_string()), Err(502)]));
        let transcriber = Transcriber::new(provider, 1, 16000);

        let err = transcriber.transcribe(marked(&[16000, 4000]), 16000).await.unwrap_err();
        assert_eq!(err.status(), Some(502));
    }

    #[tokio::test]
    async fn test_empty_turn_makes_no_calls() {
        let provider = Arc::new(ScriptedTranscription::new(vec![]));
        let transcriber = Transcriber::new(provider.clone(), 10, 16000);

        assert_eq!(transcriber.transcribe(Vec::new(), 16000).await.unwrap(), "");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_huggingface_router_fallback() {
        let config = SttConfig {
            provider: "huggingface".to_string(),
            endpoint_url: String::new(),
            api_key: String::new(),
            model: "openai/whisper-small".to_string(),
            chunk_seconds: 10,
            target_rate: 16000,
            capture_rate: 16000,
        };
        let provider = HttpTranscriptionProvider::new(&config, reqwest::Client::new()).unwrap();
        assert_eq!(
            provider.url(),
            "https://router.huggingface.co/hf-inference/models/openai/whisper-small"
        );
        assert!(provider.api_key.is_none());
    }
}

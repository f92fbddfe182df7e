//! # Configuration Management
//!
//! Loads the service configuration from multiple sources:
//! - Default values (built into the code)
//! - TOML configuration file (config.toml)
//! - Environment variables (with APP_ prefix, `__` between nested keys)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` (deployment platforms)
//! 2. Environment variables (`APP_SERVER__PORT`, `APP_STT__CHUNK_SECONDS`, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! ## Placeholders:
//! Any string value written exactly as `${NAME}` is replaced by the environment
//! variable `NAME` after all layers are merged. If `NAME` is not set the value
//! becomes `<MISSING_ENV:NAME>`, so a missing credential is visible in logs and in
//! `/api/v1/config` instead of silently turning into an empty string.

use crate::providers::ProviderKind;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

const MISSING_ENV_PREFIX: &str = "<MISSING_ENV:";

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub performance: PerformanceConfig,
    pub llm: LlmConfig,
    pub stt: SttConfig,
    pub tts: TtsConfig,
    pub agent: AgentConfig,
    pub streaming: StreamingConfig,
    pub tracking: TrackingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Websocket sessions allowed at once across all voice endpoints
    pub max_concurrent_sessions: usize,
}

/// Generation provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: String,
    pub endpoint_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Transcription provider settings.
///
/// ## Fields:
/// - `chunk_seconds`: length of each segment sent to the provider
/// - `target_rate`: sample rate the provider expects
/// - `capture_rate`: rate of inbound client PCM unless the client overrides it with `?rate=`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    pub provider: String,
    pub endpoint_url: String,
    pub api_key: String,
    pub model: String,
    pub chunk_seconds: u32,
    pub target_rate: u32,
    pub capture_rate: u32,
}

/// Synthesis provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    pub provider: String,
    pub endpoint_url: String,
    pub api_key: String,
    pub model: String,
    pub voice: String,
    pub target_rate: u32,
    pub mono: bool,
}

/// Persona and fixed phrases used by the conversational agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub description: String,
    pub initial_message: String,
    pub apology_message: String,
    pub max_iterations: u32,
}

/// Paced audio delivery and wire control tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    pub chunk_bytes: usize,
    pub chunk_delay_ms: u64,
    pub end_marker: String,
    pub end_of_turn_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    pub enabled: bool,
    /// JSON-lines file the tracker appends to
    pub path: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 10,
            },
            llm: LlmConfig {
                provider: "groq".to_string(),
                endpoint_url: "https://api.groq.com/openai/v1".to_string(),
                api_key: "${GROQ_API_KEY}".to_string(),
                model: "llama-3.1-8b-instant".to_string(),
                temperature: 0.3,
                max_tokens: 512,
            },
            stt: SttConfig {
                provider: "groq".to_string(),
                endpoint_url: "https://api.groq.com/openai/v1".to_string(),
                api_key: "${GROQ_API_KEY}".to_string(),
                model: "whisper-large-v3-turbo".to_string(),
                chunk_seconds: 10,
                target_rate: 16000,
                capture_rate: 16000,
            },
            tts: TtsConfig {
                provider: "groq".to_string(),
                endpoint_url: "https://api.groq.com/openai/v1".to_string(),
                api_key: "${GROQ_API_KEY}".to_string(),
                model: "playai-tts".to_string(),
                voice: "Aaliyah-PlayAI".to_string(),
                target_rate: 22050,
                mono: true,
            },
            agent: AgentConfig {
                description: "You are a helpful medical assistant. Answer briefly and clearly, \
                              and recommend seeing a clinician for anything serious."
                    .to_string(),
                initial_message: "Hello! I am your medical assistant. How can I help you today?"
                    .to_string(),
                apology_message: "Sorry, I encountered an error processing your request."
                    .to_string(),
                max_iterations: 10,
            },
            streaming: StreamingConfig {
                chunk_bytes: 32000,
                chunk_delay_ms: 10,
                end_marker: "__finish_speech__".to_string(),
                end_of_turn_token: "__end__".to_string(),
            },
            tracking: TrackingConfig {
                enabled: true,
                path: "tracking.jsonl".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml`, and the environment,
    /// then resolve `${VAR}` placeholders.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__HOST=0.0.0.0`
    /// - `APP_STT__PROVIDER=huggingface`
    /// - `APP_STREAMING__CHUNK_DELAY_MS=20`
    /// - `HOST=0.0.0.0` / `PORT=3000`: deployment platform overrides
    pub fn load() -> Result<Self> {
        Self::build(config::File::with_name("config").required(false))
    }

    /// Load from an in-memory TOML document layered over the defaults.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        Self::build(config::File::from_str(toml, config::FileFormat::Toml))
    }

    fn build<S>(file_layer: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(file_layer)
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config: AppConfig = settings.build()?.try_deserialize()?;
        config.resolve_placeholders()
    }

    /// Substitute `${VAR}` string values from the process environment.
    pub fn resolve_placeholders(self) -> Result<Self> {
        let mut value = serde_json::to_value(&self)?;
        resolve_env_vars(&mut value);
        Ok(serde_json::from_value(value)?)
    }

    /// Dotted keys whose value is still an unresolved placeholder.
    pub fn unresolved_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        if let Ok(value) = serde_json::to_value(self) {
            collect_unresolved(&value, String::new(), &mut keys);
        }
        keys
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if self.stt.chunk_seconds == 0 {
            return Err(anyhow::anyhow!("stt.chunk_seconds must be greater than 0"));
        }

        if self.stt.target_rate == 0 || self.stt.capture_rate == 0 || self.tts.target_rate == 0 {
            return Err(anyhow::anyhow!("Sample rates must be greater than 0"));
        }

        if self.streaming.chunk_bytes == 0 {
            return Err(anyhow::anyhow!("streaming.chunk_bytes must be greater than 0"));
        }

        if self.streaming.end_of_turn_token.trim().is_empty() {
            return Err(anyhow::anyhow!("streaming.end_of_turn_token cannot be empty"));
        }

        self.llm.provider.parse::<ProviderKind>()?;
        self.stt.provider.parse::<ProviderKind>()?;

        let tts = self.tts.provider.parse::<ProviderKind>()?;
        if !tts.supports_synthesis() {
            return Err(anyhow::anyhow!(
                "tts.provider '{}' does not offer speech synthesis",
                self.tts.provider
            ));
        }

        Ok(())
    }

    /// Copy of the configuration that is safe to show to API clients.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        for key in [
            &mut copy.llm.api_key,
            &mut copy.stt.api_key,
            &mut copy.tts.api_key,
        ] {
            if credential(key).is_some() {
                *key = "***".to_string();
            }
        }
        copy
    }
}

/// A usable credential, or `None` when empty or still an unresolved placeholder.
pub fn credential(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.starts_with(MISSING_ENV_PREFIX) {
        None
    } else {
        Some(trimmed)
    }
}

fn resolve_env_vars(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => map.values_mut().for_each(resolve_env_vars),
        serde_json::Value::Array(items) => items.iter_mut().for_each(resolve_env_vars),
        serde_json::Value::String(text) => {
            if let Some(name) = placeholder_name(text) {
                *text = env::var(name).unwrap_or_else(|_| format!("{}{}>", MISSING_ENV_PREFIX, name));
            }
        }
        _ => {}
    }
}

fn placeholder_name(text: &str) -> Option<&str> {
    text.strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
        .filter(|name| !name.is_empty())
}

fn collect_unresolved(value: &serde_json::Value, path: String, out: &mut Vec<String>) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, child) in map {
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", path, key)
                };
                collect_unresolved(child, child_path, out);
            }
        }
        serde_json::Value::String(text) if text.starts_with(MISSING_ENV_PREFIX) => out.push(path),
        _ => {}
    }
}

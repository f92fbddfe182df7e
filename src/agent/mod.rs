//! # Agents
//!
//! Closed set of agent kinds and the factory that builds them from
//! configuration. Each kind yields a handle typed by its capability, so a
//! caller asking for a transcription agent can only ever get a `Transcriber`.

pub mod turn_engine;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::providers::generation::HttpGenerationProvider;
use crate::providers::synthesis::{HttpSynthesisProvider, Synthesizer};
use crate::providers::transcription::{HttpTranscriptionProvider, Transcriber};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

pub use turn_engine::{ConversationHistory, TurnEngine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentKind {
    Transcription,
    Generation,
    Synthesis,
}

impl FromStr for AgentKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "speech_to_text" | "transcription" => Ok(AgentKind::Transcription),
            "conversational" | "generation" => Ok(AgentKind::Generation),
            "text_to_speech" | "synthesis" => Ok(AgentKind::Synthesis),
            other => Err(AppError::ConfigError(format!("Unknown agent type: {}", other))),
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AgentKind::Transcription => "speech_to_text",
            AgentKind::Generation => "conversational",
            AgentKind::Synthesis => "text_to_speech",
        };
        f.write_str(name)
    }
}

pub enum AgentHandle {
    Transcription(Arc<Transcriber>),
    Generation(Arc<TurnEngine>),
    Synthesis(Arc<Synthesizer>),
}

impl AgentHandle {
    pub fn kind(&self) -> AgentKind {
        match self {
            AgentHandle::Transcription(_) => AgentKind::Transcription,
            AgentHandle::Generation(_) => AgentKind::Generation,
            AgentHandle::Synthesis(_) => AgentKind::Synthesis,
        }
    }
}

/// Build the agent for `kind` from the relevant config section.
pub fn create_agent(kind: AgentKind, config: &AppConfig, client: &reqwest::Client) -> Result<AgentHandle, AppError> {
    let handle = match kind {
        AgentKind::Transcription => {
            let provider = HttpTranscriptionProvider::new(&config.stt, client.clone())?;
            AgentHandle::Transcription(Arc::new(Transcriber::new(
                Arc::new(provider),
                config.stt.chunk_seconds,
                config.stt.target_rate,
            )))
        }
        AgentKind::Generation => {
            let provider = HttpGenerationProvider::new(&config.llm, &config.agent.description, client.clone())?;
            AgentHandle::Generation(Arc::new(TurnEngine::new(Arc::new(provider))))
        }
        AgentKind::Synthesis => {
            let provider = HttpSynthesisProvider::new(&config.tts, client.clone())?;
            AgentHandle::Synthesis(Arc::new(Synthesizer::new(
                Arc::new(provider),
                config.tts.target_rate,
                config.tts.mono,
            )))
        }
    };

    info!("Created {} agent", kind);
    Ok(handle)
}

/// One agent of each kind, shared by every session.
#[derive(Clone)]
pub struct SessionServices {
    pub transcriber: Arc<Transcriber>,
    pub engine: Arc<TurnEngine>,
    pub synthesizer: Arc<Synthesizer>,
}

impl SessionServices {
    pub fn from_config(config: &AppConfig, client: &reqwest::Client) -> Result<Self, AppError> {
        let transcriber = match create_agent(AgentKind::Transcription, config, client)? {
            AgentHandle::Transcription(t) => t,
            other => return Err(mismatch(AgentKind::Transcription, &other)),
        };
        let engine = match create_agent(AgentKind::Generation, config, client)? {
            AgentHandle::Generation(e) => e,
            other => return Err(mismatch(AgentKind::Generation, &other)),
        };
        let synthesizer = match create_agent(AgentKind::Synthesis, config, client)? {
            AgentHandle::Synthesis(s) => s,
            other => return Err(mismatch(AgentKind::Synthesis, &other)),
        };

        Ok(Self {
            transcriber,
            engine,
            synthesizer,
        })
    }
}

fn mismatch(wanted: AgentKind, got: &AgentHandle) -> AppError {
    AppError::Internal(format!("asked for a {} agent, got {}", wanted, got.kind()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_kind_names() {
        assert_eq!("speech_to_text".parse::<AgentKind>().unwrap(), AgentKind::Transcription);
        assert_eq!("conversational".parse::<AgentKind>().unwrap(), AgentKind::Generation);
        assert_eq!("Synthesis".parse::<AgentKind>().unwrap(), AgentKind::Synthesis);
        assert!(matches!("retrieval".parse::<AgentKind>(), Err(AppError::ConfigError(_))));
    }

    #[test]
    fn test_factory_returns_matching_capability() {
        let config = AppConfig::default();
        let client = reqwest::Client::new();
        for kind in [AgentKind::Transcription, AgentKind::Generation, AgentKind::Synthesis] {
            assert_eq!(create_agent(kind, &config, &client).unwrap().kind(), kind);
        }
    }

    #[test]
    fn test_services_from_default_config() {
        let services = SessionServices::from_config(&AppConfig::default(), &reqwest::Client::new()).unwrap();
        assert_eq!(services.transcriber.provider_name(), "groq");
        assert_eq!(services.engine.provider_name(), "groq");
        assert_eq!(services.synthesizer.provider_name(), "groq");
    }

    #[test]
    fn test_unsupported_synthesis_vendor() {
        let mut config = AppConfig::default();
        config.tts.provider = "together".to_string();
        assert!(create_agent(AgentKind::Synthesis, &config, &reqwest::Client::new()).is_err());
    }
}

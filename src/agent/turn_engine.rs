//! Conversation history and the generation step of a turn.

use crate::error::ProviderError;
use crate::providers::GenerationProvider;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Agent,
}

impl Speaker {
    fn label(&self) -> &'static str {
        match self {
            Speaker::User => "User",
            Speaker::Agent => "Agent",
        }
    }
}

/// Ordered, append-only record of one session's exchanges.
#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    entries: Vec<(Speaker, String)>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, speaker: Speaker, text: impl Into<String>) {
        self.entries.push((speaker, text.into()));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `"User: ...\nAgent: ...\n"`, the prompt format the generation provider sees.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (speaker, text) in &self.entries {
            let _ = writeln!(out, "{}: {}", speaker.label(), text);
        }
        out
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Runs the generation step against a session's history.
pub struct TurnEngine {
    provider: Arc<dyn GenerationProvider>,
}

impl TurnEngine {
    pub fn new(provider: Arc<dyn GenerationProvider>) -> Self {
        Self { provider }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Append the user's text, generate a reply from the whole conversation and
    /// append the reply. On failure the user entry stays and nothing else is
    /// recorded.
    pub async fn respond(&self, history: &mut ConversationHistory, user_text: &str) -> Result<String, ProviderError> {
        history.push(Speaker::User, user_text);

        let started = Instant::now();
        match self.provider.generate(&history.render()).await {
            Ok(reply) => {
                debug!(
                    "Generated {} chars with {} in {:.2}s ({} history entries)",
                    reply.len(),
                    self.provider.name(),
                    started.elapsed().as_secs_f64(),
                    history.len()
                );
                history.push(Speaker::Agent, reply.clone());
                Ok(reply)
            }
            Err(e) => {
                warn!("Generation with {} failed: {}", self.provider.name(), e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Echoes the last user line, records every prompt, optionally fails or stalls.
    pub(crate) struct EchoGeneration {
        pub prompts: Mutex<Vec<String>>,
        pub fail_with: Option<u16>,
        pub delay: Duration,
    }

    impl EchoGeneration {
        pub fn new() -> Self {
            Self {
                prompts: Mutex::new(Vec::new()),
                fail_with: None,
                delay: Duration::ZERO,
            }
        }

        pub fn failing(status: u16) -> Self {
            Self {
                fail_with: Some(status),
                ..Self::new()
            }
        }

        pub fn slow(delay: Duration) -> Self {
            Self { delay, ..Self::new() }
        }
    }

    #[async_trait]
    impl GenerationProvider for EchoGeneration {
        async fn generate(&self, conversation: &str) -> Result<String, ProviderError> {
            self.prompts.lock().unwrap().push(conversation.to_string());
            tokio::time::sleep(self.delay).await;
            if let Some(status) = self.fail_with {
                return Err(ProviderError::Status {
                    status,
                    body: "model overloaded".to_string(),
                });
            }
            let last = conversation
                .lines()
                .rev()
                .find_map(|line| line.strip_prefix("User: "))
                .unwrap_or_default();
            Ok(format!("You said: {}", last))
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    #[test]
    fn test_history_render() {
        let mut history = ConversationHistory::new();
        history.push(Speaker::User, "I have a headache");
        history.push(Speaker::Agent, "How long has it lasted?");
        assert_eq!(history.render(), "User: I have a headache\nAgent: How long has it lasted?\n");

        history.clear();
        assert!(history.is_empty());
        assert_eq!(history.render(), "");
    }

    #[tokio::test]
    async fn test_respond_appends_both_sides() {
        let provider = Arc::new(EchoGeneration::new());
        let engine = TurnEngine::new(provider.clone());
        let mut history = ConversationHistory::new();

        assert_eq!(engine.respond(&mut history, "hello").await.unwrap(), "You said: hello");
        engine.respond(&mut history, "again").await.unwrap();

        assert_eq!(history.len(), 4);
        let prompts = provider.prompts.lock().unwrap();
        assert_eq!(prompts[1], "User: hello\nAgent: You said: hello\nUser: again\n");
    }

    #[tokio::test]
    async fn test_failure_keeps_only_user_entry() {
        let engine = TurnEngine::new(Arc::new(EchoGeneration::failing(503)));
        let mut history = ConversationHistory::new();

        let err = engine.respond(&mut history, "hello").await.unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert_eq!(history.len(), 1);
        assert_eq!(history.render(), "User: hello\n");
    }
}

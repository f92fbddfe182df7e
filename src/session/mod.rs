//! # Voice Sessions
//!
//! Types shared by every per-connection session:
//!
//! - **`EndpointKind`**: which of the four websocket endpoints a session serves and
//!   what that endpoint is allowed to do (accept audio, generate, speak)
//! - **`SessionState`**: the orchestrator's state machine
//! - **`Connection`**: the outbound half of the transport, abstracted so the
//!   orchestrator can run against the actix actor or an in-memory test double
//! - **`ClientFrame`** / **`ServerMessage`**: inbound and outbound wire messages

pub mod orchestrator;
pub mod validator;

use crate::error::SessionError;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;

/// The websocket endpoints a session can be opened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    /// `/ws/chat`: text in, text out
    Chat,
    /// `/ws/stt`: audio in, transcript out
    SpeechToText,
    /// `/ws/tts`: text in, the same text spoken back
    TextToSpeech,
    /// `/ws/s2s`: audio or text in, spoken reply out
    SpeechToSpeech,
}

impl EndpointKind {
    pub const ALL: [EndpointKind; 4] = [
        EndpointKind::Chat,
        EndpointKind::SpeechToText,
        EndpointKind::TextToSpeech,
        EndpointKind::SpeechToSpeech,
    ];

    /// Parse the last path segment of `/ws/{endpoint}`.
    pub fn from_path(segment: &str) -> Option<Self> {
        match segment {
            "chat" => Some(EndpointKind::Chat),
            "stt" => Some(EndpointKind::SpeechToText),
            "tts" => Some(EndpointKind::TextToSpeech),
            "s2s" => Some(EndpointKind::SpeechToSpeech),
            _ => None,
        }
    }

    pub fn path(&self) -> &'static str {
        match self {
            EndpointKind::Chat => "chat",
            EndpointKind::SpeechToText => "stt",
            EndpointKind::TextToSpeech => "tts",
            EndpointKind::SpeechToSpeech => "s2s",
        }
    }

    pub fn accepts_audio(&self) -> bool {
        matches!(self, EndpointKind::SpeechToText | EndpointKind::SpeechToSpeech)
    }

    /// Audio-only endpoints acknowledge each binary frame.
    pub fn acknowledges_audio(&self) -> bool {
        matches!(self, EndpointKind::SpeechToText)
    }

    pub fn generates(&self) -> bool {
        matches!(self, EndpointKind::Chat | EndpointKind::SpeechToSpeech)
    }

    pub fn speaks(&self) -> bool {
        matches!(self, EndpointKind::TextToSpeech | EndpointKind::SpeechToSpeech)
    }

    /// Tracking experiment each endpoint's runs are grouped under.
    pub fn experiment(&self) -> &'static str {
        match self {
            EndpointKind::Chat => "chat_agent",
            EndpointKind::SpeechToText => "speech_to_text_agent",
            EndpointKind::TextToSpeech => "tts_agent",
            EndpointKind::SpeechToSpeech => "speech_to_speech_agent",
        }
    }

    /// Best-effort notice sent before an error teardown.
    pub fn failure_notice(&self) -> &'static str {
        match self {
            EndpointKind::Chat => "Sorry, something went wrong.",
            EndpointKind::SpeechToText => "Error during transcription.",
            EndpointKind::TextToSpeech => "TTS processing failed.",
            EndpointKind::SpeechToSpeech => "Error occurred in S2S pipeline.",
        }
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/ws/{}", self.path())
    }
}

/// Orchestrator state. `Closed` is reachable from every other state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Idle,
    Listening,
    TurnReady,
    Transcribing,
    Generating,
    Synthesizing,
    Streaming,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "IDLE",
            SessionState::Listening => "LISTENING",
            SessionState::TurnReady => "TURN_READY",
            SessionState::Transcribing => "TRANSCRIBING",
            SessionState::Generating => "GENERATING",
            SessionState::Synthesizing => "SYNTHESIZING",
            SessionState::Streaming => "STREAMING",
            SessionState::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// Why a session ended. Reported exactly once per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EndReason {
    Disconnected,
    Error,
    Completed,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::Disconnected => "disconnected",
            EndReason::Error => "error",
            EndReason::Completed => "completed",
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A frame received from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    Text(String),
    Binary(Vec<u8>),
    /// The client sent a close frame
    Close,
}

/// Outbound text messages. All of them go over the wire as plain strings; the
/// variant only drives logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    Greeting(String),
    Info(String),
    Transcript(String),
    Reply(String),
    Notice(String),
    Error(String),
    EndOfSpeech(String),
}

impl ServerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Greeting(_) => "greeting",
            ServerMessage::Info(_) => "info",
            ServerMessage::Transcript(_) => "transcript",
            ServerMessage::Reply(_) => "reply",
            ServerMessage::Notice(_) => "notice",
            ServerMessage::Error(_) => "error",
            ServerMessage::EndOfSpeech(_) => "end_of_speech",
        }
    }

    pub fn into_text(self) -> String {
        match self {
            ServerMessage::Greeting(text)
            | ServerMessage::Info(text)
            | ServerMessage::Transcript(text)
            | ServerMessage::Reply(text)
            | ServerMessage::Notice(text)
            | ServerMessage::Error(text)
            | ServerMessage::EndOfSpeech(text) => text,
        }
    }
}

/// Outbound side of one client connection.
///
/// ## Contract:
/// - sends are delivered in call order
/// - a send on a connection that has gone away fails with `Transport`
/// - `closed()` resolves once the peer is gone and stays resolved
/// - `close()` never fails and may be called on an already closed connection
#[async_trait]
pub trait Connection: Send + Sync {
    async fn send_text(&self, text: String) -> Result<(), SessionError>;

    async fn send_binary(&self, data: Vec<u8>) -> Result<(), SessionError>;

    fn is_connected(&self) -> bool;

    async fn closed(&self);

    async fn close(&self);
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory connection used by the streamer and orchestrator tests.

    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::watch;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Sent {
        Text(String),
        Binary(usize),
    }

    pub struct MockConnection {
        sent: Mutex<Vec<Sent>>,
        connected: AtomicBool,
        closed_tx: watch::Sender<bool>,
        disconnect_after_binaries: Option<usize>,
        binaries: AtomicUsize,
        close_calls: AtomicUsize,
        broken: AtomicBool,
    }

    impl MockConnection {
        pub fn new() -> Self {
            Self::build(None)
        }

        /// Drops the peer right after the n-th binary frame is delivered.
        pub fn disconnecting_after_binaries(n: usize) -> Self {
            Self::build(Some(n))
        }

        fn build(disconnect_after_binaries: Option<usize>) -> Self {
            let (closed_tx, _) = watch::channel(false);
            Self {
                sent: Mutex::new(Vec::new()),
                connected: AtomicBool::new(true),
                closed_tx,
                disconnect_after_binaries,
                binaries: AtomicUsize::new(0),
                close_calls: AtomicUsize::new(0),
                broken: AtomicBool::new(false),
            }
        }

        pub fn disconnect(&self) {
            self.connected.store(false, Ordering::SeqCst);
            self.closed_tx.send_replace(true);
        }

        /// Every later send fails while the peer still looks connected.
        pub fn break_pipe(&self) {
            self.broken.store(true, Ordering::SeqCst);
        }

        fn check_writable(&self) -> Result<(), SessionError> {
            if !self.is_connected() {
                return Err(SessionError::Transport("connection closed".to_string()));
            }
            if self.broken.load(Ordering::SeqCst) {
                return Err(SessionError::Transport("broken pipe".to_string()));
            }
            Ok(())
        }

        pub fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }

        pub fn texts(&self) -> Vec<String> {
            self.sent()
                .into_iter()
                .filter_map(|s| match s {
                    Sent::Text(text) => Some(text),
                    Sent::Binary(_) => None,
                })
                .collect()
        }

        pub fn binary_count(&self) -> usize {
            self.binaries.load(Ordering::SeqCst)
        }

        pub fn close_calls(&self) -> usize {
            self.close_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Connection for MockConnection {
        async fn send_text(&self, text: String) -> Result<(), SessionError> {
            self.check_writable()?;
            self.sent.lock().unwrap().push(Sent::Text(text));
            Ok(())
        }

        async fn send_binary(&self, data: Vec<u8>) -> Result<(), SessionError> {
            self.check_writable()?;
            self.sent.lock().unwrap().push(Sent::Binary(data.len()));
            let delivered = self.binaries.fetch_add(1, Ordering::SeqCst) + 1;
            if self.disconnect_after_binaries == Some(delivered) {
                self.disconnect();
            }
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn closed(&self) {
            let mut rx = self.closed_tx.subscribe();
            let _ = rx.wait_for(|closed| *closed).await;
        }

        async fn close(&self) {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
            self.disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_capabilities() {
        assert!(!EndpointKind::Chat.accepts_audio());
        assert!(EndpointKind::Chat.generates());
        assert!(!EndpointKind::Chat.speaks());

        assert!(EndpointKind::SpeechToText.accepts_audio());
        assert!(EndpointKind::SpeechToText.acknowledges_audio());
        assert!(!EndpointKind::SpeechToText.generates());

        assert!(EndpointKind::TextToSpeech.speaks());
        assert!(!EndpointKind::TextToSpeech.generates());

        assert!(EndpointKind::SpeechToSpeech.accepts_audio());
        assert!(EndpointKind::SpeechToSpeech.generates());
        assert!(EndpointKind::SpeechToSpeech.speaks());
    }

    #[test]
    fn test_endpoint_paths_round_trip() {
        for endpoint in EndpointKind::ALL {
            assert_eq!(EndpointKind::from_path(endpoint.path()), Some(endpoint));
        }
        assert_eq!(EndpointKind::from_path("audio"), None);
        assert_eq!(EndpointKind::SpeechToSpeech.to_string(), "/ws/s2s");
    }

    #[test]
    fn test_end_reason_tags() {
        assert_eq!(EndReason::Disconnected.as_str(), "disconnected");
        assert_eq!(
            serde_json::to_string(&EndReason::Completed).unwrap(),
            "\"completed\""
        );
        assert_eq!(SessionState::TurnReady.to_string(), "TURN_READY");
    }
}

//! # Session Orchestrator
//!
//! The per-connection state machine. One orchestrator runs as one task per
//! client and is the only code that touches that session's audio buffer,
//! conversation history and turn count.
//!
//! ## States:
//! ```text
//! IDLE -> LISTENING -> TURN_READY -> TRANSCRIBING -> GENERATING -> SYNTHESIZING -> STREAMING -> LISTENING
//!                                                                                  (any) -> CLOSED
//! ```
//!
//! ## Error boundaries:
//! - **Validation**: the message is dropped, the session keeps listening
//! - **Provider**: the client gets a short notice and the turn is abandoned;
//!   a failed generation is replaced by the apology instead
//! - **Transport**: the session tears down with reason `error`
//! - **Disconnected**: the session tears down with reason `disconnected`
//!
//! Every provider call is raced against the connection closing, so a client
//! that leaves mid-turn ends the session straight away instead of waiting on
//! the provider.

use crate::agent::{ConversationHistory, SessionServices};
use crate::audio::buffer::AudioBuffer;
use crate::audio::streamer::{AudioStreamer, StreamOutcome};
use crate::config::AppConfig;
use crate::error::SessionError;
use crate::session::validator::MessageValidator;
use crate::session::{ClientFrame, Connection, EndReason, EndpointKind, ServerMessage, SessionState};
use crate::tracking::{Tracker, TrackingRun};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

const NO_AUDIO: &str = "No audio received.";
const NO_SPEECH: &str = "No speech detected.";
const TRANSCRIBING: &str = "Transcribing... please wait";
const STT_HINT: &str = "Send raw audio bytes or '__end__' to process.";
const TEXT_ONLY: &str = "This endpoint accepts text messages only.";
const TRANSCRIPTION_FAILED: &str = "Transcription failed. Please try again.";
const SYNTHESIS_FAILED: &str = "Speech synthesis failed. Please try again.";

/// Run `fut` unless the connection closes first.
async fn guarded<T>(conn: &dyn Connection, fut: impl Future<Output = T>) -> Result<T, SessionError> {
    tokio::select! {
        biased;
        _ = conn.closed() => Err(SessionError::Disconnected),
        out = fut => Ok(out),
    }
}

/// Result of trying to voice a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Speech {
    /// Audio reached the streaming stage, whether or not playback finished
    Spoken,
    /// Synthesis was skipped or failed; the turn does not count
    Abandoned,
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub reason: EndReason,
    pub turns: u64,
}

pub struct SessionOrchestrator {
    id: Uuid,
    endpoint: EndpointKind,
    conn: Arc<dyn Connection>,
    services: Arc<SessionServices>,
    streamer: AudioStreamer,
    run: TrackingRun,
    validator: MessageValidator,
    buffer: AudioBuffer,
    history: ConversationHistory,
    state: SessionState,
    turns: u64,
    /// Lowercased end-of-turn token
    end_of_turn: String,
    greeting: String,
    apology: String,
    created_at: DateTime<Utc>,
}

impl SessionOrchestrator {
    pub fn new(
        endpoint: EndpointKind,
        conn: Arc<dyn Connection>,
        services: Arc<SessionServices>,
        tracker: &Arc<Tracker>,
        config: &AppConfig,
        capture_rate: u32,
    ) -> Self {
        let run = tracker.start_run(endpoint.experiment());
        run.log_static(&config.llm, &config.agent);

        Self {
            id: Uuid::new_v4(),
            endpoint,
            conn,
            services,
            streamer: AudioStreamer::from_config(&config.streaming),
            run,
            validator: MessageValidator::new(),
            buffer: AudioBuffer::new(capture_rate),
            history: ConversationHistory::new(),
            state: SessionState::Idle,
            turns: 0,
            end_of_turn: config.streaming.end_of_turn_token.trim().to_lowercase(),
            greeting: config.agent.initial_message.clone(),
            apology: config.agent.apology_message.clone(),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Drive the session until it ends. The end reason has already been
    /// recorded with the tracker by the time this returns.
    pub async fn run(mut self, mut inbound: mpsc::UnboundedReceiver<ClientFrame>) -> SessionSummary {
        let span = info_span!("session", session_id = %self.id, endpoint = %self.endpoint);

        async move {
            info!(run_id = %self.run.run_id(), "Session started");

            let reason = match self.drive(&mut inbound).await {
                Ok(reason) => reason,
                Err(SessionError::Disconnected) => EndReason::Disconnected,
                Err(e) => {
                    error!(turn = self.turns, state = %self.state, "Session failed: {}", e);
                    if self.conn.is_connected() {
                        let _ = self.conn.send_text(self.endpoint.failure_notice().to_string()).await;
                    }
                    EndReason::Error
                }
            };

            inbound.close();
            self.teardown(reason).await;
            SessionSummary {
                reason,
                turns: self.turns,
            }
        }
        .instrument(span)
        .await
    }

    async fn drive(&mut self, inbound: &mut mpsc::UnboundedReceiver<ClientFrame>) -> Result<EndReason, SessionError> {
        self.greet().await?;

        loop {
            let frame = tokio::select! {
                biased;
                _ = self.conn.closed() => return Err(SessionError::Disconnected),
                frame = inbound.recv() => frame,
            };

            match frame {
                None if self.conn.is_connected() => return Ok(EndReason::Completed),
                None | Some(ClientFrame::Close) => return Err(SessionError::Disconnected),
                Some(ClientFrame::Binary(data)) => self.on_binary(data).await?,
                Some(ClientFrame::Text(text)) => self.on_text(text).await?,
            }
        }
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state != next {
            debug!(turn = self.turns, "State {} -> {}", self.state, next);
            self.state = next;
        }
    }

    async fn send(&self, message: ServerMessage) -> Result<(), SessionError> {
        debug!(turn = self.turns, kind = message.kind(), "Sending message");
        match self.conn.send_text(message.into_text()).await {
            Ok(()) => Ok(()),
            Err(_) if !self.conn.is_connected() => Err(SessionError::Disconnected),
            Err(SessionError::Transport(reason)) => Err(SessionError::Transport(reason)),
            Err(other) => Err(SessionError::Transport(other.to_string())),
        }
    }

    async fn greet(&mut self) -> Result<(), SessionError> {
        let greeting = self.greeting.clone();
        self.send(ServerMessage::Greeting(greeting.clone())).await?;
        if self.endpoint.speaks() {
            self.speak(&greeting).await?;
        }
        self.set_state(SessionState::Listening);
        Ok(())
    }

    async fn on_binary(&mut self, data: Vec<u8>) -> Result<(), SessionError> {
        if !self.endpoint.accepts_audio() {
            return self.send(ServerMessage::Notice(TEXT_ONLY.to_string())).await;
        }

        match self.buffer.append_pcm_frame(&data) {
            Ok(0) => Ok(()),
            Ok(samples) => {
                debug!(
                    turn = self.turns,
                    "Buffered {} samples ({} in turn)",
                    samples,
                    self.buffer.len()
                );
                if self.endpoint.acknowledges_audio() {
                    self.send(ServerMessage::Info(format!("Received {} samples...", samples)))
                        .await?;
                }
                Ok(())
            }
            Err(e) => {
                warn!(turn = self.turns, "Dropping audio frame: {}", e);
                Ok(())
            }
        }
    }

    async fn on_text(&mut self, text: String) -> Result<(), SessionError> {
        let trimmed = text.trim();

        if trimmed.to_lowercase() == self.end_of_turn {
            return self.audio_turn().await;
        }

        if !self.validator.is_valid(trimmed) {
            debug!(
                turn = self.turns,
                seen_real = self.validator.has_seen_real_message(),
                "Ignored client message: {:?}",
                trimmed
            );
            return Ok(());
        }

        let started = Instant::now();
        let user_text = trimmed.to_string();
        if self.endpoint.generates() {
            return self.respond(user_text, started).await;
        }
        if !self.endpoint.speaks() {
            return self.send(ServerMessage::Notice(STT_HINT.to_string())).await;
        }

        self.send(ServerMessage::Reply(user_text.clone())).await?;
        if self.speak(&user_text).await? == Speech::Spoken {
            self.complete_turn(&user_text, &user_text, started);
        }
        Ok(())
    }

    /// End-of-turn: transcribe the buffered audio, then continue the turn the
    /// way the endpoint requires.
    async fn audio_turn(&mut self) -> Result<(), SessionError> {
        if self.buffer.is_empty() {
            return self.send(ServerMessage::Notice(NO_AUDIO.to_string())).await;
        }

        let started = Instant::now();
        self.set_state(SessionState::TurnReady);
        debug!(
            turn = self.turns,
            "Turn ready: {} frames, {:.2}s of audio",
            self.buffer.frames(),
            self.buffer.duration_seconds()
        );
        let rate = self.buffer.sample_rate();
        let samples = self.buffer.take();
        let sample_count = samples.len();

        self.set_state(SessionState::Transcribing);
        if self.endpoint == EndpointKind::SpeechToText {
            self.send(ServerMessage::Info(TRANSCRIBING.to_string())).await?;
        }

        info!(
            turn = self.turns,
            provider = self.services.transcriber.provider_name(),
            "Transcribing {} samples at {} Hz (provider rate {} Hz)",
            sample_count,
            rate,
            self.services.transcriber.target_rate()
        );
        let transcript = match guarded(&*self.conn, self.services.transcriber.transcribe(samples, rate)).await? {
            Ok(text) => text,
            Err(e) => {
                warn!(turn = self.turns, "Transcription failed: {}", e);
                self.send(ServerMessage::Error(TRANSCRIPTION_FAILED.to_string())).await?;
                self.set_state(SessionState::Listening);
                return Ok(());
            }
        };

        if transcript.trim().is_empty() {
            self.send(ServerMessage::Notice(NO_SPEECH.to_string())).await?;
            self.set_state(SessionState::Listening);
            return Ok(());
        }

        info!(turn = self.turns, "Transcript: {}", transcript);

        if self.endpoint == EndpointKind::SpeechToText {
            self.send(ServerMessage::Transcript(transcript.clone())).await?;
            self.complete_turn(&format!("<{} samples>", sample_count), &transcript, started);
            self.set_state(SessionState::Listening);
            return Ok(());
        }

        self.send(ServerMessage::Transcript(format!("User: {}", transcript))).await?;
        self.respond(transcript, started).await
    }

    /// Generate a reply to `user_text` and deliver it as text, plus speech on
    /// speaking endpoints.
    async fn respond(&mut self, user_text: String, started: Instant) -> Result<(), SessionError> {
        self.set_state(SessionState::Generating);
        info!(
            turn = self.turns,
            provider = self.services.engine.provider_name(),
            history = self.history.len(),
            "Generating reply"
        );

        let outcome = guarded(&*self.conn, self.services.engine.respond(&mut self.history, &user_text)).await?;
        let reply = match outcome {
            Ok(reply) => reply,
            Err(e) => {
                warn!(turn = self.turns, "Generation failed, sending apology: {}", e);
                self.apology.clone()
            }
        };

        self.send(ServerMessage::Reply(reply.clone())).await?;
        if self.endpoint.speaks() && self.speak(&reply).await? == Speech::Abandoned {
            return Ok(());
        }

        self.complete_turn(&user_text, &reply, started);
        Ok(())
    }

    /// Synthesize `text` and stream it. Provider failures become a notice and
    /// abandon the turn; only transport problems and disconnects escape.
    async fn speak(&mut self, text: &str) -> Result<Speech, SessionError> {
        self.set_state(SessionState::Synthesizing);
        info!(
            turn = self.turns,
            provider = self.services.synthesizer.provider_name(),
            "Synthesizing {} chars",
            text.len()
        );

        let audio = match guarded(&*self.conn, self.services.synthesizer.synthesize(text)).await? {
            Ok(audio) => audio,
            Err(SessionError::Validation(reason)) => {
                debug!(turn = self.turns, "Skipping synthesis: {}", reason);
                self.set_state(SessionState::Listening);
                return Ok(Speech::Abandoned);
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(turn = self.turns, "Synthesis failed: {}", e);
                self.send(ServerMessage::Error(SYNTHESIS_FAILED.to_string())).await?;
                self.set_state(SessionState::Listening);
                return Ok(Speech::Abandoned);
            }
        };

        self.set_state(SessionState::Streaming);
        let pcm = audio.to_pcm16();
        match self.streamer.stream(&*self.conn, &pcm).await? {
            StreamOutcome::Completed { chunks } => {
                debug!(turn = self.turns, "Streamed {} chunks", chunks)
            }
            StreamOutcome::Cancelled { chunks } => {
                info!(turn = self.turns, "Client left during playback after {} chunks", chunks)
            }
        }

        self.set_state(SessionState::Listening);
        Ok(Speech::Spoken)
    }

    fn complete_turn(&mut self, input: &str, output: &str, started: Instant) {
        let duration = started.elapsed().as_secs_f64();
        self.turns += 1;
        self.run.log_turn(input, output, Some(duration));
        info!(turn = self.turns, "Turn completed in {:.2}s", duration);
        self.set_state(SessionState::Listening);
    }

    async fn teardown(&mut self, reason: EndReason) {
        self.set_state(SessionState::Closed);
        self.buffer.clear();
        if !self.history.is_empty() {
            debug!("Dropping {} history entries", self.history.len());
            self.history.clear();
        }
        self.conn.close().await;
        self.run.end_run(reason, self.turns);

        let lifetime = Utc::now().signed_duration_since(self.created_at);
        info!(
            turns = self.turns,
            "Session ended ({}) after {:.1}s",
            reason,
            lifetime.num_milliseconds() as f64 / 1000.0
        );
    }
}

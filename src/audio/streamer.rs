//! # Audio Streamer
//!
//! Paced, chunked delivery of synthesized PCM to a client.
//!
//! Chunks are written one at a time with a short pause between them so client
//! playback buffers are not flooded. Liveness is checked before every chunk: a
//! client that leaves mid-stream cancels the stream, which is reported as an
//! outcome rather than an error. When every chunk is out and the client is
//! still there, an end marker follows so the client knows playback is complete.

use crate::config::StreamingConfig;
use crate::error::SessionError;
use crate::session::{Connection, ServerMessage};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Every chunk and the end marker were delivered
    Completed { chunks: usize },
    /// The client went away after `chunks` chunks
    Cancelled { chunks: usize },
}

#[derive(Debug, Clone)]
pub struct AudioStreamer {
    chunk_bytes: usize,
    chunk_delay: Duration,
    end_marker: String,
}

impl AudioStreamer {
    pub fn new(chunk_bytes: usize, chunk_delay: Duration, end_marker: impl Into<String>) -> Self {
        Self {
            chunk_bytes: chunk_bytes.max(1),
            chunk_delay,
            end_marker: end_marker.into(),
        }
    }

    pub fn from_config(config: &StreamingConfig) -> Self {
        Self::new(
            config.chunk_bytes,
            Duration::from_millis(config.chunk_delay_ms),
            config.end_marker.clone(),
        )
    }

    /// Stream `pcm` to `conn`.
    ///
    /// ## Returns:
    /// - **Ok(Completed)**: all chunks plus the end marker were sent
    /// - **Ok(Cancelled)**: the connection closed part way; the end marker was not sent
    /// - **Err(Transport)**: a write failed while the connection still reported itself live
    pub async fn stream(&self, conn: &dyn Connection, pcm: &[u8]) -> Result<StreamOutcome, SessionError> {
        debug!("Streaming {} bytes of audio in {}-byte chunks", pcm.len(), self.chunk_bytes);

        let mut chunks = 0;
        for chunk in pcm.chunks(self.chunk_bytes) {
            if !conn.is_connected() {
                debug!("Client left after {} chunks, stream cancelled", chunks);
                return Ok(StreamOutcome::Cancelled { chunks });
            }

            match conn.send_binary(chunk.to_vec()).await {
                Ok(()) => chunks += 1,
                Err(_) if !conn.is_connected() => return Ok(StreamOutcome::Cancelled { chunks }),
                Err(err) => return Err(err),
            }

            tokio::time::sleep(self.chunk_delay).await;
        }

        if !conn.is_connected() {
            return Ok(StreamOutcome::Cancelled { chunks });
        }

        let marker = ServerMessage::EndOfSpeech(self.end_marker.clone());
        debug!(kind = marker.kind(), "Stream complete after {} chunks", chunks);
        match conn.send_text(marker.into_text()).await {
            Ok(()) => Ok(StreamOutcome::Completed { chunks }),
            Err(_) if !conn.is_connected() => Ok(StreamOutcome::Cancelled { chunks }),
            Err(err) => Err(err),
        }
    }
}

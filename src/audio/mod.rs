//! # Audio Processing Module
//!
//! Everything that touches raw audio on its way in from, or out to, a client.
//!
//! ## Key Components:
//! - **Buffer**: per-session accumulator of inbound PCM frames
//! - **Codec**: PCM16 and WAV encode/decode
//! - **Signal**: mono downmix and resampling
//! - **Streamer**: paced chunked delivery of synthesized speech
//!
//! ## Wire Format:
//! - **Inbound**: PCM16 little-endian, mono, at the client's capture rate
//! - **Outbound**: PCM16 little-endian at the synthesis target rate, followed by an end marker

pub mod buffer;
pub mod codec;
pub mod signal;
pub mod streamer;

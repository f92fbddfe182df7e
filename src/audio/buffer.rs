//! # Audio Accumulator
//!
//! Collects a turn's worth of inbound PCM frames as normalized float samples.
//!
//! ## Ownership:
//! Each session owns exactly one `AudioBuffer` and is the only code that touches
//! it, so there is no locking here. Frames are appended strictly in arrival order
//! with no reordering or deduplication.
//!
//! ## Turn boundaries:
//! The buffer never decides when a turn ends. The orchestrator calls [`AudioBuffer::take`]
//! on an end-of-turn signal, which hands over every sample and leaves the buffer
//! empty in a single step.

use crate::audio::codec::decode_pcm16_le;
use crate::error::SessionError;

#[derive(Debug)]
pub struct AudioBuffer {
    /// Normalized samples in [-1.0, 1.0], in send order
    samples: Vec<f32>,

    /// Rate of the client's capture stream
    sample_rate: u32,

    /// Binary frames appended since the last take
    frames: usize,
}

impl AudioBuffer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            samples: Vec::new(),
            sample_rate,
            frames: 0,
        }
    }

    /// Decode a PCM16 little-endian frame and append it.
    ///
    /// ## Returns:
    /// - **Ok(n)**: number of samples appended (0 for an empty frame)
    /// - **Err(Validation)**: the frame was not whole 16-bit samples; nothing was appended
    pub fn append_pcm_frame(&mut self, data: &[u8]) -> Result<usize, SessionError> {
        let decoded = decode_pcm16_le(data)?;
        let appended = decoded.len();
        if appended > 0 {
            self.samples.extend_from_slice(&decoded);
            self.frames += 1;
        }
        Ok(appended)
    }

    /// Snapshot the whole buffer and clear it.
    pub fn take(&mut self) -> Vec<f32> {
        self.frames = 0;
        std::mem::take(&mut self.samples)
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.frames = 0;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Duration = number_of_samples / sample_rate
    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate.max(1) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(values: &[i16]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn test_frames_concatenate_in_order() {
        let mut buffer = AudioBuffer::new(16000);
        assert_eq!(buffer.append_pcm_frame(&frame(&[0, 16384])).unwrap(), 2);
        assert_eq!(buffer.append_pcm_frame(&frame(&[-16384])).unwrap(), 1);

        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.frames(), 2);
        assert_eq!(buffer.take(), vec![0.0, 0.5, -0.5]);
    }

    #[test]
    fn test_take_clears_atomically() {
        let mut buffer = AudioBuffer::new(16000);
        buffer.append_pcm_frame(&frame(&[1; 500])).unwrap();
        buffer.append_pcm_frame(&frame(&[2; 500])).unwrap();

        let snapshot = buffer.take();
        assert_eq!(snapshot.len(), 1000);
        assert!(buffer.is_empty());
        assert_eq!(buffer.frames(), 0);
        assert!(buffer.take().is_empty());
    }

    #[test]
    fn test_invalid_frame_leaves_buffer_untouched() {
        let mut buffer = AudioBuffer::new(16000);
        buffer.append_pcm_frame(&frame(&[5, 6])).unwrap();
        assert!(buffer.append_pcm_frame(&[1, 2, 3]).is_err());
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.append_pcm_frame(&[]).unwrap(), 0);
        assert_eq!(buffer.frames(), 1);
    }

    #[test]
    fn test_duration() {
        let mut buffer = AudioBuffer::new(16000);
        buffer.append_pcm_frame(&frame(&[0; 8000])).unwrap();
        assert!((buffer.duration_seconds() - 0.5).abs() < f64::EPSILON);
    }
}

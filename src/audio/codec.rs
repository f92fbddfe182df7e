//! # Audio Codecs
//!
//! Conversions between the wire formats this service speaks and the float
//! sample arrays used internally.
//!
//! ## Formats:
//! - **PCM16 LE**: raw little-endian signed 16-bit samples. Inbound client audio
//!   and outbound synthesized speech both use this.
//! - **WAV**: self-describing container. Uploaded to transcription providers and
//!   returned by synthesis providers.
//!
//! The two PCM directions deliberately use different scales: decoding divides by
//! 32768 so that `i16::MIN` maps exactly to -1.0, encoding clips to [-1, 1] and
//! multiplies by 32767 so that 1.0 never overflows.

use crate::error::SessionError;
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use std::io::{self, Cursor};
use wav::{BitDepth, Header};

const WAV_FORMAT_PCM: u16 = 1;

/// Decoded container audio: interleaved samples plus their layout.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Decode a binary frame of PCM16 little-endian samples into floats in [-1.0, 1.0].
///
/// ## Validation:
/// An odd byte count cannot be a whole number of 16-bit samples and is rejected
/// rather than silently dropping the trailing byte.
pub fn decode_pcm16_le(data: &[u8]) -> Result<Vec<f32>, SessionError> {
    if data.len() % 2 != 0 {
        return Err(SessionError::Validation(format!(
            "Audio frame length {} is not a whole number of 16-bit samples",
            data.len()
        )));
    }

    let mut cursor = Cursor::new(data);
    let mut samples = Vec::with_capacity(data.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample as f32 / 32768.0);
    }

    Ok(samples)
}

/// Clip to [-1, 1], scale by 32767, truncate toward zero.
pub fn float_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0) as i16
}

/// Encode float samples as PCM16 little-endian bytes.
pub fn encode_pcm16_le(samples: &[f32]) -> Vec<u8> {
    let pcm: Vec<i16> = samples.iter().map(|&s| float_to_i16(s)).collect();
    let mut bytes = vec![0u8; pcm.len() * 2];
    LittleEndian::write_i16_into(&pcm, &mut bytes);
    bytes
}

/// Wrap float samples in a 16-bit PCM WAV container.
pub fn encode_wav(samples: &[f32], sample_rate: u32, channels: u16) -> io::Result<Vec<u8>> {
    let header = Header::new(WAV_FORMAT_PCM, channels, sample_rate, 16);
    let pcm: Vec<i16> = samples.iter().map(|&s| float_to_i16(s)).collect();

    let mut cursor = Cursor::new(Vec::with_capacity(44 + pcm.len() * 2));
    wav::write(header, &BitDepth::Sixteen(pcm), &mut cursor)?;
    Ok(cursor.into_inner())
}

/// Decode a WAV payload of any common bit depth into interleaved floats.
pub fn decode_wav(bytes: &[u8]) -> io::Result<DecodedAudio> {
    let mut cursor = Cursor::new(bytes);
    let (header, data) = wav::read(&mut cursor)?;

    let samples: Vec<f32> = match data {
        BitDepth::Eight(values) => values.iter().map(|&s| (s as f32 - 128.0) / 128.0).collect(),
        BitDepth::Sixteen(values) => values.iter().map(|&s| s as f32 / 32768.0).collect(),
        BitDepth::TwentyFour(values) => values.iter().map(|&s| s as f32 / 8_388_608.0).collect(),
        BitDepth::ThirtyTwoFloat(values) => values,
        BitDepth::Empty => Vec::new(),
    };

    Ok(DecodedAudio {
        samples,
        sample_rate: header.sampling_rate,
        channels: header.channel_count.max(1),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_decode_normalizes() {
        let mut data = Vec::new();
        for sample in [0i16, 16384, -16384, i16::MIN, i16::MAX] {
            data.extend_from_slice(&sample.to_le_bytes());
        }

        let samples = decode_pcm16_le(&data).unwrap();
        assert_eq!(samples.len(), 5);
        assert_eq!(samples[0], 0.0);
        assert_eq!(samples[1], 0.5);
        assert_eq!(samples[2], -0.5);
        assert_eq!(samples[3], -1.0);
        assert!(samples[4] < 1.0 && samples[4] > 0.999);
    }

    #[test]
    fn test_odd_length_frame_rejected() {
        let result = decode_pcm16_le(&[0u8; 15]);
        assert!(matches!(result, Err(SessionError::Validation(_))));
    }

    #[test]
    fn test_pcm_boundary_round_trip() {
        for original in [-1.0f32, 0.0, 1.0] {
            let bytes = encode_pcm16_le(&[original]);
            let value = i16::from_le_bytes([bytes[0], bytes[1]]);
            let restored = value as f32 / 32767.0;
            assert!(
                (restored - original).abs() <= 1.0 / 32767.0,
                "{} came back as {}",
                original,
                restored
            );
        }
    }

    #[test]
    fn test_pcm_encode_clips_and_truncates() {
        assert_eq!(float_to_i16(2.0), 32767);
        assert_eq!(float_to_i16(-3.5), -32767);
        // 0.5 * 32767 = 16383.5, truncated
        assert_eq!(float_to_i16(0.5), 16383);
        assert_eq!(float_to_i16(-0.5), -16383);
    }

    #[test]
    fn test_pcm_encoding_is_repeatable() {
        let samples = vec![0.25f32, -0.75, 0.0, 1.5];
        assert_eq!(encode_pcm16_le(&samples), encode_pcm16_le(&samples));
        assert_eq!(encode_pcm16_le(&samples).len(), samples.len() * 2);
    }

    #[test]
    fn test_wav_container_round_trip() {
        let samples: Vec<f32> = (0..160).map(|i| (i as f32 * 0.1).sin() * 0.5).collect();
        let bytes = encode_wav(&samples, 16000, 1).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");

        let decoded = decode_wav(&bytes).unwrap();
        assert_eq!(decoded.sample_rate, 16000);
        assert_eq!(decoded.channels, 1);
        assert_eq!(decoded.samples.len(), samples.len());
        for (a, b) in samples.iter().zip(decoded.samples.iter()) {
            assert!((a - b).abs() < 1e-3);
        }
    }
}

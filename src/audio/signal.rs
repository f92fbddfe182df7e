//! Channel downmixing and sample-rate conversion.

use rubato::{FftFixedIn, Resampler};
use tracing::warn;

/// Frames handed to the FFT resampler per call.
const RESAMPLER_CHUNK: usize = 1024;

/// Below this many frames the FFT resampler's latency dominates; interpolate instead.
const MIN_FFT_FRAMES: usize = 64;

/// Average interleaved frames down to a single channel.
pub fn to_mono(interleaved: &[f32], channels: u16) -> Vec<f32> {
    let channels = channels.max(1) as usize;
    if channels == 1 {
        return interleaved.to_vec();
    }

    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Resample a mono signal. Equal rates return the input unchanged.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    if samples.len() < MIN_FFT_FRAMES {
        return resample_linear(samples, from_rate, to_rate);
    }

    match resample_fft(samples, from_rate, to_rate) {
        Ok(resampled) => resampled,
        Err(e) => {
            warn!("FFT resampling {}Hz -> {}Hz failed, using linear fallback: {}", from_rate, to_rate, e);
            resample_linear(samples, from_rate, to_rate)
        }
    }
}

/// Resample each channel of an interleaved signal and re-interleave.
pub fn resample_interleaved(interleaved: &[f32], channels: u16, from_rate: u32, to_rate: u32) -> Vec<f32> {
    let channels = channels.max(1) as usize;
    if channels == 1 {
        return resample(interleaved, from_rate, to_rate);
    }

    let planes: Vec<Vec<f32>> = (0..channels)
        .map(|c| {
            let plane: Vec<f32> = interleaved.iter().skip(c).step_by(channels).copied().collect();
            resample(&plane, from_rate, to_rate)
        })
        .collect();

    let frames = planes.iter().map(Vec::len).min().unwrap_or(0);
    let mut out = Vec::with_capacity(frames * channels);
    for i in 0..frames {
        for plane in &planes {
            out.push(plane[i]);
        }
    }
    out
}

fn expected_len(input_len: usize, from_rate: u32, to_rate: u32) -> usize {
    (input_len as f64 * to_rate as f64 / from_rate as f64).round() as usize
}

/// Feed the whole signal through rubato chunk by chunk, flush the tail, then
/// drop the resampler's startup delay so output lines up with input.
fn resample_fft(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, String> {
    let mut resampler = FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, RESAMPLER_CHUNK, 2, 1)
        .map_err(|e| e.to_string())?;

    let input: Vec<f64> = samples.iter().map(|&s| s as f64).collect();
    let expected = expected_len(samples.len(), from_rate, to_rate);
    let delay = resampler.output_delay();
    let mut output: Vec<f64> = Vec::with_capacity(expected + delay + resampler.output_frames_max());

    let mut position = 0;
    while input.len() - position >= resampler.input_frames_next() {
        let needed = resampler.input_frames_next();
        let chunk = [&input[position..position + needed]];
        let frames = resampler.process(&chunk[..], None).map_err(|e| e.to_string())?;
        output.extend_from_slice(&frames[0]);
        position += needed;
    }

    if position < input.len() {
        let chunk = [&input[position..]];
        let frames = resampler.process_partial(Some(&chunk[..]), None).map_err(|e| e.to_string())?;
        output.extend_from_slice(&frames[0]);
    }

    while output.len() < expected + delay {
        let frames = resampler
            .process_partial::<&[f64]>(None, None)
            .map_err(|e| e.to_string())?;
        if frames[0].is_empty() {
            break;
        }
        output.extend_from_slice(&frames[0]);
    }

    Ok(output
        .into_iter()
        .skip(delay)
        .take(expected)
        .map(|s| s as f32)
        .collect())
}

/// Linear interpolation fallback.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if samples.is_empty() || from_rate == to_rate || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let new_len = expected_len(samples.len(), from_rate, to_rate);
    let last = samples.len() - 1;

    (0..new_len)
        .map(|i| {
            let src = i as f64 / ratio;
            let floor = (src.floor() as usize).min(last);
            let ceil = (floor + 1).min(last);
            let frac = (src - floor as f64) as f32;
            samples[floor] * (1.0 - frac) + samples[ceil] * frac
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mono_downmix_averages_frames() {
        let stereo = vec![1.0, 0.0, 0.5, 0.5, -1.0, 1.0];
        assert_eq!(to_mono(&stereo, 2), vec![0.5, 0.5, 0.0]);
        assert_eq!(to_mono(&stereo, 1), stereo);
    }

    #[test]
    fn test_resample_same_rate_is_identity() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(resample(&samples, 16000, 16000), samples);
    }

    #[test]
    fn test_resample_lengths() {
        let one_second: Vec<f32> = (0..48000)
            .map(|i| (i as f32 * 440.0 * 2.0 * std::f32::consts::PI / 48000.0).sin() * 0.5)
            .collect();

        let down = resample(&one_second, 48000, 16000);
        assert_eq!(down.len(), 16000);

        let up = resample(&down, 16000, 22050);
        assert_eq!(up.len(), 22050);
        assert!(up.iter().all(|s| s.abs() <= 1.0));
    }

    #[test]
    fn test_linear_fallback_for_short_input() {
        let short = vec![0.0, 1.0, 0.0, -1.0];
        let up = resample(&short, 8000, 16000);
        assert_eq!(up.len(), 8);
        assert_eq!(up[0], 0.0);
        assert!((up[1] - 0.5).abs() < 1e-6);
        assert_eq!(up[2], 1.0);
    }

    #[test]
    fn test_interleaved_resample_keeps_channels() {
        let stereo: Vec<f32> = (0..2000).flat_map(|_| [0.25f32, -0.25]).collect();
        let out = resample_interleaved(&stereo, 2, 16000, 8000);
        assert_eq!(out.len(), 2000);
        assert!((out[1000] - 0.25).abs() < 0.05);
        assert!((out[1001] + 0.25).abs() < 0.05);
    }
}

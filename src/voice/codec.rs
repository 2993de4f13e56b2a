//! Wire audio codec
//!
//! Outbound: mono `f32` capture samples → little-endian PCM16 → base64, at 16 kHz.
//! Inbound: base64 PCM16 mono at 24 kHz → normalized `f32` at the output rate.
//! Both formats are fixed by the remote endpoint.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::{Error, Result};

/// Sample rate of outbound (microphone) audio
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of inbound (synthesized) audio
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Samples per outbound frame
pub const FRAME_SAMPLES: usize = 4096;

/// MIME type tag for outbound frames
pub const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// A block of decoded mono audio
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl PcmBuffer {
    #[must_use]
    pub const fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Playback duration in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Convert `f32` samples in `[-1.0, 1.0]` to little-endian PCM16 bytes
#[must_use]
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        #[allow(clippy::cast_possible_truncation)]
        let s = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    bytes
}

/// Convert little-endian PCM16 bytes to normalized `f32` samples
///
/// A trailing odd byte is dropped.
#[must_use]
pub fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect()
}

/// Encode a capture frame as base64 PCM16 text
#[must_use]
pub fn encode_frame(samples: &[f32]) -> String {
    BASE64.encode(f32_to_pcm16(samples))
}

/// Decode base64 PCM16 text to samples at the wire rate
///
/// # Errors
///
/// Returns error if `data` is not valid base64
pub fn decode_frame(data: &str) -> Result<Vec<f32>> {
    let bytes = BASE64
        .decode(data.trim())
        .map_err(|e| Error::Audio(format!("invalid base64 audio: {e}")))?;
    Ok(pcm16_to_f32(&bytes))
}

/// Decode an inbound audio payload into a buffer playable at `output_rate`
///
/// # Errors
///
/// Returns error if the payload is not valid base64 or resampling fails
pub fn decode_to_buffer(data: &str, output_rate: u32) -> Result<PcmBuffer> {
    let samples = decode_frame(data)?;
    if output_rate == OUTPUT_SAMPLE_RATE || samples.is_empty() {
        return Ok(PcmBuffer::new(samples, OUTPUT_SAMPLE_RATE));
    }
    let resampled = resample(&samples, OUTPUT_SAMPLE_RATE, output_rate)?;
    Ok(PcmBuffer::new(resampled, output_rate))
}

/// Resample mono audio using rubato
///
/// The final partial chunk is zero-padded and the output trimmed to the
/// expected length, so short payloads are not lost.
///
/// # Errors
///
/// Returns error if the resampler cannot be constructed or fails
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    use rubato::{FftFixedIn, Resampler};

    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let chunk_size = 1024;
    let sub_chunks = 2;

    let mut resampler =
        FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, chunk_size, sub_chunks, 1)
            .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

    let expected =
        (samples.len() as f64 * f64::from(to_rate) / f64::from(from_rate)).round() as usize;
    let delay = resampler.output_delay();

    let mut input: Vec<f64> = samples.iter().map(|&s| f64::from(s)).collect();
    // Pad far enough to flush the resampler's internal delay as well
    let delay_in = (delay as f64 * f64::from(from_rate) / f64::from(to_rate)).ceil() as usize;
    let padded = (input.len() + delay_in + chunk_size).div_ceil(chunk_size) * chunk_size;
    input.resize(padded, 0.0);

    let mut output = Vec::with_capacity(expected + delay);
    for chunk in input.chunks(chunk_size) {
        let result = resampler
            .process(&[chunk], None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        output.extend_from_slice(&result[0]);
    }

    Ok(output
        .iter()
        .skip(delay)
        .take(expected)
        .map(|&s| s as f32)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm16_is_little_endian() {
        let bytes = f32_to_pcm16(&[1.0, -1.0, 0.0]);
        assert_eq!(bytes, vec![0xFF, 0x7F, 0x01, 0x80, 0x00, 0x00]);
    }

    #[test]
    fn out_of_range_samples_are_clamped() {
        let bytes = f32_to_pcm16(&[4.0, -4.0]);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), 32767);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), -32767);
    }

    #[test]
    fn decode_normalizes() {
        let samples = pcm16_to_f32(&[0x00, 0x80, 0x00, 0x40]);
        assert!((samples[0] + 1.0).abs() < f32::EPSILON);
        assert!((samples[1] - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn truncated_trailing_byte_is_dropped() {
        let samples = pcm16_to_f32(&[0x00, 0x40, 0x12]);
        assert_eq!(samples.len(), 1);
    }

    #[test]
    fn decode_rejects_invalid_base64() {
        assert!(decode_frame("***").is_err());
    }

    #[test]
    fn encode_then_decode_is_close() {
        let input = [0.25_f32, -0.5, 0.75];
        let decoded = decode_frame(&encode_frame(&input)).unwrap();
        for (a, b) in input.iter().zip(&decoded) {
            assert!((a - b).abs() < 1e-3, "{a} vs {b}");
        }
    }

    #[test]
    fn buffer_duration_at_wire_rate() {
        let data = encode_frame(&vec![0.0; 24_000]);
        let buffer = decode_to_buffer(&data, OUTPUT_SAMPLE_RATE).unwrap();
        assert_eq!(buffer.sample_rate, OUTPUT_SAMPLE_RATE);
        assert!((buffer.duration() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn buffer_resampled_to_output_rate_keeps_duration() {
        let data = encode_frame(&vec![0.1; 2400]);
        let buffer = decode_to_buffer(&data, 48_000).unwrap();
        assert_eq!(buffer.sample_rate, 48_000);
        assert_eq!(buffer.samples.len(), 4800);
    }
}

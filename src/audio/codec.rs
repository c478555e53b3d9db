//! # Audio Frame Codec
//!
//! Stateless conversions between the representations audio passes through on
//! its way in and out of the system:
//!
//! - float samples (-1.0..1.0) ↔ 16-bit signed PCM
//! - 16-bit PCM ↔ little-endian byte buffers
//! - rate reduction for microphone capture (e.g. 48kHz → 16kHz)
//! - base64 for audio carried inside JSON messages
//! - RMS volume measurement for lip-sync/visualization feedback

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// Convert float samples to 16-bit PCM, clamping out-of-range values.
pub fn float_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
        .collect()
}

/// Convert 16-bit PCM samples back to floats in -1.0..1.0.
pub fn pcm16_to_float(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

/// Serialize 16-bit samples as little-endian bytes (the wire format).
pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        // Writing to a Vec cannot fail.
        bytes.write_i16::<LittleEndian>(sample).expect("vec write");
    }
    bytes
}

/// Parse a little-endian byte buffer into 16-bit samples.
///
/// Fails on odd-length input: a truncated sample means the stream is torn and
/// everything after it would be garbage.
pub fn bytes_to_pcm16(data: &[u8]) -> Result<Vec<i16>, String> {
    if data.len() % 2 != 0 {
        return Err(format!(
            "PCM byte buffer length must be even for 16-bit samples, got {}",
            data.len()
        ));
    }

    let mut cursor = Cursor::new(data);
    let mut samples = Vec::with_capacity(data.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample);
    }
    Ok(samples)
}

/// Reduce the sample rate of float audio by averaging the source samples that
/// fall between consecutive output positions.
///
/// Averaging (rather than plain decimation) keeps speech intelligible enough
/// for transcription without a real low-pass filter.
pub fn downsample(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if to_rate >= from_rate || input.is_empty() {
        return input.to_vec();
    }

    let ratio = from_rate as f32 / to_rate as f32;
    let out_len = (input.len() as f32 / ratio) as usize;
    let mut output = Vec::with_capacity(out_len);

    let mut offset = 0usize;
    for i in 0..out_len {
        let next_offset = (((i + 1) as f32) * ratio).round() as usize;
        let end = next_offset.min(input.len()).max(offset + 1);

        let window = &input[offset..end];
        let sum: f32 = window.iter().sum();
        output.push(sum / window.len() as f32);

        offset = end;
    }

    output
}

/// Encode raw audio bytes for transport inside a JSON message.
pub fn encode_base64(data: &[u8]) -> String {
    BASE64.encode(data)
}

/// Decode base64 audio received inside a JSON message.
pub fn decode_base64(data: &str) -> Result<Vec<u8>, String> {
    BASE64
        .decode(data)
        .map_err(|e| format!("invalid base64 audio payload: {}", e))
}

/// Root-mean-square volume of a float sample window, in 0.0..1.0.
///
/// Drives mouth movement and the mic level indicator, so it only needs to be
/// proportional, not calibrated.
pub fn rms_volume(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

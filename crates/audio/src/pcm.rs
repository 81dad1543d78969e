//! PCM16 sample conversion and the base64 byte transform.
//!
//! The capture side scales clamped floats asymmetrically — negative samples
//! by 32768, non-negative by 32767 — because the signed 16-bit range is
//! `[-32768, 32767]`. The playback side divides by 32768. A round trip stays
//! within one quantization step (`1/32768`).

use base64::Engine;

/// Converts normalized float samples to signed 16-bit PCM.
pub fn f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&sample| {
            let s = sample.clamp(-1.0, 1.0);
            if s < 0.0 {
                (s * 32768.0) as i16
            } else {
                (s * 32767.0) as i16
            }
        })
        .collect()
}

/// Converts signed 16-bit PCM to normalized float samples.
pub fn i16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

/// Encodes PCM16 samples as base64 over little-endian bytes.
pub fn encode_pcm16(samples: &[i16]) -> String {
    let bytes: Vec<u8> = samples.iter().flat_map(|&s| s.to_le_bytes()).collect();
    base64::engine::general_purpose::STANDARD.encode(&bytes)
}

/// Decodes base64 little-endian bytes into PCM16 samples.
///
/// An incomplete trailing byte is skipped; undecodable input yields an empty
/// buffer rather than an error, since one bad frame must not stall playback.
pub fn decode_pcm16(data: &str) -> Vec<i16> {
    match base64::engine::general_purpose::STANDARD.decode(data) {
        Ok(bytes) => bytes
            .chunks_exact(2)
            .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
            .collect(),
        Err(err) => {
            tracing::error!(%err, "failed to decode base64 audio payload");
            Vec::new()
        }
    }
}

/// Decodes a base64 PCM16 payload straight to normalized floats.
pub fn decode_f32(data: &str) -> Vec<f32> {
    i16_to_f32(&decode_pcm16(data))
}

/// Clamps, scales, and encodes float samples in one step (the capture path).
pub fn encode_f32(samples: &[f32]) -> String {
    encode_pcm16(&f32_to_i16(samples))
}

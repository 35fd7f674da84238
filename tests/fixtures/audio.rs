//! Programmatically generated PCM test audio.
//!
//! Generated input keeps the tests reproducible and free of external
//! audio files. All fixtures are PCM signed 16-bit little-endian mono.

use std::f32::consts::PI;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

pub const SAMPLE_RATE: u32 = 16_000;

/// Silence (pure zeros) of the given duration.
pub fn silence(ms: u64) -> Vec<u8> {
    vec![0u8; samples_for(ms) * 2]
}

/// A 440 Hz sine tone at the given amplitude.
pub fn tone(ms: u64, amplitude: i16) -> Vec<u8> {
    let samples = samples_for(ms);
    let mut out = Vec::with_capacity(samples * 2);
    for i in 0..samples {
        let t = i as f32 / SAMPLE_RATE as f32;
        let sample = (amplitude as f32 * (2.0 * PI * 440.0 * t).sin()) as i16;
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

/// Splits audio into fixed-duration chunks, as a streaming client would
/// send them.
pub fn chunked(audio: &[u8], chunk_ms: u64) -> Vec<Vec<u8>> {
    let chunk_bytes = samples_for(chunk_ms) * 2;
    audio.chunks(chunk_bytes).map(<[u8]>::to_vec).collect()
}

pub fn to_base64(audio: &[u8]) -> String {
    BASE64.encode(audio)
}

pub fn from_base64(audio: &str) -> Vec<u8> {
    BASE64.decode(audio).expect("valid base64 fixture")
}

fn samples_for(ms: u64) -> usize {
    (ms * u64::from(SAMPLE_RATE) / 1000) as usize
}

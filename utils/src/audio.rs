use base64::Engine;
use std::time::Duration;

/// Sample rate of the telephony media stream (8 kHz, one byte per µ-law sample).
pub const TELEPHONY_SAMPLE_RATE: u32 = 8000;

/// Decodes a base64 media payload. Malformed payloads are logged and yield no audio.
pub fn decode(payload: &str) -> Vec<u8> {
    match base64::engine::general_purpose::STANDARD.decode(payload) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!("failed to decode base64 payload: {}", e);
            Vec::new()
        }
    }
}

pub fn encode(audio: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(audio)
}

/// Playback duration of a mono µ-law frame.
pub fn frame_duration(frame: &[u8], sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_micros(frame.len() as u64 * 1_000_000 / sample_rate as u64)
}

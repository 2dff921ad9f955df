//! Audio math shared by every service: sample conversion, RMS, framing,
//! and base64 payload helpers. Companding, resampling, and WAV I/O live in
//! the submodules. Everything here is a pure function over slices; no
//! streaming state.

mod g711;
mod resample;
mod wav;

pub use g711::{decode_mulaw, encode_mulaw, linear_to_mulaw, mulaw_to_linear};
pub use resample::resample_linear;
pub use wav::{read_wav_pcm16, wav_bytes_pcm16, write_wav_pcm16};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::{Error, Result};

/// Telephony frame length used throughout the pipeline.
pub const FRAME_MS: u32 = 20;

/// One 20 ms μ-law frame at 8 kHz: one byte per sample.
pub const MULAW_FRAME_BYTES: usize = 160;

/// Samples in one 20 ms frame at the given rate.
pub fn frame_samples(sample_rate: u32) -> usize {
    (sample_rate / (1000 / FRAME_MS)) as usize
}

/// Bytes in one 20 ms PCM16 frame at the given rate.
pub fn frame_bytes(sample_rate: u32) -> usize {
    frame_samples(sample_rate) * 2
}

/// Little-endian PCM16 bytes to samples. A trailing odd byte is ignored.
pub fn bytes_to_pcm16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect()
}

/// Samples to little-endian PCM16 bytes.
pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// RMS energy normalized to [0, 1]: `sqrt(mean(x^2)) / 32768`.
pub fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    ((sum_sq / samples.len() as f64).sqrt() / 32768.0) as f32
}

pub fn b64_encode(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

pub fn b64_decode(data: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(data.as_bytes())
        .map_err(|e| Error::Protocol(format!("base64 decode: {e}")))
}

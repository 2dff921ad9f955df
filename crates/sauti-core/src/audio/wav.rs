//! WAV read/write helpers over `hound`.

use std::io::Cursor;
use std::path::Path;

use crate::error::{Error, Result};

fn spec(sample_rate: u32) -> hound::WavSpec {
    hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

/// Write mono PCM16 samples as a canonical RIFF WAV file.
pub fn write_wav_pcm16(path: &Path, samples: &[i16], sample_rate: u32) -> Result<()> {
    let mut writer = hound::WavWriter::create(path, spec(sample_rate))
        .map_err(|e| Error::Resource(format!("create wav {}: {e}", path.display())))?;
    for &s in samples {
        writer
            .write_sample(s)
            .map_err(|e| Error::Resource(format!("write wav sample: {e}")))?;
    }
    writer
        .finalize()
        .map_err(|e| Error::Resource(format!("finalize wav: {e}")))
}

/// Render mono PCM16 samples as in-memory WAV bytes (tests and fixtures).
pub fn wav_bytes_pcm16(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    {
        let cursor = Cursor::new(&mut bytes);
        let mut writer = hound::WavWriter::new(cursor, spec(sample_rate))
            .map_err(|e| Error::Resource(format!("wav writer: {e}")))?;
        for &s in samples {
            writer
                .write_sample(s)
                .map_err(|e| Error::Resource(format!("write wav sample: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| Error::Resource(format!("finalize wav: {e}")))?;
    }
    Ok(bytes)
}

/// Read a PCM16 WAV file as mono samples plus its sample rate. Multi-channel
/// input is downmixed by averaging.
pub fn read_wav_pcm16(path: &Path) -> Result<(Vec<i16>, u32)> {
    let mut reader = hound::WavReader::open(path)
        .map_err(|e| Error::Resource(format!("open wav {}: {e}", path.display())))?;
    let spec = reader.spec();
    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(Error::Resource(format!(
            "expected 16-bit PCM WAV, got {:?} {} bit",
            spec.sample_format, spec.bits_per_sample
        )));
    }

    let channels = spec.channels.max(1) as usize;
    let interleaved: Vec<i16> = reader.samples::<i16>().filter_map(|s| s.ok()).collect();
    if channels == 1 {
        return Ok((interleaved, spec.sample_rate));
    }

    let mut mono = Vec::with_capacity(interleaved.len() / channels + 1);
    for frame in interleaved.chunks(channels) {
        let sum: i32 = frame.iter().map(|&s| s as i32).sum();
        mono.push((sum / frame.len() as i32) as i16);
    }
    Ok((mono, spec.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_wav_has_canonical_header() {
        let bytes = wav_bytes_pcm16(&[0i16; 16], 16000).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        // 44-byte header + 32 bytes of data.
        assert_eq!(bytes.len(), 44 + 32);
    }

    #[test]
    fn file_round_trip() {
        let dir = std::env::temp_dir().join(format!("sauti-wav-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("tone.wav");

        let samples: Vec<i16> = (0..320).map(|i| ((i % 64) * 100) as i16).collect();
        write_wav_pcm16(&path, &samples, 16000).unwrap();
        let (read, rate) = read_wav_pcm16(&path).unwrap();
        assert_eq!(rate, 16000);
        assert_eq!(read, samples);

        let _ = std::fs::remove_dir_all(dir);
    }
}

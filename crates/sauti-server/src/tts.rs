//! TTS subprocess driver.
//!
//! The engine is a piper-style binary: text on stdin, raw mono PCM16 on
//! stdout at its native rate. Post-processing to the negotiated output rate
//! goes through the configured resampler binary when present, or the
//! internal linear resampler otherwise. TTS failures are not retried.

use tracing::debug;

use sauti_core::audio;
use sauti_core::error::{Error, Result};

use crate::config::ServerConfig;
use crate::process::{run_captured, Invocation};

/// Synthesize one sentence chunk as PCM16 samples at `output_rate`.
pub async fn synthesize(cfg: &ServerConfig, text: &str, output_rate: u32) -> Result<Vec<i16>> {
    let bin = cfg
        .tts_bin
        .as_deref()
        .ok_or_else(|| Error::Config("tts binary not configured".into()))?;
    let model = cfg
        .tts_model
        .as_deref()
        .ok_or_else(|| Error::Config("tts model not configured".into()))?;
    let tts_config = cfg
        .tts_config
        .as_deref()
        .ok_or_else(|| Error::Config("tts config not configured".into()))?;

    let raw = run_captured(Invocation {
        name: "tts",
        bin,
        args: vec![
            "--model".to_string(),
            model.display().to_string(),
            "--config".to_string(),
            tts_config.display().to_string(),
            "--output-raw".to_string(),
        ],
        stdin: Some(text.as_bytes()),
        timeout_secs: cfg.subprocess_timeout_secs,
    })
    .await?;

    if raw.is_empty() {
        return Err(Error::Subprocess("tts produced no audio".into()));
    }

    if cfg.tts_native_rate == output_rate {
        return Ok(audio::bytes_to_pcm16(&raw));
    }
    resample_raw(cfg, raw, output_rate).await
}

async fn resample_raw(cfg: &ServerConfig, raw: Vec<u8>, output_rate: u32) -> Result<Vec<i16>> {
    match cfg.resampler_bin.as_deref() {
        Some(bin) => {
            let out = run_captured(Invocation {
                name: "resampler",
                bin,
                args: sox_raw_args(cfg.tts_native_rate, output_rate),
                stdin: Some(&raw),
                timeout_secs: cfg.subprocess_timeout_secs,
            })
            .await?;
            Ok(audio::bytes_to_pcm16(&out))
        }
        None => {
            debug!(
                "no resampler binary, using internal resampling {} -> {}",
                cfg.tts_native_rate, output_rate
            );
            let samples = audio::bytes_to_pcm16(&raw);
            Ok(audio::resample_linear(
                &samples,
                cfg.tts_native_rate,
                output_rate,
            ))
        }
    }
}

fn sox_raw_args(in_rate: u32, out_rate: u32) -> Vec<String> {
    vec![
        "-t".into(),
        "raw".into(),
        "-r".into(),
        in_rate.to_string(),
        "-e".into(),
        "signed-integer".into(),
        "-b".into(),
        "16".into(),
        "-c".into(),
        "1".into(),
        "-".into(),
        "-t".into(),
        "raw".into(),
        "-r".into(),
        out_rate.to_string(),
        "-e".into(),
        "signed-integer".into(),
        "-b".into(),
        "16".into(),
        "-c".into(),
        "1".into(),
        "-".into(),
    ]
}

//! Readiness checks for the external ASR/TTS toolchain.

use std::path::Path;

use serde::Serialize;

use crate::config::ServerConfig;
use sauti_core::protocol::INPUT_SAMPLE_RATE;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessSnapshot {
    pub ready: bool,
    pub asr_binary: bool,
    pub asr_model: bool,
    pub tts_binary: bool,
    pub tts_model: bool,
    pub tts_config: bool,
    pub resampler_binary: bool,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
}

impl ReadinessSnapshot {
    /// A short description of what is missing, for `error{config}` events.
    pub fn missing(&self) -> String {
        let mut missing = Vec::new();
        if !self.asr_binary {
            missing.push("asr binary");
        }
        if !self.asr_model {
            missing.push("asr model");
        }
        if !self.tts_binary {
            missing.push("tts binary");
        }
        if !self.tts_model {
            missing.push("tts model");
        }
        if !self.tts_config {
            missing.push("tts config");
        }
        if !self.resampler_binary {
            missing.push("resampler binary");
        }
        missing.join(", ")
    }
}

/// Readiness is the conjunction of every configured external piece being
/// present. The resampler is optional; when unset the internal resampler
/// takes over and the check passes.
pub fn check(cfg: &ServerConfig) -> ReadinessSnapshot {
    let asr_binary = binary_present(cfg.asr_bin.as_deref());
    let asr_model = file_non_empty(cfg.asr_model.as_deref());
    let tts_binary = binary_present(cfg.tts_bin.as_deref());
    let tts_model = file_present(cfg.tts_model.as_deref());
    let tts_config = file_present(cfg.tts_config.as_deref());
    let resampler_binary = match cfg.resampler_bin.as_deref() {
        Some(path) => binary_present(Some(path)),
        None => true,
    };

    ReadinessSnapshot {
        ready: asr_binary && asr_model && tts_binary && tts_model && tts_config && resampler_binary,
        asr_binary,
        asr_model,
        tts_binary,
        tts_model,
        tts_config,
        resampler_binary,
        input_sample_rate: INPUT_SAMPLE_RATE,
        output_sample_rate: cfg.default_output_rate,
    }
}

fn file_present(path: Option<&Path>) -> bool {
    path.map(|p| p.is_file()).unwrap_or(false)
}

fn file_non_empty(path: Option<&Path>) -> bool {
    path.and_then(|p| std::fs::metadata(p).ok())
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

#[cfg(unix)]
fn binary_present(path: Option<&Path>) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.and_then(|p| std::fs::metadata(p).ok())
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn binary_present(path: Option<&Path>) -> bool {
    file_present(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use std::path::PathBuf;

    fn empty_cfg() -> ServerConfig {
        ServerConfig {
            default_output_rate: 24000,
            asr_bin: None,
            asr_model: None,
            tts_bin: None,
            tts_model: None,
            tts_config: None,
            tts_native_rate: 22050,
            resampler_bin: None,
            transcript_sink_url: None,
            max_pcm_bytes: 1024,
            subprocess_timeout_secs: 120,
        }
    }

    #[test]
    fn unconfigured_toolchain_is_not_ready() {
        let snapshot = check(&empty_cfg());
        assert!(!snapshot.ready);
        assert!(!snapshot.asr_binary);
        // Unset resampler does not block readiness.
        assert!(snapshot.resampler_binary);
        assert!(snapshot.missing().contains("asr binary"));
        assert!(!snapshot.missing().contains("resampler"));
    }

    #[test]
    fn missing_resampler_blocks_when_configured() {
        let mut cfg = empty_cfg();
        cfg.resampler_bin = Some(PathBuf::from("/nonexistent/sox"));
        let snapshot = check(&cfg);
        assert!(!snapshot.resampler_binary);
        assert!(snapshot.missing().contains("resampler binary"));
    }

    #[cfg(unix)]
    #[test]
    fn executable_and_model_checks_use_the_filesystem() {
        use std::os::unix::fs::PermissionsExt;

        let dir = std::env::temp_dir().join(format!("sauti-health-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let bin = dir.join("engine");
        let model = dir.join("model.bin");
        std::fs::write(&bin, b"#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();
        std::fs::write(&model, b"weights").unwrap();

        let mut cfg = empty_cfg();
        cfg.asr_bin = Some(bin.clone());
        cfg.asr_model = Some(model.clone());
        let snapshot = check(&cfg);
        assert!(snapshot.asr_binary);
        assert!(snapshot.asr_model);

        // An empty model file fails the non-empty check.
        std::fs::write(&model, b"").unwrap();
        assert!(!check(&cfg).asr_model);

        let _ = std::fs::remove_dir_all(dir);
    }
}

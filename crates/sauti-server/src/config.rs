//! Backend configuration from environment variables.

use std::path::PathBuf;

use sauti_core::buffer::DEFAULT_MAX_PCM_BYTES;
use sauti_core::protocol::VALID_OUTPUT_RATES;
use tracing::warn;

pub const DEFAULT_PORT: u16 = 8087;
pub const DEFAULT_OUTPUT_RATE: u32 = 24000;
pub const DEFAULT_TTS_NATIVE_RATE: u32 = 22050;
pub const SUBPROCESS_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Output rate used until a session negotiates another one.
    pub default_output_rate: u32,
    pub asr_bin: Option<PathBuf>,
    pub asr_model: Option<PathBuf>,
    pub tts_bin: Option<PathBuf>,
    pub tts_model: Option<PathBuf>,
    pub tts_config: Option<PathBuf>,
    /// Rate the TTS engine emits at before post-processing.
    pub tts_native_rate: u32,
    /// External resampler for TTS post-processing; internal linear
    /// resampling is the fallback.
    pub resampler_bin: Option<PathBuf>,
    pub transcript_sink_url: Option<String>,
    pub max_pcm_bytes: usize,
    pub subprocess_timeout_secs: u64,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let default_output_rate = {
            let requested = env_u32("SAUTI_OUTPUT_SAMPLE_RATE", DEFAULT_OUTPUT_RATE);
            if VALID_OUTPUT_RATES.contains(&requested) {
                requested
            } else {
                warn!(
                    "SAUTI_OUTPUT_SAMPLE_RATE={} is unsupported, using {}",
                    requested, DEFAULT_OUTPUT_RATE
                );
                DEFAULT_OUTPUT_RATE
            }
        };
        Self {
            default_output_rate,
            asr_bin: env_path("SAUTI_ASR_BIN"),
            asr_model: env_path("SAUTI_ASR_MODEL"),
            tts_bin: env_path("SAUTI_TTS_BIN"),
            tts_model: env_path("SAUTI_TTS_MODEL"),
            tts_config: env_path("SAUTI_TTS_CONFIG"),
            tts_native_rate: env_u32("SAUTI_TTS_NATIVE_RATE", DEFAULT_TTS_NATIVE_RATE),
            resampler_bin: env_path("SAUTI_RESAMPLER_BIN"),
            transcript_sink_url: std::env::var("SAUTI_TRANSCRIPT_SINK_URL")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            max_pcm_bytes: env_usize("SAUTI_MAX_PCM_BYTES", DEFAULT_MAX_PCM_BYTES),
            subprocess_timeout_secs: SUBPROCESS_TIMEOUT_SECS,
        }
    }
}

pub fn port_from_env_or_default() -> u16 {
    match std::env::var("SAUTI_SERVER_PORT") {
        Ok(raw) => match raw.trim().parse::<u16>() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!("Invalid SAUTI_SERVER_PORT='{}', falling back to {}", raw, DEFAULT_PORT);
                DEFAULT_PORT
            }
        },
        Err(_) => DEFAULT_PORT,
    }
}

fn env_path(name: &str) -> Option<PathBuf> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
}

fn env_u32(name: &str, default: u32) -> u32 {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse::<u32>() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!("Invalid {name}='{raw}', falling back to {default}");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_usize(name: &str, default: usize) -> usize {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse::<usize>() {
            Ok(parsed) if parsed > 0 => parsed,
            _ => {
                warn!("Invalid {name}='{raw}', falling back to {default}");
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    fn env_lock() -> std::sync::MutexGuard<'static, ()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
            .lock()
            .expect("environment lock poisoned")
    }

    fn clear_env() {
        for name in [
            "SAUTI_OUTPUT_SAMPLE_RATE",
            "SAUTI_ASR_BIN",
            "SAUTI_ASR_MODEL",
            "SAUTI_TTS_BIN",
            "SAUTI_TTS_MODEL",
            "SAUTI_TTS_CONFIG",
            "SAUTI_TTS_NATIVE_RATE",
            "SAUTI_RESAMPLER_BIN",
            "SAUTI_TRANSCRIPT_SINK_URL",
            "SAUTI_MAX_PCM_BYTES",
            "SAUTI_SERVER_PORT",
        ] {
            std::env::remove_var(name);
        }
    }

    #[test]
    fn defaults_without_environment() {
        let _guard = env_lock();
        clear_env();

        let cfg = ServerConfig::from_env();
        assert_eq!(cfg.default_output_rate, DEFAULT_OUTPUT_RATE);
        assert_eq!(cfg.tts_native_rate, DEFAULT_TTS_NATIVE_RATE);
        assert!(cfg.asr_bin.is_none());
        assert!(cfg.transcript_sink_url.is_none());
        assert_eq!(cfg.max_pcm_bytes, DEFAULT_MAX_PCM_BYTES);
    }

    #[test]
    fn unsupported_output_rate_falls_back() {
        let _guard = env_lock();
        clear_env();
        std::env::set_var("SAUTI_OUTPUT_SAMPLE_RATE", "44100");
        assert_eq!(ServerConfig::from_env().default_output_rate, DEFAULT_OUTPUT_RATE);

        std::env::set_var("SAUTI_OUTPUT_SAMPLE_RATE", "8000");
        assert_eq!(ServerConfig::from_env().default_output_rate, 8000);
        clear_env();
    }

    #[test]
    fn paths_come_from_environment() {
        let _guard = env_lock();
        clear_env();
        std::env::set_var("SAUTI_ASR_BIN", "/opt/asr/main");
        std::env::set_var("SAUTI_ASR_MODEL", "/opt/asr/model.bin");

        let cfg = ServerConfig::from_env();
        assert_eq!(cfg.asr_bin.as_deref(), Some(std::path::Path::new("/opt/asr/main")));
        assert_eq!(
            cfg.asr_model.as_deref(),
            Some(std::path::Path::new("/opt/asr/model.bin"))
        );
        clear_env();
    }
}

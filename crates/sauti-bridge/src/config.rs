//! Bridge configuration from environment variables.

use sauti_core::vad::VadConfig;
use tracing::warn;

pub const DEFAULT_PORT: u16 = 8085;
pub const DEFAULT_DOWNSTREAM_URL: &str = "ws://127.0.0.1:8086/ws";
pub const DEFAULT_MEDIA_URL: &str = "wss://localhost:8085/media";

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Where each call session opens its downstream socket.
    pub downstream_url: String,
    /// Media WebSocket URL advertised in the voice webhook response.
    pub media_url: String,
    /// PCM rate of the audio forwarded to the backend.
    pub input_sample_rate: u32,
    /// Per-call VAD and commit configuration.
    pub vad: VadConfig,
    /// Optional opener the assistant speaks once the backend is ready.
    pub opener_text: Option<String>,
}

impl BridgeConfig {
    pub fn from_env() -> Self {
        Self {
            downstream_url: env_string("SAUTI_BRIDGE_DOWNSTREAM_URL", DEFAULT_DOWNSTREAM_URL),
            media_url: env_string("SAUTI_BRIDGE_MEDIA_URL", DEFAULT_MEDIA_URL),
            input_sample_rate: env_u32("SAUTI_INPUT_SAMPLE_RATE", 16000),
            vad: VadConfig {
                threshold: env_f32("SAUTI_VAD_THRESHOLD", 0.012),
                commit_silence_ms: env_u32("SAUTI_COMMIT_SILENCE_MS", 900),
                max_utterance_ms: env_u32("SAUTI_MAX_UTTERANCE_MS", 0),
                barge_in: env_bool("SAUTI_BARGE_IN", true),
            },
            opener_text: std::env::var("SAUTI_OPENER_TEXT")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        }
    }
}

pub fn port_from_env_or_default() -> u16 {
    match std::env::var("SAUTI_BRIDGE_PORT") {
        Ok(raw) => match raw.trim().parse::<u16>() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!("Invalid SAUTI_BRIDGE_PORT='{}', falling back to {}", raw, DEFAULT_PORT);
                DEFAULT_PORT
            }
        },
        Err(_) => DEFAULT_PORT,
    }
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
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

fn env_f32(name: &str, default: f32) -> f32 {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse::<f32>() {
            Ok(parsed) if parsed > 0.0 && parsed < 1.0 => parsed,
            _ => {
                warn!("Invalid {name}='{raw}', falling back to {default}");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(raw) => matches!(raw.trim(), "1" | "true" | "TRUE" | "yes"),
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
            "SAUTI_BRIDGE_DOWNSTREAM_URL",
            "SAUTI_BRIDGE_MEDIA_URL",
            "SAUTI_VAD_THRESHOLD",
            "SAUTI_COMMIT_SILENCE_MS",
            "SAUTI_MAX_UTTERANCE_MS",
            "SAUTI_BARGE_IN",
            "SAUTI_OPENER_TEXT",
        ] {
            std::env::remove_var(name);
        }
    }

    #[test]
    fn defaults_without_environment() {
        let _guard = env_lock();
        clear_env();

        let cfg = BridgeConfig::from_env();
        assert_eq!(cfg.downstream_url, DEFAULT_DOWNSTREAM_URL);
        assert_eq!(cfg.vad.commit_silence_ms, 900);
        assert!((cfg.vad.threshold - 0.012).abs() < 1e-6);
        assert_eq!(cfg.vad.max_utterance_ms, 0);
        assert!(cfg.vad.barge_in);
        assert!(cfg.opener_text.is_none());
    }

    #[test]
    fn environment_overrides_and_validation() {
        let _guard = env_lock();
        clear_env();
        std::env::set_var("SAUTI_COMMIT_SILENCE_MS", "700");
        std::env::set_var("SAUTI_VAD_THRESHOLD", "0.05");
        std::env::set_var("SAUTI_BARGE_IN", "false");
        std::env::set_var("SAUTI_OPENER_TEXT", "  Hello from Sauti.  ");

        let cfg = BridgeConfig::from_env();
        assert_eq!(cfg.vad.commit_silence_ms, 700);
        assert!((cfg.vad.threshold - 0.05).abs() < 1e-6);
        assert!(!cfg.vad.barge_in);
        assert_eq!(cfg.opener_text.as_deref(), Some("Hello from Sauti."));

        // Out-of-range threshold is rejected.
        std::env::set_var("SAUTI_VAD_THRESHOLD", "3.0");
        let cfg = BridgeConfig::from_env();
        assert!((cfg.vad.threshold - 0.012).abs() < 1e-6);

        clear_env();
    }
}

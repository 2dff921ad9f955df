//! Relay configuration from environment variables.

use tracing::warn;

pub const DEFAULT_PORT: u16 = 8086;
pub const DEFAULT_BACKEND_URL: &str = "ws://127.0.0.1:8087/v1/voice/ws";

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Where each client session opens its downstream socket.
    pub backend_url: String,
}

impl RelayConfig {
    pub fn from_env() -> Self {
        Self {
            backend_url: std::env::var("SAUTI_RELAY_BACKEND_URL")
                .ok()
                .map(|raw| raw.trim().to_string())
                .filter(|url| !url.is_empty())
                .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string()),
        }
    }
}

pub fn port_from_env_or_default() -> u16 {
    match std::env::var("SAUTI_RELAY_PORT") {
        Ok(raw) => match raw.trim().parse::<u16>() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!("Invalid SAUTI_RELAY_PORT='{}', falling back to {}", raw, DEFAULT_PORT);
                DEFAULT_PORT
            }
        },
        Err(_) => DEFAULT_PORT,
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

    #[test]
    fn defaults_without_environment() {
        let _guard = env_lock();
        std::env::remove_var("SAUTI_RELAY_BACKEND_URL");
        std::env::remove_var("SAUTI_RELAY_PORT");

        let cfg = RelayConfig::from_env();
        assert_eq!(cfg.backend_url, DEFAULT_BACKEND_URL);
        assert_eq!(port_from_env_or_default(), DEFAULT_PORT);
    }

    #[test]
    fn environment_overrides() {
        let _guard = env_lock();
        std::env::set_var("SAUTI_RELAY_BACKEND_URL", "ws://10.0.0.5:9000/ws");
        std::env::set_var("SAUTI_RELAY_PORT", "9001");

        let cfg = RelayConfig::from_env();
        assert_eq!(cfg.backend_url, "ws://10.0.0.5:9000/ws");
        assert_eq!(port_from_env_or_default(), 9001);

        std::env::remove_var("SAUTI_RELAY_BACKEND_URL");
        std::env::remove_var("SAUTI_RELAY_PORT");
    }

    #[test]
    fn invalid_port_falls_back() {
        let _guard = env_lock();
        std::env::set_var("SAUTI_RELAY_PORT", "not-a-port");
        assert_eq!(port_from_env_or_default(), DEFAULT_PORT);
        std::env::remove_var("SAUTI_RELAY_PORT");
    }
}

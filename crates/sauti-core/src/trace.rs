//! Per-call trace correlation and redacting JSON log lines.
//!
//! Every service logs one JSON object per stage mark with `t`, `level`,
//! `msg`, `component`, `traceId`, `stage`, and `ms` since the connection
//! started. Audio payloads never reach the log: known payload keys are
//! blanked, long unbroken base64 strings are blanked, and bearer/api-key
//! shapes are masked.

use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};

/// Keys whose values are always audio payloads.
const AUDIO_KEYS: [&str; 5] = ["audio", "payload", "pcm", "pcm16", "mulaw"];

const REDACTED_AUDIO: &str = "[REDACTED_AUDIO]";
const REDACTED_BASE64: &str = "[REDACTED_BASE64]";

/// Minimum length at which an unbroken base64 run is assumed to be audio.
const BASE64_REDACT_LEN: usize = 256;

/// A fresh 128-bit hex trace id.
pub fn random_trace_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Per-connection trace context: a sticky id and a monotonic start mark.
#[derive(Debug, Clone)]
pub struct CallTrace {
    trace_id: String,
    component: &'static str,
    started: Instant,
}

impl CallTrace {
    /// Seed from a stable carrier call id when one exists, otherwise a
    /// random id.
    pub fn seeded(component: &'static str, seed: Option<&str>) -> Self {
        let trace_id = match seed {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => random_trace_id(),
        };
        Self {
            trace_id,
            component,
            started: Instant::now(),
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Once any participant supplies a trace id, it wins for the rest of
    /// the call.
    pub fn adopt(&mut self, trace_id: &str) {
        if !trace_id.is_empty() && trace_id != self.trace_id {
            self.trace_id = trace_id.to_string();
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Emit a stage mark.
    pub fn stage(&self, stage: &str) {
        self.stage_with(stage, json!({}));
    }

    /// Emit a stage mark with extra fields (redacted before emission).
    pub fn stage_with(&self, stage: &str, fields: Value) {
        let line = self.render("info", stage, Some(stage), fields);
        tracing::info!(target: "sauti::trace", "{line}");
    }

    pub fn warn(&self, msg: &str, fields: Value) {
        let line = self.render("warn", msg, None, fields);
        tracing::warn!(target: "sauti::trace", "{line}");
    }

    /// Build the JSON log line. Split out so tests can assert on it.
    pub fn render(&self, level: &str, msg: &str, stage: Option<&str>, fields: Value) -> String {
        let mut line = json!({
            "t": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            "level": level,
            "msg": msg,
            "component": self.component,
            "traceId": self.trace_id,
            "ms": self.elapsed_ms(),
        });
        if let Some(stage) = stage {
            line["stage"] = Value::String(stage.to_string());
        }
        if let (Some(obj), Value::Object(extra)) = (line.as_object_mut(), fields) {
            for (k, v) in extra {
                obj.insert(k, v);
            }
        }
        redact_value(&mut line);
        line.to_string()
    }
}

/// Redact a JSON tree in place.
pub fn redact_value(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, v) in map.iter_mut() {
                if AUDIO_KEYS.contains(&key.as_str()) {
                    *v = Value::String(REDACTED_AUDIO.to_string());
                } else {
                    redact_value(v);
                }
            }
        }
        Value::Array(items) => {
            for v in items.iter_mut() {
                redact_value(v);
            }
        }
        Value::String(s) => {
            if looks_like_base64(s) {
                *s = REDACTED_BASE64.to_string();
            } else {
                let masked = mask_tokens(s);
                if masked != *s {
                    *s = masked;
                }
            }
        }
        _ => {}
    }
}

/// Redact a plain string (free-form log messages).
pub fn redact_str(s: &str) -> String {
    if looks_like_base64(s) {
        return REDACTED_BASE64.to_string();
    }
    mask_tokens(s)
}

fn looks_like_base64(s: &str) -> bool {
    s.len() >= BASE64_REDACT_LEN
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'=')
}

/// Mask `Bearer <tok>`, `token=<tok>`, and `api_key=<tok>` runs.
fn mask_tokens(s: &str) -> String {
    let mut out = s.to_string();
    for marker in ["Bearer ", "token=", "api_key="] {
        let mut search_from = 0;
        while let Some(rel) = out[search_from..].find(marker) {
            let start = search_from + rel + marker.len();
            let end = out[start..]
                .find(|c: char| !is_token_char(c))
                .map(|i| start + i)
                .unwrap_or(out.len());
            if end > start {
                out.replace_range(start..end, "***");
            }
            search_from = start + 3;
        }
    }
    out
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~' | '+' | '/')
}

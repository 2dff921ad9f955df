//! The JSON event protocol spoken between bridge, relay, and backend.
//!
//! One tagged enum per direction; this module is the single source of truth
//! for the wire shapes. Unknown tags and missing required fields surface as
//! [`Error::Protocol`] so a session can answer with an `error` event and
//! keep running.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Output sample rates a backend session will negotiate to.
pub const VALID_OUTPUT_RATES: [u32; 3] = [8000, 16000, 24000];

/// PCM rate of every inbound `audio_chunk`.
pub const INPUT_SAMPLE_RATE: u32 = 16000;

/// Events flowing toward the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Session seed. Sent at most once; negotiates the output rate.
    Start {
        #[serde(rename = "traceId", default, skip_serializing_if = "Option::is_none")]
        trace_id: Option<String>,
        #[serde(rename = "callSid", default, skip_serializing_if = "Option::is_none")]
        call_sid: Option<String>,
        #[serde(rename = "streamSid", default, skip_serializing_if = "Option::is_none")]
        stream_sid: Option<String>,
        #[serde(rename = "startedAt", default, skip_serializing_if = "Option::is_none")]
        started_at: Option<u64>,
        #[serde(
            rename = "outputSampleRate",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        output_sample_rate: Option<u32>,
    },
    /// Base64 PCM16 mono at 16 kHz, appended to the inbound buffer.
    AudioChunk {
        #[serde(rename = "traceId", default, skip_serializing_if = "Option::is_none")]
        trace_id: Option<String>,
        audio: String,
    },
    /// Ends the current utterance and starts a turn.
    Commit {
        #[serde(rename = "traceId", default, skip_serializing_if = "Option::is_none")]
        trace_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        instructions: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Starts a turn from text, skipping ASR.
    Text {
        #[serde(rename = "traceId", default, skip_serializing_if = "Option::is_none")]
        trace_id: Option<String>,
        text: String,
    },
    /// Closes the session (aborts the turn first if one is in flight).
    End {
        #[serde(rename = "traceId", default, skip_serializing_if = "Option::is_none")]
        trace_id: Option<String>,
    },
}

impl ClientEvent {
    pub fn trace_id(&self) -> Option<&str> {
        match self {
            ClientEvent::Start { trace_id, .. }
            | ClientEvent::AudioChunk { trace_id, .. }
            | ClientEvent::Commit { trace_id, .. }
            | ClientEvent::Text { trace_id, .. }
            | ClientEvent::End { trace_id } => trace_id.as_deref(),
        }
    }
}

/// Events flowing back toward the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Ready {
        #[serde(rename = "inputSampleRate")]
        input_sample_rate: u32,
        #[serde(rename = "outputSampleRate")]
        output_sample_rate: u32,
    },
    Transcript {
        text: String,
    },
    TextDelta {
        text: String,
    },
    TextCompleted {
        text: String,
    },
    AudioDelta {
        audio: String,
    },
    ResponseCompleted {
        #[serde(rename = "responseId")]
        response_id: String,
    },
    Error {
        error: String,
    },
}

impl ServerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Ready { .. } => "ready",
            ServerEvent::Transcript { .. } => "transcript",
            ServerEvent::TextDelta { .. } => "text_delta",
            ServerEvent::TextCompleted { .. } => "text_completed",
            ServerEvent::AudioDelta { .. } => "audio_delta",
            ServerEvent::ResponseCompleted { .. } => "response_completed",
            ServerEvent::Error { .. } => "error",
        }
    }
}

/// Decode and validate one client event.
pub fn decode_client(payload: &str) -> Result<ClientEvent> {
    let event: ClientEvent =
        serde_json::from_str(payload).map_err(|e| Error::Protocol(e.to_string()))?;
    match &event {
        ClientEvent::AudioChunk { audio, .. } if audio.is_empty() => {
            Err(Error::Protocol("audio_chunk.audio must be non-empty".into()))
        }
        ClientEvent::Text { text, .. } if text.trim().is_empty() => {
            Err(Error::Protocol("text.text must be non-empty".into()))
        }
        _ => Ok(event),
    }
}

/// Decode one server event (bridge and replay harness side).
pub fn decode_server(payload: &str) -> Result<ServerEvent> {
    serde_json::from_str(payload).map_err(|e| Error::Protocol(e.to_string()))
}

/// Render an event as a compact JSON text frame.
pub fn encode<T: Serialize>(event: &T) -> Result<String> {
    serde_json::to_string(event).map_err(|e| Error::Protocol(e.to_string()))
}

/// Adopt a requested output rate only when it is one we support.
pub fn negotiate_output_rate(requested: Option<u32>, default: u32) -> u32 {
    match requested {
        Some(rate) if VALID_OUTPUT_RATES.contains(&rate) => rate,
        _ => default,
    }
}

/// Cheap JSON sniff used by the relay: extract `traceId` and whether the
/// frame is a `start`, without re-encoding the payload.
pub fn sniff_trace(payload: &str) -> (Option<String>, bool) {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(payload) else {
        return (None, false);
    };
    let trace = value
        .get("traceId")
        .and_then(|t| t.as_str())
        .map(str::to_string);
    let is_start = value.get("type").and_then(|t| t.as_str()) == Some("start");
    (trace, is_start)
}

//! Fire-and-forget transcript sink.
//!
//! One record per completed turn; failures are swallowed at warn level and
//! never touch the session. Audio never goes through here.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::ServerConfig;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRecord {
    pub call_id: Option<String>,
    pub turn_index: u64,
    pub trace_id: String,
    pub user_text: String,
    pub assistant_text: String,
    pub response_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

#[async_trait]
pub trait TranscriptSink: Send + Sync {
    async fn record(&self, record: TurnRecord);
}

pub struct NoopSink;

#[async_trait]
impl TranscriptSink for NoopSink {
    async fn record(&self, record: TurnRecord) {
        debug!(
            "transcript sink disabled, dropping turn {} of {}",
            record.turn_index, record.trace_id
        );
    }
}

/// POSTs each record as JSON to the configured endpoint.
pub struct HttpSink {
    client: reqwest::Client,
    url: String,
}

impl HttpSink {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl TranscriptSink for HttpSink {
    async fn record(&self, record: TurnRecord) {
        match self.client.post(&self.url).json(&record).send().await {
            Ok(response) if !response.status().is_success() => {
                warn!(
                    "transcript sink rejected turn {}: {}",
                    record.turn_index,
                    response.status()
                );
            }
            Ok(_) => {}
            Err(e) => warn!("transcript sink write failed: {e}"),
        }
    }
}

pub fn from_config(cfg: &ServerConfig) -> std::sync::Arc<dyn TranscriptSink> {
    match &cfg.transcript_sink_url {
        Some(url) => std::sync::Arc::new(HttpSink::new(url.clone())),
        None => std::sync::Arc::new(NoopSink),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_serializes_camel_case_without_audio() {
        let record = TurnRecord {
            call_id: Some("CA1".into()),
            turn_index: 3,
            trace_id: "t-1".into(),
            user_text: "hi".into(),
            assistant_text: "hello".into(),
            response_id: "resp_1".into(),
            instructions: None,
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"callId\":\"CA1\""));
        assert!(json.contains("\"turnIndex\":3"));
        assert!(json.contains("\"responseId\":\"resp_1\""));
        assert!(!json.contains("instructions"));
        assert!(!json.contains("audio"));
    }
}

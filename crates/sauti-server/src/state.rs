//! Shared application state.

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::conversation::{AcknowledgeCore, ConversationCore};
use crate::health::{self, ReadinessSnapshot};
use crate::sink::{self, TranscriptSink};

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<ServerConfig>,
    pub conversation: Arc<dyn ConversationCore>,
    pub sink: Arc<dyn TranscriptSink>,
}

impl AppState {
    pub fn new(cfg: ServerConfig) -> Self {
        let sink = sink::from_config(&cfg);
        Self {
            cfg: Arc::new(cfg),
            conversation: Arc::new(AcknowledgeCore::new()),
            sink,
        }
    }

    /// Swap the conversation implementation (deployments, tests).
    pub fn with_conversation(mut self, conversation: Arc<dyn ConversationCore>) -> Self {
        self.conversation = conversation;
        self
    }

    /// Fresh filesystem probe of the external toolchain.
    pub fn readiness(&self) -> ReadinessSnapshot {
        health::check(&self.cfg)
    }
}

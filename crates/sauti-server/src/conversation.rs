//! The stateless request → response seam between the turn pipeline and
//! whatever actually generates replies.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use sauti_core::error::Result;

/// Prefix the bridge uses when it wants an exact utterance spoken.
pub const VERBATIM_PREFIX: &str = "Say this verbatim: ";

#[async_trait]
pub trait ConversationCore: Send + Sync {
    /// Produce the assistant's reply for one turn. Must be deterministic
    /// for a fixed input sequence so replays are comparable.
    async fn respond(&self, user_text: &str, instructions: Option<&str>) -> Result<String>;
}

/// Reference implementation: a short turn-indexed acknowledgment, plus
/// verbatim playback when the instructions demand it. Deployments swap
/// this out for a real model; nothing else in the pipeline changes.
#[derive(Debug, Default)]
pub struct AcknowledgeCore {
    turns: AtomicU64,
}

impl AcknowledgeCore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationCore for AcknowledgeCore {
    async fn respond(&self, user_text: &str, instructions: Option<&str>) -> Result<String> {
        if let Some(instructions) = instructions {
            if let Some(verbatim) = instructions.strip_prefix(VERBATIM_PREFIX) {
                return Ok(verbatim.trim().to_string());
            }
        }

        let turn = self.turns.fetch_add(1, Ordering::SeqCst) + 1;
        if user_text.trim().is_empty() {
            return Ok(format!("Turn {turn}: I did not catch that. Could you repeat it?"));
        }
        Ok(format!(
            "Turn {turn}: I heard \"{}\". How can I help further?",
            user_text.trim()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replies_are_turn_indexed_and_deterministic() {
        let core = AcknowledgeCore::new();
        let first = core.respond("hello", None).await.unwrap();
        let second = core.respond("hello", None).await.unwrap();
        assert!(first.starts_with("Turn 1:"));
        assert!(second.starts_with("Turn 2:"));
        assert!(first.contains("\"hello\""));

        // A fresh core with the same input sequence replays identically.
        let replay = AcknowledgeCore::new();
        assert_eq!(replay.respond("hello", None).await.unwrap(), first);
    }

    #[tokio::test]
    async fn verbatim_instructions_win() {
        let core = AcknowledgeCore::new();
        let reply = core
            .respond("", Some("Say this verbatim: Welcome to Sauti."))
            .await
            .unwrap();
        assert_eq!(reply, "Welcome to Sauti.");
    }

    #[tokio::test]
    async fn other_instructions_fall_through() {
        let core = AcknowledgeCore::new();
        let reply = core.respond("hi", Some("Be brief.")).await.unwrap();
        assert!(reply.starts_with("Turn 1:"));
    }
}

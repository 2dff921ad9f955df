//! One turn: committed audio (or text) in, transcript, reply text deltas,
//! and chunked synthesized audio out, closed by `response_completed`.

use std::sync::Arc;

use axum::extract::ws::Message as WsMessage;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use sauti_core::audio;
use sauti_core::error::{Error, Result};
use sauti_core::protocol::{self, ServerEvent, INPUT_SAMPLE_RATE};
use sauti_core::trace::CallTrace;

use crate::asr;
use crate::config::ServerConfig;
use crate::conversation::ConversationCore;
use crate::tts;

/// Longest `text_delta` payload, split on word boundaries.
pub const TEXT_DELTA_MAX_CHARS: usize = 80;

/// Longest text handed to one TTS invocation, split on sentence boundaries.
pub const TTS_CHUNK_MAX_CHARS: usize = 180;

/// Serializing sender for server events; the writer task owns the socket.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<WsMessage>,
}

impl EventSender {
    pub fn new(tx: mpsc::UnboundedSender<WsMessage>) -> Self {
        Self { tx }
    }

    pub fn send(&self, event: &ServerEvent) -> bool {
        match protocol::encode(event) {
            Ok(json) => self.tx.send(WsMessage::Text(json.into())).is_ok(),
            Err(e) => {
                warn!("failed to encode server event: {e}");
                false
            }
        }
    }
}

/// Everything a spawned turn needs, detached from the session loop.
pub struct TurnContext {
    pub trace: CallTrace,
    pub cfg: Arc<ServerConfig>,
    pub conversation: Arc<dyn ConversationCore>,
    pub events: EventSender,
    pub output_rate: u32,
}

#[derive(Debug)]
pub enum TurnOutcome {
    Completed {
        response_id: String,
        user_text: String,
        assistant_text: String,
        instructions: Option<String>,
    },
    EmptyTranscript {
        response_id: String,
    },
    /// The turn ended on an `error` event without `response_completed`.
    Failed {
        reason: String,
    },
}

fn new_response_id() -> String {
    format!("resp_{}", Uuid::new_v4().simple())
}

/// A `commit`: drain the buffered audio through ASR and reply.
pub async fn run_commit_turn(
    ctx: TurnContext,
    pcm: Vec<u8>,
    instructions: Option<String>,
) -> TurnOutcome {
    let response_id = new_response_id();

    // No audio and no instructions: an empty-transcript turn that closes
    // immediately. An instructions-only commit (the opener) still speaks.
    if pcm.is_empty() && instructions.is_none() {
        return finish_empty(&ctx, response_id);
    }

    let result = if pcm.is_empty() {
        reply(&ctx, &response_id, String::new(), instructions).await
    } else {
        transcribe_and_reply(&ctx, &response_id, pcm, instructions).await
    };
    conclude(&ctx, result)
}

/// A `text` event: same pipeline, ASR skipped.
pub async fn run_text_turn(ctx: TurnContext, text: String) -> TurnOutcome {
    let response_id = new_response_id();
    let result = reply(&ctx, &response_id, text, None).await;
    conclude(&ctx, result)
}

fn conclude(ctx: &TurnContext, result: Result<TurnOutcome>) -> TurnOutcome {
    match result {
        Ok(outcome) => outcome,
        Err(e) => {
            let reason = e.to_string();
            ctx.events.send(&ServerEvent::Error {
                error: reason.clone(),
            });
            ctx.trace.warn("turn failed", json!({"error": reason.clone()}));
            TurnOutcome::Failed { reason }
        }
    }
}

fn finish_empty(ctx: &TurnContext, response_id: String) -> TurnOutcome {
    ctx.trace.stage("empty_transcript");
    ctx.events.send(&ServerEvent::ResponseCompleted {
        response_id: response_id.clone(),
    });
    ctx.trace.stage("response_completed");
    TurnOutcome::EmptyTranscript { response_id }
}

async fn transcribe_and_reply(
    ctx: &TurnContext,
    response_id: &str,
    pcm: Vec<u8>,
    instructions: Option<String>,
) -> Result<TurnOutcome> {
    let work_dir = std::env::temp_dir().join(format!("sauti-turn-{}", Uuid::new_v4()));
    tokio::fs::create_dir_all(&work_dir)
        .await
        .map_err(|e| Error::Resource(format!("create turn dir: {e}")))?;

    let result = async {
        let samples = audio::bytes_to_pcm16(&pcm);
        let wav_path = work_dir.join("utterance.wav");
        audio::write_wav_pcm16(&wav_path, &samples, INPUT_SAMPLE_RATE)?;

        ctx.trace
            .stage_with("asr_start", json!({"pcmBytes": pcm.len()}));
        let transcript = asr::transcribe_wav(&ctx.cfg, &wav_path, &work_dir).await?;
        ctx.trace
            .stage_with("asr_done", json!({"chars": transcript.len()}));
        Ok::<String, Error>(transcript)
    }
    .await;

    // Cleanup on every exit path; failure to remove is not a turn failure.
    if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
        warn!("turn dir cleanup failed: {e}");
    }

    let user_text = result?.trim().to_string();
    if user_text.is_empty() && instructions.is_none() {
        return Ok(finish_empty(ctx, response_id.to_string()));
    }
    reply(ctx, response_id, user_text, instructions).await
}

/// Steps 5-8 of the turn: transcript, conversation, text deltas, chunked
/// TTS audio, and the closing `response_completed`.
async fn reply(
    ctx: &TurnContext,
    response_id: &str,
    user_text: String,
    instructions: Option<String>,
) -> Result<TurnOutcome> {
    if !user_text.is_empty() {
        ctx.events.send(&ServerEvent::Transcript {
            text: user_text.clone(),
        });
    }

    ctx.trace.stage("llm_start");
    let assistant_text = ctx
        .conversation
        .respond(&user_text, instructions.as_deref())
        .await?;
    ctx.trace
        .stage_with("llm_done", json!({"chars": assistant_text.len()}));

    for chunk in split_word_chunks(&assistant_text, TEXT_DELTA_MAX_CHARS) {
        ctx.events.send(&ServerEvent::TextDelta { text: chunk });
    }
    ctx.events.send(&ServerEvent::TextCompleted {
        text: assistant_text.clone(),
    });

    ctx.trace.stage("tts_start");
    let mut first_frame = true;
    let mut audio_chunks = 0u64;
    for sentence in split_sentence_chunks(&assistant_text, TTS_CHUNK_MAX_CHARS) {
        match tts::synthesize(&ctx.cfg, &sentence, ctx.output_rate).await {
            Ok(samples) => {
                for frame in samples.chunks(audio::frame_samples(ctx.output_rate)) {
                    if first_frame {
                        ctx.trace.stage("tts_first_audio");
                        first_frame = false;
                    }
                    ctx.events.send(&ServerEvent::AudioDelta {
                        audio: audio::b64_encode(&audio::pcm16_to_bytes(frame)),
                    });
                    audio_chunks += 1;
                }
            }
            Err(e) => {
                // No TTS retry. Text deltas already went out, so the turn
                // still closes with response_completed after the error.
                let reason = e.to_string();
                ctx.trace.warn("tts failed", json!({"error": reason.clone()}));
                ctx.events.send(&ServerEvent::Error { error: reason });
                ctx.events.send(&ServerEvent::ResponseCompleted {
                    response_id: response_id.to_string(),
                });
                ctx.trace.stage("response_completed");
                return Ok(TurnOutcome::Completed {
                    response_id: response_id.to_string(),
                    user_text,
                    assistant_text,
                    instructions,
                });
            }
        }
    }
    ctx.trace
        .stage_with("tts_done", json!({"audioChunks": audio_chunks}));

    ctx.events.send(&ServerEvent::ResponseCompleted {
        response_id: response_id.to_string(),
    });
    ctx.trace.stage("response_completed");

    Ok(TurnOutcome::Completed {
        response_id: response_id.to_string(),
        user_text,
        assistant_text,
        instructions,
    })
}

/// Greedy word-bounded chunking; a single over-long word is hard-split.
pub fn split_word_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    let mut flush = |current: &mut String, current_len: &mut usize, chunks: &mut Vec<String>| {
        if !current.is_empty() {
            chunks.push(std::mem::take(current));
            *current_len = 0;
        }
    };

    for word in text.split_whitespace() {
        let word_len = word.chars().count();
        if word_len > max_chars {
            flush(&mut current, &mut current_len, &mut chunks);
            let mut piece = String::new();
            let mut piece_len = 0usize;
            for c in word.chars() {
                if piece_len == max_chars {
                    chunks.push(std::mem::take(&mut piece));
                    piece_len = 0;
                }
                piece.push(c);
                piece_len += 1;
            }
            if !piece.is_empty() {
                chunks.push(piece);
            }
            continue;
        }

        let extra = if current.is_empty() { 0 } else { 1 };
        if current_len + extra + word_len > max_chars {
            flush(&mut current, &mut current_len, &mut chunks);
        }
        if !current.is_empty() {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(word);
        current_len += word_len;
    }
    flush(&mut current, &mut current_len, &mut chunks);
    chunks
}

/// Sentence-bounded chunking for TTS. A sentence ends at a terminal `.?!`
/// followed by whitespace; sentences longer than the limit fall back to
/// word-bounded splitting.
pub fn split_sentence_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for sentence in split_sentences(text) {
        let sentence_len = sentence.chars().count();
        if sentence_len > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            chunks.extend(split_word_chunks(&sentence, max_chars));
            continue;
        }

        let extra = if current.is_empty() { 0 } else { 1 };
        if current_len + extra + sentence_len > max_chars {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(&sentence);
        current_len += sentence_len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '?' | '!') {
            let at_boundary = match chars.peek() {
                Some(next) => next.is_whitespace(),
                None => true,
            };
            if at_boundary {
                let trimmed = current.trim();
                if !trimmed.is_empty() {
                    sentences.push(trimmed.to_string());
                }
                current.clear();
            }
        }
    }
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
    sentences
}

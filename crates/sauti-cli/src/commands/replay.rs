//! Golden replay: stream a WAV through the pipeline and write a run report.
//!
//! With a deterministic conversation core behind the relay, two runs over
//! the same WAV produce identical event logs and assistant text, which is
//! what makes the report comparable across changes.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Args;
use console::style;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use sauti_core::audio;
use sauti_core::protocol::{self, ClientEvent, ServerEvent, INPUT_SAMPLE_RATE};
use sauti_core::trace::random_trace_id;

use crate::error::{CliError, Result};

#[derive(Debug, Args)]
pub struct ReplayArgs {
    /// Mono 16-bit PCM WAV at 16 kHz
    pub input: PathBuf,

    /// Relay WebSocket URL
    #[arg(long, default_value = "ws://127.0.0.1:8086/ws")]
    pub url: String,

    /// Send an explicit commit after the audio
    #[arg(long)]
    pub commit: bool,

    /// Fail if response_completed is not observed within this many seconds
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,

    /// Write the JSON run report here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub trace_id: String,
    /// Ordered event type log as received.
    pub events: Vec<String>,
    pub ms: u64,
    pub saw_ready: bool,
    pub saw_completed: bool,
    pub assistant_text: String,
    pub audio_delta_chunks: u64,
}

pub async fn execute(args: ReplayArgs) -> Result<()> {
    let (samples, sample_rate) = audio::read_wav_pcm16(&args.input)?;
    if sample_rate != INPUT_SAMPLE_RATE {
        return Err(CliError::InvalidInput(format!(
            "expected a {INPUT_SAMPLE_RATE} Hz WAV, got {sample_rate} Hz: {}",
            args.input.display()
        )));
    }
    if samples.is_empty() {
        return Err(CliError::InvalidInput(format!(
            "no samples in {}",
            args.input.display()
        )));
    }

    let started = Instant::now();
    let (mut ws, _response) = connect_async(args.url.as_str()).await?;
    let trace_id = random_trace_id();

    let start = ClientEvent::Start {
        trace_id: Some(trace_id.clone()),
        call_sid: None,
        stream_sid: None,
        started_at: None,
        output_sample_rate: None,
    };
    ws.send(Message::text(protocol::encode(&start)?)).await?;

    let frame_len = audio::frame_samples(INPUT_SAMPLE_RATE);
    let mut frames = 0u64;
    for frame in samples.chunks(frame_len) {
        let chunk = ClientEvent::AudioChunk {
            trace_id: Some(trace_id.clone()),
            audio: audio::b64_encode(&audio::pcm16_to_bytes(frame)),
        };
        ws.send(Message::text(protocol::encode(&chunk)?)).await?;
        frames += 1;
    }
    eprintln!(
        "{} streamed {} frames ({} ms of audio)",
        style("replay:").cyan().bold(),
        frames,
        frames * audio::FRAME_MS as u64
    );

    if args.commit {
        let commit = ClientEvent::Commit {
            trace_id: Some(trace_id.clone()),
            instructions: None,
            reason: Some("replay".to_string()),
        };
        ws.send(Message::text(protocol::encode(&commit)?)).await?;
    }

    let mut report = RunReport {
        trace_id,
        events: Vec::new(),
        ms: 0,
        saw_ready: false,
        saw_completed: false,
        assistant_text: String::new(),
        audio_delta_chunks: 0,
    };
    let mut delta_text = String::new();
    let deadline = started + Duration::from_secs(args.timeout_secs);

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let msg = match tokio::time::timeout(remaining, ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => text,
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => break,
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(e))) => return Err(e.into()),
            Err(_) => break,
        };

        let event = match protocol::decode_server(msg.as_str()) {
            Ok(event) => event,
            Err(e) => {
                eprintln!("{} undecodable event: {e}", style("replay:").cyan().bold());
                continue;
            }
        };
        report.events.push(event.kind().to_string());
        match event {
            ServerEvent::Ready { .. } => report.saw_ready = true,
            ServerEvent::TextDelta { text } => delta_text.push_str(&text),
            ServerEvent::TextCompleted { text } => report.assistant_text = text,
            ServerEvent::AudioDelta { .. } => report.audio_delta_chunks += 1,
            ServerEvent::ResponseCompleted { .. } => {
                report.saw_completed = true;
                break;
            }
            ServerEvent::Transcript { .. } | ServerEvent::Error { .. } => {}
        }
    }

    let _ = ws.close(None).await;
    report.ms = started.elapsed().as_millis() as u64;
    if report.assistant_text.is_empty() {
        report.assistant_text = delta_text;
    }

    let json = serde_json::to_string_pretty(&report)?;
    match &args.output {
        Some(path) => {
            tokio::fs::write(path, &json).await?;
            eprintln!(
                "{} report written to {}",
                style("replay:").cyan().bold(),
                path.display()
            );
        }
        None => println!("{json}"),
    }

    if !report.saw_completed {
        return Err(CliError::Timeout(format!(
            "response_completed not observed within {}s",
            args.timeout_secs
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_serializes_camel_case() {
        let report = RunReport {
            trace_id: "t1".into(),
            events: vec!["ready".into(), "response_completed".into()],
            ms: 42,
            saw_ready: true,
            saw_completed: true,
            assistant_text: "hello".into(),
            audio_delta_chunks: 7,
        };
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"traceId\":\"t1\""));
        assert!(json.contains("\"sawReady\":true"));
        assert!(json.contains("\"sawCompleted\":true"));
        assert!(json.contains("\"audioDeltaChunks\":7"));
        assert!(json.contains("\"events\":[\"ready\",\"response_completed\"]"));
    }
}

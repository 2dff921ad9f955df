//! The voice session WebSocket endpoint.
//!
//! One session per socket. The session loop is the single owner of all
//! per-call state; a spawned turn reports back over a channel, so the
//! in-flight flag flips strictly after the turn's last event and at most
//! one turn ever runs per session.

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use sauti_core::buffer::PcmBuffer;
use sauti_core::protocol::{self, ClientEvent, ServerEvent, INPUT_SAMPLE_RATE};
use sauti_core::trace::CallTrace;
use sauti_core::Error;

use crate::sink::TurnRecord;
use crate::state::AppState;
use crate::turn::{self, EventSender, TurnContext, TurnOutcome};

pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

#[derive(PartialEq)]
enum Flow {
    Continue,
    Close,
}

struct ActiveTurn {
    task: JoinHandle<()>,
}

struct Session {
    state: AppState,
    events: EventSender,
    session_id: String,
    trace: CallTrace,
    call_sid: Option<String>,
    stream_sid: Option<String>,
    buffer: PcmBuffer,
    turn_index: u64,
    output_rate: u32,
    started: bool,
    active_turn: Option<ActiveTurn>,
}

impl Session {
    fn new(state: AppState, events: EventSender) -> Self {
        let output_rate = state.cfg.default_output_rate;
        let max_pcm_bytes = state.cfg.max_pcm_bytes;
        Self {
            state,
            events,
            session_id: format!("sess_{}", Uuid::new_v4().simple()),
            trace: CallTrace::seeded("backend", None),
            call_sid: None,
            stream_sid: None,
            buffer: PcmBuffer::new(max_pcm_bytes),
            turn_index: 0,
            output_rate,
            started: false,
            active_turn: None,
        }
    }

    fn in_flight(&self) -> bool {
        self.active_turn.is_some()
    }

    fn send_ready(&self) {
        self.events.send(&ServerEvent::Ready {
            input_sample_rate: INPUT_SAMPLE_RATE,
            output_sample_rate: self.output_rate,
        });
    }

    fn send_error(&self, error: &Error) {
        self.events.send(&ServerEvent::Error {
            error: error.to_string(),
        });
    }

    async fn handle_frame(
        &mut self,
        payload: &str,
        done_tx: &mpsc::UnboundedSender<TurnOutcome>,
    ) -> Flow {
        let event = match protocol::decode_client(payload) {
            Ok(event) => event,
            Err(e) => {
                self.send_error(&e);
                return Flow::Continue;
            }
        };
        if let Some(id) = event.trace_id() {
            self.trace.adopt(id);
        }

        match event {
            ClientEvent::Start {
                trace_id,
                call_sid,
                stream_sid,
                output_sample_rate,
                ..
            } => {
                self.on_start(trace_id, call_sid, stream_sid, output_sample_rate);
                Flow::Continue
            }
            ClientEvent::AudioChunk { audio, .. } => {
                self.on_audio(&audio);
                Flow::Continue
            }
            ClientEvent::Commit {
                instructions,
                reason,
                ..
            } => {
                self.on_commit(instructions, reason, done_tx);
                Flow::Continue
            }
            ClientEvent::Text { text, .. } => {
                self.on_text(text, done_tx);
                Flow::Continue
            }
            ClientEvent::End { .. } => {
                if self.in_flight() {
                    // Mid-turn end is an interrupt (barge-in), not a hangup:
                    // kill the turn, keep the session.
                    self.abort_turn("interrupt");
                    Flow::Continue
                } else {
                    self.trace.stage("end");
                    Flow::Close
                }
            }
        }
    }

    fn on_start(
        &mut self,
        trace_id: Option<String>,
        call_sid: Option<String>,
        stream_sid: Option<String>,
        output_sample_rate: Option<u32>,
    ) {
        if self.started {
            self.send_error(&Error::Protocol("start may be sent at most once".into()));
            return;
        }
        self.started = true;
        // An explicit trace id was already adopted in handle_frame; without
        // one, a stable call id is the next-best seed.
        if trace_id.is_none() {
            if let Some(call_sid) = &call_sid {
                self.trace.adopt(call_sid);
            }
        }
        self.call_sid = call_sid;
        self.stream_sid = stream_sid;
        self.output_rate = protocol::negotiate_output_rate(output_sample_rate, self.output_rate);
        self.trace.stage_with(
            "session_start",
            json!({
                "sessionId": self.session_id,
                "outputSampleRate": self.output_rate,
            }),
        );
        self.send_ready();
    }

    fn on_audio(&mut self, audio_b64: &str) {
        match sauti_core::audio::b64_decode(audio_b64) {
            Ok(bytes) => {
                if let Err(e) = self.buffer.push(bytes) {
                    self.trace.warn("inbound buffer overflow", json!({"error": e.to_string()}));
                }
            }
            Err(e) => self.send_error(&e),
        }
    }

    fn on_commit(
        &mut self,
        instructions: Option<String>,
        reason: Option<String>,
        done_tx: &mpsc::UnboundedSender<TurnOutcome>,
    ) {
        if !self.gate_turn("commit") {
            return;
        }
        let pcm = self.buffer.take_all();
        self.trace.stage_with(
            "commit",
            json!({
                "reason": reason,
                "pcmBytes": pcm.len(),
                "hasInstructions": instructions.is_some(),
            }),
        );

        let ctx = self.turn_context();
        let done_tx = done_tx.clone();
        let task = tokio::spawn(async move {
            let outcome = turn::run_commit_turn(ctx, pcm, instructions).await;
            let _ = done_tx.send(outcome);
        });
        self.active_turn = Some(ActiveTurn { task });
    }

    fn on_text(&mut self, text: String, done_tx: &mpsc::UnboundedSender<TurnOutcome>) {
        if !self.gate_turn("text") {
            return;
        }
        // A text turn replaces whatever audio was pending.
        self.buffer.clear();
        self.trace
            .stage_with("text_turn", json!({"chars": text.len()}));

        let ctx = self.turn_context();
        let done_tx = done_tx.clone();
        let task = tokio::spawn(async move {
            let outcome = turn::run_text_turn(ctx, text).await;
            let _ = done_tx.send(outcome);
        });
        self.active_turn = Some(ActiveTurn { task });
    }

    /// One turn in flight, and only with a ready toolchain.
    fn gate_turn(&mut self, kind: &str) -> bool {
        if self.in_flight() {
            self.trace
                .stage_with("commit_ignored", json!({"kind": kind}));
            return false;
        }
        let snapshot = self.state.readiness();
        if !snapshot.ready {
            self.send_error(&Error::Config(format!(
                "voice toolchain not ready: {}",
                snapshot.missing()
            )));
            return false;
        }
        true
    }

    fn turn_context(&self) -> TurnContext {
        TurnContext {
            trace: self.trace.clone(),
            cfg: self.state.cfg.clone(),
            conversation: self.state.conversation.clone(),
            events: self.events.clone(),
            output_rate: self.output_rate,
        }
    }

    fn on_turn_done(&mut self, outcome: TurnOutcome) {
        self.active_turn = None;
        match outcome {
            TurnOutcome::Completed {
                response_id,
                user_text,
                assistant_text,
                instructions,
            } => {
                let record = TurnRecord {
                    call_id: self.call_sid.clone(),
                    turn_index: self.turn_index,
                    trace_id: self.trace.trace_id().to_string(),
                    user_text,
                    assistant_text,
                    response_id,
                    instructions,
                };
                self.turn_index += 1;
                let sink = self.state.sink.clone();
                tokio::spawn(async move {
                    sink.record(record).await;
                });
            }
            TurnOutcome::EmptyTranscript { .. } => {
                self.turn_index += 1;
            }
            TurnOutcome::Failed { reason } => {
                debug!("turn failed: {reason}");
            }
        }
    }

    fn abort_turn(&mut self, reason: &str) {
        if let Some(active) = self.active_turn.take() {
            if !active.task.is_finished() {
                active.task.abort();
            }
            self.buffer.clear();
            self.trace
                .stage_with("turn_aborted", json!({"reason": reason}));
        }
    }

    fn teardown(&mut self, reason: &str) {
        self.abort_turn(reason);
        self.trace.stage_with(
            "teardown",
            json!({
                "reason": reason,
                "turns": self.turn_index,
                "inboundChunks": self.buffer.total_chunks(),
            }),
        );
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WsMessage>();

    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
    });

    let events = EventSender::new(out_tx.clone());
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<TurnOutcome>();
    let mut session = Session::new(state, events);

    // The session accepts frames from the moment the socket opens.
    session.send_ready();

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        if session.handle_frame(text.as_str(), &done_tx).await == Flow::Close {
                            session.teardown("client_end");
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        session.teardown("socket_closed");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("voice socket receive error: {e}");
                        session.teardown("socket_error");
                        break;
                    }
                }
            }
            Some(outcome) = done_rx.recv() => {
                session.on_turn_done(outcome);
            }
        }
    }

    drop(session);
    drop(out_tx);
    let _ = writer.await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use std::path::PathBuf;

    fn test_state(ready_toolchain: bool) -> AppState {
        let mut cfg = ServerConfig {
            default_output_rate: 24000,
            asr_bin: None,
            asr_model: None,
            tts_bin: None,
            tts_model: None,
            tts_config: None,
            tts_native_rate: 22050,
            resampler_bin: None,
            transcript_sink_url: None,
            max_pcm_bytes: 64,
            subprocess_timeout_secs: 5,
        };
        if ready_toolchain {
            // Point at things that exist and are executable/non-empty on
            // any unix box, just to satisfy the readiness probe.
            cfg.asr_bin = Some(PathBuf::from("/bin/sh"));
            cfg.asr_model = Some(PathBuf::from("/bin/sh"));
            cfg.tts_bin = Some(PathBuf::from("/bin/sh"));
            cfg.tts_model = Some(PathBuf::from("/bin/sh"));
            cfg.tts_config = Some(PathBuf::from("/bin/sh"));
        }
        AppState::new(cfg)
    }

    fn test_session(ready: bool) -> (Session, mpsc::UnboundedReceiver<WsMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Session::new(test_state(ready), EventSender::new(tx));
        (session, rx)
    }

    fn drain_events(rx: &mut mpsc::UnboundedReceiver<WsMessage>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if let WsMessage::Text(text) = msg {
                events.push(protocol::decode_server(text.as_str()).unwrap());
            }
        }
        events
    }

    #[tokio::test]
    async fn start_negotiates_rate_and_reemits_ready() {
        let (mut session, mut rx) = test_session(false);
        let (done_tx, _done_rx) = mpsc::unbounded_channel();

        let flow = session
            .handle_frame(
                r#"{"type":"start","traceId":"t9","callSid":"CA2","outputSampleRate":16000}"#,
                &done_tx,
            )
            .await;
        assert!(flow == Flow::Continue);
        assert_eq!(session.output_rate, 16000);
        assert_eq!(session.trace.trace_id(), "t9");

        let events = drain_events(&mut rx);
        assert!(matches!(
            events.last(),
            Some(ServerEvent::Ready { output_sample_rate: 16000, .. })
        ));
    }

    #[tokio::test]
    async fn unsupported_rate_keeps_default() {
        let (mut session, mut rx) = test_session(false);
        let (done_tx, _done_rx) = mpsc::unbounded_channel();
        session
            .handle_frame(r#"{"type":"start","outputSampleRate":44100}"#, &done_tx)
            .await;
        assert_eq!(session.output_rate, 24000);
        drain_events(&mut rx);
    }

    #[tokio::test]
    async fn duplicate_start_is_a_protocol_error() {
        let (mut session, mut rx) = test_session(false);
        let (done_tx, _done_rx) = mpsc::unbounded_channel();
        session.handle_frame(r#"{"type":"start"}"#, &done_tx).await;
        drain_events(&mut rx);

        session.handle_frame(r#"{"type":"start"}"#, &done_tx).await;
        let events = drain_events(&mut rx);
        assert!(matches!(events.first(), Some(ServerEvent::Error { .. })));
    }

    #[tokio::test]
    async fn audio_chunks_accumulate_until_commit() {
        let (mut session, _rx) = test_session(false);
        let (done_tx, _done_rx) = mpsc::unbounded_channel();
        let chunk = sauti_core::audio::b64_encode(&[1u8, 2, 3, 4]);
        session
            .handle_frame(&format!(r#"{{"type":"audio_chunk","audio":"{chunk}"}}"#), &done_tx)
            .await;
        assert_eq!(session.buffer.len(), 4);
    }

    #[tokio::test]
    async fn commit_without_toolchain_answers_config_error() {
        let (mut session, mut rx) = test_session(false);
        let (done_tx, _done_rx) = mpsc::unbounded_channel();
        session.handle_frame(r#"{"type":"commit"}"#, &done_tx).await;

        let events = drain_events(&mut rx);
        match events.first() {
            Some(ServerEvent::Error { error }) => {
                assert!(error.contains("config"), "got: {error}");
            }
            other => panic!("expected config error, got {other:?}"),
        }
        assert!(!session.in_flight());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn second_commit_while_in_flight_is_ignored() {
        let (mut session, mut rx) = test_session(true);
        let (done_tx, _done_rx) = mpsc::unbounded_channel();

        session.handle_frame(r#"{"type":"commit"}"#, &done_tx).await;
        // Empty buffer: the turn completes almost immediately, but the
        // in-flight flag only clears through on_turn_done.
        assert!(session.in_flight());

        session.handle_frame(r#"{"type":"commit"}"#, &done_tx).await;
        // No user-visible event for the ignored commit: anything in the
        // channel is from the first turn, never an error.
        for event in drain_events(&mut rx) {
            assert!(!matches!(event, ServerEvent::Error { .. }));
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn end_mid_turn_aborts_but_keeps_session() {
        let (mut session, _rx) = test_session(true);
        let (done_tx, _done_rx) = mpsc::unbounded_channel();

        session.handle_frame(r#"{"type":"commit"}"#, &done_tx).await;
        assert!(session.in_flight());

        let flow = session.handle_frame(r#"{"type":"end"}"#, &done_tx).await;
        assert!(flow == Flow::Continue);
        assert!(!session.in_flight());

        // Idle end closes the session.
        let flow = session.handle_frame(r#"{"type":"end"}"#, &done_tx).await;
        assert!(flow == Flow::Close);
    }

    #[tokio::test]
    async fn buffer_overflow_drops_pending_turn_quietly() {
        let (mut session, mut rx) = test_session(false);
        let (done_tx, _done_rx) = mpsc::unbounded_channel();

        // max_pcm_bytes is 64 in the test config.
        let chunk = sauti_core::audio::b64_encode(&[0u8; 60]);
        session
            .handle_frame(&format!(r#"{{"type":"audio_chunk","audio":"{chunk}"}}"#), &done_tx)
            .await;
        session
            .handle_frame(&format!(r#"{{"type":"audio_chunk","audio":"{chunk}"}}"#), &done_tx)
            .await;
        assert!(session.buffer.is_empty());

        // Overflow warns in the log but sends no error event.
        assert!(drain_events(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn malformed_frames_answer_error_and_keep_session() {
        let (mut session, mut rx) = test_session(false);
        let (done_tx, _done_rx) = mpsc::unbounded_channel();

        let flow = session.handle_frame("{broken", &done_tx).await;
        assert!(flow == Flow::Continue);
        let events = drain_events(&mut rx);
        assert!(matches!(events.first(), Some(ServerEvent::Error { .. })));

        let flow = session
            .handle_frame(r#"{"type":"audio_chunk","audio":""}"#, &done_tx)
            .await;
        assert!(flow == Flow::Continue);
    }
}

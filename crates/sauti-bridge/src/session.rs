//! Per-call bridge session: one carrier media socket, one downstream relay
//! socket, audio shuttled both ways.
//!
//! All session state lives on the single task driving the select loop, so
//! every transition for a call is serialized. The carrier writer is its own
//! task fed by a channel, which keeps backpressure on the carrier socket
//! from stalling downstream reads.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as TMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use sauti_core::audio;
use sauti_core::protocol::{self, ClientEvent, ServerEvent};
use sauti_core::queue::PreReadyQueue;
use sauti_core::trace::CallTrace;
use sauti_core::vad::{CommitDetector, CommitReason};

use crate::carrier::{self, CarrierEvent};
use crate::config::BridgeConfig;

const CARRIER_RATE: u32 = 8000;

type DownstreamSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, TMessage>;

enum Flow {
    Continue,
    Teardown(&'static str),
}

struct CallSession {
    cfg: Arc<BridgeConfig>,
    trace: CallTrace,
    stream_sid: String,
    vad: CommitDetector,
    queue: PreReadyQueue,
    dn_tx: Option<DownstreamSink>,
    car_out_tx: mpsc::UnboundedSender<String>,
    /// Companded audio staged for the carrier, drained in 160-byte frames.
    outbound_mulaw: Vec<u8>,
    output_sample_rate: u32,
    ready: bool,
    greeted: bool,
    inbound_bytes: u64,
    outbound_bytes: u64,
    frames_in: u64,
    frames_out: u64,
}

impl CallSession {
    fn new(
        cfg: Arc<BridgeConfig>,
        stream_sid: String,
        call_sid: Option<String>,
        car_out_tx: mpsc::UnboundedSender<String>,
    ) -> Self {
        let trace = CallTrace::seeded("bridge", call_sid.as_deref());
        let vad = CommitDetector::new(cfg.vad.clone());
        Self {
            cfg,
            trace,
            stream_sid,
            vad,
            queue: PreReadyQueue::default(),
            dn_tx: None,
            car_out_tx,
            outbound_mulaw: Vec::new(),
            output_sample_rate: 24000,
            ready: false,
            greeted: false,
            inbound_bytes: 0,
            outbound_bytes: 0,
            frames_in: 0,
            frames_out: 0,
        }
    }

    fn trace_id(&self) -> Option<String> {
        Some(self.trace.trace_id().to_string())
    }

    async fn send_event(&mut self, event: &ClientEvent) {
        match protocol::encode(event) {
            Ok(frame) => self.send_or_queue(frame).await,
            Err(e) => warn!("failed to encode downstream event: {e}"),
        }
    }

    /// Frames hold in the bounded queue until the backend signals `ready`;
    /// nothing may bypass a queued frame.
    async fn send_or_queue(&mut self, frame: String) {
        if self.ready {
            if let Some(tx) = self.dn_tx.as_mut() {
                if let Err(e) = tx.send(TMessage::text(frame)).await {
                    debug!("downstream send failed: {e}");
                }
                return;
            }
        }
        if let Some(dropped) = self.queue.push(frame) {
            self.trace.warn(
                "pre-ready queue overflow",
                json!({"droppedBytes": dropped.len()}),
            );
        }
    }

    async fn send_start_envelope(&mut self, call_sid: Option<String>) {
        let started_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let event = ClientEvent::Start {
            trace_id: self.trace_id(),
            call_sid,
            stream_sid: Some(self.stream_sid.clone()),
            started_at: Some(started_at),
            output_sample_rate: None,
        };
        self.send_event(&event).await;
    }

    async fn handle_carrier_text(&mut self, payload: &str) -> Flow {
        match carrier::parse_event(payload) {
            Some(CarrierEvent::Media { media }) => {
                self.on_media(&media.payload).await;
                Flow::Continue
            }
            Some(CarrierEvent::Dtmf { dtmf }) => {
                self.on_dtmf(&dtmf.digits).await;
                Flow::Continue
            }
            Some(CarrierEvent::Stop {}) => Flow::Teardown("carrier_stop"),
            Some(CarrierEvent::Start { .. }) => {
                // The carrier sends start exactly once; a duplicate is noise.
                debug!("duplicate carrier start ignored");
                Flow::Continue
            }
            Some(CarrierEvent::Connected {}) | Some(CarrierEvent::Mark {}) => Flow::Continue,
            None => {
                debug!("unrecognized carrier event ignored");
                Flow::Continue
            }
        }
    }

    async fn on_media(&mut self, payload_b64: &str) {
        let mulaw = match audio::b64_decode(payload_b64) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("bad carrier media payload: {e}");
                return;
            }
        };
        self.inbound_bytes += mulaw.len() as u64;
        self.frames_in += 1;

        let pcm_8k = audio::decode_mulaw(&mulaw);
        let verdict = self.vad.push_frame(audio::rms(&pcm_8k));

        // Caller speech over assistant playback drops staged audio and
        // interrupts the in-flight turn.
        if self.cfg.vad.barge_in && verdict.speech && !self.outbound_mulaw.is_empty() {
            self.outbound_mulaw.clear();
            let interrupt = ClientEvent::End {
                trace_id: self.trace_id(),
            };
            self.send_event(&interrupt).await;
            self.trace.stage("barge_in");
        }

        let pcm_16k = audio::resample_linear(&pcm_8k, CARRIER_RATE, self.cfg.input_sample_rate);
        let chunk = ClientEvent::AudioChunk {
            trace_id: self.trace_id(),
            audio: audio::b64_encode(&audio::pcm16_to_bytes(&pcm_16k)),
        };
        self.send_event(&chunk).await;

        if let Some(reason) = verdict.commit {
            self.send_commit(reason, None).await;
        }
    }

    async fn send_commit(&mut self, reason: CommitReason, instructions: Option<String>) {
        let event = ClientEvent::Commit {
            trace_id: self.trace_id(),
            instructions,
            reason: Some(reason.as_str().to_string()),
        };
        self.send_event(&event).await;
        self.trace
            .stage_with("commit", json!({"reason": reason.as_str()}));
    }

    async fn on_dtmf(&mut self, digits: &str) {
        for digit in digits.chars() {
            match digit {
                '#' => {
                    self.send_commit(CommitReason::Dtmf, None).await;
                    self.vad.reset_after_commit();
                }
                '*' => {
                    let end = ClientEvent::End {
                        trace_id: self.trace_id(),
                    };
                    self.send_event(&end).await;
                    self.trace.stage("dtmf_end");
                }
                other => debug!("unmapped dtmf digit '{other}'"),
            }
        }
    }

    async fn handle_downstream_text(&mut self, payload: &str) {
        let event = match protocol::decode_server(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!("undecodable downstream event: {e}");
                return;
            }
        };
        match event {
            ServerEvent::Ready {
                output_sample_rate, ..
            } => self.on_ready(output_sample_rate).await,
            ServerEvent::AudioDelta { audio } => self.on_audio_delta(&audio),
            ServerEvent::ResponseCompleted { response_id } => {
                // Discard any residual partial frame so the next turn
                // starts on a clean 20 ms boundary.
                self.outbound_mulaw.clear();
                self.trace
                    .stage_with("response_completed", json!({"responseId": response_id}));
            }
            ServerEvent::Transcript { text } => {
                self.trace
                    .stage_with("transcript", json!({"chars": text.len()}));
            }
            ServerEvent::TextCompleted { text } => {
                self.trace
                    .stage_with("text_completed", json!({"chars": text.len()}));
            }
            ServerEvent::TextDelta { .. } => {}
            ServerEvent::Error { error } => {
                self.trace.warn("backend error", json!({"error": error}));
            }
        }
    }

    async fn on_ready(&mut self, output_sample_rate: u32) {
        self.output_sample_rate = output_sample_rate;
        if self.ready {
            return;
        }
        self.ready = true;
        self.trace
            .stage_with("ready", json!({"outputSampleRate": output_sample_rate}));

        let backlog = self.queue.drain();
        if let Some(tx) = self.dn_tx.as_mut() {
            for frame in backlog {
                if let Err(e) = tx.send(TMessage::text(frame)).await {
                    debug!("downstream flush failed: {e}");
                    return;
                }
            }
        }

        if !self.greeted {
            if let Some(opener) = self.cfg.opener_text.clone() {
                let event = ClientEvent::Commit {
                    trace_id: self.trace_id(),
                    instructions: Some(format!("Say this verbatim: {opener}")),
                    reason: None,
                };
                self.send_event(&event).await;
                self.greeted = true;
                self.trace.stage("greeted");
            }
        }
    }

    /// Stage synthesized audio and push out every complete 20 ms frame.
    fn on_audio_delta(&mut self, audio_b64: &str) {
        let bytes = match audio::b64_decode(audio_b64) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("bad audio_delta payload: {e}");
                return;
            }
        };
        let pcm = audio::bytes_to_pcm16(&bytes);
        let pcm_8k = audio::resample_linear(&pcm, self.output_sample_rate, CARRIER_RATE);
        self.outbound_mulaw.extend(audio::encode_mulaw(&pcm_8k));

        while self.outbound_mulaw.len() >= audio::MULAW_FRAME_BYTES {
            let frame: Vec<u8> = self
                .outbound_mulaw
                .drain(..audio::MULAW_FRAME_BYTES)
                .collect();
            let message =
                carrier::outbound_media_frame(&self.stream_sid, &audio::b64_encode(&frame));
            if self.car_out_tx.send(message).is_err() {
                return;
            }
            self.outbound_bytes += audio::MULAW_FRAME_BYTES as u64;
            self.frames_out += 1;
        }
    }

    async fn teardown(&mut self, reason: &str) {
        self.trace.stage_with(
            "teardown",
            json!({
                "reason": reason,
                "inboundBytes": self.inbound_bytes,
                "outboundBytes": self.outbound_bytes,
                "framesIn": self.frames_in,
                "framesOut": self.frames_out,
            }),
        );
        if let Some(mut tx) = self.dn_tx.take() {
            let _ = tx.close().await;
        }
    }
}

/// Drive one carrier media WebSocket to completion.
pub async fn handle_media(socket: WebSocket, cfg: Arc<BridgeConfig>) {
    let (mut carrier_tx, mut carrier_rx) = socket.split();
    let (car_out_tx, mut car_out_rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        while let Some(frame) = car_out_rx.recv().await {
            if carrier_tx.send(WsMessage::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    // The session exists only once the carrier names the stream.
    let start = loop {
        match carrier_rx.next().await {
            Some(Ok(WsMessage::Text(text))) => match carrier::parse_event(text.as_str()) {
                Some(CarrierEvent::Start { start }) => break start,
                Some(CarrierEvent::Stop {}) => {
                    drop(car_out_tx);
                    let _ = writer.await;
                    return;
                }
                _ => {}
            },
            Some(Ok(WsMessage::Close(_))) | None => {
                drop(car_out_tx);
                let _ = writer.await;
                return;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!("carrier socket error before start: {e}");
                drop(car_out_tx);
                let _ = writer.await;
                return;
            }
        }
    };

    let call_sid = start.call_sid.clone();
    let mut session = CallSession::new(cfg.clone(), start.stream_sid, call_sid.clone(), car_out_tx);
    session.trace.stage_with(
        "session_start",
        json!({"streamSid": session.stream_sid, "callSid": call_sid.clone()}),
    );
    session.send_start_envelope(call_sid).await;

    // Dial the relay; carrier frames keep flowing into the VAD and the
    // pre-ready queue while the dial is in flight.
    let connect = connect_async(cfg.downstream_url.clone());
    tokio::pin!(connect);

    let downstream = loop {
        tokio::select! {
            res = &mut connect => {
                match res {
                    Ok((ws, _response)) => break ws,
                    Err(e) => {
                        warn!("downstream dial failed: {e}");
                        session.teardown("downstream_dial_failed").await;
                        let _ = writer.await;
                        return;
                    }
                }
            }
            msg = carrier_rx.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Flow::Teardown(reason) = session.handle_carrier_text(text.as_str()).await {
                            session.teardown(reason).await;
                            let _ = writer.await;
                            return;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        session.teardown("carrier_closed").await;
                        let _ = writer.await;
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("carrier socket error: {e}");
                        session.teardown("carrier_error").await;
                        let _ = writer.await;
                        return;
                    }
                }
            }
        }
    };

    let (dn_tx, mut dn_rx) = downstream.split();
    session.dn_tx = Some(dn_tx);
    session.trace.stage("downstream_open");

    loop {
        tokio::select! {
            msg = carrier_rx.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Flow::Teardown(reason) = session.handle_carrier_text(text.as_str()).await {
                            session.teardown(reason).await;
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        session.teardown("carrier_closed").await;
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("carrier socket error: {e}");
                        session.teardown("carrier_error").await;
                        break;
                    }
                }
            }
            msg = dn_rx.next() => {
                match msg {
                    Some(Ok(TMessage::Text(text))) => {
                        session.handle_downstream_text(text.as_str()).await;
                    }
                    Some(Ok(TMessage::Close(_))) | None => {
                        session.teardown("downstream_closed").await;
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("downstream socket error: {e}");
                        session.teardown("downstream_error").await;
                        break;
                    }
                }
            }
        }
    }

    let _ = writer.await;
}

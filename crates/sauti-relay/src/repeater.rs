//! The 1:1 client ↔ backend tunnel.
//!
//! Frames are forwarded verbatim in both directions. The only inspection is
//! a single JSON sniff on client-to-backend text frames to pick up the
//! trace id and note the `start` envelope for logging. Client frames that
//! arrive while the backend dial is still in flight wait in the bounded
//! pre-ready queue.

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as TMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use sauti_core::protocol::{self, ServerEvent};
use sauti_core::queue::PreReadyQueue;
use sauti_core::trace::CallTrace;

use crate::config::RelayConfig;

type BackendStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const BACKEND_CLOSED_ERROR: &str = "backend connection closed";

struct RelaySession {
    trace: CallTrace,
    saw_start: bool,
    client_frames: u64,
    backend_frames: u64,
    client_bytes: u64,
    backend_bytes: u64,
}

impl RelaySession {
    fn new() -> Self {
        Self {
            trace: CallTrace::seeded("relay", None),
            saw_start: false,
            client_frames: 0,
            backend_frames: 0,
            client_bytes: 0,
            backend_bytes: 0,
        }
    }

    /// Peek at a client frame for trace correlation; the payload itself is
    /// forwarded untouched.
    fn sniff(&mut self, payload: &str) {
        let (trace_id, is_start) = protocol::sniff_trace(payload);
        if let Some(id) = trace_id {
            self.trace.adopt(&id);
        }
        if is_start && !self.saw_start {
            self.saw_start = true;
            self.trace.stage("start_seen");
        }
    }

    fn teardown(&self, reason: &str) {
        self.trace.stage_with(
            "teardown",
            json!({
                "reason": reason,
                "sawStart": self.saw_start,
                "clientFrames": self.client_frames,
                "backendFrames": self.backend_frames,
                "clientBytes": self.client_bytes,
                "backendBytes": self.backend_bytes,
            }),
        );
    }
}

pub async fn handle_client(client: WebSocket, cfg: RelayConfig) {
    let (mut client_tx, mut client_rx) = client.split();
    let mut session = RelaySession::new();
    let mut queue = PreReadyQueue::default();

    // Dial the backend while already accepting (and queueing) client frames.
    let connect = connect_async(cfg.backend_url.clone());
    tokio::pin!(connect);

    let backend: BackendStream = loop {
        tokio::select! {
            res = &mut connect => {
                match res {
                    Ok((ws, _response)) => break ws,
                    Err(e) => {
                        warn!("backend dial failed: {e}");
                        let _ = send_error(&mut client_tx, BACKEND_CLOSED_ERROR).await;
                        let _ = client_tx.close().await;
                        session.teardown("backend_dial_failed");
                        return;
                    }
                }
            }
            msg = client_rx.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        session.sniff(text.as_str());
                        session.client_frames += 1;
                        session.client_bytes += text.len() as u64;
                        if let Some(dropped) = queue.push(text.to_string()) {
                            session.trace.warn(
                                "pre-ready queue overflow",
                                json!({"droppedBytes": dropped.len()}),
                            );
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        session.teardown("client_closed_before_backend");
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("client socket error while dialing: {e}");
                        session.teardown("client_error_before_backend");
                        return;
                    }
                }
            }
        }
    };

    let (mut backend_tx, mut backend_rx) = backend.split();
    session.trace.stage("backend_open");

    for frame in queue.drain() {
        if backend_tx.send(TMessage::text(frame)).await.is_err() {
            let _ = send_error(&mut client_tx, BACKEND_CLOSED_ERROR).await;
            let _ = client_tx.close().await;
            session.teardown("backend_write_failed");
            return;
        }
    }

    loop {
        tokio::select! {
            msg = client_rx.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        session.sniff(text.as_str());
                        session.client_frames += 1;
                        session.client_bytes += text.len() as u64;
                        if backend_tx.send(TMessage::text(text.to_string())).await.is_err() {
                            let _ = send_error(&mut client_tx, BACKEND_CLOSED_ERROR).await;
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Binary(data))) => {
                        session.client_frames += 1;
                        session.client_bytes += data.len() as u64;
                        if backend_tx.send(TMessage::Binary(data.to_vec().into())).await.is_err() {
                            let _ = send_error(&mut client_tx, BACKEND_CLOSED_ERROR).await;
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        let _ = backend_tx.close().await;
                        session.teardown("client_closed");
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("client socket error: {e}");
                        let _ = backend_tx.close().await;
                        session.teardown("client_error");
                        return;
                    }
                }
            }
            msg = backend_rx.next() => {
                match msg {
                    Some(Ok(TMessage::Text(text))) => {
                        session.backend_frames += 1;
                        session.backend_bytes += text.len() as u64;
                        if client_tx.send(WsMessage::Text(text.to_string().into())).await.is_err() {
                            let _ = backend_tx.close().await;
                            session.teardown("client_write_failed");
                            return;
                        }
                    }
                    Some(Ok(TMessage::Binary(data))) => {
                        session.backend_frames += 1;
                        session.backend_bytes += data.len() as u64;
                        if client_tx.send(WsMessage::Binary(data.to_vec().into())).await.is_err() {
                            let _ = backend_tx.close().await;
                            session.teardown("client_write_failed");
                            return;
                        }
                    }
                    Some(Ok(TMessage::Close(_))) | None => {
                        let _ = send_error(&mut client_tx, BACKEND_CLOSED_ERROR).await;
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("backend socket error: {e}");
                        let _ = send_error(&mut client_tx, BACKEND_CLOSED_ERROR).await;
                        break;
                    }
                }
            }
        }
    }

    let _ = client_tx.close().await;
    session.teardown("backend_closed");
}

async fn send_error(
    client_tx: &mut SplitSink<WebSocket, WsMessage>,
    message: &str,
) -> Result<(), axum::Error> {
    let event = ServerEvent::Error {
        error: message.to_string(),
    };
    match protocol::encode(&event) {
        Ok(json) => client_tx.send(WsMessage::Text(json.into())).await,
        Err(_) => Ok(()),
    }
}

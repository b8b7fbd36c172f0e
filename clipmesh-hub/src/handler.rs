//! Per-connection WebSocket handling and message dispatch. Grounded in
//! `packages/umbra-relay/src/handler.rs`'s `handle_websocket`/
//! `handle_client_message` split. Batch-sender flow control for
//! hub-originated transfers is grounded structurally in
//! `Federation::peer_connection_loop`'s background-task-per-remote shape.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use clipmesh_core::protocol::Envelope;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use uuid::Uuid;

use crate::state::{HubState, HubTransferRoute};

const AUTH_TIMEOUT: Duration = Duration::from_secs(10);
const PING_INTERVAL: Duration = Duration::from_secs(60);
const PONG_TIMEOUT: Duration = Duration::from_secs(30);
const BATCH_SIZE: usize = 3;
const INTER_CHUNK_DELAY: Duration = Duration::from_millis(50);
const INTER_BATCH_PAUSE: Duration = Duration::from_millis(100);

pub async fn handle_websocket(socket: WebSocket, state: HubState) {
    let session_id = Uuid::new_v4().simple().to_string();
    let (mut ws_sink, mut ws_stream) = socket.split();

    if let Some(secret) = &state.config.shared_secret {
        match authenticate(&mut ws_sink, &mut ws_stream, secret).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(session_id, "auth failed; closing");
                return;
            }
            Err(_) => {
                tracing::warn!(session_id, "auth timed out; closing");
                return;
            }
        }
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
    state.register_client(&session_id, tx);

    let mut ping_timer = tokio::time::interval(PING_INTERVAL);
    let mut awaiting_pong_since: Option<tokio::time::Instant> = None;

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    Some(envelope) => {
                        let Ok(json) = envelope.to_json() else { continue };
                        if ws_sink.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            inbound = ws_stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => match Envelope::from_json(&text) {
                        Ok(envelope) => {
                            if matches!(envelope, Envelope::Pong) {
                                awaiting_pong_since = None;
                            }
                            dispatch(&state, &session_id, envelope).await;
                        }
                        Err(e) => {
                            tracing::warn!(session_id, error = %e, "malformed message; ignoring");
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
            _ = ping_timer.tick() => {
                if let Some(since) = awaiting_pong_since {
                    if since.elapsed() >= PONG_TIMEOUT {
                        tracing::warn!(session_id, "missed pong; closing");
                        break;
                    }
                }
                let Ok(json) = Envelope::Ping.to_json() else { continue };
                if ws_sink.send(Message::Text(json)).await.is_err() {
                    break;
                }
                awaiting_pong_since = Some(tokio::time::Instant::now());
            }
        }
    }

    state.unregister_client(&session_id);
}

async fn authenticate(
    ws_sink: &mut (impl futures::Sink<Message, Error = axum::Error> + Unpin),
    ws_stream: &mut (impl futures::Stream<Item = Result<Message, axum::Error>> + Unpin),
    secret: &str,
) -> Result<bool, ()> {
    let first = timeout(AUTH_TIMEOUT, ws_stream.next()).await.map_err(|_| ())?;
    let Some(Ok(Message::Text(text))) = first else {
        return Err(());
    };
    let success = match Envelope::from_json(&text) {
        Ok(Envelope::Auth {
            password: Some(password),
            ..
        }) => password == secret,
        _ => false,
    };
    let response = Envelope::Auth {
        password: None,
        success: Some(success),
    };
    if let Ok(json) = response.to_json() {
        let _ = ws_sink.send(Message::Text(json)).await;
    }
    Ok(success)
}

async fn dispatch(state: &HubState, session_id: &str, envelope: Envelope) {
    match envelope {
        Envelope::Ping => {
            state.send_to(session_id, Envelope::Pong);
        }
        Envelope::Clipboard { .. } => {
            state.broadcast_except(session_id, &envelope);
        }
        Envelope::ChunkedTransferInit {
            ref transfer_id,
            ref filename,
            ..
        } => {
            state.routes.insert(
                transfer_id.clone(),
                HubTransferRoute {
                    origin: Some(session_id.to_string()),
                    filename: filename.clone(),
                },
            );
            state.broadcast_except(session_id, &envelope);
        }
        Envelope::ChunkedTransferAck {
            ref transfer_id,
            ref needed_chunks,
        } => match state.routes.get(transfer_id).map(|r| r.origin.clone()) {
            Some(Some(origin)) => {
                state.send_to(&origin, envelope.clone());
            }
            Some(None) => {
                enqueue_pending(state, transfer_id, session_id, needed_chunks);
                spawn_batch_sender(state.clone(), transfer_id.clone(), session_id.to_string());
            }
            None => {
                tracing::warn!(transfer_id, "ack for unknown transfer; dropping");
            }
        },
        Envelope::ChunkData {
            ref transfer_id, ..
        } => {
            if let Some(route) = state.routes.get(transfer_id) {
                if route.origin.as_deref() == Some(session_id) {
                    state.broadcast_except(session_id, &envelope);
                }
            }
        }
        Envelope::ChunkAck {
            ref transfer_id,
            chunk_index,
        } => match state.routes.get(transfer_id).map(|r| r.origin.clone()) {
            Some(Some(origin)) => {
                state.send_to(&origin, envelope.clone());
            }
            Some(None) => {
                if let Ok((new_state, progress)) =
                    state.engine.mark_chunk_acked_with_progress(transfer_id, chunk_index)
                {
                    tracing::debug!(transfer_id, chunk_index, progress, "hub-originated transfer progress");
                    if new_state.is_terminal() {
                        state.routes.remove(transfer_id);
                        state.pending_sends.remove(transfer_id);
                    }
                }
            }
            None => {}
        },
        Envelope::ChunkNack {
            ref transfer_id,
            chunk_index,
            ..
        } => match state.routes.get(transfer_id).map(|r| r.origin.clone()) {
            Some(Some(origin)) => {
                state.send_to(&origin, envelope.clone());
            }
            Some(None) => {
                if let Ok(resend) = state.engine.chunk_payload(transfer_id, chunk_index) {
                    state.send_to(session_id, resend);
                }
            }
            None => {}
        },
        Envelope::TransferComplete {
            ref transfer_id, ..
        } => {
            if let Some((_, route)) = state.routes.remove(transfer_id) {
                if route.origin.is_some() {
                    state.broadcast_except(session_id, &envelope);
                }
            }
            state.pending_sends.remove(transfer_id);
        }
        Envelope::TransferError {
            ref transfer_id, ..
        } => {
            if let Some((_, route)) = state.routes.remove(transfer_id) {
                if route.origin.is_some() {
                    state.broadcast_except(session_id, &envelope);
                }
            }
            state.pending_sends.remove(transfer_id);
        }
        Envelope::Pong | Envelope::Auth { .. } | Envelope::Unknown => {}
    }
}

fn enqueue_pending(state: &HubState, transfer_id: &str, spoke_id: &str, needed: &[u32]) {
    let per_transfer = state.pending_sends.entry(transfer_id.to_string()).or_default();
    per_transfer.insert(spoke_id.to_string(), needed.iter().copied().collect());
}

/// Transmits three chunks, each followed by a 50 ms delay, then pauses
/// 100 ms before the next batch — bounds in-flight bytes per receiver
/// and tolerates slow intermediate relays.
fn spawn_batch_sender(state: HubState, transfer_id: String, spoke_id: String) {
    tokio::spawn(async move {
        loop {
            let batch: Vec<u32> = {
                let Some(per_transfer) = state.pending_sends.get(&transfer_id) else {
                    return;
                };
                let Some(mut queue) = per_transfer.get_mut(&spoke_id) else {
                    return;
                };
                let mut batch = Vec::with_capacity(BATCH_SIZE);
                for _ in 0..BATCH_SIZE {
                    match queue.pop_front() {
                        Some(index) => batch.push(index),
                        None => break,
                    }
                }
                batch
            };

            if batch.is_empty() {
                return;
            }

            for index in &batch {
                match state.engine.chunk_payload(&transfer_id, *index) {
                    Ok(chunk) => {
                        state.send_to(&spoke_id, chunk);
                        let _ = state.engine.mark_chunk_sent(&transfer_id, *index);
                    }
                    Err(e) => {
                        tracing::warn!(transfer_id, index, error = %e, "failed to build chunk payload");
                    }
                }
                tokio::time::sleep(INTER_CHUNK_DELAY).await;
            }
            tokio::time::sleep(INTER_BATCH_PAUSE).await;
        }
    });
}

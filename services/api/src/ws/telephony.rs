//! Telephony leg adapter.
//!
//! Consumes framed, timestamped audio events from the phone network socket,
//! keeps the session's media clock current, and forwards caller audio to the
//! model leg. A `close` *event* is a hard stop for the whole session; a bare
//! socket close only releases the legs the telephony source invalidates.

use crate::{
    state::AppState,
    ws::{protocol::TelephonyEvent, provider},
};
use anyhow::Result;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use serde_json::to_string;
use std::sync::Arc;
use switchboard_core::{
    realtime::ClientEvent,
    session::{Leg, LegKind},
};
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Axum handler to upgrade an HTTP connection to the telephony WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Whether the read loop should keep going after an event.
#[derive(PartialEq)]
enum Flow {
    Continue,
    HardStop,
}

#[instrument(name = "telephony_leg", skip_all, fields(conn_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let conn_id: u32 = rand::random();
    tracing::Span::current().record("conn_id", conn_id);
    info!("Telephony socket connected.");

    let (sink, mut stream) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let leg = Leg::new(tx);
    let leg_id = leg.id;
    let writer = tokio::spawn(drain_to_socket(rx, sink));

    {
        let mut session = state.session.lock().await;
        if let Some(displaced) = session.attach(LegKind::Telephony, leg) {
            info!(displaced = %displaced.id, "Previous telephony leg closed (replaced).");
        }
        // The credential rides in with the telephony connection handler and
        // gates the model leg until a stream is established.
        session.set_api_key(state.config.model_api_key.clone());
    }

    let mut hard_stop = false;
    while let Some(received) = stream.next().await {
        match received {
            Ok(Message::Text(text)) => {
                fan_out_to_control(&state, &text).await;
                match serde_json::from_str::<TelephonyEvent>(&text) {
                    Ok(event) => match handle_event(&state, event).await {
                        Ok(Flow::HardStop) => {
                            hard_stop = true;
                            break;
                        }
                        Ok(Flow::Continue) => {}
                        Err(e) => warn!(error = ?e, "Telephony event handling failed."),
                    },
                    Err(e) => warn!(error = %e, "Undecodable telephony frame skipped."),
                }
            }
            Ok(Message::Close(_)) => {
                info!("Telephony socket sent a close frame.");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Telephony socket error.");
                break;
            }
        }
    }

    if !hard_stop {
        release_call_legs(&state, leg_id).await;
    }
    let _ = writer.await;
    info!("Telephony leg finished.");
}

/// Writer half: drains queued frames onto the socket until every sender of
/// the leg is gone, then closes it.
async fn drain_to_socket(
    mut rx: mpsc::UnboundedReceiver<String>,
    mut sink: SplitSink<WebSocket, Message>,
) {
    while let Some(frame) = rx.recv().await {
        if sink.send(Message::Text(frame.into())).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}

async fn handle_event(state: &Arc<AppState>, event: TelephonyEvent) -> Result<Flow> {
    match event {
        TelephonyEvent::Start { start } => {
            {
                let mut session = state.session.lock().await;
                session.begin_stream(start.stream_sid);
            }
            provider::ensure_started(state).await;
            Ok(Flow::Continue)
        }
        TelephonyEvent::Media { media } => {
            let mut session = state.session.lock().await;
            session.record_media_timestamp(media.timestamp);
            // Audio arriving before the model leg is ready is dropped, not
            // buffered; the caller's first words race the connect on purpose.
            if let Some(model) = session.model() {
                let event = ClientEvent::InputAudioBufferAppend {
                    audio: media.payload,
                };
                model.send(to_string(&event)?);
            }
            Ok(Flow::Continue)
        }
        TelephonyEvent::Close => {
            info!("Telephony close event; tearing the session down.");
            teardown_all(state).await;
            Ok(Flow::HardStop)
        }
        TelephonyEvent::Unrecognized => {
            warn!("Unrecognized telephony event ignored.");
            Ok(Flow::Continue)
        }
    }
}

/// Mirrors raw telephony traffic onto the control leg for observability.
async fn fan_out_to_control(state: &Arc<AppState>, raw: &str) {
    let session = state.session.lock().await;
    if let Some(control) = session.control() {
        control.send(raw.to_string());
    }
}

/// A dead telephony socket takes the model leg with it — a call cannot
/// continue without its audio source — but the control leg survives.
async fn release_call_legs(state: &Arc<AppState>, leg_id: Uuid) {
    let mut session = state.session.lock().await;
    // A displaced connection's teardown must leave its replacement's call
    // untouched; only the current owner gets to take the model leg down.
    if session.release(LegKind::Telephony, leg_id) {
        if session.detach(LegKind::Model).is_some() {
            info!("Model leg released with the telephony source.");
        }
        session.clear_call_state();
    }
    if session.is_empty() {
        session.reset();
    }
}

/// Hard stop: every leg goes, including tracked observers.
async fn teardown_all(state: &Arc<AppState>) {
    state.registry.terminate_all("call ended").await;
    let mut session = state.session.lock().await;
    session.reset();
}

//! Control leg adapter.
//!
//! The operator console attaches here: it receives every model and telephony
//! event verbatim, and its configuration updates become the saved session
//! config (forwarded live when the model leg is open). Keepalives are owned
//! by the connection registry, which will terminate this socket forcefully
//! if it stops answering.

use crate::{
    state::AppState,
    ws::protocol::{ControlMessage, pong_frame},
};
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use std::sync::Arc;
use switchboard_core::session::{Leg, LegKind};
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Axum handler to upgrade an HTTP connection to the control WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

#[instrument(name = "control_leg", skip_all, fields(leg_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (sink, stream) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let leg = Leg::new(tx.clone());
    let leg_id = leg.id;
    tracing::Span::current().record("leg_id", leg_id.to_string());
    info!("Control socket connected.");

    let writer = tokio::spawn(drain_to_socket(rx, sink));

    // The read loop runs on its own task so the registry can abort it
    // forcefully when the heartbeat gives up on this socket.
    let reader = tokio::spawn(run_reader(state.clone(), stream, tx.clone(), leg_id));
    if let Some(displaced) = state
        .registry
        .attach(leg_id, LegKind::Control, tx, reader.abort_handle())
        .await
    {
        info!(%displaced, "Previous control connection closed (replaced).");
    }
    {
        let mut session = state.session.lock().await;
        session.attach(LegKind::Control, leg);
    }

    let _ = reader.await;

    state.registry.deregister(leg_id).await;
    {
        let mut session = state.session.lock().await;
        session.release(LegKind::Control, leg_id);
        if session.is_empty() {
            session.reset();
        }
    }
    let _ = writer.await;
    info!("Control leg finished.");
}

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

async fn run_reader(
    state: Arc<AppState>,
    mut stream: SplitStream<WebSocket>,
    outbound: mpsc::UnboundedSender<String>,
    leg_id: Uuid,
) {
    while let Some(received) = stream.next().await {
        match received {
            Ok(Message::Text(text)) => handle_message(&state, &text, &outbound, leg_id).await,
            Ok(Message::Close(_)) => {
                info!("Control socket sent a close frame.");
                break;
            }
            Ok(Message::Pong(_)) => state.registry.mark_alive(leg_id).await,
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Control socket error.");
                break;
            }
        }
    }
}

async fn handle_message(
    state: &Arc<AppState>,
    text: &str,
    outbound: &mpsc::UnboundedSender<String>,
    leg_id: Uuid,
) {
    match serde_json::from_str::<ControlMessage>(text) {
        Ok(ControlMessage::Ping) => {
            state.registry.note_client_keepalive(leg_id).await;
            let _ = outbound.send(pong_frame());
        }
        Ok(ControlMessage::Pong) => state.registry.mark_alive(leg_id).await,
        Ok(ControlMessage::SessionUpdate { session: config }) => {
            let mut session = state.session.lock().await;
            // Always record the latest config; it seeds the next model
            // handshake even if no model leg exists yet.
            session.save_config(config);
            if let Some(model) = session.model() {
                model.send(text.to_string());
            }
            info!("Operator configuration update recorded.");
        }
        Ok(ControlMessage::Other) | Err(_) => {
            let session = state.session.lock().await;
            match session.model() {
                Some(model) => {
                    model.send(text.to_string());
                }
                None => warn!("Control message dropped; model leg is not open."),
            }
        }
    }
}

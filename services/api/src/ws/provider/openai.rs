//! The realtime model connection: handshake, relay, truncation, dispatch.
//!
//! One task owns the socket. Outbound traffic from the other legs arrives on
//! the model leg's channel and goes straight to the sink; inbound events fan
//! out verbatim to the control leg and are pattern-matched for the handful
//! the bridge itself acts on.

use crate::{state::AppState, ws::protocol::TelephonyOut};
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::to_string;
use std::sync::Arc;
use switchboard_core::realtime::{
    self, ClientEvent, ConversationItem, ServerEvent,
};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, protocol::Message as WsMessage},
};
use tracing::{debug, info, warn};

/// Runs the model leg until either side closes.
pub async fn run(state: &Arc<AppState>, mut rx: mpsc::UnboundedReceiver<String>) -> Result<()> {
    let (api_key, saved_config) = {
        let session = state.session.lock().await;
        let api_key = session
            .api_key()
            .map(str::to_string)
            .context("Model leg started without a credential")?;
        (api_key, session.saved_config().cloned())
    };

    let url = format!(
        "{}?model={}",
        state.config.model_base_url, state.config.model
    );
    let mut request = url.into_client_request()?;
    request
        .headers_mut()
        .insert("Authorization", format!("Bearer {}", api_key).parse()?);
    request
        .headers_mut()
        .insert("OpenAI-Beta", "realtime=v1".parse()?);

    let (ws_stream, _) = connect_async(request)
        .await
        .context("Failed to connect to the realtime model service")?;
    let (mut model_sink, mut model_stream) = ws_stream.split();
    info!("Connected to the realtime model service.");

    // Configuration handshake: the saved control-leg config spread over the
    // hard defaults, sent exactly once per connection.
    let handshake = ClientEvent::SessionUpdate {
        session: realtime::handshake_config(
            saved_config.as_ref(),
            state.dispatcher.definitions(),
        ),
    };
    model_sink
        .send(WsMessage::Text(to_string(&handshake)?.into()))
        .await?;

    loop {
        tokio::select! {
            biased;
            // Frames queued by the other legs (audio appends, config
            // forwards, truncations, function results).
            outbound = rx.recv() => {
                let Some(frame) = outbound else {
                    info!("Model leg released; closing the connection.");
                    break;
                };
                model_sink.send(WsMessage::Text(frame.into())).await?;
            }
            inbound = model_stream.next() => {
                match inbound {
                    Some(Ok(WsMessage::Text(text))) => handle_server_event(state, &text).await?,
                    Some(Ok(WsMessage::Close(_))) | None => {
                        info!("Model service closed the connection.");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e).context("Model socket error"),
                }
            }
        }
    }
    Ok(())
}

/// Handles one raw event from the model service.
async fn handle_server_event(state: &Arc<AppState>, text: &str) -> Result<()> {
    // Observability first: the control leg sees everything, acted on or not.
    {
        let session = state.session.lock().await;
        if let Some(control) = session.control() {
            control.send(text.to_string());
        }
    }

    let event = match serde_json::from_str::<ServerEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Undecodable model event skipped.");
            return Ok(());
        }
    };

    match event {
        ServerEvent::SpeechStarted { .. } => apply_truncation(state).await?,
        ServerEvent::ResponseAudioDelta { item_id, delta } => {
            forward_audio(state, &item_id, delta).await?
        }
        ServerEvent::OutputItemDone { item } if item.is_function_call() => {
            dispatch_function_call(state, item)
        }
        ServerEvent::OutputItemDone { .. } => {}
        ServerEvent::Error { error } => {
            warn!(code = ?error.code, message = %error.message, "Model service reported an error.")
        }
        ServerEvent::SessionCreated | ServerEvent::SessionUpdated => {
            debug!("Session configuration acknowledged.")
        }
        ServerEvent::Unrecognized => {}
    }
    Ok(())
}

/// Barge-in: cut the in-flight response short in the model's history and
/// flush unplayed audio on the telephony side. A no-op when nothing is
/// playing.
async fn apply_truncation(state: &Arc<AppState>) -> Result<()> {
    let mut session = state.session.lock().await;
    let Some(truncation) = session.take_truncation() else {
        return Ok(());
    };
    info!(
        item = %truncation.item_id,
        audio_end_ms = truncation.audio_end_ms,
        "Caller barge-in; truncating the assistant response."
    );
    if let Some(model) = session.model() {
        let event = ClientEvent::ConversationItemTruncate {
            item_id: truncation.item_id.clone(),
            content_index: 0,
            audio_end_ms: truncation.audio_end_ms,
        };
        model.send(to_string(&event)?);
    }
    if let Some(stream_sid) = session.stream_sid().map(str::to_string) {
        if let Some(telephony) = session.telephony() {
            telephony.send(to_string(&TelephonyOut::clear_audio(&stream_sid))?);
        }
    }
    Ok(())
}

/// Relays one assistant audio chunk to the telephony leg, followed by a
/// synchronization mark. Without a telephony leg the chunk is dropped with a
/// warning — never buffered.
async fn forward_audio(state: &Arc<AppState>, item_id: &str, delta: String) -> Result<()> {
    let mut session = state.session.lock().await;
    let Some(stream_sid) = session.stream_sid().map(str::to_string) else {
        warn!("Audio delta dropped; no telephony stream is established.");
        return Ok(());
    };
    if session.telephony().is_none() {
        warn!("Audio delta dropped; no telephony leg is attached.");
        return Ok(());
    }
    session.note_audio_delta(item_id);
    if let Some(telephony) = session.telephony() {
        telephony.send(to_string(&TelephonyOut::media(&stream_sid, delta))?);
        telephony.send(to_string(&TelephonyOut::mark(&stream_sid))?);
    }
    Ok(())
}

/// Runs a requested function call on its own supervised task so a slow
/// handler never blocks the relay. The result re-checks the model leg before
/// injection — the connection may have gone away while the handler ran.
fn dispatch_function_call(state: &Arc<AppState>, item: ConversationItem) {
    let state = state.clone();
    tokio::spawn(async move {
        let (Some(call_id), Some(name)) = (item.call_id.clone(), item.name.clone()) else {
            warn!("Function call item missing call_id or name; ignored.");
            return;
        };
        let arguments = item.arguments.unwrap_or_default();
        let output = state.dispatcher.dispatch(&call_id, &name, &arguments).await;

        let session = state.session.lock().await;
        let Some(model) = session.model() else {
            warn!(call = %call_id, "Model leg closed before the function result arrived.");
            return;
        };
        let create = ClientEvent::ConversationItemCreate {
            item: ConversationItem::function_call_output(&call_id, output),
        };
        match to_string(&create) {
            Ok(frame) => {
                model.send(frame);
            }
            Err(e) => {
                warn!(call = %call_id, error = %e, "Failed to encode function result.");
                return;
            }
        }
        if let Ok(frame) = to_string(&ClientEvent::ResponseCreate) {
            model.send(frame);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, ws::registry::Registry};
    use serde_json::{Value, json};
    use std::time::Duration;
    use switchboard_core::{
        dispatch::Dispatcher,
        session::{CallSession, Leg, LegKind},
    };
    use tokio::sync::Mutex;

    fn test_state() -> Arc<AppState> {
        let config = Config {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            model_api_key: "sk-test".into(),
            model: "gpt-4o-realtime-preview-2024-12-17".into(),
            model_base_url: "wss://example.test/v1/realtime".into(),
            heartbeat_interval: Duration::from_secs(30),
            client_timeout: Duration::from_secs(60),
            log_level: tracing::Level::INFO,
        };
        Arc::new(AppState {
            session: Arc::new(Mutex::new(CallSession::default())),
            dispatcher: Arc::new(Dispatcher::builtin()),
            registry: Arc::new(Registry::new(
                config.heartbeat_interval,
                config.client_timeout,
            )),
            config: Arc::new(config),
        })
    }

    async fn attach_leg(
        state: &Arc<AppState>,
        kind: LegKind,
    ) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        state.session.lock().await.attach(kind, Leg::new(tx));
        rx
    }

    fn recv_json(rx: &mut mpsc::UnboundedReceiver<String>) -> Value {
        let frame = rx.try_recv().expect("expected a queued frame");
        serde_json::from_str(&frame).expect("frame is JSON")
    }

    #[tokio::test]
    async fn first_audio_delta_starts_playback_and_forwards_frames() {
        let state = test_state();
        let mut telephony_rx = attach_leg(&state, LegKind::Telephony).await;
        {
            let mut session = state.session.lock().await;
            session.begin_stream("ST1".into());
            session.record_media_timestamp(0);
        }

        handle_server_event(
            &state,
            r#"{"type":"response.audio.delta","item_id":"IT1","delta":"X"}"#,
        )
        .await
        .unwrap();

        {
            let session = state.session.lock().await;
            assert_eq!(session.response_start_timestamp(), Some(0));
            assert_eq!(session.last_assistant_item(), Some("IT1"));
        }
        assert_eq!(
            recv_json(&mut telephony_rx),
            json!({"event": "media", "streamSid": "ST1", "media": {"payload": "X"}})
        );
        assert_eq!(
            recv_json(&mut telephony_rx),
            json!({"event": "mark", "streamSid": "ST1"})
        );
    }

    #[tokio::test]
    async fn barge_in_truncates_and_clears_buffered_audio() {
        let state = test_state();
        let mut telephony_rx = attach_leg(&state, LegKind::Telephony).await;
        let mut model_rx = attach_leg(&state, LegKind::Model).await;
        {
            let mut session = state.session.lock().await;
            session.begin_stream("ST1".into());
            session.record_media_timestamp(0);
        }

        handle_server_event(
            &state,
            r#"{"type":"response.audio.delta","item_id":"IT1","delta":"X"}"#,
        )
        .await
        .unwrap();
        let _ = telephony_rx.try_recv();
        let _ = telephony_rx.try_recv();

        state.session.lock().await.record_media_timestamp(500);
        handle_server_event(&state, r#"{"type":"input_audio_buffer.speech_started"}"#)
            .await
            .unwrap();

        assert_eq!(
            recv_json(&mut model_rx),
            json!({
                "type": "conversation.item.truncate",
                "item_id": "IT1",
                "content_index": 0,
                "audio_end_ms": 500
            })
        );
        assert_eq!(
            recv_json(&mut telephony_rx),
            json!({"event": "mark", "streamSid": "ST1", "mark": {"name": "clear_audio"}})
        );
        let session = state.session.lock().await;
        assert_eq!(session.last_assistant_item(), None);
        assert_eq!(session.response_start_timestamp(), None);
    }

    #[tokio::test]
    async fn barge_in_without_inflight_response_sends_nothing() {
        let state = test_state();
        let mut telephony_rx = attach_leg(&state, LegKind::Telephony).await;
        let mut model_rx = attach_leg(&state, LegKind::Model).await;
        state.session.lock().await.begin_stream("ST1".into());

        handle_server_event(&state, r#"{"type":"input_audio_buffer.speech_started"}"#)
            .await
            .unwrap();

        assert!(model_rx.try_recv().is_err());
        assert!(telephony_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn audio_delta_without_telephony_is_dropped_but_fanned_out() {
        let state = test_state();
        let mut control_rx = attach_leg(&state, LegKind::Control).await;

        let raw = r#"{"type":"response.audio.delta","item_id":"IT1","delta":"X"}"#;
        handle_server_event(&state, raw).await.unwrap();

        // The observer still sees the event even though playback had nowhere
        // to go.
        assert_eq!(control_rx.try_recv().unwrap(), raw);
        let session = state.session.lock().await;
        assert_eq!(session.response_start_timestamp(), None);
    }

    #[tokio::test]
    async fn unknown_function_call_reports_an_error_payload() {
        let state = test_state();
        let mut model_rx = attach_leg(&state, LegKind::Model).await;

        handle_server_event(
            &state,
            r#"{"type":"response.output_item.done","item":{"type":"function_call","name":"unknown_fn","call_id":"C1","arguments":"{}"}}"#,
        )
        .await
        .unwrap();

        let created = tokio::time::timeout(Duration::from_secs(1), model_rx.recv())
            .await
            .expect("dispatch completes")
            .expect("frame queued");
        let created: Value = serde_json::from_str(&created).unwrap();
        assert_eq!(created["type"], "conversation.item.create");
        assert_eq!(created["item"]["type"], "function_call_output");
        assert_eq!(created["item"]["call_id"], "C1");
        let output: Value =
            serde_json::from_str(created["item"]["output"].as_str().unwrap()).unwrap();
        assert!(
            output["error"]
                .as_str()
                .is_some_and(|m| m.contains("unknown_fn"))
        );

        let follow_up = tokio::time::timeout(Duration::from_secs(1), model_rx.recv())
            .await
            .expect("dispatch completes")
            .expect("frame queued");
        let follow_up: Value = serde_json::from_str(&follow_up).unwrap();
        assert_eq!(follow_up, json!({"type": "response.create"}));
    }
}

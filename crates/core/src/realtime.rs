//! Wire protocol for the realtime model service.
//!
//! Events are JSON objects tagged by `type`, decoded once at the leg
//! boundary. Anything the bridge does not act on still reaches the control
//! leg verbatim, so the server-side enum keeps an explicit `Unrecognized`
//! variant instead of failing on unknown tags.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Instructions applied when the operator console never supplied any.
pub const DEFAULT_INSTRUCTIONS: &str = "You are a friendly assistant on a live phone call. \
     Keep replies brief and conversational, and let the caller interrupt you.";

/// Voice applied when the operator console never supplied one.
pub const DEFAULT_VOICE: &str = "alloy";

/// Codec spoken on both directions of the telephony audio path.
pub const AUDIO_FORMAT: &str = "g711_ulaw";

/// Speech-to-text model for caller transcription.
pub const TRANSCRIPTION_MODEL: &str = "whisper-1";

// --- Session configuration ---

/// The session object carried by `session.update`, in both directions:
/// received from the control leg and sent as the connect handshake.
///
/// Fields the bridge does not model pass through `extra` untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<InputAudioTranscription>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<TurnDetection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Caller transcription settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputAudioTranscription {
    pub model: String,
}

/// Turn detection settings. Only server-side voice activity detection is
/// meaningful for a bridged phone call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnDetection {
    ServerVad {
        #[serde(skip_serializing_if = "Option::is_none")]
        threshold: Option<f32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        prefix_padding_ms: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        silence_duration_ms: Option<u32>,
    },
    None {},
}

/// A function made available to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

impl SessionConfig {
    /// The hard defaults for a freshly opened model leg.
    pub fn defaults(tools: Vec<ToolDef>) -> Self {
        Self {
            modalities: Some(vec!["text".into(), "audio".into()]),
            instructions: Some(DEFAULT_INSTRUCTIONS.into()),
            voice: Some(DEFAULT_VOICE.into()),
            input_audio_format: Some(AUDIO_FORMAT.into()),
            output_audio_format: Some(AUDIO_FORMAT.into()),
            input_audio_transcription: Some(InputAudioTranscription {
                model: TRANSCRIPTION_MODEL.into(),
            }),
            turn_detection: Some(TurnDetection::ServerVad {
                threshold: None,
                prefix_padding_ms: None,
                silence_duration_ms: None,
            }),
            tools: Some(tools),
            extra: serde_json::Map::new(),
        }
    }
}

/// Builds the connect handshake: the saved control-leg configuration spread
/// over the hard defaults, field by field, with unmodeled fields passing
/// through verbatim.
pub fn handshake_config(saved: Option<&SessionConfig>, tools: Vec<ToolDef>) -> SessionConfig {
    let defaults = SessionConfig::defaults(tools);
    let Some(saved) = saved else {
        return defaults;
    };
    let mut extra = defaults.extra;
    extra.extend(saved.extra.clone());
    SessionConfig {
        modalities: saved.modalities.clone().or(defaults.modalities),
        instructions: saved.instructions.clone().or(defaults.instructions),
        voice: saved.voice.clone().or(defaults.voice),
        input_audio_format: saved.input_audio_format.clone().or(defaults.input_audio_format),
        output_audio_format: saved
            .output_audio_format
            .clone()
            .or(defaults.output_audio_format),
        input_audio_transcription: saved
            .input_audio_transcription
            .clone()
            .or(defaults.input_audio_transcription),
        turn_detection: saved.turn_detection.clone().or(defaults.turn_detection),
        tools: saved.tools.clone().or(defaults.tools),
        extra,
    }
}

// --- Conversation items ---

/// A conversation item, as carried by `conversation.item.create` and
/// `response.output_item.done`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl ConversationItem {
    pub fn is_function_call(&self) -> bool {
        self.item_type == "function_call"
    }

    /// Wraps a dispatcher result for injection back into the conversation,
    /// addressed by the originating call id.
    pub fn function_call_output(call_id: &str, output: String) -> Self {
        Self {
            item_type: "function_call_output".into(),
            call_id: Some(call_id.to_string()),
            output: Some(output),
            ..Self::default()
        }
    }
}

// --- Client events (sent to the model service) ---

/// Events the bridge produces on the model leg.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },

    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },

    #[serde(rename = "conversation.item.truncate")]
    ConversationItemTruncate {
        item_id: String,
        content_index: u32,
        audio_end_ms: u64,
    },

    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },

    #[serde(rename = "response.create")]
    ResponseCreate,
}

// --- Server events (received from the model service) ---

/// Error detail attached to `error` events.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    #[serde(rename = "type")]
    pub error_type: Option<String>,
    pub code: Option<String>,
    pub message: String,
}

/// Events the bridge consumes from the model leg. Everything else decodes to
/// `Unrecognized` and is only fanned out to the control leg.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "error")]
    Error { error: ApiError },

    #[serde(rename = "session.created")]
    SessionCreated,

    #[serde(rename = "session.updated")]
    SessionUpdated,

    /// The barge-in signal: the caller started talking.
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        audio_start_ms: Option<u64>,
        item_id: Option<String>,
    },

    /// A chunk of assistant audio for telephony playback.
    #[serde(rename = "response.audio.delta")]
    ResponseAudioDelta { item_id: String, delta: String },

    /// A completed output item; function calls are dispatched from here.
    #[serde(rename = "response.output_item.done")]
    OutputItemDone { item: ConversationItem },

    #[serde(other)]
    Unrecognized,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool() -> ToolDef {
        ToolDef {
            tool_type: "function".into(),
            name: "get_current_time".into(),
            description: Some("clock".into()),
            parameters: Some(json!({"type": "object"})),
        }
    }

    #[test]
    fn handshake_without_saved_config_uses_hard_defaults() {
        let config = handshake_config(None, vec![tool()]);
        assert_eq!(config.voice.as_deref(), Some(DEFAULT_VOICE));
        assert_eq!(config.instructions.as_deref(), Some(DEFAULT_INSTRUCTIONS));
        assert_eq!(config.input_audio_format.as_deref(), Some(AUDIO_FORMAT));
        assert_eq!(config.output_audio_format.as_deref(), Some(AUDIO_FORMAT));
        assert_eq!(
            config.tools.map(|t| t.len()),
            Some(1),
            "dispatcher tools are advertised"
        );
        assert!(matches!(
            config.turn_detection,
            Some(TurnDetection::ServerVad { .. })
        ));
    }

    #[test]
    fn handshake_spreads_saved_config_over_defaults() {
        let saved: SessionConfig = serde_json::from_value(json!({
            "voice": "verse",
            "instructions": "You are a pirate.",
            "temperature": 0.6
        }))
        .unwrap();

        let config = handshake_config(Some(&saved), vec![tool()]);
        assert_eq!(config.voice.as_deref(), Some("verse"));
        assert_eq!(config.instructions.as_deref(), Some("You are a pirate."));
        // Untouched fields keep their defaults.
        assert_eq!(config.input_audio_format.as_deref(), Some(AUDIO_FORMAT));
        // Unmodeled fields pass through verbatim.
        assert_eq!(config.extra.get("temperature"), Some(&json!(0.6)));
    }

    #[test]
    fn truncate_event_serializes_to_the_wire_shape() {
        let event = ClientEvent::ConversationItemTruncate {
            item_id: "IT1".into(),
            content_index: 0,
            audio_end_ms: 500,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "conversation.item.truncate",
                "item_id": "IT1",
                "content_index": 0,
                "audio_end_ms": 500
            })
        );
    }

    #[test]
    fn response_create_is_a_bare_tagged_object() {
        let value = serde_json::to_value(&ClientEvent::ResponseCreate).unwrap();
        assert_eq!(value, json!({"type": "response.create"}));
    }

    #[test]
    fn audio_delta_decodes() {
        let event: ServerEvent = serde_json::from_str(
            r#"{"type":"response.audio.delta","item_id":"IT1","delta":"X","output_index":0}"#,
        )
        .unwrap();
        match event {
            ServerEvent::ResponseAudioDelta { item_id, delta } => {
                assert_eq!(item_id, "IT1");
                assert_eq!(delta, "X");
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn function_call_item_decodes_from_output_item_done() {
        let event: ServerEvent = serde_json::from_value(json!({
            "type": "response.output_item.done",
            "item": {
                "type": "function_call",
                "name": "unknown_fn",
                "call_id": "C1",
                "arguments": "{\"x\":1}"
            }
        }))
        .unwrap();
        match event {
            ServerEvent::OutputItemDone { item } => {
                assert!(item.is_function_call());
                assert_eq!(item.call_id.as_deref(), Some("C1"));
                assert_eq!(item.name.as_deref(), Some("unknown_fn"));
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn unknown_event_types_decode_to_unrecognized() {
        let event: ServerEvent = serde_json::from_str(
            r#"{"type":"response.audio_transcript.delta","delta":"hi"}"#,
        )
        .unwrap();
        assert!(matches!(event, ServerEvent::Unrecognized));
    }

    #[test]
    fn function_call_output_is_addressed_by_call_id() {
        let item = ConversationItem::function_call_output("C1", r#"{"ok":true}"#.into());
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "function_call_output",
                "call_id": "C1",
                "output": "{\"ok\":true}"
            })
        );
    }
}

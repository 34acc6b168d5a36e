//! Wire formats for the telephony and control legs.
//!
//! Telephony frames are JSON objects tagged by `event`; control messages are
//! tagged by `type`. Both sides decode once at the boundary into sum types
//! with an explicit `Unrecognized` variant, so unexpected traffic is visible
//! in logs instead of silently swallowed.

use serde::{Deserialize, Serialize};
use switchboard_core::realtime::SessionConfig;

/// Mark label asking the telephony leg to discard buffered, unplayed audio.
pub const CLEAR_AUDIO_MARK: &str = "clear_audio";

// --- Inbound telephony frames ---

/// Frames consumed from the telephony socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelephonyEvent {
    /// The audio stream is up; carries the stream identity.
    Start { start: StreamStart },
    /// One timestamped chunk of caller audio.
    Media { media: MediaFrame },
    /// Hard stop: the call is over, all legs must go.
    Close,
    #[serde(other)]
    Unrecognized,
}

#[derive(Debug, Deserialize)]
pub struct StreamStart {
    #[serde(rename = "streamSid")]
    pub stream_sid: String,
}

#[derive(Debug, Deserialize)]
pub struct MediaFrame {
    /// Milliseconds since the stream started.
    pub timestamp: u64,
    /// Encoded audio, forwarded opaquely.
    pub payload: String,
}

// --- Outbound telephony frames ---

/// Frames produced for the telephony socket.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelephonyOut {
    /// Assistant audio for playback.
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutboundMedia,
    },
    /// Playback synchronization point; a `clear_audio` name asks the leg to
    /// drop anything buffered but unplayed.
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        mark: Option<MarkLabel>,
    },
}

#[derive(Debug, Serialize)]
pub struct OutboundMedia {
    pub payload: String,
}

#[derive(Debug, Serialize)]
pub struct MarkLabel {
    pub name: String,
}

impl TelephonyOut {
    pub fn media(stream_sid: &str, payload: String) -> Self {
        TelephonyOut::Media {
            stream_sid: stream_sid.to_string(),
            media: OutboundMedia { payload },
        }
    }

    /// A bare synchronization mark, sent after each audio chunk.
    pub fn mark(stream_sid: &str) -> Self {
        TelephonyOut::Mark {
            stream_sid: stream_sid.to_string(),
            mark: None,
        }
    }

    /// The discard-buffered-audio mark emitted on barge-in.
    pub fn clear_audio(stream_sid: &str) -> Self {
        TelephonyOut::Mark {
            stream_sid: stream_sid.to_string(),
            mark: Some(MarkLabel {
                name: CLEAR_AUDIO_MARK.to_string(),
            }),
        }
    }
}

// --- Control leg messages ---

/// Messages consumed from the operator console. Anything `Other` is relayed
/// verbatim to the model leg while it is open.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    /// Client-initiated keepalive; answered with `pong`, never forwarded.
    #[serde(rename = "ping")]
    Ping,
    /// Reply to a registry liveness ping.
    #[serde(rename = "pong")]
    Pong,
    /// Configuration update, recorded as the saved session config.
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },
    #[serde(other)]
    Other,
}

/// The keepalive answer sent back for a client `ping`.
pub fn pong_frame() -> String {
    r#"{"type":"pong"}"#.to_string()
}

/// The liveness probe the registry sends on each sweep.
pub fn ping_frame() -> String {
    r#"{"type":"ping"}"#.to_string()
}

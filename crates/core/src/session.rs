//! The single call session shared by the three connection legs.
//!
//! This module owns the process-wide mutable record for the one active call:
//! which legs are attached, the telephony stream identity, the media clock,
//! and the in-flight assistant response tracking that the barge-in truncation
//! decision is computed from. The struct is transport-agnostic; adapters hold
//! it behind an async mutex and apply its outputs to their sockets.

use crate::realtime::SessionConfig;
use std::fmt;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

/// Role of a connection attached to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegKind {
    /// The framed-audio socket from the phone network.
    Telephony,
    /// The operator console observing and configuring the call.
    Control,
    /// The outbound connection to the realtime model service.
    Model,
}

impl fmt::Display for LegKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LegKind::Telephony => write!(f, "telephony"),
            LegKind::Control => write!(f, "control"),
            LegKind::Model => write!(f, "model"),
        }
    }
}

/// Write half of an attached connection.
///
/// Frames are serialized JSON text; the owning adapter's writer task drains
/// the channel onto the actual socket. Dropping every clone of a leg's sender
/// is how that leg gets closed.
#[derive(Debug, Clone)]
pub struct Leg {
    /// Identity of this attachment, used to guard against a displaced
    /// connection's teardown releasing its replacement.
    pub id: Uuid,
    tx: mpsc::UnboundedSender<String>,
}

impl Leg {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tx,
        }
    }

    /// Queues a serialized frame for the socket. Returns `false` when the
    /// writer side is already gone, which callers treat as a closed leg.
    pub fn send(&self, frame: String) -> bool {
        self.tx.send(frame).is_ok()
    }
}

/// Result of a barge-in truncation decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Truncation {
    /// The assistant item whose audio was cut short.
    pub item_id: String,
    /// Milliseconds of that item actually emitted to the telephony leg.
    pub audio_end_ms: u64,
}

/// The single, process-wide call session.
///
/// At most one leg of each kind is attached at a time; attaching a new one
/// displaces the previous (last-writer-wins). The record resets to empty
/// exactly when the last leg detaches.
#[derive(Debug, Default)]
pub struct CallSession {
    telephony: Option<Leg>,
    control: Option<Leg>,
    model: Option<Leg>,
    stream_sid: Option<String>,
    api_key: Option<String>,
    saved_config: Option<SessionConfig>,
    latest_media_timestamp: u64,
    last_assistant_item: Option<String>,
    response_start_timestamp: Option<u64>,
}

impl CallSession {
    fn slot_mut(&mut self, kind: LegKind) -> &mut Option<Leg> {
        match kind {
            LegKind::Telephony => &mut self.telephony,
            LegKind::Control => &mut self.control,
            LegKind::Model => &mut self.model,
        }
    }

    /// Attaches a leg, returning the displaced predecessor if one was live.
    pub fn attach(&mut self, kind: LegKind, leg: Leg) -> Option<Leg> {
        let previous = self.slot_mut(kind).replace(leg);
        if let Some(prev) = &previous {
            info!(%kind, displaced = %prev.id, "Leg replaced by a new connection.");
        }
        previous
    }

    /// Releases a leg, but only if `id` still names the attached connection.
    /// Returns whether anything was actually released.
    pub fn release(&mut self, kind: LegKind, id: Uuid) -> bool {
        let slot = self.slot_mut(kind);
        match slot {
            Some(leg) if leg.id == id => {
                *slot = None;
                debug!(%kind, %id, "Leg released.");
                true
            }
            _ => false,
        }
    }

    /// Detaches whatever is attached for `kind`, regardless of identity.
    pub fn detach(&mut self, kind: LegKind) -> Option<Leg> {
        self.slot_mut(kind).take()
    }

    pub fn telephony(&self) -> Option<&Leg> {
        self.telephony.as_ref()
    }

    pub fn control(&self) -> Option<&Leg> {
        self.control.as_ref()
    }

    pub fn model(&self) -> Option<&Leg> {
        self.model.as_ref()
    }

    /// True when no leg of any kind remains attached.
    pub fn is_empty(&self) -> bool {
        self.telephony.is_none() && self.control.is_none() && self.model.is_none()
    }

    /// Returns the session to its initial state, dropping any remaining leg
    /// senders. The explicit transition keeps "all legs gone, state gone"
    /// deterministic instead of relying on drop order.
    pub fn reset(&mut self) {
        *self = CallSession::default();
        debug!("Session reset to empty.");
    }

    /// Handles the telephony `start` event: records the stream identity and
    /// rewinds the media clock and response tracking for the new call.
    pub fn begin_stream(&mut self, stream_sid: String) {
        info!(stream_sid = %stream_sid, "Telephony stream established.");
        self.stream_sid = Some(stream_sid);
        self.latest_media_timestamp = 0;
        self.last_assistant_item = None;
        self.response_start_timestamp = None;
    }

    /// Clears the call-scoped fields a dead telephony socket invalidates.
    /// The saved operator config and credential survive for the next call as
    /// long as any leg keeps the session alive.
    pub fn clear_call_state(&mut self) {
        self.stream_sid = None;
        self.latest_media_timestamp = 0;
        self.last_assistant_item = None;
        self.response_start_timestamp = None;
    }

    pub fn stream_sid(&self) -> Option<&str> {
        self.stream_sid.as_deref()
    }

    pub fn set_api_key(&mut self, key: String) {
        self.api_key = Some(key);
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub fn save_config(&mut self, config: SessionConfig) {
        self.saved_config = Some(config);
    }

    pub fn saved_config(&self) -> Option<&SessionConfig> {
        self.saved_config.as_ref()
    }

    /// The model leg may only open once the telephony leg, the stream
    /// identity, and the credential are all present.
    pub fn can_open_model(&self) -> bool {
        self.telephony.is_some() && self.stream_sid.is_some() && self.api_key.is_some()
    }

    /// Advances the media clock from an inbound audio frame.
    pub fn record_media_timestamp(&mut self, timestamp: u64) {
        self.latest_media_timestamp = timestamp;
    }

    pub fn latest_media_timestamp(&self) -> u64 {
        self.latest_media_timestamp
    }

    /// Records an assistant audio delta. The response start timestamp is
    /// captured from the media clock on the first delta only; the item id is
    /// refreshed on every delta.
    pub fn note_audio_delta(&mut self, item_id: &str) {
        if self.response_start_timestamp.is_none() {
            self.response_start_timestamp = Some(self.latest_media_timestamp);
            debug!(
                start = self.latest_media_timestamp,
                "Assistant response playback started."
            );
        }
        self.last_assistant_item = Some(item_id.to_string());
    }

    pub fn last_assistant_item(&self) -> Option<&str> {
        self.last_assistant_item.as_deref()
    }

    pub fn response_start_timestamp(&self) -> Option<u64> {
        self.response_start_timestamp
    }

    /// Computes the barge-in truncation for the in-flight response, clearing
    /// both tracking fields together. Returns `None` without touching state
    /// when nothing is playing.
    ///
    /// Elapsed playback derives purely from telephony-side timestamps; a
    /// telephony clock that jumps backwards mid-call saturates to zero here
    /// rather than being resynchronized.
    pub fn take_truncation(&mut self) -> Option<Truncation> {
        let item_id = self.last_assistant_item.clone()?;
        let started = self.response_start_timestamp?;
        let audio_end_ms = self.latest_media_timestamp.saturating_sub(started);
        self.last_assistant_item = None;
        self.response_start_timestamp = None;
        Some(Truncation {
            item_id,
            audio_end_ms,
        })
    }
}

//! Model leg lifecycle.
//!
//! The outbound connection to the realtime model service opens lazily, at
//! most once per session, and only when its preconditions hold. There is no
//! automatic reconnection: a failed or closed model leg clears its slot, and
//! resumption takes a fresh telephony `start` event.

pub mod openai;

use crate::state::AppState;
use std::sync::Arc;
use switchboard_core::session::{Leg, LegKind};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Opens the model leg if it is not already open and the session holds a
/// telephony leg, a stream id, and a credential. Anything short of that is a
/// logged no-op — the ordering race resolves itself when the missing piece
/// arrives.
pub async fn ensure_started(state: &Arc<AppState>) {
    let (leg, rx) = {
        let mut session = state.session.lock().await;
        if session.model().is_some() {
            debug!("Model leg already open.");
            return;
        }
        if !session.can_open_model() {
            warn!("Model leg prerequisites missing; connect deferred.");
            return;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let leg = Leg::new(tx);
        session.attach(LegKind::Model, leg.clone());
        (leg, rx)
    };

    let state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = openai::run(&state, rx).await {
            error!(error = ?e, "Model leg terminated with error.");
        }
        // Release only this leg; everything else keeps running, and the
        // session empties out if nothing else is attached.
        let mut session = state.session.lock().await;
        session.release(LegKind::Model, leg.id);
        if session.is_empty() {
            session.reset();
        } else {
            info!("Model leg closed; session continues without it.");
        }
    });
}

//! Axum Handlers for the Status Surface
//!
//! The bridge's HTTP surface is deliberately thin: a JSON status snapshot of
//! the one session, used by deployment health checks and the operator
//! console's connect screen.

use axum::{Json, extract::State};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::state::AppState;

/// Snapshot of the bridge for health checks.
#[derive(Serialize, Debug)]
pub struct StatusResponse {
    pub service: &'static str,
    pub time: DateTime<Utc>,
    pub telephony_attached: bool,
    pub control_attached: bool,
    pub model_attached: bool,
    pub stream_sid: Option<String>,
    pub tracked_observers: usize,
}

/// Reports whether each leg is attached and which stream is live.
pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let session = state.session.lock().await;
    Json(StatusResponse {
        service: "switchboard",
        time: Utc::now(),
        telephony_attached: session.telephony().is_some(),
        control_attached: session.control().is_some(),
        model_attached: session.model().is_some(),
        stream_sid: session.stream_sid().map(str::to_string),
        tracked_observers: state.registry.count().await,
    })
}

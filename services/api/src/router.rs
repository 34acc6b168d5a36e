//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application: the
//! two WebSocket legs and the status surface.

use crate::{handlers, state::AppState, ws};

use axum::{Router, routing::get};
use std::sync::Arc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::status))
        .route("/health", get(handlers::status))
        .route("/call", get(ws::telephony::ws_handler))
        .route("/control", get(ws::control::ws_handler))
        .with_state(app_state)
}

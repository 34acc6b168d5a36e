//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the single call
//! session, the function dispatcher, and the connection registry that every
//! leg adapter works against.

use crate::{config::Config, ws::registry::Registry};
use std::sync::Arc;
use switchboard_core::{dispatch::Dispatcher, session::CallSession};
use tokio::sync::Mutex;

/// Handle to the one process-wide session. The async mutex serializes every
/// mutation, standing in for the single-threaded event loop of a classic
/// bridge process.
pub type SharedSession = Arc<Mutex<CallSession>>;

/// The shared application state, created once at startup and passed to all
/// handlers.
#[derive(Clone)]
pub struct AppState {
    pub session: SharedSession,
    pub dispatcher: Arc<Dispatcher>,
    pub registry: Arc<Registry>,
    pub config: Arc<Config>,
}

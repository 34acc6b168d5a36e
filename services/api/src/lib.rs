//! Switchboard API Library Crate
//!
//! This library contains all the service-side logic for the call session
//! bridge: configuration, the shared application state, the HTTP router,
//! and the WebSocket leg adapters. The `api` binary is a thin wrapper
//! around this library.

pub mod config;
pub mod handlers;
pub mod router;
pub mod state;
pub mod ws;

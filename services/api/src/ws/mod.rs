//! WebSocket Leg Adapters
//!
//! This module contains the three duplex legs of a bridged call and their
//! shared plumbing. It is structured into submodules for clarity:
//!
//! - `protocol`: JSON frame formats for the telephony and control legs.
//! - `telephony`: the inbound audio leg from the phone network.
//! - `control`: the operator console leg (observe + configure).
//! - `provider`: the outbound leg to the realtime model service.
//! - `registry`: liveness bookkeeping and heartbeat for observer sockets.

pub mod control;
pub mod protocol;
pub mod provider;
pub mod registry;
pub mod telephony;
